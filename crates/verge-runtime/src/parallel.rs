//! Worker-pool fan-out over contiguous output ranges.
//!
//! Every parallel kernel splits its output into unit-aligned contiguous
//! chunks, one per worker. Disjointness is structural (`par_chunks_mut`), so
//! workers never alias, and the chunk boundaries are deterministic for a
//! given (total, degree) pair.

use rayon::prelude::*;
use verge_core::Result;

/// Ceiling division.
#[inline]
pub fn up_div(a: usize, b: usize) -> usize {
    debug_assert!(b > 0);
    a.div_ceil(b)
}

/// Run `task(task_id)` for ids `0..degree` on the worker pool, returning the
/// first error if any task fails.
pub fn parallel_launch<F>(pool: &rayon::ThreadPool, degree: usize, task: F) -> Result<()>
where
    F: Fn(usize) -> Result<()> + Sync,
{
    if degree <= 1 {
        for id in 0..degree {
            task(id)?;
        }
        return Ok(());
    }
    pool.install(|| (0..degree).into_par_iter().try_for_each(|id| task(id)))
}

/// Split `data` into up to `degree` contiguous chunks of whole units and run
/// `work(unit_start, chunk)` on each.
///
/// `data.len()` must be a multiple of `unit`. With fewer units than workers
/// the trailing workers simply get nothing.
pub fn launch_chunks<T, F>(
    pool: &rayon::ThreadPool,
    data: &mut [T],
    unit: usize,
    degree: usize,
    work: F,
) -> Result<()>
where
    T: Send,
    F: Fn(usize, &mut [T]) -> Result<()> + Sync,
{
    debug_assert!(unit > 0 && data.len() % unit == 0);
    let total_units = data.len() / unit;
    if total_units == 0 {
        return Ok(());
    }
    let chunk_units = up_div(total_units, degree.max(1));
    if chunk_units >= total_units || degree <= 1 {
        return work(0, data);
    }
    pool.install(|| {
        data.par_chunks_mut(chunk_units * unit)
            .enumerate()
            .try_for_each(|(i, chunk)| work(i * chunk_units, chunk))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use verge_core::VergeError;

    fn pool(threads: usize) -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .unwrap()
    }

    #[test]
    fn test_up_div() {
        assert_eq!(up_div(10, 3), 4);
        assert_eq!(up_div(9, 3), 3);
        assert_eq!(up_div(1, 8), 1);
        assert_eq!(up_div(0, 4), 0);
    }

    #[test]
    fn test_parallel_launch_runs_all_ids() {
        let p = pool(4);
        let seen = Mutex::new(vec![false; 8]);
        parallel_launch(&p, 8, |id| {
            seen.lock()[id] = true;
            Ok(())
        })
        .unwrap();
        assert!(seen.lock().iter().all(|&s| s));
    }

    #[test]
    fn test_parallel_launch_propagates_error() {
        let p = pool(4);
        let err = parallel_launch(&p, 4, |id| {
            if id == 2 {
                Err(VergeError::contract("task 2 failed"))
            } else {
                Ok(())
            }
        });
        assert_eq!(err, Err(VergeError::contract("task 2 failed")));
    }

    #[test]
    fn test_chunks_cover_exactly_once() {
        // Every element written exactly once, for a grid of degrees/sizes.
        let p = pool(4);
        for &n in &[0usize, 1, 7, 64, 1000] {
            for &degree in &[1usize, 2, 4, 8] {
                let mut data = vec![0u32; n];
                launch_chunks(&p, &mut data, 1, degree, |start, chunk| {
                    for (i, v) in chunk.iter_mut().enumerate() {
                        *v += (start + i) as u32 + 1;
                    }
                    Ok(())
                })
                .unwrap();
                for (i, &v) in data.iter().enumerate() {
                    assert_eq!(v, i as u32 + 1, "n={n} degree={degree} i={i}");
                }
            }
        }
    }

    #[test]
    fn test_chunks_respect_unit_alignment() {
        let p = pool(4);
        let unit = 3;
        let mut data = vec![0usize; 10 * unit];
        launch_chunks(&p, &mut data, unit, 4, |start, chunk| {
            assert_eq!(chunk.len() % unit, 0);
            for (i, v) in chunk.iter_mut().enumerate() {
                *v = start * unit + i;
            }
            Ok(())
        })
        .unwrap();
        for (i, &v) in data.iter().enumerate() {
            assert_eq!(v, i);
        }
    }

    #[test]
    fn test_chunk_error_propagates() {
        let p = pool(2);
        let mut data = vec![0u8; 100];
        let res = launch_chunks(&p, &mut data, 1, 4, |start, _| {
            if start > 0 {
                Err(VergeError::contract("boom"))
            } else {
                Ok(())
            }
        });
        assert!(res.is_err());
    }
}
