//! f32 matrix multiplication with operand packing.
//!
//! `C[row, col] = A[row, deep] @ B[deep, col] + bias`, with B repacked to
//! column-major once per operand change so every output element is a
//! contiguous dot product. Callers parallelize over contiguous output row
//! ranges; a single-row A (the fully-connected vector case) needs no special
//! handling.

use crate::activation::Activation;

/// Pack B into column-major order (`dst[c * deep + d] = B[d, c]`).
///
/// When `transposed`, B is already stored `[col, deep]` and packing is a
/// plain copy.
pub fn pack_matmul_b(b: &[f32], deep: usize, col: usize, transposed: bool, dst: &mut [f32]) {
    debug_assert_eq!(b.len(), deep * col);
    debug_assert_eq!(dst.len(), deep * col);
    if transposed {
        dst.copy_from_slice(b);
        return;
    }
    for c in 0..col {
        for d in 0..deep {
            dst[c * deep + d] = b[d * col + c];
        }
    }
}

/// Multiply a contiguous block of A rows against packed B.
///
/// `a_rows` holds `rows * deep` elements and `out_rows` the matching
/// `rows * col` destination, where `rows = out_rows.len() / col`. `bias`,
/// when present, must have one entry per output column.
pub fn matmul_rows_f32(
    a_rows: &[f32],
    b_packed: &[f32],
    bias: Option<&[f32]>,
    out_rows: &mut [f32],
    deep: usize,
    col: usize,
    act: Activation,
) {
    debug_assert!(col > 0 && out_rows.len() % col == 0);
    let rows = out_rows.len() / col;
    debug_assert_eq!(a_rows.len(), rows * deep);
    debug_assert_eq!(b_packed.len(), deep * col);
    if let Some(bias) = bias {
        debug_assert_eq!(bias.len(), col);
    }

    for r in 0..rows {
        let a = &a_rows[r * deep..(r + 1) * deep];
        let out = &mut out_rows[r * col..(r + 1) * col];
        for c in 0..col {
            let b = &b_packed[c * deep..(c + 1) * deep];
            let mut acc = bias.map_or(0.0, |bv| bv[c]);
            for d in 0..deep {
                acc += a[d] * b[d];
            }
            out[c] = act.apply_f32(acc);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matmul_basic() {
        // [2,3] @ [3,2]
        let a = [1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0];
        let mut packed = [0.0f32; 6];
        pack_matmul_b(&b, 3, 2, false, &mut packed);
        let mut out = [0.0f32; 4];
        matmul_rows_f32(&a, &packed, None, &mut out, 3, 2, Activation::None);
        assert_eq!(out, [58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_pack_transposed_is_copy() {
        let b = [7.0f32, 9.0, 11.0, 8.0, 10.0, 12.0]; // [2,3] = B^T
        let mut from_t = [0.0f32; 6];
        pack_matmul_b(&b, 3, 2, true, &mut from_t);
        assert_eq!(from_t, b);

        let b_plain = [7.0f32, 8.0, 9.0, 10.0, 11.0, 12.0]; // [3,2]
        let mut from_plain = [0.0f32; 6];
        pack_matmul_b(&b_plain, 3, 2, false, &mut from_plain);
        assert_eq!(from_plain, from_t);
    }

    #[test]
    fn test_bias_and_activation() {
        let a = [1.0f32, -1.0];
        let b = [2.0f32, 3.0, 4.0, 5.0]; // [2,2]
        let mut packed = [0.0f32; 4];
        pack_matmul_b(&b, 2, 2, false, &mut packed);
        let bias = [0.5f32, -10.0];
        let mut out = [0.0f32; 2];
        matmul_rows_f32(&a, &packed, Some(&bias), &mut out, 2, 2, Activation::None);
        assert_eq!(out, [-1.5, -12.0]);
        matmul_rows_f32(&a, &packed, Some(&bias), &mut out, 2, 2, Activation::Relu);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn test_row_ranges_cover_full_product() {
        let rows = 5;
        let deep = 4;
        let col = 3;
        let a: Vec<f32> = (0..rows * deep).map(|i| (i % 7) as f32 - 3.0).collect();
        let b: Vec<f32> = (0..deep * col).map(|i| (i % 5) as f32 * 0.5).collect();
        let mut packed = vec![0.0f32; deep * col];
        pack_matmul_b(&b, deep, col, false, &mut packed);

        let mut full = vec![0.0f32; rows * col];
        matmul_rows_f32(&a, &packed, None, &mut full, deep, col, Activation::None);

        let mut split = vec![0.0f32; rows * col];
        let (lo, hi) = split.split_at_mut(2 * col);
        matmul_rows_f32(&a[..2 * deep], &packed, None, lo, deep, col, Activation::None);
        matmul_rows_f32(&a[2 * deep..], &packed, None, hi, deep, col, Activation::None);
        assert_eq!(split, full);
    }

    #[test]
    fn test_vector_times_matrix() {
        // row == 1 runs through the same path.
        let a = [1.0f32, 2.0, 3.0];
        let b = [1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0]; // [3,2]
        let mut packed = [0.0f32; 6];
        pack_matmul_b(&b, 3, 2, false, &mut packed);
        let mut out = [0.0f32; 2];
        matmul_rows_f32(&a, &packed, None, &mut out, 3, 2, Activation::None);
        assert_eq!(out, [4.0, 5.0]);
    }
}
