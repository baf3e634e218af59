//! Tensor pool: slab ownership of every tensor in a subgraph.
//!
//! Kernels and the executor refer to tensors by `TensorId`. The pool hands
//! out simultaneous shared input and mutable output borrows after checking
//! the id sets are disjoint, which is what lets a kernel read operands while
//! writing results without cloning.

use verge_core::{Result, Tensor, VergeError};

/// Index of a tensor within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(pub usize);

/// Owns the tensors of one executable subgraph.
#[derive(Default)]
pub struct TensorPool {
    tensors: Vec<Tensor>,
}

impl TensorPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tensor, returning its id.
    pub fn insert(&mut self, tensor: Tensor) -> TensorId {
        self.tensors.push(tensor);
        TensorId(self.tensors.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn get(&self, id: TensorId) -> Result<&Tensor> {
        self.tensors
            .get(id.0)
            .ok_or_else(|| VergeError::contract(format!("tensor id {} out of range", id.0)))
    }

    pub fn get_mut(&mut self, id: TensorId) -> Result<&mut Tensor> {
        self.tensors
            .get_mut(id.0)
            .ok_or_else(|| VergeError::contract(format!("tensor id {} out of range", id.0)))
    }

    /// Borrow `inputs` shared and `outputs` mutable at the same time.
    ///
    /// Fails if any id is out of range, an output repeats, or an output is
    /// also an input (in-place execution is not supported).
    pub fn io(
        &mut self,
        inputs: &[TensorId],
        outputs: &[TensorId],
    ) -> Result<(Vec<&Tensor>, Vec<&mut Tensor>)> {
        for &id in inputs.iter().chain(outputs) {
            if id.0 >= self.tensors.len() {
                return Err(VergeError::contract(format!("tensor id {} out of range", id.0)));
            }
        }
        for (i, &out) in outputs.iter().enumerate() {
            if outputs[..i].contains(&out) {
                return Err(VergeError::contract(format!(
                    "output tensor id {} repeated",
                    out.0
                )));
            }
            if inputs.contains(&out) {
                return Err(VergeError::contract(format!(
                    "tensor id {} used as both input and output",
                    out.0
                )));
            }
        }

        let base = self.tensors.as_mut_ptr();
        // Ids are in range, outputs are distinct from each other and from
        // every input, so these borrows never alias.
        let ins = inputs
            .iter()
            .map(|&id| unsafe { &*base.add(id.0) })
            .collect();
        let outs = outputs
            .iter()
            .map(|&id| unsafe { &mut *base.add(id.0) })
            .collect();
        Ok((ins, outs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verge_core::{Category, DType, Format};

    fn var(shape: &[usize]) -> Tensor {
        Tensor::new(DType::F32, shape, Format::Nhwc, Category::Var)
    }

    #[test]
    fn test_insert_and_get() {
        let mut pool = TensorPool::new();
        let a = pool.insert(var(&[2, 2]));
        let b = pool.insert(var(&[3]));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(a).unwrap().element_num(), 4);
        assert_eq!(pool.get(b).unwrap().element_num(), 3);
        assert!(pool.get(TensorId(7)).is_err());
    }

    #[test]
    fn test_io_disjoint_borrows() {
        let mut pool = TensorPool::new();
        let a = pool.insert(Tensor::from_f32(&[1.0, 2.0], &[2]));
        let b = pool.insert(Tensor::from_f32(&[3.0, 4.0], &[2]));
        let out = pool.insert(var(&[2]));
        pool.get_mut(out).unwrap().malloc_data().unwrap();

        let (ins, mut outs) = pool.io(&[a, b], &[out]).unwrap();
        let x = ins[0].as_f32().unwrap();
        let y = ins[1].as_f32().unwrap();
        let z = outs[0].as_f32_mut().unwrap();
        for i in 0..2 {
            z[i] = x[i] + y[i];
        }
        drop(outs);
        assert_eq!(pool.get(out).unwrap().as_f32().unwrap(), &[4.0, 6.0]);
    }

    #[test]
    fn test_io_rejects_aliasing() {
        let mut pool = TensorPool::new();
        let a = pool.insert(var(&[1]));
        let b = pool.insert(var(&[1]));
        assert!(pool.io(&[a], &[a]).is_err());
        assert!(pool.io(&[a], &[b, b]).is_err());
        assert!(pool.io(&[a], &[b]).is_ok());
        // Duplicate inputs are fine.
        assert!(pool.io(&[a, a], &[b]).is_ok());
    }

    #[test]
    fn test_io_rejects_bad_ids() {
        let mut pool = TensorPool::new();
        let a = pool.insert(var(&[1]));
        assert!(pool.io(&[a], &[TensorId(9)]).is_err());
        assert!(pool.io(&[TensorId(9)], &[a]).is_err());
    }
}
