//! Int8 layer normalization kernel.
//!
//! The operator attribute names how many trailing dimensions are normalized;
//! everything in front of them becomes independent rows. The affine form
//! takes three inputs (source, int8 gamma, int32 beta), the plain form one.
//! Work splits over contiguous row units.

use verge_core::{DType, Result, VergeError};
use verge_kernels::layer_norm_int8::{layer_norm_int8, LayerNormQuantArgs};

use crate::kernel::{Kernel, OpParams, RunContext};
use crate::parallel::launch_chunks;
use crate::pool::{TensorId, TensorPool};
use crate::registry::KernelSpec;

pub struct LayerNormInt8Kernel {
    name: String,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    normalized_dims: usize,
    epsilon: f32,
    inner: Option<usize>,
    quant: Option<LayerNormQuantArgs>,
}

pub fn create(spec: KernelSpec) -> Result<Box<dyn Kernel>> {
    let OpParams::LayerNorm { normalized_dims, epsilon } = spec.params else {
        return Err(VergeError::contract(format!(
            "kernel {}: expected layer norm params",
            spec.name
        )));
    };
    Ok(Box::new(LayerNormInt8Kernel {
        name: spec.name,
        inputs: spec.inputs,
        outputs: spec.outputs,
        normalized_dims,
        epsilon,
        inner: None,
        quant: None,
    }))
}

impl LayerNormInt8Kernel {
    fn affine(&self) -> bool {
        self.inputs.len() == 3
    }
}

impl Kernel for LayerNormInt8Kernel {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> &[TensorId] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorId] {
        &self.outputs
    }

    fn init(&mut self, pool: &mut TensorPool) -> Result<()> {
        if !(self.inputs.len() == 1 || self.inputs.len() == 3) || self.outputs.len() != 1 {
            return Err(VergeError::contract(format!(
                "kernel {}: layer norm takes 1 or 3 inputs and 1 output",
                self.name
            )));
        }
        let src = pool.get(self.inputs[0])?;
        let out = pool.get(self.outputs[0])?;
        for (t, role) in [(src, "input"), (out, "output")] {
            if t.dtype() != DType::I8 {
                return Err(VergeError::UnsupportedDType {
                    dtype: t.dtype(),
                    op: format!("int8 layer norm {role}"),
                });
            }
        }
        let dims = src.shape().dims().to_vec();
        if self.normalized_dims == 0 || self.normalized_dims > dims.len() {
            return Err(VergeError::InferFailed(format!(
                "kernel {}: cannot normalize {} trailing dims of a rank-{} tensor",
                self.name,
                self.normalized_dims,
                dims.len()
            )));
        }
        let inner: usize = dims[dims.len() - self.normalized_dims..].iter().product();
        if inner == 0 {
            return Err(VergeError::InferFailed(format!(
                "kernel {}: normalized extent is empty",
                self.name
            )));
        }

        let qin = src.first_quant()?;
        let qgamma = if self.affine() {
            let gamma = pool.get(self.inputs[1])?;
            let beta = pool.get(self.inputs[2])?;
            if gamma.dtype() != DType::I8 || beta.dtype() != DType::I32 {
                return Err(VergeError::contract(format!(
                    "kernel {}: affine layer norm takes an i8 gamma and an i32 beta",
                    self.name
                )));
            }
            if gamma.element_num() != inner || beta.element_num() != inner {
                return Err(VergeError::contract(format!(
                    "kernel {}: gamma and beta must hold {inner} elements",
                    self.name
                )));
            }
            Some(gamma.first_quant()?)
        } else {
            None
        };
        let out = pool.get_mut(self.outputs[0])?;
        out.set_shape(&dims);
        let qout = out.first_quant()?;

        self.quant = Some(LayerNormQuantArgs::new(qin, qgamma, qout)?);
        self.inner = Some(inner);
        Ok(())
    }

    fn run(&mut self, pool: &mut TensorPool, ctx: &RunContext<'_>) -> Result<()> {
        let (Some(inner), Some(q)) = (self.inner, self.quant) else {
            return Err(VergeError::contract("kernel run before init"));
        };
        let (ins, mut outs) = pool.io(&self.inputs, &self.outputs)?;
        let src = ins[0].as_i8()?;
        let affine = if self.affine() {
            Some((ins[1].as_i8()?, ins[2].as_i32()?))
        } else {
            None
        };
        let out = outs[0].as_i8_mut()?;
        let epsilon = self.epsilon;

        launch_chunks(ctx.workers, out, inner, ctx.thread_num, |start, chunk| {
            layer_norm_int8(src, affine, chunk, start, inner, epsilon, &q);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ScratchAllocator;
    use crate::kernels::test_util::{run_ctx, worker_pool};
    use verge_core::{Category, Format, QuantParam, Tensor};

    fn qp(scale: f64, zp: i32) -> QuantParam {
        QuantParam { scale, zero_point: zp }
    }

    fn kernel(
        pool: &mut TensorPool,
        src: Tensor,
        affine: Option<(Tensor, Tensor)>,
        normalized_dims: usize,
    ) -> (LayerNormInt8Kernel, TensorId) {
        let mut inputs = vec![pool.insert(src)];
        if let Some((gamma, beta)) = affine {
            inputs.push(pool.insert(gamma));
            inputs.push(pool.insert(beta));
        }
        let mut out = Tensor::new(DType::I8, &[], Format::Nhwc, Category::Var);
        out.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let out_id = pool.insert(out);
        let k = LayerNormInt8Kernel {
            name: "layer_norm".into(),
            inputs,
            outputs: vec![out_id],
            normalized_dims,
            epsilon: 1e-5,
            inner: None,
            quant: None,
        };
        (k, out_id)
    }

    fn run(k: &mut LayerNormInt8Kernel, pool: &mut TensorPool) -> Result<()> {
        let workers = worker_pool(2);
        let scratch = ScratchAllocator::new();
        let ctx = run_ctx(&workers, &scratch);
        k.init(pool)?;
        k.pre_process(pool)?;
        k.run(pool, &ctx)
    }

    #[test]
    fn test_rows_normalized_over_last_dim() {
        let mut pool = TensorPool::new();
        let mut src = Tensor::from_i8(&[0, 10, 100, 120], &[2, 2]);
        src.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let (mut k, out) = kernel(&mut pool, src, None, 1);
        run(&mut k, &mut pool).unwrap();
        let out = pool.get(out).unwrap();
        assert_eq!(out.shape().dims(), &[2, 2]);
        assert_eq!(out.as_i8().unwrap(), &[-1, 1, -1, 1]);
    }

    #[test]
    fn test_affine_gamma_beta() {
        let mut pool = TensorPool::new();
        let mut src = Tensor::from_i8(&[0, 10], &[1, 2]);
        src.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let mut gamma = Tensor::from_i8(&[2, 2], &[2]).into_const();
        gamma.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let beta = Tensor::from_i32(&[0, 100], &[2]).into_const();
        let (mut k, out) = kernel(&mut pool, src, Some((gamma, beta)), 1);
        run(&mut k, &mut pool).unwrap();
        assert_eq!(pool.get(out).unwrap().as_i8().unwrap(), &[-2, 102]);
    }

    #[test]
    fn test_normalizing_all_dims_spans_rows() {
        // normalized_dims covering the whole shape makes one row of 4.
        let mut pool = TensorPool::new();
        let mut src = Tensor::from_i8(&[0, 0, 10, 10], &[2, 2]);
        src.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let (mut k, out) = kernel(&mut pool, src, None, 2);
        run(&mut k, &mut pool).unwrap();
        assert_eq!(pool.get(out).unwrap().as_i8().unwrap(), &[-1, -1, 1, 1]);
    }

    #[test]
    fn test_rejects_bad_normalized_dims() {
        let mut pool = TensorPool::new();
        let mut src = Tensor::from_i8(&[1, 2], &[2]);
        src.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let (mut k, _) = kernel(&mut pool, src, None, 3);
        assert!(matches!(
            k.init(&mut pool),
            Err(VergeError::InferFailed(_))
        ));
    }

    #[test]
    fn test_rejects_mismatched_gamma() {
        let mut pool = TensorPool::new();
        let mut src = Tensor::from_i8(&[0, 10], &[1, 2]);
        src.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let mut gamma = Tensor::from_i8(&[1], &[1]).into_const(); // wrong: inner is 2
        gamma.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let beta = Tensor::from_i32(&[0, 0], &[2]).into_const();
        let (mut k, _) = kernel(&mut pool, src, Some((gamma, beta)), 1);
        assert!(matches!(k.init(&mut pool), Err(VergeError::Contract(_))));
    }
}
