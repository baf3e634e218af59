//! f32 batch normalization kernel.
//!
//! Three inputs run the plain normalization, five run the fused variant with
//! learned scale and offset. Channel statistics have one entry per trailing
//! dimension; work splits on channel-aligned boundaries.

use verge_core::{DType, Result, VergeError};
use verge_kernels::batchnorm::{batchnorm_f32, fused_batchnorm_f32};

use crate::kernel::{Kernel, OpParams, RunContext};
use crate::parallel::launch_chunks;
use crate::pool::{TensorId, TensorPool};
use crate::registry::KernelSpec;

pub struct BatchNormKernel {
    name: String,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    epsilon: f32,
    channels: usize,
}

pub fn create(spec: KernelSpec) -> Result<Box<dyn Kernel>> {
    let OpParams::BatchNorm { epsilon } = spec.params else {
        return Err(VergeError::contract(format!(
            "kernel {}: expected batchnorm params",
            spec.name
        )));
    };
    Ok(Box::new(BatchNormKernel {
        name: spec.name,
        inputs: spec.inputs,
        outputs: spec.outputs,
        epsilon,
        channels: 0,
    }))
}

impl BatchNormKernel {
    fn fused(&self) -> bool {
        self.inputs.len() == 5
    }
}

impl Kernel for BatchNormKernel {
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
        if !(self.inputs.len() == 3 || self.inputs.len() == 5) || self.outputs.len() != 1 {
            return Err(VergeError::contract(format!(
                "kernel {}: batchnorm takes (x, mean, variance) or \
                 (x, scale, offset, mean, variance) and 1 output",
                self.name
            )));
        }
        let x = pool.get(self.inputs[0])?;
        if x.dtype() != DType::F32 {
            return Err(VergeError::UnsupportedDType {
                dtype: x.dtype(),
                op: "batchnorm".into(),
            });
        }
        let channels = x.shape().dims().last().copied().unwrap_or(1);
        if channels == 0 {
            return Err(VergeError::InferFailed(format!(
                "kernel {}: zero-channel input",
                self.name
            )));
        }
        for &id in &self.inputs[1..] {
            let stat = pool.get(id)?;
            if stat.dtype() != DType::F32 || stat.element_num() != channels {
                return Err(VergeError::contract(format!(
                    "kernel {}: channel statistics must be {channels} f32 elements",
                    self.name
                )));
            }
        }
        self.channels = channels;
        let dims = x.shape().dims().to_vec();
        pool.get_mut(self.outputs[0])?.set_shape(&dims);
        Ok(())
    }

    fn run(&mut self, pool: &mut TensorPool, ctx: &RunContext<'_>) -> Result<()> {
        if self.channels == 0 {
            return Err(VergeError::contract("kernel run before init"));
        }
        let (ins, mut outs) = pool.io(&self.inputs, &self.outputs)?;
        let x = ins[0].as_f32()?;
        let out = outs[0].as_f32_mut()?;
        let (channels, epsilon) = (self.channels, self.epsilon);

        if self.fused() {
            let scale = ins[1].as_f32()?;
            let offset = ins[2].as_f32()?;
            let mean = ins[3].as_f32()?;
            let variance = ins[4].as_f32()?;
            launch_chunks(ctx.workers, out, channels, ctx.thread_num, |start, chunk| {
                let lo = start * channels;
                fused_batchnorm_f32(
                    &x[lo..lo + chunk.len()],
                    scale,
                    offset,
                    mean,
                    variance,
                    epsilon,
                    channels,
                    chunk,
                );
                Ok(())
            })
        } else {
            let mean = ins[1].as_f32()?;
            let variance = ins[2].as_f32()?;
            launch_chunks(ctx.workers, out, channels, ctx.thread_num, |start, chunk| {
                let lo = start * channels;
                batchnorm_f32(&x[lo..lo + chunk.len()], mean, variance, epsilon, channels, chunk);
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ScratchAllocator;
    use crate::kernels::test_util::{run_ctx, worker_pool};
    use verge_core::{Category, Format, Tensor};

    fn run(k: &mut BatchNormKernel, pool: &mut TensorPool) -> Result<()> {
        let workers = worker_pool(2);
        let scratch = ScratchAllocator::new();
        let ctx = run_ctx(&workers, &scratch);
        k.init(pool)?;
        k.pre_process(pool)?;
        k.run(pool, &ctx)
    }

    fn kernel(inputs: Vec<TensorId>, out: TensorId, epsilon: f32) -> BatchNormKernel {
        BatchNormKernel {
            name: "bn".into(),
            inputs,
            outputs: vec![out],
            epsilon,
            channels: 0,
        }
    }

    #[test]
    fn test_plain_batchnorm() {
        let mut pool = TensorPool::new();
        let x = pool.insert(Tensor::from_f32(&[4.0, 3.0, 0.0, -3.0], &[2, 2]));
        let mean = pool.insert(Tensor::from_f32(&[2.0, 0.0], &[2]).into_const());
        let var = pool.insert(Tensor::from_f32(&[4.0, 1.0], &[2]).into_const());
        let out = pool.insert(Tensor::new(DType::F32, &[], Format::Nhwc, Category::Var));
        let mut k = kernel(vec![x, mean, var], out, 0.0);
        run(&mut k, &mut pool).unwrap();
        assert_eq!(pool.get(out).unwrap().as_f32().unwrap(), &[1.0, 3.0, -1.0, -3.0]);
    }

    #[test]
    fn test_fused_batchnorm() {
        let mut pool = TensorPool::new();
        let x = pool.insert(Tensor::from_f32(&[4.0, 3.0], &[1, 2]));
        let scale = pool.insert(Tensor::from_f32(&[10.0, 2.0], &[2]).into_const());
        let offset = pool.insert(Tensor::from_f32(&[1.0, -1.0], &[2]).into_const());
        let mean = pool.insert(Tensor::from_f32(&[2.0, 0.0], &[2]).into_const());
        let var = pool.insert(Tensor::from_f32(&[4.0, 1.0], &[2]).into_const());
        let out = pool.insert(Tensor::new(DType::F32, &[], Format::Nhwc, Category::Var));
        let mut k = kernel(vec![x, scale, offset, mean, var], out, 0.0);
        run(&mut k, &mut pool).unwrap();
        assert_eq!(pool.get(out).unwrap().as_f32().unwrap(), &[11.0, 5.0]);
    }

    #[test]
    fn test_statistics_length_checked() {
        let mut pool = TensorPool::new();
        let x = pool.insert(Tensor::from_f32(&[1.0, 2.0, 3.0], &[1, 3]));
        let mean = pool.insert(Tensor::from_f32(&[0.0], &[1]).into_const()); // wrong
        let var = pool.insert(Tensor::from_f32(&[1.0, 1.0, 1.0], &[3]).into_const());
        let out = pool.insert(Tensor::new(DType::F32, &[], Format::Nhwc, Category::Var));
        let mut k = kernel(vec![x, mean, var], out, 1e-5);
        assert!(matches!(run(&mut k, &mut pool), Err(VergeError::Contract(_))));
    }

    #[test]
    fn test_large_input_parallel_consistent() {
        let channels = 3;
        let rows = 101;
        let x_data: Vec<f32> = (0..rows * channels).map(|i| (i % 17) as f32 - 8.0).collect();
        let mean_data = [0.5f32, -1.0, 2.0];
        let var_data = [1.0f32, 4.0, 0.25];

        let mut pool = TensorPool::new();
        let x = pool.insert(Tensor::from_f32(&x_data, &[rows, channels]));
        let mean = pool.insert(Tensor::from_f32(&mean_data, &[channels]).into_const());
        let var = pool.insert(Tensor::from_f32(&var_data, &[channels]).into_const());
        let out = pool.insert(Tensor::new(DType::F32, &[], Format::Nhwc, Category::Var));
        let mut k = kernel(vec![x, mean, var], out, 1e-5);
        run(&mut k, &mut pool).unwrap();

        let mut want = vec![0.0f32; x_data.len()];
        batchnorm_f32(&x_data, &mean_data, &var_data, 1e-5, channels, &mut want);
        assert_eq!(pool.get(out).unwrap().as_f32().unwrap(), &want[..]);
    }
}
