//! Int8 resize kernel over NHWC tensors.
//!
//! The target extent comes from the operator attributes; batch and channel
//! counts pass through. Work splits over contiguous output row units.

use verge_core::{DType, Format, Result, VergeError};
use verge_kernels::resize_int8::{
    resize_bilinear_int8, resize_nearest_int8, ResizeGeometry, ResizeMethod, ResizeQuantArgs,
};

use crate::kernel::{Kernel, OpParams, RunContext};
use crate::parallel::launch_chunks;
use crate::pool::{TensorId, TensorPool};
use crate::registry::KernelSpec;

pub struct ResizeInt8Kernel {
    name: String,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    method: ResizeMethod,
    new_height: usize,
    new_width: usize,
    align_corners: bool,
    geometry: Option<ResizeGeometry>,
    quant: Option<ResizeQuantArgs>,
}

pub fn create(spec: KernelSpec) -> Result<Box<dyn Kernel>> {
    let OpParams::Resize { method, new_height, new_width, align_corners } = spec.params else {
        return Err(VergeError::contract(format!(
            "kernel {}: expected resize params",
            spec.name
        )));
    };
    Ok(Box::new(ResizeInt8Kernel {
        name: spec.name,
        inputs: spec.inputs,
        outputs: spec.outputs,
        method,
        new_height,
        new_width,
        align_corners,
        geometry: None,
        quant: None,
    }))
}

impl Kernel for ResizeInt8Kernel {
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
        if self.inputs.len() != 1 || self.outputs.len() != 1 {
            return Err(VergeError::contract(format!(
                "kernel {}: resize takes 1 input and 1 output",
                self.name
            )));
        }
        let input = pool.get(self.inputs[0])?;
        if input.dtype() != DType::I8 {
            return Err(VergeError::UnsupportedDType {
                dtype: input.dtype(),
                op: "int8 resize".into(),
            });
        }
        if input.format() != Format::Nhwc || input.shape().ndim() != 4 {
            return Err(VergeError::contract(format!(
                "kernel {}: resize expects a 4D NHWC input, got {:?}",
                self.name,
                input.shape()
            )));
        }
        if self.new_height == 0 || self.new_width == 0 {
            return Err(VergeError::InferFailed(format!(
                "kernel {}: target extent {}x{} is empty",
                self.name, self.new_height, self.new_width
            )));
        }

        let dims = input.shape().dims();
        let geometry = ResizeGeometry {
            batch: dims[0],
            in_h: dims[1],
            in_w: dims[2],
            channels: dims[3],
            out_h: self.new_height,
            out_w: self.new_width,
            align_corners: self.align_corners,
        };
        let in_quant = input.first_quant()?;
        let out_dims = [dims[0], self.new_height, self.new_width, dims[3]];
        let out = pool.get_mut(self.outputs[0])?;
        out.set_shape(&out_dims);
        let out_quant = out.first_quant()?;

        self.quant = Some(ResizeQuantArgs::new(in_quant, out_quant)?);
        self.geometry = Some(geometry);
        Ok(())
    }

    fn run(&mut self, pool: &mut TensorPool, ctx: &RunContext<'_>) -> Result<()> {
        let (Some(g), Some(q)) = (self.geometry, self.quant) else {
            return Err(VergeError::contract("kernel run before init"));
        };
        let (ins, mut outs) = pool.io(&self.inputs, &self.outputs)?;
        let input = ins[0].as_i8()?;
        let out = outs[0].as_i8_mut()?;
        let method = self.method;

        launch_chunks(ctx.workers, out, g.unit_len(), ctx.thread_num, |start, chunk| {
            match method {
                ResizeMethod::NearestNeighbor => resize_nearest_int8(&g, input, chunk, start, &q),
                ResizeMethod::Bilinear => resize_bilinear_int8(&g, input, chunk, start, &q),
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ScratchAllocator;
    use crate::kernels::test_util::{run_ctx, worker_pool};
    use verge_core::{Category, QuantParam, Tensor};

    fn setup(
        pool: &mut TensorPool,
        input: Tensor,
        method: ResizeMethod,
        new_h: usize,
        new_w: usize,
        out_quant: QuantParam,
    ) -> (ResizeInt8Kernel, TensorId) {
        let in_id = pool.insert(input);
        let mut out = Tensor::new(DType::I8, &[], Format::Nhwc, Category::Var);
        out.set_quant_params(vec![out_quant]).unwrap();
        let out_id = pool.insert(out);
        let k = ResizeInt8Kernel {
            name: "resize".into(),
            inputs: vec![in_id],
            outputs: vec![out_id],
            method,
            new_height: new_h,
            new_width: new_w,
            align_corners: false,
            geometry: None,
            quant: None,
        };
        (k, out_id)
    }

    fn run(k: &mut ResizeInt8Kernel, pool: &mut TensorPool) -> Result<()> {
        let workers = worker_pool(4);
        let scratch = ScratchAllocator::new();
        let ctx = run_ctx(&workers, &scratch);
        k.init(pool)?;
        k.pre_process(pool)?;
        k.run(pool, &ctx)
    }

    fn qp(scale: f64, zp: i32) -> QuantParam {
        QuantParam { scale, zero_point: zp }
    }

    #[test]
    fn test_nearest_doubling() {
        let mut pool = TensorPool::new();
        let mut input = Tensor::from_i8(&[1, 2, 3, 4], &[1, 2, 2, 1]);
        input.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let (mut k, out) = setup(&mut pool, input, ResizeMethod::NearestNeighbor, 4, 4, qp(1.0, 0));
        run(&mut k, &mut pool).unwrap();
        let out = pool.get(out).unwrap();
        assert_eq!(out.shape().dims(), &[1, 4, 4, 1]);
        #[rustfmt::skip]
        assert_eq!(out.as_i8().unwrap(), &[
            1, 1, 2, 2,
            1, 1, 2, 2,
            3, 3, 4, 4,
            3, 3, 4, 4,
        ]);
    }

    #[test]
    fn test_bilinear_parallel_matches_serial() {
        let mut pool = TensorPool::new();
        let data: Vec<i8> = (0..32).map(|v| (v * 3 - 40) as i8).collect();
        let mut input = Tensor::from_i8(&data, &[1, 4, 4, 2]);
        input.set_quant_params(vec![qp(0.5, 0)]).unwrap();
        let (mut k, out_id) = setup(&mut pool, input, ResizeMethod::Bilinear, 7, 5, qp(0.25, 0));
        run(&mut k, &mut pool).unwrap();
        let parallel = pool.get(out_id).unwrap().as_i8().unwrap().to_vec();

        // Serial reference through the raw kernel.
        let g = ResizeGeometry {
            batch: 1,
            in_h: 4,
            in_w: 4,
            channels: 2,
            out_h: 7,
            out_w: 5,
            align_corners: false,
        };
        let q = ResizeQuantArgs::new(qp(0.5, 0), qp(0.25, 0)).unwrap();
        let mut serial = vec![0i8; 70];
        resize_bilinear_int8(&g, &data, &mut serial, 0, &q);
        assert_eq!(parallel, serial);
    }

    #[test]
    fn test_rejects_non_4d_input() {
        let mut pool = TensorPool::new();
        let mut input = Tensor::from_i8(&[1, 2, 3, 4], &[2, 2]);
        input.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let (mut k, _) = setup(&mut pool, input, ResizeMethod::NearestNeighbor, 4, 4, qp(1.0, 0));
        assert!(matches!(run(&mut k, &mut pool), Err(VergeError::Contract(_))));
    }

    #[test]
    fn test_rejects_empty_target() {
        let mut pool = TensorPool::new();
        let mut input = Tensor::from_i8(&[1], &[1, 1, 1, 1]);
        input.set_quant_params(vec![qp(1.0, 0)]).unwrap();
        let (mut k, _) = setup(&mut pool, input, ResizeMethod::Bilinear, 0, 3, qp(1.0, 0));
        assert!(matches!(run(&mut k, &mut pool), Err(VergeError::InferFailed(_))));
    }
}
