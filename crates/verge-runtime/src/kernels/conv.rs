//! f32 2D convolution kernel (NHWC input, OHWI weights).
//!
//! Constant weights are repacked to HWIO and the bias is expanded to a dense
//! `out_c` vector at init. `group > 1` dispatches to the grouped wrapper;
//! `group == 0` is a shape-inference failure.

use verge_core::{Category, DType, Format, Result, VergeError};
use verge_kernels::conv::{conv2d_rows_f32, pack_weight_ohwi_to_hwio, ConvGeometry};

use crate::kernel::{ConvParams, Kernel, OpParams, RunContext};
use crate::kernels::group_conv::GroupConvKernel;
use crate::parallel::launch_chunks;
use crate::pool::{TensorId, TensorPool};
use crate::registry::KernelSpec;

pub struct Conv2dKernel {
    name: String,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    params: ConvParams,
    geometry: Option<ConvGeometry>,
    packed_weight: Option<Vec<f32>>,
    /// `None` means the bias is a Var input and is read fresh every run.
    bias: Option<Vec<f32>>,
}

/// Registry creator: builds the grouped wrapper when `group > 1`.
pub fn create(spec: KernelSpec) -> Result<Box<dyn Kernel>> {
    let OpParams::Conv(params) = spec.params else {
        return Err(VergeError::contract(format!(
            "kernel {}: expected conv params",
            spec.name
        )));
    };
    if params.group > 1 {
        return Ok(Box::new(GroupConvKernel::new(
            spec.name,
            spec.inputs,
            spec.outputs,
            params,
        )));
    }
    Ok(Box::new(Conv2dKernel::new(
        spec.name,
        spec.inputs,
        spec.outputs,
        params,
    )))
}

impl Conv2dKernel {
    pub fn new(
        name: String,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
        params: ConvParams,
    ) -> Self {
        Self {
            name,
            inputs,
            outputs,
            params,
            geometry: None,
            packed_weight: None,
            bias: None,
        }
    }
}

impl Kernel for Conv2dKernel {
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
        let p = self.params;
        if p.group == 0 {
            return Err(VergeError::InferFailed(format!(
                "kernel {}: conv group must be positive",
                self.name
            )));
        }
        if !(self.inputs.len() == 2 || self.inputs.len() == 3) || self.outputs.len() != 1 {
            return Err(VergeError::contract(format!(
                "kernel {}: conv takes input, weight, optional bias and 1 output",
                self.name
            )));
        }
        let input = pool.get(self.inputs[0])?;
        let weight = pool.get(self.inputs[1])?;
        for t in [input, weight] {
            if t.dtype() != DType::F32 {
                return Err(VergeError::UnsupportedDType {
                    dtype: t.dtype(),
                    op: "conv2d".into(),
                });
            }
        }
        if input.format() != Format::Nhwc || input.shape().ndim() != 4 {
            return Err(VergeError::contract(format!(
                "kernel {}: conv expects a 4D NHWC input, got {:?}",
                self.name,
                input.shape()
            )));
        }
        let in_dims = input.shape().dims();
        let w_dims = weight.shape().dims();
        let expected_w = vec![0, p.kernel_h, p.kernel_w, in_dims[3]];
        if w_dims.len() != 4
            || w_dims[1] != p.kernel_h
            || w_dims[2] != p.kernel_w
            || w_dims[3] != in_dims[3]
        {
            return Err(VergeError::ShapeMismatch {
                expected: expected_w,
                got: w_dims.to_vec(),
            });
        }
        let out_c = w_dims[0];
        let out_h = ConvGeometry::output_extent(
            in_dims[1],
            p.kernel_h,
            p.stride_h,
            p.pad_top + p.pad_bottom,
            p.dilation_h,
        );
        let out_w = ConvGeometry::output_extent(
            in_dims[2],
            p.kernel_w,
            p.stride_w,
            p.pad_left + p.pad_right,
            p.dilation_w,
        );
        if out_h == 0 || out_w == 0 {
            return Err(VergeError::InferFailed(format!(
                "kernel {}: kernel {}x{} does not fit the padded input",
                self.name, p.kernel_h, p.kernel_w
            )));
        }
        let geometry = ConvGeometry {
            batch: in_dims[0],
            in_h: in_dims[1],
            in_w: in_dims[2],
            in_c: in_dims[3],
            out_h,
            out_w,
            out_c,
            kernel_h: p.kernel_h,
            kernel_w: p.kernel_w,
            stride_h: p.stride_h,
            stride_w: p.stride_w,
            pad_top: p.pad_top,
            pad_left: p.pad_left,
            dilation_h: p.dilation_h,
            dilation_w: p.dilation_w,
        };

        // Missing bias becomes a zero vector so the compute loop has one path.
        // A non-constant bias is left to run time and read fresh each pass.
        self.bias = Some(vec![0.0f32; out_c]);
        if let Some(&bias_id) = self.inputs.get(2) {
            let bias = pool.get(bias_id)?;
            if bias.dtype() != DType::F32 || bias.element_num() != out_c {
                return Err(VergeError::contract(format!(
                    "kernel {}: bias must be {out_c} f32 elements",
                    self.name
                )));
            }
            self.bias = if bias.category() == Category::Const && bias.is_materialized() {
                Some(bias.as_f32()?.to_vec())
            } else {
                None
            };
        }

        if weight.category() == Category::Const && weight.is_materialized() {
            let mut packed = vec![0.0f32; weight.element_num()];
            pack_weight_ohwi_to_hwio(
                weight.as_f32()?,
                out_c,
                p.kernel_h,
                p.kernel_w,
                in_dims[3],
                &mut packed,
            );
            self.packed_weight = Some(packed);
        }

        self.geometry = Some(geometry);
        let out_dims = [in_dims[0], out_h, out_w, out_c];
        pool.get_mut(self.outputs[0])?.set_shape(&out_dims);
        Ok(())
    }

    fn run(&mut self, pool: &mut TensorPool, ctx: &RunContext<'_>) -> Result<()> {
        let Some(g) = self.geometry else {
            return Err(VergeError::contract("kernel run before init"));
        };
        let (ins, mut outs) = pool.io(&self.inputs, &self.outputs)?;
        let input = ins[0].as_f32()?;
        let out = outs[0].as_f32_mut()?;
        let bias: &[f32] = match &self.bias {
            Some(b) => b,
            None => ins[2].as_f32()?,
        };
        let act = self.params.act;

        let run_units = |weight: &[f32], out: &mut [f32]| {
            launch_chunks(ctx.workers, out, g.unit_len(), ctx.thread_num, |start, chunk| {
                conv2d_rows_f32(&g, input, weight, bias, chunk, start, act);
                Ok(())
            })
        };

        match &self.packed_weight {
            Some(packed) => run_units(packed, out),
            None => {
                let raw = ins[1].as_f32()?;
                let mut packed = ctx.scratch.alloc::<f32>(raw.len())?;
                pack_weight_ohwi_to_hwio(raw, g.out_c, g.kernel_h, g.kernel_w, g.in_c, &mut packed);
                run_units(&packed, out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::ScratchAllocator;
    use crate::kernels::test_util::{run_ctx, worker_pool};
    use verge_core::Tensor;
    use verge_kernels::activation::Activation;

    fn conv_params(kh: usize, kw: usize, stride: usize, pad: usize) -> ConvParams {
        ConvParams {
            kernel_h: kh,
            kernel_w: kw,
            stride_h: stride,
            stride_w: stride,
            pad_top: pad,
            pad_bottom: pad,
            pad_left: pad,
            pad_right: pad,
            dilation_h: 1,
            dilation_w: 1,
            group: 1,
            act: Activation::None,
        }
    }

    fn run(k: &mut dyn Kernel, pool: &mut TensorPool) -> Result<()> {
        let workers = worker_pool(2);
        let scratch = ScratchAllocator::new();
        let ctx = run_ctx(&workers, &scratch);
        k.init(pool)?;
        k.pre_process(pool)?;
        k.run(pool, &ctx)
    }

    #[test]
    fn test_3x3_same_conv() {
        let mut pool = TensorPool::new();
        let input = pool.insert(Tensor::from_f32(&[1.0; 9], &[1, 3, 3, 1]));
        let weight = pool.insert(Tensor::from_f32(&[1.0; 9], &[1, 3, 3, 1]).into_const());
        let out = pool.insert(Tensor::new(DType::F32, &[], Format::Nhwc, Category::Var));
        let mut k = Conv2dKernel::new(
            "conv".into(),
            vec![input, weight],
            vec![out],
            conv_params(3, 3, 1, 1),
        );
        run(&mut k, &mut pool).unwrap();
        let t = pool.get(out).unwrap();
        assert_eq!(t.shape().dims(), &[1, 3, 3, 1]);
        #[rustfmt::skip]
        assert_eq!(t.as_f32().unwrap(), &[
            4.0, 6.0, 4.0,
            6.0, 9.0, 6.0,
            4.0, 6.0, 4.0,
        ]);
    }

    #[test]
    fn test_bias_applied() {
        let mut pool = TensorPool::new();
        let input = pool.insert(Tensor::from_f32(&[2.0], &[1, 1, 1, 1]));
        let weight = pool.insert(Tensor::from_f32(&[3.0, -1.0], &[2, 1, 1, 1]).into_const());
        let bias = pool.insert(Tensor::from_f32(&[10.0, 20.0], &[2]).into_const());
        let out = pool.insert(Tensor::new(DType::F32, &[], Format::Nhwc, Category::Var));
        let mut k = Conv2dKernel::new(
            "conv".into(),
            vec![input, weight, bias],
            vec![out],
            conv_params(1, 1, 1, 0),
        );
        run(&mut k, &mut pool).unwrap();
        assert_eq!(pool.get(out).unwrap().as_f32().unwrap(), &[16.0, 18.0]);
    }

    #[test]
    fn test_var_bias_read_each_run() {
        let mut pool = TensorPool::new();
        let input = pool.insert(Tensor::from_f32(&[2.0], &[1, 1, 1, 1]));
        let weight = pool.insert(Tensor::from_f32(&[3.0], &[1, 1, 1, 1]).into_const());
        // Bias stays a Var: its data must reach the output, not a stale copy.
        let bias = pool.insert(Tensor::from_f32(&[100.0], &[1]));
        let out = pool.insert(Tensor::new(DType::F32, &[], Format::Nhwc, Category::Var));
        let mut k = Conv2dKernel::new(
            "conv".into(),
            vec![input, weight, bias],
            vec![out],
            conv_params(1, 1, 1, 0),
        );
        run(&mut k, &mut pool).unwrap();
        assert_eq!(pool.get(out).unwrap().as_f32().unwrap(), &[106.0]);

        pool.get_mut(bias).unwrap().as_f32_mut().unwrap()[0] = 50.0;
        let workers = worker_pool(2);
        let scratch = ScratchAllocator::new();
        let ctx = run_ctx(&workers, &scratch);
        k.pre_process(&mut pool).unwrap();
        k.run(&mut pool, &ctx).unwrap();
        assert_eq!(pool.get(out).unwrap().as_f32().unwrap(), &[56.0]);
    }

    #[test]
    fn test_group_zero_is_infer_failure() {
        let mut pool = TensorPool::new();
        let input = pool.insert(Tensor::from_f32(&[1.0], &[1, 1, 1, 1]));
        let weight = pool.insert(Tensor::from_f32(&[1.0], &[1, 1, 1, 1]).into_const());
        let out = pool.insert(Tensor::new(DType::F32, &[], Format::Nhwc, Category::Var));
        let mut params = conv_params(1, 1, 1, 0);
        params.group = 0;
        let mut k = Conv2dKernel::new("conv".into(), vec![input, weight], vec![out], params);
        assert!(matches!(
            k.init(&mut pool),
            Err(VergeError::InferFailed(_))
        ));
    }

    #[test]
    fn test_weight_shape_mismatch() {
        let mut pool = TensorPool::new();
        let input = pool.insert(Tensor::from_f32(&[1.0; 8], &[1, 2, 2, 2]));
        // in_c is 2 but the weight says 1.
        let weight = pool.insert(Tensor::from_f32(&[1.0; 4], &[4, 1, 1, 1]).into_const());
        let out = pool.insert(Tensor::new(DType::F32, &[], Format::Nhwc, Category::Var));
        let mut k = Conv2dKernel::new(
            "conv".into(),
            vec![input, weight],
            vec![out],
            conv_params(1, 1, 1, 0),
        );
        assert!(matches!(
            k.init(&mut pool),
            Err(VergeError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_kernel_larger_than_input() {
        let mut pool = TensorPool::new();
        let input = pool.insert(Tensor::from_f32(&[1.0; 4], &[1, 2, 2, 1]));
        let weight = pool.insert(Tensor::from_f32(&[1.0; 9], &[1, 3, 3, 1]).into_const());
        let out = pool.insert(Tensor::new(DType::F32, &[], Format::Nhwc, Category::Var));
        let mut k = Conv2dKernel::new(
            "conv".into(),
            vec![input, weight],
            vec![out],
            conv_params(3, 3, 1, 0),
        );
        assert!(matches!(
            k.init(&mut pool),
            Err(VergeError::InferFailed(_))
        ));
    }
}
