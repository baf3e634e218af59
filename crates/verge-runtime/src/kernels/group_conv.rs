//! Grouped f32 convolution.
//!
//! Each group convolves its own channel slice of the input against its own
//! filter block, writing its own slice of the output channels. Per-group
//! operands are split out at init; per-run channel gather/scatter goes
//! through scratch so the inner convolution stays the dense kernel.

use verge_core::{DType, Format, Result, VergeError};
use verge_kernels::conv::{conv2d_rows_f32, pack_weight_ohwi_to_hwio, ConvGeometry};

use crate::kernel::{ConvParams, Kernel, RunContext};
use crate::parallel::launch_chunks;
use crate::pool::{TensorId, TensorPool};

pub struct GroupConvKernel {
    name: String,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    params: ConvParams,
    /// Geometry of one group's convolution.
    geometry: Option<ConvGeometry>,
    /// HWIO weights per group.
    group_weights: Vec<Vec<f32>>,
    /// Dense bias per group.
    group_bias: Vec<Vec<f32>>,
    in_c: usize,
    out_c: usize,
}

impl GroupConvKernel {
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
            group_weights: Vec::new(),
            group_bias: Vec::new(),
            in_c: 0,
            out_c: 0,
        }
    }
}

/// Copy a channel slice `[ch_start, ch_start + sub_c)` of every pixel.
fn gather_channels(src: &[f32], total_c: usize, ch_start: usize, sub_c: usize, dst: &mut [f32]) {
    debug_assert_eq!(src.len() / total_c * sub_c, dst.len());
    for (pixel, chunk) in dst.chunks_exact_mut(sub_c).enumerate() {
        let base = pixel * total_c + ch_start;
        chunk.copy_from_slice(&src[base..base + sub_c]);
    }
}

/// Inverse of [`gather_channels`].
fn scatter_channels(src: &[f32], sub_c: usize, dst: &mut [f32], total_c: usize, ch_start: usize) {
    debug_assert_eq!(dst.len() / total_c * sub_c, src.len());
    for (pixel, chunk) in src.chunks_exact(sub_c).enumerate() {
        let base = pixel * total_c + ch_start;
        dst[base..base + sub_c].copy_from_slice(chunk);
    }
}

impl Kernel for GroupConvKernel {
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
        if input.dtype() != DType::F32 || weight.dtype() != DType::F32 {
            return Err(VergeError::UnsupportedDType {
                dtype: input.dtype(),
                op: "group conv2d".into(),
            });
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
        let in_c = in_dims[3];
        if in_c % p.group != 0 {
            return Err(VergeError::InferFailed(format!(
                "kernel {}: input channels {in_c} not divisible by group {}",
                self.name, p.group
            )));
        }
        let sub_in_c = in_c / p.group;
        if w_dims.len() != 4
            || w_dims[1] != p.kernel_h
            || w_dims[2] != p.kernel_w
            || w_dims[3] != sub_in_c
        {
            return Err(VergeError::ShapeMismatch {
                expected: vec![0, p.kernel_h, p.kernel_w, sub_in_c],
                got: w_dims.to_vec(),
            });
        }
        let out_c = w_dims[0];
        if out_c % p.group != 0 {
            return Err(VergeError::InferFailed(format!(
                "kernel {}: output channels {out_c} not divisible by group {}",
                self.name, p.group
            )));
        }
        let sub_out_c = out_c / p.group;
        if !weight.is_materialized() {
            return Err(VergeError::contract(format!(
                "kernel {}: group conv weights must hold data at init",
                self.name
            )));
        }

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

        // Split operands per group. Owning the splits means a failed init
        // leaves nothing half-built behind.
        let filter_len = p.kernel_h * p.kernel_w * sub_in_c;
        let w_data = weight.as_f32()?;
        let mut group_weights = Vec::with_capacity(p.group);
        for grp in 0..p.group {
            let block = &w_data[grp * sub_out_c * filter_len..(grp + 1) * sub_out_c * filter_len];
            let mut packed = vec![0.0f32; block.len()];
            pack_weight_ohwi_to_hwio(block, sub_out_c, p.kernel_h, p.kernel_w, sub_in_c, &mut packed);
            group_weights.push(packed);
        }

        let mut group_bias = vec![vec![0.0f32; sub_out_c]; p.group];
        if let Some(&bias_id) = self.inputs.get(2) {
            let bias = pool.get(bias_id)?;
            if bias.dtype() != DType::F32 || bias.element_num() != out_c {
                return Err(VergeError::contract(format!(
                    "kernel {}: bias must be {out_c} f32 elements",
                    self.name
                )));
            }
            let b = bias.as_f32()?;
            for (grp, gb) in group_bias.iter_mut().enumerate() {
                gb.copy_from_slice(&b[grp * sub_out_c..(grp + 1) * sub_out_c]);
            }
        }

        self.geometry = Some(ConvGeometry {
            batch: in_dims[0],
            in_h: in_dims[1],
            in_w: in_dims[2],
            in_c: sub_in_c,
            out_h,
            out_w,
            out_c: sub_out_c,
            kernel_h: p.kernel_h,
            kernel_w: p.kernel_w,
            stride_h: p.stride_h,
            stride_w: p.stride_w,
            pad_top: p.pad_top,
            pad_left: p.pad_left,
            dilation_h: p.dilation_h,
            dilation_w: p.dilation_w,
        });
        self.group_weights = group_weights;
        self.group_bias = group_bias;
        self.in_c = in_c;
        self.out_c = out_c;

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
        let act = self.params.act;

        let in_pixels = g.batch * g.in_h * g.in_w;
        let out_pixels = g.batch * g.out_h * g.out_w;
        let mut sub_in = ctx.scratch.alloc::<f32>(in_pixels * g.in_c)?;
        let mut sub_out = ctx.scratch.alloc::<f32>(out_pixels * g.out_c)?;

        for (grp, (weights, bias)) in self
            .group_weights
            .iter()
            .zip(&self.group_bias)
            .enumerate()
        {
            gather_channels(input, self.in_c, grp * g.in_c, g.in_c, &mut sub_in);
            {
                let src = &*sub_in;
                launch_chunks(ctx.workers, &mut sub_out, g.unit_len(), ctx.thread_num, |start, chunk| {
                    conv2d_rows_f32(&g, src, weights, bias, chunk, start, act);
                    Ok(())
                })?;
            }
            scatter_channels(&sub_out, g.out_c, out, self.out_c, grp * g.out_c);
        }
        Ok(())
    }
}
