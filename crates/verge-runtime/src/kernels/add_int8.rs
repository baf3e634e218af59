//! Quantized int8 add kernel.
//!
//! Rescale arguments are derived once at init from the three tensors'
//! quantization parameters. Mismatched shapes are tiled into scratch buffers
//! before the element loop, mirroring the broadcast semantics of the f32
//! arithmetic kernel.

use verge_core::{DType, Result, VergeError};
use verge_kernels::activation::Activation;
use verge_kernels::add_int8::{add_int8, add_int8_opt, AddQuantArgs};

use crate::kernel::{Kernel, OpParams, RunContext};
use crate::parallel::launch_chunks;
use crate::pool::{TensorId, TensorPool};
use crate::registry::KernelSpec;

enum Mode {
    Uninit,
    Element,
    OptScalar { scalar_is_in0: bool },
    Broadcast {
        a_dims: Vec<usize>,
        b_dims: Vec<usize>,
        out_dims: Vec<usize>,
    },
}

pub struct AddInt8Kernel {
    name: String,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    act: Activation,
    args: Option<AddQuantArgs>,
    mode: Mode,
}

pub fn create(spec: KernelSpec) -> Result<Box<dyn Kernel>> {
    let OpParams::AddInt8 { act } = spec.params else {
        return Err(VergeError::contract(format!(
            "kernel {}: expected int8 add params",
            spec.name
        )));
    };
    Ok(Box::new(AddInt8Kernel {
        name: spec.name,
        inputs: spec.inputs,
        outputs: spec.outputs,
        act,
        args: None,
        mode: Mode::Uninit,
    }))
}

/// Expand `src` to the broadcast output shape. Shapes are rank-aligned.
fn tile_i8(src: &[i8], src_dims: &[usize], dst: &mut [i8], out_dims: &[usize]) {
    let ndim = out_dims.len();
    let mut strides = vec![0usize; ndim];
    let mut acc = 1usize;
    for i in (0..ndim).rev() {
        strides[i] = if src_dims[i] == 1 { 0 } else { acc };
        acc *= src_dims[i];
    }
    for (flat, d) in dst.iter_mut().enumerate() {
        let mut rest = flat;
        let mut off = 0usize;
        for k in (0..ndim).rev() {
            let idx = rest % out_dims[k];
            rest /= out_dims[k];
            off += idx * strides[k];
        }
        *d = src[off];
    }
}

impl Kernel for AddInt8Kernel {
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
        if self.inputs.len() != 2 || self.outputs.len() != 1 {
            return Err(VergeError::contract(format!(
                "kernel {}: int8 add takes 2 inputs and 1 output",
                self.name
            )));
        }
        let a = pool.get(self.inputs[0])?;
        let b = pool.get(self.inputs[1])?;
        let out = pool.get(self.outputs[0])?;
        for (t, role) in [(a, "input 0"), (b, "input 1"), (out, "output")] {
            if t.dtype() != DType::I8 {
                return Err(VergeError::UnsupportedDType {
                    dtype: t.dtype(),
                    op: format!("int8 add {role}"),
                });
            }
        }

        let out_shape = a.shape().broadcast_with(b.shape()).ok_or_else(|| {
            VergeError::InferFailed(format!(
                "kernel {}: shapes {:?} and {:?} do not broadcast",
                self.name,
                a.shape(),
                b.shape()
            ))
        })?;

        self.args = Some(AddQuantArgs::new(
            a.first_quant()?,
            b.first_quant()?,
            out.first_quant()?,
            self.act,
        )?);

        self.mode = if a.element_num() == 1 || b.element_num() == 1 {
            Mode::OptScalar {
                scalar_is_in0: a.element_num() == 1,
            }
        } else if a.shape() == b.shape() {
            Mode::Element
        } else {
            let ndim = out_shape.ndim();
            Mode::Broadcast {
                a_dims: a.shape().padded_to(ndim).dims().to_vec(),
                b_dims: b.shape().padded_to(ndim).dims().to_vec(),
                out_dims: out_shape.dims().to_vec(),
            }
        };

        pool.get_mut(self.outputs[0])?.set_shape(out_shape.dims());
        Ok(())
    }

    fn run(&mut self, pool: &mut TensorPool, ctx: &RunContext<'_>) -> Result<()> {
        let args = self
            .args
            .ok_or_else(|| VergeError::contract("kernel run before init"))?;
        let (ins, mut outs) = pool.io(&self.inputs, &self.outputs)?;
        let a = ins[0].as_i8()?;
        let b = ins[1].as_i8()?;
        let out = outs[0].as_i8_mut()?;

        match &self.mode {
            Mode::Uninit => Err(VergeError::contract("kernel run before init")),
            Mode::Element => {
                launch_chunks(ctx.workers, out, 1, ctx.thread_num, |start, chunk| {
                    let n = chunk.len();
                    add_int8(&a[start..start + n], &b[start..start + n], chunk, &args);
                    Ok(())
                })
            }
            Mode::OptScalar { scalar_is_in0 } => {
                let is_in0 = *scalar_is_in0;
                let (scalar, v) = if is_in0 { (a[0], b) } else { (b[0], a) };
                launch_chunks(ctx.workers, out, 1, ctx.thread_num, |start, chunk| {
                    let n = chunk.len();
                    add_int8_opt(scalar, &v[start..start + n], chunk, &args, is_in0);
                    Ok(())
                })
            }
            Mode::Broadcast { a_dims, b_dims, out_dims } => {
                let numel = out.len();
                let mut a_tiled = ctx.scratch.alloc::<i8>(numel)?;
                let mut b_tiled = ctx.scratch.alloc::<i8>(numel)?;
                tile_i8(a, a_dims, &mut a_tiled, out_dims);
                tile_i8(b, b_dims, &mut b_tiled, out_dims);
                let (at, bt) = (&*a_tiled, &*b_tiled);
                launch_chunks(ctx.workers, out, 1, ctx.thread_num, |start, chunk| {
                    let n = chunk.len();
                    add_int8(&at[start..start + n], &bt[start..start + n], chunk, &args);
                    Ok(())
                })
            }
        }
    }
}
