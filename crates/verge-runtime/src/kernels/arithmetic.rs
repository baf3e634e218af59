//! Broadcast binary arithmetic kernel (f32 and i32).
//!
//! The execution mode is fixed at init: equal shapes run the flat element
//! loop, a single-element operand runs the scalar loop, and everything else
//! goes through the broadcast loop split on the last differing dimension.
//! Work parallelizes over contiguous output ranges.

use verge_core::{DType, Result, VergeError};
use verge_kernels::activation::Activation;
use verge_kernels::arithmetic::{
    broadcast_binary_f32, broadcast_binary_i32, element_binary_f32, element_binary_i32,
    element_binary_opt_f32, element_binary_opt_i32, last_differing_dim, ArithOp,
};

use crate::kernel::{Kernel, OpParams, RunContext};
use crate::parallel::launch_chunks;
use crate::pool::{TensorId, TensorPool};
use crate::registry::KernelSpec;

enum Mode {
    Uninit,
    Element,
    OptScalar { scalar_is_lhs: bool },
    Broadcast {
        a_dims: Vec<usize>,
        b_dims: Vec<usize>,
        out_dims: Vec<usize>,
        inner: usize,
    },
}

pub struct ArithmeticKernel {
    name: String,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    op: ArithOp,
    act: Activation,
    dtype: DType,
    mode: Mode,
}

/// Registry creator for the arithmetic kernels.
pub fn create(spec: KernelSpec) -> Result<Box<dyn Kernel>> {
    let OpParams::Arith { op, act } = spec.params else {
        return Err(VergeError::contract(format!(
            "kernel {}: expected arithmetic params",
            spec.name
        )));
    };
    Ok(Box::new(ArithmeticKernel {
        name: spec.name,
        inputs: spec.inputs,
        outputs: spec.outputs,
        op,
        act,
        dtype: DType::F32,
        mode: Mode::Uninit,
    }))
}

impl Kernel for ArithmeticKernel {
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
                "kernel {}: arithmetic takes 2 inputs and 1 output",
                self.name
            )));
        }
        let a = pool.get(self.inputs[0])?;
        let b = pool.get(self.inputs[1])?;
        if a.dtype() != b.dtype() {
            return Err(VergeError::contract(format!(
                "kernel {}: operand dtypes differ ({} vs {})",
                self.name,
                a.dtype(),
                b.dtype()
            )));
        }
        self.dtype = a.dtype();
        if !matches!(self.dtype, DType::F32 | DType::I32) {
            return Err(VergeError::UnsupportedDType {
                dtype: self.dtype,
                op: "arithmetic".into(),
            });
        }
        if self.op == ArithOp::Div && self.dtype == DType::I32 {
            return Err(VergeError::UnsupportedDType {
                dtype: self.dtype,
                op: "div".into(),
            });
        }

        let out_shape = a.shape().broadcast_with(b.shape()).ok_or_else(|| {
            VergeError::InferFailed(format!(
                "kernel {}: shapes {:?} and {:?} do not broadcast",
                self.name,
                a.shape(),
                b.shape()
            ))
        })?;

        self.mode = if a.element_num() == 1 || b.element_num() == 1 {
            Mode::OptScalar {
                scalar_is_lhs: a.element_num() == 1,
            }
        } else if a.shape() == b.shape() {
            Mode::Element
        } else {
            let ndim = out_shape.ndim();
            let a_dims = a.shape().padded_to(ndim).dims().to_vec();
            let b_dims = b.shape().padded_to(ndim).dims().to_vec();
            let out_dims = out_shape.dims().to_vec();
            // Opt and element modes were ruled out, so a differing dim exists.
            let break_pos = last_differing_dim(&a_dims, &b_dims).ok_or_else(|| {
                VergeError::InferFailed(format!("kernel {}: degenerate broadcast", self.name))
            })?;
            let inner = out_dims[break_pos + 1..].iter().product::<usize>().max(1);
            Mode::Broadcast {
                a_dims,
                b_dims,
                out_dims,
                inner,
            }
        };

        let out = pool.get_mut(self.outputs[0])?;
        out.set_shape(out_shape.dims());
        Ok(())
    }

    fn run(&mut self, pool: &mut TensorPool, ctx: &RunContext<'_>) -> Result<()> {
        let (ins, mut outs) = pool.io(&self.inputs, &self.outputs)?;
        let (op, act) = (self.op, self.act);
        match self.dtype {
            DType::F32 => {
                let a = ins[0].as_f32()?;
                let b = ins[1].as_f32()?;
                let out = outs[0].as_f32_mut()?;
                match &self.mode {
                    Mode::Uninit => Err(VergeError::contract("kernel run before init")),
                    Mode::Element => {
                        launch_chunks(ctx.workers, out, 1, ctx.thread_num, |start, chunk| {
                            let n = chunk.len();
                            element_binary_f32(op, act, &a[start..start + n], &b[start..start + n], chunk);
                            Ok(())
                        })
                    }
                    Mode::OptScalar { scalar_is_lhs } => {
                        let lhs = *scalar_is_lhs;
                        let (scalar, v) = if lhs { (a[0], b) } else { (b[0], a) };
                        launch_chunks(ctx.workers, out, 1, ctx.thread_num, |start, chunk| {
                            let n = chunk.len();
                            element_binary_opt_f32(op, act, scalar, &v[start..start + n], chunk, lhs);
                            Ok(())
                        })
                    }
                    Mode::Broadcast { a_dims, b_dims, out_dims, inner } => {
                        launch_chunks(ctx.workers, out, *inner, ctx.thread_num, |start, chunk| {
                            broadcast_binary_f32(
                                op, act, a, a_dims, b, b_dims, chunk, out_dims, start,
                            );
                            Ok(())
                        })
                    }
                }
            }
            DType::I32 => {
                let a = ins[0].as_i32()?;
                let b = ins[1].as_i32()?;
                let out = outs[0].as_i32_mut()?;
                match &self.mode {
                    Mode::Uninit => Err(VergeError::contract("kernel run before init")),
                    Mode::Element => {
                        launch_chunks(ctx.workers, out, 1, ctx.thread_num, |start, chunk| {
                            let n = chunk.len();
                            element_binary_i32(op, act, &a[start..start + n], &b[start..start + n], chunk);
                            Ok(())
                        })
                    }
                    Mode::OptScalar { scalar_is_lhs } => {
                        let lhs = *scalar_is_lhs;
                        let (scalar, v) = if lhs { (a[0], b) } else { (b[0], a) };
                        launch_chunks(ctx.workers, out, 1, ctx.thread_num, |start, chunk| {
                            let n = chunk.len();
                            element_binary_opt_i32(op, act, scalar, &v[start..start + n], chunk, lhs);
                            Ok(())
                        })
                    }
                    Mode::Broadcast { a_dims, b_dims, out_dims, inner } => {
                        launch_chunks(ctx.workers, out, *inner, ctx.thread_num, |start, chunk| {
                            broadcast_binary_i32(
                                op, act, a, a_dims, b, b_dims, chunk, out_dims, start,
                            );
                            Ok(())
                        })
                    }
                }
            }
            other => Err(VergeError::UnsupportedDType {
                dtype: other,
                op: "arithmetic".into(),
            }),
        }
    }
}
