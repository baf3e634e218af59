//! f32 matmul kernel: `out = A @ B (+ bias)` with fused activation.
//!
//! A constant B is packed column-major once at init; a variable B is
//! repacked into scratch on every run. Work splits over contiguous output
//! row ranges, which makes the single-row (vector) case just a degenerate
//! split.

use verge_core::{Category, DType, Result, VergeError};
use verge_kernels::activation::Activation;
use verge_kernels::matmul::{matmul_rows_f32, pack_matmul_b};

use crate::kernel::{Kernel, OpParams, RunContext};
use crate::parallel::launch_chunks;
use crate::pool::{TensorId, TensorPool};
use crate::registry::KernelSpec;

/// Matrix extents cached at init.
#[derive(Clone, Copy)]
struct MatMulDims {
    deep: usize,
    col: usize,
}

pub struct MatMulKernel {
    name: String,
    inputs: Vec<TensorId>,
    outputs: Vec<TensorId>,
    transpose_b: bool,
    act: Activation,
    dims: Option<MatMulDims>,
    /// Column-major B, cached when the operand is constant.
    packed_b: Option<Vec<f32>>,
}

pub fn create(spec: KernelSpec) -> Result<Box<dyn Kernel>> {
    let OpParams::MatMul { transpose_b, act } = spec.params else {
        return Err(VergeError::contract(format!(
            "kernel {}: expected matmul params",
            spec.name
        )));
    };
    Ok(Box::new(MatMulKernel {
        name: spec.name,
        inputs: spec.inputs,
        outputs: spec.outputs,
        transpose_b,
        act,
        dims: None,
        packed_b: None,
    }))
}

impl Kernel for MatMulKernel {
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
        if !(self.inputs.len() == 2 || self.inputs.len() == 3) || self.outputs.len() != 1 {
            return Err(VergeError::contract(format!(
                "kernel {}: matmul takes 2 or 3 inputs and 1 output",
                self.name
            )));
        }
        let a = pool.get(self.inputs[0])?;
        let b = pool.get(self.inputs[1])?;
        for t in [a, b] {
            if t.dtype() != DType::F32 {
                return Err(VergeError::UnsupportedDType {
                    dtype: t.dtype(),
                    op: "matmul".into(),
                });
            }
        }
        let a_dims = a.shape().dims();
        let b_dims = b.shape().dims();
        if a_dims.len() != 2 || b_dims.len() != 2 {
            return Err(VergeError::ShapeMismatch {
                expected: vec![2],
                got: vec![a_dims.len(), b_dims.len()],
            });
        }
        let (row, deep) = (a_dims[0], a_dims[1]);
        let (b_deep, col) = if self.transpose_b {
            (b_dims[1], b_dims[0])
        } else {
            (b_dims[0], b_dims[1])
        };
        if deep != b_deep {
            return Err(VergeError::ShapeMismatch {
                expected: vec![row, deep],
                got: b_dims.to_vec(),
            });
        }
        if let Some(&bias_id) = self.inputs.get(2) {
            let bias = pool.get(bias_id)?;
            if bias.dtype() != DType::F32 || bias.element_num() != col {
                return Err(VergeError::contract(format!(
                    "kernel {}: bias must be {col} f32 elements, got {} of {}",
                    self.name,
                    bias.element_num(),
                    bias.dtype()
                )));
            }
        }
        self.dims = Some(MatMulDims { deep, col });

        // Constant operands are packed once; variable ones on every run.
        if b.category() == Category::Const && b.is_materialized() {
            let mut packed = vec![0.0f32; deep * col];
            pack_matmul_b(b.as_f32()?, deep, col, self.transpose_b, &mut packed);
            self.packed_b = Some(packed);
        }

        pool.get_mut(self.outputs[0])?.set_shape(&[row, col]);
        Ok(())
    }

    fn run(&mut self, pool: &mut TensorPool, ctx: &RunContext<'_>) -> Result<()> {
        let Some(MatMulDims { deep, col }) = self.dims else {
            return Err(VergeError::contract("kernel run before init"));
        };
        let (ins, mut outs) = pool.io(&self.inputs, &self.outputs)?;
        let a = ins[0].as_f32()?;
        let bias = match ins.get(2) {
            Some(t) => Some(t.as_f32()?),
            None => None,
        };
        let out = outs[0].as_f32_mut()?;
        let act = self.act;

        let run_rows = |b_packed: &[f32], out: &mut [f32]| {
            launch_chunks(ctx.workers, out, col, ctx.thread_num, |start, chunk| {
                let rows = chunk.len() / col;
                let a_rows = &a[start * deep..(start + rows) * deep];
                matmul_rows_f32(a_rows, b_packed, bias, chunk, deep, col, act);
                Ok(())
            })
        };

        match &self.packed_b {
            Some(packed) => run_rows(packed, out),
            None => {
                let mut packed = ctx.scratch.alloc::<f32>(deep * col)?;
                pack_matmul_b(ins[1].as_f32()?, deep, col, self.transpose_b, &mut packed);
                run_rows(&packed, out)
            }
        }
    }
}
