//! The `Kernel` trait and its execution context.
//!
//! A kernel runs in three phases driven by the executor:
//! 1. `init` (once): validate operands, infer output shapes, derive cached
//!    parameters, pack constant operands.
//! 2. `pre_process` (per run): check inputs are materialized and allocate
//!    output buffers.
//! 3. `run` (per run): compute, fanning out over the context's worker pool.
//!
//! `resize` re-runs shape inference after an input tensor changed shape; it
//! may be called any number of times between runs.
//!
//! Reference-count bookkeeping after a kernel runs belongs to the executor,
//! not to kernels.

use verge_core::{Result, VergeError};
use verge_kernels::activation::Activation;
use verge_kernels::arithmetic::ArithOp;
use verge_kernels::resize_int8::ResizeMethod;

use crate::allocator::ScratchAllocator;
use crate::pool::{TensorId, TensorPool};

/// Shared state handed to every kernel run.
pub struct RunContext<'a> {
    /// Worker pool for parallel fan-out.
    pub workers: &'a rayon::ThreadPool,
    /// Allocator for transient buffers.
    pub scratch: &'a ScratchAllocator,
    /// Requested parallel degree; kernels may use fewer workers.
    pub thread_num: usize,
}

/// Convolution attributes (shared by plain and grouped convolution).
#[derive(Debug, Clone, Copy)]
pub struct ConvParams {
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_top: usize,
    pub pad_bottom: usize,
    pub pad_left: usize,
    pub pad_right: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
    pub group: usize,
    pub act: Activation,
}

/// Operator attributes carried from graph construction to kernel factories.
#[derive(Debug, Clone)]
pub enum OpParams {
    Arith {
        op: ArithOp,
        act: Activation,
    },
    AddInt8 {
        act: Activation,
    },
    Resize {
        method: ResizeMethod,
        new_height: usize,
        new_width: usize,
        align_corners: bool,
    },
    MatMul {
        transpose_b: bool,
        act: Activation,
    },
    LayerNorm {
        /// Number of trailing dimensions normalized per row.
        normalized_dims: usize,
        epsilon: f32,
    },
    Conv(ConvParams),
    BatchNorm {
        epsilon: f32,
    },
    None,
}

/// One schedulable operator instance.
pub trait Kernel: Send {
    fn name(&self) -> &str;

    /// Tensor ids this kernel reads.
    fn inputs(&self) -> &[TensorId];

    /// Tensor ids this kernel writes.
    fn outputs(&self) -> &[TensorId];

    /// One-time validation, shape inference, and operand packing.
    fn init(&mut self, pool: &mut TensorPool) -> Result<()>;

    /// Re-infer output shapes and cached parameters from the inputs' current
    /// shapes. The default rebuilds everything through `init`, which every
    /// builtin kernel keeps idempotent.
    fn resize(&mut self, pool: &mut TensorPool) -> Result<()> {
        self.init(pool)
    }

    /// Per-run readiness: inputs must hold data, outputs get buffers.
    fn pre_process(&mut self, pool: &mut TensorPool) -> Result<()> {
        for &id in self.inputs() {
            if !pool.get(id)?.is_materialized() {
                return Err(VergeError::contract(format!(
                    "kernel {}: input tensor {} has no data",
                    self.name(),
                    id.0
                )));
            }
        }
        for &id in self.outputs() {
            pool.get_mut(id)?.malloc_data()?;
        }
        Ok(())
    }

    /// Compute outputs from inputs.
    fn run(&mut self, pool: &mut TensorPool, ctx: &RunContext<'_>) -> Result<()>;
}
