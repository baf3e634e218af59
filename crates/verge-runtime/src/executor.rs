//! Graph executor: runs a scheduled kernel sequence over a tensor pool.
//!
//! `prepare` drives every kernel's `init` exactly once. Each `run` then
//! walks the sequence in order, calling `pre_process` and `run` per kernel,
//! and reclaims intermediate buffers by reference counting: every tensor
//! starts a run with a count equal to its number of consumers, each kernel
//! decrements its inputs after computing, and a variable tensor whose count
//! reaches zero has its buffer freed. Graph inputs and outputs carry one
//! extra reference so they survive the whole run; train mode pins every
//! kernel output the same way.

use verge_core::{Category, Result, VergeError};

use crate::kernel::{Kernel, RunContext};
use crate::pool::{TensorId, TensorPool};

pub struct GraphExecutor {
    kernels: Vec<Box<dyn Kernel>>,
    graph_inputs: Vec<TensorId>,
    graph_outputs: Vec<TensorId>,
    train_mode: bool,
    prepared: bool,
}

impl GraphExecutor {
    pub fn new(
        kernels: Vec<Box<dyn Kernel>>,
        graph_inputs: Vec<TensorId>,
        graph_outputs: Vec<TensorId>,
    ) -> Self {
        Self {
            kernels,
            graph_inputs,
            graph_outputs,
            train_mode: false,
            prepared: false,
        }
    }

    /// Keep every kernel output alive across the run, so training code can
    /// read intermediate activations afterwards.
    pub fn set_train_mode(&mut self, on: bool) {
        self.train_mode = on;
    }

    pub fn graph_inputs(&self) -> &[TensorId] {
        &self.graph_inputs
    }

    pub fn graph_outputs(&self) -> &[TensorId] {
        &self.graph_outputs
    }

    /// Initialize every kernel once. Must precede the first `run`.
    pub fn prepare(&mut self, pool: &mut TensorPool) -> Result<()> {
        for kernel in &mut self.kernels {
            tracing::debug!(kernel = kernel.name(), "init");
            kernel.init(pool).map_err(|e| {
                tracing::error!(kernel = kernel.name(), error = %e, "init failed");
                e
            })?;
        }
        self.prepared = true;
        Ok(())
    }

    /// Re-run shape inference after graph input shapes changed.
    ///
    /// Walks the sequence in order so downstream kernels see the re-inferred
    /// shapes of their producers. Variable outputs are dropped so the next
    /// `run` allocates buffers at the new extent.
    pub fn resize(&mut self, pool: &mut TensorPool) -> Result<()> {
        if !self.prepared {
            return Err(VergeError::contract("executor resize before prepare"));
        }
        for kernel in &mut self.kernels {
            tracing::debug!(kernel = kernel.name(), "resize");
            kernel.resize(pool).map_err(|e| {
                tracing::error!(kernel = kernel.name(), error = %e, "resize failed");
                e
            })?;
            for &id in kernel.outputs() {
                let t = pool.get_mut(id)?;
                if t.category() == Category::Var {
                    t.free_data();
                }
            }
        }
        Ok(())
    }

    /// Execute the kernel sequence once.
    ///
    /// Fails before touching any kernel if a graph input has no data. A
    /// kernel failure stops the walk and propagates; tensors already freed
    /// stay freed.
    pub fn run(&mut self, pool: &mut TensorPool, ctx: &RunContext<'_>) -> Result<()> {
        if !self.prepared {
            return Err(VergeError::contract("executor run before prepare"));
        }
        for &id in &self.graph_inputs {
            if !pool.get(id)?.is_materialized() {
                return Err(VergeError::contract(format!(
                    "graph input tensor {} has no data",
                    id.0
                )));
            }
        }
        self.init_ref_counts(pool)?;

        for kernel in &mut self.kernels {
            tracing::trace!(kernel = kernel.name(), "run");
            kernel
                .pre_process(pool)
                .and_then(|()| kernel.run(pool, ctx))
                .map_err(|e| {
                    tracing::error!(kernel = kernel.name(), error = %e, "kernel failed");
                    e
                })?;
            release_inputs(pool, kernel.inputs())?;
        }
        Ok(())
    }

    /// Seed every tensor's reference count for one run: one per consuming
    /// kernel use, plus one for each graph input and graph output. Train
    /// mode adds one to every kernel output.
    fn init_ref_counts(&self, pool: &mut TensorPool) -> Result<()> {
        for i in 0..pool.len() {
            pool.get_mut(TensorId(i))?.set_ref_count(0);
        }
        for kernel in &self.kernels {
            for &id in kernel.inputs() {
                let t = pool.get_mut(id)?;
                t.set_ref_count(t.ref_count() + 1);
            }
            if self.train_mode {
                for &id in kernel.outputs() {
                    let t = pool.get_mut(id)?;
                    t.set_ref_count(t.ref_count() + 1);
                }
            }
        }
        for &id in self.graph_inputs.iter().chain(&self.graph_outputs) {
            let t = pool.get_mut(id)?;
            t.set_ref_count(t.ref_count() + 1);
        }
        Ok(())
    }
}

/// Decrement the count of each consumed tensor, freeing variable tensors
/// that hit zero. Constants are never freed.
fn release_inputs(pool: &mut TensorPool, inputs: &[TensorId]) -> Result<()> {
    for &id in inputs {
        let t = pool.get_mut(id)?;
        if t.dec_ref_count() == 0 && t.category() == Category::Var {
            tracing::trace!(tensor = id.0, "buffer freed");
            t.free_data();
        }
    }
    Ok(())
}
