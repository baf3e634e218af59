//! Kernel registry keyed on (target, dtype, operator).
//!
//! Creators are plain function pointers; registering a key that already
//! exists replaces the previous creator, so embedders can override a builtin
//! kernel by registering after `with_builtins`.

use std::collections::HashMap;

use verge_core::{DType, Result, VergeError};

use crate::kernel::{Kernel, OpParams};
use crate::kernels;
use crate::pool::TensorId;

/// Execution target. CPU is the only backend today; the key keeps the slot
/// open for accelerator backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Cpu,
}

/// Operator type resolved during graph construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Add,
    Sub,
    Mul,
    Div,
    Resize,
    MatMul,
    LayerNorm,
    Conv2d,
    BatchNorm,
}

/// Registry lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub target: Target,
    pub dtype: DType,
    pub op: OpKind,
}

impl KernelKey {
    pub fn cpu(dtype: DType, op: OpKind) -> Self {
        Self {
            target: Target::Cpu,
            dtype,
            op,
        }
    }
}

/// Everything a creator needs to build one kernel instance.
#[derive(Debug, Clone)]
pub struct KernelSpec {
    pub name: String,
    pub inputs: Vec<TensorId>,
    pub outputs: Vec<TensorId>,
    pub params: OpParams,
}

impl KernelSpec {
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<TensorId>,
        outputs: Vec<TensorId>,
        params: OpParams,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            outputs,
            params,
        }
    }
}

/// Builds a kernel instance from a spec.
pub type KernelCreator = fn(KernelSpec) -> Result<Box<dyn Kernel>>;

/// Maps (target, dtype, operator) keys to kernel creators.
#[derive(Default)]
pub struct KernelRegistry {
    creators: HashMap<KernelKey, KernelCreator>,
}

impl KernelRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with every builtin CPU kernel.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        register_builtins(&mut reg);
        reg
    }

    /// Register a creator. A later registration for the same key wins.
    pub fn register(&mut self, key: KernelKey, creator: KernelCreator) {
        if self.creators.insert(key, creator).is_some() {
            tracing::debug!(?key, "kernel creator replaced");
        }
    }

    pub fn lookup(&self, key: &KernelKey) -> Option<KernelCreator> {
        self.creators.get(key).copied()
    }

    /// Build a kernel for `key`, or fail if no creator is registered.
    pub fn create(&self, key: &KernelKey, spec: KernelSpec) -> Result<Box<dyn Kernel>> {
        let creator = self.lookup(key).ok_or(VergeError::UnsupportedDType {
            dtype: key.dtype,
            op: format!("{:?}", key.op),
        })?;
        creator(spec)
    }
}

/// Register every builtin CPU kernel.
pub fn register_builtins(reg: &mut KernelRegistry) {
    use OpKind::*;

    for op in [Add, Sub, Mul, Div] {
        reg.register(KernelKey::cpu(DType::F32, op), kernels::arithmetic::create);
    }
    // Integer division is intentionally absent: a lookup for it reports an
    // unsupported dtype instead of truncating silently.
    for op in [Add, Sub, Mul] {
        reg.register(KernelKey::cpu(DType::I32, op), kernels::arithmetic::create);
    }
    reg.register(KernelKey::cpu(DType::I8, Add), kernels::add_int8::create);
    reg.register(KernelKey::cpu(DType::I8, Resize), kernels::resize_int8::create);
    reg.register(
        KernelKey::cpu(DType::I8, LayerNorm),
        kernels::layer_norm_int8::create,
    );
    reg.register(KernelKey::cpu(DType::F32, MatMul), kernels::matmul::create);
    reg.register(KernelKey::cpu(DType::F32, Conv2d), kernels::conv::create);
    reg.register(KernelKey::cpu(DType::F32, BatchNorm), kernels::batchnorm::create);
}
