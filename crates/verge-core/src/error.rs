use crate::dtype::DType;

/// Errors produced by the Verge execution core.
///
/// The variants map to three distinct failure classes so callers can tell a
/// bad model apart from a starved machine:
/// - contract violations (`Contract`, `ShapeMismatch`, `UnsupportedDType`)
/// - resource exhaustion (`AllocFailed`)
/// - shape/numeric inference failure (`InferFailed`)
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum VergeError {
    /// Null/missing tensor data, arity mismatch, or an operator invoked
    /// outside its documented contract.
    #[error("contract violation: {0}")]
    Contract(String),

    /// Tensor shapes incompatible with the requested operation.
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// No kernel exists for this (operator, dtype) combination, or a kernel
    /// was handed a dtype it does not implement.
    #[error("unsupported dtype {dtype} for {op}")]
    UnsupportedDType { dtype: DType, op: String },

    /// Scratch or packed-buffer allocation failed.
    #[error("allocation of {requested} bytes failed: {reason}")]
    AllocFailed { requested: usize, reason: String },

    /// Output shapes could not be resolved (e.g. incompatible broadcast
    /// operands, or a zero `group` divisor).
    #[error("shape inference failed: {0}")]
    InferFailed(String),
}

impl VergeError {
    /// Shorthand for a `Contract` error.
    pub fn contract(msg: impl Into<String>) -> Self {
        VergeError::Contract(msg.into())
    }
}
