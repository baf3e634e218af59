//! # verge-core
//!
//! Tensor data model for the Verge edge-inference runtime.
//!
//! Provides the foundational `Tensor` type with:
//! - Inference dtypes (F32, F16, I8, I32, Bool)
//! - Per-tensor and per-channel quantization parameters
//! - Lazily materialized backing storage
//! - Executor-owned reference counts for buffer-reuse scheduling

pub mod dtype;
pub mod error;
pub mod quant;
pub mod shape;
pub mod tensor;

pub use dtype::DType;
pub use error::VergeError;
pub use quant::QuantParam;
pub use shape::Shape;
pub use tensor::{Category, Format, Tensor};

pub type Result<T> = std::result::Result<T, VergeError>;
