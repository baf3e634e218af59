//! # verge-kernels
//!
//! CPU compute kernels for the Verge edge-inference runtime.
//!
//! Provides:
//! - Fixed-point primitives for int8 requantization
//! - Broadcast elementwise arithmetic (f32 and i32) with fused activation
//! - Quantized int8 add with the two-input rescale-to-common-scale scheme
//! - Nearest-neighbor and bilinear int8 resize
//! - Int8 layer normalization with optional affine gamma/beta
//! - Matmul with operand packing, convolution, batch normalization
//!
//! Kernels here are pure functions over slices; tensor plumbing, scheduling
//! and parallel fan-out live in `verge-runtime`.

pub mod activation;
pub mod add_int8;
pub mod arithmetic;
pub mod batchnorm;
pub mod conv;
pub mod fixed_point;
pub mod layer_norm_int8;
pub mod matmul;
pub mod resize_int8;

pub use activation::Activation;
