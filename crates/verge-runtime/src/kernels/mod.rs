//! CPU kernel implementations.
//!
//! Each module exposes a `create` function with the registry's creator
//! signature plus the kernel type itself for direct construction in tests.

pub mod add_int8;
pub mod arithmetic;
pub mod batchnorm;
pub mod conv;
pub mod group_conv;
pub mod layer_norm_int8;
pub mod matmul;
pub mod resize_int8;
