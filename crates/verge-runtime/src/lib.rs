//! # verge-runtime
//!
//! Kernel scheduling and graph execution for the Verge edge-inference
//! runtime.
//!
//! Provides:
//! - A tensor pool with checked disjoint input/output borrows
//! - Worker-pool fan-out over contiguous output ranges
//! - A scratch allocator with an optional byte budget
//! - The `Kernel` trait and CPU kernel implementations
//! - A registry keyed on (target, dtype, operator)
//! - A graph executor with reference-counted buffer reclamation

pub mod allocator;
pub mod executor;
pub mod kernel;
pub mod kernels;
pub mod parallel;
pub mod pool;
pub mod registry;

pub use allocator::{ScratchAllocator, ScratchBuffer};
pub use executor::GraphExecutor;
pub use kernel::{ConvParams, Kernel, OpParams, RunContext};
pub use pool::{TensorId, TensorPool};
pub use registry::{KernelKey, KernelRegistry, KernelSpec, OpKind, Target};
