//! Scratch allocator for transient kernel buffers.
//!
//! Kernels that need temporaries (broadcast tiling, per-run operand packing)
//! draw them from here instead of allocating ad hoc, so total transient
//! memory can be budgeted on constrained targets. Buffers return their bytes
//! to the budget on drop.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;
use verge_core::{Result, VergeError};

#[derive(Default)]
struct Usage {
    used: usize,
    peak: usize,
}

/// Tracks scratch memory against an optional byte limit.
pub struct ScratchAllocator {
    limit: Option<usize>,
    usage: Mutex<Usage>,
}

impl ScratchAllocator {
    /// Unlimited allocator.
    pub fn new() -> Self {
        Self {
            limit: None,
            usage: Mutex::new(Usage::default()),
        }
    }

    /// Allocator that fails requests once `limit` bytes are outstanding.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            usage: Mutex::new(Usage::default()),
        }
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut usage = self.usage.lock();
        if let Some(limit) = self.limit {
            if usage.used + bytes > limit {
                return Err(VergeError::AllocFailed {
                    requested: bytes,
                    reason: format!("scratch budget exceeded ({} of {limit} bytes in use)", usage.used),
                });
            }
        }
        usage.used += bytes;
        usage.peak = usage.peak.max(usage.used);
        Ok(())
    }

    fn release(&self, bytes: usize) {
        let mut usage = self.usage.lock();
        usage.used = usage.used.saturating_sub(bytes);
    }

    /// Allocate a zeroed buffer of `n` elements.
    pub fn alloc<T: Copy + Default>(&self, n: usize) -> Result<ScratchBuffer<'_, T>> {
        let bytes = n * std::mem::size_of::<T>();
        self.reserve(bytes)?;
        tracing::trace!(bytes, "scratch alloc");
        Ok(ScratchBuffer {
            data: vec![T::default(); n],
            owner: self,
            bytes,
        })
    }

    /// Bytes currently outstanding.
    pub fn used_bytes(&self) -> usize {
        self.usage.lock().used
    }

    /// High-water mark since creation.
    pub fn peak_bytes(&self) -> usize {
        self.usage.lock().peak
    }
}

impl Default for ScratchAllocator {
    fn default() -> Self {
        Self::new()
    }
}

/// A scratch buffer that returns its bytes to the allocator on drop.
pub struct ScratchBuffer<'a, T> {
    data: Vec<T>,
    owner: &'a ScratchAllocator,
    bytes: usize,
}

impl<T> Deref for ScratchBuffer<'_, T> {
    type Target = [T];
    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for ScratchBuffer<'_, T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T> Drop for ScratchBuffer<'_, T> {
    fn drop(&mut self) {
        self.owner.release(self.bytes);
    }
}
