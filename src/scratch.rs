//! Pooled scratch memory for layer builds.
//!
//! Finalizing a batched layer needs large staging arrays for exactly the
//! duration of the build. The pool keeps one set of growable arrays and
//! leases them out scoped; the lease returns them on drop with capacity
//! intact. Acquisition is not reentrant — two overlapping batched builds
//! are a caller bug and surface as [`StrataError::ScratchBusy`].

use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

use crate::errors::{Result, StrataError};

/// The reusable staging arrays.
#[derive(Debug, Default)]
pub struct ScratchBuffers {
    pub f32s: Vec<f32>,
    pub u16s: Vec<u16>,
    pub u8s: Vec<u8>,
    pub u32s: Vec<u32>,
}

impl ScratchBuffers {
    fn reset(&mut self) {
        self.f32s.clear();
        self.u16s.clear();
        self.u8s.clear();
        self.u32s.clear();
    }
}

/// Process-scoped pool; the scene model owns one and shares it with its
/// batched layers.
#[derive(Debug, Default)]
pub struct ScratchPool {
    inner: Mutex<ScratchBuffers>,
}

impl ScratchPool {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Leases the buffers, cleared. Fails instead of blocking when a
    /// lease is already out.
    pub fn acquire(&self) -> Result<ScratchLease<'_>> {
        let mut guard = self.inner.try_lock().ok_or(StrataError::ScratchBusy)?;
        guard.reset();
        Ok(ScratchLease { guard })
    }
}

/// Scoped lease; dropping it releases the pool.
pub struct ScratchLease<'a> {
    guard: MutexGuard<'a, ScratchBuffers>,
}

impl std::ops::Deref for ScratchLease<'_> {
    type Target = ScratchBuffers;
    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl std::ops::DerefMut for ScratchLease<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
