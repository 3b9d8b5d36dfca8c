//! GPU abstraction surface.
//!
//! The packing core never talks to a concrete graphics API. It consumes
//! the minimal surface in this module: array buffers with sub-range
//! updates, 2D textures with sub-image updates, and programs with error
//! capture. A renderer supplies a [`RenderBackend`]; tests and tooling use
//! the built-in [`HeadlessBackend`], which records every allocation and
//! upload so invariants like "setting a flag to its current value causes
//! zero GPU writes" are directly observable.
//!
//! [`Gpu`] wraps the backend behind `&self` methods so layers and the
//! scene model can share it the way the rest of the engine shares a
//! render context: one handle, interior locking, no borrow plumbing.

pub mod backend;
pub mod program;
pub mod types;

pub use backend::{GpuStats, HeadlessBackend, RenderBackend};
pub use program::Program;
pub use types::{
    BufferDesc, BufferHandle, BufferTarget, BufferUsage, FilterMode, ProgramHandle,
    TextureDesc, TextureEncoding, TextureFormat, TextureHandle, WrapMode,
};

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::errors::{Result, StrataError};

static NEXT_GPU_ID: AtomicU64 = AtomicU64::new(1);

/// Shared GPU context.
///
/// Clones of the surrounding `Arc` are handed to every layer; all methods
/// take `&self` and serialize access internally.
pub struct Gpu {
    backend: Mutex<Box<dyn RenderBackend>>,
}

impl Gpu {
    pub fn new(backend: Box<dyn RenderBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend: Mutex::new(backend),
        })
    }

    /// A context backed by the recording backend. Convenience for tests
    /// and headless compilation runs.
    #[must_use]
    pub fn headless() -> Arc<Self> {
        Self::new(Box::new(HeadlessBackend::new()))
    }

    fn alloc_id() -> u64 {
        NEXT_GPU_ID.fetch_add(1, Ordering::Relaxed)
    }

    // ========================================================================
    // Buffers
    // ========================================================================

    pub fn create_array_buffer(&self, desc: &BufferDesc, data: &[u8]) -> BufferHandle {
        let handle = BufferHandle(Self::alloc_id());
        self.backend.lock().create_buffer(handle, desc, data);
        handle
    }

    /// Uploads `data` at `byte_offset` into an existing buffer.
    pub fn buffer_sub_data(&self, handle: BufferHandle, byte_offset: usize, data: &[u8]) {
        self.backend.lock().buffer_sub_data(handle, byte_offset, data);
    }

    pub fn destroy_buffer(&self, handle: BufferHandle) {
        self.backend.lock().destroy_buffer(handle);
    }

    // ========================================================================
    // Textures
    // ========================================================================

    pub fn create_texture_2d(&self, desc: &TextureDesc) -> TextureHandle {
        let handle = TextureHandle(Self::alloc_id());
        self.backend.lock().create_texture(handle, desc);
        handle
    }

    /// Full-plane upload (level 0).
    pub fn texture_image(&self, handle: TextureHandle, data: &[u8]) {
        self.backend.lock().texture_image(handle, data);
    }

    pub fn texture_sub_image_2d(
        &self,
        handle: TextureHandle,
        level: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        self.backend
            .lock()
            .texture_sub_image(handle, level, x, y, width, height, data);
    }

    /// Upload of pre-transcoded compressed mip chain.
    pub fn texture_compressed_data(&self, handle: TextureHandle, mipmaps: &[Vec<u8>]) {
        self.backend.lock().texture_compressed_data(handle, mipmaps);
    }

    pub fn destroy_texture(&self, handle: TextureHandle) {
        self.backend.lock().destroy_texture(handle);
    }

    // ========================================================================
    // Programs
    // ========================================================================

    /// Compiles a program. Failure is not fatal to the caller: the
    /// returned [`Program`] carries the error log and renders as a no-op.
    pub fn create_program(&self, vertex_src: &str, fragment_src: &str) -> Program {
        let handle = ProgramHandle(Self::alloc_id());
        match self
            .backend
            .lock()
            .compile_program(handle, vertex_src, fragment_src)
        {
            Ok(()) => Program::linked(handle),
            Err(info_log) => {
                log::error!("program {handle:?} failed to compile: {info_log}");
                Program::failed(handle, info_log)
            }
        }
    }

    pub fn destroy_program(&self, program: &Program) {
        self.backend.lock().destroy_program(program.handle());
    }

    /// Validates that a program is usable, mapping failure to the fatal
    /// error kind.
    pub fn require_linked(program: &Program) -> Result<()> {
        match program.errors() {
            None => Ok(()),
            Some(log) => Err(StrataError::ProgramCompile(log.join("\n"))),
        }
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Snapshot of the backend's allocation/upload counters.
    pub fn stats(&self) -> GpuStats {
        self.backend.lock().stats()
    }
}

impl std::fmt::Debug for Gpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gpu").finish_non_exhaustive()
    }
}
