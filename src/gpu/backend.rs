//! Backend trait and the headless recording implementation.

use rustc_hash::FxHashMap;

use super::types::{BufferDesc, BufferHandle, ProgramHandle, TextureDesc, TextureHandle};

/// The surface a renderer must provide to host the packing core.
///
/// Handles are allocated by [`super::Gpu`] and passed in, so backends only
/// track, never mint. All calls arrive serialized.
pub trait RenderBackend: Send {
    fn create_buffer(&mut self, handle: BufferHandle, desc: &BufferDesc, data: &[u8]);
    fn buffer_sub_data(&mut self, handle: BufferHandle, byte_offset: usize, data: &[u8]);
    fn destroy_buffer(&mut self, handle: BufferHandle);

    fn create_texture(&mut self, handle: TextureHandle, desc: &TextureDesc);
    fn texture_image(&mut self, handle: TextureHandle, data: &[u8]);
    fn texture_sub_image(
        &mut self,
        handle: TextureHandle,
        level: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
    );
    fn texture_compressed_data(&mut self, handle: TextureHandle, mipmaps: &[Vec<u8>]);
    fn destroy_texture(&mut self, handle: TextureHandle);

    /// Compile and link; `Err` carries the info log.
    fn compile_program(
        &mut self,
        handle: ProgramHandle,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<(), String>;
    fn destroy_program(&mut self, handle: ProgramHandle);

    fn stats(&self) -> GpuStats;
}

/// Allocation/upload counters, snapshot per call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GpuStats {
    pub buffers_alive: u32,
    pub buffers_created: u64,
    pub buffer_sub_uploads: u64,
    pub textures_alive: u32,
    pub textures_created: u64,
    pub texture_sub_uploads: u64,
    pub programs_created: u64,
    pub bytes_uploaded: u64,
}

#[derive(Debug)]
struct BufferRecord {
    size: usize,
    label: &'static str,
}

#[derive(Debug)]
struct TextureRecord {
    byte_size: usize,
    width: u32,
    height: u32,
    bytes_per_texel: u32,
    label: &'static str,
}

/// Recording backend. Stores sizes and counts instead of driver objects;
/// out-of-range updates are flagged loudly because on a real driver they
/// would be undefined behavior or silent corruption.
#[derive(Debug, Default)]
pub struct HeadlessBackend {
    buffers: FxHashMap<BufferHandle, BufferRecord>,
    textures: FxHashMap<TextureHandle, TextureRecord>,
    programs: FxHashMap<ProgramHandle, ()>,
    stats: GpuStats,
}

/// Shader sources containing this marker fail to "compile", so error
/// propagation is testable without a driver.
pub const COMPILE_FAIL_MARKER: &str = "#error";

impl HeadlessBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderBackend for HeadlessBackend {
    fn create_buffer(&mut self, handle: BufferHandle, desc: &BufferDesc, data: &[u8]) {
        self.buffers.insert(
            handle,
            BufferRecord {
                size: data.len(),
                label: desc.label,
            },
        );
        self.stats.buffers_created += 1;
        self.stats.buffers_alive += 1;
        self.stats.bytes_uploaded += data.len() as u64;
    }

    fn buffer_sub_data(&mut self, handle: BufferHandle, byte_offset: usize, data: &[u8]) {
        let Some(record) = self.buffers.get(&handle) else {
            log::error!("sub-data upload to unknown buffer {handle:?}");
            return;
        };
        if byte_offset + data.len() > record.size {
            log::error!(
                "sub-data upload past the end of {} ({} + {} > {})",
                record.label,
                byte_offset,
                data.len(),
                record.size
            );
            return;
        }
        self.stats.buffer_sub_uploads += 1;
        self.stats.bytes_uploaded += data.len() as u64;
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        if self.buffers.remove(&handle).is_some() {
            self.stats.buffers_alive -= 1;
        }
    }

    fn create_texture(&mut self, handle: TextureHandle, desc: &TextureDesc) {
        self.textures.insert(
            handle,
            TextureRecord {
                byte_size: desc.byte_size(),
                width: desc.width,
                height: desc.height,
                bytes_per_texel: desc.format.bytes_per_texel(),
                label: desc.label,
            },
        );
        self.stats.textures_created += 1;
        self.stats.textures_alive += 1;
        if desc.preload_color.is_some() {
            self.stats.bytes_uploaded += desc.byte_size() as u64;
        }
    }

    fn texture_image(&mut self, handle: TextureHandle, data: &[u8]) {
        let Some(record) = self.textures.get(&handle) else {
            log::error!("image upload to unknown texture {handle:?}");
            return;
        };
        if data.len() > record.byte_size {
            log::error!(
                "image upload larger than {} ({} > {})",
                record.label,
                data.len(),
                record.byte_size
            );
            return;
        }
        self.stats.texture_sub_uploads += 1;
        self.stats.bytes_uploaded += data.len() as u64;
    }

    fn texture_sub_image(
        &mut self,
        handle: TextureHandle,
        _level: u32,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        data: &[u8],
    ) {
        let Some(record) = self.textures.get(&handle) else {
            log::error!("sub-image upload to unknown texture {handle:?}");
            return;
        };
        let expected = (width * height * record.bytes_per_texel) as usize;
        if x + width > record.width || y + height > record.height || data.len() < expected {
            log::error!(
                "sub-image upload out of bounds on {} ({x},{y} {width}x{height})",
                record.label
            );
            return;
        }
        self.stats.texture_sub_uploads += 1;
        self.stats.bytes_uploaded += expected as u64;
    }

    fn texture_compressed_data(&mut self, handle: TextureHandle, mipmaps: &[Vec<u8>]) {
        if !self.textures.contains_key(&handle) {
            log::error!("compressed upload to unknown texture {handle:?}");
            return;
        }
        self.stats.texture_sub_uploads += 1;
        self.stats.bytes_uploaded += mipmaps.iter().map(|m| m.len() as u64).sum::<u64>();
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if self.textures.remove(&handle).is_some() {
            self.stats.textures_alive -= 1;
        }
    }

    fn compile_program(
        &mut self,
        handle: ProgramHandle,
        vertex_src: &str,
        fragment_src: &str,
    ) -> Result<(), String> {
        if vertex_src.contains(COMPILE_FAIL_MARKER) || fragment_src.contains(COMPILE_FAIL_MARKER) {
            return Err("shader source contains #error".to_string());
        }
        self.programs.insert(handle, ());
        self.stats.programs_created += 1;
        Ok(())
    }

    fn destroy_program(&mut self, handle: ProgramHandle) {
        self.programs.remove(&handle);
    }

    fn stats(&self) -> GpuStats {
        self.stats
    }
}
