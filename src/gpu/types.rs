//! Handle and descriptor vocabulary for the GPU surface.

use bitflags::bitflags;

/// Opaque handle to a GPU array buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Opaque handle to a 2D GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Opaque handle to a compiled GPU program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u64);

/// Bind point for an array buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferTarget {
    /// Vertex attribute data.
    Array,
    /// Index data.
    ElementArray,
}

bitflags! {
    /// Usage hints for buffer allocation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Written once at finalize, drawn many times.
        const STATIC_DRAW  = 1 << 0;
        /// Rewritten by per-portion setters after finalize.
        const DYNAMIC_DRAW = 1 << 1;
    }
}

/// Buffer allocation descriptor.
#[derive(Debug, Clone)]
pub struct BufferDesc {
    pub label: &'static str,
    pub target: BufferTarget,
    pub usage: BufferUsage,
    /// Integer data is normalized to [0,1] / [-1,1] at attribute fetch.
    pub normalized: bool,
    /// Bytes per logical item, for stride bookkeeping on the backend side.
    pub item_bytes: u32,
}

impl BufferDesc {
    #[must_use]
    pub fn vertex(label: &'static str, item_bytes: u32) -> Self {
        Self {
            label,
            target: BufferTarget::Array,
            usage: BufferUsage::STATIC_DRAW,
            normalized: false,
            item_bytes,
        }
    }

    #[must_use]
    pub fn vertex_normalized(label: &'static str, item_bytes: u32) -> Self {
        Self {
            normalized: true,
            ..Self::vertex(label, item_bytes)
        }
    }

    #[must_use]
    pub fn vertex_dynamic(label: &'static str, item_bytes: u32) -> Self {
        Self {
            usage: BufferUsage::DYNAMIC_DRAW,
            ..Self::vertex(label, item_bytes)
        }
    }

    #[must_use]
    pub fn index(label: &'static str, item_bytes: u32) -> Self {
        Self {
            target: BufferTarget::ElementArray,
            ..Self::vertex(label, item_bytes)
        }
    }
}

/// Minification/magnification filters. The mipmapped variants are only
/// meaningful for minification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FilterMode {
    #[default]
    Linear,
    Nearest,
    LinearMipmapLinear,
    NearestMipmapLinear,
    LinearMipmapNearest,
    NearestMipmapNearest,
}

/// Texture coordinate wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

/// Color-space interpretation of sampled texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureEncoding {
    #[default]
    Linear,
    Srgb,
}

/// Texel storage formats consumed by the packing core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    /// 8-bit RGBA, the material/color default.
    #[default]
    Rgba8,
    /// Full-float RGBA, used for matrix tables.
    Rgba32F,
    /// 16-bit unsigned RGBA, used for quantized position tables.
    Rgba16Uint,
    /// 8-bit unsigned single channel, byte-addressed index tables.
    R8Uint,
    /// 16-bit unsigned single channel index tables.
    R16Uint,
    /// 32-bit unsigned single channel index tables.
    R32Uint,
}

impl TextureFormat {
    #[must_use]
    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TextureFormat::Rgba8 => 4,
            TextureFormat::Rgba32F => 16,
            TextureFormat::Rgba16Uint => 8,
            TextureFormat::R8Uint => 1,
            TextureFormat::R16Uint => 2,
            TextureFormat::R32Uint => 4,
        }
    }
}

/// 2D texture allocation descriptor.
#[derive(Debug, Clone)]
pub struct TextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub wrap_r: WrapMode,
    pub encoding: TextureEncoding,
    pub flip_y: bool,
    /// Fill color applied before any image arrives (async loads).
    pub preload_color: Option<[u8; 4]>,
}

impl TextureDesc {
    /// Nearest-sampled data table, the shape every DTX plane uses.
    #[must_use]
    pub fn data_table(label: &'static str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label,
            width,
            height,
            format,
            min_filter: FilterMode::Nearest,
            mag_filter: FilterMode::Nearest,
            wrap_s: WrapMode::ClampToEdge,
            wrap_t: WrapMode::ClampToEdge,
            wrap_r: WrapMode::ClampToEdge,
            encoding: TextureEncoding::Linear,
            flip_y: false,
            preload_color: None,
        }
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.width as usize * self.height as usize * self.format.bytes_per_texel() as usize
    }
}
