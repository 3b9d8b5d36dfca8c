//! Model textures and texture sets.
//!
//! A texture slot is a small state machine: `Empty` (allocated, no
//! image), `Loading` (asynchronous decode in flight), `Ready`, or
//! `Failed`. Async results arrive as [`TextureCompletion`] messages on
//! the model's completion channel and are applied on the commit tick;
//! completions that land after a slot is destroyed are dropped.

use crate::errors::{Result, StrataError};
use crate::gpu::{FilterMode, Gpu, TextureDesc, TextureEncoding, TextureFormat, TextureHandle, WrapMode};

use super::TextureKey;

/// Pixel payload for texture creation or async completion.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    /// RGBA8 pixels.
    pub data: Vec<u8>,
}

/// Where a texture's image comes from.
#[derive(Debug, Clone)]
pub enum TextureSource {
    /// Decoded pixels, uploaded immediately.
    Pixels(DecodedImage),
    /// Pre-transcoded compressed mip chain, uploaded immediately.
    Compressed {
        width: u32,
        height: u32,
        mipmaps: Vec<Vec<u8>>,
    },
    /// Image arrives later through the completion channel.
    Deferred,
}

/// Authoring configuration for `create_texture`.
#[derive(Debug, Clone)]
pub struct TextureCfg {
    pub id: String,
    pub source: TextureSource,
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub wrap_r: WrapMode,
    pub flip_y: bool,
    pub encoding: TextureEncoding,
}

impl TextureCfg {
    #[must_use]
    pub fn new(id: impl Into<String>, source: TextureSource) -> Self {
        Self {
            id: id.into(),
            source,
            min_filter: FilterMode::LinearMipmapLinear,
            mag_filter: FilterMode::Linear,
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
            wrap_r: WrapMode::Repeat,
            flip_y: false,
            encoding: TextureEncoding::Linear,
        }
    }
}

/// Resolution state of a texture slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureState {
    Empty,
    Loading,
    Ready,
    Failed,
}

/// One texture slot.
#[derive(Debug)]
pub struct ModelTexture {
    pub id: String,
    handle: TextureHandle,
    state: TextureState,
    width: u32,
    height: u32,
}

impl ModelTexture {
    /// Allocates the GPU texture and uploads any immediate payload.
    /// A zero-length immediate payload is logged and leaves the slot
    /// empty; the create call itself still succeeds.
    pub fn create(gpu: &Gpu, cfg: &TextureCfg) -> Result<Self> {
        if cfg.id.is_empty() {
            return Err(StrataError::MissingParam("texture id"));
        }
        let (width, height) = match &cfg.source {
            TextureSource::Pixels(image) => (image.width.max(1), image.height.max(1)),
            TextureSource::Compressed { width, height, .. } => ((*width).max(1), (*height).max(1)),
            TextureSource::Deferred => (1, 1),
        };
        let desc = TextureDesc {
            label: "model.texture",
            width,
            height,
            format: TextureFormat::Rgba8,
            min_filter: cfg.min_filter,
            mag_filter: cfg.mag_filter,
            wrap_s: cfg.wrap_s,
            wrap_t: cfg.wrap_t,
            wrap_r: cfg.wrap_r,
            encoding: cfg.encoding,
            flip_y: cfg.flip_y,
            preload_color: matches!(cfg.source, TextureSource::Deferred)
                .then_some([255, 255, 255, 255]),
        };
        let handle = gpu.create_texture_2d(&desc);

        let state = match &cfg.source {
            TextureSource::Pixels(image) => {
                if image.data.is_empty() {
                    log::error!("texture {:?}: empty image payload, slot stays empty", cfg.id);
                    TextureState::Empty
                } else {
                    gpu.texture_image(handle, &image.data);
                    TextureState::Ready
                }
            }
            TextureSource::Compressed { mipmaps, .. } => {
                if mipmaps.is_empty() || mipmaps.iter().all(Vec::is_empty) {
                    log::error!(
                        "texture {:?}: transcoder produced no data, slot stays empty",
                        cfg.id
                    );
                    TextureState::Empty
                } else {
                    gpu.texture_compressed_data(handle, mipmaps);
                    TextureState::Ready
                }
            }
            TextureSource::Deferred => TextureState::Loading,
        };

        Ok(Self {
            id: cfg.id.clone(),
            handle,
            state,
            width,
            height,
        })
    }

    #[must_use]
    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    #[must_use]
    pub fn state(&self) -> TextureState {
        self.state
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Applies an async completion. The slot only transitions out of
    /// `Loading`; stale completions for settled slots are ignored.
    pub(crate) fn resolve(
        &mut self,
        gpu: &Gpu,
        result: std::result::Result<DecodedImage, String>,
    ) {
        if self.state != TextureState::Loading {
            return;
        }
        match result {
            Ok(image) if !image.data.is_empty() => {
                // The placeholder was 1x1; reallocate at the real size.
                gpu.destroy_texture(self.handle);
                self.handle = gpu.create_texture_2d(&TextureDesc {
                    width: image.width.max(1),
                    height: image.height.max(1),
                    ..TextureDesc::data_table("model.texture", 1, 1, TextureFormat::Rgba8)
                });
                self.width = image.width.max(1);
                self.height = image.height.max(1);
                gpu.texture_image(self.handle, &image.data);
                self.state = TextureState::Ready;
            }
            Ok(_) => {
                log::error!("texture {:?}: async load produced no data", self.id);
                self.state = TextureState::Empty;
            }
            Err(reason) => {
                log::error!("texture {:?} failed to load: {reason}", self.id);
                self.state = TextureState::Failed;
            }
        }
    }

    pub(crate) fn destroy(&mut self, gpu: &Gpu) {
        gpu.destroy_texture(self.handle);
        self.state = TextureState::Empty;
    }
}

/// Async load result, delivered on the model's completion channel.
#[derive(Debug)]
pub struct TextureCompletion {
    pub texture_id: String,
    pub result: std::result::Result<DecodedImage, String>,
}

/// Authoring configuration for `create_texture_set`.
#[derive(Debug, Clone, Default)]
pub struct TextureSetCfg {
    pub id: String,
    pub color_texture_id: Option<String>,
    pub metallic_roughness_texture_id: Option<String>,
    pub normals_texture_id: Option<String>,
    pub emissive_texture_id: Option<String>,
    pub occlusion_texture_id: Option<String>,
    pub alpha_cutoff: Option<f32>,
}

/// Ordered tuple of material textures; missing channels fall back to the
/// model's 1x1 defaults.
#[derive(Debug, Clone)]
pub struct TextureSet {
    pub id: String,
    pub color: TextureKey,
    pub metallic_roughness: TextureKey,
    pub normals: TextureKey,
    pub emissive: TextureKey,
    pub occlusion: TextureKey,
    pub alpha_cutoff: f32,
}

/// Solid 1x1 payloads for the default channels.
pub(crate) const DEFAULT_COLOR: [u8; 4] = [255, 255, 255, 255];
pub(crate) const DEFAULT_METALLIC_ROUGHNESS: [u8; 4] = [0, 255, 0, 255];
pub(crate) const DEFAULT_NORMALS: [u8; 4] = [128, 128, 255, 255];
pub(crate) const DEFAULT_EMISSIVE: [u8; 4] = [0, 0, 0, 255];
pub(crate) const DEFAULT_OCCLUSION: [u8; 4] = [255, 255, 255, 255];
