#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

//! Strata: a scene-packing engine.
//!
//! Strata compiles a stream of authored geometries, meshes, objects,
//! textures, and transforms into a small number of tightly packed GPU
//! buffers and data textures — few draw calls, while every object keeps
//! independent visibility, selection, highlight, x-ray, edge, clipping,
//! and pick state, and very large models keep double-precision accuracy
//! through origin-relative 16-bit quantization.

pub mod compress;
pub mod errors;
pub mod geometry;
pub mod gpu;
pub mod layer;
pub mod math;
pub mod model;
pub mod scratch;

pub use errors::{Result, StrataError};
pub use geometry::{Geometry, GeometryCfg, PrimitiveKind};
pub use gpu::{Gpu, HeadlessBackend, RenderBackend};
pub use layer::{AggregateCounters, EntityFlags, Layer, LayerOps, PortionId};
pub use math::Aabb;
pub use model::{
    EntityCfg, MeshCfg, SceneModel, SceneModelCfg, TextureCfg, TextureSetCfg, TransformCfg,
};
pub use scratch::ScratchPool;
