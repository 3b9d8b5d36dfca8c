//! Scene model: the authoring aggregator and its satellite types.
//!
//! [`SceneModel`] owns every arena (layers, meshes, entities, transforms,
//! textures); everything else stores handles into them, which keeps the
//! ownership graph acyclic. The authoring flow is: `create_geometry` /
//! `create_texture` / `create_texture_set` / `create_transform` →
//! `create_mesh` → `create_entity` → `finalize`, after which only
//! per-portion state (flags, colors, offsets, matrices) stays mutable.

pub mod entity;
pub mod keys;
pub mod mesh;
pub mod scene_model;
pub mod texture;
pub mod transform;

pub use entity::{Entity, EntityCfg, ObjectSets};
pub use keys::LayerKey;
pub use mesh::{Mesh, MeshCfg};
pub use scene_model::{SceneModel, SceneModelCfg};
pub use texture::{
    DecodedImage, ModelTexture, TextureCfg, TextureCompletion, TextureSet, TextureSetCfg,
    TextureSource, TextureState,
};
pub use transform::{SceneTransform, TransformCfg, TransformForest};

use slotmap::new_key_type;

new_key_type! {
    /// Handle to a layer in the model's layer arena.
    pub struct LayerHandle;

    /// Handle to a mesh record.
    pub struct MeshHandle;

    /// Handle to an entity.
    pub struct EntityHandle;

    /// Handle to a transform node.
    pub struct TransformHandle;

    /// Handle to a texture slot.
    pub struct TextureKey;
}
