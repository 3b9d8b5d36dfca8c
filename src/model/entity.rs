//! Entities: user-addressable objects grouping one or more meshes.
//!
//! The entity owns the authoritative flags bitmask. Property setters on
//! the model compare desired against current state, bail on no-ops, then
//! fan the change out to every mesh's layer portion and update the
//! scene-level observable sets. Culling is a three-source disjunction:
//! explicit, view-frustum, and LOD (the last gated by `lod_cullable`).

use glam::Vec3;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{EntityHandle, MeshHandle};
use crate::layer::EntityFlags;
use crate::math::Aabb;

/// Authoring configuration for `create_entity`.
#[derive(Debug, Clone)]
pub struct EntityCfg {
    /// Generated when absent.
    pub id: Option<String>,
    pub mesh_ids: Vec<String>,
    /// Objects register in the scene-level observable sets.
    pub is_object: bool,
    // Initial flag overrides.
    pub visible: bool,
    pub culled: bool,
    pub pickable: bool,
    pub clippable: bool,
    pub collidable: bool,
    pub edges: bool,
    pub xrayed: bool,
    pub highlighted: bool,
    pub selected: bool,
}

impl Default for EntityCfg {
    fn default() -> Self {
        Self {
            id: None,
            mesh_ids: Vec::new(),
            is_object: true,
            visible: true,
            culled: false,
            pickable: true,
            clippable: true,
            collidable: true,
            edges: false,
            xrayed: false,
            highlighted: false,
            selected: false,
        }
    }
}

impl EntityCfg {
    #[must_use]
    pub fn initial_flags(&self) -> EntityFlags {
        let mut flags = EntityFlags::empty();
        flags.set(EntityFlags::VISIBLE, self.visible);
        flags.set(EntityFlags::CULLED, self.culled);
        flags.set(EntityFlags::PICKABLE, self.pickable);
        flags.set(EntityFlags::CLIPPABLE, self.clippable);
        flags.set(EntityFlags::COLLIDABLE, self.collidable);
        flags.set(EntityFlags::EDGES, self.edges);
        flags.set(EntityFlags::XRAYED, self.xrayed);
        flags.set(EntityFlags::HIGHLIGHTED, self.highlighted);
        flags.set(EntityFlags::SELECTED, self.selected);
        flags
    }
}

/// One entity.
#[derive(Debug)]
pub struct Entity {
    pub id: String,
    /// The globalized id with the model-id prefix stripped.
    pub original_system_id: String,
    pub(crate) meshes: SmallVec<[MeshHandle; 4]>,
    pub(crate) flags: EntityFlags,
    pub(crate) offset: Vec3,
    pub is_object: bool,
    pub num_primitives: u64,
    pub(crate) aabb: Aabb,
    pub(crate) aabb_dirty: bool,
    // Culling sources; the CULLED bit is their disjunction.
    pub(crate) culled_explicit: bool,
    pub(crate) culled_vfc: bool,
    pub(crate) culled_lod: bool,
    pub(crate) lod_cullable: bool,
}

impl Entity {
    pub(crate) fn new(id: String, original_system_id: String, is_object: bool) -> Self {
        Self {
            id,
            original_system_id,
            meshes: SmallVec::new(),
            flags: EntityFlags::empty(),
            offset: Vec3::ZERO,
            is_object,
            num_primitives: 0,
            aabb: Aabb::collapsed(),
            aabb_dirty: true,
            culled_explicit: false,
            culled_vfc: false,
            culled_lod: false,
            lod_cullable: true,
        }
    }

    #[must_use]
    pub fn flags(&self) -> EntityFlags {
        self.flags
    }

    #[must_use]
    pub fn visible(&self) -> bool {
        self.flags.contains(EntityFlags::VISIBLE)
    }

    #[must_use]
    pub fn xrayed(&self) -> bool {
        self.flags.contains(EntityFlags::XRAYED)
    }

    #[must_use]
    pub fn highlighted(&self) -> bool {
        self.flags.contains(EntityFlags::HIGHLIGHTED)
    }

    #[must_use]
    pub fn selected(&self) -> bool {
        self.flags.contains(EntityFlags::SELECTED)
    }

    #[must_use]
    pub fn culled(&self) -> bool {
        self.flags.contains(EntityFlags::CULLED)
    }

    #[must_use]
    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    #[must_use]
    pub fn meshes(&self) -> &[MeshHandle] {
        &self.meshes
    }

    /// Combined culled state from the three sources.
    #[must_use]
    pub(crate) fn effective_culled(&self) -> bool {
        self.culled_explicit || self.culled_vfc || (self.culled_lod && self.lod_cullable)
    }
}

/// Derives `original_system_id` from a globalized entity id by stripping
/// the model-id prefix.
#[must_use]
pub fn original_system_id(model_id: &str, entity_id: &str) -> String {
    let prefix = format!("{model_id}#");
    entity_id
        .strip_prefix(&prefix)
        .unwrap_or(entity_id)
        .to_string()
}

/// Scene-level observable sets of objects, keyed by entity id.
///
/// Only entity setters mutate these, always on the main thread; the
/// viewer reads them to enumerate visible/emphasized objects without
/// walking every entity.
#[derive(Debug, Default)]
pub struct ObjectSets {
    pub visible: FxHashMap<String, EntityHandle>,
    pub xrayed: FxHashMap<String, EntityHandle>,
    pub highlighted: FxHashMap<String, EntityHandle>,
    pub selected: FxHashMap<String, EntityHandle>,
}

impl ObjectSets {
    pub(crate) fn update(
        set: &mut FxHashMap<String, EntityHandle>,
        id: &str,
        handle: EntityHandle,
        member: bool,
    ) {
        if member {
            set.insert(id.to_string(), handle);
        } else {
            set.remove(id);
        }
    }

    pub(crate) fn remove_all(&mut self, id: &str) {
        self.visible.remove(id);
        self.xrayed.remove(id);
        self.highlighted.remove(id);
        self.selected.remove(id);
    }
}
