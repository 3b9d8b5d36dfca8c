//! Transform forest.
//!
//! Transforms form a forest of TRS nodes with cached local and world
//! matrices. Rotation is kept consistent both ways: Euler degrees (XYZ
//! order) in, quaternion out, and back. World matrices rebuild lazily
//! when any ancestor is dirty; dirtying a node invalidates its whole
//! subtree.

use glam::{EulerRot, Mat4, Quat, Vec3};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;

use super::{MeshHandle, TransformHandle};
use crate::errors::{Result, StrataError};

/// Authoring configuration for one transform node.
#[derive(Debug, Clone, Default)]
pub struct TransformCfg {
    pub id: String,
    pub parent_transform_id: Option<String>,
    pub position: Option<Vec3>,
    /// Euler angles in degrees, XYZ order. Ignored when `quaternion` or
    /// `matrix` is present.
    pub rotation: Option<Vec3>,
    pub quaternion: Option<Quat>,
    pub scale: Option<Vec3>,
    /// Full local matrix; decomposed into TRS on assignment.
    pub matrix: Option<Mat4>,
}

/// One node of the forest.
#[derive(Debug, Clone)]
pub struct SceneTransform {
    pub id: String,
    parent: Option<TransformHandle>,
    children: Vec<TransformHandle>,
    position: Vec3,
    quaternion: Quat,
    scale: Vec3,
    local_matrix: Mat4,
    world_matrix: Mat4,
    world_dirty: bool,
    /// Meshes bound to this node; matrix changes fan out to them.
    pub(crate) meshes: Vec<MeshHandle>,
}

impl SceneTransform {
    fn rebuild_local(&mut self) {
        self.local_matrix =
            Mat4::from_scale_rotation_translation(self.scale, self.quaternion, self.position);
    }

    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.position
    }

    #[must_use]
    pub fn quaternion(&self) -> Quat {
        self.quaternion
    }

    /// Euler angles in degrees, XYZ order.
    #[must_use]
    pub fn rotation(&self) -> Vec3 {
        let (x, y, z) = self.quaternion.to_euler(EulerRot::XYZ);
        Vec3::new(x.to_degrees(), y.to_degrees(), z.to_degrees())
    }

    #[must_use]
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    #[must_use]
    pub fn parent(&self) -> Option<TransformHandle> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[TransformHandle] {
        &self.children
    }

    #[must_use]
    pub fn local_matrix(&self) -> Mat4 {
        self.local_matrix
    }
}

/// Arena of transform nodes with an id index.
#[derive(Debug, Default)]
pub struct TransformForest {
    nodes: SlotMap<TransformHandle, SceneTransform>,
    index: FxHashMap<String, TransformHandle>,
    /// Nodes whose subtree went dirty since the last drain.
    dirty: Vec<TransformHandle>,
}

impl TransformForest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&mut self, cfg: TransformCfg) -> Result<TransformHandle> {
        if cfg.id.is_empty() {
            return Err(StrataError::MissingParam("transform id"));
        }
        if self.index.contains_key(&cfg.id) {
            return Err(StrataError::DuplicateId {
                kind: "transform",
                id: cfg.id,
            });
        }
        let parent = match &cfg.parent_transform_id {
            Some(parent_id) => Some(self.handle(parent_id).ok_or_else(|| {
                StrataError::UnknownId {
                    kind: "transform",
                    id: parent_id.clone(),
                }
            })?),
            None => None,
        };

        let (position, quaternion, scale) = if let Some(matrix) = cfg.matrix {
            let (scale, quaternion, position) = matrix.to_scale_rotation_translation();
            (position, quaternion, scale)
        } else {
            let quaternion = cfg.quaternion.unwrap_or_else(|| {
                cfg.rotation.map_or(Quat::IDENTITY, |deg| {
                    Quat::from_euler(
                        EulerRot::XYZ,
                        deg.x.to_radians(),
                        deg.y.to_radians(),
                        deg.z.to_radians(),
                    )
                })
            });
            (
                cfg.position.unwrap_or(Vec3::ZERO),
                quaternion,
                cfg.scale.unwrap_or(Vec3::ONE),
            )
        };

        let mut node = SceneTransform {
            id: cfg.id.clone(),
            parent,
            children: Vec::new(),
            position,
            quaternion,
            scale,
            local_matrix: Mat4::IDENTITY,
            world_matrix: Mat4::IDENTITY,
            world_dirty: true,
            meshes: Vec::new(),
        };
        node.rebuild_local();

        let handle = self.nodes.insert(node);
        if let Some(parent) = parent {
            self.nodes[parent].children.push(handle);
        }
        self.index.insert(cfg.id, handle);
        Ok(handle)
    }

    #[must_use]
    pub fn handle(&self, id: &str) -> Option<TransformHandle> {
        self.index.get(id).copied()
    }

    #[must_use]
    pub fn get(&self, handle: TransformHandle) -> Option<&SceneTransform> {
        self.nodes.get(handle)
    }

    pub(crate) fn bind_mesh(&mut self, handle: TransformHandle, mesh: MeshHandle) {
        self.nodes[handle].meshes.push(mesh);
    }

    /// World matrix, rebuilding any dirty ancestors on the way.
    pub fn world_matrix(&mut self, handle: TransformHandle) -> Mat4 {
        let (dirty, parent, local) = {
            let node = &self.nodes[handle];
            (node.world_dirty, node.parent, node.local_matrix)
        };
        if !dirty {
            return self.nodes[handle].world_matrix;
        }
        let parent_world = parent.map_or(Mat4::IDENTITY, |p| self.world_matrix(p));
        let world = parent_world * local;
        let node = &mut self.nodes[handle];
        node.world_matrix = world;
        node.world_dirty = false;
        world
    }

    pub fn set_position(&mut self, handle: TransformHandle, position: Vec3) {
        self.nodes[handle].position = position;
        self.nodes[handle].rebuild_local();
        self.mark_dirty(handle);
    }

    /// Euler degrees, XYZ order.
    pub fn set_rotation(&mut self, handle: TransformHandle, degrees: Vec3) {
        self.set_quaternion(
            handle,
            Quat::from_euler(
                EulerRot::XYZ,
                degrees.x.to_radians(),
                degrees.y.to_radians(),
                degrees.z.to_radians(),
            ),
        );
    }

    pub fn set_quaternion(&mut self, handle: TransformHandle, quaternion: Quat) {
        self.nodes[handle].quaternion = quaternion;
        self.nodes[handle].rebuild_local();
        self.mark_dirty(handle);
    }

    pub fn set_scale(&mut self, handle: TransformHandle, scale: Vec3) {
        self.nodes[handle].scale = scale;
        self.nodes[handle].rebuild_local();
        self.mark_dirty(handle);
    }

    /// Assigns a full local matrix, keeping TRS in sync by decomposition.
    pub fn set_matrix(&mut self, handle: TransformHandle, matrix: Mat4) {
        let (scale, quaternion, position) = matrix.to_scale_rotation_translation();
        let node = &mut self.nodes[handle];
        node.position = position;
        node.quaternion = quaternion;
        node.scale = scale;
        node.local_matrix = matrix;
        self.mark_dirty(handle);
    }

    /// Dirties a subtree; the affected nodes rebuild on next read.
    fn mark_dirty(&mut self, handle: TransformHandle) {
        self.dirty.push(handle);
        let mut stack = vec![handle];
        while let Some(current) = stack.pop() {
            let node = &mut self.nodes[current];
            if node.world_dirty && current != handle {
                continue;
            }
            node.world_dirty = true;
            stack.extend(node.children.iter().copied());
        }
    }

    /// Drains the dirty set, returning every (transform, meshes) pair
    /// whose world matrix may have changed.
    pub(crate) fn drain_dirty(&mut self) -> Vec<(TransformHandle, Vec<MeshHandle>)> {
        let roots = std::mem::take(&mut self.dirty);
        let mut out = Vec::new();
        let mut stack: Vec<TransformHandle> = roots;
        while let Some(current) = stack.pop() {
            let node = &self.nodes[current];
            if !node.meshes.is_empty() {
                out.push((current, node.meshes.clone()));
            }
            stack.extend(node.children.iter().copied());
        }
        out
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
