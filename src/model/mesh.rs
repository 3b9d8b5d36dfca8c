//! Mesh records and their authoring configuration.

use glam::{DVec3, Mat4, Quat, Vec3};

use super::{EntityHandle, LayerHandle, TransformHandle};
use crate::geometry::PrimitiveKind;
use crate::layer::PortionId;
use crate::math::Aabb;

/// Authoring configuration for `create_mesh`.
///
/// Either `geometry_id` (instanced path) or inline geometry fields
/// (batched path) must be present. Placement comes from `transform_id`,
/// a full `matrix`, or position/rotation/quaternion/scale, which are
/// composed into a baked matrix at creation.
#[derive(Debug, Clone, Default)]
pub struct MeshCfg {
    pub id: String,

    // Instanced path.
    pub geometry_id: Option<String>,

    // Batched path: inline geometry.
    pub primitive: Option<PrimitiveKind>,
    pub positions: Option<Vec<f64>>,
    pub positions_compressed: Option<Vec<u16>>,
    pub decode_matrix: Option<Mat4>,
    pub decode_boundary: Option<(Vec3, Vec3)>,
    pub indices: Option<Vec<u32>>,
    pub normals: Option<Vec<f32>>,
    pub uv: Option<Vec<f32>>,
    pub uv_compressed: Option<Vec<u16>>,
    pub uv_decode_matrix: Option<glam::Mat3>,
    pub colors: Option<Vec<f32>>,
    pub colors_compressed: Option<Vec<u8>>,
    pub edge_indices: Option<Vec<u32>>,
    /// Crease angle in degrees for inline edge extraction.
    pub edge_threshold_angle: Option<f32>,

    // Placement.
    pub origin: Option<DVec3>,
    pub position: Option<Vec3>,
    /// Euler degrees, XYZ order.
    pub rotation: Option<Vec3>,
    pub quaternion: Option<Quat>,
    pub scale: Option<Vec3>,
    pub matrix: Option<Mat4>,
    pub transform_id: Option<String>,

    // Material.
    pub texture_set_id: Option<String>,
    /// `[0, 1]` RGB.
    pub color: Option<[f32; 3]>,
    pub opacity: Option<f32>,
    pub metallic: Option<f32>,
    pub roughness: Option<f32>,
    pub pick_color: Option<[u8; 4]>,
}

impl MeshCfg {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    /// `true` when any explicit placement parameter is present.
    #[must_use]
    pub fn has_transform_params(&self) -> bool {
        self.position.is_some()
            || self.rotation.is_some()
            || self.quaternion.is_some()
            || self.scale.is_some()
            || self.matrix.is_some()
    }

    /// Composes the baked local matrix from the placement parameters.
    #[must_use]
    pub fn compose_matrix(&self) -> Mat4 {
        if let Some(matrix) = self.matrix {
            return matrix;
        }
        let quaternion = self.quaternion.unwrap_or_else(|| {
            self.rotation.map_or(Quat::IDENTITY, |deg| {
                Quat::from_euler(
                    glam::EulerRot::XYZ,
                    deg.x.to_radians(),
                    deg.y.to_radians(),
                    deg.z.to_radians(),
                )
            })
        });
        Mat4::from_scale_rotation_translation(
            self.scale.unwrap_or(Vec3::ONE),
            quaternion,
            self.position.unwrap_or(Vec3::ZERO),
        )
    }
}

/// A mesh: one portion of one layer, plus the bookkeeping the model and
/// its entity need.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub id: String,
    pub layer: LayerHandle,
    pub portion: PortionId,
    /// Effective double-precision origin of the layer this mesh landed in.
    pub origin: DVec3,
    /// World-space bounds, model matrix applied.
    pub aabb: Aabb,
    /// Bound transform node, if any; otherwise the matrix was baked.
    pub transform: Option<TransformHandle>,
    pub entity: Option<EntityHandle>,
    /// Triangles, segments, or points contributed.
    pub num_primitives: u64,
    pub pick_color: [u8; 4],
    /// Cached for flag fan-out; layers need it with every flag write.
    pub transparent: bool,
}
