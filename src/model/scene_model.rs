//! The scene model aggregator.
//!
//! `SceneModel` receives the authoring stream (geometries, textures,
//! texture sets, transforms, meshes, entities), chooses a storage
//! strategy per mesh, routes portions into layers selected by composite
//! key, and finalizes everything into immutable GPU resources. After
//! finalize it fans per-object state changes out to the right layer
//! portions and mirrors the aggregate counters.

use glam::{DMat4, DQuat, DVec3, EulerRot, Mat4, Vec3};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::compress;
use crate::errors::{Result, StrataError};
use crate::geometry::{
    Geometry, GeometryCfg, GeometryRegistry, PrimitiveKind, build_edge_indices_f32,
};
use crate::gpu::Gpu;
use crate::layer::{
    DtxLayer, EmphasisConfig, EntityFlags, Layer, LayerOps, PortionCfg, PrimitiveGroup,
    VboBatchedLayer, VboInstancedLayer,
};
use crate::math::Aabb;
use crate::scratch::ScratchPool;

use super::entity::original_system_id;
use super::keys::{LayerKey, decode_matrix_hash, round_origin};
use super::texture::{
    DEFAULT_COLOR, DEFAULT_EMISSIVE, DEFAULT_METALLIC_ROUGHNESS, DEFAULT_NORMALS,
    DEFAULT_OCCLUSION, DecodedImage, ModelTexture, TextureCfg, TextureCompletion, TextureSet,
    TextureSetCfg, TextureSource,
};
use super::{
    Entity, EntityCfg, EntityHandle, LayerHandle, Mesh, MeshCfg, MeshHandle, ObjectSets,
    TextureKey, TransformCfg, TransformForest, TransformHandle,
};

/// Crease angle (degrees) for inline mesh edge extraction.
const MESH_EDGE_THRESHOLD_DEG: f32 = 2.0;

/// Logs a contract violation on its way out.
fn fail(err: StrataError) -> StrataError {
    log::error!("{err}");
    err
}

/// Authoring configuration for a scene model.
#[derive(Debug, Clone)]
pub struct SceneModelCfg {
    pub id: String,
    /// Double-precision world origin of the whole model.
    pub origin: DVec3,
    pub position: DVec3,
    /// Euler degrees, XYZ order. Ignored when `quaternion` or `matrix`
    /// is present.
    pub rotation: Option<DVec3>,
    pub quaternion: Option<DQuat>,
    /// Fixed at construction; the deprecated mutable scale is gone.
    pub scale: DVec3,
    pub matrix: Option<DMat4>,
    /// Allows the data-texture strategy for untextured triangle meshes.
    pub dtx_enabled: bool,
    pub emphasis: EmphasisConfig,
}

impl Default for SceneModelCfg {
    fn default() -> Self {
        Self {
            id: String::from("model"),
            origin: DVec3::ZERO,
            position: DVec3::ZERO,
            rotation: None,
            quaternion: None,
            scale: DVec3::ONE,
            matrix: None,
            dtx_enabled: true,
            emphasis: EmphasisConfig::default(),
        }
    }
}

impl SceneModelCfg {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelState {
    Building,
    Finalized,
    Destroyed,
}

/// The root aggregator.
pub struct SceneModel {
    id: String,
    gpu: Arc<Gpu>,
    scratch: Arc<ScratchPool>,
    state: ModelState,
    pre_finalized: bool,

    origin: DVec3,
    position: DVec3,
    quaternion: DQuat,
    scale: DVec3,
    matrix: DMat4,
    world_normal_matrix: DMat4,

    dtx_enabled: bool,
    emphasis: EmphasisConfig,

    // Catalogs (geometry dropped at finalize).
    geometries: GeometryRegistry,
    textures: SlotMap<TextureKey, ModelTexture>,
    texture_index: FxHashMap<String, TextureKey>,
    texture_sets: FxHashMap<String, Arc<TextureSet>>,
    default_texture_set: Arc<TextureSet>,
    transforms: TransformForest,

    // Arenas.
    meshes: SlotMap<MeshHandle, Mesh>,
    mesh_index: FxHashMap<String, MeshHandle>,
    entities: SlotMap<EntityHandle, Entity>,
    entity_index: FxHashMap<String, EntityHandle>,
    entity_list: Vec<EntityHandle>,
    layers: SlotMap<LayerHandle, Layer>,
    /// Open (non-full) layer per composite key.
    open_layers: FxHashMap<LayerKey, LayerHandle>,
    /// Creation order while building; sorted by sort id at finalize.
    layer_list: Vec<LayerHandle>,

    object_sets: ObjectSets,

    aabb: Aabb,
    aabb_dirty: bool,

    num_triangles: u64,
    num_lines: u64,
    num_points: u64,
    pick_color_counter: u32,

    tex_tx: flume::Sender<TextureCompletion>,
    tex_rx: flume::Receiver<TextureCompletion>,
}

impl SceneModel {
    pub fn new(gpu: Arc<Gpu>, cfg: SceneModelCfg) -> Self {
        let (position, quaternion, scale) = if let Some(matrix) = cfg.matrix {
            let (scale, quaternion, position) = matrix.to_scale_rotation_translation();
            (position, quaternion, scale)
        } else {
            let quaternion = cfg.quaternion.unwrap_or_else(|| {
                cfg.rotation.map_or(DQuat::IDENTITY, |deg| {
                    DQuat::from_euler(
                        EulerRot::XYZ,
                        deg.x.to_radians(),
                        deg.y.to_radians(),
                        deg.z.to_radians(),
                    )
                })
            });
            (cfg.position, quaternion, cfg.scale)
        };
        let matrix = DMat4::from_scale_rotation_translation(scale, quaternion, position);
        let world_normal_matrix = matrix.inverse().transpose();

        let (tex_tx, tex_rx) = flume::unbounded();

        let mut textures = SlotMap::with_key();
        let mut texture_index = FxHashMap::default();
        let default_texture_set = Self::create_default_textures(
            &gpu,
            &cfg.id,
            &mut textures,
            &mut texture_index,
        );

        log::debug!("scene model {:?} created", cfg.id);
        Self {
            id: cfg.id,
            gpu,
            scratch: ScratchPool::new(),
            state: ModelState::Building,
            pre_finalized: false,
            origin: cfg.origin,
            position,
            quaternion,
            scale,
            matrix,
            world_normal_matrix,
            dtx_enabled: cfg.dtx_enabled,
            emphasis: cfg.emphasis,
            geometries: GeometryRegistry::new(),
            textures,
            texture_index,
            texture_sets: FxHashMap::default(),
            default_texture_set,
            transforms: TransformForest::new(),
            meshes: SlotMap::with_key(),
            mesh_index: FxHashMap::default(),
            entities: SlotMap::with_key(),
            entity_index: FxHashMap::default(),
            entity_list: Vec::new(),
            layers: SlotMap::with_key(),
            open_layers: FxHashMap::default(),
            layer_list: Vec::new(),
            object_sets: ObjectSets::default(),
            aabb: Aabb::collapsed(),
            aabb_dirty: true,
            num_triangles: 0,
            num_lines: 0,
            num_points: 0,
            pick_color_counter: 1,
            tex_tx,
            tex_rx,
        }
    }

    /// Five solid 1x1 textures plus the default set built from them.
    fn create_default_textures(
        gpu: &Gpu,
        model_id: &str,
        textures: &mut SlotMap<TextureKey, ModelTexture>,
        texture_index: &mut FxHashMap<String, TextureKey>,
    ) -> Arc<TextureSet> {
        let mut make = |name: &str, pixel: [u8; 4]| -> TextureKey {
            let cfg = TextureCfg::new(
                format!("{model_id}#{name}"),
                TextureSource::Pixels(DecodedImage {
                    width: 1,
                    height: 1,
                    data: pixel.to_vec(),
                }),
            );
            let texture = ModelTexture::create(gpu, &cfg).expect("default texture");
            let key = textures.insert(texture);
            texture_index.insert(cfg.id, key);
            key
        };
        Arc::new(TextureSet {
            id: format!("{model_id}#default-texture-set"),
            color: make("default-color", DEFAULT_COLOR),
            metallic_roughness: make("default-metallic-roughness", DEFAULT_METALLIC_ROUGHNESS),
            normals: make("default-normals", DEFAULT_NORMALS),
            emissive: make("default-emissive", DEFAULT_EMISSIVE),
            occlusion: make("default-occlusion", DEFAULT_OCCLUSION),
            alpha_cutoff: 0.5,
        })
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn origin(&self) -> DVec3 {
        self.origin
    }

    #[must_use]
    pub fn position(&self) -> DVec3 {
        self.position
    }

    #[must_use]
    pub fn quaternion(&self) -> DQuat {
        self.quaternion
    }

    /// Readable but immutable after construction.
    #[must_use]
    pub fn scale(&self) -> DVec3 {
        self.scale
    }

    #[must_use]
    pub fn matrix(&self) -> DMat4 {
        self.matrix
    }

    #[must_use]
    pub fn world_normal_matrix(&self) -> DMat4 {
        self.world_normal_matrix
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.state == ModelState::Finalized
    }

    #[must_use]
    pub fn num_triangles(&self) -> u64 {
        self.num_triangles
    }

    #[must_use]
    pub fn num_lines(&self) -> u64 {
        self.num_lines
    }

    #[must_use]
    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    #[must_use]
    pub fn num_entities(&self) -> usize {
        self.entity_list.len()
    }

    #[must_use]
    pub fn gpu(&self) -> &Arc<Gpu> {
        &self.gpu
    }

    #[must_use]
    pub fn layer_list(&self) -> &[LayerHandle] {
        &self.layer_list
    }

    #[must_use]
    pub fn layer(&self, handle: LayerHandle) -> Option<&Layer> {
        self.layers.get(handle)
    }

    #[must_use]
    pub fn mesh_handle(&self, id: &str) -> Option<MeshHandle> {
        self.mesh_index.get(id).copied()
    }

    #[must_use]
    pub fn mesh(&self, handle: MeshHandle) -> Option<&Mesh> {
        self.meshes.get(handle)
    }

    #[must_use]
    pub fn entity_handle(&self, id: &str) -> Option<EntityHandle> {
        self.entity_index.get(id).copied()
    }

    #[must_use]
    pub fn entity(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(handle)
    }

    #[must_use]
    pub fn entity_handles(&self) -> &[EntityHandle] {
        &self.entity_list
    }

    #[must_use]
    pub fn object_sets(&self) -> &ObjectSets {
        &self.object_sets
    }

    #[must_use]
    pub fn transforms(&self) -> &TransformForest {
        &self.transforms
    }

    /// Mirrored aggregate counters: the sum over every layer.
    #[must_use]
    pub fn counters(&self) -> crate::layer::AggregateCounters {
        let mut total = crate::layer::AggregateCounters::default();
        for layer in self.layers.values() {
            total.accumulate(layer.ops().counters());
        }
        total
    }

    // ========================================================================
    // Authoring: catalogs
    // ========================================================================

    pub fn create_geometry(&mut self, cfg: GeometryCfg) -> Result<Arc<Geometry>> {
        self.require_building()?;
        self.geometries.create_geometry(cfg).map_err(fail)
    }

    pub fn create_texture(&mut self, cfg: TextureCfg) -> Result<TextureKey> {
        self.require_building()?;
        if self.texture_index.contains_key(&cfg.id) {
            return Err(fail(StrataError::DuplicateId {
                kind: "texture",
                id: cfg.id,
            }));
        }
        let texture = ModelTexture::create(&self.gpu, &cfg)?;
        let key = self.textures.insert(texture);
        self.texture_index.insert(cfg.id, key);
        Ok(key)
    }

    /// Sender for asynchronous texture completions; loaders push decoded
    /// images here and the model applies them on the next commit.
    #[must_use]
    pub fn texture_completion_sender(&self) -> flume::Sender<TextureCompletion> {
        self.tex_tx.clone()
    }

    #[must_use]
    pub fn texture(&self, key: TextureKey) -> Option<&ModelTexture> {
        self.textures.get(key)
    }

    #[must_use]
    pub fn texture_key(&self, id: &str) -> Option<TextureKey> {
        self.texture_index.get(id).copied()
    }

    pub fn create_texture_set(&mut self, cfg: TextureSetCfg) -> Result<Arc<TextureSet>> {
        self.require_building()?;
        if cfg.id.is_empty() {
            return Err(fail(StrataError::MissingParam("texture set id")));
        }
        if self.texture_sets.contains_key(&cfg.id) {
            return Err(fail(StrataError::DuplicateId {
                kind: "texture set",
                id: cfg.id,
            }));
        }
        let defaults = &self.default_texture_set;
        let resolve = |id: &Option<String>, fallback: TextureKey| -> Result<TextureKey> {
            match id {
                Some(id) => self
                    .texture_index
                    .get(id)
                    .copied()
                    .ok_or_else(|| StrataError::UnknownId {
                        kind: "texture",
                        id: id.clone(),
                    }),
                None => Ok(fallback),
            }
        };
        let set = Arc::new(TextureSet {
            color: resolve(&cfg.color_texture_id, defaults.color).map_err(fail)?,
            metallic_roughness: resolve(
                &cfg.metallic_roughness_texture_id,
                defaults.metallic_roughness,
            )
            .map_err(fail)?,
            normals: resolve(&cfg.normals_texture_id, defaults.normals).map_err(fail)?,
            emissive: resolve(&cfg.emissive_texture_id, defaults.emissive).map_err(fail)?,
            occlusion: resolve(&cfg.occlusion_texture_id, defaults.occlusion).map_err(fail)?,
            alpha_cutoff: cfg.alpha_cutoff.unwrap_or(0.5),
            id: cfg.id.clone(),
        });
        self.texture_sets.insert(cfg.id, Arc::clone(&set));
        Ok(set)
    }

    #[must_use]
    pub fn texture_set(&self, id: &str) -> Option<&Arc<TextureSet>> {
        self.texture_sets.get(id)
    }

    #[must_use]
    pub fn default_texture_set(&self) -> &Arc<TextureSet> {
        &self.default_texture_set
    }

    pub fn create_transform(&mut self, cfg: TransformCfg) -> Result<TransformHandle> {
        self.require_building()?;
        self.transforms.create(cfg).map_err(fail)
    }

    pub fn set_transform_position(&mut self, handle: TransformHandle, position: Vec3) {
        self.transforms.set_position(handle, position);
        self.aabb_dirty = true;
    }

    pub fn set_transform_rotation(&mut self, handle: TransformHandle, degrees: Vec3) {
        self.transforms.set_rotation(handle, degrees);
        self.aabb_dirty = true;
    }

    pub fn set_transform_matrix(&mut self, handle: TransformHandle, matrix: Mat4) {
        self.transforms.set_matrix(handle, matrix);
        self.aabb_dirty = true;
    }

    // ========================================================================
    // Authoring: meshes
    // ========================================================================

    pub fn create_mesh(&mut self, cfg: MeshCfg) -> Result<MeshHandle> {
        self.require_building()?;
        if cfg.id.is_empty() {
            return Err(fail(StrataError::MissingParam("mesh id")));
        }
        if self.mesh_index.contains_key(&cfg.id) {
            return Err(fail(StrataError::DuplicateId {
                kind: "mesh",
                id: cfg.id,
            }));
        }
        if let Some(set_id) = &cfg.texture_set_id
            && !self.texture_sets.contains_key(set_id)
        {
            return Err(fail(StrataError::UnknownId {
                kind: "texture set",
                id: set_id.clone(),
            }));
        }

        if cfg.geometry_id.is_some() {
            self.create_mesh_instanced(cfg)
        } else {
            self.create_mesh_batched(cfg)
        }
    }

    /// Shared geometry path: VBO instancing, or data textures when the
    /// mesh is an untextured triangle mesh and DTX is enabled.
    fn create_mesh_instanced(&mut self, cfg: MeshCfg) -> Result<MeshHandle> {
        let geometry_id = cfg.geometry_id.clone().expect("instanced path");
        let geometry = self
            .geometries
            .get(&geometry_id)
            .ok_or_else(|| {
                fail(StrataError::UnknownId {
                    kind: "geometry",
                    id: geometry_id.clone(),
                })
            })?;
        if cfg.positions.is_some() || cfg.positions_compressed.is_some() {
            return Err(fail(StrataError::IncompatibleParams(
                "geometry_id and inline positions",
            )));
        }

        let (transform, mesh_matrix) = self.resolve_placement(&cfg)?;
        let origin = cfg.origin.unwrap_or(DVec3::ZERO) + geometry.origin;
        let aabb = Aabb::from_local(geometry.local_min, geometry.local_max, &mesh_matrix, origin)
            .transformed(&self.matrix);

        let use_dtx = self.dtx_enabled
            && geometry.primitive.is_triangle_like()
            && cfg.texture_set_id.is_none();

        let mut portion_cfg = self.base_portion_cfg(&cfg, aabb);
        portion_cfg.geometry = Some(Arc::clone(&geometry));
        portion_cfg.mesh_matrix = Some(mesh_matrix);

        let key = if use_dtx {
            portion_cfg.buckets = Some(geometry.buckets(Default::default()));
            LayerKey::Dtx {
                primitive: geometry.primitive.into(),
                origin: round_origin(origin),
            }
        } else {
            LayerKey::VboInstanced {
                origin: round_origin(origin),
                texture_set: cfg.texture_set_id.clone(),
                geometry_id: geometry_id.clone(),
            }
        };

        let num_primitives = geometry.num_items();
        let primitive = geometry.primitive;
        self.insert_mesh(cfg, key, portion_cfg, origin, aabb, transform, primitive, num_primitives)
    }

    /// Inline geometry path: VBO batching, or data textures via an
    /// anonymous geometry.
    fn create_mesh_batched(&mut self, cfg: MeshCfg) -> Result<MeshHandle> {
        let primitive = cfg
            .primitive
            .ok_or_else(|| fail(StrataError::MissingParam("primitive or geometry_id")))?;

        match (&cfg.positions, &cfg.positions_compressed) {
            (None, None) => return Err(fail(StrataError::MissingParam("positions"))),
            (Some(_), Some(_)) => {
                return Err(fail(StrataError::IncompatibleParams(
                    "positions and positions_compressed",
                )));
            }
            (Some(_), None) if cfg.decode_matrix.is_some() || cfg.decode_boundary.is_some() => {
                return Err(fail(StrataError::IncompatibleParams(
                    "raw positions cannot carry a decode matrix or boundary",
                )));
            }
            // Compressed positions cannot be re-baked through a transform.
            (None, Some(_)) if cfg.has_transform_params() || cfg.transform_id.is_some() => {
                return Err(fail(StrataError::IncompatibleParams(
                    "positions_compressed and transform parameters",
                )));
            }
            _ => {}
        }
        if cfg.uv_compressed.is_some() && cfg.uv_decode_matrix.is_none() {
            return Err(fail(StrataError::MissingParam("uv_decode_matrix")));
        }

        let use_dtx = self.dtx_enabled
            && primitive.is_triangle_like()
            && cfg.texture_set_id.is_none();
        if use_dtx {
            return self.create_mesh_batched_dtx(cfg, primitive);
        }

        if cfg.transform_id.is_some() {
            // Batched positions are baked at creation; a live transform
            // binding cannot follow them.
            return Err(fail(StrataError::IncompatibleParams(
                "transform_id on the batched path",
            )));
        }

        let mesh_matrix = cfg.compose_matrix();
        let num_verts;
        let mut portion_origin = cfg.origin.unwrap_or(DVec3::ZERO);
        let aabb;
        let mut portion_cfg;

        if let Some(raw) = &cfg.positions {
            if raw.is_empty() {
                return Err(fail(StrataError::EmptyGeometry { id: cfg.id }));
            }
            num_verts = raw.len() / 3;

            // Bake the mesh matrix in double precision, then split off
            // the RTC center if the coordinates are large.
            let bake = mesh_matrix.as_dmat4();
            let mut baked = Vec::with_capacity(raw.len());
            for p in raw.chunks_exact(3) {
                let v = bake.transform_point3(DVec3::new(p[0], p[1], p[2]));
                baked.extend_from_slice(&[v.x, v.y, v.z]);
            }
            let mut rtc = Vec::new();
            let (center, shifted) = compress::world_to_rtc(&baked, &mut rtc);
            if shifted {
                portion_origin += center;
            }

            let mut local = Aabb::collapsed();
            for p in rtc.chunks_exact(3) {
                local.expand_point(DVec3::new(f64::from(p[0]), f64::from(p[1]), f64::from(p[2])));
            }
            aabb = local.translated(portion_origin).transformed(&self.matrix);

            let indices = if primitive.is_indexed() {
                Some(
                    cfg.indices
                        .clone()
                        .unwrap_or_else(|| (0..num_verts as u32).collect()),
                )
            } else {
                None
            };
            let edge_indices = if primitive.is_triangle_like() {
                match &cfg.edge_indices {
                    Some(edges) => Some(edges.clone()),
                    None => indices.as_ref().map(|idx| {
                        build_edge_indices_f32(
                            &rtc,
                            idx,
                            cfg.edge_threshold_angle.unwrap_or(MESH_EDGE_THRESHOLD_DEG),
                        )
                    }),
                }
            } else {
                None
            };

            portion_cfg = self.base_portion_cfg(&cfg, aabb);
            portion_cfg.positions = Some(rtc);
            portion_cfg.indices = indices;
            portion_cfg.edge_indices = edge_indices;
        } else {
            let compressed = cfg.positions_compressed.clone().expect("validated above");
            if compressed.is_empty() {
                return Err(fail(StrataError::EmptyGeometry { id: cfg.id }));
            }
            num_verts = compressed.len() / 3;
            let decode = match (cfg.decode_matrix, cfg.decode_boundary) {
                (Some(_), Some(_)) => {
                    return Err(fail(StrataError::IncompatibleParams(
                        "decode_matrix and decode_boundary",
                    )));
                }
                (Some(m), None) => m,
                (None, Some((min, max))) => compress::decode_matrix_from_boundary(min, max),
                (None, None) => {
                    return Err(fail(StrataError::MissingParam(
                        "decode_matrix or decode_boundary",
                    )));
                }
            };
            let corners = decoded_grid_bounds(&decode);
            aabb = Aabb {
                min: corners.0.as_dvec3(),
                max: corners.1.as_dvec3(),
            }
            .translated(portion_origin)
            .transformed(&self.matrix);

            let indices = if primitive.is_indexed() {
                Some(
                    cfg.indices
                        .clone()
                        .unwrap_or_else(|| (0..num_verts as u32).collect()),
                )
            } else {
                None
            };
            let edge_indices = if primitive.is_triangle_like() {
                match &cfg.edge_indices {
                    Some(edges) => Some(edges.clone()),
                    None => indices.as_ref().map(|idx| {
                        crate::geometry::build_edge_indices(
                            &compressed,
                            idx,
                            cfg.edge_threshold_angle.unwrap_or(MESH_EDGE_THRESHOLD_DEG),
                        )
                    }),
                }
            } else {
                None
            };

            portion_cfg = self.base_portion_cfg(&cfg, aabb);
            portion_cfg.positions_compressed = Some(compressed);
            portion_cfg.decode_matrix = Some(decode);
            portion_cfg.indices = indices;
            portion_cfg.edge_indices = edge_indices;
        }

        // Optional per-vertex streams.
        portion_cfg.normals = cfg.normals.clone();
        portion_cfg.uv = match (&cfg.uv, &cfg.uv_compressed) {
            (Some(uv), None) => Some(uv.clone()),
            (None, Some(packed)) => {
                let decode = cfg.uv_decode_matrix.expect("validated above");
                let mut uv = Vec::with_capacity(packed.len());
                for pair in packed.chunks_exact(2) {
                    let v = compress::decompress_uv([pair[0], pair[1]], &decode);
                    uv.push(v.x);
                    uv.push(v.y);
                }
                Some(uv)
            }
            (Some(_), Some(_)) => {
                return Err(fail(StrataError::IncompatibleParams("uv and uv_compressed")));
            }
            (None, None) => None,
        };
        portion_cfg.colors_compressed = match (&cfg.colors, &cfg.colors_compressed) {
            (Some(colors), None) => {
                let stride = if colors.len() == num_verts * 4 { 4 } else { 3 };
                Some(compress::quantize_colors(colors, stride))
            }
            (None, packed) => packed.clone(),
            (Some(_), Some(_)) => {
                return Err(fail(StrataError::IncompatibleParams(
                    "colors and colors_compressed",
                )));
            }
        };

        let decode_hash = decode_matrix_hash(portion_cfg.decode_matrix.as_ref());
        let key = LayerKey::VboBatched {
            origin: round_origin(portion_origin),
            primitive: primitive.into(),
            decode_hash,
            texture_set: cfg.texture_set_id.clone(),
        };

        let num_primitives = match primitive {
            PrimitiveKind::Points => num_verts as u64,
            _ => portion_cfg.indices.as_ref().map_or(0, Vec::len) as u64
                / primitive.verts_per_item() as u64,
        };
        self.insert_mesh(cfg, key, portion_cfg, portion_origin, aabb, None, primitive, num_primitives)
    }

    /// Inline mesh on the data-texture path: normalize through an
    /// anonymous geometry so bucketing and quantization are shared.
    fn create_mesh_batched_dtx(
        &mut self,
        cfg: MeshCfg,
        primitive: PrimitiveKind,
    ) -> Result<MeshHandle> {
        let geometry = Arc::new(
            Geometry::from_cfg(GeometryCfg {
                id: format!("{}#geometry", cfg.id),
                primitive,
                positions: cfg.positions.clone(),
                positions_compressed: cfg.positions_compressed.clone(),
                decode_matrix: cfg.decode_matrix,
                decode_boundary: cfg.decode_boundary,
                indices: cfg.indices.clone(),
                normals: cfg.normals.clone(),
                uv: cfg.uv.clone(),
                uv_compressed: cfg.uv_compressed.clone(),
                uv_decode_matrix: cfg.uv_decode_matrix,
                colors: cfg.colors.clone(),
                colors_compressed: cfg.colors_compressed.clone(),
                edge_indices: cfg.edge_indices.clone(),
                edge_threshold_angle: Some(
                    cfg.edge_threshold_angle.unwrap_or(MESH_EDGE_THRESHOLD_DEG),
                ),
            })
            .map_err(fail)?,
        );

        let (transform, mesh_matrix) = self.resolve_placement(&cfg)?;
        let origin = cfg.origin.unwrap_or(DVec3::ZERO) + geometry.origin;
        let aabb = Aabb::from_local(geometry.local_min, geometry.local_max, &mesh_matrix, origin)
            .transformed(&self.matrix);

        let mut portion_cfg = self.base_portion_cfg(&cfg, aabb);
        portion_cfg.geometry = Some(Arc::clone(&geometry));
        portion_cfg.buckets = Some(geometry.buckets(Default::default()));
        portion_cfg.mesh_matrix = Some(mesh_matrix);

        let key = LayerKey::Dtx {
            primitive: primitive.into(),
            origin: round_origin(origin),
        };
        let num_primitives = geometry.num_items();
        self.insert_mesh(cfg, key, portion_cfg, origin, aabb, transform, primitive, num_primitives)
    }

    /// Resolves `transform_id` or composes the baked matrix.
    fn resolve_placement(&mut self, cfg: &MeshCfg) -> Result<(Option<TransformHandle>, Mat4)> {
        if let Some(transform_id) = &cfg.transform_id {
            if cfg.has_transform_params() {
                return Err(fail(StrataError::IncompatibleParams(
                    "transform_id and inline transform parameters",
                )));
            }
            let handle = self.transforms.handle(transform_id).ok_or_else(|| {
                fail(StrataError::UnknownId {
                    kind: "transform",
                    id: transform_id.clone(),
                })
            })?;
            let matrix = self.transforms.world_matrix(handle);
            Ok((Some(handle), matrix))
        } else {
            Ok((None, cfg.compose_matrix()))
        }
    }

    /// Common per-object fields of a portion configuration.
    fn base_portion_cfg(&mut self, cfg: &MeshCfg, aabb: Aabb) -> PortionCfg {
        let color = cfg.color.map_or([255, 255, 255], |c| {
            [
                compress::quantize_channel(c[0]),
                compress::quantize_channel(c[1]),
                compress::quantize_channel(c[2]),
            ]
        });
        let pick_color = cfg.pick_color.unwrap_or_else(|| {
            let c = self.pick_color_counter;
            self.pick_color_counter += 1;
            [
                (c & 0xff) as u8,
                ((c >> 8) & 0xff) as u8,
                ((c >> 16) & 0xff) as u8,
                ((c >> 24) & 0xff) as u8,
            ]
        });
        PortionCfg {
            color,
            opacity: cfg.opacity.map_or(255, compress::quantize_channel),
            metallic: cfg.metallic.map_or(0, compress::quantize_channel),
            roughness: cfg.roughness.map_or(255, compress::quantize_channel),
            pick_color,
            aabb,
            ..PortionCfg::default()
        }
    }

    /// Layer lookup/creation by composite key, then portion + mesh
    /// record insertion.
    fn insert_mesh(
        &mut self,
        cfg: MeshCfg,
        key: LayerKey,
        portion_cfg: PortionCfg,
        origin: DVec3,
        aabb: Aabb,
        transform: Option<TransformHandle>,
        primitive: PrimitiveKind,
        num_primitives: u64,
    ) -> Result<MeshHandle> {
        let layer_handle = self.acquire_layer(&key, &portion_cfg, origin);
        let transparent = portion_cfg.transparent();
        let pick_color = portion_cfg.pick_color;
        let portion = self.layers[layer_handle]
            .ops_mut()
            .create_portion(portion_cfg)?;

        let mesh = Mesh {
            id: cfg.id.clone(),
            layer: layer_handle,
            portion,
            origin,
            aabb,
            transform,
            entity: None,
            num_primitives,
            pick_color,
            transparent,
        };
        let handle = self.meshes.insert(mesh);
        self.mesh_index.insert(cfg.id, handle);
        if let Some(transform) = transform {
            self.transforms.bind_mesh(transform, handle);
        }

        match primitive {
            PrimitiveKind::Points => self.num_points += num_primitives,
            PrimitiveKind::Lines => self.num_lines += num_primitives,
            _ => self.num_triangles += num_primitives,
        }
        self.aabb_dirty = true;
        Ok(handle)
    }

    /// Returns the open layer under `key` if it can absorb the portion;
    /// otherwise provisions a sibling under the same key.
    ///
    /// The key rounds the origin to keep near-equal doubles from
    /// churning layers; the layer itself adopts the exact origin of the
    /// portion that opens it.
    fn acquire_layer(
        &mut self,
        key: &LayerKey,
        portion_cfg: &PortionCfg,
        exact_origin: DVec3,
    ) -> LayerHandle {
        if let Some(&handle) = self.open_layers.get(key)
            && self.layers[handle].ops().can_create_portion(portion_cfg)
        {
            return handle;
        }

        let layer = self.build_layer(key, portion_cfg, exact_origin);
        let handle = self.layers.insert(layer);
        self.layer_list.push(handle);
        if self.open_layers.insert(key.clone(), handle).is_some() {
            log::debug!("layer under key {key:?} overflowed; opened a sibling");
        }
        handle
    }

    fn build_layer(&self, key: &LayerKey, portion_cfg: &PortionCfg, origin: DVec3) -> Layer {
        let sort_id = key.sort_id();
        match key {
            LayerKey::VboBatched { primitive, .. } => Layer::VboBatched(VboBatchedLayer::new(
                *primitive,
                origin,
                sort_id,
                Arc::clone(&self.gpu),
                Arc::clone(&self.scratch),
                self.emphasis,
                portion_cfg.decode_matrix,
            )),
            LayerKey::VboInstanced { .. } => {
                let geometry = portion_cfg
                    .geometry
                    .clone()
                    .expect("instanced key implies geometry");
                Layer::VboInstanced(VboInstancedLayer::new(
                    geometry.primitive.into(),
                    origin,
                    sort_id,
                    Arc::clone(&self.gpu),
                    geometry,
                    self.emphasis,
                ))
            }
            LayerKey::Dtx { primitive, .. } => Layer::Dtx(DtxLayer::new(
                *primitive,
                origin,
                sort_id,
                Arc::clone(&self.gpu),
                self.emphasis,
            )),
        }
    }

    // ========================================================================
    // Authoring: entities
    // ========================================================================

    pub fn create_entity(&mut self, cfg: EntityCfg) -> Result<EntityHandle> {
        self.require_building()?;
        let id = cfg
            .id
            .clone()
            .unwrap_or_else(|| format!("{}#{}", self.id, uuid::Uuid::new_v4()));
        if self.entity_index.contains_key(&id) {
            return Err(fail(StrataError::DuplicateId { kind: "entity", id }));
        }

        let mut mesh_handles: SmallVec<[MeshHandle; 4]> = SmallVec::new();
        for mesh_id in &cfg.mesh_ids {
            let handle = self.mesh_index.get(mesh_id).copied().ok_or_else(|| {
                fail(StrataError::UnknownId {
                    kind: "mesh",
                    id: mesh_id.clone(),
                })
            })?;
            if let Some(owner) = self.meshes[handle].entity {
                return Err(fail(StrataError::MeshAlreadyOwned {
                    mesh: mesh_id.clone(),
                    entity: self.entities[owner].id.clone(),
                }));
            }
            mesh_handles.push(handle);
        }
        if mesh_handles.is_empty() {
            return Err(fail(StrataError::MissingParam("mesh_ids")));
        }

        let mut entity = Entity::new(id.clone(), original_system_id(&self.id, &id), cfg.is_object);
        entity.flags = cfg.initial_flags();
        entity.culled_explicit = cfg.culled;
        entity.num_primitives = mesh_handles
            .iter()
            .map(|&m| self.meshes[m].num_primitives)
            .sum();
        entity.meshes = mesh_handles.clone();

        let handle = self.entities.insert(entity);
        for mesh in mesh_handles {
            self.meshes[mesh].entity = Some(handle);
        }
        self.entity_index.insert(id, handle);
        self.entity_list.push(handle);
        Ok(handle)
    }

    // ========================================================================
    // Finalize
    // ========================================================================

    /// Finalize phase one: dummy entity, layer compilation, entity flag
    /// broadcast and scene registration, layer-list ordering.
    pub fn pre_finalize(&mut self) -> Result<()> {
        self.require_building()?;
        if self.pre_finalized {
            return Err(StrataError::AlreadyFinalized("scene model pre-finalize"));
        }

        // Meshes nobody claimed stay addressable through a synthetic
        // entity.
        let orphans: Vec<String> = self
            .meshes
            .values()
            .filter(|m| m.entity.is_none())
            .map(|m| m.id.clone())
            .collect();
        if !orphans.is_empty() {
            log::debug!("{} unclaimed meshes collected into a dummy entity", orphans.len());
            self.create_entity(EntityCfg {
                id: Some(format!("{}#dummy-entity-{}", self.id, uuid::Uuid::new_v4())),
                mesh_ids: orphans,
                is_object: true,
                ..EntityCfg::default()
            })?;
        }

        for &handle in &self.layer_list {
            self.layers[handle].ops_mut().finalize()?;
        }
        self.pre_finalized = true;

        // Two-phase entity finalize: broadcast initial flags into the
        // layers, then register objects with the observable sets.
        let entity_handles = self.entity_list.clone();
        for handle in &entity_handles {
            self.broadcast_entity_flags(*handle)?;
        }
        for handle in entity_handles {
            let entity = &self.entities[handle];
            if !entity.is_object {
                continue;
            }
            let id = entity.id.clone();
            let flags = entity.flags;
            ObjectSets::update(
                &mut self.object_sets.visible,
                &id,
                handle,
                flags.contains(EntityFlags::VISIBLE),
            );
            ObjectSets::update(
                &mut self.object_sets.xrayed,
                &id,
                handle,
                flags.contains(EntityFlags::XRAYED),
            );
            ObjectSets::update(
                &mut self.object_sets.highlighted,
                &id,
                handle,
                flags.contains(EntityFlags::HIGHLIGHTED),
            );
            ObjectSets::update(
                &mut self.object_sets.selected,
                &id,
                handle,
                flags.contains(EntityFlags::SELECTED),
            );
        }

        // Stable order by sort id; siblings keep creation order.
        self.layer_list
            .sort_by(|&a, &b| self.layers[a].ops().sort_id().cmp(self.layers[b].ops().sort_id()));

        self.aabb_dirty = true;
        for entity in self.entities.values_mut() {
            entity.aabb_dirty = true;
        }
        Ok(())
    }

    /// Completes finalization and releases the authoring catalogs.
    pub fn finalize(&mut self) -> Result<()> {
        if !self.pre_finalized {
            self.pre_finalize()?;
        }
        self.geometries.clear();
        self.open_layers.clear();
        self.state = ModelState::Finalized;
        log::debug!(
            "scene model {:?} finalized: {} layers, {} entities, {} triangles",
            self.id,
            self.layer_list.len(),
            self.entity_list.len(),
            self.num_triangles
        );
        Ok(())
    }

    /// Render tick: applies texture completions, syncs transform-bound
    /// portions, and flushes deferred layer updates.
    pub fn commit(&mut self) {
        if self.state == ModelState::Destroyed {
            return;
        }
        while let Ok(completion) = self.tex_rx.try_recv() {
            if let Some(&key) = self.texture_index.get(&completion.texture_id) {
                self.textures[key].resolve(&self.gpu, completion.result);
            }
        }
        if self.state == ModelState::Finalized {
            for (transform, meshes) in self.transforms.drain_dirty() {
                let world = self.transforms.world_matrix(transform);
                for mesh in meshes {
                    let (layer, portion) = {
                        let m = &self.meshes[mesh];
                        (m.layer, m.portion)
                    };
                    if let Err(err) = self.layers[layer].ops_mut().set_matrix(portion, &world) {
                        log::warn!("transform sync skipped for mesh: {err}");
                    }
                }
            }
        }
        for &handle in &self.layer_list {
            self.layers[handle].ops_mut().commit();
        }
    }

    pub fn destroy(&mut self) {
        if self.state == ModelState::Destroyed {
            return;
        }
        for &handle in &self.layer_list {
            self.layers[handle].ops_mut().destroy();
        }
        for texture in self.textures.values_mut() {
            texture.destroy(&self.gpu);
        }
        let ids: Vec<String> = self.entities.values().map(|e| e.id.clone()).collect();
        for id in ids {
            self.object_sets.remove_all(&id);
        }
        self.geometries.clear();
        self.texture_sets.clear();
        self.state = ModelState::Destroyed;
        log::debug!("scene model {:?} destroyed", self.id);
    }

    // ========================================================================
    // World bounds
    // ========================================================================

    /// Lazy world AABB: union over entities, each offset by its own
    /// offset vector.
    pub fn aabb(&mut self) -> Aabb {
        if self.aabb_dirty {
            let handles = self.entity_list.clone();
            let mut total = Aabb::collapsed();
            for handle in handles {
                total.expand(&self.entity_aabb(handle));
            }
            self.aabb = total;
            self.aabb_dirty = false;
        }
        self.aabb
    }

    pub fn entity_aabb(&mut self, handle: EntityHandle) -> Aabb {
        let entity = &self.entities[handle];
        if !entity.aabb_dirty {
            return entity.aabb;
        }
        let mut aabb = Aabb::collapsed();
        for &mesh in &entity.meshes {
            aabb.expand(&self.meshes[mesh].aabb);
        }
        let aabb = aabb.translated(entity.offset.as_dvec3());
        let entity = &mut self.entities[handle];
        entity.aabb = aabb;
        entity.aabb_dirty = false;
        aabb
    }

    // ========================================================================
    // Post-finalize state fan-out
    // ========================================================================

    fn require_building(&self) -> Result<()> {
        match self.state {
            ModelState::Building => Ok(()),
            ModelState::Finalized => Err(StrataError::AlreadyFinalized("scene model")),
            ModelState::Destroyed => Err(StrataError::Destroyed("scene model")),
        }
    }

    /// Pushes an entity's full flag state into every mesh portion.
    ///
    /// Before pre-finalize the entity bitmask is the only store; the
    /// pre-finalize broadcast delivers the accumulated state once the
    /// layers accept setters.
    fn broadcast_entity_flags(&mut self, handle: EntityHandle) -> Result<()> {
        if !self.pre_finalized {
            return Ok(());
        }
        let (flags, meshes) = {
            let entity = &self.entities[handle];
            (entity.flags, entity.meshes.clone())
        };
        for mesh in meshes {
            let (layer, portion, transparent) = {
                let m = &self.meshes[mesh];
                (m.layer, m.portion, m.transparent)
            };
            self.layers[layer]
                .ops_mut()
                .set_flags(portion, flags, transparent)?;
        }
        Ok(())
    }

    /// Flips one flag bit; bails idempotently, fans out on change.
    fn set_entity_flag(&mut self, handle: EntityHandle, flag: EntityFlags, on: bool) -> Result<bool> {
        let entity = self
            .entities
            .get_mut(handle)
            .ok_or(StrataError::UnknownId {
                kind: "entity",
                id: String::from("<handle>"),
            })?;
        if entity.flags.contains(flag) == on {
            return Ok(false);
        }
        entity.flags.set(flag, on);
        self.broadcast_entity_flags(handle)?;
        Ok(true)
    }

    pub fn set_entity_visible(&mut self, handle: EntityHandle, visible: bool) -> Result<()> {
        if self.set_entity_flag(handle, EntityFlags::VISIBLE, visible)? {
            let entity = &self.entities[handle];
            if entity.is_object {
                let id = entity.id.clone();
                ObjectSets::update(&mut self.object_sets.visible, &id, handle, visible);
            }
        }
        Ok(())
    }

    pub fn set_entity_xrayed(&mut self, handle: EntityHandle, xrayed: bool) -> Result<()> {
        if self.set_entity_flag(handle, EntityFlags::XRAYED, xrayed)? {
            let entity = &self.entities[handle];
            if entity.is_object {
                let id = entity.id.clone();
                ObjectSets::update(&mut self.object_sets.xrayed, &id, handle, xrayed);
            }
        }
        Ok(())
    }

    pub fn set_entity_highlighted(&mut self, handle: EntityHandle, highlighted: bool) -> Result<()> {
        if self.set_entity_flag(handle, EntityFlags::HIGHLIGHTED, highlighted)? {
            let entity = &self.entities[handle];
            if entity.is_object {
                let id = entity.id.clone();
                ObjectSets::update(&mut self.object_sets.highlighted, &id, handle, highlighted);
            }
        }
        Ok(())
    }

    pub fn set_entity_selected(&mut self, handle: EntityHandle, selected: bool) -> Result<()> {
        if self.set_entity_flag(handle, EntityFlags::SELECTED, selected)? {
            let entity = &self.entities[handle];
            if entity.is_object {
                let id = entity.id.clone();
                ObjectSets::update(&mut self.object_sets.selected, &id, handle, selected);
            }
        }
        Ok(())
    }

    pub fn set_entity_edges(&mut self, handle: EntityHandle, edges: bool) -> Result<()> {
        self.set_entity_flag(handle, EntityFlags::EDGES, edges)?;
        Ok(())
    }

    pub fn set_entity_pickable(&mut self, handle: EntityHandle, pickable: bool) -> Result<()> {
        self.set_entity_flag(handle, EntityFlags::PICKABLE, pickable)?;
        Ok(())
    }

    pub fn set_entity_clippable(&mut self, handle: EntityHandle, clippable: bool) -> Result<()> {
        self.set_entity_flag(handle, EntityFlags::CLIPPABLE, clippable)?;
        Ok(())
    }

    pub fn set_entity_collidable(&mut self, handle: EntityHandle, collidable: bool) -> Result<()> {
        // Collision state never reaches the GPU; flip the bit only.
        if let Some(entity) = self.entities.get_mut(handle) {
            entity.flags.set(EntityFlags::COLLIDABLE, collidable);
        }
        Ok(())
    }

    /// Explicit culling, one of the three culling sources.
    pub fn set_entity_culled(&mut self, handle: EntityHandle, culled: bool) -> Result<()> {
        self.entities[handle].culled_explicit = culled;
        self.apply_effective_culled(handle)
    }

    /// View-frustum culling source.
    pub fn set_entity_culled_vfc(&mut self, handle: EntityHandle, culled: bool) -> Result<()> {
        self.entities[handle].culled_vfc = culled;
        self.apply_effective_culled(handle)
    }

    /// LOD culling source, gated by `lod_cullable`.
    pub fn set_entity_culled_lod(&mut self, handle: EntityHandle, culled: bool) -> Result<()> {
        self.entities[handle].culled_lod = culled;
        self.apply_effective_culled(handle)
    }

    pub fn set_entity_lod_cullable(&mut self, handle: EntityHandle, cullable: bool) -> Result<()> {
        self.entities[handle].lod_cullable = cullable;
        self.apply_effective_culled(handle)
    }

    fn apply_effective_culled(&mut self, handle: EntityHandle) -> Result<()> {
        let culled = self.entities[handle].effective_culled();
        self.set_entity_flag(handle, EntityFlags::CULLED, culled)?;
        Ok(())
    }

    pub fn set_entity_color(&mut self, handle: EntityHandle, color: [u8; 4]) -> Result<()> {
        let meshes = self.entities[handle].meshes.clone();
        let transparent = color[3] < 255;
        for mesh in meshes {
            let (layer, portion) = {
                let m = &mut self.meshes[mesh];
                m.transparent = transparent;
                (m.layer, m.portion)
            };
            self.layers[layer].ops_mut().set_color(portion, color)?;
        }
        // Transparency participates in pass derivation.
        self.broadcast_entity_flags(handle)
    }

    pub fn set_entity_offset(&mut self, handle: EntityHandle, offset: Vec3) -> Result<()> {
        {
            let entity = &mut self.entities[handle];
            if entity.offset == offset {
                return Ok(());
            }
            entity.offset = offset;
            entity.aabb_dirty = true;
        }
        let meshes = self.entities[handle].meshes.clone();
        for mesh in meshes {
            let (layer, portion) = {
                let m = &self.meshes[mesh];
                (m.layer, m.portion)
            };
            self.layers[layer].ops_mut().set_offset(portion, offset)?;
        }
        self.aabb_dirty = true;
        Ok(())
    }

    // Model-wide setters walk the entity list.

    pub fn set_visible(&mut self, visible: bool) -> Result<()> {
        for handle in self.entity_list.clone() {
            self.set_entity_visible(handle, visible)?;
        }
        Ok(())
    }

    pub fn set_xrayed(&mut self, xrayed: bool) -> Result<()> {
        for handle in self.entity_list.clone() {
            self.set_entity_xrayed(handle, xrayed)?;
        }
        Ok(())
    }

    pub fn set_highlighted(&mut self, highlighted: bool) -> Result<()> {
        for handle in self.entity_list.clone() {
            self.set_entity_highlighted(handle, highlighted)?;
        }
        Ok(())
    }

    pub fn set_selected(&mut self, selected: bool) -> Result<()> {
        for handle in self.entity_list.clone() {
            self.set_entity_selected(handle, selected)?;
        }
        Ok(())
    }

    pub fn set_edges(&mut self, edges: bool) -> Result<()> {
        for handle in self.entity_list.clone() {
            self.set_entity_edges(handle, edges)?;
        }
        Ok(())
    }

    pub fn set_pickable(&mut self, pickable: bool) -> Result<()> {
        for handle in self.entity_list.clone() {
            self.set_entity_pickable(handle, pickable)?;
        }
        Ok(())
    }

    pub fn set_clippable(&mut self, clippable: bool) -> Result<()> {
        for handle in self.entity_list.clone() {
            self.set_entity_clippable(handle, clippable)?;
        }
        Ok(())
    }

    pub fn set_culled(&mut self, culled: bool) -> Result<()> {
        for handle in self.entity_list.clone() {
            self.set_entity_culled(handle, culled)?;
        }
        Ok(())
    }
}

impl Drop for SceneModel {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Decoded bounds of the full quantization grid.
fn decoded_grid_bounds(decode: &Mat4) -> (Vec3, Vec3) {
    let lo = (*decode * glam::Vec4::new(0.0, 0.0, 0.0, 1.0)).truncate();
    let hi = (*decode * glam::Vec4::new(65535.0, 65535.0, 65535.0, 1.0)).truncate();
    (lo.min(hi), lo.max(hi))
}
