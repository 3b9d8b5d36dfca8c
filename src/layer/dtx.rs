//! Data-texture layer: per-object state in 2D texture tables.
//!
//! Vertex attributes and object records live in textures indexed by
//! portion id, so one layer draws arbitrarily heterogeneous geometry in a
//! single call. A logical portion whose geometry bucketized into N
//! buckets occupies N subportions with contiguous ids; all per-object
//! tables are strided per subportion.
//!
//! Table layouts:
//!
//! - **Colors-and-flags** — RGBA8, 8 texels (32 bytes) per object:
//!   `color | pass word | pick color | metallic+roughness | vertex base |
//!   index base | item count | portion id`.
//! - **Matrices** and **decode matrices** — RGBA32F, 4 texels (16 floats)
//!   per object.
//! - **Positions** — RGBA16UI, one quantized vertex per texel.
//! - **Indices** and **portion-id lookups** — R8UI/R16UI/R32UI tables,
//!   one per index width; the stride is the width, which is exactly why
//!   geometries are bucketized to the narrowest feasible width.
//!
//! Mass flag updates coalesce: after the per-frame direct budget is spent
//! the layer mutates only its CPU plane and uploads it once on the next
//! commit tick.

use glam::{DVec3, Mat4, Vec3};
use smallvec::SmallVec;
use std::sync::Arc;

use super::vbo_batched::should_draw_from_counters;
use super::{
    AggregateCounters, DeferredUpdates, EmphasisConfig, EntityFlags, LayerOps, LayerState,
    MAX_OBJECTS_PER_LAYER, PortionCfg, PortionId, PortionTable, PrimitiveGroup, WriteMode,
};
use crate::errors::{Result, StrataError};
use crate::geometry::IndexWidth;
use crate::gpu::{Gpu, TextureDesc, TextureFormat, TextureHandle};
use crate::math::Aabb;

/// Colors-and-flags table width in texels.
const COLORS_FLAGS_WIDTH: u32 = 512;
/// Texels per object in the colors-and-flags table.
const TEXELS_PER_OBJECT: u32 = 8;
/// Objects per colors-and-flags row.
const OBJECTS_PER_ROW: u32 = COLORS_FLAGS_WIDTH / TEXELS_PER_OBJECT;

/// Matrix table width in texels (4 texels per object).
const MATRIX_WIDTH: u32 = 512;
const MATRIX_OBJECTS_PER_ROW: u32 = MATRIX_WIDTH / 4;

/// Positions table width in texels (one vertex per texel).
const POSITIONS_WIDTH: u32 = 1024;
/// Index table width in texels.
const INDEX_WIDTH_TEXELS: u32 = 4096;

/// Row cap shared by every table.
pub const MAX_TEXTURE_HEIGHT: u32 = 4096;
/// Vertex capacity of one data-texture layer.
pub const MAX_DTX_VERTS: usize = (POSITIONS_WIDTH * MAX_TEXTURE_HEIGHT) as usize;

fn width_slot(width: IndexWidth) -> usize {
    match width {
        IndexWidth::U8 => 0,
        IndexWidth::U16 => 1,
        IndexWidth::U32 => 2,
    }
}

/// One row of the object tables; a logical portion owns a contiguous run
/// of these.
#[derive(Debug, Clone, Copy)]
pub struct SubPortionRecord {
    pub vertex_base: u32,
    pub num_verts: u32,
    pub width: IndexWidth,
    /// Item offset within this width's index table.
    pub index_base_items: u32,
    pub num_items: u32,
    /// Edge-pair offset within this width's edge table.
    pub edge_base_items: u32,
    pub num_edges: u32,
}

#[derive(Debug, Clone, Copy)]
struct DtxPortion {
    sub_base: u32,
    sub_count: u32,
}

/// CPU tables; the object and matrix planes outlive finalize because
/// post-finalize setters and coalesced uploads rewrite them.
#[derive(Debug, Default)]
struct DtxTables {
    colors_flags: Vec<u8>,
    matrices: Vec<f32>,
    decode_matrices: Vec<f32>,
    /// One padded `[x, y, z, 0]` quad of u16 per vertex.
    positions: Vec<u16>,
    indices: [Vec<u32>; 3],
    edges: [Vec<u32>; 3],
    face_portion_ids: [Vec<u32>; 3],
    edge_portion_ids: [Vec<u32>; 3],
}

#[derive(Debug)]
struct DtxGpu {
    colors_flags: TextureHandle,
    colors_flags_height: u32,
    matrices: TextureHandle,
    decode_matrices: TextureHandle,
    positions: TextureHandle,
    index_tables: [Option<TextureHandle>; 3],
    edge_tables: [Option<TextureHandle>; 3],
    face_portion_id_tables: [Option<TextureHandle>; 3],
    edge_portion_id_tables: [Option<TextureHandle>; 3],
}

/// Data-texture-strategy layer.
#[derive(Debug)]
pub struct DtxLayer {
    prim: PrimitiveGroup,
    origin: DVec3,
    sort_id: String,
    state: LayerState,
    gpu: Arc<Gpu>,
    tables: DtxTables,
    subportions: Vec<SubPortionRecord>,
    portions: Vec<DtxPortion>,
    table: PortionTable,
    deferred: DeferredUpdates,
    gpu_state: Option<DtxGpu>,
}

impl DtxLayer {
    pub fn new(
        prim: PrimitiveGroup,
        origin: DVec3,
        sort_id: String,
        gpu: Arc<Gpu>,
        emphasis: EmphasisConfig,
    ) -> Self {
        Self {
            prim,
            origin,
            sort_id,
            state: LayerState::Building,
            gpu,
            tables: DtxTables::default(),
            subportions: Vec::new(),
            portions: Vec::new(),
            table: PortionTable::new(emphasis),
            deferred: DeferredUpdates::default(),
            gpu_state: None,
        }
    }

    /// Contiguous subportion ids backing one logical portion.
    #[must_use]
    pub fn subportion_ids(&self, portion: PortionId) -> SmallVec<[u32; 4]> {
        self.portions
            .get(portion.0 as usize)
            .map(|p| (p.sub_base..p.sub_base + p.sub_count).collect())
            .unwrap_or_default()
    }

    /// Table row of one subportion.
    #[must_use]
    pub fn subportion_record(&self, sub: u32) -> Option<&SubPortionRecord> {
        self.subportions.get(sub as usize)
    }

    #[must_use]
    pub fn num_subportions(&self) -> u32 {
        self.subportions.len() as u32
    }

    fn num_vertices(&self) -> usize {
        self.tables.positions.len() / 4
    }

    fn require_finalized(&self) -> Result<&DtxGpu> {
        match self.state {
            LayerState::Building => Err(StrataError::NotFinalized("data-texture layer")),
            LayerState::Destroyed => Err(StrataError::Destroyed("data-texture layer")),
            LayerState::Finalized => {
                Ok(self.gpu_state.as_ref().expect("finalized layer has gpu state"))
            }
        }
    }

    fn check_portion(&self, portion: PortionId) -> Result<()> {
        if portion.0 as usize >= self.portions.len() {
            return Err(StrataError::InvalidPortion {
                portion: portion.0,
                count: self.portions.len() as u32,
            });
        }
        Ok(())
    }

    /// Uploads one object texel from the CPU plane.
    fn upload_object_texel(&self, sub: u32, texel: u32) {
        let state = self.gpu_state.as_ref().expect("finalized");
        let x = (sub % OBJECTS_PER_ROW) * TEXELS_PER_OBJECT + texel;
        let y = sub / OBJECTS_PER_ROW;
        let byte = (sub * 32 + texel * 4) as usize;
        self.gpu.texture_sub_image_2d(
            state.colors_flags,
            0,
            x,
            y,
            1,
            1,
            &self.tables.colors_flags[byte..byte + 4],
        );
    }

    fn upload_colors_flags_plane(&self) {
        let state = self.gpu_state.as_ref().expect("finalized");
        self.gpu.texture_sub_image_2d(
            state.colors_flags,
            0,
            0,
            0,
            COLORS_FLAGS_WIDTH,
            state.colors_flags_height,
            &self.tables.colors_flags,
        );
    }

    fn create_index_table(
        &self,
        label: &'static str,
        data: &[u32],
        width: IndexWidth,
    ) -> Option<TextureHandle> {
        if data.is_empty() {
            return None;
        }
        let (format, bytes): (TextureFormat, Vec<u8>) = match width {
            IndexWidth::U8 => (
                TextureFormat::R8Uint,
                data.iter().map(|&v| v as u8).collect(),
            ),
            IndexWidth::U16 => (
                TextureFormat::R16Uint,
                data.iter()
                    .flat_map(|&v| (v as u16).to_le_bytes())
                    .collect(),
            ),
            IndexWidth::U32 => (
                TextureFormat::R32Uint,
                data.iter().flat_map(|&v| v.to_le_bytes()).collect(),
            ),
        };
        Some(self.create_table(label, format, bytes))
    }

    fn create_u32_table(&self, label: &'static str, data: &[u32]) -> Option<TextureHandle> {
        if data.is_empty() {
            return None;
        }
        let bytes: Vec<u8> = data.iter().flat_map(|&v| v.to_le_bytes()).collect();
        Some(self.create_table(label, TextureFormat::R32Uint, bytes))
    }

    /// Creates a table texture of the standard index width, padding the
    /// payload to full rows.
    fn create_table(
        &self,
        label: &'static str,
        format: TextureFormat,
        mut bytes: Vec<u8>,
    ) -> TextureHandle {
        let texel_bytes = format.bytes_per_texel() as usize;
        let row_bytes = INDEX_WIDTH_TEXELS as usize * texel_bytes;
        let height = bytes.len().div_ceil(row_bytes).max(1) as u32;
        bytes.resize(height as usize * row_bytes, 0);
        let handle = self
            .gpu
            .create_texture_2d(&TextureDesc::data_table(label, INDEX_WIDTH_TEXELS, height, format));
        self.gpu.texture_image(handle, &bytes);
        handle
    }
}

impl LayerOps for DtxLayer {
    fn primitive_group(&self) -> PrimitiveGroup {
        self.prim
    }

    fn state(&self) -> LayerState {
        self.state
    }

    fn origin(&self) -> DVec3 {
        self.origin
    }

    fn sort_id(&self) -> &str {
        &self.sort_id
    }

    fn counters(&self) -> &AggregateCounters {
        self.table.counters()
    }

    fn can_create_portion(&self, cfg: &PortionCfg) -> bool {
        if self.state != LayerState::Building {
            return false;
        }
        let Some(buckets) = &cfg.buckets else {
            return false;
        };
        let new_subs = buckets.len() as u32;
        let new_verts: usize = buckets.iter().map(|b| b.num_vertices() as usize).sum();
        let subs = self.subportions.len() as u32;

        if self.portions.len() as u32 >= MAX_OBJECTS_PER_LAYER
            || subs + new_subs > MAX_OBJECTS_PER_LAYER
        {
            return false;
        }
        if (subs + new_subs).div_ceil(OBJECTS_PER_ROW) > MAX_TEXTURE_HEIGHT {
            return false;
        }
        self.num_vertices() + new_verts <= MAX_DTX_VERTS
    }

    fn create_portion(&mut self, cfg: PortionCfg) -> Result<PortionId> {
        if self.state != LayerState::Building {
            return Err(StrataError::AlreadyFinalized("data-texture layer"));
        }
        let Some(buckets) = cfg.buckets.clone() else {
            log::error!("data-texture portion created without buckets");
            return Err(StrataError::MissingParam("portion buckets"));
        };
        let Some(geometry) = cfg.geometry.clone() else {
            return Err(StrataError::MissingParam("portion geometry"));
        };

        let portion_id = PortionId(self.portions.len() as u32);
        let sub_base = self.subportions.len() as u32;
        let matrix = cfg.mesh_matrix.unwrap_or(Mat4::IDENTITY);

        for bucket in buckets.iter() {
            let sub_id = self.subportions.len() as u32;
            let slot = width_slot(bucket.index_width);
            let vertex_base = self.num_vertices() as u32;
            let verts_per_item = match self.prim {
                PrimitiveGroup::Triangles => 3,
                PrimitiveGroup::Lines => 2,
                PrimitiveGroup::Points => 1,
            };
            let num_items = (bucket.indices.len() / verts_per_item.max(1)) as u32;
            let num_edges = (bucket.edge_indices.len() / 2) as u32;
            let index_base_items =
                (self.tables.indices[slot].len() / verts_per_item.max(1)) as u32;
            let edge_base_items = (self.tables.edges[slot].len() / 2) as u32;

            // Vertex table, one padded quad per vertex.
            for triple in bucket.positions_compressed.chunks_exact(3) {
                self.tables
                    .positions
                    .extend_from_slice(&[triple[0], triple[1], triple[2], 0]);
            }
            self.tables.indices[slot].extend_from_slice(&bucket.indices);
            self.tables.edges[slot].extend_from_slice(&bucket.edge_indices);
            self.tables.face_portion_ids[slot].extend(std::iter::repeat_n(sub_id, num_items as usize));
            self.tables.edge_portion_ids[slot].extend(std::iter::repeat_n(sub_id, num_edges as usize));

            // Object record: 8 RGBA8 texels.
            self.tables.colors_flags.extend_from_slice(&[
                cfg.color[0],
                cfg.color[1],
                cfg.color[2],
                cfg.opacity,
            ]);
            self.tables.colors_flags.extend_from_slice(&0u32.to_le_bytes());
            self.tables.colors_flags.extend_from_slice(&cfg.pick_color);
            self.tables
                .colors_flags
                .extend_from_slice(&[cfg.metallic, cfg.roughness, 0, 0]);
            self.tables
                .colors_flags
                .extend_from_slice(&vertex_base.to_le_bytes());
            self.tables
                .colors_flags
                .extend_from_slice(&index_base_items.to_le_bytes());
            self.tables
                .colors_flags
                .extend_from_slice(&num_items.to_le_bytes());
            self.tables
                .colors_flags
                .extend_from_slice(&portion_id.0.to_le_bytes());

            self.tables
                .matrices
                .extend_from_slice(&matrix.to_cols_array());
            self.tables
                .decode_matrices
                .extend_from_slice(&geometry.decode_matrix.to_cols_array());

            self.subportions.push(SubPortionRecord {
                vertex_base,
                num_verts: bucket.num_vertices(),
                width: bucket.index_width,
                index_base_items,
                num_items,
                edge_base_items,
                num_edges,
            });
        }

        self.portions.push(DtxPortion {
            sub_base,
            sub_count: buckets.len() as u32,
        });
        Ok(self.table.add_portion(cfg.transparent(), cfg.aabb))
    }

    fn finalize(&mut self) -> Result<()> {
        if self.state != LayerState::Building {
            return Err(StrataError::AlreadyFinalized("data-texture layer"));
        }
        let num_subs = self.subportions.len() as u32;

        // Object plane, padded to full rows and kept on the CPU.
        let colors_flags_height = num_subs.div_ceil(OBJECTS_PER_ROW).max(1);
        self.tables.colors_flags.resize(
            (colors_flags_height * COLORS_FLAGS_WIDTH * 4) as usize,
            0,
        );
        let colors_flags = self.gpu.create_texture_2d(&TextureDesc::data_table(
            "dtx.colors_flags",
            COLORS_FLAGS_WIDTH,
            colors_flags_height,
            TextureFormat::Rgba8,
        ));
        self.gpu.texture_image(colors_flags, &self.tables.colors_flags);

        let matrices_height = num_subs.div_ceil(MATRIX_OBJECTS_PER_ROW).max(1);
        self.tables
            .matrices
            .resize((matrices_height * MATRIX_WIDTH * 4) as usize, 0.0);
        let matrices = self.gpu.create_texture_2d(&TextureDesc::data_table(
            "dtx.matrices",
            MATRIX_WIDTH,
            matrices_height,
            TextureFormat::Rgba32F,
        ));
        self.gpu
            .texture_image(matrices, bytemuck::cast_slice(&self.tables.matrices));

        self.tables
            .decode_matrices
            .resize((matrices_height * MATRIX_WIDTH * 4) as usize, 0.0);
        let decode_matrices = self.gpu.create_texture_2d(&TextureDesc::data_table(
            "dtx.decode_matrices",
            MATRIX_WIDTH,
            matrices_height,
            TextureFormat::Rgba32F,
        ));
        self.gpu.texture_image(
            decode_matrices,
            bytemuck::cast_slice(&self.tables.decode_matrices),
        );

        let positions_height =
            (self.num_vertices() as u32).div_ceil(POSITIONS_WIDTH).max(1);
        self.tables
            .positions
            .resize((positions_height * POSITIONS_WIDTH * 4) as usize, 0);
        let positions = self.gpu.create_texture_2d(&TextureDesc::data_table(
            "dtx.positions",
            POSITIONS_WIDTH,
            positions_height,
            TextureFormat::Rgba16Uint,
        ));
        self.gpu
            .texture_image(positions, bytemuck::cast_slice(&self.tables.positions));

        let widths = [IndexWidth::U8, IndexWidth::U16, IndexWidth::U32];
        let index_labels = ["dtx.indices8", "dtx.indices16", "dtx.indices32"];
        let edge_labels = ["dtx.edges8", "dtx.edges16", "dtx.edges32"];
        let face_pid_labels = [
            "dtx.face_portion_ids8",
            "dtx.face_portion_ids16",
            "dtx.face_portion_ids32",
        ];
        let edge_pid_labels = [
            "dtx.edge_portion_ids8",
            "dtx.edge_portion_ids16",
            "dtx.edge_portion_ids32",
        ];
        let mut index_tables = [None, None, None];
        let mut edge_tables = [None, None, None];
        let mut face_portion_id_tables = [None, None, None];
        let mut edge_portion_id_tables = [None, None, None];
        for (slot, width) in widths.into_iter().enumerate() {
            index_tables[slot] =
                self.create_index_table(index_labels[slot], &self.tables.indices[slot], width);
            edge_tables[slot] =
                self.create_index_table(edge_labels[slot], &self.tables.edges[slot], width);
            face_portion_id_tables[slot] =
                self.create_u32_table(face_pid_labels[slot], &self.tables.face_portion_ids[slot]);
            edge_portion_id_tables[slot] =
                self.create_u32_table(edge_pid_labels[slot], &self.tables.edge_portion_ids[slot]);
        }

        // Vertex and index payloads are now on the GPU; only the object
        // and matrix planes stay mutable.
        self.tables.positions = Vec::new();
        self.tables.indices = Default::default();
        self.tables.edges = Default::default();
        self.tables.face_portion_ids = Default::default();
        self.tables.edge_portion_ids = Default::default();

        self.gpu_state = Some(DtxGpu {
            colors_flags,
            colors_flags_height,
            matrices,
            decode_matrices,
            positions,
            index_tables,
            edge_tables,
            face_portion_id_tables,
            edge_portion_id_tables,
        });
        self.state = LayerState::Finalized;
        log::debug!(
            "finalized data-texture {} layer: {} portions, {} subportions",
            self.prim,
            self.portions.len(),
            num_subs
        );
        Ok(())
    }

    fn commit(&mut self) {
        if self.state == LayerState::Finalized && self.deferred.on_commit() {
            self.upload_colors_flags_plane();
        }
    }

    fn destroy(&mut self) {
        if self.state == LayerState::Destroyed {
            return;
        }
        if self.state == LayerState::Finalized {
            if self.deferred.take_dirty() {
                self.upload_colors_flags_plane();
            }
            let state = self.gpu_state.take().expect("finalized layer has gpu state");
            let mut handles = vec![
                state.colors_flags,
                state.matrices,
                state.decode_matrices,
                state.positions,
            ];
            for table in [
                state.index_tables,
                state.edge_tables,
                state.face_portion_id_tables,
                state.edge_portion_id_tables,
            ] {
                handles.extend(table.into_iter().flatten());
            }
            for handle in handles {
                self.gpu.destroy_texture(handle);
            }
        }
        self.tables = DtxTables::default();
        self.state = LayerState::Destroyed;
    }

    fn set_flags(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
    ) -> Result<()> {
        self.require_finalized()?;
        let Some(word) = self.table.set_flags(portion, flags, transparent)? else {
            return Ok(());
        };
        let range = self.portions[portion.0 as usize];
        for sub in range.sub_base..range.sub_base + range.sub_count {
            let byte = (sub * 32 + 4) as usize;
            self.tables.colors_flags[byte..byte + 4].copy_from_slice(&word.to_le_bytes());
        }
        match self.deferred.begin_write() {
            WriteMode::Direct => {
                for sub in range.sub_base..range.sub_base + range.sub_count {
                    self.upload_object_texel(sub, 1);
                }
            }
            WriteMode::Deferred => {}
        }
        Ok(())
    }

    fn set_color(&mut self, portion: PortionId, color: [u8; 4]) -> Result<()> {
        self.check_portion(portion)?;
        self.require_finalized()?;
        let range = self.portions[portion.0 as usize];
        for sub in range.sub_base..range.sub_base + range.sub_count {
            let byte = (sub * 32) as usize;
            self.tables.colors_flags[byte..byte + 4].copy_from_slice(&color);
        }
        match self.deferred.begin_write() {
            WriteMode::Direct => {
                for sub in range.sub_base..range.sub_base + range.sub_count {
                    self.upload_object_texel(sub, 0);
                }
            }
            WriteMode::Deferred => {}
        }
        Ok(())
    }

    fn set_offset(&mut self, _portion: PortionId, _offset: Vec3) -> Result<()> {
        // No offsets plane; entity offsets only move bounds on this path.
        log::warn!("per-portion offsets are not supported on data-texture layers");
        Ok(())
    }

    fn set_matrix(&mut self, portion: PortionId, matrix: &Mat4) -> Result<()> {
        self.check_portion(portion)?;
        self.require_finalized()?;
        let range = self.portions[portion.0 as usize];
        let cols = matrix.to_cols_array();
        for sub in range.sub_base..range.sub_base + range.sub_count {
            let base = sub as usize * 16;
            self.tables.matrices[base..base + 16].copy_from_slice(&cols);
        }
        let state = self.gpu_state.as_ref().expect("finalized");
        for sub in range.sub_base..range.sub_base + range.sub_count {
            let x = (sub % MATRIX_OBJECTS_PER_ROW) * 4;
            let y = sub / MATRIX_OBJECTS_PER_ROW;
            let base = sub as usize * 16;
            self.gpu.texture_sub_image_2d(
                state.matrices,
                0,
                x,
                y,
                4,
                1,
                bytemuck::cast_slice(&self.tables.matrices[base..base + 16]),
            );
        }
        Ok(())
    }

    fn aabb(&mut self) -> Aabb {
        self.table.aabb()
    }

    fn should_draw(&self, render_pass: u32) -> bool {
        should_draw_from_counters(self.table.counters(), render_pass)
    }
}
