//! Batched VBO layer: many distinct geometries, one vertex buffer.
//!
//! Portions append tile-local float positions (already baked by their
//! mesh matrix) into CPU accumulators; finalize quantizes the whole
//! buffer against its combined bounds, so the layer carries a single
//! decode matrix. Object state is striped per vertex, which makes a
//! portion flag flip cost `num_verts` words of upload.

use glam::{DVec3, Mat4, Vec3};
use std::sync::Arc;

use super::{
    AggregateCounters, DeferredUpdates, EmphasisConfig, EntityFlags, LayerOps, LayerState,
    MAX_OBJECTS_PER_LAYER, PortionCfg, PortionId, PortionTable, PrimitiveGroup, WriteMode, pass,
};
use crate::compress;
use crate::errors::{Result, StrataError};
use crate::gpu::{BufferDesc, BufferHandle, Gpu};
use crate::math::Aabb;
use crate::scratch::ScratchPool;

/// Vertex capacity of one batched layer.
pub const MAX_BATCH_VERTS: usize = 4 * 1024 * 1024;
/// Index capacity of one batched layer.
pub const MAX_BATCH_INDICES: usize = 3 * MAX_BATCH_VERTS;

#[derive(Debug, Default)]
struct BatchAccum {
    positions: Vec<f32>,
    positions_compressed: Vec<u16>,
    normals: Vec<f32>,
    uv: Vec<f32>,
    colors: Vec<u8>,
    metallic_roughness: Vec<u8>,
    pick_colors: Vec<u8>,
    indices: Vec<u32>,
    edge_indices: Vec<u32>,
    has_normals: bool,
    has_uv: bool,
}

#[derive(Debug, Clone, Copy)]
struct BatchedPortion {
    vert_base: u32,
    num_verts: u32,
}

#[derive(Debug)]
struct BatchedGpu {
    decode_matrix: Mat4,
    num_verts: u32,
    positions: BufferHandle,
    flags: BufferHandle,
    colors: BufferHandle,
    offsets: BufferHandle,
    metallic_roughness: BufferHandle,
    pick_colors: BufferHandle,
    normals: Option<BufferHandle>,
    uv: Option<BufferHandle>,
    indices: Option<BufferHandle>,
    edge_indices: Option<BufferHandle>,
    /// CPU mirror of the per-vertex flag words for coalesced uploads.
    flags_mirror: Vec<u32>,
}

/// Batched-strategy layer.
#[derive(Debug)]
pub struct VboBatchedLayer {
    prim: PrimitiveGroup,
    origin: DVec3,
    sort_id: String,
    state: LayerState,
    gpu: Arc<Gpu>,
    scratch: Arc<ScratchPool>,
    /// Set when portions arrive pre-compressed; the composite key
    /// guarantees every portion shares it.
    preset_decode: Option<Mat4>,
    accum: BatchAccum,
    portions: Vec<BatchedPortion>,
    table: PortionTable,
    deferred: DeferredUpdates,
    gpu_state: Option<BatchedGpu>,
}

impl VboBatchedLayer {
    pub fn new(
        prim: PrimitiveGroup,
        origin: DVec3,
        sort_id: String,
        gpu: Arc<Gpu>,
        scratch: Arc<ScratchPool>,
        emphasis: EmphasisConfig,
        preset_decode: Option<Mat4>,
    ) -> Self {
        Self {
            prim,
            origin,
            sort_id,
            state: LayerState::Building,
            gpu,
            scratch,
            preset_decode,
            accum: BatchAccum::default(),
            portions: Vec::new(),
            table: PortionTable::new(emphasis),
            deferred: DeferredUpdates::default(),
            gpu_state: None,
        }
    }

    /// Layer-wide decode matrix, available after finalize.
    #[must_use]
    pub fn decode_matrix(&self) -> Option<Mat4> {
        self.gpu_state.as_ref().map(|s| s.decode_matrix)
    }

    fn portion_range(&self, portion: PortionId) -> (u32, u32) {
        let p = self.portions[portion.0 as usize];
        (p.vert_base, p.num_verts)
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

    fn require_finalized(&self) -> Result<&BatchedGpu> {
        match self.state {
            LayerState::Building => Err(StrataError::NotFinalized("batched layer")),
            LayerState::Destroyed => Err(StrataError::Destroyed("batched layer")),
            LayerState::Finalized => Ok(self.gpu_state.as_ref().expect("finalized layer has gpu state")),
        }
    }

    fn upload_flags_range(&self, base: u32, count: u32) {
        let state = self.gpu_state.as_ref().expect("finalized");
        let words = &state.flags_mirror[base as usize..(base + count) as usize];
        self.gpu
            .buffer_sub_data(state.flags, base as usize * 4, bytemuck::cast_slice(words));
    }

    fn upload_flags_plane(&self) {
        let state = self.gpu_state.as_ref().expect("finalized");
        self.gpu
            .buffer_sub_data(state.flags, 0, bytemuck::cast_slice(&state.flags_mirror));
    }
}

impl LayerOps for VboBatchedLayer {
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
        if self.portions.len() as u32 >= MAX_OBJECTS_PER_LAYER {
            return false;
        }
        let new_verts = cfg
            .positions
            .as_ref()
            .map_or_else(|| cfg.positions_compressed.as_ref().map_or(0, Vec::len), Vec::len)
            / 3;
        let new_indices = cfg.indices.as_ref().map_or(0, Vec::len);
        let current_verts = if self.preset_decode.is_some() {
            self.accum.positions_compressed.len() / 3
        } else {
            self.accum.positions.len() / 3
        };
        current_verts + new_verts <= MAX_BATCH_VERTS
            && self.accum.indices.len() + new_indices <= MAX_BATCH_INDICES
    }

    fn create_portion(&mut self, cfg: PortionCfg) -> Result<PortionId> {
        if self.state != LayerState::Building {
            return Err(StrataError::AlreadyFinalized("batched layer"));
        }

        let vert_base = if self.preset_decode.is_some() {
            (self.accum.positions_compressed.len() / 3) as u32
        } else {
            (self.accum.positions.len() / 3) as u32
        };

        // Positions must match the layer's compression mode.
        let num_verts = match (self.preset_decode.is_some(), &cfg.positions, &cfg.positions_compressed) {
            (false, Some(positions), None) => {
                self.accum.positions.extend_from_slice(positions);
                (positions.len() / 3) as u32
            }
            (true, None, Some(compressed)) => {
                self.accum.positions_compressed.extend_from_slice(compressed);
                (compressed.len() / 3) as u32
            }
            _ => {
                log::error!("batched portion positions do not match the layer's compression mode");
                return Err(StrataError::IncompatibleParams(
                    "batched portion positions must match the layer's compression mode",
                ));
            }
        };
        if num_verts == 0 {
            return Err(StrataError::MissingParam("portion positions"));
        }

        // Optional per-vertex streams stay aligned across portions that
        // do and do not provide them.
        if let Some(normals) = &cfg.normals {
            self.accum.normals.resize(vert_base as usize * 3, 0.0);
            self.accum.normals.extend_from_slice(normals);
            self.accum.has_normals = true;
        } else if self.accum.has_normals {
            self.accum
                .normals
                .resize((vert_base + num_verts) as usize * 3, 0.0);
        }
        if let Some(uv) = &cfg.uv {
            self.accum.uv.resize(vert_base as usize * 2, 0.0);
            self.accum.uv.extend_from_slice(uv);
            self.accum.has_uv = true;
        } else if self.accum.has_uv {
            self.accum.uv.resize((vert_base + num_verts) as usize * 2, 0.0);
        }

        // Colors: per-vertex when supplied, else the portion color.
        if let Some(colors) = &cfg.colors_compressed {
            self.accum.colors.extend_from_slice(colors);
        } else {
            for _ in 0..num_verts {
                self.accum.colors.extend_from_slice(&[
                    cfg.color[0],
                    cfg.color[1],
                    cfg.color[2],
                    cfg.opacity,
                ]);
            }
        }
        for _ in 0..num_verts {
            self.accum
                .metallic_roughness
                .extend_from_slice(&[cfg.metallic, cfg.roughness]);
            self.accum.pick_colors.extend_from_slice(&cfg.pick_color);
        }

        if let Some(indices) = &cfg.indices {
            self.accum
                .indices
                .extend(indices.iter().map(|i| i + vert_base));
        }
        if let Some(edges) = &cfg.edge_indices {
            self.accum
                .edge_indices
                .extend(edges.iter().map(|i| i + vert_base));
        }

        self.portions.push(BatchedPortion {
            vert_base,
            num_verts,
        });
        Ok(self.table.add_portion(cfg.transparent(), cfg.aabb))
    }

    fn finalize(&mut self) -> Result<()> {
        if self.state != LayerState::Building {
            return Err(StrataError::AlreadyFinalized("batched layer"));
        }
        let mut lease = self.scratch.acquire()?;

        let num_verts = if self.preset_decode.is_some() {
            (self.accum.positions_compressed.len() / 3) as u32
        } else {
            (self.accum.positions.len() / 3) as u32
        };

        // Quantize the whole layer against its combined bounds, staging
        // through the scratch lease.
        let (positions_u16, decode_matrix): (&[u16], Mat4) = if let Some(preset) = self.preset_decode
        {
            (&self.accum.positions_compressed, preset)
        } else {
            let packed = compress::quantize_positions(&self.accum.positions);
            lease.u16s.extend_from_slice(&packed.quantized);
            (&lease.u16s, packed.decode_matrix)
        };

        let positions = self.gpu.create_array_buffer(
            &BufferDesc::vertex("batched.positions", 2),
            bytemuck::cast_slice(positions_u16),
        );

        let flags_mirror = vec![0u32; num_verts as usize];
        let flags = self.gpu.create_array_buffer(
            &BufferDesc::vertex_dynamic("batched.flags", 4),
            bytemuck::cast_slice(&flags_mirror),
        );
        let colors = self.gpu.create_array_buffer(
            &BufferDesc::vertex_normalized("batched.colors", 1),
            &self.accum.colors,
        );
        lease.f32s.resize(num_verts as usize * 3, 0.0);
        let offsets = self.gpu.create_array_buffer(
            &BufferDesc::vertex_dynamic("batched.offsets", 4),
            bytemuck::cast_slice(&lease.f32s),
        );
        let metallic_roughness = self.gpu.create_array_buffer(
            &BufferDesc::vertex_normalized("batched.metallic_roughness", 1),
            &self.accum.metallic_roughness,
        );
        let pick_colors = self.gpu.create_array_buffer(
            &BufferDesc::vertex_normalized("batched.pick_colors", 1),
            &self.accum.pick_colors,
        );

        let normals = if self.accum.has_normals {
            let oct = compress::encode_normals(&self.accum.normals);
            Some(self.gpu.create_array_buffer(
                &BufferDesc::vertex_normalized("batched.normals", 1),
                bytemuck::cast_slice(&oct),
            ))
        } else {
            None
        };
        let uv = if self.accum.has_uv {
            let packed = compress::quantize_uvs(&self.accum.uv);
            Some(self.gpu.create_array_buffer(
                &BufferDesc::vertex("batched.uv", 2),
                bytemuck::cast_slice(&packed.quantized),
            ))
        } else {
            None
        };
        let indices = (!self.accum.indices.is_empty()).then(|| {
            self.gpu.create_array_buffer(
                &BufferDesc::index("batched.indices", 4),
                bytemuck::cast_slice(&self.accum.indices),
            )
        });
        let edge_indices = (!self.accum.edge_indices.is_empty()).then(|| {
            self.gpu.create_array_buffer(
                &BufferDesc::index("batched.edge_indices", 4),
                bytemuck::cast_slice(&self.accum.edge_indices),
            )
        });

        self.gpu_state = Some(BatchedGpu {
            decode_matrix,
            num_verts,
            positions,
            flags,
            colors,
            offsets,
            metallic_roughness,
            pick_colors,
            normals,
            uv,
            indices,
            edge_indices,
            flags_mirror,
        });

        // Accumulators are done; release the memory, keep the ranges.
        self.accum = BatchAccum::default();
        self.state = LayerState::Finalized;
        log::debug!(
            "finalized batched {} layer: {} portions, {} vertices",
            self.prim,
            self.portions.len(),
            num_verts
        );
        Ok(())
    }

    fn commit(&mut self) {
        if self.state == LayerState::Finalized && self.deferred.on_commit() {
            self.upload_flags_plane();
        }
    }

    fn destroy(&mut self) {
        if self.state == LayerState::Destroyed {
            return;
        }
        if self.state == LayerState::Finalized {
            if self.deferred.take_dirty() {
                self.upload_flags_plane();
            }
            let state = self.gpu_state.take().expect("finalized layer has gpu state");
            for handle in [
                Some(state.positions),
                Some(state.flags),
                Some(state.colors),
                Some(state.offsets),
                Some(state.metallic_roughness),
                Some(state.pick_colors),
                state.normals,
                state.uv,
                state.indices,
                state.edge_indices,
            ]
            .into_iter()
            .flatten()
            {
                self.gpu.destroy_buffer(handle);
            }
        }
        self.accum = BatchAccum::default();
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
        let (base, count) = self.portion_range(portion);
        let state = self.gpu_state.as_mut().expect("finalized");
        state.flags_mirror[base as usize..(base + count) as usize].fill(word);
        match self.deferred.begin_write() {
            WriteMode::Direct => self.upload_flags_range(base, count),
            WriteMode::Deferred => {}
        }
        Ok(())
    }

    fn set_color(&mut self, portion: PortionId, color: [u8; 4]) -> Result<()> {
        self.check_portion(portion)?;
        let state = self.require_finalized()?;
        let colors_buffer = state.colors;
        let (base, count) = self.portion_range(portion);
        let data: Vec<u8> = color
            .iter()
            .copied()
            .cycle()
            .take(count as usize * 4)
            .collect();
        self.gpu
            .buffer_sub_data(colors_buffer, base as usize * 4, &data);
        Ok(())
    }

    fn set_offset(&mut self, portion: PortionId, offset: Vec3) -> Result<()> {
        self.check_portion(portion)?;
        let state = self.require_finalized()?;
        let offsets_buffer = state.offsets;
        let (base, count) = self.portion_range(portion);
        let mut data = Vec::with_capacity(count as usize * 3);
        for _ in 0..count {
            data.extend_from_slice(&offset.to_array());
        }
        self.gpu
            .buffer_sub_data(offsets_buffer, base as usize * 12, bytemuck::cast_slice(&data));
        Ok(())
    }

    fn set_matrix(&mut self, _portion: PortionId, _matrix: &Mat4) -> Result<()> {
        // Batched positions are baked; there is no per-portion transform.
        Err(StrataError::IncompatibleParams(
            "batched portions have baked transforms",
        ))
    }

    fn aabb(&mut self) -> Aabb {
        self.table.aabb()
    }

    fn should_draw(&self, render_pass: u32) -> bool {
        should_draw_from_counters(self.table.counters(), render_pass)
    }
}

/// Shared counter short-circuit, used by all three strategies.
pub(crate) fn should_draw_from_counters(counters: &AggregateCounters, render_pass: u32) -> bool {
    let num = counters.num_portions();
    if num == 0 || counters.num_visible() == 0 || counters.num_culled() == num {
        return false;
    }
    match render_pass {
        pass::COLOR_OPAQUE => counters.num_transparent() < num,
        pass::COLOR_TRANSPARENT => counters.num_transparent() > 0,
        pass::SILHOUETTE_SELECTED | pass::EDGES_SELECTED => counters.num_selected() > 0,
        pass::SILHOUETTE_HIGHLIGHTED | pass::EDGES_HIGHLIGHTED => counters.num_highlighted() > 0,
        pass::SILHOUETTE_XRAYED | pass::EDGES_XRAYED => counters.num_xrayed() > 0,
        pass::EDGES_COLOR_OPAQUE | pass::EDGES_COLOR_TRANSPARENT => counters.num_edges() > 0,
        pass::PICK => counters.num_pickable() > 0,
        _ => false,
    }
}
