//! Instanced VBO layer: one geometry, per-instance attribute arrays.
//!
//! The shared geometry (positions, indices, edges, UVs, colors) uploads
//! once; each portion contributes three model-matrix rows, a color, a
//! pick color, a flag word, and an offset, all strided per instance.

use glam::{DVec3, Mat4, Vec3};
use std::sync::Arc;

use super::vbo_batched::should_draw_from_counters;
use super::{
    AggregateCounters, DeferredUpdates, EmphasisConfig, EntityFlags, LayerOps, LayerState,
    MAX_OBJECTS_PER_LAYER, PortionCfg, PortionId, PortionTable, PrimitiveGroup, WriteMode,
};
use crate::errors::{Result, StrataError};
use crate::geometry::Geometry;
use crate::gpu::{BufferDesc, BufferHandle, Gpu};
use crate::math::Aabb;

#[derive(Debug, Default)]
struct InstanceAccum {
    /// Rows 0..3 of each instance matrix, one vec4 stream per row.
    matrix_row0: Vec<f32>,
    matrix_row1: Vec<f32>,
    matrix_row2: Vec<f32>,
    colors: Vec<u8>,
    metallic_roughness: Vec<u8>,
    pick_colors: Vec<u8>,
}

#[derive(Debug)]
struct InstancedGpu {
    // Shared geometry.
    positions: BufferHandle,
    normals: Option<BufferHandle>,
    uv: Option<BufferHandle>,
    vertex_colors: Option<BufferHandle>,
    indices: Option<BufferHandle>,
    edge_indices: Option<BufferHandle>,
    // Per-instance streams.
    matrix_row0: BufferHandle,
    matrix_row1: BufferHandle,
    matrix_row2: BufferHandle,
    colors: BufferHandle,
    metallic_roughness: BufferHandle,
    pick_colors: BufferHandle,
    flags: BufferHandle,
    offsets: BufferHandle,
    flags_mirror: Vec<u32>,
}

/// Instanced-strategy layer.
#[derive(Debug)]
pub struct VboInstancedLayer {
    prim: PrimitiveGroup,
    origin: DVec3,
    sort_id: String,
    state: LayerState,
    gpu: Arc<Gpu>,
    geometry: Arc<Geometry>,
    accum: InstanceAccum,
    table: PortionTable,
    deferred: DeferredUpdates,
    gpu_state: Option<InstancedGpu>,
}

impl VboInstancedLayer {
    pub fn new(
        prim: PrimitiveGroup,
        origin: DVec3,
        sort_id: String,
        gpu: Arc<Gpu>,
        geometry: Arc<Geometry>,
        emphasis: EmphasisConfig,
    ) -> Self {
        Self {
            prim,
            origin,
            sort_id,
            state: LayerState::Building,
            gpu,
            geometry,
            accum: InstanceAccum::default(),
            table: PortionTable::new(emphasis),
            deferred: DeferredUpdates::default(),
            gpu_state: None,
        }
    }

    #[must_use]
    pub fn geometry(&self) -> &Arc<Geometry> {
        &self.geometry
    }

    fn check_portion(&self, portion: PortionId) -> Result<()> {
        if portion.0 >= self.table.len() {
            return Err(StrataError::InvalidPortion {
                portion: portion.0,
                count: self.table.len(),
            });
        }
        Ok(())
    }

    fn require_finalized(&self) -> Result<&InstancedGpu> {
        match self.state {
            LayerState::Building => Err(StrataError::NotFinalized("instanced layer")),
            LayerState::Destroyed => Err(StrataError::Destroyed("instanced layer")),
            LayerState::Finalized => {
                Ok(self.gpu_state.as_ref().expect("finalized layer has gpu state"))
            }
        }
    }

    fn upload_flags_plane(&self) {
        let state = self.gpu_state.as_ref().expect("finalized");
        self.gpu
            .buffer_sub_data(state.flags, 0, bytemuck::cast_slice(&state.flags_mirror));
    }

    fn push_matrix(&mut self, matrix: &Mat4) {
        // Row-major vec4 streams; the implied last row is (0, 0, 0, 1).
        let m = matrix.to_cols_array();
        self.accum
            .matrix_row0
            .extend_from_slice(&[m[0], m[4], m[8], m[12]]);
        self.accum
            .matrix_row1
            .extend_from_slice(&[m[1], m[5], m[9], m[13]]);
        self.accum
            .matrix_row2
            .extend_from_slice(&[m[2], m[6], m[10], m[14]]);
    }
}

impl LayerOps for VboInstancedLayer {
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

    fn can_create_portion(&self, _cfg: &PortionCfg) -> bool {
        self.state == LayerState::Building && self.table.len() < MAX_OBJECTS_PER_LAYER
    }

    fn create_portion(&mut self, cfg: PortionCfg) -> Result<PortionId> {
        if self.state != LayerState::Building {
            return Err(StrataError::AlreadyFinalized("instanced layer"));
        }
        if cfg.positions.is_some() || cfg.positions_compressed.is_some() {
            log::error!("instanced portions share their layer geometry; raw positions rejected");
            return Err(StrataError::IncompatibleParams(
                "instanced portions cannot carry positions",
            ));
        }

        let matrix = cfg.mesh_matrix.unwrap_or(Mat4::IDENTITY);
        self.push_matrix(&matrix);
        self.accum.colors.extend_from_slice(&[
            cfg.color[0],
            cfg.color[1],
            cfg.color[2],
            cfg.opacity,
        ]);
        self.accum
            .metallic_roughness
            .extend_from_slice(&[cfg.metallic, cfg.roughness]);
        self.accum.pick_colors.extend_from_slice(&cfg.pick_color);

        Ok(self.table.add_portion(cfg.transparent(), cfg.aabb))
    }

    fn finalize(&mut self) -> Result<()> {
        if self.state != LayerState::Building {
            return Err(StrataError::AlreadyFinalized("instanced layer"));
        }
        let num_instances = self.table.len() as usize;
        let geometry = &self.geometry;

        let positions = self.gpu.create_array_buffer(
            &BufferDesc::vertex("instanced.positions", 2),
            bytemuck::cast_slice(&geometry.positions_compressed),
        );
        let normals = geometry.normals_oct.as_ref().map(|oct| {
            self.gpu.create_array_buffer(
                &BufferDesc::vertex_normalized("instanced.normals", 1),
                bytemuck::cast_slice(oct.as_slice()),
            )
        });
        let uv = geometry.uv_compressed.as_ref().map(|uv| {
            self.gpu.create_array_buffer(
                &BufferDesc::vertex("instanced.uv", 2),
                bytemuck::cast_slice(uv.as_slice()),
            )
        });
        let vertex_colors = geometry.colors_compressed.as_ref().map(|colors| {
            self.gpu.create_array_buffer(
                &BufferDesc::vertex_normalized("instanced.vertex_colors", 1),
                colors,
            )
        });
        let indices = geometry.indices.as_ref().map(|indices| {
            self.gpu.create_array_buffer(
                &BufferDesc::index("instanced.indices", 4),
                bytemuck::cast_slice(indices.as_slice()),
            )
        });
        let edge_indices = geometry.edge_indices.as_ref().map(|edges| {
            self.gpu.create_array_buffer(
                &BufferDesc::index("instanced.edge_indices", 4),
                bytemuck::cast_slice(edges.as_slice()),
            )
        });

        let matrix_row0 = self.gpu.create_array_buffer(
            &BufferDesc::vertex_dynamic("instanced.matrix_row0", 4),
            bytemuck::cast_slice(&self.accum.matrix_row0),
        );
        let matrix_row1 = self.gpu.create_array_buffer(
            &BufferDesc::vertex_dynamic("instanced.matrix_row1", 4),
            bytemuck::cast_slice(&self.accum.matrix_row1),
        );
        let matrix_row2 = self.gpu.create_array_buffer(
            &BufferDesc::vertex_dynamic("instanced.matrix_row2", 4),
            bytemuck::cast_slice(&self.accum.matrix_row2),
        );
        let colors = self.gpu.create_array_buffer(
            &BufferDesc::vertex_normalized("instanced.colors", 1),
            &self.accum.colors,
        );
        let metallic_roughness = self.gpu.create_array_buffer(
            &BufferDesc::vertex_normalized("instanced.metallic_roughness", 1),
            &self.accum.metallic_roughness,
        );
        let pick_colors = self.gpu.create_array_buffer(
            &BufferDesc::vertex_normalized("instanced.pick_colors", 1),
            &self.accum.pick_colors,
        );

        let flags_mirror = vec![0u32; num_instances];
        let flags = self.gpu.create_array_buffer(
            &BufferDesc::vertex_dynamic("instanced.flags", 4),
            bytemuck::cast_slice(&flags_mirror),
        );
        let offsets = self.gpu.create_array_buffer(
            &BufferDesc::vertex_dynamic("instanced.offsets", 4),
            bytemuck::cast_slice(&vec![0.0f32; num_instances * 3]),
        );

        self.gpu_state = Some(InstancedGpu {
            positions,
            normals,
            uv,
            vertex_colors,
            indices,
            edge_indices,
            matrix_row0,
            matrix_row1,
            matrix_row2,
            colors,
            metallic_roughness,
            pick_colors,
            flags,
            offsets,
            flags_mirror,
        });

        self.accum = InstanceAccum::default();
        self.state = LayerState::Finalized;
        log::debug!(
            "finalized instanced {} layer: {} instances of geometry {:?}",
            self.prim,
            num_instances,
            self.geometry.id
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
                state.normals,
                state.uv,
                state.vertex_colors,
                state.indices,
                state.edge_indices,
                Some(state.matrix_row0),
                Some(state.matrix_row1),
                Some(state.matrix_row2),
                Some(state.colors),
                Some(state.metallic_roughness),
                Some(state.pick_colors),
                Some(state.flags),
                Some(state.offsets),
            ]
            .into_iter()
            .flatten()
            {
                self.gpu.destroy_buffer(handle);
            }
        }
        self.accum = InstanceAccum::default();
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
        let state = self.gpu_state.as_mut().expect("finalized");
        state.flags_mirror[portion.0 as usize] = word;
        match self.deferred.begin_write() {
            WriteMode::Direct => {
                let state = self.gpu_state.as_ref().expect("finalized");
                self.gpu.buffer_sub_data(
                    state.flags,
                    portion.0 as usize * 4,
                    bytemuck::bytes_of(&word),
                );
            }
            WriteMode::Deferred => {}
        }
        Ok(())
    }

    fn set_color(&mut self, portion: PortionId, color: [u8; 4]) -> Result<()> {
        self.check_portion(portion)?;
        let state = self.require_finalized()?;
        let buffer = state.colors;
        self.gpu
            .buffer_sub_data(buffer, portion.0 as usize * 4, &color);
        Ok(())
    }

    fn set_offset(&mut self, portion: PortionId, offset: Vec3) -> Result<()> {
        self.check_portion(portion)?;
        let state = self.require_finalized()?;
        let buffer = state.offsets;
        self.gpu.buffer_sub_data(
            buffer,
            portion.0 as usize * 12,
            bytemuck::cast_slice(&offset.to_array()),
        );
        Ok(())
    }

    fn set_matrix(&mut self, portion: PortionId, matrix: &Mat4) -> Result<()> {
        self.check_portion(portion)?;
        let state = self.require_finalized()?;
        let rows = [state.matrix_row0, state.matrix_row1, state.matrix_row2];
        let m = matrix.to_cols_array();
        let row_data = [
            [m[0], m[4], m[8], m[12]],
            [m[1], m[5], m[9], m[13]],
            [m[2], m[6], m[10], m[14]],
        ];
        for (buffer, row) in rows.into_iter().zip(row_data) {
            self.gpu
                .buffer_sub_data(buffer, portion.0 as usize * 16, bytemuck::cast_slice(&row));
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
