//! Layer family.
//!
//! A layer is the smallest draw-call unit: a container of portions that
//! share an origin, a primitive group, and (per strategy) a decode matrix
//! or a shared geometry. Three storage strategies exist behind one
//! contract:
//!
//! - [`VboBatchedLayer`] — many distinct geometries concatenated into one
//!   vertex buffer, per-vertex object state.
//! - [`VboInstancedLayer`] — one geometry drawn many times, per-instance
//!   object state.
//! - [`DtxLayer`] — per-object state packed into data textures indexed by
//!   portion id.
//!
//! Every layer walks `Building → Finalized → Destroyed`; portions can
//! only be added while building, and per-portion state can only change
//! after finalize.

pub mod counters;
pub mod dtx;
pub mod flags;
pub mod vbo_batched;
pub mod vbo_instanced;

pub use counters::AggregateCounters;
pub use dtx::DtxLayer;
pub use flags::{EmphasisConfig, EntityFlags, pack_flags, pass};
pub use vbo_batched::VboBatchedLayer;
pub use vbo_instanced::VboInstancedLayer;

use glam::{DVec3, Mat4, Vec3};
use std::sync::Arc;

use crate::errors::{Result, StrataError};
use crate::geometry::{Bucket, Geometry, PrimitiveKind};
use crate::math::Aabb;

/// Hard cap on portions per layer, all strategies.
pub const MAX_OBJECTS_PER_LAYER: u32 = 65536;

/// Direct per-portion GPU updates tolerated within one frame before a
/// layer switches to deferred mode.
pub const MAX_PER_FRAME_UPDATES: u32 = 10;

/// Primitive family a layer draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveGroup {
    Triangles,
    Lines,
    Points,
}

impl From<PrimitiveKind> for PrimitiveGroup {
    fn from(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Points => PrimitiveGroup::Points,
            PrimitiveKind::Lines => PrimitiveGroup::Lines,
            _ => PrimitiveGroup::Triangles,
        }
    }
}

impl std::fmt::Display for PrimitiveGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PrimitiveGroup::Triangles => "triangles",
            PrimitiveGroup::Lines => "lines",
            PrimitiveGroup::Points => "points",
        })
    }
}

/// Dense per-layer portion identifier, stable from creation to destroy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortionId(pub u32);

/// Lifecycle of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerState {
    Building,
    Finalized,
    Destroyed,
}

/// Everything a layer needs to absorb one mesh.
///
/// The scene model fills the fields relevant to the chosen strategy;
/// layers reject configurations that belong to a different one.
#[derive(Debug, Clone, Default)]
pub struct PortionCfg {
    // Batched path: tile-local float positions, already baked by the mesh
    // matrix, or pre-compressed grid positions matching the layer's
    // preset decode matrix.
    pub positions: Option<Vec<f32>>,
    pub positions_compressed: Option<Vec<u16>>,
    pub normals: Option<Vec<f32>>,
    pub uv: Option<Vec<f32>>,
    pub colors_compressed: Option<Vec<u8>>,
    pub indices: Option<Vec<u32>>,
    pub edge_indices: Option<Vec<u32>>,

    /// Decode matrix accompanying pre-compressed batched positions; the
    /// layer that opens on this portion adopts it for every sibling.
    pub decode_matrix: Option<Mat4>,

    // Instanced / data-texture path.
    pub geometry: Option<Arc<Geometry>>,
    pub buckets: Option<Arc<Vec<Bucket>>>,
    pub mesh_matrix: Option<Mat4>,

    // Common per-object state.
    pub color: [u8; 3],
    pub opacity: u8,
    pub metallic: u8,
    pub roughness: u8,
    pub pick_color: [u8; 4],
    /// World-space bounds of the portion.
    pub aabb: Aabb,
}

impl PortionCfg {
    #[must_use]
    pub fn transparent(&self) -> bool {
        self.opacity < 255
    }
}

/// The capability set every layer strategy implements.
pub trait LayerOps {
    fn primitive_group(&self) -> PrimitiveGroup;
    fn state(&self) -> LayerState;
    fn origin(&self) -> DVec3;
    /// Stable sorting key; sibling layers under one composite key share it.
    fn sort_id(&self) -> &str;
    fn counters(&self) -> &AggregateCounters;

    /// `false` means the portion would overflow this layer and the caller
    /// must provision a sibling.
    fn can_create_portion(&self, cfg: &PortionCfg) -> bool;
    fn create_portion(&mut self, cfg: PortionCfg) -> Result<PortionId>;

    /// One-shot: compiles accumulators into immutable GPU resources.
    fn finalize(&mut self) -> Result<()>;
    /// Render tick: flushes deferred updates, resets per-frame budgets.
    fn commit(&mut self);
    fn destroy(&mut self);

    fn set_flags(&mut self, portion: PortionId, flags: EntityFlags, transparent: bool)
        -> Result<()>;
    fn set_color(&mut self, portion: PortionId, color: [u8; 4]) -> Result<()>;
    fn set_offset(&mut self, portion: PortionId, offset: Vec3) -> Result<()>;
    fn set_matrix(&mut self, portion: PortionId, matrix: &Mat4) -> Result<()>;

    /// Lazy union of portion bounds.
    fn aabb(&mut self) -> Aabb;
    /// Counter-driven short circuit: `false` skips the pass entirely.
    fn should_draw(&self, render_pass: u32) -> bool;
}

/// Storage-strategy-tagged layer.
#[derive(Debug)]
pub enum Layer {
    VboBatched(VboBatchedLayer),
    VboInstanced(VboInstancedLayer),
    Dtx(DtxLayer),
}

impl Layer {
    #[must_use]
    pub fn ops(&self) -> &dyn LayerOps {
        match self {
            Layer::VboBatched(layer) => layer,
            Layer::VboInstanced(layer) => layer,
            Layer::Dtx(layer) => layer,
        }
    }

    pub fn ops_mut(&mut self) -> &mut dyn LayerOps {
        match self {
            Layer::VboBatched(layer) => layer,
            Layer::VboInstanced(layer) => layer,
            Layer::Dtx(layer) => layer,
        }
    }
}

// ============================================================================
// Shared portion bookkeeping
// ============================================================================

#[derive(Debug, Clone)]
pub(crate) struct PortionState {
    pub flags: EntityFlags,
    pub transparent: bool,
    pub aabb: Aabb,
}

/// Outcome of a flag write: `None` when the request matched current state.
pub(crate) type FlagChange = Option<u32>;

/// Per-portion state table shared by all three strategies.
///
/// Owns the authoritative flag copies and the aggregate counters, and
/// guarantees the idempotence contract: a setter matching current state
/// returns `None` and the caller must not touch GPU memory.
#[derive(Debug, Default)]
pub(crate) struct PortionTable {
    states: Vec<PortionState>,
    counters: AggregateCounters,
    emphasis: EmphasisConfig,
    aabb: Aabb,
    aabb_dirty: bool,
}

impl PortionTable {
    pub fn new(emphasis: EmphasisConfig) -> Self {
        Self {
            states: Vec::new(),
            counters: AggregateCounters::default(),
            emphasis,
            aabb: Aabb::collapsed(),
            aabb_dirty: false,
        }
    }

    pub fn add_portion(&mut self, transparent: bool, aabb: Aabb) -> PortionId {
        let id = PortionId(self.states.len() as u32);
        self.states.push(PortionState {
            flags: EntityFlags::empty(),
            transparent,
            aabb,
        });
        self.counters.add_portion();
        if transparent {
            self.counters.add_transparent();
        }
        self.aabb_dirty = true;
        id
    }

    pub fn len(&self) -> u32 {
        self.states.len() as u32
    }

    pub fn counters(&self) -> &AggregateCounters {
        &self.counters
    }

    fn check(&self, portion: PortionId) -> Result<()> {
        if portion.0 as usize >= self.states.len() {
            return Err(StrataError::InvalidPortion {
                portion: portion.0,
                count: self.len(),
            });
        }
        Ok(())
    }

    /// Applies a flag write; `Ok(Some(word))` carries the freshly packed
    /// pass word to upload.
    pub fn set_flags(
        &mut self,
        portion: PortionId,
        flags: EntityFlags,
        transparent: bool,
    ) -> Result<FlagChange> {
        self.check(portion)?;
        let state = &mut self.states[portion.0 as usize];
        if state.flags == flags && state.transparent == transparent {
            return Ok(None);
        }
        self.counters.apply_flag_delta(state.flags, flags);
        if state.transparent != transparent {
            if transparent {
                self.counters.add_transparent();
            } else {
                self.counters.remove_transparent();
            }
        }
        state.flags = flags;
        state.transparent = transparent;
        Ok(Some(pack_flags(flags, transparent, &self.emphasis)))
    }

    pub fn aabb(&mut self) -> Aabb {
        if self.aabb_dirty {
            let mut aabb = Aabb::collapsed();
            for state in &self.states {
                aabb.expand(&state.aabb);
            }
            self.aabb = aabb;
            self.aabb_dirty = false;
        }
        self.aabb
    }
}

// ============================================================================
// Deferred update batching
// ============================================================================

/// How one per-portion write should reach the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteMode {
    /// Upload the touched range now.
    Direct,
    /// CPU mirror only; a whole-plane upload happens on the next commit.
    Deferred,
}

/// Per-frame budget tracker for per-portion GPU writes.
///
/// Mass updates (culling sweeps, LOD flips) would otherwise issue one
/// tiny upload per object. After [`MAX_PER_FRAME_UPDATES`] direct writes
/// in a frame the layer stops uploading and coalesces everything into a
/// single whole-plane upload on the next commit tick. Writes made while
/// deferred are not observable on the GPU until that tick.
#[derive(Debug, Default)]
pub(crate) struct DeferredUpdates {
    active: bool,
    dirty: bool,
    direct_this_frame: u32,
}

impl DeferredUpdates {
    /// Registers one write and decides how it reaches the GPU.
    pub fn begin_write(&mut self) -> WriteMode {
        if self.active {
            self.dirty = true;
            return WriteMode::Deferred;
        }
        if self.direct_this_frame >= MAX_PER_FRAME_UPDATES {
            self.active = true;
            self.dirty = true;
            return WriteMode::Deferred;
        }
        self.direct_this_frame += 1;
        WriteMode::Direct
    }

    /// Frame boundary: returns `true` when a coalesced upload is due.
    pub fn on_commit(&mut self) -> bool {
        let flush = self.dirty;
        self.active = false;
        self.dirty = false;
        self.direct_this_frame = 0;
        flush
    }

    /// Destruction or explicit flush also forces the pending upload.
    pub fn take_dirty(&mut self) -> bool {
        let flush = self.dirty;
        self.dirty = false;
        flush
    }
}
