//! Geometry descriptors and the operations that normalize them.
//!
//! A [`Geometry`] is immutable once registered: positions already
//! quantized, normals oct-encoded, edges extracted, UVs and colors
//! compressed. The registry hands out `Arc`s so instanced and
//! data-texture layers share one copy; DTX bucket lists are built lazily
//! per geometry and shared the same way.

pub mod buckets;
pub mod edges;
pub mod registry;

pub use buckets::{Bucket, BucketingOptions, IndexWidth, build_buckets};
pub use edges::{build_edge_indices, build_edge_indices_f32};
pub use registry::GeometryRegistry;

use glam::{DVec3, Mat3, Mat4, Vec3, Vec4};
use parking_lot::RwLock;
use std::sync::Arc;

use crate::compress;
use crate::errors::{Result, StrataError};

/// Primitive topology of a geometry.
///
/// `Solid` and `Surface` both rasterize as triangles; `Solid` promises a
/// watertight mesh (backface culling stays on), `Surface` is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveKind {
    Points,
    Lines,
    #[default]
    Triangles,
    Solid,
    Surface,
}

impl PrimitiveKind {
    /// Everything that rasterizes as triangles.
    #[must_use]
    pub fn is_triangle_like(self) -> bool {
        matches!(
            self,
            PrimitiveKind::Triangles | PrimitiveKind::Solid | PrimitiveKind::Surface
        )
    }

    /// Points are the only unindexed primitive.
    #[must_use]
    pub fn is_indexed(self) -> bool {
        self != PrimitiveKind::Points
    }

    /// Vertices consumed per drawn item.
    #[must_use]
    pub fn verts_per_item(self) -> usize {
        match self {
            PrimitiveKind::Points => 1,
            PrimitiveKind::Lines => 2,
            _ => 3,
        }
    }
}

impl std::fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PrimitiveKind::Points => "points",
            PrimitiveKind::Lines => "lines",
            PrimitiveKind::Triangles => "triangles",
            PrimitiveKind::Solid => "solid",
            PrimitiveKind::Surface => "surface",
        };
        f.write_str(name)
    }
}

/// Authoring configuration for [`GeometryRegistry::create_geometry`].
///
/// Positions arrive either raw (`positions`, double precision, will be
/// RTC-split and quantized) or pre-compressed (`positions_compressed`
/// plus exactly one of `decode_matrix` / `decode_boundary`).
#[derive(Debug, Clone, Default)]
pub struct GeometryCfg {
    pub id: String,
    pub primitive: PrimitiveKind,
    pub positions: Option<Vec<f64>>,
    pub positions_compressed: Option<Vec<u16>>,
    pub decode_matrix: Option<Mat4>,
    /// Local AABB `(min, max)` of the uncompressed positions; an
    /// alternative way to supply the decode mapping.
    pub decode_boundary: Option<(Vec3, Vec3)>,
    pub indices: Option<Vec<u32>>,
    pub normals: Option<Vec<f32>>,
    pub uv: Option<Vec<f32>>,
    pub uv_compressed: Option<Vec<u16>>,
    pub uv_decode_matrix: Option<Mat3>,
    pub colors: Option<Vec<f32>>,
    pub colors_compressed: Option<Vec<u8>>,
    pub edge_indices: Option<Vec<u32>>,
    /// Crease angle in degrees for automatic edge extraction.
    pub edge_threshold_angle: Option<f32>,
}

impl GeometryCfg {
    #[must_use]
    pub fn new(id: impl Into<String>, primitive: PrimitiveKind) -> Self {
        Self {
            id: id.into(),
            primitive,
            ..Self::default()
        }
    }
}

/// Default crease angle for registry-level edge extraction, in degrees.
pub const DEFAULT_EDGE_THRESHOLD_DEG: f32 = 10.0;

/// An immutable, fully normalized geometry.
#[derive(Debug)]
pub struct Geometry {
    pub id: String,
    pub primitive: PrimitiveKind,
    /// Flat `[x, y, z]` grid triples.
    pub positions_compressed: Vec<u16>,
    pub decode_matrix: Mat4,
    /// Local-space bounds of the decoded positions.
    pub local_min: Vec3,
    pub local_max: Vec3,
    /// RTC center split off raw positions; zero unless the coordinates
    /// exceeded the RTC threshold.
    pub origin: DVec3,
    pub indices: Option<Vec<u32>>,
    pub edge_indices: Option<Vec<u32>>,
    /// Octahedral byte pairs, interleaved.
    pub normals_oct: Option<Vec<i8>>,
    pub uv_compressed: Option<Vec<u16>>,
    pub uv_decode_matrix: Option<Mat3>,
    pub colors_compressed: Option<Vec<u8>>,

    // Bucket lists are built on first DTX use and shared across every
    // instance of the geometry.
    buckets: RwLock<Option<Arc<Vec<Bucket>>>>,
}

impl Geometry {
    /// Validates and normalizes an authoring configuration.
    pub fn from_cfg(cfg: GeometryCfg) -> Result<Self> {
        let GeometryCfg {
            id,
            primitive,
            positions,
            positions_compressed,
            decode_matrix,
            decode_boundary,
            indices,
            normals,
            uv,
            uv_compressed,
            uv_decode_matrix,
            colors,
            colors_compressed,
            edge_indices,
            edge_threshold_angle,
        } = cfg;

        if positions.is_some() && positions_compressed.is_some() {
            return Err(StrataError::IncompatibleParams(
                "positions and positions_compressed",
            ));
        }
        if positions.is_some() && (decode_matrix.is_some() || decode_boundary.is_some()) {
            return Err(StrataError::IncompatibleParams(
                "raw positions cannot carry a decode matrix or boundary",
            ));
        }
        if uv.is_some() && uv_compressed.is_some() {
            return Err(StrataError::IncompatibleParams("uv and uv_compressed"));
        }
        if uv_compressed.is_some() && uv_decode_matrix.is_none() {
            return Err(StrataError::MissingParam("uv_decode_matrix"));
        }
        if colors.is_some() && colors_compressed.is_some() {
            return Err(StrataError::IncompatibleParams(
                "colors and colors_compressed",
            ));
        }

        // Normalize positions into the compressed form.
        let (positions_compressed, decode_matrix, local_min, local_max, origin) =
            match (positions, positions_compressed) {
                (Some(raw), None) => {
                    if raw.is_empty() {
                        return Err(StrataError::EmptyGeometry { id });
                    }
                    let mut rtc = Vec::new();
                    let (center, _shifted) = compress::world_to_rtc(&raw, &mut rtc);
                    let packed = compress::quantize_positions(&rtc);
                    (
                        packed.quantized,
                        packed.decode_matrix,
                        packed.min,
                        packed.max,
                        center,
                    )
                }
                (None, Some(compressed)) => {
                    if compressed.is_empty() {
                        return Err(StrataError::EmptyGeometry { id });
                    }
                    let decode = match (decode_matrix, decode_boundary) {
                        (Some(_), Some(_)) => {
                            return Err(StrataError::IncompatibleParams(
                                "decode_matrix and decode_boundary",
                            ));
                        }
                        (Some(m), None) => m,
                        (None, Some((min, max))) => {
                            compress::decode_matrix_from_boundary(min, max)
                        }
                        (None, None) => {
                            return Err(StrataError::MissingParam(
                                "decode_matrix or decode_boundary",
                            ));
                        }
                    };
                    let (min, max) = grid_corners(&decode);
                    (compressed, decode, min, max, DVec3::ZERO)
                }
                (None, None) => return Err(StrataError::MissingParam("positions")),
                (Some(_), Some(_)) => unreachable!(),
            };

        let num_vertices = (positions_compressed.len() / 3) as u32;

        // Indexed primitives always end up with indices; identity when
        // the caller omitted them.
        let indices = if primitive.is_indexed() {
            Some(indices.unwrap_or_else(|| (0..num_vertices).collect()))
        } else {
            indices
        };

        let edge_indices = if primitive.is_triangle_like() {
            match edge_indices {
                Some(e) => Some(e),
                None => {
                    let threshold = edge_threshold_angle.unwrap_or(DEFAULT_EDGE_THRESHOLD_DEG);
                    indices.as_ref().map(|idx| {
                        build_edge_indices(&positions_compressed, idx, threshold)
                    })
                }
            }
        } else {
            None
        };

        let colors_compressed = match (colors, colors_compressed) {
            (Some(float_colors), None) => Some(compress::quantize_colors(&float_colors, 4)),
            (None, packed) => packed,
            (Some(_), Some(_)) => unreachable!(),
        };

        let (uv_compressed, uv_decode_matrix) = match (uv, uv_compressed) {
            (Some(float_uv), None) => {
                let packed = compress::quantize_uvs(&float_uv);
                (Some(packed.quantized), Some(packed.decode_matrix))
            }
            (None, packed) => (packed, uv_decode_matrix),
            (Some(_), Some(_)) => unreachable!(),
        };

        let normals_oct = normals.map(|n| compress::encode_normals(&n));

        Ok(Self {
            id,
            primitive,
            positions_compressed,
            decode_matrix,
            local_min,
            local_max,
            origin,
            indices,
            edge_indices,
            normals_oct,
            uv_compressed,
            uv_decode_matrix,
            colors_compressed,
            buckets: RwLock::new(None),
        })
    }

    #[must_use]
    pub fn num_vertices(&self) -> u32 {
        (self.positions_compressed.len() / 3) as u32
    }

    /// Drawn items (triangles, segments, or points).
    #[must_use]
    pub fn num_items(&self) -> u64 {
        match self.primitive {
            PrimitiveKind::Points => u64::from(self.num_vertices()),
            _ => {
                let index_count = self.indices.as_ref().map_or(0, Vec::len) as u64;
                index_count / self.primitive.verts_per_item() as u64
            }
        }
    }

    /// Bucket list for the data-texture path, built once and shared.
    pub fn buckets(&self, options: BucketingOptions) -> Arc<Vec<Bucket>> {
        if let Some(existing) = self.buckets.read().as_ref() {
            return Arc::clone(existing);
        }
        let built = Arc::new(build_buckets(
            &self.positions_compressed,
            self.indices.as_deref().unwrap_or(&[]),
            self.edge_indices.as_deref().unwrap_or(&[]),
            self.primitive.verts_per_item(),
            options,
        ));
        let mut slot = self.buckets.write();
        // A racing builder may have won; keep the first.
        if let Some(existing) = slot.as_ref() {
            return Arc::clone(existing);
        }
        *slot = Some(Arc::clone(&built));
        built
    }
}

/// Decoded bounds of the full quantization grid.
fn grid_corners(decode: &Mat4) -> (Vec3, Vec3) {
    let lo = (*decode * Vec4::new(0.0, 0.0, 0.0, 1.0)).truncate();
    let hi = (*decode * Vec4::new(65535.0, 65535.0, 65535.0, 1.0)).truncate();
    (lo.min(hi), lo.max(hi))
}
