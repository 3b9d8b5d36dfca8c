//! Edge extraction for silhouette emphasis.
//!
//! An edge is emitted when it borders exactly one triangle, or when the
//! two adjacent face normals disagree by more than the crease threshold.
//! The registry runs this on quantized grid coordinates; the batched mesh
//! pipeline runs it on raw float positions before layer-level
//! quantization. The per-axis grid scale distorts angles slightly, which
//! the default thresholds already account for.

use glam::Vec3;
use rustc_hash::FxHashMap;

#[derive(Clone, Copy)]
struct EdgeRecord {
    normal: Vec3,
    faces: u32,
    creased: bool,
}

/// Extracts silhouette edges from quantized positions.
///
/// `threshold_deg` is the crease angle: adjacent faces whose normals
/// differ by no more than this keep their shared edge hidden.
#[must_use]
pub fn build_edge_indices(
    positions_compressed: &[u16],
    indices: &[u32],
    threshold_deg: f32,
) -> Vec<u32> {
    build_edges(
        |i| {
            let base = i as usize * 3;
            Vec3::new(
                f32::from(positions_compressed[base]),
                f32::from(positions_compressed[base + 1]),
                f32::from(positions_compressed[base + 2]),
            )
        },
        indices,
        threshold_deg,
    )
}

/// [`build_edge_indices`] over raw float positions.
#[must_use]
pub fn build_edge_indices_f32(positions: &[f32], indices: &[u32], threshold_deg: f32) -> Vec<u32> {
    build_edges(
        |i| {
            let base = i as usize * 3;
            Vec3::new(positions[base], positions[base + 1], positions[base + 2])
        },
        indices,
        threshold_deg,
    )
}

fn build_edges(vertex: impl Fn(u32) -> Vec3, indices: &[u32], threshold_deg: f32) -> Vec<u32> {
    let cos_threshold = threshold_deg.to_radians().cos();
    let mut edges: FxHashMap<(u32, u32), EdgeRecord> = FxHashMap::default();

    for tri in indices.chunks_exact(3) {
        let (a, b, c) = (tri[0], tri[1], tri[2]);
        let normal = (vertex(b) - vertex(a))
            .cross(vertex(c) - vertex(a))
            .normalize_or_zero();

        for (u, v) in [(a, b), (b, c), (c, a)] {
            let key = (u.min(v), u.max(v));
            edges
                .entry(key)
                .and_modify(|record| {
                    record.faces += 1;
                    // Compare against the first face seen; degenerate
                    // faces never hide an edge.
                    let dot = record.normal.dot(normal);
                    if record.normal == Vec3::ZERO || normal == Vec3::ZERO || dot < cos_threshold {
                        record.creased = true;
                    }
                })
                .or_insert(EdgeRecord {
                    normal,
                    faces: 1,
                    creased: false,
                });
        }
    }

    // Hash iteration order is arbitrary; sort for a stable buffer.
    let mut pairs: Vec<(u32, u32)> = edges
        .into_iter()
        .filter(|(_, record)| record.faces == 1 || record.creased)
        .map(|(key, _)| key)
        .collect();
    pairs.sort_unstable();
    pairs.into_iter().flat_map(|(u, v)| [u, v]).collect()
}
