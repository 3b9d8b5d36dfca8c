//! Position quantization to unsigned 16-bit grids.

use glam::{Mat4, Vec3, Vec4};

/// Quantized positions plus everything needed to decode them.
#[derive(Debug, Clone)]
pub struct CompressedPositions {
    /// Flat `[x, y, z]` triples in `[0, 65535]`.
    pub quantized: Vec<u16>,
    /// Affine mapping grid coordinates back to local float space.
    pub decode_matrix: Mat4,
    /// Bounds of the float input.
    pub min: Vec3,
    pub max: Vec3,
}

const RANGE: f32 = 65535.0;

/// Quantizes float positions onto the 16-bit grid spanned by their AABB.
///
/// Per axis: `q = round((p - min) / scale)` with `scale = extent / 65535`,
/// clamped into the grid. The decode matrix is `translate(min) *
/// diag(scale)`, so `decode * [q, 1]` reproduces the input within
/// `extent / 65535` per axis. A degenerate axis (zero extent) maps every
/// point to grid 0 and decodes exactly to `min`.
#[must_use]
pub fn quantize_positions(positions: &[f32]) -> CompressedPositions {
    debug_assert_eq!(positions.len() % 3, 0);

    let mut min = Vec3::splat(f32::INFINITY);
    let mut max = Vec3::splat(f32::NEG_INFINITY);
    for p in positions.chunks_exact(3) {
        let v = Vec3::new(p[0], p[1], p[2]);
        min = min.min(v);
        max = max.max(v);
    }
    if positions.is_empty() {
        min = Vec3::ZERO;
        max = Vec3::ZERO;
    }

    let extent = max - min;
    let scale = Vec3::new(
        if extent.x > 0.0 { extent.x / RANGE } else { 0.0 },
        if extent.y > 0.0 { extent.y / RANGE } else { 0.0 },
        if extent.z > 0.0 { extent.z / RANGE } else { 0.0 },
    );
    let inv = Vec3::new(
        if scale.x > 0.0 { 1.0 / scale.x } else { 0.0 },
        if scale.y > 0.0 { 1.0 / scale.y } else { 0.0 },
        if scale.z > 0.0 { 1.0 / scale.z } else { 0.0 },
    );

    let mut quantized = Vec::with_capacity(positions.len());
    for p in positions.chunks_exact(3) {
        let v = (Vec3::new(p[0], p[1], p[2]) - min) * inv;
        quantized.push(v.x.round().clamp(0.0, RANGE) as u16);
        quantized.push(v.y.round().clamp(0.0, RANGE) as u16);
        quantized.push(v.z.round().clamp(0.0, RANGE) as u16);
    }

    CompressedPositions {
        quantized,
        decode_matrix: decode_matrix(min, scale),
        min,
        max,
    }
}

/// Builds the decode matrix for a known boundary, used when positions
/// arrive pre-compressed with only their AABB.
#[must_use]
pub fn decode_matrix_from_boundary(min: Vec3, max: Vec3) -> Mat4 {
    let extent = max - min;
    let scale = Vec3::new(
        if extent.x > 0.0 { extent.x / RANGE } else { 0.0 },
        if extent.y > 0.0 { extent.y / RANGE } else { 0.0 },
        if extent.z > 0.0 { extent.z / RANGE } else { 0.0 },
    );
    decode_matrix(min, scale)
}

// Non-invertible when an axis is degenerate; only ever used to decode.
fn decode_matrix(min: Vec3, scale: Vec3) -> Mat4 {
    Mat4::from_translation(min) * Mat4::from_scale(scale)
}

/// Decodes one quantized triple through a decode matrix.
#[must_use]
pub fn decompress_position(q: [u16; 3], decode: &Mat4) -> Vec3 {
    let v = *decode * Vec4::new(f32::from(q[0]), f32::from(q[1]), f32::from(q[2]), 1.0);
    v.truncate()
}
