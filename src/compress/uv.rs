//! UV quantization to 16-bit grids with a 3x3 decode matrix.

use glam::{Mat3, Vec2};

const RANGE: f32 = 65535.0;

/// Quantized UVs plus their decode matrix.
#[derive(Debug, Clone)]
pub struct CompressedUvs {
    /// Flat `[u, v]` pairs in `[0, 65535]`.
    pub quantized: Vec<u16>,
    /// Column-major `[sx 0 0; 0 sy 0; tx ty 1]`.
    pub decode_matrix: Mat3,
}

/// Quantizes float UV pairs onto the grid spanned by their bounds.
#[must_use]
pub fn quantize_uvs(uvs: &[f32]) -> CompressedUvs {
    debug_assert_eq!(uvs.len() % 2, 0);

    let mut min = Vec2::splat(f32::INFINITY);
    let mut max = Vec2::splat(f32::NEG_INFINITY);
    for uv in uvs.chunks_exact(2) {
        let v = Vec2::new(uv[0], uv[1]);
        min = min.min(v);
        max = max.max(v);
    }
    if uvs.is_empty() {
        min = Vec2::ZERO;
        max = Vec2::ZERO;
    }

    let extent = max - min;
    let scale = Vec2::new(
        if extent.x > 0.0 { extent.x / RANGE } else { 0.0 },
        if extent.y > 0.0 { extent.y / RANGE } else { 0.0 },
    );
    let inv = Vec2::new(
        if scale.x > 0.0 { 1.0 / scale.x } else { 0.0 },
        if scale.y > 0.0 { 1.0 / scale.y } else { 0.0 },
    );

    let mut quantized = Vec::with_capacity(uvs.len());
    for uv in uvs.chunks_exact(2) {
        let v = (Vec2::new(uv[0], uv[1]) - min) * inv;
        quantized.push(v.x.round().clamp(0.0, RANGE) as u16);
        quantized.push(v.y.round().clamp(0.0, RANGE) as u16);
    }

    let decode_matrix = Mat3::from_cols_array(&[
        scale.x, 0.0, 0.0, //
        0.0, scale.y, 0.0, //
        min.x, min.y, 1.0,
    ]);

    CompressedUvs {
        quantized,
        decode_matrix,
    }
}

/// Decodes one quantized UV pair.
#[must_use]
pub fn decompress_uv(q: [u16; 2], decode: &Mat3) -> Vec2 {
    let v = *decode * glam::Vec3::new(f32::from(q[0]), f32::from(q[1]), 1.0);
    Vec2::new(v.x, v.y)
}
