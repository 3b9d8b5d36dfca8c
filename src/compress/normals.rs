//! Octahedral normal encoding.
//!
//! A unit normal folds onto the octahedron and lands in two signed bytes.
//! Decode error stays under a degree, which is plenty for shading and
//! edge emphasis.

use glam::Vec3;

/// Encodes a normal to two signed bytes.
///
/// The input does not need to be normalized; zero-length input encodes as
/// `[0, 0]`.
#[must_use]
pub fn encode_normal(normal: Vec3) -> [i8; 2] {
    let sum = normal.x.abs() + normal.y.abs() + normal.z.abs();
    if sum == 0.0 {
        return [0, 0];
    }
    let mut x = normal.x / sum;
    let mut y = normal.y / sum;
    if normal.z < 0.0 {
        // Fold the lower hemisphere over the diagonals.
        let fx = (1.0 - y.abs()) * sign_not_zero(x);
        let fy = (1.0 - x.abs()) * sign_not_zero(y);
        x = fx;
        y = fy;
    }
    [
        (x * 127.0).round().clamp(-127.0, 127.0) as i8,
        (y * 127.0).round().clamp(-127.0, 127.0) as i8,
    ]
}

/// Decodes an octahedral byte pair back to a unit normal.
#[must_use]
pub fn decode_normal(oct: [i8; 2]) -> Vec3 {
    let mut x = f32::from(oct[0]) / 127.0;
    let mut y = f32::from(oct[1]) / 127.0;
    let z = 1.0 - x.abs() - y.abs();
    if z < 0.0 {
        let fx = (1.0 - y.abs()) * sign_not_zero(x);
        let fy = (1.0 - x.abs()) * sign_not_zero(y);
        x = fx;
        y = fy;
    }
    Vec3::new(x, y, z).normalize_or_zero()
}

/// Encodes a flat `[x, y, z]` normal stream to interleaved byte pairs.
#[must_use]
pub fn encode_normals(normals: &[f32]) -> Vec<i8> {
    debug_assert_eq!(normals.len() % 3, 0);
    let mut out = Vec::with_capacity(normals.len() / 3 * 2);
    for n in normals.chunks_exact(3) {
        let oct = encode_normal(Vec3::new(n[0], n[1], n[2]));
        out.push(oct[0]);
        out.push(oct[1]);
    }
    out
}

fn sign_not_zero(v: f32) -> f32 {
    if v < 0.0 { -1.0 } else { 1.0 }
}
