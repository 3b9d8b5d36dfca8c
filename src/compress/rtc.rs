//! Relative-to-center (RTC) decomposition.
//!
//! A position at 1e8 has under a meter of float32 precision. Subtracting
//! a tile-aligned double-precision center first keeps the residuals small
//! enough for 32-bit GPU math; the center travels with the layer as its
//! origin.

use glam::DVec3;

/// Edge length of the world tiling grid, in world units.
pub const TILE_SIZE: f64 = 1000.0;

/// Coordinate magnitude above which float32 precision is no longer
/// acceptable and positions must be re-centered.
pub const RTC_THRESHOLD: f64 = 1e5;

/// Splits world positions into a tile-aligned center and local residuals.
///
/// The center is the corner of the [`TILE_SIZE`] tile containing the
/// centroid of the input. Residuals are written to `out_rtc` as f32.
/// Returns `true` iff any input coordinate magnitude exceeded
/// [`RTC_THRESHOLD`]; callers only shift a layer origin when this fires,
/// so small models keep their identity origin and their layer keys.
pub fn world_to_rtc(positions: &[f64], out_rtc: &mut Vec<f32>) -> (DVec3, bool) {
    debug_assert_eq!(positions.len() % 3, 0);

    out_rtc.clear();
    if positions.is_empty() {
        return (DVec3::ZERO, false);
    }

    let mut sum = DVec3::ZERO;
    let mut needed = false;
    for p in positions.chunks_exact(3) {
        sum += DVec3::new(p[0], p[1], p[2]);
        if p[0].abs() > RTC_THRESHOLD || p[1].abs() > RTC_THRESHOLD || p[2].abs() > RTC_THRESHOLD {
            needed = true;
        }
    }
    // Identity center when nothing exceeded the threshold, so the output
    // plus the returned center always reproduces the input.
    let center = if needed {
        let mean = sum / (positions.len() / 3) as f64;
        DVec3::new(
            (mean.x / TILE_SIZE).floor() * TILE_SIZE,
            (mean.y / TILE_SIZE).floor() * TILE_SIZE,
            (mean.z / TILE_SIZE).floor() * TILE_SIZE,
        )
    } else {
        DVec3::ZERO
    };

    out_rtc.reserve(positions.len());
    for p in positions.chunks_exact(3) {
        out_rtc.push((p[0] - center.x) as f32);
        out_rtc.push((p[1] - center.y) as f32);
        out_rtc.push((p[2] - center.z) as f32);
    }

    (center, needed)
}
