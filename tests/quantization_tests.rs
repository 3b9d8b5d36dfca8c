//! Quantization and RTC Tests
//!
//! Tests for:
//! - Position quantization round trip and error bound
//! - Decode matrix from explicit boundary
//! - Octahedral normal encode/decode
//! - UV and color quantization
//! - RTC tiling threshold behavior

use glam::{DVec3, Vec3};

use strata::compress::{
    RTC_THRESHOLD, TILE_SIZE, decode_normal, decompress_position, encode_normal,
    quantize_channel, quantize_colors, quantize_positions, quantize_uvs, world_to_rtc,
};

const EPSILON: f32 = 1e-4;

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

// ============================================================================
// Position quantization
// ============================================================================

#[test]
fn quantize_positions_round_trip_within_grid_step() {
    let positions: Vec<f32> = vec![
        -1.0, -2.0, -3.0, //
        4.0, 5.0, 6.0, //
        0.25, -0.75, 2.5, //
        3.999, 4.999, -2.999,
    ];
    let packed = quantize_positions(&positions);

    // Per-axis error bound: extent / 65535.
    let extent = packed.max - packed.min;
    let bound = extent / 65535.0;

    for (i, original) in positions.chunks_exact(3).enumerate() {
        let q = [
            packed.quantized[i * 3],
            packed.quantized[i * 3 + 1],
            packed.quantized[i * 3 + 2],
        ];
        let decoded = decompress_position(q, &packed.decode_matrix);
        assert!((decoded.x - original[0]).abs() <= bound.x + f32::EPSILON);
        assert!((decoded.y - original[1]).abs() <= bound.y + f32::EPSILON);
        assert!((decoded.z - original[2]).abs() <= bound.z + f32::EPSILON);
    }
}

#[test]
fn quantize_positions_extremes_hit_grid_bounds() {
    let positions: Vec<f32> = vec![0.0, 0.0, 0.0, 10.0, 20.0, 30.0];
    let packed = quantize_positions(&positions);
    assert_eq!(&packed.quantized[0..3], &[0, 0, 0]);
    assert_eq!(&packed.quantized[3..6], &[65535, 65535, 65535]);
}

#[test]
fn quantize_positions_degenerate_axis_decodes_to_min() {
    // All points share y; that axis collapses to grid zero.
    let positions: Vec<f32> = vec![0.0, 5.0, 0.0, 2.0, 5.0, 4.0];
    let packed = quantize_positions(&positions);
    let decoded = decompress_position([0, 0, 0], &packed.decode_matrix);
    assert!(approx(decoded.y, 5.0));
}

// ============================================================================
// Normals
// ============================================================================

#[test]
fn oct_normal_round_trip() {
    let cases = [
        Vec3::X,
        Vec3::Y,
        Vec3::Z,
        -Vec3::Z,
        Vec3::new(1.0, 1.0, 1.0).normalize(),
        Vec3::new(-0.3, 0.8, -0.6).normalize(),
    ];
    for normal in cases {
        let decoded = decode_normal(encode_normal(normal));
        // Byte-quantized octahedral encoding stays within ~1 degree.
        assert!(
            normal.dot(decoded) > 0.9998,
            "normal {normal:?} decoded to {decoded:?}"
        );
    }
}

#[test]
fn oct_normal_zero_input() {
    assert_eq!(encode_normal(Vec3::ZERO), [0, 0]);
}

// ============================================================================
// UVs and colors
// ============================================================================

#[test]
fn quantize_uvs_round_trip() {
    let uvs: Vec<f32> = vec![0.0, 0.0, 1.0, 1.0, 0.25, 0.75];
    let packed = quantize_uvs(&uvs);
    for (i, original) in uvs.chunks_exact(2).enumerate() {
        let decoded = strata::compress::decompress_uv(
            [packed.quantized[i * 2], packed.quantized[i * 2 + 1]],
            &packed.decode_matrix,
        );
        assert!(approx(decoded.x, original[0]));
        assert!(approx(decoded.y, original[1]));
    }
}

#[test]
fn quantize_colors_rgb_gets_opaque_alpha() {
    let colors = quantize_colors(&[1.0, 0.5, 0.0], 3);
    assert_eq!(colors, vec![255, 128, 0, 255]);
}

#[test]
fn quantize_colors_rgba_keeps_alpha() {
    let colors = quantize_colors(&[0.0, 0.0, 0.0, 0.5], 4);
    assert_eq!(colors[3], 128);
}

#[test]
fn quantize_channel_clamps() {
    assert_eq!(quantize_channel(-1.0), 0);
    assert_eq!(quantize_channel(2.0), 255);
}

// ============================================================================
// RTC
// ============================================================================

#[test]
fn rtc_not_triggered_below_threshold() {
    let positions: Vec<f64> = vec![99_999.0, 0.0, 0.0, 99_998.0, 1.0, 1.0];
    let mut rtc = Vec::new();
    let (center, needed) = world_to_rtc(&positions, &mut rtc);
    assert!(!needed);
    assert_eq!(center, DVec3::ZERO);
    // Without a shift the residuals are the plain downcast.
    assert!((rtc[0] - 99_999.0).abs() < 8.0);
}

#[test]
fn rtc_triggered_above_threshold() {
    let positions: Vec<f64> = vec![100_001.0, 0.0, 0.0, 100_002.0, 0.0, 0.0];
    let mut rtc = Vec::new();
    let (center, needed) = world_to_rtc(&positions, &mut rtc);
    assert!(needed);
    // Tile-aligned center near the centroid.
    assert_eq!(center.x % TILE_SIZE, 0.0);
    assert!(center.x > 0.0);
    // Residuals reproduce the input exactly when added back.
    assert!((f64::from(rtc[0]) + center.x - 100_001.0).abs() < 1e-3);
    assert!((f64::from(rtc[3]) + center.x - 100_002.0).abs() < 1e-3);
}

#[test]
fn rtc_threshold_boundary_pair() {
    let mut rtc = Vec::new();

    let below: Vec<f64> = vec![RTC_THRESHOLD - 1.0, 0.0, 0.0];
    let (_, needed) = world_to_rtc(&below, &mut rtc);
    assert!(!needed);

    let above: Vec<f64> = vec![RTC_THRESHOLD + 1.0, 0.0, 0.0];
    let (_, needed) = world_to_rtc(&above, &mut rtc);
    assert!(needed);
}

#[test]
fn rtc_huge_coordinates_keep_precision() {
    let positions: Vec<f64> = vec![1e8 + 0.5, 0.0, 1e8 - 0.25];
    let mut rtc = Vec::new();
    let (center, needed) = world_to_rtc(&positions, &mut rtc);
    assert!(needed);
    // The residual is small enough for f32 to hold sub-millimeter detail.
    assert!((f64::from(rtc[0]) + center.x - (1e8 + 0.5)).abs() < 1e-3);
    assert!((f64::from(rtc[2]) + center.z - (1e8 - 0.25)).abs() < 1e-3);
}
