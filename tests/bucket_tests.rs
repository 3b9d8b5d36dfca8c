//! Bucketing Tests
//!
//! Tests for:
//! - Index width selection at the 8/16/32-bit boundaries
//! - Vertex uniquification with index/edge rewriting
//! - Passthrough when both optimizations are disabled
//! - Greedy splitting of oversized geometries
//! - Bucket list sharing across data-texture instances

use strata::geometry::{BucketingOptions, GeometryCfg, IndexWidth, PrimitiveKind, build_buckets};

// ============================================================================
// Index width boundaries
// ============================================================================

#[test]
fn index_width_boundary_pairs() {
    assert_eq!(IndexWidth::for_vertex_count(1), IndexWidth::U8);
    assert_eq!(IndexWidth::for_vertex_count(256), IndexWidth::U8);
    assert_eq!(IndexWidth::for_vertex_count(257), IndexWidth::U16);
    assert_eq!(IndexWidth::for_vertex_count(65536), IndexWidth::U16);
    assert_eq!(IndexWidth::for_vertex_count(65537), IndexWidth::U32);
}

#[test]
fn index_width_bytes() {
    assert_eq!(IndexWidth::U8.bytes(), 1);
    assert_eq!(IndexWidth::U16.bytes(), 2);
    assert_eq!(IndexWidth::U32.bytes(), 4);
}

// ============================================================================
// Uniquification
// ============================================================================

#[test]
fn uniquify_merges_identical_triples() {
    // Two triangles sharing an edge, written with duplicated vertices.
    let positions: Vec<u16> = vec![
        0, 0, 0, //
        100, 0, 0, //
        0, 100, 0, //
        100, 0, 0, // duplicate of vertex 1
        100, 100, 0, //
        0, 100, 0, // duplicate of vertex 2
    ];
    let indices = vec![0, 1, 2, 3, 4, 5];
    let edges = vec![0, 1, 3, 4];

    let buckets = build_buckets(
        &positions,
        &indices,
        &edges,
        3,
        BucketingOptions {
            uniquify: true,
            rebucket: true,
        },
    );
    assert_eq!(buckets.len(), 1);
    let bucket = &buckets[0];
    assert_eq!(bucket.num_vertices(), 4);
    assert_eq!(bucket.index_width, IndexWidth::U8);
    // Rewritten indices still describe two triangles over four verts.
    assert_eq!(bucket.indices.len(), 6);
    assert!(bucket.indices.iter().all(|&i| i < 4));
    assert!(bucket.edge_indices.iter().all(|&i| i < 4));
}

#[test]
fn passthrough_when_disabled() {
    let positions: Vec<u16> = vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 0, 0, 0];
    let indices = vec![0, 1, 2, 1, 2, 3];
    let buckets = build_buckets(
        &positions,
        &indices,
        &[],
        3,
        BucketingOptions {
            uniquify: false,
            rebucket: false,
        },
    );
    assert_eq!(buckets.len(), 1);
    // The duplicate triple survives untouched.
    assert_eq!(buckets[0].num_vertices(), 4);
    assert_eq!(buckets[0].indices, indices);
}

// ============================================================================
// Splitting
// ============================================================================

#[test]
fn oversized_geometry_splits_into_width_bounded_buckets() {
    // 70000 unique vertices in a triangle strip shape: forces a split
    // past the 16-bit cap.
    let vert_count: u32 = 70_000;
    let mut positions: Vec<u16> = Vec::with_capacity(vert_count as usize * 3);
    for i in 0..vert_count {
        positions.extend_from_slice(&[(i % 65_536) as u16, (i / 65_536) as u16, 0]);
    }
    let mut indices = Vec::new();
    for i in 0..vert_count - 2 {
        indices.extend_from_slice(&[i, i + 1, i + 2]);
    }

    let buckets = build_buckets(&positions, &indices, &[], 3, BucketingOptions::default());
    assert!(buckets.len() >= 2);
    let mut total_items = 0;
    for bucket in &buckets {
        assert!(bucket.num_vertices() as usize <= 1 << 16);
        assert_ne!(bucket.index_width, IndexWidth::U32);
        total_items += bucket.indices.len() / 3;
    }
    // Every input triangle landed in exactly one bucket.
    assert_eq!(total_items as u32, vert_count - 2);
}

#[test]
fn small_geometry_stays_single_bucket() {
    let positions: Vec<u16> = (0..100u16).flat_map(|i| [i, 0, 0]).collect();
    let indices: Vec<u32> = (0..98).flat_map(|i| [i, i + 1, i + 2]).collect();
    let buckets = build_buckets(&positions, &indices, &[], 3, BucketingOptions::default());
    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].index_width, IndexWidth::U8);
}

// ============================================================================
// Sharing through the geometry
// ============================================================================

#[test]
fn geometry_shares_one_bucket_list() {
    let mut cfg = GeometryCfg::new("tri", PrimitiveKind::Triangles);
    cfg.positions = Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    let geometry = strata::Geometry::from_cfg(cfg).unwrap();

    let first = geometry.buckets(BucketingOptions::default());
    let second = geometry.buckets(BucketingOptions::default());
    assert!(std::sync::Arc::ptr_eq(&first, &second));
    assert_eq!(first.len(), 1);
}
