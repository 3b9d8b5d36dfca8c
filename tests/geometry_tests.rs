//! Geometry and Aabb Tests
//!
//! Tests for:
//! - Aabb collapse, expand, union, translate, OBB transform
//! - Geometry registry validation rules
//! - Automatic identity indices and edge extraction
//! - Primitive kind classification

use glam::{DMat4, DVec3, Mat4, Vec3};

use strata::geometry::{GeometryCfg, GeometryRegistry, PrimitiveKind};
use strata::math::Aabb;
use strata::{Result, StrataError};

const EPSILON: f64 = 1e-9;

fn dvec_approx(a: DVec3, b: DVec3) -> bool {
    (a - b).abs().max_element() < EPSILON
}

/// 24-vertex unit cube (±1) with 36 indices.
fn cube_positions() -> Vec<f64> {
    vec![
        // +z
        -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0, 1.0, 1.0, -1.0, 1.0, 1.0, //
        // -z
        -1.0, -1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, -1.0, -1.0, //
        // +y
        -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, -1.0, //
        // -y
        -1.0, -1.0, -1.0, 1.0, -1.0, -1.0, 1.0, -1.0, 1.0, -1.0, -1.0, 1.0, //
        // +x
        1.0, -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0, 1.0, 1.0, -1.0, 1.0, //
        // -x
        -1.0, -1.0, -1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, -1.0,
    ]
}

fn cube_indices() -> Vec<u32> {
    vec![
        0, 1, 2, 0, 2, 3, //
        4, 5, 6, 4, 6, 7, //
        8, 9, 10, 8, 10, 11, //
        12, 13, 14, 12, 14, 15, //
        16, 17, 18, 16, 18, 19, //
        20, 21, 22, 20, 22, 23,
    ]
}

fn register_cube(registry: &mut GeometryRegistry) -> Result<std::sync::Arc<strata::Geometry>> {
    let mut cfg = GeometryCfg::new("box", PrimitiveKind::Triangles);
    cfg.positions = Some(cube_positions());
    cfg.indices = Some(cube_indices());
    registry.create_geometry(cfg)
}

// ============================================================================
// Aabb
// ============================================================================

#[test]
fn aabb_collapsed_expands_to_first_point() {
    let mut aabb = Aabb::collapsed();
    assert!(aabb.is_collapsed());
    aabb.expand_point(DVec3::new(1.0, 2.0, 3.0));
    assert!(!aabb.is_collapsed());
    assert!(dvec_approx(aabb.min, DVec3::new(1.0, 2.0, 3.0)));
    assert!(dvec_approx(aabb.max, DVec3::new(1.0, 2.0, 3.0)));
}

#[test]
fn aabb_union() {
    let a = Aabb::new(DVec3::splat(-1.0), DVec3::splat(1.0));
    let b = Aabb::new(DVec3::ZERO, DVec3::splat(3.0));
    let u = a.union(&b);
    assert!(dvec_approx(u.min, DVec3::splat(-1.0)));
    assert!(dvec_approx(u.max, DVec3::splat(3.0)));
}

#[test]
fn aabb_translated() {
    let aabb = Aabb::new(DVec3::ZERO, DVec3::ONE);
    let moved = aabb.translated(DVec3::new(10.0, 20.0, 30.0));
    assert!(dvec_approx(moved.min, DVec3::new(10.0, 20.0, 30.0)));
    assert!(dvec_approx(moved.max, DVec3::new(11.0, 21.0, 31.0)));
}

#[test]
fn aabb_transform_rotation_expands() {
    let aabb = Aabb::new(DVec3::ZERO, DVec3::new(1.0, 0.0, 0.0));
    // 90 degrees around Y: (1,0,0) -> (0,0,-1).
    let mat = DMat4::from_rotation_y(std::f64::consts::FRAC_PI_2);
    let out = aabb.transformed(&mat);
    assert!(out.min.z <= -0.999);
    assert!(out.max.x >= -1e-9);
}

#[test]
fn aabb_from_local_applies_matrix_then_origin() {
    let local_matrix = Mat4::from_scale(Vec3::splat(2.0));
    let origin = DVec3::new(100.0, 0.0, 0.0);
    let aabb = Aabb::from_local(Vec3::splat(-1.0), Vec3::splat(1.0), &local_matrix, origin);
    assert!(dvec_approx(aabb.min, DVec3::new(98.0, -2.0, -2.0)));
    assert!(dvec_approx(aabb.max, DVec3::new(102.0, 2.0, 2.0)));
}

// ============================================================================
// Registry validation
// ============================================================================

#[test]
fn registry_registers_and_normalizes() {
    let mut registry = GeometryRegistry::new();
    let geometry = register_cube(&mut registry).unwrap();
    assert_eq!(geometry.num_vertices(), 24);
    assert_eq!(geometry.num_items(), 12);
    assert_eq!(geometry.positions_compressed.len(), 72);
    // Every cube edge is a crease; the extractor keeps them all.
    assert!(geometry.edge_indices.as_ref().is_some_and(|e| !e.is_empty()));
}

#[test]
fn registry_rejects_duplicate_id() {
    let mut registry = GeometryRegistry::new();
    register_cube(&mut registry).unwrap();
    let err = register_cube(&mut registry).unwrap_err();
    assert!(matches!(err, StrataError::DuplicateId { kind: "geometry", .. }));
}

#[test]
fn registry_rejects_empty_geometry() {
    let mut registry = GeometryRegistry::new();
    let mut cfg = GeometryCfg::new("empty", PrimitiveKind::Triangles);
    cfg.positions = Some(Vec::new());
    let err = registry.create_geometry(cfg).unwrap_err();
    assert!(matches!(err, StrataError::EmptyGeometry { .. }));
}

#[test]
fn registry_rejects_missing_positions() {
    let mut registry = GeometryRegistry::new();
    let cfg = GeometryCfg::new("nothing", PrimitiveKind::Triangles);
    let err = registry.create_geometry(cfg).unwrap_err();
    assert!(matches!(err, StrataError::MissingParam("positions")));
}

#[test]
fn registry_rejects_compressed_without_decode_source() {
    let mut registry = GeometryRegistry::new();
    let mut cfg = GeometryCfg::new("packed", PrimitiveKind::Triangles);
    cfg.positions_compressed = Some(vec![0, 0, 0, 65535, 65535, 65535]);
    let err = registry.create_geometry(cfg).unwrap_err();
    assert!(matches!(err, StrataError::MissingParam(_)));
}

#[test]
fn registry_rejects_decode_matrix_and_boundary_together() {
    let mut registry = GeometryRegistry::new();
    let mut cfg = GeometryCfg::new("packed", PrimitiveKind::Triangles);
    cfg.positions_compressed = Some(vec![0, 0, 0, 65535, 65535, 65535]);
    cfg.decode_matrix = Some(Mat4::IDENTITY);
    cfg.decode_boundary = Some((Vec3::ZERO, Vec3::ONE));
    let err = registry.create_geometry(cfg).unwrap_err();
    assert!(matches!(err, StrataError::IncompatibleParams(_)));
}

#[test]
fn registry_rejects_raw_positions_with_decode_matrix() {
    let mut registry = GeometryRegistry::new();
    let mut cfg = GeometryCfg::new("mixed", PrimitiveKind::Triangles);
    cfg.positions = Some(cube_positions());
    cfg.decode_matrix = Some(Mat4::IDENTITY);
    let err = registry.create_geometry(cfg).unwrap_err();
    assert!(matches!(err, StrataError::IncompatibleParams(_)));
}

#[test]
fn registry_rejects_uv_compressed_without_decode() {
    let mut registry = GeometryRegistry::new();
    let mut cfg = GeometryCfg::new("uvs", PrimitiveKind::Triangles);
    cfg.positions = Some(cube_positions());
    cfg.indices = Some(cube_indices());
    cfg.uv_compressed = Some(vec![0; 48]);
    let err = registry.create_geometry(cfg).unwrap_err();
    assert!(matches!(err, StrataError::MissingParam("uv_decode_matrix")));
}

#[test]
fn registry_auto_generates_identity_indices() {
    let mut registry = GeometryRegistry::new();
    let mut cfg = GeometryCfg::new("tri", PrimitiveKind::Triangles);
    cfg.positions = Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    let geometry = registry.create_geometry(cfg).unwrap();
    assert_eq!(geometry.indices.as_deref(), Some(&[0u32, 1, 2][..]));
}

#[test]
fn registry_points_have_no_indices_or_edges() {
    let mut registry = GeometryRegistry::new();
    let mut cfg = GeometryCfg::new("cloud", PrimitiveKind::Points);
    cfg.positions = Some(vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
    let geometry = registry.create_geometry(cfg).unwrap();
    assert!(geometry.indices.is_none());
    assert!(geometry.edge_indices.is_none());
    assert_eq!(geometry.num_items(), 2);
}

#[test]
fn registry_decode_boundary_reproduces_bounds() {
    let mut registry = GeometryRegistry::new();
    let mut cfg = GeometryCfg::new("packed", PrimitiveKind::Triangles);
    cfg.positions_compressed = Some(vec![0, 0, 0, 65535, 65535, 65535]);
    cfg.decode_boundary = Some((Vec3::new(-2.0, -4.0, -8.0), Vec3::new(2.0, 4.0, 8.0)));
    let geometry = registry.create_geometry(cfg).unwrap();
    assert!((geometry.local_min - Vec3::new(-2.0, -4.0, -8.0)).abs().max_element() < 1e-3);
    assert!((geometry.local_max - Vec3::new(2.0, 4.0, 8.0)).abs().max_element() < 1e-3);
}

#[test]
fn registry_clear_releases_catalog_but_not_arcs() {
    let mut registry = GeometryRegistry::new();
    let geometry = register_cube(&mut registry).unwrap();
    registry.clear();
    assert!(registry.is_empty());
    assert_eq!(geometry.num_vertices(), 24);
}

// ============================================================================
// Primitive kinds
// ============================================================================

#[test]
fn primitive_kind_classification() {
    assert!(PrimitiveKind::Triangles.is_triangle_like());
    assert!(PrimitiveKind::Solid.is_triangle_like());
    assert!(PrimitiveKind::Surface.is_triangle_like());
    assert!(!PrimitiveKind::Lines.is_triangle_like());
    assert!(!PrimitiveKind::Points.is_indexed());
    assert!(PrimitiveKind::Lines.is_indexed());
}
