//! Transform Forest Tests
//!
//! Tests for:
//! - TRS composition and matrix decomposition round trip
//! - Euler degrees <-> quaternion consistency (XYZ order)
//! - Lazy world-matrix rebuild through parent chains
//! - Dirty propagation to subtrees
//! - Forest validation (duplicate ids, unknown parents)

use glam::{EulerRot, Mat4, Quat, Vec3};

use strata::StrataError;
use strata::model::{TransformCfg, TransformForest};

const EPSILON: f32 = 1e-5;

fn mat_approx(a: Mat4, b: Mat4) -> bool {
    a.to_cols_array()
        .iter()
        .zip(b.to_cols_array().iter())
        .all(|(x, y)| (x - y).abs() < EPSILON)
}

fn vec_approx(a: Vec3, b: Vec3) -> bool {
    (a - b).abs().max_element() < EPSILON
}

// ============================================================================
// Creation & validation
// ============================================================================

#[test]
fn forest_create_and_lookup() {
    let mut forest = TransformForest::new();
    let handle = forest
        .create(TransformCfg {
            id: "root".into(),
            ..TransformCfg::default()
        })
        .unwrap();
    assert_eq!(forest.handle("root"), Some(handle));
    assert_eq!(forest.len(), 1);
}

#[test]
fn forest_rejects_duplicate_id() {
    let mut forest = TransformForest::new();
    forest
        .create(TransformCfg {
            id: "node".into(),
            ..TransformCfg::default()
        })
        .unwrap();
    let err = forest
        .create(TransformCfg {
            id: "node".into(),
            ..TransformCfg::default()
        })
        .unwrap_err();
    assert!(matches!(err, StrataError::DuplicateId { kind: "transform", .. }));
}

#[test]
fn forest_rejects_unknown_parent() {
    let mut forest = TransformForest::new();
    let err = forest
        .create(TransformCfg {
            id: "child".into(),
            parent_transform_id: Some("ghost".into()),
            ..TransformCfg::default()
        })
        .unwrap_err();
    assert!(matches!(err, StrataError::UnknownId { kind: "transform", .. }));
}

// ============================================================================
// Rotation round trips
// ============================================================================

#[test]
fn euler_quaternion_round_trip() {
    let mut forest = TransformForest::new();
    let handle = forest
        .create(TransformCfg {
            id: "node".into(),
            rotation: Some(Vec3::new(30.0, 45.0, 60.0)),
            ..TransformCfg::default()
        })
        .unwrap();

    let expected = Quat::from_euler(
        EulerRot::XYZ,
        30.0_f32.to_radians(),
        45.0_f32.to_radians(),
        60.0_f32.to_radians(),
    );
    let node = forest.get(handle).unwrap();
    assert!(node.quaternion().dot(expected).abs() > 1.0 - 1e-6);

    // And back to degrees.
    let degrees = node.rotation();
    assert!(vec_approx(degrees, Vec3::new(30.0, 45.0, 60.0)));
}

#[test]
fn matrix_decompose_recompose_round_trip() {
    let original = Mat4::from_scale_rotation_translation(
        Vec3::new(2.0, 3.0, 4.0),
        Quat::from_rotation_y(0.7),
        Vec3::new(-1.0, 5.0, 9.0),
    );

    let mut forest = TransformForest::new();
    let handle = forest
        .create(TransformCfg {
            id: "node".into(),
            matrix: Some(original),
            ..TransformCfg::default()
        })
        .unwrap();

    // TRS extracted from the matrix recomposes to the same transform.
    assert!(mat_approx(forest.get(handle).unwrap().local_matrix(), original));
    assert!(mat_approx(forest.world_matrix(handle), original));
}

// ============================================================================
// Hierarchy
// ============================================================================

#[test]
fn world_matrix_composes_through_parents() {
    let mut forest = TransformForest::new();
    let root = forest
        .create(TransformCfg {
            id: "root".into(),
            position: Some(Vec3::new(10.0, 0.0, 0.0)),
            ..TransformCfg::default()
        })
        .unwrap();
    let child = forest
        .create(TransformCfg {
            id: "child".into(),
            parent_transform_id: Some("root".into()),
            position: Some(Vec3::new(0.0, 5.0, 0.0)),
            ..TransformCfg::default()
        })
        .unwrap();

    let world = forest.world_matrix(child);
    let point = world.transform_point3(Vec3::ZERO);
    assert!(vec_approx(point, Vec3::new(10.0, 5.0, 0.0)));
    let _ = root;
}

#[test]
fn parent_change_dirties_subtree() {
    let mut forest = TransformForest::new();
    let root = forest
        .create(TransformCfg {
            id: "root".into(),
            ..TransformCfg::default()
        })
        .unwrap();
    forest
        .create(TransformCfg {
            id: "child".into(),
            parent_transform_id: Some("root".into()),
            position: Some(Vec3::new(1.0, 0.0, 0.0)),
            ..TransformCfg::default()
        })
        .unwrap();
    let child = forest.handle("child").unwrap();

    // Settle, then move the parent.
    let before = forest.world_matrix(child).transform_point3(Vec3::ZERO);
    assert!(vec_approx(before, Vec3::new(1.0, 0.0, 0.0)));

    forest.set_position(root, Vec3::new(0.0, 0.0, 7.0));
    let after = forest.world_matrix(child).transform_point3(Vec3::ZERO);
    assert!(vec_approx(after, Vec3::new(1.0, 0.0, 7.0)));
}

#[test]
fn set_matrix_keeps_trs_in_sync() {
    let mut forest = TransformForest::new();
    let node = forest
        .create(TransformCfg {
            id: "node".into(),
            ..TransformCfg::default()
        })
        .unwrap();

    forest.set_matrix(
        node,
        Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::IDENTITY,
            Vec3::new(3.0, 0.0, 0.0),
        ),
    );
    let record = forest.get(node).unwrap();
    assert!(vec_approx(record.position(), Vec3::new(3.0, 0.0, 0.0)));
    assert!(vec_approx(record.scale(), Vec3::splat(2.0)));
}

#[test]
fn rotation_setter_updates_quaternion() {
    let mut forest = TransformForest::new();
    let node = forest
        .create(TransformCfg {
            id: "node".into(),
            ..TransformCfg::default()
        })
        .unwrap();

    forest.set_rotation(node, Vec3::new(0.0, 90.0, 0.0));
    let world = forest.world_matrix(node);
    let point = world.transform_point3(Vec3::X);
    assert!(vec_approx(point, Vec3::new(0.0, 0.0, -1.0)));
}
