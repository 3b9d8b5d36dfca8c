//! Scene Model Integration Tests
//!
//! Tests for:
//! - The table scenarios: instanced, batched, and RTC-batched builds
//! - Strategy routing (instanced / batched / data-texture)
//! - Deferred flag uploads under mass updates
//! - Layer capacity overflow into sibling layers
//! - Dummy-entity collection of unclaimed meshes
//! - Counter mirroring, observable object sets, world AABB
//! - Texture sets and asynchronous texture resolution

use glam::{DVec3, Vec3};

use strata::gpu::Gpu;
use strata::layer::Layer;
use strata::model::{
    DecodedImage, TextureCfg, TextureCompletion, TextureSetCfg, TextureSource, TextureState,
};
use strata::{
    EntityCfg, GeometryCfg, MeshCfg, PrimitiveKind, SceneModel, SceneModelCfg, StrataError,
};

const AABB_TOLERANCE: f64 = 1e-5;

/// 24-vertex unit cube (±1) with 36 indices.
fn cube_positions() -> Vec<f64> {
    vec![
        -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0, 1.0, 1.0, -1.0, 1.0, 1.0, //
        -1.0, -1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, -1.0, -1.0, //
        -1.0, 1.0, -1.0, -1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, -1.0, //
        -1.0, -1.0, -1.0, 1.0, -1.0, -1.0, 1.0, -1.0, 1.0, -1.0, -1.0, 1.0, //
        1.0, -1.0, -1.0, 1.0, 1.0, -1.0, 1.0, 1.0, 1.0, 1.0, -1.0, 1.0, //
        -1.0, -1.0, -1.0, -1.0, -1.0, 1.0, -1.0, 1.0, 1.0, -1.0, 1.0, -1.0,
    ]
}

fn cube_indices() -> Vec<u32> {
    vec![
        0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7, 8, 9, 10, 8, 10, 11, //
        12, 13, 14, 12, 14, 15, 16, 17, 18, 16, 18, 19, 20, 21, 22, 20, 22, 23,
    ]
}

/// Table-top plus four legs: positions, scales, colors.
fn table_pieces() -> [(Vec3, Vec3, [f32; 3]); 5] {
    [
        (Vec3::new(-3.5, -6.0, -3.5), Vec3::new(1.0, 3.0, 1.0), [1.0, 0.3, 0.3]),
        (Vec3::new(3.5, -6.0, -3.5), Vec3::new(1.0, 3.0, 1.0), [0.3, 1.0, 0.3]),
        (Vec3::new(3.5, -6.0, 3.5), Vec3::new(1.0, 3.0, 1.0), [0.3, 0.3, 1.0]),
        (Vec3::new(-3.5, -6.0, 3.5), Vec3::new(1.0, 3.0, 1.0), [1.0, 1.0, 0.0]),
        (Vec3::new(0.0, -3.0, 0.0), Vec3::new(4.5, 0.5, 4.5), [1.0, 0.3, 1.0]),
    ]
}

fn table_aabb(origin: DVec3) -> (DVec3, DVec3) {
    (
        DVec3::new(-4.5, -9.0, -4.5) + origin,
        DVec3::new(4.5, -2.5, 4.5) + origin,
    )
}

fn vbo_model(id: &str) -> SceneModel {
    SceneModel::new(
        Gpu::headless(),
        SceneModelCfg {
            dtx_enabled: false,
            ..SceneModelCfg::new(id)
        },
    )
}

fn assert_aabb(model: &mut SceneModel, expected: (DVec3, DVec3)) {
    let aabb = model.aabb();
    assert!(
        (aabb.min - expected.0).abs().max_element() < AABB_TOLERANCE,
        "min {:?} != {:?}",
        aabb.min,
        expected.0
    );
    assert!(
        (aabb.max - expected.1).abs().max_element() < AABB_TOLERANCE,
        "max {:?} != {:?}",
        aabb.max,
        expected.1
    );
}

// ============================================================================
// Scenario: table, instanced
// ============================================================================

#[test]
fn table_instanced() {
    let mut model = vbo_model("table");
    let mut cfg = GeometryCfg::new("box", PrimitiveKind::Triangles);
    cfg.positions = Some(cube_positions());
    cfg.indices = Some(cube_indices());
    model.create_geometry(cfg).unwrap();

    for (i, (position, scale, color)) in table_pieces().into_iter().enumerate() {
        let mesh_id = format!("mesh-{i}");
        model
            .create_mesh(MeshCfg {
                geometry_id: Some("box".into()),
                position: Some(position),
                scale: Some(scale),
                color: Some(color),
                ..MeshCfg::new(mesh_id.clone())
            })
            .unwrap();
        model
            .create_entity(EntityCfg {
                id: Some(format!("piece-{i}")),
                mesh_ids: vec![mesh_id],
                ..EntityCfg::default()
            })
            .unwrap();
    }
    model.finalize().unwrap();

    // One instanced triangles layer with five portions.
    assert_eq!(model.layer_list().len(), 1);
    let layer = model.layer(model.layer_list()[0]).unwrap();
    assert!(matches!(layer, Layer::VboInstanced(_)));
    assert_eq!(layer.ops().counters().num_portions(), 5);

    assert_eq!(model.num_entities(), 5);
    assert_eq!(model.num_triangles(), 60);
    assert_aabb(&mut model, table_aabb(DVec3::ZERO));
}

// ============================================================================
// Scenario: table, batched
// ============================================================================

fn build_batched_table(model: &mut SceneModel, origin: Option<DVec3>) {
    for (i, (position, scale, color)) in table_pieces().into_iter().enumerate() {
        let mesh_id = format!("mesh-{i}");
        model
            .create_mesh(MeshCfg {
                primitive: Some(PrimitiveKind::Triangles),
                positions: Some(cube_positions()),
                indices: Some(cube_indices()),
                position: Some(position),
                scale: Some(scale),
                color: Some(color),
                origin,
                ..MeshCfg::new(mesh_id.clone())
            })
            .unwrap();
        model
            .create_entity(EntityCfg {
                id: Some(format!("piece-{i}")),
                mesh_ids: vec![mesh_id],
                ..EntityCfg::default()
            })
            .unwrap();
    }
    model.finalize().unwrap();
}

#[test]
fn table_batched() {
    let mut model = vbo_model("table");
    build_batched_table(&mut model, None);

    assert_eq!(model.layer_list().len(), 1);
    let layer = model.layer(model.layer_list()[0]).unwrap();
    assert!(matches!(layer, Layer::VboBatched(_)));
    assert_eq!(layer.ops().counters().num_portions(), 5);
    assert_aabb(&mut model, table_aabb(DVec3::ZERO));
}

#[test]
fn table_batched_rtc() {
    let origin = DVec3::new(1e8, 0.0, 1e8);
    let mut model = vbo_model("table");
    build_batched_table(&mut model, Some(origin));

    assert_eq!(model.layer_list().len(), 1);
    let handle = model.layer_list()[0];
    {
        let layer = model.layer(handle).unwrap();
        assert!(matches!(layer, Layer::VboBatched(_)));
        // The layer adopted the double-precision origin exactly.
        assert_eq!(layer.ops().origin(), origin);
        // Layer-level quantization produced a decode matrix; grid
        // coordinates are clamped to [0, 65535] by construction.
        let Layer::VboBatched(batched) = layer else {
            unreachable!()
        };
        assert!(batched.decode_matrix().is_some());
    }
    assert_aabb(&mut model, table_aabb(origin));
}

// ============================================================================
// Scenario: deferred flags under load
// ============================================================================

#[test]
fn deferred_flags_under_mass_update() {
    let mut model = vbo_model("load");
    let mut cfg = GeometryCfg::new("box", PrimitiveKind::Triangles);
    cfg.positions = Some(cube_positions());
    cfg.indices = Some(cube_indices());
    model.create_geometry(cfg).unwrap();

    let count = 20_000u32;
    for i in 0..count {
        let mesh_id = format!("m{i}");
        model
            .create_mesh(MeshCfg {
                geometry_id: Some("box".into()),
                position: Some(Vec3::new(i as f32 % 100.0, 0.0, (i / 100) as f32)),
                ..MeshCfg::new(mesh_id.clone())
            })
            .unwrap();
        model
            .create_entity(EntityCfg {
                id: Some(format!("e{i}")),
                mesh_ids: vec![mesh_id],
                ..EntityCfg::default()
            })
            .unwrap();
    }
    model.finalize().unwrap();
    // Settle the finalize-frame broadcast.
    model.commit();

    assert_eq!(model.layer_list().len(), 1);
    assert_eq!(model.counters().num_visible(), count);

    let before = model.gpu().stats().buffer_sub_uploads;
    model.set_visible(false).unwrap();
    let direct = model.gpu().stats().buffer_sub_uploads - before;
    assert!(direct <= 10, "per-frame direct budget exceeded: {direct}");

    model.commit();
    let total = model.gpu().stats().buffer_sub_uploads - before;
    assert_eq!(total, direct + 1, "one coalesced upload after the budget");
    assert_eq!(model.counters().num_visible(), 0);
}

// ============================================================================
// Scenario: capacity overflow
// ============================================================================

#[test]
fn capacity_overflow_opens_sibling_layer() {
    let mut model = vbo_model("big");
    let mut cfg = GeometryCfg::new("tri", PrimitiveKind::Triangles);
    cfg.positions = Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    model.create_geometry(cfg).unwrap();

    let count = 65_537u32;
    for i in 0..count {
        model
            .create_mesh(MeshCfg {
                geometry_id: Some("tri".into()),
                ..MeshCfg::new(format!("m{i}"))
            })
            .unwrap();
    }

    assert_eq!(model.layer_list().len(), 2);
    let first = model.layer(model.layer_list()[0]).unwrap();
    let second = model.layer(model.layer_list()[1]).unwrap();
    assert_eq!(first.ops().counters().num_portions(), 65_536);
    assert_eq!(second.ops().counters().num_portions(), 1);
    // Siblings under one composite key share their sort id.
    assert_eq!(first.ops().sort_id(), second.ops().sort_id());
}

// ============================================================================
// Scenario: dummy entity
// ============================================================================

#[test]
fn unclaimed_meshes_collected_into_dummy_entity() {
    let mut model = vbo_model("dummy");
    let mut cfg = GeometryCfg::new("tri", PrimitiveKind::Triangles);
    cfg.positions = Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    model.create_geometry(cfg).unwrap();

    for i in 0..3 {
        model
            .create_mesh(MeshCfg {
                geometry_id: Some("tri".into()),
                ..MeshCfg::new(format!("m{i}"))
            })
            .unwrap();
    }
    model
        .create_entity(EntityCfg {
            id: Some("claimed".into()),
            mesh_ids: vec!["m0".into(), "m1".into()],
            ..EntityCfg::default()
        })
        .unwrap();
    model.finalize().unwrap();

    assert_eq!(model.num_entities(), 2);
    let dummy = model
        .entity_handles()
        .iter()
        .copied()
        .find(|&h| model.entity(h).unwrap().id != "claimed")
        .unwrap();
    let dummy_entity = model.entity(dummy).unwrap();
    assert!(dummy_entity.is_object);
    assert_eq!(dummy_entity.meshes().len(), 1);
    // Registered as a visible object.
    assert!(model.object_sets().visible.contains_key(&dummy_entity.id));

    // The orphan mesh now belongs to it.
    let m2 = model.mesh_handle("m2").unwrap();
    assert_eq!(model.mesh(m2).unwrap().entity, Some(dummy));
}

// ============================================================================
// Strategy routing
// ============================================================================

#[test]
fn dtx_routes_untextured_triangles() {
    let mut model = SceneModel::new(Gpu::headless(), SceneModelCfg::new("dtx"));
    let mut cfg = GeometryCfg::new("tri", PrimitiveKind::Triangles);
    cfg.positions = Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    model.create_geometry(cfg).unwrap();

    model
        .create_mesh(MeshCfg {
            geometry_id: Some("tri".into()),
            ..MeshCfg::new("m0")
        })
        .unwrap();
    assert!(matches!(
        model.layer(model.layer_list()[0]).unwrap(),
        Layer::Dtx(_)
    ));
}

#[test]
fn texture_set_forces_vbo_path() {
    let mut model = SceneModel::new(Gpu::headless(), SceneModelCfg::new("tex"));
    let mut cfg = GeometryCfg::new("tri", PrimitiveKind::Triangles);
    cfg.positions = Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    model.create_geometry(cfg).unwrap();

    model
        .create_texture(TextureCfg::new(
            "diffuse",
            TextureSource::Pixels(DecodedImage {
                width: 2,
                height: 2,
                data: vec![255; 16],
            }),
        ))
        .unwrap();
    model
        .create_texture_set(TextureSetCfg {
            id: "set".into(),
            color_texture_id: Some("diffuse".into()),
            ..TextureSetCfg::default()
        })
        .unwrap();

    model
        .create_mesh(MeshCfg {
            geometry_id: Some("tri".into()),
            texture_set_id: Some("set".into()),
            ..MeshCfg::new("m0")
        })
        .unwrap();
    assert!(matches!(
        model.layer(model.layer_list()[0]).unwrap(),
        Layer::VboInstanced(_)
    ));
}

#[test]
fn lines_route_to_vbo_even_with_dtx_enabled() {
    let mut model = SceneModel::new(Gpu::headless(), SceneModelCfg::new("lines"));
    model
        .create_mesh(MeshCfg {
            primitive: Some(PrimitiveKind::Lines),
            positions: Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0]),
            indices: Some(vec![0, 1]),
            ..MeshCfg::new("wire")
        })
        .unwrap();
    assert!(matches!(
        model.layer(model.layer_list()[0]).unwrap(),
        Layer::VboBatched(_)
    ));
    assert_eq!(model.num_lines(), 1);
}

// ============================================================================
// Contract violations
// ============================================================================

#[test]
fn mesh_cannot_join_two_entities() {
    let mut model = vbo_model("reuse");
    model
        .create_mesh(MeshCfg {
            primitive: Some(PrimitiveKind::Triangles),
            positions: Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            ..MeshCfg::new("m0")
        })
        .unwrap();
    model
        .create_entity(EntityCfg {
            id: Some("first".into()),
            mesh_ids: vec!["m0".into()],
            ..EntityCfg::default()
        })
        .unwrap();
    let err = model
        .create_entity(EntityCfg {
            id: Some("second".into()),
            mesh_ids: vec!["m0".into()],
            ..EntityCfg::default()
        })
        .unwrap_err();
    assert!(matches!(err, StrataError::MeshAlreadyOwned { .. }));
}

#[test]
fn authoring_rejected_after_finalize() {
    let mut model = vbo_model("late");
    model
        .create_mesh(MeshCfg {
            primitive: Some(PrimitiveKind::Triangles),
            positions: Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]),
            ..MeshCfg::new("m0")
        })
        .unwrap();
    model.finalize().unwrap();

    let err = model
        .create_mesh(MeshCfg {
            primitive: Some(PrimitiveKind::Triangles),
            positions: Some(vec![0.0; 9]),
            ..MeshCfg::new("m1")
        })
        .unwrap_err();
    assert!(matches!(err, StrataError::AlreadyFinalized(_)));
}

#[test]
fn compressed_positions_reject_transforms() {
    let mut model = vbo_model("packed");
    let err = model
        .create_mesh(MeshCfg {
            primitive: Some(PrimitiveKind::Triangles),
            positions_compressed: Some(vec![0, 0, 0, 100, 0, 0, 0, 100, 0]),
            decode_boundary: Some((Vec3::ZERO, Vec3::ONE)),
            position: Some(Vec3::X),
            ..MeshCfg::new("m0")
        })
        .unwrap_err();
    assert!(matches!(err, StrataError::IncompatibleParams(_)));
}

// ============================================================================
// Counters, object sets, offsets
// ============================================================================

#[test]
fn model_counters_mirror_layer_sums() {
    let mut model = vbo_model("counters");
    build_batched_table(&mut model, None);
    model.commit();

    assert_eq!(model.counters().num_portions(), 5);
    assert_eq!(model.counters().num_visible(), 5);

    let piece = model.entity_handle("piece-0").unwrap();
    model.set_entity_xrayed(piece, true).unwrap();
    model.set_entity_visible(piece, false).unwrap();

    let total = model.counters();
    assert_eq!(total.num_visible(), 4);
    assert_eq!(total.num_xrayed(), 1);

    // Mirror equality: the model total is the fold over layers.
    let mut folded = strata::AggregateCounters::default();
    for &handle in model.layer_list() {
        folded.accumulate(model.layer(handle).unwrap().ops().counters());
    }
    assert_eq!(folded, total);
}

#[test]
fn object_sets_follow_entity_setters() {
    let mut model = vbo_model("sets");
    build_batched_table(&mut model, None);

    let piece = model.entity_handle("piece-2").unwrap();
    assert!(model.object_sets().visible.contains_key("piece-2"));

    model.set_entity_visible(piece, false).unwrap();
    assert!(!model.object_sets().visible.contains_key("piece-2"));

    model.set_entity_selected(piece, true).unwrap();
    assert!(model.object_sets().selected.contains_key("piece-2"));

    // No-op setter leaves the sets untouched.
    model.set_entity_selected(piece, true).unwrap();
    assert!(model.object_sets().selected.contains_key("piece-2"));
}

#[test]
fn entity_offset_moves_world_aabb() {
    let mut model = vbo_model("offset");
    build_batched_table(&mut model, None);

    let before = model.aabb();
    for handle in model.entity_handles().to_vec() {
        model.set_entity_offset(handle, Vec3::new(0.0, 10.0, 0.0)).unwrap();
    }
    let after = model.aabb();
    assert!((after.min.y - (before.min.y + 10.0)).abs() < AABB_TOLERANCE);
    assert!((after.max.y - (before.max.y + 10.0)).abs() < AABB_TOLERANCE);
}

// ============================================================================
// Textures
// ============================================================================

#[test]
fn async_texture_resolves_on_commit() {
    let mut model = SceneModel::new(Gpu::headless(), SceneModelCfg::new("async"));
    let key = model
        .create_texture(TextureCfg::new("remote", TextureSource::Deferred))
        .unwrap();
    assert_eq!(model.texture(key).unwrap().state(), TextureState::Loading);

    let sender = model.texture_completion_sender();
    sender
        .send(TextureCompletion {
            texture_id: "remote".into(),
            result: Ok(DecodedImage {
                width: 2,
                height: 2,
                data: vec![0; 16],
            }),
        })
        .unwrap();

    // Not observable until the commit tick.
    assert_eq!(model.texture(key).unwrap().state(), TextureState::Loading);
    model.commit();
    assert_eq!(model.texture(key).unwrap().state(), TextureState::Ready);
}

#[test]
fn failed_texture_load_is_contained() {
    let mut model = SceneModel::new(Gpu::headless(), SceneModelCfg::new("fail"));
    let key = model
        .create_texture(TextureCfg::new("remote", TextureSource::Deferred))
        .unwrap();
    model
        .texture_completion_sender()
        .send(TextureCompletion {
            texture_id: "remote".into(),
            result: Err("transcoder refused".into()),
        })
        .unwrap();
    model.commit();
    assert_eq!(model.texture(key).unwrap().state(), TextureState::Failed);
}

#[test]
fn empty_texture_payload_leaves_slot_empty() {
    let mut model = SceneModel::new(Gpu::headless(), SceneModelCfg::new("empty"));
    let key = model
        .create_texture(TextureCfg::new(
            "blank",
            TextureSource::Pixels(DecodedImage {
                width: 0,
                height: 0,
                data: Vec::new(),
            }),
        ))
        .unwrap();
    assert_eq!(model.texture(key).unwrap().state(), TextureState::Empty);
}

// ============================================================================
// Transforms
// ============================================================================

#[test]
fn transform_bound_mesh_follows_node_after_finalize() {
    let mut model = vbo_model("rig");
    let mut cfg = GeometryCfg::new("tri", PrimitiveKind::Triangles);
    cfg.positions = Some(vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    model.create_geometry(cfg).unwrap();

    let node = model
        .create_transform(strata::TransformCfg {
            id: "arm".into(),
            position: Some(Vec3::new(2.0, 0.0, 0.0)),
            ..strata::TransformCfg::default()
        })
        .unwrap();
    model
        .create_mesh(MeshCfg {
            geometry_id: Some("tri".into()),
            transform_id: Some("arm".into()),
            ..MeshCfg::new("m0")
        })
        .unwrap();
    model.finalize().unwrap();
    model.commit();

    // Moving the node resyncs the portion matrix on the next commit.
    let before = model.gpu().stats().buffer_sub_uploads;
    model.set_transform_position(node, Vec3::new(5.0, 0.0, 0.0));
    model.commit();
    assert!(model.gpu().stats().buffer_sub_uploads > before);
}
