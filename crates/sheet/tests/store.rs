use serde_json::json;
use tempfile::TempDir;
use voxcel_primitives::{Anchor, CellCoord, CellKey, Size3, Value};
use voxcel_sheet::{
    ActionKind, Array, Cell, CollisionMode, FnPolicy, PolicyMode, SelectHook, SizeLimits,
    WorldDocument,
};

const LIMITS: SizeLimits = SizeLimits {
    max_extent: 4096,
    max_cells: 262_144,
};

fn sample_array() -> Array {
    let mut array = Array::new(7, "Garden", Size3::new(4, 4, 2));
    array.hidden = true;
    array.fn_policy = FnPolicy::from_items(PolicyMode::AllowOnly, ["ADD"]);
    array.params.insert("speed".into(), json!(2));
    array.locks.insert(CellCoord::new(1, 1, 0));
    array.on_select_hooks.push(SelectHook {
        anchor: CellCoord::new(0, 0, 0),
        cells: [CellCoord::new(2, 2, 0)].into_iter().collect(),
        action: "=NOTE(\"hi\")".into(),
    });
    array.set(CellCoord::new(0, 0, 0), Cell::new(Value::from(5u32)));
    array.set(
        CellCoord::new(1, 0, 0),
        Cell::with_formula(Value::from(6u32), "=A1+1"),
    );
    let mut tagged = Cell::default();
    tagged.meta.set("onClick", "=FIRE_EVENT(\"go\")");
    array.set(CellCoord::new(3, 3, 1), tagged);
    array
}

#[test]
fn test_document_writes_only_meaningful_cells() {
    let doc = sample_array().to_document();
    let cells: usize = doc.chunks.values().map(|c| c.cells.len()).sum();
    assert_eq!(cells, 3);
    assert_eq!(doc.collision_mode, CollisionMode::Physics);

    let json = serde_json::to_value(&doc).unwrap();
    assert_eq!(json["fnPolicy"]["mode"], "ALLOW_ONLY");
    assert_eq!(json["collisionMode"], "physics");
    let chunk = &json["chunks"]["0_0_0"];
    assert_eq!(chunk["coord"], json!({"x": 0, "y": 0, "z": 0}));
    let tagged = chunk["cells"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["z"] == 1)
        .unwrap();
    assert_eq!(tagged["meta"], json!({"on_click": "=FIRE_EVENT(\"go\")"}));
}

#[test]
fn test_round_trip_refills_interior() {
    let original = sample_array();
    let doc = original.to_document();
    let restored = Array::from_document(doc, LIMITS).unwrap();

    assert_eq!(restored.size, original.size);
    assert_eq!(restored.cells().count(), 32);
    assert!(restored.hidden);
    assert!(restored.is_locked(CellCoord::new(1, 1, 0)));
    assert_eq!(restored.hooks_matching(CellCoord::new(2, 2, 0)).count(), 1);
    assert_eq!(
        restored.cell(CellCoord::new(1, 0, 0)).formula.as_deref(),
        Some("=A1+1")
    );
    assert_eq!(
        restored
            .cell(CellCoord::new(3, 3, 1))
            .meta
            .action(ActionKind::Click),
        Some("=FIRE_EVENT(\"go\")")
    );
}

#[test]
fn test_collision_mode_is_rederived_on_load() {
    let mut doc = Array::new(2, "Plain", Size3::new(2, 2, 2)).to_document();
    doc.collision_mode = CollisionMode::Physics;
    let restored = Array::from_document(doc, LIMITS).unwrap();
    assert_eq!(restored.collision_mode, CollisionMode::Edit);
}

#[test]
fn test_load_accepts_legacy_meta_and_hook_names() {
    let raw = json!({
        "id": 3,
        "name": "Legacy",
        "size": {"x": 2, "y": 1, "z": 1},
        "onSelectHooks": [{"anchor": {"x": 0, "y": 0, "z": 0}, "cells": [], "action": "=1"}],
        "chunks": {
            "0_0_0": {
                "coord": {"x": 0, "y": 0, "z": 0},
                "cells": [{"x": 1, "y": 0, "z": 0, "value": "", "formula": null,
                           "meta": {"onTouch": "=2", "generated": true, "emitter": "3:0,0,0"}}]
            }
        }
    });
    let doc = serde_json::from_value(raw).unwrap();
    let array = Array::from_document(doc, LIMITS).unwrap();
    let cell = array.cell(CellCoord::new(1, 0, 0));
    assert_eq!(cell.meta.action(ActionKind::Touch), Some("=2"));
    assert_eq!(
        cell.meta.emitter(),
        Some(Anchor::from(CellKey::at(3, 0, 0, 0)))
    );
    assert_eq!(array.on_select_hooks.len(), 1);
    assert_eq!(array.collision_mode, CollisionMode::Physics);
}

#[test]
fn test_load_rejects_cells_outside_bounds() {
    let raw = json!({
        "id": 3,
        "name": "Bad",
        "size": {"x": 1, "y": 1, "z": 1},
        "chunks": {"0_0_0": {"coord": {"x": 0, "y": 0, "z": 0},
                   "cells": [{"x": 5, "y": 0, "z": 0, "value": 1}]}}
    });
    let doc = serde_json::from_value(raw).unwrap();
    assert!(Array::from_document(doc, LIMITS).is_err());
}

#[test]
fn test_world_document_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("world.json");

    let mut world = WorldDocument::default();
    let array = sample_array();
    world.next_array_id = 8;
    world.arrays.insert(array.id, array.to_document());
    world.global_state.insert("n".into(), Value::from(5u32));
    world.named_macros.insert("HOME".into(), "A1".into());
    world.save(&path).unwrap();

    let loaded = WorldDocument::load(&path).unwrap();
    assert_eq!(loaded, world);
    assert_eq!(loaded.arrays[&7].name, "Garden");
}

#[test]
fn test_invalid_world_json_is_a_parse_error() {
    let err = WorldDocument::from_json_str("{\"arrays\": 3}").unwrap_err();
    assert!(matches!(err, voxcel_sheet::SheetError::Parse(_)));
}
