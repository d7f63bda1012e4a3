//! Writes to other cells and interaction bindings stored in cell metadata.

use std::collections::{BTreeSet, VecDeque};

use serde_json::Value as JsonValue;
use voxcel_formulas::{extract_references, parse_formula, FunctionCall};
use voxcel_primitives::{ArrayId, CellBox, CellCoord, CellKey, Value};
use voxcel_sheet::meta::DISPLAY_TEXT;
use voxcel_sheet::ActionKind;

use super::{
    action_text, array_ref, is_off_switch, target_keys, write_meta, FnTag, FunctionDefinition,
    FunctionRegistry,
};
use crate::engine::Engine;
use crate::error::EvalError;
use crate::eval::{EvalContext, Operand};
use crate::transaction::CellPatch;

const META: &[FnTag] = &[FnTag::Meta];
const ACTION: &[FnTag] = &[FnTag::Action];
const ACTION_BLOCK: &[FnTag] = &[FnTag::Action, FnTag::Block];

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("SET", FunctionDefinition::range(2, 3, ACTION_BLOCK, set));
    registry.register("ON_HOLD", FunctionDefinition::range(1, 2, META, on_hold));
    registry.register("ON_TOUCH", FunctionDefinition::range(1, 2, META, on_touch));
    registry.register("ON_LAND", FunctionDefinition::range(1, 2, META, on_land));
    registry.register("ONCLICK", FunctionDefinition::range(1, 2, ACTION, on_click));
    registry.register("DISPLAY_AS", FunctionDefinition::range(1, 2, ACTION, display_as));
    registry.register("FORMULIZE", FunctionDefinition::range(0, 1, META, formulize));
}

/// `SET(target, value, overwrite?)` writes a plain value to another cell.
/// Without `overwrite` only an empty target is written.
fn set(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let target = target_keys(engine, ctx, call, 0)?
        .first()
        .copied()
        .ok_or_else(|| EvalError::message("SET:TARGET"))?;
    let value = engine.arg_value(ctx, call, 1)?;
    let overwrite = call.args.len() < 3 || engine.arg_value(ctx, call, 2)?.is_truthy();

    if overwrite || engine.read_value(target).is_empty() {
        let patch = CellPatch::value(value.clone()).with_formula(None);
        engine.write(ctx, target, patch)?;
    }
    Ok(Operand::Value(value))
}

/// `DISPLAY_AS(text, target?)` shows `text` in place of the target's value
/// without touching the value itself.
fn display_as(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let text = engine.arg_value(ctx, call, 0)?.to_string();
    let targets = target_keys(engine, ctx, call, 1)?;
    if targets.iter().any(|key| engine.world.array(key.arr).is_none()) {
        return Err(EvalError::message("DISPLAY_AS:FAIL"));
    }
    for key in targets {
        write_meta(engine, ctx, key, DISPLAY_TEXT, JsonValue::String(text.clone()))?;
    }
    Ok(Operand::text(text))
}

/// `FORMULIZE(ref?)` yields a `DO{...}` formula that recreates the target
/// array, and every array its formulas reference, where they stand now.
fn formulize(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let start = array_ref(engine, ctx, call, 0)?;
    if engine.world.array(start).is_none() {
        return Err(EvalError::message("TARGET"));
    }
    let statements: Vec<String> = linked_arrays(engine, start)
        .into_iter()
        .filter_map(|id| engine.world.array(id))
        .map(|array| {
            let name = array.name.replace('\\', "\\\\").replace('"', "\\\"");
            format!(
                "SET_ARRAY_POS(CREATE({}, {}, {}, \"{}\"), {}, {}, {})",
                array.size.x,
                array.size.y,
                array.size.z,
                name,
                Value::Number(array.offset.x),
                Value::Number(array.offset.y),
                Value::Number(array.offset.z)
            )
        })
        .collect();
    Ok(Operand::text(format!("=DO{{\n {}\n}}", statements.join(";\n "))))
}

/// `start` plus every array reachable through formula references, by id.
fn linked_arrays(engine: &Engine, start: ArrayId) -> Vec<ArrayId> {
    let mut seen = BTreeSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        let Some(array) = engine.world.array(id) else {
            continue;
        };
        for (coord, cell) in array.cells() {
            let Some(formula) = cell.formula.as_deref() else {
                continue;
            };
            let parsed = parse_formula(formula, array.key(coord), &engine.world.macros);
            for cells in extract_references(&parsed.expr) {
                if engine.world.array(cells.arr).is_some() && seen.insert(cells.arr) {
                    queue.push_back(cells.arr);
                }
            }
        }
    }
    seen.into_iter().collect()
}

fn on_hold(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    bind(engine, ctx, call, ActionKind::Hold)
}

fn on_touch(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    bind(engine, ctx, call, ActionKind::Touch)
}

fn on_land(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    bind(engine, ctx, call, ActionKind::Land)
}

/// Clicks bind to one cell: a range registers on its bottom-left corner
/// (lowest x, highest y) and `"self"` means the anchor.
fn on_click(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    if call.args.len() == 2 {
        let operand = engine.arg_operand(ctx, call, 0)?;
        if let Some(cells) = operand.as_box() {
            let corner = click_corner(cells);
            let action = action_text(engine, ctx, &call.args[1])?;
            return apply_binding(engine, ctx, ActionKind::Click, &[corner], Some(action));
        }
        let text = engine.scalar(&operand)?.to_string();
        if text.trim().eq_ignore_ascii_case("self") {
            let action = action_text(engine, ctx, &call.args[1])?;
            let anchor = ctx.anchor.key();
            return apply_binding(engine, ctx, ActionKind::Click, &[anchor], Some(action));
        }
    }
    bind(engine, ctx, call, ActionKind::Click)
}

fn click_corner(cells: CellBox) -> CellKey {
    CellKey::new(
        cells.arr,
        CellCoord::new(cells.min.x, cells.max.y, cells.min.z),
    )
}

/// `ON_x(targets?, action)` or `ON_x("off")`.
fn bind(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
    kind: ActionKind,
) -> Result<Operand, EvalError> {
    if call.args.len() == 1 && is_off_switch(&call.args[0]) {
        let anchor = ctx.anchor.key();
        return apply_binding(engine, ctx, kind, &[anchor], None);
    }
    let (targets, action_index) = if call.args.len() >= 2 {
        (target_keys(engine, ctx, call, 0)?, 1)
    } else {
        (vec![ctx.anchor.key()], 0)
    };
    let action = action_text(engine, ctx, &call.args[action_index])?;
    apply_binding(engine, ctx, kind, &targets, Some(action))
}

fn apply_binding(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    kind: ActionKind,
    targets: &[CellKey],
    action: Option<String>,
) -> Result<Operand, EvalError> {
    let field = kind.meta_key();
    let value = action.map_or(JsonValue::Null, JsonValue::String);
    let off = value.is_null();
    for key in targets {
        write_meta(engine, ctx, *key, field, value.clone())?;
    }
    if off {
        Ok(Operand::text(format!("{field}:OFF")))
    } else {
        Ok(Operand::text(format!("{field}:{}", targets.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ArraySpec;
    use voxcel_primitives::{Anchor, Value};

    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine.create_array(ArraySpec::named("test")).unwrap();
        engine
    }

    #[test]
    fn test_set_writes_target_inside_recompute() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        let b1 = CellKey::at(1, 1, 0, 0);
        let c1 = CellKey::at(1, 2, 0, 0);
        engine.enter(c1, "=B1").unwrap();
        engine.enter(a1, "=SET(B1, 42)").unwrap();
        assert_eq!(engine.get_cell_value(b1), Value::Number(42.0));
        assert_eq!(engine.get_cell_value(c1), Value::Number(42.0));
    }

    #[test]
    fn test_set_respects_overwrite_flag() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        let b1 = CellKey::at(1, 1, 0, 0);
        engine.set_cell(b1, "keep", None).unwrap();
        engine.enter(a1, "=SET(B1, 1, 0)").unwrap();
        assert_eq!(engine.get_cell_value(b1), Value::text("keep"));
    }

    #[test]
    fn test_set_requires_transaction() {
        let mut engine = engine();
        let value = engine
            .run_once_at(Anchor::from(CellKey::at(1, 0, 0, 0)), "=SET(B1, 1)", None)
            .unwrap();
        assert_eq!(value, Value::error("SET requires a transaction"));
    }

    #[test]
    fn test_on_hold_binding_and_interaction() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        let b2 = CellKey::at(1, 1, 1, 0);
        engine
            .enter(a1, r#"=ON_HOLD(B2, "SET_GLOBAL(\"held\", 1)")"#)
            .unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::text("on_hold:1"));
        assert_eq!(
            engine.get_cell(b2).meta.action(ActionKind::Hold),
            Some("=SET_GLOBAL(\"held\", 1)")
        );

        let result = engine.interact(b2, ActionKind::Hold).unwrap();
        assert!(result.is_some());
        assert_eq!(engine.global("held"), Some(&Value::Number(1.0)));
    }

    #[test]
    fn test_onclick_range_uses_corner() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine.enter(a1, r#"=ONCLICK(B1:C3, "ADD(1, 1)")"#).unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::text("on_click:1"));
        let corner = CellKey::at(1, 1, 2, 0);
        assert!(engine.get_cell(corner).meta.action(ActionKind::Click).is_some());
        assert_eq!(
            engine.interact(corner, ActionKind::Click).unwrap(),
            Some(Value::Number(2.0))
        );
    }

    #[test]
    fn test_display_as_keeps_value() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        let b1 = CellKey::at(1, 1, 0, 0);
        engine.set_cell(b1, 42.0, None).unwrap();
        engine.enter(a1, r#"=DISPLAY_AS("answer", B1)"#).unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::text("answer"));
        assert_eq!(engine.get_cell(b1).meta.display_text(), Some("answer"));
        assert_eq!(engine.get_cell_value(b1), Value::Number(42.0));

        engine.enter(a1, r#"=DISPLAY_AS("me")"#).unwrap();
        assert_eq!(engine.get_cell(a1).meta.display_text(), Some("me"));
    }

    #[test]
    fn test_formulize_rebuilds_linked_arrays() {
        let mut engine = engine();
        engine.create_array(ArraySpec::named("other")).unwrap();
        engine.create_array(ArraySpec::named("unrelated")).unwrap();
        engine.enter(CellKey::at(1, 0, 0, 0), "=B3^2").unwrap();
        engine.enter(CellKey::at(1, 1, 0, 0), "=FORMULIZE()").unwrap();

        let Value::Text(script) = engine.get_cell_value(CellKey::at(1, 1, 0, 0)) else {
            panic!("expected text");
        };
        assert!(script.starts_with("=DO{"), "{script}");
        assert!(script.contains(r#"CREATE(6, 4, 6, "test")"#), "{script}");
        assert!(script.contains(r#""other""#), "{script}");
        assert!(!script.contains("unrelated"), "{script}");

        let mut rebuilt = Engine::new();
        rebuilt.create_array(ArraySpec::named("host")).unwrap();
        rebuilt.enter(CellKey::at(1, 0, 0, 0), &script).unwrap();
        assert!(rebuilt.world().array_by_name("test").is_some());
        let other = rebuilt.world().array_by_name("other").unwrap();
        let source = engine.world().array_by_name("other").unwrap();
        assert_eq!(other.offset, source.offset);
        assert!(rebuilt.get_cell(CellKey::at(1, 0, 0, 0)).formula.is_none());
    }

    #[test]
    fn test_binding_off() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine.enter(a1, r#"=ON_TOUCH("SET_GLOBAL(\"t\", 1)")"#).unwrap();
        assert!(engine.get_cell(a1).meta.action(ActionKind::Touch).is_some());
        engine.enter(a1, r#"=ON_TOUCH("off")"#).unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::text("on_touch:OFF"));
        assert!(engine.get_cell(a1).meta.action(ActionKind::Touch).is_none());
    }
}
