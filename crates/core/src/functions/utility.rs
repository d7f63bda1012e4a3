//! Array configuration, globals and cell decoration.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value as JsonValue;
use voxcel_formulas::FunctionCall;
use voxcel_primitives::{CellCoord, CellKey, Value};
use voxcel_sheet::{FnPolicy, PolicyMode};

use super::{target_keys, write_meta, FnTag, FunctionDefinition, FunctionRegistry};
use crate::engine::Engine;
use crate::error::EvalError;
use crate::eval::{EvalContext, Operand};

const PURE: &[FnTag] = &[FnTag::Pure];
const META: &[FnTag] = &[FnTag::Meta];
const ACTION: &[FnTag] = &[FnTag::Action];
const ACTION_META: &[FnTag] = &[FnTag::Action, FnTag::Meta];

const COMBINE_GLOBAL: &str = "interactions.combine";
const DEFAULT_COLOR: &str = "#3b82f6";

fn color_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("valid regex"))
}

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("PARAMETERS", FunctionDefinition::variadic(1, META, parameters));
    registry.register("FUNCTIONS", FunctionDefinition::variadic(0, META, functions));
    registry.register("LOCK", FunctionDefinition::variadic(1, META, lock));
    registry.register("GET_GLOBAL", FunctionDefinition::fixed(1, PURE, get_global));
    registry.register("SET_GLOBAL", FunctionDefinition::fixed(2, ACTION, set_global));
    registry.register("VALUE_AT", FunctionDefinition::range(3, 4, PURE, value_at));
    registry.register("COMBINE", FunctionDefinition::range(0, 1, ACTION_META, combine));
    registry.register("COLOR", FunctionDefinition::range(1, 2, ACTION, color));
    registry.register("GETCOLOR", FunctionDefinition::range(0, 1, PURE, get_color));
    registry.register("NOTE", FunctionDefinition::range(1, 2, ACTION, note));
}

/// `PARAMETERS(json)` merges an object into the array's params.
/// `PARAMETERS(name, args...)` yields the call text with its arguments bound.
fn parameters(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    if call.args.len() > 1 {
        let name = engine.arg_text(ctx, call, 0)?;
        let mut bound = Vec::new();
        for value in engine.flat_args(ctx, call, 1)? {
            bound.push(match value {
                Value::Text(text) => format!("\"{text}\""),
                other => other.to_string(),
            });
        }
        return Ok(Operand::text(format!("{name}({})", bound.join(","))));
    }

    let text = engine.arg_text(ctx, call, 0)?;
    let text = if text.trim().is_empty() { "{}" } else { text.trim() };
    let parsed: JsonValue =
        serde_json::from_str(text).map_err(|e| EvalError::message(format!("PARAMETERS:{e}")))?;
    let JsonValue::Object(fields) = parsed else {
        return Err(EvalError::message("PARAMETERS:NOT_OBJECT"));
    };
    if let Some(array) = engine.world.arrays.get_mut(&ctx.anchor.arr()) {
        for (key, value) in fields {
            array.params.insert(key, value);
        }
    }
    Ok(Operand::text("PARAMETERS:OK"))
}

/// `FUNCTIONS(mode, items...)` replaces the array's function policy.
fn functions(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let mode = engine.arg_text(ctx, call, 0)?;
    let mode = PolicyMode::parse(&mode);
    let items: Vec<String> = engine
        .flat_args(ctx, call, 1)?
        .iter()
        .map(ToString::to_string)
        .collect();
    let policy = FnPolicy::from_items(mode, items);
    if let Some(array) = engine.world.arrays.get_mut(&ctx.anchor.arr()) {
        array.fn_policy = policy;
    }
    Ok(Operand::text("FUNCTIONS:OK"))
}

/// `LOCK(state, refs...)`. A falsy state unlocks the whole array.
fn lock(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let arr = ctx.anchor.arr();
    if !engine.arg_value(ctx, call, 0)?.is_truthy() {
        if let Some(array) = engine.world.arrays.get_mut(&arr) {
            array.locks.clear();
        }
        return Ok(Operand::text("LOCK:OFF"));
    }

    let mut keys = Vec::new();
    for index in 1..call.args.len() {
        let operand = engine.arg_operand(ctx, call, index)?;
        keys.extend(engine.operand_keys(&operand)?);
    }
    for key in keys {
        if let Some(array) = engine.world.arrays.get_mut(&key.arr) {
            array.locks.insert(key.coord);
        }
    }
    let count = engine.world.array(arr).map_or(0, |a| a.locks.len());
    Ok(Operand::text(format!("LOCK:{count}")))
}

fn global_key(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
    name: &str,
) -> Result<String, EvalError> {
    let key = engine.arg_text(ctx, call, 0)?;
    if key.trim().is_empty() {
        return Err(EvalError::message(format!("{name}:KEY_REQUIRED")));
    }
    Ok(key)
}

fn get_global(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let key = global_key(engine, ctx, call, "GET_GLOBAL")?;
    ctx.record_global(&key);
    Ok(Operand::Value(
        engine.world.global(&key).cloned().unwrap_or_default(),
    ))
}

/// Readers of the key are recomputed once the current pass finishes.
fn set_global(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let key = global_key(engine, ctx, call, "SET_GLOBAL")?;
    let value = engine.arg_value(ctx, call, 1)?;
    let label = format!("Global[{key}] = {value}");
    if engine.world.globals.get(&key) != Some(&value) {
        engine.world.globals.insert(key.clone(), value);
        engine.dirty_globals.insert(key);
    }
    Ok(Operand::text(label))
}

/// `VALUE_AT(x, y, z, id)` with 1-based coordinates; `0` means the anchor's.
fn value_at(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let here = ctx.anchor.coord();
    let mut axes = [here.x, here.y, here.z];
    for (index, axis) in axes.iter_mut().enumerate() {
        if let Some(n) = engine.arg_value(ctx, call, index)?.as_int() {
            if n > 0 {
                *axis = u32::try_from(n - 1).map_err(|_| EvalError::Value)?;
            }
        }
    }
    let arr = match engine.arg_value(ctx, call, 3)?.as_int() {
        Some(id) if id > 0 => u32::try_from(id).map_err(|_| EvalError::Value)?,
        _ => ctx.anchor.arr(),
    };
    let key = CellKey::new(arr, CellCoord::new(axes[0], axes[1], axes[2]));
    ctx.record_read(key);
    Ok(Operand::Value(engine.read_value(key)))
}

fn combine(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let enable = engine.arg_value(ctx, call, 0)?.is_truthy();
    engine
        .world
        .globals
        .insert(COMBINE_GLOBAL.to_string(), Value::from(enable));
    engine.dirty_globals.insert(COMBINE_GLOBAL.to_string());
    Ok(Operand::text(format!(
        "Combine Mode: {}",
        if enable { "ON" } else { "OFF" }
    )))
}

fn color(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let hex = engine.arg_text(ctx, call, 0)?.trim().to_string();
    if !color_pattern().is_match(&hex) {
        return Err(EvalError::message("COLOR_FORMAT"));
    }
    for key in target_keys(engine, ctx, call, 1)? {
        write_meta(engine, ctx, key, "color", JsonValue::String(hex.clone()))?;
    }
    Ok(Operand::text(hex))
}

fn get_color(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let key = engine
        .arg_operand(ctx, call, 0)?
        .as_box()
        .map_or(ctx.anchor.key(), |cells| CellKey::new(cells.arr, cells.min));
    let color = engine
        .world
        .cell(key)
        .and_then(|cell| cell.meta.get("color"))
        .and_then(JsonValue::as_str)
        .unwrap_or(DEFAULT_COLOR)
        .to_string();
    Ok(Operand::text(color))
}

fn note(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let text = engine.arg_text(ctx, call, 0)?;
    for key in target_keys(engine, ctx, call, 1)? {
        write_meta(engine, ctx, key, "noteText", JsonValue::String(text.clone()))?;
    }
    Ok(Operand::text(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ArraySpec;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine.create_array(ArraySpec::named("test")).unwrap();
        engine
    }

    #[test]
    fn test_parameters_merge_into_array() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine.enter(a1, r#"=PARAMETERS("{\"speed\": 3}")"#).unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::text("PARAMETERS:OK"));
        assert_eq!(engine.array(1).unwrap().params["speed"], 3);
    }

    #[test]
    fn test_parameters_prebinds_call() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine.enter(a1, r#"=PARAMETERS("MOVE", "up", 2)"#).unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::text("MOVE(\"up\",2)"));
    }

    #[test]
    fn test_lock_counts_and_clears() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine.enter(a1, "=LOCK(1, B1:C1)").unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::text("LOCK:2"));
        assert!(engine.set_cell(CellKey::at(1, 1, 0, 0), "x", None).is_err());

        engine.enter(a1, "=LOCK(0)").unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::text("LOCK:OFF"));
        assert!(engine.set_cell(CellKey::at(1, 1, 0, 0), "x", None).is_ok());
    }

    #[test]
    fn test_color_validates_and_tags_meta() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine.enter(a1, "=COLOR(\"#ff0000\", B1)").unwrap();
        let b1 = engine.get_cell(CellKey::at(1, 1, 0, 0));
        assert_eq!(b1.meta.get("color").and_then(JsonValue::as_str), Some("#ff0000"));

        engine.enter(a1, "=COLOR(\"red\")").unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::error("COLOR_FORMAT"));
    }

    #[test]
    fn test_getcolor_default() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine.enter(a1, "=GETCOLOR(B2)").unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::text(DEFAULT_COLOR));
    }

    #[test]
    fn test_value_at_is_one_based() {
        let mut engine = engine();
        engine.set_cell(CellKey::at(1, 1, 2, 0), 7.0, None).unwrap();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine.enter(a1, "=VALUE_AT(2, 3, 1, 1)").unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::Number(7.0));
    }

    #[test]
    fn test_combine_sets_global() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine.enter(a1, "=COMBINE(1)").unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::text("Combine Mode: ON"));
        assert_eq!(engine.global(COMBINE_GLOBAL), Some(&Value::Number(1.0)));
    }
}
