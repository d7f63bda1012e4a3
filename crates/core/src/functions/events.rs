//! Event listeners, select hooks and array placement.

use std::collections::BTreeSet;

use voxcel_formulas::FunctionCall;
use voxcel_primitives::Value;
use voxcel_sheet::{Offset, SelectHook};

use super::{action_text, array_ref, is_off_switch, FnTag, FunctionDefinition, FunctionRegistry};
use crate::engine::Engine;
use crate::error::EvalError;
use crate::eval::{EvalContext, Operand};
use crate::world::Listener;

const PURE: &[FnTag] = &[FnTag::Pure];
const META: &[FnTag] = &[FnTag::Meta];
const ACTION: &[FnTag] = &[FnTag::Action];
const SCENE_ACTION: &[FnTag] = &[FnTag::Scene, FnTag::Action];

/// Global holding the payload of the most recent firing of an event.
pub const EVENT_PAYLOAD_PREFIX: &str = "event.payload.";

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("ON_EVENT", FunctionDefinition::fixed(2, META, on_event));
    registry.register("FIRE_EVENT", FunctionDefinition::range(1, 2, ACTION, fire_event));
    registry.register("ON_SELECT", FunctionDefinition::range(1, 2, META, on_select));
    registry.register("GET_ARRAY_POS", FunctionDefinition::range(0, 1, PURE, get_array_pos));
    registry.register(
        "SET_ARRAY_POS",
        FunctionDefinition::fixed(4, SCENE_ACTION, set_array_pos),
    );
}

/// Register the anchor's listener for an event, replacing its previous one.
fn on_event(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let name = engine.arg_text(ctx, call, 0)?.trim().to_string();
    let formula = action_text(engine, ctx, &call.args[1])?;
    if name.is_empty() || formula.trim() == "=" {
        return Err(EvalError::message("ON_EVENT:ARGS"));
    }
    let anchor = ctx.anchor;
    let registered = engine.world.listeners.entry(name.clone()).or_default();
    registered.retain(|listener| listener.anchor != anchor);
    registered.push(Listener {
        anchor,
        formula: formula.clone(),
    });
    Ok(Operand::text(format!("Listen[{name}]: {formula}")))
}

/// Run every listener of an event once at its own anchor.
///
/// Listeners share the caller's transaction when there is one. An event
/// fired again from one of its own listeners is rejected.
fn fire_event(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let name = engine.arg_text(ctx, call, 0)?.trim().to_string();
    if name.is_empty() {
        return Err(EvalError::message("FIRE_EVENT:NAME_REQUIRED"));
    }
    let payload = engine.arg_value(ctx, call, 1)?;
    let key = format!("{EVENT_PAYLOAD_PREFIX}{name}");
    if !payload.is_empty() && engine.world.globals.get(&key) != Some(&payload) {
        engine.world.globals.insert(key.clone(), payload.clone());
        engine.dirty_globals.insert(key);
    }
    if !engine.firing.insert(name.clone()) {
        return Err(EvalError::message(format!("FIRE_EVENT:RECURSIVE:{name}")));
    }

    let listeners = engine.world.listeners(&name).to_vec();
    for listener in listeners {
        let live = engine
            .world
            .cell(listener.anchor.key())
            .is_some_and(|cell| cell.has_formula());
        if !live {
            continue;
        }
        run_listener(engine, ctx, &name, &listener);
    }
    engine.firing.remove(&name);

    if payload.is_empty() {
        Ok(Operand::text(format!("Fired[{name}]")))
    } else {
        Ok(Operand::text(format!("Fired[{name}] with {payload}")))
    }
}

fn run_listener(engine: &mut Engine, ctx: &mut EvalContext<'_>, event: &str, listener: &Listener) {
    let value = match ctx.tx_mut() {
        Some(tx) => engine.execute_formula(Some(tx), listener.anchor, &listener.formula, false),
        None => {
            let mut tx = engine.start(&format!("event.{event}"), "event dispatch");
            let value =
                engine.execute_formula(Some(&mut tx), listener.anchor, &listener.formula, false);
            if value.is_error() {
                engine.rollback(tx);
            } else {
                engine.commit(tx);
            }
            value
        }
    };
    if value.is_error() {
        tracing::warn!(
            "Listener for {} at {} failed: {}",
            event,
            listener.anchor,
            value
        );
    }
}

/// `ON_SELECT(range?, action)` or `ON_SELECT("off")`.
fn on_select(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let anchor = ctx.anchor;
    if call.args.len() == 1 && is_off_switch(&call.args[0]) {
        if let Some(array) = engine.world.arrays.get_mut(&anchor.arr()) {
            array.replace_hook(anchor.coord(), None);
        }
        return Ok(Operand::text("on_select:OFF"));
    }

    let action_index = if call.args.len() >= 2 { 1 } else { 0 };
    let action = action_text(engine, ctx, &call.args[action_index])?;
    let mut cells = BTreeSet::new();
    if action_index == 1 {
        let operand = engine.arg_operand(ctx, call, 0)?;
        cells.extend(
            engine
                .operand_keys(&operand)?
                .into_iter()
                .filter(|key| key.arr == anchor.arr())
                .map(|key| key.coord),
        );
    }
    if cells.is_empty() {
        cells.insert(anchor.coord());
    }
    let count = cells.len();
    if let Some(array) = engine.world.arrays.get_mut(&anchor.arr()) {
        array.replace_hook(
            anchor.coord(),
            Some(SelectHook {
                anchor: anchor.coord(),
                cells,
                action,
            }),
        );
    }
    Ok(Operand::text(format!("on_select:{count}")))
}

fn get_array_pos(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let id = array_ref(engine, ctx, call, 0)?;
    let Some(offset) = engine.world.array(id).map(|a| a.offset) else {
        return Ok(Operand::text(""));
    };
    Ok(Operand::text(format!(
        "{{\"x\":{},\"y\":{},\"z\":{}}}",
        Value::Number(offset.x),
        Value::Number(offset.y),
        Value::Number(offset.z)
    )))
}

/// Move an array (and whatever is docked to it). Unknown targets fall back
/// to the anchor's own array.
fn set_array_pos(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let id = array_ref(engine, ctx, call, 0)
        .ok()
        .filter(|id| engine.world.array(*id).is_some())
        .unwrap_or(ctx.anchor.arr());
    let x = engine.arg_value(ctx, call, 1)?.to_number_or(0.0);
    let y = engine.arg_value(ctx, call, 2)?.to_number_or(0.0);
    let z = engine.arg_value(ctx, call, 3)?.to_number_or(0.0);
    engine.set_array_offset(id, Offset::new(x, y, z))?;
    Ok(Operand::text(format!(
        "Pos:{},{},{}",
        Value::Number(x),
        Value::Number(y),
        Value::Number(z)
    )))
}
