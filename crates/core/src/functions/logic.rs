//! Logic, comparison and neighbourhood functions.

use voxcel_formulas::FunctionCall;
use voxcel_primitives::{CellKey, Value};

use super::{FnTag, FunctionDefinition, FunctionRegistry};
use crate::engine::Engine;
use crate::error::EvalError;
use crate::eval::{EvalContext, Operand};

const PURE: &[FnTag] = &[FnTag::Pure];

/// Unit steps for `ADJACENT`, in its default order.
const DIRECTIONS: [(&str, (i64, i64, i64)); 6] = [
    ("north", (0, -1, 0)),
    ("south", (0, 1, 0)),
    ("east", (1, 0, 0)),
    ("west", (-1, 0, 0)),
    ("front", (0, 0, -1)),
    ("back", (0, 0, 1)),
];

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("IF", FunctionDefinition::range(2, 3, PURE, if_fn));
    registry.register("REVERSE", FunctionDefinition::fixed(1, PURE, reverse));
    registry.register("ADD", FunctionDefinition::variadic(0, PURE, add));
    registry.register("MUL", FunctionDefinition::variadic(0, PURE, mul));
    registry.register("AND", FunctionDefinition::variadic(1, PURE, and_fn));
    registry.register("OR", FunctionDefinition::variadic(1, PURE, or_fn));
    registry.register("NOT", FunctionDefinition::fixed(1, PURE, not_fn));
    registry.register("EQ", FunctionDefinition::fixed(2, PURE, eq));
    registry.register("NEQ", FunctionDefinition::fixed(2, PURE, neq));
    registry.register("GT", FunctionDefinition::fixed(2, PURE, gt));
    registry.register("GTE", FunctionDefinition::fixed(2, PURE, gte));
    registry.register("LT", FunctionDefinition::fixed(2, PURE, lt));
    registry.register("LTE", FunctionDefinition::fixed(2, PURE, lte));
    registry.register("CLAMP", FunctionDefinition::fixed(3, PURE, clamp));
    registry.register("ADJACENT", FunctionDefinition::variadic(0, PURE, adjacent));
    registry.register("DETECT", FunctionDefinition::range(1, 2, PURE, detect));
    registry.register("ISNUMBER", FunctionDefinition::range(0, 1, PURE, is_number));
    registry.register("SEARCH", FunctionDefinition::range(2, 3, PURE, search));
}

fn flag(b: bool) -> Operand {
    Operand::Value(Value::Number(if b { 1.0 } else { 0.0 }))
}

/// Lists are truthy when any element is.
fn truthy(engine: &Engine, operand: &Operand) -> Result<bool, EvalError> {
    match operand {
        Operand::List(values) => Ok(values.iter().any(Value::is_truthy)),
        other => Ok(engine.scalar(other)?.is_truthy()),
    }
}

/// Only the chosen branch is evaluated.
fn if_fn(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let cond = engine.arg_operand(ctx, call, 0)?;
    if let Operand::Value(Value::Error(_)) = cond {
        return Ok(cond);
    }
    if truthy(engine, &cond)? {
        engine.arg_operand(ctx, call, 1)
    } else if call.args.len() > 2 {
        engine.arg_operand(ctx, call, 2)
    } else {
        Ok(Operand::text(""))
    }
}

fn reverse(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let operand = engine.arg_operand(ctx, call, 0)?;
    if matches!(operand, Operand::List(_) | Operand::Range(_)) {
        let values = engine.flatten(&operand)?;
        let joined: Vec<String> = values.iter().rev().map(ToString::to_string).collect();
        return Ok(Operand::text(format!("[{}]", joined.join(","))));
    }
    let text = engine.scalar(&operand)?.to_string();
    Ok(Operand::text(text.chars().rev().collect::<String>()))
}

fn first_error(values: &[Value]) -> Option<Operand> {
    values
        .iter()
        .find(|v| v.is_error())
        .map(|v| Operand::Value(v.clone()))
}

fn add(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let values = engine.flat_args(ctx, call, 0)?;
    if let Some(err) = first_error(&values) {
        return Ok(err);
    }
    let sum: f64 = values.iter().map(|v| v.to_number_or(0.0)).sum();
    Ok(Operand::Value(Value::Number(sum)))
}

fn mul(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let values = engine.flat_args(ctx, call, 0)?;
    if let Some(err) = first_error(&values) {
        return Ok(err);
    }
    let product: f64 = values.iter().map(|v| v.to_number_or(1.0)).product();
    Ok(Operand::Value(Value::Number(product)))
}

fn and_fn(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let values = engine.flat_args(ctx, call, 0)?;
    Ok(flag(values.iter().all(Value::is_truthy)))
}

fn or_fn(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let values = engine.flat_args(ctx, call, 0)?;
    Ok(flag(values.iter().any(Value::is_truthy)))
}

fn not_fn(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let operand = engine.arg_operand(ctx, call, 0)?;
    Ok(flag(!truthy(engine, &operand)?))
}

fn pair(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<(Value, Value), EvalError> {
    Ok((
        engine.arg_value(ctx, call, 0)?,
        engine.arg_value(ctx, call, 1)?,
    ))
}

/// Empty compares as zero; other non-numeric text never compares true.
fn numeric(value: &Value) -> f64 {
    if value.is_empty() {
        0.0
    } else {
        value.as_number().unwrap_or(f64::NAN)
    }
}

fn eq(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let (a, b) = pair(engine, ctx, call)?;
    Ok(flag(a.loose_eq(&b)))
}

fn neq(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let (a, b) = pair(engine, ctx, call)?;
    Ok(flag(!a.loose_eq(&b)))
}

fn compare(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
    test: fn(f64, f64) -> bool,
) -> Result<Operand, EvalError> {
    let (a, b) = pair(engine, ctx, call)?;
    Ok(flag(test(numeric(&a), numeric(&b))))
}

fn gt(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    compare(engine, ctx, call, |a, b| a > b)
}

fn gte(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    compare(engine, ctx, call, |a, b| a >= b)
}

fn lt(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    compare(engine, ctx, call, |a, b| a < b)
}

fn lte(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    compare(engine, ctx, call, |a, b| a <= b)
}

fn clamp(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let x = engine.arg_value(ctx, call, 0)?.to_number_or(0.0);
    let min = engine.arg_value(ctx, call, 1)?.to_number_or(0.0);
    let max = engine.arg_value(ctx, call, 2)?.to_number_or(0.0);
    Ok(Operand::Value(Value::Number(x.max(min).min(max))))
}

fn direction(token: &str) -> Option<(i64, i64, i64)> {
    let lower = token.to_ascii_lowercase();
    if let Some((_, step)) = DIRECTIONS.iter().find(|(name, _)| *name == lower) {
        return Some(*step);
    }
    let name = match token.to_ascii_uppercase().as_str() {
        "N" | "-Y" => "north",
        "S" | "+Y" | "Y" => "south",
        "E" | "+X" | "X" => "east",
        "W" | "-X" => "west",
        "F" | "-Z" => "front",
        "B" | "+Z" | "Z" => "back",
        _ => return None,
    };
    DIRECTIONS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, step)| *step)
}

/// Values of the neighbouring cells in the given directions (all six by
/// default). Unknown tokens are ignored; cells off the grid read as empty.
fn adjacent(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let mut steps = Vec::new();
    for value in engine.flat_args(ctx, call, 0)? {
        let text = value.to_string();
        steps.extend(
            text.split(|c: char| c.is_whitespace() || c == ',')
                .filter(|t| !t.is_empty())
                .filter_map(direction),
        );
    }
    if steps.is_empty() {
        steps = DIRECTIONS.iter().map(|(_, step)| *step).collect();
    }

    let anchor = ctx.anchor;
    let mut values = Vec::with_capacity(steps.len());
    for (dx, dy, dz) in steps {
        match anchor.coord().offset(dx, dy, dz) {
            Some(coord) => {
                let key = CellKey::new(anchor.arr(), coord);
                ctx.record_read(key);
                values.push(engine.read_value(key));
            }
            None => values.push(Value::Empty),
        }
    }
    if values.len() == 1 {
        Ok(Operand::Value(values.remove(0)))
    } else {
        Ok(Operand::List(values))
    }
}

/// Nearest cell along the six axis directions whose text equals the
/// lookup value, as `X:2`, `Y:-1` and so on.
fn detect(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let target = engine.arg_value(ctx, call, 0)?.to_string();
    let anchor = ctx.anchor;
    let Some(size) = engine.world.array(anchor.arr()).map(|a| a.size) else {
        return Ok(Operand::text(""));
    };
    let max_range = if call.args.len() > 1 {
        engine.arg_value(ctx, call, 1)?.as_int().unwrap_or(0).abs().max(1)
    } else {
        i64::from(size.largest_axis().max(1))
    };

    let axes = [
        ('X', (1, 0, 0)),
        ('X', (-1, 0, 0)),
        ('Y', (0, 1, 0)),
        ('Y', (0, -1, 0)),
        ('Z', (0, 0, 1)),
        ('Z', (0, 0, -1)),
    ];
    for (axis, (dx, dy, dz)) in axes {
        for step in 1..=max_range {
            let Some(coord) = anchor.coord().offset(dx * step, dy * step, dz * step) else {
                break;
            };
            if !size.contains(coord) {
                break;
            }
            let key = CellKey::new(anchor.arr(), coord);
            ctx.record_read(key);
            if engine.read_value(key).to_string() == target {
                let signed = if dx + dy + dz > 0 { step } else { -step };
                return Ok(Operand::text(format!("{axis}:{signed}")));
            }
        }
    }
    Ok(Operand::text(""))
}

fn is_number(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let value = engine.arg_value(ctx, call, 0)?;
    Ok(flag(value.as_number().is_some()))
}

/// Case-insensitive, 1-based position of `find` in `within`.
fn search(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let find = engine.arg_text(ctx, call, 0)?.to_lowercase();
    let within: Vec<char> = engine.arg_text(ctx, call, 1)?.to_lowercase().chars().collect();
    let start = if call.args.len() > 2 {
        super::int_arg(engine, ctx, call, 2, 1)?.max(1)
    } else {
        1
    };
    let start = usize::try_from(start).unwrap_or(usize::MAX);
    if start > within.len() {
        return Err(EvalError::message("SEARCH:OUT_OF_RANGE"));
    }
    let needle: Vec<char> = find.chars().collect();
    let found = (start - 1..within.len())
        .find(|&i| within[i..].starts_with(&needle));
    match found {
        Some(i) => Ok(Operand::Value(Value::from(i + 1))),
        None => Err(EvalError::message("SEARCH:NOT_FOUND")),
    }
}
