//! Array lifecycle, lookups and the functions that emit cell blocks.
//!
//! Emitting functions (`ARRAY`, `SPLIT`, `SHIFT`, `ROTATE`) first clear
//! whatever their anchor emitted on the previous run, then write each cell
//! tagged with the anchor as its emitter.

use voxcel_formulas::FunctionCall;
use voxcel_primitives::address::{format_absolute, format_local, parse_address};
use voxcel_primitives::{Anchor, ArrayId, CellBox, CellCoord, CellKey, Size3, Value};
use voxcel_sheet::{DockGroup, DockMode, NamedBlock, Offset};

use super::{array_ref, int_arg, FnTag, FunctionDefinition, FunctionRegistry};
use crate::engine::{ArraySpec, Engine};
use crate::error::EvalError;
use crate::eval::{EvalContext, Operand};
use crate::transaction::CellPatch;
use crate::world::LiveTransform;

const PURE: &[FnTag] = &[FnTag::Pure];
const ACTION: &[FnTag] = &[FnTag::Action];
const META_PURE: &[FnTag] = &[FnTag::Meta, FnTag::Pure];
const PURE_BLOCK: &[FnTag] = &[FnTag::Pure, FnTag::Block];
const ACTION_BLOCK: &[FnTag] = &[FnTag::Action, FnTag::Block];
const SCENE_ACTION: &[FnTag] = &[FnTag::Scene, FnTag::Action];
const SCENE_ACTION_BLOCK: &[FnTag] = &[FnTag::Scene, FnTag::Action, FnTag::Block];

/// Gap left between a host array and one it creates.
const CREATE_GAP: f64 = 1.0;
const DEFAULT_BLOCK_NAME: &str = "Block";

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("CREATE", FunctionDefinition::range(0, 6, ACTION, create));
    registry.register("GET_NEXT_ID", FunctionDefinition::fixed(0, META_PURE, get_next_id));
    for name in ["DELETE", "DEL", "REMOVE"] {
        registry.register(name, FunctionDefinition::range(0, 1, ACTION, delete));
    }
    registry.register("SPLIT", FunctionDefinition::range(2, 3, PURE_BLOCK, split));
    registry.register("INDEX", FunctionDefinition::range(2, 4, PURE, index));
    registry.register("MATCH", FunctionDefinition::range(2, 3, PURE, match_fn));
    registry.register("XLOOKUP", FunctionDefinition::range(3, 4, PURE, xlookup));
    registry.register("ARRAY", FunctionDefinition::variadic(1, ACTION_BLOCK, array));
    registry.register("STORE_ARRAY", FunctionDefinition::variadic(1, PURE, store_array));
    registry.register("DOCK", FunctionDefinition::variadic(1, SCENE_ACTION, dock));
    registry.register("SHIFT", FunctionDefinition::range(2, 4, PURE_BLOCK, shift));
    registry.register("ROTATE", FunctionDefinition::range(1, 2, PURE_BLOCK, rotate));
    registry.register("OFFSET", FunctionDefinition::range(1, 4, PURE, offset));
    registry.register("GET", FunctionDefinition::fixed(1, PURE, get));
    registry.register("ADDRESS", FunctionDefinition::range(0, 1, PURE, address));
    registry.register("SELF", FunctionDefinition::fixed(0, PURE, self_fn));
    registry.register("ALT_ADDRESS", FunctionDefinition::range(0, 1, PURE, alt_address));
    registry.register(
        "3D_TRANSLATE",
        FunctionDefinition::range(3, 4, SCENE_ACTION_BLOCK, translate),
    );
}

fn relative(anchor: Anchor, dx: i64, dy: i64, dz: i64) -> Option<CellKey> {
    anchor
        .coord()
        .offset(dx, dy, dz)
        .map(|coord| CellKey::new(anchor.arr(), coord))
}

fn clear_previous(engine: &mut Engine, ctx: &mut EvalContext<'_>) {
    let anchor = ctx.anchor;
    if let Some(tx) = ctx.tx_mut() {
        engine.clear_emissions(tx, anchor);
    }
}

/// Write one emitted cell. The anchor itself keeps its formula.
fn emit(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    key: CellKey,
    value: Value,
) -> Result<(), EvalError> {
    let anchor = ctx.anchor;
    let patch = if key == anchor.key() {
        ctx.anchor_patch(value)
    } else {
        CellPatch::value(value).with_formula(None).internal()
    };
    engine.write(ctx, key, patch.emitted_by(anchor))?;
    Ok(())
}

/// Emit `cells` at offsets from the anchor. Offsets that fall off the grid
/// are skipped. Returns the value placed on the anchor, or the first one.
fn emit_block(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    cells: Vec<((i64, i64, i64), Value)>,
) -> Result<Value, EvalError> {
    let mut result = cells.first().map(|(_, v)| v.clone()).unwrap_or_default();
    for ((dx, dy, dz), value) in cells {
        let Some(key) = relative(ctx.anchor, dx, dy, dz) else {
            continue;
        };
        if key == ctx.anchor.key() {
            result = value.clone();
        }
        emit(engine, ctx, key, value)?;
    }
    Ok(result)
}

fn positive_size(value: Option<&Value>, fallback: u32) -> u32 {
    value
        .and_then(Value::as_int)
        .and_then(|n| u32::try_from(n.max(1)).ok())
        .unwrap_or(fallback)
}

/// `CREATE(name?, x, y, z, name?, id?)` places a new array beside the host.
/// The anchor keeps the new id and loses its formula.
fn create(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let mut values = Vec::with_capacity(call.args.len());
    for i in 0..call.args.len() {
        values.push(engine.arg_value(ctx, call, i)?);
    }
    let named_first = values
        .first()
        .is_some_and(|v| !v.is_empty() && v.as_number().is_none());
    let start = usize::from(named_first);

    let default = engine.config.default_array_size;
    let size = Size3::new(
        positive_size(values.get(start), default.x),
        positive_size(values.get(start + 1), default.y),
        positive_size(values.get(start + 2), default.z),
    );
    let name = if named_first {
        values.first()
    } else {
        values.get(3)
    }
    .filter(|v| !v.is_empty())
    .map(ToString::to_string);
    let id = values
        .get(4)
        .and_then(Value::as_int)
        .and_then(|n| ArrayId::try_from(n).ok());

    let offset = engine.world.array(ctx.anchor.arr()).map(|host| {
        let x = host.offset.x
            + f64::from(host.size.x) / 2.0
            + f64::from(size.x) / 2.0
            + CREATE_GAP;
        Offset::new(x, host.offset.y, host.offset.z)
    });

    let id = engine.create_array(ArraySpec {
        id,
        name,
        size: Some(size),
        offset,
        ..ArraySpec::default()
    })?;
    ctx.keep_formula = false;
    Ok(Operand::Value(Value::from(id)))
}

fn get_next_id(
    engine: &mut Engine,
    _ctx: &mut EvalContext<'_>,
    _call: &FunctionCall,
) -> Result<Operand, EvalError> {
    Ok(Operand::Value(Value::from(engine.world.lowest_free_id())))
}

fn delete(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let id = array_ref(engine, ctx, call, 0)?;
    engine.delete_array(id)?;
    Ok(Operand::text(format!("Deleted:{id}")))
}

/// `SPLIT(text, delim, each?)` writes the parts upward from the anchor.
/// With `each`, every character of `delim` separates.
fn split(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let text = engine.arg_text(ctx, call, 0)?;
    let delim = engine.arg_text(ctx, call, 1)?;
    let each = engine.arg_value(ctx, call, 2)?.is_truthy();

    let parts: Vec<&str> = if each {
        text.split(|c: char| delim.contains(c)).collect()
    } else if delim.is_empty() {
        vec![text.as_str()]
    } else {
        text.split(delim.as_str()).collect()
    };

    clear_previous(engine, ctx);
    for (i, part) in parts.iter().enumerate().skip(1) {
        let Some(key) = relative(ctx.anchor, 0, -(i as i64), 0) else {
            break;
        };
        emit(engine, ctx, key, Value::from_input(part))?;
    }
    let first = parts.first().map(|p| Value::from_input(p)).unwrap_or_default();
    Ok(Operand::Value(first))
}

/// `INDEX(range|ref, row, col?, depth?)`, all 1-based. Positions past the
/// end of a range clamp to its last row/column/layer.
fn index(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let target = engine.arg_operand(ctx, call, 0)?;
    let row = int_arg(engine, ctx, call, 1, 1).map(|n| n.max(1) - 1)?;
    let col = int_arg(engine, ctx, call, 2, 1).map(|n| n.max(1) - 1)?;
    let depth = int_arg(engine, ctx, call, 3, 1).map(|n| n.max(1) - 1)?;

    let key = match target {
        Operand::Range(cells) => {
            let pick = |min: u32, max: u32, i: i64| {
                let span = i64::from(max - min);
                min + i.min(span) as u32
            };
            CellKey::at(
                cells.arr,
                pick(cells.min.x, cells.max.x, col),
                pick(cells.min.y, cells.max.y, row),
                pick(cells.min.z, cells.max.z, depth),
            )
        }
        Operand::Ref(key) => key
            .coord
            .offset(col, row, depth)
            .map(|coord| CellKey::new(key.arr, coord))
            .ok_or_else(|| EvalError::message("INDEX:OUT_OF_RANGE"))?,
        _ => ctx.anchor.key(),
    };
    ctx.record_read(key);
    Ok(Operand::Value(engine.read_value(key)))
}

/// `MATCH(lookup, range, type?)`: 1-based position or 0. Type 0 is an exact
/// text match; a positive type takes the last value `<=` the lookup, a
/// negative one the last value `>=` it.
fn match_fn(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let lookup = engine.arg_value(ctx, call, 0)?;
    let range = engine.arg_operand(ctx, call, 1)?;
    let kind = int_arg(engine, ctx, call, 2, 0)?;

    let needle = lookup.to_string();
    let target = lookup.to_number_or(0.0);
    let mut position = 0;
    for (i, key) in engine.operand_keys(&range)?.into_iter().enumerate() {
        let value = engine.read_value(key);
        let hit = match kind.signum() {
            0 => value.to_string() == needle,
            1 => value.to_number_or(0.0) <= target,
            _ => value.to_number_or(0.0) >= target,
        };
        if hit {
            position = i + 1;
            if kind == 0 {
                break;
            }
        }
    }
    Ok(Operand::Value(Value::from(position)))
}

fn xlookup(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let lookup = engine.arg_value(ctx, call, 0)?.to_string();
    let keys = engine.arg_operand(ctx, call, 1)?;
    let values = engine.arg_operand(ctx, call, 2)?;
    let not_found = engine.arg_value(ctx, call, 3)?;

    let keys = engine.operand_keys(&keys)?;
    let values = engine.operand_keys(&values)?;
    for (i, key) in keys.into_iter().enumerate() {
        if engine.read_value(key).to_string() != lookup {
            continue;
        }
        return Ok(Operand::Value(
            values
                .get(i)
                .or(values.first())
                .map_or(not_found, |key| engine.read_value(*key)),
        ));
    }
    Ok(Operand::Value(not_found))
}

/// `ARRAY(...)` fills cells starting at the anchor:
///
/// * `ARRAY(range)` copies the range
/// * `ARRAY("fill", w, h, d, value?)`
/// * `ARRAY("csv", text)`, rows down y and columns along x
/// * `ARRAY("list", values...)` / `ARRAY("set", ...)`, down y
/// * `ARRAY("<block name>")`, a stored block down y
///
/// Any other leading text is treated as the first list value.
fn array(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    clear_previous(engine, ctx);

    let head = engine.arg_operand(ctx, call, 0)?;
    if let Some(source) = head.as_box() {
        let cells = source
            .iter()
            .map(|key| {
                let delta = (
                    i64::from(key.coord.x - source.min.x),
                    i64::from(key.coord.y - source.min.y),
                    i64::from(key.coord.z - source.min.z),
                );
                (delta, engine.read_value(key))
            })
            .collect();
        return emit_block(engine, ctx, cells).map(Operand::Value);
    }

    let mode = match engine.scalar(&head)? {
        Value::Text(text) => {
            let mode = text.trim().to_ascii_lowercase();
            let known = matches!(mode.as_str(), "fill" | "csv" | "list" | "set")
                || engine.world.named_block(&mode).is_some();
            known.then_some(mode)
        }
        _ => None,
    };

    let mut cells = Vec::new();
    match mode.as_deref() {
        Some("fill") => {
            let w = int_arg(engine, ctx, call, 1, 1)?.max(1);
            let h = int_arg(engine, ctx, call, 2, 1)?.max(1);
            let d = int_arg(engine, ctx, call, 3, 1)?.max(1);
            let value = if call.args.len() > 4 {
                engine.arg_value(ctx, call, 4)?
            } else {
                Value::Number(1.0)
            };
            let count = w.saturating_mul(h).saturating_mul(d);
            let max = engine.config.max_range_cells;
            if count as u64 > max {
                return Err(EvalError::RangeTooLarge {
                    cells: count as u64,
                    max,
                });
            }
            for z in 0..d {
                for y in 0..h {
                    for x in 0..w {
                        cells.push(((x, y, z), value.clone()));
                    }
                }
            }
        }
        Some("csv") => {
            let raw = engine.arg_text(ctx, call, 1)?;
            for (y, line) in raw.lines().enumerate() {
                for (x, field) in line.split(',').enumerate() {
                    cells.push(((x as i64, y as i64, 0), Value::from_input(field)));
                }
            }
        }
        Some("list" | "set") => {
            let values = engine.flat_args(ctx, call, 1)?;
            cells.extend(down_y(values));
        }
        Some(name) => {
            let values: Vec<Value> = engine
                .world
                .named_block(name)
                .map(|block| block.values().cloned().collect())
                .unwrap_or_default();
            cells.extend(down_y(values));
        }
        None => {
            let values = engine.flat_args(ctx, call, 0)?;
            cells.extend(down_y(values));
        }
    }
    emit_block(engine, ctx, cells).map(Operand::Value)
}

fn down_y(values: Vec<Value>) -> impl Iterator<Item = ((i64, i64, i64), Value)> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| ((0, i as i64, 0), value))
}

/// Save values to the named block library:
///
/// * `STORE_ARRAY(w, h, d, name?)` reads the anchor region, rows going up
/// * `STORE_ARRAY(range, name?)`
/// * `STORE_ARRAY(values..., name)`, a single column
fn store_array(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let head = engine.arg_operand(ctx, call, 0)?;
    let (name, block) = if let Some(source) = head.as_box() {
        let name = engine.arg_text(ctx, call, 1)?;
        let values = engine.flatten(&Operand::Range(source))?;
        (name, NamedBlock::from_values(source.extent(), &values))
    } else if matches!(head, Operand::Value(Value::Number(_))) {
        let size = Size3::new(
            positive_size(Some(&engine.scalar(&head)?), 1),
            positive_size(Some(&engine.arg_value(ctx, call, 1)?), 1),
            positive_size(Some(&engine.arg_value(ctx, call, 2)?), 1),
        );
        let name = engine.arg_text(ctx, call, 3)?;
        let values = region_above_anchor(engine, ctx, size);
        (name, NamedBlock::from_values(size, &values))
    } else {
        let mut values = engine.flat_args(ctx, call, 0)?;
        let named = values.len() > 1
            && values
                .last()
                .is_some_and(|v| matches!(v, Value::Text(_)) && v.as_number().is_none());
        let name = if named {
            values.pop().map(|v| v.to_string()).unwrap_or_default()
        } else {
            String::new()
        };
        let size = Size3::new(1, u32::try_from(values.len()).unwrap_or(u32::MAX), 1);
        (name, NamedBlock::from_values(size, &values))
    };

    let name = match name.trim() {
        "" => DEFAULT_BLOCK_NAME.to_ascii_uppercase(),
        other => other.to_ascii_uppercase(),
    };
    tracing::debug!("Stored block {} ({})", name, block.size);
    engine.world.named_blocks.insert(name.clone(), block);
    Ok(Operand::text(format!("STORE_ARRAY:{name}")))
}

fn region_above_anchor(engine: &Engine, ctx: &mut EvalContext<'_>, size: Size3) -> Vec<Value> {
    let mut values = Vec::new();
    for z in 0..size.z {
        for y in 0..size.y {
            for x in 0..size.x {
                let key = relative(ctx.anchor, i64::from(x), -i64::from(y), i64::from(z));
                values.push(key.map_or(Value::Empty, |key| {
                    ctx.record_read(key);
                    engine.read_value(key)
                }));
            }
        }
    }
    values
}

/// `DOCK(mode?, arrays...)` groups arrays so they move together. Groups
/// that shared a member with the new one are replaced.
fn dock(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let mut operands = Vec::with_capacity(call.args.len());
    for i in 0..call.args.len() {
        operands.push(engine.arg_operand(ctx, call, i)?);
    }

    let mut mode = DockMode::Parent;
    if let Some(Operand::Value(Value::Text(text))) = operands.first() {
        let text = text.trim();
        if !text.starts_with('@') && text.parse::<f64>().is_err() {
            if text.eq_ignore_ascii_case("all") {
                mode = DockMode::All;
            }
            operands.remove(0);
        }
    }

    let mut members: Vec<ArrayId> = Vec::new();
    for operand in &operands {
        let Some(id) = dock_member(engine, ctx, operand)? else {
            continue;
        };
        if engine.world.array(id).is_some() && !members.contains(&id) {
            members.push(id);
        }
    }
    if members.is_empty() {
        return Err(EvalError::message("DOCK:EMPTY"));
    }

    let anchor = ctx.anchor;
    let docks = &mut engine.world.docks;
    if let Some(previous) = docks.by_anchor.remove(&anchor) {
        docks.groups.remove(&previous);
    }
    docks
        .groups
        .retain(|_, group| !group.members.iter().any(|m| members.contains(m)));
    let group_id = uuid::Uuid::new_v4().to_string();
    docks.groups.insert(
        group_id.clone(),
        DockGroup {
            mode,
            members: members.clone(),
            parent_id: members.first().copied(),
        },
    );
    let groups = &docks.groups;
    docks.by_anchor.retain(|_, id| groups.contains_key(id));
    docks.by_anchor.insert(anchor, group_id);

    let label = match mode {
        DockMode::All => "all",
        DockMode::Parent => "parent",
    };
    let ids: Vec<String> = members.iter().map(ToString::to_string).collect();
    Ok(Operand::text(format!("Dock:{label} {}", ids.join(","))))
}

fn dock_member(
    engine: &Engine,
    ctx: &EvalContext<'_>,
    operand: &Operand,
) -> Result<Option<ArrayId>, EvalError> {
    if let Some(cells) = operand.as_box() {
        return Ok(Some(cells.arr));
    }
    let value = engine.scalar(operand)?;
    if let Some(n) = value.as_int() {
        return Ok(ArrayId::try_from(n).ok());
    }
    let text = value.to_string();
    let text = text.trim();
    if text.starts_with('@') {
        return Ok(parse_address(text, ctx.anchor.key()).ok().map(|key| key.arr));
    }
    Ok(engine.world.array_by_name(text).map(|array| array.id))
}

/// `SHIFT(input, dx, dy?, dz?)` copies the input values to a column that
/// starts at the anchor moved by the offset.
fn shift(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let input = engine.arg_operand(ctx, call, 0)?;
    let values = engine.flatten(&input)?;
    let dx = int_arg(engine, ctx, call, 1, 0)?;
    let dy = int_arg(engine, ctx, call, 2, 0)?;
    let dz = int_arg(engine, ctx, call, 3, 0)?;

    clear_previous(engine, ctx);
    let anchor = ctx.anchor;
    for (i, value) in values.into_iter().enumerate() {
        let Some(key) = relative(anchor, dx, dy + i as i64, dz) else {
            continue;
        };
        if key != anchor.key() {
            emit(engine, ctx, key, value)?;
        }
    }
    Ok(Operand::text("SHIFT:OK"))
}

/// Rotation plane of `ROTATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plane {
    Xy,
    Yz,
    Xz,
}

impl Plane {
    fn parse(value: &Value) -> Self {
        match value.to_string().trim().to_ascii_uppercase().as_str() {
            "" | "XY" | "0" => Self::Xy,
            "YZ" | "1" => Self::Yz,
            _ => Self::Xz,
        }
    }

    /// Where offset `(dx, dy, dz)` of a box with extent `size` lands.
    fn place(self, size: Size3, dx: i64, dy: i64, dz: i64) -> (i64, i64, i64) {
        let w = i64::from(size.x);
        let h = i64::from(size.y);
        match self {
            Self::Xy => (dy, w - 1 - dx, dz),
            Self::Yz => (dx, dz, h - 1 - dy),
            Self::Xz => (dz, dy, w - 1 - dx),
        }
    }

    /// Axis a plain list is laid along.
    fn along(self, i: i64) -> (i64, i64, i64) {
        match self {
            Self::Xy => (0, i, 0),
            Self::Yz => (0, 0, i),
            Self::Xz => (i, 0, 0),
        }
    }
}

/// `ROTATE(range|list, axis)` writes a quarter-turned copy of a range at
/// the anchor. Plain values are laid out along the plane's axis instead.
fn rotate(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let source = engine.arg_operand(ctx, call, 0)?;
    let plane = Plane::parse(&engine.arg_value(ctx, call, 1)?);
    clear_previous(engine, ctx);

    let mut cells = Vec::new();
    let first = match source {
        Operand::Range(cells_box) => {
            let size = cells_box.extent();
            for key in cells_box.iter() {
                let delta = delta_in(cells_box, key.coord);
                let target = plane.place(size, delta.0, delta.1, delta.2);
                if target != (0, 0, 0) {
                    cells.push((target, engine.read_value(key)));
                }
            }
            engine.read_value(CellKey::new(cells_box.arr, cells_box.min))
        }
        other => {
            let values = engine.flatten(&other)?;
            for (i, value) in values.iter().enumerate().skip(1) {
                cells.push((plane.along(i as i64), value.clone()));
            }
            values.first().cloned().unwrap_or_default()
        }
    };
    cells.push(((0, 0, 0), first.clone()));
    emit_block(engine, ctx, cells)?;
    Ok(Operand::Value(first))
}

fn delta_in(cells: CellBox, coord: CellCoord) -> (i64, i64, i64) {
    (
        i64::from(coord.x - cells.min.x),
        i64::from(coord.y - cells.min.y),
        i64::from(coord.z - cells.min.z),
    )
}

/// `OFFSET(base, dx, dy, dz)` reads the cell at `base` moved by the offset.
/// A base that is neither a reference nor address text means the anchor.
fn offset(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let base = engine.arg_operand(ctx, call, 0)?;
    let base = match base.as_box() {
        Some(cells) => CellKey::new(cells.arr, cells.min),
        None => {
            let text = engine.scalar(&base)?.to_string();
            parse_address(text.trim(), ctx.anchor.key()).unwrap_or(ctx.anchor.key())
        }
    };
    let dx = int_arg(engine, ctx, call, 1, 0)?;
    let dy = int_arg(engine, ctx, call, 2, 0)?;
    let dz = int_arg(engine, ctx, call, 3, 0)?;
    let Some(coord) = base.coord.offset(dx, dy, dz) else {
        return Ok(Operand::empty());
    };
    let key = CellKey::new(base.arr, coord);
    ctx.record_read(key);
    Ok(Operand::Value(engine.read_value(key)))
}

fn get(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let target = engine.arg_operand(ctx, call, 0)?;
    let cells = target
        .as_box()
        .ok_or_else(|| EvalError::message("GET:NEEDS_REF"))?;
    Ok(Operand::Value(
        engine.read_value(CellKey::new(cells.arr, cells.min)),
    ))
}

fn reference_or_anchor(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<CellKey, EvalError> {
    let target = engine.arg_operand(ctx, call, 0)?;
    Ok(target
        .as_box()
        .map_or(ctx.anchor.key(), |cells| CellKey::new(cells.arr, cells.min)))
}

/// `ADDRESS(ref?)` in spreadsheet notation, e.g. `B3β`.
fn address(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let key = reference_or_anchor(engine, ctx, call)?;
    let text = format_local(key.coord).map_err(|e| EvalError::message(format!("ADDRESS:{e}")))?;
    Ok(Operand::text(text))
}

fn self_fn(
    _engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    _call: &FunctionCall,
) -> Result<Operand, EvalError> {
    Ok(Operand::text(format_absolute(ctx.anchor.key())))
}

fn alt_address(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let key = reference_or_anchor(engine, ctx, call)?;
    Ok(Operand::text(format_absolute(key)))
}

/// `3D_TRANSLATE(dx, dy, dz, array?)` shifts an array's offset for as long
/// as the formula stays in place.
fn translate(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let dx = engine.arg_value(ctx, call, 0)?.to_number_or(0.0);
    let dy = engine.arg_value(ctx, call, 1)?.to_number_or(0.0);
    let dz = engine.arg_value(ctx, call, 2)?.to_number_or(0.0);
    let target = array_ref(engine, ctx, call, 3)?;

    let anchor = ctx.anchor;
    let tx = ctx
        .tx_mut()
        .ok_or_else(|| EvalError::TransactionRequired(call.name.clone()))?;
    engine.apply_transform(tx, anchor, LiveTransform { target, dx, dy, dz })?;
    Ok(Operand::text(format!(
        "Translate:{},{},{}",
        Value::Number(dx),
        Value::Number(dy),
        Value::Number(dz)
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxcel_primitives::Anchor;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine.create_array(ArraySpec::named("test")).unwrap();
        engine
    }

    fn key(x: u32, y: u32) -> CellKey {
        CellKey::at(1, x, y, 0)
    }

    #[test]
    fn test_create_places_array_beside_host() {
        let mut engine = engine();
        engine.enter(key(0, 0), "=CREATE(\"side\", 2, 2, 2)").unwrap();
        assert_eq!(engine.get_cell_value(key(0, 0)), Value::Number(2.0));
        assert!(engine.get_cell(key(0, 0)).formula.is_none());

        let created = engine.array(2).unwrap();
        assert_eq!(created.name, "side");
        assert_eq!(created.size, Size3::new(2, 2, 2));
        // Host is 6 wide: 3 + 1 + gap.
        assert!((created.offset.x - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_get_next_id_and_delete() {
        let mut engine = engine();
        engine.create_array(ArraySpec::named("other").with_id(3)).unwrap();
        engine.enter(key(0, 0), "=GET_NEXT_ID()").unwrap();
        assert_eq!(engine.get_cell_value(key(0, 0)), Value::Number(2.0));

        engine.enter(key(1, 0), "=DELETE(\"other\")").unwrap();
        assert_eq!(engine.get_cell_value(key(1, 0)), Value::text("Deleted:3"));
        assert!(engine.array(3).is_none());
    }

    #[test]
    fn test_array_fill_tags_emitted_cells() {
        let mut engine = engine();
        let anchor = Anchor::from(key(0, 0));
        engine.enter(key(0, 0), "=ARRAY(\"fill\", 2, 2, 1, 7)").unwrap();
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let cell = engine.get_cell(key(x, y));
            assert_eq!(cell.value, Value::Number(7.0));
            assert_eq!(cell.meta.emitter(), Some(anchor));
        }
        assert_eq!(engine.world().emissions().emitted_by(anchor).unwrap().len(), 3);

        engine.enter(key(0, 0), "").unwrap();
        for (x, y) in [(1, 0), (0, 1), (1, 1)] {
            assert!(engine.get_cell(key(x, y)).is_blank());
        }
        assert!(engine.world().emissions().is_empty());
    }

    #[test]
    fn test_array_list_and_csv() {
        let mut engine = engine();
        engine.enter(key(0, 0), "=ARRAY(\"list\", 1, 2, 3)").unwrap();
        assert_eq!(engine.get_cell_value(key(0, 2)), Value::Number(3.0));

        engine.enter(key(2, 0), r#"=ARRAY("csv", "a,b\nc,d")"#).unwrap();
        assert_eq!(engine.get_cell_value(key(3, 0)), Value::text("b"));
        assert_eq!(engine.get_cell_value(key(2, 1)), Value::text("c"));
        assert_eq!(engine.get_cell_value(key(2, 0)), Value::text("a"));
    }

    #[test]
    fn test_array_rerun_replaces_previous_emission() {
        let mut engine = engine();
        engine.enter(key(0, 0), "=ARRAY(\"list\", 1, 2, 3)").unwrap();
        engine.enter(key(0, 0), "=ARRAY(\"list\", 9)").unwrap();
        assert_eq!(engine.get_cell_value(key(0, 0)), Value::Number(9.0));
        assert!(engine.get_cell(key(0, 1)).is_blank());
        assert!(engine.get_cell(key(0, 2)).is_blank());
    }

    #[test]
    fn test_store_array_then_read_back() {
        let mut engine = engine();
        engine.set_cell(key(0, 0), 1.0, None).unwrap();
        engine.set_cell(key(0, 1), 2.0, None).unwrap();
        engine
            .enter(key(1, 0), "=STORE_ARRAY(A1:A2, \"pair\")")
            .unwrap();
        assert_eq!(engine.get_cell_value(key(1, 0)), Value::text("STORE_ARRAY:PAIR"));
        assert_eq!(engine.world().named_block("pair").unwrap().size, Size3::new(1, 2, 1));

        engine.enter(key(3, 0), "=ARRAY(\"pair\")").unwrap();
        assert_eq!(engine.get_cell_value(key(3, 0)), Value::Number(1.0));
        assert_eq!(engine.get_cell_value(key(3, 1)), Value::Number(2.0));
    }

    #[test]
    fn test_split_writes_upward() {
        let mut engine = engine();
        engine.enter(key(0, 3), "=SPLIT(\"a-b-c\", \"-\")").unwrap();
        assert_eq!(engine.get_cell_value(key(0, 3)), Value::text("a"));
        assert_eq!(engine.get_cell_value(key(0, 2)), Value::text("b"));
        assert_eq!(engine.get_cell_value(key(0, 1)), Value::text("c"));
        assert!(engine.get_cell(key(0, 3)).has_formula());
    }

    #[test]
    fn test_index_match_xlookup() {
        let mut engine = engine();
        for (y, (name, score)) in [("ann", 3.0), ("bob", 5.0), ("cy", 8.0)].into_iter().enumerate() {
            engine.set_cell(key(0, y as u32), name, None).unwrap();
            engine.set_cell(key(1, y as u32), score, None).unwrap();
        }
        engine.enter(key(3, 0), "=INDEX(A1:B3, 2, 2)").unwrap();
        assert_eq!(engine.get_cell_value(key(3, 0)), Value::Number(5.0));
        engine.enter(key(3, 1), "=INDEX(A1:B3, 9, 1)").unwrap();
        assert_eq!(engine.get_cell_value(key(3, 1)), Value::text("cy"));
        engine.enter(key(3, 2), "=MATCH(\"bob\", A1:A3)").unwrap();
        assert_eq!(engine.get_cell_value(key(3, 2)), Value::Number(2.0));
        engine.enter(key(3, 3), "=MATCH(6, B1:B3, 1)").unwrap();
        assert_eq!(engine.get_cell_value(key(3, 3)), Value::Number(2.0));
        engine.enter(key(4, 0), "=XLOOKUP(\"cy\", A1:A3, B1:B3)").unwrap();
        assert_eq!(engine.get_cell_value(key(4, 0)), Value::Number(8.0));
        engine.enter(key(4, 1), "=XLOOKUP(\"zed\", A1:A3, B1:B3, \"none\")").unwrap();
        assert_eq!(engine.get_cell_value(key(4, 1)), Value::text("none"));
    }

    #[test]
    fn test_rotate_range_in_xy_plane() {
        let mut engine = engine();
        // A1=1 B1=2 / A2=3 B2=4
        for (x, y, v) in [(0, 0, 1.0), (1, 0, 2.0), (0, 1, 3.0), (1, 1, 4.0)] {
            engine.set_cell(key(x, y), v, None).unwrap();
        }
        engine.enter(key(3, 0), "=ROTATE(A1:B2, \"XY\")").unwrap();
        assert_eq!(engine.get_cell_value(key(3, 0)), Value::Number(1.0));
        // B1 would land on the anchor, which keeps the first value instead.
        assert_eq!(engine.get_cell_value(key(3, 1)), Value::Number(1.0));
        assert_eq!(engine.get_cell_value(key(4, 1)), Value::Number(3.0));
        assert_eq!(engine.get_cell_value(key(4, 0)), Value::Number(4.0));
    }

    #[test]
    fn test_shift_and_offset() {
        let mut engine = engine();
        engine.set_cell(key(0, 0), 5.0, None).unwrap();
        engine.enter(key(1, 0), "=SHIFT(A1, 1, 1)").unwrap();
        assert_eq!(engine.get_cell_value(key(1, 0)), Value::text("SHIFT:OK"));
        assert_eq!(engine.get_cell_value(key(2, 1)), Value::Number(5.0));

        engine.enter(key(3, 0), "=OFFSET(A1, 2, 1, 0)").unwrap();
        assert_eq!(engine.get_cell_value(key(3, 0)), Value::Number(5.0));
    }

    #[test]
    fn test_address_forms() {
        let mut engine = engine();
        let anchor = Anchor::from(CellKey::at(1, 1, 2, 1));
        assert_eq!(
            engine.run_once_at(anchor, "=ADDRESS()", None).unwrap(),
            Value::text("B3β")
        );
        assert_eq!(
            engine.run_once_at(anchor, "=SELF()", None).unwrap(),
            Value::text("@[2,3,2,1]")
        );
        assert_eq!(
            engine.run_once_at(anchor, "=ALT_ADDRESS(A1)", None).unwrap(),
            Value::text("@[1,1,2,1]")
        );
    }

    #[test]
    fn test_dock_replaces_overlapping_group() {
        let mut engine = engine();
        engine.create_array(ArraySpec::named("b")).unwrap();
        engine.create_array(ArraySpec::named("c")).unwrap();
        engine.enter(key(0, 0), "=DOCK(\"all\", 1, 2)").unwrap();
        assert_eq!(engine.get_cell_value(key(0, 0)), Value::text("Dock:all 1,2"));
        engine.enter(key(1, 0), "=DOCK(2, 3)").unwrap();
        let groups = &engine.world().docks().groups;
        assert_eq!(groups.len(), 1);
        let group = groups.values().next().unwrap();
        assert_eq!(group.members, vec![2, 3]);
        assert_eq!(group.parent_id, Some(2));
        assert_eq!(group.mode, DockMode::Parent);

        engine.enter(key(2, 0), "=DOCK(\"all\", 9)").unwrap();
        assert_eq!(engine.get_cell_value(key(2, 0)), Value::error("DOCK:EMPTY"));
    }

    #[test]
    fn test_translate_reverts_with_formula() {
        let mut engine = engine();
        engine.enter(key(0, 0), "=3D_TRANSLATE(1, 2, 3)").unwrap();
        let offset = engine.array(1).unwrap().offset;
        assert_eq!((offset.x, offset.y, offset.z), (1.0, 2.0, 3.0));

        engine.enter(key(0, 0), "done").unwrap();
        let offset = engine.array(1).unwrap().offset;
        assert_eq!((offset.x, offset.y, offset.z), (0.0, 0.0, 0.0));

        engine.undo();
        assert!((engine.array(1).unwrap().offset.y - 2.0).abs() < f64::EPSILON);
    }
}
