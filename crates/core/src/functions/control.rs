//! Statement sequencing: `DO` and `SEQ`.

use voxcel_formulas::{is_formula, Expr, FunctionCall};
use voxcel_primitives::Value;

use super::{FnTag, FunctionDefinition, FunctionRegistry};
use crate::engine::Engine;
use crate::error::EvalError;
use crate::eval::{EvalContext, Operand};

const PURE: &[FnTag] = &[FnTag::Pure];

/// Globals holding `WITH` options while a sequence runs.
pub const WITH_PREFIX: &str = "with.";

pub(super) fn register(registry: &mut FunctionRegistry) {
    registry.register("DO", FunctionDefinition::variadic(0, PURE, sequence));
    registry.register("SEQ", FunctionDefinition::variadic(0, PURE, sequence));
}

/// Evaluate each statement in order and yield the last one.
///
/// `WITH key: value` options are visible as `with.<key>` globals for the
/// duration and restored afterwards. A quoted statement that starts with
/// `=` runs as a formula at the anchor.
fn sequence(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let mut saved = Vec::with_capacity(call.with_options.len());
    let result = bind_options(engine, ctx, call, &mut saved)
        .and_then(|()| run_statements(engine, ctx, call));
    for (name, previous) in saved.into_iter().rev() {
        match previous {
            Some(value) => engine.world.globals.insert(name, value),
            None => engine.world.globals.remove(&name),
        };
    }
    result
}

fn bind_options(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
    saved: &mut Vec<(String, Option<Value>)>,
) -> Result<(), EvalError> {
    for (key, expr) in &call.with_options {
        let value = engine.value_of(ctx, expr)?;
        let name = format!("{WITH_PREFIX}{}", key.trim());
        let previous = engine.world.globals.insert(name.clone(), value);
        saved.push((name, previous));
    }
    Ok(())
}

fn run_statements(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
) -> Result<Operand, EvalError> {
    let mut last = Operand::empty();
    for statement in &call.args {
        last = match statement {
            Expr::String(text) if is_formula(text) => {
                let anchor = ctx.anchor;
                let tx = ctx.tx_mut();
                Operand::Value(engine.execute_formula(tx, anchor, text, false))
            }
            other => engine.eval(ctx, other)?,
        };
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ArraySpec;
    use voxcel_primitives::CellKey;

    fn engine() -> Engine {
        let mut engine = Engine::new();
        engine.create_array(ArraySpec::named("test")).unwrap();
        engine
    }

    #[test]
    fn test_do_block_yields_last_statement() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine
            .enter(a1, r#"=DO{ SET_GLOBAL("x", 4); ADD(GET_GLOBAL("x"), 1) }"#)
            .unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::Number(5.0));
        assert_eq!(engine.global("x"), Some(&Value::Number(4.0)));
    }

    #[test]
    fn test_with_options_are_scoped() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine
            .enter(a1, r#"=SEQ{ MUL(GET_GLOBAL("with.k"), 3) } WITH k: 2"#)
            .unwrap();
        assert_eq!(engine.get_cell_value(a1), Value::Number(6.0));
        assert_eq!(engine.global("with.k"), None);
    }

    #[test]
    fn test_quoted_formula_statements_run() {
        let mut engine = engine();
        let a1 = CellKey::at(1, 0, 0, 0);
        engine
            .enter(a1, r#"=DO("=SET_GLOBAL(\"y\", 2)", "done")"#)
            .unwrap();
        assert_eq!(engine.global("y"), Some(&Value::Number(2.0)));
        assert_eq!(engine.get_cell_value(a1), Value::text("done"));
    }
}
