//! Tree-walking evaluator.
//!
//! Evaluation always happens at an anchor. Reference nodes stay lazy as
//! [`Operand::Ref`]/[`Operand::Range`] so functions can tell a reference
//! argument from a value; [`Engine::scalar`] and [`Engine::flatten`] degrade
//! them when a plain value is needed.

use std::collections::BTreeSet;

use voxcel_formulas::{BinaryOp, Expr, FunctionCall};
use voxcel_primitives::{Anchor, CellBox, CellKey, Value};

use crate::engine::Engine;
use crate::error::{EngineError, EvalError};
use crate::functions::{is_always_allowed, FnTag};
use crate::transaction::{CellPatch, Transaction};

/// Nested function calls deeper than this are rejected.
const MAX_CALL_DEPTH: usize = 64;

/// Result of evaluating one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Ref(CellKey),
    Range(CellBox),
    List(Vec<Value>),
}

impl Operand {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Value(Value::text(s))
    }

    pub fn empty() -> Self {
        Self::Value(Value::Empty)
    }

    /// Cells this operand points at, when it is a reference.
    pub fn as_box(&self) -> Option<CellBox> {
        match self {
            Self::Ref(key) => Some(CellBox::single(*key)),
            Self::Range(cells) => Some(*cells),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<CellKey> {
        match self {
            Self::Ref(key) => Some(*key),
            _ => None,
        }
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

/// Everything one evaluation needs to know about where it runs.
pub struct EvalContext<'t> {
    pub anchor: Anchor,
    pub(crate) tx: Option<&'t mut Transaction>,
    /// Formula text being executed.
    pub(crate) formula: String,
    /// Evaluation results are written back to the anchor and its edges kept.
    pub(crate) persist: bool,
    /// Cells read through computed addresses.
    pub(crate) reads: BTreeSet<CellKey>,
    pub(crate) global_reads: BTreeSet<String>,
    /// A function already wrote the anchor itself.
    pub(crate) anchor_written: bool,
    /// Whether the anchor keeps its formula once the result is written.
    pub(crate) keep_formula: bool,
    depth: usize,
}

impl<'t> EvalContext<'t> {
    pub(crate) fn new(
        anchor: Anchor,
        tx: Option<&'t mut Transaction>,
        formula: &str,
        persist: bool,
    ) -> Self {
        Self {
            anchor,
            tx,
            formula: formula.to_string(),
            persist,
            reads: BTreeSet::new(),
            global_reads: BTreeSet::new(),
            anchor_written: false,
            keep_formula: true,
            depth: 0,
        }
    }

    pub fn has_tx(&self) -> bool {
        self.tx.is_some()
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    pub(crate) fn tx_mut(&mut self) -> Option<&mut Transaction> {
        self.tx.as_deref_mut()
    }

    pub(crate) fn record_read(&mut self, key: CellKey) {
        self.reads.insert(key);
    }

    pub(crate) fn record_global(&mut self, key: &str) {
        self.global_reads.insert(key.to_string());
    }

    /// Patch for a function writing `value` to its own anchor. A persisted
    /// evaluation keeps (or drops) the formula; a one-off run leaves it alone.
    pub(crate) fn anchor_patch(&self, value: impl Into<Value>) -> CellPatch {
        let patch = CellPatch::value(value).internal();
        if !self.persist {
            return patch;
        }
        let formula = self.keep_formula.then(|| self.formula.clone());
        patch.with_formula(formula)
    }
}

impl Engine {
    pub(crate) fn eval(
        &mut self,
        ctx: &mut EvalContext<'_>,
        expr: &Expr,
    ) -> Result<Operand, EvalError> {
        match expr {
            Expr::Literal(text) => Ok(Operand::Value(Value::from_input(text))),
            Expr::Number(n) => Ok(Operand::Value(Value::Number(*n))),
            Expr::String(s) => Ok(Operand::text(s.clone())),
            Expr::Identifier(name) => Ok(Operand::text(name.clone())),
            Expr::CellRef(r) | Expr::RangeRef(r) => Ok(Operand::Ref(r.key)),
            Expr::Range { .. } => match expr.as_box() {
                Some(cells) => Ok(Operand::Range(cells)),
                None => Ok(Operand::empty()),
            },
            Expr::Macro { body, .. } => self.eval(ctx, body),
            Expr::FunctionCall(call) => self.call_function(ctx, call),
            Expr::Negate(inner) => {
                let value = self.value_of(ctx, inner)?;
                if value.is_error() {
                    return Ok(Operand::Value(value));
                }
                if value.is_empty() {
                    return Ok(Operand::Value(Value::Number(0.0)));
                }
                let n = value.as_number().ok_or(EvalError::Value)?;
                Ok(Operand::Value(Value::Number(-n)))
            }
            Expr::Binary { op, lhs, rhs } => {
                let left = self.value_of(ctx, lhs)?;
                if left.is_error() {
                    return Ok(Operand::Value(left));
                }
                let right = self.value_of(ctx, rhs)?;
                if right.is_error() {
                    return Ok(Operand::Value(right));
                }
                binary(*op, &left, &right).map(Operand::Value)
            }
        }
    }

    /// Evaluate and degrade to a single value.
    pub(crate) fn value_of(
        &mut self,
        ctx: &mut EvalContext<'_>,
        expr: &Expr,
    ) -> Result<Value, EvalError> {
        let operand = self.eval(ctx, expr)?;
        self.scalar(&operand)
    }

    /// Argument `index` as a value; missing arguments read as empty.
    pub(crate) fn arg_value(
        &mut self,
        ctx: &mut EvalContext<'_>,
        call: &FunctionCall,
        index: usize,
    ) -> Result<Value, EvalError> {
        match call.args.get(index) {
            Some(expr) => self.value_of(ctx, expr),
            None => Ok(Value::Empty),
        }
    }

    pub(crate) fn arg_text(
        &mut self,
        ctx: &mut EvalContext<'_>,
        call: &FunctionCall,
        index: usize,
    ) -> Result<String, EvalError> {
        Ok(self.arg_value(ctx, call, index)?.to_string())
    }

    pub(crate) fn arg_operand(
        &mut self,
        ctx: &mut EvalContext<'_>,
        call: &FunctionCall,
        index: usize,
    ) -> Result<Operand, EvalError> {
        match call.args.get(index) {
            Some(expr) => self.eval(ctx, expr),
            None => Ok(Operand::empty()),
        }
    }

    /// All arguments from `start` on, flattened into one list of values.
    pub(crate) fn flat_args(
        &mut self,
        ctx: &mut EvalContext<'_>,
        call: &FunctionCall,
        start: usize,
    ) -> Result<Vec<Value>, EvalError> {
        let mut values = Vec::new();
        for expr in call.args.iter().skip(start) {
            let operand = self.eval(ctx, expr)?;
            values.extend(self.flatten(&operand)?);
        }
        Ok(values)
    }

    /// Stored value of a cell; missing arrays and cells read as empty.
    pub(crate) fn read_value(&self, key: CellKey) -> Value {
        self.world
            .cell(key)
            .map(|cell| cell.value.clone())
            .unwrap_or_default()
    }

    /// First element, or the referenced value.
    pub(crate) fn scalar(&self, operand: &Operand) -> Result<Value, EvalError> {
        Ok(match operand {
            Operand::Value(value) => value.clone(),
            Operand::Ref(key) => self.read_value(*key),
            Operand::Range(cells) => self.read_value(CellKey::new(cells.arr, cells.min)),
            Operand::List(values) => values.first().cloned().unwrap_or_default(),
        })
    }

    pub(crate) fn flatten(&self, operand: &Operand) -> Result<Vec<Value>, EvalError> {
        Ok(match operand {
            Operand::Value(value) => vec![value.clone()],
            Operand::Ref(key) => vec![self.read_value(*key)],
            Operand::Range(cells) => self
                .world
                .deps
                .expand_box(*cells)?
                .into_iter()
                .map(|key| self.read_value(key))
                .collect(),
            Operand::List(values) => values.clone(),
        })
    }

    /// Keys of a reference operand, bounded by the range limit.
    pub(crate) fn operand_keys(&self, operand: &Operand) -> Result<Vec<CellKey>, EvalError> {
        match operand.as_box() {
            Some(cells) => Ok(self.world.deps.expand_box(cells)?),
            None => Ok(Vec::new()),
        }
    }

    /// Write through the context's transaction, or a transaction of its own.
    pub(crate) fn write(
        &mut self,
        ctx: &mut EvalContext<'_>,
        key: CellKey,
        patch: CellPatch,
    ) -> Result<(), EngineError> {
        if key == ctx.anchor.key() && patch.value.is_some() {
            ctx.anchor_written = true;
        }
        match ctx.tx_mut() {
            Some(tx) => self.set(tx, key, patch),
            None => {
                let mut tx = self.start("formula.write", "write outside a transaction");
                if let Err(err) = self.set(&mut tx, key, patch) {
                    self.rollback(tx);
                    return Err(err);
                }
                self.commit(tx);
                Ok(())
            }
        }
    }

    fn call_function(
        &mut self,
        ctx: &mut EvalContext<'_>,
        call: &FunctionCall,
    ) -> Result<Operand, EvalError> {
        let def = self
            .functions
            .get(&call.name)
            .copied()
            .ok_or_else(|| EvalError::UnknownFunction(call.name.clone()))?;

        def.validate_arg_count(call.args.len())
            .map_err(|expected| EvalError::Arity {
                name: call.name.clone(),
                expected,
                got: call.args.len(),
            })?;

        if def.tags.contains(&FnTag::Block) && !ctx.has_tx() {
            return Err(EvalError::TransactionRequired(call.name.clone()));
        }

        if !is_always_allowed(&call.name) {
            if let Some(array) = self.world.array(ctx.anchor.arr()) {
                let tags = def.tags.iter().map(|t| t.as_str());
                if !array.fn_policy.permits(&call.name, tags) {
                    return Err(EvalError::PolicyDenied(call.name.clone()));
                }
            }
        }

        if ctx.depth >= MAX_CALL_DEPTH {
            return Err(EvalError::message("DEPTH"));
        }
        ctx.depth += 1;
        let result = (def.eval)(self, ctx, call);
        ctx.depth -= 1;
        result
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    let number = |v: &Value| {
        if v.is_empty() {
            Ok(0.0)
        } else {
            v.as_number().ok_or(EvalError::Value)
        }
    };
    let n = match op {
        BinaryOp::Concat => return Ok(Value::text(format!("{left}{right}"))),
        BinaryOp::Add => number(left)? + number(right)?,
        BinaryOp::Subtract => number(left)? - number(right)?,
        BinaryOp::Multiply => number(left)? * number(right)?,
        BinaryOp::Divide => {
            let divisor = number(right)?;
            if divisor == 0.0 {
                return Err(EvalError::DivideByZero);
            }
            number(left)? / divisor
        }
    };
    Ok(Value::Number(n))
}
