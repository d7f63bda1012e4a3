//! Function registry.
//!
//! Every builtin is registered once under its uppercase name with a tag set.
//! Implementations receive the unevaluated call so they can decide which
//! arguments to evaluate and whether an argument was written as a reference.

use std::collections::HashMap;

use voxcel_formulas::{is_formula, Expr, FunctionCall};
use voxcel_primitives::address::parse_address;
use voxcel_primitives::{ArrayId, CellKey};
use voxcel_sheet::CellMeta;

use crate::engine::Engine;
use crate::error::EvalError;
use crate::eval::{EvalContext, Operand};
use crate::transaction::CellPatch;

mod arrays;
mod control;
mod events;
mod logic;
mod meta;
mod utility;

pub use control::WITH_PREFIX;
pub use events::EVENT_PAYLOAD_PREFIX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FnTag {
    /// Returns a value; the evaluator writes it to the anchor.
    Pure,
    /// Has side effects beyond the anchor.
    Action,
    /// Needs an open transaction.
    Block,
    /// Writes cell metadata.
    Meta,
    /// Touches array placement.
    Scene,
    Io,
}

impl FnTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pure => "PURE",
            Self::Action => "ACTION",
            Self::Block => "BLOCK",
            Self::Meta => "META",
            Self::Scene => "SCENE",
            Self::Io => "IO",
        }
    }
}

/// Functions an array's policy can never block.
pub const ALWAYS_ALLOWED: [&str; 26] = [
    "FUNCTIONS",
    "LOCK",
    "CREATE",
    "ARRAY",
    "PARAMETERS",
    "ADDRESS",
    "ALT_ADDRESS",
    "COMBINE",
    "COLOR",
    "GETCOLOR",
    "ON_SELECT",
    "ON_EVENT",
    "FIRE_EVENT",
    "SET_GLOBAL",
    "GET_GLOBAL",
    "FOCUS_SET",
    "COPY",
    "GET_ARRAY_POS",
    "SET_ARRAY_POS",
    "TRANSLATE_ARRAY",
    "ROTATE_ARRAY",
    "3D_TRANSLATE",
    "3D_ROTATE",
    "DELETE",
    "DEL",
    "REMOVE",
];

pub type FunctionImpl =
    fn(&mut Engine, &mut EvalContext<'_>, &FunctionCall) -> Result<Operand, EvalError>;

#[derive(Clone, Copy)]
pub struct FunctionDefinition {
    pub min_args: usize,
    pub max_args: Option<usize>,
    pub tags: &'static [FnTag],
    pub eval: FunctionImpl,
}

impl FunctionDefinition {
    /// Fixed number of arguments
    pub fn fixed(args: usize, tags: &'static [FnTag], eval: FunctionImpl) -> Self {
        Self {
            min_args: args,
            max_args: Some(args),
            tags,
            eval,
        }
    }

    /// Variable number of arguments
    pub fn variadic(min: usize, tags: &'static [FnTag], eval: FunctionImpl) -> Self {
        Self {
            min_args: min,
            max_args: None,
            tags,
            eval,
        }
    }

    /// Range of arguments
    pub fn range(min: usize, max: usize, tags: &'static [FnTag], eval: FunctionImpl) -> Self {
        Self {
            min_args: min,
            max_args: Some(max),
            tags,
            eval,
        }
    }

    pub fn has_tag(&self, tag: FnTag) -> bool {
        self.tags.contains(&tag)
    }

    pub(crate) fn validate_arg_count(&self, provided: usize) -> Result<(), String> {
        if provided < self.min_args {
            return Err(self.expected_args_label());
        }
        if let Some(max) = self.max_args {
            if provided > max {
                return Err(self.expected_args_label());
            }
        }
        Ok(())
    }

    fn expected_args_label(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => format!("{}", self.min_args),
            Some(max) => format!("{}..{}", self.min_args, max),
            None => format!("{}+", self.min_args),
        }
    }
}

/// Registry of available functions
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDefinition>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        logic::register(&mut registry);
        utility::register(&mut registry);
        arrays::register(&mut registry);
        events::register(&mut registry);
        meta::register(&mut registry);
        control::register(&mut registry);
        registry
    }
}

impl FunctionRegistry {
    /// Register (or replace) a function.
    pub fn register(&mut self, name: &str, def: FunctionDefinition) {
        self.functions.insert(name.to_ascii_uppercase(), def);
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(&name.to_ascii_uppercase())
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.get(&name.to_ascii_uppercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

pub fn is_always_allowed(name: &str) -> bool {
    ALWAYS_ALLOWED
        .iter()
        .any(|n| n.eq_ignore_ascii_case(name))
}

/// Whole-number argument; missing or non-numeric arguments give `default`.
fn int_arg(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
    index: usize,
    default: i64,
) -> Result<i64, EvalError> {
    Ok(engine.arg_value(ctx, call, index)?.as_int().unwrap_or(default))
}

/// Cells named by argument `index`: a reference, or address text resolved
/// against the anchor. A missing or blank argument means the anchor.
fn target_keys(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
    index: usize,
) -> Result<Vec<CellKey>, EvalError> {
    if index >= call.args.len() {
        return Ok(vec![ctx.anchor.key()]);
    }
    let operand = engine.arg_operand(ctx, call, index)?;
    if operand.as_box().is_some() {
        return engine.operand_keys(&operand);
    }
    let text = engine.scalar(&operand)?.to_string();
    if text.trim().is_empty() {
        return Ok(vec![ctx.anchor.key()]);
    }
    let key = parse_address(text.trim(), ctx.anchor.key())
        .map_err(|e| EvalError::message(format!("ADDRESS:{e}")))?;
    Ok(vec![key])
}

/// Array named by argument `index`: a reference's array, a numeric id,
/// address text or an array name. Missing means the anchor's array.
fn array_ref(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    call: &FunctionCall,
    index: usize,
) -> Result<ArrayId, EvalError> {
    if index >= call.args.len() {
        return Ok(ctx.anchor.arr());
    }
    let operand = engine.arg_operand(ctx, call, index)?;
    if let Some(cells) = operand.as_box() {
        return Ok(cells.arr);
    }
    let value = engine.scalar(&operand)?;
    if value.is_empty() {
        return Ok(ctx.anchor.arr());
    }
    if let Some(id) = value.as_int().and_then(|n| ArrayId::try_from(n).ok()) {
        return Ok(id);
    }
    let text = value.to_string();
    if let Ok(key) = parse_address(text.trim(), ctx.anchor.key()) {
        return Ok(key.arr);
    }
    engine
        .world
        .array_by_name(text.trim())
        .map(|array| array.id)
        .ok_or_else(|| EvalError::message(format!("ARRAY_NOT_FOUND:{text}")))
}

/// Formula text carried by an argument. Quoted text is taken as written;
/// anything else is evaluated first. The result always starts with `=`.
fn action_text(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    expr: &Expr,
) -> Result<String, EvalError> {
    let text = match expr {
        Expr::String(text) | Expr::Literal(text) => text.clone(),
        _ => engine.value_of(ctx, expr)?.to_string(),
    };
    let text = text.trim();
    if is_formula(text) {
        Ok(text.to_string())
    } else {
        Ok(format!("={text}"))
    }
}

/// Set (or, with `null`, remove) one metadata field on `key`.
fn write_meta(
    engine: &mut Engine,
    ctx: &mut EvalContext<'_>,
    key: CellKey,
    field: &str,
    value: serde_json::Value,
) -> Result<(), EvalError> {
    let mut meta = CellMeta::new();
    meta.set(field, value);
    let patch = CellPatch::default()
        .with_meta(meta)
        .skip_recompute()
        .skip_cleanup()
        .internal();
    engine.write(ctx, key, patch)?;
    Ok(())
}

/// Literal switches such as `"off"`/`"none"` that turn a binding off.
fn is_off_switch(expr: &Expr) -> bool {
    match expr {
        Expr::String(text) | Expr::Literal(text) | Expr::Identifier(text) => {
            let text = text.trim();
            ["off", "none", "0", "false"]
                .iter()
                .any(|word| text.eq_ignore_ascii_case(word))
        }
        Expr::Number(n) => *n == 0.0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = FunctionRegistry::default();
        for name in [
            "IF", "ADD", "SEARCH", "PARAMETERS", "LOCK", "CREATE", "ARRAY", "ROTATE", "ON_EVENT",
            "FIRE_EVENT", "SET", "ONCLICK", "DO", "SEQ", "3D_TRANSLATE", "DELETE",
        ] {
            assert!(registry.has_function(name), "{name} missing");
        }
        assert!(registry.get("ARRAY").unwrap().has_tag(FnTag::Block));
    }

    #[test]
    fn test_arity_labels() {
        let registry = FunctionRegistry::default();
        let clamp = registry.get("CLAMP").unwrap();
        assert_eq!(clamp.validate_arg_count(2), Err("3".to_string()));
        assert!(clamp.validate_arg_count(3).is_ok());
    }

    #[test]
    fn test_always_allowed_is_case_insensitive() {
        assert!(is_always_allowed("create"));
        assert!(!is_always_allowed("ADD"));
    }
}
