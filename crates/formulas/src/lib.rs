//! # Voxcel Formulas
//!
//! Formula text to syntax tree: tokenizer, recursive-descent parser, named
//! macros, structural reference extraction and the absolute-reference rewrite
//! applied when an array grows.

pub mod ast;
pub mod lexer;
pub mod macros;
pub mod parser;
pub mod refs;

pub use ast::{BinaryOp, Expr, FunctionCall, Reference};
pub use lexer::{Lexer, Token, TokenKind};
pub use macros::MacroTable;
pub use parser::{parse_formula, ParseError, ParsedFormula, BLOCK_CALLS, MAX_NESTING};
pub use refs::{
    extract_absolute_literals, extract_references, shift_absolute_refs, ArrayGrowth,
};

/// True when `text` is formula text rather than a plain value.
pub fn is_formula(text: &str) -> bool {
    text.trim_start().starts_with('=')
}

/// Normalize user formula input: trims it, and blank input means no formula.
pub fn normalize_formula(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
