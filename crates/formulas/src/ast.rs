//! Formula syntax tree.

use std::fmt;

use voxcel_primitives::{CellBox, CellKey};

/// A resolved reference together with the text it was written as.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    pub key: CellKey,
    pub raw: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Concat => "&",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    /// Uppercased function name.
    pub name: String,
    pub args: Vec<Expr>,
    /// Written with a `{ ... }` statement body instead of parentheses.
    pub block: bool,
    /// `WITH key: value` bindings, in source order.
    pub with_options: Vec<(String, Expr)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Raw text that is not a formula, or that failed to parse.
    Literal(String),
    Number(f64),
    String(String),
    /// Spreadsheet-notation reference.
    CellRef(Reference),
    /// Absolute `@[x,y,z,id]` literal.
    RangeRef(Reference),
    /// Inclusive box between two references.
    Range { start: Reference, end: Reference },
    FunctionCall(FunctionCall),
    /// A named macro expanded at parse time.
    Macro { name: String, body: Box<Expr> },
    /// Uppercased bare word with no macro behind it.
    Identifier(String),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Negate(Box<Expr>),
}

impl Expr {
    /// The single cell this node points at, if it is a one-cell reference.
    pub fn as_cell(&self) -> Option<CellKey> {
        match self {
            Self::CellRef(r) | Self::RangeRef(r) => Some(r.key),
            Self::Macro { body, .. } => body.as_cell(),
            _ => None,
        }
    }

    /// Every reference node normalized to a box.
    pub fn as_box(&self) -> Option<CellBox> {
        match self {
            Self::CellRef(r) | Self::RangeRef(r) => Some(CellBox::single(r.key)),
            Self::Range { start, end } => Some(CellBox::spanning(start.key, end.key)),
            Self::Macro { body, .. } => body.as_box(),
            _ => None,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.as_box().is_some()
    }

    pub fn as_call(&self) -> Option<&FunctionCall> {
        match self {
            Self::FunctionCall(call) => Some(call),
            _ => None,
        }
    }

    /// Visit this node and all of its children, parents first.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match self {
            Self::FunctionCall(call) => {
                for arg in &call.args {
                    arg.walk(visit);
                }
                for (_, value) in &call.with_options {
                    value.walk(visit);
                }
            }
            Self::Macro { body, .. } => body.walk(visit),
            Self::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            Self::Negate(inner) => inner.walk(visit),
            Self::Literal(_)
            | Self::Number(_)
            | Self::String(_)
            | Self::CellRef(_)
            | Self::RangeRef(_)
            | Self::Range { .. }
            | Self::Identifier(_) => {}
        }
    }

    /// Names of every function called anywhere in the tree.
    pub fn called_functions(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.walk(&mut |node| {
            if let Self::FunctionCall(call) = node {
                names.push(call.name.as_str());
            }
        });
        names
    }
}
