//! Named macros: bare identifiers that expand to a stored tree at parse time.

use std::collections::BTreeMap;

use voxcel_primitives::CellKey;

use crate::ast::Expr;
use crate::parser::{parse_formula, ParseError};

#[derive(Debug, Clone, PartialEq)]
struct MacroDef {
    source: String,
    body: Expr,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MacroTable {
    entries: BTreeMap<String, MacroDef>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or replace) a macro from formula text.
    ///
    /// References inside the body resolve against `anchor`. Names are stored
    /// uppercased, matching how identifiers are looked up.
    pub fn define(
        &mut self,
        name: &str,
        source: &str,
        anchor: CellKey,
    ) -> Result<(), ParseError> {
        let text = if source.trim_start().starts_with('=') {
            source.to_string()
        } else {
            format!("={source}")
        };
        let parsed = parse_formula(&text, anchor, self);
        if let Some(err) = parsed.errors.into_iter().next() {
            return Err(err);
        }
        self.entries.insert(
            name.trim().to_ascii_uppercase(),
            MacroDef {
                source: source.to_string(),
                body: parsed.expr,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> bool {
        self.entries.remove(&name.to_ascii_uppercase()).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&Expr> {
        self.entries.get(name).map(|def| &def.body)
    }

    pub fn source(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(|def| def.source.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `(name, source)` pairs in name order.
    pub fn sources(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries
            .iter()
            .map(|(name, def)| (name.as_str(), def.source.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_macro_expands_at_parse_time() {
        let anchor = CellKey::at(1, 0, 0, 0);
        let mut macros = MacroTable::new();
        macros.define("double", "MUL(A1, 2)", anchor).expect("define");

        let parsed = parse_formula("=DOUBLE", anchor, &macros);
        match parsed.expr {
            Expr::Macro { name, body } => {
                assert_eq!(name, "DOUBLE");
                assert_eq!(body.as_call().map(|c| c.name.as_str()), Some("MUL"));
            }
            other => panic!("expected macro, got {other:?}"),
        }
        assert_eq!(macros.source("DOUBLE"), Some("MUL(A1, 2)"));
    }

    #[test]
    fn test_unknown_identifier_stays_identifier() {
        let parsed = parse_formula("=north", CellKey::at(1, 0, 0, 0), &MacroTable::new());
        assert_eq!(parsed.expr, Expr::Identifier("NORTH".to_string()));
    }
}
