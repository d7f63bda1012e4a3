//! Recursive-descent formula parser.
//!
//! Errors are collected on the result instead of aborting: a malformed
//! sub-expression becomes an [`Expr::Literal`] of its raw text and parsing
//! carries on from the next token.

use voxcel_primitives::address::{parse_absolute, parse_spreadsheet};
use voxcel_primitives::{AddressError, CellKey};

use crate::ast::{BinaryOp, Expr, FunctionCall, Reference};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::macros::MacroTable;

/// Control names that accept a `{ ... }` statement body.
pub const BLOCK_CALLS: [&str; 2] = ["DO", "SEQ"];

/// Deepest expression tree the parser will build. Operator chains count one
/// level per operator, parentheses and calls one level each.
pub const MAX_NESTING: usize = 128;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("illegal character {ch:?} at {pos}")]
    IllegalCharacter { ch: char, pos: usize },

    #[error("unexpected {found} at {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("expected {expected}, got {found} at {pos}")]
    Expected {
        expected: &'static str,
        found: String,
        pos: usize,
    },

    #[error("expression nests deeper than {limit} levels at {pos}")]
    TooDeep { limit: usize, pos: usize },

    #[error("invalid reference '{text}': {source}")]
    InvalidReference {
        text: String,
        #[source]
        source: AddressError,
    },
}

/// Output of [`parse_formula`]: the best-effort tree plus every error seen.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFormula {
    pub expr: Expr,
    pub errors: Vec<ParseError>,
}

impl ParsedFormula {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Illegal characters and over-deep nesting make the whole formula
    /// unusable; other errors still leave a partial tree worth evaluating.
    pub fn is_fatal(&self) -> bool {
        self.errors.iter().any(|e| {
            matches!(
                e,
                ParseError::IllegalCharacter { .. } | ParseError::TooDeep { .. }
            )
        })
    }

    pub fn first_error(&self) -> Option<&ParseError> {
        self.errors.first()
    }
}

/// Parse formula text relative to the cell that owns it.
///
/// Text that does not start with `=` is returned as a literal. Cell references
/// without an explicit layer or array take them from `anchor`.
pub fn parse_formula(text: &str, anchor: CellKey, macros: &MacroTable) -> ParsedFormula {
    let tokens = Lexer::new(text).tokenize();
    let mut parser = Parser {
        tokens,
        idx: 0,
        anchor,
        macros,
        errors: Vec::new(),
        depth: 0,
    };

    if parser.current().kind != TokenKind::Equals {
        return ParsedFormula {
            expr: Expr::Literal(text.to_string()),
            errors: Vec::new(),
        };
    }
    parser.advance();

    let expr = parser.parse_expression();
    if parser.current().kind != TokenKind::Eof {
        let token = parser.current().clone();
        parser.unexpected(&token);
    }
    ParsedFormula {
        expr,
        errors: parser.errors,
    }
}

struct Parser<'m> {
    tokens: Vec<Token>,
    idx: usize,
    anchor: CellKey,
    macros: &'m MacroTable,
    errors: Vec<ParseError>,
    depth: usize,
}

impl Parser<'_> {
    fn parse_expression(&mut self) -> Expr {
        let base = self.depth;
        let mut expr = self.parse_term();
        loop {
            let op = match self.current().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                TokenKind::Ampersand => BinaryOp::Concat,
                _ => break,
            };
            self.advance();
            self.depth += 1;
            let rhs = self.parse_term();
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        self.depth = base;
        expr
    }

    fn parse_term(&mut self) -> Expr {
        let base = self.depth;
        let mut expr = self.parse_unary();
        loop {
            let op = match self.current().kind {
                TokenKind::Star => BinaryOp::Multiply,
                TokenKind::Slash => BinaryOp::Divide,
                _ => break,
            };
            self.advance();
            self.depth += 1;
            let rhs = self.parse_unary();
            expr = Expr::Binary {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }
        self.depth = base;
        expr
    }

    fn parse_unary(&mut self) -> Expr {
        if self.depth >= MAX_NESTING {
            return self.skip_too_deep();
        }
        self.depth += 1;
        let expr = match self.current().kind {
            TokenKind::Minus => {
                self.advance();
                Expr::Negate(Box::new(self.parse_unary()))
            }
            TokenKind::Plus => {
                self.advance();
                self.parse_unary()
            }
            _ => self.parse_primary(),
        };
        self.depth -= 1;
        expr
    }

    /// Swallow one over-deep operand, brackets balanced, as literal text.
    fn skip_too_deep(&mut self) -> Expr {
        self.errors.push(ParseError::TooDeep {
            limit: MAX_NESTING,
            pos: self.current().pos,
        });
        let mut open = 0usize;
        let mut text = String::new();
        loop {
            match self.current().kind {
                TokenKind::Eof => break,
                TokenKind::RParen
                | TokenKind::RBrace
                | TokenKind::Comma
                | TokenKind::Semicolon
                    if open == 0 =>
                {
                    break
                }
                TokenKind::LParen | TokenKind::LBrace => open += 1,
                TokenKind::RParen | TokenKind::RBrace => open -= 1,
                TokenKind::Illegal(ch) => {
                    let pos = self.current().pos;
                    self.errors.push(ParseError::IllegalCharacter { ch, pos });
                }
                _ => {}
            }
            let token = self.current().clone();
            text.push_str(&self.token_text(&token));
            self.advance();
        }
        Expr::Literal(text)
    }

    fn parse_primary(&mut self) -> Expr {
        let token = self.current().clone();
        match token.kind {
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_expression();
                self.close(TokenKind::RParen, "')'");
                inner
            }
            TokenKind::Number(value) => {
                self.advance();
                Expr::Number(value)
            }
            TokenKind::String(value) => {
                self.advance();
                Expr::String(value)
            }
            TokenKind::CellRef(_) | TokenKind::AbsoluteRef(_) => self.parse_reference_or_range(),
            TokenKind::Identifier(name) => {
                let upper = name.to_ascii_uppercase();
                match self.peek().kind {
                    TokenKind::LParen => self.parse_call(upper),
                    TokenKind::LBrace if BLOCK_CALLS.contains(&upper.as_str()) => {
                        self.parse_block_call(upper)
                    }
                    _ => {
                        self.advance();
                        match self.macros.get(&upper) {
                            Some(body) => Expr::Macro {
                                name: upper,
                                body: Box::new(body.clone()),
                            },
                            None => Expr::Identifier(upper),
                        }
                    }
                }
            }
            TokenKind::Illegal(ch) => {
                self.errors.push(ParseError::IllegalCharacter { ch, pos: token.pos });
                self.advance();
                Expr::Literal(ch.to_string())
            }
            TokenKind::Eof => {
                self.errors.push(ParseError::Expected {
                    expected: "expression",
                    found: token.kind.to_string(),
                    pos: token.pos,
                });
                Expr::Literal(String::new())
            }
            _ => {
                self.unexpected(&token);
                self.advance();
                Expr::Literal(self.token_text(&token))
            }
        }
    }

    fn parse_reference_or_range(&mut self) -> Expr {
        let first = self.current().clone();
        self.advance();
        let Some(start) = self.reference(&first) else {
            return Expr::Literal(self.token_text(&first));
        };
        let absolute = matches!(first.kind, TokenKind::AbsoluteRef(_));

        if self.current().kind != TokenKind::Colon {
            return if absolute {
                Expr::RangeRef(start)
            } else {
                Expr::CellRef(start)
            };
        }
        self.advance(); // ':'

        let second = self.current().clone();
        if !matches!(
            second.kind,
            TokenKind::CellRef(_) | TokenKind::AbsoluteRef(_)
        ) {
            self.errors.push(ParseError::Expected {
                expected: "reference after ':'",
                found: second.kind.to_string(),
                pos: second.pos,
            });
            return Expr::CellRef(start);
        }
        self.advance();
        match self.reference(&second) {
            Some(end) => Expr::Range { start, end },
            None => Expr::CellRef(start),
        }
    }

    fn reference(&mut self, token: &Token) -> Option<Reference> {
        let resolved = match &token.kind {
            TokenKind::CellRef(text) => (text, parse_spreadsheet(text, self.anchor)),
            TokenKind::AbsoluteRef(text) => (text, parse_absolute(text, self.anchor)),
            _ => return None,
        };
        match resolved {
            (text, Ok(key)) => Some(Reference {
                key,
                raw: text.clone(),
            }),
            (text, Err(source)) => {
                self.errors.push(ParseError::InvalidReference {
                    text: text.clone(),
                    source,
                });
                None
            }
        }
    }

    fn parse_call(&mut self, name: String) -> Expr {
        self.advance(); // name
        self.advance(); // '('
        let args = self.parse_arguments();
        self.close(TokenKind::RParen, "')'");
        Expr::FunctionCall(FunctionCall {
            name,
            args,
            block: false,
            with_options: Vec::new(),
        })
    }

    fn parse_arguments(&mut self) -> Vec<Expr> {
        let mut args = Vec::new();
        while !matches!(self.current().kind, TokenKind::RParen | TokenKind::Eof) {
            if self.current().kind == TokenKind::Comma {
                // `F(,x)` passes an empty argument.
                args.push(Expr::Literal(String::new()));
                self.advance();
                continue;
            }
            args.push(self.parse_expression());
            match self.current().kind {
                TokenKind::Comma => {
                    self.advance();
                    if self.current().kind == TokenKind::RParen {
                        args.push(Expr::Literal(String::new()));
                    }
                }
                _ => break,
            }
        }
        args
    }

    fn parse_block_call(&mut self, name: String) -> Expr {
        self.advance(); // name
        self.advance(); // '{'
        let mut statements = Vec::new();
        while !matches!(self.current().kind, TokenKind::RBrace | TokenKind::Eof) {
            if self.current().kind == TokenKind::Semicolon {
                self.advance();
                continue;
            }
            statements.push(self.parse_expression());
            if self.current().kind == TokenKind::Semicolon {
                self.advance();
            }
        }
        self.close(TokenKind::RBrace, "'}'");

        let mut with_options = Vec::new();
        if matches!(&self.current().kind, TokenKind::Identifier(w) if w.eq_ignore_ascii_case("WITH"))
        {
            self.advance();
            while let TokenKind::Identifier(key) = self.current().kind.clone() {
                self.advance();
                if self.current().kind == TokenKind::Colon {
                    self.advance();
                }
                with_options.push((key, self.parse_expression()));
                if self.current().kind != TokenKind::Comma {
                    break;
                }
                self.advance();
            }
        }

        Expr::FunctionCall(FunctionCall {
            name,
            args: statements,
            block: true,
            with_options,
        })
    }

    /// Consume `kind`, or report it missing and skip forward to it.
    fn close(&mut self, kind: TokenKind, expected: &'static str) {
        if self.current().kind == kind {
            self.advance();
            return;
        }
        let token = self.current().clone();
        self.errors.push(ParseError::Expected {
            expected,
            found: token.kind.to_string(),
            pos: token.pos,
        });
        while !matches!(self.current().kind, TokenKind::Eof) && self.current().kind != kind {
            if let TokenKind::Illegal(ch) = self.current().kind {
                let pos = self.current().pos;
                self.errors.push(ParseError::IllegalCharacter { ch, pos });
            }
            self.advance();
        }
        if self.current().kind == kind {
            self.advance();
        }
    }

    fn unexpected(&mut self, token: &Token) {
        if let TokenKind::Illegal(ch) = token.kind {
            self.errors.push(ParseError::IllegalCharacter { ch, pos: token.pos });
        } else {
            self.errors.push(ParseError::UnexpectedToken {
                found: token.kind.to_string(),
                pos: token.pos,
            });
        }
    }

    fn token_text(&self, token: &Token) -> String {
        token.kind.source_text()
    }

    fn current(&self) -> &Token {
        self.token_at(self.idx)
    }

    fn peek(&self) -> &Token {
        self.token_at(self.idx + 1)
    }

    fn token_at(&self, idx: usize) -> &Token {
        // The lexer always ends with Eof, so the last token is a safe fallback.
        &self.tokens[idx.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) {
        if self.idx < self.tokens.len() - 1 {
            self.idx += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> ParsedFormula {
        parse_formula(text, CellKey::at(1, 0, 0, 0), &MacroTable::new())
    }

    #[test]
    fn test_non_formula_is_literal() {
        let parsed = parse("hello");
        assert_eq!(parsed.expr, Expr::Literal("hello".to_string()));
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_precedence() {
        let parsed = parse("=1+2*3");
        let Expr::Binary { op, rhs, .. } = parsed.expr else {
            panic!("expected binary");
        };
        assert_eq!(op, BinaryOp::Add);
        assert!(matches!(
            *rhs,
            Expr::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_unclosed_call_terminates() {
        let parsed = parse("=ADD(1, 2");
        assert!(!parsed.is_ok());
        let call = parsed.expr.as_call().expect("call");
        assert_eq!(call.args.len(), 2);
    }

    #[test]
    fn test_deep_nesting_degrades_to_literal() {
        let depth = 1000;
        let text = format!("={}1{}", "(".repeat(depth), ")".repeat(depth));
        let parsed = parse(&text);
        assert_eq!(parsed.errors.len(), 1);
        assert!(matches!(
            parsed.first_error(),
            Some(ParseError::TooDeep { limit: MAX_NESTING, .. })
        ));
        assert!(parsed.is_fatal());
    }

    #[test]
    fn test_long_operator_chain_is_bounded() {
        let text = format!("={}", vec!["1"; 5000].join("+"));
        let parsed = parse(&text);
        assert!(matches!(
            parsed.first_error(),
            Some(ParseError::TooDeep { .. })
        ));

        let short = format!("={}", vec!["1"; 100].join("+"));
        assert!(parse(&short).is_ok());
    }

    #[test]
    fn test_illegal_is_fatal() {
        let parsed = parse("=ADD(1 # 2)");
        assert!(parsed.is_fatal());
    }
}
