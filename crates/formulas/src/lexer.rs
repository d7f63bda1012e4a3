//! Formula tokenizer.

use std::fmt;

use voxcel_primitives::address::is_greek_layer;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Equals,
    Number(f64),
    String(String),
    Identifier(String),
    /// Spreadsheet reference text such as `B3β^2`.
    CellRef(String),
    /// Absolute literal text such as `@[1,0,,2]`.
    AbsoluteRef(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Plus,
    Minus,
    Star,
    Slash,
    Ampersand,
    Illegal(char),
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Equals => f.write_str("'='"),
            Self::Number(n) => write!(f, "number {n}"),
            Self::String(s) => write!(f, "string {s:?}"),
            Self::Identifier(name) => write!(f, "identifier {name}"),
            Self::CellRef(text) | Self::AbsoluteRef(text) => write!(f, "reference {text}"),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::LBrace => f.write_str("'{'"),
            Self::RBrace => f.write_str("'}'"),
            Self::Comma => f.write_str("','"),
            Self::Colon => f.write_str("':'"),
            Self::Semicolon => f.write_str("';'"),
            Self::Plus => f.write_str("'+'"),
            Self::Minus => f.write_str("'-'"),
            Self::Star => f.write_str("'*'"),
            Self::Slash => f.write_str("'/'"),
            Self::Ampersand => f.write_str("'&'"),
            Self::Illegal(ch) => write!(f, "illegal character {ch:?}"),
            Self::Eof => f.write_str("end of input"),
        }
    }
}

impl TokenKind {
    /// The text this token stands for, used when it degrades to a literal.
    pub fn source_text(&self) -> String {
        match self {
            Self::String(s) | Self::Identifier(s) | Self::CellRef(s) | Self::AbsoluteRef(s) => {
                s.clone()
            }
            Self::Number(n) => n.to_string(),
            Self::Illegal(ch) => ch.to_string(),
            Self::Eof => String::new(),
            Self::Equals => "=".to_string(),
            Self::LParen => "(".to_string(),
            Self::RParen => ")".to_string(),
            Self::LBrace => "{".to_string(),
            Self::RBrace => "}".to_string(),
            Self::Comma => ",".to_string(),
            Self::Colon => ":".to_string(),
            Self::Semicolon => ";".to_string(),
            Self::Plus => "+".to_string(),
            Self::Minus => "-".to_string(),
            Self::Star => "*".to_string(),
            Self::Slash => "/".to_string(),
            Self::Ampersand => "&".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub pos: usize,
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            pos: 0,
        }
    }

    pub fn input(&self) -> &'a str {
        self.input
    }

    /// Lex the whole input, ending with a single `Eof` token.
    pub fn tokenize(mut self) -> Vec<Token> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token();
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return tokens;
            }
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace();
        let start = self.byte_pos(self.pos);
        let Some(ch) = self.peek() else {
            return Token {
                kind: TokenKind::Eof,
                pos: start,
            };
        };

        let kind = match ch {
            '=' => self.simple(TokenKind::Equals),
            '(' => self.simple(TokenKind::LParen),
            ')' => self.simple(TokenKind::RParen),
            '{' => self.simple(TokenKind::LBrace),
            '}' => self.simple(TokenKind::RBrace),
            ',' => self.simple(TokenKind::Comma),
            ':' => self.simple(TokenKind::Colon),
            ';' => self.simple(TokenKind::Semicolon),
            '+' => self.simple(TokenKind::Plus),
            '-' => self.simple(TokenKind::Minus),
            '*' => self.simple(TokenKind::Star),
            '/' => self.simple(TokenKind::Slash),
            '&' => self.simple(TokenKind::Ampersand),
            '"' => self.string_token(),
            '`' => self.raw_string_token(),
            '<' if self.starts_with("<<<") => self.heredoc_token(),
            '@' => self.absolute_token(),
            'A'..='Z' | 'a'..='z' | '_' => self.identifier_or_cell_token(),
            '0'..='9' | '.' => self.number_or_identifier_token(),
            other => self.simple(TokenKind::Illegal(other)),
        };

        Token { kind, pos: start }
    }

    fn simple(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn string_token(&mut self) -> TokenKind {
        self.advance(); // opening quote
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            self.advance();
            match ch {
                '"' => return TokenKind::String(out),
                '\\' => match self.peek() {
                    None => out.push('\\'),
                    Some(escaped) => {
                        self.advance();
                        out.push(match escaped {
                            'n' => '\n',
                            'r' => '\r',
                            't' => '\t',
                            other => other,
                        });
                    }
                },
                _ => out.push(ch),
            }
        }
        // Unterminated strings run to the end of input.
        TokenKind::String(out)
    }

    fn raw_string_token(&mut self) -> TokenKind {
        self.advance();
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch == '`' {
                let text = self.slice(start, self.pos).to_string();
                self.advance();
                return TokenKind::String(text);
            }
            self.advance();
        }
        TokenKind::String(self.slice(start, self.pos).to_string())
    }

    fn heredoc_token(&mut self) -> TokenKind {
        self.pos += 3;
        let start = self.pos;
        while self.peek().is_some() {
            if self.starts_with(">>>") {
                let text = self.slice(start, self.pos).to_string();
                self.pos += 3;
                return TokenKind::String(text);
            }
            self.advance();
        }
        TokenKind::String(self.slice(start, self.pos).to_string())
    }

    fn absolute_token(&mut self) -> TokenKind {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            self.advance();
            if ch == ']' {
                break;
            }
        }
        TokenKind::AbsoluteRef(self.slice(start, self.pos).to_string())
    }

    fn identifier_or_cell_token(&mut self) -> TokenKind {
        let start = self.pos;
        self.take_while(|ch| ch.is_ascii_alphabetic() || ch == '_');
        let letters_end = self.pos;

        let letters_only = self
            .slice(start, letters_end)
            .chars()
            .all(|ch| ch.is_ascii_alphabetic());
        if letters_only && matches!(self.peek(), Some('0'..='9')) {
            self.take_while(|ch| ch.is_ascii_digit());
            // Names such as `LOG10(` or `A1B` are identifiers, not references.
            if !matches!(self.peek(), Some(ch) if is_identifier_char(ch) || ch == '(') {
                if matches!(self.peek(), Some(ch) if is_greek_layer(ch)) {
                    self.advance();
                }
                if self.peek() == Some('^') {
                    let caret = self.pos;
                    self.advance();
                    if self.take_while(|ch| ch.is_ascii_digit()) == 0 {
                        self.pos = caret;
                    }
                }
                return TokenKind::CellRef(self.slice(start, self.pos).to_string());
            }
        }

        self.take_while(is_identifier_char);
        TokenKind::Identifier(self.slice(start, self.pos).to_string())
    }

    fn number_or_identifier_token(&mut self) -> TokenKind {
        let start = self.pos;
        let mut end = self.pos;
        let mut has_alpha = false;
        while let Some(ch) = self.chars.get(end).map(|(_, ch)| *ch) {
            if !is_identifier_char(ch) {
                break;
            }
            if !ch.is_ascii_digit() {
                has_alpha = true;
            }
            end += 1;
        }
        // `3D_TRANSLATE` and friends lex as identifiers.
        if has_alpha {
            self.pos = end;
            return TokenKind::Identifier(self.slice(start, end).to_string());
        }

        let mut seen_dot = false;
        while let Some(ch) = self.peek() {
            match ch {
                '0'..='9' => self.advance(),
                '.' if !seen_dot => {
                    seen_dot = true;
                    self.advance();
                }
                _ => break,
            }
        }
        let text = self.slice(start, self.pos);
        match text.parse::<f64>() {
            Ok(value) => TokenKind::Number(value),
            // A lone `.` is the only way to get here.
            Err(_) => TokenKind::Illegal('.'),
        }
    }

    fn take_while(&mut self, pred: impl Fn(char) -> bool) -> usize {
        let before = self.pos;
        while matches!(self.peek(), Some(ch) if pred(ch)) {
            self.advance();
        }
        self.pos - before
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(ch) if ch.is_whitespace()) {
            self.advance();
        }
    }

    fn starts_with(&self, needle: &str) -> bool {
        self.input[self.byte_pos(self.pos)..].starts_with(needle)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, ch)| *ch)
    }

    fn advance(&mut self) {
        self.pos += 1;
    }

    fn byte_pos(&self, idx: usize) -> usize {
        self.chars
            .get(idx)
            .map(|(i, _)| *i)
            .unwrap_or(self.input.len())
    }

    fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.input[self.byte_pos(start)..self.byte_pos(end)]
    }
}

fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}
