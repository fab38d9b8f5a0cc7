//! Hand-written lexer for the shorthand grammar (spec §4.1).
//!
//! Keywords are not distinguished at the token-kind level (unlike a
//! grammar-generator lexer) — they come back as plain [`TokenKind::Ident`]
//! tokens and the parser matches on their text. This keeps the token set
//! small and lets the parser recover from an unrecognized header keyword
//! by treating it as an unknown entity rather than a lex failure.

use std::path::PathBuf;

use crate::diagnostics::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    /// `#code-literal`, optionally followed by a display string handled
    /// separately by the parser.
    Code,
    /// `n..m`, `n..*`, or `n..` style cardinality literal.
    Card,
    /// `^caret.sequence` metadata path, lexed whole.
    CaretSequence,
    String,
    TripleString,
    Integer,
    Decimal,
    DateTime,
    Time,
    /// `Reference(A or B)` lexed whole; the parser splits on `or`.
    ReferenceLit,
    /// `Canonical(A|1.0.0 or B)` lexed whole.
    CanonicalLit,
    CodeableReferenceLit,
    /// `'ucum-unit'` literal.
    Unit,
    Star,
    Dot,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Comma,
    Colon,
    Equals,
    Arrow,
    Pipe,
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: u32,
    pub col: u32,
    /// True when this token is the first non-trivia token on its line,
    /// used by the parser to detect bare (star-less) continuation rules.
    pub line_start: bool,
    /// Byte span in the original source, kept so rule-set argument
    /// substitution can slice exact source text rather than rejoin
    /// token spellings lossily.
    pub start_byte: usize,
    pub end_byte: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

pub struct Lexer<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
    line: u32,
    col: u32,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            pos: 0,
            line: 0,
            col: 0,
            errors: Vec::new(),
        }
    }

    pub fn tokenize(mut self) -> (Vec<Token>, Vec<LexError>) {
        let mut tokens = Vec::new();
        loop {
            let at_line_start = self.skip_trivia_and_check_line_start(&tokens);
            match self.next_token(at_line_start) {
                Some(tok) => {
                    let is_eof = tok.kind == TokenKind::Eof;
                    tokens.push(tok);
                    if is_eof {
                        break;
                    }
                }
                None => break,
            }
        }
        (tokens, self.errors)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).map(|(_, c)| *c)
    }

    fn byte_offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map(|(b, _)| *b)
            .unwrap_or(self.input.len())
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += 1;
        if ch == '\n' {
            self.line += 1;
            self.col = 0;
        } else {
            self.col += 1;
        }
        Some(ch)
    }

    /// Skips whitespace (including non-breaking space), comments, and
    /// newlines; returns whether the next real token starts a fresh line.
    fn skip_trivia_and_check_line_start(&mut self, tokens: &[Token]) -> bool {
        let mut saw_newline = tokens.is_empty();
        loop {
            match self.peek() {
                Some(c) if c == '\n' || c == '\r' || c.is_whitespace() => {
                    if c == '\n' {
                        saw_newline = true;
                    }
                    self.advance();
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                Some('/') if self.peek_at(1) == Some('*') => {
                    self.advance();
                    self.advance();
                    loop {
                        match self.peek() {
                            None => break,
                            Some('*') if self.peek_at(1) == Some('/') => {
                                self.advance();
                                self.advance();
                                break;
                            }
                            Some(_) => {
                                self.advance();
                            }
                        }
                    }
                }
                _ => break,
            }
        }
        saw_newline
    }

    fn next_token(&mut self, line_start: bool) -> Option<Token> {
        let start_line = self.line;
        let start_col = self.col;
        let start_byte = self.byte_offset();
        let make = move |kind: TokenKind, text: String| Token {
            kind,
            text,
            line: start_line,
            col: start_col,
            line_start,
            start_byte: 0,
            end_byte: 0,
        };

        let mut token = self.scan_token(make)?;
        token.start_byte = start_byte;
        token.end_byte = self.byte_offset();
        Some(token)
    }

    fn scan_token(&mut self, make: impl Fn(TokenKind, String) -> Token) -> Option<Token> {
        let ch = match self.peek() {
            Some(c) => c,
            None => return Some(make(TokenKind::Eof, String::new())),
        };

        match ch {
            '*' => {
                self.advance();
                Some(make(TokenKind::Star, "*".to_string()))
            }
            '.' if self.peek_at(1) == Some('.') => self.lex_card(make),
            '.' => {
                self.advance();
                Some(make(TokenKind::Dot, ".".to_string()))
            }
            '[' => {
                self.advance();
                Some(make(TokenKind::LBracket, "[".to_string()))
            }
            ']' => {
                self.advance();
                Some(make(TokenKind::RBracket, "]".to_string()))
            }
            '(' => {
                self.advance();
                Some(make(TokenKind::LParen, "(".to_string()))
            }
            ')' => {
                self.advance();
                Some(make(TokenKind::RParen, ")".to_string()))
            }
            ',' => {
                self.advance();
                Some(make(TokenKind::Comma, ",".to_string()))
            }
            ':' => {
                self.advance();
                Some(make(TokenKind::Colon, ":".to_string()))
            }
            '|' => {
                self.advance();
                Some(make(TokenKind::Pipe, "|".to_string()))
            }
            '-' if self.peek_at(1) == Some('>') => {
                self.advance();
                self.advance();
                Some(make(TokenKind::Arrow, "->".to_string()))
            }
            '=' => {
                self.advance();
                Some(make(TokenKind::Equals, "=".to_string()))
            }
            '^' => self.lex_caret_sequence(make),
            '#' => self.lex_code(make),
            '"' => self.lex_string(make),
            '\'' => self.lex_unit(make),
            '0'..='9' => self.lex_number(make),
            'R' if self.input[self.byte_offset()..].starts_with("Reference(") => {
                self.lex_paren_literal("Reference(", TokenKind::ReferenceLit, make)
            }
            'C' if self.input[self.byte_offset()..].starts_with("Canonical(") => {
                self.lex_paren_literal("Canonical(", TokenKind::CanonicalLit, make)
            }
            'C' if self.input[self.byte_offset()..].starts_with("CodeableReference(") => {
                self.lex_paren_literal(
                    "CodeableReference(",
                    TokenKind::CodeableReferenceLit,
                    make,
                )
            }
            c if c == '$' || c == '_' || c.is_alphabetic() => self.lex_ident(make),
            '?' => {
                self.advance();
                let mut text = "?".to_string();
                if self.peek() == Some('!') {
                    text.push('!');
                    self.advance();
                }
                Some(make(TokenKind::Ident, text))
            }
            // Soft-index marker inside `[+]`; not an error, unlike other
            // stray punctuation.
            '+' => {
                self.advance();
                Some(make(TokenKind::Ident, "+".to_string()))
            }
            other => {
                self.errors.push(LexError {
                    message: format!("unexpected character '{other}'"),
                    line: start_line,
                    col: start_col,
                });
                self.advance();
                Some(make(TokenKind::Ident, other.to_string()))
            }
        }
    }

    fn lex_card(&mut self, make: impl Fn(TokenKind, String) -> Token) -> Option<Token> {
        // Cardinality literal: optional leading digits already consumed by
        // the caller context (the parser calls this after an integer), but
        // we also support the bare `..m` spelling by starting here.
        self.advance();
        self.advance();
        let mut text = "..".to_string();
        if self.peek() == Some('*') {
            text.push('*');
            self.advance();
        } else {
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        Some(make(TokenKind::Card, text))
    }

    fn lex_caret_sequence(&mut self, make: impl Fn(TokenKind, String) -> Token) -> Option<Token> {
        self.advance(); // '^'
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '.' || c == '_' || c == '[' || c == ']' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Some(make(TokenKind::CaretSequence, text))
    }

    fn lex_code(&mut self, make: impl Fn(TokenKind, String) -> Token) -> Option<Token> {
        self.advance(); // '#'
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() || matches!(c, '"' | ')' | ',' | '(') {
                break;
            }
            text.push(c);
            self.advance();
        }
        Some(make(TokenKind::Code, text))
    }

    fn lex_number(&mut self, make: impl Fn(TokenKind, String) -> Token) -> Option<Token> {
        let mut text = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // DateTime / Time detection: YYYY-MM-DD[THH:MM:SS...] or a bare
        // time literal beginning with digits and containing ':'.
        if text.len() == 4 && self.peek() == Some('-') {
            let mut lookahead = String::new();
            let save_pos = self.pos;
            let save_line = self.line;
            let save_col = self.col;
            lookahead.push('-');
            self.advance();
            let mut ok = true;
            for _ in 0..2 {
                match self.peek() {
                    Some(c) if c.is_ascii_digit() => {
                        lookahead.push(c);
                        self.advance();
                    }
                    _ => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok && self.peek() == Some('-') {
                lookahead.push('-');
                self.advance();
                for _ in 0..2 {
                    if let Some(c) = self.peek() {
                        if c.is_ascii_digit() {
                            lookahead.push(c);
                            self.advance();
                        }
                    }
                }
            }
            if ok {
                text.push_str(&lookahead);
                if self.peek() == Some('T') {
                    text.push('T');
                    self.advance();
                    while let Some(c) = self.peek() {
                        if c.is_ascii_digit() || matches!(c, ':' | '.' | '+' | '-' | 'Z') {
                            text.push(c);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
                return Some(make(TokenKind::DateTime, text));
            }
            self.pos = save_pos;
            self.line = save_line;
            self.col = save_col;
        }

        if self.peek() == Some(':') {
            // Bare time literal HH:MM:SS
            let mut time_text = text.clone();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() || c == ':' || c == '.' {
                    time_text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            return Some(make(TokenKind::Time, time_text));
        }

        let mut is_decimal = false;
        if self.peek() == Some('.') && self.peek_at(1) != Some('.') {
            is_decimal = true;
            text.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }

        if matches!(self.peek(), Some('e') | Some('E')) {
            let save_pos = self.pos;
            let save_line = self.line;
            let save_col = self.col;
            let mut exp = String::new();
            exp.push(self.peek().unwrap());
            self.advance();
            if matches!(self.peek(), Some('+') | Some('-')) {
                exp.push(self.peek().unwrap());
                self.advance();
            }
            let mut has_digits = false;
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    has_digits = true;
                    exp.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
            if has_digits {
                text.push_str(&exp);
                // Spec boundary behavior: an exponential literal whose
                // scaled value is integral (e.g. `1e2` == 100) lexes as an
                // integer, not a decimal — only the mantissa's own
                // fractional part (or a non-integral scaled value, e.g.
                // `1e-1` == 0.1) makes it a decimal.
                let scaled: f64 = text.parse().unwrap_or(0.0);
                is_decimal = scaled.fract() != 0.0;
            } else {
                self.pos = save_pos;
                self.line = save_line;
                self.col = save_col;
            }
        }

        Some(make(
            if is_decimal {
                TokenKind::Decimal
            } else {
                TokenKind::Integer
            },
            text,
        ))
    }

    fn lex_string(&mut self, make: impl Fn(TokenKind, String) -> Token) -> Option<Token> {
        if self.peek_at(1) == Some('"') && self.peek_at(2) == Some('"') {
            return self.lex_triple_string(make);
        }
        let mut text = String::from("\"");
        self.advance();
        loop {
            match self.peek() {
                None => {
                    self.errors.push(LexError {
                        message: "unterminated string".to_string(),
                        line: self.line,
                        col: self.col,
                    });
                    break;
                }
                Some('"') => {
                    text.push('"');
                    self.advance();
                    break;
                }
                Some('\\') => {
                    text.push('\\');
                    self.advance();
                    if let Some(c) = self.peek() {
                        text.push(c);
                        self.advance();
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        Some(make(TokenKind::String, text))
    }

    fn lex_triple_string(&mut self, make: impl Fn(TokenKind, String) -> Token) -> Option<Token> {
        let mut text = String::from("\"\"\"");
        self.advance();
        self.advance();
        self.advance();
        loop {
            match (self.peek(), self.peek_at(1), self.peek_at(2)) {
                (Some('"'), Some('"'), Some('"')) => {
                    text.push_str("\"\"\"");
                    self.advance();
                    self.advance();
                    self.advance();
                    break;
                }
                (None, _, _) => {
                    self.errors.push(LexError {
                        message: "unterminated multiline string".to_string(),
                        line: self.line,
                        col: self.col,
                    });
                    break;
                }
                (Some(c), _, _) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        Some(make(TokenKind::TripleString, text))
    }

    fn lex_unit(&mut self, make: impl Fn(TokenKind, String) -> Token) -> Option<Token> {
        let mut text = String::from("'");
        self.advance();
        loop {
            match self.peek() {
                None | Some('\n') | Some('\r') => {
                    self.errors.push(LexError {
                        message: "unterminated unit".to_string(),
                        line: self.line,
                        col: self.col,
                    });
                    break;
                }
                Some('\'') => {
                    text.push('\'');
                    self.advance();
                    break;
                }
                Some('\\') => {
                    text.push('\\');
                    self.advance();
                    if let Some(c) = self.peek() {
                        text.push(c);
                        self.advance();
                    }
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        Some(make(TokenKind::Unit, text))
    }

    fn lex_paren_literal(
        &mut self,
        keyword: &str,
        kind: TokenKind,
        make: impl Fn(TokenKind, String) -> Token,
    ) -> Option<Token> {
        let mut text = String::new();
        let mut depth = 0i32;
        for ch in keyword.chars() {
            text.push(ch);
            self.advance();
            if ch == '(' {
                depth += 1;
            }
        }
        while depth > 0 {
            match self.peek() {
                None => {
                    self.errors.push(LexError {
                        message: format!("unterminated {keyword} literal"),
                        line: self.line,
                        col: self.col,
                    });
                    break;
                }
                Some('(') => {
                    depth += 1;
                    text.push('(');
                    self.advance();
                }
                Some(')') => {
                    depth -= 1;
                    text.push(')');
                    self.advance();
                }
                Some(c) => {
                    text.push(c);
                    self.advance();
                }
            }
        }
        Some(make(kind, text))
    }

    fn lex_ident(&mut self, make: impl Fn(TokenKind, String) -> Token) -> Option<Token> {
        let mut text = String::new();
        if self.peek() == Some('$') {
            text.push('$');
            self.advance();
        }
        while let Some(c) = self.peek() {
            // A `-` immediately followed by `>` is the start of a mapping
            // arrow, not a hyphen inside this identifier — stop here so
            // the arrow lexes as its own token even with no space before it
            // (spec §4.1's "missing space around `->`" diagnostic needs to
            // see a real `Arrow` token to fire).
            if c == '-' && self.peek_at(1) == Some('>') {
                break;
            }
            if c.is_alphanumeric() || c == '_' || c == '-' || c == '/' {
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        // A bare `scheme://...` URL is common as a canonical/system value
        // (unaliased); fold it into one token so the parser sees a single
        // value rather than colon/slash punctuation.
        if self.peek() == Some(':') && self.peek_at(1) == Some('/') && self.peek_at(2) == Some('/')
        {
            text.push(':');
            self.advance();
            text.push('/');
            self.advance();
            text.push('/');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_whitespace() || matches!(c, ',' | ')' | '(' | '"') {
                    break;
                }
                text.push(c);
                self.advance();
            }
        }
        Some(make(TokenKind::Ident, text))
    }
}

pub fn location_from_token(file: Option<&PathBuf>, token: &Token) -> Location {
    Location::new(file.cloned(), token.line, token.col)
}

pub fn tokenize(input: &str) -> (Vec<Token>, Vec<LexError>) {
    Lexer::new(input).tokenize()
}
