//! Tokenizer with ring-buffered lookahead.
//!
//! The parser needs more than one token of lookahead in two places: telling a
//! function declaration from a variable declaration at the top level, and
//! telling an assignment from a plain expression at statement level. Both are
//! served by a bounded ring buffer of already-scanned tokens: [`Lexer::scan`]
//! drains the buffer head before touching the character stream, while
//! [`Lexer::cache_next`] scans one raw token and parks it at the tail.

use crate::debug::{self, Severity};
use crate::error::{CompileError, CompileResult, SourceLocation};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::Path;

/// Upper bound on buffered lookahead tokens.
pub const MAX_LOOKAHEAD: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Keyword {
    Int,
    Char,
    Void,
    Long,
    If,
    Else,
    While,
    Do,
    For,
    Break,
    Return,
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Keyword::Int => "int",
            Keyword::Char => "char",
            Keyword::Void => "void",
            Keyword::Long => "long",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::Do => "do",
            Keyword::For => "for",
            Keyword::Break => "break",
            Keyword::Return => "return",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Punct {
    Semicolon,
    Comma,
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Assign,
    Star,
    Amp,
    Plus,
    Minus,
    Slash,
    Greater,
    GreaterEq,
    Less,
    LessEq,
    EqEq,
    NotEq,
}

impl fmt::Display for Punct {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Punct::Semicolon => ";",
            Punct::Comma => ",",
            Punct::LParen => "(",
            Punct::RParen => ")",
            Punct::LBrace => "{",
            Punct::RBrace => "}",
            Punct::LBracket => "[",
            Punct::RBracket => "]",
            Punct::Assign => "=",
            Punct::Star => "*",
            Punct::Amp => "&",
            Punct::Plus => "+",
            Punct::Minus => "-",
            Punct::Slash => "/",
            Punct::Greater => ">",
            Punct::GreaterEq => ">=",
            Punct::Less => "<",
            Punct::LessEq => "<=",
            Punct::EqEq => "==",
            Punct::NotEq => "!=",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub enum TokenKind {
    /// Uninitialized slot. Never produced by a healthy scan.
    #[default]
    Empty,
    Eof,
    Punct(Punct),
    IntLit(i64),
    /// Decoded bytes, including the terminating NUL.
    StrLit(Vec<u8>),
    Ident(String),
    Keyword(Keyword),
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Empty => f.write_str("<empty>"),
            TokenKind::Eof => Ok(()),
            TokenKind::Punct(p) => write!(f, "{p}"),
            TokenKind::IntLit(value) => write!(f, "{value}"),
            TokenKind::StrLit(bytes) => {
                f.write_str("\"")?;
                for &b in bytes.iter().take(bytes.len().saturating_sub(1)) {
                    match b {
                        b'\\' => f.write_str("\\\\")?,
                        b'"' => f.write_str("\\\"")?,
                        b'\n' => f.write_str("\\n")?,
                        b'\t' => f.write_str("\\t")?,
                        0 => f.write_str("\\0")?,
                        _ => write!(f, "{}", b as char)?,
                    }
                }
                f.write_str("\"")
            }
            TokenKind::Ident(name) => f.write_str(name),
            TokenKind::Keyword(kw) => write!(f, "{kw}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Token {
    pub kind: TokenKind,
    pub location: SourceLocation,
}

impl Token {
    /// Human-readable description used in expected/found diagnostics.
    pub fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Empty => "<empty>".to_string(),
            TokenKind::Eof => "end of file".to_string(),
            TokenKind::Punct(p) => format!("'{p}'"),
            TokenKind::IntLit(value) => format!("number {value}"),
            TokenKind::StrLit(_) => "string literal".to_string(),
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Keyword(kw) => format!("keyword '{kw}'"),
        }
    }
}

/// Renders a token stream back to source-like text, one space between tokens.
pub fn dump_tokens(tokens: &[Token]) -> String {
    let mut out = String::new();
    for tok in tokens {
        if matches!(tok.kind, TokenKind::Eof) {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&tok.kind.to_string());
    }
    out
}

pub struct Lexer {
    source: Vec<u8>,
    pos: usize,
    line: usize,
    column: usize,
    buffer: VecDeque<Token>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.as_bytes().to_vec(),
            pos: 0,
            line: 1,
            column: 1,
            buffer: VecDeque::new(),
        }
    }

    pub fn from_file(path: &Path) -> CompileResult<Self> {
        let source = fs::read_to_string(path).map_err(|err| {
            CompileError::new(format!(
                "[SCANNER] failed to read {}: {err}",
                path.display()
            ))
        })?;
        Ok(Self::new(&source))
    }

    /// Next token: the buffer head if lookahead is pending, otherwise a raw scan.
    pub fn scan(&mut self) -> CompileResult<Token> {
        if let Some(tok) = self.buffer.pop_front() {
            return Ok(tok);
        }
        self.scan_raw()
    }

    /// Non-consuming look at the next token.
    pub fn peek(&mut self) -> CompileResult<Token> {
        if self.buffer.is_empty() {
            let tok = self.scan_raw()?;
            self.push_tail(tok)?;
        }
        Ok(self.buffer.front().cloned().unwrap_or_default())
    }

    /// Lookahead at position `n` (0-indexed) without consuming anything.
    ///
    /// Scans raw tokens onto the buffer tail until position `n` exists. Once
    /// the scanner has reached end of input, further positions repeat the EOF
    /// token.
    pub fn peek_at(&mut self, n: usize) -> CompileResult<Token> {
        while self.buffer.len() <= n {
            let kind = self.cache_next()?;
            if kind == TokenKind::Eof {
                break;
            }
        }
        match self.buffer.get(n) {
            Some(tok) => Ok(tok.clone()),
            None => Ok(self.buffer.back().cloned().unwrap_or_default()),
        }
    }

    /// Scans one raw token past the buffered lookahead, parks it at the
    /// buffer tail, and reports its kind.
    pub fn cache_next(&mut self) -> CompileResult<TokenKind> {
        let tok = self.scan_raw()?;
        let kind = tok.kind.clone();
        self.push_tail(tok)?;
        Ok(kind)
    }

    fn push_tail(&mut self, tok: Token) -> CompileResult<()> {
        if self.buffer.len() == MAX_LOOKAHEAD {
            return Err(CompileError::at(
                "[SCANNER] token lookahead buffer is full",
                tok.location,
            ));
        }
        self.buffer.push_back(tok);
        Ok(())
    }

    fn peek_char(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn next_char(&mut self) -> Option<u8> {
        let b = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(b)
    }

    fn skip_whitespace(&mut self) {
        while let Some(b) = self.peek_char() {
            if b.is_ascii_whitespace() {
                self.next_char();
            } else {
                break;
            }
        }
    }

    fn scan_raw(&mut self) -> CompileResult<Token> {
        self.skip_whitespace();
        let location = SourceLocation {
            line: self.line,
            column: self.column,
        };

        let b = match self.next_char() {
            Some(b) => b,
            None => {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    location,
                });
            }
        };

        let kind = match b {
            b';' => TokenKind::Punct(Punct::Semicolon),
            b',' => TokenKind::Punct(Punct::Comma),
            b'(' => TokenKind::Punct(Punct::LParen),
            b')' => TokenKind::Punct(Punct::RParen),
            b'{' => TokenKind::Punct(Punct::LBrace),
            b'}' => TokenKind::Punct(Punct::RBrace),
            b'[' => TokenKind::Punct(Punct::LBracket),
            b']' => TokenKind::Punct(Punct::RBracket),
            b'*' => TokenKind::Punct(Punct::Star),
            b'&' => TokenKind::Punct(Punct::Amp),
            b'+' => TokenKind::Punct(Punct::Plus),
            b'-' => TokenKind::Punct(Punct::Minus),
            b'/' => TokenKind::Punct(Punct::Slash),
            b'>' => {
                if self.peek_char() == Some(b'=') {
                    self.next_char();
                    TokenKind::Punct(Punct::GreaterEq)
                } else {
                    TokenKind::Punct(Punct::Greater)
                }
            }
            b'<' => {
                if self.peek_char() == Some(b'=') {
                    self.next_char();
                    TokenKind::Punct(Punct::LessEq)
                } else {
                    TokenKind::Punct(Punct::Less)
                }
            }
            b'=' => {
                if self.peek_char() == Some(b'=') {
                    self.next_char();
                    TokenKind::Punct(Punct::EqEq)
                } else {
                    TokenKind::Punct(Punct::Assign)
                }
            }
            b'!' => {
                if self.peek_char() == Some(b'=') {
                    self.next_char();
                    TokenKind::Punct(Punct::NotEq)
                } else {
                    return Err(CompileError::at(
                        "[SCANNER] expected '=' after '!'",
                        location,
                    ));
                }
            }
            b'"' => self.scan_string(location)?,
            b'0'..=b'9' => self.scan_number(b, location)?,
            _ if is_ident_char(b) => self.scan_ident(b),
            _ => {
                return Err(CompileError::at(
                    format!("[SCANNER] unknown character '{}'", b as char),
                    location,
                ));
            }
        };

        let tok = Token { kind, location };
        if debug::enabled(Severity::Debug) {
            debug::print(Severity::Debug, format!("token {}", tok.describe()));
        }
        Ok(tok)
    }

    fn scan_number(&mut self, first: u8, location: SourceLocation) -> CompileResult<TokenKind> {
        let mut value = (first - b'0') as i64;
        while let Some(b) = self.peek_char() {
            if !b.is_ascii_digit() {
                break;
            }
            self.next_char();
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((b - b'0') as i64))
                .ok_or_else(|| {
                    CompileError::at("[SCANNER] integer literal is too large", location)
                })?;
        }
        Ok(TokenKind::IntLit(value))
    }

    fn scan_ident(&mut self, first: u8) -> TokenKind {
        let mut name = String::new();
        name.push(first as char);
        while let Some(b) = self.peek_char() {
            if !is_ident_char(b) {
                break;
            }
            self.next_char();
            name.push(b as char);
        }
        match name.as_str() {
            "int" => TokenKind::Keyword(Keyword::Int),
            "char" => TokenKind::Keyword(Keyword::Char),
            "void" => TokenKind::Keyword(Keyword::Void),
            "long" => TokenKind::Keyword(Keyword::Long),
            "if" => TokenKind::Keyword(Keyword::If),
            "else" => TokenKind::Keyword(Keyword::Else),
            "while" => TokenKind::Keyword(Keyword::While),
            "do" => TokenKind::Keyword(Keyword::Do),
            "for" => TokenKind::Keyword(Keyword::For),
            "break" => TokenKind::Keyword(Keyword::Break),
            "return" => TokenKind::Keyword(Keyword::Return),
            _ => TokenKind::Ident(name),
        }
    }

    fn scan_string(&mut self, location: SourceLocation) -> CompileResult<TokenKind> {
        let mut bytes = Vec::new();
        loop {
            let b = self
                .next_char()
                .ok_or_else(|| CompileError::at("[SCANNER] unclosed string literal", location))?;
            match b {
                b'"' => break,
                b'\n' => {
                    return Err(CompileError::at(
                        "[SCANNER] unclosed string literal",
                        location,
                    ));
                }
                b'\\' => {
                    let escaped = self.next_char().ok_or_else(|| {
                        CompileError::at("[SCANNER] unclosed string literal", location)
                    })?;
                    bytes.push(match escaped {
                        b'n' => b'\n',
                        b't' => b'\t',
                        b'0' => 0,
                        other => other,
                    });
                }
                other => bytes.push(other),
            }
        }
        bytes.push(0);
        Ok(TokenKind::StrLit(bytes))
    }
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut out = Vec::new();
        loop {
            let tok = lexer.scan().expect("scan");
            let done = tok.kind == TokenKind::Eof;
            out.push(tok.kind);
            if done {
                break;
            }
        }
        out
    }

    #[test]
    fn scans_punctuation_and_operators() {
        assert_eq!(
            kinds("; , ( ) { } [ ] = * & + - / > >= < <= == !="),
            vec![
                TokenKind::Punct(Punct::Semicolon),
                TokenKind::Punct(Punct::Comma),
                TokenKind::Punct(Punct::LParen),
                TokenKind::Punct(Punct::RParen),
                TokenKind::Punct(Punct::LBrace),
                TokenKind::Punct(Punct::RBrace),
                TokenKind::Punct(Punct::LBracket),
                TokenKind::Punct(Punct::RBracket),
                TokenKind::Punct(Punct::Assign),
                TokenKind::Punct(Punct::Star),
                TokenKind::Punct(Punct::Amp),
                TokenKind::Punct(Punct::Plus),
                TokenKind::Punct(Punct::Minus),
                TokenKind::Punct(Punct::Slash),
                TokenKind::Punct(Punct::Greater),
                TokenKind::Punct(Punct::GreaterEq),
                TokenKind::Punct(Punct::Less),
                TokenKind::Punct(Punct::LessEq),
                TokenKind::Punct(Punct::EqEq),
                TokenKind::Punct(Punct::NotEq),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_keywords_and_identifiers() {
        assert_eq!(
            kinds("int x while broken"),
            vec![
                TokenKind::Keyword(Keyword::Int),
                TokenKind::Ident("x".to_string()),
                TokenKind::Keyword(Keyword::While),
                TokenKind::Ident("broken".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_integer_literals() {
        assert_eq!(
            kinds("0 42 256"),
            vec![
                TokenKind::IntLit(0),
                TokenKind::IntLit(42),
                TokenKind::IntLit(256),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn scans_string_literals_with_escapes() {
        assert_eq!(
            kinds(r#""ab\n\t\"\\\0""#),
            vec![
                TokenKind::StrLit(vec![b'a', b'b', b'\n', b'\t', b'"', b'\\', 0, 0]),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lone_bang_is_fatal() {
        let mut lexer = Lexer::new("! x");
        let err = lexer.scan().unwrap_err();
        assert!(err.message().contains("[SCANNER]"));
    }

    #[test]
    fn unknown_character_is_fatal() {
        let mut lexer = Lexer::new("@");
        assert!(lexer.scan().is_err());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut lexer = Lexer::new("a b");
        assert_eq!(lexer.peek().unwrap().kind, TokenKind::Ident("a".to_string()));
        assert_eq!(lexer.peek().unwrap().kind, TokenKind::Ident("a".to_string()));
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::Ident("a".to_string()));
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::Ident("b".to_string()));
    }

    #[test]
    fn peek_at_looks_past_buffered_tokens() {
        let mut lexer = Lexer::new("a b c");
        assert_eq!(
            lexer.peek_at(2).unwrap().kind,
            TokenKind::Ident("c".to_string())
        );
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::Ident("a".to_string()));
        assert_eq!(
            lexer.peek_at(1).unwrap().kind,
            TokenKind::Ident("c".to_string())
        );
    }

    #[test]
    fn peek_at_past_eof_repeats_eof() {
        let mut lexer = Lexer::new("a");
        assert_eq!(lexer.peek_at(5).unwrap().kind, TokenKind::Eof);
    }

    #[test]
    fn cache_next_reports_kind_and_preserves_order() {
        let mut lexer = Lexer::new("a = b");
        assert_eq!(lexer.cache_next().unwrap(), TokenKind::Ident("a".to_string()));
        assert_eq!(lexer.cache_next().unwrap(), TokenKind::Punct(Punct::Assign));
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::Ident("a".to_string()));
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::Punct(Punct::Assign));
        assert_eq!(lexer.scan().unwrap().kind, TokenKind::Ident("b".to_string()));
    }

    #[test]
    fn tracks_line_numbers() {
        let mut lexer = Lexer::new("a\nb");
        assert_eq!(lexer.scan().unwrap().location.line, 1);
        assert_eq!(lexer.scan().unwrap().location.line, 2);
    }

    #[test]
    fn dump_round_trips_token_kinds() {
        let source = r#"void main ( ) { char c ; c = 65 ; print_str ( "hi\n" ) ; }"#;
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.scan().unwrap();
            let done = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if done {
                break;
            }
        }
        let dumped = dump_tokens(&tokens);
        let mut relexed = Lexer::new(&dumped);
        for tok in &tokens {
            assert_eq!(relexed.scan().unwrap().kind, tok.kind);
        }
    }
}
