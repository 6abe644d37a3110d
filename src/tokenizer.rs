//! Lexical analysis: turns the raw input string into a lazy token stream.
//!
//! The tokenizer knows nothing about semantics beyond recognising operator
//! symbols, numeric literals and identifiers. Multi-character punctuators are
//! matched before single-character ones to avoid ambiguity, and a sign that
//! directly follows an exponent marker belongs to the number (`1e-5`).

use crate::error::{CompileError, CompileResult};

/// Kinds of tokens recognised by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Num,
  Ident,
  Punctuator,
  LParen,
  RParen,
  Eof,
}

/// Thin wrapper for lexical information needed by later stages.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
  pub kind: TokenKind,
  /// Canonical text for numbers, the lexeme for everything else.
  pub text: String,
  pub value: Option<f64>,
  pub loc: usize,
  pub len: usize,
}

impl Token {
  pub fn new(kind: TokenKind, text: impl Into<String>, loc: usize, len: usize) -> Self {
    Self {
      kind,
      text: text.into(),
      value: None,
      loc,
      len,
    }
  }

  fn number(value: f64, loc: usize, len: usize) -> Self {
    Self {
      kind: TokenKind::Num,
      text: canonical_number(value),
      value: Some(value),
      loc,
      len,
    }
  }
}

// Accepted for compatibility with the wider symbol set; only some of them
// have an entry in the operator table.
const MULTI_CHAR_PUNCTUATORS: [&str; 4] = [">=", "=<", "<=", "=>"];

/// Canonical text of a numeric literal: integral values print as integers,
/// anything else as the shortest string that reads back to the same `f64`.
pub fn canonical_number(value: f64) -> String {
  format!("{value}")
}

fn is_ident_start(c: char) -> bool {
  c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
  c == '_' || c.is_alphanumeric()
}

/// Pull-based lexer. Yields tokens left to right, finishing with a single
/// `Eof` token; after the first error the stream ends.
pub struct Lexer<'a> {
  source: &'a str,
  pos: usize,
  done: bool,
}

impl<'a> Lexer<'a> {
  pub fn new(source: &'a str) -> Self {
    Self {
      source,
      pos: 0,
      done: false,
    }
  }

  pub fn source(&self) -> &'a str {
    self.source
  }

  fn rest(&self) -> &'a str {
    &self.source[self.pos..]
  }

  fn peek_char(&self) -> Option<char> {
    self.rest().chars().next()
  }

  fn skip_whitespace(&mut self) {
    let rest = self.rest();
    let trimmed = rest.trim_start();
    self.pos += rest.len() - trimmed.len();
  }

  fn read_token(&mut self) -> CompileResult<Token> {
    self.skip_whitespace();
    let start = self.pos;

    let Some(c) = self.peek_char() else {
      return Ok(Token::new(TokenKind::Eof, "", self.source.len(), 0));
    };

    if c.is_ascii_digit() || (c == '.' && self.rest()[1..].starts_with(|d: char| d.is_ascii_digit())) {
      return self.read_number(start);
    }

    if is_ident_start(c) {
      let len = self
        .rest()
        .find(|ch: char| !is_ident_continue(ch))
        .unwrap_or(self.rest().len());
      self.pos += len;
      return Ok(Token::new(TokenKind::Ident, &self.source[start..self.pos], start, len));
    }

    if let Some(op) = MULTI_CHAR_PUNCTUATORS
      .into_iter()
      .find(|op| self.rest().starts_with(op))
    {
      self.pos += op.len();
      return Ok(Token::new(TokenKind::Punctuator, op, start, op.len()));
    }

    let kind = match c {
      '(' => Some(TokenKind::LParen),
      ')' => Some(TokenKind::RParen),
      '+' | '-' | '*' | '/' | '^' | '√' | '<' | '>' | '=' | '{' | '}' | '[' | ']' => {
        Some(TokenKind::Punctuator)
      }
      _ => None,
    };
    match kind {
      Some(kind) => {
        let len = c.len_utf8();
        self.pos += len;
        Ok(Token::new(kind, &self.source[start..self.pos], start, len))
      }
      None => Err(CompileError::lex_at(
        self.source,
        start,
        format!("invalid token: '{c}'"),
      )),
    }
  }

  /// Scan `digits [. digits] [(e|E) [+|-] digits]`.
  fn read_number(&mut self, start: usize) -> CompileResult<Token> {
    let bytes = self.source.as_bytes();
    let mut i = start;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
      i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
      i += 1;
      while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
      }
    }
    if i < bytes.len() && matches!(bytes[i], b'e' | b'E') {
      let mut j = i + 1;
      if j < bytes.len() && matches!(bytes[j], b'+' | b'-') {
        j += 1;
      }
      if j < bytes.len() && bytes[j].is_ascii_digit() {
        while j < bytes.len() && bytes[j].is_ascii_digit() {
          j += 1;
        }
        i = j;
      }
    }
    self.pos = i;

    if let Some(next) = self.peek_char() {
      if next == '.' || is_ident_continue(next) {
        return Err(CompileError::lex_at(
          self.source,
          i,
          format!("malformed number: unexpected '{next}'"),
        ));
      }
    }

    let text = &self.source[start..i];
    let value = text
      .parse::<f64>()
      .map_err(|err| CompileError::lex_at(self.source, start, format!("invalid number: {err}")))?;
    if !value.is_finite() {
      return Err(CompileError::lex_at(
        self.source,
        start,
        format!("number out of range: {text}"),
      ));
    }
    Ok(Token::number(value, start, i - start))
  }
}

impl Iterator for Lexer<'_> {
  type Item = CompileResult<Token>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.done {
      return None;
    }
    let token = self.read_token();
    match &token {
      Ok(tok) if tok.kind != TokenKind::Eof => {}
      _ => self.done = true,
    }
    Some(token)
  }
}

/// Lex the whole input eagerly. Handy for tests and diagnostics.
pub fn tokenize(input: &str) -> CompileResult<Vec<Token>> {
  Lexer::new(input).collect()
}

/// Return the slice from the source that produced this token.
pub fn token_text<'a>(token: &Token, source: &'a str) -> &'a str {
  let end = token.loc + token.len;
  &source[token.loc..end]
}

/// Human-friendly description used in diagnostics.
pub fn describe_token(token: Option<&Token>, source: &str) -> String {
  match token {
    Some(t) => match t.kind {
      TokenKind::Eof => "EOF".to_string(),
      _ => token_text(t, source).to_string(),
    },
    None => "EOF".to_string(),
  }
}
