//! Shared error utilities used across the compilation pipeline.
//!
//! Lexer and parser failures point at the offending byte with a caret, in
//! the same style as a classic compiler diagnostic. Later stages have no
//! meaningful source position and carry a plain message instead.

use snafu::Snafu;

use crate::backend::BackendError;

pub type CompileResult<T> = Result<T, CompileError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum CompileError {
  /// The input contains a character sequence that is not a token.
  #[snafu(display("{expr_line}\n{marker} {message}"))]
  Lex {
    expr_line: String,
    marker: String,
    message: String,
  },

  /// The token sequence does not form a single well-nested expression.
  #[snafu(display("{expr_line}\n{marker} {message}"))]
  Parse {
    expr_line: String,
    marker: String,
    message: String,
  },

  /// The tree contains a form the code generator cannot realise.
  #[snafu(display("cannot lower expression: {message}"))]
  Lowering { message: String },

  /// Reduction variable names do not line up with the body expression.
  #[snafu(display("cannot bind reduction variables: {message}"))]
  Binding { message: String },

  /// A compiled function was called with the wrong number of arguments.
  #[snafu(display("{name} takes {expected} argument(s) but {got} were given"))]
  Arity {
    name: String,
    expected: usize,
    got: usize,
  },

  #[snafu(context(false), display("backend error: {source}"))]
  Backend { source: BackendError },
}

impl CompileError {
  /// Construct a lexical error anchored at a byte offset in the source.
  pub fn lex_at(expr: &str, loc: usize, message: impl Into<String>) -> Self {
    let (expr_line, marker) = caret(expr, loc);
    Self::Lex {
      expr_line,
      marker,
      message: message.into(),
    }
  }

  /// Construct a syntax error anchored at a byte offset in the source.
  pub fn parse_at(expr: &str, loc: usize, message: impl Into<String>) -> Self {
    let (expr_line, marker) = caret(expr, loc);
    Self::Parse {
      expr_line,
      marker,
      message: message.into(),
    }
  }

  pub fn lowering(message: impl Into<String>) -> Self {
    Self::Lowering {
      message: message.into(),
    }
  }

  /// The bare diagnostic text, without the quoted source line and marker.
  pub fn message(&self) -> String {
    match self {
      Self::Lex { message, .. }
      | Self::Parse { message, .. }
      | Self::Lowering { message }
      | Self::Binding { message } => message.clone(),
      other => other.to_string(),
    }
  }
}

fn caret(expr: &str, loc: usize) -> (String, String) {
  let expr_line = format!("'{expr}'");
  let safe_loc = loc.min(expr.len());
  let char_offset = expr[..safe_loc].chars().count() + 1; // account for opening quote
  let marker = format!("{}^", " ".repeat(char_offset));
  (expr_line, marker)
}
