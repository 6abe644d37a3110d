//! Compiler configuration.

use std::env;

use tracing::warn;

use crate::backend::BackendKind;
use crate::parser::DEFAULT_MAX_DEPTH;

/// Selects the backend, e.g. `ARITHJIT_BACKEND=interp`.
pub const BACKEND_VAR: &str = "ARITHJIT_BACKEND";
/// Any value other than empty, `0` or `false` turns on listing dumps.
pub const DUMP_VAR: &str = "ARITHJIT_DUMP";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
  /// Backend used to finalize compiled functions.
  pub backend: BackendKind,
  /// Maximum parenthesis nesting and tree depth accepted by the parser.
  pub max_depth: usize,
  /// Print each instruction listing to stderr before finalizing it.
  pub dump_listing: bool,
}

impl Default for CompileOptions {
  fn default() -> Self {
    Self {
      backend: BackendKind::default(),
      max_depth: DEFAULT_MAX_DEPTH,
      dump_listing: false,
    }
  }
}

impl CompileOptions {
  /// Defaults, overridden by `ARITHJIT_BACKEND` and `ARITHJIT_DUMP`. Invalid
  /// values are logged and ignored.
  pub fn from_env() -> Self {
    Self::default().with_env(|key| env::var(key).ok())
  }

  /// Apply overrides from `lookup`.
  pub fn with_env<F>(mut self, lookup: F) -> Self
  where
    F: Fn(&str) -> Option<String>,
  {
    if let Some(value) = lookup(BACKEND_VAR) {
      match value.parse() {
        Ok(kind) => self.backend = kind,
        Err(err) => warn!(var = BACKEND_VAR, %value, "ignoring: {err}"),
      }
    }
    if let Some(value) = lookup(DUMP_VAR) {
      self.dump_listing = is_enabled(&value);
    }
    self
  }

  pub fn backend(mut self, backend: BackendKind) -> Self {
    self.backend = backend;
    self
  }

  pub fn max_depth(mut self, max_depth: usize) -> Self {
    self.max_depth = max_depth;
    self
  }

  pub fn dump_listing(mut self, dump_listing: bool) -> Self {
    self.dump_listing = dump_listing;
    self
  }
}

fn is_enabled(value: &str) -> bool {
  let value = value.trim();
  !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}
