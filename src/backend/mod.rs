//! Backends turn a finished [`Function`] into something that can be called.
//!
//! Two implementations ship with the crate: [`native::Native`] encodes the
//! stream for the host CPU through Cranelift and hands back a real function
//! pointer, and [`interp::Interpreter`] executes the same stream on a
//! software register machine. Both must produce bit-identical results.

pub mod interp;
pub mod native;

use std::fmt;
use std::str::FromStr;

use snafu::Snafu;

use crate::asm::Function;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
  /// No code generator is available for this machine.
  #[snafu(display("unsupported host: {message}"))]
  Host { message: String },

  /// The encoder rejected the function.
  #[snafu(display("failed to encode {function}: {message}"))]
  Encoding { function: String, message: String },

  #[snafu(display("unsupported signature ({signature}): {message}"))]
  UnsupportedSignature { signature: String, message: String },

  /// The instruction stream breaks a structural invariant.
  #[snafu(display("malformed instruction stream: {message}"))]
  Malformed { message: String },
}

impl BackendError {
  pub fn malformed(message: impl Into<String>) -> Self {
    Self::Malformed {
      message: message.into(),
    }
  }
}

/// One call argument, matching a parameter [`Type`](crate::ty::Type).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arg {
  F64(f64),
  I64(i64),
  Ptr(*const f64),
}

impl Arg {
  pub fn as_f64(self) -> f64 {
    match self {
      Arg::F64(value) => value,
      Arg::I64(value) => value as f64,
      Arg::Ptr(_) => f64::NAN,
    }
  }

  pub fn as_i64(self) -> i64 {
    match self {
      Arg::F64(value) => value as i64,
      Arg::I64(value) => value,
      Arg::Ptr(ptr) => ptr as usize as i64,
    }
  }

  pub fn as_ptr(self) -> *const f64 {
    match self {
      Arg::Ptr(ptr) => ptr,
      Arg::F64(_) | Arg::I64(_) => std::ptr::null(),
    }
  }
}

/// A finalized function.
pub trait Executable: Send + Sync {
  /// Run the function.
  ///
  /// # Safety
  ///
  /// `args` must match the parameter list the function was built with, and
  /// every pointer argument must reference as many readable `f64`s as the
  /// generated code will load through it.
  unsafe fn call(&self, args: &[Arg]) -> f64;
}

pub trait Backend: Send + Sync {
  fn name(&self) -> &'static str;

  /// Encode and load `function`. It must already have passed
  /// [`Function::finish`].
  fn finalize(&self, function: &Function) -> Result<Box<dyn Executable>, BackendError>;
}

/// Which backend a [`Compiler`](crate::Compiler) uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
  #[default]
  Native,
  Interpreter,
}

impl BackendKind {
  pub fn create(self) -> Box<dyn Backend> {
    match self {
      BackendKind::Native => Box::new(native::Native::default()),
      BackendKind::Interpreter => Box::new(interp::Interpreter),
    }
  }
}

impl FromStr for BackendKind {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "native" | "jit" => Ok(BackendKind::Native),
      "interp" | "interpreter" | "vm" => Ok(BackendKind::Interpreter),
      other => Err(format!("unknown backend '{other}', expected 'native' or 'interp'")),
    }
  }
}

impl fmt::Display for BackendKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BackendKind::Native => f.write_str("native"),
      BackendKind::Interpreter => f.write_str("interp"),
    }
  }
}
