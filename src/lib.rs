//! Crate root: wires together the compilation pipeline.
//!
//! An infix arithmetic expression goes through small, separately testable
//! stages:
//! - `tokenizer` splits the source into a lazy token stream.
//! - `parser` builds the expression tree with an operator-precedence parser
//!   driven by the table in `ops`.
//! - `lower` rewrites powers into primitives the code generator can emit.
//! - `codegen` turns the tree into a register instruction stream (`asm`).
//! - `backend` finalizes the stream, either as host machine code through
//!   Cranelift or on a software register machine.
//! - `jit` ties it together behind [`Compiler`].
//! - `error` centralises reporting utilities shared by the other modules.
//!
//! ```
//! use arithjit::Compiler;
//!
//! let compiler = Compiler::interpreter();
//! let f = compiler.compile("(-b + (b^2 - 4*a*c)^0.5) / (2*a)").unwrap();
//! assert_eq!(f.params(), ["a", "b", "c"]);
//! assert_eq!(f.call(&[5.0, 6.0, 1.0]).unwrap(), -0.2);
//!
//! let sum = compiler.sum().unwrap();
//! assert_eq!(sum.apply(&[1.0, 2.0, 3.0]), 6.0);
//! ```

pub mod asm;
pub mod backend;
pub mod codegen;
pub mod error;
pub mod eval;
pub mod jit;
pub mod lower;
pub mod ops;
pub mod options;
pub mod parser;
pub mod tokenizer;
pub mod ty;

pub use backend::{BackendError, BackendKind};
pub use error::{CompileError, CompileResult};
pub use jit::{Aggregator, Compiler, Evaluator, Reducer};
pub use options::CompileOptions;
pub use parser::AstNode;

/// Parse `expr` into a tree without lowering it.
pub fn to_ast(expr: &str) -> CompileResult<AstNode> {
  parser::parse(expr)
}

/// Parse and lower `expr`: the tree the code generator sees.
pub fn to_lowered_ast(expr: &str) -> CompileResult<AstNode> {
  lower::lower(&parser::parse(expr)?)
}
