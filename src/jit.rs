//! The compile pipeline and the callable objects it hands out.
//!
//! `source → parse → lower → codegen → backend`: a [`Compiler`] runs the
//! stages in order and wraps the finalized code in an [`Evaluator`] (scalar
//! function of the free variables) or a [`Reducer`] (fold over a slice).

use std::fmt;

use tracing::{debug, trace};

use crate::asm::Function;
use crate::backend::{Arg, Backend, BackendKind, Executable};
use crate::codegen::{check_reduction_vars, reduction_function, scalar_function};
use crate::error::{AritySnafu, CompileResult};
use crate::lower::lower;
use crate::options::CompileOptions;
use crate::parser::{AstNode, parse_with_depth};

pub struct Compiler {
  options: CompileOptions,
  backend: Box<dyn Backend>,
}

impl Default for Compiler {
  fn default() -> Self {
    Self::new(CompileOptions::default())
  }
}

impl Compiler {
  pub fn new(options: CompileOptions) -> Self {
    let backend = options.backend.create();
    Self { options, backend }
  }

  /// Compile to host machine code.
  pub fn native() -> Self {
    Self::new(CompileOptions::default().backend(BackendKind::Native))
  }

  /// Run compiled code on the software register machine.
  pub fn interpreter() -> Self {
    Self::new(CompileOptions::default().backend(BackendKind::Interpreter))
  }

  pub fn options(&self) -> &CompileOptions {
    &self.options
  }

  pub fn backend_name(&self) -> &'static str {
    self.backend.name()
  }

  pub fn parse(&self, source: &str) -> CompileResult<AstNode> {
    let ast = parse_with_depth(source, self.options.max_depth)?;
    debug!(%ast, "parsed expression");
    Ok(ast)
  }

  /// Compile `source` into a function of its free variables, taken in
  /// alphabetical order.
  pub fn compile(&self, source: &str) -> CompileResult<Evaluator> {
    let ast = self.parse(source)?;
    self.compile_ast(&ast)
  }

  pub fn compile_ast(&self, ast: &AstNode) -> CompileResult<Evaluator> {
    let func = self.scalar(ast)?;
    let code = self.finalize(&func)?;
    Ok(Evaluator {
      expression: ast.to_string(),
      params: ast.free_vars().into_iter().map(String::from).collect(),
      code,
    })
  }

  /// Parameters come from `ast` itself, not from its lowered form.
  fn scalar(&self, ast: &AstNode) -> CompileResult<Function> {
    let params: Vec<&str> = ast.free_vars().into_iter().collect();
    scalar_function("eval", &params, &lower(ast)?)
  }

  /// Compile `source` into a fold over a slice. `acc` names the running
  /// value and `elem` the current element; they must be exactly the free
  /// variables of `source`.
  pub fn reducer(&self, source: &str, acc: &str, elem: &str) -> CompileResult<Reducer> {
    let ast = self.parse(source)?;
    check_reduction_vars(&ast, acc, elem)?;
    let func = reduction_function("reduce", &lower(&ast)?, acc, elem)?;
    let code = self.finalize(&func)?;
    Ok(Reducer {
      expression: ast.to_string(),
      acc: acc.to_string(),
      elem: elem.to_string(),
      code,
    })
  }

  /// A reducer with a default initial value.
  pub fn aggregator(
    &self,
    source: &str,
    acc: &str,
    elem: &str,
    init: f64,
  ) -> CompileResult<Aggregator> {
    Ok(Aggregator {
      reducer: self.reducer(source, acc, elem)?,
      init,
    })
  }

  /// `t + x` from `0`.
  pub fn sum(&self) -> CompileResult<Aggregator> {
    self.aggregator("t + x", "t", "x", 0.0)
  }

  /// `t * x` from `1`.
  pub fn product(&self) -> CompileResult<Aggregator> {
    self.aggregator("t * x", "t", "x", 1.0)
  }

  /// The instruction stream `compile` would finalize, without finalizing.
  pub fn listing(&self, source: &str) -> CompileResult<Function> {
    let ast = self.parse(source)?;
    self.scalar(&ast)
  }

  fn finalize(&self, func: &Function) -> CompileResult<Box<dyn Executable>> {
    if self.options.dump_listing {
      eprintln!("{func}");
    }
    trace!(function = func.name(), "\n{func}");
    let code = self.backend.finalize(func)?;
    debug!(
      backend = self.backend.name(),
      function = func.name(),
      insts = func.insts().len(),
      "finalized function"
    );
    Ok(code)
  }
}

impl fmt::Debug for Compiler {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Compiler")
      .field("options", &self.options)
      .field("backend", &self.backend.name())
      .finish()
  }
}

/// A compiled scalar expression.
pub struct Evaluator {
  expression: String,
  params: Vec<String>,
  code: Box<dyn Executable>,
}

impl Evaluator {
  /// Parameter names in call order.
  pub fn params(&self) -> &[String] {
    &self.params
  }

  pub fn expression(&self) -> &str {
    &self.expression
  }

  pub fn call(&self, args: &[f64]) -> CompileResult<f64> {
    if args.len() != self.params.len() {
      return AritySnafu {
        name: self.expression.as_str(),
        expected: self.params.len(),
        got: args.len(),
      }
      .fail();
    }
    let args: Vec<Arg> = args.iter().copied().map(Arg::F64).collect();
    // SAFETY: the function was built with exactly `params.len()` f64
    // parameters and reads no memory.
    Ok(unsafe { self.code.call(&args) })
  }
}

impl fmt::Debug for Evaluator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Evaluator")
      .field("expression", &self.expression)
      .field("params", &self.params)
      .finish_non_exhaustive()
  }
}

/// A compiled fold `acc = body(acc, elem)` over a slice.
pub struct Reducer {
  expression: String,
  acc: String,
  elem: String,
  code: Box<dyn Executable>,
}

impl Reducer {
  pub fn expression(&self) -> &str {
    &self.expression
  }

  pub fn accumulator(&self) -> &str {
    &self.acc
  }

  pub fn element(&self) -> &str {
    &self.elem
  }

  /// Fold every element of `data` into `init`. An empty slice returns
  /// `init` unchanged.
  pub fn reduce(&self, init: f64, data: &[f64]) -> f64 {
    let args = [
      Arg::F64(init),
      Arg::I64(data.len() as i64),
      Arg::Ptr(data.as_ptr()),
    ];
    // SAFETY: the loop reads exactly `data.len()` elements through the
    // pointer, all of which belong to `data`.
    unsafe { self.code.call(&args) }
  }
}

impl fmt::Debug for Reducer {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Reducer")
      .field("expression", &self.expression)
      .field("acc", &self.acc)
      .field("elem", &self.elem)
      .finish_non_exhaustive()
  }
}

/// A [`Reducer`] with a default initial value.
#[derive(Debug)]
pub struct Aggregator {
  reducer: Reducer,
  init: f64,
}

impl Aggregator {
  pub fn init(&self) -> f64 {
    self.init
  }

  pub fn reducer(&self) -> &Reducer {
    &self.reducer
  }

  pub fn apply(&self, data: &[f64]) -> f64 {
    self.reducer.reduce(self.init, data)
  }

  /// Like [`apply`](Self::apply) with `init` in place of the default.
  pub fn apply_from(&self, init: f64, data: &[f64]) -> f64 {
    self.reducer.reduce(init, data)
  }
}
