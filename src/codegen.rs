//! Code generation: compile a lowered AST into a register instruction stream.
//!
//! Every expression leaves its value in a freshly acquired float register;
//! binary operators work in place on the left register and hand the right
//! one back for reuse. Identifiers are copied out of their binding first, so
//! in-place operations never clobber a parameter or the loop accumulator.

use std::collections::BTreeMap;

use tracing::trace;

use crate::asm::{Cond, FReg, FSrc, FloatOp, Function, GReg, Inst};
use crate::error::{BindingSnafu, CompileError, CompileResult};
use crate::ops::Operator;
use crate::parser::AstNode;
use crate::ty::{Type, pointer_to};

/// Where each variable lives while the expression runs.
pub type Env<'a> = BTreeMap<&'a str, FSrc>;

/// Build `name(params..) -> f64` from a lowered tree.
///
/// `params` are the free variables of the source expression in call order.
/// Lowering can drop a variable (`x^0`), so every parameter is loaded even
/// when the body never reads it.
pub fn scalar_function(name: &str, params: &[&str], ast: &AstNode) -> CompileResult<Function> {
  let mut func = Function::new(name, vec![Type::f64(); params.len()]);
  let mut env = Env::new();
  for (index, var) in params.iter().enumerate() {
    let reg = func.freg();
    func.load_argument(reg, index)?;
    env.insert(*var, FSrc::Reg(reg));
  }

  let result = emit_expr(&mut func, ast, &env)?;
  func.ret(result);
  let func = func.finish()?;
  trace!(function = name, "\n{func}");
  Ok(func)
}

/// Build `name(init: f64, count: i64, data: *const f64) -> f64`, folding
/// `ast` over `count` elements with `acc` bound to the running value and
/// `elem` to the current element.
///
/// `ast` may mention fewer variables than its source did; callers check the
/// source tree with [`check_reduction_vars`].
pub fn reduction_function(
  name: &str,
  ast: &AstNode,
  acc: &str,
  elem: &str,
) -> CompileResult<Function> {
  check_distinct(acc, elem)?;
  if let Some(extra) = ast.free_vars().into_iter().find(|v| *v != acc && *v != elem) {
    return extra_var(extra, acc, elem);
  }

  let element = Type::f64();
  let stride = element.size();
  let mut func = Function::new(name, vec![Type::f64(), Type::i64(), pointer_to(element)]);
  let value = func.freg();
  let count = func.greg();
  let ptr = func.greg();
  func.load_argument(value, 0)?;
  func.load_argument(count, 1)?;
  func.load_argument(ptr, 2)?;

  let env = Env::from([(acc, FSrc::Reg(value)), (elem, FSrc::Mem(ptr))]);
  count_down(&mut func, count, |func| {
    let result = emit_expr(func, ast, &env)?;
    func.emit(Inst::MovF {
      dst: value,
      src: FSrc::Reg(result),
    });
    func.release_freg(result);
    func.emit(Inst::AddImm {
      dst: ptr,
      imm: stride,
    });
    Ok(())
  })?;
  func.ret(value);

  let func = func.finish()?;
  trace!(function = name, "\n{func}");
  Ok(func)
}

fn check_distinct(acc: &str, elem: &str) -> CompileResult<()> {
  if acc == elem {
    return BindingSnafu {
      message: format!("accumulator and element are both named '{acc}'"),
    }
    .fail();
  }
  Ok(())
}

fn extra_var<T>(extra: &str, acc: &str, elem: &str) -> CompileResult<T> {
  BindingSnafu {
    message: format!("'{extra}' is neither the accumulator '{acc}' nor the element '{elem}'"),
  }
  .fail()
}

/// The free variables of a reduction body must be exactly `{acc, elem}`.
pub fn check_reduction_vars(ast: &AstNode, acc: &str, elem: &str) -> CompileResult<()> {
  check_distinct(acc, elem)?;
  let vars = ast.free_vars();
  for name in [acc, elem] {
    if !vars.contains(name) {
      return BindingSnafu {
        message: format!("'{name}' does not appear in '{ast}'"),
      }
      .fail();
    }
  }
  if let Some(extra) = vars.iter().find(|v| **v != acc && **v != elem) {
    return extra_var(extra, acc, elem);
  }
  Ok(())
}

/// Run `body` `count` times, decrementing `count` to zero. Nothing runs when
/// `count <= 0` on entry.
fn count_down<F>(func: &mut Function, count: GReg, body: F) -> CompileResult<()>
where
  F: FnOnce(&mut Function) -> CompileResult<()>,
{
  let top = func.label();
  let end = func.label();
  func.emit(Inst::Branch {
    cond: Cond::Le,
    lhs: count,
    imm: 0,
    target: end,
  });
  func.bind(top);
  body(func)?;
  func.emit(Inst::AddImm { dst: count, imm: -1 });
  func.emit(Inst::Branch {
    cond: Cond::Gt,
    lhs: count,
    imm: 0,
    target: top,
  });
  func.bind(end);
  Ok(())
}

/// Emit code for `node` and return the register holding its value. The
/// caller owns the returned register.
pub fn emit_expr(func: &mut Function, node: &AstNode, env: &Env<'_>) -> CompileResult<FReg> {
  match node {
    AstNode::Num { value } => {
      let reg = func.freg();
      func.load_const(reg, *value);
      Ok(reg)
    }
    AstNode::Var { name } => {
      let Some(src) = env.get(name.as_str()) else {
        return BindingSnafu {
          message: format!("no binding for variable '{name}'"),
        }
        .fail();
      };
      let reg = func.freg();
      func.emit(Inst::MovF { dst: reg, src: *src });
      Ok(reg)
    }
    AstNode::Unary { op, operand } => {
      let reg = emit_expr(func, operand, env)?;
      match op {
        Operator::Neg => emit_neg(func, reg),
        Operator::Sqrt => func.emit(Inst::Sqrt { dst: reg, src: reg }),
        other => {
          return Err(CompileError::lowering(format!(
            "'{other}' is not a prefix operator"
          )));
        }
      }
      Ok(reg)
    }
    AstNode::Binary { op, lhs, rhs } => {
      let dst = emit_expr(func, lhs, env)?;
      let src = emit_expr(func, rhs, env)?;
      match op {
        Operator::Add => func.arith(FloatOp::Add, dst, src),
        Operator::Sub => func.arith(FloatOp::Sub, dst, src),
        Operator::Mul => func.arith(FloatOp::Mul, dst, src),
        Operator::Div => func.arith(FloatOp::Div, dst, src),
        Operator::Pow => emit_pow(func, dst, src),
        other => {
          return Err(CompileError::lowering(format!(
            "'{other}' is not a binary operator"
          )));
        }
      }
      func.release_freg(src);
      Ok(dst)
    }
  }
}

/// Flip the sign bit: `reg ^= -0.0`.
fn emit_neg(func: &mut Function, reg: FReg) {
  let mask = func.freg();
  func.load_const(mask, -0.0);
  func.emit(Inst::Xor {
    dst: reg,
    src: mask,
  });
  func.release_freg(mask);
}

/// `base = base ^ exponent` by square-and-multiply over the exponent
/// truncated to an integer.
///
/// ```text
///     cvt.sat cnt, exp
///     acc = 1.0
///     if cnt != 0 goto check
///     base = 1.0
/// top:
///     bit = cnt & 1
///     cnt >>= 1
///     if bit == 0 goto even
///     acc *= base
/// even:
///     base *= base
/// check:
///     if cnt > 1 goto top
///     base *= acc
/// ```
///
/// Invariant at `check`: `acc * base^cnt` equals the original power.
fn emit_pow(func: &mut Function, base: FReg, exponent: FReg) {
  let count = func.greg();
  let bit = func.greg();
  let acc = func.freg();
  let top = func.label();
  let even = func.label();
  let check = func.label();

  func.emit(Inst::CvtToInt {
    dst: count,
    src: exponent,
  });
  func.load_const(acc, 1.0);
  func.emit(Inst::Branch {
    cond: Cond::Ne,
    lhs: count,
    imm: 0,
    target: check,
  });
  func.load_const(base, 1.0);

  func.bind(top);
  func.emit(Inst::AndImm {
    dst: bit,
    src: count,
    imm: 1,
  });
  func.emit(Inst::ShrImm {
    dst: count,
    amount: 1,
  });
  func.emit(Inst::Branch {
    cond: Cond::Eq,
    lhs: bit,
    imm: 0,
    target: even,
  });
  func.arith(FloatOp::Mul, acc, base);
  func.bind(even);
  func.arith(FloatOp::Mul, base, base);
  func.bind(check);
  func.emit(Inst::Branch {
    cond: Cond::Gt,
    lhs: count,
    imm: 1,
    target: top,
  });
  func.arith(FloatOp::Mul, base, acc);

  func.release_freg(acc);
  func.release_greg(bit);
  func.release_greg(count);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::backend::interp::Interpreter;
  use crate::backend::{Arg, Backend};
  use crate::lower::lower;
  use crate::parser::parse;

  fn scalar(src: &str) -> Function {
    let ast = parse(src).unwrap();
    let params: Vec<&str> = ast.free_vars().into_iter().collect();
    scalar_function("f", &params, &lower(&ast).unwrap()).unwrap()
  }

  fn run(func: &Function, args: &[f64]) -> f64 {
    let args: Vec<Arg> = args.iter().copied().map(Arg::F64).collect();
    let program = Interpreter.finalize(func).unwrap();
    unsafe { program.call(&args) }
  }

  #[test]
  fn parameters_follow_alphabetical_order() {
    let func = scalar("z - a");
    assert_eq!(func.params().len(), 2);
    assert_eq!(run(&func, &[1.0, 10.0]), 9.0);
  }

  #[test]
  fn binary_operators_reuse_the_right_register() {
    let func = scalar("1 + 2 + 3 + 4 + 5");
    assert_eq!(func.freg_count(), 2);
    assert_eq!(run(&func, &[]), 15.0);
  }

  #[test]
  fn integer_powers_use_the_squaring_loop() {
    let func = scalar("x^13");
    let listing = func.to_string();
    assert!(listing.contains("cvt.sat %r0"), "{listing}");
    assert!(listing.contains("shr"), "{listing}");
    assert_eq!(run(&func, &[3.0]), 3f64.powi(13));
    assert_eq!(run(&func, &[-2.0]), -8192.0);
  }

  #[test]
  fn power_loop_handles_small_counts() {
    // Bypass lowering so the loop sees 0, 1 and 3 directly.
    for (exponent, expected) in [(0.0, 1.0), (1.0, 7.0), (3.0, 343.0), (2.9, 49.0)] {
      let ast = AstNode::binary(Operator::Pow, AstNode::var("x"), AstNode::number(exponent));
      let func = scalar_function("p", &["x"], &ast).unwrap();
      assert_eq!(run(&func, &[7.0]), expected, "x^{exponent}");
    }
  }

  #[test]
  fn parameters_dropped_by_lowering_are_still_loaded() {
    let func = scalar("x^0 + y");
    assert_eq!(func.params().len(), 2);
    assert_eq!(run(&func, &[5.0, 7.0]), 8.0);
  }

  #[test]
  fn negation_flips_the_sign_of_zero() {
    let func = scalar("-x");
    assert!(run(&func, &[0.0]).is_sign_negative());
    assert_eq!(run(&func, &[-2.5]), 2.5);
  }

  #[test]
  fn parameters_survive_in_place_updates() {
    assert_eq!(run(&scalar("x * x + x"), &[3.0]), 12.0);
  }

  #[test]
  fn unbound_variables_are_reported() {
    let mut func = Function::new("f", vec![]);
    let err = emit_expr(&mut func, &AstNode::var("q"), &Env::new()).unwrap_err();
    assert!(err.to_string().contains("'q'"), "{err}");
  }

  #[test]
  fn reduction_signature_and_loop() {
    let ast = lower(&parse("t + x").unwrap()).unwrap();
    let func = reduction_function("sum", &ast, "t", "x").unwrap();
    assert_eq!(func.params()[2].to_string(), "*const f64");

    let data = [1.0, 2.0, 3.0];
    let program = Interpreter.finalize(&func).unwrap();
    let call = |init: f64, n: i64| unsafe {
      program.call(&[Arg::F64(init), Arg::I64(n), Arg::Ptr(data.as_ptr())])
    };
    assert_eq!(call(0.0, 3), 6.0);
    assert_eq!(call(4.0, 3), 10.0);
    assert_eq!(call(4.0, 0), 4.0);
    assert_eq!(call(4.0, -5), 4.0);
  }

  #[test]
  fn reduction_requires_exactly_the_named_variables() {
    let ast = parse("t + x * y").unwrap();
    assert!(check_reduction_vars(&ast, "t", "x").is_err());
    assert!(reduction_function("r", &ast, "t", "x").is_err());
    let ast = parse("t + 1").unwrap();
    assert!(check_reduction_vars(&ast, "t", "x").is_err());
    let ast = parse("t + x").unwrap();
    assert!(check_reduction_vars(&ast, "t", "t").is_err());
    assert!(reduction_function("r", &ast, "t", "t").is_err());
  }

  #[test]
  fn reduction_body_may_lose_a_variable_to_lowering() {
    let ast = parse("t + x^0").unwrap();
    check_reduction_vars(&ast, "t", "x").unwrap();
    let func = reduction_function("count", &lower(&ast).unwrap(), "t", "x").unwrap();
    let data = [9.0, 9.0, 9.0];
    let program = Interpreter.finalize(&func).unwrap();
    let args = [Arg::F64(0.0), Arg::I64(3), Arg::Ptr(data.as_ptr())];
    assert_eq!(unsafe { program.call(&args) }, 3.0);
  }
}
