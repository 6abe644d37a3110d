//! Reference tree interpreter.
//!
//! Walks an unlowered AST directly with the scalar semantics from the
//! operator table (`^` is the library `powf`). Compiled code is checked
//! against this: exactly for `^`-free trees, within a small relative
//! tolerance otherwise.

use std::collections::BTreeMap;

use crate::error::{AritySnafu, BindingSnafu, CompileResult};
use crate::parser::AstNode;

/// Evaluate `ast` with `args` bound to its free variables in alphabetical
/// order, the same order compiled scalar functions take them in.
pub fn evaluate(ast: &AstNode, args: &[f64]) -> CompileResult<f64> {
  let vars = ast.free_vars();
  if vars.len() != args.len() {
    return AritySnafu {
      name: ast.to_string(),
      expected: vars.len(),
      got: args.len(),
    }
    .fail();
  }
  let env: BTreeMap<&str, f64> = vars.into_iter().zip(args.iter().copied()).collect();
  evaluate_in(ast, &env)
}

/// Evaluate `ast` with explicitly named bindings.
pub fn evaluate_in(ast: &AstNode, env: &BTreeMap<&str, f64>) -> CompileResult<f64> {
  match ast {
    AstNode::Num { value } => Ok(*value),
    AstNode::Var { name } => match env.get(name.as_str()) {
      Some(value) => Ok(*value),
      None => BindingSnafu {
        message: format!("no value for variable '{name}'"),
      }
      .fail(),
    },
    AstNode::Unary { op, operand } => Ok(op.apply_unary(evaluate_in(operand, env)?)),
    AstNode::Binary { op, lhs, rhs } => {
      let a = evaluate_in(lhs, env)?;
      let b = evaluate_in(rhs, env)?;
      Ok(op.apply_binary(a, b))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::parser::parse;

  fn eval(src: &str, args: &[f64]) -> f64 {
    evaluate(&parse(src).unwrap(), args).unwrap()
  }

  #[test]
  fn follows_precedence() {
    assert_eq!(eval("1+2*3", &[]), 7.0);
    assert_eq!(eval("(1+2)*3", &[]), 9.0);
    assert_eq!(eval("2^3^2", &[]), 512.0);
    assert_eq!(eval("-1^2", &[]), -1.0);
  }

  #[test]
  fn binds_alphabetically() {
    assert_eq!(eval("(-b+(b^2-4*a*c)^0.5)/(2*a)", &[5.0, 6.0, 1.0]), -0.2);
    assert_eq!(eval("y / x", &[4.0, 2.0]), 0.5);
  }

  #[test]
  fn keeps_ieee_edge_cases() {
    assert_eq!(eval("a/0", &[-1.0]), f64::NEG_INFINITY);
    assert!(eval("a/0", &[0.0]).is_nan());
    assert_eq!(eval("x^-3", &[-0.0]), f64::NEG_INFINITY);
  }

  #[test]
  fn counts_arguments() {
    assert!(evaluate(&parse("x + y").unwrap(), &[1.0]).is_err());
  }
}
