//! Lowering: rewrite a parsed tree into forms the code generator can emit
//! without a math library.
//!
//! Only exponentiation needs real work. Integer powers stay as `^` nodes and
//! are expanded into a square-and-multiply loop at code generation time;
//! the exponents `0`, `1`, `2` and `0.5` become cheaper primitives, negative
//! exponents become a reciprocal, and anything else is rejected here rather
//! than at run time. Negated literals are folded into a single literal.

use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::ops::Operator;
use crate::parser::AstNode;

/// Produce a lowered copy of `node`. Lowering a lowered tree is a no-op.
pub fn lower(node: &AstNode) -> CompileResult<AstNode> {
  let lowered = lower_node(node)?;
  debug!(%lowered, "lowered expression");
  Ok(lowered)
}

fn lower_node(node: &AstNode) -> CompileResult<AstNode> {
  match node {
    AstNode::Num { .. } | AstNode::Var { .. } => Ok(node.clone()),
    AstNode::Unary { op, operand } => {
      let operand = lower_node(operand)?;
      match (op, operand) {
        (Operator::Neg, AstNode::Num { value }) => Ok(AstNode::number(-value)),
        (op, operand) => Ok(AstNode::unary(*op, operand)),
      }
    }
    AstNode::Binary {
      op: Operator::Pow,
      lhs,
      rhs,
    } => lower_pow(lower_node(lhs)?, lower_node(rhs)?),
    AstNode::Binary { op, lhs, rhs } => {
      Ok(AstNode::binary(*op, lower_node(lhs)?, lower_node(rhs)?))
    }
  }
}

/// Exponents from here on do not fit the signed 64-bit loop counter.
const COUNT_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// Split `e >= 2^63` into `inner * rest` where `inner` is a power of two
/// below `2^63` and both factors are integers, so `b^e == (b^inner)^rest`.
/// Every float this large is a multiple of `2^11`.
fn split_count(mut e: f64) -> (f64, f64) {
  let mut inner = 1.0;
  for _ in 0..62 {
    if (e / 2.0).fract() != 0.0 {
      break;
    }
    e /= 2.0;
    inner *= 2.0;
  }
  (inner, e)
}

fn lower_pow(base: AstNode, exponent: AstNode) -> CompileResult<AstNode> {
  let AstNode::Num { value: e } = exponent else {
    return Err(CompileError::lowering(format!(
      "exponent must be a numeric literal, got '{exponent}'"
    )));
  };

  if e.is_sign_negative() {
    let positive = lower_pow(base, AstNode::number(-e))?;
    return Ok(AstNode::binary(Operator::Div, AstNode::number(1.0), positive));
  }
  if e.is_finite() && e >= COUNT_LIMIT {
    let (inner, rest) = split_count(e);
    let base = AstNode::binary(Operator::Pow, base, AstNode::number(inner));
    return lower_pow(base, AstNode::number(rest));
  }
  if e == 0.5 {
    return Ok(AstNode::unary(Operator::Sqrt, base));
  }
  if e == 2.0 {
    return Ok(AstNode::binary(Operator::Mul, base.clone(), base));
  }
  if e == 1.0 {
    return Ok(base);
  }
  if e == 0.0 {
    return Ok(AstNode::number(1.0));
  }
  if e.is_finite() && e.fract() == 0.0 {
    return Ok(AstNode::binary(Operator::Pow, base, exponent));
  }
  Err(CompileError::lowering(format!(
    "cannot yet handle ^{exponent}: only integer powers and 0.5 are supported"
  )))
}
