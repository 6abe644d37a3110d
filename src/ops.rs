//! The fixed operator table.
//!
//! Every operator the language knows is a variant of [`Operator`]; its
//! precedence, associativity, arity and scalar meaning are answered by
//! exhaustive matches so the parser and the code generator can never
//! disagree about the operator set.

use std::fmt;

/// How operators of equal precedence group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assoc {
  Left,
  Right,
  Unary,
}

/// Operators recognised by the language, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
  Add,
  Sub,
  Div,
  Mul,
  Neg,
  Pow,
  Sqrt,
}

impl Operator {
  pub const ALL: [Operator; 7] = [
    Operator::Add,
    Operator::Sub,
    Operator::Div,
    Operator::Mul,
    Operator::Neg,
    Operator::Pow,
    Operator::Sqrt,
  ];

  /// Source spelling. `Sub` and `Neg` share `-`; context picks one.
  pub fn symbol(self) -> &'static str {
    match self {
      Operator::Add => "+",
      Operator::Sub | Operator::Neg => "-",
      Operator::Div => "/",
      Operator::Mul => "*",
      Operator::Pow => "^",
      Operator::Sqrt => "√",
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Operator::Add => "add",
      Operator::Sub => "sub",
      Operator::Div => "truediv",
      Operator::Mul => "mul",
      Operator::Neg => "neg",
      Operator::Pow => "pow",
      Operator::Sqrt => "sqrt",
    }
  }

  /// Higher binds tighter.
  pub fn precedence(self) -> u8 {
    match self {
      Operator::Add | Operator::Sub => 0,
      Operator::Div | Operator::Mul => 1,
      Operator::Neg => 2,
      Operator::Pow => 3,
      Operator::Sqrt => 4,
    }
  }

  pub fn assoc(self) -> Assoc {
    match self {
      Operator::Add | Operator::Sub | Operator::Div | Operator::Mul => Assoc::Left,
      Operator::Pow => Assoc::Right,
      Operator::Neg | Operator::Sqrt => Assoc::Unary,
    }
  }

  pub fn arity(self) -> usize {
    match self.assoc() {
      Assoc::Unary => 1,
      Assoc::Left | Assoc::Right => 2,
    }
  }

  pub fn is_unary(self) -> bool {
    self.arity() == 1
  }

  /// The operator a symbol denotes where an operand is expected
  /// (expression start, after `(` or after another operator).
  pub fn prefix(symbol: &str) -> Option<Operator> {
    match symbol {
      "-" => Some(Operator::Neg),
      "√" => Some(Operator::Sqrt),
      _ => None,
    }
  }

  /// The operator a symbol denotes between two operands.
  pub fn infix(symbol: &str) -> Option<Operator> {
    match symbol {
      "+" => Some(Operator::Add),
      "-" => Some(Operator::Sub),
      "/" => Some(Operator::Div),
      "*" => Some(Operator::Mul),
      "^" => Some(Operator::Pow),
      _ => None,
    }
  }

  /// Whether `self`, already on the operator stack, must be applied before
  /// `incoming` is pushed: it binds strictly tighter, or equally tight and
  /// `incoming` groups to the left.
  pub fn binds_before(self, incoming: Operator) -> bool {
    self.precedence() > incoming.precedence()
      || (self.precedence() == incoming.precedence() && incoming.assoc() == Assoc::Left)
  }

  pub fn apply_unary(self, x: f64) -> f64 {
    match self {
      Operator::Neg => -x,
      Operator::Sqrt => x.sqrt(),
      _ => f64::NAN,
    }
  }

  /// Scalar meaning with IEEE-754 semantics: no trapping on zero division.
  pub fn apply_binary(self, a: f64, b: f64) -> f64 {
    match self {
      Operator::Add => a + b,
      Operator::Sub => a - b,
      Operator::Div => a / b,
      Operator::Mul => a * b,
      Operator::Pow => a.powf(b),
      Operator::Neg | Operator::Sqrt => f64::NAN,
    }
  }
}

impl fmt::Display for Operator {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.symbol())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn precedence_levels_follow_table_order() {
    let levels: Vec<u8> = Operator::ALL.iter().map(|op| op.precedence()).collect();
    assert_eq!(levels, vec![0, 0, 1, 1, 2, 3, 4]);
  }

  #[test]
  fn minus_is_two_distinct_operators() {
    assert_eq!(Operator::prefix("-"), Some(Operator::Neg));
    assert_eq!(Operator::infix("-"), Some(Operator::Sub));
    assert_ne!(Operator::Neg, Operator::Sub);
    assert_eq!(Operator::prefix("+"), None);
    assert_eq!(Operator::infix("√"), None);
  }

  #[test]
  fn left_assoc_pops_equal_precedence_right_assoc_does_not() {
    assert!(Operator::Mul.binds_before(Operator::Div));
    assert!(Operator::Sub.binds_before(Operator::Add));
    assert!(!Operator::Pow.binds_before(Operator::Pow));
    assert!(!Operator::Add.binds_before(Operator::Mul));
    assert!(Operator::Neg.binds_before(Operator::Mul));
    assert!(!Operator::Neg.binds_before(Operator::Pow));
  }

  #[test]
  fn arity_matches_assoc() {
    for op in Operator::ALL {
      assert_eq!(op.is_unary(), op.assoc() == Assoc::Unary);
    }
  }

  #[test]
  fn scalar_semantics_do_not_trap() {
    assert_eq!(Operator::Div.apply_binary(-1.0, 0.0), f64::NEG_INFINITY);
    assert!(Operator::Div.apply_binary(0.0, 0.0).is_nan());
    assert_eq!(Operator::Pow.apply_binary(0.0, -1.0), f64::INFINITY);
    assert_eq!(Operator::Sqrt.apply_unary(9.0), 3.0);
    assert_eq!(Operator::Neg.apply_unary(0.0).to_bits(), (-0.0f64).to_bits());
  }
}
