//! Operator-precedence parser producing an expression AST.
//!
//! Rather than one helper per precedence level, the parser keeps an explicit
//! operand stack and operator stack (shunting-yard) and lets the operator
//! table decide when to reduce. Recursion is used only for parenthesised
//! sub-expressions, and both nesting and tree depth are capped so a hostile
//! input cannot blow the stack of later passes.

use std::collections::BTreeSet;
use std::fmt;

use crate::error::{CompileError, CompileResult};
use crate::ops::Operator;
use crate::tokenizer::{Lexer, Token, TokenKind, canonical_number, describe_token};

/// Default cap on parenthesis nesting and tree depth.
pub const DEFAULT_MAX_DEPTH: usize = 256;

/// Expression tree produced by the parser.
#[derive(Debug, Clone, PartialEq)]
pub enum AstNode {
  Num {
    value: f64,
  },
  Var {
    name: String,
  },
  Unary {
    op: Operator,
    operand: Box<AstNode>,
  },
  Binary {
    op: Operator,
    lhs: Box<AstNode>,
    rhs: Box<AstNode>,
  },
}

impl AstNode {
  pub fn number(value: f64) -> Self {
    Self::Num { value }
  }

  pub fn var(name: impl Into<String>) -> Self {
    Self::Var { name: name.into() }
  }

  pub fn unary(op: Operator, operand: AstNode) -> Self {
    Self::Unary {
      op,
      operand: Box::new(operand),
    }
  }

  pub fn binary(op: Operator, lhs: AstNode, rhs: AstNode) -> Self {
    Self::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  /// The operator at the root, if this is not a leaf.
  pub fn op(&self) -> Option<Operator> {
    match self {
      Self::Unary { op, .. } | Self::Binary { op, .. } => Some(*op),
      Self::Num { .. } | Self::Var { .. } => None,
    }
  }

  /// Identifiers reachable from the leaves, in alphabetical order.
  pub fn free_vars(&self) -> BTreeSet<&str> {
    let mut vars = BTreeSet::new();
    self.collect_vars(&mut vars);
    vars
  }

  fn collect_vars<'a>(&'a self, vars: &mut BTreeSet<&'a str>) {
    match self {
      Self::Num { .. } => {}
      Self::Var { name } => {
        vars.insert(name.as_str());
      }
      Self::Unary { operand, .. } => operand.collect_vars(vars),
      Self::Binary { lhs, rhs, .. } => {
        lhs.collect_vars(vars);
        rhs.collect_vars(vars);
      }
    }
  }

  /// Length of the longest root-to-leaf path; a leaf has depth 1.
  pub fn depth(&self) -> usize {
    match self {
      Self::Num { .. } | Self::Var { .. } => 1,
      Self::Unary { operand, .. } => 1 + operand.depth(),
      Self::Binary { lhs, rhs, .. } => 1 + lhs.depth().max(rhs.depth()),
    }
  }
}

/// Infix rendering with just enough parentheses to parse back to the same
/// tree. `^` is printed tight, other binary operators spaced.
impl fmt::Display for AstNode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Num { value } => f.write_str(&canonical_number(*value)),
      Self::Var { name } => f.write_str(name),
      Self::Unary { op, operand } => {
        let wrap = operand.op().is_some_and(|inner| op.binds_before(inner));
        if wrap {
          write!(f, "{op}({operand})")
        } else {
          write!(f, "{op}{operand}")
        }
      }
      Self::Binary { op, lhs, rhs } => {
        // A negative literal base reads as a negation: `-2^4` is `-(2^4)`.
        let negative_base = *op == Operator::Pow
          && matches!(**lhs, Self::Num { value } if value.is_sign_negative());
        let wrap_lhs = negative_base || lhs.op().is_some_and(|inner| !inner.binds_before(*op));
        let wrap_rhs = matches!(**rhs, Self::Binary { op: inner, .. } if op.binds_before(inner));
        if wrap_lhs {
          write!(f, "({lhs})")?;
        } else {
          write!(f, "{lhs}")?;
        }
        if *op == Operator::Pow {
          f.write_str("^")?;
        } else {
          write!(f, " {op} ")?;
        }
        if wrap_rhs {
          write!(f, "({rhs})")
        } else {
          write!(f, "{rhs}")
        }
      }
    }
  }
}

/// Parse an expression with the default depth limit.
pub fn parse(source: &str) -> CompileResult<AstNode> {
  parse_with_depth(source, DEFAULT_MAX_DEPTH)
}

/// Parse an expression, rejecting inputs that nest deeper than `max_depth`.
pub fn parse_with_depth(source: &str, max_depth: usize) -> CompileResult<AstNode> {
  let mut parser = ExprParser {
    tokens: Lexer::new(source),
    source,
    max_depth,
  };
  let (ast, _) = parser.parse_until(TokenKind::Eof, 0)?;
  Ok(ast)
}

/// Operand on the stack, paired with the depth of its tree.
type Operand = (AstNode, usize);

struct ExprParser<'a> {
  tokens: Lexer<'a>,
  source: &'a str,
  max_depth: usize,
}

impl ExprParser<'_> {
  fn next_token(&mut self) -> CompileResult<Token> {
    match self.tokens.next() {
      Some(token) => token,
      None => Err(CompileError::parse_at(
        self.source,
        self.source.len(),
        "unexpected end of input",
      )),
    }
  }

  /// Consume tokens up to and including `waitfor`, returning the single
  /// expression they form.
  fn parse_until(&mut self, waitfor: TokenKind, nesting: usize) -> CompileResult<Operand> {
    let mut operands: Vec<Operand> = Vec::new();
    let mut operators: Vec<(Operator, usize)> = Vec::new();
    let mut last_was_op = true;

    loop {
      let token = self.next_token()?;

      if token.kind == waitfor {
        if last_was_op {
          return Err(match operators.last() {
            Some(&(op, loc)) => {
              CompileError::parse_at(self.source, loc, format!("'{op}' is missing an operand"))
            }
            None => CompileError::parse_at(self.source, token.loc, "expected an expression"),
          });
        }
        while let Some((op, loc)) = operators.pop() {
          self.apply(op, loc, &mut operands)?;
        }
        return match operands.len() {
          1 => Ok(operands.remove(0)),
          n => Err(CompileError::parse_at(
            self.source,
            token.loc,
            format!("expected one expression, found {n}"),
          )),
        };
      }

      match token.kind {
        TokenKind::Eof => {
          return Err(CompileError::parse_at(
            self.source,
            token.loc,
            "expected \")\", but got \"EOF\"",
          ));
        }
        TokenKind::RParen => {
          return Err(CompileError::parse_at(self.source, token.loc, "unmatched ')'"));
        }
        TokenKind::Punctuator => {
          let op = self.operator_for(&token, last_was_op)?;
          if !op.is_unary() {
            while let Some(&(top, loc)) = operators.last() {
              if !top.binds_before(op) {
                break;
              }
              operators.pop();
              self.apply(top, loc, &mut operands)?;
            }
          }
          operators.push((op, token.loc));
          last_was_op = true;
        }
        TokenKind::LParen => {
          self.expect_operand_position(&token, last_was_op)?;
          if nesting + 1 > self.max_depth {
            return Err(CompileError::parse_at(
              self.source,
              token.loc,
              format!("parentheses nest deeper than {}", self.max_depth),
            ));
          }
          operands.push(self.parse_until(TokenKind::RParen, nesting + 1)?);
          last_was_op = false;
        }
        TokenKind::Num | TokenKind::Ident => {
          self.expect_operand_position(&token, last_was_op)?;
          let leaf = match token.value {
            Some(value) => AstNode::number(value),
            None => AstNode::var(token.text),
          };
          operands.push((leaf, 1));
          last_was_op = false;
        }
      }
    }
  }

  /// Resolve an operator symbol by position: where an operand is expected
  /// only prefix operators are allowed.
  fn operator_for(&self, token: &Token, last_was_op: bool) -> CompileResult<Operator> {
    let found = if last_was_op {
      Operator::prefix(&token.text)
    } else {
      Operator::infix(&token.text)
    };
    found.ok_or_else(|| {
      let text = describe_token(Some(token), self.source);
      let message = match (Operator::prefix(&token.text), Operator::infix(&token.text)) {
        (None, None) => format!("unsupported operator \"{text}\""),
        (Some(_), None) => format!("expected an operator before \"{text}\""),
        _ => format!("expected an operand before \"{text}\""),
      };
      CompileError::parse_at(self.source, token.loc, message)
    })
  }

  fn expect_operand_position(&self, token: &Token, last_was_op: bool) -> CompileResult<()> {
    if last_was_op {
      return Ok(());
    }
    let got = describe_token(Some(token), self.source);
    Err(CompileError::parse_at(
      self.source,
      token.loc,
      format!("expected an operator, but got \"{got}\""),
    ))
  }

  /// Pop the operator's operands and push the combined node.
  fn apply(&self, op: Operator, loc: usize, operands: &mut Vec<Operand>) -> CompileResult<()> {
    let missing = || CompileError::parse_at(self.source, loc, format!("'{op}' is missing an operand"));
    if operands.len() < op.arity() {
      return Err(missing());
    }
    let mut args = operands.split_off(operands.len() - op.arity()).into_iter();
    let (node, depth) = match (args.next(), args.next()) {
      (Some((operand, depth)), None) => (AstNode::unary(op, operand), depth + 1),
      (Some((lhs, lhs_depth)), Some((rhs, rhs_depth))) => {
        (AstNode::binary(op, lhs, rhs), lhs_depth.max(rhs_depth) + 1)
      }
      _ => return Err(missing()),
    };
    if depth > self.max_depth {
      return Err(CompileError::parse_at(
        self.source,
        loc,
        format!("expression nests deeper than {}", self.max_depth),
      ));
    }
    operands.push((node, depth));
    Ok(())
  }
}
