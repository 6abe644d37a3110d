//! Value types of compiled function parameters.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
  F64,
  I64,
  Ptr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
  pub kind: TypeKind,
  pub base: Option<Box<Type>>,
}

impl Type {
  pub fn f64() -> Self {
    Self {
      kind: TypeKind::F64,
      base: None,
    }
  }

  pub fn i64() -> Self {
    Self {
      kind: TypeKind::I64,
      base: None,
    }
  }

  pub fn pointer_to(base: Type) -> Self {
    Self {
      kind: TypeKind::Ptr,
      base: Some(Box::new(base)),
    }
  }

  pub fn is_float(&self) -> bool {
    matches!(self.kind, TypeKind::F64)
  }

  /// Integers and pointers both live in integer registers.
  pub fn is_integer(&self) -> bool {
    matches!(self.kind, TypeKind::I64 | TypeKind::Ptr)
  }

  pub fn is_pointer(&self) -> bool {
    matches!(self.kind, TypeKind::Ptr)
  }

  pub fn base(&self) -> Option<&Type> {
    self.base.as_deref()
  }

  pub fn size(&self) -> i64 {
    match self.kind {
      TypeKind::F64 => 8,
      TypeKind::I64 => 8,
      TypeKind::Ptr => 8,
    }
  }
}

impl fmt::Display for Type {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.kind, self.base()) {
      (TypeKind::F64, _) => f.write_str("f64"),
      (TypeKind::I64, _) => f.write_str("i64"),
      (TypeKind::Ptr, Some(base)) => write!(f, "*const {base}"),
      (TypeKind::Ptr, None) => f.write_str("*const u8"),
    }
  }
}

pub fn pointer_to(base: Type) -> Type {
  Type::pointer_to(base)
}
