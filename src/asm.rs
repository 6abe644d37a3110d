//! Backend-neutral instruction stream and function scaffold.
//!
//! The code generator never talks to a concrete encoder. It allocates
//! virtual float (`%f`) and integer (`%r`) registers, emits two-address
//! instructions in the spirit of scalar SSE code, and places labels; a
//! [`Backend`](crate::backend::Backend) then turns the finished [`Function`]
//! into something callable.

use std::collections::HashSet;
use std::fmt;

use crate::backend::BackendError;
use crate::ty::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FReg(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GReg(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label(u32);

impl FReg {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl GReg {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

impl Label {
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// Destination of a parameter load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reg {
  F(FReg),
  G(GReg),
}

impl From<FReg> for Reg {
  fn from(reg: FReg) -> Self {
    Reg::F(reg)
  }
}

impl From<GReg> for Reg {
  fn from(reg: GReg) -> Self {
    Reg::G(reg)
  }
}

/// Float source operand: a register, or the `f64` at the address held in an
/// integer register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FSrc {
  Reg(FReg),
  Mem(GReg),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatOp {
  Add,
  Sub,
  Mul,
  Div,
}

impl FloatOp {
  pub fn apply(self, a: f64, b: f64) -> f64 {
    match self {
      FloatOp::Add => a + b,
      FloatOp::Sub => a - b,
      FloatOp::Mul => a * b,
      FloatOp::Div => a / b,
    }
  }

  fn mnemonic(self) -> &'static str {
    match self {
      FloatOp::Add => "addsd",
      FloatOp::Sub => "subsd",
      FloatOp::Mul => "mulsd",
      FloatOp::Div => "divsd",
    }
  }
}

/// Signed comparison against an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
}

impl Cond {
  pub fn holds(self, lhs: i64, rhs: i64) -> bool {
    match self {
      Cond::Eq => lhs == rhs,
      Cond::Ne => lhs != rhs,
      Cond::Lt => lhs < rhs,
      Cond::Le => lhs <= rhs,
      Cond::Gt => lhs > rhs,
      Cond::Ge => lhs >= rhs,
    }
  }

  fn suffix(self) -> &'static str {
    match self {
      Cond::Eq => "e",
      Cond::Ne => "ne",
      Cond::Lt => "l",
      Cond::Le => "le",
      Cond::Gt => "g",
      Cond::Ge => "ge",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Inst {
  /// Copy parameter `index` into a register of the matching class.
  LoadArg { dst: Reg, index: usize },
  /// Load a raw IEEE-754 bit pattern.
  LoadConst { dst: FReg, bits: u64 },
  MovF { dst: FReg, src: FSrc },
  /// `dst = dst <op> src`.
  Arith { op: FloatOp, dst: FReg, src: FSrc },
  /// Bitwise xor of the two `f64` bit patterns.
  Xor { dst: FReg, src: FReg },
  Sqrt { dst: FReg, src: FReg },
  /// Truncating, saturating `f64 -> i64` conversion; NaN gives 0.
  CvtToInt { dst: GReg, src: FReg },
  AddImm { dst: GReg, imm: i64 },
  AndImm { dst: GReg, src: GReg, imm: i64 },
  /// Logical shift right.
  ShrImm { dst: GReg, amount: u32 },
  /// Jump to `target` when `lhs <cond> imm`, otherwise fall through.
  Branch {
    cond: Cond,
    lhs: GReg,
    imm: i64,
    target: Label,
  },
  Jump { target: Label },
  Bind { label: Label },
  Ret { src: FReg },
}

impl Inst {
  fn branch_target(&self) -> Option<Label> {
    match self {
      Inst::Branch { target, .. } | Inst::Jump { target } => Some(*target),
      _ => None,
    }
  }
}

impl fmt::Display for FReg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "%f{}", self.0)
  }
}

impl fmt::Display for GReg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "%r{}", self.0)
  }
}

impl fmt::Display for Label {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, ".L{}", self.0)
  }
}

impl fmt::Display for Reg {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Reg::F(reg) => write!(f, "{reg}"),
      Reg::G(reg) => write!(f, "{reg}"),
    }
  }
}

impl fmt::Display for FSrc {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      FSrc::Reg(reg) => write!(f, "{reg}"),
      FSrc::Mem(addr) => write!(f, "[{addr}]"),
    }
  }
}

impl fmt::Display for Inst {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Inst::LoadArg { dst, index } => write!(f, "    load.arg {dst}, #{index}"),
      Inst::LoadConst { dst, bits } => {
        write!(f, "    movsd {dst}, 0x{bits:016x} ; {}", f64::from_bits(*bits))
      }
      Inst::MovF { dst, src } => write!(f, "    movsd {dst}, {src}"),
      Inst::Arith { op, dst, src } => write!(f, "    {} {dst}, {src}", op.mnemonic()),
      Inst::Xor { dst, src } => write!(f, "    xorpd {dst}, {src}"),
      Inst::Sqrt { dst, src } => write!(f, "    sqrtsd {dst}, {src}"),
      Inst::CvtToInt { dst, src } => write!(f, "    cvt.sat {dst}, {src}"),
      Inst::AddImm { dst, imm } => write!(f, "    add {dst}, {imm}"),
      Inst::AndImm { dst, src, imm } => write!(f, "    and {dst}, {src}, {imm}"),
      Inst::ShrImm { dst, amount } => write!(f, "    shr {dst}, {amount}"),
      Inst::Branch {
        cond,
        lhs,
        imm,
        target,
      } => write!(f, "    cmp {lhs}, {imm}\n    j{} {target}", cond.suffix()),
      Inst::Jump { target } => write!(f, "    jmp {target}"),
      Inst::Bind { label } => write!(f, "{label}:"),
      Inst::Ret { src } => write!(f, "    ret {src}"),
    }
  }
}

/// A function under construction: typed parameters, an `f64` result and a
/// flat instruction stream with labels.
#[derive(Debug, Clone)]
pub struct Function {
  name: String,
  params: Vec<Type>,
  insts: Vec<Inst>,
  fregs: u32,
  gregs: u32,
  labels: u32,
  free_fregs: Vec<FReg>,
  free_gregs: Vec<GReg>,
}

impl Function {
  pub fn new(name: impl Into<String>, params: Vec<Type>) -> Self {
    Self {
      name: name.into(),
      params,
      insts: Vec::new(),
      fregs: 0,
      gregs: 0,
      labels: 0,
      free_fregs: Vec::new(),
      free_gregs: Vec::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn params(&self) -> &[Type] {
    &self.params
  }

  pub fn insts(&self) -> &[Inst] {
    &self.insts
  }

  pub fn freg_count(&self) -> usize {
    self.fregs as usize
  }

  pub fn greg_count(&self) -> usize {
    self.gregs as usize
  }

  pub fn label_count(&self) -> usize {
    self.labels as usize
  }

  /// A float register, reusing a released one when possible.
  pub fn freg(&mut self) -> FReg {
    self.free_fregs.pop().unwrap_or_else(|| {
      self.fregs += 1;
      FReg(self.fregs - 1)
    })
  }

  pub fn greg(&mut self) -> GReg {
    self.free_gregs.pop().unwrap_or_else(|| {
      self.gregs += 1;
      GReg(self.gregs - 1)
    })
  }

  /// Hand a dead register back for reuse.
  pub fn release_freg(&mut self, reg: FReg) {
    if !self.free_fregs.contains(&reg) {
      self.free_fregs.push(reg);
    }
  }

  pub fn release_greg(&mut self, reg: GReg) {
    if !self.free_gregs.contains(&reg) {
      self.free_gregs.push(reg);
    }
  }

  pub fn label(&mut self) -> Label {
    self.labels += 1;
    Label(self.labels - 1)
  }

  pub fn emit(&mut self, inst: Inst) {
    self.insts.push(inst);
  }

  pub fn bind(&mut self, label: Label) {
    self.emit(Inst::Bind { label });
  }

  pub fn load_const(&mut self, dst: FReg, value: f64) {
    self.emit(Inst::LoadConst {
      dst,
      bits: value.to_bits(),
    });
  }

  pub fn arith(&mut self, op: FloatOp, dst: FReg, src: impl Into<FSrc>) {
    self.emit(Inst::Arith {
      op,
      dst,
      src: src.into(),
    });
  }

  /// Load parameter `index` into `dst`; the register class must match the
  /// declared parameter type.
  pub fn load_argument(&mut self, dst: impl Into<Reg>, index: usize) -> Result<(), BackendError> {
    let dst = dst.into();
    let Some(param) = self.params.get(index) else {
      return Err(BackendError::malformed(format!(
        "{} has no parameter #{index}",
        self.name
      )));
    };
    let fits = match dst {
      Reg::F(_) => param.is_float(),
      Reg::G(_) => param.is_integer(),
    };
    if !fits {
      return Err(BackendError::malformed(format!(
        "parameter #{index} of type {param} cannot be loaded into {dst}"
      )));
    }
    self.emit(Inst::LoadArg { dst, index });
    Ok(())
  }

  pub fn ret(&mut self, src: FReg) {
    self.emit(Inst::Ret { src });
  }

  /// Check the stream is complete: every label bound exactly once, every
  /// branch target bound, and control never runs off the end.
  pub fn finish(self) -> Result<Function, BackendError> {
    let mut bound = HashSet::new();
    for inst in &self.insts {
      if let Inst::Bind { label } = inst {
        if !bound.insert(*label) {
          return Err(BackendError::malformed(format!("label {label} bound twice")));
        }
      }
    }
    for inst in &self.insts {
      if let Some(target) = inst.branch_target() {
        if !bound.contains(&target) {
          return Err(BackendError::malformed(format!("label {target} is never bound")));
        }
      }
    }
    match self.insts.last() {
      Some(Inst::Ret { .. } | Inst::Jump { .. }) => Ok(self),
      _ => Err(BackendError::malformed(format!(
        "{} does not end with a return",
        self.name
      ))),
    }
  }
}

impl From<FReg> for FSrc {
  fn from(reg: FReg) -> Self {
    FSrc::Reg(reg)
  }
}

/// Assembly-style listing, one instruction per line.
impl fmt::Display for Function {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let params: Vec<String> = self.params.iter().map(Type::to_string).collect();
    writeln!(f, "{}({}) -> f64:", self.name, params.join(", "))?;
    for inst in &self.insts {
      writeln!(f, "{inst}")?;
    }
    Ok(())
  }
}
