//! Software register machine.
//!
//! Executes an instruction stream directly, one [`Inst`] at a time. Used on
//! hosts without a native code generator and as a cross-check for the
//! native backend: every instruction has exactly the IEEE-754 semantics the
//! encoded machine instruction has.

use std::collections::HashMap;

use tracing::trace;

use super::{Arg, Backend, BackendError, Executable};
use crate::asm::{FSrc, Function, Inst, Reg};

#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter;

impl Backend for Interpreter {
  fn name(&self) -> &'static str {
    "interp"
  }

  fn finalize(&self, function: &Function) -> Result<Box<dyn Executable>, BackendError> {
    Ok(Box::new(Program::load(function)?))
  }
}

/// A function resolved for direct execution: labels replaced by program
/// counters.
#[derive(Debug, Clone)]
pub struct Program {
  name: String,
  insts: Vec<Inst>,
  targets: Vec<usize>,
  fregs: usize,
  gregs: usize,
  params: usize,
}

impl Program {
  pub fn load(function: &Function) -> Result<Self, BackendError> {
    let mut by_label = HashMap::new();
    for (pc, inst) in function.insts().iter().enumerate() {
      if let Inst::Bind { label } = inst {
        by_label.insert(label.index(), pc);
      }
    }
    let mut targets = vec![usize::MAX; function.label_count()];
    for (label, pc) in by_label {
      match targets.get_mut(label) {
        Some(slot) => *slot = pc,
        None => return Err(BackendError::malformed(format!("label .L{label} out of range"))),
      }
    }

    trace!(
      function = function.name(),
      insts = function.insts().len(),
      "loaded program"
    );
    Ok(Self {
      name: function.name().to_string(),
      insts: function.insts().to_vec(),
      targets,
      fregs: function.freg_count(),
      gregs: function.greg_count(),
      params: function.params().len(),
    })
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// # Safety
  ///
  /// See [`Executable::call`].
  unsafe fn run(&self, args: &[Arg]) -> f64 {
    let mut f = vec![0.0f64; self.fregs];
    let mut g = vec![0i64; self.gregs];
    let mut pc = 0;

    while let Some(inst) = self.insts.get(pc) {
      pc += 1;
      match *inst {
        Inst::LoadArg { dst, index } => {
          let arg = args.get(index).copied().unwrap_or(Arg::F64(f64::NAN));
          match dst {
            Reg::F(dst) => f[dst.index()] = arg.as_f64(),
            Reg::G(dst) => g[dst.index()] = arg.as_i64(),
          }
        }
        Inst::LoadConst { dst, bits } => f[dst.index()] = f64::from_bits(bits),
        Inst::MovF { dst, src } => f[dst.index()] = unsafe { read(&f, &g, src) },
        Inst::Arith { op, dst, src } => {
          let rhs = unsafe { read(&f, &g, src) };
          f[dst.index()] = op.apply(f[dst.index()], rhs);
        }
        Inst::Xor { dst, src } => {
          let bits = f[dst.index()].to_bits() ^ f[src.index()].to_bits();
          f[dst.index()] = f64::from_bits(bits);
        }
        Inst::Sqrt { dst, src } => f[dst.index()] = f[src.index()].sqrt(),
        // `as` saturates and maps NaN to zero.
        Inst::CvtToInt { dst, src } => g[dst.index()] = f[src.index()] as i64,
        Inst::AddImm { dst, imm } => g[dst.index()] = g[dst.index()].wrapping_add(imm),
        Inst::AndImm { dst, src, imm } => g[dst.index()] = g[src.index()] & imm,
        Inst::ShrImm { dst, amount } => {
          g[dst.index()] = ((g[dst.index()] as u64) >> amount) as i64;
        }
        Inst::Branch {
          cond,
          lhs,
          imm,
          target,
        } => {
          if cond.holds(g[lhs.index()], imm) {
            pc = self.targets[target.index()];
          }
        }
        Inst::Jump { target } => pc = self.targets[target.index()],
        Inst::Bind { .. } => {}
        Inst::Ret { src } => return f[src.index()],
      }
    }
    f64::NAN
  }
}

/// # Safety
///
/// A `Mem` operand must hold the address of a readable `f64`.
unsafe fn read(f: &[f64], g: &[i64], src: FSrc) -> f64 {
  match src {
    FSrc::Reg(reg) => f[reg.index()],
    FSrc::Mem(addr) => unsafe { std::ptr::read(g[addr.index()] as usize as *const f64) },
  }
}

impl Executable for Program {
  unsafe fn call(&self, args: &[Arg]) -> f64 {
    debug_assert_eq!(args.len(), self.params, "argument count for {}", self.name);
    unsafe { self.run(args) }
  }
}
