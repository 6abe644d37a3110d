//! Native backend: encode an instruction stream for the host CPU with
//! Cranelift and load it into executable memory.
//!
//! Virtual registers become Cranelift variables and labels become blocks.
//! Every branch splits the current block so the fall-through path gets a
//! block of its own. Each finalized function owns its `JITModule`, and the
//! memory is released when the [`NativeCode`] is dropped.

use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};
use tracing::debug;

use super::{Arg, Backend, BackendError, Executable};
use crate::asm::{self, Cond, FReg, FSrc, FloatOp, GReg, Inst, Label, Reg};
use crate::ty::{Type, TypeKind};

/// Scalar functions with more `f64` arguments than this are entered through
/// a single pointer to the packed arguments instead.
pub const MAX_SCALAR_PARAMS: usize = 8;

macro_rules! call_scalar {
  ($code:expr, $args:expr, []) => {{
    let f: extern "C" fn() -> f64 = std::mem::transmute($code);
    f()
  }};
  ($code:expr, $args:expr, [$($idx:tt),+]) => {{
    let f: extern "C" fn($(call_scalar!(@ty $idx)),+) -> f64 = std::mem::transmute($code);
    f($($args[$idx]),+)
  }};
  (@ty $idx:tt) => { f64 };
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Native;

impl Native {
  fn module() -> Result<JITModule, BackendError> {
    let mut flags = settings::builder();
    flags
      .set("opt_level", "speed")
      .map_err(|e| BackendError::Host {
        message: format!("settings error: {e}"),
      })?;
    let isa = cranelift_native::builder()
      .map_err(|message| BackendError::Host {
        message: message.to_string(),
      })?
      .finish(settings::Flags::new(flags))
      .map_err(|e| BackendError::Host {
        message: e.to_string(),
      })?;
    if isa.pointer_type() != types::I64 {
      return Err(BackendError::Host {
        message: format!("{}-bit pointers are not supported", isa.pointer_bits()),
      });
    }
    let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    Ok(JITModule::new(builder))
  }
}

impl Backend for Native {
  fn name(&self) -> &'static str {
    "native"
  }

  fn finalize(&self, function: &asm::Function) -> Result<Box<dyn Executable>, BackendError> {
    let shape = Shape::of(function.params())?;
    let mut module = Self::module()?;
    let encoding = |message: String| BackendError::Encoding {
      function: function.name().to_string(),
      message,
    };

    let mut sig = module.make_signature();
    match shape {
      Shape::Packed(_) => sig.params.push(AbiParam::new(types::I64)),
      _ => {
        for param in function.params() {
          sig.params.push(AbiParam::new(clif_type(param)));
        }
      }
    }
    sig.returns.push(AbiParam::new(types::F64));
    let func_id = module
      .declare_function(function.name(), Linkage::Local, &sig)
      .map_err(|e| encoding(e.to_string()))?;

    let mut ctx = module.make_context();
    ctx.func.signature = sig;
    let mut fb_ctx = FunctionBuilderContext::new();
    {
      let mut builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
      translate(function, shape, &mut builder)?;
      builder.finalize();
    }

    module
      .define_function(func_id, &mut ctx)
      .map_err(|e| encoding(e.to_string()))?;
    module.clear_context(&mut ctx);
    module.finalize_definitions().map_err(|e| encoding(e.to_string()))?;

    let code = module.get_finalized_function(func_id);
    debug!(function = function.name(), ?code, "encoded native function");
    Ok(Box::new(NativeCode {
      code,
      shape,
      module: Some(module),
    }))
  }
}

/// The call shapes the native backend knows how to invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
  /// `fn(f64, ..) -> f64` with this many parameters.
  Scalar(usize),
  /// `fn(*const f64) -> f64`, reading this many parameters from the array.
  Packed(usize),
  /// `fn(f64, i64, *const f64) -> f64`.
  Reduction,
}

impl Shape {
  fn of(params: &[Type]) -> Result<Self, BackendError> {
    if params.iter().all(Type::is_float) {
      if params.len() > MAX_SCALAR_PARAMS {
        return Ok(Shape::Packed(params.len()));
      }
      return Ok(Shape::Scalar(params.len()));
    }
    match params {
      [init, count, data]
        if init.is_float()
          && count.kind == TypeKind::I64
          && data.is_pointer()
          && data.base().is_some_and(Type::is_float) =>
      {
        Ok(Shape::Reduction)
      }
      _ => Err(unsupported(params, "no native call shape matches")),
    }
  }
}

fn unsupported(params: &[Type], message: impl Into<String>) -> BackendError {
  let signature: Vec<String> = params.iter().map(Type::to_string).collect();
  BackendError::UnsupportedSignature {
    signature: signature.join(", "),
    message: message.into(),
  }
}

fn clif_type(ty: &Type) -> types::Type {
  match ty.kind {
    TypeKind::F64 => types::F64,
    TypeKind::I64 | TypeKind::Ptr => types::I64,
  }
}

fn int_cc(cond: Cond) -> IntCC {
  match cond {
    Cond::Eq => IntCC::Equal,
    Cond::Ne => IntCC::NotEqual,
    Cond::Lt => IntCC::SignedLessThan,
    Cond::Le => IntCC::SignedLessThanOrEqual,
    Cond::Gt => IntCC::SignedGreaterThan,
    Cond::Ge => IntCC::SignedGreaterThanOrEqual,
  }
}

struct Translator<'a, 'b> {
  builder: &'b mut FunctionBuilder<'a>,
  fregs: u32,
  blocks: Vec<Block>,
  params: Vec<Value>,
}

impl Translator<'_, '_> {
  fn freg(&self, reg: FReg) -> Variable {
    Variable::from_u32(reg.index() as u32)
  }

  fn greg(&self, reg: GReg) -> Variable {
    Variable::from_u32(self.fregs + reg.index() as u32)
  }

  fn block(&self, label: Label) -> Result<Block, BackendError> {
    self
      .blocks
      .get(label.index())
      .copied()
      .ok_or_else(|| BackendError::malformed(format!("unknown label {label}")))
  }

  fn read(&mut self, src: FSrc) -> Value {
    match src {
      FSrc::Reg(reg) => {
        let var = self.freg(reg);
        self.builder.use_var(var)
      }
      FSrc::Mem(addr) => {
        let var = self.greg(addr);
        let addr = self.builder.use_var(var);
        self.builder.ins().load(types::F64, MemFlags::new(), addr, 0)
      }
    }
  }

  fn set_f(&mut self, reg: FReg, value: Value) {
    let var = self.freg(reg);
    self.builder.def_var(var, value);
  }

  fn get_f(&mut self, reg: FReg) -> Value {
    let var = self.freg(reg);
    self.builder.use_var(var)
  }

  fn set_g(&mut self, reg: GReg, value: Value) {
    let var = self.greg(reg);
    self.builder.def_var(var, value);
  }

  fn get_g(&mut self, reg: GReg) -> Value {
    let var = self.greg(reg);
    self.builder.use_var(var)
  }

  /// Emit one non-label instruction. Returns `false` when it ends the block.
  fn emit(&mut self, inst: Inst) -> Result<bool, BackendError> {
    match inst {
      Inst::LoadArg { dst, index } => {
        let value = self
          .params
          .get(index)
          .copied()
          .ok_or_else(|| BackendError::malformed(format!("no parameter #{index}")))?;
        match dst {
          Reg::F(dst) => self.set_f(dst, value),
          Reg::G(dst) => self.set_g(dst, value),
        }
      }
      Inst::LoadConst { dst, bits } => {
        let value = self.builder.ins().f64const(Ieee64::with_bits(bits));
        self.set_f(dst, value);
      }
      Inst::MovF { dst, src } => {
        let value = self.read(src);
        self.set_f(dst, value);
      }
      Inst::Arith { op, dst, src } => {
        let lhs = self.get_f(dst);
        let rhs = self.read(src);
        let ins = self.builder.ins();
        let value = match op {
          FloatOp::Add => ins.fadd(lhs, rhs),
          FloatOp::Sub => ins.fsub(lhs, rhs),
          FloatOp::Mul => ins.fmul(lhs, rhs),
          FloatOp::Div => ins.fdiv(lhs, rhs),
        };
        self.set_f(dst, value);
      }
      Inst::Xor { dst, src } => {
        let lhs = self.get_f(dst);
        let rhs = self.get_f(src);
        let lhs = self.builder.ins().bitcast(types::I64, MemFlags::new(), lhs);
        let rhs = self.builder.ins().bitcast(types::I64, MemFlags::new(), rhs);
        let bits = self.builder.ins().bxor(lhs, rhs);
        let value = self.builder.ins().bitcast(types::F64, MemFlags::new(), bits);
        self.set_f(dst, value);
      }
      Inst::Sqrt { dst, src } => {
        let x = self.get_f(src);
        let value = self.builder.ins().sqrt(x);
        self.set_f(dst, value);
      }
      Inst::CvtToInt { dst, src } => {
        let x = self.get_f(src);
        let value = self.builder.ins().fcvt_to_sint_sat(types::I64, x);
        self.set_g(dst, value);
      }
      Inst::AddImm { dst, imm } => {
        let x = self.get_g(dst);
        let value = self.builder.ins().iadd_imm(x, imm);
        self.set_g(dst, value);
      }
      Inst::AndImm { dst, src, imm } => {
        let x = self.get_g(src);
        let value = self.builder.ins().band_imm(x, imm);
        self.set_g(dst, value);
      }
      Inst::ShrImm { dst, amount } => {
        let x = self.get_g(dst);
        let value = self.builder.ins().ushr_imm(x, i64::from(amount));
        self.set_g(dst, value);
      }
      Inst::Branch {
        cond,
        lhs,
        imm,
        target,
      } => {
        let target = self.block(target)?;
        let x = self.get_g(lhs);
        let taken = self.builder.ins().icmp_imm(int_cc(cond), x, imm);
        let next = self.builder.create_block();
        self.builder.ins().brif(taken, target, &[], next, &[]);
        self.builder.switch_to_block(next);
      }
      Inst::Jump { target } => {
        let target = self.block(target)?;
        self.builder.ins().jump(target, &[]);
        return Ok(false);
      }
      Inst::Ret { src } => {
        let value = self.get_f(src);
        self.builder.ins().return_(&[value]);
        return Ok(false);
      }
      Inst::Bind { .. } => {
        return Err(BackendError::malformed("label binding reached the emitter"));
      }
    }
    Ok(true)
  }
}

fn translate(
  function: &asm::Function,
  shape: Shape,
  builder: &mut FunctionBuilder<'_>,
) -> Result<(), BackendError> {
  let entry = builder.create_block();
  builder.append_block_params_for_function_params(entry);
  builder.switch_to_block(entry);
  let mut params = builder.block_params(entry).to_vec();
  let packed = match (shape, params.first()) {
    (Shape::Packed(n), Some(&args)) => Some((n, args)),
    _ => None,
  };
  if let Some((n, args)) = packed {
    let stride = Type::f64().size() as i32;
    params = (0..n as i32)
      .map(|index| {
        builder
          .ins()
          .load(types::F64, MemFlags::trusted(), args, index * stride)
      })
      .collect();
  }
  let blocks = (0..function.label_count())
    .map(|_| builder.create_block())
    .collect();

  // Registers start out zeroed, as in the interpreter.
  let fregs = function.freg_count() as u32;
  for index in 0..fregs {
    let var = Variable::from_u32(index);
    builder.declare_var(var, types::F64);
    let zero = builder.ins().f64const(0.0);
    builder.def_var(var, zero);
  }
  for index in 0..function.greg_count() as u32 {
    let var = Variable::from_u32(fregs + index);
    builder.declare_var(var, types::I64);
    let zero = builder.ins().iconst(types::I64, 0);
    builder.def_var(var, zero);
  }

  let mut t = Translator {
    builder,
    fregs,
    blocks,
    params,
  };
  // `open` is false between an unconditional transfer and the next label;
  // anything emitted there is unreachable and skipped.
  let mut open = true;
  for inst in function.insts() {
    if let Inst::Bind { label } = *inst {
      let block = t.block(label)?;
      if open {
        t.builder.ins().jump(block, &[]);
      }
      t.builder.switch_to_block(block);
      open = true;
    } else if open {
      open = t.emit(*inst)?;
    }
  }
  if open {
    return Err(BackendError::malformed(format!(
      "{} falls off the end",
      function.name()
    )));
  }

  t.builder.seal_all_blocks();
  Ok(())
}

/// A function in executable memory, together with the module that owns it.
pub struct NativeCode {
  code: *const u8,
  shape: Shape,
  module: Option<JITModule>,
}

// SAFETY: the code pointer refers to immutable, finalized machine code that
// is only freed in `drop`, and the module is never touched before then.
unsafe impl Send for NativeCode {}
unsafe impl Sync for NativeCode {}

impl Executable for NativeCode {
  unsafe fn call(&self, args: &[Arg]) -> f64 {
    let arg = |index: usize| args.get(index).copied().unwrap_or(Arg::F64(f64::NAN));
    unsafe {
      match self.shape {
        Shape::Reduction => {
          let f: extern "C" fn(f64, i64, *const f64) -> f64 = std::mem::transmute(self.code);
          f(arg(0).as_f64(), arg(1).as_i64(), arg(2).as_ptr())
        }
        Shape::Scalar(n) => {
          let a: Vec<f64> = (0..n).map(|i| arg(i).as_f64()).collect();
          match n {
            0 => call_scalar!(self.code, a, []),
            1 => call_scalar!(self.code, a, [0]),
            2 => call_scalar!(self.code, a, [0, 1]),
            3 => call_scalar!(self.code, a, [0, 1, 2]),
            4 => call_scalar!(self.code, a, [0, 1, 2, 3]),
            5 => call_scalar!(self.code, a, [0, 1, 2, 3, 4]),
            6 => call_scalar!(self.code, a, [0, 1, 2, 3, 4, 5]),
            7 => call_scalar!(self.code, a, [0, 1, 2, 3, 4, 5, 6]),
            8 => call_scalar!(self.code, a, [0, 1, 2, 3, 4, 5, 6, 7]),
            _ => f64::NAN,
          }
        }
        Shape::Packed(n) => {
          let a: Vec<f64> = (0..n).map(|i| arg(i).as_f64()).collect();
          let f: extern "C" fn(*const f64) -> f64 = std::mem::transmute(self.code);
          f(a.as_ptr())
        }
      }
    }
  }
}

impl Drop for NativeCode {
  fn drop(&mut self) {
    if let Some(module) = self.module.take() {
      // SAFETY: `code` dies with `self`; no caller can reach it afterwards.
      unsafe { module.free_memory() };
    }
  }
}

#[cfg(all(test, any(target_arch = "x86_64", target_arch = "aarch64")))]
mod tests {
  use super::*;
  use crate::backend::interp::Interpreter;
  use crate::ty::pointer_to;

  fn both(function: &asm::Function, args: &[Arg]) -> (f64, f64) {
    let native = Native.finalize(function).unwrap();
    let interp = Interpreter.finalize(function).unwrap();
    unsafe { (native.call(args), interp.call(args)) }
  }

  #[test]
  fn matches_the_interpreter_on_a_loop() {
    let mut func = asm::Function::new(
      "sum",
      vec![Type::f64(), Type::i64(), pointer_to(Type::f64())],
    );
    let acc = func.freg();
    let cnt = func.greg();
    let ptr = func.greg();
    let top = func.label();
    let end = func.label();
    func.load_argument(acc, 0).unwrap();
    func.load_argument(cnt, 1).unwrap();
    func.load_argument(ptr, 2).unwrap();
    func.emit(Inst::Branch {
      cond: Cond::Le,
      lhs: cnt,
      imm: 0,
      target: end,
    });
    func.bind(top);
    func.arith(FloatOp::Mul, acc, FSrc::Mem(ptr));
    func.emit(Inst::AddImm { dst: ptr, imm: 8 });
    func.emit(Inst::AddImm { dst: cnt, imm: -1 });
    func.emit(Inst::Branch {
      cond: Cond::Gt,
      lhs: cnt,
      imm: 0,
      target: top,
    });
    func.bind(end);
    func.ret(acc);
    let func = func.finish().unwrap();

    let data = [2.0, 3.0, 4.0];
    let (native, interp) = both(
      &func,
      &[Arg::F64(1.0), Arg::I64(3), Arg::Ptr(data.as_ptr())],
    );
    assert_eq!(native, 24.0);
    assert_eq!(native.to_bits(), interp.to_bits());
  }

  #[test]
  fn sign_flip_and_square_root() {
    let mut func = asm::Function::new("f", vec![Type::f64()]);
    let x = func.freg();
    let mask = func.freg();
    func.load_argument(x, 0).unwrap();
    func.emit(Inst::Sqrt { dst: x, src: x });
    func.load_const(mask, -0.0);
    func.emit(Inst::Xor { dst: x, src: mask });
    func.ret(x);
    let func = func.finish().unwrap();
    assert_eq!(both(&func, &[Arg::F64(16.0)]), (-4.0, -4.0));
  }

  #[test]
  fn wide_scalar_signatures_read_packed_arguments() {
    let n = MAX_SCALAR_PARAMS + 3;
    let mut func = asm::Function::new("wide", vec![Type::f64(); n]);
    let acc = func.freg();
    let next = func.freg();
    func.load_argument(acc, 0).unwrap();
    for index in 1..n {
      func.load_argument(next, index).unwrap();
      func.arith(FloatOp::Sub, acc, FSrc::Reg(next));
    }
    func.ret(acc);
    let func = func.finish().unwrap();

    let args: Vec<Arg> = (1..=n).map(|i| Arg::F64(i as f64)).collect();
    let (native, interp) = both(&func, &args);
    // 1 - 2 - 3 - ... - 11
    assert_eq!(native, 1.0 - (2..=11).sum::<i32>() as f64);
    assert_eq!(native.to_bits(), interp.to_bits());
  }

  #[test]
  fn rejects_unknown_call_shapes() {
    let func = asm::Function::new("mixed", vec![Type::i64(), Type::f64()]);
    let err = Native.finalize(&func).err().unwrap();
    assert!(matches!(err, BackendError::UnsupportedSignature { .. }), "{err}");
  }
}
