#![allow(dead_code)]

use arithjit::Compiler;

/// Every backend usable on this host, interpreter first.
pub fn compilers() -> Vec<Compiler> {
  let mut compilers = vec![Compiler::interpreter()];
  #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
  compilers.push(Compiler::native());
  compilers
}

pub fn eval_with(compiler: &Compiler, src: &str, args: &[f64]) -> f64 {
  let f = compiler
    .compile(src)
    .unwrap_or_else(|err| panic!("{src}: {err}"));
  f.call(args).unwrap()
}

/// Evaluate on every backend and check they agree bit for bit (any NaN
/// matches any NaN).
pub fn eval(src: &str, args: &[f64]) -> f64 {
  let mut results = compilers()
    .iter()
    .map(|compiler| (compiler.backend_name(), eval_with(compiler, src, args)))
    .collect::<Vec<_>>();
  let (_, first) = results.remove(0);
  for (backend, value) in results {
    if value.is_nan() && first.is_nan() {
      continue;
    }
    assert_eq!(
      value.to_bits(),
      first.to_bits(),
      "{src} on {backend}: {value} != {first}"
    );
  }
  first
}
