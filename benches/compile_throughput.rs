//! Criterion benchmarks for parsing, compiling and calling expressions.

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use arithjit::{BackendKind, CompileOptions, Compiler};

const QUADRATIC: &str = "(-b+(b^2-4*a*c)^0.5)/(2*a)";

// ---------------------------------------------------------------------------
// Expression generators
// ---------------------------------------------------------------------------

fn generate_chain(n: usize) -> String {
  let mut expr = String::from("x");
  for i in 0..n {
    match i % 4 {
      0 => expr.push_str(&format!(" + {i}")),
      1 => expr.push_str(" * x"),
      2 => expr.push_str(&format!(" - y^{}", i % 7 + 2)),
      3 => expr.push_str(" / (x + 1)"),
      _ => unreachable!(),
    }
  }
  expr
}

fn compilers() -> Vec<Compiler> {
  let mut compilers = vec![Compiler::new(
    CompileOptions::default().backend(BackendKind::Interpreter),
  )];
  if cfg!(any(target_arch = "x86_64", target_arch = "aarch64")) {
    compilers.push(Compiler::new(
      CompileOptions::default().backend(BackendKind::Native),
    ));
  }
  compilers
}

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

fn bench_parse(c: &mut Criterion) {
  let mut group = c.benchmark_group("parse");
  for n in [10, 100, 200] {
    let expr = generate_chain(n);
    group.bench_with_input(BenchmarkId::from_parameter(n), &expr, |b, expr| {
      b.iter(|| arithjit::to_ast(black_box(expr)).expect("parse should succeed"));
    });
  }
  group.finish();
}

fn bench_compile(c: &mut Criterion) {
  let mut group = c.benchmark_group("compile");
  for compiler in compilers() {
    for n in [10, 100] {
      let expr = generate_chain(n);
      let id = BenchmarkId::new(compiler.backend_name(), n);
      group.bench_with_input(id, &expr, |b, expr| {
        b.iter(|| compiler.compile(black_box(expr)).expect("compile should succeed"));
      });
    }
  }
  group.finish();
}

fn bench_call(c: &mut Criterion) {
  let mut group = c.benchmark_group("call");
  for compiler in compilers() {
    let f = compiler.compile(QUADRATIC).expect("compile should succeed");
    group.bench_function(BenchmarkId::new("quadratic", compiler.backend_name()), |b| {
      b.iter(|| f.call(black_box(&[5.0, 6.0, 1.0])).expect("call should succeed"));
    });

    let sum = compiler.sum().expect("compile should succeed");
    let data: Vec<f64> = (0..10_000).map(f64::from).collect();
    group.bench_function(BenchmarkId::new("sum_10k", compiler.backend_name()), |b| {
      b.iter(|| sum.apply(black_box(&data)));
    });
  }
  group.finish();
}

criterion_group!(benches, bench_parse, bench_compile, bench_call);
criterion_main!(benches);
