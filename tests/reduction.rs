//! Folding compiled expressions over slices.

mod common;

use arithjit::{CompileError, Compiler};
use common::compilers;

#[test]
fn sum_and_product() {
  for compiler in compilers() {
    let sum = compiler.sum().unwrap();
    assert_eq!(sum.apply(&[]), 0.0);
    assert_eq!(sum.apply(&[1.0, 2.0, 3.0]), 6.0);
    assert_eq!(sum.apply_from(4.0, &[1.0, 2.0, 3.0]), 10.0);

    let product = compiler.product().unwrap();
    assert_eq!(product.init(), 1.0);
    assert_eq!(product.apply(&[1.0, 2.0, 3.0]), 6.0);
    assert_eq!(product.apply(&[]), 1.0);
  }
}

#[test]
fn empty_input_returns_the_initial_value() {
  for compiler in compilers() {
    let reducer = compiler.reducer("acc * 2 + x", "acc", "x").unwrap();
    assert_eq!(reducer.reduce(7.5, &[]), 7.5);
    assert!(reducer.reduce(f64::NAN, &[]).is_nan());
  }
}

#[test]
fn element_lowered_away_still_counts_iterations() {
  for compiler in compilers() {
    let count = compiler.reducer("t + x^0", "t", "x").unwrap();
    assert_eq!(count.reduce(0.0, &[4.0, 5.0, 6.0, 7.0]), 4.0);
  }
}

#[test]
fn element_and_accumulator_are_distinguished_by_name() {
  for compiler in compilers() {
    // Alphabetical order would put `a` first; the names decide instead.
    let reducer = compiler.reducer("a - b", "b", "a").unwrap();
    assert_eq!(reducer.accumulator(), "b");
    assert_eq!(reducer.element(), "a");
    // b = a - b over [1, 2, 3] from 0: 1, 1, 2
    assert_eq!(reducer.reduce(0.0, &[1.0, 2.0, 3.0]), 2.0);
  }
}

#[test]
fn bodies_may_use_powers_and_roots() {
  for compiler in compilers() {
    let norm = compiler.reducer("t + x^2", "t", "x").unwrap();
    assert_eq!(norm.reduce(0.0, &[3.0, 4.0]), 25.0);

    let cubes = compiler.reducer("t + x^3", "t", "x").unwrap();
    assert_eq!(cubes.reduce(0.0, &[1.0, 2.0, 3.0]), 36.0);

    let nested = compiler.reducer("√(t^2 + x^2)", "t", "x").unwrap();
    assert_eq!(nested.reduce(3.0, &[4.0]), 5.0);
  }
}

#[test]
fn long_buffers() {
  let data: Vec<f64> = (1..=10_000).map(f64::from).collect();
  for compiler in compilers() {
    let sum = compiler.sum().unwrap();
    assert_eq!(sum.apply(&data), 50_005_000.0);
    assert_eq!(sum.apply(&data[..10]), 55.0);
  }
}

#[test]
fn variables_must_match_the_body() {
  let compiler = Compiler::interpreter();
  for (body, acc, elem) in [
    ("t + x + y", "t", "x"),
    ("t + 1", "t", "x"),
    ("x * 2", "t", "x"),
    ("t + x", "t", "t"),
  ] {
    let err = compiler.reducer(body, acc, elem).unwrap_err();
    assert!(matches!(err, CompileError::Binding { .. }), "{body}: {err}");
  }
}
