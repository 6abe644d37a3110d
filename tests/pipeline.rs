//! End-to-end: source text to a called function, on every available backend.

mod common;

use arithjit::{CompileError, Compiler, to_ast, to_lowered_ast};
use common::{compilers, eval};

#[test]
fn constant_expressions() {
  assert_eq!(eval("1+2*3", &[]), 7.0);
  assert_eq!(eval("(1+2)*3", &[]), 9.0);
  assert_eq!(eval("(2+3)/2", &[]), 2.5);
  assert_eq!(eval("3 + (8 - 7.5) * 10 / 5  - (2 + 5 * 7)", &[]), -33.0);
  assert_eq!(eval("--9007199254741195", &[]), 9007199254741195.0);
}

#[test]
fn variables_are_passed_alphabetically() {
  assert_eq!(eval("30*x/5 - (2 + 5 * 7)", &[5.0]), -7.0);
  assert_eq!(eval("a+2*b^3", &[0.5, 1.0]), 2.5);
  assert_eq!(eval("(-b+(b^2-4*a*c)^0.5)/(2*a)", &[5.0, 6.0, 1.0]), -0.2);
}

#[test]
fn integer_powers_are_exact() {
  assert_eq!(eval("x^13", &[3.0]), 3f64.powi(13));
  assert_eq!(eval("x^13", &[3.0]), 1_594_323.0);
  assert_eq!(eval("2^10", &[]), 1024.0);
  assert_eq!(eval("x^-2", &[4.0]), 0.0625);
  assert_eq!(eval("x^0 + x^1", &[9.0]), 10.0);
}

#[test]
fn lowering_keeps_every_parameter() {
  for compiler in compilers() {
    let f = compiler.compile("x^0 + y").unwrap();
    assert_eq!(f.params(), ["x", "y"]);
    assert_eq!(f.call(&[5.0, 7.0]).unwrap(), 8.0);
  }
  assert_eq!(eval("a^0", &[3.0]), 1.0);
}

#[test]
fn square_root_both_spellings() {
  assert_eq!(eval("x^0.5", &[2.25]), 1.5);
  assert_eq!(eval("√x", &[2.25]), 1.5);
  assert_eq!(eval("√(a^2 + b^2)", &[3.0, 4.0]), 5.0);
}

#[test]
fn evaluator_reports_its_signature() {
  for compiler in compilers() {
    let f = compiler.compile("z * (y - x)").unwrap();
    assert_eq!(f.params(), ["x", "y", "z"]);
    assert_eq!(f.expression(), "z * (y - x)");
    assert_eq!(f.call(&[1.0, 3.0, 2.0]).unwrap(), 4.0);
    assert!(matches!(
      f.call(&[]),
      Err(CompileError::Arity {
        expected: 3,
        got: 0,
        ..
      })
    ));
  }
}

#[test]
fn evaluator_is_shareable_across_threads() {
  let f = Compiler::interpreter().compile("x * x").unwrap();
  std::thread::scope(|scope| {
    for i in 0..4 {
      let f = &f;
      scope.spawn(move || assert_eq!(f.call(&[i as f64]).unwrap(), (i * i) as f64));
    }
  });
}

#[test]
fn parse_and_lower_are_exposed() {
  assert_eq!(to_ast("1 * 2 * 3").unwrap(), to_ast("(1 * 2) * 3").unwrap());
  assert_ne!(to_ast("1^2^3").unwrap(), to_ast("(1^2)^3").unwrap());
  assert_eq!(to_lowered_ast("x^2").unwrap().to_string(), "x * x");
  assert_eq!(to_lowered_ast("x^-1").unwrap().to_string(), "1 / x");
}

#[test]
fn compile_errors_by_stage() {
  let compiler = Compiler::interpreter();
  assert!(matches!(compiler.compile("1 $ 2"), Err(CompileError::Lex { .. })));
  assert!(matches!(compiler.compile("(1 + 2"), Err(CompileError::Parse { .. })));
  assert!(matches!(compiler.compile("1^"), Err(CompileError::Parse { .. })));
  assert!(matches!(compiler.compile("x^y"), Err(CompileError::Lowering { .. })));
  assert!(matches!(compiler.compile("x^1.5"), Err(CompileError::Lowering { .. })));
}

#[test]
fn wide_expressions_take_every_parameter() {
  let src = "a+b+c+d+e+f+g+h+i - j*k";
  let args: Vec<f64> = (1..=11).map(f64::from).collect();
  assert_eq!(eval(src, &args), 45.0 - 110.0);
}
