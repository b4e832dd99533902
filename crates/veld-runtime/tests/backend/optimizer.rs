//! Optimizer properties on whole compiled programs.

use super::*;
use pretty_assertions::assert_eq;
use veld_runtime::bytecode::{validator, Op};
use veld_runtime::{link, optimize_program};

fn compiled_fib() -> veld_runtime::Program {
    let mut builder = fib_builder();
    let core = veld_runtime::lower(&mut builder.ast).unwrap();
    let mut program = veld_runtime::generate(&core).unwrap();
    for function in stdlib_functions() {
        program.add_function(function);
    }
    program
}

#[test]
fn optimizer_is_a_fixed_point_operator() {
    let mut program = compiled_fib();
    let first = optimize_program(&mut program);
    assert!(first.changed_anything(), "fib offers rewrite opportunities");

    let snapshot: Vec<Vec<u8>> = program
        .functions()
        .iter()
        .filter_map(|f| f.code().map(|c| c.as_slice().to_vec()))
        .collect();

    let second = optimize_program(&mut program);
    assert!(!second.changed_anything(), "second run must be a no-op");

    let after: Vec<Vec<u8>> = program
        .functions()
        .iter()
        .filter_map(|f| f.code().map(|c| c.as_slice().to_vec()))
        .collect();
    assert_eq!(snapshot, after);
}

#[test]
fn optimized_executable_is_no_larger() {
    let plain = compiled_fib();
    let mut optimized = compiled_fib();
    optimize_program(&mut optimized);

    let plain_exe = link(&plain).unwrap();
    let optimized_exe = link(&optimized).unwrap();
    assert!(optimized_exe.code.len() <= plain_exe.code.len());

    // Linking elides every NOP the optimizer left behind.
    validator::validate(&optimized_exe).unwrap();
    assert!(optimized_exe.code.ops().all(|(_, op)| op != Op::Nop));
}

#[test]
fn literal_sub_folds_in_fib() {
    // fib's `n - 1` / `n - 2` feed the sub-literal rewrite; the optimized
    // chunk should contain immediate-form subtractions.
    let mut program = compiled_fib();
    optimize_program(&mut program);
    let fib = program.by_name("fib").expect("fib chunk exists");
    let code = fib.code().unwrap();
    let has_sub_imm = code.ops().any(|(_, op)| op == Op::SubImm);
    assert!(has_sub_imm, "expected sub.i in:\n{code}");
}
