//! Compile-time failure modes surface as errors, not panics.

use super::*;
use veld_runtime::ast::NodeKind;
use veld_runtime::types::Type;
use veld_runtime::{CompileError, Pipeline};

fn compile_error(mut builder: Builder) -> CompileError {
    Pipeline::new()
        .compile(&mut builder.ast)
        .expect_err("program must fail to compile")
}

#[test]
fn string_literals_are_not_lowerable() {
    let mut b = Builder::new();
    declare_stdlib(&mut b);
    let root = b.root();
    let decl = b.let_decl(root, "s", Type::u64());
    let node = b.node(decl, NodeKind::String);
    *b.ast.string_mut(node) = "hello".to_string();

    assert!(matches!(compile_error(b), CompileError::Lower(_)));
}

#[test]
fn unresolved_names_fail() {
    let mut b = Builder::new();
    declare_stdlib(&mut b);
    let root = b.root();
    let print = b.print_stmt(root, "print");
    b.ident(print, "nowhere");

    assert!(matches!(compile_error(b), CompileError::Lower(_)));
}

#[test]
fn mismatched_if_arm_sizes_fail() {
    // if (true) { 1u64 } else { true } — arms disagree on result bytes.
    let mut b = Builder::new();
    declare_stdlib(&mut b);
    let root = b.root();
    let decl = b.let_decl(root, "a", Type::u64());
    let if_node = b.node(decl, NodeKind::IfStatement);
    b.boolean(if_node, true);
    let then_block = b.node(if_node, NodeKind::Block);
    let then_result = b.node(then_block, NodeKind::BlockResult);
    b.u64_lit(then_result, 1);
    let else_block = b.node(if_node, NodeKind::Block);
    let else_result = b.node(else_block, NodeKind::BlockResult);
    b.boolean(else_result, true);

    assert!(matches!(compile_error(b), CompileError::Lower(_)));
}

#[test]
fn match_branch_must_not_leave_values() {
    let mut b = Builder::new();
    declare_stdlib(&mut b);
    let root = b.root();
    b.sum_type(root, "opt", &[("none", Type::unit())]);
    let opt_ty = Type::Sum(vec![("none".to_string(), Type::unit())]);

    let s_decl = b.let_decl(root, "s", opt_ty);
    let ctor = b.call(s_decl, "none");
    b.node(ctor, NodeKind::Tuple);

    let match_node = b.node(root, NodeKind::Match);
    b.ident(match_node, "s");
    let branch = b.node(match_node, NodeKind::MatchBranch);
    let pattern = b.call(branch, "none");
    b.node(pattern, NodeKind::Tuple);
    let body = b.node(branch, NodeKind::Block);
    let result = b.node(body, NodeKind::BlockResult);
    b.u64_lit(result, 5); // a leftover value would sit below the subject

    assert!(matches!(compile_error(b), CompileError::Lower(_)));
}

#[test]
fn match_subject_must_be_a_sum() {
    let mut b = Builder::new();
    declare_stdlib(&mut b);
    let root = b.root();
    let decl = b.let_decl(root, "n", Type::u64());
    b.u64_lit(decl, 4);

    let match_node = b.node(root, NodeKind::Match);
    b.ident(match_node, "n");
    let branch = b.node(match_node, NodeKind::MatchBranch);
    b.u64_lit(branch, 4);
    b.node(branch, NodeKind::Block);

    assert!(matches!(compile_error(b), CompileError::Lower(_)));
}

#[test]
fn oversized_sum_types_fail() {
    // 1 tag byte + a u64 payload cannot travel through the result register.
    let mut b = Builder::new();
    declare_stdlib(&mut b);
    let root = b.root();
    b.sum_type(
        root,
        "wide",
        &[("none", Type::unit()), ("some", Type::u64())],
    );

    assert!(matches!(compile_error(b), CompileError::Lower(_)));
}

#[test]
fn references_are_not_lowerable() {
    let mut b = Builder::new();
    declare_stdlib(&mut b);
    let root = b.root();
    let decl = b.let_decl(root, "r", Type::u64());
    let reference = b.node(decl, NodeKind::Reference);
    b.u64_lit(reference, 1);

    assert!(matches!(compile_error(b), CompileError::Lower(_)));
}

#[test]
fn calling_a_non_function_fails() {
    let mut b = Builder::new();
    declare_stdlib(&mut b);
    let root = b.root();
    let decl = b.let_decl(root, "x", Type::u64());
    b.u64_lit(decl, 3);

    let stmt = b.call(root, "x");
    b.node(stmt, NodeKind::Tuple);

    assert!(matches!(compile_error(b), CompileError::Lower(_)));
}
