//! End-to-end scenarios: annotated AST → lowering → codegen → optimizer →
//! linker → VM, with native output captured. Every program runs twice,
//! unoptimized and optimized, and must agree.

use super::*;
use rstest::rstest;
use veld_runtime::ast::NodeKind;
use veld_runtime::types::{NumberKind, Type};

#[test]
fn recursive_fibonacci() {
    expect_output(fib_builder, "1346269\n");
}

#[rstest]
#[case(NodeKind::Addition, 13)]
#[case(NodeKind::Subtraction, 7)]
#[case(NodeKind::Multiplication, 30)]
#[case(NodeKind::Division, 3)]
#[case(NodeKind::Modulo, 1)]
fn binary_operators_compute(#[case] kind: NodeKind, #[case] expected: u64) {
    // print (10 <op> 3);
    expect_output(
        || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();
            let print = b.print_stmt(root, "print");
            let op = b.node(print, kind);
            b.u64_lit(op, 10);
            b.u64_lit(op, 3);
            b
        },
        &expected.to_string(),
    );
}

#[test]
fn nested_block_scope() {
    // let a = 1; a = { let b = 3; b }; print a;
    expect_output(
        || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();

            let decl = b.let_decl(root, "a", Type::u64());
            b.u64_lit(decl, 1);

            let assign = b.assign(root, "a");
            b.enter_scope();
            let block = b.node(assign, NodeKind::Block);
            let inner = b.let_decl(block, "b", Type::u64());
            b.u64_lit(inner, 3);
            let result = b.node(block, NodeKind::BlockResult);
            b.ident(result, "b");
            b.exit_scope();

            let print = b.print_stmt(root, "print");
            b.ident(print, "a");
            b
        },
        "3",
    );
}

#[test]
fn if_else_assignment() {
    // let a = 1; if (true) { a = 2; } else { a = 3; }; print a;
    expect_output(
        || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();

            let decl = b.let_decl(root, "a", Type::u64());
            b.u64_lit(decl, 1);

            let if_node = b.node(root, NodeKind::IfStatement);
            b.boolean(if_node, true);
            let then_block = b.node(if_node, NodeKind::Block);
            let set2 = b.assign(then_block, "a");
            b.u64_lit(set2, 2);
            let else_block = b.node(if_node, NodeKind::Block);
            let set3 = b.assign(else_block, "a");
            b.u64_lit(set3, 3);

            let print = b.print_stmt(root, "print");
            b.ident(print, "a");
            b
        },
        "2",
    );
}

#[test]
fn vars_in_block_expression() {
    // let x = { let a = 1; let b = 2; let c = a + b; c }; print x;
    expect_output(
        || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();

            let decl = b.let_decl(root, "x", Type::u64());
            b.enter_scope();
            let block = b.node(decl, NodeKind::Block);
            for (name, value) in [("a", 1u64), ("b", 2)] {
                let inner = b.let_decl(block, name, Type::u64());
                b.u64_lit(inner, value);
            }
            let c_decl = b.let_decl(block, "c", Type::u64());
            let add = b.node(c_decl, NodeKind::Addition);
            b.ident(add, "a");
            b.ident(add, "b");
            let result = b.node(block, NodeKind::BlockResult);
            b.ident(result, "c");
            b.exit_scope();

            let print = b.print_stmt(root, "print");
            b.ident(print, "x");
            b
        },
        "3",
    );
}

#[test]
fn tuple_destructuring() {
    // let a = (3, 5, 7); let (b, c, d) = a; print d;
    expect_output(
        || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();

            let triple = Type::Product(vec![Type::u64(), Type::u64(), Type::u64()]);
            let decl = b.let_decl(root, "a", triple);
            let tuple = b.node(decl, NodeKind::Tuple);
            for value in [3u64, 5, 7] {
                b.u64_lit(tuple, value);
            }

            let destructure = b.let_tuple(
                root,
                &[
                    ("b", Type::u64()),
                    ("c", Type::u64()),
                    ("d", Type::u64()),
                ],
            );
            b.ident(destructure, "a");

            let print = b.print_stmt(root, "print");
            b.ident(print, "d");
            b
        },
        "7",
    );
}

#[test]
fn cross_module_call() {
    // let t = lib.get_ten (); print t;  — get_ten is a hand-written chunk.
    let build = || {
        let mut b = Builder::new();
        declare_stdlib(&mut b);
        b.declare_signature(
            "lib.get_ten",
            Type::Function {
                from: Box::new(Type::unit()),
                to: Box::new(Type::u64()),
            },
        );
        let root = b.root();

        let decl = b.let_decl(root, "t", Type::u64());
        let call = b.call(decl, "lib.get_ten");
        b.node(call, NodeKind::Tuple);

        let print = b.print_stmt(root, "print");
        b.ident(print, "t");
        b
    };

    let get_ten = {
        let mut code = veld_runtime::Bytecode::new();
        code.emit_mv_reg_i64(veld_runtime::bytecode::RET, 10);
        code.emit_ret(0);
        veld_runtime::Function::bytecode("lib.get_ten", code)
    };

    for optimize in [false, true] {
        let (vm, output) = run_with(build(), vec![get_ten.clone()], optimize);
        assert_eq!(output, "10");
        assert_eq!(vm.register(veld_runtime::bytecode::RET), 10);
        assert_eq!(vm.sp(), 0);
    }
}

#[test]
fn while_loop_counts() {
    // let i = 0; while (i < 10) { i = i + 1; }; print i;
    expect_output(
        || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();

            let decl = b.let_decl(root, "i", Type::u64());
            b.u64_lit(decl, 0);

            let while_node = b.node(root, NodeKind::WhileLoop);
            let cond = b.node(while_node, NodeKind::LessThan);
            b.ident(cond, "i");
            b.u64_lit(cond, 10);
            let body = b.node(while_node, NodeKind::Block);
            let bump = b.assign(body, "i");
            let add = b.node(bump, NodeKind::Addition);
            b.ident(add, "i");
            b.u64_lit(add, 1);

            let print = b.print_stmt(root, "print");
            b.ident(print, "i");
            b
        },
        "10",
    );
}

#[test]
fn short_circuit_logic() {
    // let a = 1;
    // if (true && (false || true)) { a = 2; } else { a = 3; };
    // if (false && true) { a = a + 90; } else { };
    // if (!(false)) { } else { a = 9; };
    // print a;                                       → 2
    expect_output(
        || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();

            let decl = b.let_decl(root, "a", Type::u64());
            b.u64_lit(decl, 1);

            let if1 = b.node(root, NodeKind::IfStatement);
            let and = b.node(if1, NodeKind::And);
            b.boolean(and, true);
            let or = b.node(and, NodeKind::Or);
            b.boolean(or, false);
            b.boolean(or, true);
            let then1 = b.node(if1, NodeKind::Block);
            let set2 = b.assign(then1, "a");
            b.u64_lit(set2, 2);
            let else1 = b.node(if1, NodeKind::Block);
            let set3 = b.assign(else1, "a");
            b.u64_lit(set3, 3);

            let if2 = b.node(root, NodeKind::IfStatement);
            let and2 = b.node(if2, NodeKind::And);
            b.boolean(and2, false);
            b.boolean(and2, true);
            let then2 = b.node(if2, NodeKind::Block);
            let poison = b.assign(then2, "a");
            let add = b.node(poison, NodeKind::Addition);
            b.ident(add, "a");
            b.u64_lit(add, 90);
            b.node(if2, NodeKind::Block); // empty else

            let if3 = b.node(root, NodeKind::IfStatement);
            let not = b.node(if3, NodeKind::Not);
            b.boolean(not, false);
            b.node(if3, NodeKind::Block); // empty then
            let else3 = b.node(if3, NodeKind::Block);
            let set9 = b.assign(else3, "a");
            b.u64_lit(set9, 9);

            let print = b.print_stmt(root, "print");
            b.ident(print, "a");
            b
        },
        "2",
    );
}

#[test]
fn match_on_sum_type() {
    // type opt = none | some u32;
    // let r = 0; let s = some 7;
    // match s { none () -> r = 1; some x -> r = x + 1000; };
    // print r;                                        → 1007
    expect_output(
        || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();

            b.sum_type(
                root,
                "opt",
                &[
                    ("none", Type::unit()),
                    ("some", Type::Number(NumberKind::U32)),
                ],
            );
            let opt_ty = Type::Sum(vec![
                ("none".to_string(), Type::unit()),
                ("some".to_string(), Type::Number(NumberKind::U32)),
            ]);

            let r_decl = b.let_decl(root, "r", Type::u64());
            b.u64_lit(r_decl, 0);

            let s_decl = b.let_decl(root, "s", opt_ty);
            let ctor = b.call(s_decl, "some");
            b.number(ctor, 7, NumberKind::U32);

            let match_node = b.node(root, NodeKind::Match);
            b.ident(match_node, "s");

            // none () -> r = 1;
            let none_branch = b.node(match_node, NodeKind::MatchBranch);
            let none_pattern = b.call(none_branch, "none");
            b.node(none_pattern, NodeKind::Tuple);
            let none_body = b.node(none_branch, NodeKind::Block);
            let set1 = b.assign(none_body, "r");
            b.u64_lit(set1, 1);

            // some x -> r = x + 1000;
            b.enter_scope();
            let some_branch = b.node(match_node, NodeKind::MatchBranch);
            let some_pattern = b.call(some_branch, "some");
            b.binding(some_pattern, "x", Type::Number(NumberKind::U32));
            let some_body = b.node(some_branch, NodeKind::Block);
            let set = b.assign(some_body, "r");
            let add = b.node(set, NodeKind::Addition);
            b.ident(add, "x");
            b.u64_lit(add, 1000);
            b.exit_scope();

            let print = b.print_stmt(root, "print");
            b.ident(print, "r");
            b
        },
        "1007",
    );
}

#[test]
fn match_with_tuple_and_literal_patterns() {
    // type shape = dot | wide (u8, u8);
    // let r = 0; let s = wide (3, 9);
    // match s { wide (4, y) -> r = y;  wide (3, y) -> r = y + 2000; };
    // print r;                                        → 2009
    expect_output(
        || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();

            let pair = Type::Product(vec![
                Type::Number(NumberKind::U8),
                Type::Number(NumberKind::U8),
            ]);
            b.sum_type(
                root,
                "shape",
                &[("dot", Type::unit()), ("wide", pair.clone())],
            );
            let shape_ty = Type::Sum(vec![
                ("dot".to_string(), Type::unit()),
                ("wide".to_string(), pair),
            ]);

            let r_decl = b.let_decl(root, "r", Type::u64());
            b.u64_lit(r_decl, 0);

            let s_decl = b.let_decl(root, "s", shape_ty);
            let ctor = b.call(s_decl, "wide");
            let payload = b.node(ctor, NodeKind::Tuple);
            b.number(payload, 3, NumberKind::U8);
            b.number(payload, 9, NumberKind::U8);

            let match_node = b.node(root, NodeKind::Match);
            b.ident(match_node, "s");

            // wide (4, y) -> r = y;   (must not fire)
            b.enter_scope();
            let miss = b.node(match_node, NodeKind::MatchBranch);
            let miss_pattern = b.call(miss, "wide");
            let miss_tuple = b.node(miss_pattern, NodeKind::Tuple);
            b.number(miss_tuple, 4, NumberKind::U8);
            b.binding(miss_tuple, "y", Type::Number(NumberKind::U8));
            let miss_body = b.node(miss, NodeKind::Block);
            let set_miss = b.assign(miss_body, "r");
            let widen_miss = b.node(set_miss, NodeKind::Addition);
            b.ident(widen_miss, "y");
            b.u64_lit(widen_miss, 0);
            b.exit_scope();

            // wide (3, y) -> r = y + 2000;
            b.enter_scope();
            let hit = b.node(match_node, NodeKind::MatchBranch);
            let hit_pattern = b.call(hit, "wide");
            let hit_tuple = b.node(hit_pattern, NodeKind::Tuple);
            b.number(hit_tuple, 3, NumberKind::U8);
            b.binding(hit_tuple, "y", Type::Number(NumberKind::U8));
            let hit_body = b.node(hit, NodeKind::Block);
            let set_hit = b.assign(hit_body, "r");
            let widen = b.node(set_hit, NodeKind::Addition);
            b.ident(widen, "y");
            b.u64_lit(widen, 2000);
            b.exit_scope();

            let print = b.print_stmt(root, "print");
            b.ident(print, "r");
            b
        },
        "2009",
    );
}

#[test]
fn array_indexing_and_stores() {
    // let a = [3, 5, 7]; let i = 1;
    // println a[i]; a[2] = 11; println a[2];
    expect_output(
        || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();

            let array_ty = Type::Array {
                element: Box::new(Type::u64()),
                length: 3,
            };
            let decl = b.let_decl(root, "a", array_ty);
            let value = b.node(decl, NodeKind::ArrayValue);
            for v in [3u64, 5, 7] {
                b.u64_lit(value, v);
            }

            let i_decl = b.let_decl(root, "i", Type::u64());
            b.u64_lit(i_decl, 1);

            let print1 = b.print_stmt(root, "println");
            let access = b.node(print1, NodeKind::ArrayAccess);
            b.ident(access, "a");
            b.ident(access, "i");

            let store = b.node(root, NodeKind::Assignment);
            let target = b.node(store, NodeKind::ArrayAccess);
            b.ident(target, "a");
            b.u64_lit(target, 2);
            b.u64_lit(store, 11);

            let print2 = b.print_stmt(root, "println");
            let access2 = b.node(print2, NodeKind::ArrayAccess);
            b.ident(access2, "a");
            b.u64_lit(access2, 2);
            b
        },
        "5\n11\n",
    );
}
