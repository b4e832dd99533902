//! Stack-analyzer laws, checked on real lowered programs and on generated
//! arithmetic expressions (differential against Rust's wrapping semantics).

use super::*;
use proptest::prelude::*;
use veld_runtime::ast::NodeKind;
use veld_runtime::bytecode::Op;
use veld_runtime::core::{CoreAst, CoreId, CoreKind};
use veld_runtime::stack_analysis::{analyze_function, StackAnalysis};
use veld_runtime::types::Type;

/// Walk one analyzed function and check the bookkeeping laws:
/// - a node's pre-depth equals its first tracked child's pre-depth,
/// - consecutive tracked siblings chain post → pre,
/// - containers end at their last child's post-depth.
fn check_depth_laws(core: &CoreAst, analysis: &StackAnalysis, node: CoreId) {
    let kind = core.get(node).kind;
    // Nested functions have their own analysis.
    if kind == CoreKind::Function {
        return;
    }
    let tracked_children: Vec<CoreId> = core
        .children(node)
        .iter()
        .copied()
        .filter(|&c| analysis.tracked(c))
        .collect();

    if analysis.tracked(node) && !tracked_children.is_empty() {
        assert_eq!(
            analysis.pre_depth(node),
            analysis.pre_depth(tracked_children[0]),
            "first child of {kind:?} starts at the node's pre-depth"
        );
        for pair in tracked_children.windows(2) {
            assert_eq!(
                analysis.post_depth(pair[0]),
                analysis.pre_depth(pair[1]),
                "siblings chain post → pre inside {kind:?}"
            );
        }
        if matches!(kind, CoreKind::Block | CoreKind::Tuple) {
            assert_eq!(
                analysis.post_depth(node),
                analysis.post_depth(*tracked_children.last().unwrap()),
                "container ends at its last child's depth"
            );
        }
    }

    for &child in core.children(node) {
        check_depth_laws(core, analysis, child);
    }
}

/// Analyze every function of a lowered program and apply the laws.
fn check_program(mut builder: Builder) {
    let core = veld_runtime::lower(&mut builder.ast).expect("lowers");
    let mut functions = Vec::new();
    core.walk(core.root(), &mut |id, node| {
        if node.kind == CoreKind::Function {
            functions.push(id);
        }
    });
    assert!(!functions.is_empty());
    for f in functions {
        let analysis = analyze_function(f, &core).expect("analyzable");
        let body = core.children(f)[0];
        check_depth_laws(&core, &analysis, body);
    }
}

#[test]
fn depth_laws_hold_for_fib() {
    check_program(fib_builder());
}

#[test]
fn depth_laws_hold_for_control_flow() {
    // While + if + match exercise every label-reconciliation path.
    let mut b = Builder::new();
    declare_stdlib(&mut b);
    let root = b.root();

    let decl = b.let_decl(root, "i", Type::u64());
    b.u64_lit(decl, 0);
    let while_node = b.node(root, NodeKind::WhileLoop);
    let cond = b.node(while_node, NodeKind::LessThan);
    b.ident(cond, "i");
    b.u64_lit(cond, 3);
    let body = b.node(while_node, NodeKind::Block);
    let bump = b.assign(body, "i");
    let add = b.node(bump, NodeKind::Addition);
    b.ident(add, "i");
    b.u64_lit(add, 1);

    check_program(b);
}

/// Every generated function allocates and frees the same number of local
/// bytes (prologue SALLOC mirrors epilogue SDEALLOC).
#[test]
fn prologue_and_epilogue_agree() {
    let mut builder = fib_builder();
    let core = veld_runtime::lower(&mut builder.ast).unwrap();
    let program = veld_runtime::generate(&core).unwrap();

    let mut checked = 0;
    for function in program.functions() {
        let Some(code) = function.code() else { continue };
        if function.name() == "_main" {
            continue; // the entry chunk has no frame of its own
        }

        let mut salloc = None;
        let mut last_sdealloc = None;
        let mut ends_in_ret = false;
        for (offset, op) in code.ops() {
            match op {
                Op::Salloc if salloc.is_none() => salloc = Some(code.read_u8(offset + 2)),
                Op::Sdealloc => last_sdealloc = Some(code.read_u8(offset + 1)),
                Op::Ret => ends_in_ret = true,
                _ => {}
            }
        }
        assert!(ends_in_ret, "{} ends in RET", function.name());
        assert_eq!(
            salloc.expect("prologue allocates"),
            last_sdealloc.expect("epilogue frees"),
            "frame symmetry in {}",
            function.name()
        );
        checked += 1;
    }
    assert!(checked >= 1);
}

// ----------------------------------------------------------------------------
// Differential property: generated arithmetic expressions compute the same
// value as Rust's wrapping u64 arithmetic.
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expr {
    Lit(u64),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
}

impl Expr {
    fn eval(&self) -> u64 {
        match self {
            Expr::Lit(v) => *v,
            Expr::Add(a, b) => a.eval().wrapping_add(b.eval()),
            Expr::Sub(a, b) => a.eval().wrapping_sub(b.eval()),
            Expr::Mul(a, b) => a.eval().wrapping_mul(b.eval()),
        }
    }

    fn build(&self, b: &mut Builder, parent: veld_runtime::ast::NodeId) {
        match self {
            Expr::Lit(v) => {
                b.u64_lit(parent, *v);
            }
            Expr::Add(x, y) | Expr::Sub(x, y) | Expr::Mul(x, y) => {
                let kind = match self {
                    Expr::Add(..) => NodeKind::Addition,
                    Expr::Sub(..) => NodeKind::Subtraction,
                    _ => NodeKind::Multiplication,
                };
                let node = b.node(parent, kind);
                x.build(b, node);
                y.build(b, node);
            }
        }
    }
}

fn expr_strategy() -> impl Strategy<Value = Expr> {
    let leaf = any::<u64>().prop_map(Expr::Lit);
    leaf.prop_recursive(4, 24, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| Expr::Add(Box::new(a), Box::new(b))),
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| Expr::Sub(Box::new(a), Box::new(b))),
            (inner.clone(), inner).prop_map(|(a, b)| Expr::Mul(Box::new(a), Box::new(b))),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn arithmetic_matches_wrapping_semantics(expr in expr_strategy()) {
        let expected = expr.eval();

        let build = || {
            let mut b = Builder::new();
            declare_stdlib(&mut b);
            let root = b.root();
            let print = b.print_stmt(root, "println");
            expr.build(&mut b, print);
            b
        };

        for optimize in [false, true] {
            let (vm, output) = run_with(build(), Vec::new(), optimize);
            prop_assert_eq!(output.trim(), expected.to_string());
            prop_assert_eq!(vm.sp(), 0);
        }
    }
}
