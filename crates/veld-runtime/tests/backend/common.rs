//! Shared helpers: an AST builder standing in for the external front end
//! (parser + resolver + typechecker), and run helpers that drive the full
//! pipeline and capture native output.

use veld_runtime::ast::{Ast, NodeId, NodeKind, ScopeId};
use veld_runtime::bytecode::{validator, Function};
use veld_runtime::types::{NumberKind, Type};
use veld_runtime::vm::{CaptureBuffer, NATIVE_PRINT, NATIVE_PRINTLN, VM};
use veld_runtime::Pipeline;

/// Builds annotated ASTs the way the front end would: every node carries its
/// name/type scope, declarations are registered as they are created.
pub struct Builder {
    pub ast: Ast,
    name_scopes: Vec<ScopeId>,
    type_scopes: Vec<ScopeId>,
}

impl Builder {
    pub fn new() -> Builder {
        let mut ast = Ast::new();
        let names = ast.create_name_scope(None);
        let types = ast.create_type_scope(None);
        Builder {
            ast,
            name_scopes: vec![names],
            type_scopes: vec![types],
        }
    }

    pub fn root(&self) -> NodeId {
        self.ast.root()
    }

    fn name_scope(&self) -> ScopeId {
        *self.name_scopes.last().unwrap()
    }

    fn type_scope(&self) -> ScopeId {
        *self.type_scopes.last().unwrap()
    }

    /// Open a nested scope (function body, match branch).
    pub fn enter_scope(&mut self) {
        let names = self.ast.create_name_scope(Some(self.name_scope()));
        let types = self.ast.create_type_scope(Some(self.type_scope()));
        self.name_scopes.push(names);
        self.type_scopes.push(types);
    }

    pub fn exit_scope(&mut self) {
        self.name_scopes.pop();
        self.type_scopes.pop();
    }

    /// Create a node annotated with the current scopes.
    pub fn node(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.ast.create_node(kind, parent);
        self.ast.get_mut(id).name_scope = Some(self.name_scope());
        self.ast.get_mut(id).type_scope = Some(self.type_scope());
        id
    }

    /// An identifier use.
    pub fn ident(&mut self, parent: NodeId, name: &str) -> NodeId {
        let id = self.node(parent, NodeKind::Identifier);
        self.ast.ident_mut(id).name = name.to_string();
        id
    }

    /// An identifier that declares `name : ty` in the current scope.
    pub fn binding(&mut self, parent: NodeId, name: &str, ty: Type) -> NodeId {
        let id = self.ident(parent, name);
        let (names, types) = (self.name_scope(), self.type_scope());
        self.ast.declare_name(names, name, id);
        self.ast.declare_type(types, name, ty);
        id
    }

    /// Declare a callable signature with no declaration node (natives,
    /// imported module functions, constructors).
    pub fn declare_signature(&mut self, name: &str, ty: Type) {
        let types = self.type_scope();
        self.ast.declare_type(types, name, ty);
    }

    pub fn number(&mut self, parent: NodeId, value: i64, kind: NumberKind) -> NodeId {
        let id = self.node(parent, NodeKind::Number);
        let data = self.ast.number_mut(id);
        data.value = value;
        data.kind = kind;
        id
    }

    pub fn u64_lit(&mut self, parent: NodeId, value: u64) -> NodeId {
        self.number(parent, value as i64, NumberKind::U64)
    }

    pub fn boolean(&mut self, parent: NodeId, value: bool) -> NodeId {
        let id = self.node(parent, NodeKind::Boolean);
        *self.ast.boolean_mut(id) = value;
        id
    }

    /// `let name : ty = …` — returns the declaration; append the right-hand
    /// side as its third child.
    pub fn let_decl(&mut self, parent: NodeId, name: &str, ty: Type) -> NodeId {
        let decl = self.node(parent, NodeKind::Declaration);
        self.binding(decl, name, ty);
        self.node(decl, NodeKind::TypeAtom);
        decl
    }

    /// `let (a, b, …) : (…) = …` — append the right-hand side afterwards.
    pub fn let_tuple(&mut self, parent: NodeId, names: &[(&str, Type)]) -> NodeId {
        let decl = self.node(parent, NodeKind::Declaration);
        let tuple = self.node(decl, NodeKind::IdentifierTuple);
        for (name, ty) in names {
            self.binding(tuple, name, ty.clone());
        }
        self.node(decl, NodeKind::TypeAtom);
        decl
    }

    /// `name = …` — append the right-hand side as the second child.
    pub fn assign(&mut self, parent: NodeId, name: &str) -> NodeId {
        let assignment = self.node(parent, NodeKind::Assignment);
        self.ident(assignment, name);
        assignment
    }

    /// `name(…)` — append the argument as the second child.
    pub fn call(&mut self, parent: NodeId, name: &str) -> NodeId {
        let call = self.node(parent, NodeKind::FunctionCall);
        self.ident(call, name);
        call
    }

    /// `print e` / `println e` as a statement.
    pub fn print_stmt(&mut self, parent: NodeId, name: &str) -> NodeId {
        self.call(parent, name)
    }

    /// A sum type definition; registers the type and one constructor
    /// signature per variant.
    pub fn sum_type(&mut self, parent: NodeId, name: &str, variants: &[(&str, Type)]) -> NodeId {
        let ty = Type::Sum(
            variants
                .iter()
                .map(|(n, t)| (n.to_string(), t.clone()))
                .collect(),
        );
        for (ctor, payload) in variants {
            self.declare_signature(
                ctor,
                Type::Function {
                    from: Box::new(payload.clone()),
                    to: Box::new(ty.clone()),
                },
            );
        }

        let definition = self.node(parent, NodeKind::TypeDefinition);
        self.binding(definition, name, ty);
        self.node(definition, NodeKind::SumType);
        definition
    }
}

/// Declare the standard printing natives' signatures.
pub fn declare_stdlib(b: &mut Builder) {
    let print_ty = Type::Function {
        from: Box::new(Type::u64()),
        to: Box::new(Type::unit()),
    };
    b.declare_signature("print", print_ty.clone());
    b.declare_signature("println", print_ty);
}

/// Native function entries matching `declare_stdlib`.
pub fn stdlib_functions() -> Vec<Function> {
    vec![
        Function::native("print", NATIVE_PRINT),
        Function::native("println", NATIVE_PRINTLN),
    ]
}

/// Build, link, validate, and run; returns the halted VM and the captured
/// output.
pub fn run_with(builder: Builder, extra: Vec<Function>, optimize: bool) -> (VM, String) {
    let mut ast = builder.ast;
    let mut pipeline = if optimize {
        Pipeline::new()
    } else {
        Pipeline::without_optimization()
    };
    for function in stdlib_functions().into_iter().chain(extra) {
        pipeline = pipeline.with_function(function);
    }

    let exe = pipeline.build(&mut ast).expect("program compiles");
    if let Err(errors) = validator::validate(&exe) {
        panic!("linked executable fails validation: {errors:?}");
    }

    let buffer = CaptureBuffer::new();
    let mut vm = VM::new(exe).with_output(Box::new(buffer.clone()));
    vm.run().expect("program runs to EXIT");
    (vm, buffer.contents())
}

/// The recursive-fibonacci program, shared across scenario, analyzer, and
/// optimizer tests:
/// `let fib : u64 -> u64 = \n => if (n <= 2) { 1 } else { fib(n-1) + fib(n-2) };`
/// `println (fib 31);`
pub fn fib_builder() -> Builder {
    use veld_runtime::ast::NodeKind;

    let mut b = Builder::new();
    declare_stdlib(&mut b);
    let root = b.root();

    let fib_ty = Type::Function {
        from: Box::new(Type::u64()),
        to: Box::new(Type::u64()),
    };
    let decl = b.let_decl(root, "fib", fib_ty);
    let function = b.node(decl, NodeKind::Function);
    b.enter_scope();
    b.binding(function, "n", Type::u64());
    let body = b.node(function, NodeKind::Block);
    let result = b.node(body, NodeKind::BlockResult);
    let if_node = b.node(result, NodeKind::IfStatement);

    let cond = b.node(if_node, NodeKind::LessOrEq);
    b.ident(cond, "n");
    b.u64_lit(cond, 2);

    let then_block = b.node(if_node, NodeKind::Block);
    let then_result = b.node(then_block, NodeKind::BlockResult);
    b.u64_lit(then_result, 1);

    let else_block = b.node(if_node, NodeKind::Block);
    let else_result = b.node(else_block, NodeKind::BlockResult);
    let add = b.node(else_result, NodeKind::Addition);
    for delta in [1u64, 2] {
        let call = b.call(add, "fib");
        let sub = b.node(call, NodeKind::Subtraction);
        b.ident(sub, "n");
        b.u64_lit(sub, delta);
    }
    b.exit_scope();

    let print = b.print_stmt(root, "println");
    let call = b.call(print, "fib");
    b.u64_lit(call, 31);
    b
}

/// Run the same program unoptimized and optimized; both must produce
/// `expected` and leave the stack empty.
pub fn expect_output(build: impl Fn() -> Builder, expected: &str) {
    for optimize in [false, true] {
        let (vm, output) = run_with(build(), Vec::new(), optimize);
        assert_eq!(
            output, expected,
            "wrong output with optimize = {optimize}"
        );
        assert_eq!(vm.sp(), 0, "stack not empty with optimize = {optimize}");
    }
}
