//! External AST
//!
//! The tree produced by the front end (lexer/parser, then resolver and
//! typechecker — all external to this crate). Nodes live in a flat arena and
//! refer to each other by index; per-kind payloads (identifier, number,
//! string, boolean) live in side tables. Name and type scopes are index-linked
//! chains the resolver fills in; the lowerer only reads them.
//!
//! The back end consumes this tree fully annotated:
//! - every identifier use can be resolved to its declaration node,
//! - every identifier's type (and so its byte size) is known,
//! - constructor names resolve to their sum type.

use crate::types::{NumberKind, Type};
use std::collections::HashMap;

/// Index of a node in the AST arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct NodeId(pub u32);

/// Index of a name or type scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

/// Node kinds produced by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Assignment,
    Tuple,
    Block,
    BlockResult,
    Function,
    WhileLoop,
    IfStatement,
    Match,
    MatchBranch,
    Identifier,
    FunctionCall,
    Declaration,
    ModuleDeclaration,
    ImportDeclaration,
    Export,
    Reference,
    ArrayValue,
    ArrayAccess,

    // Literals
    String,
    Boolean,
    Number,

    // Type declarations
    TypeDefinition,
    Record,
    RecordElement,
    IdentifierTuple,

    // Type expressions
    TypeTuple,
    TypeAtom,
    FunctionType,
    ReferenceType,
    ArrayType,
    SumType,

    // Operators
    And,
    Or,
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulo,
    Equality,
    GreaterThan,
    GreaterOrEq,
    LessThan,
    LessOrEq,
    Not,
}

/// True for the twelve binary operator kinds.
pub fn is_binary_op(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Addition
            | NodeKind::Subtraction
            | NodeKind::Multiplication
            | NodeKind::Division
            | NodeKind::Modulo
            | NodeKind::Equality
            | NodeKind::GreaterThan
            | NodeKind::GreaterOrEq
            | NodeKind::LessThan
            | NodeKind::LessOrEq
            | NodeKind::And
            | NodeKind::Or
    )
}

pub fn is_unary_op(kind: NodeKind) -> bool {
    matches!(kind, NodeKind::Not)
}

/// Type-expression kinds: lowered to nothing, they only matter to the checker.
pub fn is_type_node(kind: NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::TypeTuple
            | NodeKind::TypeAtom
            | NodeKind::FunctionType
            | NodeKind::ReferenceType
            | NodeKind::ArrayType
            | NodeKind::SumType
            | NodeKind::Record
            | NodeKind::RecordElement
    )
}

/// Identifier payload plus the annotations resolve/typecheck and the lowerer
/// leave on it.
#[derive(Debug, Clone, Default)]
pub struct IdentData {
    pub name: String,
    /// Variable index within the enclosing function frame. Written by the
    /// lowerer at the declaration site, read back at every use site.
    pub index_in_function: Option<u32>,
    /// Whether the declaration is a function parameter.
    pub is_parameter: bool,
    /// For names bound by match patterns: `(stack label, delta from the
    /// subject's base)`. Such names address the subject bytes directly
    /// instead of a frame slot.
    pub pattern_location: Option<(u32, i32)>,
}

/// Number literal payload.
#[derive(Debug, Clone, Copy)]
pub struct NumberData {
    pub value: i64,
    pub kind: NumberKind,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    /// Index into the side table selected by `kind` (identifiers, numbers,
    /// strings, booleans). `None` for kinds without payload.
    pub data: Option<u32>,
    pub name_scope: Option<ScopeId>,
    pub type_scope: Option<ScopeId>,
}

/// A lexical name scope: maps names to their declaration nodes.
#[derive(Debug, Clone, Default)]
pub struct NameScope {
    pub parent: Option<ScopeId>,
    entries: HashMap<String, NodeId>,
}

/// A type scope: maps names to their resolved types.
#[derive(Debug, Clone, Default)]
pub struct TypeScope {
    pub parent: Option<ScopeId>,
    entries: HashMap<String, Type>,
}

/// The external AST arena.
#[derive(Debug, Default)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,

    idents: Vec<IdentData>,
    numbers: Vec<NumberData>,
    strings: Vec<String>,
    booleans: Vec<bool>,

    name_scopes: Vec<NameScope>,
    type_scopes: Vec<TypeScope>,
}

impl Ast {
    /// Create an AST whose root is a block.
    pub fn new() -> Ast {
        let mut ast = Ast::default();
        ast.root = ast.alloc(NodeKind::Block, None);
        ast
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Create a node and link it as the last child of `parent`.
    pub fn create_node(&mut self, kind: NodeKind, parent: NodeId) -> NodeId {
        let id = self.alloc(kind, Some(parent));
        self.nodes[parent.0 as usize].children.push(id);
        id
    }

    fn alloc(&mut self, kind: NodeKind, parent: Option<NodeId>) -> NodeId {
        let data = match kind {
            NodeKind::Identifier => {
                self.idents.push(IdentData::default());
                Some(self.idents.len() as u32 - 1)
            }
            NodeKind::Number => {
                self.numbers.push(NumberData {
                    value: 0,
                    kind: NumberKind::U64,
                });
                Some(self.numbers.len() as u32 - 1)
            }
            NodeKind::String => {
                self.strings.push(String::new());
                Some(self.strings.len() as u32 - 1)
            }
            NodeKind::Boolean => {
                self.booleans.push(false);
                Some(self.booleans.len() as u32 - 1)
            }
            _ => None,
        };
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent,
            children: Vec::new(),
            data,
            name_scope: None,
            type_scope: None,
        });
        id
    }

    pub fn get(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0 as usize]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        &self.nodes[id.0 as usize].children
    }

    // ------------------------------------------------------------------
    // Payload accessors
    // ------------------------------------------------------------------

    pub fn ident(&self, id: NodeId) -> &IdentData {
        let node = self.get(id);
        debug_assert_eq!(node.kind, NodeKind::Identifier);
        &self.idents[node.data.expect("identifier without payload") as usize]
    }

    pub fn ident_mut(&mut self, id: NodeId) -> &mut IdentData {
        let idx = self.get(id).data.expect("identifier without payload");
        &mut self.idents[idx as usize]
    }

    pub fn number(&self, id: NodeId) -> NumberData {
        let node = self.get(id);
        debug_assert_eq!(node.kind, NodeKind::Number);
        self.numbers[node.data.expect("number without payload") as usize]
    }

    pub fn number_mut(&mut self, id: NodeId) -> &mut NumberData {
        let idx = self.get(id).data.expect("number without payload");
        &mut self.numbers[idx as usize]
    }

    pub fn boolean(&self, id: NodeId) -> bool {
        let node = self.get(id);
        debug_assert_eq!(node.kind, NodeKind::Boolean);
        self.booleans[node.data.expect("boolean without payload") as usize]
    }

    pub fn boolean_mut(&mut self, id: NodeId) -> &mut bool {
        let idx = self.get(id).data.expect("boolean without payload");
        &mut self.booleans[idx as usize]
    }

    pub fn string(&self, id: NodeId) -> &str {
        let node = self.get(id);
        debug_assert_eq!(node.kind, NodeKind::String);
        &self.strings[node.data.expect("string without payload") as usize]
    }

    pub fn string_mut(&mut self, id: NodeId) -> &mut String {
        let idx = self.get(id).data.expect("string without payload");
        &mut self.strings[idx as usize]
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    pub fn create_name_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.name_scopes.push(NameScope {
            parent,
            entries: HashMap::new(),
        });
        ScopeId(self.name_scopes.len() as u32 - 1)
    }

    pub fn create_type_scope(&mut self, parent: Option<ScopeId>) -> ScopeId {
        self.type_scopes.push(TypeScope {
            parent,
            entries: HashMap::new(),
        });
        ScopeId(self.type_scopes.len() as u32 - 1)
    }

    /// Record that `name` is declared at `declaration` in `scope`.
    pub fn declare_name(&mut self, scope: ScopeId, name: &str, declaration: NodeId) {
        self.name_scopes[scope.0 as usize]
            .entries
            .insert(name.to_string(), declaration);
    }

    /// Record the resolved type of `name` in `scope`.
    pub fn declare_type(&mut self, scope: ScopeId, name: &str, ty: Type) {
        self.type_scopes[scope.0 as usize]
            .entries
            .insert(name.to_string(), ty);
    }

    /// Walk the scope chain for the declaration node of `name`.
    pub fn resolve_name(&self, scope: ScopeId, name: &str) -> Option<NodeId> {
        let mut current = Some(scope);
        while let Some(s) = current {
            let scope = &self.name_scopes[s.0 as usize];
            if let Some(&decl) = scope.entries.get(name) {
                return Some(decl);
            }
            current = scope.parent;
        }
        None
    }

    /// Walk the scope chain for the type of `name`.
    pub fn resolve_type(&self, scope: ScopeId, name: &str) -> Option<&Type> {
        let mut current = Some(scope);
        while let Some(s) = current {
            let scope = &self.type_scopes[s.0 as usize];
            if let Some(ty) = scope.entries.get(name) {
                return Some(ty);
            }
            current = scope.parent;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_link_nodes() {
        let mut ast = Ast::new();
        let root = ast.root();
        let decl = ast.create_node(NodeKind::Declaration, root);
        let id = ast.create_node(NodeKind::Identifier, decl);
        ast.ident_mut(id).name = "a".to_string();

        assert_eq!(ast.children(root), &[decl]);
        assert_eq!(ast.get(id).parent, Some(decl));
        assert_eq!(ast.ident(id).name, "a");
    }

    #[test]
    fn scope_chains_resolve_through_parents() {
        let mut ast = Ast::new();
        let root = ast.root();
        let decl = ast.create_node(NodeKind::Declaration, root);

        let outer = ast.create_name_scope(None);
        let inner = ast.create_name_scope(Some(outer));
        ast.declare_name(outer, "x", decl);

        assert_eq!(ast.resolve_name(inner, "x"), Some(decl));
        assert_eq!(ast.resolve_name(inner, "y"), None);

        let t_outer = ast.create_type_scope(None);
        let t_inner = ast.create_type_scope(Some(t_outer));
        ast.declare_type(t_outer, "x", Type::u64());
        assert_eq!(ast.resolve_type(t_inner, "x"), Some(&Type::u64()));
    }
}
