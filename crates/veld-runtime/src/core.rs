//! Core intermediate representation
//!
//! The stack-discipline tree between lowering and bytecode generation.
//! Control flow is explicit (labels and jumps), variables are frame offsets,
//! and every node's operand-stack effect is computable (see
//! `stack_analysis`). Nodes live in a flat arena; payloads are a tagged enum.

use crate::types::NumberKind;

/// Index of a node in the core IR arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoreId(pub u32);

/// Core node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreKind {
    Number,
    String,
    Boolean,
    Function,
    Tuple,
    Block,
    FunctionCall,
    Reference,
    Ret,
    Move,
    Push,
    Pop,
    StackAlloc,
    StackDealloc,
    Jmp,
    Jz,
    Jnz,
    Label,
    StackLabel,
    RelativeOffset,
    Variable,
    Param,
    DynamicVariable,
    DynamicParam,
    StackData,
    Nop,

    // Operators
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    And,
    Or,
    Not,
}

pub fn is_binary_op(kind: CoreKind) -> bool {
    matches!(
        kind,
        CoreKind::Add
            | CoreKind::Sub
            | CoreKind::Mul
            | CoreKind::Div
            | CoreKind::Mod
            | CoreKind::Eq
            | CoreKind::Gt
            | CoreKind::Gte
            | CoreKind::Lt
            | CoreKind::Lte
            | CoreKind::And
            | CoreKind::Or
    )
}

/// Arithmetic keeps the operand width; comparisons and logic produce one
/// boolean byte.
pub fn is_comparison_op(kind: CoreKind) -> bool {
    matches!(
        kind,
        CoreKind::Eq | CoreKind::Gt | CoreKind::Gte | CoreKind::Lt | CoreKind::Lte
    )
}

pub fn is_unary_op(kind: CoreKind) -> bool {
    matches!(kind, CoreKind::Not)
}

/// Metadata of a lowered function.
#[derive(Debug, Clone, Default)]
pub struct FunctionData {
    pub name: String,
    /// Total parameter bytes.
    pub in_size: u32,
    /// Result bytes (left in `ret` by the epilogue).
    pub out_size: u32,
    /// Total local-variable bytes allocated by the prologue.
    pub locals_size: u32,
}

/// Metadata of a call site.
#[derive(Debug, Clone, Default)]
pub struct CallData {
    pub name: String,
    pub in_size: u32,
    pub out_size: u32,
}

/// Metadata of a return point.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetData {
    pub in_size: u32,
    pub out_size: u32,
    /// Parameter plus local bytes of the enclosing function.
    pub frame_size: u32,
}

/// A frame-coordinate slot: parameters occupy `[0, in_size)`, locals follow.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarData {
    pub offset: u32,
    pub size: u32,
}

/// Per-kind payload.
#[derive(Debug, Clone, Default)]
pub enum CoreData {
    #[default]
    None,
    Number {
        value: i64,
        kind: NumberKind,
    },
    Boolean(bool),
    String(String),
    Function(FunctionData),
    Call(CallData),
    Ret(RetData),
    Var(VarData),
    /// Byte count for push/pop/alloc/dealloc nodes.
    Size(u32),
    /// Jump-label id for JMP/JZ/JNZ/LABEL.
    Label(u32),
    /// Marker id for STACK_LABEL.
    StackLabel(u32),
    /// Address relative to a stack label's recorded depth.
    RelativeOffset {
        stack_label: u32,
        delta: i32,
    },
}

#[derive(Debug, Clone)]
pub struct CoreNode {
    pub kind: CoreKind,
    pub parent: Option<CoreId>,
    pub children: Vec<CoreId>,
    /// Stack bytes this node contributes, where the lowerer records it
    /// (blocks, calls, the root).
    pub size: Option<u32>,
    pub data: CoreData,
}

/// The core IR arena. The root is a block containing the bootstrap call and
/// one FUNCTION node per compiled function.
#[derive(Debug)]
pub struct CoreAst {
    nodes: Vec<CoreNode>,
    root: CoreId,
}

impl CoreAst {
    pub fn new(root_kind: CoreKind) -> CoreAst {
        let root_node = CoreNode {
            kind: root_kind,
            parent: None,
            children: Vec::new(),
            size: None,
            data: CoreData::None,
        };
        CoreAst {
            nodes: vec![root_node],
            root: CoreId(0),
        }
    }

    pub fn root(&self) -> CoreId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Create a node and link it as the last child of `parent`.
    pub fn create_node(&mut self, kind: CoreKind, parent: CoreId) -> CoreId {
        let id = CoreId(self.nodes.len() as u32);
        self.nodes.push(CoreNode {
            kind,
            parent: Some(parent),
            children: Vec::new(),
            size: None,
            data: CoreData::None,
        });
        self.nodes[parent.0 as usize].children.push(id);
        id
    }

    /// Create a node with no parent; link it later with `link_child`.
    pub fn create_detached(&mut self, kind: CoreKind) -> CoreId {
        let id = CoreId(self.nodes.len() as u32);
        self.nodes.push(CoreNode {
            kind,
            parent: None,
            children: Vec::new(),
            size: None,
            data: CoreData::None,
        });
        id
    }

    /// Attach an existing (detached) node as the last child of `parent`.
    pub fn link_child(&mut self, parent: CoreId, child: CoreId) {
        self.nodes[child.0 as usize].parent = Some(parent);
        self.nodes[parent.0 as usize].children.push(child);
    }

    pub fn get(&self, id: CoreId) -> &CoreNode {
        &self.nodes[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: CoreId) -> &mut CoreNode {
        &mut self.nodes[id.0 as usize]
    }

    pub fn children(&self, id: CoreId) -> &[CoreId] {
        &self.nodes[id.0 as usize].children
    }

    pub fn parent(&self, id: CoreId) -> Option<CoreId> {
        self.nodes[id.0 as usize].parent
    }

    /// Pre-order walk of the subtree rooted at `id`.
    pub fn walk(&self, id: CoreId, f: &mut impl FnMut(CoreId, &CoreNode)) {
        let node = self.get(id);
        f(id, node);
        for &child in &node.children {
            self.walk(child, f);
        }
    }

    // ------------------------------------------------------------------
    // Typed payload accessors; each panics only on lowerer bugs, so they
    // read as infallible at use sites.
    // ------------------------------------------------------------------

    pub fn label_id(&self, id: CoreId) -> u32 {
        match &self.get(id).data {
            CoreData::Label(l) => *l,
            other => panic!("expected label data, found {:?}", other),
        }
    }

    pub fn stack_label_id(&self, id: CoreId) -> u32 {
        match &self.get(id).data {
            CoreData::StackLabel(l) => *l,
            other => panic!("expected stack-label data, found {:?}", other),
        }
    }

    pub fn size_of(&self, id: CoreId) -> u32 {
        match &self.get(id).data {
            CoreData::Size(s) => *s,
            other => panic!("expected size data, found {:?}", other),
        }
    }

    pub fn var_data(&self, id: CoreId) -> VarData {
        match &self.get(id).data {
            CoreData::Var(v) => *v,
            other => panic!("expected variable data, found {:?}", other),
        }
    }

    pub fn function_data(&self, id: CoreId) -> &FunctionData {
        match &self.get(id).data {
            CoreData::Function(f) => f,
            other => panic!("expected function data, found {:?}", other),
        }
    }

    pub fn call_data(&self, id: CoreId) -> &CallData {
        match &self.get(id).data {
            CoreData::Call(c) => c,
            other => panic!("expected call data, found {:?}", other),
        }
    }

    pub fn ret_data(&self, id: CoreId) -> RetData {
        match &self.get(id).data {
            CoreData::Ret(r) => *r,
            other => panic!("expected return data, found {:?}", other),
        }
    }

    /// Highest jump-label id in the tree, so later label allocation can stay
    /// clear of it. `None` when the tree has no labels.
    pub fn max_label_id(&self) -> Option<u32> {
        let mut max = None;
        self.walk(self.root, &mut |_, node| {
            if let CoreData::Label(l) = node.data {
                max = Some(max.map_or(l, |m: u32| m.max(l)));
            }
        });
        max
    }
}
