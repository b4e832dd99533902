//! Operand-stack depth analysis
//!
//! For every core IR node inside one function, computes the stack depth
//! immediately before and after the node's evaluation. The bytecode generator
//! turns these depths into sp-relative addresses for frame slots and into pop
//! sizes at return points.
//!
//! Depth is counted in frame coordinates: a function body starts at
//! `in_size + locals_size`; pushes and allocations raise it, pops and
//! deallocations lower it. A LABEL's depth must agree with the depth at
//! every jump that targets it; disagreement is a compiler bug and reported
//! as an error.

use crate::core::{is_binary_op, is_unary_op, CoreAst, CoreId, CoreKind};
use crate::error::CompileError;
use std::collections::HashMap;

const BOOL_SIZE: u32 = 1;

/// Depths before and after every analyzed node of one function.
#[derive(Debug, Default, Clone)]
pub struct StackAnalysis {
    pre: HashMap<CoreId, u32>,
    post: HashMap<CoreId, u32>,
}

impl StackAnalysis {
    /// Whether the node was reached by the analysis (address-source children
    /// of push/pop nodes are not).
    pub fn tracked(&self, id: CoreId) -> bool {
        self.pre.contains_key(&id) && self.post.contains_key(&id)
    }

    pub fn pre_depth(&self, id: CoreId) -> u32 {
        self.pre[&id]
    }

    pub fn post_depth(&self, id: CoreId) -> u32 {
        self.post[&id]
    }

    /// Net stack bytes contributed by the node (post − pre).
    pub fn depth_change(&self, id: CoreId) -> i64 {
        i64::from(self.post[&id]) - i64::from(self.pre[&id])
    }
}

/// Analyze one FUNCTION node of the core IR.
///
/// The start depth is the function's `in_size + locals_size`; the walk covers
/// the whole body but does not descend into nested FUNCTION nodes, which have
/// frames of their own.
pub fn analyze_function(function: CoreId, ast: &CoreAst) -> Result<StackAnalysis, CompileError> {
    let node = ast.get(function);
    if node.kind != CoreKind::Function {
        return Err(CompileError::StackAnalysis(format!(
            "stack analysis must start at a function, found {:?}",
            node.kind
        )));
    }

    let data = ast.function_data(function);
    let mut analyzer = Analyzer {
        ast,
        function,
        result: StackAnalysis::default(),
    };
    analyzer
        .result
        .post
        .insert(function, data.in_size + data.locals_size);

    let body = node.children.first().copied().ok_or_else(|| {
        CompileError::StackAnalysis(format!("function {:?} has no body", data.name))
    })?;
    analyzer.analyze(body)?;
    Ok(analyzer.result)
}

struct Analyzer<'a> {
    ast: &'a CoreAst,
    function: CoreId,
    result: StackAnalysis,
}

impl<'a> Analyzer<'a> {
    /// The node evaluated immediately before `id`: the previous sibling, or
    /// recursively the parent's predecessor.
    fn predecessor(&self, id: CoreId) -> Result<CoreId, CompileError> {
        let parent = self.ast.parent(id).ok_or_else(|| {
            CompileError::StackAnalysis("node has no predecessor in this function".into())
        })?;
        let siblings = self.ast.children(parent);
        let pos = siblings.iter().position(|&c| c == id).expect("orphan node");
        if pos > 0 {
            Ok(siblings[pos - 1])
        } else {
            self.predecessor(parent)
        }
    }

    /// Depth in effect just before `id` evaluates.
    fn predecessor_depth(&self, id: CoreId) -> Result<u32, CompileError> {
        let parent = self.ast.parent(id).ok_or_else(|| {
            CompileError::StackAnalysis("node above the function root".into())
        })?;

        if self.ast.get(parent).kind == CoreKind::Function {
            return Ok(self.result.post[&parent]);
        }

        let siblings = self.ast.children(parent);
        let pos = siblings.iter().position(|&c| c == id).expect("orphan node");
        if pos > 0 {
            let prev = siblings[pos - 1];
            self.result.post.get(&prev).copied().ok_or_else(|| {
                CompileError::StackAnalysis(format!(
                    "depth of predecessor {:?} is unknown",
                    self.ast.get(prev).kind
                ))
            })
        } else {
            self.predecessor_depth(parent)
        }
    }

    fn shrink(&self, depth: u32, by: u32, what: &str) -> Result<u32, CompileError> {
        depth.checked_sub(by).ok_or_else(|| {
            CompileError::StackAnalysis(format!(
                "{what} of {by} bytes below an operand stack of depth {depth}"
            ))
        })
    }

    fn analyze(&mut self, id: CoreId) -> Result<(), CompileError> {
        let node = self.ast.get(id);
        let kind = node.kind;

        match kind {
            CoreKind::Nop => {
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);
                self.result.post.insert(id, pre);
            }
            CoreKind::Number => {
                let pre = self.predecessor_depth(id)?;
                let size = match node.data {
                    crate::core::CoreData::Number { kind, .. } => kind.byte_size(),
                    _ => {
                        return Err(CompileError::StackAnalysis(
                            "number node without number data".into(),
                        ))
                    }
                };
                self.result.pre.insert(id, pre);
                self.result.post.insert(id, pre + size);
            }
            CoreKind::Boolean => {
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);
                self.result.post.insert(id, pre + BOOL_SIZE);
            }
            CoreKind::String | CoreKind::Reference => {
                return Err(CompileError::StackAnalysis(format!(
                    "{kind:?} values are not supported by the back end"
                )));
            }
            CoreKind::Function => {
                // A nested function definition has no stack effect here; its
                // body is analyzed separately with its own frame.
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);
                self.result.post.insert(id, pre);
            }
            CoreKind::Block | CoreKind::Tuple => {
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);
                for &child in &node.children {
                    self.analyze(child)?;
                }
                let post = match node.children.last() {
                    Some(last) => self.result.post[last],
                    None => pre,
                };
                self.result.post.insert(id, post);
            }
            CoreKind::FunctionCall => {
                let pre = self.predecessor_depth(id)?;
                let out_size = self.ast.call_data(id).out_size;
                self.result.pre.insert(id, pre);
                // Argument pushes are consumed by the callee; the call's net
                // effect is its result.
                self.result.post.insert(id, pre + out_size);
                for &child in &node.children {
                    self.analyze(child)?;
                }
            }
            CoreKind::Ret => {
                let pre = self.predecessor_depth(id)?;
                let in_size = self.ast.ret_data(id).in_size;
                self.result.pre.insert(id, pre);
                let post = self.shrink(pre, in_size, "return")?;
                self.result.post.insert(id, post);
                for &child in &node.children {
                    self.analyze(child)?;
                }
            }
            CoreKind::Push | CoreKind::Move => {
                let pre = self.predecessor_depth(id)?;
                let size = self.ast.size_of(id);
                self.result.pre.insert(id, pre);
                let post = if self.source_is_dynamic(id) {
                    // Dynamic access consumes the 8-byte index on top.
                    self.shrink(pre, 8, "dynamic push index")? + size
                } else {
                    pre + size
                };
                self.result.post.insert(id, post);
            }
            CoreKind::Pop => {
                let pre = self.predecessor_depth(id)?;
                let size = self.ast.size_of(id);
                self.result.pre.insert(id, pre);
                let post = if self.source_is_dynamic(id) {
                    let after_index = self.shrink(pre, 8, "dynamic pop index")?;
                    self.shrink(after_index, size, "pop")?
                } else {
                    self.shrink(pre, size, "pop")?
                };
                self.result.post.insert(id, post);
            }
            CoreKind::StackAlloc => {
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);
                self.result.post.insert(id, pre + self.ast.size_of(id));
            }
            CoreKind::StackDealloc => {
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);
                let post = self.shrink(pre, self.ast.size_of(id), "stack dealloc")?;
                self.result.post.insert(id, post);
            }
            CoreKind::Jmp => {
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);
                self.check_or_set_post(id, pre)?;
            }
            CoreKind::Jz | CoreKind::Jnz => {
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);
                let post = self.shrink(pre, BOOL_SIZE, "conditional jump")?;
                self.check_or_set_post(id, post)?;
            }
            CoreKind::Label => self.analyze_label(id)?,
            CoreKind::StackLabel => {
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);
                self.result.post.insert(id, pre);
            }
            _ if is_binary_op(kind) => {
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);

                let children = self.ast.children(id);
                if children.len() != 2 {
                    return Err(CompileError::StackAnalysis(format!(
                        "binary operator {kind:?} with {} operands",
                        children.len()
                    )));
                }
                let (lhs, rhs) = (children[0], children[1]);
                self.analyze(lhs)?;
                self.analyze(rhs)?;

                let post = match kind {
                    CoreKind::Add
                    | CoreKind::Sub
                    | CoreKind::Mul
                    | CoreKind::Div
                    | CoreKind::Mod => self.result.post[&lhs],
                    _ => pre + BOOL_SIZE,
                };
                self.result.post.insert(id, post);
            }
            _ if is_unary_op(kind) => {
                let pre = self.predecessor_depth(id)?;
                self.result.pre.insert(id, pre);
                for &child in &node.children {
                    self.analyze(child)?;
                }
                self.result.post.insert(id, pre + BOOL_SIZE);
            }
            _ => {
                return Err(CompileError::StackAnalysis(format!(
                    "cannot compute a stack depth for {kind:?}"
                )));
            }
        }

        Ok(())
    }

    /// True when the address source of a PUSH/MOVE/POP is a dynamic
    /// (index-on-stack) slot.
    fn source_is_dynamic(&self, id: CoreId) -> bool {
        self.ast
            .children(id)
            .first()
            .map(|&c| {
                matches!(
                    self.ast.get(c).kind,
                    CoreKind::DynamicVariable | CoreKind::DynamicParam
                )
            })
            .unwrap_or(false)
    }

    /// Record a jump's post depth, checking against a depth a LABEL may have
    /// already propagated onto it.
    fn check_or_set_post(&mut self, id: CoreId, post: u32) -> Result<(), CompileError> {
        if let Some(&known) = self.result.post.get(&id) {
            if known != post {
                return Err(CompileError::StackAnalysis(format!(
                    "jump depth {post} disagrees with label-propagated depth {known}"
                )));
            }
        }
        self.result.post.insert(id, post);
        Ok(())
    }

    /// A label's depth is unified across its fall-through predecessor and
    /// every jump targeting it.
    fn analyze_label(&mut self, id: CoreId) -> Result<(), CompileError> {
        let label = self.ast.label_id(id);

        // Fall-through entry: if the node before the label is not a jump, the
        // label is reached at the predecessor's depth. A label at the very
        // start of a function has no predecessor node; it is reached at the
        // frame's start depth.
        let prev_is_jump = match self.predecessor(id) {
            Ok(prev) => matches!(
                self.ast.get(prev).kind,
                CoreKind::Jmp | CoreKind::Jz | CoreKind::Jnz
            ),
            Err(_) => false,
        };
        if !prev_is_jump {
            let depth = self.predecessor_depth(id)?;
            self.result.post.insert(id, depth);
        }

        // Unify with every jump in this function that targets the label.
        let mut jumps = Vec::new();
        self.ast.walk(self.function, &mut |jump_id, node| {
            if matches!(node.kind, CoreKind::Jmp | CoreKind::Jz | CoreKind::Jnz)
                && self.ast.label_id(jump_id) == label
            {
                jumps.push(jump_id);
            }
        });

        for jump in jumps {
            let jump_depth = self.result.post.get(&jump).copied();
            let label_depth = self.result.post.get(&id).copied();
            match (jump_depth, label_depth) {
                (Some(j), None) => {
                    self.result.post.insert(id, j);
                }
                (None, Some(l)) => {
                    self.result.post.insert(jump, l);
                }
                (Some(j), Some(l)) if j != l => {
                    return Err(CompileError::StackAnalysis(format!(
                        "label {label} reached with depth {l} but jumped to with depth {j}"
                    )));
                }
                (Some(_), Some(_)) => {}
                (None, None) => {
                    return Err(CompileError::StackAnalysis(format!(
                        "depth at label {label} cannot be determined"
                    )));
                }
            }
        }

        if self.result.post.get(&id).is_none() {
            return Err(CompileError::StackAnalysis(format!(
                "label {label} has no targeting jump and no fall-through depth"
            )));
        }

        let pre = self.predecessor_depth(id)?;
        self.result.pre.insert(id, pre);
        Ok(())
    }
}
