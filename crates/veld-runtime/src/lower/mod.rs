//! Lowering: external AST → core IR
//!
//! Turns the resolved, typechecked surface tree into the stack-discipline
//! core tree:
//! - structured control flow becomes labels and jumps,
//! - pattern matches become comparison trees over the match subject,
//! - variables become frame offsets (parameters first, locals after),
//! - `and`/`or` short-circuit through conditional jumps,
//! - sum type definitions grow one constructor function per variant.
//!
//! Expression lowering lives in `expr`, match/pattern lowering in `pattern`.
//! Statement forms and the per-function bookkeeping live here.

mod expr;
mod pattern;

use crate::ast::{self, Ast, NodeId, NodeKind};
use crate::core::{CallData, CoreAst, CoreData, CoreId, CoreKind, FunctionData, RetData, VarData};
use crate::error::CompileError;
use std::collections::HashMap;

/// Result of lowering one node: how many bytes it left on the operand stack,
/// or nothing for statements.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Lowered {
    stack_bytes: Option<u32>,
}

impl Lowered {
    fn none() -> Lowered {
        Lowered { stack_bytes: None }
    }

    fn stack(bytes: u32) -> Lowered {
        Lowered {
            stack_bytes: Some(bytes),
        }
    }

    fn on_stack(&self) -> bool {
        self.stack_bytes.is_some()
    }

    fn bytes(&self) -> u32 {
        self.stack_bytes.unwrap_or(0)
    }

    fn expect_stack(&self, what: &str) -> Result<u32, CompileError> {
        self.stack_bytes
            .ok_or_else(|| CompileError::Lower(format!("{what} must produce a stack value")))
    }
}

/// Frame bookkeeping for the function currently being lowered.
#[derive(Debug, Default, Clone)]
pub(crate) struct FunctionContext {
    next_index: u32,
    total_var_size: u32,
    total_param_size: u32,
    /// variable index → (offset from frame base, byte size)
    positions: HashMap<u32, (u32, u32)>,
    next_stack_label: u32,
}

impl FunctionContext {
    fn alloc_variable(&mut self, size: u32) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        self.positions
            .insert(index, (self.total_var_size + self.total_param_size, size));
        self.total_var_size += size;
        index
    }

    fn alloc_param(&mut self, size: u32) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        self.positions
            .insert(index, (self.total_var_size + self.total_param_size, size));
        self.total_param_size += size;
        index
    }

    fn new_stack_label(&mut self) -> u32 {
        let id = self.next_stack_label;
        self.next_stack_label += 1;
        id
    }
}

pub(crate) struct Lowerer<'a> {
    pub(crate) ast: &'a mut Ast,
    pub(crate) core: CoreAst,
    /// Jump labels are unique across the whole program.
    next_label: u32,
    pub(crate) fun: FunctionContext,
}

/// Lower a resolved, typechecked AST into core IR.
///
/// The result is a block holding a bootstrap call to `main` followed by one
/// FUNCTION node per function in the program; top-level statements form the
/// body of `main`.
pub fn lower(ast: &mut Ast) -> Result<CoreAst, CompileError> {
    let root = ast.root();
    if ast.get(root).kind != NodeKind::Block {
        return Err(CompileError::Lower("AST root must be a block".into()));
    }

    let mut lowerer = Lowerer {
        ast,
        core: CoreAst::new(CoreKind::Block),
        next_label: 0,
        fun: FunctionContext::default(),
    };
    let core_root = lowerer.core.root();
    lowerer.core.get_mut(core_root).size = Some(0);

    // Bootstrap: the executable entry calls main with no arguments.
    let bootstrap = lowerer.core.create_node(CoreKind::FunctionCall, core_root);
    lowerer.core.get_mut(bootstrap).data = CoreData::Call(CallData {
        name: "main".into(),
        in_size: 0,
        out_size: 0,
    });
    lowerer.core.get_mut(bootstrap).size = Some(0);
    lowerer.core.create_node(CoreKind::Tuple, bootstrap);

    let main = lowerer.core.create_node(CoreKind::Function, core_root);
    lowerer.core.get_mut(main).data = CoreData::Function(FunctionData {
        name: "main".into(),
        in_size: 0,
        out_size: 0,
        locals_size: 0,
    });
    let main_block = lowerer.core.create_node(CoreKind::Block, main);
    lowerer.core.get_mut(main_block).size = Some(0);

    let children: Vec<NodeId> = lowerer.ast.children(root).to_vec();
    for child in children {
        let result = lowerer.lower_node(main_block, child)?;
        if result.on_stack() && result.bytes() > 0 {
            // Top-level expression statements discard their value.
            let dealloc = lowerer.core.create_node(CoreKind::StackDealloc, main_block);
            lowerer.core.get_mut(dealloc).data = CoreData::Size(result.bytes());
        }
    }

    let locals_size = lowerer.fun.total_var_size;
    if let CoreData::Function(data) = &mut lowerer.core.get_mut(main).data {
        data.locals_size = locals_size;
    }

    let ret = lowerer.core.create_node(CoreKind::Ret, main_block);
    lowerer.core.get_mut(ret).data = CoreData::Ret(RetData {
        in_size: 0,
        out_size: 0,
        frame_size: locals_size,
    });
    lowerer.core.create_node(CoreKind::Tuple, ret);

    Ok(lowerer.core)
}

impl<'a> Lowerer<'a> {
    pub(crate) fn new_label(&mut self) -> u32 {
        let id = self.next_label;
        self.next_label += 1;
        id
    }

    /// (offset, size) of a frame slot by variable index.
    pub(crate) fn slot(&self, index: u32) -> Result<(u32, u32), CompileError> {
        self.fun.positions.get(&index).copied().ok_or_else(|| {
            CompileError::Lower("variable is not allocated in the current frame".into())
        })
    }

    pub(crate) fn lower_node(&mut self, parent: CoreId, id: NodeId) -> Result<Lowered, CompileError> {
        let kind = self.ast.get(id).kind;
        match kind {
            NodeKind::Assignment => self.lower_assignment(parent, id),
            NodeKind::Tuple => self.lower_tuple(parent, id),
            NodeKind::Block => self.lower_block(parent, id),
            NodeKind::BlockResult => self.lower_block_result(parent, id),
            NodeKind::Function => self.lower_function(parent, id),
            NodeKind::WhileLoop => self.lower_while(parent, id),
            NodeKind::IfStatement => self.lower_if(parent, id),
            NodeKind::Match => self.lower_match(parent, id),
            NodeKind::Identifier => self.lower_identifier(parent, id),
            NodeKind::String => Err(CompileError::Lower(
                "string literals are not lowerable yet".into(),
            )),
            NodeKind::Boolean => self.lower_boolean(parent, id),
            NodeKind::Number => self.lower_number(parent, id),
            NodeKind::FunctionCall => self.lower_call(parent, id),
            NodeKind::ArrayAccess => self.lower_array_access(parent, id),
            NodeKind::ArrayValue => self.lower_array_value(parent, id),
            NodeKind::ModuleDeclaration | NodeKind::ImportDeclaration | NodeKind::Export => {
                Ok(Lowered::none())
            }
            NodeKind::Declaration => self.lower_declaration(parent, id),
            NodeKind::TypeDefinition => self.lower_type_definition(parent, id),
            NodeKind::IdentifierTuple => Err(CompileError::Lower(
                "identifier tuple outside a declaration".into(),
            )),
            NodeKind::Reference => Err(CompileError::Lower(
                "references are not lowerable yet".into(),
            )),
            NodeKind::MatchBranch => Err(CompileError::Lower(
                "match branch outside a match".into(),
            )),
            _ if ast::is_binary_op(kind) => self.lower_binary_op(parent, id),
            _ if ast::is_unary_op(kind) => self.lower_unary_op(parent, id),
            _ if ast::is_type_node(kind) => Ok(Lowered::none()),
            _ => Err(CompileError::Lower(format!("cannot lower {kind:?}"))),
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// `lhs = rhs`: evaluate the value, pop it into the target slot (or
    /// through a dynamic index for `a[i] = rhs`).
    fn lower_assignment(&mut self, parent: CoreId, id: NodeId) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() != 2 {
            return Err(CompileError::Lower("malformed assignment".into()));
        }
        let (target, value) = (children[0], children[1]);

        let rhs = self.lower_node(parent, value)?;
        rhs.expect_stack("assignment right-hand side")?;

        match self.ast.get(target).kind {
            NodeKind::Identifier => {
                let (index, is_param) = self.resolved_slot_of(target)?;
                let (offset, size) = self.slot(index)?;

                let pop = self.core.create_node(CoreKind::Pop, parent);
                self.core.get_mut(pop).data = CoreData::Size(size);
                let to = self.core.create_node(
                    if is_param {
                        CoreKind::Param
                    } else {
                        CoreKind::Variable
                    },
                    pop,
                );
                self.core.get_mut(to).data = CoreData::Var(VarData { offset, size });
                Ok(Lowered::none())
            }
            NodeKind::ArrayAccess => self.lower_dynamic_store(parent, target),
            other => Err(CompileError::Lower(format!(
                "cannot assign through {other:?}"
            ))),
        }
    }

    /// `let lhs : T = rhs`, covering plain variables, tuple destructuring,
    /// and function declarations.
    fn lower_declaration(&mut self, parent: CoreId, id: NodeId) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() != 3 {
            return Err(CompileError::Lower("malformed declaration".into()));
        }
        let (lhs, type_node, rhs) = (children[0], children[1], children[2]);

        self.lower_node(parent, type_node)?;
        let rhs_result = self.lower_node(parent, rhs)?;

        let lhs_kind = self.ast.get(lhs).kind;
        let rhs_kind = self.ast.get(rhs).kind;

        if lhs_kind == NodeKind::Identifier && rhs_kind == NodeKind::Function {
            // The FUNCTION core node was just created as the last child of
            // `parent`; name it and record its signature from the declared
            // function type.
            let name = self.ast.ident(lhs).name.clone();
            let scope = self.ast.get(lhs).type_scope.ok_or_else(|| {
                CompileError::Lower(format!("identifier {name} has no type scope"))
            })?;
            let ty = self
                .ast
                .resolve_type(scope, &name)
                .ok_or_else(|| CompileError::Lower(format!("type of {name} is unresolved")))?
                .clone();
            let crate::types::Type::Function { from, to } = ty else {
                return Err(CompileError::Lower(format!(
                    "{name} is declared as a function but has a non-function type"
                )));
            };

            let fn_node = *self
                .core
                .children(parent)
                .last()
                .expect("function lowering created a node");
            if let CoreData::Function(data) = &mut self.core.get_mut(fn_node).data {
                data.name = name;
                data.in_size = from.byte_size();
                data.out_size = to.byte_size();
            } else {
                return Err(CompileError::Lower(
                    "function declaration did not lower to a function".into(),
                ));
            }
            return Ok(Lowered::none());
        }

        if lhs_kind == NodeKind::Identifier {
            let size = rhs_result.expect_stack("declaration right-hand side")?;
            let index = self.fun.alloc_variable(size);
            self.ast.ident_mut(lhs).index_in_function = Some(index);
            let (offset, _) = self.slot(index)?;

            let pop = self.core.create_node(CoreKind::Pop, parent);
            self.core.get_mut(pop).data = CoreData::Size(size);
            let var = self.core.create_node(CoreKind::Variable, pop);
            self.core.get_mut(var).data = CoreData::Var(VarData { offset, size });
            return Ok(Lowered::none());
        }

        if lhs_kind == NodeKind::IdentifierTuple {
            // One variable per element, popped right-to-left: the rightmost
            // element is on top of the stack.
            rhs_result.expect_stack("declaration right-hand side")?;
            let ids = self.ast.children(lhs).to_vec();
            let mut indices = Vec::with_capacity(ids.len());
            for &element in &ids {
                if self.ast.get(element).kind != NodeKind::Identifier {
                    return Err(CompileError::Lower(
                        "tuple declaration element is not an identifier".into(),
                    ));
                }
                let size = self.type_size_of_identifier(element)?;
                let index = self.fun.alloc_variable(size);
                self.ast.ident_mut(element).index_in_function = Some(index);
                indices.push(index);
            }

            for &index in indices.iter().rev() {
                let (offset, size) = self.slot(index)?;
                let pop = self.core.create_node(CoreKind::Pop, parent);
                self.core.get_mut(pop).data = CoreData::Size(size);
                let var = self.core.create_node(CoreKind::Variable, pop);
                self.core.get_mut(var).data = CoreData::Var(VarData { offset, size });
            }
            return Ok(Lowered::none());
        }

        Err(CompileError::Lower(
            "declaration left-hand side must be an identifier or identifier tuple".into(),
        ))
    }

    fn lower_block(&mut self, parent: CoreId, id: NodeId) -> Result<Lowered, CompileError> {
        let block = self.core.create_node(CoreKind::Block, parent);
        self.core.get_mut(block).size = Some(0);

        let children = self.ast.children(id).to_vec();
        let last = children.len().checked_sub(1);
        for (i, &child) in children.iter().enumerate() {
            let kind = self.ast.get(child).kind;
            let result = self.lower_node(block, child)?;

            if kind == NodeKind::BlockResult {
                if Some(i) != last {
                    return Err(CompileError::Lower(
                        "block result must be the last statement".into(),
                    ));
                }
                let bytes = result.expect_stack("block result")?;
                if bytes > 8 {
                    return Err(CompileError::Lower(format!(
                        "block result of {bytes} bytes does not fit a register"
                    )));
                }
                self.core.get_mut(block).size = Some(bytes);
            } else if result.on_stack() && result.bytes() > 0 {
                // Discard intermediate values so the block is depth-neutral.
                let dealloc = self.core.create_node(CoreKind::StackDealloc, block);
                self.core.get_mut(dealloc).data = CoreData::Size(result.bytes());
            }
        }

        let size = self.core.get(block).size.unwrap_or(0);
        Ok(Lowered::stack(size))
    }

    fn lower_block_result(&mut self, parent: CoreId, id: NodeId) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() != 1 {
            return Err(CompileError::Lower("malformed block result".into()));
        }
        self.lower_node(parent, children[0])
    }

    /// `\params => body`
    fn lower_function(&mut self, parent: CoreId, id: NodeId) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() != 2 {
            return Err(CompileError::Lower("malformed function".into()));
        }
        let (params, body) = (children[0], children[1]);

        let saved = std::mem::take(&mut self.fun);

        let mut in_size = 0;
        match self.ast.get(params).kind {
            NodeKind::Identifier => {
                let size = self.type_size_of_identifier(params)?;
                let index = self.fun.alloc_param(size);
                let data = self.ast.ident_mut(params);
                data.index_in_function = Some(index);
                data.is_parameter = true;
                in_size = size;
            }
            NodeKind::IdentifierTuple => {
                for element in self.ast.children(params).to_vec() {
                    let size = self.type_size_of_identifier(element)?;
                    let index = self.fun.alloc_param(size);
                    let data = self.ast.ident_mut(element);
                    data.index_in_function = Some(index);
                    data.is_parameter = true;
                    in_size += size;
                }
            }
            other => {
                return Err(CompileError::Lower(format!(
                    "invalid parameter node {other:?}"
                )))
            }
        }

        let function = self.core.create_node(CoreKind::Function, parent);
        self.core.get_mut(function).data = CoreData::Function(FunctionData {
            name: String::new(), // named by the enclosing declaration
            in_size,
            out_size: 0,
            locals_size: 0,
        });

        let ret = self.core.create_node(CoreKind::Ret, function);
        let block = self.core.create_node(CoreKind::Block, ret);
        self.core.get_mut(block).size = Some(0);

        let body_result = self.lower_node(block, body)?;
        let out_size = body_result.expect_stack("function body")?;
        self.core.get_mut(block).size = Some(out_size);

        let locals_size = self.fun.total_var_size;
        let frame_size = locals_size + self.fun.total_param_size;
        if let CoreData::Function(data) = &mut self.core.get_mut(function).data {
            data.out_size = out_size;
            data.locals_size = locals_size;
        }
        self.core.get_mut(ret).data = CoreData::Ret(RetData {
            in_size,
            out_size,
            frame_size,
        });

        self.fun = saved;
        Ok(Lowered::none())
    }

    fn lower_while(&mut self, parent: CoreId, id: NodeId) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() != 2 {
            return Err(CompileError::Lower("malformed while loop".into()));
        }
        let (test, body) = (children[0], children[1]);

        let test_label = self.new_label();
        let after_label = self.new_label();

        let lbl_test = self.core.create_node(CoreKind::Label, parent);
        self.core.get_mut(lbl_test).data = CoreData::Label(test_label);

        let test_result = self.lower_node(parent, test)?;
        if test_result.bytes() != 1 {
            return Err(CompileError::Lower(
                "while condition must be a single boolean byte".into(),
            ));
        }
        let jz = self.core.create_node(CoreKind::Jz, parent);
        self.core.get_mut(jz).data = CoreData::Label(after_label);

        let body_result = self.lower_node(parent, body)?;
        if body_result.bytes() != 0 {
            return Err(CompileError::Lower(
                "while body must not leave values on the stack".into(),
            ));
        }
        let jmp = self.core.create_node(CoreKind::Jmp, parent);
        self.core.get_mut(jmp).data = CoreData::Label(test_label);

        let lbl_after = self.core.create_node(CoreKind::Label, parent);
        self.core.get_mut(lbl_after).data = CoreData::Label(after_label);

        Ok(Lowered::none())
    }

    /// If/elseif/else chain sharing one join label. Every arm must push the
    /// same number of bytes.
    fn lower_if(&mut self, parent: CoreId, id: NodeId) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() < 2 {
            return Err(CompileError::Lower("malformed if statement".into()));
        }
        let has_else = children.len() % 2 == 1;
        let after_label = self.new_label();

        let mut size: Option<u32> = None;
        let mut i = 0;
        while i + 1 < children.len() {
            let arm_false = self.new_label();

            let test_result = self.lower_node(parent, children[i])?;
            if test_result.bytes() != 1 {
                return Err(CompileError::Lower(
                    "if condition must be a single boolean byte".into(),
                ));
            }

            let jz = self.core.create_node(CoreKind::Jz, parent);
            self.core.get_mut(jz).data = CoreData::Label(arm_false);

            let body = self.lower_node(parent, children[i + 1])?;
            match size {
                None => size = Some(body.bytes()),
                Some(s) if s != body.bytes() => {
                    return Err(CompileError::Lower(format!(
                        "if branches disagree on result size ({s} vs {})",
                        body.bytes()
                    )))
                }
                Some(_) => {}
            }

            let jmp = self.core.create_node(CoreKind::Jmp, parent);
            self.core.get_mut(jmp).data = CoreData::Label(after_label);

            let lbl = self.core.create_node(CoreKind::Label, parent);
            self.core.get_mut(lbl).data = CoreData::Label(arm_false);

            i += 2;
        }

        if has_else {
            let body = self.lower_node(parent, children[children.len() - 1])?;
            if size != Some(body.bytes()) {
                return Err(CompileError::Lower(format!(
                    "else branch result size {} disagrees with the other arms",
                    body.bytes()
                )));
            }
        } else if size != Some(0) {
            return Err(CompileError::Lower(
                "if without else must not produce a value".into(),
            ));
        }

        let lbl_after = self.core.create_node(CoreKind::Label, parent);
        self.core.get_mut(lbl_after).data = CoreData::Label(after_label);

        Ok(Lowered::stack(size.unwrap_or(0)))
    }

    /// Sum type definitions produce one constructor function per variant;
    /// other type definitions produce an identity constructor.
    fn lower_type_definition(&mut self, parent: CoreId, id: NodeId) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() != 2 {
            return Err(CompileError::Lower("malformed type definition".into()));
        }
        let name_node = children[0];
        let name = self.ast.ident(name_node).name.clone();
        let scope = self.ast.get(name_node).type_scope.ok_or_else(|| {
            CompileError::Lower(format!("type {name} has no type scope"))
        })?;
        let ty = self
            .ast
            .resolve_type(scope, &name)
            .ok_or_else(|| CompileError::Lower(format!("type {name} is unresolved")))?
            .clone();

        match &ty {
            crate::types::Type::Sum(variants) => {
                let sum_size = ty.byte_size();
                if sum_size > 8 {
                    return Err(CompileError::Lower(format!(
                        "sum type {name} of {sum_size} bytes does not fit a register"
                    )));
                }
                let variants = variants.clone();
                for (tag, (ctor_name, payload)) in variants.iter().enumerate() {
                    self.emit_constructor(
                        parent,
                        ctor_name,
                        tag as u32,
                        payload.byte_size(),
                        sum_size,
                    )?;
                }
            }
            _ => {
                let size = ty.byte_size();
                if size > 8 {
                    return Err(CompileError::Lower(format!(
                        "constructor for {name} of {size} bytes does not fit a register"
                    )));
                }
                self.emit_identity_constructor(parent, &name, size)?;
            }
        }

        Ok(Lowered::none())
    }

    /// A variant constructor takes the payload on the stack and returns
    /// `(u8 tag, payload, zero padding)` so every variant has the sum's size.
    fn emit_constructor(
        &mut self,
        parent: CoreId,
        name: &str,
        tag: u32,
        payload_size: u32,
        sum_size: u32,
    ) -> Result<(), CompileError> {
        let saved = std::mem::take(&mut self.fun);
        let param_index = self.fun.alloc_param(payload_size);

        let function = self.core.create_node(CoreKind::Function, parent);
        self.core.get_mut(function).data = CoreData::Function(FunctionData {
            name: name.to_string(),
            in_size: payload_size,
            out_size: sum_size,
            locals_size: 0,
        });

        let ret = self.core.create_node(CoreKind::Ret, function);
        self.core.get_mut(ret).data = CoreData::Ret(RetData {
            in_size: payload_size,
            out_size: sum_size,
            frame_size: payload_size,
        });
        let block = self.core.create_node(CoreKind::Block, ret);
        self.core.get_mut(block).size = Some(sum_size);

        let tag_node = self.core.create_node(CoreKind::Number, block);
        self.core.get_mut(tag_node).data = CoreData::Number {
            value: i64::from(tag),
            kind: crate::types::NumberKind::U8,
        };

        if payload_size > 0 {
            let (offset, size) = self.slot(param_index)?;
            let push = self.core.create_node(CoreKind::Push, block);
            self.core.get_mut(push).data = CoreData::Size(size);
            let from = self.core.create_node(CoreKind::Param, push);
            self.core.get_mut(from).data = CoreData::Var(VarData { offset, size });
        }

        // Zero padding up to the widest variant.
        for _ in (1 + payload_size)..sum_size {
            let pad = self.core.create_node(CoreKind::Number, block);
            self.core.get_mut(pad).data = CoreData::Number {
                value: 0,
                kind: crate::types::NumberKind::U8,
            };
        }

        self.fun = saved;
        Ok(())
    }

    /// Record/atom constructors pass their input through unchanged.
    fn emit_identity_constructor(
        &mut self,
        parent: CoreId,
        name: &str,
        size: u32,
    ) -> Result<(), CompileError> {
        let saved = std::mem::take(&mut self.fun);
        let param_index = self.fun.alloc_param(size);

        let function = self.core.create_node(CoreKind::Function, parent);
        self.core.get_mut(function).data = CoreData::Function(FunctionData {
            name: name.to_string(),
            in_size: size,
            out_size: size,
            locals_size: 0,
        });

        let ret = self.core.create_node(CoreKind::Ret, function);
        self.core.get_mut(ret).data = CoreData::Ret(RetData {
            in_size: size,
            out_size: size,
            frame_size: size,
        });
        let block = self.core.create_node(CoreKind::Block, ret);
        self.core.get_mut(block).size = Some(size);

        if size > 0 {
            let (offset, slot_size) = self.slot(param_index)?;
            let push = self.core.create_node(CoreKind::Push, block);
            self.core.get_mut(push).data = CoreData::Size(slot_size);
            let from = self.core.create_node(CoreKind::Param, push);
            self.core.get_mut(from).data = CoreData::Var(VarData {
                offset,
                size: slot_size,
            });
        }

        self.fun = saved;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared resolution helpers
    // ------------------------------------------------------------------

    /// Byte size of an identifier's declared type.
    pub(crate) fn type_size_of_identifier(&self, id: NodeId) -> Result<u32, CompileError> {
        let name = &self.ast.ident(id).name;
        let scope = self.ast.get(id).type_scope.ok_or_else(|| {
            CompileError::Lower(format!("identifier {name} has no type scope"))
        })?;
        self.ast
            .resolve_type(scope, name)
            .map(|t| t.byte_size())
            .ok_or_else(|| CompileError::Lower(format!("type of {name} is unresolved")))
    }

    /// Declared type of an identifier.
    pub(crate) fn type_of_identifier(
        &self,
        id: NodeId,
    ) -> Result<crate::types::Type, CompileError> {
        let name = &self.ast.ident(id).name;
        let scope = self.ast.get(id).type_scope.ok_or_else(|| {
            CompileError::Lower(format!("identifier {name} has no type scope"))
        })?;
        self.ast
            .resolve_type(scope, name)
            .cloned()
            .ok_or_else(|| CompileError::Lower(format!("type of {name} is unresolved")))
    }

    /// The declaration node an identifier use resolves to.
    pub(crate) fn declaration_of(&self, id: NodeId) -> Result<NodeId, CompileError> {
        let name = &self.ast.ident(id).name;
        let scope = self.ast.get(id).name_scope.ok_or_else(|| {
            CompileError::Lower(format!("identifier {name} has no name scope"))
        })?;
        self.ast
            .resolve_name(scope, name)
            .ok_or_else(|| CompileError::Lower(format!("unresolved name {name}")))
    }

    /// Frame slot (variable index, is-parameter) of an identifier use.
    pub(crate) fn resolved_slot_of(&self, id: NodeId) -> Result<(u32, bool), CompileError> {
        let declaration = self.declaration_of(id)?;
        let data = self.ast.ident(declaration);
        let index = data.index_in_function.ok_or_else(|| {
            CompileError::Lower(format!("{} is not allocated in this frame", data.name))
        })?;
        Ok((index, data.is_parameter))
    }
}
