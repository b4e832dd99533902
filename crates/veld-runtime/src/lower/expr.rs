//! Expression lowering

use super::{Lowered, Lowerer};
use crate::ast::{NodeId, NodeKind};
use crate::core::{CallData, CoreData, CoreId, CoreKind, VarData};
use crate::error::CompileError;
use crate::types::{NumberKind, Type};

impl<'a> Lowerer<'a> {
    pub(super) fn lower_number(
        &mut self,
        parent: CoreId,
        id: NodeId,
    ) -> Result<Lowered, CompileError> {
        let data = self.ast.number(id);
        let node = self.core.create_node(CoreKind::Number, parent);
        self.core.get_mut(node).data = CoreData::Number {
            value: data.value,
            kind: data.kind,
        };
        Ok(Lowered::stack(data.kind.byte_size()))
    }

    pub(super) fn lower_boolean(
        &mut self,
        parent: CoreId,
        id: NodeId,
    ) -> Result<Lowered, CompileError> {
        let value = self.ast.boolean(id);
        let node = self.core.create_node(CoreKind::Boolean, parent);
        self.core.get_mut(node).data = CoreData::Boolean(value);
        Ok(Lowered::stack(1))
    }

    /// Read of a name: push its bytes from the frame slot, or from the match
    /// subject for pattern-bound names.
    pub(super) fn lower_identifier(
        &mut self,
        parent: CoreId,
        id: NodeId,
    ) -> Result<Lowered, CompileError> {
        let size = self.type_size_of_identifier(id)?;
        let declaration = self.declaration_of(id)?;
        let decl_data = self.ast.ident(declaration).clone();

        let push = self.core.create_node(CoreKind::Push, parent);
        self.core.get_mut(push).data = CoreData::Size(size);

        if let Some((stack_label, delta)) = decl_data.pattern_location {
            let source = self.core.create_node(CoreKind::RelativeOffset, push);
            self.core.get_mut(source).data = CoreData::RelativeOffset { stack_label, delta };
        } else {
            let index = decl_data.index_in_function.ok_or_else(|| {
                CompileError::Lower(format!(
                    "{} is not allocated in this frame",
                    decl_data.name
                ))
            })?;
            let (offset, slot_size) = self.slot(index)?;
            let source = self.core.create_node(
                if decl_data.is_parameter {
                    CoreKind::Param
                } else {
                    CoreKind::Variable
                },
                push,
            );
            self.core.get_mut(source).data = CoreData::Var(VarData {
                offset,
                size: slot_size,
            });
        }

        Ok(Lowered::stack(size))
    }

    /// `(a, b, c)`: children in order; the tuple's bytes are the sum.
    pub(super) fn lower_tuple(
        &mut self,
        parent: CoreId,
        id: NodeId,
    ) -> Result<Lowered, CompileError> {
        let tuple = self.core.create_node(CoreKind::Tuple, parent);
        let mut total = 0;
        for child in self.ast.children(id).to_vec() {
            let result = self.lower_node(tuple, child)?;
            total += result.expect_stack("tuple element")?;
        }
        Ok(Lowered::stack(total))
    }

    /// `[a, b, c]`: a contiguous run of equally-sized elements.
    pub(super) fn lower_array_value(
        &mut self,
        parent: CoreId,
        id: NodeId,
    ) -> Result<Lowered, CompileError> {
        let arr = self.core.create_node(CoreKind::Tuple, parent);
        let mut total = 0;
        for child in self.ast.children(id).to_vec() {
            let result = self.lower_node(arr, child)?;
            total += result.expect_stack("array element")?;
        }
        Ok(Lowered::stack(total))
    }

    /// `f arg`
    pub(super) fn lower_call(
        &mut self,
        parent: CoreId,
        id: NodeId,
    ) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() != 2 {
            return Err(CompileError::Lower("malformed function call".into()));
        }
        let (callee, arg) = (children[0], children[1]);
        if self.ast.get(callee).kind != NodeKind::Identifier {
            return Err(CompileError::Lower("call target must be a name".into()));
        }

        let name = self.ast.ident(callee).name.clone();
        let ty = self.type_of_identifier(callee)?;
        let Type::Function { to, .. } = ty else {
            return Err(CompileError::Lower(format!("{name} is not callable")));
        };
        let out_size = to.byte_size();

        let call = self.core.create_node(CoreKind::FunctionCall, parent);
        self.core.get_mut(call).size = Some(out_size);

        let arg_result = self.lower_node(call, arg)?;
        let in_size = arg_result.expect_stack("call argument")?;

        self.core.get_mut(call).data = CoreData::Call(CallData {
            name,
            in_size,
            out_size,
        });

        Ok(Lowered::stack(out_size))
    }

    /// `a[i]`: multiply the index by the element size, then push through a
    /// dynamic slot with the byte offset on the stack.
    pub(super) fn lower_array_access(
        &mut self,
        parent: CoreId,
        id: NodeId,
    ) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() != 2 {
            return Err(CompileError::Lower("malformed array access".into()));
        }
        let (array, index) = (children[0], children[1]);
        let (element_size, var) = self.dynamic_slot_parts(array)?;

        self.lower_index_scaling(parent, index, element_size)?;

        let push = self.core.create_node(CoreKind::Push, parent);
        self.core.get_mut(push).data = CoreData::Size(element_size);
        let (offset, size, is_param) = var;
        let source = self.core.create_node(
            if is_param {
                CoreKind::DynamicParam
            } else {
                CoreKind::DynamicVariable
            },
            push,
        );
        self.core.get_mut(source).data = CoreData::Var(VarData { offset, size });

        Ok(Lowered::stack(element_size))
    }

    /// `a[i] = value` tail: the value is already on the stack; push the byte
    /// offset, then pop through the dynamic slot.
    pub(super) fn lower_dynamic_store(
        &mut self,
        parent: CoreId,
        target: NodeId,
    ) -> Result<Lowered, CompileError> {
        let children = self.ast.children(target).to_vec();
        if children.len() != 2 {
            return Err(CompileError::Lower("malformed array access".into()));
        }
        let (array, index) = (children[0], children[1]);
        let (element_size, var) = self.dynamic_slot_parts(array)?;

        self.lower_index_scaling(parent, index, element_size)?;

        let pop = self.core.create_node(CoreKind::Pop, parent);
        self.core.get_mut(pop).data = CoreData::Size(element_size);
        let (offset, size, is_param) = var;
        let dest = self.core.create_node(
            if is_param {
                CoreKind::DynamicParam
            } else {
                CoreKind::DynamicVariable
            },
            pop,
        );
        self.core.get_mut(dest).data = CoreData::Var(VarData { offset, size });

        Ok(Lowered::none())
    }

    /// Element size plus `(offset, size, is_param)` of the array variable
    /// behind an indexing expression.
    fn dynamic_slot_parts(
        &mut self,
        array: NodeId,
    ) -> Result<(u32, (u32, u32, bool)), CompileError> {
        if self.ast.get(array).kind != NodeKind::Identifier {
            return Err(CompileError::Lower(
                "array access must index a named array".into(),
            ));
        }
        let ty = self.type_of_identifier(array)?;
        let Type::Array { element, .. } = ty else {
            return Err(CompileError::Lower(format!(
                "{} is not an array",
                self.ast.ident(array).name
            )));
        };
        let element_size = element.byte_size();

        let (index, is_param) = self.resolved_slot_of(array)?;
        let (offset, size) = self.slot(index)?;
        Ok((element_size, (offset, size, is_param)))
    }

    /// Emit `index * element_size`, leaving an 8-byte byte-offset on the
    /// stack.
    fn lower_index_scaling(
        &mut self,
        parent: CoreId,
        index: NodeId,
        element_size: u32,
    ) -> Result<(), CompileError> {
        let mul = self.core.create_node(CoreKind::Mul, parent);

        let lhs_block = self.core.create_node(CoreKind::Block, mul);
        let index_result = self.lower_node(lhs_block, index)?;
        let index_size = index_result.expect_stack("array index")?;
        if index_size != 8 {
            return Err(CompileError::Lower(
                "array index must be a 64-bit value".into(),
            ));
        }
        self.core.get_mut(lhs_block).size = Some(index_size);

        let rhs_block = self.core.create_node(CoreKind::Block, mul);
        self.core.get_mut(rhs_block).size = Some(8);
        let scale = self.core.create_node(CoreKind::Number, rhs_block);
        self.core.get_mut(scale).data = CoreData::Number {
            value: i64::from(element_size),
            kind: NumberKind::U64,
        };
        Ok(())
    }

    /// Binary operators. `and`/`or` short-circuit around their right operand;
    /// both operands of every operator lower into their own block.
    pub(super) fn lower_binary_op(
        &mut self,
        parent: CoreId,
        id: NodeId,
    ) -> Result<Lowered, CompileError> {
        let kind = self.ast.get(id).kind;
        let children = self.ast.children(id).to_vec();
        if children.len() != 2 {
            return Err(CompileError::Lower("malformed binary operator".into()));
        }
        let (lhs, rhs) = (children[0], children[1]);

        let (core_kind, fixed_size) = match kind {
            NodeKind::Addition => (CoreKind::Add, None),
            NodeKind::Subtraction => (CoreKind::Sub, None),
            NodeKind::Multiplication => (CoreKind::Mul, None),
            NodeKind::Division => (CoreKind::Div, None),
            NodeKind::Modulo => (CoreKind::Mod, None),
            NodeKind::Equality => (CoreKind::Eq, Some(1)),
            NodeKind::GreaterThan => (CoreKind::Gt, Some(1)),
            NodeKind::GreaterOrEq => (CoreKind::Gte, Some(1)),
            NodeKind::LessThan => (CoreKind::Lt, Some(1)),
            NodeKind::LessOrEq => (CoreKind::Lte, Some(1)),
            NodeKind::And => (CoreKind::And, Some(1)),
            NodeKind::Or => (CoreKind::Or, Some(1)),
            other => {
                return Err(CompileError::Lower(format!(
                    "unknown binary operator {other:?}"
                )))
            }
        };

        let node = self.core.create_node(core_kind, parent);

        match kind {
            NodeKind::And => self.lower_short_circuit(node, lhs, rhs, true)?,
            NodeKind::Or => self.lower_short_circuit(node, lhs, rhs, false)?,
            _ => {
                let lhs_block = self.core.create_node(CoreKind::Block, node);
                let lhs_result = self.lower_node(lhs_block, lhs)?;
                let lhs_size = lhs_result.expect_stack("left operand")?;
                self.core.get_mut(lhs_block).size = Some(lhs_size);

                let rhs_block = self.core.create_node(CoreKind::Block, node);
                let rhs_result = self.lower_node(rhs_block, rhs)?;
                let rhs_size = rhs_result.expect_stack("right operand")?;
                self.core.get_mut(rhs_block).size = Some(rhs_size);

                if fixed_size.is_none() {
                    return Ok(Lowered::stack(lhs_size.max(rhs_size)));
                }
            }
        }

        Ok(Lowered::stack(fixed_size.unwrap_or(1)))
    }

    /// Short-circuit shape shared by `and` (skip on false) and `or` (skip on
    /// true). The skipped operand is replaced by two copies of the decided
    /// constant: one to stand in for the consumed left value, one for the
    /// right operand, so the joining AND/OR still pops two booleans.
    fn lower_short_circuit(
        &mut self,
        op_node: CoreId,
        lhs: NodeId,
        rhs: NodeId,
        is_and: bool,
    ) -> Result<(), CompileError> {
        let short_label = self.new_label();
        let finish_label = self.new_label();

        let lhs_block = self.core.create_node(CoreKind::Block, op_node);
        let lhs_result = self.lower_node(lhs_block, lhs)?;
        if lhs_result.bytes() != 1 {
            return Err(CompileError::Lower(
                "logical operand must be a single boolean byte".into(),
            ));
        }
        self.core.get_mut(lhs_block).size = Some(1);

        let jump = self
            .core
            .create_node(if is_and { CoreKind::Jz } else { CoreKind::Jnz }, lhs_block);
        self.core.get_mut(jump).data = CoreData::Label(short_label);

        // Fall-through path: restore the consumed left value.
        let restored = self.core.create_node(CoreKind::Boolean, lhs_block);
        self.core.get_mut(restored).data = CoreData::Boolean(is_and);

        let rhs_block = self.core.create_node(CoreKind::Block, op_node);
        self.core.get_mut(rhs_block).size = Some(1);
        let rhs_result = self.lower_node(rhs_block, rhs)?;
        if rhs_result.bytes() != 1 {
            return Err(CompileError::Lower(
                "logical operand must be a single boolean byte".into(),
            ));
        }
        let jump_finish = self.core.create_node(CoreKind::Jmp, rhs_block);
        self.core.get_mut(jump_finish).data = CoreData::Label(finish_label);

        // Short-circuit path: the decided constant twice (left stand-in and
        // right operand).
        let target = self.core.create_node(CoreKind::Label, rhs_block);
        self.core.get_mut(target).data = CoreData::Label(short_label);
        for _ in 0..2 {
            let constant = self.core.create_node(CoreKind::Boolean, rhs_block);
            self.core.get_mut(constant).data = CoreData::Boolean(!is_and);
        }

        let finish = self.core.create_node(CoreKind::Label, rhs_block);
        self.core.get_mut(finish).data = CoreData::Label(finish_label);

        Ok(())
    }

    /// `!e`
    pub(super) fn lower_unary_op(
        &mut self,
        parent: CoreId,
        id: NodeId,
    ) -> Result<Lowered, CompileError> {
        let children = self.ast.children(id).to_vec();
        if children.len() != 1 {
            return Err(CompileError::Lower("malformed unary operator".into()));
        }

        let node = self.core.create_node(CoreKind::Not, parent);
        let block = self.core.create_node(CoreKind::Block, node);
        let operand = self.lower_node(block, children[0])?;
        if operand.bytes() != 1 {
            return Err(CompileError::Lower(
                "negation operand must be a single boolean byte".into(),
            ));
        }
        self.core.get_mut(block).size = Some(1);

        Ok(Lowered::stack(1))
    }
}
