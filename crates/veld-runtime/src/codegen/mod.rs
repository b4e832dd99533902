//! Bytecode generation: core IR → program
//!
//! Walks the core tree and emits one bytecode chunk per FUNCTION node plus a
//! `_main` chunk for the root block. Temporaries come from a 60-register
//! pool (the four reserved registers are never handed out); every emission
//! rule releases its temporaries before returning, which keeps call sites
//! free of live temporaries — the calling convention has no caller-save
//! traffic.
//!
//! Frame-relative addressing: with an upward-growing stack, a local slot at
//! frame coordinate `v` sits `pre_depth − v` bytes below sp; a parameter
//! additionally sits below the 16-byte return-address/saved-fp link. Values
//! wider than 8 bytes move in power-of-two chunks.

use crate::bytecode::{Bytecode, Function, FunctionId, Op, Program, Reg, RESERVED_BASE, RET};
use crate::core::{CoreAst, CoreData, CoreId, CoreKind, VarData};
use crate::error::CompileError;
use crate::stack_analysis::{analyze_function, StackAnalysis};
use crate::types::NumberKind;
use std::collections::HashMap;

/// Bytes of return address plus saved frame pointer between a callee's
/// parameters and its locals.
const FRAME_LINK_SIZE: u32 = 16;

/// Generate a program from a lowered core tree.
pub fn generate(core: &CoreAst) -> Result<Program, CompileError> {
    let next_label = core.max_label_id().map_or(0, |m| m + 1);
    let mut state = Codegen {
        core,
        program: Program::new(),
        used_registers: 0,
        node_chunk: HashMap::new(),
        function_labels: HashMap::new(),
        next_label,
        analyses: HashMap::new(),
        in_sizes: HashMap::new(),
        stack_label_depths: HashMap::new(),
    };
    state.generate(core.root())?;
    Ok(state.program)
}

struct Codegen<'a> {
    core: &'a CoreAst,
    program: Program,
    /// Bitmap over the general registers; bit i set = register i in use.
    used_registers: u64,
    node_chunk: HashMap<CoreId, FunctionId>,
    /// Function name → call-label id, allocated above all jump labels.
    function_labels: HashMap<String, u32>,
    next_label: u32,
    analyses: HashMap<FunctionId, StackAnalysis>,
    /// Parameter bytes per generated chunk, for PARAM addressing.
    in_sizes: HashMap<FunctionId, u32>,
    /// (chunk, stack label) → recorded operand depth.
    stack_label_depths: HashMap<(FunctionId, u32), u32>,
}

impl<'a> Codegen<'a> {
    // ------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------

    fn alloc_register(&mut self) -> Result<Reg, CompileError> {
        for i in 0..RESERVED_BASE {
            if self.used_registers & (1 << i) == 0 {
                self.used_registers |= 1 << i;
                return Ok(Reg(i));
            }
        }
        Err(CompileError::Codegen("register pool exhausted".into()))
    }

    fn dealloc_register(&mut self, r: Reg) {
        self.used_registers &= !(1 << r.0);
    }

    // ------------------------------------------------------------------
    // Chunk plumbing
    // ------------------------------------------------------------------

    fn link_to_parent_chunk(&mut self, id: CoreId) -> Result<FunctionId, CompileError> {
        let parent = self.core.parent(id).ok_or_else(|| {
            CompileError::Codegen("node without a parent chunk".into())
        })?;
        let chunk = *self.node_chunk.get(&parent).ok_or_else(|| {
            CompileError::Codegen("parent node is not linked to a chunk".into())
        })?;
        self.node_chunk.insert(id, chunk);
        Ok(chunk)
    }

    fn code(&mut self, chunk: FunctionId) -> &mut Bytecode {
        self.program
            .get_mut(chunk)
            .code_mut()
            .expect("generated chunks are bytecode")
    }

    fn function_label(&mut self, name: &str) -> u32 {
        if let Some(&label) = self.function_labels.get(name) {
            return label;
        }
        let label = self.next_label;
        self.next_label += 1;
        self.function_labels.insert(name.to_string(), label);
        label
    }

    fn analysis(&self, chunk: FunctionId) -> Result<&StackAnalysis, CompileError> {
        self.analyses
            .get(&chunk)
            .ok_or_else(|| CompileError::Codegen("chunk has no stack analysis".into()))
    }

    fn pre_depth(&self, chunk: FunctionId, id: CoreId) -> Result<u32, CompileError> {
        Ok(self.analysis(chunk)?.pre_depth(id))
    }

    fn depth_change(&self, chunk: FunctionId, id: CoreId) -> Result<i64, CompileError> {
        Ok(self.analysis(chunk)?.depth_change(id))
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    fn generate(&mut self, id: CoreId) -> Result<(), CompileError> {
        let kind = self.core.get(id).kind;
        match kind {
            CoreKind::Number => self.generate_number(id),
            CoreKind::Boolean => self.generate_boolean(id),
            CoreKind::Function => self.generate_function(id),
            CoreKind::Tuple => self.generate_tuple(id),
            CoreKind::Block => self.generate_block(id),
            CoreKind::FunctionCall => self.generate_call(id),
            CoreKind::Ret => self.generate_ret(id),
            CoreKind::Push | CoreKind::Move => self.generate_push(id),
            CoreKind::Pop => self.generate_pop(id),
            CoreKind::StackAlloc => self.generate_stack_alloc(id),
            CoreKind::StackDealloc => self.generate_stack_dealloc(id),
            CoreKind::Jz => self.generate_conditional_jump(id, Op::Jrz),
            CoreKind::Jnz => self.generate_conditional_jump(id, Op::Jrnz),
            CoreKind::Jmp => self.generate_jump(id),
            CoreKind::Label => self.generate_label(id),
            CoreKind::StackLabel => self.generate_stack_label(id),
            CoreKind::Nop => {
                self.link_to_parent_chunk(id)?;
                Ok(())
            }
            CoreKind::Not => self.generate_not(id),
            _ if crate::core::is_binary_op(kind) => self.generate_binary_op(id),
            CoreKind::String | CoreKind::Reference => Err(CompileError::Codegen(format!(
                "{kind:?} values are not supported by the back end"
            ))),
            _ => Err(CompileError::Codegen(format!(
                "cannot generate code for {kind:?}"
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Leaves
    // ------------------------------------------------------------------

    fn generate_number(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let CoreData::Number { value, kind } = self.core.get(id).data else {
            return Err(CompileError::Codegen("number node without a value".into()));
        };

        let r = self.alloc_register()?;
        let bc = self.code(chunk);
        match kind {
            NumberKind::U8 => bc.emit_mv_reg_u8(r, value as u8),
            NumberKind::U16 => bc.emit_mv_reg_u16(r, value as u16),
            NumberKind::U32 => bc.emit_mv_reg_u32(r, value as u32),
            NumberKind::U64 => bc.emit_mv_reg_u64(r, value as u64),
            NumberKind::I8 => bc.emit_mv_reg_i8(r, value as i8),
            NumberKind::I16 => bc.emit_mv_reg_i16(r, value as i16),
            NumberKind::I32 => bc.emit_mv_reg_i32(r, value as i32),
            NumberKind::I64 => bc.emit_mv_reg_i64(r, value),
        };
        bc.emit_push(kind.byte_size(), r);
        self.dealloc_register(r);
        Ok(())
    }

    fn generate_boolean(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let CoreData::Boolean(value) = self.core.get(id).data else {
            return Err(CompileError::Codegen("boolean node without a value".into()));
        };

        let r = self.alloc_register()?;
        let bc = self.code(chunk);
        bc.emit_mv_reg_u8(r, u8::from(value));
        bc.emit_push(1, r);
        self.dealloc_register(r);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    fn generate_function(&mut self, id: CoreId) -> Result<(), CompileError> {
        let data = self.core.function_data(id).clone();
        if data.locals_size > u8::MAX as u32 {
            return Err(CompileError::Codegen(format!(
                "locals of {} ({} bytes) exceed the frame allocation limit",
                data.name, data.locals_size
            )));
        }
        if self.used_registers != 0 {
            return Err(CompileError::Codegen(
                "temporaries live across a function boundary".into(),
            ));
        }

        let chunk = self
            .program
            .add_function(Function::bytecode(data.name.clone(), Bytecode::new()));
        self.node_chunk.insert(id, chunk);

        let analysis = analyze_function(id, self.core)?;
        self.analyses.insert(chunk, analysis);
        self.in_sizes.insert(chunk, data.in_size);

        let entry_label = self.function_label(&data.name);
        let bc = self.code(chunk);
        bc.emit_lbl(entry_label);
        bc.emit_salloc(RET, data.locals_size as u8);

        let body = self.core.children(id)[0];
        self.generate(body)?;

        // The epilogue frees the locals right before the final RET.
        let bc = self.code(chunk);
        let ret_at = bc.len().checked_sub(Op::Ret.size()).ok_or_else(|| {
            CompileError::Codegen(format!("function {} emitted no return", data.name))
        })?;
        if bc.op_at(ret_at) != Some(Op::Ret) {
            return Err(CompileError::Codegen(format!(
                "function {} does not end in a return",
                data.name
            )));
        }
        bc.insert_bytes(ret_at, &[Op::Sdealloc as u8, data.locals_size as u8]);
        Ok(())
    }

    fn generate_tuple(&mut self, id: CoreId) -> Result<(), CompileError> {
        self.link_to_parent_chunk(id)?;
        for child in self.core.children(id).to_vec() {
            self.generate(child)?;
        }
        Ok(())
    }

    fn generate_block(&mut self, id: CoreId) -> Result<(), CompileError> {
        let is_root = id == self.core.root();
        let chunk = if is_root {
            let chunk = self
                .program
                .add_function(Function::bytecode("_main", Bytecode::new()));
            self.node_chunk.insert(id, chunk);
            chunk
        } else {
            self.link_to_parent_chunk(id)?
        };

        for child in self.core.children(id).to_vec() {
            self.generate(child)?;
        }

        if is_root {
            let leftover = self.core.get(id).size.unwrap_or(0);
            if leftover > u8::MAX as u32 {
                return Err(CompileError::Codegen(
                    "root block leaves more stack than can be freed".into(),
                ));
            }
            let bc = self.code(chunk);
            if leftover > 0 {
                bc.emit_sdealloc(leftover as u8);
            }
            bc.emit_exit();
        }
        Ok(())
    }

    fn generate_call(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let call = self.core.call_data(id).clone();

        // No caller-save traffic: every emission rule frees its temporaries,
        // so nothing may be live here.
        if self.used_registers != 0 {
            return Err(CompileError::Codegen(format!(
                "temporaries live across the call to {}",
                call.name
            )));
        }

        let label = self.function_label(&call.name);
        self.program
            .get_mut(chunk)
            .symbols_mut()
            .expect("generated chunks are bytecode")
            .insert(label, call.name.clone());

        for child in self.core.children(id).to_vec() {
            self.generate(child)?;
        }

        let bc = self.code(chunk);
        bc.emit_call(u64::from(label));

        if call.out_size > 8 {
            return Err(CompileError::Codegen(format!(
                "call result of {} bytes does not fit the result register",
                call.out_size
            )));
        }
        if call.out_size > 0 {
            let width = encodable_width(call.out_size)?;
            self.code(chunk).emit_push(width, RET);
        }
        Ok(())
    }

    fn generate_ret(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let children = self.core.children(id).to_vec();
        if children.len() != 1 {
            return Err(CompileError::Codegen("return must have one child".into()));
        }
        self.generate(children[0])?;

        let diff = self.depth_change(chunk, children[0])?;
        if diff < 0 || diff > 8 {
            return Err(CompileError::Codegen(format!(
                "return value of {diff} bytes does not fit the result register"
            )));
        }
        if diff > 0 {
            let width = encodable_width(diff as u32)?;
            self.code(chunk).emit_pop(width, RET);
        }

        let in_size = self.core.ret_data(id).in_size;
        if in_size > u8::MAX as u32 {
            return Err(CompileError::Codegen(
                "argument bytes exceed the return encoding".into(),
            ));
        }
        self.code(chunk).emit_ret(in_size as u8);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Stack traffic
    // ------------------------------------------------------------------

    /// Distance from sp down to the low byte of a frame slot.
    fn slot_distance(&self, depth: u32, var: VarData, param: bool) -> Result<u32, CompileError> {
        let base = depth.checked_sub(var.offset).ok_or_else(|| {
            CompileError::Codegen("frame slot lies above the operand stack".into())
        })?;
        Ok(if param { base + FRAME_LINK_SIZE } else { base })
    }

    /// Point `addr` at `sp − distance`.
    fn emit_address(
        &mut self,
        chunk: FunctionId,
        addr: Reg,
        distance: u32,
    ) -> Result<(), CompileError> {
        let bc = self.code(chunk);
        bc.emit_mv_reg_sp(addr);
        if distance == 0 {
            return Ok(());
        }
        if distance <= u8::MAX as u32 {
            bc.emit_sub_imm(addr, addr, distance as u8);
        } else {
            let wide = self.alloc_register()?;
            let bc = self.code(chunk);
            bc.emit_mv_reg_u32(wide, distance);
            bc.emit_sub(addr, addr, wide);
            self.dealloc_register(wide);
        }
        Ok(())
    }

    /// PUSH (and MOVE): copy `size` bytes from a frame slot, a dynamic slot,
    /// or a stack-label-relative address onto the top of the stack, low
    /// chunk first.
    fn generate_push(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let size = self.core.size_of(id);
        let pre = self.pre_depth(chunk, id)?;
        let source = *self
            .core
            .children(id)
            .first()
            .ok_or_else(|| CompileError::Codegen("push without a source".into()))?;
        self.node_chunk.insert(source, chunk);

        let source_kind = self.core.get(source).kind;
        let addr = self.alloc_register()?;

        match source_kind {
            CoreKind::Variable | CoreKind::Param | CoreKind::StackData => {
                let var = self.core.var_data(source);
                let distance =
                    self.slot_distance(pre, var, source_kind == CoreKind::Param)?;
                self.emit_address(chunk, addr, distance)?;
            }
            CoreKind::DynamicVariable | CoreKind::DynamicParam => {
                let index = self.alloc_register()?;
                self.code(chunk).emit_pop(8, index);
                let var = self.core.var_data(source);
                let depth = pre.checked_sub(8).ok_or_else(|| {
                    CompileError::Codegen("dynamic push without an index on the stack".into())
                })?;
                let distance =
                    self.slot_distance(depth, var, source_kind == CoreKind::DynamicParam)?;
                self.emit_address(chunk, addr, distance)?;
                self.code(chunk).emit_add(addr, addr, index);
                self.dealloc_register(index);
            }
            CoreKind::RelativeOffset => {
                let CoreData::RelativeOffset { stack_label, delta } = self.core.get(source).data
                else {
                    return Err(CompileError::Codegen("malformed relative offset".into()));
                };
                let base = *self
                    .stack_label_depths
                    .get(&(chunk, stack_label))
                    .ok_or_else(|| {
                        CompileError::Codegen(format!("stack label {stack_label} is unknown"))
                    })?;
                let target = i64::from(base) + i64::from(delta);
                let distance = i64::from(pre) - target;
                if target < 0 || distance <= 0 {
                    return Err(CompileError::Codegen(
                        "stack-label-relative address lies above the stack".into(),
                    ));
                }
                self.emit_address(chunk, addr, distance as u32)?;
            }
            other => {
                return Err(CompileError::Codegen(format!(
                    "invalid push source {other:?}"
                )))
            }
        }

        // Copy low-to-high; the captured address is immune to the moving sp.
        let value = self.alloc_register()?;
        let mut remaining = size;
        let mut done = 0u32;
        let mut addr_offset = 0u32;
        while remaining > 0 {
            let c = chunk_width(remaining);
            if done != addr_offset {
                self.code(chunk)
                    .emit_add_imm(addr, addr, (done - addr_offset) as u8);
                addr_offset = done;
            }
            let bc = self.code(chunk);
            bc.emit_mv_reg_loc(c, value, addr);
            bc.emit_push(c, value);
            done += c;
            remaining -= c;
        }
        self.dealloc_register(value);
        self.dealloc_register(addr);
        Ok(())
    }

    /// POP: move the top `size` bytes into a frame slot or dynamic slot,
    /// high chunk first.
    fn generate_pop(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let size = self.core.size_of(id);
        let pre = self.pre_depth(chunk, id)?;
        let target = *self
            .core
            .children(id)
            .first()
            .ok_or_else(|| CompileError::Codegen("pop without a target".into()))?;
        self.node_chunk.insert(target, chunk);

        let target_kind = self.core.get(target).kind;
        let addr = self.alloc_register()?;

        match target_kind {
            CoreKind::Variable | CoreKind::Param => {
                let var = self.core.var_data(target);
                let distance =
                    self.slot_distance(pre, var, target_kind == CoreKind::Param)?;
                self.emit_address(chunk, addr, distance)?;
            }
            CoreKind::DynamicVariable | CoreKind::DynamicParam => {
                let index = self.alloc_register()?;
                self.code(chunk).emit_pop(8, index);
                let var = self.core.var_data(target);
                let depth = pre.checked_sub(8).ok_or_else(|| {
                    CompileError::Codegen("dynamic pop without an index on the stack".into())
                })?;
                let distance =
                    self.slot_distance(depth, var, target_kind == CoreKind::DynamicParam)?;
                self.emit_address(chunk, addr, distance)?;
                self.code(chunk).emit_add(addr, addr, index);
                self.dealloc_register(index);
            }
            other => {
                return Err(CompileError::Codegen(format!(
                    "invalid pop target {other:?}"
                )))
            }
        }

        // `addr` holds the slot's low byte; write chunks from the high end
        // down, tracking the register's current offset from the base.
        let value = self.alloc_register()?;
        let mut remaining = size;
        let mut addr_offset = 0u32;
        while remaining > 0 {
            let c = chunk_width(remaining);
            let want = remaining - c;
            if want > addr_offset {
                self.code(chunk).emit_add_imm(addr, addr, (want - addr_offset) as u8);
            } else if addr_offset > want {
                self.code(chunk).emit_sub_imm(addr, addr, (addr_offset - want) as u8);
            }
            addr_offset = want;
            let bc = self.code(chunk);
            bc.emit_pop(c, value);
            bc.emit_mv_loc_reg(c, addr, value);
            remaining -= c;
        }
        self.dealloc_register(value);
        self.dealloc_register(addr);
        Ok(())
    }

    fn generate_stack_alloc(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let size = self.core.size_of(id);
        if size > u8::MAX as u32 {
            return Err(CompileError::Codegen("stack allocation too large".into()));
        }
        self.code(chunk).emit_salloc(RET, size as u8);
        Ok(())
    }

    fn generate_stack_dealloc(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let size = self.core.size_of(id);
        if size > u8::MAX as u32 {
            return Err(CompileError::Codegen("stack deallocation too large".into()));
        }
        if size > 0 {
            self.code(chunk).emit_sdealloc(size as u8);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------

    fn generate_conditional_jump(&mut self, id: CoreId, op: Op) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let label = self.core.label_id(id);
        let test = self.alloc_register()?;
        let bc = self.code(chunk);
        bc.emit_pop(1, test);
        // The displacement is a label id until the linker patches it.
        match op {
            Op::Jrz => bc.emit_jrz(test, label as i32),
            Op::Jrnz => bc.emit_jrnz(test, label as i32),
            _ => unreachable!("conditional jump opcode"),
        };
        self.dealloc_register(test);
        Ok(())
    }

    fn generate_jump(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let label = self.core.label_id(id);
        self.code(chunk).emit_jmp(label as i32);
        Ok(())
    }

    fn generate_label(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let label = self.core.label_id(id);
        self.code(chunk).emit_lbl(label);
        Ok(())
    }

    fn generate_stack_label(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let label = self.core.stack_label_id(id);
        let depth = self.analysis(chunk)?.post_depth(id);
        self.stack_label_depths.insert((chunk, label), depth);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------

    fn generate_binary_op(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let kind = self.core.get(id).kind;
        let children = self.core.children(id).to_vec();
        if children.len() != 2 {
            return Err(CompileError::Codegen("malformed binary operator".into()));
        }

        self.generate(children[0])?;
        let lhs_size = self.depth_change(chunk, children[0])?;
        self.generate(children[1])?;
        let rhs_size = self.depth_change(chunk, children[1])?;

        for size in [lhs_size, rhs_size] {
            if !(1..=8).contains(&size) {
                return Err(CompileError::Codegen(format!(
                    "operand of {size} bytes cannot feed {kind:?}"
                )));
            }
        }
        let lhs_width = encodable_width(lhs_size as u32)?;
        let rhs_width = encodable_width(rhs_size as u32)?;

        let rhs = self.alloc_register()?;
        let lhs = self.alloc_register()?;
        let bc = self.code(chunk);
        bc.emit_pop(rhs_width, rhs);
        bc.emit_pop(lhs_width, lhs);

        match kind {
            CoreKind::Add => bc.emit_add(RET, lhs, rhs),
            CoreKind::Sub => bc.emit_sub(RET, lhs, rhs),
            CoreKind::Mul => bc.emit_mul(RET, lhs, rhs),
            CoreKind::Div => bc.emit_div(RET, lhs, rhs),
            CoreKind::Mod => bc.emit_mod(RET, lhs, rhs),
            CoreKind::Gt => bc.emit_gt(RET, lhs, rhs),
            CoreKind::Gte => bc.emit_gte(RET, lhs, rhs),
            CoreKind::Lt => bc.emit_lt(RET, lhs, rhs),
            CoreKind::Lte => bc.emit_lte(RET, lhs, rhs),
            CoreKind::Eq => bc.emit_eq(RET, lhs, rhs),
            CoreKind::And => bc.emit_and(RET, lhs, rhs),
            CoreKind::Or => bc.emit_or(RET, lhs, rhs),
            other => {
                return Err(CompileError::Codegen(format!(
                    "unknown binary operator {other:?}"
                )))
            }
        };
        self.dealloc_register(lhs);
        self.dealloc_register(rhs);

        let result_width = if crate::core::is_comparison_op(kind)
            || matches!(kind, CoreKind::And | CoreKind::Or)
        {
            1
        } else {
            encodable_width(lhs_size.max(rhs_size) as u32)?
        };
        self.code(chunk).emit_push(result_width, RET);
        Ok(())
    }

    fn generate_not(&mut self, id: CoreId) -> Result<(), CompileError> {
        let chunk = self.link_to_parent_chunk(id)?;
        let children = self.core.children(id).to_vec();
        if children.len() != 1 {
            return Err(CompileError::Codegen("malformed negation".into()));
        }
        self.generate(children[0])?;

        let operand = self.alloc_register()?;
        let bc = self.code(chunk);
        bc.emit_pop(1, operand);
        bc.emit_xor_imm(RET, operand, 1);
        bc.emit_push(1, RET);
        self.dealloc_register(operand);
        Ok(())
    }
}

/// Largest power-of-two chunk (≤ 8) that fits `remaining` bytes.
fn chunk_width(remaining: u32) -> u32 {
    match remaining {
        0 => unreachable!("no chunk left"),
        1 => 1,
        2..=3 => 2,
        4..=7 => 4,
        _ => 8,
    }
}

/// Sizes that travel through registers must be exactly encodable.
fn encodable_width(size: u32) -> Result<u32, CompileError> {
    match size {
        1 | 2 | 4 | 8 => Ok(size),
        other => Err(CompileError::Codegen(format!(
            "{other} bytes is not an encodable push/pop width"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{CallData, CoreData, FunctionData, RetData};
    use crate::vm::interpret;

    /// FUNCTION f() -> u64 { 41 + 1 }, called from a root block.
    fn small_program() -> CoreAst {
        let mut core = CoreAst::new(CoreKind::Block);
        let root = core.root();
        core.get_mut(root).size = Some(0);

        let call = core.create_node(CoreKind::FunctionCall, root);
        core.get_mut(call).data = CoreData::Call(CallData {
            name: "answer".into(),
            in_size: 0,
            out_size: 8,
        });
        core.get_mut(call).size = Some(8);
        core.create_node(CoreKind::Tuple, call);
        let drop = core.create_node(CoreKind::StackDealloc, root);
        core.get_mut(drop).data = CoreData::Size(8);

        let f = core.create_node(CoreKind::Function, root);
        core.get_mut(f).data = CoreData::Function(FunctionData {
            name: "answer".into(),
            in_size: 0,
            out_size: 8,
            locals_size: 0,
        });
        let ret = core.create_node(CoreKind::Ret, f);
        core.get_mut(ret).data = CoreData::Ret(RetData {
            in_size: 0,
            out_size: 8,
            frame_size: 0,
        });
        let block = core.create_node(CoreKind::Block, ret);
        core.get_mut(block).size = Some(8);
        let add = core.create_node(CoreKind::Add, block);
        for value in [41i64, 1] {
            let operand = core.create_node(CoreKind::Block, add);
            let number = core.create_node(CoreKind::Number, operand);
            core.get_mut(number).data = CoreData::Number {
                value,
                kind: NumberKind::U64,
            };
        }
        core
    }

    #[test]
    fn generates_a_runnable_program() {
        let core = small_program();
        let program = generate(&core).unwrap();
        assert_eq!(program.function_count(), 2);
        assert_eq!(program.get(0).name(), "_main");
        assert_eq!(program.get(1).name(), "answer");

        let vm = interpret(crate::link::link(&program).unwrap()).unwrap();
        assert_eq!(vm.register(RET), 42);
        assert_eq!(vm.sp(), 0);
    }

    #[test]
    fn function_chunks_carry_prologue_and_epilogue() {
        let core = small_program();
        let program = generate(&core).unwrap();
        let code = program.get(1).code().unwrap();
        let ops: Vec<Op> = code.ops().map(|(_, op)| op).collect();
        assert_eq!(ops[0], Op::Lbl);
        assert_eq!(ops[1], Op::Salloc);
        assert_eq!(ops[ops.len() - 2], Op::Sdealloc);
        assert_eq!(ops[ops.len() - 1], Op::Ret);
    }

    /// MOVE behaves exactly like PUSH: copy a frame slot onto the stack top.
    #[test]
    fn move_nodes_copy_slots_onto_the_stack() {
        let mut core = CoreAst::new(CoreKind::Block);
        let root = core.root();
        core.get_mut(root).size = Some(0);

        let call = core.create_node(CoreKind::FunctionCall, root);
        core.get_mut(call).data = CoreData::Call(CallData {
            name: "copy".into(),
            in_size: 0,
            out_size: 8,
        });
        core.get_mut(call).size = Some(8);
        core.create_node(CoreKind::Tuple, call);
        let drop = core.create_node(CoreKind::StackDealloc, root);
        core.get_mut(drop).data = CoreData::Size(8);

        let f = core.create_node(CoreKind::Function, root);
        core.get_mut(f).data = CoreData::Function(FunctionData {
            name: "copy".into(),
            in_size: 0,
            out_size: 8,
            locals_size: 8,
        });
        let ret = core.create_node(CoreKind::Ret, f);
        core.get_mut(ret).data = CoreData::Ret(RetData {
            in_size: 0,
            out_size: 8,
            frame_size: 8,
        });
        let block = core.create_node(CoreKind::Block, ret);
        core.get_mut(block).size = Some(8);

        // local <- 7, then MOVE the slot's bytes back onto the stack
        let seven = core.create_node(CoreKind::Number, block);
        core.get_mut(seven).data = CoreData::Number {
            value: 7,
            kind: NumberKind::U64,
        };
        let pop = core.create_node(CoreKind::Pop, block);
        core.get_mut(pop).data = CoreData::Size(8);
        let var = core.create_node(CoreKind::Variable, pop);
        core.get_mut(var).data = CoreData::Var(VarData { offset: 0, size: 8 });

        let mv = core.create_node(CoreKind::Move, block);
        core.get_mut(mv).data = CoreData::Size(8);
        let src = core.create_node(CoreKind::Variable, mv);
        core.get_mut(src).data = CoreData::Var(VarData { offset: 0, size: 8 });

        let program = generate(&core).unwrap();
        let vm = interpret(crate::link::link(&program).unwrap()).unwrap();
        assert_eq!(vm.register(RET), 7);
        assert_eq!(vm.sp(), 0);
    }

    #[test]
    fn string_nodes_are_rejected() {
        let mut core = CoreAst::new(CoreKind::Block);
        let root = core.root();
        core.get_mut(root).size = Some(0);
        let s = core.create_node(CoreKind::String, root);
        core.get_mut(s).data = CoreData::String("nope".into());

        assert!(matches!(
            generate(&core),
            Err(CompileError::Codegen(_))
        ));
    }
}
