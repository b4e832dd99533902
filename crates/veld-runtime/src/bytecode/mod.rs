//! Bytecode containers
//!
//! A `Bytecode` is a flat byte vector of variable-width instructions with
//! typed emit/read/patch helpers. A `Program` is an ordered set of named
//! function chunks (bytecode or native references) plus per-chunk symbol
//! tables for external calls. An `Executable` is the single linked image the
//! VM runs.
//!
//! Instructions are encoded as one opcode byte plus little-endian operands;
//! see `opcode` for the normative widths.

pub mod disasm;
pub mod image;
mod opcode;
pub mod validator;

pub use disasm::disassemble;
pub use opcode::{
    reads_from, writes_to, Op, Reg, FP, IP, REGISTER_COUNT, RESERVED_BASE, RET, SP, STACK_SIZE,
};

use std::collections::HashMap;

/// Bytecode format version, bumped on breaking encoding changes. Gates the
/// image loader.
pub const BYTECODE_VERSION: u16 = 1;

/// A flat, growable instruction stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bytecode {
    bytes: Vec<u8>,
}

impl Bytecode {
    pub fn new() -> Bytecode {
        Bytecode::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Bytecode {
        Bytecode { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        &mut self.bytes
    }

    /// Append another chunk.
    pub fn append(&mut self, other: &Bytecode) {
        self.bytes.extend_from_slice(&other.bytes);
    }

    /// Opcode at `offset`, or `None` past the end or on a byte that does not
    /// decode.
    pub fn op_at(&self, offset: usize) -> Option<Op> {
        self.bytes.get(offset).copied().and_then(Op::from_byte)
    }

    /// Iterate `(offset, opcode)` over instruction boundaries. Stops at the
    /// first undecodable byte.
    pub fn ops(&self) -> OpIter<'_> {
        OpIter {
            bytes: &self.bytes,
            offset: 0,
        }
    }

    // ------------------------------------------------------------------
    // Raw emission
    // ------------------------------------------------------------------

    fn emit(&mut self, op: Op) -> usize {
        let at = self.bytes.len();
        self.bytes.push(op as u8);
        at
    }

    fn raw_u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn raw_u16(&mut self, v: u16) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn raw_u32(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    fn raw_u64(&mut self, v: u64) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    // ------------------------------------------------------------------
    // Reads and patches
    // ------------------------------------------------------------------

    pub fn read_u8(&self, offset: usize) -> u8 {
        self.bytes[offset]
    }

    pub fn read_u16(&self, offset: usize) -> u16 {
        u16::from_le_bytes(self.bytes[offset..offset + 2].try_into().unwrap())
    }

    pub fn read_u32(&self, offset: usize) -> u32 {
        u32::from_le_bytes(self.bytes[offset..offset + 4].try_into().unwrap())
    }

    pub fn read_i32(&self, offset: usize) -> i32 {
        self.read_u32(offset) as i32
    }

    pub fn read_u64(&self, offset: usize) -> u64 {
        u64::from_le_bytes(self.bytes[offset..offset + 8].try_into().unwrap())
    }

    pub fn read_i64(&self, offset: usize) -> i64 {
        self.read_u64(offset) as i64
    }

    pub fn write_u8(&mut self, offset: usize, v: u8) {
        self.bytes[offset] = v;
    }

    pub fn write_u32(&mut self, offset: usize, v: u32) {
        self.bytes[offset..offset + 4].copy_from_slice(&v.to_le_bytes());
    }

    pub fn write_i32(&mut self, offset: usize, v: i32) {
        self.write_u32(offset, v as u32);
    }

    pub fn write_u64(&mut self, offset: usize, v: u64) {
        self.bytes[offset..offset + 8].copy_from_slice(&v.to_le_bytes());
    }

    /// Overwrite `len` bytes at `offset` with NOPs.
    pub fn nop_out(&mut self, offset: usize, len: usize) {
        for b in &mut self.bytes[offset..offset + len] {
            *b = Op::Nop as u8;
        }
    }

    /// Insert raw bytes at `offset`, shifting the tail right.
    pub fn insert_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.bytes.splice(offset..offset, bytes.iter().copied());
    }

    // ------------------------------------------------------------------
    // Typed emitters (return the instruction's start offset)
    // ------------------------------------------------------------------

    pub fn emit_nop(&mut self) -> usize {
        self.emit(Op::Nop)
    }

    pub fn emit_exit(&mut self) -> usize {
        self.emit(Op::Exit)
    }

    pub fn emit_lbl(&mut self, id: u32) -> usize {
        let at = self.emit(Op::Lbl);
        self.raw_u32(id);
        at
    }

    fn emit_rrr(&mut self, op: Op, dst: Reg, a: Reg, b: Reg) -> usize {
        let at = self.emit(op);
        self.raw_u8(dst.0);
        self.raw_u8(a.0);
        self.raw_u8(b.0);
        at
    }

    fn emit_rri(&mut self, op: Op, dst: Reg, a: Reg, imm: u8) -> usize {
        let at = self.emit(op);
        self.raw_u8(dst.0);
        self.raw_u8(a.0);
        self.raw_u8(imm);
        at
    }

    pub fn emit_add(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Add, dst, a, b)
    }

    pub fn emit_add_imm(&mut self, dst: Reg, a: Reg, imm: u8) -> usize {
        self.emit_rri(Op::AddImm, dst, a, imm)
    }

    pub fn emit_sub(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Sub, dst, a, b)
    }

    pub fn emit_sub_imm(&mut self, dst: Reg, a: Reg, imm: u8) -> usize {
        self.emit_rri(Op::SubImm, dst, a, imm)
    }

    pub fn emit_mul(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Mul, dst, a, b)
    }

    pub fn emit_div(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Div, dst, a, b)
    }

    pub fn emit_mod(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Mod, dst, a, b)
    }

    pub fn emit_gt(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Gt, dst, a, b)
    }

    pub fn emit_gte(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Gte, dst, a, b)
    }

    pub fn emit_lt(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Lt, dst, a, b)
    }

    pub fn emit_lte(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Lte, dst, a, b)
    }

    pub fn emit_lte_imm(&mut self, dst: Reg, a: Reg, imm: i8) -> usize {
        self.emit_rri(Op::LteImm, dst, a, imm as u8)
    }

    pub fn emit_eq(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Eq, dst, a, b)
    }

    pub fn emit_neq(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Neq, dst, a, b)
    }

    pub fn emit_and(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::And, dst, a, b)
    }

    pub fn emit_and_imm(&mut self, dst: Reg, a: Reg, imm: u8) -> usize {
        self.emit_rri(Op::AndImm, dst, a, imm)
    }

    pub fn emit_or(&mut self, dst: Reg, a: Reg, b: Reg) -> usize {
        self.emit_rrr(Op::Or, dst, a, b)
    }

    pub fn emit_xor_imm(&mut self, dst: Reg, a: Reg, imm: u8) -> usize {
        self.emit_rri(Op::XorImm, dst, a, imm)
    }

    pub fn emit_mv_reg_sp(&mut self, dst: Reg) -> usize {
        let at = self.emit(Op::MvRegSp);
        self.raw_u8(dst.0);
        at
    }

    pub fn emit_mv_reg_ip(&mut self, dst: Reg) -> usize {
        let at = self.emit(Op::MvRegIp);
        self.raw_u8(dst.0);
        at
    }

    pub fn emit_mv_reg_u8(&mut self, dst: Reg, v: u8) -> usize {
        let at = self.emit(Op::MvRegU8);
        self.raw_u8(dst.0);
        self.raw_u8(v);
        at
    }

    pub fn emit_mv_reg_u16(&mut self, dst: Reg, v: u16) -> usize {
        let at = self.emit(Op::MvRegU16);
        self.raw_u8(dst.0);
        self.raw_u16(v);
        at
    }

    pub fn emit_mv_reg_u32(&mut self, dst: Reg, v: u32) -> usize {
        let at = self.emit(Op::MvRegU32);
        self.raw_u8(dst.0);
        self.raw_u32(v);
        at
    }

    pub fn emit_mv_reg_u64(&mut self, dst: Reg, v: u64) -> usize {
        let at = self.emit(Op::MvRegU64);
        self.raw_u8(dst.0);
        self.raw_u64(v);
        at
    }

    pub fn emit_mv_reg_i8(&mut self, dst: Reg, v: i8) -> usize {
        let at = self.emit(Op::MvRegI8);
        self.raw_u8(dst.0);
        self.raw_u8(v as u8);
        at
    }

    pub fn emit_mv_reg_i16(&mut self, dst: Reg, v: i16) -> usize {
        let at = self.emit(Op::MvRegI16);
        self.raw_u8(dst.0);
        self.raw_u16(v as u16);
        at
    }

    pub fn emit_mv_reg_i32(&mut self, dst: Reg, v: i32) -> usize {
        let at = self.emit(Op::MvRegI32);
        self.raw_u8(dst.0);
        self.raw_u32(v as u32);
        at
    }

    pub fn emit_mv_reg_i64(&mut self, dst: Reg, v: i64) -> usize {
        let at = self.emit(Op::MvRegI64);
        self.raw_u8(dst.0);
        self.raw_u64(v as u64);
        at
    }

    pub fn emit_mv_reg_reg(&mut self, width: u32, dst: Reg, src: Reg) -> usize {
        let at = self.emit(Op::mv_reg_reg(width));
        self.raw_u8(dst.0);
        self.raw_u8(src.0);
        at
    }

    pub fn emit_mv_loc_reg(&mut self, width: u32, dst_addr: Reg, src: Reg) -> usize {
        let at = self.emit(Op::mv_loc_reg(width));
        self.raw_u8(dst_addr.0);
        self.raw_u8(src.0);
        at
    }

    pub fn emit_mv_reg_loc(&mut self, width: u32, dst: Reg, src_addr: Reg) -> usize {
        let at = self.emit(Op::mv_reg_loc(width));
        self.raw_u8(dst.0);
        self.raw_u8(src_addr.0);
        at
    }

    pub fn emit_push(&mut self, width: u32, src: Reg) -> usize {
        let at = self.emit(Op::push(width));
        self.raw_u8(src.0);
        at
    }

    pub fn emit_pop(&mut self, width: u32, dst: Reg) -> usize {
        let at = self.emit(Op::pop(width));
        self.raw_u8(dst.0);
        at
    }

    /// The displacement is a label id until the linker resolves it.
    pub fn emit_jmp(&mut self, disp_or_label: i32) -> usize {
        let at = self.emit(Op::Jmp);
        self.raw_u32(disp_or_label as u32);
        at
    }

    pub fn emit_jrnz(&mut self, test: Reg, disp_or_label: i32) -> usize {
        let at = self.emit(Op::Jrnz);
        self.raw_u8(test.0);
        self.raw_u32(disp_or_label as u32);
        at
    }

    pub fn emit_jrz(&mut self, test: Reg, disp_or_label: i32) -> usize {
        let at = self.emit(Op::Jrz);
        self.raw_u8(test.0);
        self.raw_u32(disp_or_label as u32);
        at
    }

    /// The target is a function-label id until the linker resolves it.
    pub fn emit_call(&mut self, target_or_label: u64) -> usize {
        let at = self.emit(Op::Call);
        self.raw_u64(target_or_label);
        at
    }

    pub fn emit_call_native(&mut self, native_id: u64) -> usize {
        let at = self.emit(Op::CallNative);
        self.raw_u64(native_id);
        at
    }

    pub fn emit_call_reg(&mut self, target: Reg) -> usize {
        let at = self.emit(Op::CallReg);
        self.raw_u8(target.0);
        at
    }

    pub fn emit_ret(&mut self, args_bytes: u8) -> usize {
        let at = self.emit(Op::Ret);
        self.raw_u8(args_bytes);
        at
    }

    pub fn emit_salloc(&mut self, dst: Reg, bytes: u8) -> usize {
        let at = self.emit(Op::Salloc);
        self.raw_u8(dst.0);
        self.raw_u8(bytes);
        at
    }

    pub fn emit_sdealloc(&mut self, bytes: u8) -> usize {
        let at = self.emit(Op::Sdealloc);
        self.raw_u8(bytes);
        at
    }
}

impl std::fmt::Display for Bytecode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&disasm::disassemble(self))
    }
}

/// Iterator over instruction boundaries.
pub struct OpIter<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl Iterator for OpIter<'_> {
    type Item = (usize, Op);

    fn next(&mut self) -> Option<(usize, Op)> {
        let byte = *self.bytes.get(self.offset)?;
        let op = Op::from_byte(byte)?;
        let at = self.offset;
        self.offset += op.size();
        Some((at, op))
    }
}

/// Index of a function within a program.
pub type FunctionId = usize;

/// Map from call-label id to the external function name it refers to.
pub type Symbols = HashMap<u32, String>;

/// One program function: a named bytecode chunk or a native reference.
#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    body: FunctionBody,
}

#[derive(Debug, Clone)]
pub enum FunctionBody {
    Bytecode { code: Bytecode, symbols: Symbols },
    Native(u64),
}

impl Function {
    pub fn bytecode(name: impl Into<String>, code: Bytecode) -> Function {
        Function {
            name: name.into(),
            body: FunctionBody::Bytecode {
                code,
                symbols: Symbols::new(),
            },
        }
    }

    pub fn native(name: impl Into<String>, id: u64) -> Function {
        Function {
            name: name.into(),
            body: FunctionBody::Native(id),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn is_bytecode(&self) -> bool {
        matches!(self.body, FunctionBody::Bytecode { .. })
    }

    pub fn is_native(&self) -> bool {
        matches!(self.body, FunctionBody::Native(_))
    }

    pub fn native_id(&self) -> Option<u64> {
        match self.body {
            FunctionBody::Native(id) => Some(id),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&Bytecode> {
        match &self.body {
            FunctionBody::Bytecode { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn code_mut(&mut self) -> Option<&mut Bytecode> {
        match &mut self.body {
            FunctionBody::Bytecode { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn symbols(&self) -> Option<&Symbols> {
        match &self.body {
            FunctionBody::Bytecode { symbols, .. } => Some(symbols),
            _ => None,
        }
    }

    pub fn symbols_mut(&mut self) -> Option<&mut Symbols> {
        match &mut self.body {
            FunctionBody::Bytecode { symbols, .. } => Some(symbols),
            _ => None,
        }
    }
}

/// An ordered set of functions that call each other by name.
#[derive(Debug, Clone, Default)]
pub struct Program {
    functions: Vec<Function>,
}

impl Program {
    pub fn new() -> Program {
        Program::default()
    }

    pub fn add_function(&mut self, function: Function) -> FunctionId {
        self.functions.push(function);
        self.functions.len() - 1
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn get(&self, id: FunctionId) -> &Function {
        &self.functions[id]
    }

    pub fn get_mut(&mut self, id: FunctionId) -> &mut Function {
        &mut self.functions[id]
    }

    pub fn by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }
}

impl std::fmt::Display for Program {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for function in &self.functions {
            if let Some(code) = function.code() {
                writeln!(f, "{}:", function.name)?;
                f.write_str(&disasm::disassemble(code))?;
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// A linked, flat bytecode image. Labels are gone, calls and jumps are
/// resolved, NOPs are elided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Executable {
    pub code: Bytecode,
}

impl Executable {
    pub fn new(code: Bytecode) -> Executable {
        Executable { code }
    }

    /// Byte at `offset`, with ERR padding past the end.
    pub fn byte(&self, offset: u64) -> u8 {
        self.code
            .as_slice()
            .get(offset as usize)
            .copied()
            .unwrap_or(Op::Err as u8)
    }
}

impl std::fmt::Display for Executable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&disasm::disassemble(&self.code))
    }
}
