//! Linker: program → executable
//!
//! Concatenates every bytecode chunk in declaration order, then:
//! 1. erases label markers, recording `label id → absolute offset`,
//! 2. resolves CALL operands (label ids) through each chunk's symbol table —
//!    calls to native functions are rewritten to CALL_NATIVE with the native
//!    id, calls to bytecode functions get the callee's start offset,
//! 3. rewrites relative-jump operands (label ids) into 32-bit displacements
//!    measured from the jump opcode,
//! 4. elides NOPs: displacements shrink by the NOP bytes they span, absolute
//!    call targets by the NOP bytes before them, then the code compacts.
//!
//! Duplicate function names and unresolvable labels or call symbols are link
//! errors.

use crate::bytecode::{Bytecode, Executable, Op, Program, Symbols};
use crate::error::CompileError;
use std::collections::{HashMap, HashSet};

pub fn link(program: &Program) -> Result<Executable, CompileError> {
    let mut seen = HashSet::new();
    for function in program.functions() {
        if !seen.insert(function.name().to_string()) {
            return Err(CompileError::Link(format!(
                "duplicate function name {:?}",
                function.name()
            )));
        }
    }

    // Layout: bytecode chunks are laid out in order; natives occupy no bytes.
    let mut code = Bytecode::new();
    let mut starts: HashMap<&str, u64> = HashMap::new();
    let mut natives: HashMap<&str, u64> = HashMap::new();
    let mut chunks: Vec<(usize, usize, &Symbols)> = Vec::new();

    for function in program.functions() {
        match (function.code(), function.native_id()) {
            (Some(chunk), _) => {
                let start = code.len();
                starts.insert(function.name(), start as u64);
                code.append(chunk);
                chunks.push((start, code.len(), function.symbols().unwrap()));
            }
            (None, Some(id)) => {
                natives.insert(function.name(), id);
            }
            _ => unreachable!("function is either bytecode or native"),
        }
    }

    // Pass 1: erase labels, remember their offsets.
    let mut labels: HashMap<u32, u64> = HashMap::new();
    let mut offset = 0;
    while offset < code.len() {
        let op = code.op_at(offset).ok_or_else(|| {
            CompileError::Link(format!("undecodable byte at offset {offset}"))
        })?;
        if op == Op::Lbl {
            let id = code.read_u32(offset + 1);
            if labels.insert(id, offset as u64).is_some() {
                return Err(CompileError::Link(format!("label {id} defined twice")));
            }
            code.nop_out(offset, Op::Lbl.size());
        }
        offset += op.size();
    }

    // Pass 2: resolve calls and jumps chunk by chunk (call labels are scoped
    // to the chunk's symbol table).
    for &(start, end, symbols) in &chunks {
        let mut offset = start;
        while offset < end {
            let op = code.op_at(offset).expect("validated in pass 1");
            match op {
                Op::Call => {
                    let label = code.read_u64(offset + 1);
                    let name = u32::try_from(label)
                        .ok()
                        .and_then(|l| symbols.get(&l))
                        .ok_or_else(|| {
                            CompileError::Link(format!(
                                "call at offset {offset} has no symbol for label {label}"
                            ))
                        })?;
                    if let Some(&target) = starts.get(name.as_str()) {
                        code.write_u64(offset + 1, target);
                    } else if let Some(&native) = natives.get(name.as_str()) {
                        code.write_u8(offset, Op::CallNative as u8);
                        code.write_u64(offset + 1, native);
                    } else {
                        return Err(CompileError::Link(format!(
                            "call to unknown function {name:?}"
                        )));
                    }
                }
                Op::Jmp | Op::Jrz | Op::Jrnz => {
                    let operand_at = if op == Op::Jmp { offset + 1 } else { offset + 2 };
                    let label = code.read_i32(operand_at) as u32;
                    let target = *labels.get(&label).ok_or_else(|| {
                        CompileError::Link(format!("jump to undefined label {label}"))
                    })?;
                    let disp = target as i64 - offset as i64;
                    code.write_i32(operand_at, disp as i32);
                }
                _ => {}
            }
            offset += op.size();
        }
    }

    elide_nops(&mut code);
    Ok(Executable::new(code))
}

/// Remove every NOP, keeping all jump and call targets pointing at the same
/// instructions.
fn elide_nops(code: &mut Bytecode) {
    // nop_bytes_before[i] = NOP bytes in [0, i). NOPs are one byte wide, so
    // byte count equals instruction count.
    let mut nop_bytes_before = vec![0u32; code.len() + 1];
    {
        let mut count = 0;
        let mut offset = 0;
        while offset < code.len() {
            let op = code.op_at(offset).expect("linked code decodes");
            for i in offset..offset + op.size() {
                nop_bytes_before[i] = count;
            }
            if op == Op::Nop {
                count += 1;
            }
            offset += op.size();
        }
        nop_bytes_before[code.len()] = count;
    }
    let between = |a: usize, b: usize| nop_bytes_before[b] - nop_bytes_before[a];

    // Fix displacements and absolute targets first.
    for (offset, op) in collect_ops(code) {
        match op {
            Op::Jmp | Op::Jrz | Op::Jrnz => {
                let operand_at = if op == Op::Jmp { offset + 1 } else { offset + 2 };
                let disp = code.read_i32(operand_at);
                let target = (offset as i64 + i64::from(disp)) as usize;
                let adjusted = if disp >= 0 {
                    disp - between(offset, target) as i32
                } else {
                    disp + between(target, offset) as i32
                };
                code.write_i32(operand_at, adjusted);
            }
            Op::Call => {
                let target = code.read_u64(offset + 1);
                let adjusted = target - u64::from(nop_bytes_before[target as usize]);
                code.write_u64(offset + 1, adjusted);
            }
            _ => {}
        }
    }

    // Slide non-NOP instructions left over the NOPs.
    let mut compacted = Vec::with_capacity(code.len());
    for (offset, op) in collect_ops(code) {
        if op != Op::Nop {
            compacted.extend_from_slice(&code.as_slice()[offset..offset + op.size()]);
        }
    }
    *code = Bytecode::from_bytes(compacted);
}

fn collect_ops(code: &Bytecode) -> Vec<(usize, Op)> {
    code.ops().collect()
}
