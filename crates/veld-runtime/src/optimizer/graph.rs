//! Instruction dependency graphs
//!
//! One linear scan per function records, for every instruction that consumes
//! a value, an edge to the instruction that produced it:
//! - register reads point at the latest write of that register,
//! - a POP points at the PUSH it pairs with (LIFO pairing, reset at any
//!   instruction that moves sp out of push/pop discipline or at a control
//!   transfer),
//! - a CALL points at the latest write of register 0 and invalidates all
//!   caller-save tracking.
//!
//! The graph proposes rewrite candidates; every rewrite re-validates against
//! the actual bytes, so a stale edge can only cost a missed optimization,
//! never a wrong one.

use crate::bytecode::{Op, Program, REGISTER_COUNT, RET};
use std::collections::HashMap;

/// `instruction` consumes a value produced by `depends_on` (byte offsets).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependency {
    pub instruction: u64,
    pub depends_on: u64,
}

/// Per-function dependency edges.
#[derive(Debug, Clone, Default)]
pub struct FunctionGraph {
    pub dependencies: Vec<Dependency>,
}

impl FunctionGraph {
    /// Shift every endpoint at or after `loc` by `size` bytes (a rewrite
    /// inserted an instruction there).
    pub fn add_offset(&mut self, loc: u64, size: u32) {
        for dep in &mut self.dependencies {
            if dep.depends_on >= loc {
                dep.depends_on += u64::from(size);
            }
            if dep.instruction >= loc {
                dep.instruction += u64::from(size);
            }
        }
    }
}

/// Graphs for every bytecode function of a program, keyed by function index.
pub type ProgramGraph = HashMap<usize, FunctionGraph>;

pub fn build_graph(program: &Program) -> ProgramGraph {
    let mut graph = ProgramGraph::new();
    for (id, function) in program.functions().iter().enumerate() {
        let Some(code) = function.code() else { continue };

        let mut latest_writes: [Option<u64>; REGISTER_COUNT] = [None; REGISTER_COUNT];
        let mut push_stack: Vec<u64> = Vec::new();
        let mut local = FunctionGraph::default();

        let read = |latest: &[Option<u64>; REGISTER_COUNT],
                    local: &mut FunctionGraph,
                    at: u64,
                    r: u8| {
            if let Some(writer) = latest[r as usize] {
                local.dependencies.push(Dependency {
                    instruction: at,
                    depends_on: writer,
                });
            }
        };

        for (offset, op) in code.ops() {
            let at = offset as u64;
            match op {
                Op::Add
                | Op::Sub
                | Op::Mul
                | Op::Div
                | Op::Mod
                | Op::Gt
                | Op::Gte
                | Op::Lt
                | Op::Lte
                | Op::Eq
                | Op::Neq
                | Op::And
                | Op::Or => {
                    read(&latest_writes, &mut local, at, code.read_u8(offset + 2));
                    read(&latest_writes, &mut local, at, code.read_u8(offset + 3));
                    latest_writes[code.read_u8(offset + 1) as usize] = Some(at);
                }
                Op::AddImm | Op::SubImm | Op::AndImm | Op::LteImm | Op::XorImm => {
                    read(&latest_writes, &mut local, at, code.read_u8(offset + 2));
                    latest_writes[code.read_u8(offset + 1) as usize] = Some(at);
                }
                Op::MvRegU8
                | Op::MvRegU16
                | Op::MvRegU32
                | Op::MvRegU64
                | Op::MvRegI8
                | Op::MvRegI16
                | Op::MvRegI32
                | Op::MvRegI64
                | Op::MvRegSp
                | Op::MvRegIp => {
                    latest_writes[code.read_u8(offset + 1) as usize] = Some(at);
                }
                Op::Mv8RegReg | Op::Mv16RegReg | Op::Mv32RegReg | Op::Mv64RegReg => {
                    read(&latest_writes, &mut local, at, code.read_u8(offset + 2));
                    latest_writes[code.read_u8(offset + 1) as usize] = Some(at);
                }
                Op::Mv8LocReg | Op::Mv16LocReg | Op::Mv32LocReg | Op::Mv64LocReg => {
                    read(&latest_writes, &mut local, at, code.read_u8(offset + 1));
                    read(&latest_writes, &mut local, at, code.read_u8(offset + 2));
                }
                Op::Mv8RegLoc | Op::Mv16RegLoc | Op::Mv32RegLoc | Op::Mv64RegLoc => {
                    read(&latest_writes, &mut local, at, code.read_u8(offset + 2));
                    latest_writes[code.read_u8(offset + 1) as usize] = Some(at);
                }
                Op::Push8 | Op::Push16 | Op::Push32 | Op::Push64 => {
                    read(&latest_writes, &mut local, at, code.read_u8(offset + 1));
                    push_stack.push(at);
                }
                Op::Pop8 | Op::Pop16 | Op::Pop32 | Op::Pop64 => {
                    if let Some(push) = push_stack.pop() {
                        local.dependencies.push(Dependency {
                            instruction: at,
                            depends_on: push,
                        });
                    }
                    latest_writes[code.read_u8(offset + 1) as usize] = Some(at);
                }
                Op::Jrnz | Op::Jrz => {
                    read(&latest_writes, &mut local, at, code.read_u8(offset + 1));
                    push_stack.clear();
                }
                Op::Jmp | Op::Lbl | Op::Ret => {
                    // Join points and transfers invalidate push/pop pairing.
                    push_stack.clear();
                }
                Op::Salloc => {
                    // sp moves outside push/pop discipline.
                    push_stack.clear();
                    latest_writes[code.read_u8(offset + 1) as usize] = Some(at);
                }
                Op::Sdealloc => {
                    push_stack.clear();
                }
                Op::Call => {
                    // Argument bytes flow from the code that filled register
                    // 0 last; capture the edge before the call clobbers the
                    // caller-save half of the file.
                    let arg_writer = latest_writes[0];
                    for w in latest_writes.iter_mut().take(32) {
                        *w = None;
                    }
                    push_stack.clear();
                    latest_writes[RET.0 as usize] = Some(at);
                    if let Some(writer) = arg_writer {
                        local.dependencies.push(Dependency {
                            instruction: at,
                            depends_on: writer,
                        });
                    }
                }
                Op::CallNative | Op::CallReg => {
                    if op == Op::CallReg {
                        read(&latest_writes, &mut local, at, code.read_u8(offset + 1));
                    }
                    for w in latest_writes.iter_mut().take(32) {
                        *w = None;
                    }
                    push_stack.clear();
                    latest_writes[RET.0 as usize] = Some(at);
                }
                Op::Nop | Op::Exit | Op::Err => {}
            }
        }

        graph.insert(id, local);
    }
    graph
}
