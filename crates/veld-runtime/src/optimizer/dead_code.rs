//! Dependant-less instruction removal
//!
//! A register-to-register move whose result no instruction consumes has no
//! observable effect and becomes NOPs. Only moves into general registers
//! qualify: a write to `ret` is the cross-chunk result channel and has
//! readers the per-function graph cannot see.

use super::graph::ProgramGraph;
use crate::bytecode::{Op, Program, RESERVED_BASE};

pub(super) fn remove_dependantless(program: &mut Program, graph: &mut ProgramGraph) -> usize {
    let mut removed = 0;
    for (id, function) in program.functions_mut().iter_mut().enumerate() {
        let Some(code) = function.code_mut() else { continue };
        let Some(local) = graph.get_mut(&id) else { continue };

        let mut dead = Vec::new();
        for (offset, op) in code.ops() {
            if !matches!(
                op,
                Op::Mv8RegReg | Op::Mv16RegReg | Op::Mv32RegReg | Op::Mv64RegReg
            ) {
                continue;
            }
            if code.read_u8(offset + 1) >= RESERVED_BASE {
                continue;
            }
            let has_dependants = local
                .dependencies
                .iter()
                .any(|d| d.depends_on == offset as u64);
            if !has_dependants {
                dead.push(offset);
            }
        }

        for offset in &dead {
            code.nop_out(*offset, 3);
        }
        local
            .dependencies
            .retain(|d| !dead.contains(&(d.instruction as usize)));
        removed += dead.len();
    }
    removed
}
