//! Bytecode optimizer
//!
//! Operates on a `Program` before linking, while jump operands are still
//! symbolic label ids (so instructions can be inserted freely). Three passes
//! repeat until a full cycle changes nothing:
//!
//! 1. `optimize_dependencies` — pair rewrites along dependency-graph edges
//!    (push/pop fusion, literal folding, store fusion, operand forwarding).
//! 2. `optimize_single_ops` — wide literal moves shrink to narrow ones,
//!    identity moves disappear.
//! 3. `remove_dependantless` — moves nobody reads become NOPs.
//!
//! Rewritten sites are overwritten with NOPs of their full width; the
//! linker elides them after address resolution. Running the optimizer on its
//! own output is a no-op (the fixed point is genuine), which the test suite
//! checks.

mod dead_code;
mod graph;
mod peephole;

pub use graph::{build_graph, Dependency, FunctionGraph, ProgramGraph};

use crate::bytecode::{Op, Program, Reg};
use dead_code::remove_dependantless;
use peephole::try_rewrite_pair;

/// Counters reported by one `optimize_program` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptimizationStats {
    /// Producer/consumer pairs collapsed into single instructions.
    pub pair_rewrites: usize,
    /// Literal shrinks and identity-move removals.
    pub single_simplifications: usize,
    /// Dependant-less instructions removed.
    pub removed_instructions: usize,
    /// Full cycles until the fixed point.
    pub passes: usize,
}

impl OptimizationStats {
    pub fn changed_anything(&self) -> bool {
        self.pair_rewrites + self.single_simplifications + self.removed_instructions > 0
    }
}

/// Optimize every bytecode function of the program in place.
pub fn optimize_program(program: &mut Program) -> OptimizationStats {
    let mut graph = build_graph(program);
    let mut stats = OptimizationStats::default();

    loop {
        stats.passes += 1;
        let pairs = optimize_dependencies(program, &mut graph);
        let singles = optimize_single_ops(program, &mut graph);
        let removed = remove_dependantless(program, &mut graph);

        stats.pair_rewrites += pairs;
        stats.single_simplifications += singles;
        stats.removed_instructions += removed;

        if pairs + singles + removed == 0 {
            break;
        }
    }
    stats
}

/// Collapse producer/consumer pairs until no edge admits a rewrite.
/// Returns the number of rewrites performed.
fn optimize_dependencies(program: &mut Program, graph: &mut ProgramGraph) -> usize {
    let mut rewrites = 0;

    for (id, function) in program.functions_mut().iter_mut().enumerate() {
        let Some(code) = function.code_mut() else { continue };
        let Some(local) = graph.get_mut(&id) else { continue };

        loop {
            let mut applied: Option<(u64, u64, u64)> = None;
            for edge in local.dependencies.clone() {
                if let Some((replacement, width)) =
                    try_rewrite_pair(code, edge.depends_on, edge.instruction)
                {
                    // The insertion shifted everything at or after it.
                    local.add_offset(replacement, width);
                    applied = Some((edge.depends_on, edge.instruction, replacement));
                    break;
                }
            }
            let Some((producer, consumer, replacement)) = applied else {
                break;
            };
            rewrites += 1;

            // Re-route edges through the replacement: its consumers are the
            // consumer's consumers, its producers are the producer's
            // producers (and whatever else fed the consumer).
            let mut rerouted = Vec::new();
            for edge in &local.dependencies {
                if edge.instruction == consumer && edge.depends_on == producer {
                    continue;
                }
                if edge.depends_on == consumer {
                    rerouted.push(Dependency {
                        instruction: edge.instruction,
                        depends_on: replacement,
                    });
                } else if edge.instruction == producer || edge.instruction == consumer {
                    rerouted.push(Dependency {
                        instruction: replacement,
                        depends_on: edge.depends_on,
                    });
                }
            }
            local.dependencies.retain(|edge| {
                edge.instruction != producer
                    && edge.instruction != consumer
                    && edge.depends_on != producer
                    && edge.depends_on != consumer
            });
            local.dependencies.extend(rerouted);
        }
    }
    rewrites
}

/// Single-instruction simplifications:
/// - a 64-bit literal move whose value fits a byte becomes `MV_REG_U8`,
/// - a 64-bit register move onto itself disappears.
///
/// Returns the number of simplifications performed.
fn optimize_single_ops(program: &mut Program, graph: &mut ProgramGraph) -> usize {
    let mut simplified = 0;

    for (id, function) in program.functions_mut().iter_mut().enumerate() {
        let Some(code) = function.code_mut() else { continue };
        let Some(local) = graph.get_mut(&id) else { continue };

        loop {
            let mut shrink: Option<usize> = None;
            let mut identity: Option<usize> = None;

            for (offset, op) in code.ops() {
                match op {
                    Op::MvRegI64 | Op::MvRegU64 => {
                        let value = code.read_i64(offset + 2);
                        if (0..=255).contains(&value) {
                            shrink = Some(offset);
                            break;
                        }
                    }
                    Op::Mv64RegReg => {
                        if code.read_u8(offset + 1) == code.read_u8(offset + 2) {
                            identity = Some(offset);
                            break;
                        }
                    }
                    _ => {}
                }
            }

            if let Some(offset) = shrink {
                let dst = Reg(code.read_u8(offset + 1));
                let value = code.read_i64(offset + 2) as u8;

                let insert_at = offset + Op::MvRegI64.size();
                let mut replacement = crate::bytecode::Bytecode::new();
                replacement.emit_mv_reg_u8(dst, value);
                code.insert_bytes(insert_at, replacement.as_slice());
                code.nop_out(offset, Op::MvRegI64.size());

                local.add_offset(insert_at as u64, Op::MvRegU8.size() as u32);
                for edge in &mut local.dependencies {
                    if edge.instruction == offset as u64 {
                        edge.instruction = insert_at as u64;
                    }
                    if edge.depends_on == offset as u64 {
                        edge.depends_on = insert_at as u64;
                    }
                }
                simplified += 1;
                continue;
            }

            if let Some(offset) = identity {
                code.nop_out(offset, Op::Mv64RegReg.size());

                // Bridge the removed move: its consumers now depend on its
                // producers.
                let producers: Vec<u64> = local
                    .dependencies
                    .iter()
                    .filter(|e| e.instruction == offset as u64)
                    .map(|e| e.depends_on)
                    .collect();
                let consumers: Vec<u64> = local
                    .dependencies
                    .iter()
                    .filter(|e| e.depends_on == offset as u64)
                    .map(|e| e.instruction)
                    .collect();
                local.dependencies.retain(|e| {
                    e.instruction != offset as u64 && e.depends_on != offset as u64
                });
                for &consumer in &consumers {
                    for &producer in &producers {
                        local.dependencies.push(Dependency {
                            instruction: consumer,
                            depends_on: producer,
                        });
                    }
                }
                simplified += 1;
                continue;
            }

            break;
        }
    }
    simplified
}
