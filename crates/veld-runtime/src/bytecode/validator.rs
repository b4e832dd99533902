//! Executable validator — advisory static checks after linking
//!
//! Three passes over a linked image:
//! 1. **Decode** — every byte reached in instruction order is a known opcode
//!    with all of its operand bytes present.
//! 2. **Jump targets** — relative jump destinations land on an instruction
//!    boundary inside the image.
//! 3. **Call targets** — absolute call destinations land on an instruction
//!    boundary.
//!
//! The validator never affects execution; tests run it once after linking.

use super::{Executable, Op};
use std::collections::HashSet;

/// A validation finding with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub offset: usize,
    pub kind: ValidationErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationErrorKind {
    UnknownOpcode(u8),
    TruncatedInstruction { opcode: &'static str },
    JumpOutOfBounds { target: i64, len: usize },
    JumpMisaligned { target: usize },
    CallOutOfBounds { target: u64, len: usize },
    CallMisaligned { target: usize },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "offset {:#06x}: {}", self.offset, self.kind)
    }
}

impl std::fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownOpcode(b) => write!(f, "unknown opcode {b:#04x}"),
            Self::TruncatedInstruction { opcode } => {
                write!(f, "instruction {opcode} is truncated")
            }
            Self::JumpOutOfBounds { target, len } => {
                write!(f, "jump target {target} is out of bounds (len={len})")
            }
            Self::JumpMisaligned { target } => {
                write!(f, "jump target {target} is not an instruction boundary")
            }
            Self::CallOutOfBounds { target, len } => {
                write!(f, "call target {target} is out of bounds (len={len})")
            }
            Self::CallMisaligned { target } => {
                write!(f, "call target {target} is not an instruction boundary")
            }
        }
    }
}

/// Validate a linked executable, collecting every problem found.
pub fn validate(exe: &Executable) -> Result<(), Vec<ValidationError>> {
    let code = &exe.code;
    let bytes = code.as_slice();
    let len = bytes.len();
    let mut errors = Vec::new();

    // Pass 1: decode and record instruction boundaries.
    let mut boundaries = HashSet::new();
    let mut offset = 0;
    while offset < len {
        let Some(op) = Op::from_byte(bytes[offset]) else {
            errors.push(ValidationError {
                offset,
                kind: ValidationErrorKind::UnknownOpcode(bytes[offset]),
            });
            return Err(errors);
        };
        if offset + op.size() > len {
            errors.push(ValidationError {
                offset,
                kind: ValidationErrorKind::TruncatedInstruction {
                    opcode: op.mnemonic(),
                },
            });
            return Err(errors);
        }
        boundaries.insert(offset);
        offset += op.size();
    }

    // Passes 2 and 3: control-flow targets.
    for (offset, op) in code.ops() {
        match op {
            Op::Jmp | Op::Jrz | Op::Jrnz => {
                let disp = if op == Op::Jmp {
                    code.read_i32(offset + 1)
                } else {
                    code.read_i32(offset + 2)
                };
                let target = offset as i64 + i64::from(disp);
                if target < 0 || target as usize >= len {
                    errors.push(ValidationError {
                        offset,
                        kind: ValidationErrorKind::JumpOutOfBounds { target, len },
                    });
                } else if !boundaries.contains(&(target as usize)) {
                    errors.push(ValidationError {
                        offset,
                        kind: ValidationErrorKind::JumpMisaligned {
                            target: target as usize,
                        },
                    });
                }
            }
            Op::Call => {
                let target = code.read_u64(offset + 1);
                if target as usize >= len {
                    errors.push(ValidationError {
                        offset,
                        kind: ValidationErrorKind::CallOutOfBounds { target, len },
                    });
                } else if !boundaries.contains(&(target as usize)) {
                    errors.push(ValidationError {
                        offset,
                        kind: ValidationErrorKind::CallMisaligned {
                            target: target as usize,
                        },
                    });
                }
            }
            _ => {}
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
