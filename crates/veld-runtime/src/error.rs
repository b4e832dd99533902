//! Error types for the compiler back end and the VM
//!
//! Compile-time stages report `CompileError` and unwind to the driver; no
//! partial output is produced. The VM reports `RuntimeError` for abnormal
//! halts; normal termination (EXIT) is not an error.

use thiserror::Error;

/// Error raised by any compile-time stage (lowering through linking).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CompileError {
    /// The lowerer met an AST shape it cannot translate.
    #[error("lowering error: {0}")]
    Lower(String),

    /// The stack analyzer found inconsistent operand depths.
    #[error("stack analysis error: {0}")]
    StackAnalysis(String),

    /// The bytecode generator could not emit code (register exhaustion,
    /// unsupported node, invalid move width).
    #[error("codegen error: {0}")]
    Codegen(String),

    /// The linker could not resolve the program (dangling label, unknown or
    /// duplicate function).
    #[error("link error: {0}")]
    Link(String),
}

/// Error raised by the VM during execution. Reaching EXIT is a normal halt
/// and is not represented here.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// Executed an ERR byte (usually a read past the end of the bytecode).
    #[error("hit ERR instruction at offset {0}")]
    ErrInstruction(u64),

    /// A byte that does not decode to any opcode.
    #[error("unknown opcode {0:#04x} at offset {1}")]
    UnknownOpcode(u8, u64),

    /// Push or stack allocation past the end of the stack.
    #[error("stack overflow (sp = {sp}, requested {requested} bytes)")]
    StackOverflow { sp: u64, requested: u64 },

    /// Pop or stack deallocation below the stack base.
    #[error("stack underflow (sp = {sp}, requested {requested} bytes)")]
    StackUnderflow { sp: u64, requested: u64 },

    /// Load or store through an address outside the stack.
    #[error("stack access out of bounds (address = {address}, {size} bytes)")]
    BadAddress { address: u64, size: u64 },

    #[error("division by zero")]
    DivisionByZero,

    /// CALL_NATIVE with an id the registry does not define.
    #[error("unknown native function id {0}")]
    UnknownNative(u64),

    /// A native function that is registered but not available in this build.
    #[error("native function {0:?} is not supported here")]
    UnsupportedNative(&'static str),

    /// A native handler failed (I/O on the output sink, bad arguments).
    #[error("native function error: {0}")]
    Native(String),
}
