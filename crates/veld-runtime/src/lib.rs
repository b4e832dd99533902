//! Veld Runtime - language back end and virtual machine
//!
//! This library provides the middle and back end of the Veld compiler:
//! - Lowering of the resolved, typechecked AST into a stack-discipline core IR
//! - Operand-stack depth analysis
//! - Bytecode generation with register allocation and frame layout
//! - A dependency-graph peephole optimizer
//! - Linking (label erasure, call resolution, NOP elision)
//! - The register/stack hybrid VM and its native-function table
//!
//! The front end (lexer, parser, name resolution, typechecking) is external;
//! it hands this crate a fully annotated [`ast::Ast`].

/// Veld runtime version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Public API modules
pub mod ast;
pub mod bytecode;
pub mod codegen;
pub mod core;
pub mod error;
pub mod link;
pub mod lower;
pub mod optimizer;
pub mod pipeline;
pub mod stack_analysis;
pub mod types;
pub mod vm;

// Re-export commonly used types
pub use ast::Ast;
pub use bytecode::{disassemble, Bytecode, Executable, Function, Op, Program, Reg};
pub use codegen::generate;
pub use error::{CompileError, RuntimeError};
pub use link::link;
pub use lower::lower;
pub use optimizer::{optimize_program, OptimizationStats};
pub use pipeline::Pipeline;
pub use stack_analysis::{analyze_function, StackAnalysis};
pub use types::{NumberKind, Type};
pub use vm::{interpret, CaptureBuffer, NativeRegistry, VM};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_bytecode_smoke() {
        let mut bc = Bytecode::new();
        bc.emit_mv_reg_u8(Reg(1), 2);
        bc.emit_mv_reg_u8(Reg(2), 40);
        bc.emit_add(Reg(3), Reg(1), Reg(2));
        bc.emit_exit();

        let mut program = Program::new();
        program.add_function(Function::bytecode("_main", bc));
        let vm = interpret(link(&program).unwrap()).unwrap();
        assert_eq!(vm.register(Reg(3)), 42);
    }
}
