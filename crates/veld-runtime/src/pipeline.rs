//! Pipeline driver
//!
//! Ties the back-end stages together: lower → generate → (optimize) → link.
//! Extra functions — hand-written bytecode chunks or native references from
//! other modules — are injected into the program before linking and
//! participate in name resolution exactly like compiled functions.

use crate::ast::Ast;
use crate::bytecode::{Executable, Function, Program};
use crate::codegen;
use crate::error::CompileError;
use crate::link;
use crate::lower;
use crate::optimizer;

/// Back-end driver with optimization toggle and module injection.
#[derive(Default)]
pub struct Pipeline {
    optimize: bool,
    extra_functions: Vec<Function>,
}

impl Pipeline {
    /// A pipeline with the optimizer enabled.
    pub fn new() -> Pipeline {
        Pipeline {
            optimize: true,
            extra_functions: Vec::new(),
        }
    }

    /// A pipeline that emits unoptimized code.
    pub fn without_optimization() -> Pipeline {
        Pipeline {
            optimize: false,
            extra_functions: Vec::new(),
        }
    }

    /// Link `function` alongside the compiled program (a module's bytecode
    /// or a native registration).
    pub fn with_function(mut self, function: Function) -> Pipeline {
        self.extra_functions.push(function);
        self
    }

    /// Lower and generate, inject extra functions, optimize if enabled.
    pub fn compile(&self, ast: &mut Ast) -> Result<Program, CompileError> {
        let core = lower::lower(ast)?;
        let mut program = codegen::generate(&core)?;
        for function in &self.extra_functions {
            program.add_function(function.clone());
        }
        if self.optimize {
            optimizer::optimize_program(&mut program);
        }
        Ok(program)
    }

    /// Full build: compile then link into a flat executable.
    pub fn build(&self, ast: &mut Ast) -> Result<Executable, CompileError> {
        let program = self.compile(ast)?;
        link::link(&program)
    }
}
