//! BASIC compiler core: semantic analysis, CFG construction, and QBE IL
//! emission.
//!
//! The lexer and parser live outside this crate and hand over a typed AST
//! (see [`ast`]); the DATA preprocessor hands over the flattened value
//! list (see [`data`]). This crate runs the middle and back end:
//!
//! 1. [`SemanticAnalyzer`] resolves and checks the tree against a scoped
//!    symbol table with a QBE-aligned type system.
//! 2. [`cfg::build_program`] turns the statement tree into one CFG per
//!    procedure: basic blocks plus typed edges.
//! 3. [`codegen::emit_program`] walks the CFGs and prints a single QBE IL
//!    translation unit, ready for the external QBE backend and C runtime.
//!
//! ```rust,ignore
//! use bqc::{compile_to_il, DataValues, Program};
//!
//! let program: Program = serde_json::from_str(&ast_json)?;
//! let out = compile_to_il(&program, &DataValues::default())?;
//! std::fs::write("out.ssa", out.il)?;
//! ```

pub mod ast;
pub mod builtins;
pub mod cfg;
pub mod codegen;
pub mod data;
pub mod diagnostics;
pub mod semantic;
pub mod symbols;
pub mod types;

pub use ast::Program;
pub use cfg::{build_program, ProgramCfg};
pub use codegen::{emit_program, CodeGenError};
pub use data::DataValues;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use semantic::SemanticAnalyzer;
pub use symbols::SymbolTable;
pub use types::{check_coercion, promote_types, Coercion, TypeDescriptor};

use tracing::debug;

/// Why a compilation produced no IL.
#[derive(Debug)]
pub enum CompileError {
    /// Semantic or CFG diagnostics at error severity
    Frontend(Diagnostics),
    /// An impossible state during emission; a bug, not a user error
    CodeGen(CodeGenError),
}

impl std::fmt::Display for CompileError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompileError::Frontend(diags) => write!(f, "{}", diags),
            CompileError::CodeGen(e) => write!(f, "internal error: {}", e),
        }
    }
}

impl std::error::Error for CompileError {}

/// A successful compilation: the IL text plus any warnings worth showing.
pub struct CompileOutput {
    pub il: String,
    pub warnings: Vec<Diagnostic>,
}

/// Run semantic analysis alone. Errors abort the pipeline; the returned
/// table is complete for tooling either way.
pub fn analyze(program: &Program, data: &DataValues) -> (SymbolTable, Diagnostics) {
    SemanticAnalyzer::new().analyze(program, data)
}

/// The whole middle and back end: analyze, build CFGs, emit QBE IL.
///
/// The first error-severity diagnostic aborts before CFG construction, and
/// CFG errors abort before emission, so no partial IL is ever produced.
pub fn compile_to_il(
    program: &Program,
    data: &DataValues,
) -> Result<CompileOutput, CompileError> {
    debug!("semantic analysis");
    let (symbols, diags) = analyze(program, data);
    if diags.has_errors() {
        return Err(CompileError::Frontend(diags));
    }
    let warnings = diags.into_vec();

    debug!("cfg construction");
    let program_cfg = cfg::build_program(program, &symbols).map_err(CompileError::Frontend)?;

    debug!("emission");
    let il = codegen::emit_program(&program_cfg, &symbols, data)
        .map_err(CompileError::CodeGen)?;
    Ok(CompileOutput { il, warnings })
}
