// This module defines error types for the USCC shader compiler using the thiserror crate
// for idiomatic Rust error handling. CompileError is the main error enum covering the
// failure taxonomy of the pipeline: structural IR errors (malformed texture source
// pairings, unsupported output semantics), lowering precondition violations, resource
// exhaustion (temporary registers, uniform slots), and encoding precondition violations
// (bit field overflow during instruction packing). Each variant carries relevant context
// (register counts, slot indices, field names) for debugging. The module also provides
// CompileResult<T> as a convenience type alias for Result<T, CompileError>. Compilation
// is all-or-nothing: any of these errors aborts the compile with no partial artifact.

//! Error types for the shader compiler.
//!
//! Using thiserror for more idiomatic error handling.

use thiserror::Error;

/// Main error type for shader compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Malformed IR: {reason}")]
    MalformedIr {
        reason: String,
    },

    #[error("Unsupported {stage} output semantic: {semantic}")]
    UnsupportedOutput {
        stage: &'static str,
        semantic: String,
    },

    #[error("Lowering precondition violated: {reason}")]
    LoweringPrecondition {
        reason: String,
    },

    #[error("Register allocation failed: {required} temporaries needed, {available} available")]
    TooManyTemporaries {
        required: u32,
        available: u32,
    },

    #[error("Uniform slot budget exceeded: {required} slots needed, {available} available")]
    TooManyUniforms {
        required: u32,
        available: u32,
    },

    #[error("Instruction needs {count} distinct constant words, at most 4 fit one slot")]
    ConstantsDontFit {
        count: u32,
    },

    #[error("Encoding field overflow: {field} = {value} exceeds {bits}-bit field")]
    FieldOverflow {
        field: &'static str,
        value: u32,
        bits: u32,
    },

    #[error("Shader link error: {reason}")]
    LinkError {
        reason: String,
    },
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;
