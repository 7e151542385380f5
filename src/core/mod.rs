// This module serves as the central hub for USCC's ambient infrastructure: the error
// taxonomy shared by every pass (structural IR errors, resource exhaustion, encoding
// precondition violations), the immutable hardware capability descriptor that
// parameterizes lowering, allocation and encoding, and the injected dump sink through
// which whole-artifact dumps flow instead of a global debug flag. Everything here is
// stage-independent plain data; the compilation pipeline itself lives in the ir, opt,
// lower, ra, emit and isa modules.

//! Core compiler infrastructure.
//!
//! # Key Components
//!
//! ## Error Handling (`error`)
//! - `CompileError` covering the full failure taxonomy
//! - `CompileResult<T>` alias used throughout the pipeline
//!
//! ## Hardware Description (`specs`)
//! - `HwSpecs` capability descriptor with generation presets
//! - `HwFeatures` bitflags for per-generation quirks
//!
//! ## Dump Sink (`dump`)
//! - `DumpSink` trait injected into the compile entry point
//! - `WriteSink`/`NullSink` adapters

pub mod dump;
pub mod error;
pub mod specs;

pub use dump::{DumpSink, DumpStage, NullSink, WriteSink};
pub use error::{CompileError, CompileResult};
pub use specs::{HwFeatures, HwSpecs};
