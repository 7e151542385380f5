//! USCC - Unified Shader Core Compiler.
//!
//! USCC lowers a platform-independent shader IR into the fixed-width
//! instruction encoding of an embedded unified shader core: a multi-pass
//! optimizing compiler over an SSA instruction arena, a scalarization
//! filter matched to the target's per-slot constraints, interference-based
//! register allocation under a hard temporary budget, and a bit-exact
//! binary encoder.
//!
//! # Primary Usage
//!
//! ```
//! use uscc::core::{HwSpecs, NullSink};
//!
//! let text = "\
//! fragment
//! input 0 varying 0
//! output 0 color
//! block b0:
//!   %1:4 = load_input 0
//!   store_output 0 %1
//! ";
//! let prog = uscc::sir::parse_program(text).unwrap();
//! let shader = uscc::compile_shader(prog, &HwSpecs::unified(), &mut NullSink).unwrap();
//! assert!(!shader.code.is_empty());
//! ```
//!
//! # Architecture
//!
//! - [`ir`] - SSA instruction arena, builder and verifier
//! - [`opt`] - Normalization fixed point and scalarization
//! - [`lower`] - Platform-specific I/O and transcendental rewrites
//! - [`ra`] - Liveness and register allocation
//! - [`emit`] - Instruction selection, uniform table, emission
//! - [`isa`] - Hardware instruction model, encoder, disassembler
//! - [`compile`] - Pipeline entry point producing [`CompiledShader`]
//! - [`link`] - Vertex/fragment varying linkage
//! - [`sir`] - Textual IR for tests and tooling
//! - [`core`] - Errors, hardware descriptor, dump sink

pub mod compile;
pub mod core;
pub mod emit;
pub mod ir;
pub mod isa;
pub mod link;
pub mod lower;
pub mod opt;
pub mod ra;
pub mod sir;

// Re-export the main entry points at the crate root.
pub use crate::compile::{compile_shader, dump_shader, CompiledShader, IoReg, UniformInfo};
pub use crate::core::{CompileError, CompileResult, DumpSink, DumpStage, HwFeatures, HwSpecs};
pub use crate::link::{link_shaders, LinkInfo};
