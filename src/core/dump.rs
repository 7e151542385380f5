// This module provides the structured dump sink that replaces ambient debug-flag state.
// Passes and the pipeline entry point emit whole-artifact dumps (IR listings before and
// after normalization, the final disassembly) through an injected DumpSink rather than
// printing to stdout behind a global flag. WriteSink adapts any std::io::Write target;
// NullSink discards everything and is the default for production compiles. Fine-grained
// tracing still goes through the log crate facade.

//! Injected sink for shader dumps.

use std::io::Write;

/// Pipeline stage a dump belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpStage {
    /// IR after lowering, before the normalization loop.
    PreOptimize,
    /// IR after the final normalization pass, before emission.
    PostOptimize,
    /// Final hardware instruction listing.
    Disassembly,
}

impl DumpStage {
    pub fn name(self) -> &'static str {
        match self {
            DumpStage::PreOptimize => "pre-opt",
            DumpStage::PostOptimize => "post-opt",
            DumpStage::Disassembly => "disasm",
        }
    }
}

/// Receiver for whole-artifact dumps produced during a compile.
pub trait DumpSink {
    fn dump(&mut self, stage: DumpStage, text: &str);
}

/// Sink that discards all dumps.
pub struct NullSink;

impl DumpSink for NullSink {
    fn dump(&mut self, _stage: DumpStage, _text: &str) {}
}

/// Sink that writes dumps to any `Write` target, one stage header per dump.
pub struct WriteSink<W: Write> {
    out: W,
}

impl<W: Write> WriteSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> DumpSink for WriteSink<W> {
    fn dump(&mut self, stage: DumpStage, text: &str) {
        // Dump output is best effort; a failed write must not fail the compile.
        let _ = writeln!(self.out, "; ---- {} ----", stage.name());
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }
}
