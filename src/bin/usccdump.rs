//! Shader compile-and-dump driver.
//!
//! Reads a `.sir` program (file or stdin), compiles it against a hardware
//! generation preset and prints the artifact dump. With `--dump-ir` the
//! intermediate IR listings are printed as well.

use std::fs;
use std::io::{self, Read, Write};

use clap::{Parser, ValueEnum};
use uscc::core::{DumpSink, HwSpecs, NullSink, WriteSink};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GenPreset {
    Legacy,
    Unified,
}

#[derive(Parser, Debug)]
#[command(name = "usccdump", about = "Compile a SIR shader and dump the result")]
struct Args {
    /// Input .sir file; stdin when omitted.
    input: Option<String>,

    /// Hardware generation preset.
    #[arg(long, value_enum, default_value = "unified")]
    gen: GenPreset,

    /// Print IR listings before and after normalization.
    #[arg(long)]
    dump_ir: bool,

    /// Print the encoded instruction words as hex.
    #[arg(long)]
    hex: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let text = match &args.input {
        Some(path) => fs::read_to_string(path).unwrap_or_else(|e| {
            eprintln!("error: cannot read {path}: {e}");
            std::process::exit(1);
        }),
        None => {
            let mut buffer = String::new();
            if let Err(e) = io::stdin().read_to_string(&mut buffer) {
                eprintln!("error: cannot read stdin: {e}");
                std::process::exit(1);
            }
            buffer
        }
    };

    let prog = match uscc::sir::parse_program(&text) {
        Ok(prog) => prog,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let specs = match args.gen {
        GenPreset::Legacy => HwSpecs::legacy(),
        GenPreset::Unified => HwSpecs::unified(),
    };

    let stdout = io::stdout();
    let mut ir_sink = WriteSink::new(stdout.lock());
    let mut null_sink = NullSink;
    let sink: &mut dyn DumpSink = if args.dump_ir { &mut ir_sink } else { &mut null_sink };

    match uscc::compile_shader(prog, &specs, sink) {
        Ok(shader) => {
            drop(ir_sink);
            let mut out = io::stdout().lock();
            let _ = out.write_all(uscc::dump_shader(&shader).as_bytes());
            if args.hex {
                for (i, chunk) in shader.code.chunks(4).enumerate() {
                    let words: Vec<String> =
                        chunk.iter().map(|w| format!("{w:08x}")).collect();
                    let _ = writeln!(out, "{i:4}: {}", words.join(" "));
                }
            }
        }
        Err(e) => {
            eprintln!("compile failed: {e}");
            std::process::exit(1);
        }
    }
}
