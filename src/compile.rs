// The shader-variant compile entry point. This is the one place that sequences the
// whole pipeline and the only place that decides between a finished artifact and a
// failure: verify the incoming graph, set up the input register map, scalarize and
// normalize to a fixed point, apply the platform lowerings, re-vectorize and re-apply
// the scalarization filter, run the transcendental rewrites, legalize for emission,
// allocate registers, emit, resolve branch targets against the recorded block
// instruction pointers, and encode. On any error the partially built state is dropped
// and the caller receives nothing. The stage-specific metadata mirrors what the
// hardware setup layer consumes: output register indices, the instruction-cache flag,
// and the vertex load-balancing control word, whose integer formula is kept exactly
// as reverse engineered, conservative estimate and all.

use crate::core::{CompileError, CompileResult, DumpSink, DumpStage, HwSpecs};
use crate::emit::{self, UniformContents};
use crate::ir::{Opcode, Program, Semantic, Stage};
use crate::isa::{self, HwInst, HwOpcode};
use crate::opt;
use crate::ra;
use crate::sir;

/// One entry of the input/output register map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoReg {
    pub reg: u32,
    pub semantic: Semantic,
    pub ncomp: u8,
}

/// The uniform table handed to the state emission layer.
#[derive(Debug, Clone)]
pub struct UniformInfo {
    pub words: Vec<u32>,
    pub contents: Vec<UniformContents>,
    /// First constant slot owned by compiler immediates.
    pub imm_base: u16,
}

/// Immutable compile artifact.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub stage: Stage,
    /// Encoded instruction words.
    pub code: Vec<u32>,
    pub num_instructions: u32,
    pub num_temps: u32,
    pub needs_icache: bool,
    pub uniforms: UniformInfo,
    pub infile: Vec<IoReg>,
    pub outfile: Vec<IoReg>,
    pub ps_color_out_reg: u32,
    pub ps_depth_out_reg: Option<u32>,
    pub vs_pos_out_reg: Option<u32>,
    pub vs_pointsize_out_reg: Option<u32>,
    pub vs_id_in_reg: Option<u32>,
    pub vs_load_balancing: u32,
    pub input_count_unk8: u32,
    /// Mnemonic listing, for debugging only.
    pub listing: String,
}

impl CompiledShader {
    pub fn code_size_bytes(&self) -> usize {
        self.code.len() * 4
    }
}

fn div_round_up(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

/// The reverse-engineered vertex/fragment load-balancing control word.
///
/// Determines how invocations are scheduled between the stages on the
/// unified cores; derived from the varying count and three chip constants.
/// Kept bit-exact with the original derivation.
fn load_balancing(num_varyings: u32, specs: &HwSpecs) -> u32 {
    let half_out = num_varyings / 2 + 1;
    let denom = specs
        .vertex_output_buffer_size
        .wrapping_sub(2 * half_out * specs.vertex_cache_size);
    let b = if denom == 0 { 0 } else { (20480 / denom + 9) / 10 };
    let a = (b + 256 / (specs.shader_core_count * half_out)) / 2;
    a.min(255) | b.min(255) << 8 | 0x3f << 16 | 0x0f << 24
}

fn build_infile(prog: &Program) -> Vec<IoReg> {
    let shift = (prog.stage == Stage::Fragment) as u32;
    prog.inputs
        .iter()
        .enumerate()
        .map(|(idx, var)| IoReg {
            reg: idx as u32 + shift,
            semantic: var.semantic,
            ncomp: var.ncomp,
        })
        .collect()
}

/// Compile one shader variant. All-or-nothing: on error no artifact exists.
pub fn compile_shader(
    mut prog: Program,
    specs: &HwSpecs,
    sink: &mut dyn DumpSink,
) -> CompileResult<CompiledShader> {
    prog.verify()?;
    log::debug!(
        "compiling {} shader: {} inputs, {} outputs",
        prog.stage.name(),
        prog.inputs.len(),
        prog.outputs.len()
    );

    let uses_instance_id = prog
        .order()
        .iter()
        .flat_map(|&b| prog.block_insts(b))
        .any(|&i| prog.inst(i).op == Opcode::LoadInstanceId);

    // ---- normalize ----
    opt::lower_to_scalar(&mut prog, specs);
    opt::optimize_loop(&mut prog);
    crate::lower::lower_io(&mut prog, specs)?;
    opt::optimize_loop(&mut prog);
    sink.dump(DumpStage::PreOptimize, &sir::print_program(&prog));

    // Late vectorize, then re-split the shapes the target cannot fuse.
    while opt::vectorize(&mut prog) {}
    opt::lower_to_scalar(&mut prog, specs);
    opt::local::copy_prop(&mut prog);
    opt::local::dce(&mut prog);

    crate::lower::lower_alu(&mut prog, specs)?;
    opt::local::dce(&mut prog);
    sink.dump(DumpStage::PostOptimize, &sir::print_program(&prog));

    // ---- allocate and emit ----
    emit::legalize(&mut prog, specs);
    prog.verify()?;
    let alloc = ra::allocate(&prog, specs)?;
    let result = emit::emit_program(&prog, specs, &alloc)?;

    let mut code = result.code;
    if code.is_empty() {
        // The hardware does not accept empty programs.
        code.push(HwInst { opcode: HwOpcode::Nop, ..HwInst::default() });
    }
    let needs_icache = code.len() as u32 > specs.max_instructions;

    // Branch targets were symbolic block ids until every block's first
    // instruction index became known.
    for inst in &mut code {
        if inst.opcode == HwOpcode::Branch {
            inst.imm = result.block_ptr[inst.imm as usize];
        }
    }

    let listing = isa::disasm::disassemble(&code);

    let mut words = Vec::with_capacity(code.len() * isa::WORDS_PER_INST);
    for inst in &code {
        words.extend_from_slice(&isa::encode_inst(inst, specs.unified_encoding())?);
    }

    // ---- stage metadata ----
    let infile = build_infile(&prog);
    let mut shader = CompiledShader {
        stage: prog.stage,
        code: words,
        num_instructions: code.len() as u32,
        num_temps: result.num_temps,
        needs_icache,
        uniforms: UniformInfo {
            words: result.uniforms.words().to_vec(),
            contents: result.uniforms.contents().to_vec(),
            imm_base: prog.num_uniform_slots,
        },
        infile,
        outfile: Vec::new(),
        ps_color_out_reg: 0,
        ps_depth_out_reg: None,
        vs_pos_out_reg: None,
        vs_pointsize_out_reg: None,
        vs_id_in_reg: None,
        vs_load_balancing: 0,
        input_count_unk8: 0,
        listing,
    };

    let out_reg = |base: usize| result.output_reg[base].unwrap_or(0) as u32;
    match prog.stage {
        Stage::Fragment => {
            for (base, var) in prog.outputs.iter().enumerate() {
                match var.semantic {
                    Semantic::Color => shader.ps_color_out_reg = out_reg(base),
                    Semantic::Depth => shader.ps_depth_out_reg = Some(out_reg(base)),
                    other => {
                        return Err(CompileError::UnsupportedOutput {
                            stage: "fragment",
                            semantic: other.to_string(),
                        })
                    }
                }
            }
            shader.input_count_unk8 = 31;
        }
        Stage::Vertex => {
            for (base, var) in prog.outputs.iter().enumerate() {
                match var.semantic {
                    Semantic::Position => shader.vs_pos_out_reg = Some(out_reg(base)),
                    Semantic::PointSize => shader.vs_pointsize_out_reg = Some(out_reg(base)),
                    Semantic::Varying(_) | Semantic::Color => shader.outfile.push(IoReg {
                        reg: out_reg(base),
                        semantic: var.semantic,
                        ncomp: var.ncomp,
                    }),
                    other => {
                        return Err(CompileError::UnsupportedOutput {
                            stage: "vertex",
                            semantic: other.to_string(),
                        })
                    }
                }
            }
            if uses_instance_id {
                shader.vs_id_in_reg = Some(ra::input_reg_count(&prog));
            }
            shader.input_count_unk8 = div_round_up(shader.infile.len() as u32 + 4, 16);
            // The varying count compensates for the position output, which
            // the outfile map does not carry.
            shader.vs_load_balancing = load_balancing(shader.outfile.len() as u32, specs);
        }
    }

    sink.dump(DumpStage::Disassembly, &dump_shader(&shader));
    log::debug!(
        "compiled {} shader: {} instructions, {} temps",
        shader.stage.name(),
        shader.num_instructions,
        shader.num_temps
    );
    Ok(shader)
}

/// Human-readable artifact dump; a debugging aid, not a stable format.
pub fn dump_shader(shader: &CompiledShader) -> String {
    use std::fmt::Write;
    const COMP_NAMES: [char; 4] = ['x', 'y', 'z', 'w'];

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}",
        match shader.stage {
            Stage::Vertex => "VERT",
            Stage::Fragment => "FRAG",
        }
    );
    out.push_str(&shader.listing);
    let _ = writeln!(out, "num temps: {}", shader.num_temps);
    let _ = writeln!(out, "num instructions: {}", shader.num_instructions);
    let _ = writeln!(out, "needs icache: {}", shader.needs_icache);
    let _ = writeln!(out, "immediates (base {}):", shader.uniforms.imm_base);
    for (idx, (&word, &contents)) in
        shader.uniforms.words.iter().zip(&shader.uniforms.contents).enumerate()
    {
        if contents == UniformContents::Unused {
            continue;
        }
        let _ = writeln!(
            out,
            " [{}].{} = {} (0x{word:08x}) ({contents:?})",
            shader.uniforms.imm_base as usize + idx / 4,
            COMP_NAMES[idx % 4],
            f32::from_bits(word),
        );
    }
    let _ = writeln!(out, "inputs:");
    for io in &shader.infile {
        let _ = writeln!(out, " [{}] {} comps={}", io.reg, io.semantic, io.ncomp);
    }
    let _ = writeln!(out, "outputs:");
    for io in &shader.outfile {
        let _ = writeln!(out, " [{}] {} comps={}", io.reg, io.semantic, io.ncomp);
    }
    let _ = writeln!(out, "special:");
    let opt_reg = |r: Option<u32>| r.map_or(-1i64, |v| v as i64);
    match shader.stage {
        Stage::Vertex => {
            let _ = writeln!(out, "  vs_pos_out_reg={}", opt_reg(shader.vs_pos_out_reg));
            let _ = writeln!(
                out,
                "  vs_pointsize_out_reg={}",
                opt_reg(shader.vs_pointsize_out_reg)
            );
            let _ = writeln!(out, "  vs_id_in_reg={}", opt_reg(shader.vs_id_in_reg));
            let _ = writeln!(out, "  vs_load_balancing=0x{:08x}", shader.vs_load_balancing);
        }
        Stage::Fragment => {
            let _ = writeln!(out, "  ps_color_out_reg={}", shader.ps_color_out_reg);
            let _ = writeln!(out, "  ps_depth_out_reg={}", opt_reg(shader.ps_depth_out_reg));
        }
    }
    let _ = writeln!(out, "  input_count_unk8=0x{:08x}", shader.input_count_unk8);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_balancing_matches_reference_values() {
        let specs = HwSpecs::unified();
        // half_out = 1: denom = 1024 - 32 = 992; 20480/992 = 20,
        // b = (20+9)/10 = 2; a = (2 + 256/4)/2 = 33.
        let word = load_balancing(0, &specs);
        assert_eq!(word & 0xff, 33);
        assert_eq!((word >> 8) & 0xff, 2);
        assert_eq!((word >> 16) & 0xff, 0x3f);
        assert_eq!((word >> 24) & 0xff, 0x0f);
    }

    #[test]
    fn load_balancing_clamps_at_255() {
        let mut specs = HwSpecs::unified();
        specs.vertex_output_buffer_size = 40;
        specs.vertex_cache_size = 1;
        specs.shader_core_count = 1;
        // denom = 40 - 2 = 38 -> 20480/38 = 538 -> b = 54; a = (54+256)/2 = 155.
        let word = load_balancing(0, &specs);
        assert_eq!((word >> 8) & 0xff, 54);
        assert_eq!(word & 0xff, 155);
    }
}
