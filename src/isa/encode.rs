// This module packs fully-allocated hardware instructions into the fixed-width binary
// word format consumed by the shader core. Every instruction occupies four 32-bit words:
// word 0 carries the opcode, condition, saturate bit, destination operand and sampler
// id; words 1 and 2 carry the first two source operands; word 3 is the auxiliary word,
// holding the type tag plus either the third source operand (three-source ALU), the
// texture control fields (sampling ops), or the branch target immediate. Two mutually
// exclusive layouts exist: the legacy layout used through generation 4 and the unified
// layout from generation 5 on, which widens the source register and branch immediate
// fields and shifts the fields that follow them. Encoding is a pure transform over one
// instruction; the only possible failure is a field overflow, which indicates an
// allocation bug upstream and is reported as a fatal precondition error.

//! Binary instruction encoder.

use crate::core::{CompileError, CompileResult};

use super::{HwInst, HwOpcode, HwSrc};

/// Encoded size of one instruction.
pub const WORDS_PER_INST: usize = 4;

/// Bit positions of one source operand word.
struct SrcLayout {
    reg_bits: u32,
    swiz_lo: u32,
    neg: u32,
    abs: u32,
    amode_lo: u32,
    rgroup_lo: u32,
}

const SRC_LEGACY: SrcLayout =
    SrcLayout { reg_bits: 9, swiz_lo: 10, neg: 18, abs: 19, amode_lo: 20, rgroup_lo: 23 };
const SRC_UNIFIED: SrcLayout =
    SrcLayout { reg_bits: 10, swiz_lo: 11, neg: 19, abs: 20, amode_lo: 21, rgroup_lo: 24 };

const BRANCH_IMM_BITS_LEGACY: u32 = 16;
const BRANCH_IMM_BITS_UNIFIED: u32 = 24;

/// Insert `value` at `[lo, lo+bits)` of `word`, rejecting overflow.
fn field(word: &mut u32, lo: u32, bits: u32, value: u32, name: &'static str) -> CompileResult<()> {
    if bits < 32 && value >= 1u32 << bits {
        return Err(CompileError::FieldOverflow { field: name, value, bits });
    }
    *word |= value << lo;
    Ok(())
}

fn encode_src(
    word: &mut u32,
    base: u32,
    src: &HwSrc,
    layout: &SrcLayout,
    name: &'static str,
) -> CompileResult<()> {
    field(word, base, 1, 1, "src_use")?;
    field(word, base + 1, layout.reg_bits, src.reg as u32, name)?;
    field(word, base + layout.swiz_lo, 8, src.swiz.0 as u32, "src_swiz")?;
    field(word, base + layout.neg, 1, src.neg as u32, "src_neg")?;
    field(word, base + layout.abs, 1, src.abs as u32, "src_abs")?;
    field(word, base + layout.amode_lo, 3, src.amode as u32, "src_amode")?;
    field(word, base + layout.rgroup_lo, 3, src.rgroup as u32, "src_rgroup")?;
    Ok(())
}

/// Pack one instruction into its four hardware words.
///
/// `unified` selects the generation 5+ layout. The branch immediate must
/// already be resolved to an absolute instruction index.
pub fn encode_inst(inst: &HwInst, unified: bool) -> CompileResult<[u32; WORDS_PER_INST]> {
    let mut w = [0u32; WORDS_PER_INST];
    let src_layout = if unified { &SRC_UNIFIED } else { &SRC_LEGACY };

    // Word 0: opcode, condition, saturate, destination, sampler id.
    field(&mut w[0], 0, 7, inst.opcode as u32, "opcode")?;
    field(&mut w[0], 7, 4, inst.cond as u32, "cond")?;
    field(&mut w[0], 11, 1, inst.sat as u32, "sat")?;
    if let Some(dst) = &inst.dst {
        field(&mut w[0], 12, 1, 1, "dst_use")?;
        field(&mut w[0], 13, 3, dst.amode as u32, "dst_amode")?;
        field(&mut w[0], 16, 7, dst.reg as u32, "dst_reg")?;
        field(&mut w[0], 23, 4, dst.write_mask.bits() as u32, "dst_mask")?;
    }
    field(&mut w[0], 27, 5, inst.tex.id as u32, "tex_id")?;

    // Words 1 and 2: first two sources.
    for (i, word) in [1usize, 2].into_iter().enumerate() {
        if let Some(src) = &inst.src[i] {
            let name = if i == 0 { "src0_reg" } else { "src1_reg" };
            encode_src(&mut w[word], 0, src, src_layout, name)?;
        }
    }

    // Word 3: type tag plus the opcode-class specific payload.
    field(&mut w[3], 0, 2, inst.ty as u32, "type")?;
    match inst.opcode {
        HwOpcode::Branch => {
            let bits = if unified { BRANCH_IMM_BITS_UNIFIED } else { BRANCH_IMM_BITS_LEGACY };
            field(&mut w[3], 2, bits, inst.imm, "branch_target")?;
        }
        HwOpcode::TexLd | HwOpcode::TexLdB | HwOpcode::TexLdL => {
            field(&mut w[3], 2, 3, inst.tex.amode as u32, "tex_amode")?;
            field(&mut w[3], 5, 8, inst.tex.swiz.0 as u32, "tex_swiz")?;
        }
        _ => {
            if let Some(src) = &inst.src[2] {
                encode_src(&mut w[3], 2, src, src_layout, "src2_reg")?;
            }
            // Result-pair marker used by the new transcendental unit.
            let amode_lo = if unified { 29 } else { 26 };
            field(&mut w[3], amode_lo, 3, inst.tex.amode as u32, "tex_amode")?;
        }
    }

    Ok(w)
}
