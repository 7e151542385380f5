// Mnemonic listing for the logical instruction stream. This is a debugging aid fed to
// the injected dump sink; it renders the pre-encoding HwInst records rather than
// decoding the packed words, so it can show symbolic information the binary no longer
// has. Not part of the functional contract.

use std::fmt::Write;

use super::{HwInst, HwOpcode, HwSrc, InstType, RGroup};

fn src_text(src: &HwSrc) -> String {
    let group = match src.rgroup {
        RGroup::Temp => "t",
        RGroup::Internal => "i",
        RGroup::Uniform => "u",
    };
    let mut s = format!("{}{}.{}", group, src.reg, src.swiz);
    if src.abs {
        s = format!("|{s}|");
    }
    if src.neg {
        s = format!("-{s}");
    }
    s
}

fn type_text(ty: InstType) -> &'static str {
    match ty {
        InstType::F32 => "",
        InstType::S32 => ".s32",
        InstType::U32 => ".u32",
    }
}

/// Render one instruction as a mnemonic line, without trailing newline.
pub fn disasm_inst(inst: &HwInst) -> String {
    let mut line = String::new();
    let _ = write!(
        line,
        "{}{}{}{}",
        inst.opcode.mnemonic(),
        inst.cond.suffix(),
        type_text(inst.ty),
        if inst.sat { ".sat" } else { "" }
    );

    let mut operands = Vec::new();
    if let Some(dst) = &inst.dst {
        operands.push(format!("t{}.{}", dst.reg, dst.write_mask));
    }
    match inst.opcode {
        HwOpcode::TexLd | HwOpcode::TexLdB | HwOpcode::TexLdL => {
            operands.push(format!("tex{}.{}", inst.tex.id, inst.tex.swiz));
        }
        HwOpcode::Branch => operands.push(format!("#{}", inst.imm)),
        _ => {}
    }
    for src in inst.src.iter().flatten() {
        operands.push(src_text(src));
    }

    if !operands.is_empty() {
        let _ = write!(line, " {}", operands.join(", "));
    }
    line
}

/// Render the full instruction stream with instruction indices.
pub fn disassemble(code: &[HwInst]) -> String {
    let mut out = String::new();
    for (i, inst) in code.iter().enumerate() {
        let _ = writeln!(out, "{i:4}: {}", disasm_inst(inst));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::{Cond, HwDst, Swizzle, WriteMask};

    #[test]
    fn renders_alu_with_modifiers() {
        let inst = HwInst {
            opcode: HwOpcode::Mul,
            sat: true,
            dst: Some(HwDst::new(1, WriteMask::X)),
            src: [
                Some(HwSrc { neg: true, ..HwSrc::temp(0, Swizzle::broadcast(2)) }),
                Some(HwSrc::uniform(3, Swizzle::IDENTITY)),
                None,
            ],
            ..HwInst::default()
        };
        let line = disasm_inst(&inst);
        assert_eq!(line, "mul.sat t1.x___, -t0.zzzz, u3.xyzw");
    }

    #[test]
    fn renders_branch_target() {
        let inst = HwInst {
            opcode: HwOpcode::Branch,
            cond: Cond::Not,
            ty: InstType::U32,
            imm: 7,
            ..HwInst::default()
        };
        assert_eq!(disasm_inst(&inst), "branch.not.u32 #7");
    }
}
