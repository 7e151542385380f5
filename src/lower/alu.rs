// Transcendental argument pre-scaling and the two-lane result rewrite for the revised
// transcendental unit. Sine/cosine arguments are multiplied by 1/pi (new unit) or 2/pi
// (old unit) right before the operation, since the hardware evaluates over a scaled
// period. On the new unit, division, log2, sine and cosine produce a two-component
// intermediate whose true scalar result is lane 0 times lane 1, so a corrective
// multiply is inserted immediately after; the multiply inherits the saturate modifier
// and the original instruction's flag is cleared, keeping saturation after the
// correction. This pass runs once, after the normalization loop and before emission,
// because constant propagation would otherwise fold the scale factors back in.

use std::f32::consts::PI;

use crate::core::specs::{HwFeatures, HwSpecs};
use crate::core::CompileError;
use crate::core::CompileResult;
use crate::ir::{Builder, InstData, Opcode, Program, Src};
use crate::isa::Swizzle;

/// Apply the transcendental rewrites.
pub fn lower_alu(prog: &mut Program, specs: &HwSpecs) -> CompileResult<()> {
    let new_unit = specs.features.contains(HwFeatures::NEW_TRANSCENDENTALS);
    for b in prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            let op = prog.inst(id).op;

            if matches!(op, Opcode::FSin | Opcode::FCos) {
                let ncomp = prog.inst(id).ncomp;
                let arg = prog.inst(id).srcs[0];
                let mut bld = Builder::before(prog, id);
                let scale = bld.imm_f(if new_unit { 1.0 / PI } else { 2.0 / PI });
                let scaled =
                    bld.fmul(ncomp, arg, Src::swizzled(scale, Swizzle::broadcast(0)));
                prog.set_src(id, 0, Src::new(scaled));
            }

            if new_unit
                && matches!(op, Opcode::FDiv | Opcode::FLog2 | Opcode::FSin | Opcode::FCos)
            {
                if prog.inst(id).ncomp != 1 {
                    return Err(CompileError::LoweringPrecondition {
                        reason: format!(
                            "{} not scalarized before the result-pair rewrite",
                            op.info().name
                        ),
                    });
                }
                // The unit hands back a result pair; multiplying lane 0 by
                // lane 1 recovers the scalar value. Saturation moves onto
                // the corrective multiply.
                let saturate = prog.inst(id).saturate;
                prog.set_saturate(id, false);
                prog.set_ncomp(id, 2);
                let mul = prog.insert_after(
                    id,
                    InstData::new(Opcode::FMul)
                        .with_ncomp(1)
                        .with_srcs([Src::new(id), Src::swizzled(id, Swizzle::broadcast(1))])
                        .with_saturate(saturate),
                );
                prog.replace_uses_except(id, Src::new(mul), &[mul]);
            }
        }
    }
    Ok(())
}
