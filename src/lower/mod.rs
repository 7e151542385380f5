// Platform-specific I/O lowerings, applied after generic normalization and before the
// final scalarize/emit stages. These are the rewrites that bridge the gap between the
// platform-independent IR and what the shader core can express directly: the inverted
// front-face bit becomes a compare against zero, the fragment color channels swap under
// the red/blue quirk key, the integer instance counter is materialized as a float,
// uniform byte offsets are pre-scaled to the 16-byte slot granularity, rectangle
// texture coordinates are normalized through a driver-patched scale constant keyed by
// the complemented sampler index, and on cores without multi-source texture
// instructions the coordinate and LOD/bias operands are packed into a single
// 4-component source. Each rewrite is total: a violated precondition aborts the
// compile with a diagnostic instead of guessing.

use crate::core::specs::{HwFeatures, HwSpecs};
use crate::core::{CompileError, CompileResult};
use crate::ir::{Aux, Builder, InstData, InstId, Opcode, Program, Semantic, Src, Stage};
use crate::isa::Swizzle;

pub mod alu;

pub use alu::lower_alu;

/// Swizzle swapping the red and blue channels.
const RB_SWAP: Swizzle = Swizzle(0b11_00_01_10);

fn color_output_base(prog: &Program) -> Option<u8> {
    prog.outputs
        .iter()
        .position(|v| v.semantic == Semantic::Color)
        .map(|i| i as u8)
}

/// Apply the platform I/O rewrites.
pub fn lower_io(prog: &mut Program, specs: &HwSpecs) -> CompileResult<()> {
    let rb_swap = prog.stage == Stage::Fragment && prog.frag_rb_swap;
    let color_base = color_output_base(prog);

    for b in prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            match prog.inst(id).op {
                Opcode::LoadFrontFace => {
                    if prog.stage != Stage::Fragment {
                        return Err(CompileError::LoweringPrecondition {
                            reason: "front-face load in a vertex shader".into(),
                        });
                    }
                    // The hardware bit is inverted; once in float form the
                    // comparison against zero recovers the API value.
                    let mut bld = Builder::after(prog, id);
                    let zero = bld.imm_f(0.0);
                    let inv = bld.seq(1, Src::new(id), Src::new(zero));
                    prog.replace_uses_except(id, Src::new(inv), &[inv]);
                }
                Opcode::StoreOutput => {
                    let Aux::Output { base } = prog.inst(id).aux else { unreachable!() };
                    if !rb_swap || Some(base) != color_base {
                        continue;
                    }
                    let src = prog.inst(id).srcs[0];
                    let ncomp = prog.outputs[base as usize].ncomp;
                    let swapped = src.with_swizzle(src.swizzle.compose(RB_SWAP));
                    let mov = prog.insert_before(
                        id,
                        InstData::new(Opcode::Mov).with_ncomp(ncomp).with_srcs([swapped]),
                    );
                    prog.set_src(id, 0, Src::new(mov));
                }
                Opcode::LoadInstanceId => {
                    if prog.stage != Stage::Vertex {
                        return Err(CompileError::LoweringPrecondition {
                            reason: "instance-id load in a fragment shader".into(),
                        });
                    }
                    // The counter register holds an integer; consumers want
                    // the float form the rest of the core computes in.
                    let mut bld = Builder::after(prog, id);
                    let conv = bld.i2f(Src::new(id));
                    prog.replace_uses_except(id, Src::new(conv), &[conv]);
                }
                Opcode::LoadUniform => {
                    let Aux::Uniform { base } = prog.inst(id).aux else { unreachable!() };
                    if base < 0 {
                        // Synthetic texcoord-scale loads are emitted below and
                        // must not be rescaled.
                        continue;
                    }
                    // Slot addressing is in 16-byte units.
                    let off = prog.inst(id).srcs[0];
                    let mut bld = Builder::before(prog, id);
                    let stride = bld.imm_f(16.0);
                    let scaled = bld.fmul(1, off, Src::new(stride));
                    let int = bld.f2u(Src::new(scaled));
                    prog.set_src(id, 0, Src::new(int));
                }
                Opcode::Discard => {
                    if prog.stage != Stage::Fragment {
                        return Err(CompileError::LoweringPrecondition {
                            reason: "discard in a vertex shader".into(),
                        });
                    }
                }
                op if op.is_tex() => {
                    lower_tex(prog, id, specs)?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn lower_tex(prog: &mut Program, id: InstId, specs: &HwSpecs) -> CompileResult<()> {
    let inst = prog.inst(id);
    let Aux::Tex { sampler, rect } = inst.aux else {
        return Err(CompileError::LoweringPrecondition {
            reason: "texture instruction without sampler payload".into(),
        });
    };
    if inst.srcs.is_empty() || inst.srcs.len() > 2 {
        return Err(CompileError::LoweringPrecondition {
            reason: format!("texture instruction with {} sources", inst.srcs.len()),
        });
    }
    let has_lod = inst.srcs.len() == 2;
    if inst.op == Opcode::Tex && has_lod {
        return Err(CompileError::LoweringPrecondition {
            reason: "plain texture sample carries an LOD source".into(),
        });
    }

    if rect {
        // Rectangle targets address in pixels. A synthetic uniform load,
        // keyed by the complemented sampler index, stands in for the
        // driver-patched 1/size scale factor.
        let coord = prog.inst(id).srcs[0];
        let mut bld = Builder::before(prog, id);
        let zero = bld.imm_f(0.0);
        let scale = bld.insert(
            InstData::new(Opcode::LoadUniform)
                .with_ncomp(2)
                .with_srcs([Src::new(zero)])
                .with_aux(Aux::Uniform { base: !(sampler as i32) }),
        );
        let scaled = bld.fmul(2, coord, Src::new(scale));
        prog.set_src(id, 0, Src::new(scaled));
    }

    // Pre-unification cores take every texture operand in one source.
    if !has_lod || specs.features.contains(HwFeatures::MULTI_SRC_TEX) {
        return Ok(());
    }
    let coord = prog.inst(id).srcs[0];
    let lod = prog.inst(id).srcs[1];
    let coord_ncomp = prog.inst(coord.value).ncomp;
    if coord_ncomp >= 4 {
        return Err(CompileError::LoweringPrecondition {
            reason: "no free component to pack the LOD operand into".into(),
        });
    }
    let mut srcs: smallvec::SmallVec<[Src; 4]> = smallvec::SmallVec::new();
    for i in 0..coord_ncomp {
        srcs.push(coord.with_swizzle(Swizzle::broadcast(coord.swizzle.lane(i))));
    }
    for _ in coord_ncomp..4 {
        srcs.push(lod.with_swizzle(Swizzle::broadcast(lod.swizzle.lane(0))));
    }
    let packed = prog.insert_before(
        id,
        InstData::new(Opcode::Vec).with_ncomp(4).with_srcs(srcs),
    );
    prog.set_src(id, 0, Src::new(packed));
    prog.truncate_srcs(id, 1);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IoVar;

    fn fragment_with_input() -> (Program, crate::ir::BlockId) {
        let mut p = Program::new(Stage::Fragment);
        let b = p.add_block();
        p.inputs.push(IoVar { semantic: Semantic::Varying(0), ncomp: 4 });
        p.outputs.push(IoVar { semantic: Semantic::Color, ncomp: 4 });
        (p, b)
    }

    #[test]
    fn front_face_becomes_compare() {
        let (mut p, b) = fragment_with_input();
        let ff = p.append(b, InstData::new(Opcode::LoadFrontFace).with_ncomp(1));
        let user = p.append(b, InstData::new(Opcode::Mov).with_ncomp(1).with_srcs([Src::new(ff)]));
        lower_io(&mut p, &HwSpecs::legacy()).unwrap();
        let inv = p.inst(user).srcs[0].value;
        let inst = p.inst(inv);
        assert_eq!(inst.op, Opcode::Seq);
        assert_eq!(inst.srcs[0].value, ff);
        p.verify().unwrap();
    }

    #[test]
    fn rb_swap_permutes_color_store() {
        let (mut p, b) = fragment_with_input();
        p.frag_rb_swap = true;
        let x = p.append(
            b,
            InstData::new(Opcode::LoadInput).with_ncomp(4).with_aux(Aux::Input { base: 0 }),
        );
        let st = p.append(
            b,
            InstData::new(Opcode::StoreOutput)
                .with_srcs([Src::new(x)])
                .with_aux(Aux::Output { base: 0 }),
        );
        lower_io(&mut p, &HwSpecs::legacy()).unwrap();
        let mov = p.inst(st).srcs[0].value;
        let inst = p.inst(mov);
        assert_eq!(inst.op, Opcode::Mov);
        assert_eq!(inst.srcs[0].swizzle, Swizzle::new(2, 1, 0, 3));
        p.verify().unwrap();
    }

    #[test]
    fn instance_id_gets_int_to_float() {
        let mut p = Program::new(Stage::Vertex);
        let b = p.add_block();
        p.outputs.push(IoVar { semantic: Semantic::Position, ncomp: 4 });
        let id = p.append(b, InstData::new(Opcode::LoadInstanceId).with_ncomp(1));
        let st = p.append(
            b,
            InstData::new(Opcode::StoreOutput)
                .with_srcs([Src::new(id)])
                .with_aux(Aux::Output { base: 0 }),
        );
        lower_io(&mut p, &HwSpecs::legacy()).unwrap();
        let conv = p.inst(st).srcs[0].value;
        assert_eq!(p.inst(conv).op, Opcode::I2F);
        assert_eq!(p.inst(conv).srcs[0].value, id);
        p.verify().unwrap();
    }

    #[test]
    fn uniform_offset_is_prescaled() {
        let (mut p, b) = fragment_with_input();
        let mut bld = Builder::at_end(&mut p, b);
        let idx = bld.imm_f(2.0);
        drop(bld);
        let load = p.append(
            b,
            InstData::new(Opcode::LoadUniform)
                .with_ncomp(4)
                .with_srcs([Src::new(idx)])
                .with_aux(Aux::Uniform { base: 4 }),
        );
        lower_io(&mut p, &HwSpecs::legacy()).unwrap();
        let off = p.inst(load).srcs[0].value;
        assert_eq!(p.inst(off).op, Opcode::F2U);
        let mul = p.inst(off).srcs[0].value;
        assert_eq!(p.inst(mul).op, Opcode::FMul);
        p.verify().unwrap();
    }

    #[test]
    fn rect_sampler_inserts_scale() {
        let (mut p, b) = fragment_with_input();
        let x = p.append(
            b,
            InstData::new(Opcode::LoadInput).with_ncomp(4).with_aux(Aux::Input { base: 0 }),
        );
        let tex = p.append(
            b,
            InstData::new(Opcode::Tex)
                .with_ncomp(4)
                .with_srcs([Src::new(x)])
                .with_aux(Aux::Tex { sampler: 3, rect: true }),
        );
        lower_io(&mut p, &HwSpecs::legacy()).unwrap();
        let mul = p.inst(tex).srcs[0].value;
        let mi = p.inst(mul);
        assert_eq!(mi.op, Opcode::FMul);
        assert_eq!(mi.srcs[0].value, x);
        let scale = p.inst(mi.srcs[1].value);
        assert_eq!(scale.op, Opcode::LoadUniform);
        assert_eq!(scale.aux, Aux::Uniform { base: !3 });
        p.verify().unwrap();
    }

    #[test]
    fn lod_packs_into_coord_on_legacy() {
        let (mut p, b) = fragment_with_input();
        let x = p.append(
            b,
            InstData::new(Opcode::LoadInput).with_ncomp(2).with_aux(Aux::Input { base: 0 }),
        );
        let mut bld = Builder::at_end(&mut p, b);
        let bias = bld.imm_f(1.5);
        drop(bld);
        let tex = p.append(
            b,
            InstData::new(Opcode::TexBias)
                .with_ncomp(4)
                .with_srcs([Src::new(x), Src::new(bias)])
                .with_aux(Aux::Tex { sampler: 0, rect: false }),
        );
        lower_io(&mut p, &HwSpecs::legacy()).unwrap();
        let inst = p.inst(tex);
        assert_eq!(inst.srcs.len(), 1);
        let packed = p.inst(inst.srcs[0].value);
        assert_eq!(packed.op, Opcode::Vec);
        assert_eq!(packed.ncomp, 4);
        assert_eq!(packed.srcs[0].value, x);
        assert_eq!(packed.srcs[2].value, bias);
        assert_eq!(packed.srcs[3].value, bias);
        p.verify().unwrap();
    }

    #[test]
    fn multi_src_tex_keeps_lod_separate() {
        let (mut p, b) = fragment_with_input();
        let x = p.append(
            b,
            InstData::new(Opcode::LoadInput).with_ncomp(2).with_aux(Aux::Input { base: 0 }),
        );
        let mut bld = Builder::at_end(&mut p, b);
        let bias = bld.imm_f(1.5);
        drop(bld);
        let tex = p.append(
            b,
            InstData::new(Opcode::TexBias)
                .with_ncomp(4)
                .with_srcs([Src::new(x), Src::new(bias)])
                .with_aux(Aux::Tex { sampler: 0, rect: false }),
        );
        lower_io(&mut p, &HwSpecs::unified()).unwrap();
        assert_eq!(p.inst(tex).srcs.len(), 2);
    }

    #[test]
    fn front_face_in_vertex_shader_fails() {
        let mut p = Program::new(Stage::Vertex);
        let b = p.add_block();
        let ff = p.append(b, InstData::new(Opcode::LoadFrontFace).with_ncomp(1));
        let _user =
            p.append(b, InstData::new(Opcode::Mov).with_ncomp(1).with_srcs([Src::new(ff)]));
        assert!(matches!(
            lower_io(&mut p, &HwSpecs::legacy()),
            Err(CompileError::LoweringPrecondition { .. })
        ));
    }
}
