// Scalarization and re-vectorization. The filter decides which operations must execute
// one component at a time: the transcendental/division family always does, and the
// two-component dot product does on cores without the dedicated dot unit. Splitting
// rewrites a filtered vector operation into per-lane scalar copies gathered by a Vec;
// the dot product expands into a mul/fma chain instead since its result is inherently
// scalar. The late vectorize pass opportunistically re-fuses single-use scalar lanes of
// the same operation back into one vector instruction; the caller re-applies the
// filter afterwards because some re-fused forms are not valid on this target and must
// be split again. Splitting filtered ops only fires on multi-component instructions,
// which makes the pass idempotent on an already scalarized program.

use smallvec::SmallVec;

use crate::core::specs::{HwFeatures, HwSpecs};
use crate::ir::{InstData, InstId, Opcode, Program, Src};
use crate::isa::Swizzle;

/// Whether `op` must be executed one component at a time.
pub fn scalarize_filter(op: Opcode, specs: &HwSpecs) -> bool {
    match op {
        Opcode::FRcp
        | Opcode::FRsq
        | Opcode::FLog2
        | Opcode::FExp2
        | Opcode::FSqrt
        | Opcode::FSin
        | Opcode::FCos
        | Opcode::FDiv => true,
        Opcode::FDot2 => !specs.features.contains(HwFeatures::DOT2),
        _ => false,
    }
}

/// Split filtered operations into scalar lanes.
pub fn lower_to_scalar(prog: &mut Program, specs: &HwSpecs) -> bool {
    let mut progress = false;
    for &b in &prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            let inst = prog.inst(id);
            if !scalarize_filter(inst.op, specs) {
                continue;
            }
            if inst.op == Opcode::FDot2 {
                // No dot unit: a.x*b.x + a.y*b.y as mul feeding fma.
                let (a, bb) = (inst.srcs[0], inst.srcs[1]);
                let sat = inst.saturate;
                let lane = |s: Src, l: u8| s.with_swizzle(Swizzle::broadcast(s.swizzle.lane(l)));
                let mul = prog.insert_before(
                    id,
                    InstData::new(Opcode::FMul)
                        .with_ncomp(1)
                        .with_srcs([lane(a, 0), lane(bb, 0)]),
                );
                let fma = prog.insert_before(
                    id,
                    InstData::new(Opcode::FFma)
                        .with_ncomp(1)
                        .with_srcs([lane(a, 1), lane(bb, 1), Src::new(mul)])
                        .with_saturate(sat),
                );
                prog.replace_uses(id, Src::new(fma));
                prog.remove(id);
                progress = true;
                continue;
            }
            if inst.ncomp <= 1 {
                continue;
            }
            let (op, n, sat) = (inst.op, inst.ncomp, inst.saturate);
            let srcs = inst.srcs.clone();
            log::trace!("scalarizing {} %{} over {} lanes", op.info().name, id.0, n);
            let mut lanes: SmallVec<[Src; 4]> = SmallVec::new();
            for l in 0..n {
                let lane_srcs: SmallVec<[Src; 4]> = srcs
                    .iter()
                    .map(|s| s.with_swizzle(Swizzle::broadcast(s.swizzle.lane(l))))
                    .collect();
                let li = prog.insert_before(
                    id,
                    InstData::new(op).with_ncomp(1).with_srcs(lane_srcs).with_saturate(sat),
                );
                lanes.push(Src::new(li));
            }
            let vec = prog.insert_before(
                id,
                InstData::new(Opcode::Vec).with_ncomp(n).with_srcs(lanes),
            );
            prog.replace_uses(id, Src::new(vec));
            prog.remove(id);
            progress = true;
        }
    }
    progress
}

fn fuse_src_count(op: Opcode) -> Option<usize> {
    match op {
        Opcode::Mov
        | Opcode::FFract
        | Opcode::FFloor
        | Opcode::FCeil
        | Opcode::FSign
        | Opcode::FRcp
        | Opcode::FRsq
        | Opcode::FSqrt
        | Opcode::FExp2
        | Opcode::FLog2
        | Opcode::FSin
        | Opcode::FCos => Some(1),
        Opcode::FAdd | Opcode::FMul | Opcode::FMin | Opcode::FMax | Opcode::FDiv => Some(2),
        _ => None,
    }
}

fn try_fuse_vec(prog: &mut Program, id: InstId) -> bool {
    let inst = prog.inst(id);
    if inst.op != Opcode::Vec || inst.ncomp < 2 {
        return false;
    }
    let n = inst.ncomp;
    let lane_srcs = inst.srcs.clone();
    if lane_srcs.iter().any(|s| s.has_mods() || s.swizzle.lane(0) != 0) {
        return false;
    }
    let defs: Vec<InstId> = lane_srcs.iter().map(|s| s.value).collect();
    for (i, d) in defs.iter().enumerate() {
        if defs[..i].contains(d) {
            return false;
        }
    }
    let first = prog.inst(defs[0]);
    let (op, sat) = (first.op, first.saturate);
    let Some(nsrc) = fuse_src_count(op) else { return false };
    for &d in &defs {
        let di = prog.inst(d);
        if di.op != op || di.ncomp != 1 || di.saturate != sat || prog.uses(d).len() != 1 {
            return false;
        }
    }

    let mut fused_srcs: SmallVec<[Src; 4]> = SmallVec::new();
    for j in 0..nsrc {
        let proto = prog.inst(defs[0]).srcs[j];
        let mut swiz = Swizzle::IDENTITY;
        for (i, &d) in defs.iter().enumerate() {
            let s = prog.inst(d).srcs[j];
            if s.value != proto.value || s.neg != proto.neg || s.abs != proto.abs {
                return false;
            }
            swiz = swiz.with_lane(i as u8, s.swizzle.lane(0));
        }
        for i in n..4 {
            swiz = swiz.with_lane(i, swiz.lane(n - 1));
        }
        fused_srcs.push(Src { value: proto.value, swizzle: swiz, neg: proto.neg, abs: proto.abs });
    }

    log::trace!("vectorizing {} lanes of {} at %{}", n, op.info().name, id.0);
    let fused = prog.insert_before(
        id,
        InstData::new(op).with_ncomp(n).with_srcs(fused_srcs).with_saturate(sat),
    );
    prog.replace_uses(id, Src::new(fused));
    prog.remove(id);
    true
}

/// Re-fuse independent scalar lanes into vector operations.
pub fn vectorize(prog: &mut Program) -> bool {
    let mut progress = false;
    for &b in &prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            progress |= try_fuse_vec(prog, id);
        }
    }
    progress
}
