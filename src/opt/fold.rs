// Constant evaluation, constant folding and the algebraic simplification rules. The
// evaluator interprets the float ALU subset over raw 32-bit words, applying source
// swizzles and modifiers exactly as the hardware would; booleans are the float values
// 0.0/1.0 produced by the compare ops. Every evaluation entry point takes an optional
// environment of simulated values so the bounded loop-unroller can reuse the same
// interpreter. Folding rewrites an all-constant instruction into a Const in place,
// keeping its id so consumers stay untouched. The algebraic pass canonicalizes the
// modifier wrappers (fneg/fabs/fsat become movs with source or saturate modifiers,
// which copy propagation then folds into consumers) and applies the usual identity and
// annihilator rules. NaN-propagation caveats of x*0 and friends are accepted, as is
// usual for GL-level shader compilation.

use hashbrown::HashMap;

use crate::ir::{Aux, InstId, Opcode, Program, Src};

/// Simulated value environment used by the loop unroller.
pub type ConstEnv = HashMap<InstId, [u32; 4]>;

/// Constant words of a value: from the environment, or from a `Const`.
pub fn value_words(prog: &Program, v: InstId, env: Option<&ConstEnv>) -> Option<[u32; 4]> {
    if let Some(words) = env.and_then(|e| e.get(&v)) {
        return Some(*words);
    }
    let inst = prog.inst(v);
    match (inst.op, &inst.aux) {
        (Opcode::Const, Aux::Const(words)) => Some(*words),
        _ => None,
    }
}

/// Constant words of a value, if it is a `Const`.
pub fn const_words(prog: &Program, v: InstId) -> Option<[u32; 4]> {
    value_words(prog, v, None)
}

fn lane_f32(prog: &Program, src: &Src, lane: u8, env: Option<&ConstEnv>) -> Option<f32> {
    let words = value_words(prog, src.value, env)?;
    let mut v = f32::from_bits(words[src.swizzle.lane(lane) as usize]);
    if src.abs {
        v = v.abs();
    }
    if src.neg {
        v = -v;
    }
    Some(v)
}

fn lane_bits(prog: &Program, src: &Src, lane: u8, env: Option<&ConstEnv>) -> Option<u32> {
    if src.has_mods() {
        return None;
    }
    let words = value_words(prog, src.value, env)?;
    Some(words[src.swizzle.lane(lane) as usize])
}

/// Value of `src` lane `lane` as f32, with swizzle and modifiers applied.
pub fn src_lane_f32(prog: &Program, src: &Src, lane: u8) -> Option<f32> {
    lane_f32(prog, src, lane, None)
}

/// Raw bits of `src` lane `lane`; modifiers must be absent.
pub fn src_lane_bits(prog: &Program, src: &Src, lane: u8) -> Option<u32> {
    lane_bits(prog, src, lane, None)
}

/// [`src_lane_f32`] with a simulated-value environment.
pub fn src_lane_f32_env(
    prog: &Program,
    src: &Src,
    lane: u8,
    env: Option<&ConstEnv>,
) -> Option<f32> {
    lane_f32(prog, src, lane, env)
}

/// Materialize the first `ncomp` lanes read through `src` as raw words.
///
/// Sources with modifiers go through the float interpretation; plain
/// sources copy bits, so packed-integer values survive unchanged.
pub fn src_words_env(
    prog: &Program,
    src: &Src,
    ncomp: u8,
    env: Option<&ConstEnv>,
) -> Option<[u32; 4]> {
    let mut out = [0u32; 4];
    for l in 0..ncomp {
        out[l as usize] = if src.has_mods() {
            lane_f32(prog, src, l, env)?.to_bits()
        } else {
            lane_bits(prog, src, l, env)?
        };
    }
    Some(out)
}

/// Whether the first `lanes` lanes of `src` all equal `value` bitwise
/// (after modifiers); signed zeroes are distinct here.
pub fn src_splats(prog: &Program, src: &Src, lanes: u8, value: f32) -> bool {
    (0..lanes).all(|l| src_lane_f32(prog, src, l).map(f32::to_bits) == Some(value.to_bits()))
}

/// Like [`src_splats`] but accepting either signed zero.
fn src_splats_zero(prog: &Program, src: &Src, lanes: u8) -> bool {
    (0..lanes).all(|l| src_lane_f32(prog, src, l).map(|v| v == 0.0) == Some(true))
}

fn sat(v: f32, enable: bool) -> f32 {
    if enable {
        v.clamp(0.0, 1.0)
    } else {
        v
    }
}

fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Evaluate an instruction whose inputs are all known, producing its
/// destination words. `env` supplies values for non-`Const` producers.
pub fn eval_inst_env(prog: &Program, id: InstId, env: Option<&ConstEnv>) -> Option<[u32; 4]> {
    let inst = prog.inst(id);
    let n = inst.ncomp;
    if n == 0 {
        return None;
    }
    let mut out = [0u32; 4];

    let unary = |f: fn(f32) -> f32, out: &mut [u32; 4]| -> Option<()> {
        for l in 0..n {
            let a = lane_f32(prog, &inst.srcs[0], l, env)?;
            out[l as usize] = sat(f(a), inst.saturate).to_bits();
        }
        Some(())
    };
    let binary = |f: fn(f32, f32) -> f32, out: &mut [u32; 4]| -> Option<()> {
        for l in 0..n {
            let a = lane_f32(prog, &inst.srcs[0], l, env)?;
            let b = lane_f32(prog, &inst.srcs[1], l, env)?;
            out[l as usize] = sat(f(a, b), inst.saturate).to_bits();
        }
        Some(())
    };
    let dot = |k: u8, out: &mut [u32; 4]| -> Option<()> {
        let mut acc = 0.0f32;
        for l in 0..k {
            acc += lane_f32(prog, &inst.srcs[0], l, env)?
                * lane_f32(prog, &inst.srcs[1], l, env)?;
        }
        out[0] = sat(acc, inst.saturate).to_bits();
        Some(())
    };

    match inst.op {
        Opcode::Mov => unary(|a| a, &mut out)?,
        Opcode::FNeg => unary(|a| -a, &mut out)?,
        Opcode::FAbs => unary(f32::abs, &mut out)?,
        Opcode::FSat => unary(|a| a.clamp(0.0, 1.0), &mut out)?,
        Opcode::FFract => unary(|a| a - a.floor(), &mut out)?,
        Opcode::FFloor => unary(f32::floor, &mut out)?,
        Opcode::FCeil => unary(f32::ceil, &mut out)?,
        Opcode::FSign => unary(sign, &mut out)?,
        Opcode::FRcp => unary(|a| 1.0 / a, &mut out)?,
        Opcode::FRsq => unary(|a| 1.0 / a.sqrt(), &mut out)?,
        Opcode::FSqrt => unary(f32::sqrt, &mut out)?,
        Opcode::FExp2 => unary(f32::exp2, &mut out)?,
        Opcode::FLog2 => unary(f32::log2, &mut out)?,
        Opcode::FSin => unary(f32::sin, &mut out)?,
        Opcode::FCos => unary(f32::cos, &mut out)?,
        Opcode::FAdd => binary(|a, b| a + b, &mut out)?,
        Opcode::FMul => binary(|a, b| a * b, &mut out)?,
        Opcode::FDiv => binary(|a, b| a / b, &mut out)?,
        Opcode::FMin => binary(f32::min, &mut out)?,
        Opcode::FMax => binary(f32::max, &mut out)?,
        Opcode::Seq => binary(|a, b| (a == b) as u32 as f32, &mut out)?,
        Opcode::Sne => binary(|a, b| (a != b) as u32 as f32, &mut out)?,
        Opcode::Sge => binary(|a, b| (a >= b) as u32 as f32, &mut out)?,
        Opcode::Slt => binary(|a, b| (a < b) as u32 as f32, &mut out)?,
        Opcode::FDot2 => dot(2, &mut out)?,
        Opcode::FDot3 => dot(3, &mut out)?,
        Opcode::FDot4 => dot(4, &mut out)?,
        Opcode::FFma => {
            for l in 0..n {
                let a = lane_f32(prog, &inst.srcs[0], l, env)?;
                let b = lane_f32(prog, &inst.srcs[1], l, env)?;
                let c = lane_f32(prog, &inst.srcs[2], l, env)?;
                out[l as usize] = sat(a * b + c, inst.saturate).to_bits();
            }
        }
        Opcode::FCsel => {
            for l in 0..n {
                let c = lane_f32(prog, &inst.srcs[0], l, env)?;
                let v = if c != 0.0 {
                    lane_f32(prog, &inst.srcs[1], l, env)?
                } else {
                    lane_f32(prog, &inst.srcs[2], l, env)?
                };
                out[l as usize] = sat(v, inst.saturate).to_bits();
            }
        }
        Opcode::I2F => {
            for l in 0..n {
                let bits = lane_bits(prog, &inst.srcs[0], l, env)?;
                out[l as usize] = sat(bits as i32 as f32, inst.saturate).to_bits();
            }
        }
        Opcode::F2U => {
            for l in 0..n {
                let a = lane_f32(prog, &inst.srcs[0], l, env)?;
                out[l as usize] = a as u32;
            }
        }
        Opcode::Vec => {
            if inst.srcs.len() < n as usize {
                return None;
            }
            for l in 0..n {
                let a = lane_f32(prog, &inst.srcs[l as usize], 0, env)?;
                out[l as usize] = sat(a, inst.saturate).to_bits();
            }
        }
        _ => return None,
    }
    Some(out)
}

/// Rewrite all-constant instructions into `Const` in place.
pub fn constant_folding(prog: &mut Program) -> bool {
    let mut progress = false;
    for &b in &prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            let inst = prog.inst(id);
            if inst.op == Opcode::Const || inst.op == Opcode::Undef {
                continue;
            }
            let info = inst.op.info();
            if !info.pure_op || !info.has_dest {
                continue;
            }
            if let Some(words) = eval_inst_env(prog, id, None) {
                log::trace!("fold %{} ({}) to const", id.0, info.name);
                prog.set_op(id, Opcode::Const);
                prog.clear_srcs(id);
                prog.set_aux(id, Aux::Const(words));
                prog.set_saturate(id, false);
                progress = true;
            }
        }
    }
    progress
}

fn rewrite_to_mov(prog: &mut Program, id: InstId, src: Src) {
    prog.set_op(id, Opcode::Mov);
    prog.clear_srcs(id);
    prog.push_src(id, src);
}

/// Identity/annihilator rules and modifier canonicalization.
pub fn algebraic(prog: &mut Program) -> bool {
    let mut progress = false;
    for &b in &prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            let inst = prog.inst(id);
            let n = inst.ncomp;
            let rewritten = match inst.op {
                Opcode::FNeg => {
                    let s = inst.srcs[0].negated();
                    rewrite_to_mov(prog, id, s);
                    true
                }
                Opcode::FAbs => {
                    let s = Src { abs: true, neg: false, ..inst.srcs[0] };
                    rewrite_to_mov(prog, id, s);
                    true
                }
                Opcode::FSat => {
                    let s = inst.srcs[0];
                    rewrite_to_mov(prog, id, s);
                    prog.set_saturate(id, true);
                    true
                }
                Opcode::FMul => {
                    let (a, b) = (inst.srcs[0], inst.srcs[1]);
                    if src_splats(prog, &a, n, 1.0) {
                        rewrite_to_mov(prog, id, b);
                        true
                    } else if src_splats(prog, &b, n, 1.0) {
                        rewrite_to_mov(prog, id, a);
                        true
                    } else if src_splats(prog, &a, n, 0.0) || src_splats(prog, &b, n, 0.0) {
                        prog.set_op(id, Opcode::Const);
                        prog.clear_srcs(id);
                        prog.set_aux(id, Aux::Const([0; 4]));
                        prog.set_saturate(id, false);
                        true
                    } else {
                        false
                    }
                }
                Opcode::FAdd => {
                    let (a, b) = (inst.srcs[0], inst.srcs[1]);
                    if src_splats_zero(prog, &a, n) {
                        rewrite_to_mov(prog, id, b);
                        true
                    } else if src_splats_zero(prog, &b, n) {
                        rewrite_to_mov(prog, id, a);
                        true
                    } else {
                        false
                    }
                }
                Opcode::FDiv => {
                    let a = inst.srcs[0];
                    if src_splats(prog, &inst.srcs[1], n, 1.0) {
                        rewrite_to_mov(prog, id, a);
                        true
                    } else {
                        false
                    }
                }
                Opcode::FFma => {
                    let (a, b, c) = (inst.srcs[0], inst.srcs[1], inst.srcs[2]);
                    if src_splats_zero(prog, &c, n) {
                        prog.set_op(id, Opcode::FMul);
                        prog.truncate_srcs(id, 2);
                        true
                    } else if src_splats(prog, &a, n, 1.0) {
                        prog.set_op(id, Opcode::FAdd);
                        prog.clear_srcs(id);
                        prog.push_src(id, b);
                        prog.push_src(id, c);
                        true
                    } else if src_splats(prog, &b, n, 1.0) {
                        prog.set_op(id, Opcode::FAdd);
                        prog.clear_srcs(id);
                        prog.push_src(id, a);
                        prog.push_src(id, c);
                        true
                    } else {
                        false
                    }
                }
                Opcode::FMin | Opcode::FMax => {
                    if inst.srcs[0] == inst.srcs[1] {
                        let s = inst.srcs[0];
                        rewrite_to_mov(prog, id, s);
                        true
                    } else {
                        false
                    }
                }
                Opcode::FCsel => {
                    let (c, t, f) = (inst.srcs[0], inst.srcs[1], inst.srcs[2]);
                    if t == f {
                        rewrite_to_mov(prog, id, t);
                        true
                    } else if (0..n)
                        .all(|l| src_lane_f32(prog, &c, l).map(|v| v != 0.0) == Some(true))
                    {
                        rewrite_to_mov(prog, id, t);
                        true
                    } else if (0..n)
                        .all(|l| src_lane_f32(prog, &c, l).map(|v| v == 0.0) == Some(true))
                    {
                        rewrite_to_mov(prog, id, f);
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            };
            progress |= rewritten;
        }
    }
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, InstData, Stage};
    use crate::isa::Swizzle;

    fn prog_with_block() -> (Program, crate::ir::BlockId) {
        let mut p = Program::new(Stage::Fragment);
        let b = p.add_block();
        (p, b)
    }

    #[test]
    fn folds_constant_mul() {
        let (mut p, b) = prog_with_block();
        let mut bld = Builder::at_end(&mut p, b);
        let two = bld.imm_f(2.0);
        let three = bld.imm_f(3.0);
        let mul = bld.fmul(1, Src::new(two), Src::new(three));
        drop(bld);
        assert!(constant_folding(&mut p));
        assert_eq!(const_words(&p, mul).unwrap()[0], 6.0f32.to_bits());
    }

    #[test]
    fn folds_through_swizzle_and_mods() {
        let (mut p, b) = prog_with_block();
        let c = p.append(
            b,
            InstData::new(Opcode::Const)
                .with_ncomp(2)
                .with_aux(Aux::Const([1.0f32.to_bits(), (-4.0f32).to_bits(), 0, 0])),
        );
        let src = Src { value: c, swizzle: Swizzle::broadcast(1), neg: false, abs: true };
        assert_eq!(src_lane_f32(&p, &src, 0), Some(4.0));
    }

    #[test]
    fn mul_by_one_becomes_mov() {
        let (mut p, b) = prog_with_block();
        let mut bld = Builder::at_end(&mut p, b);
        let one = bld.imm_f(1.0);
        let x = bld.imm_f(5.0);
        let mul = bld.fmul(1, Src::new(x), Src::new(one));
        drop(bld);
        assert!(algebraic(&mut p));
        let inst = p.inst(mul);
        assert_eq!(inst.op, Opcode::Mov);
        assert_eq!(inst.srcs[0].value, x);
    }

    #[test]
    fn fneg_becomes_mov_with_modifier() {
        let (mut p, b) = prog_with_block();
        let mut bld = Builder::at_end(&mut p, b);
        let x = bld.imm_f(5.0);
        let neg = bld.alu1(Opcode::FNeg, 1, Src::new(x));
        drop(bld);
        assert!(algebraic(&mut p));
        let inst = p.inst(neg);
        assert_eq!(inst.op, Opcode::Mov);
        assert!(inst.srcs[0].neg);
    }

    #[test]
    fn saturate_applies_after_fold() {
        let (mut p, b) = prog_with_block();
        let mut bld = Builder::at_end(&mut p, b);
        let two = bld.imm_f(2.0);
        let three = bld.imm_f(3.0);
        let mul = bld.insert(
            InstData::new(Opcode::FMul)
                .with_ncomp(1)
                .with_srcs([Src::new(two), Src::new(three)])
                .with_saturate(true),
        );
        drop(bld);
        assert!(constant_folding(&mut p));
        assert_eq!(const_words(&p, mul).unwrap()[0], 1.0f32.to_bits());
    }

    #[test]
    fn eval_with_environment() {
        let (mut p, b) = prog_with_block();
        let mut bld = Builder::at_end(&mut p, b);
        let phi = bld.insert(
            InstData::new(Opcode::Phi).with_ncomp(1).with_aux(Aux::Phi(Default::default())),
        );
        let two = bld.imm_f(2.0);
        let mul = bld.fmul(1, Src::new(phi), Src::new(two));
        drop(bld);
        assert_eq!(eval_inst_env(&p, mul, None), None);
        let mut env = ConstEnv::new();
        env.insert(phi, [3.0f32.to_bits(), 0, 0, 0]);
        let out = eval_inst_env(&p, mul, Some(&env)).unwrap();
        assert_eq!(out[0], 6.0f32.to_bits());
    }
}
