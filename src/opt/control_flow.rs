// Control-flow normalization passes over the flat block list: constant branch folding
// and unreachable-code removal, trivial branch elimination (the flat-CFG counterpart of
// trivial-continuation removal), empty-block forwarding, redundant phi removal,
// undefined-value pruning, if-conversion of small diamonds into per-lane selects, and
// bounded unrolling of fully-constant loops by iterative peeling. Dead blocks are
// emptied rather than excised so block handles stay stable; an empty block contributes
// no instructions and no successors beyond its fallthrough, which is never reachable
// once every predecessor edge is gone. Each pass returns a progress flag for the
// fixed-point driver.

use crate::ir::{Aux, BlockId, InstData, InstId, Opcode, Program, Src};
use crate::isa::Swizzle;

use super::fold::{self, ConstEnv};

/// Threshold on if-converted branch bodies.
const SELECT_LIMIT: usize = 16;

/// Peel bound for constant loops.
const UNROLL_BOUND: usize = 8;

fn drop_edge_phis(prog: &mut Program, from: BlockId, to: BlockId) {
    for id in prog.block_insts(to).to_vec() {
        if prog.inst(id).op == Opcode::Phi {
            prog.remove_phi_pred(id, from);
        }
    }
}

fn phi_pair(prog: &Program, phi: InstId, pred: BlockId) -> Option<Src> {
    match &prog.inst(phi).aux {
        Aux::Phi(preds) => {
            let idx = preds.iter().position(|&p| p == pred)?;
            Some(prog.inst(phi).srcs[idx])
        }
        _ => None,
    }
}

/// Resolve branches whose condition folded to a constant.
pub fn fold_branches(prog: &mut Program) -> bool {
    let mut progress = false;
    for &b in &prog.order().to_vec() {
        let Some(term) = prog.terminator(b) else { continue };
        let inst = prog.inst(term);
        if inst.srcs.is_empty() {
            continue;
        }
        let Aux::Target(target) = inst.aux else { continue };
        let cond = inst.srcs[0];
        let Some(v) = fold::src_lane_f32(prog, &cond, 0) else { continue };
        let next = prog.next_in_order(b);
        if v == 0.0 {
            // Always taken; the fallthrough edge disappears.
            log::trace!("branch in b{} folded to unconditional", b.0);
            prog.clear_srcs(term);
            if let Some(next) = next {
                if next != target {
                    drop_edge_phis(prog, b, next);
                }
            }
        } else {
            // Never taken; the target edge disappears.
            log::trace!("branch in b{} folded away", b.0);
            if Some(target) != next {
                drop_edge_phis(prog, b, target);
            }
            prog.remove(term);
        }
        progress = true;
    }
    progress
}

/// Fold constant branches and clear unreachable blocks.
pub fn dead_cf(prog: &mut Program) -> bool {
    let mut progress = fold_branches(prog);

    let mut reach = vec![false; prog.num_blocks()];
    let mut stack = vec![prog.entry_block()];
    while let Some(b) = stack.pop() {
        if std::mem::replace(&mut reach[b.0 as usize], true) {
            continue;
        }
        stack.extend(prog.succs(b));
    }

    let dead: Vec<BlockId> = prog
        .order()
        .iter()
        .copied()
        .filter(|b| !reach[b.0 as usize] && !prog.block_is_empty(*b))
        .collect();
    if dead.is_empty() {
        return progress;
    }

    // Phis in surviving blocks must not name dead predecessors.
    for &b in &prog.order().to_vec() {
        if !reach[b.0 as usize] {
            continue;
        }
        for id in prog.block_insts(b).to_vec() {
            if prog.inst(id).op != Opcode::Phi {
                continue;
            }
            let preds = match &prog.inst(id).aux {
                Aux::Phi(preds) => preds.clone(),
                _ => continue,
            };
            for pred in preds {
                if !reach[pred.0 as usize] {
                    prog.remove_phi_pred(id, pred);
                }
            }
        }
    }
    log::debug!("removing {} unreachable blocks", dead.len());
    prog.clear_blocks(&dead);
    true
}

/// Remove branches that only reach the next block in program order.
pub fn trivial_branches(prog: &mut Program) -> bool {
    let mut progress = false;
    for &b in &prog.order().to_vec() {
        let Some(term) = prog.terminator(b) else { continue };
        let Aux::Target(target) = prog.inst(term).aux else { continue };
        if prog.next_in_order(b) == Some(target) {
            prog.remove(term);
            progress = true;
        }
    }
    progress
}

/// Retarget branches that jump to an empty block at its fallthrough.
pub fn forward_empty_blocks(prog: &mut Program) -> bool {
    let mut progress = false;
    for &e in &prog.order().to_vec() {
        if !prog.block_is_empty(e) {
            continue;
        }
        let Some(f) = prog.next_in_order(e) else { continue };
        for p in prog.preds(e) {
            if p == e {
                continue;
            }
            let Some(term) = prog.terminator(p) else { continue };
            let Aux::Target(target) = prog.inst(term).aux else { continue };
            if target != e {
                continue;
            }
            // The retargeted edge must be reconcilable with f's phis.
            let phis: Vec<InstId> = prog
                .block_insts(f)
                .iter()
                .copied()
                .filter(|&i| prog.inst(i).op == Opcode::Phi)
                .collect();
            let mut pairs = Vec::new();
            let mut ok = true;
            for &phi in &phis {
                let Aux::Phi(preds) = &prog.inst(phi).aux else { unreachable!() };
                if preds.contains(&p) {
                    ok = false;
                    break;
                }
                match phi_pair(prog, phi, e) {
                    Some(src) => pairs.push((phi, src)),
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if !ok {
                continue;
            }
            for (phi, src) in pairs {
                prog.add_phi_pred(phi, p, src);
            }
            prog.set_aux(term, Aux::Target(f));
            progress = true;
        }
    }
    progress
}

/// Replace phis that merge a single distinct value.
pub fn remove_phis(prog: &mut Program) -> bool {
    let mut progress = false;
    for &b in &prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            if prog.inst(id).op != Opcode::Phi {
                continue;
            }
            let srcs = prog.inst(id).srcs.clone();
            // A back-edge pair reading the phi itself unmodified is
            // ignorable; a swizzled or modified self reference is not.
            let mut distinct: Vec<Src> = Vec::new();
            let mut rotating = false;
            for s in &srcs {
                if s.value == id {
                    if s.swizzle == Swizzle::IDENTITY && !s.has_mods() {
                        continue;
                    }
                    rotating = true;
                    break;
                }
                if !distinct.contains(s) {
                    distinct.push(*s);
                }
            }
            if rotating {
                continue;
            }
            match distinct.len() {
                0 => {
                    // No real input left; the value is undefined.
                    prog.clear_srcs(id);
                    prog.set_op(id, Opcode::Undef);
                    prog.set_aux(id, Aux::None);
                    progress = true;
                }
                1 => {
                    let repl = distinct[0];
                    prog.replace_uses(id, repl);
                    prog.remove(id);
                    progress = true;
                }
                _ => {}
            }
        }
    }
    progress
}

/// Prune uses of undefined values.
pub fn undef_prop(prog: &mut Program) -> bool {
    let mut progress = false;
    let is_undef = |prog: &Program, v: InstId| prog.inst(v).op == Opcode::Undef;
    for &b in &prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            match prog.inst(id).op {
                Opcode::FCsel => {
                    let (c, t, f) = {
                        let s = &prog.inst(id).srcs;
                        (s[0], s[1], s[2])
                    };
                    let pick = if is_undef(prog, t.value) || is_undef(prog, c.value) {
                        Some(f)
                    } else if is_undef(prog, f.value) {
                        Some(t)
                    } else {
                        None
                    };
                    if let Some(src) = pick {
                        prog.set_op(id, Opcode::Mov);
                        prog.clear_srcs(id);
                        prog.push_src(id, src);
                        progress = true;
                    }
                }
                Opcode::Branch => {
                    let inst = prog.inst(id);
                    if inst.srcs.is_empty() || !is_undef(prog, inst.srcs[0].value) {
                        continue;
                    }
                    let Aux::Target(target) = inst.aux else { continue };
                    // An undefined condition lets us pick the fallthrough.
                    if Some(target) != prog.next_in_order(b) {
                        drop_edge_phis(prog, b, target);
                    }
                    prog.remove(id);
                    progress = true;
                }
                Opcode::Phi => {
                    let preds = match &prog.inst(id).aux {
                        Aux::Phi(preds) => preds.clone(),
                        _ => continue,
                    };
                    let srcs = prog.inst(id).srcs.clone();
                    let undef_preds: Vec<BlockId> = preds
                        .iter()
                        .zip(srcs.iter())
                        .filter(|(_, s)| is_undef(prog, s.value))
                        .map(|(p, _)| *p)
                        .collect();
                    if !undef_preds.is_empty() && undef_preds.len() < srcs.len() {
                        for p in undef_preds {
                            prog.remove_phi_pred(id, p);
                        }
                        progress = true;
                    }
                }
                _ => {}
            }
        }
    }
    progress
}

/// If-convert a small diamond into per-lane selects.
///
/// Matches the canonical shape produced by the front end: a conditional
/// branch over a then-block that jumps to the join, an else-block falling
/// through into the join, and phis at the join merging the two arms.
pub fn peephole_select(prog: &mut Program) -> bool {
    'blocks: for &a in &prog.order().to_vec() {
        let Some(t) = prog.terminator(a) else { continue };
        let term = prog.inst(t);
        if term.srcs.is_empty() {
            continue;
        }
        let Aux::Target(else_b) = term.aux else { continue };
        let cond = term.srcs[0];
        let Some(then_b) = prog.next_in_order(a) else { continue };
        if then_b == else_b {
            continue;
        }
        let Some(tt) = prog.terminator(then_b) else { continue };
        if !prog.inst(tt).srcs.is_empty() {
            continue;
        }
        let Aux::Target(join) = prog.inst(tt).aux else { continue };
        if prog.next_in_order(then_b) != Some(else_b) {
            continue;
        }
        if prog.terminator(else_b).is_some() {
            continue;
        }
        if prog.next_in_order(else_b) != Some(join) {
            continue;
        }
        let jpreds = prog.preds(join);
        if jpreds.len() != 2 || !jpreds.contains(&then_b) || !jpreds.contains(&else_b) {
            continue;
        }

        let then_body: Vec<InstId> =
            prog.block_insts(then_b).iter().copied().filter(|&i| i != tt).collect();
        let else_body: Vec<InstId> = prog.block_insts(else_b).to_vec();
        if then_body.len() > SELECT_LIMIT || else_body.len() > SELECT_LIMIT {
            continue;
        }
        for &i in then_body.iter().chain(&else_body) {
            let info = prog.inst(i).op.info();
            if !info.pure_op || !info.has_dest || prog.inst(i).op == Opcode::Phi {
                continue 'blocks;
            }
        }

        let mut selects = Vec::new();
        for &phi in prog.block_insts(join) {
            if prog.inst(phi).op != Opcode::Phi {
                continue;
            }
            let (Some(vt), Some(ve)) =
                (phi_pair(prog, phi, then_b), phi_pair(prog, phi, else_b))
            else {
                continue 'blocks;
            };
            selects.push((phi, vt, ve));
        }

        log::debug!("if-converting diamond at b{}", a.0);
        for &i in then_body.iter().chain(&else_body) {
            prog.move_inst_before(i, t);
        }
        let csel_cond = Src {
            value: cond.value,
            swizzle: Swizzle::broadcast(cond.swizzle.lane(0)),
            neg: cond.neg,
            abs: cond.abs,
        };
        for (phi, vt, ve) in selects {
            let ncomp = prog.inst(phi).ncomp;
            let csel = prog.insert_before(
                t,
                InstData::new(Opcode::FCsel).with_ncomp(ncomp).with_srcs([csel_cond, vt, ve]),
            );
            prog.replace_uses(phi, Src::new(csel));
            prog.remove(phi);
        }
        prog.remove(tt);
        prog.remove(t);
        return true;
    }
    false
}

/// Fully unroll single-block loops with constant trip behavior, by
/// iteratively peeling with the constant evaluator. Loops that do not
/// resolve within the peel bound are left intact.
pub fn unroll_const_loops(prog: &mut Program) -> bool {
    'blocks: for &l in &prog.order().to_vec() {
        let Some(term) = prog.terminator(l) else { continue };
        let inst = prog.inst(term);
        let Aux::Target(target) = inst.aux else { continue };
        if target != l || inst.srcs.is_empty() {
            continue;
        }
        let cond = inst.srcs[0];
        let preds = prog.preds(l);
        if preds.len() != 2 || !preds.contains(&l) {
            continue;
        }
        let Some(&entry) = preds.iter().find(|&&p| p != l) else { continue };

        let mut phis = Vec::new();
        let mut body = Vec::new();
        for &id in prog.block_insts(l) {
            if id == term {
                continue;
            }
            let data = prog.inst(id);
            if data.op == Opcode::Phi {
                phis.push(id);
                continue;
            }
            let info = data.op.info();
            if !info.pure_op || !info.has_dest {
                continue 'blocks;
            }
            if !info.float_alu && !matches!(data.op, Opcode::Vec | Opcode::Const) {
                continue 'blocks;
            }
            body.push(id);
        }

        // Seed the environment from the entry edge.
        let mut env = ConstEnv::new();
        for &phi in &phis {
            let Some(init) = phi_pair(prog, phi, entry) else { continue 'blocks };
            let ncomp = prog.inst(phi).ncomp;
            let Some(words) = fold::src_words_env(prog, &init, ncomp, None) else {
                continue 'blocks;
            };
            env.insert(phi, words);
        }

        let mut resolved = false;
        for _ in 0..UNROLL_BOUND {
            for &id in &body {
                let Some(words) = fold::eval_inst_env(prog, id, Some(&env)) else {
                    continue 'blocks;
                };
                env.insert(id, words);
            }
            let Some(cv) = fold::src_lane_f32_env(prog, &cond, 0, Some(&env)) else {
                continue 'blocks;
            };
            if cv != 0.0 {
                resolved = true;
                break;
            }
            // Feed the back edge into the next iteration.
            let mut next = Vec::new();
            for &phi in &phis {
                let Some(back) = phi_pair(prog, phi, l) else { continue 'blocks };
                let ncomp = prog.inst(phi).ncomp;
                let Some(words) = fold::src_words_env(prog, &back, ncomp, Some(&env)) else {
                    continue 'blocks;
                };
                next.push((phi, words));
            }
            for (phi, words) in next {
                env.insert(phi, words);
            }
        }
        if !resolved {
            continue;
        }

        log::debug!("unrolled constant loop at b{}", l.0);
        // Materialize the final values on the entry edge and cut the loop;
        // the dead body is left for DCE.
        for &id in phis.iter().chain(&body) {
            let words = env[&id];
            let ncomp = prog.inst(id).ncomp;
            let data =
                InstData::new(Opcode::Const).with_ncomp(ncomp).with_aux(Aux::Const(words));
            let konst = match prog.terminator(entry) {
                Some(eterm) => prog.insert_before(eterm, data),
                None => prog.append(entry, data),
            };
            prog.replace_uses(id, Src::new(konst));
        }
        prog.remove(term);
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, Stage};
    use crate::opt::local::{copy_prop, dce};
    use smallvec::smallvec;

    #[test]
    fn constant_branch_folds_and_dead_block_clears() {
        let mut p = Program::new(Stage::Fragment);
        let b0 = p.add_block();
        let b1 = p.add_block();
        let b2 = p.add_block();
        let mut bld = Builder::at_end(&mut p, b0);
        let one = bld.imm_f(1.0);
        drop(bld);
        // Branch if zero to b2: condition 1.0 means never taken.
        p.append(b0, InstData::new(Opcode::Branch).with_srcs([Src::new(one)]).with_aux(Aux::Target(b2)));
        let mut bld = Builder::at_end(&mut p, b1);
        let x = bld.imm_f(2.0);
        drop(bld);
        p.append(b1, InstData::new(Opcode::Branch).with_aux(Aux::Target(b2)));
        assert!(dead_cf(&mut p));
        // The branch folded away; nothing is unreachable here.
        assert!(p.terminator(b0).is_none());
        let _ = x;
        p.verify().unwrap();
    }

    #[test]
    fn unreachable_block_is_emptied() {
        let mut p = Program::new(Stage::Fragment);
        let b0 = p.add_block();
        let b1 = p.add_block();
        let b2 = p.add_block();
        // b0 jumps over b1 unconditionally.
        p.append(b0, InstData::new(Opcode::Branch).with_aux(Aux::Target(b2)));
        let mut bld = Builder::at_end(&mut p, b1);
        bld.imm_f(1.0);
        drop(bld);
        let mut bld = Builder::at_end(&mut p, b2);
        bld.imm_f(2.0);
        drop(bld);
        assert!(dead_cf(&mut p));
        assert!(p.block_is_empty(b1));
        assert!(!p.block_is_empty(b2));
    }

    #[test]
    fn branch_to_next_block_is_trivial() {
        let mut p = Program::new(Stage::Fragment);
        let b0 = p.add_block();
        let b1 = p.add_block();
        p.append(b0, InstData::new(Opcode::Branch).with_aux(Aux::Target(b1)));
        assert!(trivial_branches(&mut p));
        assert!(p.terminator(b0).is_none());
    }

    #[test]
    fn single_source_phi_is_removed() {
        let mut p = Program::new(Stage::Fragment);
        let b0 = p.add_block();
        let b1 = p.add_block();
        let mut bld = Builder::at_end(&mut p, b0);
        let x = bld.imm_f(3.0);
        drop(bld);
        let phi = p.append(
            b1,
            InstData::new(Opcode::Phi)
                .with_ncomp(1)
                .with_srcs([Src::new(x)])
                .with_aux(Aux::Phi(smallvec![b0])),
        );
        let user = p.append(b1, InstData::new(Opcode::Mov).with_ncomp(1).with_srcs([Src::new(phi)]));
        assert!(remove_phis(&mut p));
        assert_eq!(p.inst(user).srcs[0].value, x);
        p.verify().unwrap();
    }

    #[test]
    fn diamond_if_converts_to_select() {
        let mut p = Program::new(Stage::Fragment);
        let a = p.add_block();
        let then_b = p.add_block();
        let else_b = p.add_block();
        let join = p.add_block();

        let mut bld = Builder::at_end(&mut p, a);
        let c = bld.insert(InstData::new(Opcode::LoadInput).with_ncomp(4).with_aux(Aux::Input { base: 0 }));
        drop(bld);
        p.inputs.push(crate::ir::IoVar { semantic: crate::ir::Semantic::Varying(0), ncomp: 4 });
        p.append(a, InstData::new(Opcode::Branch).with_srcs([Src::new(c)]).with_aux(Aux::Target(else_b)));

        let mut bld = Builder::at_end(&mut p, then_b);
        let vt = bld.imm_f(1.0);
        drop(bld);
        p.append(then_b, InstData::new(Opcode::Branch).with_aux(Aux::Target(join)));

        let mut bld = Builder::at_end(&mut p, else_b);
        let ve = bld.imm_f(2.0);
        drop(bld);

        let phi = p.append(
            join,
            InstData::new(Opcode::Phi)
                .with_ncomp(1)
                .with_srcs([Src::new(vt), Src::new(ve)])
                .with_aux(Aux::Phi(smallvec![then_b, else_b])),
        );
        let user = p.append(join, InstData::new(Opcode::Mov).with_ncomp(1).with_srcs([Src::new(phi)]));

        assert!(peephole_select(&mut p));
        let sel = p.inst(user).srcs[0].value;
        let inst = p.inst(sel);
        assert_eq!(inst.op, Opcode::FCsel);
        assert_eq!(inst.srcs[0].value, c);
        assert_eq!(inst.srcs[1].value, vt);
        assert_eq!(inst.srcs[2].value, ve);
        assert!(p.block_is_empty(then_b));
        assert!(p.block_is_empty(else_b));
        p.verify().unwrap();
    }

    #[test]
    fn constant_loop_unrolls_to_final_values() {
        let mut p = Program::new(Stage::Vertex);
        let entry = p.add_block();
        let l = p.add_block();
        let exit = p.add_block();

        let mut bld = Builder::at_end(&mut p, entry);
        let zero = bld.imm_f(0.0);
        let one = bld.imm_f(1.0);
        let four = bld.imm_f(4.0);
        drop(bld);

        // i = phi(0, i+1); loop while i+1 < 4 (branch-if-zero on i+1 >= 4).
        let phi = p.append(
            l,
            InstData::new(Opcode::Phi)
                .with_ncomp(1)
                .with_srcs([Src::new(zero)])
                .with_aux(Aux::Phi(smallvec![entry])),
        );
        let next = p.append(
            l,
            InstData::new(Opcode::FAdd).with_ncomp(1).with_srcs([Src::new(phi), Src::new(one)]),
        );
        p.add_phi_pred(phi, l, Src::new(next));
        let done = p.append(
            l,
            InstData::new(Opcode::Sge).with_ncomp(1).with_srcs([Src::new(next), Src::new(four)]),
        );
        p.append(l, InstData::new(Opcode::Branch).with_srcs([Src::new(done)]).with_aux(Aux::Target(l)));

        let user =
            p.append(exit, InstData::new(Opcode::Mov).with_ncomp(1).with_srcs([Src::new(next)]));

        assert!(unroll_const_loops(&mut p));
        copy_prop(&mut p);
        dce(&mut p);
        let src = p.inst(user).srcs[0];
        let words = fold::const_words(&p, src.value).unwrap();
        assert_eq!(words[0], 4.0f32.to_bits());
        assert!(p.terminator(l).is_none());
        p.verify().unwrap();
    }
}
