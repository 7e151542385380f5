// Local value cleanups: copy propagation, dead code elimination and block-local CSE.
// Copy propagation folds unsaturated movs into their consumers through swizzle/modifier
// composition, which also absorbs the mov-with-modifier forms the algebraic pass
// canonicalizes fneg/fabs into. CSE is block-local, keyed on the full value identity
// tuple (opcode, width, saturate, sources with swizzles and modifiers, payload); the
// dominator-based global variant is deliberately not attempted. DCE removes any pure
// value-producing instruction with an empty use list, sweeping in reverse so whole
// chains die in one pass.

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::ir::{Aux, InstId, Opcode, Program, Src};

/// Fold unsaturated movs into their consumers.
pub fn copy_prop(prog: &mut Program) -> bool {
    let mut progress = false;
    for &b in &prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            let inst = prog.inst(id);
            if inst.op != Opcode::Mov || inst.saturate {
                continue;
            }
            if prog.is_unused(id) {
                continue;
            }
            let repl = inst.srcs[0];
            prog.replace_uses(id, repl);
            progress = true;
        }
    }
    progress
}

/// Remove pure instructions whose value is never read.
pub fn dce(prog: &mut Program) -> bool {
    let mut progress = false;
    loop {
        let mut changed = false;
        for &b in &prog.order().to_vec() {
            for id in prog.block_insts(b).to_vec().into_iter().rev() {
                let info = prog.inst(id).op.info();
                if info.pure_op && info.has_dest && prog.is_unused(id) {
                    prog.remove(id);
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
        progress = true;
    }
    progress
}

#[derive(PartialEq, Eq, Hash)]
struct CseKey {
    op: Opcode,
    ncomp: u8,
    saturate: bool,
    srcs: SmallVec<[Src; 4]>,
    aux: Aux,
}

/// Block-local common subexpression elimination.
pub fn cse(prog: &mut Program) -> bool {
    let mut progress = false;
    let mut seen: HashMap<CseKey, InstId> = HashMap::new();
    for &b in &prog.order().to_vec() {
        seen.clear();
        for id in prog.block_insts(b).to_vec() {
            let inst = prog.inst(id);
            if !inst.op.info().pure_op || !inst.op.info().has_dest {
                continue;
            }
            let key = CseKey {
                op: inst.op,
                ncomp: inst.ncomp,
                saturate: inst.saturate,
                srcs: inst.srcs.clone(),
                aux: inst.aux.clone(),
            };
            match seen.get(&key) {
                Some(&orig) => {
                    prog.replace_uses(id, Src::new(orig));
                    prog.remove(id);
                    progress = true;
                }
                None => {
                    seen.insert(key, id);
                }
            }
        }
    }
    progress
}
