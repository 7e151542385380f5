// This module drives the normalization fixed point. Each pass is a function from
// Program to a progress flag, and the loop reruns the whole roster until a full sweep
// reports no change: copy propagation, DCE, block-local CSE, if-conversion of small
// diamonds, algebraic simplification, constant folding, dead control flow removal,
// trivial branch elimination (which re-triggers copy-prop/DCE to expose follow-on
// rewrites, as the original pass ordering does), bounded constant-loop unrolling,
// empty-block forwarding, redundant phi removal and undefined-value pruning. Every
// pass only shrinks or simplifies the graph, so the loop terminates; an iteration cap
// backstops the invariant and logs if it is ever hit. Scalarization and vectorization
// are exported separately because the pipeline applies them at fixed points of its own
// (scalarize early, vectorize plus re-scalarize late), not inside the loop.

use crate::ir::Program;

pub mod control_flow;
pub mod fold;
pub mod local;
pub mod scalarize;

pub use scalarize::{lower_to_scalar, scalarize_filter, vectorize};

/// Upper bound on fixed-point sweeps; reaching it indicates a pass that
/// fails to converge and is reported, not silently looped on.
const MAX_ITERATIONS: usize = 64;

/// Run the normalization roster to a fixed point.
pub fn optimize_loop(prog: &mut Program) {
    for iteration in 0..MAX_ITERATIONS {
        let mut progress = false;
        progress |= local::copy_prop(prog);
        progress |= local::dce(prog);
        progress |= local::cse(prog);
        progress |= control_flow::peephole_select(prog);
        progress |= fold::algebraic(prog);
        progress |= fold::constant_folding(prog);
        progress |= control_flow::dead_cf(prog);
        if control_flow::trivial_branches(prog) {
            progress = true;
            // Cleaning up here gives the unroller and if-restructuring a
            // chance to make progress in the same sweep.
            local::copy_prop(prog);
            local::dce(prog);
        }
        progress |= control_flow::unroll_const_loops(prog);
        progress |= control_flow::forward_empty_blocks(prog);
        progress |= control_flow::remove_phis(prog);
        progress |= control_flow::undef_prop(prog);
        if !progress {
            log::debug!("normalization fixed point after {} sweeps", iteration + 1);
            return;
        }
    }
    log::warn!("normalization loop hit the {MAX_ITERATIONS}-sweep cap");
}
