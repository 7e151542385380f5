// Register allocation over the SSA value graph. Live ranges come from one linear scan
// over the flattened instruction order: a value lives from its definition (or program
// start, for the hardware-deposited input and instance-id registers) to its last read,
// where a read through a phi counts at the end of the contributing predecessor block
// and ranges crossing a loop back edge are extended over the whole loop. Interference
// is live-range overlap, and coloring is greedy in definition order over candidate
// (register, component-offset) slots of the 4-component temporary file, with inputs
// precolored to their hardware registers and output-feeding values pinned to component
// offset 0 because the hardware reads output registers whole. There is no spilling:
// if the program needs more simultaneous temporaries than the budget allows, the
// compile fails with the required register count. Scheduling in this backend means
// recording block instruction pointers for branch fixups, which emission does while
// walking the allocation produced here.

use crate::core::{CompileError, CompileResult, HwSpecs};
use crate::ir::{Aux, InstId, Opcode, Program, Stage};
use crate::opt::fold;

/// Where a value lives at emission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueClass {
    /// A slot in the temporary register file.
    Temp,
    /// Uniform constant memory (immediates and direct uniform reads).
    Uniform,
    /// An internal hardware register (front-face bit).
    Internal,
    /// No storage; reads are don't-care.
    Undefined,
}

/// Classify a value-producing instruction.
pub fn value_class(prog: &Program, id: InstId) -> Option<ValueClass> {
    let inst = prog.inst(id);
    if !inst.op.info().has_dest || inst.ncomp == 0 {
        return None;
    }
    let class = match inst.op {
        Opcode::Const => ValueClass::Uniform,
        Opcode::Undef => ValueClass::Undefined,
        Opcode::LoadFrontFace => ValueClass::Internal,
        Opcode::LoadUniform => {
            let Aux::Uniform { base } = inst.aux else { return Some(ValueClass::Temp) };
            if base < 0 || fold::src_lane_bits(prog, &inst.srcs[0], 0).is_some() {
                // Texcoord scales and statically addressed slots read
                // straight from constant memory.
                ValueClass::Uniform
            } else {
                ValueClass::Temp
            }
        }
        _ => ValueClass::Temp,
    };
    Some(class)
}

/// Allocated position: register index plus component offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysSlot {
    pub reg: u16,
    pub offset: u8,
}

/// Result of allocation.
#[derive(Debug, Clone)]
pub struct Allocation {
    /// Indexed by `InstId`; `None` for values without a temporary.
    slots: Vec<Option<PhysSlot>>,
    pub num_temps: u32,
}

impl Allocation {
    pub fn slot(&self, id: InstId) -> Option<PhysSlot> {
        self.slots[id.0 as usize]
    }
}

/// Live range over flattened instruction positions, inclusive.
#[derive(Debug, Clone, Copy, Default)]
struct LiveRange {
    start: u32,
    end: u32,
}

impl LiveRange {
    fn overlaps(&self, other: &LiveRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

/// Number of registers the hardware deposits inputs into, including the
/// fragment position register in front of the user inputs.
pub fn input_reg_count(prog: &Program) -> u32 {
    prog.inputs.len() as u32 + (prog.stage == Stage::Fragment) as u32
}

fn precolored_reg(prog: &Program, id: InstId) -> Option<u16> {
    match prog.inst(id).op {
        Opcode::LoadInput => {
            let Aux::Input { base } = prog.inst(id).aux else { unreachable!() };
            let shift = (prog.stage == Stage::Fragment) as u16;
            Some(base as u16 + shift)
        }
        // The instance counter lands just past the input registers.
        Opcode::LoadInstanceId => Some(input_reg_count(prog) as u16),
        _ => None,
    }
}

/// Allocate every temp-class value to a physical slot.
pub fn allocate(prog: &Program, specs: &HwSpecs) -> CompileResult<Allocation> {
    let pos = prog.positions();
    let num_insts = prog.num_insts();

    // Block position windows, in flattened order.
    let mut block_range = vec![(0u32, 0u32); prog.num_blocks()];
    let mut cursor = 0u32;
    for &b in prog.order() {
        let start = cursor;
        cursor += prog.block_insts(b).len() as u32;
        block_range[b.0 as usize] = (start, cursor);
    }
    let end_of_program = cursor;

    // ---- live ranges ----
    let mut ranges: Vec<Option<LiveRange>> = vec![None; num_insts];
    for &b in prog.order() {
        for &id in prog.block_insts(b) {
            if value_class(prog, id) != Some(ValueClass::Temp) {
                continue;
            }
            let def = pos[id.0 as usize];
            let start = if precolored_reg(prog, id).is_some() { 0 } else { def };
            let mut range = LiveRange { start, end: def };

            for &user in prog.uses(id) {
                let uinst = prog.inst(user);
                if uinst.op == Opcode::Phi {
                    // Read materializes at the end of each contributing
                    // predecessor block.
                    let Aux::Phi(preds) = &uinst.aux else { unreachable!() };
                    for (i, src) in uinst.srcs.iter().enumerate() {
                        if src.value == id {
                            let (_, bend) = block_range[preds[i].0 as usize];
                            range.end = range.end.max(bend);
                        }
                    }
                } else {
                    range.end = range.end.max(pos[user.0 as usize]);
                }
            }

            if prog.inst(id).op == Opcode::Phi {
                let Aux::Phi(preds) = &prog.inst(id).aux else { unreachable!() };
                for p in preds {
                    // The register is written at the end of every
                    // predecessor, so the range opens at the earliest one.
                    let (_, bend) = block_range[p.0 as usize];
                    range.start = range.start.min(bend.saturating_sub(1));
                    range.end = range.end.max(bend);
                }
            }

            // Output registers are read by the hardware after the program
            // finishes.
            if prog.uses(id).iter().any(|&u| prog.inst(u).op == Opcode::StoreOutput) {
                range.end = end_of_program;
            }

            ranges[id.0 as usize] = Some(range);
        }
    }

    // ---- loop extension ----
    let back_edges: Vec<(u32, u32)> = prog
        .order()
        .iter()
        .filter_map(|&b| {
            let term = prog.terminator(b)?;
            let Aux::Target(target) = prog.inst(term).aux else { return None };
            let (hstart, _) = block_range[target.0 as usize];
            let (_, bend) = block_range[b.0 as usize];
            (hstart <= block_range[b.0 as usize].0).then_some((hstart, bend))
        })
        .collect();
    let mut changed = true;
    while changed {
        changed = false;
        for &(h, be) in &back_edges {
            for range in ranges.iter_mut().flatten() {
                if range.start <= h && range.end >= h && range.end < be {
                    range.end = be;
                    changed = true;
                }
            }
        }
    }

    // ---- coloring ----
    let must_align: Vec<bool> = (0..num_insts)
        .map(|i| {
            prog.uses(InstId(i as u32))
                .iter()
                .any(|&u| prog.inst(u).op == Opcode::StoreOutput)
        })
        .collect();

    let mut nodes: Vec<InstId> = (0..num_insts as u32)
        .map(InstId)
        .filter(|&id| ranges[id.0 as usize].is_some())
        .collect();
    nodes.sort_by_key(|&id| (ranges[id.0 as usize].unwrap().start, id.0));

    let mut slots: Vec<Option<PhysSlot>> = vec![None; num_insts];
    let mut assigned: Vec<InstId> = Vec::new();
    let mut max_reg: u32 = 0;

    for &id in &nodes {
        let range = ranges[id.0 as usize].unwrap();
        let ncomp = prog.inst(id).ncomp;

        let slot = if let Some(reg) = precolored_reg(prog, id) {
            PhysSlot { reg, offset: 0 }
        } else {
            let mut found = None;
            'search: for reg in 0u16.. {
                let max_offset = if must_align[id.0 as usize] { 0 } else { 4 - ncomp };
                for offset in 0..=max_offset {
                    let conflict = assigned.iter().any(|&other| {
                        let oslot = slots[other.0 as usize].unwrap();
                        if oslot.reg != reg {
                            return false;
                        }
                        let orange = ranges[other.0 as usize].unwrap();
                        if !range.overlaps(&orange) {
                            return false;
                        }
                        let oncomp = prog.inst(other).ncomp;
                        offset < oslot.offset + oncomp && oslot.offset < offset + ncomp
                    });
                    if !conflict {
                        found = Some(PhysSlot { reg, offset });
                        break 'search;
                    }
                }
            }
            found.expect("register search is unbounded")
        };

        log::trace!(
            "%{} ({} comps, live {}..{}) -> t{}+{}",
            id.0,
            ncomp,
            range.start,
            range.end,
            slot.reg,
            slot.offset
        );
        max_reg = max_reg.max(slot.reg as u32);
        slots[id.0 as usize] = Some(slot);
        assigned.push(id);
    }

    let num_temps = (max_reg + 1).max(input_reg_count(prog));
    if num_temps > specs.max_temps {
        return Err(CompileError::TooManyTemporaries {
            required: num_temps,
            available: specs.max_temps,
        });
    }
    log::debug!("allocation used {num_temps} temporaries");
    Ok(Allocation { slots, num_temps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Aux, Builder, InstData, IoVar, Semantic, Src, Stage};

    fn two_input_fragment() -> (Program, crate::ir::BlockId, InstId, InstId) {
        let mut p = Program::new(Stage::Fragment);
        let b = p.add_block();
        p.inputs.push(IoVar { semantic: Semantic::Varying(0), ncomp: 4 });
        p.inputs.push(IoVar { semantic: Semantic::Varying(1), ncomp: 4 });
        p.outputs.push(IoVar { semantic: Semantic::Color, ncomp: 4 });
        let i0 = p.append(
            b,
            InstData::new(Opcode::LoadInput).with_ncomp(4).with_aux(Aux::Input { base: 0 }),
        );
        let i1 = p.append(
            b,
            InstData::new(Opcode::LoadInput).with_ncomp(4).with_aux(Aux::Input { base: 1 }),
        );
        (p, b, i0, i1)
    }

    #[test]
    fn fragment_inputs_are_precolored_past_position() {
        let (mut p, b, i0, i1) = two_input_fragment();
        let m = p.append(
            b,
            InstData::new(Opcode::FMul)
                .with_ncomp(4)
                .with_srcs([Src::new(i0), Src::new(i1)]),
        );
        p.append(
            b,
            InstData::new(Opcode::StoreOutput)
                .with_srcs([Src::new(m)])
                .with_aux(Aux::Output { base: 0 }),
        );
        let alloc = allocate(&p, &HwSpecs::legacy()).unwrap();
        assert_eq!(alloc.slot(i0), Some(PhysSlot { reg: 1, offset: 0 }));
        assert_eq!(alloc.slot(i1), Some(PhysSlot { reg: 2, offset: 0 }));
        let mslot = alloc.slot(m).unwrap();
        assert_eq!(mslot.offset, 0);
        assert!(alloc.num_temps >= 3);
    }

    #[test]
    fn disjoint_ranges_share_a_register() {
        let (mut p, b, i0, _i1) = two_input_fragment();
        let mut bld = Builder::at_end(&mut p, b);
        let a = bld.alu1(Opcode::FFloor, 1, Src::new(i0));
        let a2 = bld.alu1(Opcode::FCeil, 1, Src::new(a));
        // `a` dies at a2; a later scalar can reuse its slot.
        let c = bld.alu1(Opcode::FFract, 1, Src::new(a2));
        drop(bld);
        p.append(
            b,
            InstData::new(Opcode::StoreOutput)
                .with_srcs([Src::new(c)])
                .with_aux(Aux::Output { base: 0 }),
        );
        let alloc = allocate(&p, &HwSpecs::legacy()).unwrap();
        let sa = alloc.slot(a).unwrap();
        let sc = alloc.slot(c).unwrap();
        assert_eq!((sa.reg, sa.offset), (sc.reg, sc.offset));
    }

    #[test]
    fn interfering_values_get_distinct_slots() {
        let (mut p, b, i0, i1) = two_input_fragment();
        let mut bld = Builder::at_end(&mut p, b);
        let a = bld.alu2(Opcode::FAdd, 2, Src::new(i0), Src::new(i1));
        let c = bld.alu2(Opcode::FMul, 2, Src::new(i0), Src::new(i1));
        let d = bld.alu2(Opcode::FMul, 2, Src::new(a), Src::new(c));
        drop(bld);
        p.append(
            b,
            InstData::new(Opcode::StoreOutput)
                .with_srcs([Src::new(d)])
                .with_aux(Aux::Output { base: 0 }),
        );
        let alloc = allocate(&p, &HwSpecs::legacy()).unwrap();
        let (sa, sc) = (alloc.slot(a).unwrap(), alloc.slot(c).unwrap());
        let disjoint = sa.reg != sc.reg
            || sa.offset + 2 <= sc.offset
            || sc.offset + 2 <= sa.offset;
        assert!(disjoint);
    }

    #[test]
    fn budget_overflow_reports_required_count() {
        let (mut p, b, i0, _) = two_input_fragment();
        // Build a chain of wide values that are all kept live by a final
        // consumer, overflowing a tiny register file.
        let mut bld = Builder::at_end(&mut p, b);
        let mut vals = Vec::new();
        for i in 0..6usize {
            let v = bld.alu2(
                Opcode::FAdd,
                4,
                Src::new(i0),
                Src::new(*vals.get(i.wrapping_sub(1)).unwrap_or(&i0)),
            );
            vals.push(v);
        }
        let mut acc = vals[0];
        for &v in &vals[1..] {
            acc = bld.alu2(Opcode::FAdd, 4, Src::new(acc), Src::new(v));
        }
        drop(bld);
        p.append(
            b,
            InstData::new(Opcode::StoreOutput)
                .with_srcs([Src::new(acc)])
                .with_aux(Aux::Output { base: 0 }),
        );
        let mut specs = HwSpecs::legacy();
        specs.max_temps = 4;
        match allocate(&p, &specs) {
            Err(CompileError::TooManyTemporaries { required, available }) => {
                assert!(required > available);
                assert_eq!(available, 4);
            }
            other => panic!("expected allocation failure, got {other:?}"),
        }
    }
}
