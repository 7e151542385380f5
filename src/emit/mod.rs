// Instruction selection and emission. A static table maps each normalized IR opcode to
// its hardware opcode, source-slot permutation (two bits per hardware slot, 3 meaning
// absent), default condition code and numeric type tag, with an absent-slot sentinel
// instead of any dynamic dispatch. Emission walks blocks in program order, records each
// block's first instruction pointer for the later branch fixup, resolves IR sources
// into hardware operands (temporary slots through the allocation, immediates through
// the uniform table, the front-face bit through the internal register group), applies
// the scalar-lane broadcast contract for the reciprocal/transcendental/convert
// families, and emits phi moves at predecessor block ends with cycle breaking through
// a scratch register. Two pre-allocation legalizations live here as well: values
// feeding outputs must be plain register reads, and on cores with a single uniform
// port every instruction is rewritten until its constant operands reach one slot.

use smallvec::SmallVec;

use crate::core::{CompileError, CompileResult, HwFeatures, HwSpecs};
use crate::ir::{Aux, BlockId, InstData, InstId, Opcode, Program, Src, Stage};
use crate::isa::{Cond, HwDst, HwInst, HwOpcode, HwSrc, InstType, RGroup, Swizzle, WriteMask};
use crate::opt::fold;
use crate::ra::{self, Allocation, PhysSlot, ValueClass};

pub mod uniforms;

pub use uniforms::{UniformContents, UniformTable};

/// Source-slot permutations: two bits per hardware slot, 3 = absent.
const SRC_0_1_2: u8 = 0 | 1 << 2 | 2 << 4;
const SRC_0_1_X: u8 = 0 | 1 << 2 | 3 << 4;
const SRC_0_X_X: u8 = 0 | 3 << 2 | 3 << 4;
const SRC_0_X_1: u8 = 0 | 3 << 2 | 1 << 4;
const SRC_0_1_0: u8 = 0 | 1 << 2 | 0 << 4;
const SRC_X_X_0: u8 = 3 | 3 << 2 | 0 << 4;
const SRC_0_X_0: u8 = 0 | 3 << 2 | 0 << 4;

/// Selection table entry.
#[derive(Debug, Clone, Copy)]
struct OpEntry {
    opcode: HwOpcode,
    src: u8,
    cond: Cond,
    ty: InstType,
}

const fn entry(opcode: HwOpcode, src: u8, cond: Cond, ty: InstType) -> OpEntry {
    OpEntry { opcode, src, cond, ty }
}

fn op_entry(op: Opcode) -> Option<OpEntry> {
    use HwOpcode as H;
    use InstType as T;
    let e = match op {
        Opcode::Mov | Opcode::FNeg | Opcode::FAbs | Opcode::FSat => {
            entry(H::Mov, SRC_X_X_0, Cond::True, T::F32)
        }
        Opcode::FMul => entry(H::Mul, SRC_0_1_X, Cond::True, T::F32),
        Opcode::FAdd => entry(H::Add, SRC_0_X_1, Cond::True, T::F32),
        Opcode::FFma => entry(H::Mad, SRC_0_1_2, Cond::True, T::F32),
        Opcode::FDot2 => entry(H::Dp2, SRC_0_1_X, Cond::True, T::F32),
        Opcode::FDot3 => entry(H::Dp3, SRC_0_1_X, Cond::True, T::F32),
        Opcode::FDot4 => entry(H::Dp4, SRC_0_1_X, Cond::True, T::F32),
        Opcode::FMin => entry(H::Select, SRC_0_1_0, Cond::Gt, T::F32),
        Opcode::FMax => entry(H::Select, SRC_0_1_0, Cond::Lt, T::F32),
        Opcode::FFract => entry(H::Frc, SRC_X_X_0, Cond::True, T::F32),
        Opcode::FRcp => entry(H::Rcp, SRC_X_X_0, Cond::True, T::F32),
        Opcode::FRsq => entry(H::Rsq, SRC_X_X_0, Cond::True, T::F32),
        Opcode::FSqrt => entry(H::Sqrt, SRC_X_X_0, Cond::True, T::F32),
        Opcode::FSin => entry(H::Sin, SRC_X_X_0, Cond::True, T::F32),
        Opcode::FCos => entry(H::Cos, SRC_X_X_0, Cond::True, T::F32),
        Opcode::FSign => entry(H::Sign, SRC_X_X_0, Cond::True, T::F32),
        Opcode::FFloor => entry(H::Floor, SRC_X_X_0, Cond::True, T::F32),
        Opcode::FCeil => entry(H::Ceil, SRC_X_X_0, Cond::True, T::F32),
        Opcode::FLog2 => entry(H::Log, SRC_X_X_0, Cond::True, T::F32),
        Opcode::FExp2 => entry(H::Exp, SRC_X_X_0, Cond::True, T::F32),
        Opcode::Seq => entry(H::Set, SRC_0_1_X, Cond::Eq, T::F32),
        Opcode::Sne => entry(H::Set, SRC_0_1_X, Cond::Ne, T::F32),
        Opcode::Sge => entry(H::Set, SRC_0_1_X, Cond::Ge, T::F32),
        Opcode::Slt => entry(H::Set, SRC_0_1_X, Cond::Lt, T::F32),
        Opcode::FCsel => entry(H::Select, SRC_0_1_2, Cond::Nz, T::F32),
        Opcode::FDiv => entry(H::Div, SRC_0_1_X, Cond::True, T::F32),
        Opcode::FDdx => entry(H::Dsx, SRC_0_X_0, Cond::True, T::F32),
        Opcode::FDdy => entry(H::Dsy, SRC_0_X_0, Cond::True, T::F32),
        Opcode::I2F => entry(H::I2F, SRC_0_X_X, Cond::True, T::S32),
        Opcode::F2U => entry(H::F2I, SRC_0_X_X, Cond::True, T::U32),
        _ => return None,
    };
    Some(e)
}

/// Ops whose first source must be broadcast from the lowest enabled
/// destination component.
fn broadcast_src0(op: Opcode) -> bool {
    matches!(
        op,
        Opcode::FDiv
            | Opcode::FLog2
            | Opcode::FSin
            | Opcode::FCos
            | Opcode::FRcp
            | Opcode::FRsq
            | Opcode::FExp2
            | Opcode::FSqrt
            | Opcode::I2F
            | Opcode::F2U
    )
}

/// Ops that produce a result pair on the new transcendental unit.
fn result_pair_op(op: Opcode) -> bool {
    matches!(op, Opcode::FDiv | Opcode::FLog2 | Opcode::FSin | Opcode::FCos)
}

// ---------------------------------------------------------------------------
// Pre-allocation legalization
// ---------------------------------------------------------------------------

fn identity_over(swizzle: Swizzle, ncomp: u8) -> bool {
    (0..ncomp).all(|i| swizzle.lane(i) == i)
}

/// Make every output source a plain register read.
fn legalize_outputs(prog: &mut Program) {
    for b in prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            if prog.inst(id).op != Opcode::StoreOutput {
                continue;
            }
            let Aux::Output { base } = prog.inst(id).aux else { unreachable!() };
            let src = prog.inst(id).srcs[0];
            let ncomp = prog.outputs[base as usize].ncomp;
            let plain = ra::value_class(prog, src.value) == Some(ValueClass::Temp)
                && identity_over(src.swizzle, ncomp)
                && !src.has_mods();
            if plain {
                continue;
            }
            let mov = prog.insert_before(
                id,
                InstData::new(Opcode::Mov).with_ncomp(ncomp).with_srcs([src]),
            );
            prog.set_src(id, 0, Src::new(mov));
        }
    }
}

/// On single-uniform-port cores, rewrite instructions until at most one
/// operand reads constant memory; the rest are copied into temporaries.
fn legalize_const_srcs(prog: &mut Program) {
    for b in prog.order().to_vec() {
        for id in prog.block_insts(b).to_vec() {
            let inst = prog.inst(id);
            if matches!(inst.op, Opcode::StoreOutput | Opcode::Phi | Opcode::Vec) {
                continue;
            }
            let uniform_idxs: Vec<usize> = (0..inst.srcs.len())
                .filter(|&i| {
                    ra::value_class(prog, inst.srcs[i].value) == Some(ValueClass::Uniform)
                })
                .collect();
            if uniform_idxs.len() <= 1 {
                continue;
            }
            for &i in &uniform_idxs[1..] {
                let s = prog.inst(id).srcs[i];
                let ncomp = prog.inst(s.value).ncomp;
                let mov = prog.insert_before(
                    id,
                    InstData::new(Opcode::Mov).with_ncomp(ncomp).with_srcs([Src::new(s.value)]),
                );
                prog.set_src(id, i, Src { value: mov, ..s });
            }
        }
    }
}

/// Pre-allocation legalization entry point.
pub fn legalize(prog: &mut Program, specs: &HwSpecs) {
    legalize_outputs(prog);
    if specs.single_uniform_port() {
        legalize_const_srcs(prog);
    }
}

// ---------------------------------------------------------------------------
// Emission
// ---------------------------------------------------------------------------

/// Emission output handed to the encoder stage.
#[derive(Debug)]
pub struct EmitResult {
    pub code: Vec<HwInst>,
    /// First instruction index of each block, by block id.
    pub block_ptr: Vec<u32>,
    /// Register holding each declared output, by driver location.
    pub output_reg: Vec<Option<u16>>,
    pub uniforms: UniformTable,
    pub num_temps: u32,
}

struct Emitter<'a> {
    prog: &'a Program,
    specs: &'a HwSpecs,
    alloc: &'a Allocation,
    uniforms: UniformTable,
    code: Vec<HwInst>,
    block_ptr: Vec<u32>,
    output_reg: Vec<Option<u16>>,
    num_temps: u32,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    reg: u16,
    offset: u8,
    ncomp: u8,
}

fn windows_overlap(a: Window, b: Window) -> bool {
    a.reg == b.reg && a.offset < b.offset + b.ncomp && b.offset < a.offset + a.ncomp
}

#[derive(Debug, Clone)]
struct PhiMove {
    dst: HwDst,
    src: HwSrc,
    src_window: Option<Window>,
}

impl<'a> Emitter<'a> {
    fn hw_dst(&self, id: InstId) -> CompileResult<(PhysSlot, HwDst)> {
        let slot = self.alloc.slot(id).ok_or_else(|| CompileError::MalformedIr {
            reason: format!("value %{} has no allocated register", id.0),
        })?;
        let mask = WriteMask::range(slot.offset, self.prog.inst(id).ncomp);
        Ok((slot, HwDst::new(slot.reg, mask)))
    }

    /// Map an IR source to a hardware operand. `width` bounds the lanes the
    /// consumer actually reads; junk lanes are clamped into the value.
    fn resolve_src(&mut self, src: &Src, width: u8, int_base: bool) -> CompileResult<HwSrc> {
        let def = self.prog.inst(src.value);
        let ncomp = def.ncomp.max(1);
        let sel = |i: u8| src.swizzle.lane(i).min(ncomp - 1);

        let class = ra::value_class(self.prog, src.value).ok_or_else(|| {
            CompileError::MalformedIr {
                reason: format!("source reads valueless op %{}", src.value.0),
            }
        })?;
        let mut hw = match class {
            ValueClass::Temp => {
                let slot = self.alloc.slot(src.value).ok_or_else(|| CompileError::MalformedIr {
                    reason: format!("value %{} has no allocated register", src.value.0),
                })?;
                let swiz = Swizzle::new(
                    slot.offset + sel(0),
                    slot.offset + sel(1),
                    slot.offset + sel(2),
                    slot.offset + sel(3),
                );
                HwSrc::temp(slot.reg, swiz)
            }
            ValueClass::Internal => HwSrc::internal(0, Swizzle::broadcast(0)),
            ValueClass::Undefined => HwSrc::temp(0, Swizzle::broadcast(0)),
            ValueClass::Uniform => self.resolve_uniform(src, width, int_base)?,
        };
        hw.neg = src.neg;
        hw.abs = src.abs;
        Ok(hw)
    }

    fn resolve_uniform(&mut self, src: &Src, width: u8, int_base: bool) -> CompileResult<HwSrc> {
        let def = self.prog.inst(src.value);
        match (def.op, &def.aux) {
            (Opcode::Const, Aux::Const(words)) => {
                let ncomp = def.ncomp.max(1);
                let sel = |i: u8| src.swizzle.lane(i).min(ncomp - 1);
                let contents =
                    if int_base { UniformContents::Int } else { UniformContents::Float };
                // One scalar per distinct selected component.
                let mut sels: SmallVec<[u8; 4]> = SmallVec::new();
                for l in 0..width.max(1) {
                    if !sels.contains(&sel(l)) {
                        sels.push(sel(l));
                    }
                }
                let scalars: Vec<uniforms::UniformScalar> =
                    sels.iter().map(|&s| (words[s as usize], contents)).collect();
                let (slot, comps) = self.uniforms.alloc_group(&scalars)?;
                let comp_of = |l: u8| {
                    let s = sel(l.min(ncomp - 1));
                    sels.iter().position(|&x| x == s).map(|i| comps[i]).unwrap_or(comps[0])
                };
                let swiz = Swizzle::new(comp_of(0), comp_of(1), comp_of(2), comp_of(3));
                Ok(HwSrc::uniform(self.imm_reg(slot), swiz))
            }
            (Opcode::LoadUniform, Aux::Uniform { base }) if *base < 0 => {
                // Driver-patched rectangle-texture scale, keyed by the
                // complemented sampler index.
                let sampler = !(*base) as u32;
                let (slot, comps) = self.uniforms.alloc_group(&[
                    (sampler, UniformContents::TexRectScaleX),
                    (sampler, UniformContents::TexRectScaleY),
                ])?;
                let sel = |i: u8| comps[src.swizzle.lane(i).min(1) as usize];
                let swiz = Swizzle::new(sel(0), sel(1), sel(2), sel(3));
                Ok(HwSrc::uniform(self.imm_reg(slot), swiz))
            }
            (Opcode::LoadUniform, Aux::Uniform { base }) => {
                let byte = fold::src_lane_bits(self.prog, &def.srcs[0], 0).ok_or_else(|| {
                    CompileError::MalformedIr {
                        reason: "static uniform read lost its constant offset".into(),
                    }
                })?;
                let slot = *base as u32 + byte / 16;
                let word = ((byte % 16) / 4) as u8;
                let ncomp = def.ncomp.max(1);
                let sel = |i: u8| (word + src.swizzle.lane(i).min(ncomp - 1)).min(3);
                Ok(HwSrc::uniform(slot as u16, Swizzle::new(sel(0), sel(1), sel(2), sel(3))))
            }
            _ => Err(CompileError::MalformedIr {
                reason: format!("op {} is not uniform-resident", def.op.info().name),
            }),
        }
    }

    /// Immediates live after the declared application uniform slots.
    fn imm_reg(&self, slot: u16) -> u16 {
        self.prog.num_uniform_slots + slot
    }

    fn push(&mut self, inst: HwInst) {
        self.code.push(inst);
    }

    fn push_mov(&mut self, dst: HwDst, src: HwSrc, sat: bool) {
        self.push(HwInst {
            opcode: HwOpcode::Mov,
            sat,
            dst: Some(dst),
            src: [None, None, Some(src)],
            ..HwInst::default()
        });
    }

    fn emit_alu(&mut self, id: InstId) -> CompileResult<()> {
        let inst = self.prog.inst(id);
        let mut op = inst.op;
        let mut srcs: SmallVec<[Src; 4]> = inst.srcs.clone();
        // The modifier wrappers are plain movs at the hardware level.
        match op {
            Opcode::FNeg => {
                srcs[0] = srcs[0].negated();
                op = Opcode::Mov;
            }
            Opcode::FAbs => {
                srcs[0] = Src { abs: true, neg: false, ..srcs[0] };
                op = Opcode::Mov;
            }
            Opcode::FSat => op = Opcode::Mov,
            _ => {}
        }
        let entry = op_entry(op).ok_or_else(|| CompileError::MalformedIr {
            reason: format!("no selection entry for {}", op.info().name),
        })?;
        let saturate = inst.saturate || inst.op == Opcode::FSat;

        let (_, dst) = self.hw_dst(id)?;
        let mut hw = HwInst {
            opcode: entry.opcode,
            ty: entry.ty,
            cond: entry.cond,
            sat: saturate,
            dst: Some(dst),
            ..HwInst::default()
        };

        let mut resolved: SmallVec<[HwSrc; 4]> = SmallVec::new();
        for (i, s) in srcs.iter().enumerate() {
            let width = op.src_read_width(i, inst.ncomp);
            resolved.push(self.resolve_src(s, width, false)?);
        }

        if result_pair_op(inst.op)
            && self.specs.features.contains(HwFeatures::NEW_TRANSCENDENTALS)
        {
            hw.tex.amode = 1;
        }
        if broadcast_src0(inst.op) {
            // Scalar results align with the lowest enabled component.
            let k = dst.write_mask.first_component();
            resolved[0].swiz = resolved[0].swiz.compose(Swizzle::broadcast(k));
        }

        for slot in 0..3u8 {
            let logical = (entry.src >> (2 * slot)) & 3;
            if logical < 3 {
                if let Some(src) = resolved.get(logical as usize) {
                    hw.src[slot as usize] = Some(*src);
                }
            }
        }
        self.push(hw);
        Ok(())
    }

    fn emit_vec(&mut self, id: InstId) -> CompileResult<()> {
        let inst = self.prog.inst(id);
        let (slot, _) = self.hw_dst(id)?;
        let lanes = inst.srcs.clone();
        let sat = inst.saturate;
        let mut done = vec![false; lanes.len()];
        for i in 0..lanes.len() {
            if done[i] {
                continue;
            }
            // One mov per distinct (value, modifiers) group.
            let key = (lanes[i].value, lanes[i].neg, lanes[i].abs);
            let mut mask = WriteMask::empty();
            let mut swiz = Swizzle::IDENTITY;
            for (l, s) in lanes.iter().enumerate() {
                if (s.value, s.neg, s.abs) != key {
                    continue;
                }
                done[l] = true;
                let hw_lane = slot.offset + l as u8;
                mask |= WriteMask::range(hw_lane, 1);
                swiz = swiz.with_lane(hw_lane, s.swizzle.lane(0));
            }
            let ir_src = Src { value: key.0, swizzle: swiz, neg: key.1, abs: key.2 };
            let src = self.resolve_src(&ir_src, 4, false)?;
            self.push_mov(HwDst::new(slot.reg, mask), src, sat);
        }
        Ok(())
    }

    fn emit_tex(&mut self, id: InstId) -> CompileResult<()> {
        let inst = self.prog.inst(id);
        let Aux::Tex { sampler, .. } = inst.aux else {
            return Err(CompileError::MalformedIr {
                reason: "texture instruction without sampler payload".into(),
            });
        };
        let opcode = match inst.op {
            Opcode::Tex => HwOpcode::TexLd,
            Opcode::TexBias => HwOpcode::TexLdB,
            Opcode::TexLod => HwOpcode::TexLdL,
            _ => unreachable!(),
        };
        let (slot, dst) = self.hw_dst(id)?;
        let sampler_base = if self.prog.stage == Stage::Vertex {
            self.specs.vertex_sampler_offset
        } else {
            0
        };
        // The destination swizzle places result lanes at the allocated
        // component window.
        let mut dst_swiz = Swizzle::IDENTITY;
        for l in 0..inst.ncomp {
            dst_swiz = dst_swiz.with_lane(slot.offset + l, l);
        }
        let coord_width = self.prog.inst(inst.srcs[0].value).ncomp;
        let coord = self.resolve_src(&inst.srcs[0], coord_width, false)?;
        let mut hw = HwInst {
            opcode,
            dst: Some(dst),
            src: [Some(coord), None, None],
            ..HwInst::default()
        };
        hw.tex.id = sampler + sampler_base as u8;
        hw.tex.swiz = dst_swiz;
        if let Some(lod) = inst.srcs.get(1) {
            hw.src[1] = Some(self.resolve_src(lod, 1, false)?);
        }
        self.push(hw);
        Ok(())
    }

    fn emit_load(&mut self, id: InstId) -> CompileResult<()> {
        let inst = self.prog.inst(id);
        let (_, dst) = self.hw_dst(id)?;
        let offset = self.resolve_src(&inst.srcs[0], 1, false)?;
        let base = match inst.op {
            Opcode::LoadUbo => self.resolve_src(&inst.srcs[1], 1, true)?,
            Opcode::LoadUniform => {
                let Aux::Uniform { base } = inst.aux else { unreachable!() };
                let (slot, comps) = self
                    .uniforms
                    .alloc_group(&[(base as u32 * 16, UniformContents::Int)])?;
                HwSrc::uniform(self.imm_reg(slot), Swizzle::broadcast(comps[0]))
            }
            _ => unreachable!(),
        };
        self.push(HwInst {
            opcode: HwOpcode::Load,
            ty: InstType::U32,
            dst: Some(dst),
            src: [Some(offset), Some(base), None],
            ..HwInst::default()
        });
        Ok(())
    }

    fn emit_branch(&mut self, id: InstId) -> CompileResult<()> {
        let inst = self.prog.inst(id);
        let Aux::Target(target) = inst.aux else { unreachable!() };
        if inst.srcs.is_empty() {
            self.push(HwInst {
                opcode: HwOpcode::Branch,
                imm: target.0,
                ..HwInst::default()
            });
            return Ok(());
        }
        let mut cond = self.resolve_src(&inst.srcs[0], 1, false)?;
        cond.swiz = cond.swiz.compose(Swizzle::broadcast(0));
        self.push(HwInst {
            opcode: HwOpcode::Branch,
            cond: Cond::Not,
            ty: InstType::U32,
            src: [Some(cond), None, None],
            imm: target.0,
            ..HwInst::default()
        });
        Ok(())
    }

    fn emit_discard(&mut self, id: InstId) -> CompileResult<()> {
        let inst = self.prog.inst(id);
        if inst.srcs.is_empty() {
            self.push(HwInst { opcode: HwOpcode::TexKill, ..HwInst::default() });
            return Ok(());
        }
        let mut cond = self.resolve_src(&inst.srcs[0], 1, false)?;
        cond.swiz = cond.swiz.compose(Swizzle::broadcast(0));
        self.push(HwInst {
            opcode: HwOpcode::TexKill,
            cond: Cond::Gz,
            src: [Some(cond), None, None],
            ..HwInst::default()
        });
        Ok(())
    }

    fn scratch_reg(&mut self) -> CompileResult<u16> {
        let scratch = self.num_temps;
        if scratch + 1 > self.specs.max_temps {
            return Err(CompileError::TooManyTemporaries {
                required: scratch + 1,
                available: self.specs.max_temps,
            });
        }
        self.num_temps = scratch + 1;
        Ok(scratch as u16)
    }

    /// Emit the phi moves for every outgoing edge of `b`, sequencing them
    /// so later moves never read an already overwritten register and
    /// breaking copy cycles through a scratch register.
    fn emit_phi_moves(&mut self, b: BlockId) -> CompileResult<()> {
        for succ in self.prog.succs(b) {
            let mut moves: Vec<PhiMove> = Vec::new();
            for &phi in self.prog.block_insts(succ) {
                let inst = self.prog.inst(phi);
                if inst.op != Opcode::Phi {
                    continue;
                }
                let Aux::Phi(preds) = &inst.aux else { unreachable!() };
                let Some(idx) = preds.iter().position(|&p| p == b) else { continue };
                let pair = inst.srcs[idx];
                let slot = self.alloc.slot(phi).ok_or_else(|| CompileError::MalformedIr {
                    reason: format!("phi %{} has no allocated register", phi.0),
                })?;
                let ncomp = inst.ncomp;
                let mut swiz = Swizzle::IDENTITY;
                for l in 0..ncomp {
                    swiz = swiz.with_lane(slot.offset + l, pair.swizzle.lane(l));
                }
                let ir_src = Src { value: pair.value, swizzle: swiz, neg: pair.neg, abs: pair.abs };
                let src = self.resolve_src(&ir_src, 4, false)?;
                let src_window = (src.rgroup == RGroup::Temp).then(|| Window {
                    reg: src.reg,
                    offset: 0,
                    ncomp: 4,
                });
                moves.push(PhiMove {
                    dst: HwDst::new(slot.reg, WriteMask::range(slot.offset, ncomp)),
                    src,
                    src_window,
                });
            }

            while !moves.is_empty() {
                let safe = (0..moves.len()).find(|&i| {
                    let dst_window = Window {
                        reg: moves[i].dst.reg,
                        offset: moves[i].dst.write_mask.first_component(),
                        ncomp: moves[i].dst.write_mask.bits().count_ones() as u8,
                    };
                    !moves.iter().enumerate().any(|(j, o)| {
                        j != i
                            && o.src_window
                                .map_or(false, |w| windows_overlap(w, dst_window))
                    })
                });
                match safe {
                    Some(i) => {
                        let m = moves.remove(i);
                        self.push_mov(m.dst, m.src, false);
                    }
                    None => {
                        // Copy cycle: park one source register in scratch.
                        let victim = moves[0].src_window.expect("cycles need temp sources");
                        let scratch = self.scratch_reg()?;
                        self.push_mov(
                            HwDst::new(scratch, WriteMask::all()),
                            HwSrc::temp(victim.reg, Swizzle::IDENTITY),
                            false,
                        );
                        for m in &mut moves {
                            if let Some(w) = &mut m.src_window {
                                if w.reg == victim.reg {
                                    w.reg = scratch;
                                    m.src.reg = scratch;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_block(&mut self, b: BlockId) -> CompileResult<()> {
        self.block_ptr[b.0 as usize] = self.code.len() as u32;
        let insts = self.prog.block_insts(b).to_vec();
        let term = self.prog.terminator(b);
        for &id in &insts {
            if Some(id) == term {
                break;
            }
            self.emit_inst(id)?;
        }
        self.emit_phi_moves(b)?;
        if let Some(term) = term {
            self.emit_branch(term)?;
        }
        Ok(())
    }

    fn emit_inst(&mut self, id: InstId) -> CompileResult<()> {
        let inst = self.prog.inst(id);
        match inst.op {
            Opcode::Const
            | Opcode::Undef
            | Opcode::Phi
            | Opcode::LoadInput
            | Opcode::LoadInstanceId
            | Opcode::LoadFrontFace => Ok(()),
            Opcode::LoadUniform => {
                if ra::value_class(self.prog, id) == Some(ValueClass::Temp) {
                    self.emit_load(id)
                } else {
                    Ok(())
                }
            }
            Opcode::LoadUbo => self.emit_load(id),
            Opcode::StoreOutput => {
                let Aux::Output { base } = inst.aux else { unreachable!() };
                let value = inst.srcs[0].value;
                let slot = self.alloc.slot(value).ok_or_else(|| CompileError::MalformedIr {
                    reason: "output source was not legalized into a register".into(),
                })?;
                self.output_reg[base as usize] = Some(slot.reg);
                Ok(())
            }
            Opcode::Vec => self.emit_vec(id),
            Opcode::Tex | Opcode::TexBias | Opcode::TexLod => self.emit_tex(id),
            Opcode::Branch => unreachable!("terminators are emitted by emit_block"),
            Opcode::Discard => self.emit_discard(id),
            _ => self.emit_alu(id),
        }
    }
}

/// Emit the whole program into logical hardware instructions.
pub fn emit_program(
    prog: &Program,
    specs: &HwSpecs,
    alloc: &Allocation,
) -> CompileResult<EmitResult> {
    let mut e = Emitter {
        prog,
        specs,
        alloc,
        uniforms: UniformTable::new(
            specs.max_uniform_slots.saturating_sub(prog.num_uniform_slots as u32),
        ),
        code: Vec::new(),
        block_ptr: vec![0; prog.num_blocks()],
        output_reg: vec![None; prog.outputs.len()],
        num_temps: alloc.num_temps,
    };
    for &b in prog.order() {
        e.emit_block(b)?;
    }
    log::debug!("emitted {} hardware instructions", e.code.len());
    Ok(EmitResult {
        code: e.code,
        block_ptr: e.block_ptr,
        output_reg: e.output_reg,
        uniforms: e.uniforms,
        num_temps: e.num_temps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Builder, IoVar, Semantic};

    fn simple_mul_prog() -> Program {
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
        p
    }

    fn run_emit(prog: &mut Program, specs: &HwSpecs) -> EmitResult {
        legalize(prog, specs);
        let alloc = ra::allocate(prog, specs).unwrap();
        emit_program(prog, specs, &alloc).unwrap()
    }

    #[test]
    fn single_mul_emits_one_instruction() {
        let specs = HwSpecs::legacy();
        let mut p = simple_mul_prog();
        let res = run_emit(&mut p, &specs);
        assert_eq!(res.code.len(), 1);
        let inst = &res.code[0];
        assert_eq!(inst.opcode, HwOpcode::Mul);
        // MUL routes logical sources 0 and 1 into hardware slots 0 and 1.
        assert_eq!(inst.src[0].unwrap().reg, 1);
        assert_eq!(inst.src[1].unwrap().reg, 2);
        assert!(inst.src[2].is_none());
        assert_eq!(res.output_reg[0], Some(inst.dst.unwrap().reg));
    }

    #[test]
    fn mov_uses_hardware_slot_two() {
        let specs = HwSpecs::legacy();
        let mut p = Program::new(Stage::Fragment);
        let b = p.add_block();
        p.inputs.push(IoVar { semantic: Semantic::Varying(0), ncomp: 4 });
        p.outputs.push(IoVar { semantic: Semantic::Color, ncomp: 4 });
        let i0 = p.append(
            b,
            InstData::new(Opcode::LoadInput).with_ncomp(4).with_aux(Aux::Input { base: 0 }),
        );
        let m = p.append(
            b,
            InstData::new(Opcode::Mov).with_ncomp(4).with_srcs([Src::new(i0)]),
        );
        p.append(
            b,
            InstData::new(Opcode::StoreOutput)
                .with_srcs([Src::new(m)])
                .with_aux(Aux::Output { base: 0 }),
        );
        let res = run_emit(&mut p, &specs);
        assert_eq!(res.code.len(), 1);
        assert!(res.code[0].src[0].is_none());
        assert!(res.code[0].src[2].is_some());
    }

    #[test]
    fn scalar_rcp_broadcasts_from_destination_component() {
        let specs = HwSpecs::legacy();
        let mut p = Program::new(Stage::Fragment);
        let b = p.add_block();
        p.inputs.push(IoVar { semantic: Semantic::Varying(0), ncomp: 4 });
        p.outputs.push(IoVar { semantic: Semantic::Color, ncomp: 1 });
        let i0 = p.append(
            b,
            InstData::new(Opcode::LoadInput).with_ncomp(4).with_aux(Aux::Input { base: 0 }),
        );
        let mut bld = Builder::at_end(&mut p, b);
        let r = bld.alu1(Opcode::FRcp, 1, Src::swizzled(i0, Swizzle::broadcast(2)));
        drop(bld);
        p.append(
            b,
            InstData::new(Opcode::StoreOutput)
                .with_srcs([Src::new(r)])
                .with_aux(Aux::Output { base: 0 }),
        );
        let res = run_emit(&mut p, &specs);
        let rcp = res.code.iter().find(|i| i.opcode == HwOpcode::Rcp).unwrap();
        let k = rcp.dst.unwrap().write_mask.first_component();
        // Every lane of the broadcast source reads the same component.
        let swiz = rcp.src[2].unwrap().swiz;
        assert_eq!(swiz, Swizzle::broadcast(swiz.lane(k)));
        assert_eq!(swiz.lane(k), 2);
    }

    #[test]
    fn constants_go_to_the_uniform_table() {
        let specs = HwSpecs::legacy();
        let mut p = Program::new(Stage::Fragment);
        let b = p.add_block();
        p.inputs.push(IoVar { semantic: Semantic::Varying(0), ncomp: 4 });
        p.outputs.push(IoVar { semantic: Semantic::Color, ncomp: 4 });
        let i0 = p.append(
            b,
            InstData::new(Opcode::LoadInput).with_ncomp(4).with_aux(Aux::Input { base: 0 }),
        );
        let mut bld = Builder::at_end(&mut p, b);
        let k = bld.imm_f(0.5);
        let m = bld.fmul(4, Src::new(i0), Src::swizzled(k, Swizzle::broadcast(0)));
        drop(bld);
        p.append(
            b,
            InstData::new(Opcode::StoreOutput)
                .with_srcs([Src::new(m)])
                .with_aux(Aux::Output { base: 0 }),
        );
        let res = run_emit(&mut p, &specs);
        assert_eq!(res.code.len(), 1);
        let src1 = res.code[0].src[1].unwrap();
        assert_eq!(src1.rgroup, RGroup::Uniform);
        assert_eq!(res.uniforms.words()[src1.swiz.lane(0) as usize], 0.5f32.to_bits());
        assert_eq!(res.uniforms.contents()[src1.swiz.lane(0) as usize], UniformContents::Float);
    }

    #[test]
    fn vertex_sampler_index_is_offset() {
        let specs = HwSpecs::legacy();
        let mut p = Program::new(Stage::Vertex);
        let b = p.add_block();
        p.inputs.push(IoVar { semantic: Semantic::Attribute(0), ncomp: 4 });
        p.outputs.push(IoVar { semantic: Semantic::Position, ncomp: 4 });
        let i0 = p.append(
            b,
            InstData::new(Opcode::LoadInput).with_ncomp(2).with_aux(Aux::Input { base: 0 }),
        );
        let t = p.append(
            b,
            InstData::new(Opcode::TexLod)
                .with_ncomp(4)
                .with_srcs([Src::new(i0), Src::new(i0)])
                .with_aux(Aux::Tex { sampler: 1, rect: false }),
        );
        p.append(
            b,
            InstData::new(Opcode::StoreOutput)
                .with_srcs([Src::new(t)])
                .with_aux(Aux::Output { base: 0 }),
        );
        let res = run_emit(&mut p, &specs);
        let tex = res.code.iter().find(|i| i.opcode == HwOpcode::TexLdL).unwrap();
        assert_eq!(tex.tex.id as u32, 1 + specs.vertex_sampler_offset);
    }
}
