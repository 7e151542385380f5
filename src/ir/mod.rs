// This module implements the SSA instruction graph the whole pipeline operates on. The
// design follows the arena-of-handles layout: Program owns flat Vec arenas of
// instructions and blocks addressed by stable integer ids (InstId, BlockId), block
// order is a separate id list so blocks can be inserted without invalidating handles,
// and value-use edges live in a per-value adjacency list kept in sync by every source
// mutation, giving O(1) rewiring without ownership cycles. A value is identified with
// its producing instruction. Instruction payloads that do not fit the uniform
// opcode/source/destination shape (constant words, I/O bases, sampler ids, branch
// targets, phi predecessors) hang off a tagged Aux enum. Use rewiring is transactional
// per call: replace_uses either rewires every consumer or (on a violated debug
// invariant) panics before touching anything; no partially rewired graph is ever
// observable. The verifier at the bottom checks the structural invariants tests rely
// on: in-block def-before-use, phi placement and predecessor consistency, use-list
// symmetry.

use smallvec::SmallVec;

use crate::core::{CompileError, CompileResult};
use crate::isa::Swizzle;

pub mod builder;

pub use builder::Builder;

/// Stable handle of an instruction and of the SSA value it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(pub u32);

/// Stable handle of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl InstId {
    pub const INVALID: InstId = InstId(u32::MAX);
}

impl BlockId {
    pub const INVALID: BlockId = BlockId(u32::MAX);
}

/// Shader stage of a program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Vertex,
    Fragment,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Stage::Vertex => "vertex",
            Stage::Fragment => "fragment",
        }
    }
}

/// Semantic tag of an input or output variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    Position,
    PointSize,
    PointCoord,
    /// Generic varying, by slot index.
    Varying(u8),
    /// Vertex attribute, by slot index.
    Attribute(u8),
    /// Fragment color result.
    Color,
    /// Fragment depth result.
    Depth,
}

impl std::fmt::Display for Semantic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Semantic::Position => write!(f, "position"),
            Semantic::PointSize => write!(f, "pointsize"),
            Semantic::PointCoord => write!(f, "pointcoord"),
            Semantic::Varying(n) => write!(f, "varying {n}"),
            Semantic::Attribute(n) => write!(f, "attribute {n}"),
            Semantic::Color => write!(f, "color"),
            Semantic::Depth => write!(f, "depth"),
        }
    }
}

/// Declared input or output variable, indexed by its driver location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoVar {
    pub semantic: Semantic,
    pub ncomp: u8,
}

/// The closed operation set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // Value introduction.
    Const,
    Undef,
    Phi,
    Vec,
    // ALU.
    Mov,
    FNeg,
    FAbs,
    FSat,
    FAdd,
    FMul,
    FFma,
    FDiv,
    FDot2,
    FDot3,
    FDot4,
    FMin,
    FMax,
    FFract,
    FFloor,
    FCeil,
    FSign,
    FRcp,
    FRsq,
    FSqrt,
    FExp2,
    FLog2,
    FSin,
    FCos,
    FDdx,
    FDdy,
    Seq,
    Sne,
    Sge,
    Slt,
    FCsel,
    I2F,
    F2U,
    // I/O and resources.
    LoadInput,
    LoadUniform,
    LoadUbo,
    LoadInstanceId,
    LoadFrontFace,
    StoreOutput,
    // Texture sampling.
    Tex,
    TexBias,
    TexLod,
    // Control flow.
    Branch,
    Discard,
}

/// Static properties of an opcode.
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub name: &'static str,
    /// Fixed source count, or `!0` for variable (phi, vec, tex).
    pub src_count: u32,
    pub has_dest: bool,
    /// No side effects: removable when unused, legal to CSE.
    pub pure_op: bool,
    /// Participates in ALU rewrites (scalarization, algebraic, folding).
    pub float_alu: bool,
}

impl Opcode {
    pub const fn info(self) -> OpInfo {
        use Opcode::*;
        const fn op(
            name: &'static str,
            src_count: u32,
            has_dest: bool,
            pure_op: bool,
            float_alu: bool,
        ) -> OpInfo {
            OpInfo { name, src_count, has_dest, pure_op, float_alu }
        }
        match self {
            Const => op("const", 0, true, true, false),
            Undef => op("undef", 0, true, true, false),
            Phi => op("phi", !0, true, true, false),
            Vec => op("vec", !0, true, true, false),
            Mov => op("mov", 1, true, true, true),
            FNeg => op("fneg", 1, true, true, true),
            FAbs => op("fabs", 1, true, true, true),
            FSat => op("fsat", 1, true, true, true),
            FAdd => op("fadd", 2, true, true, true),
            FMul => op("fmul", 2, true, true, true),
            FFma => op("ffma", 3, true, true, true),
            FDiv => op("fdiv", 2, true, true, true),
            FDot2 => op("fdot2", 2, true, true, true),
            FDot3 => op("fdot3", 2, true, true, true),
            FDot4 => op("fdot4", 2, true, true, true),
            FMin => op("fmin", 2, true, true, true),
            FMax => op("fmax", 2, true, true, true),
            FFract => op("ffract", 1, true, true, true),
            FFloor => op("ffloor", 1, true, true, true),
            FCeil => op("fceil", 1, true, true, true),
            FSign => op("fsign", 1, true, true, true),
            FRcp => op("frcp", 1, true, true, true),
            FRsq => op("frsq", 1, true, true, true),
            FSqrt => op("fsqrt", 1, true, true, true),
            FExp2 => op("fexp2", 1, true, true, true),
            FLog2 => op("flog2", 1, true, true, true),
            FSin => op("fsin", 1, true, true, true),
            FCos => op("fcos", 1, true, true, true),
            FDdx => op("fddx", 1, true, true, true),
            FDdy => op("fddy", 1, true, true, true),
            Seq => op("seq", 2, true, true, true),
            Sne => op("sne", 2, true, true, true),
            Sge => op("sge", 2, true, true, true),
            Slt => op("slt", 2, true, true, true),
            FCsel => op("fcsel", 3, true, true, true),
            I2F => op("i2f", 1, true, true, true),
            F2U => op("f2u", 1, true, true, true),
            LoadInput => op("load_input", 0, true, true, false),
            LoadUniform => op("load_uniform", 1, true, true, false),
            LoadUbo => op("load_ubo", 2, true, true, false),
            LoadInstanceId => op("load_instance_id", 0, true, true, false),
            LoadFrontFace => op("load_front_face", 0, true, true, false),
            StoreOutput => op("store_output", 1, false, false, false),
            Tex => op("tex", !0, true, true, false),
            TexBias => op("tex_bias", !0, true, true, false),
            TexLod => op("tex_lod", !0, true, true, false),
            Branch => op("branch", !0, false, false, false),
            Discard => op("discard", !0, false, false, false),
        }
    }

    pub fn is_tex(self) -> bool {
        matches!(self, Opcode::Tex | Opcode::TexBias | Opcode::TexLod)
    }

    /// Width of the component window read from source `idx`.
    pub fn src_read_width(self, idx: usize, dest_ncomp: u8) -> u8 {
        match self {
            Opcode::FDot2 => 2,
            Opcode::FDot3 => 3,
            Opcode::FDot4 => 4,
            Opcode::Vec => 1,
            Opcode::Branch | Opcode::Discard => 1,
            Opcode::FCsel if idx == 0 => dest_ncomp,
            _ => dest_ncomp.max(1),
        }
    }
}

/// Source operand: a value read through a swizzle with optional modifiers.
///
/// Absolute applies before negate, matching the hardware source modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Src {
    pub value: InstId,
    pub swizzle: Swizzle,
    pub neg: bool,
    pub abs: bool,
}

impl Src {
    pub fn new(value: InstId) -> Src {
        Src { value, swizzle: Swizzle::IDENTITY, neg: false, abs: false }
    }

    pub fn swizzled(value: InstId, swizzle: Swizzle) -> Src {
        Src { value, swizzle, neg: false, abs: false }
    }

    pub fn with_swizzle(self, swizzle: Swizzle) -> Src {
        Src { swizzle, ..self }
    }

    pub fn negated(self) -> Src {
        Src { neg: !self.neg, ..self }
    }

    /// Rewrite a consumer's operand `user` so that it reads `replacement`
    /// instead of the value `user` currently names, preserving semantics.
    pub fn compose(replacement: Src, user: Src) -> Src {
        let swizzle = replacement.swizzle.compose(user.swizzle);
        let (abs, neg) = if user.abs {
            (true, user.neg)
        } else {
            (replacement.abs, user.neg ^ replacement.neg)
        };
        Src { value: replacement.value, swizzle, neg, abs }
    }

    pub fn has_mods(self) -> bool {
        self.neg || self.abs
    }
}

impl From<InstId> for Src {
    fn from(value: InstId) -> Src {
        Src::new(value)
    }
}

/// Per-opcode payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Aux {
    None,
    /// Raw constant bits, one word per component.
    Const([u32; 4]),
    /// Driver location of a declared input.
    Input { base: u8 },
    /// Driver location of a declared output.
    Output { base: u8 },
    /// Uniform slot base. Negative bases are synthetic: `!base` names the
    /// sampler whose rectangle-texture scale the driver patches in.
    Uniform { base: i32 },
    /// Sampler index of a texture operation; `rect` marks a
    /// rectangle-target sampler whose coordinates are in pixels.
    Tex { sampler: u8, rect: bool },
    /// Branch target block; the branch falls through when the condition
    /// source (if present) is non-zero and jumps when it is zero.
    Target(BlockId),
    /// Predecessor block of each phi source, parallel to `srcs`.
    Phi(SmallVec<[BlockId; 2]>),
}

/// One instruction in the arena.
#[derive(Debug, Clone)]
pub struct InstData {
    pub op: Opcode,
    /// Components of the produced value; 0 when the op has no destination.
    pub ncomp: u8,
    pub saturate: bool,
    pub srcs: SmallVec<[Src; 4]>,
    pub aux: Aux,
    pub block: BlockId,
}

impl InstData {
    pub fn new(op: Opcode) -> InstData {
        InstData {
            op,
            ncomp: 0,
            saturate: false,
            srcs: SmallVec::new(),
            aux: Aux::None,
            block: BlockId::INVALID,
        }
    }

    pub fn with_ncomp(mut self, ncomp: u8) -> InstData {
        self.ncomp = ncomp;
        self
    }

    pub fn with_srcs<I: IntoIterator<Item = Src>>(mut self, srcs: I) -> InstData {
        self.srcs = srcs.into_iter().collect();
        self
    }

    pub fn with_aux(mut self, aux: Aux) -> InstData {
        self.aux = aux;
        self
    }

    pub fn with_saturate(mut self, saturate: bool) -> InstData {
        self.saturate = saturate;
        self
    }

    pub fn is_removed(&self) -> bool {
        self.block == BlockId::INVALID
    }
}

#[derive(Debug, Clone, Default)]
struct BlockData {
    insts: Vec<InstId>,
}

/// A whole compilation unit.
#[derive(Debug, Clone)]
pub struct Program {
    pub stage: Stage,
    pub inputs: Vec<IoVar>,
    pub outputs: Vec<IoVar>,
    /// Declared application uniform slots; compiler immediates are placed
    /// after them in constant memory.
    pub num_uniform_slots: u16,
    /// Shader-key quirk: swap red/blue of the fragment color output.
    pub frag_rb_swap: bool,
    insts: Vec<InstData>,
    uses: Vec<SmallVec<[InstId; 4]>>,
    blocks: Vec<BlockData>,
    order: Vec<BlockId>,
}

impl Program {
    pub fn new(stage: Stage) -> Program {
        Program {
            stage,
            inputs: Vec::new(),
            outputs: Vec::new(),
            num_uniform_slots: 0,
            frag_rb_swap: false,
            insts: Vec::new(),
            uses: Vec::new(),
            blocks: Vec::new(),
            order: Vec::new(),
        }
    }

    // ---- blocks ----

    /// Append a new block at the end of the program order.
    pub fn add_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData::default());
        self.order.push(id);
        id
    }

    /// Create a new block placed immediately after `after` in program order.
    pub fn insert_block_after(&mut self, after: BlockId) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BlockData::default());
        let pos = self.order_index(after) + 1;
        self.order.insert(pos, id);
        id
    }

    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn entry_block(&self) -> BlockId {
        self.order[0]
    }

    fn order_index(&self, block: BlockId) -> usize {
        self.order
            .iter()
            .position(|&b| b == block)
            .unwrap_or_else(|| panic!("block {block:?} not in program order"))
    }

    /// Block following `block` in program order.
    pub fn next_in_order(&self, block: BlockId) -> Option<BlockId> {
        let idx = self.order_index(block);
        self.order.get(idx + 1).copied()
    }

    pub fn block_insts(&self, block: BlockId) -> &[InstId] {
        &self.blocks[block.0 as usize].insts
    }

    pub fn block_is_empty(&self, block: BlockId) -> bool {
        self.blocks[block.0 as usize].insts.is_empty()
    }

    /// Terminating branch of a block, if it ends in one.
    pub fn terminator(&self, block: BlockId) -> Option<InstId> {
        let last = *self.blocks[block.0 as usize].insts.last()?;
        (self.inst(last).op == Opcode::Branch).then_some(last)
    }

    /// Successor blocks: explicit branch target first, then fallthrough.
    pub fn succs(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
        let mut out = SmallVec::new();
        if let Some(term) = self.terminator(block) {
            let inst = self.inst(term);
            if let Aux::Target(target) = inst.aux {
                out.push(target);
            }
            if !inst.srcs.is_empty() {
                // Conditional: may fall through as well.
                if let Some(next) = self.next_in_order(block) {
                    if !out.contains(&next) {
                        out.push(next);
                    }
                }
            }
        } else if let Some(next) = self.next_in_order(block) {
            out.push(next);
        }
        out
    }

    /// Predecessors of `block`, in program order.
    pub fn preds(&self, block: BlockId) -> Vec<BlockId> {
        self.order
            .iter()
            .copied()
            .filter(|&b| self.succs(b).contains(&block))
            .collect()
    }

    // ---- instructions ----

    pub fn inst(&self, id: InstId) -> &InstData {
        &self.insts[id.0 as usize]
    }

    pub fn num_insts(&self) -> usize {
        self.insts.len()
    }

    pub fn uses(&self, value: InstId) -> &[InstId] {
        &self.uses[value.0 as usize]
    }

    pub fn is_unused(&self, value: InstId) -> bool {
        self.uses[value.0 as usize].is_empty()
    }

    fn attach_srcs(&mut self, id: InstId) {
        for i in 0..self.insts[id.0 as usize].srcs.len() {
            let v = self.insts[id.0 as usize].srcs[i].value;
            self.uses[v.0 as usize].push(id);
        }
    }

    fn alloc_inst(&mut self, mut data: InstData, block: BlockId) -> InstId {
        let id = InstId(self.insts.len() as u32);
        data.block = block;
        self.insts.push(data);
        self.uses.push(SmallVec::new());
        self.attach_srcs(id);
        id
    }

    /// Append an instruction to the end of `block`.
    pub fn append(&mut self, block: BlockId, data: InstData) -> InstId {
        let id = self.alloc_inst(data, block);
        self.blocks[block.0 as usize].insts.push(id);
        id
    }

    /// Insert an instruction immediately before `point`.
    pub fn insert_before(&mut self, point: InstId, data: InstData) -> InstId {
        let block = self.inst(point).block;
        debug_assert!(block != BlockId::INVALID, "insertion point was removed");
        let id = self.alloc_inst(data, block);
        let list = &mut self.blocks[block.0 as usize].insts;
        let pos = list.iter().position(|&i| i == point).expect("point not in its block");
        list.insert(pos, id);
        id
    }

    /// Insert an instruction immediately after `point`.
    pub fn insert_after(&mut self, point: InstId, data: InstData) -> InstId {
        let block = self.inst(point).block;
        debug_assert!(block != BlockId::INVALID, "insertion point was removed");
        let id = self.alloc_inst(data, block);
        let list = &mut self.blocks[block.0 as usize].insts;
        let pos = list.iter().position(|&i| i == point).expect("point not in its block");
        list.insert(pos + 1, id);
        id
    }

    fn detach_src(&mut self, user: InstId, value: InstId) {
        let list = &mut self.uses[value.0 as usize];
        let pos = list.iter().position(|&u| u == user).expect("use list out of sync");
        list.swap_remove(pos);
    }

    /// Remove an instruction from the graph. The value must be unused.
    pub fn remove(&mut self, id: InstId) {
        debug_assert!(self.is_unused(id), "removing an instruction that still has uses");
        let srcs: SmallVec<[Src; 4]> = self.insts[id.0 as usize].srcs.clone();
        for src in srcs {
            self.detach_src(id, src.value);
        }
        self.insts[id.0 as usize].srcs.clear();
        let block = self.insts[id.0 as usize].block;
        if block != BlockId::INVALID {
            self.blocks[block.0 as usize].insts.retain(|&i| i != id);
            self.insts[id.0 as usize].block = BlockId::INVALID;
        }
    }

    /// Drop every instruction of the given blocks, regardless of uses among
    /// them. The caller must ensure no surviving block reads the removed
    /// values.
    pub fn clear_blocks(&mut self, blocks: &[BlockId]) {
        let mut removed = Vec::new();
        for &block in blocks {
            let insts = std::mem::take(&mut self.blocks[block.0 as usize].insts);
            for &id in &insts {
                let srcs: SmallVec<[Src; 4]> = self.insts[id.0 as usize].srcs.clone();
                for src in srcs {
                    self.detach_src(id, src.value);
                }
                self.insts[id.0 as usize].srcs.clear();
                self.insts[id.0 as usize].block = BlockId::INVALID;
            }
            removed.extend(insts);
        }
        for &id in &removed {
            debug_assert!(self.is_unused(id), "removed block value still used by a live block");
        }
    }

    /// Move an instruction in front of `point`, which may be in another
    /// block. Source and use edges are unaffected.
    pub fn move_inst_before(&mut self, inst: InstId, point: InstId) {
        let from = self.insts[inst.0 as usize].block;
        self.blocks[from.0 as usize].insts.retain(|&i| i != inst);
        let to = self.insts[point.0 as usize].block;
        let list = &mut self.blocks[to.0 as usize].insts;
        let pos = list.iter().position(|&i| i == point).expect("point not in its block");
        list.insert(pos, inst);
        self.insts[inst.0 as usize].block = to;
    }

    // ---- in-place rewrites ----

    pub fn set_op(&mut self, id: InstId, op: Opcode) {
        self.insts[id.0 as usize].op = op;
    }

    pub fn set_aux(&mut self, id: InstId, aux: Aux) {
        self.insts[id.0 as usize].aux = aux;
    }

    pub fn set_ncomp(&mut self, id: InstId, ncomp: u8) {
        self.insts[id.0 as usize].ncomp = ncomp;
    }

    pub fn set_saturate(&mut self, id: InstId, saturate: bool) {
        self.insts[id.0 as usize].saturate = saturate;
    }

    /// Drop all sources of `id`, updating use lists.
    pub fn clear_srcs(&mut self, id: InstId) {
        let srcs: SmallVec<[Src; 4]> = self.insts[id.0 as usize].srcs.clone();
        for src in srcs {
            self.detach_src(id, src.value);
        }
        self.insts[id.0 as usize].srcs.clear();
    }

    /// Truncate the source list of `id` to `len` entries.
    pub fn truncate_srcs(&mut self, id: InstId, len: usize) {
        while self.insts[id.0 as usize].srcs.len() > len {
            let src = self.insts[id.0 as usize].srcs.pop().expect("truncate past end");
            self.detach_src(id, src.value);
        }
    }

    pub fn push_src(&mut self, id: InstId, src: Src) {
        self.insts[id.0 as usize].srcs.push(src);
        self.uses[src.value.0 as usize].push(id);
    }

    /// Add a phi pair for `pred`.
    pub fn add_phi_pred(&mut self, phi: InstId, pred: BlockId, src: Src) {
        debug_assert_eq!(self.inst(phi).op, Opcode::Phi);
        self.push_src(phi, src);
        match &mut self.insts[phi.0 as usize].aux {
            Aux::Phi(preds) => preds.push(pred),
            _ => unreachable!("phi without predecessor list"),
        }
    }

    /// Replace operand `idx` of `inst`, keeping use lists in sync.
    pub fn set_src(&mut self, inst: InstId, idx: usize, src: Src) {
        let old = self.insts[inst.0 as usize].srcs[idx].value;
        self.detach_src(inst, old);
        self.insts[inst.0 as usize].srcs[idx] = src;
        self.uses[src.value.0 as usize].push(inst);
    }

    /// Rewire every consumer of `old` to read `with` instead.
    ///
    /// All-or-nothing: after this call no source in the graph names `old`.
    pub fn replace_uses(&mut self, old: InstId, with: Src) {
        self.replace_uses_except(old, with, &[]);
    }

    /// Like [`replace_uses`](Self::replace_uses), but consumers listed in
    /// `except` keep reading `old` (used when the replacement itself must
    /// keep consuming the replaced value).
    pub fn replace_uses_except(&mut self, old: InstId, with: Src, except: &[InstId]) {
        debug_assert!(with.value != old || !except.is_empty());
        let users = std::mem::take(&mut self.uses[old.0 as usize]);
        let mut kept = SmallVec::new();
        for user in users {
            if except.contains(&user) {
                kept.push(user);
                continue;
            }
            for i in 0..self.insts[user.0 as usize].srcs.len() {
                let cur = self.insts[user.0 as usize].srcs[i];
                if cur.value == old {
                    let composed = Src::compose(with, cur);
                    self.insts[user.0 as usize].srcs[i] = composed;
                    self.uses[composed.value.0 as usize].push(user);
                }
            }
        }
        self.uses[old.0 as usize] = kept;
    }

    /// Drop the phi pair coming from `pred`, if present.
    pub fn remove_phi_pred(&mut self, phi: InstId, pred: BlockId) {
        debug_assert_eq!(self.inst(phi).op, Opcode::Phi);
        let idx = match &self.insts[phi.0 as usize].aux {
            Aux::Phi(preds) => match preds.iter().position(|&p| p == pred) {
                Some(idx) => idx,
                None => return,
            },
            _ => unreachable!("phi without predecessor list"),
        };
        let src = self.insts[phi.0 as usize].srcs.remove(idx);
        self.detach_src(phi, src.value);
        if let Aux::Phi(preds) = &mut self.insts[phi.0 as usize].aux {
            preds.remove(idx);
        }
    }

    /// Flattened program-order position of every instruction.
    ///
    /// Indexed by `InstId`; removed instructions get `u32::MAX`.
    pub fn positions(&self) -> Vec<u32> {
        let mut pos = vec![u32::MAX; self.insts.len()];
        let mut n = 0;
        for &b in &self.order {
            for &i in &self.blocks[b.0 as usize].insts {
                pos[i.0 as usize] = n;
                n += 1;
            }
        }
        pos
    }

    // ---- verification ----

    /// Check the structural invariants of the graph.
    pub fn verify(&self) -> CompileResult<()> {
        let err = |reason: String| Err(CompileError::MalformedIr { reason });
        if self.order.is_empty() {
            return err("program has no blocks".into());
        }
        let pos = self.positions();
        for &b in &self.order {
            let insts = self.block_insts(b);
            let mut seen_non_phi = false;
            for (i, &id) in insts.iter().enumerate() {
                let inst = self.inst(id);
                if inst.op == Opcode::Phi {
                    if seen_non_phi {
                        return err(format!("phi %{} is not at the start of its block", id.0));
                    }
                    let Aux::Phi(preds) = &inst.aux else {
                        return err(format!("phi %{} has no predecessor list", id.0));
                    };
                    if preds.len() != inst.srcs.len() {
                        return err(format!("phi %{} preds/srcs length mismatch", id.0));
                    }
                    let actual = self.preds(b);
                    for p in preds {
                        if !actual.contains(p) {
                            return err(format!(
                                "phi %{} names non-predecessor block b{}",
                                id.0, p.0
                            ));
                        }
                    }
                } else {
                    seen_non_phi = true;
                }
                if inst.op == Opcode::Branch {
                    if i + 1 != insts.len() {
                        return err(format!("branch %{} is not the block terminator", id.0));
                    }
                    let Aux::Target(t) = inst.aux else {
                        return err(format!("branch %{} has no target", id.0));
                    };
                    if t.0 as usize >= self.blocks.len() || !self.order.contains(&t) {
                        return err(format!("branch %{} targets unknown block", id.0));
                    }
                }
                let info = inst.op.info();
                if info.src_count != !0 && inst.srcs.len() != info.src_count as usize {
                    return err(format!(
                        "{} %{} has {} sources, expected {}",
                        info.name,
                        id.0,
                        inst.srcs.len(),
                        info.src_count
                    ));
                }
                for src in &inst.srcs {
                    let def = &self.insts[src.value.0 as usize];
                    if def.is_removed() {
                        return err(format!("%{} reads removed value %{}", id.0, src.value.0));
                    }
                    if def.ncomp == 0 {
                        return err(format!("%{} reads valueless op %{}", id.0, src.value.0));
                    }
                    // Forward references are only legal through phis.
                    if inst.op != Opcode::Phi
                        && def.block == b
                        && pos[src.value.0 as usize] >= pos[id.0 as usize]
                    {
                        return err(format!(
                            "%{} reads %{} before its definition",
                            id.0, src.value.0
                        ));
                    }
                }
            }
        }
        // Use-list symmetry.
        for (v, users) in self.uses.iter().enumerate() {
            for &user in users {
                let found = self
                    .inst(user)
                    .srcs
                    .iter()
                    .any(|s| s.value.0 as usize == v);
                if !found {
                    return err(format!("use list of %{v} names non-consumer %{}", user.0));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_fragment() -> Program {
        Program::new(Stage::Fragment)
    }

    #[test]
    fn append_and_uses() {
        let mut p = empty_fragment();
        let b = p.add_block();
        let c = p.append(
            b,
            InstData::new(Opcode::Const).with_ncomp(1).with_aux(Aux::Const([0x3f800000, 0, 0, 0])),
        );
        let m = p.append(b, InstData::new(Opcode::Mov).with_ncomp(1).with_srcs([Src::new(c)]));
        assert_eq!(p.uses(c), &[m]);
        assert!(p.is_unused(m));
        p.verify().unwrap();
    }

    #[test]
    fn replace_uses_composes_swizzles() {
        let mut p = empty_fragment();
        let b = p.add_block();
        let c = p.append(
            b,
            InstData::new(Opcode::Const).with_ncomp(4).with_aux(Aux::Const([1, 2, 3, 4])),
        );
        let mov = p.append(
            b,
            InstData::new(Opcode::Mov)
                .with_ncomp(4)
                .with_srcs([Src::swizzled(c, Swizzle::new(2, 1, 0, 3))]),
        );
        let user = p.append(
            b,
            InstData::new(Opcode::Mov)
                .with_ncomp(4)
                .with_srcs([Src::swizzled(mov, Swizzle::broadcast(0))]),
        );
        // Propagate the mov away: user must now read c.z broadcast.
        let repl = p.inst(mov).srcs[0];
        p.replace_uses(mov, repl);
        let src = p.inst(user).srcs[0];
        assert_eq!(src.value, c);
        assert_eq!(src.swizzle, Swizzle::broadcast(2));
        assert!(p.is_unused(mov));
        p.remove(mov);
        p.verify().unwrap();
    }

    #[test]
    fn replace_uses_combines_modifiers() {
        let mut p = empty_fragment();
        let b = p.add_block();
        let c = p.append(
            b,
            InstData::new(Opcode::Const).with_ncomp(1).with_aux(Aux::Const([5, 0, 0, 0])),
        );
        let inner = Src { value: c, swizzle: Swizzle::IDENTITY, neg: true, abs: false };
        let user_src = Src { value: InstId(0), swizzle: Swizzle::IDENTITY, neg: true, abs: false };
        let composed = Src::compose(inner, user_src);
        // -(-x) == x
        assert!(!composed.neg && !composed.abs);

        let abs_user = Src { value: InstId(0), swizzle: Swizzle::IDENTITY, neg: false, abs: true };
        let composed = Src::compose(inner, abs_user);
        // |(-x)| == |x|
        assert!(composed.abs && !composed.neg);
    }

    #[test]
    fn successor_shapes() {
        let mut p = empty_fragment();
        let b0 = p.add_block();
        let b1 = p.add_block();
        let b2 = p.add_block();
        // b0 falls through to b1.
        assert_eq!(p.succs(b0).as_slice(), &[b1]);
        // Conditional branch from b1 to b0: both successors.
        let c = p.append(
            b1,
            InstData::new(Opcode::Const).with_ncomp(1).with_aux(Aux::Const([0, 0, 0, 0])),
        );
        p.append(
            b1,
            InstData::new(Opcode::Branch).with_srcs([Src::new(c)]).with_aux(Aux::Target(b0)),
        );
        assert_eq!(p.succs(b1).as_slice(), &[b0, b2]);
        assert_eq!(p.preds(b0), vec![b1]);
        p.verify().unwrap();
    }

    #[test]
    fn verify_rejects_forward_reference() {
        let mut p = empty_fragment();
        let b = p.add_block();
        let c = p.append(
            b,
            InstData::new(Opcode::Const).with_ncomp(1).with_aux(Aux::Const([0, 0, 0, 0])),
        );
        let mov = p.append(b, InstData::new(Opcode::Mov).with_ncomp(1).with_srcs([Src::new(c)]));
        p.verify().unwrap();
        // Hoisting the consumer above its definition breaks the invariant.
        p.move_inst_before(mov, c);
        assert!(p.verify().is_err());
    }

    #[test]
    fn insert_block_keeps_handles_stable() {
        let mut p = empty_fragment();
        let b0 = p.add_block();
        let b1 = p.add_block();
        let mid = p.insert_block_after(b0);
        assert_eq!(p.order(), &[b0, mid, b1]);
        assert_eq!(p.next_in_order(b0), Some(mid));
        assert_eq!(p.next_in_order(mid), Some(b1));
    }
}
