// Cursor-based instruction builder used by the lowering passes. A Builder wraps the
// Program with an insertion point (end of a block, or before/after an existing
// instruction) and offers one helper per frequently built opcode. Inserting through an
// After cursor advances the cursor past the new instruction so consecutive calls lay
// down straight-line code in order.

use super::{Aux, InstData, InstId, Opcode, Program, Src};

/// Insertion point of a [`Builder`].
#[derive(Debug, Clone, Copy)]
pub enum Cursor {
    AtEnd(super::BlockId),
    Before(InstId),
    After(InstId),
}

/// Builds instructions at a movable insertion point.
pub struct Builder<'a> {
    pub prog: &'a mut Program,
    cursor: Cursor,
}

impl<'a> Builder<'a> {
    pub fn at_end(prog: &'a mut Program, block: super::BlockId) -> Builder<'a> {
        Builder { prog, cursor: Cursor::AtEnd(block) }
    }

    pub fn before(prog: &'a mut Program, inst: InstId) -> Builder<'a> {
        Builder { prog, cursor: Cursor::Before(inst) }
    }

    pub fn after(prog: &'a mut Program, inst: InstId) -> Builder<'a> {
        Builder { prog, cursor: Cursor::After(inst) }
    }

    pub fn set_cursor(&mut self, cursor: Cursor) {
        self.cursor = cursor;
    }

    /// Insert at the cursor; an `After` cursor advances past the result.
    pub fn insert(&mut self, data: InstData) -> InstId {
        let id = match self.cursor {
            Cursor::AtEnd(block) => self.prog.append(block, data),
            Cursor::Before(point) => self.prog.insert_before(point, data),
            Cursor::After(point) => self.prog.insert_after(point, data),
        };
        if let Cursor::After(_) = self.cursor {
            self.cursor = Cursor::After(id);
        }
        id
    }

    /// Scalar float constant.
    pub fn imm_f(&mut self, v: f32) -> InstId {
        self.insert(
            InstData::new(Opcode::Const)
                .with_ncomp(1)
                .with_aux(Aux::Const([v.to_bits(), 0, 0, 0])),
        )
    }

    pub fn alu1(&mut self, op: Opcode, ncomp: u8, a: Src) -> InstId {
        self.insert(InstData::new(op).with_ncomp(ncomp).with_srcs([a]))
    }

    pub fn alu2(&mut self, op: Opcode, ncomp: u8, a: Src, b: Src) -> InstId {
        self.insert(InstData::new(op).with_ncomp(ncomp).with_srcs([a, b]))
    }

    pub fn alu3(&mut self, op: Opcode, ncomp: u8, a: Src, b: Src, c: Src) -> InstId {
        self.insert(InstData::new(op).with_ncomp(ncomp).with_srcs([a, b, c]))
    }

    pub fn mov(&mut self, ncomp: u8, a: Src) -> InstId {
        self.alu1(Opcode::Mov, ncomp, a)
    }

    pub fn fmul(&mut self, ncomp: u8, a: Src, b: Src) -> InstId {
        self.alu2(Opcode::FMul, ncomp, a, b)
    }

    /// `a == b` as 1.0/0.0, lanewise.
    pub fn seq(&mut self, ncomp: u8, a: Src, b: Src) -> InstId {
        self.alu2(Opcode::Seq, ncomp, a, b)
    }

    pub fn i2f(&mut self, a: Src) -> InstId {
        self.alu1(Opcode::I2F, 1, a)
    }

    pub fn f2u(&mut self, a: Src) -> InstId {
        self.alu1(Opcode::F2U, 1, a)
    }

    /// Gather scalar lanes into an `ncomp`-wide value.
    pub fn vec<I: IntoIterator<Item = Src>>(&mut self, srcs: I) -> InstId {
        let srcs: smallvec::SmallVec<[Src; 4]> = srcs.into_iter().collect();
        let ncomp = srcs.len() as u8;
        self.insert(InstData::new(Opcode::Vec).with_ncomp(ncomp).with_srcs(srcs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Stage;

    #[test]
    fn after_cursor_advances() {
        let mut p = Program::new(Stage::Fragment);
        let block = p.add_block();
        let anchor = p.append(
            block,
            InstData::new(Opcode::Const).with_ncomp(1).with_aux(Aux::Const([0; 4])),
        );
        let mut b = Builder::after(&mut p, anchor);
        let one = b.imm_f(1.0);
        let m = b.mov(1, Src::new(one));
        drop(b);
        assert_eq!(p.block_insts(block), &[anchor, one, m]);
        p.verify().unwrap();
    }

    #[test]
    fn before_cursor_keeps_order() {
        let mut p = Program::new(Stage::Fragment);
        let block = p.add_block();
        let anchor = p.append(
            block,
            InstData::new(Opcode::Const).with_ncomp(1).with_aux(Aux::Const([0; 4])),
        );
        let mut b = Builder::before(&mut p, anchor);
        let x = b.imm_f(2.0);
        let y = b.imm_f(3.0);
        drop(b);
        assert_eq!(p.block_insts(block), &[x, y, anchor]);
    }
}
