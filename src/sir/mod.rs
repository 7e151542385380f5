// SIR, the textual shader-IR format used by tests and the usccdump tool. The format is
// line oriented: a stage header, optional rb_swap/uniform_slots flags, input/output
// declarations, then blocks of instructions. Values print as %N with an explicit
// component count, sources as [-][|]%N[.swizzle][|], branch targets and phi
// predecessors as bN. Constants print as shortest-roundtrip floats, falling back to
// hex words for bit patterns with no clean float form, and the parser accepts both.
// Printing a program and parsing it back yields the same graph shapes, which is what
// the round-trip tests rely on; dead arena entries are not printed, so instruction
// ids may differ.

use std::collections::HashMap;
use std::fmt::Write;

use smallvec::SmallVec;
use thiserror::Error;

use crate::ir::{Aux, BlockId, InstData, InstId, IoVar, Opcode, Program, Semantic, Src, Stage};
use crate::isa::Swizzle;

/// Parse failure, with the 1-based source line.
#[derive(Error, Debug)]
#[error("sir parse error at line {line}: {msg}")]
pub struct SirError {
    pub line: usize,
    pub msg: String,
}

pub fn parse_program(text: &str) -> Result<Program, SirError> {
    Parser::new(text).parse()
}

fn alu_opcode(name: &str) -> Option<Opcode> {
    use Opcode::*;
    let op = match name {
        "mov" => Mov,
        "fneg" => FNeg,
        "fabs" => FAbs,
        "fsat" => FSat,
        "fadd" => FAdd,
        "fmul" => FMul,
        "ffma" => FFma,
        "fdiv" => FDiv,
        "fdot2" => FDot2,
        "fdot3" => FDot3,
        "fdot4" => FDot4,
        "fmin" => FMin,
        "fmax" => FMax,
        "ffract" => FFract,
        "ffloor" => FFloor,
        "fceil" => FCeil,
        "fsign" => FSign,
        "frcp" => FRcp,
        "frsq" => FRsq,
        "fsqrt" => FSqrt,
        "fexp2" => FExp2,
        "flog2" => FLog2,
        "fsin" => FSin,
        "fcos" => FCos,
        "fddx" => FDdx,
        "fddy" => FDdy,
        "seq" => Seq,
        "sne" => Sne,
        "sge" => Sge,
        "slt" => Slt,
        "fcsel" => FCsel,
        "i2f" => I2F,
        "f2u" => F2U,
        _ => return None,
    };
    Some(op)
}

struct Parser<'a> {
    lines: Vec<(usize, &'a str)>,
    values: HashMap<&'a str, InstId>,
    blocks: HashMap<&'a str, BlockId>,
    /// Phi operands referencing values defined later: (phi, operand, name).
    fixups: Vec<(InstId, usize, &'a str, usize)>,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Parser<'a> {
        let lines = text
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.split(';').next().unwrap_or("").trim()))
            .filter(|(_, l)| !l.is_empty())
            .collect();
        Parser {
            lines,
            values: HashMap::new(),
            blocks: HashMap::new(),
            fixups: Vec::new(),
        }
    }

    fn err<T>(line: usize, msg: impl Into<String>) -> Result<T, SirError> {
        Err(SirError { line, msg: msg.into() })
    }

    fn parse(mut self) -> Result<Program, SirError> {
        let lines = std::mem::take(&mut self.lines);
        let mut iter = lines.iter().copied();
        let Some((line, header)) = iter.next() else {
            return Self::err(0, "empty program");
        };
        let stage = match header {
            "vertex" => Stage::Vertex,
            "fragment" => Stage::Fragment,
            other => return Self::err(line, format!("expected stage header, got `{other}`")),
        };
        let mut prog = Program::new(stage);

        // Blocks first, so forward branches and phi predecessors resolve.
        for (line, text) in lines.iter().copied() {
            if let Some(rest) = text.strip_prefix("block ") {
                let name = rest.trim_end_matches(':');
                if self.blocks.contains_key(name) {
                    return Self::err(line, format!("duplicate block `{name}`"));
                }
                self.blocks.insert(name, prog.add_block());
            }
        }

        let mut cur: Option<BlockId> = None;
        for (line, text) in iter {
            if let Some(rest) = text.strip_prefix("block ") {
                cur = Some(self.blocks[rest.trim_end_matches(':')]);
                continue;
            }
            let toks: Vec<&str> = text
                .split([' ', '\t', ','])
                .filter(|t| !t.is_empty())
                .collect();
            match toks[0] {
                "rb_swap" => prog.frag_rb_swap = true,
                "uniform_slots" => {
                    prog.num_uniform_slots = self.parse_num(line, toks.get(1))?;
                }
                "input" | "output" => {
                    let (var, idx) = self.parse_io(line, &toks)?;
                    let list =
                        if toks[0] == "input" { &mut prog.inputs } else { &mut prog.outputs };
                    if idx != list.len() {
                        return Self::err(line, "io declarations must be in location order");
                    }
                    list.push(var);
                }
                _ => {
                    let Some(block) = cur else {
                        return Self::err(line, "instruction outside a block");
                    };
                    self.parse_inst(&mut prog, block, line, text, &toks)?;
                }
            }
        }

        for (phi, idx, name, line) in std::mem::take(&mut self.fixups) {
            let Some(&value) = self.values.get(name) else {
                return Self::err(line, format!("undefined value `%{name}`"));
            };
            let old = prog.inst(phi).srcs[idx];
            prog.set_src(phi, idx, Src { value, ..old });
        }
        Ok(prog)
    }

    fn parse_num<T: std::str::FromStr>(
        &self,
        line: usize,
        tok: Option<&&str>,
    ) -> Result<T, SirError> {
        tok.and_then(|t| t.parse().ok())
            .map_or_else(|| Self::err(line, "expected a number"), Ok)
    }

    fn parse_semantic(line: usize, toks: &[&str]) -> Result<(Semantic, usize), SirError> {
        let sem = match toks.first().copied() {
            Some("position") => return Ok((Semantic::Position, 1)),
            Some("pointsize") => return Ok((Semantic::PointSize, 1)),
            Some("pointcoord") => return Ok((Semantic::PointCoord, 1)),
            Some("color") => return Ok((Semantic::Color, 1)),
            Some("depth") => return Ok((Semantic::Depth, 1)),
            Some("varying") => Semantic::Varying(0),
            Some("attribute") => Semantic::Attribute(0),
            other => return Self::err(line, format!("unknown semantic `{other:?}`")),
        };
        let n: u8 = toks
            .get(1)
            .and_then(|t| t.parse().ok())
            .ok_or(SirError { line, msg: "semantic needs a slot index".into() })?;
        Ok((
            match sem {
                Semantic::Varying(_) => Semantic::Varying(n),
                _ => Semantic::Attribute(n),
            },
            2,
        ))
    }

    fn parse_io(&self, line: usize, toks: &[&str]) -> Result<(IoVar, usize), SirError> {
        let idx: usize = self.parse_num(line, toks.get(1))?;
        let (semantic, used) = Self::parse_semantic(line, toks.get(2..).unwrap_or(&[]))?;
        let ncomp = match toks.get(2 + used) {
            Some(t) => match t.strip_prefix("comps=").and_then(|v| v.parse().ok()) {
                Some(n) => n,
                None => return Self::err(line, format!("bad comps suffix `{t}`")),
            },
            None => 4,
        };
        Ok((IoVar { semantic, ncomp }, idx))
    }

    fn parse_swizzle(line: usize, text: &str) -> Result<Swizzle, SirError> {
        let mut lanes = SmallVec::<[u8; 4]>::new();
        for c in text.chars() {
            lanes.push(match c {
                'x' => 0,
                'y' => 1,
                'z' => 2,
                'w' => 3,
                other => return Self::err(line, format!("bad swizzle lane `{other}`")),
            });
        }
        if lanes.is_empty() || lanes.len() > 4 {
            return Self::err(line, "swizzle needs 1..4 lanes");
        }
        while lanes.len() < 4 {
            lanes.push(*lanes.last().unwrap());
        }
        Ok(Swizzle::new(lanes[0], lanes[1], lanes[2], lanes[3]))
    }

    /// `[-][|]%name[.swiz][|]`; returns the name for deferred resolution.
    fn parse_src_parts(line: usize, tok: &str) -> Result<(bool, bool, &str, Swizzle), SirError> {
        let mut rest = tok;
        let neg = rest.starts_with('-');
        if neg {
            rest = &rest[1..];
        }
        let abs = rest.starts_with('|');
        if abs {
            rest = rest.strip_prefix('|').unwrap();
            rest = rest
                .strip_suffix('|')
                .ok_or(SirError { line, msg: format!("unterminated `|` in `{tok}`") })?;
        }
        let rest = rest
            .strip_prefix('%')
            .ok_or(SirError { line, msg: format!("expected a %value, got `{tok}`") })?;
        let (name, swiz) = match rest.split_once('.') {
            Some((name, sw)) => (name, Self::parse_swizzle(line, sw)?),
            None => (rest, Swizzle::IDENTITY),
        };
        Ok((neg, abs, name, swiz))
    }

    fn parse_src(&self, line: usize, tok: &str) -> Result<Src, SirError> {
        let (neg, abs, name, swizzle) = Self::parse_src_parts(line, tok)?;
        let Some(&value) = self.values.get(name) else {
            return Self::err(line, format!("use of undefined value `%{name}`"));
        };
        Ok(Src { value, swizzle, neg, abs })
    }

    fn parse_const_word(line: usize, tok: &str) -> Result<u32, SirError> {
        if let Some(hex) = tok.strip_prefix("0x") {
            return u32::from_str_radix(hex, 16)
                .map_err(|_| SirError { line, msg: format!("bad hex literal `{tok}`") });
        }
        tok.parse::<f32>()
            .map(f32::to_bits)
            .map_err(|_| SirError { line, msg: format!("bad float literal `{tok}`") })
    }

    fn parse_inst(
        &mut self,
        prog: &mut Program,
        block: BlockId,
        line: usize,
        text: &'a str,
        toks: &[&'a str],
    ) -> Result<(), SirError> {
        // Value definition?
        let (def_name, ncomp_decl, op_toks) = if let Some(rest) = toks[0].strip_prefix('%') {
            if toks.get(1) != Some(&"=") {
                return Self::err(line, format!("expected `=` in `{text}`"));
            }
            let (name, ncomp) = match rest.split_once(':') {
                Some((name, n)) => {
                    let n = n.parse::<u8>().ok().filter(|n| (1..=4).contains(n)).ok_or(
                        SirError {
                            line,
                            msg: format!("bad component count in `{}`", toks[0]),
                        },
                    )?;
                    (name, Some(n))
                }
                None => (rest, None),
            };
            if self.values.contains_key(name) {
                return Self::err(line, format!("value `%{name}` redefined"));
            }
            (Some(name), ncomp, &toks[2..])
        } else {
            (None, None, toks)
        };

        let Some(first) = op_toks.first() else {
            return Self::err(line, format!("missing operation in `{text}`"));
        };
        let (base, sat) = match first.strip_suffix(".sat") {
            Some(b) => (b, true),
            None => (*first, false),
        };
        let args = &op_toks[1..];

        let data = match base {
            "const" => {
                let mut words = [0u32; 4];
                if args.is_empty() || args.len() > 4 {
                    return Self::err(line, "const needs 1..4 literals");
                }
                for (i, tok) in args.iter().enumerate() {
                    words[i] = Self::parse_const_word(line, tok)?;
                }
                InstData::new(Opcode::Const)
                    .with_ncomp(args.len() as u8)
                    .with_aux(Aux::Const(words))
            }
            "undef" => InstData::new(Opcode::Undef).with_ncomp(ncomp_decl.unwrap_or(1)),
            "load_input" => {
                let idx: usize = self.parse_num(line, args.first())?;
                let ncomp = prog
                    .inputs
                    .get(idx)
                    .map(|v| v.ncomp)
                    .ok_or(SirError { line, msg: format!("undeclared input {idx}") })?;
                InstData::new(Opcode::LoadInput)
                    .with_ncomp(ncomp_decl.unwrap_or(ncomp))
                    .with_aux(Aux::Input { base: idx as u8 })
            }
            "load_uniform" => {
                let base_idx: i32 = self.parse_num(line, args.first())?;
                let off = self.parse_src(line, args.get(1).copied().unwrap_or(""))?;
                InstData::new(Opcode::LoadUniform)
                    .with_ncomp(ncomp_decl.unwrap_or(4))
                    .with_srcs([off])
                    .with_aux(Aux::Uniform { base: base_idx })
            }
            "load_ubo" => {
                let off = self.parse_src(line, args.first().copied().unwrap_or(""))?;
                let ubo = self.parse_src(line, args.get(1).copied().unwrap_or(""))?;
                InstData::new(Opcode::LoadUbo)
                    .with_ncomp(ncomp_decl.unwrap_or(4))
                    .with_srcs([off, ubo])
            }
            "load_instance_id" => InstData::new(Opcode::LoadInstanceId).with_ncomp(1),
            "load_front_face" => InstData::new(Opcode::LoadFrontFace).with_ncomp(1),
            "store_output" => {
                let idx: usize = self.parse_num(line, args.first())?;
                if idx >= prog.outputs.len() {
                    return Self::err(line, format!("undeclared output {idx}"));
                }
                let src = self.parse_src(line, args.get(1).copied().unwrap_or(""))?;
                InstData::new(Opcode::StoreOutput)
                    .with_srcs([src])
                    .with_aux(Aux::Output { base: idx as u8 })
            }
            "tex" | "tex_bias" | "tex_lod" => {
                let op = match base {
                    "tex" => Opcode::Tex,
                    "tex_bias" => Opcode::TexBias,
                    _ => Opcode::TexLod,
                };
                let (rect, args) = match args.first() {
                    Some(&"rect") => (true, &args[1..]),
                    _ => (false, args),
                };
                let sampler: u8 = self.parse_num(line, args.first())?;
                let mut srcs: SmallVec<[Src; 4]> = SmallVec::new();
                for tok in &args[1..] {
                    srcs.push(self.parse_src(line, tok)?);
                }
                InstData::new(op)
                    .with_ncomp(ncomp_decl.unwrap_or(4))
                    .with_srcs(srcs)
                    .with_aux(Aux::Tex { sampler, rect })
            }
            "vec" => {
                let mut srcs: SmallVec<[Src; 4]> = SmallVec::new();
                for tok in args {
                    srcs.push(self.parse_src(line, tok)?);
                }
                let n = srcs.len() as u8;
                InstData::new(Opcode::Vec).with_ncomp(ncomp_decl.unwrap_or(n)).with_srcs(srcs)
            }
            "phi" => {
                // phi [b0: %1, b1: %2] -- brackets optional after tokenizing.
                let placeholder = InstId(prog.num_insts() as u32);
                let mut srcs: SmallVec<[Src; 4]> = SmallVec::new();
                let mut preds: SmallVec<[BlockId; 2]> = SmallVec::new();
                let mut pending: Vec<(usize, &str)> = Vec::new();
                let mut i = 0;
                while i < args.len() {
                    let pred_tok = args[i].trim_matches(['[', ']']).trim_end_matches(':');
                    if pred_tok.is_empty() {
                        i += 1;
                        continue;
                    }
                    let Some(&pred) = self.blocks.get(pred_tok) else {
                        return Self::err(line, format!("unknown block `{pred_tok}`"));
                    };
                    let Some(src_tok) = args.get(i + 1) else {
                        return Self::err(line, "phi pair missing a value");
                    };
                    let src_tok = src_tok.trim_matches(['[', ']']);
                    let (neg, abs, name, swizzle) = Self::parse_src_parts(line, src_tok)?;
                    match self.values.get(name) {
                        Some(&value) => srcs.push(Src { value, swizzle, neg, abs }),
                        None => {
                            // Forward reference through a back edge: park a
                            // self-reference and patch afterwards.
                            pending.push((srcs.len(), name));
                            srcs.push(Src { value: placeholder, swizzle, neg, abs });
                        }
                    }
                    preds.push(pred);
                    i += 2;
                }
                let ncomp = ncomp_decl.ok_or(SirError {
                    line,
                    msg: "phi needs an explicit component count".into(),
                })?;
                let data = InstData::new(Opcode::Phi)
                    .with_ncomp(ncomp)
                    .with_srcs(srcs)
                    .with_aux(Aux::Phi(preds));
                let id = prog.append(block, data);
                for (idx, name) in pending {
                    self.fixups.push((id, idx, name, line));
                }
                if let Some(name) = def_name {
                    self.values.insert(name, id);
                }
                return Ok(());
            }
            "branch" => {
                let target_tok = args.first().copied().unwrap_or("");
                let Some(&target) = self.blocks.get(target_tok) else {
                    return Self::err(line, format!("unknown block `{target_tok}`"));
                };
                let mut data = InstData::new(Opcode::Branch).with_aux(Aux::Target(target));
                match args.get(1) {
                    Some(&"ifz") => {
                        let c = self.parse_src(line, args.get(2).copied().unwrap_or(""))?;
                        data = data.with_srcs([c]);
                    }
                    Some(other) => {
                        return Self::err(line, format!("expected `ifz`, got `{other}`"))
                    }
                    None => {}
                }
                data
            }
            "discard" => {
                let mut data = InstData::new(Opcode::Discard);
                match args.first() {
                    Some(&"ifgz") => {
                        let c = self.parse_src(line, args.get(1).copied().unwrap_or(""))?;
                        data = data.with_srcs([c]);
                    }
                    Some(other) => {
                        return Self::err(line, format!("expected `ifgz`, got `{other}`"))
                    }
                    None => {}
                }
                data
            }
            other => {
                let Some(op) = alu_opcode(other) else {
                    return Self::err(line, format!("unknown operation `{other}`"));
                };
                let mut srcs: SmallVec<[Src; 4]> = SmallVec::new();
                for tok in args {
                    srcs.push(self.parse_src(line, tok)?);
                }
                let info = op.info();
                if info.src_count != !0 && srcs.len() != info.src_count as usize {
                    return Self::err(
                        line,
                        format!("{other} takes {} sources, got {}", info.src_count, srcs.len()),
                    );
                }
                let ncomp = ncomp_decl
                    .or_else(|| srcs.first().map(|s| prog.inst(s.value).ncomp))
                    .unwrap_or(1);
                InstData::new(op).with_ncomp(ncomp).with_srcs(srcs)
            }
        };

        let saturate = sat || data.saturate;
        let data = data.with_saturate(saturate);
        let id = prog.append(block, data);
        if let Some(name) = def_name {
            self.values.insert(name, id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Printing
// ---------------------------------------------------------------------------

fn print_const_word(out: &mut String, word: u32) {
    let f = f32::from_bits(word);
    if f.is_finite() && format!("{f:?}").parse::<f32>().map(f32::to_bits) == Ok(word) {
        let _ = write!(out, "{f:?}");
    } else {
        let _ = write!(out, "0x{word:08x}");
    }
}

fn print_src(out: &mut String, src: &Src) {
    if src.neg {
        out.push('-');
    }
    if src.abs {
        out.push('|');
    }
    let _ = write!(out, "%{}", src.value.0);
    if src.swizzle != Swizzle::IDENTITY {
        let _ = write!(out, ".{}", src.swizzle);
    }
    if src.abs {
        out.push('|');
    }
}

/// Render a program as parseable SIR text.
pub fn print_program(prog: &Program) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", prog.stage.name());
    if prog.frag_rb_swap {
        let _ = writeln!(out, "rb_swap");
    }
    if prog.num_uniform_slots != 0 {
        let _ = writeln!(out, "uniform_slots {}", prog.num_uniform_slots);
    }
    for (kind, vars) in [("input", &prog.inputs), ("output", &prog.outputs)] {
        for (i, var) in vars.iter().enumerate() {
            let _ = writeln!(out, "{kind} {i} {} comps={}", var.semantic, var.ncomp);
        }
    }
    for &b in prog.order() {
        let _ = writeln!(out, "block b{}:", b.0);
        for &id in prog.block_insts(b) {
            let inst = prog.inst(id);
            out.push_str("  ");
            if inst.op.info().has_dest {
                let _ = write!(out, "%{}:{} = ", id.0, inst.ncomp);
            }
            let _ = write!(out, "{}", inst.op.info().name);
            if inst.saturate {
                out.push_str(".sat");
            }
            match (&inst.aux, inst.op) {
                (Aux::Const(words), _) => {
                    for w in &words[..inst.ncomp as usize] {
                        out.push(' ');
                        print_const_word(&mut out, *w);
                    }
                }
                (Aux::Input { base }, _) | (Aux::Output { base }, _) => {
                    let _ = write!(out, " {base}");
                }
                (Aux::Uniform { base }, _) => {
                    let _ = write!(out, " {base}");
                }
                (Aux::Tex { sampler, rect }, _) => {
                    if *rect {
                        out.push_str(" rect");
                    }
                    let _ = write!(out, " {sampler}");
                }
                (Aux::Target(t), _) => {
                    let _ = write!(out, " b{}", t.0);
                }
                _ => {}
            }
            match inst.op {
                Opcode::Phi => {
                    let Aux::Phi(preds) = &inst.aux else { unreachable!() };
                    out.push_str(" [");
                    for (i, (p, s)) in preds.iter().zip(&inst.srcs).enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        let _ = write!(out, "b{}: ", p.0);
                        print_src(&mut out, s);
                    }
                    out.push(']');
                }
                Opcode::Branch => {
                    if let Some(c) = inst.srcs.first() {
                        out.push_str(" ifz ");
                        print_src(&mut out, c);
                    }
                }
                Opcode::Discard => {
                    if let Some(c) = inst.srcs.first() {
                        out.push_str(" ifgz ");
                        print_src(&mut out, c);
                    }
                }
                Opcode::Const => {}
                _ => {
                    for (i, s) in inst.srcs.iter().enumerate() {
                        out.push_str(if i == 0 { " " } else { ", " });
                        print_src(&mut out, s);
                    }
                }
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = "\
fragment
input 0 varying 0 comps=4
input 1 varying 1 comps=4
output 0 color comps=4
block b0:
  %1:4 = load_input 0
  %2:4 = load_input 1
  %3:4 = fmul %1, %2.yyzw
  store_output 0 %3
";

    #[test]
    fn parses_simple_fragment() {
        let p = parse_program(SIMPLE).unwrap();
        p.verify().unwrap();
        assert_eq!(p.stage, Stage::Fragment);
        assert_eq!(p.inputs.len(), 2);
        let b = p.order()[0];
        assert_eq!(p.block_insts(b).len(), 4);
        let mul = p.block_insts(b)[2];
        assert_eq!(p.inst(mul).op, Opcode::FMul);
        assert_eq!(p.inst(mul).srcs[1].swizzle, Swizzle::new(1, 1, 2, 3));
    }

    #[test]
    fn round_trips_through_print() {
        let p = parse_program(SIMPLE).unwrap();
        let text = print_program(&p);
        let p2 = parse_program(&text).unwrap();
        p2.verify().unwrap();
        let ops = |p: &Program| -> Vec<Opcode> {
            p.order()
                .iter()
                .flat_map(|&b| p.block_insts(b).iter().map(|&i| p.inst(i).op))
                .collect()
        };
        assert_eq!(ops(&p), ops(&p2));
    }

    #[test]
    fn parses_modifiers_and_saturate() {
        let text = "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %2:4 = fmul.sat -%1, |%1.xxxx|
  store_output 0 %2
";
        let p = parse_program(text).unwrap();
        let b = p.order()[0];
        let mul = p.block_insts(b)[1];
        assert!(p.inst(mul).saturate);
        assert!(p.inst(mul).srcs[0].neg);
        assert!(p.inst(mul).srcs[1].abs);
    }

    #[test]
    fn parses_loop_with_phi_forward_reference() {
        let text = "\
vertex
output 0 position
block b0:
  %z:1 = const 0.0
  %one:1 = const 1.0
  %n:1 = const 4.0
block b1:
  %i:1 = phi [b0: %z, b1: %next]
  %next:1 = fadd %i, %one
  %done:1 = sge %next, %n
  branch b1 ifz %done
block b2:
  %pos:4 = vec %next %next %next %next
  store_output 0 %pos
";
        let p = parse_program(text).unwrap();
        p.verify().unwrap();
        let l = p.order()[1];
        let phi = p.block_insts(l)[0];
        assert_eq!(p.inst(phi).op, Opcode::Phi);
        let next = p.block_insts(l)[1];
        assert_eq!(p.inst(phi).srcs[1].value, next);
    }

    #[test]
    fn const_hex_round_trip() {
        let text = "\
fragment
output 0 color
block b0:
  %1:2 = const 0x7fc00000 1.5
  %2:4 = vec %1 %1 %1.yyyy %1.yyyy
  store_output 0 %2
";
        let p = parse_program(text).unwrap();
        let printed = print_program(&p);
        assert!(printed.contains("0x7fc00000"));
        assert!(printed.contains("1.5"));
        let p2 = parse_program(&printed).unwrap();
        p2.verify().unwrap();
    }

    #[test]
    fn reports_undefined_value() {
        let text = "\
fragment
output 0 color
block b0:
  %1:1 = fmul %0, %0
";
        let err = parse_program(text).unwrap_err();
        assert_eq!(err.line, 4);
    }
}
