//! End-to-end compile tests over the textual IR, checking the binary
//! artifact and the stage metadata.

use uscc::core::{CompileError, HwSpecs, NullSink};
use uscc::{compile_shader, CompiledShader};

fn compile(text: &str, specs: &HwSpecs) -> CompiledShader {
    let prog = uscc::sir::parse_program(text).unwrap();
    compile_shader(prog, specs, &mut NullSink).unwrap()
}

fn compile_err(text: &str, specs: &HwSpecs) -> CompileError {
    let prog = uscc::sir::parse_program(text).unwrap();
    compile_shader(prog, specs, &mut NullSink).unwrap_err()
}

/// Decoded word-0 fields of instruction `i`.
fn word0(shader: &CompiledShader, i: usize) -> (u32, bool, u32, u32) {
    let w = shader.code[i * 4];
    let opcode = w & 0x7f;
    let sat = (w >> 11) & 1 != 0;
    let dst_reg = (w >> 16) & 0x7f;
    let dst_mask = (w >> 23) & 0xf;
    (opcode, sat, dst_reg, dst_mask)
}

fn opcodes(shader: &CompiledShader) -> Vec<u32> {
    (0..shader.num_instructions as usize).map(|i| word0(shader, i).0).collect()
}

const OP_MUL: u32 = 0x03;
const OP_MOV: u32 = 0x09;
const OP_SET: u32 = 0x10;
const OP_BRANCH: u32 = 0x16;
const OP_TEXKILL: u32 = 0x17;
const OP_TEXLD: u32 = 0x18;
const OP_SIN: u32 = 0x22;
const OP_I2F: u32 = 0x2d;
const OP_NOP: u32 = 0x00;

#[test]
fn fragment_mul_compiles_to_one_alu_instruction() {
    let shader = compile(
        "\
fragment
input 0 varying 0
input 1 varying 1
output 0 color
block b0:
  %1:4 = load_input 0
  %2:4 = load_input 1
  %3:4 = fmul %1, %2
  store_output 0 %3
",
        &HwSpecs::unified(),
    );
    assert_eq!(shader.num_instructions, 1);
    assert_eq!(shader.code.len(), 4);
    let (opcode, sat, dst_reg, dst_mask) = word0(&shader, 0);
    assert_eq!(opcode, OP_MUL);
    assert!(!sat);
    assert_eq!(dst_mask, 0xf);
    assert_eq!(shader.ps_color_out_reg, dst_reg);
    // Two varyings plus the position register.
    assert_eq!(shader.num_temps, 3);
    assert_eq!(shader.input_count_unk8, 31);
}

#[test]
fn vertex_instance_id_is_materialized_as_float() {
    let shader = compile(
        "\
vertex
output 0 position
block b0:
  %1:1 = load_instance_id
  store_output 0 %1
",
        &HwSpecs::unified(),
    );
    // The only generated instruction is the int-to-float conversion.
    assert_eq!(opcodes(&shader), vec![OP_I2F]);
    let (_, _, dst_reg, _) = word0(&shader, 0);
    assert_eq!(shader.vs_pos_out_reg, Some(dst_reg));
    // No declared inputs: the instance counter lands in register 0.
    assert_eq!(shader.vs_id_in_reg, Some(0));
    assert_ne!(dst_reg, 0);
}

#[test]
fn register_budget_overflow_fails_without_artifact() {
    let err = compile_err(
        "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %2:4 = fadd %1, %1.yzwx
  %3:4 = ffract %1
  %4:4 = ffma %2, %3, %1
  %5:4 = fmin %4, %2
  %6:4 = fmax %5, %3
  store_output 0 %6
",
        &HwSpecs { max_temps: 2, ..HwSpecs::unified() },
    );
    match err {
        CompileError::TooManyTemporaries { required, available } => {
            assert_eq!(available, 2);
            assert!(required > 2);
        }
        other => panic!("expected register exhaustion, got {other:?}"),
    }
}

#[test]
fn rect_texture_inserts_scale_load_and_multiply() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %c:2 = mov %1
  %t:4 = tex rect 3 %c
  store_output 0 %t
",
        &HwSpecs::unified(),
    );
    // Exactly one coordinate multiply, strictly before the sample.
    let ops = opcodes(&shader);
    let muls: Vec<usize> =
        ops.iter().enumerate().filter(|(_, &o)| o == OP_MUL).map(|(i, _)| i).collect();
    let texld = ops.iter().position(|&o| o == OP_TEXLD).unwrap();
    assert_eq!(muls.len(), 1);
    assert!(muls[0] < texld);

    // The synthetic uniform is keyed by the sampler index and tagged as a
    // driver-patched rectangle scale.
    use uscc::emit::UniformContents;
    let idx_x = shader
        .uniforms
        .contents
        .iter()
        .position(|&c| c == UniformContents::TexRectScaleX)
        .expect("scale X present");
    let idx_y = shader
        .uniforms
        .contents
        .iter()
        .position(|&c| c == UniformContents::TexRectScaleY)
        .expect("scale Y present");
    assert_eq!(shader.uniforms.words[idx_x], 3);
    assert_eq!(shader.uniforms.words[idx_y], 3);
}

#[test]
fn branch_target_resolves_to_block_instruction_index() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %c:1 = slt %1.xxxx, %1.yyyy
  branch b2 ifz %c
block b1:
  discard
block b2:
  store_output 0 %1
",
        &HwSpecs::unified(),
    );
    assert_eq!(opcodes(&shader), vec![OP_SET, OP_BRANCH, OP_TEXKILL]);
    // b2 holds no instructions; its pointer is one past the kill.
    let w3 = shader.code[1 * 4 + 3];
    let target = (w3 >> 2) & 0xff_ffff;
    assert_eq!(target, 3);
    // Conditional branch: branch-unless encoding.
    let cond = (shader.code[1 * 4] >> 7) & 0xf;
    assert_eq!(cond, 0x0b);
}

#[test]
fn empty_program_gets_a_nop() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  store_output 0 %1
",
        &HwSpecs::unified(),
    );
    assert_eq!(opcodes(&shader), vec![OP_NOP]);
    assert_eq!(shader.ps_color_out_reg, 1);
}

#[test]
fn saturate_lands_on_corrective_multiply_not_on_sine() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color comps=1
block b0:
  %1:4 = load_input 0
  %s:1 = fsin.sat %1.xxxx
  store_output 0 %s
",
        &HwSpecs::unified(),
    );
    let ops = opcodes(&shader);
    let sin = ops.iter().position(|&o| o == OP_SIN).unwrap();
    assert!(!word0(&shader, sin).1, "sine must not saturate");
    // Exactly one saturating instruction: the corrective multiply.
    let sats: Vec<usize> = (0..ops.len()).filter(|&i| word0(&shader, i).1).collect();
    assert_eq!(sats.len(), 1);
    assert_eq!(ops[sats[0]], OP_MUL);
    assert!(sats[0] > sin);
}

#[test]
fn legacy_sine_keeps_saturate_in_place() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color comps=1
block b0:
  %1:4 = load_input 0
  %s:1 = fsin.sat %1.xxxx
  store_output 0 %s
",
        &HwSpecs::legacy(),
    );
    let ops = opcodes(&shader);
    let sin = ops.iter().position(|&o| o == OP_SIN).unwrap();
    assert!(word0(&shader, sin).1, "old unit saturates on the sine itself");
}

#[test]
fn constant_loop_compiles_to_straight_line_code() {
    let shader = compile(
        "\
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
",
        &HwSpecs::unified(),
    );
    // The loop evaluates to a constant; no branches survive.
    assert!(!opcodes(&shader).contains(&OP_BRANCH));
}

#[test]
fn instruction_count_overflow_sets_icache_flag() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %2:4 = ffract %1
  %3:4 = ffloor %2
  %4:4 = fceil %3
  store_output 0 %4
",
        &HwSpecs { max_instructions: 2, ..HwSpecs::unified() },
    );
    assert_eq!(shader.num_instructions, 3);
    assert!(shader.needs_icache);
}

#[test]
fn uniform_slot_overflow_is_fatal() {
    let err = compile_err(
        "\
fragment
uniform_slots 168
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %k:1 = const 0.5
  %2:4 = fmul %1, %k.xxxx
  store_output 0 %2
",
        &HwSpecs::unified(),
    );
    assert!(matches!(err, CompileError::TooManyUniforms { .. }));
}

#[test]
fn unsupported_fragment_output_is_rejected() {
    let err = compile_err(
        "\
fragment
input 0 varying 0
output 0 position
block b0:
  %1:4 = load_input 0
  store_output 0 %1
",
        &HwSpecs::unified(),
    );
    assert!(matches!(err, CompileError::UnsupportedOutput { stage: "fragment", .. }));
}

#[test]
fn front_face_compare_and_discard() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %ff:1 = load_front_face
  discard ifgz %ff
  store_output 0 %1
",
        &HwSpecs::unified(),
    );
    let ops = opcodes(&shader);
    // The inverted hardware bit turns into a compare feeding the kill.
    assert!(ops.contains(&OP_SET));
    assert!(ops.contains(&OP_TEXKILL));
    let kill = ops.iter().position(|&o| o == OP_TEXKILL).unwrap();
    let cond = (shader.code[kill * 4] >> 7) & 0xf;
    assert_eq!(cond, 0x0d);
}

#[test]
fn rb_swap_adds_channel_swap_mov() {
    let swapped = compile(
        "\
fragment
rb_swap
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  store_output 0 %1
",
        &HwSpecs::unified(),
    );
    // The swap forces a mov with a z..x swizzle; the plain shader has none.
    assert!(opcodes(&swapped).contains(&OP_MOV));
    let mov = opcodes(&swapped).iter().position(|&o| o == OP_MOV).unwrap();
    // Unified layout: src2 sits in word 3, swizzle at bits 13..21.
    let w3 = swapped.code[mov * 4 + 3];
    let swiz = (w3 >> 13) & 0xff;
    // x and z lanes exchanged relative to identity.
    assert_eq!(swiz, 0b11_00_01_10);
}

const OP_SELECT: u32 = 0x0f;
const OP_LOAD: u32 = 0x32;

#[test]
fn pure_diamond_if_converts_to_select() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %c:1 = slt %1.xxxx, %1.yyyy
  branch b2 ifz %c
block b1:
  %a:4 = ffract %1
  branch b3
block b2:
  %b:4 = fceil %1
block b3:
  %m:4 = phi [b1: %a, b2: %b]
  store_output 0 %m
",
        &HwSpecs::unified(),
    );
    let ops = opcodes(&shader);
    assert!(!ops.contains(&OP_BRANCH));
    assert!(ops.contains(&OP_SELECT));
}

#[test]
fn impure_diamond_keeps_phi_moves() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %c:1 = slt %1.xxxx, %1.yyyy
  branch b2 ifz %c
block b1:
  %a:4 = ffract %1
  discard ifgz %c
  branch b3
block b2:
  %b:4 = fceil %1
block b3:
  %m:4 = phi [b1: %a, b2: %b]
  store_output 0 %m
",
        &HwSpecs::unified(),
    );
    let ops = opcodes(&shader);
    // The kill keeps the diamond intact: both arms copy into the phi
    // register before control reaches the join.
    assert_eq!(ops.iter().filter(|&&o| o == OP_BRANCH).count(), 2);
    let movs: Vec<usize> =
        ops.iter().enumerate().filter(|(_, &o)| o == OP_MOV).map(|(i, _)| i).collect();
    assert_eq!(movs.len(), 2);
    assert_eq!(word0(&shader, movs[0]).2, word0(&shader, movs[1]).2);
    assert_eq!(shader.ps_color_out_reg, word0(&shader, movs[0]).2);
}

#[test]
fn dynamic_uniform_read_emits_memory_load() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %u:4 = load_uniform 2 %1.xxxx
  store_output 0 %u
",
        &HwSpecs::unified(),
    );
    let ops = opcodes(&shader);
    // Address pre-scale (x16, truncate) feeds the memory load.
    assert!(ops.contains(&OP_MUL));
    assert!(ops.contains(&0x2e)); // f2i
    assert!(ops.contains(&OP_LOAD));
}

#[test]
fn ubo_read_emits_memory_load() {
    let shader = compile(
        "\
fragment
input 0 varying 0
output 0 color
block b0:
  %1:4 = load_input 0
  %o:1 = f2u %1.xxxx
  %b:1 = const 0x00000010
  %v:4 = load_ubo %o, %b
  store_output 0 %v
",
        &HwSpecs::unified(),
    );
    let ops = opcodes(&shader);
    assert!(ops.contains(&OP_LOAD));
}

#[test]
fn vertex_metadata_and_load_balancing() {
    let shader = compile(
        "\
vertex
input 0 attribute 0
output 0 position
output 1 varying 0
block b0:
  %1:4 = load_input 0
  store_output 0 %1
  %2:4 = ffract %1
  store_output 1 %2
",
        &HwSpecs::unified(),
    );
    assert!(shader.vs_pos_out_reg.is_some());
    assert_eq!(shader.outfile.len(), 1);
    assert_eq!((shader.vs_load_balancing >> 16) & 0xff, 0x3f);
    assert_eq!((shader.vs_load_balancing >> 24) & 0xff, 0x0f);
    assert_eq!(shader.input_count_unk8, (1 + 4 + 15) / 16);
}
