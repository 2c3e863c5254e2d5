//! Every branch-class instruction terminates its block (per the block
//! translator's "a block ends immediately after its terminator" rule),
//! so each translator here always ends in [`BlockBuilder::epilogue`]
//! rather than an in-block jump. [`BlockBuilder::jmp`]/`jcc` and its
//! `pending_branches` table stay unused from this module today -- they
//! are the extension point `blockjit`'s cache-integration layer patches
//! into real direct jumps once a target block is resident -- an
//! optional "direct block chaining" optimization, not yet wired up.

use crate::block::TerminatorKind;

use super::util::{BlockBuilder, EmitError, SCRATCH};

pub fn translate_branch(b: &mut BlockBuilder, guest_pc: u64, link: bool, offset: i64) -> Result<(), EmitError> {
    let target = guest_pc.wrapping_add(offset as u64);
    if link {
        let ret_addr = guest_pc.wrapping_add(4);
        let scratch = SCRATCH[0];
        hostasm::mov_reg_imm64(b.buf(), scratch, ret_addr);
        b.store_gpr(30, scratch); // LR is x30
    }
    b.set_pc_immediate(target);
    b.epilogue(TerminatorKind::Branch.as_reason());
    Ok(())
}

pub fn translate_branch_register(b: &mut BlockBuilder, guest_pc: u64, link: bool, is_return: bool, rn: u8) -> Result<(), EmitError> {
    let target = SCRATCH[0];
    b.load_gpr(target, rn);

    if link {
        let ret_addr = guest_pc.wrapping_add(4);
        let scratch = SCRATCH[1];
        hostasm::mov_reg_imm64(b.buf(), scratch, ret_addr);
        b.store_gpr(30, scratch);
    }

    b.set_pc_from_reg(target);
    let reason = if is_return { TerminatorKind::Return } else { TerminatorKind::Branch };
    b.epilogue(reason.as_reason());
    Ok(())
}

pub fn translate_conditional(b: &mut BlockBuilder, guest_pc: u64, cond: guestisa::Cond, offset: i64) -> Result<(), EmitError> {
    let taken = guest_pc.wrapping_add(offset as u64);
    let fallthrough = guest_pc.wrapping_add(4);
    emit_conditional_exit(b, cond, taken, fallthrough)
}

pub fn translate_compare_and_branch(
    b: &mut BlockBuilder,
    guest_pc: u64,
    is64: bool,
    branch_if_nonzero: bool,
    rt: u8,
    offset: i64,
) -> Result<(), EmitError> {
    let taken = guest_pc.wrapping_add(offset as u64);
    let fallthrough = guest_pc.wrapping_add(4);

    let value = SCRATCH[0];
    b.load_gpr(value, rt);
    hostasm::test_reg_reg(b.buf(), value, value, is64);
    let cond = if branch_if_nonzero { hostasm::Condition::NotZero } else { hostasm::Condition::Zero };
    emit_host_conditional_exit(b, cond, taken, fallthrough)
}

pub fn translate_test_and_branch(
    b: &mut BlockBuilder,
    guest_pc: u64,
    branch_if_set: bool,
    bit: u8,
    rt: u8,
    offset: i64,
) -> Result<(), EmitError> {
    let taken = guest_pc.wrapping_add(offset as u64);
    let fallthrough = guest_pc.wrapping_add(4);

    let value = SCRATCH[0];
    b.load_gpr(value, rt);
    hostasm::test_reg_imm32(b.buf(), value, 1u32 << bit, true);
    let cond = if branch_if_set { hostasm::Condition::NotZero } else { hostasm::Condition::Zero };
    emit_host_conditional_exit(b, cond, taken, fallthrough)
}

/// Evaluates a guest condition code and exits the block to whichever
/// target holds, storing PC for both paths since the cache never sees
/// a block that falls off the end without recording where it went.
fn emit_conditional_exit(b: &mut BlockBuilder, cond: guestisa::Cond, taken: u64, fallthrough: u64) -> Result<(), EmitError> {
    let result = SCRATCH[0];
    b.test_guest_cond(result, cond);
    hostasm::test_reg_reg(b.buf(), result, result, false);
    emit_host_conditional_exit(b, hostasm::Condition::NotZero, taken, fallthrough)
}

fn emit_host_conditional_exit(b: &mut BlockBuilder, cond: hostasm::Condition, taken: u64, fallthrough: u64) -> Result<(), EmitError> {
    let skip = hostasm::jcc_rel32(b.buf(), cond.negate());
    b.set_pc_immediate(taken);
    b.epilogue(TerminatorKind::Branch.as_reason());

    let skip_target = b.buf().current_offset();
    patch_near_jump(b, skip, skip_target);

    b.set_pc_immediate(fallthrough);
    b.epilogue(TerminatorKind::Fallthrough.as_reason());
    Ok(())
}

fn patch_near_jump(b: &mut BlockBuilder, site: codebuf::Offset, target: codebuf::Offset) {
    let rel = (target as i64 - (site as i64 + 4)) as i32;
    let _ = b.buf().patch_u32_le(site, rel as u32);
}
