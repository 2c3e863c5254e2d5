//! ALU-class translator: register/immediate add/sub/and/or/xor, the
//! `BIC`/`NEG`/`NOT`/`MVN` aliases, multiply, divide and the four shift
//! flavors. `CompareTest` (CMP/CMN/TST) is a sibling, handled separately
//! in [`super::comparetest`] since it never writes a destination.

use guestisa::op::{AluOp, RegOrImm};
use hostasm::{Condition, ShiftOp};

use crate::block::TerminatorKind;
use super::util::{BlockBuilder, EmitError, SCRATCH};

pub fn translate(
    b: &mut BlockBuilder,
    guest_pc: u64,
    op: AluOp,
    is64: bool,
    set_flags: bool,
    rd: u8,
    rn: u8,
    rm_or_imm: RegOrImm,
    ra: u8,
) -> Result<(), EmitError> {
    let lhs = SCRATCH[0];
    let rhs = SCRATCH[1];

    b.load_gpr(lhs, rn);
    load_operand(b, rhs, rm_or_imm);

    match op {
        AluOp::Add => {
            b.alu_reg_reg(hostasm::AluOp::Add, lhs, rhs, is64);
            // ADDS: C/V come straight from the host ADD's EFLAGS, read
            // here before anything else can disturb them; N/Z from the
            // same flags too, matching CompareTest's Add arm.
            if set_flags {
                b.store_flags_from_host(
                    Some(Condition::Sign),
                    Some(Condition::Zero),
                    Some(Condition::Below),
                    Some(Condition::Overflow),
                );
            }
        }
        AluOp::Sub => {
            b.alu_reg_reg(hostasm::AluOp::Sub, lhs, rhs, is64);
            // SUBS: x86's CF after SUB is a borrow flag, opposite polarity
            // from AArch64's carry, so the guest carry reads the
            // complemented condition (see CompareTest's Sub arm).
            if set_flags {
                b.store_flags_from_host(
                    Some(Condition::Sign),
                    Some(Condition::Zero),
                    Some(Condition::AboveOrEqual),
                    Some(Condition::Overflow),
                );
            }
        }
        AluOp::And => {
            b.alu_reg_reg(hostasm::AluOp::And, lhs, rhs, is64);
            // ANDS: N/Z from the host AND's EFLAGS; C and V are always
            // cleared for logical forms, never read off the host.
            if set_flags {
                b.store_flags_from_host(Some(Condition::Sign), Some(Condition::Zero), None, None);
            }
        }
        AluOp::Orr => b.alu_reg_reg(hostasm::AluOp::Or, lhs, rhs, is64),
        AluOp::Eor => b.alu_reg_reg(hostasm::AluOp::Xor, lhs, rhs, is64),
        AluOp::Bic => {
            hostasm::not_reg(b.buf(), rhs, is64);
            b.alu_reg_reg(hostasm::AluOp::And, lhs, rhs, is64);
            // BICS (ANDS with an inverted second operand) is the only
            // other logical form that ever carries `set_flags`; same
            // C/V-cleared rule as ANDS above.
            if set_flags {
                b.store_flags_from_host(Some(Condition::Sign), Some(Condition::Zero), None, None);
            }
        }
        AluOp::Mul { negate } => {
            // MADD/MSUB: Rd = Ra +/- Rn*Rm. MUL/MNEG are the same shape
            // with Ra == XZR, which `load_gpr` already reads as zero.
            hostasm::imul_reg_reg(b.buf(), lhs, rhs, is64);
            let acc = SCRATCH[2];
            b.load_gpr(acc, ra);
            if negate {
                hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::Sub, acc, lhs, is64);
                hostasm::mov_reg_reg(b.buf(), lhs, acc, is64);
            } else {
                b.alu_reg_reg(hostasm::AluOp::Add, lhs, acc, is64);
            }
        }
        AluOp::Div { signed } => translate_div(b, guest_pc, lhs, rhs, is64, signed),
        AluOp::Neg => hostasm::neg_reg(b.buf(), lhs, is64),
        AluOp::Not => hostasm::not_reg(b.buf(), lhs, is64),
        AluOp::Lsl => shift_by_reg(b, ShiftOp::Shl, lhs, rhs, is64),
        AluOp::Lsr => shift_by_reg(b, ShiftOp::Shr, lhs, rhs, is64),
        AluOp::Asr => shift_by_reg(b, ShiftOp::Sar, lhs, rhs, is64),
        AluOp::Ror => shift_by_reg(b, ShiftOp::Ror, lhs, rhs, is64),
    }

    b.store_gpr(rd, lhs);
    Ok(())
}

/// Guards the raw x86 `div`/`idiv` with a runtime zero check -- the host
/// instructions fault (#DE) on a zero divisor, but the guest architecture
/// never does. Signed divide-by-zero traps to the undefined-instruction
/// sequence (same reason code a literal `UDF` produces); unsigned
/// divide-by-zero yields 0, per the guest's documented convention.
fn translate_div(b: &mut BlockBuilder, guest_pc: u64, lhs: hostasm::Reg, rhs: hostasm::Reg, is64: bool, signed: bool) {
    use hostasm::Reg;

    hostasm::test_reg_reg(b.buf(), rhs, rhs, is64);
    let zero_branch = hostasm::jcc_rel32(b.buf(), Condition::Zero);

    // x86 div/idiv always operate on RDX:RAX / EDX:EAX; shuffle operands
    // through the fixed accumulator pair regardless of which scratch
    // registers the caller picked.
    hostasm::mov_reg_reg(b.buf(), Reg::Rax, lhs, is64);
    if rhs != Reg::Rcx {
        hostasm::mov_reg_reg(b.buf(), Reg::Rcx, rhs, is64);
    }
    if signed {
        hostasm::sign_extend_accumulator(b.buf(), is64);
        hostasm::idiv_reg(b.buf(), Reg::Rcx, is64);
    } else {
        hostasm::zero_reg(b.buf(), Reg::Rdx, is64);
        hostasm::div_reg(b.buf(), Reg::Rcx, is64);
    }
    hostasm::mov_reg_reg(b.buf(), lhs, Reg::Rax, is64);
    let done = hostasm::jmp_rel32(b.buf());

    let zero_target = b.buf().current_offset();
    patch(b, zero_branch, zero_target);
    if signed {
        b.set_pc_immediate(guest_pc);
        b.epilogue(TerminatorKind::Undefined.as_reason());
    } else {
        hostasm::zero_reg(b.buf(), lhs, is64);
    }

    let end = b.buf().current_offset();
    patch(b, done, end);
}

fn patch(b: &mut BlockBuilder, site: codebuf::Offset, target: codebuf::Offset) {
    let rel = (target as i64 - (site as i64 + 4)) as i32;
    let _ = b.buf().patch_u32_le(site, rel as u32);
}

fn shift_by_reg(b: &mut BlockBuilder, op: ShiftOp, dst: hostasm::Reg, amount: hostasm::Reg, is64: bool) {
    use hostasm::Reg;

    if amount != Reg::Rcx {
        hostasm::mov_reg_reg(b.buf(), Reg::Rcx, amount, is64);
    }
    hostasm::shift_reg_cl(b.buf(), op, dst, is64);
}

fn load_operand(b: &mut BlockBuilder, dst: hostasm::Reg, operand: RegOrImm) {
    match operand {
        RegOrImm::Reg(index) => b.load_gpr(dst, index),
        RegOrImm::Imm(imm) => hostasm::mov_reg_imm64(b.buf(), dst, imm),
    }
}

