//! `CMP`/`CMN`/`TST`: an ALU op whose result is discarded and only the
//! N/Z/C/V flags survive. Unlike [`super::alu`]'s flag-setting forms,
//! every condition here runs through real host arithmetic so carry and
//! overflow come from the hardware rather than being synthesized --
//! x86's `SUB`/`ADD` define `CF`/`OF` the same way AArch64's `SUBS`/
//! `ADDS` define `C`/`V`, except x86's `CF` after `SUB` is a borrow flag
//! (opposite polarity from AArch64's "no borrow" carry), so the `Sub`
//! arm reads the complemented condition.

use guestisa::op::{AluOp, RegOrImm};
use hostasm::Condition;

use super::util::{BlockBuilder, EmitError, SCRATCH};

pub fn translate(b: &mut BlockBuilder, op: AluOp, is64: bool, rn: u8, rm_or_imm: RegOrImm) -> Result<(), EmitError> {
    let lhs = SCRATCH[0];
    let rhs = SCRATCH[1];

    b.load_gpr(lhs, rn);
    match rm_or_imm {
        RegOrImm::Reg(index) => b.load_gpr(rhs, index),
        RegOrImm::Imm(imm) => hostasm::mov_reg_imm64(b.buf(), rhs, imm),
    }

    match op {
        AluOp::And => {
            // TST: logical op, only N/Z defined; C/V cleared.
            hostasm::test_reg_reg(b.buf(), lhs, rhs, is64);
            b.store_flags_from_host(Some(Condition::Sign), Some(Condition::Zero), None, None);
        }
        AluOp::Add => {
            hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::Add, lhs, rhs, is64);
            b.store_flags_from_host(Some(Condition::Sign), Some(Condition::Zero), Some(Condition::Below), Some(Condition::Overflow));
        }
        AluOp::Sub => {
            hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::Sub, lhs, rhs, is64);
            b.store_flags_from_host(
                Some(Condition::Sign),
                Some(Condition::Zero),
                Some(Condition::AboveOrEqual),
                Some(Condition::Overflow),
            );
        }
        other => return Err(EmitError::Unimplemented {
            op: guestisa::Op::CompareTest { op: other, is64, rn, rm_or_imm },
        }),
    }

    Ok(())
}
