//! `SVC`/`BRK`/`HLT #imm16` -- each always terminates the block and
//! hands control back to the dispatcher with the instruction's
//! immediate and a reason code identifying which trap it was, so the
//! launcher's syscall/debug-trap handling can read it off the return
//! value without re-decoding the instruction.

use guestisa::op::SystemOp;

use crate::block::TerminatorKind;
use super::util::{BlockBuilder, EmitError};

pub fn translate(b: &mut BlockBuilder, guest_pc: u64, kind: SystemOp, imm16: u32) -> Result<(), EmitError> {
    let reason = match kind {
        SystemOp::Svc => TerminatorKind::Svc,
        SystemOp::Brk => TerminatorKind::Brk,
        SystemOp::Hlt => TerminatorKind::Hlt,
    };

    // The trap immediate rides in the high 16 bits of the reason word so
    // the launcher can recover it (`#imm16` is architecturally
    // significant for BRK/HLT debugger use, even though SVC's is almost
    // always 0 in practice).
    b.set_pc_immediate(guest_pc);
    b.epilogue(reason.as_reason() | (imm16 << 16));
    Ok(())
}
