//! `ADR`/`ADRP Rd, label` -- PC-relative address materialization. The
//! target is always a compile-time-known constant (current guest PC +
//! the decoded immediate), so this translator never reads any guest
//! register; it just writes a literal.

use super::util::{BlockBuilder, EmitError, SCRATCH};

pub fn translate(b: &mut BlockBuilder, guest_pc: u64, page: bool, rd: u8, imm: i64) -> Result<(), EmitError> {
    let base = if page { guest_pc & !0xfff } else { guest_pc };
    let target = base.wrapping_add(imm as u64);

    let scratch = SCRATCH[0];
    hostasm::mov_reg_imm64(b.buf(), scratch, target);
    b.store_gpr(rd, scratch);
    Ok(())
}
