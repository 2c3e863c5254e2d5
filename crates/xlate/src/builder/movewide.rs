//! `MOVZ`/`MOVN`/`MOVK Rd, #imm16, LSL #shift`.

use super::util::{BlockBuilder, EmitError, SCRATCH};

pub fn translate(b: &mut BlockBuilder, is64: bool, keep: bool, invert: bool, rd: u8, imm16: u32, shift: u32) -> Result<(), EmitError> {
    let shifted = u64::from(imm16) << shift;
    let scratch = SCRATCH[0];

    if keep {
        // MOVK: only the targeted halfword changes, the rest of the
        // register is preserved.
        let mask = !(0xffffu64 << shift);
        b.load_gpr(scratch, rd);
        hostasm::mov_reg_imm64(b.buf(), SCRATCH[1], mask);
        hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::And, scratch, SCRATCH[1], is64);
        hostasm::mov_reg_imm64(b.buf(), SCRATCH[1], shifted);
        hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::Or, scratch, SCRATCH[1], is64);
    } else if invert {
        // MOVN: the immediate is bitwise-inverted (NOT the shifted
        // field only -- the whole destination width) before the store.
        let value = if is64 { !shifted } else { u64::from(!(shifted as u32)) };
        hostasm::mov_reg_imm64(b.buf(), scratch, value);
    } else {
        hostasm::mov_reg_imm64(b.buf(), scratch, shifted);
    }

    b.store_gpr(rd, scratch);
    Ok(())
}
