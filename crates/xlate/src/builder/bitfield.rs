//! `SBFM`/`UBFM`/`BFM Rd, Rn, #immr, #imms` -- bit-field extract/insert.
//!
//! Follows the architecture manual's own unified construction rather
//! than branching on `immr` vs. `imms`: rotate `Rn` right by `immr`,
//! mask to the low `imms + 1` bits to get the "bottom" half, fold that
//! into either zero (SBFM/UBFM) or the prior destination (BFM), then
//! fold sign- or zero-extension bits in above the point the field
//! itself stops contributing. This covers the wrapping case (`immr >
//! imms`, the `LSL`/`BFI`/`SBFIZ`/`UBFIZ` aliases) and the signed
//! wrapping extract alike -- there's no separate rotate-through-the-
//! sign-bit special case, the rotate already produces the right bit
//! pattern before the sign fill is applied on top of it.

use super::util::{BlockBuilder, EmitError, SCRATCH};

pub fn translate(
    b: &mut BlockBuilder,
    is64: bool,
    signed: bool,
    insert: bool,
    rd: u8,
    rn: u8,
    immr: u32,
    imms: u32,
) -> Result<(), EmitError> {
    let width_bits = if is64 { 64 } else { 32 };
    let s = imms % width_bits;
    let r = immr % width_bits;
    let w_width = s + 1;
    let d = (s + width_bits - r) % width_bits;
    let t_width = d + 1;

    // SCRATCH[2] is left free for `mask_low_bits`/`clear_low_bits`'s own
    // internal scratch use below.
    let src = SCRATCH[0];
    let bot = SCRATCH[1];
    let field = SCRATCH[3];
    let top = SCRATCH[4];

    b.load_gpr(src, rn);

    // bot = (dst-or-zero AND NOT(wmask)) OR (ROR(src, r) AND wmask)
    hostasm::mov_reg_reg(b.buf(), bot, src, is64);
    hostasm::shift_reg_imm8(b.buf(), hostasm::ShiftOp::Ror, bot, r as u8, is64);
    mask_low_bits(b, bot, w_width);

    if insert {
        b.load_gpr(field, rd);
    } else {
        hostasm::zero_reg(b.buf(), field, is64);
    }
    clear_low_bits(b, field, w_width);
    hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::Or, field, bot, is64);

    // top = replicate(src's sign bit at position s, or zero)
    if signed {
        let shift_up = width_bits - 1 - s;
        hostasm::mov_reg_reg(b.buf(), top, src, is64);
        hostasm::shift_reg_imm8(b.buf(), hostasm::ShiftOp::Shl, top, shift_up as u8, is64);
        hostasm::shift_reg_imm8(b.buf(), hostasm::ShiftOp::Sar, top, (width_bits - 1) as u8, is64);
    } else {
        hostasm::zero_reg(b.buf(), top, is64);
    }

    // result = (top AND NOT(tmask)) OR (field AND tmask)
    mask_low_bits(b, field, t_width);
    clear_low_bits(b, top, t_width);
    hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::Or, field, top, is64);

    b.store_gpr(rd, field);
    Ok(())
}

fn mask_low_bits(b: &mut BlockBuilder, reg: hostasm::Reg, width: u32) {
    if width >= 64 {
        return;
    }
    let mask = (1u64 << width) - 1;
    let tmp = super::util::SCRATCH[2];
    hostasm::mov_reg_imm64(b.buf(), tmp, mask);
    hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::And, reg, tmp, true);
}

fn clear_low_bits(b: &mut BlockBuilder, reg: hostasm::Reg, width: u32) {
    let mask = if width >= 64 { 0 } else { !((1u64 << width) - 1) };
    let tmp = super::util::SCRATCH[2];
    hostasm::mov_reg_imm64(b.buf(), tmp, mask);
    hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::And, reg, tmp, true);
}

fn clear_bits_at(b: &mut BlockBuilder, reg: hostasm::Reg, pos: u32, width: u32) {
    let field_mask = if width >= 64 { u64::MAX } else { (1u64 << width) - 1 };
    let mask = !(field_mask << pos);
    let tmp = super::util::SCRATCH[2];
    hostasm::mov_reg_imm64(b.buf(), tmp, mask);
    hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::And, reg, tmp, true);
}

fn sign_extend(b: &mut BlockBuilder, reg: hostasm::Reg, width: u32, is64: bool) {
    let shift = (if is64 { 64 } else { 32 }) - width;
    hostasm::shift_reg_imm8(b.buf(), hostasm::ShiftOp::Shl, reg, shift as u8, is64);
    hostasm::shift_reg_imm8(b.buf(), hostasm::ShiftOp::Sar, reg, shift as u8, is64);
}
