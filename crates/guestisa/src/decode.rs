//! Turns a raw 32-bit word into an [`Op`]. Classification happens in a
//! single fixed order -- see the module-level comment on
//! [`decode`] -- so that whenever two instruction classes' bit patterns
//! could both match the same word, the first one tried in that order
//! wins, deterministically, rather than depending on enum declaration
//! order or hash-map iteration.

use thiserror::Error;

use crate::fields::*;
use crate::op::*;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("no instruction class matched word {word:#010x}")]
    Unknown { word: u32 },
    #[error("word {word:#010x} matched the UDF encoding")]
    Undefined { word: u32 },
}

fn alu_op_for_logical(opc: u32, invert: bool) -> AluOp {
    match (opc, invert) {
        (0b00, false) => AluOp::And,
        (0b00, true) => AluOp::Bic,
        (0b01, false) => AluOp::Orr,
        (0b01, true) => AluOp::Not,
        (0b10, _) => AluOp::Eor,
        (0b11, false) => AluOp::And, // ANDS, flags handled by caller
        (0b11, true) => AluOp::Bic,
        _ => unreachable!("opc is a 2-bit field"),
    }
}

fn decode_alu_register(word: u32) -> Option<Op> {
    // Add/subtract (shifted register): 28-24 == 0b01011, bit21 == 0.
    if bits(word, 28, 24) == 0b01011 && !bit(word, 21) {
        let op = if bit(word, 30) { AluOp::Sub } else { AluOp::Add };
        let set_flags = set_flags(word);
        let rd_idx = rd(word);
        let rn_idx = rn(word);
        if set_flags && rd_idx == ZERO_REG {
            return Some(Op::CompareTest {
                op,
                is64: sf(word),
                rn: rn_idx,
                rm_or_imm: RegOrImm::Reg(rm(word)),
            });
        }

        return Some(Op::Alu {
            op,
            is64: sf(word),
            set_flags,
            rd: rd_idx,
            rn: rn_idx,
            rm_or_imm: RegOrImm::Reg(rm(word)),
            ra: ZERO_REG,
        });
    }

    // Logical (shifted register): 28-24 == 0b01010.
    if bits(word, 28, 24) == 0b01010 {
        let opc = bits(word, 30, 29);
        let invert = bit(word, 21);
        let op = alu_op_for_logical(opc, invert);
        let set_flags = opc == 0b11;
        let rd_idx = rd(word);
        let rn_idx = rn(word);
        if set_flags && rd_idx == ZERO_REG {
            return Some(Op::CompareTest {
                op,
                is64: sf(word),
                rn: rn_idx,
                rm_or_imm: RegOrImm::Reg(rm(word)),
            });
        }

        return Some(Op::Alu {
            op,
            is64: sf(word),
            set_flags,
            rd: rd_idx,
            rn: rn_idx,
            rm_or_imm: RegOrImm::Reg(rm(word)),
            ra: ZERO_REG,
        });
    }

    // Data-processing (3 source): MADD/MSUB/MUL/MNEG. 30-29 == 0b00, 28-24 == 0b11011.
    // MUL/MNEG are the same encoding with Ra == XZR; the translator reads
    // Ra as the zero register and gets the right answer either way, so no
    // separate decode is needed for the aliases.
    if bits(word, 30, 29) == 0b00 && bits(word, 28, 24) == 0b11011 {
        let negate = bit(word, 15);
        return Some(Op::Alu {
            op: AluOp::Mul { negate },
            is64: sf(word),
            set_flags: false,
            rd: rd(word),
            rn: rn(word),
            rm_or_imm: RegOrImm::Reg(rm(word)),
            ra: ra(word),
        });
    }

    // Data-processing (2 source): SDIV/UDIV. 28-21 == 0b11010110.
    if bits(word, 28, 21) == 0b1101_0110 {
        let opcode = bits(word, 15, 10);
        let signed = match opcode {
            0b000011 => true,
            0b000010 => false,
            _ => return None,
        };

        return Some(Op::Alu {
            op: AluOp::Div { signed },
            is64: sf(word),
            set_flags: false,
            rd: rd(word),
            rn: rn(word),
            rm_or_imm: RegOrImm::Reg(rm(word)),
            ra: ZERO_REG,
        });
    }

    None
}

const ZERO_REG: u8 = 31;

fn decode_alu_immediate(word: u32) -> Option<Op> {
    // Add/subtract (immediate): 28-23 == 0b100010.
    if bits(word, 28, 23) == 0b100010 {
        let op = if bit(word, 30) { AluOp::Sub } else { AluOp::Add };
        let set_flags = set_flags(word);
        let rd_idx = rd(word);
        let rn_idx = rn(word);
        let imm = u64::from(imm12(word));
        if set_flags && rd_idx == ZERO_REG {
            return Some(Op::CompareTest {
                op,
                is64: sf(word),
                rn: rn_idx,
                rm_or_imm: RegOrImm::Imm(imm),
            });
        }

        return Some(Op::Alu {
            op,
            is64: sf(word),
            set_flags,
            rd: rd_idx,
            rn: rn_idx,
            rm_or_imm: RegOrImm::Imm(imm),
            ra: ZERO_REG,
        });
    }

    // Logical (immediate): 28-23 == 0b100100.
    if bits(word, 28, 23) == 0b100100 {
        let opc = bits(word, 30, 29);
        let imm = decode_bitmask_immediate(n_bit(word), immr(word), imms(word), sf(word));
        let set_flags = opc == 0b11;
        let op = alu_op_for_logical(opc, false);
        let rd_idx = rd(word);
        let rn_idx = rn(word);
        if set_flags && rd_idx == ZERO_REG {
            return Some(Op::CompareTest {
                op,
                is64: sf(word),
                rn: rn_idx,
                rm_or_imm: RegOrImm::Imm(imm),
            });
        }

        return Some(Op::Alu {
            op,
            is64: sf(word),
            set_flags,
            rd: rd_idx,
            rn: rn_idx,
            rm_or_imm: RegOrImm::Imm(imm),
            ra: ZERO_REG,
        });
    }

    None
}

/// Expands the `N:immr:imms` bitmask-immediate encoding shared by the
/// logical-immediate instructions into its 32- or 64-bit value, following
/// the architecture manual's own recursive construction: find the
/// smallest power-of-two element size `esize` that `N:imms` selects, build
/// one element as a run of `(imms % esize) + 1` set bits rotated right by
/// `immr % esize`, then replicate that element across the full register
/// width.
fn decode_bitmask_immediate(n: bool, immr: u32, imms: u32, is64: bool) -> u64 {
    let width = if is64 { 64u32 } else { 32 };

    // The highest set bit of the 7-bit field `N:NOT(imms)` gives the log2
    // of the element size: `N == 1` always selects a 64-bit element
    // regardless of `imms`, otherwise the leading zero run in `imms` does.
    // All-zero (`N == 0`, `imms` all ones) has no set bit at all and is an
    // unallocated encoding; return 0 rather than panic on it.
    let nimms = (!imms) & 0b11_1111;
    let combined = ((n as u32) << 6) | nimms;
    if combined == 0 {
        return 0;
    }
    let esize = (1u32 << (31 - combined.leading_zeros())).min(width);

    let r = immr % esize;
    let s = imms % esize;
    let run_len = s + 1;

    let elem_mask = if esize >= 64 { u64::MAX } else { (1u64 << esize) - 1 };
    let run: u64 = if run_len >= 64 { u64::MAX } else { ((1u64 << run_len) - 1) & elem_mask };
    // Rotate `run` right by `r` within an `esize`-bit field -- `rotate_right`
    // itself operates on the full 64-bit width, so the wrapped-around high
    // bits have to be masked back down to `esize` bits by hand.
    let element = if r == 0 { run } else { ((run >> r) | (run << (esize - r))) & elem_mask };

    let mut pattern: u64 = 0;
    let mut filled = 0u32;
    while filled < width {
        pattern |= element << filled;
        filled += esize;
    }

    if width == 32 {
        pattern &= 0xFFFF_FFFF;
    }

    pattern
}

fn decode_move_wide(word: u32) -> Option<Op> {
    if bits(word, 28, 23) != 0b100101 {
        return None;
    }

    let opc = bits(word, 30, 29);
    if opc == 0b01 {
        return None; // unallocated
    }

    Some(Op::MoveWide {
        is64: sf(word),
        keep: opc == 0b11,
        invert: opc == 0b00,
        rd: rd(word),
        imm16: imm16(word),
        shift: hw(word) * 16,
    })
}

fn decode_bitfield(word: u32) -> Option<Op> {
    if bits(word, 28, 23) != 0b100110 {
        return None;
    }

    let opc = bits(word, 30, 29);
    if opc == 0b11 {
        return None; // unallocated
    }

    Some(Op::BitField {
        is64: sf(word),
        signed: opc == 0b00,
        insert: opc == 0b01,
        rd: rd(word),
        rn: rn(word),
        immr: immr(word),
        imms: imms(word),
    })
}

fn decode_pc_rel(word: u32) -> Option<Op> {
    if bits(word, 28, 24) != 0b10000 {
        return None;
    }

    Some(Op::PcRelAddr {
        page: bit(word, 31),
        rd: rd(word),
        imm: if bit(word, 31) { adr_imm(word) * 4096 } else { adr_imm(word) },
    })
}

fn decode_branch(word: u32) -> Option<Op> {
    // Unconditional branch (immediate): 30-26 == 0b00101.
    if bits(word, 30, 26) == 0b00101 {
        return Some(Op::Branch { link: bit(word, 31), offset: imm26(word) });
    }

    // Unconditional branch (register): BR/BLR/RET.
    if bits(word, 31, 25) == 0b1101011 && bits(word, 20, 16) == 0b11111 {
        let op = bits(word, 22, 21);
        return match op {
            0b00 => Some(Op::BranchRegister { link: false, is_return: false, rn: rn(word) }),
            0b01 => Some(Op::BranchRegister { link: true, is_return: false, rn: rn(word) }),
            0b10 => Some(Op::BranchRegister { link: false, is_return: true, rn: rn(word) }),
            _ => None,
        };
    }

    // Conditional branch (immediate): 31-24 == 0b01010100, bit4 == 0.
    if bits(word, 31, 24) == 0b0101_0100 && !bit(word, 4) {
        return Some(Op::BranchConditional {
            cond: Cond::from_bits(cond(word)),
            offset: imm19(word),
        });
    }

    // Compare and branch: 30-25 == 0b011010.
    if bits(word, 30, 25) == 0b011010 {
        return Some(Op::CompareAndBranch {
            is64: sf(word),
            branch_if_nonzero: bit(word, 24),
            rt: rt(word),
            offset: imm19(word),
        });
    }

    // Test and branch: 30-25 == 0b011011.
    if bits(word, 30, 25) == 0b011011 {
        return Some(Op::TestAndBranch {
            branch_if_set: bit(word, 24),
            bit: tbz_bit_pos(word),
            rt: rt(word),
            offset: imm14(word),
        });
    }

    None
}

fn decode_system(word: u32) -> Option<Op> {
    if bits(word, 31, 21) != 0b1101_0100_000 {
        return None;
    }

    let low5 = bits(word, 4, 0);
    let kind = match low5 {
        0b00001 => SystemOp::Svc,
        0b00000 => SystemOp::Brk,
        0b00010 => SystemOp::Hlt,
        _ => return None,
    };

    Some(Op::System { kind, imm16: imm16(word) })
}

fn decode_load_store(word: u32) -> Option<Op> {
    let is_vector = bit(word, 26);
    if is_vector {
        return None; // SIMD&FP load/store handled by decode_vector.
    }

    // LDP/STP: 29-27 == 0b101, 26 == 0, 25-23 (op2) selects the
    // addressing mode directly -- 001 post-index, 010 signed offset
    // (no writeback), 011 pre-index. op2 isn't a fixed prefix with a
    // nested 2-bit sub-field; it IS the mode selector.
    if bits(word, 29, 27) == 0b101 {
        let op2 = bits(word, 25, 23);
        let mode = match op2 {
            0b001 => AddrMode::PostIndex,
            0b011 => AddrMode::PreIndex,
            0b010 => AddrMode::UnsignedOffset,
            _ => return None,
        };

        let opc = bits(word, 31, 30);
        if opc == 0b11 {
            return None;
        }

        let is64 = opc == 0b10;
        let scale = if is64 { 8 } else { 4 };

        return Some(Op::LoadStorePair {
            is64,
            is_load: bit(word, 22),
            mode,
            rt: rt(word),
            rt2: rt2(word),
            rn: rn(word),
            offset: imm7(word) * scale,
        });
    }

    // Load/store register (unsigned immediate): 29-24 == 0b111001.
    if bits(word, 29, 24) == 0b111001 {
        let size = bits(word, 31, 30);
        let opc = bits(word, 23, 22);
        let (access, is_load, sign_extend_to_64) = classify_ldst_opc(size, opc)?;
        return Some(Op::LoadStore {
            size: access,
            is_load,
            sign_extend_to_64,
            acquire_release: false,
            mode: AddrMode::UnsignedOffset,
            rt: rt(word),
            rn: rn(word),
            offset: i64::from(imm12_unsigned(word) * access.bytes()),
        });
    }

    // Load/store register (unscaled / pre/post-index, register offset):
    // 29-24 == 0b111000, bit21 == 0.
    if bits(word, 29, 24) == 0b111000 && !bit(word, 21) {
        let size = bits(word, 31, 30);
        let opc = bits(word, 23, 22);
        let (access, is_load, sign_extend_to_64) = classify_ldst_opc(size, opc)?;
        let sub_op = bits(word, 11, 10);
        let mode = match sub_op {
            0b01 => AddrMode::PostIndex,
            0b11 => AddrMode::PreIndex,
            _ => AddrMode::Unscaled,
        };

        return Some(Op::LoadStore {
            size: access,
            is_load,
            sign_extend_to_64,
            acquire_release: false,
            mode,
            rt: rt(word),
            rn: rn(word),
            offset: imm9(word),
        });
    }

    // Atomic LDAR/STLR, no offset: 29-24 == 0b001000, bit23 == 1, bit21 == 1,
    // 20-16 == 0b11111, 14-10 == 0b11111.
    if bits(word, 29, 24) == 0b001000
        && bit(word, 23)
        && bit(word, 21)
        && bits(word, 20, 16) == 0b11111
        && bits(word, 14, 10) == 0b11111
    {
        let size = bits(word, 31, 30);
        let access = match size {
            0b00 => AccessSize::Byte,
            0b01 => AccessSize::Half,
            0b10 => AccessSize::Word,
            _ => AccessSize::Double,
        };

        return Some(Op::LoadStore {
            size: access,
            is_load: bit(word, 22),
            sign_extend_to_64: None,
            acquire_release: true,
            mode: AddrMode::UnsignedOffset,
            rt: rt(word),
            rn: rn(word),
            offset: 0,
        });
    }

    None
}

fn classify_ldst_opc(size: u32, opc: u32) -> Option<(AccessSize, bool, Option<bool>)> {
    let access = match size {
        0b00 => AccessSize::Byte,
        0b01 => AccessSize::Half,
        0b10 => AccessSize::Word,
        _ => AccessSize::Double,
    };

    match (size, opc) {
        (_, 0b00) => Some((access, false, None)), // store
        (_, 0b01) => Some((access, true, None)),  // load, zero-extended
        (0b10 | 0b11, 0b10) if size == 0b10 => Some((access, true, Some(false))), // LDRSW
        (0b00 | 0b01, 0b10) => Some((access, true, Some(true))), // load, sign-extend to 64
        (0b00 | 0b01, 0b11) => Some((access, true, Some(false))), // load, sign-extend to 32
        _ => None,
    }
}

fn decode_fp_scalar(word: u32) -> Option<Op> {
    if bits(word, 28, 25) != 0b1111 || !bit(word, 21) {
        return None;
    }

    let precision = match bits(word, 23, 22) {
        0b00 => FpPrecision::Single,
        0b01 => FpPrecision::Double,
        _ => return None,
    };

    // FP immediate move is distinguished from the 2-source/compare/1-source
    // groups sharing this prefix purely by bit 24; check it first since it
    // is otherwise the most specific pattern in this family.
    if bit(word, 24) {
        return Some(Op::FpScalar {
            op: FpOp::Mov,
            precision,
            cond: None,
            rd: rd(word),
            rn: 0,
            rm: 0,
            ra: 0,
        });
    }

    // Conversion between floating-point and integer: bits 15-10 == 0,
    // shared prefix with the 1-source/compare groups below but checked
    // first since its fixed field (15-10, six zero bits) is the most
    // specific -- the 1-source group's own fixed field occupies bit 14
    // of that same span (`0b10000`, not all-zero).
    if bits(word, 15, 10) == 0b000000 {
        let rmode = bits(word, 20, 19);
        let opcode = bits(word, 18, 16);
        let (to_float, signed) = match (rmode, opcode) {
            (0b00, 0b010) => (true, true),   // SCVTF
            (0b00, 0b011) => (true, false),  // UCVTF
            (0b11, 0b000) => (false, true),  // FCVTZS
            (0b11, 0b001) => (false, false), // FCVTZU
            _ => return None,
        };

        return Some(Op::FpIntConvert { to_float, signed, is64: bit(word, 31), precision, rd: rd(word), rn: rn(word) });
    }

    // FP compare: bits 15-14 == 0b00, check before the 2-source/fcsel/
    // 1-source groups below since its fixed-field span (15-14 plus 4-0)
    // is the most specific.
    if bits(word, 15, 14) == 0b00 && matches!(bits(word, 4, 0), 0b00000 | 0b01000) {
        return Some(Op::FpScalar {
            op: FpOp::Cmp,
            precision,
            cond: None,
            rd: 0,
            rn: rn(word),
            rm: rm(word),
            ra: 0,
        });
    }

    // FCSEL: bits 11-10 == 0b11.
    if bits(word, 11, 10) == 0b11 {
        return Some(Op::FpScalar {
            op: FpOp::CondSelect,
            precision,
            cond: Some(Cond::from_bits(bits(word, 15, 12) as u8)),
            rd: rd(word),
            rn: rn(word),
            rm: rm(word),
            ra: 0,
        });
    }

    // 2-source: bits 11-10 == 0b10.
    if bits(word, 11, 10) == 0b10 {
        let op = match bits(word, 15, 12) {
            0b0000 => FpOp::Mul,
            0b0001 => FpOp::Div,
            0b0010 => FpOp::Add,
            0b0011 => FpOp::Sub,
            0b0100 => FpOp::Max,
            0b0101 => FpOp::Min,
            _ => return None,
        };

        return Some(Op::FpScalar { op, precision, cond: None, rd: rd(word), rn: rn(word), rm: rm(word), ra: 0 });
    }

    // 1-source: bits 14-10 == 0b10000 (distinct from the int-convert
    // group above, whose same-span fixed field is all-zero).
    if bits(word, 14, 10) == 0b10000 {
        let op = match bits(word, 20, 15) {
            0b000000 => FpOp::Mov,
            0b000001 => FpOp::Abs,
            0b000010 => FpOp::Neg,
            0b000011 => FpOp::Sqrt,
            0b000100 | 0b000101 => FpOp::Convert,
            0b001000..=0b001111 => FpOp::RoundToIntegral,
            _ => return None,
        };

        return Some(Op::FpScalar { op, precision, cond: None, rd: rd(word), rn: rn(word), rm: 0, ra: 0 });
    }

    None
}

fn decode_fp_fused(word: u32) -> Option<Op> {
    // Floating-point data-processing (3 source): 28-24 == 0b11111.
    if bits(word, 28, 24) != 0b11111 {
        return None;
    }

    let precision = match bits(word, 23, 22) {
        0b00 => FpPrecision::Single,
        0b01 => FpPrecision::Double,
        _ => return None,
    };

    Some(Op::FpScalar {
        op: FpOp::FusedMulAdd { negate_product: bit(word, 15), negate_addend: bit(word, 21) },
        precision,
        cond: None,
        rd: rd(word),
        rn: rn(word),
        rm: rm(word),
        ra: ra(word),
    })
}

fn decode_vector(word: u32) -> Option<Op> {
    let full128 = q_bit(word);

    // Advanced SIMD load/store multiple structures, no offset: 29-25 == 0b00110,
    // 24-23 == 0b00. `opcode` (bits 15-12) selects register count and whether
    // the registers carry interleaved structures (LD2-4/ST2-4) or plain
    // consecutive single-element transfers (LD1/ST1 with 1-4 registers).
    if bits(word, 29, 25) == 0b00110 && bits(word, 24, 23) == 0b00 {
        let lane = match bits(word, 11, 10) {
            0b00 => LaneSize::B8,
            0b01 => LaneSize::H16,
            0b10 => LaneSize::S32,
            _ => LaneSize::D64,
        };

        let (reg_count, interleaved) = match bits(word, 15, 12) {
            0b0000 => (4, true),  // LD4/ST4
            0b0010 => (4, false), // LD1/ST1, 4 registers
            0b0100 => (3, true),  // LD3/ST3
            0b0110 => (3, false), // LD1/ST1, 3 registers
            0b0111 => (1, false), // LD1/ST1, 1 register
            0b1000 => (2, true),  // LD2/ST2
            0b1010 => (2, false), // LD1/ST1, 2 registers
            _ => return None,
        };

        return Some(Op::VectorLoadStore {
            is_load: bit(word, 22),
            lane,
            full128,
            reg_count,
            interleaved,
            rt: rt(word),
            rn: rn(word),
        });
    }

    // DUP (general): 28-21 == 0b0_0001110_0, element size in imm5.
    if bits(word, 28, 21) == 0b00011100 && bits(word, 15, 10) == 0b000011 {
        let (lane, _) = lane_from_imm5(bits(word, 20, 16));
        return Some(Op::VectorDup { lane, full128, rd: rd(word), rn: rn(word), from_gpr: true, index: 0 });
    }

    // DUP (element): 28-21 == 0b0_0001110_0, bits 15-10 == 0b000001.
    if bits(word, 28, 21) == 0b00011100 && bits(word, 15, 10) == 0b000001 {
        let (lane, index) = lane_from_imm5(bits(word, 20, 16));
        return Some(Op::VectorDup { lane, full128, rd: rd(word), rn: rn(word), from_gpr: false, index });
    }

    // UMOV/SMOV: 28-21 == 0b0_0001110_0, bits 15-10 in {0b001111 (umov), 0b001011 (smov)}.
    if bits(word, 28, 21) == 0b00011100 && matches!(bits(word, 15, 10), 0b001111 | 0b001011) {
        let (lane, index) = lane_from_imm5(bits(word, 20, 16));
        let signed = bits(word, 15, 10) == 0b001011;
        return Some(Op::VectorExtract { lane, signed, rd: rd(word), rn: rn(word), index });
    }

    // TBL/TBX: 29-21 == 0b001110_00_0 (op2 == 00, bit 21 == 0), bits 15-13
    // len field, bit 12 picks TBL (0, zero out-of-range lanes) vs TBX (1,
    // preserve them).
    if bits(word, 29, 21) == 0b001_110_00_0 && bits(word, 11, 10) == 0b00 {
        return Some(Op::VectorTableLookup {
            full128,
            extends: bit(word, 12),
            rd: rd(word),
            rn: rn(word),
            rm: rm(word),
            len: (bits(word, 14, 13) + 1) as u8,
        });
    }

    // EXT: 29-24 == 0b101110, 23-22 == 0b00, bit21 == 0, bit15 == 0,
    // bit10 == 0. Checked ahead of three-same below since three-same's own
    // guard (28-24 == 0b01110) only pins bits 28-24, not bit21 -- EXT's
    // bit21 == 0 would otherwise fall through into that match with
    // `opcode = bits(15,11)` taken from EXT's imm4 field and could
    // coincidentally land on one of its opcodes.
    if bits(word, 29, 24) == 0b101110 && bits(word, 23, 22) == 0b00 && !bit(word, 21) && !bit(word, 15) && !bit(word, 10) {
        return Some(Op::VectorExt {
            full128,
            rd: rd(word),
            rn: rn(word),
            rm: rm(word),
            index: bits(word, 14, 11) as u8,
        });
    }

    // Three-same (ADD/SUB/MUL, FADD/FSUB/FMUL, logical, min/max, compares):
    // 28-24 == 0b01110.
    if bits(word, 28, 24) == 0b01110 {
        let u = bit(word, 29);
        let size = bits(word, 23, 22);
        let opcode = bits(word, 15, 11);
        let (lane, op) = match opcode {
            0b10000 if !u => (lane_from_size(size), VectorOp::Add),
            0b10000 if u => (lane_from_size(size), VectorOp::Sub),
            0b10011 if !u => (lane_from_size(size), VectorOp::Mul),
            0b11010 if !u => (fp_lane_from_size(size)?, VectorOp::FAdd),
            0b11010 if u => (fp_lane_from_size(size)?, VectorOp::FSub),
            0b11011 if !u => (fp_lane_from_size(size)?, VectorOp::FMul),
            // Logical (whole-register, size picks AND/BIC/ORR/EOR rather
            // than a lane width): AND/ORR/EOR always decode; ORN/BSL/
            // BIT/BIF (size 11 / U=1 size 01,10) aren't in scope.
            0b00011 if !u && size == 0b00 => (LaneSize::B8, VectorOp::And),
            0b00011 if !u && size == 0b01 => (LaneSize::B8, VectorOp::Bic),
            0b00011 if !u && size == 0b10 => (LaneSize::B8, VectorOp::Orr),
            0b00011 if u && size == 0b00 => (LaneSize::B8, VectorOp::Eor),
            // SMAX/SMIN/UMAX/UMIN, lanewise.
            0b01100 => (lane_from_size(size), VectorOp::Max { signed: !u }),
            0b01101 => (lane_from_size(size), VectorOp::Min { signed: !u }),
            // CMGT/CMHI, lanewise signed/unsigned greater-than.
            0b00110 => (lane_from_size(size), VectorOp::CmpGt { signed: !u }),
            // CMEQ (register form); CMTST (U=0) isn't in scope.
            0b10001 if u => (lane_from_size(size), VectorOp::CmpEq),
            _ => return None,
        };

        return Some(Op::VectorAluOp { op, lane, full128, rd: rd(word), rn: rn(word), rm: rm(word), shift: 0 });
    }

    // Shift by immediate (SHL/USHR/SSHR): 28-23 == 0b0_011110, opcode bits 15-11.
    if bits(word, 28, 23) == 0b0111101 {
        let u = bit(word, 29);
        let opcode = bits(word, 15, 11);
        let immh = bits(word, 22, 19);
        let immb = bits(word, 18, 16);
        let lane = lane_from_immh(immh)?;
        let esize = lane_bits(lane);
        match opcode {
            0b01010 => {
                let shift = (immh << 3 | immb) - esize;
                Some(Op::VectorAluOp { op: VectorOp::Shl, lane, full128, rd: rd(word), rn: rn(word), rm: 0, shift })
            }
            0b00000 if u => {
                let shift = 2 * esize - (immh << 3 | immb);
                Some(Op::VectorAluOp { op: VectorOp::Ushr, lane, full128, rd: rd(word), rn: rn(word), rm: 0, shift })
            }
            0b00000 => {
                let shift = 2 * esize - (immh << 3 | immb);
                Some(Op::VectorAluOp { op: VectorOp::Sshr, lane, full128, rd: rd(word), rn: rn(word), rm: 0, shift })
            }
            _ => None,
        }
    } else {
        None
    }
}

fn lane_from_size(size: u32) -> LaneSize {
    match size {
        0b00 => LaneSize::B8,
        0b01 => LaneSize::H16,
        0b10 => LaneSize::S32,
        _ => LaneSize::D64,
    }
}

fn fp_lane_from_size(size: u32) -> Option<LaneSize> {
    match size {
        0b00 => Some(LaneSize::S32),
        0b01 => Some(LaneSize::D64),
        _ => None,
    }
}

fn lane_from_immh(immh: u32) -> Option<LaneSize> {
    match immh {
        0b0001 => Some(LaneSize::B8),
        0b0010 | 0b0011 => Some(LaneSize::H16),
        0b0100..=0b0111 => Some(LaneSize::S32),
        0b1000..=0b1111 => Some(LaneSize::D64),
        _ => None,
    }
}

fn lane_bits(lane: LaneSize) -> u32 {
    match lane {
        LaneSize::B8 => 8,
        LaneSize::H16 => 16,
        LaneSize::S32 => 32,
        LaneSize::D64 => 64,
    }
}

fn lane_from_imm5(imm5: u32) -> (LaneSize, u32) {
    if imm5 & 1 != 0 {
        (LaneSize::B8, imm5 >> 1)
    } else if imm5 & 0b10 != 0 {
        (LaneSize::H16, imm5 >> 2)
    } else if imm5 & 0b100 != 0 {
        (LaneSize::S32, imm5 >> 3)
    } else {
        (LaneSize::D64, imm5 >> 4)
    }
}

/// Classifies and fully decodes one 32-bit A64 instruction word.
///
/// Classes are tried in this fixed order, matching the dispatcher's
/// documented order: ALU-register, ALU-immediate, move-wide,
/// bit-field, load/store (scalar + pair), PC-relative, branches,
/// system, FP-scalar (including the fused-multiply-add group), then
/// vector/SIMD. Compare/test is not a separate pass -- it's recognized
/// inside the ALU passes by the `set_flags && rd == XZR` pattern, same
/// as the architecture treats CMP/CMN/TST as aliases. The first class
/// whose fixed bits match wins; no class here is reachable by a word
/// that an earlier class also accepts, except where a comment
/// documents the deliberate tie-break (see `decode_fp_scalar`).
pub fn decode(word: u32) -> Result<Op, DecodeError> {
    if word == 0 {
        return Err(DecodeError::Undefined { word });
    }

    decode_alu_register(word)
        .or_else(|| decode_alu_immediate(word))
        .or_else(|| decode_move_wide(word))
        .or_else(|| decode_bitfield(word))
        .or_else(|| decode_load_store(word))
        .or_else(|| decode_pc_rel(word))
        .or_else(|| decode_branch(word))
        .or_else(|| decode_system(word))
        .or_else(|| decode_fp_fused(word))
        .or_else(|| decode_fp_scalar(word))
        .or_else(|| decode_vector(word))
        .ok_or(DecodeError::Unknown { word })
}

/// `true` for any instruction that ends a translated block: every
/// branch form, plus the system instructions that hand control back to
/// the launcher.
pub fn is_block_terminator(op: &Op) -> bool {
    matches!(
        op,
        Op::Branch { .. }
            | Op::BranchRegister { .. }
            | Op::BranchConditional { .. }
            | Op::CompareAndBranch { .. }
            | Op::TestAndBranch { .. }
            | Op::System { .. }
    )
}

/// Every A64 instruction is 4 bytes; this accessor exists so translators
/// never hardcode the constant and so a future variable-length decode
/// extension (none planned) would only need to change one place.
pub const fn instruction_length(_op: &Op) -> u32 {
    4
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_add_register() {
        // ADD W0, W1, W2
        let op = decode(0x0b02_0020).unwrap();
        assert!(matches!(
            op,
            Op::Alu { op: AluOp::Add, is64: false, rd: 0, rn: 1, rm_or_imm: RegOrImm::Reg(2), .. }
        ));
    }

    #[test]
    fn decodes_subs_to_compare_when_rd_is_zero() {
        // SUBS XZR, X0, X1  (CMP X0, X1)
        let op = decode(0xeb01_001f).unwrap();
        assert!(matches!(
            op,
            Op::CompareTest { op: AluOp::Sub, is64: true, rn: 0, rm_or_imm: RegOrImm::Reg(1) }
        ));
    }

    #[test]
    fn decodes_madd_threading_the_accumulator() {
        // MADD X0, X1, X2, X3
        let op = decode(0x9b02_0c20).unwrap();
        assert!(matches!(
            op,
            Op::Alu { op: AluOp::Mul { negate: false }, is64: true, rd: 0, rn: 1, rm_or_imm: RegOrImm::Reg(2), ra: 3, .. }
        ));
    }

    #[test]
    fn decodes_msub_as_the_negated_form() {
        // MSUB X0, X1, X2, X3
        let op = decode(0x9b02_8c20).unwrap();
        assert!(matches!(
            op,
            Op::Alu { op: AluOp::Mul { negate: true }, is64: true, rd: 0, rn: 1, rm_or_imm: RegOrImm::Reg(2), ra: 3, .. }
        ));
    }

    #[test]
    fn decodes_ld1_single_structure_one_register() {
        // LD1 {V0.16B}, [X1]
        let op = decode(0x4c40_7020).unwrap();
        assert!(matches!(
            op,
            Op::VectorLoadStore { is_load: true, full128: true, reg_count: 1, interleaved: false, rt: 0, rn: 1, .. }
        ));
    }

    #[test]
    fn decodes_ld2_two_register_interleaved() {
        // LD2 {V0.16B, V1.16B}, [X1]
        let op = decode(0x4c40_8020).unwrap();
        assert!(matches!(
            op,
            Op::VectorLoadStore { is_load: true, full128: true, reg_count: 2, interleaved: true, rt: 0, rn: 1, .. }
        ));
    }

    #[test]
    fn decodes_ext() {
        // EXT V0.16B, V1.16B, V2.16B, #3
        let op = decode(0x6e02_1820).unwrap();
        assert!(matches!(op, Op::VectorExt { full128: true, rd: 0, rn: 1, rm: 2, index: 3 }));
    }

    #[test]
    fn decodes_movz() {
        // MOVZ X0, #0x1234
        let op = decode(0xd282_4680).unwrap();
        assert!(matches!(
            op,
            Op::MoveWide { is64: true, keep: false, invert: false, rd: 0, imm16: 0x1234, shift: 0 }
        ));
    }

    #[test]
    fn decodes_unconditional_branch_with_link() {
        // BL #0x100 (relative)
        let op = decode(0x9400_0040).unwrap();
        assert!(matches!(op, Op::Branch { link: true, offset: 0x100 }));
    }

    #[test]
    fn decodes_ret() {
        // RET X30
        let op = decode(0xd65f_03c0).unwrap();
        assert!(matches!(op, Op::BranchRegister { link: false, is_return: true, rn: 30 }));
    }

    #[test]
    fn every_branch_form_terminates_a_block() {
        let op = decode(0x9400_0040).unwrap();
        assert!(is_block_terminator(&op));
    }

    #[test]
    fn zero_word_is_undefined() {
        assert_eq!(decode(0), Err(DecodeError::Undefined { word: 0 }));
    }
}
