//! Routes one decoded instruction to its per-class translator.
//!
//! The dispatch order here is purely a match over [`guestisa::Op`]'s
//! already-classified variants -- the decoder resolves every
//! encoding-overlap ambiguity up front (ALU-register before
//! ALU-immediate, move-wide before bit-field, and so on), so this
//! function never has to re-litigate that order; it only has to route.

use guestisa::Op;

use crate::builder::util::{BlockBuilder, EmitError};
use crate::builder::{alu, bitfield, branch, comparetest, fpscalar, loadstore, movewide, pcrel, system, vector};

pub fn translate_one(b: &mut BlockBuilder, guest_pc: u64, op: Op) -> Result<(), EmitError> {
    match op {
        Op::Alu { op, is64, set_flags, rd, rn, rm_or_imm, ra } => alu::translate(b, guest_pc, op, is64, set_flags, rd, rn, rm_or_imm, ra),
        Op::MoveWide { is64, keep, invert, rd, imm16, shift } => movewide::translate(b, is64, keep, invert, rd, imm16, shift),
        Op::BitField { is64, signed, insert, rd, rn, immr, imms } => bitfield::translate(b, is64, signed, insert, rd, rn, immr, imms),
        Op::CompareTest { op, is64, rn, rm_or_imm } => comparetest::translate(b, op, is64, rn, rm_or_imm),
        Op::LoadStore { size, is_load, sign_extend_to_64, acquire_release, mode, rt, rn, offset } => {
            loadstore::translate(b, size, is_load, sign_extend_to_64, acquire_release, mode, rt, rn, offset)
        }
        Op::LoadStorePair { is64, is_load, mode, rt, rt2, rn, offset } => {
            loadstore::translate_pair(b, is64, is_load, mode, rt, rt2, rn, offset)
        }
        Op::PcRelAddr { page, rd, imm } => pcrel::translate(b, guest_pc, page, rd, imm),
        Op::Branch { link, offset } => branch::translate_branch(b, guest_pc, link, offset),
        Op::BranchRegister { link, is_return, rn } => branch::translate_branch_register(b, guest_pc, link, is_return, rn),
        Op::BranchConditional { cond, offset } => branch::translate_conditional(b, guest_pc, cond, offset),
        Op::CompareAndBranch { is64, branch_if_nonzero, rt, offset } => {
            branch::translate_compare_and_branch(b, guest_pc, is64, branch_if_nonzero, rt, offset)
        }
        Op::TestAndBranch { branch_if_set, bit, rt, offset } => branch::translate_test_and_branch(b, guest_pc, branch_if_set, bit, rt, offset),
        Op::System { kind, imm16 } => system::translate(b, guest_pc, kind, imm16),
        Op::FpScalar { op, precision, cond, rd, rn, rm, ra } => fpscalar::translate(b, op, precision, cond, rd, rn, rm, ra),
        Op::FpIntConvert { to_float, signed, is64, precision, rd, rn } => {
            fpscalar::translate_int_convert(b, to_float, signed, is64, precision, rd, rn)
        }
        Op::VectorAluOp { op, lane, full128, rd, rn, rm, shift } => vector::translate_alu(b, op, lane, full128, rd, rn, rm, shift),
        Op::VectorLoadStore { is_load, lane, full128, reg_count, interleaved, rt, rn } => {
            vector::translate_load_store(b, is_load, lane, full128, reg_count, interleaved, rt, rn)
        }
        Op::VectorDup { lane, full128, rd, rn, from_gpr, index } => vector::translate_dup(b, lane, full128, rd, rn, from_gpr, index),
        Op::VectorExtract { lane, signed, rd, rn, index } => vector::translate_extract(b, lane, signed, rd, rn, index),
        Op::VectorTableLookup { full128, extends, rd, rn, rm, len } => vector::translate_table_lookup(b, full128, extends, rd, rn, rm, len),
        Op::VectorExt { full128, rd, rn, rm, index } => vector::translate_ext(b, full128, rd, rn, rm, index),
    }
}
