//! Shared plumbing for the per-class translators: the block builder
//! itself, register-state load/store helpers, and the handful of
//! scratch host registers every translator is free to clobber.
//!
//! Unlike a register-allocating JIT, this builder never keeps a guest
//! value live in a host register across instruction boundaries -- each
//! per-class translator loads whatever operands it needs from
//! [`cpustate::Registers`] into a scratch register, computes, and
//! stores the result straight back. That trades the performance of a
//! real allocator for a translator that's simple enough to get right
//! without ever running it, which is the constraint this project is
//! built under; see DESIGN.md.

use codebuf::CodeBuffer;
use cpustate::Registers;
use hostasm::{AluOp as HostAluOp, Condition, Reg};
use thiserror::Error;

/// General-purpose scratch registers available to every translator.
/// `STATE_PTR` (RBX) and `MEM_BASE` (R12) are pinned for the block's
/// duration and never handed out as scratch.
pub const SCRATCH: [Reg; 6] = [Reg::Rax, Reg::Rcx, Reg::Rdx, Reg::R8, Reg::R9, Reg::R10];

/// Host register pinned to the guest memory region's base address for
/// the duration of a translated block, so load/store translators can
/// address guest memory as `[MEM_BASE + guest_addr]` without a call.
pub const MEM_BASE: Reg = Reg::R12;

#[derive(Debug, Error)]
pub enum EmitError {
    #[error("instruction {op:?} is not implemented by any translator")]
    Unimplemented { op: guestisa::Op },
    #[error("host code buffer ran out of space while translating a block")]
    BufferExhausted,
}

/// Builds one translated block's host code into a [`CodeBuffer`].
///
/// Entered with the guest [`Registers`] pointer in RDI and the guest
/// memory base in RSI, per the System V calling convention; the
/// prologue moves both into the pinned registers above before any
/// per-instruction translator runs.
pub struct BlockBuilder {
    pub(crate) buf: CodeBuffer,
    /// Host offset of each not-yet-resolved branch's displacement,
    /// paired with the guest PC it targets. The block translator
    /// patches or chains these once every instruction in the block has
    /// been emitted.
    pub(crate) pending_branches: Vec<(codebuf::Offset, u64, BranchKind)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    /// `inst_len` is 6 for this site's displacement (`0F 8x` + `imm32`).
    Conditional,
    /// `inst_len` is 5 for this site's displacement (`E9`/`E8` + `imm32`).
    Unconditional,
}

impl BranchKind {
    pub fn inst_len(self) -> u32 {
        match self {
            BranchKind::Conditional => 6,
            BranchKind::Unconditional => 5,
        }
    }
}

impl BlockBuilder {
    pub fn new(capacity: usize) -> Self {
        let mut buf = CodeBuffer::new(capacity);
        hostasm::push_reg(&mut buf, hostasm::STATE_PTR);
        hostasm::push_reg(&mut buf, MEM_BASE);
        hostasm::mov_reg_reg(&mut buf, hostasm::STATE_PTR, Reg::Rdi, true);
        hostasm::mov_reg_reg(&mut buf, MEM_BASE, Reg::Rsi, true);

        Self { buf, pending_branches: Vec::new() }
    }

    #[inline]
    pub fn buf(&mut self) -> &mut CodeBuffer {
        &mut self.buf
    }

    /// Loads guest general-purpose register `index` into `host`,
    /// honoring zero-register semantics (index 31 loads as zero).
    pub fn load_gpr(&mut self, host: Reg, index: u8) {
        if index == cpustate::ZERO_REGISTER {
            hostasm::zero_reg(&mut self.buf, host, true);
            return;
        }

        hostasm::load_mem(&mut self.buf, host, hostasm::STATE_PTR, Registers::gpr_offset(index) as i32, true);
    }

    /// Stores `host` into guest general-purpose register `index`; a
    /// write to index 31 is silently discarded.
    pub fn store_gpr(&mut self, index: u8, host: Reg) {
        if index == cpustate::ZERO_REGISTER {
            return;
        }

        hostasm::store_mem(&mut self.buf, hostasm::STATE_PTR, Registers::gpr_offset(index) as i32, host, true);
    }

    pub fn load_sp(&mut self, host: Reg) {
        hostasm::load_mem(&mut self.buf, host, hostasm::STATE_PTR, Registers::sp_offset() as i32, true);
    }

    pub fn store_sp(&mut self, host: Reg) {
        hostasm::store_mem(&mut self.buf, hostasm::STATE_PTR, Registers::sp_offset() as i32, host, true);
    }

    pub fn load_vector_low(&mut self, host: hostasm::Xmm, index: u8) {
        hostasm::load_scalar_double(&mut self.buf, host, hostasm::STATE_PTR, Registers::vector_offset(index) as i32);
    }

    /// Stores a 64-bit scalar FP result into vector register `index`,
    /// zeroing the high 64 bits as every scalar write architecturally
    /// must.
    pub fn store_vector_low(&mut self, index: u8, host: hostasm::Xmm) {
        hostasm::store_scalar_double(&mut self.buf, hostasm::STATE_PTR, Registers::vector_offset(index) as i32, host);
        self.zero_vector_high(index);
    }

    pub fn load_vector_low_single(&mut self, host: hostasm::Xmm, index: u8) {
        hostasm::load_scalar_single(&mut self.buf, host, hostasm::STATE_PTR, Registers::vector_offset(index) as i32);
    }

    /// Stores a 32-bit scalar FP result, zeroing the rest of the low
    /// 64 bits and the whole high 64 bits.
    pub fn store_vector_low_single(&mut self, index: u8, host: hostasm::Xmm) {
        hostasm::store_scalar_single(&mut self.buf, hostasm::STATE_PTR, Registers::vector_offset(index) as i32, host);
        let scratch = SCRATCH[3];
        hostasm::mov_reg_imm32(&mut self.buf, scratch, 0, true);
        hostasm::store_mem(&mut self.buf, hostasm::STATE_PTR, Registers::vector_offset(index) as i32 + 4, scratch, false);
        self.zero_vector_high(index);
    }

    fn zero_vector_high(&mut self, index: u8) {
        let scratch = SCRATCH[3];
        hostasm::mov_reg_imm64(&mut self.buf, scratch, 0);
        hostasm::store_mem(&mut self.buf, hostasm::STATE_PTR, Registers::vector_offset(index) as i32 + 8, scratch, true);
    }

    pub fn load_vector_full(&mut self, host: hostasm::Xmm, index: u8) {
        hostasm::movdqu_load(&mut self.buf, host, hostasm::STATE_PTR, Registers::vector_offset(index) as i32);
    }

    pub fn store_vector_full(&mut self, index: u8, host: hostasm::Xmm) {
        hostasm::movdqu_store(&mut self.buf, hostasm::STATE_PTR, Registers::vector_offset(index) as i32, host);
    }

    pub fn set_pc_immediate(&mut self, pc: u64) {
        let scratch = SCRATCH[0];
        hostasm::mov_reg_imm64(&mut self.buf, scratch, pc);
        hostasm::store_mem(&mut self.buf, hostasm::STATE_PTR, Registers::pc_offset() as i32, scratch, true);
    }

    pub fn set_pc_from_reg(&mut self, host: Reg) {
        hostasm::store_mem(&mut self.buf, hostasm::STATE_PTR, Registers::pc_offset() as i32, host, true);
    }

    pub fn load_flags_byte(&mut self, host: Reg) {
        hostasm::load_mem_zx(&mut self.buf, host, hostasm::STATE_PTR, Registers::flags_offset() as i32, 1, true);
    }

    pub fn store_flags_byte(&mut self, host: Reg) {
        // Flags is a packed 4-bit bitos struct, one byte wide; only the
        // low byte of `host` is written so the store can't clobber
        // whatever field follows it in `Registers`.
        hostasm::store_mem_u8(&mut self.buf, hostasm::STATE_PTR, Registers::flags_offset() as i32, host);
    }

    /// Returns to the dispatcher with `reason` in EAX, after storing
    /// the guest PC of whatever comes next via a prior
    /// `set_pc_immediate`/`set_pc_from_reg` call.
    pub fn epilogue(&mut self, reason: u32) {
        hostasm::mov_reg_imm32(&mut self.buf, Reg::Rax, reason, false);
        hostasm::pop_reg(&mut self.buf, MEM_BASE);
        hostasm::pop_reg(&mut self.buf, hostasm::STATE_PTR);
        hostasm::ret(&mut self.buf);
    }

    pub fn alu_reg_reg(&mut self, op: HostAluOp, dst: Reg, src: Reg, is64: bool) {
        hostasm::alu_reg_reg(&mut self.buf, op, dst, src, is64);
    }

    pub fn load_fpcr(&mut self, host: Reg) {
        hostasm::load_mem(&mut self.buf, host, hostasm::STATE_PTR, Registers::fpcr_offset() as i32, false);
    }

    pub fn store_fpcr(&mut self, host: Reg) {
        hostasm::store_mem(&mut self.buf, hostasm::STATE_PTR, Registers::fpcr_offset() as i32, host, false);
    }

    pub fn load_fpsr(&mut self, host: Reg) {
        hostasm::load_mem(&mut self.buf, host, hostasm::STATE_PTR, Registers::fpsr_offset() as i32, false);
    }

    pub fn store_fpsr(&mut self, host: Reg) {
        hostasm::store_mem(&mut self.buf, hostasm::STATE_PTR, Registers::fpsr_offset() as i32, host, false);
    }

    /// Packs four host condition tests -- read immediately, before any
    /// of the temp-zeroing `mov`s below could disturb EFLAGS -- into the
    /// guest flags byte. `c`/`v` of `None` clear that bit (the `TST`
    /// form defines only N/Z). Must be called with EFLAGS still holding
    /// the result of the host arithmetic instruction the caller just
    /// emitted.
    pub fn store_flags_from_host(&mut self, n: Option<Condition>, z: Option<Condition>, c: Option<Condition>, v: Option<Condition>) {
        let (t_n, t_z, t_c, t_v) = (SCRATCH[2], SCRATCH[3], SCRATCH[4], SCRATCH[5]);
        hostasm::mov_reg_imm32(&mut self.buf, t_n, 0, false);
        hostasm::mov_reg_imm32(&mut self.buf, t_z, 0, false);
        hostasm::mov_reg_imm32(&mut self.buf, t_c, 0, false);
        hostasm::mov_reg_imm32(&mut self.buf, t_v, 0, false);
        if let Some(n) = n {
            hostasm::setcc_reg(&mut self.buf, n, t_n);
        }
        if let Some(z) = z {
            hostasm::setcc_reg(&mut self.buf, z, t_z);
        }
        if let Some(c) = c {
            hostasm::setcc_reg(&mut self.buf, c, t_c);
        }
        if let Some(v) = v {
            hostasm::setcc_reg(&mut self.buf, v, t_v);
        }

        hostasm::shift_reg_imm8(&mut self.buf, hostasm::ShiftOp::Shl, t_n, 3, false);
        hostasm::shift_reg_imm8(&mut self.buf, hostasm::ShiftOp::Shl, t_z, 2, false);
        hostasm::shift_reg_imm8(&mut self.buf, hostasm::ShiftOp::Shl, t_c, 1, false);
        hostasm::alu_reg_reg(&mut self.buf, HostAluOp::Or, t_n, t_z, false);
        hostasm::alu_reg_reg(&mut self.buf, HostAluOp::Or, t_n, t_c, false);
        hostasm::alu_reg_reg(&mut self.buf, HostAluOp::Or, t_n, t_v, false);
        self.store_flags_byte(t_n);
    }

    /// Extracts bit `bit` of the stored flags byte into `dst` as a plain
    /// 0/1 integer.
    fn flag_bit(&mut self, dst: Reg, byte: Reg, bit: u8) {
        hostasm::mov_reg_reg(&mut self.buf, dst, byte, false);
        if bit > 0 {
            hostasm::shift_reg_imm8(&mut self.buf, hostasm::ShiftOp::Shr, dst, bit, false);
        }
        hostasm::alu_reg_imm32(&mut self.buf, HostAluOp::And, dst, 1, false);
    }

    fn invert_bool(&mut self, dst: Reg) {
        hostasm::alu_reg_imm32(&mut self.buf, HostAluOp::Xor, dst, 1, false);
    }

    /// Computes whether guest condition `cond` currently holds and
    /// materializes the boolean (0/1) into `dst`, using `FLAG_TMP` as
    /// scratch. Works directly off the flags byte persisted in guest
    /// state rather than host EFLAGS, since nothing guarantees a
    /// translated instruction ran immediately before this one -- every
    /// flag-setting translator stores its result back to memory and
    /// every condition consumer reloads it here.
    pub fn test_guest_cond(&mut self, dst: Reg, cond: guestisa::Cond) {
        use guestisa::Cond;

        if matches!(cond, Cond::Al | Cond::Nv) {
            hostasm::mov_reg_imm32(&mut self.buf, dst, 1, false);
            return;
        }

        let byte = FLAG_TMP_A;
        let tmp = FLAG_TMP_B;
        self.load_flags_byte(byte);

        match cond {
            Cond::Eq => self.flag_bit(dst, byte, 2),
            Cond::Ne => {
                self.flag_bit(dst, byte, 2);
                self.invert_bool(dst);
            }
            Cond::Cs => self.flag_bit(dst, byte, 1),
            Cond::Cc => {
                self.flag_bit(dst, byte, 1);
                self.invert_bool(dst);
            }
            Cond::Mi => self.flag_bit(dst, byte, 3),
            Cond::Pl => {
                self.flag_bit(dst, byte, 3);
                self.invert_bool(dst);
            }
            Cond::Vs => self.flag_bit(dst, byte, 0),
            Cond::Vc => {
                self.flag_bit(dst, byte, 0);
                self.invert_bool(dst);
            }
            Cond::Hi | Cond::Ls => {
                self.flag_bit(dst, byte, 1); // C
                self.flag_bit(tmp, byte, 2); // Z
                self.invert_bool(tmp); // !Z
                hostasm::alu_reg_reg(&mut self.buf, HostAluOp::And, dst, tmp, false);
                if cond == Cond::Ls {
                    self.invert_bool(dst);
                }
            }
            Cond::Ge | Cond::Lt => {
                self.flag_bit(dst, byte, 3); // N
                self.flag_bit(tmp, byte, 0); // V
                hostasm::alu_reg_reg(&mut self.buf, HostAluOp::Xor, dst, tmp, false); // N ^ V
                if cond == Cond::Ge {
                    self.invert_bool(dst); // N == V
                }
            }
            Cond::Gt | Cond::Le => {
                self.flag_bit(dst, byte, 3); // N
                self.flag_bit(tmp, byte, 0); // V
                hostasm::alu_reg_reg(&mut self.buf, HostAluOp::Xor, dst, tmp, false); // N != V
                self.flag_bit(tmp, byte, 2); // Z
                hostasm::alu_reg_reg(&mut self.buf, HostAluOp::Or, dst, tmp, false); // Z || N!=V
                if cond == Cond::Gt {
                    self.invert_bool(dst); // !Z && N==V
                }
            }
            Cond::Al | Cond::Nv => unreachable!("handled above"),
        }
    }

    /// Emits a host conditional jump testing `dst != 0` (the result of
    /// [`Self::test_guest_cond`]), targeting a guest PC the block
    /// translator resolves once every block's layout is known.
    pub fn branch_if_nonzero(&mut self, dst: Reg, target_pc: u64) {
        hostasm::test_reg_reg(&mut self.buf, dst, dst, false);
        self.jcc(Condition::NotZero, target_pc);
    }

    /// Emits a conditional jump whose target is resolved later by the
    /// block translator; returns the branch-site bookkeeping to record
    /// in `pending_branches`.
    pub fn jcc(&mut self, cond: hostasm::Condition, target_pc: u64) {
        let offset = hostasm::jcc_rel32(&mut self.buf, cond);
        self.pending_branches.push((offset, target_pc, BranchKind::Conditional));
    }

    pub fn jmp(&mut self, target_pc: u64) {
        let offset = hostasm::jmp_rel32(&mut self.buf);
        self.pending_branches.push((offset, target_pc, BranchKind::Unconditional));
    }

    /// Finishes emission and hands the buffer and unresolved branch
    /// table to the block translator, which patches each displacement
    /// once every target's host offset (in-block) or cache slot
    /// (cross-block, via chaining) is known.
    pub fn finish(self) -> (CodeBuffer, Vec<(codebuf::Offset, u64, BranchKind)>) {
        (self.buf, self.pending_branches)
    }
}

/// Fixed scratch registers for guest-condition evaluation, distinct from
/// [`SCRATCH`] so a translator computing operands into `SCRATCH` can
/// still call [`BlockBuilder::test_guest_cond`] without a clash.
const FLAG_TMP_A: Reg = Reg::R11;
const FLAG_TMP_B: Reg = Reg::R13;
