//! Walks a guest instruction stream four bytes at a time, dispatching
//! each decoded instruction to its per-class translator (see
//! [`crate::dispatch`]) and finalizing once a terminator is hit, a
//! word fails to decode, or the next word would cross into a page the
//! caller hasn't mapped.
//!
//! Follows a "load into scratch on first read, store back on finish"
//! convention: values never stay live in an SSA-like form across
//! instruction boundaries, so each translator loads from [`cpustate::Registers`]
//! into scratch host GPRs and stores back explicitly rather than
//! routing through an intermediate representation.

use thiserror::Error;

use guestisa::DecodeError;

use crate::builder::util::{BlockBuilder, EmitError};

/// Why a translated block returned control to the dispatcher.
///
/// The low 16 bits of [`BlockBuilder::epilogue`]'s reason word; `Svc`/
/// `Brk`/`Hlt` additionally carry the trap's `#imm16` in the high 16
/// bits (see [`crate::builder::system`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TerminatorKind {
    /// Unconditional or taken-conditional branch, including calls.
    Branch = 0,
    /// `RET`/`BLR` with the return-prediction hint set.
    Return = 1,
    /// Block fell through to the instruction right after a
    /// not-taken conditional branch.
    Fallthrough = 2,
    Svc = 3,
    Brk = 4,
    Hlt = 5,
    /// The word at the terminating address didn't decode to any known
    /// instruction; control returns to the dispatcher with PC left
    /// pointing at the offending word.
    Undefined = 6,
}

impl TerminatorKind {
    pub fn as_reason(self) -> u32 {
        self as u32
    }

    pub fn from_reason(reason: u32) -> Option<Self> {
        match reason & 0xffff {
            0 => Some(TerminatorKind::Branch),
            1 => Some(TerminatorKind::Return),
            2 => Some(TerminatorKind::Fallthrough),
            3 => Some(TerminatorKind::Svc),
            4 => Some(TerminatorKind::Brk),
            5 => Some(TerminatorKind::Hlt),
            6 => Some(TerminatorKind::Undefined),
            _ => None,
        }
    }
}

/// One successfully translated basic block, ready for the cache.
#[derive(Debug)]
pub struct TranslatedBlock {
    pub guest_pc: u64,
    pub host_code: Vec<u8>,
    pub guest_len: u32,
    pub host_len: u32,
    pub insn_count: u32,
    pub terminator: TerminatorKind,
    /// Host-code offsets of branches the block emitted but couldn't
    /// resolve to an in-block target, paired with the guest PC each
    /// one targets -- `blockjit`'s cache consumes this to either patch
    /// a direct chain to an already-resident block or leave it
    /// pointing at a dispatcher-return stub.
    pub unresolved_targets: Vec<(codebuf::Offset, u64)>,
}

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("block at guest pc {guest_pc:#x} translated zero instructions")]
    EmptyBlock { guest_pc: u64 },
    #[error("instruction at guest pc {guest_pc:#x} failed to decode: {source}")]
    Decode { guest_pc: u64, #[source] source: DecodeError },
    #[error(transparent)]
    Emit(#[from] EmitError),
}

/// Capacity reserved for each block's host code buffer; generous
/// enough that the common block (a handful of guest instructions,
/// each expanding to a handful of host instructions) never overflows
/// it, without needing a realloc-and-retry path.
const BLOCK_BUFFER_CAPACITY: usize = 4096;

pub struct BlockTranslator;

impl BlockTranslator {
    /// Translates guest code starting at `guest_pc`, reading raw bytes
    /// via `fetch` (so callers can supply a plain slice or a paged
    /// guest-memory view) until a terminator, a decode failure, or
    /// `fetch` reporting the next word isn't resident (the "would-fault
    /// cross-page instruction" case) ends the block.
    ///
    /// `fetch` returns `None` when the word at `pc` can't be read
    /// (unmapped or page boundary the caller hasn't resolved yet); such
    /// a fetch failure ends the block exactly like a decode failure, so
    /// the block never spans into memory its translator can't see.
    pub fn translate(guest_pc: u64, mut fetch: impl FnMut(u64) -> Option<u32>) -> Result<TranslatedBlock, TranslateError> {
        let mut builder = BlockBuilder::new(BLOCK_BUFFER_CAPACITY);
        let mut pc = guest_pc;
        let mut insn_count = 0u32;

        let terminator = loop {
            let Some(word) = fetch(pc) else {
                if insn_count == 0 {
                    return Err(TranslateError::EmptyBlock { guest_pc });
                }
                builder.set_pc_immediate(pc);
                break TerminatorKind::Undefined;
            };

            let op = match guestisa::decode(word) {
                Ok(op) => op,
                Err(guestisa::DecodeError::Undefined { .. }) => {
                    builder.set_pc_immediate(pc);
                    builder.epilogue(TerminatorKind::Brk.as_reason());
                    insn_count += 1;
                    break TerminatorKind::Brk;
                }
                Err(err) => {
                    if insn_count == 0 {
                        return Err(TranslateError::Decode { guest_pc: pc, source: err });
                    }
                    builder.set_pc_immediate(pc);
                    builder.epilogue(TerminatorKind::Undefined.as_reason());
                    break TerminatorKind::Undefined;
                }
            };

            let is_terminator = guestisa::is_block_terminator(&op);
            crate::dispatch::translate_one(&mut builder, pc, op)?;
            insn_count += 1;
            pc = pc.wrapping_add(guestisa::instruction_length(&op) as u64);

            if is_terminator {
                break terminator_kind_for(&op);
            }
        };

        let guest_len = (pc - guest_pc) as u32;
        let (buf, pending) = builder.finish();
        if !buf.ok() {
            return Err(TranslateError::Emit(EmitError::BufferExhausted));
        }

        let host_len = buf.current_offset() as u32;
        let host_code = buf.finalize().map_err(|_| TranslateError::Emit(EmitError::BufferExhausted))?;

        Ok(TranslatedBlock {
            guest_pc,
            host_code,
            guest_len,
            host_len,
            insn_count,
            terminator,
            unresolved_targets: pending.into_iter().map(|(offset, target, _)| (offset, target)).collect(),
        })
    }
}

/// Recovers the terminator kind a just-translated terminating op
/// produced, for bookkeeping on the [`TranslatedBlock`] -- the actual
/// reason code baked into the host epilogue is emitted by the
/// per-class translator itself (it alone knows taken-vs-fallthrough,
/// branch-vs-return).
fn terminator_kind_for(op: &guestisa::Op) -> TerminatorKind {
    use guestisa::Op;

    match op {
        Op::Branch { .. } | Op::BranchConditional { .. } | Op::CompareAndBranch { .. } | Op::TestAndBranch { .. } => {
            TerminatorKind::Branch
        }
        Op::BranchRegister { is_return: true, .. } => TerminatorKind::Return,
        Op::BranchRegister { .. } => TerminatorKind::Branch,
        Op::System { kind: guestisa::SystemOp::Svc, .. } => TerminatorKind::Svc,
        Op::System { kind: guestisa::SystemOp::Brk, .. } => TerminatorKind::Brk,
        Op::System { kind: guestisa::SystemOp::Hlt, .. } => TerminatorKind::Hlt,
        _ => unreachable!("not a terminator-class op"),
    }
}
