//! Per-instruction-class translators: each guest [`guestisa::Op`] maps to
//! a small run of host bytes emitted through a [`builder::BlockBuilder`].
//!
//! This crate knows nothing about basic blocks, caching or dispatch --
//! it only knows how to turn one decoded instruction into host code
//! against the pinned `STATE_PTR`/`MEM_BASE` registers. The block
//! translator (in `blockjit`) drives it instruction by instruction.

pub mod block;
pub mod builder;
pub mod dispatch;

pub use block::{BlockTranslator, TerminatorKind, TranslatedBlock, TranslateError};
pub use builder::util::{BlockBuilder, EmitError};
