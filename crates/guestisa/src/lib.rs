//! Field extraction, classification and decoding for the 64-bit RISC
//! guest instruction set: 31 general-purpose registers plus a
//! zero/stack register slot, 32 vector registers, N/Z/C/V flags, and a
//! fixed 32-bit instruction encoding.

pub mod decode;
pub mod fields;
pub mod op;

pub use decode::{decode, instruction_length, is_block_terminator, DecodeError};
pub use op::*;
