//! Append-only byte sink used by the host emitter to build translated
//! blocks, plus patch points for backfilling displacements once a jump
//! target becomes known.

use std::fmt;

use thiserror::Error;

/// A buffer position returned by [`CodeBuffer::current_offset`] or
/// recorded before emitting a branch whose target isn't known yet.
pub type Offset = usize;

#[derive(Debug, Error)]
pub enum BufferError {
    #[error("code buffer exhausted: wrote past {capacity} bytes")]
    Overflow { capacity: usize },
    #[error("patch at offset {offset} is out of bounds (len {len})")]
    BadPatch { offset: usize, len: usize },
}

/// A fixed-capacity, append-only buffer of host machine code.
///
/// Writes past capacity set a sticky error flag instead of panicking;
/// callers check [`CodeBuffer::ok`] once after emitting an entire block
/// rather than after every instruction. This mirrors how a single
/// out-of-space byte deep inside a long instruction selection pass
/// shouldn't itself need handling — only the final result does.
pub struct CodeBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    overflowed: bool,
}

impl CodeBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            capacity,
            overflowed: false,
        }
    }

    #[inline]
    pub fn current_offset(&self) -> Offset {
        self.bytes.len()
    }

    #[inline]
    pub fn ok(&self) -> bool {
        !self.overflowed
    }

    #[inline]
    fn reserve(&mut self, additional: usize) -> bool {
        if self.overflowed {
            return false;
        }

        if self.bytes.len() + additional > self.capacity {
            self.overflowed = true;
            return false;
        }

        true
    }

    #[inline]
    pub fn emit_u8(&mut self, byte: u8) {
        if self.reserve(1) {
            self.bytes.push(byte);
        }
    }

    #[inline]
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        if self.reserve(bytes.len()) {
            self.bytes.extend_from_slice(bytes);
        }
    }

    #[inline]
    pub fn emit_u32_le(&mut self, value: u32) {
        self.emit_bytes(&value.to_le_bytes());
    }

    #[inline]
    pub fn emit_u64_le(&mut self, value: u64) {
        self.emit_bytes(&value.to_le_bytes());
    }

    /// Overwrites 4 bytes at `offset` with `value`, little-endian. Used to
    /// backfill a branch displacement once its target offset is known.
    pub fn patch_u32_le(&mut self, offset: Offset, value: u32) -> Result<(), BufferError> {
        let slice = self
            .bytes
            .get_mut(offset..offset + 4)
            .ok_or(BufferError::BadPatch {
                offset,
                len: self.bytes.len(),
            })?;
        slice.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Consumes the buffer, returning its bytes if nothing ever overflowed.
    pub fn finalize(self) -> Result<Vec<u8>, BufferError> {
        if self.overflowed {
            return Err(BufferError::Overflow {
                capacity: self.capacity,
            });
        }

        Ok(self.bytes)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for CodeBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeBuffer")
            .field("len", &self.bytes.len())
            .field("capacity", &self.capacity)
            .field("overflowed", &self.overflowed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_in_order() {
        let mut buf = CodeBuffer::new(16);
        buf.emit_u8(0x90);
        buf.emit_u32_le(0xdead_beef);
        assert_eq!(buf.as_slice(), &[0x90, 0xef, 0xbe, 0xad, 0xde]);
        assert!(buf.ok());
    }

    #[test]
    fn overflow_is_sticky_and_reported_on_finalize() {
        let mut buf = CodeBuffer::new(2);
        buf.emit_u32_le(1);
        assert!(!buf.ok());
        buf.emit_u8(0); // further writes are no-ops, not panics
        assert!(matches!(buf.finalize(), Err(BufferError::Overflow { capacity: 2 })));
    }

    #[test]
    fn patch_rewrites_an_earlier_displacement() {
        let mut buf = CodeBuffer::new(16);
        let at = buf.current_offset();
        buf.emit_u32_le(0);
        buf.emit_u8(0xcc);
        buf.patch_u32_le(at, 0x1234_5678).unwrap();
        assert_eq!(&buf.as_slice()[0..4], &0x1234_5678u32.to_le_bytes());
    }

    #[test]
    fn patch_out_of_bounds_errors() {
        let mut buf = CodeBuffer::new(16);
        buf.emit_u8(1);
        assert!(matches!(
            buf.patch_u32_le(10, 0),
            Err(BufferError::BadPatch { .. })
        ));
    }
}
