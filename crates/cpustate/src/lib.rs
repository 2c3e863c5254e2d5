//! Guest execution state: general-purpose registers, vector registers,
//! condition flags, program counter and the two FP control/status words.
//!
//! Laid out with `#[repr(C)]` so translated blocks can be handed a raw
//! pointer to a [`Registers`] and load/store fields at fixed byte offsets
//! without going through Rust call conventions for every access.

use bitos::bitos;

/// Number of addressable general-purpose registers, not counting the
/// zero/stack register slot at index 31.
pub const GPR_COUNT: usize = 31;
pub const VECTOR_COUNT: usize = 32;

/// Index 31 in most general-purpose operand positions, which reads as
/// zero and discards writes. The same bit pattern addresses the stack
/// pointer in a handful of instruction classes (load/store base,
/// add/sub immediate) -- those translators reach for [`Registers::sp`]
/// directly instead of going through [`Registers::gpr`].
pub const ZERO_REGISTER: u8 = 31;

/// The N/Z/C/V condition flags, packed into the top 4 bits of PSTATE.
#[bitos(4)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    #[bits(3)]
    pub negative: bool,
    #[bits(2)]
    pub zero: bool,
    #[bits(1)]
    pub carry: bool,
    #[bits(0)]
    pub overflow: bool,
}

impl Flags {
    /// Flags resulting from comparing `value` against zero as a signed
    /// quantity, carry and overflow left at `false`. Used by compare/test
    /// translators that only affect N and Z.
    pub fn from_compare_zero(value: i64) -> Self {
        Self::new()
            .with_negative(value < 0)
            .with_zero(value == 0)
            .with_carry(false)
            .with_overflow(false)
    }
}

/// A 128-bit vector register. Scalar floating point operations read and
/// write the low 64 bits and, per the architecture, zero the high 64
/// bits on every scalar write.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vector {
    pub low: u64,
    pub high: u64,
}

impl Vector {
    pub fn from_scalar_f64(value: f64) -> Self {
        Self {
            low: value.to_bits(),
            high: 0,
        }
    }

    pub fn from_scalar_f32(value: f32) -> Self {
        Self {
            low: u64::from(value.to_bits()),
            high: 0,
        }
    }

    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.low)
    }

    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.low as u32)
    }
}

/// The full guest execution state touched by translated code.
///
/// Field order and `#[repr(C)]` layout are load-bearing: the host
/// emitter's prologue pins the base pointer to this struct and every
/// per-class translator computes field offsets with [`std::mem::offset_of`].
#[repr(C)]
#[derive(Debug)]
pub struct Registers {
    /// x0..=x30. Index 31 is not stored here; see [`ZERO_REGISTER`].
    pub gpr: [u64; GPR_COUNT],
    pub sp: u64,
    pub pc: u64,
    pub v: [Vector; VECTOR_COUNT],
    pub flags: Flags,
    pub fpcr: u32,
    pub fpsr: u32,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            gpr: [0; GPR_COUNT],
            sp: 0,
            pc: 0,
            v: [Vector::default(); VECTOR_COUNT],
            flags: Flags::default(),
            fpcr: 0,
            fpsr: 0,
        }
    }
}

impl Registers {
    /// Reads a general-purpose register by its 5-bit encoding, honoring
    /// zero-register semantics at index 31.
    #[inline]
    pub fn gpr(&self, index: u8) -> u64 {
        if index == ZERO_REGISTER {
            0
        } else {
            self.gpr[index as usize]
        }
    }

    /// Writes a general-purpose register by its 5-bit encoding. A write
    /// to index 31 is discarded, per the architecture's zero-register
    /// semantics in this operand position.
    #[inline]
    pub fn set_gpr(&mut self, index: u8, value: u64) {
        if index != ZERO_REGISTER {
            self.gpr[index as usize] = value;
        }
    }

    #[inline]
    pub fn vector(&self, index: u8) -> Vector {
        self.v[index as usize]
    }

    #[inline]
    pub fn set_vector(&mut self, index: u8, value: Vector) {
        self.v[index as usize] = value;
    }

    /// Byte offset of `gpr[index]` within this struct, used by the
    /// builder to emit direct loads/stores against the pinned state
    /// pointer instead of going through an accessor call.
    pub fn gpr_offset(index: u8) -> usize {
        assert!(index < ZERO_REGISTER);
        std::mem::offset_of!(Registers, gpr) + std::mem::size_of::<u64>() * index as usize
    }

    pub fn vector_offset(index: u8) -> usize {
        assert!((index as usize) < VECTOR_COUNT);
        std::mem::offset_of!(Registers, v) + std::mem::size_of::<Vector>() * index as usize
    }

    pub fn sp_offset() -> usize {
        std::mem::offset_of!(Registers, sp)
    }

    pub fn pc_offset() -> usize {
        std::mem::offset_of!(Registers, pc)
    }

    pub fn flags_offset() -> usize {
        std::mem::offset_of!(Registers, flags)
    }

    pub fn fpcr_offset() -> usize {
        std::mem::offset_of!(Registers, fpcr)
    }

    pub fn fpsr_offset() -> usize {
        std::mem::offset_of!(Registers, fpsr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_register_reads_zero_and_discards_writes() {
        let mut regs = Registers::default();
        regs.gpr[3] = 0xdead_beef;
        assert_eq!(regs.gpr(ZERO_REGISTER), 0);

        regs.set_gpr(ZERO_REGISTER, 0x1234);
        assert_eq!(regs.gpr(ZERO_REGISTER), 0);
        // and didn't clobber an unrelated register
        assert_eq!(regs.gpr(3), 0xdead_beef);
    }

    #[test]
    fn scalar_fp_write_zeros_high_half() {
        let v = Vector::from_scalar_f64(1.5);
        assert_eq!(v.as_f64(), 1.5);
        assert_eq!(v.high, 0);
    }

    #[test]
    fn flags_from_compare_zero() {
        assert_eq!(Flags::from_compare_zero(0).zero(), true);
        assert_eq!(Flags::from_compare_zero(-1).negative(), true);
        assert_eq!(Flags::from_compare_zero(1).negative(), false);
    }
}
