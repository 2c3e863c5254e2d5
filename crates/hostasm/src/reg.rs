/// A general-purpose x86-64 register, numbered the way the ModRM/SIB
/// encoding does: 0-7 are the legacy registers, 8-15 require `REX.R`/
/// `REX.B`/`REX.X` to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    #[inline]
    pub const fn low_bits(self) -> u8 {
        (self as u8) & 0b111
    }

    #[inline]
    pub const fn needs_rex_bit(self) -> bool {
        (self as u8) & 0b1000 != 0
    }
}

/// One of the 16 128-bit SIMD/FP registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
    Xmm8 = 8,
    Xmm9 = 9,
    Xmm10 = 10,
    Xmm11 = 11,
    Xmm12 = 12,
    Xmm13 = 13,
    Xmm14 = 14,
    Xmm15 = 15,
}

impl Xmm {
    #[inline]
    pub const fn low_bits(self) -> u8 {
        (self as u8) & 0b111
    }

    #[inline]
    pub const fn needs_rex_bit(self) -> bool {
        (self as u8) & 0b1000 != 0
    }
}

/// The register pinned to hold a pointer to [`cpustate::Registers`] for
/// the duration of a translated block. Chosen to survive the System V
/// calling convention's callee-saved set so memory-access hooks can be
/// called without reloading it.
pub const STATE_PTR: Reg = Reg::Rbx;
