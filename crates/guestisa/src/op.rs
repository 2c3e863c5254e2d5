use strum::FromRepr;

/// The 16 architectural condition codes used by conditional branches,
/// selects and compares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u8)]
pub enum Cond {
    Eq = 0b0000,
    Ne = 0b0001,
    Cs = 0b0010,
    Cc = 0b0011,
    Mi = 0b0100,
    Pl = 0b0101,
    Vs = 0b0110,
    Vc = 0b0111,
    Hi = 0b1000,
    Ls = 0b1001,
    Ge = 0b1010,
    Lt = 0b1011,
    Gt = 0b1100,
    Le = 0b1101,
    Al = 0b1110,
    Nv = 0b1111,
}

impl Cond {
    pub fn from_bits(bits: u8) -> Self {
        Self::from_repr(bits & 0xf).expect("cond is a 4-bit field")
    }
}

/// Arithmetic/logical operation carried by ALU-class instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Orr,
    Eor,
    /// ANDS/ORN/BIC-family "not" variant, second operand inverted before
    /// the logical op is applied.
    Bic,
    /// `MADD`/`MSUB`/`MUL`/`MNEG`: `Rd = Ra +/- Rn*Rm`. `negate` selects
    /// subtract (`MSUB`/`MNEG`, accumulator minus product) over add
    /// (`MADD`/`MUL`, accumulator plus product); the accumulator operand
    /// itself lives in [`Op::Alu::ra`], same split as `Op::FpScalar`'s
    /// `FusedMulAdd` carries its addend separately from the product sign.
    Mul { negate: bool },
    /// Signed or unsigned division, selected by a separate flag on the
    /// instruction.
    Div { signed: bool },
    /// Two's-complement negate, the `SUB` alias with `Rn == XZR`.
    Neg,
    /// Bitwise NOT, the `ORN` alias with `Rn == XZR`.
    Not,
    Lsl,
    Lsr,
    Asr,
    Ror,
}

/// Load/store access width and kind, shared by every memory translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessSize {
    Byte,
    Half,
    Word,
    Double,
}

impl AccessSize {
    pub fn bytes(self) -> u32 {
        match self {
            AccessSize::Byte => 1,
            AccessSize::Half => 2,
            AccessSize::Word => 4,
            AccessSize::Double => 8,
        }
    }
}

/// Addressing mode for a scalar load/store, already resolved from the
/// raw encoding's op-code bits so translators don't re-derive it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrMode {
    /// `[Xn, #imm]`, base unmodified.
    UnsignedOffset,
    /// `[Xn, #simm]`, base unmodified, unscaled.
    Unscaled,
    /// `[Xn, #simm]!`, base updated before the access.
    PreIndex,
    /// `[Xn], #simm`, base updated after the access.
    PostIndex,
}

/// Scalar floating-point operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpOp {
    Mov,
    Add,
    Sub,
    Mul,
    Div,
    Sqrt,
    Min,
    Max,
    Abs,
    Neg,
    Cmp,
    /// Fused multiply-add/subtract family; `negate_product` and
    /// `negate_addend` together select FMADD/FMSUB/FNMADD/FNMSUB.
    FusedMulAdd { negate_product: bool, negate_addend: bool },
    /// Round to integral value, mode carried separately.
    RoundToIntegral,
    /// Convert between single/double precision, or to/from a GPR.
    Convert,
    /// `FCSEL`: select between two FP registers under a condition code.
    CondSelect,
}

/// Precision of a scalar floating-point operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpPrecision {
    Single,
    Double,
}

/// Lane-parallel vector operation over packed integer or float elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorOp {
    Add,
    Sub,
    Mul,
    FAdd,
    FSub,
    FMul,
    /// Immediate left shift.
    Shl,
    /// Immediate unsigned right shift.
    Ushr,
    /// Immediate signed (arithmetic) right shift.
    Sshr,
    /// `AND`: whole-register bitwise, no per-lane meaning.
    And,
    /// `ORR`: whole-register bitwise, no per-lane meaning.
    Orr,
    /// `EOR`: whole-register bitwise, no per-lane meaning.
    Eor,
    /// `BIC` (register form): `Rd = Rn AND NOT(Rm)`, whole-register.
    Bic,
    /// `SMAX`/`UMAX`, lanewise.
    Max { signed: bool },
    /// `SMIN`/`UMIN`, lanewise.
    Min { signed: bool },
    /// `CMEQ` (register form), lanewise: all-ones or all-zero per lane.
    CmpEq,
    /// `CMGT`/`CMHI`, lanewise signed/unsigned greater-than.
    CmpGt { signed: bool },
}

/// Element width used by a vector/SIMD operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneSize {
    B8,
    H16,
    S32,
    D64,
}

/// A fully decoded A64 instruction: the operation class plus whatever
/// operand fields that class needs. Each variant carries only the
/// fields its own translator (see the `xlate` crate) actually reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Op {
    /// `<op> Rd, Rn, Rm{, shift #n}` or `<op> Rd, Rn, #imm`. `ra` is only
    /// read by `AluOp::Mul`'s 3-source accumulate/subtract form; every
    /// other `AluOp` carries it as the zero register, matching the
    /// architecture's own encoding (there's no `Ra` field outside the
    /// 3-source data-processing class).
    Alu {
        op: AluOp,
        is64: bool,
        set_flags: bool,
        rd: u8,
        rn: u8,
        rm_or_imm: RegOrImm,
        ra: u8,
    },
    /// `MOVZ/MOVN/MOVK Rd, #imm, LSL #shift`.
    MoveWide {
        is64: bool,
        keep: bool,
        invert: bool,
        rd: u8,
        imm16: u32,
        shift: u32,
    },
    /// `SBFM/UBFM/BFM Rd, Rn, #immr, #imms` (extract/insert bit-field).
    BitField {
        is64: bool,
        signed: bool,
        /// `true` selects BFM (merge into destination), `false` selects
        /// SBFM/UBFM (destination fully overwritten, zero- or
        /// sign-extended).
        insert: bool,
        rd: u8,
        rn: u8,
        immr: u32,
        imms: u32,
    },
    /// `CMP/CMN/TST` -- an ALU compare that discards its result and only
    /// updates flags.
    CompareTest {
        op: AluOp,
        is64: bool,
        rn: u8,
        rm_or_imm: RegOrImm,
    },
    /// Scalar load/store, including sign-extending and atomic
    /// acquire/release forms.
    LoadStore {
        size: AccessSize,
        is_load: bool,
        /// `Some(true/false)` selects sign-extend-to-64/32 for loads.
        sign_extend_to_64: Option<bool>,
        acquire_release: bool,
        mode: AddrMode,
        rt: u8,
        rn: u8,
        offset: i64,
    },
    /// `LDP/STP Rt, Rt2, [Xn, #imm]`.
    LoadStorePair {
        is64: bool,
        is_load: bool,
        mode: AddrMode,
        rt: u8,
        rt2: u8,
        rn: u8,
        offset: i64,
    },
    /// `ADR/ADRP Rd, label`.
    PcRelAddr { page: bool, rd: u8, imm: i64 },
    /// `B/BL label`.
    Branch { link: bool, offset: i64 },
    /// `BR/BLR/RET Rn`.
    BranchRegister { link: bool, is_return: bool, rn: u8 },
    /// `B.cond label`.
    BranchConditional { cond: Cond, offset: i64 },
    /// `CBZ/CBNZ Rt, label`.
    CompareAndBranch { is64: bool, branch_if_nonzero: bool, rt: u8, offset: i64 },
    /// `TBZ/TBNZ Rt, #bit, label`.
    TestAndBranch { branch_if_set: bool, bit: u8, rt: u8, offset: i64 },
    /// `SVC #imm`, `BRK #imm`, `HLT #imm`.
    System { kind: SystemOp, imm16: u32 },
    /// Scalar floating-point data processing.
    FpScalar {
        op: FpOp,
        precision: FpPrecision,
        cond: Option<Cond>,
        rd: u8,
        rn: u8,
        rm: u8,
        ra: u8,
    },
    /// `SCVTF/UCVTF/FCVTZS/FCVTZU`: conversion between an integer GPR
    /// and a scalar floating-point register. `is64` is the GPR's width
    /// (`Wn` vs `Xn`); `precision` is the floating-point side's width.
    /// For `to_float`, `rn` names the source GPR and `rd` the
    /// destination vector register; for the reverse direction the roles
    /// swap.
    FpIntConvert { to_float: bool, signed: bool, is64: bool, precision: FpPrecision, rd: u8, rn: u8 },
    /// Lane-parallel vector/SIMD data processing.
    VectorAluOp {
        op: VectorOp,
        lane: LaneSize,
        full128: bool,
        rd: u8,
        rn: u8,
        rm: u8,
        /// Shift amount for `Shl`/`Ushr`/`Sshr`; unused otherwise.
        shift: u32,
    },
    /// `LD1/ST1/LD2/ST2/LD3/ST3/LD4/ST4 {Vt..}, [Xn]`, no offset.
    /// `reg_count` consecutive registers starting at `rt` (wrapping mod
    /// 32) are transferred; `interleaved` distinguishes the `LD2-4`/
    /// `ST2-4` structure forms (de/interleaved across `reg_count`
    /// registers) from the plain multi-register `LD1`/`ST1` forms
    /// (`reg_count` independent, non-interleaved transfers).
    VectorLoadStore { is_load: bool, lane: LaneSize, full128: bool, reg_count: u8, interleaved: bool, rt: u8, rn: u8 },
    /// `DUP Vd.<T>, Rn` (from GPR) or `DUP Vd.<T>, Vn.<T>[index]`.
    VectorDup { lane: LaneSize, full128: bool, rd: u8, rn: u8, from_gpr: bool, index: u32 },
    /// `UMOV/SMOV Rd, Vn.<T>[index]`: moves one lane out into a GPR.
    VectorExtract { lane: LaneSize, signed: bool, rd: u8, rn: u8, index: u32 },
    /// `TBL/TBX Vd.<T>, {Vn..}, Vm.<T>`: table lookup using byte indices.
    /// `extends` selects TBX: out-of-range indices keep `Vd`'s prior
    /// value instead of zeroing the lane.
    VectorTableLookup { full128: bool, extends: bool, rd: u8, rn: u8, rm: u8, len: u8 },
    /// `EXT Vd.<T>, Vn.<T>, Vm.<T>, #index`: concatenates `Vn:Vm` and
    /// extracts `index` bytes in from the start, `8` or `16` bytes wide
    /// depending on `full128`.
    VectorExt { full128: bool, rd: u8, rn: u8, rm: u8, index: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemOp {
    Svc,
    Brk,
    Hlt,
}

/// Either a register index or an already-decoded immediate value,
/// matching the two operand forms most ALU instructions admit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegOrImm {
    Reg(u8),
    Imm(u64),
}
