//! Scalar and pair load/store translators, covering every addressing
//! mode the decoder resolves (`UnsignedOffset`/`Unscaled`/`PreIndex`/
//! `PostIndex`) plus sign-extending loads. `acquire_release` (the
//! `LDAR`/`STLR` ordering forms) only needs a host fence on this
//! platform -- x86's own memory model already gives every normal load/
//! store acquire/release semantics, so the one extra requirement is a
//! compiler-ordering barrier, which `lfence` provides for the load side;
//! the store side needs nothing beyond the store itself completing
//! in-order, which x86 guarantees.

use guestisa::op::{AccessSize, AddrMode};

use super::util::{BlockBuilder, EmitError, SCRATCH, MEM_BASE};

pub fn translate(
    b: &mut BlockBuilder,
    size: AccessSize,
    is_load: bool,
    sign_extend_to_64: Option<bool>,
    acquire_release: bool,
    mode: AddrMode,
    rt: u8,
    rn: u8,
    offset: i64,
) -> Result<(), EmitError> {
    let base = SCRATCH[0];
    let addr = SCRATCH[1];
    let data = SCRATCH[2];

    load_base(b, base, rn);
    compute_effective(b, addr, base, offset);
    let access = access_register(mode, base, addr);

    if is_load {
        load_sized(b, data, access, size, sign_extend_to_64);
        if acquire_release {
            hostasm::lfence(b.buf());
        }
        b.store_gpr(rt, data);
    } else {
        b.load_gpr(data, rt);
        store_sized(b, access, data, size);
    }

    if matches!(mode, AddrMode::PreIndex | AddrMode::PostIndex) {
        store_base(b, rn, addr);
    }

    Ok(())
}

pub fn translate_pair(
    b: &mut BlockBuilder,
    is64: bool,
    is_load: bool,
    mode: AddrMode,
    rt: u8,
    rt2: u8,
    rn: u8,
    offset: i64,
) -> Result<(), EmitError> {
    let base = SCRATCH[0];
    let addr = SCRATCH[1];
    let data = SCRATCH[2];
    let elem_size: i64 = if is64 { 8 } else { 4 };

    load_base(b, base, rn);
    compute_effective(b, addr, base, offset);
    let access = access_register(mode, base, addr);

    if is_load {
        if is64 {
            hostasm::load_mem_idx(b.buf(), data, MEM_BASE, access, true);
        } else {
            hostasm::load_mem_idx(b.buf(), data, MEM_BASE, access, false);
        }
        b.store_gpr(rt, data);
        bump(b, access, elem_size);
        if is64 {
            hostasm::load_mem_idx(b.buf(), data, MEM_BASE, access, true);
        } else {
            hostasm::load_mem_idx(b.buf(), data, MEM_BASE, access, false);
        }
        b.store_gpr(rt2, data);
        unbump(b, access, elem_size);
    } else {
        b.load_gpr(data, rt);
        hostasm::store_mem_idx(b.buf(), MEM_BASE, access, data, is64);
        bump(b, access, elem_size);
        b.load_gpr(data, rt2);
        hostasm::store_mem_idx(b.buf(), MEM_BASE, access, data, is64);
        unbump(b, access, elem_size);
    }

    if matches!(mode, AddrMode::PreIndex | AddrMode::PostIndex) {
        store_base(b, rn, addr);
    }

    Ok(())
}

/// Nudges the access register forward by one element so the second
/// half of a pair lands at `addr + elem_size`; undone by [`unbump`]
/// immediately after so later uses of `access` (and the post-index
/// writeback, which reads `addr` rather than `access`) see the original
/// value.
fn bump(b: &mut BlockBuilder, access: hostasm::Reg, elem_size: i64) {
    hostasm::alu_reg_imm32(b.buf(), hostasm::AluOp::Add, access, elem_size as u32, true);
}

fn unbump(b: &mut BlockBuilder, access: hostasm::Reg, elem_size: i64) {
    hostasm::alu_reg_imm32(b.buf(), hostasm::AluOp::Sub, access, elem_size as u32, true);
}

fn load_base(b: &mut BlockBuilder, dst: hostasm::Reg, rn: u8) {
    if rn == cpustate::ZERO_REGISTER {
        b.load_sp(dst);
    } else {
        b.load_gpr(dst, rn);
    }
}

fn store_base(b: &mut BlockBuilder, rn: u8, value: hostasm::Reg) {
    if rn == cpustate::ZERO_REGISTER {
        b.store_sp(value);
    } else {
        b.store_gpr(rn, value);
    }
}

fn compute_effective(b: &mut BlockBuilder, dst: hostasm::Reg, base: hostasm::Reg, offset: i64) {
    hostasm::mov_reg_imm64(b.buf(), dst, offset as u64);
    hostasm::alu_reg_reg(b.buf(), hostasm::AluOp::Add, dst, base, true);
}

/// `PostIndex` accesses guest memory at the unmodified base; every
/// other mode accesses at `base + offset`.
fn access_register(mode: AddrMode, base: hostasm::Reg, addr: hostasm::Reg) -> hostasm::Reg {
    match mode {
        AddrMode::PostIndex => base,
        _ => addr,
    }
}

fn load_sized(b: &mut BlockBuilder, dst: hostasm::Reg, access: hostasm::Reg, size: AccessSize, sign_extend_to_64: Option<bool>) {
    let bytes = size.bytes();
    match (bytes, sign_extend_to_64) {
        (8, _) => hostasm::load_mem_idx(b.buf(), dst, MEM_BASE, access, true),
        (4, Some(true)) => hostasm::load_mem_idx_sx(b.buf(), dst, MEM_BASE, access, 4, true),
        (4, _) => hostasm::load_mem_idx(b.buf(), dst, MEM_BASE, access, false),
        (n, Some(is64)) => hostasm::load_mem_idx_sx(b.buf(), dst, MEM_BASE, access, n, is64),
        (n, None) => hostasm::load_mem_idx_zx(b.buf(), dst, MEM_BASE, access, n, true),
    }
}

fn store_sized(b: &mut BlockBuilder, access: hostasm::Reg, src: hostasm::Reg, size: AccessSize) {
    match size.bytes() {
        1 => hostasm::store_mem_idx_u8(b.buf(), MEM_BASE, access, src),
        2 => hostasm::store_mem_idx_u16(b.buf(), MEM_BASE, access, src),
        4 => hostasm::store_mem_idx(b.buf(), MEM_BASE, access, src, false),
        _ => hostasm::store_mem_idx(b.buf(), MEM_BASE, access, src, true),
    }
}
