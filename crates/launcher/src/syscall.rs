//! A deliberately minimal guest-syscall shim.
//!
//! Full syscall emulation is explicitly out of scope for the
//! translation engine this workspace builds: the dispatcher's job ends
//! at handing a [`blockjit::Trap`] to whatever "external collaborator"
//! wants to interpret it. This table exists only so the launcher binary
//! can run a guest program to completion end to end; it implements the
//! handful of AArch64 Linux syscalls a minimal statically-linked guest
//! needs to print output and exit, nothing more.

use std::io::Write;

use cpustate::Registers;

use crate::memory::GuestMemory;

const SYS_WRITE: u64 = 64;
const SYS_EXIT: u64 = 93;
const SYS_EXIT_GROUP: u64 = 94;

/// What the run loop should do after handling one `svc` trap.
pub enum Outcome {
    Continue,
    Exit(i32),
}

/// Services one `svc #0` trap using the AArch64 Linux calling
/// convention: syscall number in `x8`, arguments in `x0..=x5`, return
/// value in `x0`.
pub fn handle(regs: &mut Registers, memory: &GuestMemory) -> Outcome {
    let number = regs.gpr(8);
    match number {
        SYS_WRITE => {
            let fd = regs.gpr(0);
            let addr = regs.gpr(1);
            let len = regs.gpr(2) as usize;
            let written = write_guest_buffer(fd, addr, len, memory);
            regs.set_gpr(0, written as u64);
            Outcome::Continue
        }
        SYS_EXIT | SYS_EXIT_GROUP => Outcome::Exit(regs.gpr(0) as i32),
        other => {
            tracing::warn!(syscall = other, "unimplemented guest syscall, returning -ENOSYS");
            regs.set_gpr(0, (-38i64) as u64); // -ENOSYS
            Outcome::Continue
        }
    }
}

fn write_guest_buffer(fd: u64, addr: u64, len: usize, memory: &GuestMemory) -> i64 {
    let Some(slice) = guest_slice(memory, addr, len) else {
        return -14; // -EFAULT
    };
    let result = match fd {
        1 => std::io::stdout().write_all(slice),
        2 => std::io::stderr().write_all(slice),
        _ => return -9, // -EBADF
    };
    match result {
        Ok(()) => len as i64,
        Err(_) => -5, // -EIO
    }
}

fn guest_slice(memory: &GuestMemory, addr: u64, len: usize) -> Option<&[u8]> {
    let base = memory.base_ptr();
    let end = (addr as usize).checked_add(len)?;
    if end > memory.len() {
        return None;
    }
    // SAFETY: bounds-checked against the mapping above.
    Some(unsafe { std::slice::from_raw_parts(base.add(addr as usize), len) })
}
