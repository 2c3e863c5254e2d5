//! Process-style launcher binary: loads a guest AArch64 ELF executable,
//! maps its segments and initial stack into a flat guest address space,
//! and drives [`blockjit::Dispatcher`] until the guest exits.
//!
//! `clap::Parser` args, `tracing_subscriber` setup, and a thin
//! `anyhow::Result`-returning `main` this binary funnels every fallible
//! step through.

mod aot;
mod cli;
mod config;
mod elf;
mod memory;
mod stack;
mod syscall;

use std::process::ExitCode;

use anyhow::{Context, bail};
use clap::Parser;
use cpustate::Registers;

use crate::cli::CliArgs;
use crate::config::EnvConfig;
use crate::elf::Image;
use crate::memory::GuestMemory;

/// Top of the guest stack; arbitrary but generous headroom below the
/// highest segment address any image in practice uses.
const STACK_TOP: u64 = 0x0001_0000_0000;
const ADDRESS_SPACE_LIMIT: u64 = 0x0001_0000_1000;

fn setup_tracing(config: &EnvConfig) {
    use tracing_subscriber::EnvFilter;

    let default_level = if config.print_ir { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn run() -> anyhow::Result<i32> {
    let args = CliArgs::parse();

    let config = EnvConfig::from_env().map_err(|err| anyhow::anyhow!("{err}"))?;
    setup_tracing(&config);

    let guest_bytes = std::fs::read(&args.guest).with_context(|| format!("reading {}", args.guest.display()))?;

    let image = match Image::parse(&guest_bytes) {
        Ok(image) => image,
        Err(elf::ElfError::WrongArchitecture) => {
            // Fixed diagnostic for a guest image this launcher cannot
            // possibly run.
            bail!("wrong host");
        }
        Err(err) => return Err(err.into()),
    };

    if config.print_segments {
        for segment in &image.segments {
            tracing::info!(
                vaddr = format_args!("{:#x}", segment.vaddr),
                memsz = segment.memsz,
                r = segment.readable,
                w = segment.writable,
                x = segment.executable,
                "segment"
            );
        }
    }

    let mut memory = GuestMemory::load(&image, ADDRESS_SPACE_LIMIT).context("mapping guest segments")?;

    let guest_path = args.guest.to_string_lossy().into_owned();
    let initial_stack = stack::build(&image, &guest_path, &args.guest_args, STACK_TOP);
    if !memory.write_bytes(initial_stack.stack_base, &initial_stack.image) {
        bail!("initial stack image does not fit the reserved guest address space");
    }

    let aot_cache = if config.disable_aot {
        None
    } else {
        match aot::AotCache::default_path() {
            Some(path) => match aot::AotCache::open(&path) {
                Ok(cache) => Some(cache),
                Err(err) if config.aot_errors_are_fatal => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(%err, "AOT cache unavailable, continuing without it");
                    None
                }
            },
            None => None,
        }
    };
    // The dispatcher's correctness never depends on this cache being
    // present; it's wired up for parity with the environment knobs but
    // nothing here has written a persisted block back out yet, since
    // `blockjit::TranslationCache` doesn't expose pre-translated host
    // bytes to seed from. See DESIGN.md for the open item.
    drop(aot_cache);

    let mut regs = Registers::default();
    regs.pc = image.entry;
    regs.sp = initial_stack.sp;

    let mut dispatcher = blockjit::Dispatcher::new();
    let mem_base = memory.base_ptr();

    loop {
        let trap = dispatcher
            .run_until_trap(&mut regs, mem_base, |addr| memory.fetch_u32(addr))
            .context("dispatch loop")?;

        match trap.kind {
            xlate::TerminatorKind::Svc => match syscall::handle(&mut regs, &memory) {
                syscall::Outcome::Continue => {
                    regs.pc += 4;
                }
                syscall::Outcome::Exit(code) => return Ok(code),
            },
            xlate::TerminatorKind::Brk | xlate::TerminatorKind::Hlt => {
                tracing::error!(pc = format_args!("{:#x}", trap.guest_pc), imm16 = trap.imm16, kind = ?trap.kind, "guest trap");
                return Ok(134);
            }
            xlate::TerminatorKind::Undefined => {
                tracing::error!(pc = format_args!("{:#x}", trap.guest_pc), "undefined instruction");
                return Ok(132);
            }
            xlate::TerminatorKind::Branch | xlate::TerminatorKind::Return | xlate::TerminatorKind::Fallthrough => {
                unreachable!("the dispatcher only returns control on Svc/Brk/Hlt/Undefined")
            }
        }
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
