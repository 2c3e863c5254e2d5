//! Command-line surface: `<launcher> <guest-ELF-path> [guest args...]`,
//! via `clap::Parser` over a positional input plus trailing passthrough
//! args.

use std::path::PathBuf;

use clap::Parser;

/// A user-mode dynamic binary translator: runs a guest ELF executable
/// on this host by translating its code one basic block at a time.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct CliArgs {
    /// Path to the guest ELF executable to run.
    pub guest: PathBuf,

    /// Arguments passed through to the guest program's argv[1..].
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub guest_args: Vec<String>,
}
