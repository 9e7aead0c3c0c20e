// ============================================
// Talon - cli.rs
// ============================================
// Command line flags.
//
//   talon                 everything (same as `talon run`)
//   talon check           probe + pre-checks + freshness report, no changes
//   talon deps            Chocolatey, VC++ runtime, browser
//   talon tweaks          WinUtil + Win11Debloat
//
// Flags work before or after the subcommand.
// ============================================

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "talon")]
#[command(about = "Debloat and set up a fresh Windows 11 install")]
#[command(version)]
pub struct Cli {
    /// Settings file (default: talon.toml next to talon.exe)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Chocolatey package id of the browser to install; writes the choice file
    #[arg(long, global = true, value_name = "PACKAGE_ID")]
    pub browser: Option<String>,

    /// Console prompts instead of message boxes
    #[arg(long, global = true)]
    pub headless: bool,

    /// Answer "Continue" to every warning (fatal errors still stop)
    #[arg(short = 'y', long = "yes", global = true)]
    pub assume_yes: bool,

    /// Don't look at profile age, boot count or updates
    #[arg(long, global = true)]
    pub skip_freshness: bool,

    /// Debug-level logging
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run every stage (default)
    Run,
    /// Only check this machine, change nothing
    Check,
    /// Install Chocolatey, the VC++ runtime and the chosen browser
    Deps,
    /// Run WinUtil and Win11Debloat
    Tweaks,
}

impl Cli {
    /// The subcommand to run, `run` when none was given
    pub fn selected_command(&self) -> Command {
        self.command.unwrap_or(Command::Run)
    }
}
