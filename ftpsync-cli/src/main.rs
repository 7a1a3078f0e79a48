//! ftpsync — mirror local folders to FTP, uploading only what changed.
//!
//! # Usage
//!
//! ```text
//! ftpsync project add <name> --root <dir> --host <host> [--remote-path /www] [--user u --password-env VAR]
//! ftpsync project update|remove|show <name>
//! ftpsync project list [--json]
//! ftpsync sync <name> [--dry-run] [--force] [--concurrency N] [--reset-corrupt-state]
//! ftpsync diff <name>
//! ftpsync status [<name>] [--json]
//! ftpsync reset <name>
//! ftpsync check <name>
//! ```

mod commands;

use std::fmt;
use std::str::FromStr;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

use commands::{
    check::CheckArgs, diff::DiffArgs, project::ProjectCommand, reset::ResetArgs,
    status::StatusArgs, sync::SyncArgs,
};
use ftpsync_core::types::Protocol;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "ftpsync",
    version,
    about = "Mirror local project folders to FTP, uploading only changed files",
    long_about = None,
)]
struct Cli {
    /// More log output on stderr (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manage project profiles.
    Project {
        #[command(subcommand)]
        command: ProjectCommand,
    },

    /// Upload changed files and delete removed ones.
    Sync(SyncArgs),

    /// List what the next sync would do.
    Diff(DiffArgs),

    /// Show tracking state and pending changes.
    Status(StatusArgs),

    /// Forget tracked state so the next sync uploads everything.
    Reset(ResetArgs),

    /// Log in to a project's remote and verify the base directory.
    Check(CheckArgs),
}

// ---------------------------------------------------------------------------
// Shared Protocol argument
// ---------------------------------------------------------------------------

/// Thin wrapper so clap can parse `Protocol` from CLI args.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolArg(pub Protocol);

impl FromStr for ProtocolArg {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ftp" => Ok(Self(Protocol::Ftp)),
            "local" => Ok(Self(Protocol::Local)),
            other => Err(format!("unknown protocol '{other}'; expected: ftp, local")),
        }
    }
}

impl fmt::Display for ProtocolArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<ProtocolArg> for Protocol {
    fn from(p: ProtocolArg) -> Self {
        p.0
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match cli.command {
        Commands::Project { command } => commands::project::run(command),
        Commands::Sync(args) => args.run(),
        Commands::Diff(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Reset(args) => args.run(),
        Commands::Check(args) => args.run(),
    }
}
