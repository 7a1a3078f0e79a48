//! Subcommand implementations and the glue they share.

pub mod check;
pub mod diff;
pub mod progress;
pub mod project;
pub mod reset;
pub mod status;
pub mod sync;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use colored::Colorize;

use ftpsync_core::types::{Credentials, ProjectProfile, Protocol};
use ftpsync_ftp::FtpTransport;
use ftpsync_sync::{ChangeKind, ChangeSet, LocalTransport, Transport};

pub fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Resolve the profile's password: named environment variable first, then
/// the inline value, else empty.
pub fn resolve_credentials(profile: &ProjectProfile) -> Result<Credentials> {
    let creds = &profile.credentials;
    let password = match (&creds.password_env, &creds.password) {
        (Some(var), _) => std::env::var(var).with_context(|| {
            format!(
                "password variable '{var}' for project '{}' is not set",
                profile.name
            )
        })?,
        (None, Some(inline)) => inline.clone(),
        (None, None) => String::new(),
    };
    Ok(Credentials {
        username: creds.username.clone(),
        password,
    })
}

pub fn transport_for(profile: &ProjectProfile) -> Box<dyn Transport> {
    match profile.remote.protocol {
        Protocol::Ftp => Box::new(FtpTransport::new()),
        Protocol::Local => Box::new(LocalTransport::new()),
    }
}

/// Render a change set the same way for `diff` and `sync --dry-run`.
pub fn print_change_set(name: &str, set: &ChangeSet, prefix: &str) {
    if set.entries.is_empty() && set.pruned.is_empty() {
        println!("{prefix}✓ '{name}' is up to date ({} files scanned)", set.scanned);
    } else {
        println!(
            "{prefix}'{name}': {} added, {} modified, {} deleted ({} files scanned)",
            set.count(ChangeKind::Added),
            set.count(ChangeKind::Modified),
            set.count(ChangeKind::Deleted),
            set.scanned
        );
        for entry in &set.entries {
            let line = format!("  {}  {}", entry.kind.marker(), entry.relative_path);
            match entry.kind {
                ChangeKind::Added => println!("{}", line.green()),
                ChangeKind::Modified => println!("{}", line.yellow()),
                ChangeKind::Deleted => println!("{}", line.red()),
            }
        }
        for path in &set.pruned {
            println!("  {}", format!("·  {path} (now ignored, untracked)").dimmed());
        }
    }
    for skipped in &set.skipped {
        println!(
            "  {}",
            format!("!  {} skipped: {}", skipped.relative_path, skipped.reason).yellow()
        );
    }
}

/// "3m ago", "2h ago", "5d ago", or "never".
pub fn format_age(at: Option<DateTime<Utc>>) -> String {
    let Some(at) = at else {
        return "never".to_string();
    };
    let secs = (Utc::now() - at).num_seconds().max(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}
