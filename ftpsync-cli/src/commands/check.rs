//! `ftpsync check <name>` — test the login and remote base directory.

use anyhow::{Context, Result};
use clap::Args;

use ftpsync_core::{registry, types::ProjectName};
use ftpsync_sync::pipeline;

use super::{home, resolve_credentials, transport_for};

/// Arguments for `ftpsync check`.
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Project whose remote is checked.
    pub name: String,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let profile = registry::select_at(&home, &ProjectName::from(self.name.clone()))
            .with_context(|| format!("unknown project '{}'", self.name))?;
        let credentials = resolve_credentials(&profile)?;
        let transport = transport_for(&profile);

        pipeline::check_connection(&profile, transport.as_ref(), &credentials)
            .with_context(|| format!("connection check failed for '{}'", self.name))?;
        println!(
            "✓ '{}' reachable, remote directory '{}' ready",
            self.name, profile.remote.base_path
        );
        Ok(())
    }
}
