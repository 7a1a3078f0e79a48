//! `ftpsync diff <name>` — list what the next sync would transfer.

use anyhow::{Context, Result};
use clap::Args;

use ftpsync_core::types::ProjectName;
use ftpsync_sync::{pipeline, SyncOptions};

use super::{home, print_change_set};

/// Arguments for `ftpsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Project to inspect.
    pub name: String,

    /// Re-hash every file instead of trusting size and mtime.
    #[arg(long)]
    pub force: bool,

    /// Emit the change set as JSON.
    #[arg(long)]
    pub json: bool,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let options = SyncOptions {
            force_revalidate: self.force,
            ..SyncOptions::default()
        };

        let set = pipeline::dry_run(&home, &ProjectName::from(self.name.clone()), &options)
            .with_context(|| format!("diff failed for '{}'", self.name))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&set)?);
            return Ok(());
        }
        print_change_set(&self.name, &set, "");
        Ok(())
    }
}
