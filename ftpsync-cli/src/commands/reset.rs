//! `ftpsync reset <name>` — forget tracked state.

use anyhow::{Context, Result};
use clap::Args;

use ftpsync_core::types::ProjectName;
use ftpsync_sync::pipeline;

use super::home;

/// Arguments for `ftpsync reset`.
#[derive(Args, Debug)]
pub struct ResetArgs {
    /// Project whose tracking state is dropped.
    pub name: String,
}

impl ResetArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let dropped = pipeline::reset_tracking(&home, &ProjectName::from(self.name.clone()))
            .with_context(|| format!("reset failed for '{}'", self.name))?;
        println!(
            "✓ '{}' reset ({dropped} tracked file(s) forgotten; next sync uploads everything)",
            self.name
        );
        Ok(())
    }
}
