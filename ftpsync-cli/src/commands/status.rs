//! `ftpsync status` — tracking state and pending work per project.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use ftpsync_core::types::ProjectName;
use ftpsync_sync::{pipeline, ProjectStatus};

use super::{format_age, home};

/// Arguments for `ftpsync status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Limit to one project.
    pub name: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum Signal {
    NeverSynced,
    Current,
    Pending,
    Error,
}

#[derive(Debug, Serialize)]
struct StatusRow {
    project: String,
    status: Signal,
    tracked: usize,
    added: usize,
    modified: usize,
    deleted: usize,
    skipped: usize,
    last_full_sync_at: Option<String>,
    last_full_sync_age: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Tabled)]
struct StatusTableRow {
    #[tabled(rename = "project")]
    project: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "tracked")]
    tracked: usize,
    #[tabled(rename = "pending")]
    pending: String,
    #[tabled(rename = "last full sync")]
    last_sync: String,
}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let names: Vec<ProjectName> = match self.name {
            Some(name) => vec![ProjectName::from(name)],
            None => pipeline::list_projects(&home)
                .context("failed to load project registry")?
                .into_iter()
                .map(|p| p.name)
                .collect(),
        };

        let mut rows = Vec::new();
        for name in names {
            let row = match pipeline::status(&home, &name) {
                Ok(status) => row_from(&status),
                Err(ftpsync_sync::SyncError::Registry(e)) => {
                    return Err(e).with_context(|| format!("unknown project '{name}'"));
                }
                Err(e) => error_row(&name, e.to_string()),
            };
            rows.push(row);
        }

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&rows).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_table(rows);
        Ok(())
    }
}

fn row_from(status: &ProjectStatus) -> StatusRow {
    let signal = if status.pending() > 0 {
        Signal::Pending
    } else if status.tracked == 0 && status.last_full_sync_at.is_none() {
        Signal::NeverSynced
    } else {
        Signal::Current
    };
    StatusRow {
        project: status.profile.name.to_string(),
        status: signal,
        tracked: status.tracked,
        added: status.added,
        modified: status.modified,
        deleted: status.deleted,
        skipped: status.skipped,
        last_full_sync_at: status.last_full_sync_at.map(|t| t.to_rfc3339()),
        last_full_sync_age: format_age(status.last_full_sync_at),
        error: None,
    }
}

fn error_row(name: &ProjectName, error: String) -> StatusRow {
    StatusRow {
        project: name.to_string(),
        status: Signal::Error,
        tracked: 0,
        added: 0,
        modified: 0,
        deleted: 0,
        skipped: 0,
        last_full_sync_at: None,
        last_full_sync_age: "-".to_string(),
        error: Some(error),
    }
}

fn print_table(rows: Vec<StatusRow>) {
    println!("ftpsync v{} | {} projects", env!("CARGO_PKG_VERSION"), rows.len());
    if rows.is_empty() {
        println!("No projects registered.");
        return;
    }

    let needs_sync = rows.iter().any(|r| r.status == Signal::Pending);
    let errors: Vec<(String, String)> = rows
        .iter()
        .filter_map(|r| r.error.clone().map(|e| (r.project.clone(), e)))
        .collect();

    let table_rows: Vec<StatusTableRow> = rows
        .into_iter()
        .map(|row| StatusTableRow {
            status: signal_label(row.status),
            pending: if row.status == Signal::Pending {
                format!("+{} ~{} -{}", row.added, row.modified, row.deleted)
            } else {
                "-".to_string()
            },
            project: row.project,
            tracked: row.tracked,
            last_sync: row.last_full_sync_age,
        })
        .collect();
    let mut table = Table::new(table_rows);
    table.with(Style::rounded());
    println!("{table}");

    for (project, error) in errors {
        println!("{}", format!("{project}: {error}").red());
    }
    if needs_sync {
        println!("Run 'ftpsync sync <project>' to upload pending changes.");
    }
}

fn signal_label(signal: Signal) -> String {
    match signal {
        Signal::NeverSynced => "NEVER SYNCED".bright_black().bold().to_string(),
        Signal::Current => "CURRENT".green().bold().to_string(),
        Signal::Pending => "PENDING".yellow().bold().to_string(),
        Signal::Error => "ERROR".red().bold().to_string(),
    }
}
