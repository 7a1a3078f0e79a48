//! `ftpsync sync <name>` — upload what changed since the last run.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use ftpsync_core::{registry, types::ProjectName};
use ftpsync_sync::{
    pipeline, AppliedAction, CancelFlag, ProgressEvent, SyncOptions, SyncOutcome, SyncReport,
};

use super::progress::SyncProgress;
use super::{home, print_change_set, resolve_credentials, transport_for};

/// Arguments for `ftpsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Project to sync.
    pub name: String,

    /// Show what would be transferred without connecting.
    #[arg(long)]
    pub dry_run: bool,

    /// Re-hash every file instead of trusting size and mtime.
    #[arg(long)]
    pub force: bool,

    /// Override the profile's transfer concurrency.
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Move a corrupt state file aside and start from scratch (re-uploads everything).
    #[arg(long = "reset-corrupt-state")]
    pub reset_corrupt_state: bool,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let name = ProjectName::from(self.name.clone());
        let options = SyncOptions {
            force_revalidate: self.force,
            concurrency: self.concurrency,
            reset_corrupt_state: self.reset_corrupt_state,
        };

        if self.dry_run {
            let set = pipeline::dry_run(&home, &name, &options)
                .with_context(|| format!("planning failed for '{name}'"))?;
            if self.json {
                println!("{}", serde_json::to_string_pretty(&set)?);
            } else {
                print_change_set(&self.name, &set, "[dry-run] ");
            }
            return Ok(());
        }

        let profile = registry::select_at(&home, &name)
            .with_context(|| format!("unknown project '{name}'"))?;
        let credentials = resolve_credentials(&profile)?;
        let transport = transport_for(&profile);
        let cancel = CancelFlag::new();
        let progress = SyncProgress::new(self.json);

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to start runtime")?;
        let report = runtime.block_on(async {
            let worker_cancel = cancel.clone();
            let worker_progress = progress.clone();
            let mut handle = tokio::task::spawn_blocking(move || {
                pipeline::sync_with_progress(
                    &home,
                    &name,
                    transport.as_ref(),
                    &credentials,
                    &options,
                    &worker_cancel,
                    &|event: ProgressEvent| worker_progress.observe(event),
                )
            });
            tokio::select! {
                joined = &mut handle => joined,
                signal = tokio::signal::ctrl_c() => {
                    if signal.is_ok() {
                        eprintln!("{}", "interrupt: finishing in-flight transfers…".yellow());
                        tracing::info!("received ctrl-c, cancelling sync");
                        cancel.cancel();
                    }
                    handle.await
                }
            }
        });
        progress.finish();
        let report = report
            .context("sync worker panicked")?
            .with_context(|| format!("sync failed for '{}'", self.name))?;

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&self.name, &report);
        }

        match report.outcome() {
            SyncOutcome::NothingToDo | SyncOutcome::Complete => Ok(()),
            SyncOutcome::Partial => bail!("{} file(s) failed to sync", report.failed.len()),
            SyncOutcome::AllFailed => bail!("every transfer failed"),
            SyncOutcome::Cancelled => bail!("sync cancelled"),
            SyncOutcome::Aborted => bail!(
                "sync aborted: {}",
                report.aborted.as_deref().unwrap_or("fatal error")
            ),
        }
    }
}

fn print_report(name: &str, report: &SyncReport) {
    let seconds = (report.finished_at - report.started_at).num_milliseconds() as f64 / 1000.0;
    match report.outcome() {
        SyncOutcome::NothingToDo => println!("✓ '{name}' — nothing to do"),
        SyncOutcome::Complete => println!(
            "✓ '{name}' synced ({} transferred in {seconds:.1}s)",
            report.succeeded.len()
        ),
        SyncOutcome::Partial => println!(
            "{}",
            format!(
                "⚠ '{name}' partially synced ({} ok, {} failed)",
                report.succeeded.len(),
                report.failed.len()
            )
            .yellow()
        ),
        SyncOutcome::AllFailed => println!(
            "{}",
            format!("✗ '{name}': all {} transfers failed", report.failed.len()).red()
        ),
        SyncOutcome::Aborted => println!(
            "{}",
            format!(
                "✗ '{name}' aborted: {}",
                report.aborted.as_deref().unwrap_or("fatal error")
            )
            .red()
        ),
        SyncOutcome::Cancelled => println!(
            "{}",
            format!(
                "⚠ '{name}' cancelled ({} done, {} not started)",
                report.succeeded.len(),
                report.skipped.len()
            )
            .yellow()
        ),
    }

    for entry in &report.succeeded {
        let marker = match entry.action {
            AppliedAction::Uploaded => "↑",
            AppliedAction::Deleted => "✗",
            AppliedAction::AlreadyAbsent => "·",
            AppliedAction::Untracked => "−",
        };
        println!("  {marker}  {}", entry.relative_path);
    }
    for entry in &report.failed {
        println!(
            "  {}",
            format!("!  {}: {}", entry.relative_path, entry.reason).red()
        );
    }
    for entry in &report.excluded {
        println!(
            "  {}",
            format!("-  {} skipped: {}", entry.relative_path, entry.reason).dimmed()
        );
    }
    if report.pruned > 0 {
        println!("  {} now-ignored path(s) untracked", report.pruned);
    }
}
