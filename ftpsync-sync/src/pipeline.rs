//! Per-project entrypoints used by the CLI.
//!
//! Every operation names its project explicitly; there is no "current
//! project". `sync` and `dry_run` share one planner call, so a dry run shows
//! exactly what a sync would do.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use ftpsync_core::registry;
use ftpsync_core::types::{Credentials, ProjectName, ProjectProfile};

use crate::error::{StateError, SyncError};
use crate::orchestrator::{self, ApplyOptions, CancelFlag, ProgressEvent, ProgressFn, SyncReport};
use crate::planner::{self, ChangeKind, ChangeSet, PlanOptions};
use crate::state_store::{self, FileRecord, Mutation, ProjectState, StateStore};
use crate::transport::Transport;

/// Caller-side knobs for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Hash every file regardless of size and mtime.
    pub force_revalidate: bool,
    /// Overrides the profile's concurrency setting.
    pub concurrency: Option<usize>,
    /// Start from empty state when the stored state is corrupt. Without
    /// this, corruption is an error.
    pub reset_corrupt_state: bool,
}

impl SyncOptions {
    fn plan_options(&self) -> PlanOptions {
        PlanOptions {
            force_revalidate: self.force_revalidate,
        }
    }
}

/// Compute the change set for `name` without touching the remote or the state.
pub fn dry_run(home: &Path, name: &ProjectName, options: &SyncOptions) -> Result<ChangeSet, SyncError> {
    let profile = registry::select_at(home, name)?;
    let prior = match state_store::load_at(home, &profile.id) {
        Ok(state) => state,
        Err(StateError::Corrupt { path, .. }) if options.reset_corrupt_state => {
            tracing::warn!(
                "state at {} is corrupt; planning as if nothing was synced",
                path.display()
            );
            ProjectState::empty(profile.id.clone())
        }
        Err(e) => return Err(e.into()),
    };
    planner::plan(&profile, &prior, &options.plan_options())
}

/// Plan and apply `name` through `transport`.
///
/// Errors here mean no work was attempted (unknown project, corrupt state,
/// unreadable root). Everything that happens once transfers start is in the
/// returned report.
pub fn sync(
    home: &Path,
    name: &ProjectName,
    transport: &dyn Transport,
    credentials: &Credentials,
    options: &SyncOptions,
    cancel: &CancelFlag,
) -> Result<SyncReport, SyncError> {
    sync_with_progress(
        home,
        name,
        transport,
        credentials,
        options,
        cancel,
        &|_: ProgressEvent| {},
    )
}

/// [`sync`], reporting each finished entry to `progress`.
pub fn sync_with_progress(
    home: &Path,
    name: &ProjectName,
    transport: &dyn Transport,
    credentials: &Credentials,
    options: &SyncOptions,
    cancel: &CancelFlag,
    progress: ProgressFn<'_>,
) -> Result<SyncReport, SyncError> {
    let profile = registry::select_at(home, name)?;
    let mut store = StateStore::open_or_reset_at(home, &profile.id, options.reset_corrupt_state)?;
    let change_set = planner::plan(&profile, store.state(), &options.plan_options())?;

    let mut apply_options = ApplyOptions::from_settings(&profile.settings);
    if let Some(concurrency) = options.concurrency {
        apply_options.concurrency = concurrency.max(1);
    }
    tracing::info!(
        "syncing {} ({} changes) to {}",
        profile.name,
        change_set.entries.len(),
        profile.remote.protocol
    );
    Ok(orchestrator::apply_with_progress(
        &change_set,
        transport,
        &profile.remote,
        credentials,
        &mut store,
        &apply_options,
        cancel,
        progress,
    ))
}

/// Record the local tree as already uploaded without transferring anything.
///
/// For a folder whose remote copy is known to match already: every pending
/// add or edit becomes a record, pending deletions and pruned paths are
/// dropped, and the next sync only sees changes made after this point.
/// Written in one state commit. Returns the number of paths marked.
pub fn mark_synced(home: &Path, name: &ProjectName) -> Result<usize, SyncError> {
    let profile = registry::select_at(home, name)?;
    let mut store = StateStore::open_at(home, &profile.id)?;
    let change_set = planner::plan(&profile, store.state(), &PlanOptions::default())?;
    let now = Utc::now();

    let mut mutations = Vec::new();
    for entry in &change_set.entries {
        match (entry.kind, &entry.new_fingerprint, entry.size) {
            (ChangeKind::Deleted, _, _) => {
                mutations.push(Mutation::Tombstone(entry.relative_path.clone()));
            }
            (_, Some(fingerprint), Some(size)) => {
                mutations.push(Mutation::Record(FileRecord {
                    relative_path: entry.relative_path.clone(),
                    fingerprint: fingerprint.clone(),
                    size,
                    modified: entry.modified,
                    last_synced_at: now,
                }));
            }
            _ => tracing::warn!("{}: planned without a fingerprint", entry.relative_path),
        }
    }
    let marked = mutations.len();
    for path in &change_set.pruned {
        mutations.push(Mutation::Tombstone(path.clone()));
    }
    for refresh in &change_set.refreshed {
        if let Some(record) = store.state().records.get(&refresh.relative_path) {
            let mut record = record.clone();
            record.modified = refresh.modified;
            mutations.push(Mutation::Record(record));
        }
    }
    store.commit_all(mutations)?;
    tracing::info!("marked {marked} paths of {} as synced", profile.name);
    Ok(marked)
}

/// Every registered profile, sorted by name.
pub fn list_projects(home: &Path) -> Result<Vec<ProjectProfile>, SyncError> {
    Ok(registry::list_at(home)?)
}

/// Remove a profile. Its sync state is kept unless `purge_state` is set, so
/// re-adding the same folder resumes incrementally.
pub fn remove_project(
    home: &Path,
    name: &ProjectName,
    purge_state: bool,
) -> Result<ProjectProfile, SyncError> {
    let profile = registry::remove_at(home, name)?;
    if purge_state && state_store::purge_at(home, &profile.id)? {
        tracing::info!("purged sync state for {}", profile.name);
    }
    Ok(profile)
}

/// Forget every tracked record; the next sync uploads everything. Also
/// clears a corrupt state file. Returns the number of records dropped.
pub fn reset_tracking(home: &Path, name: &ProjectName) -> Result<usize, SyncError> {
    let profile = registry::select_at(home, name)?;
    let mut store = StateStore::open_or_reset_at(home, &profile.id, true)?;
    Ok(store.reset()?)
}

/// Summary of a project's tracking state and pending work.
#[derive(Debug, Clone, Serialize)]
pub struct ProjectStatus {
    pub profile: ProjectProfile,
    pub tracked: usize,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub added: usize,
    pub modified: usize,
    pub deleted: usize,
    pub pruned: usize,
    pub skipped: usize,
}

impl ProjectStatus {
    pub fn pending(&self) -> usize {
        self.added + self.modified + self.deleted
    }
}

pub fn status(home: &Path, name: &ProjectName) -> Result<ProjectStatus, SyncError> {
    let profile = registry::select_at(home, name)?;
    let state = state_store::load_at(home, &profile.id)?;
    let change_set = planner::plan(&profile, &state, &PlanOptions::default())?;
    Ok(ProjectStatus {
        tracked: state.records.len(),
        last_full_sync_at: state.last_full_sync_at,
        added: change_set.count(ChangeKind::Added),
        modified: change_set.count(ChangeKind::Modified),
        deleted: change_set.count(ChangeKind::Deleted),
        pruned: change_set.pruned.len(),
        skipped: change_set.skipped.len(),
        profile,
    })
}

/// Log in, make sure the remote base directory exists, log out.
pub fn check_connection(
    profile: &ProjectProfile,
    transport: &dyn Transport,
    credentials: &Credentials,
) -> Result<(), SyncError> {
    let mut session = transport.connect(&profile.remote, credentials)?;
    let base = profile.remote.base_path.trim_end_matches('/');
    if !base.is_empty() {
        session.ensure_directory(base)?;
    }
    session.close()?;
    Ok(())
}
