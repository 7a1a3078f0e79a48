//! Upload orchestrator — applies a [`ChangeSet`] through a [`Transport`].
//!
//! Deletions go first, as one batch, and remote directories they leave
//! empty are removed, so a directory replaced by a file of the same name
//! is out of the way before the upload. Uploads then run one depth level at
//! a time. Within a level the parent directories are created first on the
//! primary session, then the files are handed to up to `concurrency`
//! worker threads, each with its own session. A child is therefore never
//! dispatched before its parent directory exists.
//!
//! Every success is committed to the [`StateStore`] as soon as it lands, so
//! an interrupted run keeps whatever finished.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::{DateTime, Utc};
use serde::Serialize;

use ftpsync_core::types::{Credentials, ProjectId, RemoteTarget, SyncSettings};

use crate::planner::{ChangeEntry, ChangeKind, ChangeSet, SkippedPath};
use crate::state_store::{FileRecord, Mutation, StateStore};
use crate::transport::{remote_parent, Session, Transport, TransportError};

type Slot = Option<Box<dyn Session>>;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Bounded exponential backoff for transient (network) failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total tries per operation, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            base_delay: Duration::from_millis(settings.retry_base_delay_ms),
        }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.base_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_interval(self.base_delay * 16)
            .with_max_elapsed_time(None)
            .build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOptions {
    /// Upper bound on simultaneous sessions.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// When false, local deletions only untrack the path.
    pub delete_remote: bool,
}

impl ApplyOptions {
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self {
            concurrency: settings.concurrency.max(1),
            retry: RetryPolicy::from_settings(settings),
            delete_remote: settings.delete_remote,
        }
    }
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self::from_settings(&SyncSettings::default())
    }
}

/// Shared cancellation switch. Once set, no new transfer is dispatched;
/// transfers already in flight run to completion.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress notifications emitted while a change set is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Sent once, before the first transfer.
    Started { total: usize },
    /// One entry finished, successfully or not.
    Finished {
        relative_path: String,
        kind: ChangeKind,
        ok: bool,
    },
}

/// Receives [`ProgressEvent`]s; called from worker threads.
pub type ProgressFn<'a> = &'a (dyn Fn(ProgressEvent) + Sync);

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliedAction {
    Uploaded,
    Deleted,
    /// The remote copy was already gone; the record was still removed.
    AlreadyAbsent,
    /// Remote deletion is disabled; the record was removed without touching the remote.
    Untracked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedEntry {
    pub relative_path: String,
    pub kind: ChangeKind,
    pub action: AppliedAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEntry {
    pub relative_path: String,
    pub kind: ChangeKind,
    pub reason: String,
}

/// An entry never attempted because the run was cancelled or aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedEntry {
    pub relative_path: String,
    pub kind: ChangeKind,
    pub reason: String,
}

/// How a run ended, from the user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Nothing to transfer.
    NothingToDo,
    Complete,
    Partial,
    AllFailed,
    /// Stopped by a fatal error (auth, permission, state write).
    Aborted,
    Cancelled,
}

impl SyncOutcome {
    /// Nothing left pending.
    pub fn is_success(self) -> bool {
        matches!(self, SyncOutcome::NothingToDo | SyncOutcome::Complete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub project_id: ProjectId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub succeeded: Vec<AppliedEntry>,
    pub failed: Vec<FailedEntry>,
    pub skipped: Vec<SkippedEntry>,
    /// Local files the planner left out (too large, unreadable).
    pub excluded: Vec<SkippedPath>,
    /// Records dropped because their path is now ignored.
    pub pruned: usize,
    /// Records whose stored mtime was refreshed without a transfer.
    pub refreshed: usize,
    /// Fatal reason, when the run was cut short.
    pub aborted: Option<String>,
    pub cancelled: bool,
}

impl SyncReport {
    fn new(change_set: &ChangeSet, started_at: DateTime<Utc>) -> Self {
        Self {
            project_id: change_set.project_id.clone(),
            started_at,
            finished_at: started_at,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            excluded: change_set.skipped.clone(),
            pruned: 0,
            refreshed: 0,
            aborted: None,
            cancelled: false,
        }
    }

    pub fn outcome(&self) -> SyncOutcome {
        if self.aborted.is_some() {
            SyncOutcome::Aborted
        } else if self.cancelled {
            SyncOutcome::Cancelled
        } else if self.succeeded.is_empty() && self.failed.is_empty() && self.skipped.is_empty() {
            SyncOutcome::NothingToDo
        } else if self.failed.is_empty() && self.skipped.is_empty() {
            SyncOutcome::Complete
        } else if self.succeeded.is_empty() {
            SyncOutcome::AllFailed
        } else {
            SyncOutcome::Partial
        }
    }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Execute `change_set` against the remote and commit each success to `store`.
///
/// Per-file failures are collected in the report and never stop the run.
/// Auth and permission errors abort it: nothing further is dispatched.
/// A remote that stays unreachable after the retry budget fails every
/// entry instead. Pruned and refreshed records are only committed once the
/// remote has accepted a login (or when no transfer is needed at all).
pub fn apply(
    change_set: &ChangeSet,
    transport: &dyn Transport,
    remote: &RemoteTarget,
    credentials: &Credentials,
    store: &mut StateStore,
    options: &ApplyOptions,
    cancel: &CancelFlag,
) -> SyncReport {
    apply_with_progress(
        change_set,
        transport,
        remote,
        credentials,
        store,
        options,
        cancel,
        &|_: ProgressEvent| {},
    )
}

/// [`apply`], reporting each finished entry to `progress`.
#[allow(clippy::too_many_arguments)]
pub fn apply_with_progress(
    change_set: &ChangeSet,
    transport: &dyn Transport,
    remote: &RemoteTarget,
    credentials: &Credentials,
    store: &mut StateStore,
    options: &ApplyOptions,
    cancel: &CancelFlag,
    progress: ProgressFn<'_>,
) -> SyncReport {
    let mut report = SyncReport::new(change_set, Utc::now());
    let run = Run {
        local_root: &change_set.local_root,
        transport,
        remote,
        credentials,
        options,
        cancel,
        progress,
        store: Mutex::new(store),
        abort_reason: Mutex::new(None),
        aborted: AtomicBool::new(false),
        tally: Mutex::new(Tally::default()),
    };

    let entries = &change_set.entries;
    progress(ProgressEvent::Started {
        total: entries.len(),
    });
    let phases = phases(entries);
    let needs_transport = entries
        .iter()
        .any(|e| e.kind != ChangeKind::Deleted || options.delete_remote);
    let mut pool: Vec<Slot> = (0..options.concurrency.max(1)).map(|_| None).collect();

    let mut ready = true;
    let mut done = 0;
    if needs_transport && !cancel.is_cancelled() {
        if let Err(e) = run.with_retry(&mut pool[0], |_| Ok(())) {
            let reason = format!("could not connect to {}: {e}", remote_label(remote));
            if e.is_fatal() {
                run.abort(reason);
            } else {
                tracing::warn!("{reason}");
                for entry in entries {
                    run.record_failed(entry, reason.clone());
                }
                done = phases.len();
            }
            ready = false;
        }
    }

    if ready && !cancel.is_cancelled() {
        match run.housekeeping(change_set) {
            Ok((pruned, refreshed)) => {
                report.pruned = pruned;
                report.refreshed = refreshed;
            }
            Err(reason) => run.abort(reason),
        }

        let mut ensured = HashSet::new();
        while done < phases.len() && !run.should_stop() {
            let phase = &phases[done];
            let queue = run.prepare_directories(&mut pool[0], phase, &mut ensured);
            run.dispatch(&mut pool, &queue);
            if phase.iter().all(|e| e.kind == ChangeKind::Deleted) {
                run.remove_emptied_directories(&mut pool[0]);
            }
            done += 1;
        }
    }
    run.skip_all(phases[done..].iter().flatten().copied());

    for slot in pool.iter_mut() {
        if let Some(session) = slot.take() {
            if let Err(e) = session.close() {
                tracing::debug!("closing session: {e}");
            }
        }
    }

    let Run {
        store,
        abort_reason,
        tally,
        ..
    } = run;
    let tally = tally.into_inner().unwrap_or_else(PoisonError::into_inner);
    report.succeeded = tally.succeeded;
    report.failed = tally.failed;
    report.skipped = tally.skipped;
    report.aborted = abort_reason.into_inner().unwrap_or_else(PoisonError::into_inner);
    report.cancelled =
        report.aborted.is_none() && cancel.is_cancelled() && !report.skipped.is_empty();
    report.finished_at = Utc::now();

    let outcome = report.outcome();
    if outcome.is_success() {
        let store = store.into_inner().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = store.mark_full_sync(report.finished_at) {
            tracing::warn!("could not record full sync time: {e}");
        }
    }
    tracing::info!(
        "sync finished: {outcome:?} ({} ok, {} failed, {} skipped)",
        report.succeeded.len(),
        report.failed.len(),
        report.skipped.len()
    );
    report
}

/// Deletions as one batch, then uploads grouped by depth.
fn phases(entries: &[ChangeEntry]) -> Vec<Vec<&ChangeEntry>> {
    let mut phases = Vec::new();
    let deletions: Vec<&ChangeEntry> = entries
        .iter()
        .filter(|e| e.kind == ChangeKind::Deleted)
        .collect();
    if !deletions.is_empty() {
        phases.push(deletions);
    }
    let mut depth = None;
    for entry in entries.iter().filter(|e| e.kind != ChangeKind::Deleted) {
        if depth != Some(entry.depth()) {
            depth = Some(entry.depth());
            phases.push(Vec::new());
        }
        if let Some(level) = phases.last_mut() {
            level.push(entry);
        }
    }
    phases
}

fn remote_label(remote: &RemoteTarget) -> String {
    if remote.host.is_empty() {
        remote.base_path.clone()
    } else {
        format!("{}:{}", remote.host, remote.port)
    }
}

// ---------------------------------------------------------------------------
// Run internals
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Tally {
    succeeded: Vec<AppliedEntry>,
    failed: Vec<FailedEntry>,
    skipped: Vec<SkippedEntry>,
}

struct Run<'a> {
    local_root: &'a Path,
    transport: &'a dyn Transport,
    remote: &'a RemoteTarget,
    credentials: &'a Credentials,
    options: &'a ApplyOptions,
    cancel: &'a CancelFlag,
    progress: ProgressFn<'a>,
    store: Mutex<&'a mut StateStore>,
    abort_reason: Mutex<Option<String>>,
    aborted: AtomicBool,
    tally: Mutex<Tally>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Run<'_> {
    fn should_stop(&self) -> bool {
        self.aborted.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// First fatal reason wins.
    fn abort(&self, reason: String) {
        tracing::error!("aborting run: {reason}");
        let mut slot = lock(&self.abort_reason);
        if slot.is_none() {
            *slot = Some(reason);
        }
        self.aborted.store(true, Ordering::SeqCst);
    }

    fn stop_reason(&self) -> String {
        match lock(&self.abort_reason).as_deref() {
            Some(reason) => format!("aborted: {reason}"),
            None => "cancelled".to_string(),
        }
    }

    fn commit(&self, mutation: Mutation) -> Result<(), String> {
        lock(&self.store).commit(mutation).map_err(|e| {
            let reason = format!("state commit failed: {e}");
            self.abort(reason.clone());
            reason
        })
    }

    /// Drop now-ignored records and refresh moved mtimes.
    fn housekeeping(&self, change_set: &ChangeSet) -> Result<(usize, usize), String> {
        for path in &change_set.pruned {
            self.commit(Mutation::Tombstone(path.clone()))?;
        }
        let mut refreshed = 0;
        for refresh in &change_set.refreshed {
            let existing = lock(&self.store)
                .state()
                .records
                .get(&refresh.relative_path)
                .cloned();
            if let Some(mut record) = existing {
                record.modified = refresh.modified;
                self.commit(Mutation::Record(record))?;
                refreshed += 1;
            }
        }
        Ok((change_set.pruned.len(), refreshed))
    }

    /// Run `op` on a live session, reconnecting and backing off on
    /// transient errors up to the policy's attempt budget.
    fn with_retry<T>(
        &self,
        slot: &mut Slot,
        mut op: impl FnMut(&mut dyn Session) -> Result<T, TransportError>,
    ) -> Result<T, TransportError> {
        let max_attempts = self.options.retry.max_attempts.max(1);
        let mut attempt = 0;
        backoff::retry(self.options.retry.backoff(), || {
            attempt += 1;
            let result = match self.session(slot) {
                Ok(session) => op(&mut **session),
                Err(e) => Err(e),
            };
            result.map_err(|e| {
                if e.is_transient() {
                    *slot = None;
                }
                if e.is_transient() && attempt < max_attempts && !self.cancel.is_cancelled() {
                    tracing::warn!("attempt {attempt}/{max_attempts} failed, retrying: {e}");
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .map_err(|e| match e {
            backoff::Error::Permanent(e) => e,
            backoff::Error::Transient { err, .. } => err,
        })
    }

    fn session<'s>(&self, slot: &'s mut Slot) -> Result<&'s mut Box<dyn Session>, TransportError> {
        if slot.is_none() {
            tracing::debug!("opening session to {}", remote_label(self.remote));
            *slot = Some(self.transport.connect(self.remote, self.credentials)?);
        }
        slot.as_mut()
            .ok_or_else(|| TransportError::Network("session unavailable".to_string()))
    }

    fn parent_dir(&self, relative_path: &str) -> Option<String> {
        remote_parent(&self.remote.remote_path(relative_path)).map(str::to_string)
    }

    /// Create the remote parents a level needs. Returns the entries whose
    /// parents are in place; the rest are recorded as failed.
    fn prepare_directories<'e>(
        &self,
        slot: &mut Slot,
        level: &[&'e ChangeEntry],
        ensured: &mut HashSet<String>,
    ) -> Vec<&'e ChangeEntry> {
        let mut unavailable: HashMap<String, String> = HashMap::new();
        for entry in level.iter().filter(|e| e.kind != ChangeKind::Deleted) {
            if self.should_stop() {
                break;
            }
            let Some(dir) = self.parent_dir(&entry.relative_path) else {
                continue;
            };
            if ensured.contains(&dir) || unavailable.contains_key(&dir) {
                continue;
            }
            match self.with_retry(slot, |s| s.ensure_directory(&dir)) {
                Ok(()) => {
                    tracing::debug!("remote directory ready: {dir}");
                    ensured.insert(dir);
                }
                Err(e) => {
                    if e.is_fatal() {
                        self.abort(format!("creating {dir}: {e}"));
                    } else {
                        tracing::warn!("cannot create {dir}: {e}");
                    }
                    unavailable.insert(dir, e.to_string());
                }
            }
        }

        level
            .iter()
            .copied()
            .filter(|entry| {
                if entry.kind == ChangeKind::Deleted {
                    return true;
                }
                let blocked = self
                    .parent_dir(&entry.relative_path)
                    .and_then(|dir| unavailable.get(&dir).map(|e| format!("{dir}: {e}")));
                match blocked {
                    Some(reason) => {
                        self.record_failed(entry, format!("remote directory unavailable: {reason}"));
                        false
                    }
                    None => true,
                }
            })
            .collect()
    }

    /// Remove remote directories emptied by this run's deletions, deepest
    /// first. A directory that still holds anything is left in place.
    fn remove_emptied_directories(&self, slot: &mut Slot) {
        let mut dirs = BTreeSet::new();
        for entry in lock(&self.tally).succeeded.iter().filter(|e| {
            matches!(e.action, AppliedAction::Deleted | AppliedAction::AlreadyAbsent)
        }) {
            let mut path = entry.relative_path.as_str();
            while let Some((parent, _)) = path.rsplit_once('/') {
                dirs.insert(parent.to_string());
                path = parent;
            }
        }
        let mut dirs: Vec<String> = dirs.into_iter().collect();
        dirs.sort_by_key(|dir| Reverse(dir.matches('/').count()));

        for dir in dirs {
            if self.should_stop() {
                return;
            }
            let remote = self.remote.remote_path(&dir);
            match self.with_retry(slot, |s| s.remove_directory(&remote)) {
                Ok(()) => tracing::debug!("removed empty remote directory {remote}"),
                Err(e) => tracing::debug!("keeping remote directory {remote}: {e}"),
            }
        }
    }

    /// Fan a level out over the session pool.
    fn dispatch(&self, pool: &mut [Slot], queue: &[&ChangeEntry]) {
        if queue.is_empty() {
            return;
        }
        let next = AtomicUsize::new(0);
        let workers = pool.len().min(queue.len());
        thread::scope(|scope| {
            for slot in pool.iter_mut().take(workers) {
                let next = &next;
                scope.spawn(move || self.work(slot, queue, next));
            }
        });
        let dispatched = next.load(Ordering::SeqCst).min(queue.len());
        self.skip_all(queue[dispatched..].iter().copied());
    }

    fn work(&self, slot: &mut Slot, queue: &[&ChangeEntry], next: &AtomicUsize) {
        loop {
            if self.should_stop() {
                return;
            }
            let index = next.fetch_add(1, Ordering::SeqCst);
            let Some(entry) = queue.get(index) else {
                return;
            };
            let result = match entry.kind {
                ChangeKind::Added | ChangeKind::Modified => self.upload(slot, entry),
                ChangeKind::Deleted => self.delete(slot, entry),
            };
            match result {
                Ok(action) => self.record_success(entry, action),
                Err(reason) => self.record_failed(entry, reason),
            }
        }
    }

    fn upload(&self, slot: &mut Slot, entry: &ChangeEntry) -> Result<AppliedAction, String> {
        let (Some(fingerprint), Some(size)) = (entry.new_fingerprint.clone(), entry.size) else {
            return Err("planned upload carries no fingerprint".to_string());
        };
        let local = self.local_root.join(&entry.relative_path);
        let remote = self.remote.remote_path(&entry.relative_path);
        self.with_retry(slot, |s| s.upload(&local, &remote))
            .map_err(|e| self.transport_failure(&entry.relative_path, e))?;
        self.commit(Mutation::Record(FileRecord {
            relative_path: entry.relative_path.clone(),
            fingerprint,
            size,
            modified: entry.modified,
            last_synced_at: Utc::now(),
        }))?;
        Ok(AppliedAction::Uploaded)
    }

    fn delete(&self, slot: &mut Slot, entry: &ChangeEntry) -> Result<AppliedAction, String> {
        let action = if self.options.delete_remote {
            let remote = self.remote.remote_path(&entry.relative_path);
            match self.with_retry(slot, |s| s.delete(&remote)) {
                Ok(()) => AppliedAction::Deleted,
                Err(TransportError::NotFound(_)) => AppliedAction::AlreadyAbsent,
                Err(e) => return Err(self.transport_failure(&entry.relative_path, e)),
            }
        } else {
            AppliedAction::Untracked
        };
        self.commit(Mutation::Tombstone(entry.relative_path.clone()))?;
        Ok(action)
    }

    fn transport_failure(&self, relative_path: &str, e: TransportError) -> String {
        if e.is_fatal() {
            self.abort(format!("{relative_path}: {e}"));
        } else {
            tracing::warn!("{relative_path}: {e}");
        }
        e.to_string()
    }

    fn record_success(&self, entry: &ChangeEntry, action: AppliedAction) {
        tracing::info!("{action:?}: {}", entry.relative_path);
        lock(&self.tally).succeeded.push(AppliedEntry {
            relative_path: entry.relative_path.clone(),
            kind: entry.kind,
            action,
        });
        (self.progress)(ProgressEvent::Finished {
            relative_path: entry.relative_path.clone(),
            kind: entry.kind,
            ok: true,
        });
    }

    fn record_failed(&self, entry: &ChangeEntry, reason: String) {
        lock(&self.tally).failed.push(FailedEntry {
            relative_path: entry.relative_path.clone(),
            kind: entry.kind,
            reason,
        });
        (self.progress)(ProgressEvent::Finished {
            relative_path: entry.relative_path.clone(),
            kind: entry.kind,
            ok: false,
        });
    }

    fn skip_all<'e>(&self, entries: impl Iterator<Item = &'e ChangeEntry>) {
        let reason = self.stop_reason();
        let mut tally = lock(&self.tally);
        for entry in entries {
            tally.skipped.push(SkippedEntry {
                relative_path: entry.relative_path.clone(),
                kind: entry.kind,
                reason: reason.clone(),
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::Fingerprint;
    use crate::transport::LocalTransport;
    use ftpsync_core::types::Protocol;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn change_set(root: &Path, entries: Vec<ChangeEntry>) -> ChangeSet {
        ChangeSet {
            project_id: ProjectId::from("0123456789abcdef"),
            local_root: root.to_path_buf(),
            entries,
            refreshed: Vec::new(),
            pruned: Vec::new(),
            skipped: Vec::new(),
            scanned: 0,
        }
    }

    fn added(root: &Path, rel: &str, content: &str) -> ChangeEntry {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        ChangeEntry {
            relative_path: rel.to_string(),
            kind: ChangeKind::Added,
            new_fingerprint: Some(Fingerprint(format!("fp-{rel}"))),
            size: Some(content.len() as u64),
            modified: None,
        }
    }

    fn deleted(rel: &str) -> ChangeEntry {
        ChangeEntry {
            relative_path: rel.to_string(),
            kind: ChangeKind::Deleted,
            new_fingerprint: None,
            size: None,
            modified: None,
        }
    }

    fn remote(dir: PathBuf) -> RemoteTarget {
        RemoteTarget {
            protocol: Protocol::Local,
            host: String::new(),
            port: 0,
            base_path: dir.to_string_lossy().into_owned(),
        }
    }

    fn quick() -> ApplyOptions {
        ApplyOptions {
            concurrency: 2,
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
            },
            delete_remote: true,
        }
    }

    struct Fixture {
        _tmp: TempDir,
        home: PathBuf,
        local: PathBuf,
        remote: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let home = tmp.path().join("home");
        let local = tmp.path().join("local");
        let remote = tmp.path().join("remote");
        fs::create_dir_all(&local).unwrap();
        Fixture {
            _tmp: tmp,
            home,
            local,
            remote,
        }
    }

    #[test]
    fn outcome_precedence() {
        let set = change_set(Path::new("/x"), Vec::new());
        let mut report = SyncReport::new(&set, Utc::now());
        assert_eq!(report.outcome(), SyncOutcome::NothingToDo);

        report.failed.push(FailedEntry {
            relative_path: "b".into(),
            kind: ChangeKind::Added,
            reason: "boom".into(),
        });
        assert_eq!(report.outcome(), SyncOutcome::AllFailed);

        report.succeeded.push(AppliedEntry {
            relative_path: "a".into(),
            kind: ChangeKind::Added,
            action: AppliedAction::Uploaded,
        });
        assert_eq!(report.outcome(), SyncOutcome::Partial);

        report.failed.clear();
        assert_eq!(report.outcome(), SyncOutcome::Complete);

        report.cancelled = true;
        assert_eq!(report.outcome(), SyncOutcome::Cancelled);
        report.aborted = Some("auth".into());
        assert_eq!(report.outcome(), SyncOutcome::Aborted);
    }

    #[test]
    fn uploads_nested_files_and_commits_each() {
        let fx = fixture();
        let entries = vec![
            added(&fx.local, "index.html", "<html>"),
            added(&fx.local, "css/site.css", "body{}"),
            added(&fx.local, "css/img/logo.svg", "<svg/>"),
        ];
        let set = change_set(&fx.local, entries);
        let mut store = StateStore::open_at(&fx.home, &set.project_id).unwrap();

        let report = apply(
            &set,
            &LocalTransport::new(),
            &remote(fx.remote.clone()),
            &Credentials::default(),
            &mut store,
            &quick(),
            &CancelFlag::new(),
        );

        assert_eq!(report.outcome(), SyncOutcome::Complete, "{report:?}");
        assert_eq!(fs::read_to_string(fx.remote.join("css/img/logo.svg")).unwrap(), "<svg/>");
        assert_eq!(store.state().records.len(), 3);
        assert!(store.state().last_full_sync_at.is_some());
    }

    #[test]
    fn delete_of_absent_remote_file_counts_as_success() {
        let fx = fixture();
        let set = change_set(&fx.local, vec![deleted("gone.txt")]);
        let mut store = StateStore::open_at(&fx.home, &set.project_id).unwrap();
        store
            .commit(Mutation::Record(FileRecord {
                relative_path: "gone.txt".into(),
                fingerprint: Fingerprint("aa".into()),
                size: 1,
                modified: None,
                last_synced_at: Utc::now(),
            }))
            .unwrap();

        let report = apply(
            &set,
            &LocalTransport::new(),
            &remote(fx.remote.clone()),
            &Credentials::default(),
            &mut store,
            &quick(),
            &CancelFlag::new(),
        );

        assert_eq!(report.succeeded[0].action, AppliedAction::AlreadyAbsent);
        assert!(store.state().records.is_empty());
    }

    #[test]
    fn delete_remote_disabled_only_untracks() {
        let fx = fixture();
        fs::create_dir_all(&fx.remote).unwrap();
        fs::write(fx.remote.join("keep.txt"), "k").unwrap();
        let set = change_set(&fx.local, vec![deleted("keep.txt")]);
        let mut store = StateStore::open_at(&fx.home, &set.project_id).unwrap();
        let mut options = quick();
        options.delete_remote = false;

        let report = apply(
            &set,
            &LocalTransport::new(),
            &remote(fx.remote.clone()),
            &Credentials::default(),
            &mut store,
            &options,
            &CancelFlag::new(),
        );

        assert_eq!(report.succeeded[0].action, AppliedAction::Untracked);
        assert!(fx.remote.join("keep.txt").exists());
    }

    #[test]
    fn cancelled_before_start_skips_everything() {
        let fx = fixture();
        let set = change_set(&fx.local, vec![added(&fx.local, "a.txt", "a")]);
        let mut store = StateStore::open_at(&fx.home, &set.project_id).unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let report = apply(
            &set,
            &LocalTransport::new(),
            &remote(fx.remote.clone()),
            &Credentials::default(),
            &mut store,
            &quick(),
            &cancel,
        );

        assert_eq!(report.outcome(), SyncOutcome::Cancelled);
        assert_eq!(report.skipped.len(), 1);
        assert!(store.state().records.is_empty());
        assert!(!fx.remote.join("a.txt").exists());
    }

    #[test]
    fn unreachable_remote_fails_every_entry_without_commits() {
        let fx = fixture();
        let set = change_set(&fx.local, vec![added(&fx.local, "a.txt", "a")]);
        let mut store = StateStore::open_at(&fx.home, &set.project_id).unwrap();
        let bad = RemoteTarget {
            protocol: Protocol::Local,
            host: String::new(),
            port: 0,
            base_path: "relative/not/allowed".into(),
        };

        let report = apply(
            &set,
            &LocalTransport::new(),
            &bad,
            &Credentials::default(),
            &mut store,
            &quick(),
            &CancelFlag::new(),
        );

        assert_eq!(report.outcome(), SyncOutcome::AllFailed);
        assert!(report.aborted.is_none());
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].reason.contains("could not connect"));
        assert!(store.state().records.is_empty());
    }

    #[test]
    fn deletions_run_before_uploads() {
        let fx = fixture();
        let entries = vec![
            added(&fx.local, "z.txt", "z"),
            added(&fx.local, "a/new.txt", "n"),
            deleted("a/b/old.txt"),
        ];
        let order: Vec<ChangeKind> = phases(&entries)
            .into_iter()
            .flatten()
            .map(|e| e.kind)
            .collect();
        assert_eq!(
            order,
            vec![ChangeKind::Deleted, ChangeKind::Added, ChangeKind::Added]
        );
    }

    #[test]
    fn emptied_remote_directories_are_removed() {
        let fx = fixture();
        fs::create_dir_all(fx.remote.join("docs/img")).unwrap();
        fs::write(fx.remote.join("docs/img/logo.png"), "png").unwrap();
        fs::create_dir_all(fx.remote.join("keep")).unwrap();
        fs::write(fx.remote.join("keep/gone.txt"), "g").unwrap();
        fs::write(fx.remote.join("keep/other.txt"), "o").unwrap();
        let set = change_set(
            &fx.local,
            vec![deleted("docs/img/logo.png"), deleted("keep/gone.txt")],
        );
        let mut store = StateStore::open_at(&fx.home, &set.project_id).unwrap();

        let report = apply(
            &set,
            &LocalTransport::new(),
            &remote(fx.remote.clone()),
            &Credentials::default(),
            &mut store,
            &quick(),
            &CancelFlag::new(),
        );

        assert_eq!(report.outcome(), SyncOutcome::Complete, "{report:?}");
        assert!(!fx.remote.join("docs").exists());
        assert!(fx.remote.join("keep/other.txt").exists());
        assert!(fx.remote.is_dir());
    }

    #[test]
    fn progress_reports_every_finished_entry() {
        let fx = fixture();
        let set = change_set(
            &fx.local,
            vec![
                added(&fx.local, "a.txt", "a"),
                added(&fx.local, "css/b.css", "b"),
            ],
        );
        let mut store = StateStore::open_at(&fx.home, &set.project_id).unwrap();
        let events = Mutex::new(Vec::new());

        apply_with_progress(
            &set,
            &LocalTransport::new(),
            &remote(fx.remote.clone()),
            &Credentials::default(),
            &mut store,
            &quick(),
            &CancelFlag::new(),
            &|event: ProgressEvent| events.lock().unwrap().push(event),
        );

        let events = events.into_inner().unwrap();
        assert_eq!(events[0], ProgressEvent::Started { total: 2 });
        let finished: Vec<&ProgressEvent> = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::Finished { ok: true, .. }))
            .collect();
        assert_eq!(finished.len(), 2);
    }
}
