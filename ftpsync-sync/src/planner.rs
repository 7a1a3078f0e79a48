//! Diff planner — compares the local tree with the last synced state.
//!
//! Each file goes through two explicit stages:
//!
//! 1. [`quick_check`] — stat-only. Size and mtime equal to the record means
//!    unchanged; the content is never read.
//! 2. [`compare_content`] — fingerprint the file and compare with the record.
//!    Hash equality is the final word, so a same-size edit is still
//!    `Modified` and a bare `touch` is not.
//!
//! The walk is a best-effort snapshot: a file edited while being scanned may
//! be fingerprinted mid-write and is picked up again on the next run.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use serde::Serialize;

use ftpsync_core::types::{ProjectId, ProjectProfile};

use crate::error::{io_err, SyncError};
use crate::fingerprint::{fingerprint, Fingerprint};
use crate::ignore_rules::IgnoreMatcher;
use crate::state_store::{FileRecord, ProjectState};

// ---------------------------------------------------------------------------
// Change set
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// One-character marker used in listings.
    pub fn marker(self) -> char {
        match self {
            ChangeKind::Added => '+',
            ChangeKind::Modified => 'M',
            ChangeKind::Deleted => '-',
        }
    }
}

/// One path-level difference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeEntry {
    pub relative_path: String,
    pub kind: ChangeKind,
    /// Absent for `Deleted`.
    pub new_fingerprint: Option<Fingerprint>,
    pub size: Option<u64>,
    #[serde(skip)]
    pub modified: Option<i64>,
}

impl ChangeEntry {
    /// Number of `/`-separated directories above the file.
    pub fn depth(&self) -> usize {
        path_depth(&self.relative_path)
    }
}

/// A file whose mtime moved but whose content did not. Applying it only
/// updates the stored mtime so the next run can skip hashing again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Refresh {
    pub relative_path: String,
    pub modified: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    TooLarge { size: u64, limit: u64 },
    Unreadable { detail: String },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::TooLarge { size, limit } => {
                write!(f, "too large ({size} bytes, limit {limit})")
            }
            SkipReason::Unreadable { detail } => write!(f, "unreadable: {detail}"),
        }
    }
}

/// A local path present but left out of this plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedPath {
    pub relative_path: String,
    pub reason: SkipReason,
}

/// Output of one planner run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub project_id: ProjectId,
    /// Local directory the relative paths resolve against.
    pub local_root: PathBuf,
    /// Ordered by path depth, then lexicographically within a depth.
    pub entries: Vec<ChangeEntry>,
    pub refreshed: Vec<Refresh>,
    /// Tracked paths that now match an ignore rule; untracked, never deleted remotely.
    pub pruned: Vec<String>,
    pub skipped: Vec<SkippedPath>,
    /// Non-ignored files visited by the walk.
    pub scanned: usize,
}

impl ChangeSet {
    /// No transfers and no state bookkeeping to do.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.refreshed.is_empty() && self.pruned.is_empty()
    }

    pub fn count(&self, kind: ChangeKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanOptions {
    /// Hash every file even when size and mtime match the record.
    pub force_revalidate: bool,
}

// ---------------------------------------------------------------------------
// Two-stage comparison
// ---------------------------------------------------------------------------

/// Stage one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickCheck {
    Unchanged,
    NeedsHash,
}

/// Stat-only comparison against the prior record.
pub fn quick_check(
    record: Option<&FileRecord>,
    size: u64,
    modified: Option<i64>,
    force_revalidate: bool,
) -> QuickCheck {
    match record {
        None => QuickCheck::NeedsHash,
        Some(_) if force_revalidate => QuickCheck::NeedsHash,
        Some(r) if r.size != size => QuickCheck::NeedsHash,
        Some(r) if r.modified.is_none() || r.modified != modified => QuickCheck::NeedsHash,
        Some(_) => QuickCheck::Unchanged,
    }
}

/// Stage two outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentVerdict {
    Added,
    Modified,
    Same,
}

/// Fingerprint comparison against the prior record.
pub fn compare_content(record: Option<&FileRecord>, current: &Fingerprint) -> ContentVerdict {
    match record {
        None => ContentVerdict::Added,
        Some(r) if &r.fingerprint != current => ContentVerdict::Modified,
        Some(_) => ContentVerdict::Same,
    }
}

// ---------------------------------------------------------------------------
// plan
// ---------------------------------------------------------------------------

/// Walk `profile.local_root` and diff it against `prior`.
///
/// Never mutates state; the caller decides whether to apply the result.
pub fn plan(
    profile: &ProjectProfile,
    prior: &ProjectState,
    options: &PlanOptions,
) -> Result<ChangeSet, SyncError> {
    let root = profile.local_root.as_path();
    let root_meta = std::fs::metadata(root).map_err(|e| io_err(root, e))?;
    if !root_meta.is_dir() {
        return Err(io_err(
            root,
            std::io::Error::other("local root is not a directory"),
        ));
    }

    let matcher = Arc::new(IgnoreMatcher::for_profile(profile)?);
    let max_size = profile.settings.max_file_size;

    let mut entries = Vec::new();
    let mut refreshed = Vec::new();
    let mut skipped = Vec::new();
    let mut seen = BTreeSet::new();
    let mut unreadable_dirs: Vec<String> = Vec::new();
    let mut deletions_suppressed = false;

    for result in walker(root, Arc::clone(&matcher)) {
        let entry = match result {
            Ok(entry) => entry,
            Err(err) => {
                match error_path(&err).and_then(|p| relative_path(root, &p)) {
                    Some(rel) => {
                        tracing::warn!("skipping unreadable {rel}: {err}");
                        unreadable_dirs.push(rel.clone());
                        skipped.push(SkippedPath {
                            relative_path: rel,
                            reason: SkipReason::Unreadable {
                                detail: err.to_string(),
                            },
                        });
                    }
                    None => {
                        tracing::warn!("walk error without a path, not planning deletions: {err}");
                        deletions_suppressed = true;
                    }
                }
                continue;
            }
        };
        if entry.depth() == 0 || !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }

        let path = entry.path();
        let Some(rel) = relative_path(root, path) else {
            tracing::warn!("skipping non UTF-8 path {}", path.display());
            deletions_suppressed = true;
            continue;
        };
        seen.insert(rel.clone());

        let meta = match std::fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!("skipping {rel}: {e}");
                skipped.push(SkippedPath {
                    relative_path: rel,
                    reason: SkipReason::Unreadable {
                        detail: e.to_string(),
                    },
                });
                continue;
            }
        };
        let size = meta.len();
        if max_size > 0 && size > max_size {
            tracing::warn!("skipping large file {rel} ({size} bytes)");
            skipped.push(SkippedPath {
                relative_path: rel,
                reason: SkipReason::TooLarge {
                    size,
                    limit: max_size,
                },
            });
            continue;
        }
        let modified = mtime_nanos(&meta);
        let record = prior.records.get(&rel);

        if quick_check(record, size, modified, options.force_revalidate) == QuickCheck::Unchanged {
            tracing::debug!("unchanged (stat): {rel}");
            continue;
        }

        let hashed = match fingerprint(path) {
            Ok(hashed) => hashed,
            Err(e) => {
                tracing::warn!("skipping {rel}: {e}");
                skipped.push(SkippedPath {
                    relative_path: rel,
                    reason: SkipReason::Unreadable {
                        detail: e.to_string(),
                    },
                });
                continue;
            }
        };

        let kind = match compare_content(record, &hashed.fingerprint) {
            ContentVerdict::Added => ChangeKind::Added,
            ContentVerdict::Modified => ChangeKind::Modified,
            ContentVerdict::Same => {
                if record.is_some_and(|r| r.modified != modified) {
                    tracing::debug!("unchanged (hash), refreshing mtime: {rel}");
                    refreshed.push(Refresh {
                        relative_path: rel,
                        modified,
                    });
                } else {
                    tracing::debug!("unchanged (hash): {rel}");
                }
                continue;
            }
        };
        tracing::debug!("{kind:?}: {rel} ({})", hashed.fingerprint.short());
        entries.push(ChangeEntry {
            relative_path: rel,
            kind,
            new_fingerprint: Some(hashed.fingerprint),
            size: Some(hashed.size),
            modified,
        });
    }

    let mut pruned = Vec::new();
    for path in prior.records.keys() {
        if seen.contains(path) {
            continue;
        }
        if matcher.should_ignore(path) {
            tracing::info!("no longer tracked (ignored): {path}");
            pruned.push(path.clone());
            continue;
        }
        if deletions_suppressed || is_under_any(path, &unreadable_dirs) {
            continue;
        }
        entries.push(ChangeEntry {
            relative_path: path.clone(),
            kind: ChangeKind::Deleted,
            new_fingerprint: None,
            size: None,
            modified: None,
        });
    }

    entries.sort_by(|a, b| {
        a.depth()
            .cmp(&b.depth())
            .then_with(|| a.relative_path.cmp(&b.relative_path))
    });

    tracing::info!(
        "planned {}: {} scanned, {} changes, {} pruned, {} skipped",
        profile.name,
        seen.len(),
        entries.len(),
        pruned.len(),
        skipped.len()
    );

    Ok(ChangeSet {
        project_id: profile.id.clone(),
        local_root: root.to_path_buf(),
        entries,
        refreshed,
        pruned,
        skipped,
        scanned: seen.len(),
    })
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn walker(root: &Path, matcher: Arc<IgnoreMatcher>) -> ignore::Walk {
    let filter_root = root.to_path_buf();
    WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(true)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            if entry.depth() == 0 {
                return true;
            }
            let Ok(rel) = entry.path().strip_prefix(&filter_root) else {
                return true;
            };
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !matcher.is_ignored(rel, is_dir)
        })
        .build()
}

/// Root-relative, `/`-joined, UTF-8 path with only normal components.
fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            _ => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

fn error_path(err: &ignore::Error) -> Option<PathBuf> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.clone()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.clone()),
        _ => None,
    }
}

fn mtime_nanos(meta: &std::fs::Metadata) -> Option<i64> {
    let since_epoch = meta.modified().ok()?.duration_since(UNIX_EPOCH).ok()?;
    i64::try_from(since_epoch.as_nanos()).ok()
}

fn path_depth(path: &str) -> usize {
    path.matches('/').count()
}

fn is_under_any(path: &str, dirs: &[String]) -> bool {
    dirs.iter().any(|dir| {
        path == dir
            || path
                .strip_prefix(dir.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
