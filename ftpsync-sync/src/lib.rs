//! # ftpsync-sync
//!
//! Change detection and upload engine.
//!
//! [`planner::plan`] walks a project's local root and diffs it against the
//! persisted [`state_store::ProjectState`]; [`orchestrator::apply`] pushes
//! the resulting [`ChangeSet`] through a [`Transport`] and commits each
//! success as it lands. [`pipeline`] wires both to the project registry.

pub mod error;
pub mod fingerprint;
pub mod ignore_rules;
pub mod orchestrator;
pub mod pipeline;
pub mod planner;
pub mod state_store;
pub mod transport;

pub use error::{StateError, SyncError};
pub use fingerprint::{fingerprint, Fingerprint};
pub use ignore_rules::{should_ignore, IgnoreMatcher};
pub use orchestrator::{
    apply, apply_with_progress, AppliedAction, AppliedEntry, ApplyOptions, CancelFlag,
    FailedEntry, ProgressEvent, ProgressFn, RetryPolicy, SkippedEntry, SyncOutcome, SyncReport,
};
pub use pipeline::{
    check_connection, dry_run, list_projects, mark_synced, remove_project, reset_tracking,
    status, sync, sync_with_progress, ProjectStatus, SyncOptions,
};
pub use planner::{plan, ChangeEntry, ChangeKind, ChangeSet, PlanOptions, SkipReason, SkippedPath};
pub use state_store::{FileRecord, Mutation, ProjectState, StateStore};
pub use transport::{LocalTransport, Session, Transport, TransportError};
