//! Error types for ftpsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use ftpsync_core::error::RegistryError;

use crate::transport::TransportError;

/// All errors that can abort a planning or sync operation before a report
/// exists. Per-file failures never surface here; they land in the report.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An error from the project registry.
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Persisted sync state could not be read or written.
    #[error(transparent)]
    State(#[from] StateError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An ignore pattern from the profile could not be compiled.
    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// Connecting to the remote failed outright.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors from the per-project sync state store.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("state I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The state file exists but cannot be parsed. Never silently treated as
    /// empty; the caller must explicitly opt into a reset.
    #[error("sync state at {path} is corrupt ({source}); rerun with an explicit state reset to start over")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (save path).
    #[error("state JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}

/// Convenience constructor for [`StateError::Io`].
pub(crate) fn state_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.into(),
        source,
    }
}
