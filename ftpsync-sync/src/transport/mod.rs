//! Transport seam.
//!
//! The orchestrator drives any remote through [`Transport`] / [`Session`];
//! wire protocols live behind it (`ftpsync-ftp` for FTP, [`local`] for a
//! mounted directory). Sessions are blocking and owned by one worker thread
//! at a time.

pub mod local;

use std::path::Path;

use thiserror::Error;

use ftpsync_core::types::{Credentials, RemoteTarget};

pub use local::LocalTransport;

/// Failure classes a transport reports. The orchestrator decides retry and
/// abort behaviour from the class alone.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Login rejected. Fatal for the run.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The remote refused the operation for lack of rights. Fatal for the run.
    #[error("permission denied: {0}")]
    Permission(String),
    /// Connection-level trouble (reset, timeout, refused). Retried.
    #[error("network error: {0}")]
    Network(String),
    /// This one operation failed. Recorded against the file, not retried.
    #[error("transfer failed: {0}")]
    Transfer(String),
    /// The remote path does not exist.
    #[error("remote path not found: {0}")]
    NotFound(String),
}

impl TransportError {
    /// Auth and permission errors stop the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Auth(_) | TransportError::Permission(_))
    }

    /// Worth retrying on a fresh connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Network(_))
    }
}

/// Factory for sessions against one remote.
pub trait Transport: Send + Sync {
    /// Open and authenticate a new session.
    fn connect(
        &self,
        target: &RemoteTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn Session>, TransportError>;
}

/// One live connection. Paths are full remote paths, `/`-separated.
pub trait Session: Send {
    /// Create `path` and any missing ancestors; succeeds if it already exists.
    fn ensure_directory(&mut self, path: &str) -> Result<(), TransportError>;

    /// Store the content of `local` at `remote`, replacing any existing file.
    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), TransportError>;

    /// Remove the file at `remote`. Absent files yield [`TransportError::NotFound`].
    fn delete(&mut self, remote: &str) -> Result<(), TransportError>;

    /// Remove the directory at `path` if it is empty; fails otherwise.
    fn remove_directory(&mut self, path: &str) -> Result<(), TransportError>;

    /// Close politely. Dropping without closing must also be safe.
    fn close(self: Box<Self>) -> Result<(), TransportError>;
}

/// Parent directory of a remote path, if it has one.
pub fn remote_parent(remote: &str) -> Option<&str> {
    let trimmed = remote.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => None,
        Some((parent, _)) => Some(parent),
        None => None,
    }
}
