//! Domain types for the ftpsync project registry.
//!
//! All path fields use `PathBuf`; remote paths are plain forward-slash strings.
//! All types are serializable/deserializable via serde + serde_yaml. Unknown
//! fields are ignored on load so older binaries can read newer profiles.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed display name for a project profile (unique in the registry).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectName(pub String);

impl fmt::Display for ProjectName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ProjectName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ProjectName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Stable identifier that scopes a project's persisted sync state.
///
/// Derived from the local root path, not the display name, so renaming or
/// re-adding a profile for the same folder resumes its previous state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectId(pub String);

impl ProjectId {
    /// First 16 hex chars of the SHA-256 of the root path.
    pub fn for_root(root: &Path) -> Self {
        let digest = Sha256::digest(root.to_string_lossy().as_bytes());
        let mut id = hex::encode(digest);
        id.truncate(16);
        Self(id)
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Which transport a profile syncs through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Ftp,
    /// A directory on a locally mounted filesystem (network share, USB disk).
    Local,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Ftp => write!(f, "ftp"),
            Protocol::Local => write!(f, "local"),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Where files are mirrored to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    #[serde(default)]
    pub protocol: Protocol,
    /// FTP host name. For `Protocol::Local` this is unused and may be empty.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Remote directory that mirrors the local root (e.g. `/public_html`).
    #[serde(default)]
    pub base_path: String,
}

impl RemoteTarget {
    /// Join the base path and a root-relative file path with `/`.
    pub fn remote_path(&self, relative: &str) -> String {
        let base = self.base_path.trim_end_matches('/');
        if base.is_empty() {
            relative.to_string()
        } else {
            format!("{base}/{relative}")
        }
    }
}

/// Reference to login credentials. The password itself is resolved by the
/// caller (environment variable or inline value), never by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CredentialRef {
    #[serde(default)]
    pub username: String,
    /// Name of an environment variable holding the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
    /// Inline plaintext password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

/// Resolved login credentials handed to a transport.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Tunables for a sync run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Maximum concurrent transfer sessions.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Attempts for a transient network failure before it counts as a failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Files larger than this are skipped. `0` disables the limit.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Delete remote copies of files removed locally.
    #[serde(default = "default_true")]
    pub delete_remote: bool,
    /// Overrides the platform default for ignore-pattern case folding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_insensitive: Option<bool>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_file_size: default_max_file_size(),
            delete_remote: true,
            case_insensitive: None,
        }
    }
}

/// Connection and tracking configuration for one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectProfile {
    pub name: ProjectName,
    pub id: ProjectId,
    /// Absolute path of the local directory being mirrored.
    pub local_root: PathBuf,
    pub remote: RemoteTarget,
    #[serde(default)]
    pub credentials: CredentialRef,
    /// Extra glob patterns excluded from tracking.
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub settings: SyncSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProjectProfile {
    /// Build a fresh profile; the id is derived from `local_root`.
    pub fn new(name: ProjectName, local_root: PathBuf, remote: RemoteTarget) -> Self {
        let now = Utc::now();
        Self {
            id: ProjectId::for_root(&local_root),
            name,
            local_root,
            remote,
            credentials: CredentialRef::default(),
            ignore: Vec::new(),
            settings: SyncSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

fn default_port() -> u16 {
    21
}

fn default_concurrency() -> usize {
    4
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_max_file_size() -> u64 {
    100 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
