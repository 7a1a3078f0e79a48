//! Error types for ftpsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse profile at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.ftpsync/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// No profile is registered under the requested name.
    #[error("project '{name}' not found at {path}")]
    ProjectNotFound { name: String, path: PathBuf },

    /// `add` was called for a name that is already registered.
    #[error("project '{name}' already exists")]
    ProjectExists { name: String },

    /// Name cannot be used as a file name in the registry directory.
    #[error("invalid project name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },
}
