//! Ignore matching.
//!
//! Built-in names plus the profile's glob patterns, compiled into one
//! gitignore-style matcher. A pattern without a `/` matches any single path
//! segment, so an ignored directory excludes its whole subtree; the planner
//! consults [`IgnoreMatcher::is_ignored`] before descending, so nothing
//! under an ignored directory is ever read.
//!
//! Case folding follows the platform: case-insensitive on macOS and Windows,
//! case-sensitive elsewhere, unless the profile overrides it.

use std::path::Path;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

use ftpsync_core::types::ProjectProfile;

use crate::error::SyncError;

/// Always excluded: VCS metadata, dependency caches, editor and OS droppings.
pub const BUILTIN_IGNORES: &[&str] = &[
    ".git",
    ".svn",
    ".hg",
    "node_modules",
    "__pycache__",
    ".pytest_cache",
    ".idea",
    ".vscode",
    ".DS_Store",
    "Thumbs.db",
    "*.pyc",
    "*.pyo",
];

/// Platform default for case-insensitive matching.
pub fn default_case_insensitive() -> bool {
    cfg!(any(target_os = "macos", target_os = "windows"))
}

/// Compiled ignore rules for one project.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    rules: Gitignore,
}

impl IgnoreMatcher {
    /// Compile the built-in set plus `patterns`.
    ///
    /// `!` negations are rejected: an ignored directory is never walked, so a
    /// re-include beneath it could not be honoured.
    pub fn new(root: &Path, patterns: &[String], case_insensitive: bool) -> Result<Self, SyncError> {
        let mut builder = GitignoreBuilder::new(root);
        builder
            .case_insensitive(case_insensitive)
            .map_err(|e| SyncError::InvalidPattern {
                pattern: String::new(),
                reason: e.to_string(),
            })?;

        for pattern in BUILTIN_IGNORES {
            add_pattern(&mut builder, pattern)?;
        }
        for pattern in patterns {
            let trimmed = pattern.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('!') {
                return Err(SyncError::InvalidPattern {
                    pattern: pattern.clone(),
                    reason: "negated patterns are not supported".to_string(),
                });
            }
            add_pattern(&mut builder, trimmed)?;
        }

        let rules = builder.build().map_err(|e| SyncError::InvalidPattern {
            pattern: patterns.join(", "),
            reason: e.to_string(),
        })?;
        Ok(Self { rules })
    }

    /// Matcher for a profile's root, patterns and case policy.
    pub fn for_profile(profile: &ProjectProfile) -> Result<Self, SyncError> {
        let case_insensitive = profile
            .settings
            .case_insensitive
            .unwrap_or_else(default_case_insensitive);
        Self::new(&profile.local_root, &profile.ignore, case_insensitive)
    }

    /// Does this single entry match a rule? Ancestors are not consulted; use
    /// during a walk that already pruned ignored directories.
    pub fn is_ignored(&self, relative: &Path, is_dir: bool) -> bool {
        self.rules.matched(relative, is_dir).is_ignore()
    }

    /// Does a root-relative file path, or any directory above it, match?
    pub fn should_ignore(&self, relative_path: &str) -> bool {
        self.rules
            .matched_path_or_any_parents(Path::new(relative_path), false)
            .is_ignore()
    }
}

fn add_pattern(builder: &mut GitignoreBuilder, pattern: &str) -> Result<(), SyncError> {
    builder
        .add_line(None, pattern)
        .map_err(|e| SyncError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
    Ok(())
}

/// One-shot form: is `relative_path` excluded under `profile`'s rules?
pub fn should_ignore(relative_path: &str, profile: &ProjectProfile) -> Result<bool, SyncError> {
    Ok(IgnoreMatcher::for_profile(profile)?.should_ignore(relative_path))
}
