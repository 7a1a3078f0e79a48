//! Per-project YAML registry.
//!
//! # Storage layout
//!
//! ```text
//! ~/.ftpsync/
//!   projects/
//!     <project_name>.yaml   (one profile per file — mode 0600, holds credentials)
//! ```
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::RegistryError;
use crate::types::{ProjectId, ProjectName, ProjectProfile};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.ftpsync/`
pub fn ftpsync_root(home: &Path) -> PathBuf {
    home.join(".ftpsync")
}

/// `<home>/.ftpsync/projects/`
///
/// Creates the directory (mode `0700`) if it does not yet exist.
pub fn projects_dir_at(home: &Path) -> Result<PathBuf, RegistryError> {
    let dir = ftpsync_root(home).join("projects");
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir)?;
    }
    Ok(dir)
}

/// `<home>/.ftpsync/projects/<name>.yaml` — pure, no I/O.
pub fn profile_path_at(home: &Path, name: &ProjectName) -> PathBuf {
    ftpsync_root(home)
        .join("projects")
        .join(format!("{}.yaml", name.0))
}

/// Reject names that cannot round-trip through a file name.
pub fn validate_name(name: &ProjectName) -> Result<(), RegistryError> {
    let invalid = |reason| RegistryError::InvalidName {
        name: name.0.clone(),
        reason,
    };
    if name.0.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.0.starts_with('.') {
        return Err(invalid("name must not start with '.'"));
    }
    if name
        .0
        .chars()
        .any(|c| matches!(c, '/' | '\\' | ':' | '\0') || c.is_control())
    {
        return Err(invalid("name contains a path separator or control character"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Load / select / list
// ---------------------------------------------------------------------------

/// Load the profile registered as `name`.
///
/// Returns `RegistryError::ProjectNotFound` if absent,
/// `RegistryError::Parse` (with path + line context) if malformed YAML.
pub fn select_at(home: &Path, name: &ProjectName) -> Result<ProjectProfile, RegistryError> {
    let path = profile_path_at(home, name);
    if !path.exists() {
        return Err(RegistryError::ProjectNotFound {
            name: name.0.clone(),
            path,
        });
    }
    load_file(&path)
}

/// `select_at` convenience wrapper.
pub fn select(name: &ProjectName) -> Result<ProjectProfile, RegistryError> {
    select_at(&home()?, name)
}

/// All registered profiles, sorted by name.
///
/// Skips leftover `.yaml.tmp` files from interrupted saves.
pub fn list_at(home: &Path) -> Result<Vec<ProjectProfile>, RegistryError> {
    let dir = ftpsync_root(home).join("projects");
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .filter(|e| e.file_name().to_string_lossy().ends_with(".yaml"))
        .collect();
    entries.sort_by_key(|e| e.file_name());

    let mut profiles = Vec::with_capacity(entries.len());
    for entry in entries {
        profiles.push(load_file(&entry.path())?);
    }
    profiles.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(profiles)
}

/// `list_at` convenience wrapper.
pub fn list() -> Result<Vec<ProjectProfile>, RegistryError> {
    list_at(&home()?)
}

fn load_file(path: &Path) -> Result<ProjectProfile, RegistryError> {
    let contents = std::fs::read_to_string(path)?;
    serde_yaml::from_str(&contents).map_err(|e| RegistryError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

// ---------------------------------------------------------------------------
// 3. Save (atomic)
// ---------------------------------------------------------------------------

/// Atomically save a profile to `<home>/.ftpsync/projects/<name>.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
/// `.tmp` is always in the same directory as the target (same filesystem — no EXDEV).
pub fn save_at(home: &Path, profile: &ProjectProfile) -> Result<(), RegistryError> {
    validate_name(&profile.name)?;
    projects_dir_at(home)?;
    let path = profile_path_at(home, &profile.name);
    let tmp_path = path.with_file_name(format!("{}.yaml.tmp", profile.name.0));

    let yaml = serde_yaml::to_string(profile)?;
    std::fs::write(&tmp_path, yaml)?;
    set_file_permissions(&tmp_path)?;
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// 4. Add / update / remove
// ---------------------------------------------------------------------------

/// Register a new profile. Names are unique: fails with
/// `RegistryError::ProjectExists` if the name is taken.
pub fn add_at(home: &Path, profile: ProjectProfile) -> Result<ProjectProfile, RegistryError> {
    validate_name(&profile.name)?;
    if profile_path_at(home, &profile.name).exists() {
        return Err(RegistryError::ProjectExists {
            name: profile.name.0.clone(),
        });
    }
    save_at(home, &profile)?;
    Ok(profile)
}

/// `add_at` convenience wrapper.
pub fn add(profile: ProjectProfile) -> Result<ProjectProfile, RegistryError> {
    add_at(&home()?, profile)
}

/// Load `name`, apply `edit`, and save it back.
///
/// The name is fixed; the id is re-derived when `local_root` changes since
/// sync state for the old root no longer describes the new one.
pub fn update_at(
    home: &Path,
    name: &ProjectName,
    edit: impl FnOnce(&mut ProjectProfile),
) -> Result<ProjectProfile, RegistryError> {
    let mut profile = select_at(home, name)?;
    let old_root = profile.local_root.clone();
    edit(&mut profile);
    profile.name = name.clone();
    if profile.local_root != old_root {
        profile.id = ProjectId::for_root(&profile.local_root);
    }
    profile.updated_at = Utc::now();
    save_at(home, &profile)?;
    Ok(profile)
}

/// `update_at` convenience wrapper.
pub fn update(
    name: &ProjectName,
    edit: impl FnOnce(&mut ProjectProfile),
) -> Result<ProjectProfile, RegistryError> {
    update_at(&home()?, name, edit)
}

/// Delete the profile file and return what was removed.
///
/// Persisted sync state is keyed by [`ProjectId`] and is left untouched here.
pub fn remove_at(home: &Path, name: &ProjectName) -> Result<ProjectProfile, RegistryError> {
    let profile = select_at(home, name)?;
    std::fs::remove_file(profile_path_at(home, name))?;
    Ok(profile)
}

/// `remove_at` convenience wrapper.
pub fn remove(name: &ProjectName) -> Result<ProjectProfile, RegistryError> {
    remove_at(&home()?, name)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

/// Home directory from `dirs::home_dir()`.
pub fn home() -> Result<PathBuf, RegistryError> {
    dirs::home_dir().ok_or(RegistryError::HomeNotFound)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), RegistryError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), RegistryError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Protocol, RemoteTarget};
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    fn site() -> ProjectName {
        ProjectName::from("site")
    }

    fn profile(name: &str, root: &str) -> ProjectProfile {
        ProjectProfile::new(
            ProjectName::from(name),
            PathBuf::from(root),
            RemoteTarget {
                protocol: Protocol::Ftp,
                host: "ftp.example.com".into(),
                port: 21,
                base_path: "/htdocs".into(),
            },
        )
    }

    #[test]
    fn profile_path_is_correct() {
        let home = make_home();
        let path = profile_path_at(home.path(), &site());
        assert!(path.ends_with(".ftpsync/projects/site.yaml"));
    }

    #[test]
    fn projects_dir_created_with_perms() {
        let home = make_home();
        let dir = projects_dir_at(home.path()).expect("projects_dir_at");
        assert!(dir.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
    }

    #[test]
    fn save_and_select_roundtrip() {
        let home = make_home();
        let p = profile("site", "/srv/site");
        save_at(home.path(), &p).expect("save");
        let loaded = select_at(home.path(), &site()).expect("select");
        assert_eq!(loaded, p);
    }

    #[test]
    fn atomic_write_cleans_up_tmp() {
        let home = make_home();
        save_at(home.path(), &profile("site", "/srv/site")).expect("save");
        let tmp = profile_path_at(home.path(), &site()).with_file_name("site.yaml.tmp");
        assert!(!tmp.exists(), ".tmp must be gone after successful save");
    }

    #[test]
    fn select_missing_returns_not_found() {
        let home = make_home();
        let err = select_at(home.path(), &site()).unwrap_err();
        assert!(matches!(err, RegistryError::ProjectNotFound { .. }));
    }

    #[test]
    fn add_rejects_duplicate_names() {
        let home = make_home();
        add_at(home.path(), profile("site", "/srv/a")).expect("first add");
        let err = add_at(home.path(), profile("site", "/srv/b")).unwrap_err();
        assert!(matches!(err, RegistryError::ProjectExists { .. }));
    }

    #[test]
    fn update_rederives_id_when_root_changes() {
        let home = make_home();
        let original = add_at(home.path(), profile("site", "/srv/a")).expect("add");

        let same_root = update_at(home.path(), &site(), |p| p.settings.concurrency = 8)
            .expect("update");
        assert_eq!(same_root.id, original.id);
        assert_eq!(same_root.settings.concurrency, 8);

        let moved = update_at(home.path(), &site(), |p| p.local_root = PathBuf::from("/srv/b"))
            .expect("update root");
        assert_ne!(moved.id, original.id);
        assert_eq!(moved.id, ProjectId::for_root(Path::new("/srv/b")));
    }

    #[test]
    fn update_cannot_rename() {
        let home = make_home();
        add_at(home.path(), profile("site", "/srv/a")).expect("add");
        let updated = update_at(home.path(), &site(), |p| p.name = ProjectName::from("other"))
            .expect("update");
        assert_eq!(updated.name, site());
        assert!(!profile_path_at(home.path(), &ProjectName::from("other")).exists());
    }

    #[test]
    fn remove_deletes_profile_file() {
        let home = make_home();
        add_at(home.path(), profile("site", "/srv/a")).expect("add");
        let removed = remove_at(home.path(), &site()).expect("remove");
        assert_eq!(removed.name, site());
        assert!(list_at(home.path()).expect("list").is_empty());
    }

    #[test]
    fn invalid_names_are_rejected() {
        for bad in ["", "  ", ".hidden", "a/b", "a\\b"] {
            let err = validate_name(&ProjectName::from(bad)).unwrap_err();
            assert!(matches!(err, RegistryError::InvalidName { .. }), "{bad:?}");
        }
        validate_name(&ProjectName::from("my-site_2")).expect("valid");
    }

    #[test]
    fn list_empty_when_no_projects() {
        let home = make_home();
        assert!(list_at(home.path()).expect("list").is_empty());
    }

    #[test]
    fn home_not_found_error_message() {
        assert!(RegistryError::HomeNotFound.to_string().contains("home directory"));
    }
}
