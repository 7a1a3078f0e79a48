//! Sync state store — per-project record of what was last uploaded.
//!
//! Persists a [`ProjectState`] JSON document at
//! `<home>/.ftpsync/state/<project_id>.json`.
//!
//! Every [`StateStore::commit`] rewrites the whole document with the atomic
//! `.tmp` + fsync + rename pattern before returning, so a commit that
//! succeeded survives a crash immediately afterwards and a crash mid-write
//! leaves the previous document intact.
//!
//! Single writer per project: two processes syncing the same project at the
//! same time is unsupported and not guarded against.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ftpsync_core::types::ProjectId;

use crate::error::{state_io_err, StateError};
use crate::fingerprint::Fingerprint;

const STATE_VERSION: u32 = 1;

/// One tracked file as of its last confirmed upload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    /// Root-relative, forward-slash path. Mirrors the map key.
    pub relative_path: String,
    pub fingerprint: Fingerprint,
    pub size: u64,
    /// Local mtime in nanoseconds since the Unix epoch when last fingerprinted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<i64>,
    pub last_synced_at: DateTime<Utc>,
}

/// On-disk sync state for one project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectState {
    #[serde(default = "state_version")]
    pub version: u32,
    pub project_id: ProjectId,
    #[serde(default)]
    pub records: BTreeMap<String, FileRecord>,
    #[serde(default)]
    pub last_full_sync_at: Option<DateTime<Utc>>,
}

impl ProjectState {
    /// First-run state: nothing tracked.
    pub fn empty(project_id: ProjectId) -> Self {
        Self {
            version: STATE_VERSION,
            project_id,
            records: BTreeMap::new(),
            last_full_sync_at: None,
        }
    }
}

fn state_version() -> u32 {
    STATE_VERSION
}

/// One durable change to a project's records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert or replace the record at its path.
    Record(FileRecord),
    /// Remove the record at the given path.
    Tombstone(String),
}

impl Mutation {
    fn path(&self) -> &str {
        match self {
            Mutation::Record(record) => &record.relative_path,
            Mutation::Tombstone(path) => path,
        }
    }
}

/// `<home>/.ftpsync/state/<project_id>.json`
pub fn state_path_at(home: &Path, project_id: &ProjectId) -> PathBuf {
    home.join(".ftpsync")
        .join("state")
        .join(format!("{}.json", project_id.0))
}

/// Load the state for `project_id`.
///
/// Returns an empty state if no file exists yet (first run). A file that
/// exists but does not parse is [`StateError::Corrupt`].
pub fn load_at(home: &Path, project_id: &ProjectId) -> Result<ProjectState, StateError> {
    let path = state_path_at(home, project_id);
    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Ok(ProjectState::empty(project_id.clone()))
        }
        Err(e) => return Err(state_io_err(&path, e)),
    };
    let mut state: ProjectState =
        serde_json::from_str(&contents).map_err(|source| StateError::Corrupt {
            path: path.clone(),
            source,
        })?;
    // The map key is authoritative.
    for (key, record) in state.records.iter_mut() {
        if !is_safe_relative(key) {
            return Err(StateError::Corrupt {
                path,
                source: serde::de::Error::custom(format!(
                    "record path '{key}' is not a root-relative file path"
                )),
            });
        }
        if record.relative_path != *key {
            record.relative_path = key.clone();
        }
    }
    Ok(state)
}

/// Non-empty, `/`-separated, and free of `.`/`..` segments and leading `/`.
fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && !path.contains('\\')
        && path
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

/// Delete the persisted state for `project_id`. Returns whether a file existed.
pub fn purge_at(home: &Path, project_id: &ProjectId) -> Result<bool, StateError> {
    let path = state_path_at(home, project_id);
    match fs::remove_file(&path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(state_io_err(&path, e)),
    }
}

/// Open handle on one project's state; all mutations go through here.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: ProjectState,
}

impl StateStore {
    /// Open the store, failing on corruption.
    pub fn open_at(home: &Path, project_id: &ProjectId) -> Result<Self, StateError> {
        Ok(Self {
            path: state_path_at(home, project_id),
            state: load_at(home, project_id)?,
        })
    }

    /// Open the store; with `reset_corrupt`, an unreadable file is moved
    /// aside to `<id>.json.corrupt-<unix-ts>` and an empty state is used.
    pub fn open_or_reset_at(
        home: &Path,
        project_id: &ProjectId,
        reset_corrupt: bool,
    ) -> Result<Self, StateError> {
        match Self::open_at(home, project_id) {
            Err(StateError::Corrupt { path, source }) if reset_corrupt => {
                let aside = PathBuf::from(format!(
                    "{}.corrupt-{}",
                    path.display(),
                    Utc::now().timestamp()
                ));
                tracing::warn!(
                    "moving corrupt state {} aside to {} ({source})",
                    path.display(),
                    aside.display()
                );
                fs::rename(&path, &aside).map_err(|e| state_io_err(&path, e))?;
                Ok(Self {
                    path,
                    state: ProjectState::empty(project_id.clone()),
                })
            }
            other => other,
        }
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply one mutation and persist it before returning.
    ///
    /// On a failed save the in-memory state is rolled back so it never runs
    /// ahead of what is on disk.
    pub fn commit(&mut self, mutation: Mutation) -> Result<(), StateError> {
        let key = mutation.path().to_string();
        let previous = match mutation {
            Mutation::Record(record) => self.state.records.insert(key.clone(), record),
            Mutation::Tombstone(_) => self.state.records.remove(&key),
        };
        if let Err(e) = self.save() {
            match previous {
                Some(record) => {
                    self.state.records.insert(key, record);
                }
                None => {
                    self.state.records.remove(&key);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Apply several mutations and persist them with a single write.
    /// Either all of them land or, on a failed save, none do.
    pub fn commit_all(&mut self, mutations: Vec<Mutation>) -> Result<usize, StateError> {
        if mutations.is_empty() {
            return Ok(0);
        }
        let before = self.state.records.clone();
        let count = mutations.len();
        for mutation in mutations {
            match mutation {
                Mutation::Record(record) => {
                    self.state
                        .records
                        .insert(record.relative_path.clone(), record);
                }
                Mutation::Tombstone(path) => {
                    self.state.records.remove(&path);
                }
            }
        }
        if let Err(e) = self.save() {
            self.state.records = before;
            return Err(e);
        }
        Ok(count)
    }

    /// Record a sync that finished with nothing left pending.
    pub fn mark_full_sync(&mut self, at: DateTime<Utc>) -> Result<(), StateError> {
        let previous = self.state.last_full_sync_at.replace(at);
        if let Err(e) = self.save() {
            self.state.last_full_sync_at = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Forget every record; the next sync uploads everything again.
    /// Returns how many records were dropped.
    pub fn reset(&mut self) -> Result<usize, StateError> {
        let dropped = std::mem::take(&mut self.state.records);
        let previous_full = self.state.last_full_sync_at.take();
        if let Err(e) = self.save() {
            self.state.records = dropped;
            self.state.last_full_sync_at = previous_full;
            return Err(e);
        }
        Ok(dropped.len())
    }

    /// Write to `<path>.tmp`, fsync, rename over `<path>`, fsync the directory.
    ///
    /// Once the rename has happened the new document is the one on disk, so
    /// a failed directory fsync is only logged.
    fn save(&self) -> Result<(), StateError> {
        self.save_with(sync_dir)
    }

    fn save_with(&self, sync_dir: fn(&Path) -> std::io::Result<()>) -> Result<(), StateError> {
        let Some(dir) = self.path.parent() else {
            return Err(state_io_err(
                &self.path,
                std::io::Error::other("invalid state path"),
            ));
        };
        fs::create_dir_all(dir).map_err(|e| state_io_err(dir, e))?;

        let json = serde_json::to_vec_pretty(&self.state)?;
        let tmp = self.path.with_extension("json.tmp");
        let write = || -> std::io::Result<()> {
            let mut file = File::create(&tmp)?;
            file.write_all(&json)?;
            file.sync_all()
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(state_io_err(&tmp, e));
        }
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(state_io_err(&self.path, e));
        }
        if let Err(e) = sync_dir(dir) {
            tracing::warn!("could not fsync state directory {}: {e}", dir.display());
        }
        Ok(())
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pid() -> ProjectId {
        ProjectId::from("0123456789abcdef")
    }

    fn record(path: &str, fp: &str) -> FileRecord {
        FileRecord {
            relative_path: path.to_string(),
            fingerprint: Fingerprint(fp.to_string()),
            size: 4,
            modified: Some(1_700_000_000_000_000_000),
            last_synced_at: Utc::now(),
        }
    }

    #[test]
    fn empty_state_when_file_missing() {
        let tmp = TempDir::new().unwrap();
        let state = load_at(tmp.path(), &pid()).unwrap();
        assert!(state.records.is_empty());
        assert!(state.last_full_sync_at.is_none());
        assert_eq!(state.project_id, pid());
    }

    #[test]
    fn commit_is_visible_to_a_fresh_load() {
        let tmp = TempDir::new().unwrap();
        let mut store = StateStore::open_at(tmp.path(), &pid()).unwrap();
        store.commit(Mutation::Record(record("index.html", "aa"))).unwrap();
        store.commit(Mutation::Record(record("css/site.css", "bb"))).unwrap();
        store.commit(Mutation::Tombstone("index.html".into())).unwrap();

        let loaded = load_at(tmp.path(), &pid()).unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records["css/site.css"].fingerprint.0, "bb");
    }

    #[test]
    fn tmp_file_cleaned_up_after_commit() {
        let tmp = TempDir::new().unwrap();
        let mut store = StateStore::open_at(tmp.path(), &pid()).unwrap();
        store.commit(Mutation::Record(record("a", "aa"))).unwrap();
        let tmp_path = state_path_at(tmp.path(), &pid()).with_extension("json.tmp");
        assert!(!tmp_path.exists(), "tmp file should be removed after atomic rename");
    }

    #[test]
    fn corrupt_state_is_surfaced_not_emptied() {
        let tmp = TempDir::new().unwrap();
        let path = state_path_at(tmp.path(), &pid());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let err = StateStore::open_at(tmp.path(), &pid()).unwrap_err();
        assert!(matches!(err, StateError::Corrupt { .. }));
        assert!(path.exists(), "corrupt file must be left in place");
    }

    #[test]
    fn explicit_reset_moves_corrupt_state_aside() {
        let tmp = TempDir::new().unwrap();
        let path = state_path_at(tmp.path(), &pid());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "garbage").unwrap();

        let store = StateStore::open_or_reset_at(tmp.path(), &pid(), true).unwrap();
        assert!(store.state().records.is_empty());
        assert!(!path.exists());
        let moved = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".json.corrupt-"));
        assert!(moved, "corrupt file should be preserved beside the state");
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let tmp = TempDir::new().unwrap();
        let path = state_path_at(tmp.path(), &pid());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{
                "project_id": "0123456789abcdef",
                "records": {
                    "a.txt": {
                        "relative_path": "a.txt",
                        "fingerprint": "ff",
                        "size": 1,
                        "last_synced_at": "2024-01-01T00:00:00Z",
                        "future_flag": 3
                    }
                },
                "remote_etag_cache": {}
            }"#,
        )
        .unwrap();

        let state = load_at(tmp.path(), &pid()).unwrap();
        assert_eq!(state.version, STATE_VERSION);
        assert_eq!(state.records["a.txt"].modified, None);
    }

    #[test]
    fn escaping_record_paths_are_corrupt() {
        let tmp = TempDir::new().unwrap();
        let path = state_path_at(tmp.path(), &pid());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        for bad in ["../outside.txt", "a/../../b", "/etc/passwd", "", "a//b", "./a"] {
            let mut records = serde_json::Map::new();
            records.insert(
                bad.to_string(),
                serde_json::json!({
                    "relative_path": bad,
                    "fingerprint": "ff",
                    "size": 1,
                    "last_synced_at": "2024-01-01T00:00:00Z"
                }),
            );
            let doc = serde_json::json!({
                "project_id": "0123456789abcdef",
                "records": records,
            });
            fs::write(&path, doc.to_string()).unwrap();
            let err = load_at(tmp.path(), &pid()).unwrap_err();
            assert!(matches!(err, StateError::Corrupt { .. }), "{bad:?}");
        }
    }

    #[test]
    fn failed_directory_fsync_keeps_the_written_state() {
        let tmp = TempDir::new().unwrap();
        let mut store = StateStore::open_at(tmp.path(), &pid()).unwrap();
        store
            .state
            .records
            .insert("a".into(), record("a", "aa"));

        store
            .save_with(|_| Err(std::io::Error::other("fsync unsupported")))
            .unwrap();
        let loaded = load_at(tmp.path(), &pid()).unwrap();
        assert!(loaded.records.contains_key("a"));
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn commit_all_writes_once_for_many_records() {
        let tmp = TempDir::new().unwrap();
        let mut store = StateStore::open_at(tmp.path(), &pid()).unwrap();
        store.commit(Mutation::Record(record("old", "00"))).unwrap();
        let landed = store
            .commit_all(vec![
                Mutation::Record(record("a", "aa")),
                Mutation::Record(record("b/c", "bb")),
                Mutation::Tombstone("old".into()),
            ])
            .unwrap();
        assert_eq!(landed, 3);
        let loaded = load_at(tmp.path(), &pid()).unwrap();
        assert_eq!(loaded.records.keys().collect::<Vec<_>>(), vec!["a", "b/c"]);
    }

    #[test]
    fn mark_full_sync_and_reset() {
        let tmp = TempDir::new().unwrap();
        let mut store = StateStore::open_at(tmp.path(), &pid()).unwrap();
        store.commit(Mutation::Record(record("a", "aa"))).unwrap();
        let at = Utc::now();
        store.mark_full_sync(at).unwrap();
        assert_eq!(load_at(tmp.path(), &pid()).unwrap().last_full_sync_at, Some(at));

        assert_eq!(store.reset().unwrap(), 1);
        let loaded = load_at(tmp.path(), &pid()).unwrap();
        assert!(loaded.records.is_empty());
        assert!(loaded.last_full_sync_at.is_none());
    }

    #[test]
    fn purge_removes_state_file() {
        let tmp = TempDir::new().unwrap();
        let mut store = StateStore::open_at(tmp.path(), &pid()).unwrap();
        store.commit(Mutation::Record(record("a", "aa"))).unwrap();
        assert!(purge_at(tmp.path(), &pid()).unwrap());
        assert!(!purge_at(tmp.path(), &pid()).unwrap());
    }

    #[test]
    #[cfg(unix)]
    fn failed_save_rolls_back_memory() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = TempDir::new().unwrap();
        let mut store = StateStore::open_at(tmp.path(), &pid()).unwrap();
        store.commit(Mutation::Record(record("a", "aa"))).unwrap();

        let dir = store.path().parent().unwrap().to_path_buf();
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o555)).unwrap();
        let result = store.commit(Mutation::Record(record("b", "bb")));
        fs::set_permissions(&dir, fs::Permissions::from_mode(0o755)).unwrap();

        // Root ignores directory permissions; only assert when the write failed.
        if result.is_err() {
            assert!(!store.state().records.contains_key("b"));
            assert!(store.state().records.contains_key("a"));
        }
    }
}
