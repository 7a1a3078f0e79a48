#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use filetime::{set_file_mtime, FileTime};
use ftpsync_core::registry;
use ftpsync_core::types::{Credentials, ProjectName, ProjectProfile, Protocol, RemoteTarget};
use ftpsync_sync::state_store;
use ftpsync_sync::{
    CancelFlag, LocalTransport, ProjectState, Session, SyncOptions, SyncReport, Transport,
    TransportError,
};
use tempfile::TempDir;

/// A registered project mirroring into a local "remote" directory.
pub struct Project {
    pub home: TempDir,
    pub local: TempDir,
    pub remote: TempDir,
    pub name: ProjectName,
}

impl Project {
    pub fn new() -> Self {
        Self::with(|_| {})
    }

    pub fn with(customize: impl FnOnce(&mut ProjectProfile)) -> Self {
        let home = TempDir::new().expect("home");
        let local = TempDir::new().expect("local");
        let remote = TempDir::new().expect("remote");
        let name = ProjectName::from("site");
        let mut profile = ProjectProfile::new(
            name.clone(),
            local.path().to_path_buf(),
            RemoteTarget {
                protocol: Protocol::Local,
                host: String::new(),
                port: 0,
                base_path: remote.path().to_string_lossy().into_owned(),
            },
        );
        profile.settings.concurrency = 1;
        profile.settings.retry_base_delay_ms = 1;
        customize(&mut profile);
        registry::add_at(home.path(), profile).expect("add profile");
        Self {
            home,
            local,
            remote,
            name,
        }
    }

    pub fn profile(&self) -> ProjectProfile {
        registry::select_at(self.home.path(), &self.name).expect("select")
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let path = self.local.path().join(rel);
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(&path, content).expect("write");
        path
    }

    /// Rewrite `rel` and push its mtime forward so the stat check sees it
    /// even on filesystems with coarse timestamps.
    pub fn edit(&self, rel: &str, content: &str) {
        let path = self.write(rel, content);
        let later = FileTime::from_system_time(SystemTime::now() + Duration::from_secs(10));
        set_file_mtime(path, later).expect("set mtime");
    }

    pub fn remove(&self, rel: &str) {
        fs::remove_file(self.local.path().join(rel)).expect("remove");
    }

    pub fn remote_path(&self, rel: &str) -> PathBuf {
        self.remote.path().join(rel)
    }

    pub fn state(&self) -> ProjectState {
        state_store::load_at(self.home.path(), &self.profile().id).expect("load state")
    }

    pub fn sync(&self, transport: &dyn Transport) -> SyncReport {
        self.sync_with(transport, &SyncOptions::default(), &CancelFlag::new())
    }

    pub fn sync_with(
        &self,
        transport: &dyn Transport,
        options: &SyncOptions,
        cancel: &CancelFlag,
    ) -> SyncReport {
        ftpsync_sync::sync(
            self.home.path(),
            &self.name,
            transport,
            &Credentials::default(),
            options,
            cancel,
        )
        .expect("sync")
    }
}

#[derive(Default)]
struct Faults {
    /// Remote-path suffix -> errors returned by successive upload attempts.
    uploads: Mutex<HashMap<String, Vec<TransportError>>>,
    login: Mutex<Option<TransportError>>,
    cancel_after: Mutex<Option<(usize, CancelFlag)>>,
    connects: AtomicUsize,
    uploaded: AtomicUsize,
    deleted: AtomicUsize,
}

/// [`LocalTransport`] with scripted failures and operation counters.
#[derive(Clone, Default)]
pub struct FaultyTransport {
    inner: LocalTransport,
    faults: Arc<Faults>,
}

impl FaultyTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads of paths ending in `suffix` fail with `errors`, one per attempt.
    pub fn fail_upload(&self, suffix: &str, errors: Vec<TransportError>) {
        self.faults
            .uploads
            .lock()
            .expect("lock")
            .insert(suffix.to_string(), errors);
    }

    pub fn reject_login(&self, error: TransportError) {
        *self.faults.login.lock().expect("lock") = Some(error);
    }

    /// Trip `flag` once `uploads` uploads have landed.
    pub fn cancel_after(&self, uploads: usize, flag: CancelFlag) {
        *self.faults.cancel_after.lock().expect("lock") = Some((uploads, flag));
    }

    pub fn connects(&self) -> usize {
        self.faults.connects.load(Ordering::SeqCst)
    }

    pub fn uploaded(&self) -> usize {
        self.faults.uploaded.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> usize {
        self.faults.deleted.load(Ordering::SeqCst)
    }
}

impl Transport for FaultyTransport {
    fn connect(
        &self,
        target: &RemoteTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn Session>, TransportError> {
        self.faults.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.faults.login.lock().expect("lock").clone() {
            return Err(e);
        }
        Ok(Box::new(FaultySession {
            inner: self.inner.connect(target, credentials)?,
            faults: Arc::clone(&self.faults),
        }))
    }
}

struct FaultySession {
    inner: Box<dyn Session>,
    faults: Arc<Faults>,
}

impl Session for FaultySession {
    fn ensure_directory(&mut self, path: &str) -> Result<(), TransportError> {
        self.inner.ensure_directory(path)
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let scripted = {
            let mut uploads = self.faults.uploads.lock().expect("lock");
            uploads
                .iter_mut()
                .find(|(suffix, errors)| remote.ends_with(suffix.as_str()) && !errors.is_empty())
                .map(|(_, errors)| errors.remove(0))
        };
        if let Some(e) = scripted {
            return Err(e);
        }
        self.inner.upload(local, remote)?;
        let done = self.faults.uploaded.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((after, flag)) = self.faults.cancel_after.lock().expect("lock").as_ref() {
            if done >= *after {
                flag.cancel();
            }
        }
        Ok(())
    }

    fn delete(&mut self, remote: &str) -> Result<(), TransportError> {
        self.inner.delete(remote)?;
        self.faults.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove_directory(&mut self, path: &str) -> Result<(), TransportError> {
        self.inner.remove_directory(path)
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        self.inner.close()
    }
}
