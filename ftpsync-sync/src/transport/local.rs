//! Directory-backed transport.
//!
//! Mirrors into a locally mounted directory (network share, external disk).
//! Remote paths are interpreted as filesystem paths, so the profile's
//! `base_path` must be absolute. Uploads land via a `.ftpsync.tmp` sibling
//! and a rename, so a reader never sees a half-written file.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ftpsync_core::types::{Credentials, RemoteTarget};

use super::{Session, Transport, TransportError};

/// Transport that writes into a local directory tree.
#[derive(Debug, Default, Clone)]
pub struct LocalTransport;

impl LocalTransport {
    pub fn new() -> Self {
        Self
    }
}

impl Transport for LocalTransport {
    fn connect(
        &self,
        target: &RemoteTarget,
        _credentials: &Credentials,
    ) -> Result<Box<dyn Session>, TransportError> {
        let base = Path::new(&target.base_path);
        if target.base_path.is_empty() || !base.is_absolute() {
            return Err(TransportError::Transfer(format!(
                "local target needs an absolute base path, got '{}'",
                target.base_path
            )));
        }
        fs::create_dir_all(base).map_err(|e| classify(base, e))?;
        Ok(Box::new(LocalSession {
            base: base.to_path_buf(),
        }))
    }
}

/// Session on a [`LocalTransport`].
#[derive(Debug)]
pub struct LocalSession {
    base: PathBuf,
}

impl Session for LocalSession {
    fn ensure_directory(&mut self, path: &str) -> Result<(), TransportError> {
        let dir = Path::new(path);
        fs::create_dir_all(dir).map_err(|e| classify(dir, e))
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let target = Path::new(remote);
        let tmp = PathBuf::from(format!("{remote}.ftpsync.tmp"));
        if let Err(e) = fs::copy(local, &tmp) {
            let _ = fs::remove_file(&tmp);
            let detail = format!("{} -> {remote}: {e}", local.display());
            return Err(if target.parent().is_some_and(|p| !p.exists()) {
                TransportError::NotFound(detail)
            } else {
                TransportError::Transfer(detail)
            });
        }
        if let Err(e) = fs::rename(&tmp, target) {
            let _ = fs::remove_file(&tmp);
            return Err(classify(target, e));
        }
        Ok(())
    }

    fn delete(&mut self, remote: &str) -> Result<(), TransportError> {
        let path = Path::new(remote);
        fs::remove_file(path).map_err(|e| classify(path, e))
    }

    fn remove_directory(&mut self, path: &str) -> Result<(), TransportError> {
        let dir = Path::new(path);
        fs::remove_dir(dir).map_err(|e| classify(dir, e))
    }

    fn close(self: Box<Self>) -> Result<(), TransportError> {
        tracing::debug!("closing local session on {}", self.base.display());
        Ok(())
    }
}

fn classify(path: &Path, e: std::io::Error) -> TransportError {
    let detail = format!("{}: {e}", path.display());
    match e.kind() {
        ErrorKind::NotFound => TransportError::NotFound(detail),
        ErrorKind::PermissionDenied => TransportError::Permission(detail),
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::TimedOut
        | ErrorKind::Interrupted => TransportError::Network(detail),
        _ => TransportError::Transfer(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ftpsync_core::types::Protocol;
    use tempfile::TempDir;

    fn target(base: &Path) -> RemoteTarget {
        RemoteTarget {
            protocol: Protocol::Local,
            host: String::new(),
            port: 0,
            base_path: base.to_string_lossy().into_owned(),
        }
    }

    #[test]
    fn connect_creates_base_and_rejects_relative() {
        let tmp = TempDir::new().unwrap();
        let base = tmp.path().join("mirror");
        LocalTransport::new()
            .connect(&target(&base), &Credentials::default())
            .expect("connect");
        assert!(base.is_dir());

        let mut relative = target(&base);
        relative.base_path = "mirror".into();
        let err = LocalTransport::new()
            .connect(&relative, &Credentials::default())
            .err()
            .expect("relative base path must be rejected");
        assert!(matches!(err, TransportError::Transfer(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn upload_ensure_and_delete() {
        let tmp = TempDir::new().unwrap();
        let src = tmp.path().join("src.txt");
        fs::write(&src, "payload").unwrap();
        let base = tmp.path().join("mirror");
        let mut session = LocalTransport::new()
            .connect(&target(&base), &Credentials::default())
            .unwrap();

        let dir = format!("{}/a/b", base.display());
        session.ensure_directory(&dir).unwrap();
        session.ensure_directory(&dir).expect("idempotent");

        let remote = format!("{dir}/file.txt");
        session.upload(&src, &remote).unwrap();
        assert_eq!(fs::read_to_string(&remote).unwrap(), "payload");
        assert!(!Path::new(&format!("{remote}.ftpsync.tmp")).exists());

        session.delete(&remote).unwrap();
        let err = session.delete(&remote).unwrap_err();
        assert!(matches!(err, TransportError::NotFound(_)));

        fs::write(format!("{dir}/other.txt"), "x").unwrap();
        assert!(session.remove_directory(&dir).is_err(), "non-empty stays");
        fs::remove_file(format!("{dir}/other.txt")).unwrap();
        session.remove_directory(&dir).unwrap();
        assert!(!Path::new(&dir).exists());
        session.close().unwrap();
    }
}
