//! # ftpsync-ftp
//!
//! FTP [`Transport`] built on `suppaftp`'s blocking client.
//!
//! One [`FtpSession`] per control connection, binary mode, passive data
//! connections. Reply codes are mapped onto [`TransportError`] classes so the
//! orchestrator can decide between retrying, failing one file, and aborting.

use std::fs::File;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};

use ftpsync_core::types::{Credentials, RemoteTarget};
use ftpsync_sync::transport::{Session, Transport, TransportError};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Which command a reply belongs to; the same code means different things
/// for different commands (550 on DELE is "already gone").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Login,
    MakeDir,
    Upload,
    Delete,
    Other,
}

/// Map an FTP reply code to an error class.
pub fn classify_reply(op: Op, code: u32, detail: String) -> TransportError {
    match (op, code) {
        (_, 530 | 332 | 532) => TransportError::Auth(detail),
        (Op::Login, _) => TransportError::Auth(detail),
        (_, 421 | 425 | 426) => TransportError::Network(detail),
        (Op::Delete, 550) => TransportError::NotFound(detail),
        (Op::MakeDir | Op::Upload, 553) => TransportError::Permission(detail),
        _ => TransportError::Transfer(detail),
    }
}

fn classify(op: Op, context: &str, err: FtpError) -> TransportError {
    match err {
        FtpError::UnexpectedResponse(response) => {
            let code = response.status.code();
            let body = String::from_utf8_lossy(&response.body).trim().to_string();
            classify_reply(op, code, format!("{context}: {code} {body}"))
        }
        FtpError::ConnectionError(e) => TransportError::Network(format!("{context}: {e}")),
        other => TransportError::Network(format!("{context}: {other}")),
    }
}

/// FTP transport with a per-connection I/O timeout.
#[derive(Debug, Clone)]
pub struct FtpTransport {
    timeout: Duration,
}

impl Default for FtpTransport {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl FtpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn resolve(target: &RemoteTarget) -> Result<SocketAddr, TransportError> {
    let label = format!("{}:{}", target.host, target.port);
    (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::Network(format!("resolving {label}: {e}")))?
        .next()
        .ok_or_else(|| TransportError::Network(format!("{label} resolved to no address")))
}

impl Transport for FtpTransport {
    fn connect(
        &self,
        target: &RemoteTarget,
        credentials: &Credentials,
    ) -> Result<Box<dyn Session>, TransportError> {
        if target.host.is_empty() {
            return Err(TransportError::Network("no FTP host configured".to_string()));
        }
        let addr = resolve(target)?;
        tracing::debug!("connecting to {addr}");
        let mut stream = FtpStream::connect_timeout(addr, self.timeout)
            .map_err(|e| classify(Op::Other, "connect", e))?;
        let control = stream.get_ref();
        control
            .set_read_timeout(Some(self.timeout))
            .and_then(|()| control.set_write_timeout(Some(self.timeout)))
            .map_err(|e| TransportError::Network(format!("setting timeouts: {e}")))?;

        let user = if credentials.username.is_empty() {
            "anonymous"
        } else {
            credentials.username.as_str()
        };
        stream
            .login(user, credentials.password.as_str())
            .map_err(|e| classify(Op::Login, "login", e))?;
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| classify(Op::Other, "TYPE I", e))?;
        let home = stream.pwd().map_err(|e| classify(Op::Other, "PWD", e))?;
        tracing::info!("logged in to {} as {user}", target.host);

        Ok(Box::new(FtpSession { stream, home }))
    }
}

/// One logged-in control connection.
pub struct FtpSession {
    stream: FtpStream,
    /// Working directory right after login; relative paths resolve here.
    home: String,
}

impl FtpSession {
    fn restore_cwd(&mut self) -> Result<(), TransportError> {
        let home = self.home.clone();
        self.stream
            .cwd(&home)
            .map_err(|e| classify(Op::Other, &format!("CWD {home}"), e))
    }
}

impl Session for FtpSession {
    /// MKD each prefix in turn, then confirm with CWD. Servers disagree on
    /// the reply for "already exists", so MKD failures alone prove nothing.
    fn ensure_directory(&mut self, path: &str) -> Result<(), TransportError> {
        let absolute = path.starts_with('/');
        let mut prefix = String::new();
        let mut last_err = None;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            if absolute || !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            match self.stream.mkdir(&prefix) {
                Ok(()) => tracing::debug!("MKD {prefix}"),
                Err(e) => {
                    let err = classify(Op::MakeDir, &format!("MKD {prefix}"), e);
                    if err.is_transient() || matches!(err, TransportError::Auth(_)) {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }
        if prefix.is_empty() {
            return Ok(());
        }
        match self.stream.cwd(&prefix) {
            Ok(()) => self.restore_cwd(),
            Err(e) => Err(last_err
                .unwrap_or_else(|| classify(Op::MakeDir, &format!("CWD {prefix}"), e))),
        }
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let mut file = File::open(local)
            .map_err(|e| TransportError::Transfer(format!("{}: {e}", local.display())))?;
        let bytes = self
            .stream
            .put_file(remote, &mut file)
            .map_err(|e| classify(Op::Upload, &format!("STOR {remote}"), e))?;
        tracing::debug!("STOR {remote} ({bytes} bytes)");
        Ok(())
    }

    fn delete(&mut self, remote: &str) -> Result<(), TransportError> {
        self.stream
            .rm(remote)
            .map_err(|e| classify(Op::Delete, &format!("DELE {remote}"), e))
    }

    fn remove_directory(&mut self, path: &str) -> Result<(), TransportError> {
        self.stream
            .rmdir(path)
            .map_err(|e| classify(Op::Other, &format!("RMD {path}"), e))
    }

    fn close(mut self: Box<Self>) -> Result<(), TransportError> {
        self.stream
            .quit()
            .map_err(|e| classify(Op::Other, "QUIT", e))
    }
}
