//! Seam between the tool layer and the underlying remote-execution transport.
//!
//! A [`Connection`] is one authenticated SSH connection. Every command or
//! file transfer opens its own [`ExecChannel`] on it, so several operations
//! can run on the same connection at once.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use crate::error::{Result, SshError};

pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// How to authenticate a new connection.
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    /// Path to a private key file on the local machine.
    KeyFile(PathBuf),
    /// Private key in OpenSSH/PEM text form.
    KeyData(String),
}

impl SshAuth {
    /// Picks the first usable credential, preferring password, then key file,
    /// then inline key text. Empty strings count as absent.
    pub fn from_parts(
        password: Option<String>,
        key_path: Option<String>,
        private_key: Option<String>,
    ) -> Result<Self> {
        let non_empty = |value: Option<String>| value.filter(|v| !v.is_empty());
        if let Some(password) = non_empty(password) {
            Ok(SshAuth::Password(password))
        } else if let Some(path) = non_empty(key_path) {
            Ok(SshAuth::KeyFile(PathBuf::from(path)))
        } else if let Some(key) = non_empty(private_key) {
            Ok(SshAuth::KeyData(key))
        } else {
            Err(SshError::Authentication(
                "no authentication method provided".to_string(),
            ))
        }
    }
}

impl std::fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SshAuth::Password(_) => write!(f, "Password(***)"),
            SshAuth::KeyFile(path) => write!(f, "KeyFile({})", path.display()),
            SshAuth::KeyData(_) => write!(f, "KeyData(***)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SshConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
    pub timeout: Duration,
}

/// Dials new connections.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn dial(&self, config: SshConfig) -> Result<Arc<dyn Connection>>;
}

/// One authenticated remote connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Opens a fresh exec channel and starts `command` on it.
    async fn exec(&self, command: &str) -> Result<ExecChannel>;

    /// Tears the connection down. Failures are logged, not returned.
    async fn close(&self);
}

/// Collects everything the remote side writes to its error stream.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn append(&self, data: &[u8]) {
        if let Ok(mut buf) = self.inner.lock() {
            buf.extend_from_slice(data);
        }
    }

    pub fn contents(&self) -> String {
        match self.inner.lock() {
            Ok(buf) => String::from_utf8_lossy(&buf).into_owned(),
            Err(_) => String::new(),
        }
    }
}

/// A running remote command.
///
/// Writes to `stdin` reach the remote process, `stdout` yields what it prints.
/// Standard error is captured separately. Dropping the channel closes it on
/// the remote side.
pub struct ExecChannel {
    pub stdin: BoxedWriter,
    pub stdout: BoxedReader,
    stderr: CaptureBuffer,
    exit: Option<oneshot::Receiver<Option<u32>>>,
    _close: oneshot::Sender<()>,
}

impl ExecChannel {
    /// `exit` resolves with the remote exit status once the command ends.
    /// `close` is signalled (by being dropped) when the channel goes away.
    pub fn new(
        stdin: BoxedWriter,
        stdout: BoxedReader,
        stderr: CaptureBuffer,
        exit: oneshot::Receiver<Option<u32>>,
        close: oneshot::Sender<()>,
    ) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
            exit: Some(exit),
            _close: close,
        }
    }

    /// Waits for the remote command to finish.
    ///
    /// Returns `None` if the remote never reported an exit status.
    pub async fn wait(&mut self) -> Option<u32> {
        match self.exit.take() {
            Some(rx) => rx.await.ok().flatten(),
            None => None,
        }
    }

    pub fn stderr(&self) -> String {
        self.stderr.contents()
    }
}
