//! Error taxonomy shared by every SSH operation.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SshError>;

/// Errors surfaced to tool callers.
///
/// Nothing is retried internally: a failed transfer leaves the local side in
/// an unknown state and the caller is expected to start over.
#[derive(Debug, Error)]
pub enum SshError {
    /// Bad credentials or no usable authentication method.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// The TCP dial or SSH handshake failed.
    #[error("failed to connect to SSH server: {0}")]
    Connection(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// A host or command was blocked by the security policy.
    #[error("{0}")]
    SecurityDenied(String),

    #[error("rate limit exceeded, please try again later")]
    RateLimited,

    /// The remote process exited with a non-zero status, or never reported one.
    #[error("command execution failed with status {}: {stderr}", display_status(.status))]
    CommandFailed { status: Option<u32>, stderr: String },

    #[error("command execution timed out after {0}s")]
    Timeout(u64),

    /// Malformed SCP header, unexpected control byte or short transfer.
    #[error("SCP protocol error: {0}")]
    Protocol(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid parameters: {0}")]
    InvalidArguments(String),
}

impl SshError {
    pub fn protocol(message: impl Into<String>) -> Self {
        SshError::Protocol(message.into())
    }

    /// Whether the error was produced by the security gate.
    pub fn is_security(&self) -> bool {
        matches!(self, SshError::SecurityDenied(_) | SshError::RateLimited)
    }
}

fn display_status(status: &Option<u32>) -> String {
    match status {
        Some(code) => code.to_string(),
        None => "unknown".to_string(),
    }
}

impl From<russh::Error> for SshError {
    fn from(err: russh::Error) -> Self {
        SshError::Connection(err.to_string())
    }
}
