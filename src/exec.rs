use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

use crate::error::{Result, SshError};
use crate::transport::Connection;

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured output of a finished remote command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Standard output followed by standard error, if there was any.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout.trim_end_matches('\n'), self.stderr)
        }
    }
}

/// Runs `command` on a fresh exec channel and waits for it to finish.
///
/// A zero `timeout` uses [`DEFAULT_COMMAND_TIMEOUT`]. On timeout the remote
/// process is abandoned and its channel closed.
pub async fn execute(
    connection: &dyn Connection,
    command: &str,
    timeout: Duration,
) -> Result<CommandOutput> {
    let timeout = if timeout.is_zero() {
        DEFAULT_COMMAND_TIMEOUT
    } else {
        timeout
    };

    let mut channel = connection.exec(command).await?;
    // Nothing is fed to the command
    channel.stdin.shutdown().await?;

    let run = async {
        let mut stdout = Vec::new();
        channel.stdout.read_to_end(&mut stdout).await?;
        let status = channel.wait().await;
        Ok::<_, SshError>((stdout, status))
    };

    let (stdout, status) = match tokio::time::timeout(timeout, run).await {
        Ok(result) => result?,
        Err(_) => {
            debug!(command, "command timed out");
            return Err(SshError::Timeout(timeout.as_secs()));
        }
    };

    let stderr = channel.stderr();
    match status {
        Some(0) => Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr,
        }),
        status => Err(SshError::CommandFailed { status, stderr }),
    }
}
