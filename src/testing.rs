//! In-process fake transport used by unit tests.
//!
//! [`FakeConnection`] serves every exec channel from a spawned task that plays
//! the remote side: a tiny shell that understands `echo`, `sleep`, `exit`,
//! `ls -la` and the `scp -t`/`scp -f` dialect against a local directory that
//! stands in for the remote filesystem.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream,
};
use tokio::sync::oneshot;

use crate::error::{Result, SshError};
use crate::transport::{CaptureBuffer, Connection, Connector, ExecChannel, SshConfig};

const PIPE_CAPACITY: usize = 8 * 1024;

#[derive(Default)]
pub struct FakeConnection {
    root: Option<PathBuf>,
    listing: Mutex<String>,
    reject: Mutex<Option<String>>,
    reject_after: Mutex<Option<(usize, String)>>,
    commands: Mutex<Vec<String>>,
    closes: AtomicUsize,
}

impl FakeConnection {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A connection whose remote filesystem is rooted at `root`.
    pub fn with_root(root: &Path) -> Arc<Self> {
        Arc::new(Self {
            root: Some(root.to_path_buf()),
            ..Default::default()
        })
    }

    /// Output returned by `ls -la`.
    pub fn set_listing(&self, listing: &str) {
        *self.listing.lock().unwrap() = listing.to_string();
    }

    /// Makes every remote `scp` answer with an error byte and `message`.
    pub fn reject_scp(&self, message: &str) {
        *self.reject.lock().unwrap() = Some(message.to_string());
    }

    /// Makes the `scp -t` sink answer its ack number `acks + 1` with an
    /// error byte and `message`. The initial ready byte counts as the first.
    pub fn reject_after(&self, acks: usize, message: &str) {
        *self.reject_after.lock().unwrap() = Some((acks, message.to_string()));
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn resolve(&self, quoted: &str) -> PathBuf {
        let path = unquote(quoted);
        let path = path.trim_start_matches("~/").trim_start_matches('/');
        match &self.root {
            Some(root) => root.join(path),
            None => PathBuf::from(path),
        }
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn exec(&self, command: &str) -> Result<ExecChannel> {
        self.commands.lock().unwrap().push(command.to_string());

        let (stdin_local, stdin_remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_remote, stdout_local) = tokio::io::duplex(PIPE_CAPACITY);
        let stderr = CaptureBuffer::default();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (close_tx, _close_rx) = oneshot::channel();

        let remote = Remote {
            stdin: BufReader::new(stdin_remote),
            stdout: stdout_remote,
            stderr: stderr.clone(),
        };
        let action = self.parse(command);
        tokio::spawn(async move {
            let status = remote.run(action).await;
            let _ = exit_tx.send(status);
        });

        Ok(ExecChannel::new(
            Box::new(stdin_local),
            Box::new(stdout_local),
            stderr,
            exit_rx,
            close_tx,
        ))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeConnection {
    fn parse(&self, command: &str) -> Action {
        let reject = self.reject.lock().unwrap().clone();
        if let Some(rest) = command.strip_prefix("echo ") {
            return Action::Echo(rest.to_string());
        }
        if let Some(rest) = command.strip_prefix("sleep ") {
            return Action::Sleep(rest.trim().parse().unwrap_or(0));
        }
        if let Some(rest) = command.strip_prefix("exit ") {
            return Action::Exit(rest.trim().parse().unwrap_or(1));
        }
        if command.starts_with("ls -la") {
            return Action::Echo(self.listing.lock().unwrap().trim_end().to_string());
        }
        for (prefix, recursive, is_sink) in [
            ("scp -vrt ", true, true),
            ("scp -vt ", false, true),
            ("scp -rf ", true, false),
            ("scp -vf ", false, false),
        ] {
            if let Some(path) = command.strip_prefix(prefix) {
                if let Some(message) = reject {
                    return Action::Reject(message);
                }
                let target = self.resolve(path);
                return if is_sink {
                    let fail_at = self.reject_after.lock().unwrap().clone();
                    Action::Sink { target, fail_at }
                } else {
                    Action::Source { target, recursive }
                };
            }
        }
        Action::Unknown(command.to_string())
    }
}

enum Action {
    Echo(String),
    Sleep(u64),
    Exit(u32),
    Sink {
        target: PathBuf,
        fail_at: Option<(usize, String)>,
    },
    Source { target: PathBuf, recursive: bool },
    Reject(String),
    Unknown(String),
}

struct Remote {
    stdin: BufReader<DuplexStream>,
    stdout: DuplexStream,
    stderr: CaptureBuffer,
}

impl Remote {
    async fn run(mut self, action: Action) -> Option<u32> {
        let status = match action {
            Action::Echo(text) => {
                let _ = self.stdout.write_all(format!("{}\n", text).as_bytes()).await;
                0
            }
            Action::Sleep(secs) => {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                0
            }
            Action::Exit(code) => {
                self.stderr.append(format!("exit status {}\n", code).as_bytes());
                code
            }
            Action::Reject(message) => {
                let _ = self
                    .stdout
                    .write_all(format!("\x01{}\n", message).as_bytes())
                    .await;
                self.stderr.append(message.as_bytes());
                1
            }
            Action::Unknown(command) => {
                self.stderr
                    .append(format!("sh: {}: command not found\n", command).as_bytes());
                127
            }
            Action::Sink { target, fail_at } => {
                let mut acks = Acks { sent: 0, fail_at };
                match sink(&mut self.stdin, &mut self.stdout, target, &mut acks).await {
                    Ok(()) => 0,
                    Err(e) => {
                        self.stderr.append(e.to_string().as_bytes());
                        1
                    }
                }
            }
            Action::Source { target, recursive } => {
                match source(&mut self.stdin, &mut self.stdout, target, recursive).await {
                    Ok(()) => 0,
                    Err(e) => {
                        self.stderr.append(e.to_string().as_bytes());
                        1
                    }
                }
            }
        };
        drop(self.stdout);
        Some(status)
    }
}

type RemoteResult = std::result::Result<(), std::io::Error>;

fn remote_error(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, message)
}

/// Counts the sink's acks and turns one of them into an error.
struct Acks {
    sent: usize,
    fail_at: Option<(usize, String)>,
}

impl Acks {
    async fn send<W: AsyncWrite + Unpin>(&mut self, stdout: &mut W) -> RemoteResult {
        if let Some((after, message)) = &self.fail_at {
            if self.sent == *after {
                stdout.write_all(format!("\x01{}\n", message).as_bytes()).await?;
                return Err(remote_error(message.clone()));
            }
        }
        self.sent += 1;
        stdout.write_all(&[0]).await
    }
}

/// Receiving side, as run by `scp -t`.
async fn sink<R, W>(stdin: &mut R, stdout: &mut W, target: PathBuf, acks: &mut Acks) -> RemoteResult
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    acks.send(stdout).await?;
    let mut stack = vec![target];

    loop {
        let mut line = Vec::new();
        if stdin.read_until(b'\n', &mut line).await? == 0 {
            return Ok(());
        }
        let line = String::from_utf8_lossy(&line).trim_end().to_string();
        let top = stack.last().cloned().unwrap_or_default();

        match line.chars().next() {
            Some('C') => {
                let (size, name) = parse_header(&line)?;
                let path = if top.is_dir() { top.join(name) } else { top };
                acks.send(stdout).await?;
                let mut data = vec![0u8; size as usize];
                stdin.read_exact(&mut data).await?;
                let mut end = [0u8; 1];
                stdin.read_exact(&mut end).await?;
                tokio::fs::write(&path, &data).await?;
                acks.send(stdout).await?;
            }
            Some('D') => {
                let (_, name) = parse_header(&line)?;
                let path = if top.is_dir() { top.join(name) } else { top };
                tokio::fs::create_dir_all(&path).await?;
                stack.push(path);
                acks.send(stdout).await?;
            }
            Some('E') => {
                stack.pop();
                acks.send(stdout).await?;
            }
            Some('T') => acks.send(stdout).await?,
            _ => {
                stdout
                    .write_all(format!("\x01unexpected header {}\n", line).as_bytes())
                    .await?;
                return Err(remote_error(format!("unexpected header {}", line)));
            }
        }
    }
}

fn parse_header(line: &str) -> std::result::Result<(u64, String), std::io::Error> {
    let mut parts = line[1..].splitn(3, ' ');
    let _mode = parts.next();
    let size = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| remote_error(format!("bad header {}", line)))?;
    let name = parts
        .next()
        .ok_or_else(|| remote_error(format!("bad header {}", line)))?;
    Ok((size, name.to_string()))
}

/// Sending side, as run by `scp -f`.
async fn source<R, W>(stdin: &mut R, stdout: &mut W, target: PathBuf, recursive: bool) -> RemoteResult
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    expect_ack(stdin).await?;

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let Ok(meta) = tokio::fs::metadata(&target).await else {
        let message = format!("scp: {}: No such file or directory", name);
        stdout.write_all(format!("\x01{}\n", message).as_bytes()).await?;
        return Err(remote_error(message));
    };

    if meta.is_dir() {
        if !recursive {
            let message = format!("scp: {}: not a regular file", name);
            stdout.write_all(format!("\x01{}\n", message).as_bytes()).await?;
            return Err(remote_error(message));
        }
        send_dir(stdin, stdout, target).await
    } else {
        send_file(stdin, stdout, &target).await
    }
}

async fn expect_ack<R: AsyncRead + Unpin>(stdin: &mut R) -> RemoteResult {
    let mut byte = [0u8; 1];
    stdin.read_exact(&mut byte).await?;
    if byte[0] != 0 {
        return Err(remote_error(format!("expected ack, got {}", byte[0])));
    }
    Ok(())
}

async fn send_file<R, W>(stdin: &mut R, stdout: &mut W, path: &Path) -> RemoteResult
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let data = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    stdout
        .write_all(format!("C0644 {} {}\n", data.len(), name).as_bytes())
        .await?;
    expect_ack(stdin).await?;
    stdout.write_all(&data).await?;
    stdout.write_all(&[0]).await?;
    expect_ack(stdin).await
}

fn send_dir<'a, R, W>(stdin: &'a mut R, stdout: &'a mut W, path: PathBuf) -> BoxFuture<'a, RemoteResult>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    Box::pin(async move {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        stdout.write_all(b"T1700000000 0 1700000000 0\n").await?;
        expect_ack(stdin).await?;
        stdout
            .write_all(format!("D0755 0 {}\n", name).as_bytes())
            .await?;
        expect_ack(stdin).await?;

        let mut children = Vec::new();
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            children.push(entry.path());
        }
        children.sort();

        for child in children {
            if child.is_dir() {
                send_dir(stdin, stdout, child).await?;
            } else {
                send_file(stdin, stdout, &child).await?;
            }
        }

        stdout.write_all(b"E\n").await?;
        expect_ack(stdin).await
    })
}

fn unquote(path: &str) -> String {
    let path = path.trim();
    if let Some(rest) = path.strip_prefix("~/") {
        return format!("~/{}", unquote(rest));
    }
    path.trim_start_matches('\'')
        .trim_end_matches('\'')
        .replace("'\\''", "'")
}

/// Hands out one shared [`FakeConnection`] and records every dial.
pub struct FakeConnector {
    pub connection: Arc<FakeConnection>,
    dials: Mutex<Vec<SshConfig>>,
    fail_with: Option<String>,
}

impl FakeConnector {
    pub fn new(connection: Arc<FakeConnection>) -> Self {
        Self {
            connection,
            dials: Mutex::new(Vec::new()),
            fail_with: None,
        }
    }

    /// A connector whose every dial fails with a connection error.
    pub fn failing(message: &str) -> Self {
        Self {
            connection: FakeConnection::new(),
            dials: Mutex::new(Vec::new()),
            fail_with: Some(message.to_string()),
        }
    }

    pub fn dials(&self) -> Vec<SshConfig> {
        self.dials.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn dial(&self, config: SshConfig) -> Result<Arc<dyn Connection>> {
        self.dials.lock().unwrap().push(config);
        if let Some(message) = &self.fail_with {
            return Err(SshError::Connection(message.clone()));
        }
        Ok(self.connection.clone())
    }
}
