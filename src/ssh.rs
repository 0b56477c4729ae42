use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::{decode_secret_key, load_secret_key, PrivateKeyWithHashAlg};
use russh::{Channel, ChannelMsg, Disconnect};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{Result, SshError};
use crate::transport::{CaptureBuffer, Connection, Connector, ExecChannel, SshAuth, SshConfig};

/// Buffer size of the in-process pipes between a caller and a channel pump.
const PIPE_CAPACITY: usize = 64 * 1024;

/// SSH extended data type for stderr.
const EXTENDED_DATA_STDERR: u32 = 1;

struct Client;

impl client::Handler for Client {
    type Error = russh::Error;

    fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> impl std::future::Future<Output = std::result::Result<bool, Self::Error>> + Send {
        // Host keys are not verified yet
        async { Ok(true) }
    }
}

/// Dials real SSH servers with russh.
#[derive(Debug, Default, Clone, Copy)]
pub struct RusshConnector;

#[async_trait]
impl Connector for RusshConnector {
    async fn dial(&self, config: SshConfig) -> Result<Arc<dyn Connection>> {
        let connection = dial(config).await?;
        Ok(Arc::new(connection))
    }
}

/// Opens and authenticates a new SSH connection.
pub async fn dial(config: SshConfig) -> Result<SshConnection> {
    SshConnection::connect(config).await
}

pub struct SshConnection {
    handle: Mutex<Handle<Client>>,
}

impl SshConnection {
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let client_config = client::Config {
            keepalive_interval: Some(Duration::from_secs(30)),
            ..<_>::default()
        };

        let client_config = Arc::new(client_config);
        let dial = client::connect(
            client_config,
            (config.host.as_str(), config.port),
            Client,
        );
        let mut session = tokio::time::timeout(config.timeout, dial)
            .await
            .map_err(|_| {
                SshError::Connection(format!(
                    "timed out after {}s connecting to {}:{}",
                    config.timeout.as_secs(),
                    config.host,
                    config.port
                ))
            })?
            .map_err(|e| SshError::Connection(e.to_string()))?;

        // Authenticate
        let auth_result = match &config.auth {
            SshAuth::Password(password) => session
                .authenticate_password(config.username.clone(), password.clone())
                .await
                .map_err(|e| SshError::Authentication(e.to_string()))?,
            SshAuth::KeyFile(path) => {
                let key = load_secret_key(path, None).map_err(|e| {
                    SshError::Authentication(format!("unable to read private key: {}", e))
                })?;
                let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);
                session
                    .authenticate_publickey(config.username.clone(), key_with_alg)
                    .await
                    .map_err(|e| SshError::Authentication(e.to_string()))?
            }
            SshAuth::KeyData(key_data) => {
                let key = decode_secret_key(key_data, None).map_err(|e| {
                    SshError::Authentication(format!("unable to parse private key: {}", e))
                })?;
                let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);
                session
                    .authenticate_publickey(config.username.clone(), key_with_alg)
                    .await
                    .map_err(|e| SshError::Authentication(e.to_string()))?
            }
        };

        if !auth_result.success() {
            return Err(SshError::Authentication(format!(
                "server rejected credentials for {}",
                config.username
            )));
        }

        info!(host = %config.host, port = config.port, user = %config.username, "SSH connection established");

        Ok(Self {
            handle: Mutex::new(session),
        })
    }
}

#[async_trait]
impl Connection for SshConnection {
    async fn exec(&self, command: &str) -> Result<ExecChannel> {
        let channel = {
            let handle = self.handle.lock().await;
            handle
                .channel_open_session()
                .await
                .map_err(|e| SshError::Connection(format!("failed to open channel: {}", e)))?
        };

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Connection(format!("failed to start command: {}", e)))?;

        debug!(command, "exec channel started");
        Ok(spawn_pump(channel))
    }

    async fn close(&self) {
        let handle = self.handle.lock().await;
        if let Err(e) = handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            warn!("Error during disconnect: {}", e);
        }
    }
}

enum PumpEvent {
    Remote(Option<ChannelMsg>),
    Local(std::io::Result<usize>),
    Close,
}

/// Bridges a russh channel to plain async pipes.
///
/// The pump task owns the channel: bytes written by the caller are forwarded
/// as channel data, channel data is written to the caller's stdout pipe,
/// stderr is captured, and the exit status is reported once the remote side
/// closes.
fn spawn_pump(mut channel: Channel<client::Msg>) -> ExecChannel {
    let (stdin_local, mut stdin_remote) = tokio::io::duplex(PIPE_CAPACITY);
    let (stdout_remote, stdout_local) = tokio::io::duplex(PIPE_CAPACITY);
    let stderr = CaptureBuffer::default();
    let capture = stderr.clone();
    let (exit_tx, exit_rx) = oneshot::channel();
    let (close_tx, mut close_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let mut buf = vec![0u8; PIPE_CAPACITY];
        let mut stdin_open = true;
        let mut stdout = Some(stdout_remote);
        let mut exit_status = None;

        loop {
            let event = tokio::select! {
                msg = channel.wait() => PumpEvent::Remote(msg),
                read = stdin_remote.read(&mut buf), if stdin_open => PumpEvent::Local(read),
                _ = &mut close_rx => PumpEvent::Close,
            };

            match event {
                PumpEvent::Local(Ok(0)) | PumpEvent::Local(Err(_)) => {
                    stdin_open = false;
                    if let Err(e) = channel.eof().await {
                        debug!("failed to send EOF: {}", e);
                    }
                }
                PumpEvent::Local(Ok(n)) => {
                    if let Err(e) = channel.data(&buf[..n]).await {
                        debug!("failed to forward stdin: {}", e);
                        break;
                    }
                }
                PumpEvent::Remote(Some(ChannelMsg::Data { data })) => {
                    if let Some(out) = stdout.as_mut() {
                        if out.write_all(&data).await.is_err() {
                            // Reader is gone; keep draining for the exit status
                            stdout = None;
                        }
                    }
                }
                PumpEvent::Remote(Some(ChannelMsg::ExtendedData { data, ext })) => {
                    if ext == EXTENDED_DATA_STDERR {
                        capture.append(&data);
                    }
                }
                PumpEvent::Remote(Some(ChannelMsg::ExitStatus { exit_status: status })) => {
                    exit_status = Some(status);
                }
                PumpEvent::Remote(Some(ChannelMsg::Eof)) => {
                    stdout = None;
                }
                PumpEvent::Remote(Some(ChannelMsg::Close)) | PumpEvent::Remote(None) => break,
                PumpEvent::Remote(Some(_)) => {}
                PumpEvent::Close => {
                    if let Err(e) = channel.close().await {
                        debug!("failed to close channel: {}", e);
                    }
                    break;
                }
            }
        }

        drop(stdout);
        let _ = exit_tx.send(exit_status);
    });

    ExecChannel::new(
        Box::new(stdin_local),
        Box::new(stdout_local),
        stderr,
        exit_rx,
        close_tx,
    )
}
