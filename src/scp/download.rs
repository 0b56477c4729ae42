use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use super::protocol::{copy_exact, parse_header, read_line, read_status, send_ack, Header};
use super::{finish, quote_remote_path};
use crate::error::{Result, SshError};
use crate::transport::Connection;

pub async fn download_file(connection: &dyn Connection, remote: &str, local: &Path) -> Result<()> {
    let command = format!("scp -vf {}", quote_remote_path(remote));
    let mut channel = connection.exec(&command).await?;
    debug!(%command, local = %local.display(), "Downloading file");

    let outcome = {
        let mut reader = BufReader::new(&mut channel.stdout);
        let writer = &mut channel.stdin;
        receive_single_file(&mut reader, writer, local).await
    };
    finish(channel, outcome).await
}

pub async fn download_directory(
    connection: &dyn Connection,
    remote: &str,
    local: &Path,
) -> Result<()> {
    prepare_destination(local).await?;

    let command = format!("scp -rf {}", quote_remote_path(remote));
    let mut channel = connection.exec(&command).await?;
    debug!(%command, local = %local.display(), "Downloading directory");

    let outcome = {
        let mut reader = BufReader::new(&mut channel.stdout);
        let writer = &mut channel.stdin;
        match send_ack(writer).await {
            Ok(()) => receive_directory(&mut reader, writer, local.to_path_buf(), true).await,
            Err(e) => Err(e),
        }
    };
    finish(channel, outcome).await
}

/// Creates `local` if needed. An existing non-directory is an error.
async fn prepare_destination(local: &Path) -> Result<()> {
    match tokio::fs::metadata(local).await {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} exists and is not a directory", local.display()),
        )
        .into()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(local).await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn receive_single_file<R, W>(reader: &mut R, writer: &mut W, local: &Path) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send_ack(writer).await?;

    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| SshError::protocol("connection closed before file header"))?;

        match parse_header(&line)? {
            Header::Time => send_ack(writer).await?,
            Header::File { size, name, .. } => {
                // An existing directory receives the file under its remote name
                let target = match tokio::fs::metadata(local).await {
                    Ok(metadata) if metadata.is_dir() => local.join(safe_name(&name)?),
                    _ => local.to_path_buf(),
                };
                return receive_file_body(reader, writer, &target, size).await;
            }
            Header::Error(message) => return Err(SshError::Protocol(message)),
            other => {
                return Err(SshError::protocol(format!(
                    "expected file header, got {:?}",
                    other
                )))
            }
        }
    }
}

/// Acks a `C` header, writes `size` bytes to `target` and completes the exchange.
async fn receive_file_body<R, W>(reader: &mut R, writer: &mut W, target: &Path, size: u64) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    send_ack(writer).await?;
    let mut file = File::create(target).await?;
    copy_exact(reader, &mut file, size).await?;
    file.flush().await?;
    read_status(reader).await?;
    send_ack(writer).await
}

fn receive_directory<'a, R, W>(
    reader: &'a mut R,
    writer: &'a mut W,
    dir: PathBuf,
    root: bool,
) -> BoxFuture<'a, Result<()>>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    Box::pin(async move {
        loop {
            // The remote closing the stream is a normal end of transfer
            let Some(line) = read_line(reader).await? else {
                return Ok(());
            };

            match parse_header(&line)? {
                Header::Time => send_ack(writer).await?,
                Header::File { size, name, .. } => {
                    let target = dir.join(safe_name(&name)?);
                    receive_file_body(reader, writer, &target, size).await?;
                }
                Header::Directory { name, .. } => {
                    let target = if root {
                        dir.clone()
                    } else {
                        dir.join(safe_name(&name)?)
                    };
                    send_ack(writer).await?;
                    tokio::fs::create_dir_all(&target).await?;
                    receive_directory(reader, writer, target, false).await?;
                }
                Header::EndDirectory => {
                    send_ack(writer).await?;
                    return Ok(());
                }
                Header::Error(message) => {
                    warn!(message = %message, "Remote scp reported an error");
                }
            }
        }
    })
}

/// Rejects names that would escape the destination directory.
fn safe_name(name: &str) -> Result<&str> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\')
    {
        return Err(SshError::protocol(format!("unsafe file name: {:?}", name)));
    }
    Ok(name)
}
