use futures::future::BoxFuture;
use std::path::{Path, MAIN_SEPARATOR};
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::debug;

use super::local::{open_sized, read_entries, LocalEntry};
use super::protocol::{
    copy_exact, directory_header, file_header, read_status, send_ack, send_line, END_DIRECTORY,
};
use super::{finish, quote_remote_path, split_remote_target};
use crate::error::Result;
use crate::transport::Connection;

pub async fn upload_file(connection: &dyn Connection, local: &Path, remote: &str) -> Result<()> {
    let fallback = local
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (target_dir, name) = split_remote_target(remote, &fallback);

    let command = format!("scp -vt {}", quote_remote_path(&target_dir));
    let mut channel = connection.exec(&command).await?;
    debug!(%command, local = %local.display(), "Uploading file");

    let outcome = {
        let mut reader = BufReader::new(&mut channel.stdout);
        let writer = &mut channel.stdin;
        match read_status(&mut reader).await {
            Ok(()) => send_file(&mut reader, writer, local, &name).await,
            Err(e) => Err(e),
        }
    };
    finish(channel, outcome).await
}

pub async fn upload_directory(
    connection: &dyn Connection,
    local: &Path,
    remote: &str,
) -> Result<()> {
    let metadata = tokio::fs::metadata(local).await?;
    if !metadata.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is not a directory", local.display()),
        )
        .into());
    }

    // "dir/" sends the contents only, "dir" nests a new directory remotely
    let raw = local.as_os_str().to_string_lossy();
    let wrap_name = if raw.ends_with('/') || raw.ends_with(MAIN_SEPARATOR) {
        None
    } else {
        match local.file_name() {
            Some(name) => Some(name.to_string_lossy().into_owned()),
            // "." and ".." only have a name once resolved
            None => tokio::fs::canonicalize(local)
                .await?
                .file_name()
                .map(|n| n.to_string_lossy().into_owned()),
        }
    };

    let command = format!("scp -vrt {}", quote_remote_path(remote));
    let mut channel = connection.exec(&command).await?;
    debug!(%command, local = %local.display(), "Uploading directory");

    let outcome = {
        let mut reader = BufReader::new(&mut channel.stdout);
        let writer = &mut channel.stdin;
        send_tree(&mut reader, writer, local, wrap_name.as_deref()).await
    };
    finish(channel, outcome).await
}

async fn send_tree<R, W>(reader: &mut R, writer: &mut W, local: &Path, wrap: Option<&str>) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    read_status(reader).await?;
    match wrap {
        Some(name) => send_directory(reader, writer, local, name).await,
        None => send_entries(reader, writer, local).await,
    }
}

/// Announces a file, streams its bytes and waits for the final ack.
async fn send_file<R, W>(reader: &mut R, writer: &mut W, path: &Path, name: &str) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let (mut file, size) = open_sized(path).await?;

    send_line(writer, file_header(size, name).as_bytes()).await?;
    read_status(reader).await?;
    copy_exact(&mut file, writer, size).await?;
    send_ack(writer).await?;
    read_status(reader).await
}

async fn send_directory<R, W>(reader: &mut R, writer: &mut W, path: &Path, name: &str) -> Result<()>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    send_line(writer, directory_header(name).as_bytes()).await?;
    read_status(reader).await?;
    send_entries(reader, writer, path).await?;
    send_line(writer, END_DIRECTORY).await?;
    read_status(reader).await
}

fn send_entries<'a, R, W>(
    reader: &'a mut R,
    writer: &'a mut W,
    dir: &'a Path,
) -> BoxFuture<'a, Result<()>>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    Box::pin(async move {
        for entry in read_entries(dir).await? {
            match entry {
                LocalEntry::File { name, path } => {
                    send_file(reader, writer, &path, &name).await?;
                }
                LocalEntry::Directory { name, path } => {
                    send_directory(reader, writer, &path, &name).await?;
                }
            }
        }
        Ok(())
    })
}
