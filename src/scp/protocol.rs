//! Control bytes and headers of the scp wire dialect.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SshError};

pub const FILE_MODE: &str = "0644";
pub const DIR_MODE: &str = "0755";
pub const END_DIRECTORY: &[u8] = b"E\n";

const ACK: u8 = 0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    /// `C<mode> <size> <name>`
    File { mode: String, size: u64, name: String },
    /// `D<mode> 0 <name>`
    Directory { mode: String, name: String },
    /// `E`
    EndDirectory,
    /// `T<mtime> 0 <atime> 0`, carried but ignored.
    Time,
    /// A line starting with control byte 1 (warning) or 2 (fatal).
    Error(String),
}

pub fn file_header(size: u64, name: &str) -> String {
    format!("C{} {} {}\n", FILE_MODE, size, name)
}

pub fn directory_header(name: &str) -> String {
    format!("D{} 0 {}\n", DIR_MODE, name)
}

pub fn parse_header(line: &str) -> Result<Header> {
    let Some(kind) = line.chars().next() else {
        return Err(SshError::protocol("empty header"));
    };

    match kind {
        'C' | 'D' => {
            let mut parts = line[1..].splitn(3, ' ');
            let mode = parts.next().unwrap_or_default();
            let size = parts.next().unwrap_or_default();
            let name = parts.next().unwrap_or_default();

            if mode.is_empty() || !mode.chars().all(|c| c.is_digit(8)) {
                return Err(SshError::protocol(format!("invalid mode in header: {}", line)));
            }
            let size: u64 = size
                .parse()
                .map_err(|_| SshError::protocol(format!("invalid size in header: {}", line)))?;
            if name.is_empty() {
                return Err(SshError::protocol(format!("missing name in header: {}", line)));
            }

            let mode = mode.to_string();
            let name = name.to_string();
            if kind == 'C' {
                Ok(Header::File { mode, size, name })
            } else {
                Ok(Header::Directory { mode, name })
            }
        }
        'E' => Ok(Header::EndDirectory),
        'T' => Ok(Header::Time),
        '\x01' | '\x02' => Ok(Header::Error(line[1..].to_string())),
        _ => Err(SshError::protocol(format!("unexpected header: {:?}", line))),
    }
}

pub async fn send_ack<W: AsyncWrite + Unpin>(writer: &mut W) -> Result<()> {
    writer.write_all(&[ACK]).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn send_line<W: AsyncWrite + Unpin>(writer: &mut W, line: &[u8]) -> Result<()> {
    writer.write_all(line).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one control byte. A non-zero byte is followed by a message line,
/// which is drained and returned as the error.
pub async fn read_status<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<()> {
    let mut byte = [0u8; 1];
    if reader.read(&mut byte).await? == 0 {
        return Err(SshError::protocol("connection closed while waiting for acknowledgement"));
    }
    if byte[0] == ACK {
        return Ok(());
    }

    let message = read_line(reader).await?.unwrap_or_default();
    Err(SshError::Protocol(message))
}

/// Reads one newline-terminated line without the newline. `None` at end of stream.
pub async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Option<String>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// Copies exactly `size` bytes. Running out of input early is a protocol error.
pub async fn copy_exact<R, W>(reader: &mut R, writer: &mut W, size: u64) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let copied = tokio::io::copy(&mut reader.take(size), writer).await?;
    if copied != size {
        return Err(SshError::protocol(format!(
            "short transfer: expected {} bytes, got {}",
            size, copied
        )));
    }
    Ok(())
}
