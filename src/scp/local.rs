use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::warn;

use crate::error::Result;

/// A local directory entry with symbolic links resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalEntry {
    File { name: String, path: PathBuf },
    Directory { name: String, path: PathBuf },
}

/// Lists `dir`, following symbolic links. Entries are sorted by name.
///
/// Broken links and special files are skipped.
pub async fn read_entries(dir: &Path) -> Result<Vec<LocalEntry>> {
    let mut entries = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;

    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!(path = %path.display(), "Skipping unreadable entry: {}", e);
                continue;
            }
        };

        if metadata.is_dir() {
            entries.push(LocalEntry::Directory { name, path });
        } else if metadata.is_file() {
            entries.push(LocalEntry::File { name, path });
        }
    }

    entries.sort_by(|a, b| a.name().cmp(b.name()));
    Ok(entries)
}

impl LocalEntry {
    pub fn name(&self) -> &str {
        match self {
            LocalEntry::File { name, .. } | LocalEntry::Directory { name, .. } => name,
        }
    }
}

/// Opens `path` for upload and returns it with its exact size.
///
/// Sources whose size is not known up front (pipes, procfs files) are first
/// spooled into an anonymous temporary file.
pub async fn open_sized(path: &Path) -> Result<(File, u64)> {
    let mut file = File::open(path).await?;
    let metadata = file.metadata().await?;
    if metadata.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} is a directory", path.display()),
        )
        .into());
    }
    if metadata.is_file() && metadata.len() > 0 {
        return Ok((file, metadata.len()));
    }

    let mut spool = File::from_std(tempfile::tempfile()?);
    let size = tokio::io::copy(&mut file, &mut spool).await?;
    spool.flush().await?;
    spool.seek(SeekFrom::Start(0)).await?;
    Ok((spool, size))
}
