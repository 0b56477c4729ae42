use serde::Serialize;
use std::time::Duration;

use crate::error::Result;
use crate::exec;
use crate::scp::quote_remote_path;
use crate::transport::Connection;

/// One line of an `ls -la` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub name: String,
    pub permissions: String,
    pub size: String,
    pub date: String,
    pub is_directory: bool,
}

impl std::fmt::Display for DirectoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}{}",
            self.permissions,
            self.size,
            self.date,
            self.name,
            if self.is_directory { "/" } else { "" }
        )
    }
}

/// Lists `path` on the remote host.
pub async fn list_directory(connection: &dyn Connection, path: &str) -> Result<Vec<DirectoryEntry>> {
    let command = format!("ls -la {}", quote_remote_path(path));
    let output = exec::execute(connection, &command, Duration::ZERO).await?;
    Ok(parse_listing(&output.stdout))
}

/// Parses POSIX `ls -la` output.
///
/// Lines with fewer than nine fields are skipped, so locale-specific date
/// formats may silently drop entries.
pub fn parse_listing(output: &str) -> Vec<DirectoryEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty() && !line.starts_with("total "))
        .filter_map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Option<DirectoryEntry> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 9 {
        return None;
    }
    let permissions = fields[0].to_string();
    Some(DirectoryEntry {
        name: fields[8..].join(" "),
        is_directory: permissions.starts_with('d'),
        permissions,
        size: fields[4].to_string(),
        date: fields[5..8].join(" "),
    })
}
