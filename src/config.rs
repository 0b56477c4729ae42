use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::time::Duration;

use crate::security::SecurityConfig;
use crate::state::{DEFAULT_CLEANUP_INTERVAL, DEFAULT_SESSION_EXPIRY};

const DEFAULT_BIND: &str = "0.0.0.0:8081";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Stdio,
}

/// Process-wide settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub transport: Transport,
    pub bind: SocketAddr,
    pub session_expiry: Duration,
    pub cleanup_interval: Duration,
    pub security: SecurityConfig,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let transport = match get("SSH_MCP_TRANSPORT").as_deref() {
            None | Some("http") => Transport::Http,
            Some("stdio") => Transport::Stdio,
            Some(other) => bail!("SSH_MCP_TRANSPORT must be 'http' or 'stdio', got '{}'", other),
        };

        let bind = get("SSH_MCP_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse()
            .context("SSH_MCP_BIND is not a valid socket address")?;

        let session_expiry = seconds(get("SSH_MCP_SESSION_EXPIRY_SECS"), "SSH_MCP_SESSION_EXPIRY_SECS")?
            .unwrap_or(DEFAULT_SESSION_EXPIRY);
        let cleanup_interval = seconds(
            get("SSH_MCP_CLEANUP_INTERVAL_SECS"),
            "SSH_MCP_CLEANUP_INTERVAL_SECS",
        )?
        .unwrap_or(DEFAULT_CLEANUP_INTERVAL);

        let rate_limit = match get("SSH_MCP_RATE_LIMIT_MS") {
            Some(raw) => {
                let ms: i64 = raw
                    .parse()
                    .with_context(|| format!("SSH_MCP_RATE_LIMIT_MS is not a number: {}", raw))?;
                Duration::from_millis(ms.max(0) as u64)
            }
            None => Duration::ZERO,
        };

        let logging_enabled = match get("SSH_MCP_LOGGING").as_deref() {
            None => true,
            Some(raw) => parse_bool(raw).with_context(|| {
                format!("SSH_MCP_LOGGING must be true or false, got '{}'", raw)
            })?,
        };

        Ok(Self {
            transport,
            bind,
            session_expiry,
            cleanup_interval,
            security: SecurityConfig {
                allowed_hosts: list(get("SSH_MCP_ALLOWED_HOSTS")),
                denied_hosts: list(get("SSH_MCP_DENIED_HOSTS")),
                allowed_commands: list(get("SSH_MCP_ALLOWED_COMMANDS")),
                denied_commands: list(get("SSH_MCP_DENIED_COMMANDS")),
                rate_limit,
                logging_enabled,
            },
        })
    }
}

/// Non-positive values mean "use the default".
fn seconds(raw: Option<String>, key: &str) -> Result<Option<Duration>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let secs: i64 = raw
        .parse()
        .with_context(|| format!("{} is not a number: {}", key, raw))?;
    Ok((secs > 0).then(|| Duration::from_secs(secs as u64)))
}

fn list(raw: Option<String>) -> Vec<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
