//! Host and command policy plus per-session rate limiting.
//!
//! Every `ssh_connect` passes through [`SecurityGate::check_host`] and every
//! `ssh_execute` through [`SecurityGate::check_command`] before any remote
//! work happens.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{Result, SshError};

pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RATE_LIMIT_MAX_AGE: Duration = Duration::from_secs(30 * 60);

/// Immutable policy snapshot.
///
/// Empty allow-lists mean "everything not denied is allowed". Deny rules are
/// always evaluated first.
#[derive(Debug, Clone, Default)]
pub struct SecurityConfig {
    pub allowed_hosts: Vec<String>,
    pub denied_hosts: Vec<String>,
    /// Command prefixes.
    pub allowed_commands: Vec<String>,
    pub denied_commands: Vec<String>,
    /// Minimum time between permitted commands of one session. Zero disables.
    pub rate_limit: Duration,
    pub logging_enabled: bool,
}

pub struct SecurityGate {
    config: SecurityConfig,
    /// Session id -> time of its last permitted command.
    rate_limiter: Mutex<HashMap<String, Instant>>,
    clock: Arc<dyn Clock>,
    pruner: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SecurityGate {
    pub fn new(config: SecurityConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            rate_limiter: Mutex::new(HashMap::new()),
            clock,
            pruner: std::sync::Mutex::new(None),
        }
    }

    /// Verifies that `host` (optionally with a `:port` suffix) may be dialed.
    pub fn check_host(&self, host: &str) -> Result<()> {
        let host = strip_port(host);

        if self
            .config
            .denied_hosts
            .iter()
            .any(|pattern| match_host(host, pattern))
        {
            self.audit("host_denied", host, "");
            return Err(SshError::SecurityDenied(format!("host {} is denied", host)));
        }

        if self.config.allowed_hosts.is_empty()
            || self
                .config
                .allowed_hosts
                .iter()
                .any(|pattern| match_host(host, pattern))
        {
            return Ok(());
        }

        self.audit("host_not_allowed", host, "");
        Err(SshError::SecurityDenied(format!(
            "host {} is not allowed",
            host
        )))
    }

    /// Verifies that `command` may run on `session_id` right now.
    ///
    /// The rate-limit clock only advances when the rate check passes.
    pub async fn check_command(&self, session_id: &str, command: &str) -> Result<()> {
        {
            let mut limiter = self.rate_limiter.lock().await;
            if !self.config.rate_limit.is_zero() {
                let now = self.clock.instant();
                if let Some(last) = limiter.get(session_id) {
                    let since = now.saturating_duration_since(*last);
                    if since < self.config.rate_limit {
                        self.audit("rate_limited", session_id, command);
                        return Err(SshError::RateLimited);
                    }
                }
                limiter.insert(session_id.to_string(), now);
            }
        }

        if self
            .config
            .denied_commands
            .iter()
            .any(|prefix| command.starts_with(prefix.as_str()))
        {
            self.audit("command_denied", session_id, command);
            return Err(SshError::SecurityDenied(format!(
                "command '{}' is denied",
                command
            )));
        }

        if self.config.allowed_commands.is_empty()
            || self
                .config
                .allowed_commands
                .iter()
                .any(|prefix| command.starts_with(prefix.as_str()))
        {
            self.audit("command_executed", session_id, command);
            return Ok(());
        }

        self.audit("command_not_allowed", session_id, command);
        Err(SshError::SecurityDenied(format!(
            "command '{}' is not allowed",
            command
        )))
    }

    /// Drops rate-limiter entries older than `max_age`. Returns how many were removed.
    pub async fn prune_rate_limiter(&self, max_age: Duration) -> usize {
        let now = self.clock.instant();
        let mut limiter = self.rate_limiter.lock().await;
        let before = limiter.len();
        limiter.retain(|_, last| now.saturating_duration_since(*last) <= max_age);
        before - limiter.len()
    }

    /// Starts the periodic rate-limiter pruning task.
    ///
    /// Zero durations fall back to [`DEFAULT_PRUNE_INTERVAL`] and
    /// [`DEFAULT_RATE_LIMIT_MAX_AGE`]. The task stops on its own once the gate
    /// is dropped.
    pub fn start_pruner(self: &Arc<Self>, interval: Duration, max_age: Duration) {
        let interval = if interval.is_zero() {
            DEFAULT_PRUNE_INTERVAL
        } else {
            interval
        };
        let max_age = if max_age.is_zero() {
            DEFAULT_RATE_LIMIT_MAX_AGE
        } else {
            max_age
        };

        let gate: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            // The first tick completes immediately
            timer.tick().await;
            loop {
                timer.tick().await;
                let Some(gate) = gate.upgrade() else {
                    break;
                };
                let pruned = gate.prune_rate_limiter(max_age).await;
                if pruned > 0 {
                    debug!(pruned, "Pruned rate limiter entries");
                }
            }
        });

        if let Ok(mut slot) = self.pruner.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    pub fn stop_pruner(&self) {
        if let Ok(mut slot) = self.pruner.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    fn audit(&self, operation: &str, subject: &str, details: &str) {
        if !self.config.logging_enabled {
            return;
        }
        match operation {
            "command_executed" => {
                info!(target: "ssh_mcp::audit", operation, session = subject, details)
            }
            _ => warn!(target: "ssh_mcp::audit", operation, subject, details),
        }
    }
}

impl Drop for SecurityGate {
    fn drop(&mut self) {
        self.stop_pruner();
    }
}

/// Removes a `:port` suffix, including the bracketed IPv6 form `[::1]:22`.
fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        if let Some((inner, _)) = rest.split_once(']') {
            return inner;
        }
        return host;
    }
    match host.split_once(':') {
        // More than one colon means a bare IPv6 address
        Some((name, port)) if !port.contains(':') => name,
        _ => host,
    }
}

/// Matches a host against one policy pattern.
///
/// Tried in order: exact match, `*.domain` suffix match, CIDR containment.
/// Anything that fails to parse simply does not match.
pub fn match_host(host: &str, pattern: &str) -> bool {
    if host == pattern {
        return true;
    }

    if let Some(suffix) = pattern.strip_prefix('*') {
        if suffix.starts_with('.') {
            return host.ends_with(suffix);
        }
    }

    if pattern.contains('/') {
        return cidr_contains(pattern, host);
    }

    false
}

fn cidr_contains(network: &str, host: &str) -> bool {
    let Some((addr, prefix)) = network.split_once('/') else {
        return false;
    };
    let Ok(net) = addr.parse::<IpAddr>() else {
        return false;
    };
    let Ok(prefix) = prefix.parse::<u32>() else {
        return false;
    };
    let Ok(ip) = host.parse::<IpAddr>() else {
        return false;
    };

    match (net, ip) {
        (IpAddr::V4(net), IpAddr::V4(ip)) => {
            if prefix > 32 {
                return false;
            }
            let mask = if prefix == 0 { 0 } else { !0u32 << (32 - prefix) };
            (u32::from(ip) & mask) == (u32::from(net) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(ip)) => {
            if prefix > 128 {
                return false;
            }
            let mask = if prefix == 0 { 0 } else { !0u128 << (128 - prefix) };
            (u128::from(ip) & mask) == (u128::from(net) & mask)
        }
        _ => false,
    }
}
