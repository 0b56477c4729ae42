use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{Result, SshError};
use crate::transport::Connection;

pub const DEFAULT_SESSION_EXPIRY: Duration = Duration::from_secs(30 * 60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// A live SSH connection registered under an id
#[derive(Clone)]
pub struct Session {
    pub id: String,
    pub host: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Monotonic twin of `last_activity`, used for idle ages.
    last_seen: Instant,
    pub connection: Arc<dyn Connection>,
}

impl Session {
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            host: self.host.clone(),
            username: self.username.clone(),
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

/// `{host}-{username}-{unix nanos}`
pub fn session_id(host: &str, username: &str, now: DateTime<Utc>) -> String {
    let nanos = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros() * 1_000);
    format!("{}-{}-{}", host, username, nanos)
}

/// Snapshot of a session without its connection handle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub host: String,
    pub username: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Owns every live session and closes idle ones.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    expiry: Duration,
    clock: Arc<dyn Clock>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    /// A zero `expiry` falls back to [`DEFAULT_SESSION_EXPIRY`].
    pub fn new(expiry: Duration, clock: Arc<dyn Clock>) -> Self {
        let expiry = if expiry.is_zero() {
            DEFAULT_SESSION_EXPIRY
        } else {
            expiry
        };
        Self {
            sessions: RwLock::new(HashMap::new()),
            expiry,
            clock,
            sweeper: std::sync::Mutex::new(None),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Registers `connection` under `id`, replacing any session with the
    /// same id, and returns the stored session.
    pub async fn add_session(
        &self,
        id: String,
        connection: Arc<dyn Connection>,
        host: &str,
        username: &str,
    ) -> Session {
        let now = self.clock.now();
        let session = Session {
            id: id.clone(),
            host: host.to_string(),
            username: username.to_string(),
            created_at: now,
            last_activity: now,
            last_seen: self.clock.instant(),
            connection,
        };
        let replaced = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(id.clone(), session.clone())
        };
        if let Some(old) = replaced {
            old.connection.close().await;
        }
        info!(session_id = %id, "Session added");
        session
    }

    /// Looks a session up and marks it as active.
    pub async fn get_session(&self, id: &str) -> Result<Session> {
        let now = self.clock.now();
        let seen = self.clock.instant();
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| SshError::SessionNotFound(id.to_string()))?;
        if now > session.last_activity {
            session.last_activity = now;
        }
        session.last_seen = seen;
        Ok(session.clone())
    }

    /// Removes a session and closes its connection.
    pub async fn remove_session(&self, id: &str) -> Result<()> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(id)
                .ok_or_else(|| SshError::SessionNotFound(id.to_string()))?
        };
        session.connection.close().await;
        info!(session_id = %id, "Session removed");
        Ok(())
    }

    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions.values().map(Session::info).collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        infos
    }

    #[cfg(test)]
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Closes and removes sessions idle for longer than `max_idle`.
    ///
    /// A zero `max_idle` uses the manager's configured expiry. Returns the
    /// number of sessions removed.
    pub async fn sweep_expired(&self, max_idle: Duration) -> usize {
        let max_idle = if max_idle.is_zero() {
            self.expiry
        } else {
            max_idle
        };
        let now = self.clock.instant();

        let expired: Vec<Session> = {
            let mut sessions = self.sessions.write().await;
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| now.saturating_duration_since(s.last_seen) > max_idle)
                .map(|s| s.id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        for session in &expired {
            info!(session_id = %session.id, "Closing expired session");
            session.connection.close().await;
        }
        expired.len()
    }

    /// Starts the periodic expiry sweep.
    ///
    /// A zero `interval` uses [`DEFAULT_CLEANUP_INTERVAL`]. The task holds a
    /// weak reference and ends once the manager is dropped.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        let interval = if interval.is_zero() {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            interval
        };

        let manager: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;
            loop {
                timer.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                let removed = manager.sweep_expired(Duration::ZERO).await;
                if removed > 0 {
                    debug!(removed, "Expired sessions swept");
                }
            }
        });

        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(previous) = slot.replace(handle) {
                previous.abort();
            }
        }
    }

    pub fn stop_sweeper(&self) {
        if let Ok(mut slot) = self.sweeper.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    /// Closes every session. Used on shutdown.
    pub async fn close_all(&self) -> usize {
        let sessions: Vec<Session> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, s)| s).collect()
        };
        for session in &sessions {
            session.connection.close().await;
        }
        sessions.len()
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}
