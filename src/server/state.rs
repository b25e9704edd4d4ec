//! Shared server state: the default conversion config and the session map.

use crate::config::{ConversionConfig, ServerConfig};
use crate::output::BatchReport;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use uuid::Uuid;

/// Passed to every handler through `State<Arc<AppState>>`.
pub struct AppState {
    /// Default for every request; cloned and given the session's key.
    pub config: ConversionConfig,
    pub server: ServerConfig,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(config: ConversionConfig, server: ServerConfig) -> Self {
        let sessions = SessionStore::new(Duration::from_secs(server.session_ttl_secs));
        Self {
            config,
            server,
            sessions,
        }
    }
}

/// One browser session: its API key and the last batch it converted.
#[derive(Debug)]
struct Session {
    api_key: Option<String>,
    report: Option<Arc<BatchReport>>,
    last_seen: Instant,
}

/// What a handler sees of a session.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub api_key: Option<String>,
    pub report: Option<Arc<BatchReport>>,
}

/// In-memory sessions keyed by UUID. Nothing is persisted.
///
/// The lock is only held for map operations, never across an `.await`.
#[derive(Debug)]
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Start a session. Sessions idle past the TTL are evicted first.
    pub fn create(&self) -> Uuid {
        let id = Uuid::new_v4();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        let ttl = self.ttl;
        sessions.retain(|_, s| s.last_seen.elapsed() <= ttl);
        if sessions.len() < before {
            info!("Evicted {} idle sessions", before - sessions.len());
        }
        sessions.insert(
            id,
            Session {
                api_key: None,
                report: None,
                last_seen: Instant::now(),
            },
        );
        debug!("Session {} created ({} active)", id, sessions.len());
        id
    }

    /// End a session. Returns `false` if it did not exist.
    pub fn remove(&self, id: &Uuid) -> bool {
        self.sessions.write().remove(id).is_some()
    }

    /// Snapshot a session and mark it as active.
    pub fn touch(&self, id: &Uuid) -> Option<SessionView> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id)?;
        session.last_seen = Instant::now();
        Some(SessionView {
            api_key: session.api_key.clone(),
            report: session.report.clone(),
        })
    }

    /// Set or clear the session key; blank keys clear it.
    pub fn set_api_key(&self, id: &Uuid, key: Option<&str>) -> bool {
        self.update(id, |s| {
            s.api_key = key
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string);
        })
    }

    /// Replace the session's last report.
    pub fn store_report(&self, id: &Uuid, report: Arc<BatchReport>) -> bool {
        self.update(id, |s| s.report = Some(report))
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update(&self, id: &Uuid, f: impl FnOnce(&mut Session)) -> bool {
        match self.sessions.write().get_mut(id) {
            Some(session) => {
                f(session);
                session.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_is_trimmed_and_cleared() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = store.create();
        assert!(store.set_api_key(&id, Some("  sk-abc ")));
        assert_eq!(store.touch(&id).unwrap().api_key.as_deref(), Some("sk-abc"));
        assert!(store.set_api_key(&id, Some("   ")));
        assert_eq!(store.touch(&id).unwrap().api_key, None);
    }

    #[test]
    fn unknown_sessions_are_reported() {
        let store = SessionStore::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        assert!(store.touch(&id).is_none());
        assert!(!store.set_api_key(&id, Some("k")));
        assert!(!store.remove(&id));
    }

    #[test]
    fn idle_sessions_are_evicted_on_create() {
        let store = SessionStore::new(Duration::ZERO);
        let old = store.create();
        std::thread::sleep(Duration::from_millis(5));
        let _new = store.create();
        assert!(store.touch(&old).is_none());
        assert_eq!(store.len(), 1);
    }
}
