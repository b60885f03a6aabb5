//! Application state shared across routes

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::Config;
use crate::game::{ArenaHandle, PeerId};
use crate::util::time::unix_millis;

/// A live WebSocket session
#[derive(Debug, Clone)]
pub struct Session {
    pub subject: String,
    pub connected_at: u64,
}

/// Connected peers, keyed by the id assigned at upgrade
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<PeerId, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: PeerId, subject: &str) {
        self.sessions.insert(
            peer,
            Session {
                subject: subject.to_string(),
                connected_at: unix_millis(),
            },
        );
    }

    pub fn unregister(&self, peer: PeerId) -> Option<Session> {
        self.sessions.remove(&peer).map(|(_, s)| s)
    }

    pub fn get(&self, peer: PeerId) -> Option<Session> {
        self.sessions.get(&peer).map(|s| s.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of live sessions opened with the same token subject
    pub fn count_for(&self, subject: &str) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.value().subject == subject)
            .count()
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub arena: ArenaHandle,
    pub sessions: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new(config: Config, arena: ArenaHandle) -> Self {
        Self {
            config: Arc::new(config),
            arena,
            sessions: Arc::new(SessionRegistry::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_tracks_sessions() {
        let registry = SessionRegistry::new();
        let (a, b) = (PeerId::new(), PeerId::new());
        registry.register(a, "pilot");
        registry.register(b, "pilot");
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.count_for("pilot"), 2);

        assert_eq!(registry.unregister(a).map(|s| s.subject), Some("pilot".to_string()));
        assert!(registry.unregister(a).is_none());
        assert!(registry.get(b).is_some());
        assert_eq!(registry.count_for("pilot"), 1);
    }
}
