//! Session directory boundary
//! The engine consumes a presence directory that maps session ids to connected
//! users and their delivery sinks; `SessionManager` is the in-memory form.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::events::RoomEvent;

/// A connected session: one user identity behind one delivery sink
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
    sender: mpsc::UnboundedSender<RoomEvent>,
}

impl Session {
    /// Create a session for `owner` along with the receiving end of its sink
    pub fn new(owner: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<RoomEvent>) {
        Self::with_created_at(owner, Utc::now())
    }

    /// Create a session with an explicit creation time
    pub fn with_created_at(
        owner: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> (Self, mpsc::UnboundedReceiver<RoomEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let session = Self {
            id: Uuid::new_v4().to_string(),
            owner: owner.into(),
            created_at,
            sender,
        };
        (session, receiver)
    }

    /// Deliver one event; a session that is already gone is a no-op
    pub fn send_event(&self, event: RoomEvent) -> bool {
        match self.sender.send(event) {
            Ok(_) => true,
            Err(_) => {
                debug!("session {} sink closed, event dropped", self.id);
                false
            }
        }
    }
}

/// Lookup surface the engine requires of the presence directory
pub trait SessionDirectory: Send + Sync {
    fn get_session(&self, session_id: &str) -> Option<Session>;
    fn sessions_for_owner(&self, owner: &str) -> Vec<Session>;
}

/// Manages connected sessions and their state
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session
    pub fn register(&self, session: Session) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session.id.clone(), session);
    }

    /// Remove a session
    pub fn unregister(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }

    /// Get current session count
    pub fn session_count(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }
}

impl SessionDirectory for SessionManager {
    fn get_session(&self, session_id: &str) -> Option<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(session_id).cloned()
    }

    fn sessions_for_owner(&self, owner: &str) -> Vec<Session> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect()
    }
}

/// Thread-safe session manager handle
pub type SharedSessions = Arc<SessionManager>;

/// Create a new thread-safe session manager
pub fn create_session_manager() -> SharedSessions {
    Arc::new(SessionManager::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let manager = SessionManager::new();
        let (session, _rx) = Session::new("alice");
        let id = session.id.clone();
        manager.register(session);

        assert_eq!(manager.session_count(), 1);
        assert_eq!(manager.get_session(&id).unwrap().owner, "alice");
        assert_eq!(manager.sessions_for_owner("alice").len(), 1);
        assert!(manager.sessions_for_owner("bob").is_empty());

        manager.unregister(&id);
        assert!(manager.get_session(&id).is_none());
    }

    #[test]
    fn test_send_to_dropped_sink_is_noop() {
        let (session, rx) = Session::new("alice");
        drop(rx);
        let delivered = session.send_event(RoomEvent::RecvMessageForAttention {
            message_id: "m-1".to_string(),
        });
        assert!(!delivered);
    }
}
