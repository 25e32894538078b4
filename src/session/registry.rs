//! Live session bookkeeping.
//!
//! Each connection holds a [`SessionTicket`]; dropping the ticket removes the
//! entry, so the registry only ever lists sessions that are still running.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    /// `/ws/analyze`
    Conversation,
    /// `/ws/users`
    Enrollment,
}

impl SessionKind {
    /// Setup event accepted on this kind of connection.
    pub fn setup_event(self) -> &'static str {
        match self {
            SessionKind::Conversation => "send_conversation",
            SessionKind::Enrollment => "register_voice",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    AwaitingSetup,
    Streaming,
    Finalizing,
    Closed,
    Error,
}

/// Snapshot served by the sessions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub kind: SessionKind,
    pub user_id: Option<String>,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub bytes_received: u64,
    pub chunks_dispatched: u64,
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionInfo>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a fresh session id and track it until the ticket drops.
    pub fn register(self: &Arc<Self>, kind: SessionKind) -> SessionTicket {
        let session_id = uuid::Uuid::new_v4().to_string();
        let info = SessionInfo {
            session_id: session_id.clone(),
            kind,
            user_id: None,
            state: SessionState::AwaitingSetup,
            started_at: Utc::now(),
            bytes_received: 0,
            chunks_dispatched: 0,
        };
        self.sessions.write().insert(session_id.clone(), info);
        SessionTicket {
            session_id,
            registry: Arc::clone(self),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.read().get(session_id).cloned()
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self.sessions.read().values().cloned().collect();
        sessions.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    fn update(&self, session_id: &str, f: impl FnOnce(&mut SessionInfo)) {
        if let Some(info) = self.sessions.write().get_mut(session_id) {
            f(info);
        }
    }
}

/// Registration handle owned by one connection.
#[derive(Debug)]
pub struct SessionTicket {
    session_id: String,
    registry: Arc<SessionRegistry>,
}

impl SessionTicket {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn set_state(&self, state: SessionState) {
        self.registry.update(&self.session_id, |info| info.state = state);
    }

    pub fn set_user(&self, user_id: &str) {
        self.registry
            .update(&self.session_id, |info| info.user_id = Some(user_id.to_string()));
    }

    pub fn record_bytes(&self, n: usize) {
        self.registry
            .update(&self.session_id, |info| info.bytes_received += n as u64);
    }

    pub fn record_chunks(&self, n: usize) {
        self.registry
            .update(&self.session_id, |info| info.chunks_dispatched += n as u64);
    }
}

impl Drop for SessionTicket {
    fn drop(&mut self) {
        self.registry.sessions.write().remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_lifetime_bounds_the_entry() {
        let registry = Arc::new(SessionRegistry::new());
        let ticket = registry.register(SessionKind::Conversation);
        assert_eq!(registry.len(), 1);

        let info = registry.get(ticket.session_id()).unwrap();
        assert_eq!(info.state, SessionState::AwaitingSetup);
        assert_eq!(info.user_id, None);

        drop(ticket);
        assert!(registry.is_empty());
    }

    #[test]
    fn session_ids_are_unique() {
        let registry = Arc::new(SessionRegistry::new());
        let a = registry.register(SessionKind::Conversation);
        let b = registry.register(SessionKind::Enrollment);
        assert_ne!(a.session_id(), b.session_id());
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn ticket_updates_are_visible() {
        let registry = Arc::new(SessionRegistry::new());
        let ticket = registry.register(SessionKind::Conversation);
        ticket.set_user("u1");
        ticket.set_state(SessionState::Streaming);
        ticket.record_bytes(100);
        ticket.record_bytes(28);
        ticket.record_chunks(2);

        let info = registry.get(ticket.session_id()).unwrap();
        assert_eq!(info.user_id.as_deref(), Some("u1"));
        assert_eq!(info.state, SessionState::Streaming);
        assert_eq!(info.bytes_received, 128);
        assert_eq!(info.chunks_dispatched, 2);
    }

    #[test]
    fn info_serializes_snake_case() {
        let registry = Arc::new(SessionRegistry::new());
        let ticket = registry.register(SessionKind::Enrollment);
        ticket.set_state(SessionState::AwaitingSetup);
        let json = serde_json::to_value(registry.get(ticket.session_id()).unwrap()).unwrap();
        assert_eq!(json["kind"], "enrollment");
        assert_eq!(json["state"], "awaiting_setup");
    }

    #[test]
    fn setup_event_per_kind() {
        assert_eq!(SessionKind::Conversation.setup_event(), "send_conversation");
        assert_eq!(SessionKind::Enrollment.setup_event(), "register_voice");
    }
}
