pub mod coordinator;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::auth::Principal;
use crate::ws::protocol::ServerEvent;

pub use coordinator::RoomCoordinator;

/// What a connection's writer task can be asked to do.
#[derive(Debug, Clone)]
pub enum Outbound {
    Event(ServerEvent),
    Close { code: u16, reason: String },
}

/// Sender half of a connection's outbound channel. Cloned into the presence
/// registry and the connection registry so other sessions can reach it.
pub type SessionSender = mpsc::UnboundedSender<Outbound>;

/// Where a session is in its lifecycle.
///
/// There is no unauthenticated state here: a `Session` only exists once the
/// identity resolver has accepted the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Authenticated,
    InRoom(String),
    Closed,
}

/// Whether the reader loop should keep going after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFlow {
    Continue,
    Close,
}

/// Runtime state of one authenticated connection.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub principal: Principal,
    pub room_id: Option<String>,
    pub joined_at: Option<DateTime<Utc>>,
    closed: bool,
    tx: SessionSender,
}

impl Session {
    pub fn new(principal: Principal, tx: SessionSender) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            principal,
            room_id: None,
            joined_at: None,
            closed: false,
            tx,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.principal.id
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if let Some(room_id) = &self.room_id {
            SessionState::InRoom(room_id.clone())
        } else {
            SessionState::Authenticated
        }
    }

    pub fn sender(&self) -> SessionSender {
        self.tx.clone()
    }

    pub fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(Outbound::Event(event));
    }

    /// Ask the writer to close the socket. Idempotent.
    pub fn close(&mut self, code: u16, reason: &str) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }

    pub(crate) fn enter(&mut self, room_id: &str, joined_at: DateTime<Utc>) {
        self.room_id = Some(room_id.to_string());
        self.joined_at = Some(joined_at);
    }

    pub(crate) fn vacate(&mut self) -> Option<String> {
        self.joined_at = None;
        self.room_id.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Session, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let principal = Principal {
            id: "u1".into(),
            email: "u1@example.com".into(),
        };
        (Session::new(principal, tx), rx)
    }

    #[test]
    fn test_state_transitions() {
        let (mut s, _rx) = session();
        assert_eq!(s.state(), SessionState::Authenticated);
        s.enter("r1", Utc::now());
        assert_eq!(s.state(), SessionState::InRoom("r1".into()));
        assert_eq!(s.vacate().as_deref(), Some("r1"));
        assert_eq!(s.state(), SessionState::Authenticated);
        s.close(1000, "bye");
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[test]
    fn test_close_sent_once() {
        let (mut s, mut rx) = session();
        s.close(4003, "denied");
        s.close(4003, "denied");
        assert!(matches!(rx.try_recv(), Ok(Outbound::Close { code: 4003, .. })));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_session_ids_unique() {
        let (a, _ra) = session();
        let (b, _rb) = session();
        assert_ne!(a.id, b.id);
    }
}
