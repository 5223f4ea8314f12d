pub mod actor;
pub mod broadcast;
pub mod handler;
pub mod protocol;

use dashmap::DashMap;
use std::sync::Arc;

use crate::session::SessionSender;

/// One live connection of a user.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub session_id: String,
    pub tx: SessionSender,
}

/// Connection registry: every authenticated connection per user, whether or
/// not it has joined a room. A user can have several (multiple tabs).
/// Arc<DashMap<UserId, Vec<ConnectionHandle>>>
pub type ConnectionRegistry = Arc<DashMap<String, Vec<ConnectionHandle>>>;

/// Create a new empty connection registry.
pub fn new_connection_registry() -> ConnectionRegistry {
    Arc::new(DashMap::new())
}
