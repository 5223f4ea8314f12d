//! Error taxonomy for the coordinator.
//!
//! `AuthError` is connection-fatal, `RoomError` covers everything a session can
//! be told about on its own channel, and `StoreError` wraps failures of the
//! durable store.

use thiserror::Error;

/// WebSocket close codes sent by the coordinator.
pub mod close_code {
    pub const MISSING_CREDENTIAL: u16 = 4001;
    pub const INVALID_CREDENTIAL: u16 = 4002;
    pub const ACCESS_DENIED: u16 = 4003;
    pub const INVALID_ROOM: u16 = 4004;
    pub const JOIN_ERROR: u16 = 4005;
    pub const SUPERSEDED: u16 = 4006;
    pub const KEEPALIVE_TIMEOUT: u16 = 1001;
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing credential")]
    MissingCredential,

    #[error("invalid credential")]
    InvalidCredential,
}

impl AuthError {
    pub fn close_code(&self) -> u16 {
        match self {
            AuthError::MissingCredential => close_code::MISSING_CREDENTIAL,
            AuthError::InvalidCredential => close_code::INVALID_CREDENTIAL,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("room does not exist")]
    InvalidRoom,

    #[error("access denied")]
    AccessDenied,

    #[error("failed to join room")]
    JoinFailed(String),

    #[error("visibility must be \"public\" or \"private\"")]
    InvalidVisibility,

    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("no active connection to this room")]
    NoActiveConnection,

    #[error("message could not be saved")]
    Persistence(String),

    #[error("not authorized")]
    NotAuthorized,

    #[error("malformed event: {0}")]
    Malformed(String),

    #[error("internal error")]
    Internal(String),
}

impl RoomError {
    /// Stable identifier sent to clients in `error` events.
    pub fn code(&self) -> &'static str {
        match self {
            RoomError::InvalidRoom => "invalid_room",
            RoomError::AccessDenied => "access_denied",
            RoomError::JoinFailed(_) => "join_error",
            RoomError::InvalidVisibility => "invalid_visibility",
            RoomError::InvalidMessage(_) => "invalid_message",
            RoomError::NoActiveConnection => "no_active_connection",
            RoomError::Persistence(_) => "persistence_error",
            RoomError::NotAuthorized => "not_authorized",
            RoomError::Malformed(_) => "bad_request",
            RoomError::Internal(_) => "internal_error",
        }
    }

    /// Join failures close the connection so a client probing rooms it cannot
    /// enter never keeps a half-open session.
    pub fn is_join_fatal(&self) -> bool {
        matches!(
            self,
            RoomError::InvalidRoom | RoomError::AccessDenied | RoomError::JoinFailed(_)
        )
    }

    pub fn close_code(&self) -> u16 {
        match self {
            RoomError::InvalidRoom => close_code::INVALID_ROOM,
            RoomError::AccessDenied => close_code::ACCESS_DENIED,
            _ => close_code::JOIN_ERROR,
        }
    }

    /// The detail is logged here and kept for callers; clients only see the
    /// fixed message.
    pub fn join_failed(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "Join failed");
        RoomError::JoinFailed(err.to_string())
    }

    pub fn persistence(err: impl std::fmt::Display) -> Self {
        tracing::error!(error = %err, "Write to store failed");
        RoomError::Persistence(err.to_string())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        RoomError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_fatal_classification() {
        assert!(RoomError::InvalidRoom.is_join_fatal());
        assert!(RoomError::AccessDenied.is_join_fatal());
        assert!(RoomError::join_failed("boom").is_join_fatal());
        assert!(!RoomError::InvalidVisibility.is_join_fatal());
        assert!(!RoomError::Persistence("disk".into()).is_join_fatal());
        assert!(!RoomError::NotAuthorized.is_join_fatal());
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(RoomError::AccessDenied.close_code(), 4003);
        assert_eq!(RoomError::InvalidRoom.close_code(), 4004);
        assert_eq!(RoomError::join_failed("x").close_code(), 4005);
        assert_eq!(AuthError::MissingCredential.close_code(), 4001);
        assert_eq!(AuthError::InvalidCredential.close_code(), 4002);
    }

    #[test]
    fn test_internal_error_hides_detail_in_display() {
        let err = RoomError::internal("sqlite exploded");
        assert_eq!(err.to_string(), "internal error");
        assert_eq!(err.code(), "internal_error");
    }

    #[test]
    fn test_store_failures_hide_detail_in_display() {
        let join = RoomError::join_failed("database error: disk I/O error");
        assert_eq!(join.to_string(), "failed to join room");
        assert_eq!(join, RoomError::JoinFailed("database error: disk I/O error".into()));

        let persist = RoomError::persistence("database lock poisoned");
        assert_eq!(persist.to_string(), "message could not be saved");
        assert_eq!(persist.code(), "persistence_error");
    }
}
