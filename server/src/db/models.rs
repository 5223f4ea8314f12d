/// Database row types.
/// These correspond 1:1 to the SQLite schema defined in migrations.rs.
/// Chat messages are modelled in `chat::message`.
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Room metadata. Rooms are created outside the coordinator; it only reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub name: String,
    pub is_private: bool,
    pub creator_id: String,
    pub admin_ids: Vec<String>,
}

impl Room {
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admin_ids.iter().any(|id| id == user_id)
    }
}

/// Durable join/leave audit record. `left_at == None` marks the active record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRecord {
    pub id: String,
    pub user_id: String,
    pub room_id: String,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

impl ConnectionRecord {
    pub fn is_active(&self) -> bool {
        self.left_at.is_none()
    }
}

/// Proof that a user may enter a private room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessGrant {
    pub user_id: String,
    pub room_id: String,
    pub granted_by: String,
    pub granted_at: DateTime<Utc>,
}

/// Optional profile decoration for presence snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfile {
    pub user_id: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

/// Parse an RFC 3339 column written by this crate.
pub(crate) fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
