//! Durable store used by the coordinator.
//!
//! `RoomStore` is the seam between the coordinator and storage. `SqliteStore`
//! is the production implementation: every call runs on the blocking pool so
//! no runtime thread ever waits on SQLite.

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::chat::message::{Message, Target, Visibility};
use crate::db::models::{parse_timestamp, AccessGrant, ConnectionRecord, Room, UserProfile};
use crate::db::DbPool;
use crate::error::StoreError;

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, StoreError>;

    async fn get_active_connection(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<ConnectionRecord>, StoreError>;

    /// Create the active record for `(user_id, room_id)`, or refresh `joined_at`
    /// on the existing one.
    async fn upsert_connection(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<ConnectionRecord, StoreError>;

    /// Set `left_at` on the active record. Returns false when there was none.
    async fn close_connection(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError>;

    async fn get_grant(&self, user_id: &str, room_id: &str)
        -> Result<Option<AccessGrant>, StoreError>;

    /// Record a grant. Re-granting keeps the original grant.
    async fn put_grant(
        &self,
        user_id: &str,
        room_id: &str,
        granted_by: &str,
    ) -> Result<AccessGrant, StoreError>;

    async fn append_message(&self, message: &Message) -> Result<String, StoreError>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError>;
}

/// SQLite-backed `RoomStore`.
#[derive(Clone)]
pub struct SqliteStore {
    db: DbPool,
}

impl SqliteStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.lock().map_err(|_| StoreError::LockPoisoned)?;
            f(&conn)
        })
        .await?
    }

    /// Insert or replace a room and its admin list. Rooms are owned by an
    /// outer service; this exists for provisioning and tests.
    pub async fn put_room(&self, room: Room) -> Result<(), StoreError> {
        self.run(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO rooms (id, name, is_private, creator_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    is_private = excluded.is_private,
                    creator_id = excluded.creator_id",
                rusqlite::params![room.id, room.name, room.is_private, room.creator_id, now],
            )?;
            conn.execute("DELETE FROM room_admins WHERE room_id = ?1", [&room.id])?;
            for admin in &room.admin_ids {
                conn.execute(
                    "INSERT OR IGNORE INTO room_admins (room_id, user_id) VALUES (?1, ?2)",
                    rusqlite::params![room.id, admin],
                )?;
            }
            Ok(())
        })
        .await
    }

    /// Insert or update a user's profile decoration.
    pub async fn put_profile(&self, email: &str, profile: UserProfile) -> Result<(), StoreError> {
        let email = email.to_string();
        self.run(move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO users (id, email, display_name, photo_url, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                    email = excluded.email,
                    display_name = excluded.display_name,
                    photo_url = excluded.photo_url,
                    updated_at = excluded.updated_at",
                rusqlite::params![
                    profile.user_id,
                    email,
                    profile.display_name,
                    profile.photo_url,
                    now
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Every connection record for a pair, newest first. Used for auditing.
    pub async fn connection_history(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Vec<ConnectionRecord>, StoreError> {
        let (uid, rid) = (user_id.to_string(), room_id.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, room_id, joined_at, left_at FROM room_connections
                 WHERE user_id = ?1 AND room_id = ?2
                 ORDER BY joined_at DESC",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![uid, rid], connection_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Stored messages of a room in creation order.
    pub async fn messages_in(&self, room_id: &str) -> Result<Vec<Message>, StoreError> {
        let rid = room_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, room_id, sender_id, content, visibility, target, created_at
                 FROM messages WHERE room_id = ?1 ORDER BY created_at ASC, id ASC",
            )?;
            let raw = stmt
                .query_map([&rid], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        parse_timestamp(6, &row.get::<_, String>(6)?)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            let mut messages = Vec::with_capacity(raw.len());
            for (id, room_id, sender_id, content, visibility, target, created_at) in raw {
                let target: Option<Vec<Target>> = match target {
                    Some(json) => Some(serde_json::from_str(&json)?),
                    None => None,
                };
                messages.push(Message {
                    id,
                    room_id,
                    sender_id,
                    content,
                    visibility: Visibility::parse(&visibility).unwrap_or(Visibility::Public),
                    target,
                    created_at,
                });
            }
            Ok(messages)
        })
        .await
    }
}

fn connection_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionRecord> {
    let left_at: Option<String> = row.get(4)?;
    Ok(ConnectionRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        room_id: row.get(2)?,
        joined_at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
        left_at: left_at.map(|raw| parse_timestamp(4, &raw)).transpose()?,
    })
}

fn grant_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccessGrant> {
    Ok(AccessGrant {
        user_id: row.get(0)?,
        room_id: row.get(1)?,
        granted_by: row.get(2)?,
        granted_at: parse_timestamp(3, &row.get::<_, String>(3)?)?,
    })
}

fn active_connection(
    conn: &Connection,
    user_id: &str,
    room_id: &str,
) -> rusqlite::Result<Option<ConnectionRecord>> {
    conn.query_row(
        "SELECT id, user_id, room_id, joined_at, left_at FROM room_connections
         WHERE user_id = ?1 AND room_id = ?2 AND left_at IS NULL",
        rusqlite::params![user_id, room_id],
        connection_from_row,
    )
    .optional()
}

#[async_trait]
impl RoomStore for SqliteStore {
    async fn get_room(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        let rid = room_id.to_string();
        self.run(move |conn| {
            let room = conn
                .query_row(
                    "SELECT id, name, is_private, creator_id FROM rooms WHERE id = ?1",
                    [&rid],
                    |row| {
                        Ok(Room {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            is_private: row.get(2)?,
                            creator_id: row.get(3)?,
                            admin_ids: Vec::new(),
                        })
                    },
                )
                .optional()?;

            let Some(mut room) = room else {
                return Ok(None);
            };

            let mut stmt =
                conn.prepare("SELECT user_id FROM room_admins WHERE room_id = ?1 ORDER BY user_id")?;
            room.admin_ids = stmt
                .query_map([&rid], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(room))
        })
        .await
    }

    async fn get_active_connection(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<ConnectionRecord>, StoreError> {
        let (uid, rid) = (user_id.to_string(), room_id.to_string());
        self.run(move |conn| Ok(active_connection(conn, &uid, &rid)?))
            .await
    }

    async fn upsert_connection(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<ConnectionRecord, StoreError> {
        let (uid, rid) = (user_id.to_string(), room_id.to_string());
        self.run(move |conn| {
            let now = Utc::now();
            let refreshed = conn.execute(
                "UPDATE room_connections SET joined_at = ?3
                 WHERE user_id = ?1 AND room_id = ?2 AND left_at IS NULL",
                rusqlite::params![uid, rid, now.to_rfc3339()],
            )?;

            if refreshed == 0 {
                conn.execute(
                    "INSERT INTO room_connections (id, user_id, room_id, joined_at, left_at)
                     VALUES (?1, ?2, ?3, ?4, NULL)",
                    rusqlite::params![Uuid::now_v7().to_string(), uid, rid, now.to_rfc3339()],
                )?;
            }

            active_connection(conn, &uid, &rid)?
                .ok_or(StoreError::Database(rusqlite::Error::QueryReturnedNoRows))
        })
        .await
    }

    async fn close_connection(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError> {
        let (uid, rid) = (user_id.to_string(), room_id.to_string());
        self.run(move |conn| {
            let closed = conn.execute(
                "UPDATE room_connections SET left_at = ?3
                 WHERE user_id = ?1 AND room_id = ?2 AND left_at IS NULL",
                rusqlite::params![uid, rid, Utc::now().to_rfc3339()],
            )?;
            Ok(closed > 0)
        })
        .await
    }

    async fn get_grant(
        &self,
        user_id: &str,
        room_id: &str,
    ) -> Result<Option<AccessGrant>, StoreError> {
        let (uid, rid) = (user_id.to_string(), room_id.to_string());
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT user_id, room_id, granted_by, granted_at FROM access_grants
                     WHERE user_id = ?1 AND room_id = ?2",
                    rusqlite::params![uid, rid],
                    grant_from_row,
                )
                .optional()?)
        })
        .await
    }

    async fn put_grant(
        &self,
        user_id: &str,
        room_id: &str,
        granted_by: &str,
    ) -> Result<AccessGrant, StoreError> {
        let (uid, rid, by) = (user_id.to_string(), room_id.to_string(), granted_by.to_string());
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO access_grants (user_id, room_id, granted_by, granted_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, room_id) DO NOTHING",
                rusqlite::params![uid, rid, by, Utc::now().to_rfc3339()],
            )?;
            Ok(conn.query_row(
                "SELECT user_id, room_id, granted_by, granted_at FROM access_grants
                 WHERE user_id = ?1 AND room_id = ?2",
                rusqlite::params![uid, rid],
                grant_from_row,
            )?)
        })
        .await
    }

    async fn append_message(&self, message: &Message) -> Result<String, StoreError> {
        let message = message.clone();
        self.run(move |conn| {
            let target = message
                .target
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?;
            conn.execute(
                "INSERT INTO messages (id, room_id, sender_id, content, visibility, target, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    message.id,
                    message.room_id,
                    message.sender_id,
                    message.content,
                    message.visibility.as_str(),
                    target,
                    message.created_at.to_rfc3339(),
                ],
            )?;
            Ok(message.id)
        })
        .await
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<UserProfile>, StoreError> {
        let uid = user_id.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, display_name, photo_url FROM users WHERE id = ?1",
                    [&uid],
                    |row| {
                        Ok(UserProfile {
                            user_id: row.get(0)?,
                            display_name: row.get(1)?,
                            photo_url: row.get(2)?,
                        })
                    },
                )
                .optional()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (SqliteStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().expect("temp dir");
        let db = crate::db::init_db(tmp.path().to_str().unwrap()).expect("init db");
        (SqliteStore::new(db), tmp)
    }

    fn room(id: &str, is_private: bool) -> Room {
        Room {
            id: id.to_string(),
            name: format!("Room {}", id),
            is_private,
            creator_id: "creator".to_string(),
            admin_ids: vec!["admin-a".to_string(), "admin-b".to_string()],
        }
    }

    #[tokio::test]
    async fn test_get_room_with_admins() {
        let (store, _tmp) = test_store();
        store.put_room(room("r1", true)).await.unwrap();

        let loaded = store.get_room("r1").await.unwrap().expect("room exists");
        assert!(loaded.is_private);
        assert_eq!(loaded.creator_id, "creator");
        assert_eq!(loaded.admin_ids, vec!["admin-a", "admin-b"]);
        assert!(store.get_room("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_refreshes_instead_of_duplicating() {
        let (store, _tmp) = test_store();
        store.put_room(room("r1", false)).await.unwrap();

        let first = store.upsert_connection("u1", "r1").await.unwrap();
        let second = store.upsert_connection("u1", "r1").await.unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.joined_at >= first.joined_at);
        assert_eq!(store.connection_history("u1", "r1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_close_then_rejoin_keeps_single_active_record() {
        let (store, _tmp) = test_store();
        store.put_room(room("r1", false)).await.unwrap();

        store.upsert_connection("u1", "r1").await.unwrap();
        assert!(store.close_connection("u1", "r1").await.unwrap());
        // Already closed: tolerated, nothing to close
        assert!(!store.close_connection("u1", "r1").await.unwrap());
        assert!(store.get_active_connection("u1", "r1").await.unwrap().is_none());

        store.upsert_connection("u1", "r1").await.unwrap();
        let history = store.connection_history("u1", "r1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.iter().filter(|c| c.is_active()).count(), 1);
    }

    #[tokio::test]
    async fn test_put_grant_is_idempotent() {
        let (store, _tmp) = test_store();
        store.put_room(room("r1", true)).await.unwrap();

        let first = store.put_grant("u2", "r1", "admin-a").await.unwrap();
        let again = store.put_grant("u2", "r1", "admin-b").await.unwrap();

        assert_eq!(first, again);
        assert_eq!(again.granted_by, "admin-a");
        assert!(store.get_grant("u2", "r1").await.unwrap().is_some());
        assert!(store.get_grant("u3", "r1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_message_keeps_target() {
        let (store, _tmp) = test_store();
        store.put_room(room("r1", false)).await.unwrap();

        let msg = Message::new(
            "r1",
            "u1",
            "psst".to_string(),
            Visibility::Private,
            Some(vec![Target { user_id: "u3".into() }]),
        );
        let id = store.append_message(&msg).await.unwrap();
        assert_eq!(id, msg.id);

        let stored = store.messages_in("r1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].target, msg.target);
        assert_eq!(stored[0].visibility, Visibility::Private);
    }

    #[tokio::test]
    async fn test_profile_roundtrip() {
        let (store, _tmp) = test_store();
        store
            .put_profile(
                "ada@example.com",
                UserProfile {
                    user_id: "u1".into(),
                    display_name: Some("Ada".into()),
                    photo_url: None,
                },
            )
            .await
            .unwrap();

        let profile = store.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Ada"));
        assert!(store.get_profile("nobody").await.unwrap().is_none());
    }
}
