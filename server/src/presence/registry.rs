use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::auth::Principal;
use crate::db::models::UserProfile;
use crate::presence::snapshot::{group_online, OnlineUser, PresenceSnapshot};
use crate::session::{Outbound, SessionSender};
use crate::ws::protocol::ServerEvent;

/// A session registered in a room.
#[derive(Debug, Clone)]
pub struct Member {
    pub session_id: String,
    pub principal: Principal,
    pub profile: Option<UserProfile>,
    pub joined_at: DateTime<Utc>,
    tx: SessionSender,
}

impl Member {
    pub fn new(
        session_id: &str,
        principal: Principal,
        profile: Option<UserProfile>,
        tx: SessionSender,
    ) -> Self {
        Self {
            session_id: session_id.to_string(),
            principal,
            profile,
            joined_at: Utc::now(),
            tx,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.principal.id
    }

    /// Queue an event on the member's connection. A closed connection is
    /// ignored; its own disconnect path removes it from the registry.
    pub fn send(&self, event: ServerEvent) {
        let _ = self.tx.send(Outbound::Event(event));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.tx.send(Outbound::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// Result of registering a session in a room.
#[derive(Debug)]
pub struct JoinOutcome {
    /// The session was already a member of this room.
    pub rejoined: bool,
    /// Older sessions of the same user that were pushed out of the room.
    pub evicted: Vec<Member>,
    /// Every other member of the room after the join.
    pub peers: Vec<Member>,
}

/// room -> members and session -> room, for this process only.
///
/// Each room's member list sits behind its own map entry lock, so joins,
/// leaves, and broadcasts for one room never interleave. Lock order is always
/// `rooms` then `sessions`; no guard is held across an `.await`.
#[derive(Debug, Clone, Default)]
pub struct PresenceRegistry {
    rooms: Arc<DashMap<String, Vec<Member>>>,
    sessions: Arc<DashMap<String, String>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `member` in `room_id`.
    ///
    /// A session is in at most one room, so membership elsewhere is dropped
    /// first. Any other session of the same user in this room is evicted,
    /// which keeps page refreshes from inflating the member count.
    pub fn join(&self, room_id: &str, member: Member) -> JoinOutcome {
        if let Some(current) = self.room_of(&member.session_id) {
            if current != room_id {
                self.leave(&member.session_id);
            }
        }

        let mut entry = self.rooms.entry(room_id.to_string()).or_default();
        let members = entry.value_mut();

        let rejoined = members.iter().any(|m| m.session_id == member.session_id);
        let (evicted, kept): (Vec<Member>, Vec<Member>) = std::mem::take(members)
            .into_iter()
            .filter(|m| m.session_id != member.session_id)
            .partition(|m| m.principal.id == member.principal.id);

        *members = kept;
        let peers = members.clone();
        members.push(member.clone());

        for old in &evicted {
            self.sessions.remove_if(&old.session_id, |_, room| room == room_id);
        }
        self.sessions
            .insert(member.session_id.clone(), room_id.to_string());

        tracing::debug!(
            room_id = %room_id,
            session_id = %member.session_id,
            members = members.len(),
            evicted = evicted.len(),
            "Presence join"
        );

        JoinOutcome {
            rejoined,
            evicted,
            peers,
        }
    }

    /// Remove a session from its room. Returns the room and the removed
    /// member, or None when the session was not registered anywhere.
    pub fn leave(&self, session_id: &str) -> Option<(String, Member)> {
        let room_id = self.room_of(session_id)?;

        let removed = match self.rooms.get_mut(&room_id) {
            Some(mut entry) => {
                let removed = entry
                    .iter()
                    .position(|m| m.session_id == session_id)
                    .map(|idx| entry.remove(idx));
                self.sessions.remove_if(session_id, |_, room| *room == room_id);
                removed
            }
            None => {
                self.sessions.remove_if(session_id, |_, room| *room == room_id);
                None
            }
        };

        self.rooms.remove_if(&room_id, |_, members| members.is_empty());

        removed.map(|member| (room_id, member))
    }

    /// The room a session is registered in, if any.
    pub fn room_of(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).map(|r| r.value().clone())
    }

    pub fn members_of(&self, room_id: &str) -> Vec<Member> {
        self.rooms
            .get(room_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// The member of `room_id` belonging to `user_id`, if present.
    pub fn find_member(&self, room_id: &str, user_id: &str) -> Option<Member> {
        self.rooms.get(room_id).and_then(|entry| {
            entry
                .value()
                .iter()
                .find(|m| m.principal.id == user_id)
                .cloned()
        })
    }

    /// Send `event` to every member of a room except `skip_session`.
    /// Returns the number of members it was queued for.
    pub fn broadcast(&self, room_id: &str, event: &ServerEvent, skip_session: Option<&str>) -> usize {
        let Some(entry) = self.rooms.get(room_id) else {
            return 0;
        };
        let mut sent = 0;
        for member in entry.value() {
            if Some(member.session_id.as_str()) != skip_session {
                member.send(event.clone());
                sent += 1;
            }
        }
        sent
    }

    /// Take a snapshot of the room and send it to every member while holding
    /// the room lock, so no member sees a list older than the change that
    /// triggered it.
    pub fn broadcast_snapshot(&self, room_id: &str) -> PresenceSnapshot {
        let Some(entry) = self.rooms.get(room_id) else {
            return PresenceSnapshot::of(room_id, &[]);
        };
        let snapshot = PresenceSnapshot::of(room_id, entry.value());
        let event = ServerEvent::Presence(snapshot.clone());
        for member in entry.value() {
            member.send(event.clone());
        }
        snapshot
    }

    /// Every registered member paired with its room.
    pub fn all_members(&self) -> Vec<(String, Member)> {
        self.rooms
            .iter()
            .flat_map(|entry| {
                let room_id = entry.key().clone();
                entry
                    .value()
                    .iter()
                    .map(|m| (room_id.clone(), m.clone()))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    pub fn online_users(&self) -> Vec<OnlineUser> {
        group_online(self.all_members())
    }
}
