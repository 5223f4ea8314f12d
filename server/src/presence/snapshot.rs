use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::presence::registry::Member;

/// Public projection of a room member, as broadcast to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberView {
    pub user_id: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub joined_at: DateTime<Utc>,
}

impl From<&Member> for MemberView {
    fn from(member: &Member) -> Self {
        let profile = member.profile.as_ref();
        Self {
            user_id: member.principal.id.clone(),
            email: member.principal.email.clone(),
            display_name: profile.and_then(|p| p.display_name.clone()),
            photo_url: profile.and_then(|p| p.photo_url.clone()),
            joined_at: member.joined_at,
        }
    }
}

/// Member count and list of one room at the moment it was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub room_id: String,
    pub count: usize,
    pub members: Vec<MemberView>,
}

impl PresenceSnapshot {
    pub fn of(room_id: &str, members: &[Member]) -> Self {
        Self {
            room_id: room_id.to_string(),
            count: members.len(),
            members: members.iter().map(MemberView::from).collect(),
        }
    }
}

/// A user with at least one session in a room on this instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub user_id: String,
    pub email: String,
    pub room_ids: Vec<String>,
}

/// Group members by user, ordered by user id.
pub fn group_online(members: impl IntoIterator<Item = (String, Member)>) -> Vec<OnlineUser> {
    let mut by_user: BTreeMap<String, OnlineUser> = BTreeMap::new();
    for (room_id, member) in members {
        let entry = by_user
            .entry(member.principal.id.clone())
            .or_insert_with(|| OnlineUser {
                user_id: member.principal.id.clone(),
                email: member.principal.email.clone(),
                room_ids: Vec::new(),
            });
        if !entry.room_ids.contains(&room_id) {
            entry.room_ids.push(room_id);
        }
    }
    by_user
        .into_values()
        .map(|mut user| {
            user.room_ids.sort();
            user
        })
        .collect()
}
