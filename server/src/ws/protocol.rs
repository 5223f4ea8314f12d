//! JSON wire protocol.
//!
//! Every frame is an object tagged by its `event` field. Inbound frames are
//! decoded once into `ClientEvent`; everything past this module works on the
//! typed variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::chat::message::{Message, MessageDraft};
use crate::error::RoomError;
use crate::presence::{MemberView, OnlineUser, PresenceSnapshot};
use crate::session::{RoomCoordinator, Session, SessionFlow};

/// Signaling request from a client. `room_id` defaults to the sender's room.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    #[serde(default)]
    pub room_id: Option<String>,
    pub target_user_id: String,
    #[serde(default)]
    pub data: Value,
}

/// Signaling payload as delivered to its single recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalForward {
    pub room_id: String,
    pub from_user_id: String,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    JoinRoom {
        #[serde(default)]
        room_id: Option<String>,
    },
    Message(MessageDraft),
    #[serde(rename = "leaveRoom")]
    LeaveRoom,
    SendAccess {
        room_id: String,
    },
    GrantAccess {
        room_id: String,
        user_id: String,
    },
    WebrtcOffer(SignalPayload),
    WebrtcAnswer(SignalPayload),
    WebrtcIceCandidate(SignalPayload),
    ListRoomMembers {
        room_id: String,
    },
    ListOnlineUsers,
}

impl ClientEvent {
    /// Event name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRoom { .. } => "join_room",
            ClientEvent::Message(_) => "message",
            ClientEvent::LeaveRoom => "leaveRoom",
            ClientEvent::SendAccess { .. } => "send_access",
            ClientEvent::GrantAccess { .. } => "grant_access",
            ClientEvent::WebrtcOffer(_) => "webrtc_offer",
            ClientEvent::WebrtcAnswer(_) => "webrtc_answer",
            ClientEvent::WebrtcIceCandidate(_) => "webrtc_ice_candidate",
            ClientEvent::ListRoomMembers { .. } => "list_room_members",
            ClientEvent::ListOnlineUsers => "list_online_users",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    Connected {
        session_id: String,
        user_id: String,
        email: String,
    },
    AuthError {
        message: String,
    },
    JoinSuccess {
        room_id: String,
        session_id: String,
        joined_at: DateTime<Utc>,
        is_admin: bool,
    },
    PeerJoined {
        room_id: String,
        member: MemberView,
    },
    PeerLeft {
        room_id: String,
        user_id: String,
    },
    Presence(PresenceSnapshot),
    LeftRoom {
        room_id: String,
    },
    MessageSuccess {
        message: Message,
    },
    AccessRequest {
        room_id: String,
        user_id: String,
        email: String,
    },
    AccessGranted {
        room_id: String,
        user_id: String,
        granted_by: String,
        granted_at: DateTime<Utc>,
    },
    SessionSuperseded {
        room_id: String,
    },
    WebrtcOffer(SignalForward),
    WebrtcAnswer(SignalForward),
    WebrtcIceCandidate(SignalForward),
    RoomMembers {
        room_id: String,
        members: Vec<MemberView>,
    },
    OnlineUsers {
        count: usize,
        users: Vec<OnlineUser>,
    },
    Error {
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
    },
}

impl ServerEvent {
    pub fn error(err: &RoomError, room_id: Option<&str>) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            message: err.to_string(),
            room_id: room_id.map(str::to_string),
        }
    }
}

/// Decode a text frame and hand it to the coordinator.
///
/// A frame that does not decode is answered with `bad_request`; the
/// connection stays open.
pub async fn handle_text_message(
    text: &str,
    coordinator: &RoomCoordinator,
    session: &mut Session,
) -> SessionFlow {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            tracing::debug!(
                session_id = %session.id,
                user_id = %session.user_id(),
                error = %e,
                "Failed to decode client event"
            );
            session.send(ServerEvent::error(&RoomError::Malformed(e.to_string()), None));
            return SessionFlow::Continue;
        }
    };

    tracing::debug!(
        session_id = %session.id,
        user_id = %session.user_id(),
        event = event.name(),
        "Client event"
    );
    coordinator.on_event(session, event).await
}
