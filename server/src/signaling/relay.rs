use serde_json::Value;

use crate::presence::PresenceRegistry;
use crate::session::Session;
use crate::ws::protocol::{ServerEvent, SignalForward};

/// Kind of peer-connection negotiation payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    IceCandidate,
}

impl SignalKind {
    fn into_event(self, forward: SignalForward) -> ServerEvent {
        match self {
            SignalKind::Offer => ServerEvent::WebrtcOffer(forward),
            SignalKind::Answer => ServerEvent::WebrtcAnswer(forward),
            SignalKind::IceCandidate => ServerEvent::WebrtcIceCandidate(forward),
        }
    }
}

/// One-to-one forwarding of opaque signaling payloads between room members.
#[derive(Clone)]
pub struct SignalingRelay {
    presence: PresenceRegistry,
}

impl SignalingRelay {
    pub fn new(presence: PresenceRegistry) -> Self {
        Self { presence }
    }

    /// Forward `data` to `target_user_id` in `room_id` (or the sender's room).
    ///
    /// Returns false without telling anyone when the sender is not in that
    /// room or the target is not there; a peer leaving mid-negotiation is
    /// normal.
    pub fn relay(
        &self,
        from: &Session,
        kind: SignalKind,
        room_id: Option<&str>,
        target_user_id: &str,
        data: Value,
    ) -> bool {
        let Some(room_id) = room_id
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .or(from.room_id.as_deref())
        else {
            return false;
        };

        if self.presence.room_of(&from.id).as_deref() != Some(room_id) {
            tracing::debug!(
                session_id = %from.id,
                room_id = %room_id,
                "Signal dropped: sender not in room"
            );
            return false;
        }

        let Some(target) = self.presence.find_member(room_id, target_user_id) else {
            tracing::debug!(
                room_id = %room_id,
                from_user_id = %from.user_id(),
                target_user_id = %target_user_id,
                ?kind,
                "Signal dropped: target not in room"
            );
            return false;
        };

        target.send(kind.into_event(SignalForward {
            room_id: room_id.to_string(),
            from_user_id: from.user_id().to_string(),
            data,
        }));
        true
    }
}
