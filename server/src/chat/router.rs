use std::sync::Arc;

use crate::chat::message::{Message, MessageDraft, Visibility};
use crate::db::RoomStore;
use crate::error::RoomError;
use crate::presence::PresenceRegistry;
use crate::session::Session;
use crate::ws::protocol::ServerEvent;

/// What happened to a message the client sent.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The sender is not in a room. Nobody is told.
    Dropped,
    /// Validation or persistence failed; the error event was already sent.
    Rejected(RoomError),
    /// Persisted and delivered.
    Accepted(Message),
}

/// Validates, persists, and delivers chat messages.
#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<dyn RoomStore>,
    presence: PresenceRegistry,
}

impl MessageRouter {
    pub fn new(store: Arc<dyn RoomStore>, presence: PresenceRegistry) -> Self {
        Self { store, presence }
    }

    /// Route one message. The first failing check wins:
    /// room membership, visibility, content and target, active connection
    /// record. Only then is the message persisted, and only a persisted
    /// message is delivered.
    pub async fn route(&self, session: &Session, draft: MessageDraft) -> RouteOutcome {
        let Some(room_id) = self.presence.room_of(&session.id) else {
            tracing::debug!(
                session_id = %session.id,
                user_id = %session.user_id(),
                "Message dropped: session not in a room"
            );
            return RouteOutcome::Dropped;
        };

        let visibility = match draft.visibility() {
            Ok(v) => v,
            Err(e) => return reject(session, &room_id, e),
        };
        let content = match draft.content() {
            Ok(c) => c,
            Err(e) => return reject(session, &room_id, e),
        };
        let target = match draft.target_for(visibility) {
            Ok(t) => t,
            Err(e) => return reject(session, &room_id, e),
        };

        match self
            .store
            .get_active_connection(session.user_id(), &room_id)
            .await
        {
            Ok(Some(_)) => {}
            Ok(None) => return reject(session, &room_id, RoomError::NoActiveConnection),
            Err(e) => {
                tracing::error!(
                    room_id = %room_id,
                    user_id = %session.user_id(),
                    error = %e,
                    "Failed to read active connection"
                );
                return reject(session, &room_id, RoomError::internal(e));
            }
        }

        let message = Message::new(&room_id, session.user_id(), content, visibility, target);

        if let Err(e) = self.store.append_message(&message).await {
            tracing::error!(
                room_id = %room_id,
                user_id = %session.user_id(),
                error = %e,
                "Failed to persist message"
            );
            // Loss must be visible to the whole room, not just the sender
            let err = RoomError::Persistence(e.to_string());
            self.presence
                .broadcast(&room_id, &ServerEvent::error(&err, Some(&room_id)), None);
            return RouteOutcome::Rejected(err);
        }

        let delivered = self.deliver(&message);
        tracing::debug!(
            room_id = %room_id,
            message_id = %message.id,
            visibility = message.visibility.as_str(),
            delivered = delivered,
            "Message routed"
        );
        RouteOutcome::Accepted(message)
    }

    /// Public messages go to every member including the sender; private ones
    /// only to members named in the target list.
    fn deliver(&self, message: &Message) -> usize {
        let event = ServerEvent::MessageSuccess {
            message: message.clone(),
        };
        match message.visibility {
            Visibility::Public => self.presence.broadcast(&message.room_id, &event, None),
            Visibility::Private => {
                let mut sent = 0;
                for member in self.presence.members_of(&message.room_id) {
                    if message.targets(member.user_id()) {
                        member.send(event.clone());
                        sent += 1;
                    }
                }
                sent
            }
        }
    }
}

fn reject(session: &Session, room_id: &str, err: RoomError) -> RouteOutcome {
    tracing::debug!(
        session_id = %session.id,
        room_id = %room_id,
        code = err.code(),
        "Message rejected"
    );
    session.send(ServerEvent::error(&err, Some(room_id)));
    RouteOutcome::Rejected(err)
}
