//! Per-connection state machine.
//!
//! `RoomCoordinator` owns the lifecycle of every session: authentication,
//! joining and leaving rooms, and the disconnect cleanup. It composes the
//! presence registry, access control, message router and signaling relay;
//! none of them is reachable from a session except through here.

use std::sync::Arc;

use crate::access::AccessControl;
use crate::auth::{IdentityResolver, Principal};
use crate::chat::MessageRouter;
use crate::db::RoomStore;
use crate::error::{close_code, AuthError, RoomError};
use crate::presence::{Member, MemberView, OnlineUser, PresenceRegistry};
use crate::session::{Session, SessionFlow, SessionSender};
use crate::signaling::{SignalKind, SignalingRelay};
use crate::ws::broadcast::{register_connection, send_to_user, unregister_connection};
use crate::ws::protocol::{ClientEvent, ServerEvent};
use crate::ws::{new_connection_registry, ConnectionRegistry};

pub struct RoomCoordinator {
    identity: Arc<IdentityResolver>,
    store: Arc<dyn RoomStore>,
    presence: PresenceRegistry,
    connections: ConnectionRegistry,
    access: AccessControl,
    router: MessageRouter,
    relay: SignalingRelay,
}

impl RoomCoordinator {
    pub fn new(identity: Arc<IdentityResolver>, store: Arc<dyn RoomStore>) -> Self {
        let presence = PresenceRegistry::new();
        Self {
            access: AccessControl::new(store.clone(), presence.clone()),
            router: MessageRouter::new(store.clone(), presence.clone()),
            relay: SignalingRelay::new(presence.clone()),
            connections: new_connection_registry(),
            identity,
            store,
            presence,
        }
    }

    pub fn identity(&self) -> &Arc<IdentityResolver> {
        &self.identity
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub async fn authenticate(&self, credential: Option<&str>) -> Result<Principal, AuthError> {
        self.identity.authenticate(credential).await
    }

    /// Create the session for an authenticated connection.
    pub fn on_connect(&self, principal: Principal, tx: SessionSender) -> Session {
        let session = Session::new(principal, tx);
        register_connection(
            &self.connections,
            session.user_id(),
            &session.id,
            session.sender(),
        );
        session.send(ServerEvent::Connected {
            session_id: session.id.clone(),
            user_id: session.principal.id.clone(),
            email: session.principal.email.clone(),
        });
        tracing::info!(
            user_id = %session.user_id(),
            session_id = %session.id,
            "Session connected"
        );
        session
    }

    /// Dispatch one decoded client event.
    pub async fn on_event(&self, session: &mut Session, event: ClientEvent) -> SessionFlow {
        if self.was_superseded(session) {
            return SessionFlow::Close;
        }

        match event {
            ClientEvent::JoinRoom { room_id } => {
                match self.join_room(session, room_id.as_deref()).await {
                    Ok(()) => SessionFlow::Continue,
                    Err(e) => {
                        let room_id = room_id.as_deref().map(str::trim).filter(|r| !r.is_empty());
                        session.send(ServerEvent::error(&e, room_id));
                        if e.is_join_fatal() {
                            session.close(e.close_code(), &e.to_string());
                            SessionFlow::Close
                        } else {
                            SessionFlow::Continue
                        }
                    }
                }
            }
            ClientEvent::Message(draft) => {
                self.router.route(session, draft).await;
                SessionFlow::Continue
            }
            ClientEvent::LeaveRoom => {
                self.leave_room(session).await;
                SessionFlow::Continue
            }
            ClientEvent::SendAccess { room_id } => {
                if let Err(e) = self.access.request_access(&session.principal, &room_id).await {
                    session.send(ServerEvent::error(&e, Some(&room_id)));
                }
                SessionFlow::Continue
            }
            ClientEvent::GrantAccess { room_id, user_id } => {
                self.grant_access(session, &room_id, &user_id).await;
                SessionFlow::Continue
            }
            ClientEvent::WebrtcOffer(p) => {
                self.relay.relay(
                    session,
                    SignalKind::Offer,
                    p.room_id.as_deref(),
                    &p.target_user_id,
                    p.data,
                );
                SessionFlow::Continue
            }
            ClientEvent::WebrtcAnswer(p) => {
                self.relay.relay(
                    session,
                    SignalKind::Answer,
                    p.room_id.as_deref(),
                    &p.target_user_id,
                    p.data,
                );
                SessionFlow::Continue
            }
            ClientEvent::WebrtcIceCandidate(p) => {
                self.relay.relay(
                    session,
                    SignalKind::IceCandidate,
                    p.room_id.as_deref(),
                    &p.target_user_id,
                    p.data,
                );
                SessionFlow::Continue
            }
            ClientEvent::ListRoomMembers { room_id } => {
                let members = self.list_room_members(&room_id);
                session.send(ServerEvent::RoomMembers { room_id, members });
                SessionFlow::Continue
            }
            ClientEvent::ListOnlineUsers => {
                let users = self.list_all_online_users();
                session.send(ServerEvent::OnlineUsers {
                    count: users.len(),
                    users,
                });
                SessionFlow::Continue
            }
        }
    }

    /// Join `room_id`, leaving any other room first.
    ///
    /// Errors are returned, not sent; `on_event` reports them and closes the
    /// connection for the join-fatal ones.
    pub async fn join_room(&self, session: &mut Session, room_id: Option<&str>) -> Result<(), RoomError> {
        let room_id = room_id
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(RoomError::InvalidRoom)?;
        let user_id = session.user_id().to_string();

        let room = self
            .store
            .get_room(room_id)
            .await
            .map_err(RoomError::join_failed)?
            .ok_or(RoomError::InvalidRoom)?;

        let access = self
            .access
            .access_for(&room, &user_id)
            .await
            .map_err(RoomError::join_failed)?;
        if !access.can_enter(&room) {
            tracing::warn!(
                user_id = %user_id,
                room_id = %room.id,
                "Join refused: no access to private room"
            );
            return Err(RoomError::AccessDenied);
        }

        if session.room_id.as_deref().is_some_and(|current| current != room.id) {
            self.vacate(session).await;
        }

        let profile = match self.store.get_profile(&user_id).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Profile lookup failed");
                None
            }
        };

        let member = Member::new(&session.id, session.principal.clone(), profile, session.sender());
        let outcome = self.presence.join(&room.id, member.clone());

        for old in &outcome.evicted {
            tracing::info!(
                user_id = %user_id,
                room_id = %room.id,
                session_id = %old.session_id,
                "Session superseded by reconnect"
            );
            old.send(ServerEvent::SessionSuperseded {
                room_id: room.id.clone(),
            });
            old.close(close_code::SUPERSEDED, "superseded by a newer session");
        }

        if let Err(e) = self.store.upsert_connection(&user_id, &room.id).await {
            tracing::error!(
                user_id = %user_id,
                room_id = %room.id,
                error = %e,
                "Failed to record connection, rolling back join"
            );
            self.presence.leave(&session.id);
            session.vacate();
            if outcome.rejoined {
                if let Err(e) = self.store.close_connection(&user_id, &room.id).await {
                    tracing::warn!(user_id = %user_id, room_id = %room.id, error = %e, "Rollback close failed");
                }
            }
            self.presence.broadcast_snapshot(&room.id);
            return Err(RoomError::join_failed(e));
        }

        session.enter(&room.id, member.joined_at);
        session.send(ServerEvent::JoinSuccess {
            room_id: room.id.clone(),
            session_id: session.id.clone(),
            joined_at: member.joined_at,
            is_admin: access.can_grant(),
        });

        if !outcome.rejoined {
            let view = MemberView::from(&member);
            for peer in &outcome.peers {
                peer.send(ServerEvent::PeerJoined {
                    room_id: room.id.clone(),
                    member: view.clone(),
                });
            }
        }

        let snapshot = self.presence.broadcast_snapshot(&room.id);
        tracing::info!(
            user_id = %user_id,
            room_id = %room.id,
            session_id = %session.id,
            members = snapshot.count,
            rejoined = outcome.rejoined,
            "Joined room"
        );
        Ok(())
    }

    /// Explicit leave. Not being in a room is not an error.
    pub async fn leave_room(&self, session: &mut Session) {
        if let Some(room_id) = self.vacate(session).await {
            session.send(ServerEvent::LeftRoom { room_id });
        }
    }

    /// Cleanup when the transport is gone. Never fails; store errors are
    /// logged and the in-memory cleanup still runs.
    pub async fn on_disconnect(&self, mut session: Session) {
        let room_id = self.vacate(&mut session).await;
        unregister_connection(&self.connections, &session.principal.id, &session.id);
        tracing::info!(
            user_id = %session.user_id(),
            session_id = %session.id,
            room_id = ?room_id,
            "Session disconnected"
        );
    }

    pub fn list_room_members(&self, room_id: &str) -> Vec<MemberView> {
        self.presence
            .members_of(room_id.trim())
            .iter()
            .map(MemberView::from)
            .collect()
    }

    pub fn list_all_online_users(&self) -> Vec<OnlineUser> {
        self.presence.online_users()
    }

    /// Number of distinct users in a room on this instance.
    pub fn get_online_count(&self) -> usize {
        self.presence.online_users().len()
    }

    async fn grant_access(&self, session: &Session, room_id: &str, target_user_id: &str) {
        match self
            .access
            .grant_access(target_user_id, room_id, session.user_id())
            .await
        {
            Ok(grant) => {
                let event = ServerEvent::AccessGranted {
                    room_id: grant.room_id,
                    user_id: grant.user_id,
                    granted_by: grant.granted_by,
                    granted_at: grant.granted_at,
                };
                session.send(event.clone());
                send_to_user(&self.connections, target_user_id, &event, Some(&session.id));
            }
            Err(e) => session.send(ServerEvent::error(&e, Some(room_id))),
        }
    }

    /// Leave the session's room: presence, durable record, notifications.
    ///
    /// The presence registry decides whether the session still owns its
    /// membership. A session superseded by a reconnect does not, and must not
    /// close the record the newer session is using.
    async fn vacate(&self, session: &mut Session) -> Option<String> {
        let claimed = session.vacate();
        let Some((room_id, member)) = self.presence.leave(&session.id) else {
            if let Some(room_id) = claimed {
                tracing::debug!(
                    session_id = %session.id,
                    room_id = %room_id,
                    "Session no longer owns its membership, skipping cleanup"
                );
            }
            return None;
        };
        let user_id = member.user_id().to_string();

        match self.store.close_connection(&user_id, &room_id).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!(
                user_id = %user_id,
                room_id = %room_id,
                "No active connection record to close"
            ),
            Err(e) => tracing::warn!(
                user_id = %user_id,
                room_id = %room_id,
                error = %e,
                "Failed to close connection record"
            ),
        }

        // A reconnect may have registered while the record was being closed
        if self.presence.find_member(&room_id, &user_id).is_some() {
            self.reopen_for_newer_session(&user_id, &room_id).await;
        } else {
            self.presence.broadcast(
                &room_id,
                &ServerEvent::PeerLeft {
                    room_id: room_id.clone(),
                    user_id: user_id.clone(),
                },
                None,
            );
        }
        self.presence.broadcast_snapshot(&room_id);

        tracing::info!(
            user_id = %user_id,
            room_id = %room_id,
            session_id = %session.id,
            "Left room"
        );
        Some(room_id)
    }

    /// Put back the record a closing session shut underneath a newer session
    /// of the same user. If that session left while the upsert was in
    /// flight, the record is closed again.
    async fn reopen_for_newer_session(&self, user_id: &str, room_id: &str) {
        if let Err(e) = self.store.upsert_connection(user_id, room_id).await {
            tracing::warn!(
                user_id = %user_id,
                room_id = %room_id,
                error = %e,
                "Failed to reopen connection record for newer session"
            );
            return;
        }
        if self.presence.find_member(room_id, user_id).is_some() {
            return;
        }
        tracing::debug!(
            user_id = %user_id,
            room_id = %room_id,
            "Newer session left during reopen, closing record again"
        );
        if let Err(e) = self.store.close_connection(user_id, room_id).await {
            tracing::warn!(
                user_id = %user_id,
                room_id = %room_id,
                error = %e,
                "Failed to close reopened connection record"
            );
        }
    }

    /// A session whose room membership was taken over by a newer session of
    /// the same user only gets to close.
    fn was_superseded(&self, session: &mut Session) -> bool {
        let Some(room_id) = session.room_id.as_deref() else {
            return false;
        };
        if self.presence.room_of(&session.id).as_deref() == Some(room_id) {
            return false;
        }
        session.vacate();
        session.close(close_code::SUPERSEDED, "superseded by a newer session");
        true
    }
}
