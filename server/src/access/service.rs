use std::sync::Arc;

use crate::access::permissions::{compute_room_access, RoomAccess};
use crate::auth::Principal;
use crate::db::models::{AccessGrant, Room};
use crate::db::RoomStore;
use crate::error::{RoomError, StoreError};
use crate::presence::PresenceRegistry;
use crate::ws::protocol::ServerEvent;

/// Private-room gate: who may enter, who may grant, and who gets asked.
#[derive(Clone)]
pub struct AccessControl {
    store: Arc<dyn RoomStore>,
    presence: PresenceRegistry,
}

impl AccessControl {
    pub fn new(store: Arc<dyn RoomStore>, presence: PresenceRegistry) -> Self {
        Self { store, presence }
    }

    /// Access bits of `user_id` in `room`. The grant is only looked up when it
    /// could change the answer.
    pub async fn access_for(&self, room: &Room, user_id: &str) -> Result<RoomAccess, StoreError> {
        let standing = compute_room_access(room, user_id, None);
        if !room.is_private || standing.can_grant() {
            return Ok(standing);
        }
        let grant = self.store.get_grant(user_id, &room.id).await?;
        Ok(compute_room_access(room, user_id, grant.as_ref()))
    }

    /// Whether `user_id` may enter `room_id`. Unknown rooms admit nobody.
    pub async fn has_access(&self, user_id: &str, room_id: &str) -> Result<bool, StoreError> {
        match self.store.get_room(room_id).await? {
            Some(room) => Ok(self.access_for(&room, user_id).await?.can_enter(&room)),
            None => Ok(false),
        }
    }

    /// True for room admins and the room creator.
    pub async fn is_admin(&self, room_id: &str, user_id: &str) -> Result<bool, StoreError> {
        Ok(self
            .store
            .get_room(room_id)
            .await?
            .is_some_and(|room| compute_room_access(&room, user_id, None).can_grant()))
    }

    /// Record that `target_user_id` may enter `room_id`.
    ///
    /// Only an admin or the creator may grant. Re-granting returns the
    /// existing grant.
    pub async fn grant_access(
        &self,
        target_user_id: &str,
        room_id: &str,
        granted_by: &str,
    ) -> Result<AccessGrant, RoomError> {
        let room = self
            .store
            .get_room(room_id)
            .await
            .map_err(RoomError::internal)?
            .ok_or(RoomError::InvalidRoom)?;

        if !compute_room_access(&room, granted_by, None).can_grant() {
            tracing::warn!(
                room_id = %room_id,
                granted_by = %granted_by,
                target_user_id = %target_user_id,
                "Grant refused: not an admin or creator"
            );
            return Err(RoomError::NotAuthorized);
        }

        let grant = self
            .store
            .put_grant(target_user_id, room_id, granted_by)
            .await
            .map_err(RoomError::persistence)?;

        tracing::info!(
            room_id = %room_id,
            granted_by = %granted_by,
            target_user_id = %target_user_id,
            "Access granted"
        );
        Ok(grant)
    }

    /// Ask the room's admins and creator to let `requester` in.
    ///
    /// Only sessions currently in a room on this instance are notified;
    /// nothing is queued for offline approvers. Returns how many sessions
    /// were notified.
    pub async fn request_access(&self, requester: &Principal, room_id: &str) -> Result<usize, RoomError> {
        let room = self
            .store
            .get_room(room_id)
            .await
            .map_err(RoomError::internal)?
            .ok_or(RoomError::InvalidRoom)?;

        let event = ServerEvent::AccessRequest {
            room_id: room.id.clone(),
            user_id: requester.id.clone(),
            email: requester.email.clone(),
        };

        let mut notified = 0;
        for (_, member) in self.presence.all_members() {
            if compute_room_access(&room, member.user_id(), None).can_grant() {
                member.send(event.clone());
                notified += 1;
            }
        }

        tracing::debug!(
            room_id = %room_id,
            user_id = %requester.id,
            notified = notified,
            "Access request fanned out"
        );
        Ok(notified)
    }
}
