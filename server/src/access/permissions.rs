use bitflags::bitflags;

use crate::db::models::{AccessGrant, Room};

bitflags! {
    /// A user's standing in one room.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RoomAccess: u32 {
        const GRANTED = 1 << 0;  // 0x01
        const ADMIN   = 1 << 1;  // 0x02
        const CREATOR = 1 << 2;  // 0x04
    }
}

impl RoomAccess {
    /// Admins and the creator may enter without a grant and may hand out grants.
    pub fn can_grant(self) -> bool {
        self.intersects(RoomAccess::ADMIN | RoomAccess::CREATOR)
    }

    /// Whether the holder may enter `room`. Public rooms are open to everyone.
    pub fn can_enter(self, room: &Room) -> bool {
        !room.is_private || self.can_grant() || self.contains(RoomAccess::GRANTED)
    }
}

/// Compute a user's access bits from room metadata and an optional grant.
pub fn compute_room_access(room: &Room, user_id: &str, grant: Option<&AccessGrant>) -> RoomAccess {
    let mut access = RoomAccess::empty();
    if room.creator_id == user_id {
        access |= RoomAccess::CREATOR;
    }
    if room.is_admin(user_id) {
        access |= RoomAccess::ADMIN;
    }
    if grant.is_some_and(|g| g.user_id == user_id && g.room_id == room.id) {
        access |= RoomAccess::GRANTED;
    }
    access
}
