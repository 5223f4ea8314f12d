pub mod permissions;
pub mod service;

pub use permissions::{compute_room_access, RoomAccess};
pub use service::AccessControl;
