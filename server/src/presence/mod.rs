//! In-process presence: which sessions are in which room on this instance.

pub mod registry;
pub mod snapshot;

pub use registry::{JoinOutcome, Member, PresenceRegistry};
pub use snapshot::{MemberView, OnlineUser, PresenceSnapshot};
