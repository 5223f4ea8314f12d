pub mod relay;

pub use relay::{SignalKind, SignalingRelay};
