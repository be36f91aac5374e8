//! Polling signaling channel for peer connection bootstrap

mod channel;
mod relay;
mod types;

pub use channel::{
    DEFAULT_MAX_CONSECUTIVE_ERRORS, DEFAULT_POLL_INTERVAL, SignalingChannel, SignalingConfig,
};
pub use relay::{HttpSignalRelay, SignalRelay};
pub use types::{SignalKind, SignalingError, SignalingMessage};
