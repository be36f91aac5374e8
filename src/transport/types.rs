use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::relay::ParticipantId;
use crate::signaling::{SignalingConfig, SignalingError};

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 3;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(2000);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("signaling failed: {0}")]
    Signaling(#[from] SignalingError),

    /// The link never reached `Connected`
    #[error("connection to {peer} failed: {reason}")]
    ConnectionFailure { peer: ParticipantId, reason: String },

    #[error("data channel to {0} is not open")]
    ChannelClosed(ParticipantId),

    #[error("message could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub signaling: SignalingConfig,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            signaling: SignalingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// Transient; the link may still recover
    Disconnected,
    /// Reconnection exhausted
    Failed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DisconnectReason::Disconnected => "disconnected",
            DisconnectReason::Failed => "failed",
        })
    }
}

/// Lifecycle and data events reported to the owner of a transport manager
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    PeerConnected(ParticipantId),
    PeerDisconnected {
        peer: ParticipantId,
        reason: DisconnectReason,
    },
    Message {
        peer: ParticipantId,
        text: String,
    },
}
