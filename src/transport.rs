//! Peer links: one reliable ordered data channel per remote participant

mod connection;
mod loopback;
mod manager;
mod rtc;
mod types;

pub use connection::{ConnectionEvent, EventSink, PeerConnection, PeerConnector};
pub use loopback::{LoopbackConnection, LoopbackNetwork};
pub use manager::PeerTransportManager;
pub use rtc::{DEFAULT_STUN_SERVER, WebRtcConnection, WebRtcConnector};
pub use types::{
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY, DisconnectReason, LinkState,
    TransportConfig, TransportError, TransportEvent,
};
