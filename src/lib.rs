//! Peer-to-peer quiz sessions: an HTTP signaling relay and room registry,
//! a mesh of reliable peer data channels, and host/guest coordinators that
//! keep every replica on the same question without a game server.

mod http;

pub mod registry;
pub mod relay;
pub mod session;
pub mod signaling;
pub mod transport;

pub use registry::{HttpRoomRegistry, RegistryError, RoomDirectory};
pub use relay::{ParticipantId, RelayHandle, RelayServer, RoomCode};
pub use session::{
    Coordinator, GuestCoordinator, HostCoordinator, SessionDeps, SessionError, SessionPhase,
};
pub use signaling::{HttpSignalRelay, SignalRelay};
pub use transport::{LoopbackNetwork, PeerTransportManager, WebRtcConnector};
