//! In-memory signaling relay and room registry, served over HTTP

mod actor;
mod messages;
mod server;
mod types;

pub use actor::{MAX_ROOM_PARTICIPANTS, RelayHandle};
pub use messages::{
    Ack, CreateRoomRequest, CreateRoomResponse, ErrorBody, ErrorDetail, HostRequest,
    JoinRoomRequest, LeaveRoomRequest, PeersResponse, SignalRequest, SignalsResponse,
};
pub use server::{DEFAULT_RELAY_PORT, RelayServer};
pub use types::{
    InvalidId, ParticipantId, RelayError, RoomCode, RoomParticipant, RoomSnapshot, RoomStatus,
};
