use serde::{Deserialize, Serialize};

use super::types::{ParticipantId, RelayError, RoomCode, RoomParticipant};
use crate::signaling::{SignalKind, SignalingMessage};

/// `POST /rooms`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub host_id: ParticipantId,
    pub host_name: String,
    #[serde(default)]
    pub quiz_data: serde_json::Value,
    pub seconds_per_question: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateRoomResponse {
    pub code: RoomCode,
    pub participants: Vec<RoomParticipant>,
}

/// `POST /rooms/{code}/join`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub participant_id: ParticipantId,
    pub name: String,
}

/// `POST /rooms/{code}/leave`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRoomRequest {
    pub participant_id: ParticipantId,
}

/// `POST /rooms/{code}/start` and `DELETE /rooms/{code}`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRequest {
    pub host_id: ParticipantId,
}

/// `POST /signal`
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRequest {
    pub room_code: RoomCode,
    pub from_id: ParticipantId,
    pub to_id: ParticipantId,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub payload: serde_json::Value,
}

impl SignalRequest {
    pub fn into_message(self) -> SignalingMessage {
        SignalingMessage {
            from_id: self.from_id,
            to_id: self.to_id,
            kind: self.kind,
            payload: self.payload,
            sequence_id: 0,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignalsResponse {
    pub messages: Vec<SignalingMessage>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PeersResponse {
    pub peers: Vec<ParticipantId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

/// Body of every non-2xx response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl From<&RelayError> for ErrorBody {
    fn from(err: &RelayError) -> Self {
        Self {
            error: ErrorDetail {
                code: err.code().to_string(),
                message: err.to_string(),
            },
        }
    }
}
