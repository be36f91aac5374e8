use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use thiserror::Error;

use crate::signaling::SignalingMessage;

/// Relay and room registry errors
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("room not found: {0}")]
    RoomNotFound(RoomCode),

    #[error("room is full: {0}")]
    RoomFull(RoomCode),

    #[error("{participant} is not in room {room}")]
    NotInRoom {
        room: RoomCode,
        participant: ParticipantId,
    },

    #[error("only the host may {0}")]
    NotHost(&'static str),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Machine-readable code carried in `{error: {code, message}}` bodies
    pub fn code(&self) -> &'static str {
        match self {
            RelayError::RoomNotFound(_) => "ROOM_NOT_FOUND",
            RelayError::RoomFull(_) => "ROOM_FULL",
            RelayError::NotInRoom { .. } => "PARTICIPANT_NOT_FOUND",
            RelayError::NotHost(_) => "NOT_HOST",
            RelayError::InvalidRequest(_) => "INVALID_REQUEST",
            RelayError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            RelayError::RoomNotFound(_) => 404,
            RelayError::RoomFull(_) => 409,
            RelayError::NotInRoom { .. } => 404,
            RelayError::NotHost(_) => 403,
            RelayError::InvalidRequest(_) => 400,
            RelayError::Internal(_) => 500,
        }
    }
}

const ROOM_CODE_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ROOM_CODE_LEN: usize = 8;
const PARTICIPANT_ID_CAP: usize = 64;
const GENERATED_ID_LEN: usize = 13;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// An identifier that does not fit its inline storage
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidId {
    #[error("identifier is empty")]
    Empty,

    #[error("identifier is {len} bytes, at most {max} allowed")]
    TooLong { len: usize, max: usize },
}

impl From<InvalidId> for RelayError {
    fn from(err: InvalidId) -> Self {
        RelayError::InvalidRequest(err.to_string())
    }
}

fn copy_inline<const N: usize>(s: &str) -> Result<([u8; N], u8), InvalidId> {
    let src = s.as_bytes();
    if src.is_empty() {
        return Err(InvalidId::Empty);
    }
    if src.len() > N {
        return Err(InvalidId::TooLong {
            len: src.len(),
            max: N,
        });
    }
    let mut bytes = [0u8; N];
    bytes[..src.len()].copy_from_slice(src);
    Ok((bytes, src.len() as u8))
}

/// Room code: up to 8 bytes, stored inline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoomCode {
    bytes: [u8; ROOM_CODE_LEN],
    len: u8,
}

impl RoomCode {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let mut bytes = [0u8; ROOM_CODE_LEN];
        for byte in &mut bytes {
            *byte = ROOM_CODE_CHARS[rng.random_range(0..ROOM_CODE_CHARS.len())];
        }
        Self {
            bytes,
            len: ROOM_CODE_LEN as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for RoomCode {
    type Error = InvalidId;

    fn try_from(s: &str) -> Result<Self, InvalidId> {
        let (bytes, len) = copy_inline::<ROOM_CODE_LEN>(s)?;
        Ok(Self { bytes, len })
    }
}

impl FromStr for RoomCode {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, InvalidId> {
        Self::try_from(s)
    }
}

impl Serialize for RoomCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoomCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        RoomCode::try_from(s.as_str()).map_err(de::Error::custom)
    }
}

/// Opaque participant ID of up to 64 bytes. Generated IDs look like
/// `peer_` followed by 8 hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParticipantId {
    bytes: [u8; PARTICIPANT_ID_CAP],
    len: u8,
}

impl ParticipantId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; PARTICIPANT_ID_CAP];
        bytes[..5].copy_from_slice(b"peer_");

        let mut rng = rand::rng();
        let value: u32 = rng.random();

        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            bytes[5 + i] = HEX_CHARS[nibble];
        }
        Self {
            bytes,
            len: GENERATED_ID_LEN as u8,
        }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or("")
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ParticipantId {
    type Error = InvalidId;

    fn try_from(s: &str) -> Result<Self, InvalidId> {
        let (bytes, len) = copy_inline::<PARTICIPANT_ID_CAP>(s)?;
        Ok(Self { bytes, len })
    }
}

impl FromStr for ParticipantId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, InvalidId> {
        Self::try_from(s)
    }
}

impl Serialize for ParticipantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ParticipantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ParticipantId::try_from(s.as_str()).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Ended,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomParticipant {
    pub id: ParticipantId,
    pub name: String,
    #[serde(default)]
    pub is_host: bool,
}

/// Registry view of a room
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub code: RoomCode,
    pub host_id: ParticipantId,
    pub status: RoomStatus,
    pub seconds_per_question: u32,
    pub participants: Vec<RoomParticipant>,
    #[serde(default)]
    pub quiz_data: serde_json::Value,
}

#[derive(Debug)]
pub(crate) struct Room {
    pub host_id: ParticipantId,
    pub status: RoomStatus,
    pub seconds_per_question: u32,
    pub quiz_data: serde_json::Value,
    pub participants: Vec<RoomParticipant>,
    /// Pending signaling messages, keyed by recipient
    pub mailboxes: HashMap<ParticipantId, Vec<SignalingMessage>>,
    pub next_sequence: u64,
}

impl Room {
    pub fn snapshot(&self, code: RoomCode) -> RoomSnapshot {
        RoomSnapshot {
            code,
            host_id: self.host_id,
            status: self.status,
            seconds_per_question: self.seconds_per_question,
            participants: self.participants.clone(),
            quiz_data: self.quiz_data.clone(),
        }
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participants.iter().any(|p| p.id == *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn room_code_generate_has_correct_length() {
        let code = RoomCode::generate();
        assert_eq!(code.as_str().len(), 8);
    }

    #[test]
    fn room_code_generate_uses_valid_chars() {
        let code = RoomCode::generate();
        let valid_chars: Vec<char> = "abcdefghijklmnopqrstuvwxyz0123456789".chars().collect();
        for c in code.as_str().chars() {
            assert!(valid_chars.contains(&c), "Invalid char: {}", c);
        }
    }

    #[test]
    fn participant_id_generate_has_correct_format() {
        let id = ParticipantId::generate();
        assert!(id.as_str().starts_with("peer_"));
        assert_eq!(id.as_str().len(), 13);
    }

    #[test]
    fn participant_id_keeps_longer_opaque_ids() {
        let id = ParticipantId::try_from("a1b2c3d4-e5f6-7890-abcd-ef12").unwrap();
        assert_eq!(id.as_str(), "a1b2c3d4-e5f6-7890-abcd-ef12");
    }

    #[test]
    fn uuid_participant_ids_stay_distinct() {
        let a = ParticipantId::try_from("123e4567-e89b-12d3-a456-426614174000").unwrap();
        let b = ParticipantId::try_from("123e4567-e89b-12d3-a456-426614179999").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str(), "123e4567-e89b-12d3-a456-426614174000");
    }

    #[test]
    fn oversized_ids_are_rejected() {
        assert_eq!(
            RoomCode::try_from("room123456"),
            Err(InvalidId::TooLong { len: 10, max: 8 })
        );
        assert_eq!("".parse::<ParticipantId>(), Err(InvalidId::Empty));
        assert!(ParticipantId::try_from("x".repeat(65).as_str()).is_err());
        assert!(ParticipantId::try_from("x".repeat(64).as_str()).is_ok());

        assert!(serde_json::from_str::<RoomCode>("\"room123456\"").is_err());
        let long = serde_json::Value::String("p".repeat(80));
        assert!(serde_json::from_value::<ParticipantId>(long).is_err());
    }

    #[test]
    fn participant_id_ordering_follows_text() {
        assert!(ParticipantId::try_from("peer_0000000a").unwrap() < ParticipantId::try_from("peer_0000000b").unwrap());
    }

    #[test]
    fn room_code_round_trips_through_json() {
        let code: RoomCode = serde_json::from_str("\"testcode\"").unwrap();
        assert_eq!(code.as_str(), "testcode");
        assert_eq!(serde_json::to_string(&code).unwrap(), "\"testcode\"");
    }

    #[test]
    fn participant_id_deserializes_from_owned_string() {
        let value = serde_json::json!("peer_test1234");
        let id: ParticipantId = serde_json::from_value(value).unwrap();
        assert_eq!(id.as_str(), "peer_test1234");
    }

    #[test]
    fn error_codes_match_http_contract() {
        let code = RoomCode::try_from("abc12345").unwrap();
        assert_eq!(RelayError::RoomNotFound(code).status(), 404);
        assert_eq!(RelayError::RoomFull(code).code(), "ROOM_FULL");
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let snapshot = RoomSnapshot {
            code: RoomCode::try_from("abc12345").unwrap(),
            host_id: ParticipantId::try_from("peer_host0001").unwrap(),
            status: RoomStatus::Waiting,
            seconds_per_question: 30,
            participants: vec![RoomParticipant {
                id: ParticipantId::try_from("peer_host0001").unwrap(),
                name: "Ada".to_string(),
                is_host: true,
            }],
            quiz_data: serde_json::Value::Null,
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"hostId\":\"peer_host0001\""));
        assert!(json.contains("\"secondsPerQuestion\":30"));
        assert!(json.contains("\"isHost\":true"));
        assert!(json.contains("\"status\":\"waiting\""));
    }
}
