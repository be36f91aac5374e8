//! Messages exchanged over peer data channels.
//!
//! Wire shape: `{"type": "<kind>", "payload": {...}}`.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use thiserror::Error;

use super::types::{ConnectionStatus, SessionState, Standing};
use crate::relay::ParticipantId;

/// Every `type` tag this protocol knows
pub const MESSAGE_TYPES: [&str; 6] = [
    "session_info",
    "quiz_start",
    "score_update",
    "quiz_end",
    "answer",
    "leave",
];

#[derive(Debug, Error)]
pub enum ProtocolViolation {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("message has no type tag")]
    MissingType,

    #[error("unknown message type: {0}")]
    UnknownType(String),
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SessionMessage {
    /// Host to guest: full state replica
    SessionInfo(Box<SessionState>),
    /// Host to all: the quiz clock started
    QuizStart(QuizStart),
    /// Host to all: scores and statuses changed
    ScoreUpdate(ScoreUpdate),
    /// Host to all: final standings
    QuizEnd(QuizEnd),
    /// Guest to host
    Answer(AnswerSubmission),
    /// Guest to host
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizStart {
    pub start_timestamp: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreEntry {
    pub id: ParticipantId,
    pub score: u32,
    pub connection_status: ConnectionStatus,
    #[serde(default)]
    pub answers: BTreeMap<usize, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub participants: Vec<ScoreEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizEnd {
    pub standings: Vec<Standing>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerSubmission {
    pub question_index: usize,
    pub answer_index: usize,
    /// Sender's clock, epoch milliseconds
    pub timestamp: u64,
}

/// Outer shape of every message. The payload stays raw until the tag is
/// known, so it is parsed straight from text into its concrete type.
#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default, borrow)]
    payload: Option<&'a RawValue>,
}

fn payload<T: DeserializeOwned>(raw: Option<&RawValue>) -> Result<T, ProtocolViolation> {
    let text = raw.map(RawValue::get).unwrap_or("null");
    Ok(serde_json::from_str(text)?)
}

impl SessionMessage {
    /// Parse a data channel message, telling unknown kinds apart from
    /// malformed ones.
    pub fn decode(text: &str) -> Result<Self, ProtocolViolation> {
        let envelope: Envelope<'_> = serde_json::from_str(text)?;
        let kind = envelope.kind.ok_or(ProtocolViolation::MissingType)?;
        let raw = envelope.payload;

        let message = match kind.as_str() {
            "session_info" => SessionMessage::SessionInfo(Box::new(payload(raw)?)),
            "quiz_start" => SessionMessage::QuizStart(payload(raw)?),
            "score_update" => SessionMessage::ScoreUpdate(payload(raw)?),
            "quiz_end" => SessionMessage::QuizEnd(payload(raw)?),
            "answer" => SessionMessage::Answer(payload(raw)?),
            "leave" => SessionMessage::Leave,
            _ => return Err(ProtocolViolation::UnknownType(kind)),
        };
        Ok(message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SessionMessage::SessionInfo(_) => "session_info",
            SessionMessage::QuizStart(_) => "quiz_start",
            SessionMessage::ScoreUpdate(_) => "score_update",
            SessionMessage::QuizEnd(_) => "quiz_end",
            SessionMessage::Answer(_) => "answer",
            SessionMessage::Leave => "leave",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RoomCode;
    use crate::session::types::{Participant, Quiz};

    #[test]
    fn answer_wire_format() {
        let message = SessionMessage::Answer(AnswerSubmission {
            question_index: 1,
            answer_index: 3,
            timestamp: 1_700_000_000_000,
        });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "answer");
        assert_eq!(json["payload"]["questionIndex"], 1);
        assert_eq!(json["payload"]["answerIndex"], 3);
        assert_eq!(json["payload"]["timestamp"], 1_700_000_000_000u64);
    }

    #[test]
    fn decodes_leave_with_or_without_payload() {
        assert!(matches!(
            SessionMessage::decode(r#"{"type":"leave"}"#).unwrap(),
            SessionMessage::Leave
        ));
        assert!(matches!(
            SessionMessage::decode(r#"{"type":"leave","payload":null}"#).unwrap(),
            SessionMessage::Leave
        ));
    }

    #[test]
    fn decodes_session_info() {
        let mut state = SessionState::new(RoomCode::try_from("abcd1234").unwrap(), Quiz::default(), 20);
        state
            .participants
            .insert(Participant::new(ParticipantId::try_from("peer_1").unwrap(), "Ada", true));
        let text = serde_json::to_string(&SessionMessage::SessionInfo(Box::new(state))).unwrap();

        match SessionMessage::decode(&text).unwrap() {
            SessionMessage::SessionInfo(state) => {
                assert_eq!(state.room_code.as_str(), "abcd1234");
                assert_eq!(state.participants.len(), 1);
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn answered_replicas_decode() {
        let id = ParticipantId::try_from("peer_guest001").unwrap();
        let mut guest = Participant::new(id, "Grace", false);
        guest.answers.insert(0, 1);
        guest.answer_latencies.insert(0, 2000);
        guest.score = 13;

        let update = SessionMessage::ScoreUpdate(ScoreUpdate {
            participants: vec![ScoreEntry {
                id,
                score: 13,
                connection_status: ConnectionStatus::Answered,
                answers: guest.answers.clone(),
            }],
        });
        let text = serde_json::to_string(&update).unwrap();
        assert!(text.contains(r#""answers":{"0":1}"#));
        match SessionMessage::decode(&text).unwrap() {
            SessionMessage::ScoreUpdate(update) => {
                assert_eq!(update.participants[0].answers.get(&0), Some(&1));
                assert_eq!(update.participants[0].score, 13);
            }
            other => panic!("unexpected {}", other.kind()),
        }

        let mut state = SessionState::new(RoomCode::try_from("abcd1234").unwrap(), Quiz::default(), 20);
        state.participants.insert(guest);
        let text = serde_json::to_string(&SessionMessage::SessionInfo(Box::new(state))).unwrap();
        match SessionMessage::decode(&text).unwrap() {
            SessionMessage::SessionInfo(state) => {
                let guest = state.participants.get(&id).unwrap();
                assert_eq!(guest.answers.get(&0), Some(&1));
                assert_eq!(guest.answer_latencies.get(&0), Some(&2000));
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn payload_before_type_decodes() {
        let text = r#"{"payload":{"participants":[{"id":"p","score":3,"connectionStatus":"answered","answers":{"2":0}}]},"type":"score_update"}"#;
        match SessionMessage::decode(text).unwrap() {
            SessionMessage::ScoreUpdate(update) => {
                assert_eq!(update.participants[0].answers.get(&2), Some(&0));
            }
            other => panic!("unexpected {}", other.kind()),
        }
    }

    #[test]
    fn unknown_type_is_reported() {
        let err = SessionMessage::decode(r#"{"type":"chat","payload":{}}"#).unwrap_err();
        assert!(matches!(err, ProtocolViolation::UnknownType(kind) if kind == "chat"));
    }

    #[test]
    fn malformed_messages_are_rejected() {
        assert!(matches!(
            SessionMessage::decode("not json"),
            Err(ProtocolViolation::Malformed(_))
        ));
        assert!(matches!(
            SessionMessage::decode(r#"{"payload":{}}"#),
            Err(ProtocolViolation::MissingType)
        ));
        assert!(matches!(
            SessionMessage::decode(r#"{"type":"answer","payload":{"questionIndex":"x"}}"#),
            Err(ProtocolViolation::Malformed(_))
        ));
    }

    #[test]
    fn every_variant_kind_is_listed() {
        let messages = [
            SessionMessage::QuizStart(QuizStart { start_timestamp: 0 }),
            SessionMessage::ScoreUpdate(ScoreUpdate { participants: vec![] }),
            SessionMessage::QuizEnd(QuizEnd { standings: vec![] }),
            SessionMessage::Leave,
        ];
        for message in messages {
            assert!(MESSAGE_TYPES.contains(&message.kind()));
            let json = serde_json::to_value(&message).unwrap();
            assert_eq!(json["type"], message.kind());
        }
    }
}
