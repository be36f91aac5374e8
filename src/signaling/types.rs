use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::relay::{ParticipantId, RelayError};

/// Signaling client errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("relay request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("relay returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("relay rejected request: {0}")]
    Rejected(#[from] RelayError),
}

/// Connection-bootstrap message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Offer,
    Answer,
    Candidate,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalKind::Offer => "offer",
            SignalKind::Answer => "answer",
            SignalKind::Candidate => "candidate",
        })
    }
}

/// A message in transit through the relay. Consumed once by the poll loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    pub from_id: ParticipantId,
    pub to_id: ParticipantId,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub payload: serde_json::Value,
    /// Assigned by the relay on receipt
    #[serde(default)]
    pub sequence_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_relay_message() {
        let json = r#"{
            "fromId": "peer_aaaa0001",
            "toId": "peer_bbbb0002",
            "type": "candidate",
            "payload": {"candidate": "loopback:1"},
            "sequenceId": 7
        }"#;
        let msg: SignalingMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.kind, SignalKind::Candidate);
        assert_eq!(msg.from_id.as_str(), "peer_aaaa0001");
        assert_eq!(msg.sequence_id, 7);
    }

    #[test]
    fn sequence_id_defaults_to_zero() {
        let json = r#"{"fromId":"a","toId":"b","type":"offer","payload":null}"#;
        let msg: SignalingMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.sequence_id, 0);
        assert_eq!(msg.kind, SignalKind::Offer);
    }

    #[test]
    fn kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&SignalKind::Answer).unwrap(), "\"answer\"");
        assert_eq!(SignalKind::Candidate.to_string(), "candidate");
    }
}
