use async_trait::async_trait;

use super::types::{SignalingError, SignalingMessage};
use crate::http::{HttpFailure, build_client, endpoint};
use crate::relay::{ParticipantId, PeersResponse, RelayHandle, RoomCode, SignalRequest, SignalsResponse};

/// Store-and-forward relay reachable only by request/response
#[async_trait]
pub trait SignalRelay: Send + Sync {
    async fn post_signal(
        &self,
        room: RoomCode,
        message: SignalingMessage,
    ) -> Result<(), SignalingError>;

    /// Messages destined for `participant`, removed from the relay on read
    async fn fetch_signals(
        &self,
        room: RoomCode,
        participant: ParticipantId,
    ) -> Result<Vec<SignalingMessage>, SignalingError>;

    async fn fetch_peers(
        &self,
        room: RoomCode,
        participant: ParticipantId,
    ) -> Result<Vec<ParticipantId>, SignalingError>;
}

/// Relay client speaking the `/signal` HTTP surface
#[derive(Clone)]
pub struct HttpSignalRelay {
    base_url: String,
    client: reqwest::Client,
}

impl HttpSignalRelay {
    pub fn new(base_url: impl Into<String>) -> Result<Self, SignalingError> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_client()?,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, SignalingError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let failure = HttpFailure::from_response(response).await;
        Err(SignalingError::Status {
            status: failure.status,
            message: failure.message,
        })
    }
}

#[async_trait]
impl SignalRelay for HttpSignalRelay {
    async fn post_signal(
        &self,
        room: RoomCode,
        message: SignalingMessage,
    ) -> Result<(), SignalingError> {
        let body = SignalRequest {
            room_code: room,
            from_id: message.from_id,
            to_id: message.to_id,
            kind: message.kind,
            payload: message.payload,
        };
        let response = self
            .client
            .post(endpoint(&self.base_url, "/signal"))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn fetch_signals(
        &self,
        room: RoomCode,
        participant: ParticipantId,
    ) -> Result<Vec<SignalingMessage>, SignalingError> {
        let url = endpoint(&self.base_url, &format!("/signal/{}/{}", room, participant));
        let response = Self::check(self.client.get(url).send().await?).await?;
        let body: SignalsResponse = response.json().await?;
        Ok(body.messages)
    }

    async fn fetch_peers(
        &self,
        room: RoomCode,
        participant: ParticipantId,
    ) -> Result<Vec<ParticipantId>, SignalingError> {
        let url = endpoint(
            &self.base_url,
            &format!("/signal/{}/{}/peers", room, participant),
        );
        let response = Self::check(self.client.get(url).send().await?).await?;
        let body: PeersResponse = response.json().await?;
        Ok(body.peers)
    }
}

/// In-process relay: skips HTTP entirely
#[async_trait]
impl SignalRelay for RelayHandle {
    async fn post_signal(
        &self,
        room: RoomCode,
        message: SignalingMessage,
    ) -> Result<(), SignalingError> {
        Ok(RelayHandle::post_signal(self, room, message).await?)
    }

    async fn fetch_signals(
        &self,
        room: RoomCode,
        participant: ParticipantId,
    ) -> Result<Vec<SignalingMessage>, SignalingError> {
        Ok(self.take_signals(room, participant).await?)
    }

    async fn fetch_peers(
        &self,
        room: RoomCode,
        participant: ParticipantId,
    ) -> Result<Vec<ParticipantId>, SignalingError> {
        Ok(self.peers(room, participant).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayServer;
    use crate::signaling::SignalKind;

    async fn spawn_server() -> (String, RelayHandle) {
        let server = RelayServer::new();
        let handle = server.handle();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
        (format!("http://{}", addr), handle)
    }

    #[tokio::test]
    async fn http_relay_posts_and_drains() {
        let (base_url, handle) = spawn_server().await;
        let a = ParticipantId::try_from("peer_aaaa0001").unwrap();
        let b = ParticipantId::try_from("peer_bbbb0002").unwrap();
        let room = handle
            .create_room(a, "A".into(), serde_json::Value::Null, 30)
            .await
            .unwrap()
            .code;
        handle.join_room(room, b, "B".into()).await.unwrap();

        let relay = HttpSignalRelay::new(base_url).unwrap();
        let offer = SignalingMessage {
            from_id: a,
            to_id: b,
            kind: SignalKind::Offer,
            payload: serde_json::json!({"sdp": "x"}),
            sequence_id: 0,
        };
        SignalRelay::post_signal(&relay, room, offer).await.unwrap();

        let messages = relay.fetch_signals(room, b).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].from_id, a);
        assert_eq!(messages[0].payload["sdp"], "x");
        assert_eq!(relay.fetch_peers(room, b).await.unwrap(), vec![a]);
    }

    #[tokio::test]
    async fn http_relay_surfaces_relay_error_message() {
        let (base_url, _handle) = spawn_server().await;
        let relay = HttpSignalRelay::new(base_url).unwrap();

        let err = relay
            .fetch_signals(RoomCode::try_from("gone1234").unwrap(), ParticipantId::try_from("x").unwrap())
            .await
            .unwrap_err();
        match err {
            SignalingError::Status { status, message } => {
                assert_eq!(status, 404);
                assert!(message.contains("gone1234"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
