//! Client side of the room registry: create/join/leave/start/end

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::http::{HttpFailure, build_client, endpoint};
use crate::relay::{
    CreateRoomRequest, CreateRoomResponse, HostRequest, JoinRoomRequest, LeaveRoomRequest,
    ParticipantId, RelayError, RelayHandle, RoomCode, RoomParticipant, RoomSnapshot,
};

/// Registry errors. `RoomNotFound` and `RoomFull` are user-facing and never retried.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("room not found")]
    RoomNotFound,

    #[error("room is full")]
    RoomFull,

    #[error("registry rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("registry request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("quiz payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<RelayError> for RegistryError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::RoomNotFound(_) => RegistryError::RoomNotFound,
            RelayError::RoomFull(_) => RegistryError::RoomFull,
            other => RegistryError::Rejected {
                status: other.status(),
                message: other.to_string(),
            },
        }
    }
}

impl From<HttpFailure> for RegistryError {
    fn from(failure: HttpFailure) -> Self {
        if failure.status == 404 {
            return RegistryError::RoomNotFound;
        }
        match failure.code.as_deref() {
            Some("ROOM_NOT_FOUND") => RegistryError::RoomNotFound,
            Some("ROOM_FULL") => RegistryError::RoomFull,
            _ => RegistryError::Rejected {
                status: failure.status,
                message: failure.message,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatedRoom {
    pub code: RoomCode,
    pub participants: Vec<RoomParticipant>,
}

/// Stateless room lifecycle API
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn create_room(
        &self,
        host_id: ParticipantId,
        host_name: &str,
        quiz_data: serde_json::Value,
        seconds_per_question: u32,
    ) -> Result<CreatedRoom, RegistryError>;

    async fn get_room(&self, code: RoomCode) -> Result<RoomSnapshot, RegistryError>;

    async fn join_room(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
        name: &str,
    ) -> Result<RoomSnapshot, RegistryError>;

    async fn leave_room(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> Result<(), RegistryError>;

    async fn start_room(&self, code: RoomCode, host_id: ParticipantId) -> Result<(), RegistryError>;

    async fn end_room(&self, code: RoomCode, host_id: ParticipantId) -> Result<(), RegistryError>;
}

/// Registry client speaking the `/rooms` HTTP surface
#[derive(Clone)]
pub struct HttpRoomRegistry {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRoomRegistry {
    pub fn new(base_url: impl Into<String>) -> Result<Self, RegistryError> {
        Ok(Self {
            base_url: base_url.into(),
            client: build_client()?,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(HttpFailure::from_response(response).await.into())
        }
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, RegistryError> {
        debug!("POST {}", path);
        let response = self
            .client
            .post(endpoint(&self.base_url, path))
            .json(body)
            .send()
            .await?;
        Self::check(response).await
    }
}

#[async_trait]
impl RoomDirectory for HttpRoomRegistry {
    async fn create_room(
        &self,
        host_id: ParticipantId,
        host_name: &str,
        quiz_data: serde_json::Value,
        seconds_per_question: u32,
    ) -> Result<CreatedRoom, RegistryError> {
        let body = CreateRoomRequest {
            host_id,
            host_name: host_name.to_string(),
            quiz_data,
            seconds_per_question,
        };
        let created: CreateRoomResponse = self.post("/rooms", &body).await?.json().await?;
        Ok(CreatedRoom {
            code: created.code,
            participants: created.participants,
        })
    }

    async fn get_room(&self, code: RoomCode) -> Result<RoomSnapshot, RegistryError> {
        let url = endpoint(&self.base_url, &format!("/rooms/{}", code));
        let response = Self::check(self.client.get(url).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn join_room(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
        name: &str,
    ) -> Result<RoomSnapshot, RegistryError> {
        let body = JoinRoomRequest {
            participant_id,
            name: name.to_string(),
        };
        let path = format!("/rooms/{}/join", code);
        Ok(self.post(&path, &body).await?.json().await?)
    }

    async fn leave_room(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> Result<(), RegistryError> {
        let path = format!("/rooms/{}/leave", code);
        self.post(&path, &LeaveRoomRequest { participant_id }).await?;
        Ok(())
    }

    async fn start_room(&self, code: RoomCode, host_id: ParticipantId) -> Result<(), RegistryError> {
        let path = format!("/rooms/{}/start", code);
        self.post(&path, &HostRequest { host_id }).await?;
        Ok(())
    }

    async fn end_room(&self, code: RoomCode, host_id: ParticipantId) -> Result<(), RegistryError> {
        let url = endpoint(&self.base_url, &format!("/rooms/{}", code));
        let response = self
            .client
            .delete(url)
            .json(&HostRequest { host_id })
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

/// In-process registry backed by the relay actor
#[async_trait]
impl RoomDirectory for RelayHandle {
    async fn create_room(
        &self,
        host_id: ParticipantId,
        host_name: &str,
        quiz_data: serde_json::Value,
        seconds_per_question: u32,
    ) -> Result<CreatedRoom, RegistryError> {
        let snapshot = RelayHandle::create_room(
            self,
            host_id,
            host_name.to_string(),
            quiz_data,
            seconds_per_question,
        )
        .await?;
        Ok(CreatedRoom {
            code: snapshot.code,
            participants: snapshot.participants,
        })
    }

    async fn get_room(&self, code: RoomCode) -> Result<RoomSnapshot, RegistryError> {
        Ok(RelayHandle::get_room(self, code).await?)
    }

    async fn join_room(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
        name: &str,
    ) -> Result<RoomSnapshot, RegistryError> {
        Ok(RelayHandle::join_room(self, code, participant_id, name.to_string()).await?)
    }

    async fn leave_room(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> Result<(), RegistryError> {
        Ok(RelayHandle::leave_room(self, code, participant_id).await?)
    }

    async fn start_room(&self, code: RoomCode, host_id: ParticipantId) -> Result<(), RegistryError> {
        Ok(RelayHandle::start_room(self, code, host_id).await?)
    }

    async fn end_room(&self, code: RoomCode, host_id: ParticipantId) -> Result<(), RegistryError> {
        Ok(self.delete_room(code, host_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{MAX_ROOM_PARTICIPANTS, RelayServer, RoomStatus};

    async fn spawn_server() -> HttpRoomRegistry {
        let server = RelayServer::new();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });
        HttpRoomRegistry::new(format!("http://{}", addr)).unwrap()
    }

    #[tokio::test]
    async fn http_room_lifecycle() {
        let registry = spawn_server().await;
        let host = ParticipantId::try_from("peer_host0001").unwrap();
        let guest = ParticipantId::try_from("peer_guest001").unwrap();

        let created = registry
            .create_room(host, "Ada", serde_json::json!({"title": "Rust"}), 30)
            .await
            .unwrap();
        assert_eq!(created.participants.len(), 1);

        let joined = registry.join_room(created.code, guest, "Grace").await.unwrap();
        assert_eq!(joined.participants.len(), 2);
        assert_eq!(joined.quiz_data["title"], "Rust");

        registry.start_room(created.code, host).await.unwrap();
        let room = registry.get_room(created.code).await.unwrap();
        assert_eq!(room.status, RoomStatus::Playing);

        registry.leave_room(created.code, guest).await.unwrap();
        registry.end_room(created.code, host).await.unwrap();
        assert!(matches!(
            registry.get_room(created.code).await,
            Err(RegistryError::RoomNotFound)
        ));
    }

    #[tokio::test]
    async fn http_join_unknown_room_maps_to_room_not_found() {
        let registry = spawn_server().await;
        let err = registry
            .join_room(RoomCode::try_from("nope1234").unwrap(), ParticipantId::generate(), "x")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::RoomNotFound));
    }

    #[tokio::test]
    async fn room_full_is_surfaced() {
        let relay = RelayHandle::spawn();
        let registry: &dyn RoomDirectory = &relay;
        let created = registry
            .create_room(ParticipantId::try_from("h").unwrap(), "H", serde_json::Value::Null, 10)
            .await
            .unwrap();
        for i in 1..MAX_ROOM_PARTICIPANTS {
            registry
                .join_room(created.code, ParticipantId::try_from(format!("g{}", i).as_str()).unwrap(), "g")
                .await
                .unwrap();
        }
        let err = registry
            .join_room(created.code, ParticipantId::try_from("late").unwrap(), "late")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::RoomFull));
    }

    #[test]
    fn http_failure_codes_map_to_conditions() {
        let full = HttpFailure {
            status: 409,
            code: Some("ROOM_FULL".to_string()),
            message: "room is full".to_string(),
        };
        assert!(matches!(RegistryError::from(full), RegistryError::RoomFull));

        let missing = HttpFailure {
            status: 404,
            code: None,
            message: "request failed with status 404".to_string(),
        };
        assert!(matches!(RegistryError::from(missing), RegistryError::RoomNotFound));

        let other = HttpFailure {
            status: 500,
            code: None,
            message: "boom".to_string(),
        };
        assert!(matches!(
            RegistryError::from(other),
            RegistryError::Rejected { status: 500, .. }
        ));
    }
}
