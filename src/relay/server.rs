use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::actor::RelayHandle;
use super::messages::{
    Ack, CreateRoomRequest, CreateRoomResponse, ErrorBody, HostRequest, JoinRoomRequest,
    LeaveRoomRequest, PeersResponse, SignalRequest, SignalsResponse,
};
use super::types::{ParticipantId, RelayError, RoomCode, RoomSnapshot};

pub const DEFAULT_RELAY_PORT: u16 = 8787;

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            warn!("Relay error: {}", self);
        }
        (status, Json(ErrorBody::from(&self))).into_response()
    }
}

/// HTTP front for the signaling relay and room registry
pub struct RelayServer {
    handle: RelayHandle,
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayServer {
    pub fn new() -> Self {
        Self {
            handle: RelayHandle::spawn(),
        }
    }

    pub fn handle(&self) -> RelayHandle {
        self.handle.clone()
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/signal", post(post_signal))
            .route("/signal/:room/:participant", get(take_signals))
            .route("/signal/:room/:participant/peers", get(list_peers))
            .route("/rooms", post(create_room))
            .route("/rooms/:code", get(get_room).delete(delete_room))
            .route("/rooms/:code/join", post(join_room))
            .route("/rooms/:code/leave", post(leave_room))
            .route("/rooms/:code/start", post(start_room))
            .with_state(self.handle.clone())
    }

    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        info!("Relay listening on {}", listener.local_addr()?);
        axum::serve(listener, self.router()).await
    }
}

async fn post_signal(
    State(relay): State<RelayHandle>,
    Json(body): Json<SignalRequest>,
) -> Result<Json<Ack>, RelayError> {
    let code = body.room_code;
    relay.post_signal(code, body.into_message()).await?;
    Ok(Json(Ack { ok: true }))
}

async fn take_signals(
    State(relay): State<RelayHandle>,
    Path((room, participant)): Path<(String, String)>,
) -> Result<Json<SignalsResponse>, RelayError> {
    let messages = relay
        .take_signals(
            RoomCode::try_from(room.as_str())?,
            ParticipantId::try_from(participant.as_str())?,
        )
        .await?;
    Ok(Json(SignalsResponse { messages }))
}

async fn list_peers(
    State(relay): State<RelayHandle>,
    Path((room, participant)): Path<(String, String)>,
) -> Result<Json<PeersResponse>, RelayError> {
    let peers = relay
        .peers(
            RoomCode::try_from(room.as_str())?,
            ParticipantId::try_from(participant.as_str())?,
        )
        .await?;
    Ok(Json(PeersResponse { peers }))
}

async fn create_room(
    State(relay): State<RelayHandle>,
    Json(body): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), RelayError> {
    if body.seconds_per_question == 0 {
        return Err(RelayError::InvalidRequest(
            "secondsPerQuestion must be positive".to_string(),
        ));
    }
    let snapshot = relay
        .create_room(
            body.host_id,
            body.host_name,
            body.quiz_data,
            body.seconds_per_question,
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateRoomResponse {
            code: snapshot.code,
            participants: snapshot.participants,
        }),
    ))
}

async fn get_room(
    State(relay): State<RelayHandle>,
    Path(code): Path<String>,
) -> Result<Json<RoomSnapshot>, RelayError> {
    Ok(Json(relay.get_room(RoomCode::try_from(code.as_str())?).await?))
}

async fn join_room(
    State(relay): State<RelayHandle>,
    Path(code): Path<String>,
    Json(body): Json<JoinRoomRequest>,
) -> Result<Json<RoomSnapshot>, RelayError> {
    let snapshot = relay
        .join_room(RoomCode::try_from(code.as_str())?, body.participant_id, body.name)
        .await?;
    Ok(Json(snapshot))
}

async fn leave_room(
    State(relay): State<RelayHandle>,
    Path(code): Path<String>,
    Json(body): Json<LeaveRoomRequest>,
) -> Result<Json<Ack>, RelayError> {
    relay
        .leave_room(RoomCode::try_from(code.as_str())?, body.participant_id)
        .await?;
    Ok(Json(Ack { ok: true }))
}

async fn start_room(
    State(relay): State<RelayHandle>,
    Path(code): Path<String>,
    Json(body): Json<HostRequest>,
) -> Result<Json<Ack>, RelayError> {
    relay
        .start_room(RoomCode::try_from(code.as_str())?, body.host_id)
        .await?;
    Ok(Json(Ack { ok: true }))
}

async fn delete_room(
    State(relay): State<RelayHandle>,
    Path(code): Path<String>,
    Json(body): Json<HostRequest>,
) -> Result<Json<Ack>, RelayError> {
    relay
        .delete_room(RoomCode::try_from(code.as_str())?, body.host_id)
        .await?;
    Ok(Json(Ack { ok: true }))
}
