//! Peer connections over WebRTC data channels.
//!
//! Offers and answers travel as serialized session descriptions; local ICE
//! candidates are raised as `ConnectionEvent::LocalCandidate` for the manager
//! to forward. Remote candidates that arrive before the remote description
//! are held back and applied once it is set.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webrtc::api::{API, APIBuilder};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use super::connection::{ConnectionEvent, EventSink, PeerConnection, PeerConnector, lock};
use super::types::{LinkState, TransportError};
use crate::relay::ParticipantId;

pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

const CHANNEL_LABEL: &str = "quiz";

/// Opens WebRTC peer connections against a fixed set of ICE servers
pub struct WebRtcConnector {
    api: Arc<API>,
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    pub fn new(ice_servers: Vec<String>) -> Self {
        Self {
            api: Arc::new(APIBuilder::new().build()),
            ice_servers,
        }
    }
}

impl Default for WebRtcConnector {
    fn default() -> Self {
        Self::new(vec![DEFAULT_STUN_SERVER.to_string()])
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn open(
        &self,
        _local: ParticipantId,
        remote: ParticipantId,
        sink: EventSink,
    ) -> Result<Box<dyn PeerConnection>, TransportError> {
        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let peer_connection = self
            .api
            .new_peer_connection(config)
            .await
            .map(Arc::new)
            .map_err(|e| failure(remote, e))?;

        let shared = Arc::new(Shared {
            sink,
            open: AtomicBool::new(false),
            outbound: Mutex::new(None),
        });
        wire_peer_connection(&peer_connection, &shared);

        Ok(Box::new(WebRtcConnection {
            remote,
            peer_connection,
            shared,
            pending_candidates: Vec::new(),
            remote_described: false,
        }))
    }
}

/// State the data channel callbacks and the connection both touch
struct Shared {
    sink: EventSink,
    open: AtomicBool,
    /// Feeds the channel's writer task; `None` until a channel exists
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

pub struct WebRtcConnection {
    remote: ParticipantId,
    peer_connection: Arc<RTCPeerConnection>,
    shared: Arc<Shared>,
    pending_candidates: Vec<RTCIceCandidateInit>,
    remote_described: bool,
}

#[derive(Deserialize)]
struct Description {
    sdp: String,
}

fn failure(peer: ParticipantId, reason: impl std::fmt::Display) -> TransportError {
    TransportError::ConnectionFailure {
        peer,
        reason: reason.to_string(),
    }
}

fn link_state(state: RTCPeerConnectionState) -> Option<LinkState> {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Connecting => {
            Some(LinkState::Connecting)
        }
        RTCPeerConnectionState::Connected => Some(LinkState::Connected),
        RTCPeerConnectionState::Disconnected => Some(LinkState::Disconnected),
        RTCPeerConnectionState::Failed => Some(LinkState::Failed),
        RTCPeerConnectionState::Closed | RTCPeerConnectionState::Unspecified => None,
    }
}

fn wire_peer_connection(peer_connection: &RTCPeerConnection, shared: &Arc<Shared>) {
    let candidates = shared.clone();
    peer_connection.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let shared = candidates.clone();
        Box::pin(async move {
            // None marks the end of gathering
            let Some(candidate) = candidate else {
                return;
            };
            let init = match candidate.to_json() {
                Ok(init) => init,
                Err(e) => {
                    warn!("Unusable local candidate: {}", e);
                    return;
                }
            };
            match serde_json::to_value(init) {
                Ok(value) => {
                    shared.sink.emit(ConnectionEvent::LocalCandidate(value));
                }
                Err(e) => warn!("Local candidate could not be encoded: {}", e),
            }
        })
    }));

    let states = shared.clone();
    peer_connection.on_peer_connection_state_change(Box::new(
        move |state: RTCPeerConnectionState| {
            let shared = states.clone();
            Box::pin(async move {
                debug!("Peer connection to {} is {}", shared.sink.peer(), state);
                if let Some(state) = link_state(state) {
                    shared.sink.emit(ConnectionEvent::StateChanged(state));
                }
            })
        },
    ));

    let incoming = shared.clone();
    peer_connection.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
        let shared = incoming.clone();
        Box::pin(async move {
            debug!("Data channel '{}' from {}", channel.label(), shared.sink.peer());
            attach_channel(&shared, channel);
        })
    }));
}

/// Routes a data channel's traffic through `shared`. Writes go through a
/// single task so they leave in the order they were queued.
fn attach_channel(shared: &Arc<Shared>, channel: Arc<RTCDataChannel>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    *lock(&shared.outbound) = Some(tx);

    let opened = shared.clone();
    channel.on_open(Box::new(move || {
        Box::pin(async move {
            opened.open.store(true, Ordering::SeqCst);
            opened.sink.emit(ConnectionEvent::ChannelOpen);
        })
    }));

    let closed = shared.clone();
    channel.on_close(Box::new(move || {
        let shared = closed.clone();
        Box::pin(async move {
            if shared.open.swap(false, Ordering::SeqCst) {
                shared.sink.emit(ConnectionEvent::ChannelClosed);
            }
        })
    }));

    let messages = shared.clone();
    channel.on_message(Box::new(move |message: DataChannelMessage| {
        let shared = messages.clone();
        Box::pin(async move {
            if !message.is_string {
                debug!("Dropping binary message from {}", shared.sink.peer());
                return;
            }
            match String::from_utf8(message.data.to_vec()) {
                Ok(text) => {
                    shared.sink.emit(ConnectionEvent::Message(text));
                }
                Err(e) => warn!("Non-UTF-8 text from {}: {}", shared.sink.peer(), e),
            }
        })
    }));

    let peer = shared.sink.peer();
    tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if let Err(e) = channel.send_text(text).await {
                warn!("Write to {} failed: {}", peer, e);
                break;
            }
        }
    });
}

impl WebRtcConnection {
    async fn set_remote(&mut self, description: RTCSessionDescription) -> Result<(), TransportError> {
        self.peer_connection
            .set_remote_description(description)
            .await
            .map_err(|e| failure(self.remote, e))?;
        self.remote_described = true;

        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = self.peer_connection.add_ice_candidate(candidate).await {
                warn!("Held candidate from {} rejected: {}", self.remote, e);
            }
        }
        Ok(())
    }

    fn sdp_of(&self, value: serde_json::Value) -> Result<String, TransportError> {
        serde_json::from_value::<Description>(value)
            .map(|description| description.sdp)
            .map_err(|e| failure(self.remote, format!("malformed session description: {e}")))
    }

    fn encode(&self, description: &RTCSessionDescription) -> Result<serde_json::Value, TransportError> {
        serde_json::to_value(description).map_err(|e| failure(self.remote, e))
    }
}

#[async_trait]
impl PeerConnection for WebRtcConnection {
    async fn create_offer(&mut self) -> Result<serde_json::Value, TransportError> {
        let init = RTCDataChannelInit {
            ordered: Some(true),
            ..Default::default()
        };
        let channel = self
            .peer_connection
            .create_data_channel(CHANNEL_LABEL, Some(init))
            .await
            .map_err(|e| failure(self.remote, e))?;
        attach_channel(&self.shared, channel);

        let offer = self
            .peer_connection
            .create_offer(None)
            .await
            .map_err(|e| failure(self.remote, e))?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await
            .map_err(|e| failure(self.remote, e))?;
        self.encode(&offer)
    }

    async fn accept_offer(
        &mut self,
        offer: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let sdp = self.sdp_of(offer)?;
        let offer = RTCSessionDescription::offer(sdp).map_err(|e| failure(self.remote, e))?;
        self.set_remote(offer).await?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| failure(self.remote, e))?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await
            .map_err(|e| failure(self.remote, e))?;
        self.encode(&answer)
    }

    async fn accept_answer(&mut self, answer: serde_json::Value) -> Result<(), TransportError> {
        let sdp = self.sdp_of(answer)?;
        let answer = RTCSessionDescription::answer(sdp).map_err(|e| failure(self.remote, e))?;
        self.set_remote(answer).await
    }

    async fn add_candidate(&mut self, candidate: serde_json::Value) -> Result<(), TransportError> {
        let candidate: RTCIceCandidateInit = serde_json::from_value(candidate)
            .map_err(|e| failure(self.remote, format!("malformed candidate: {e}")))?;
        if !self.remote_described {
            self.pending_candidates.push(candidate);
            return Ok(());
        }
        self.peer_connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| failure(self.remote, e))
    }

    fn is_channel_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_channel_open() {
            return Err(TransportError::ChannelClosed(self.remote));
        }
        match lock(&self.shared.outbound).as_ref() {
            Some(tx) if tx.send(text.to_string()).is_ok() => Ok(()),
            _ => Err(TransportError::ChannelClosed(self.remote)),
        }
    }

    async fn close(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
        lock(&self.shared.outbound).take();
        self.pending_candidates.clear();
        if let Err(e) = self.peer_connection.close().await {
            debug!("Closing connection to {}: {}", self.remote, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::connection::LinkEvent;

    fn participant(id: &str) -> ParticipantId {
        ParticipantId::try_from(id).unwrap()
    }

    async fn open(
        connector: &WebRtcConnector,
        local: &str,
        remote: &str,
    ) -> (Box<dyn PeerConnection>, mpsc::UnboundedReceiver<LinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(participant(remote), 1, tx);
        let connection = connector
            .open(participant(local), participant(remote), sink)
            .await
            .unwrap();
        (connection, rx)
    }

    #[tokio::test]
    async fn offer_and_answer_are_session_descriptions() {
        let connector = WebRtcConnector::new(Vec::new());
        let (mut host, _host_events) = open(&connector, "host", "guest").await;
        let (mut guest, _guest_events) = open(&connector, "guest", "host").await;

        let offer = host.create_offer().await.unwrap();
        assert_eq!(offer["type"], "offer");
        assert!(offer["sdp"].as_str().unwrap().contains("webrtc-datachannel"));

        let answer = guest.accept_offer(offer).await.unwrap();
        assert_eq!(answer["type"], "answer");
        host.accept_answer(answer).await.unwrap();

        assert!(!host.is_channel_open());
        assert!(matches!(
            host.send_text("early"),
            Err(TransportError::ChannelClosed(_))
        ));

        host.close().await;
        guest.close().await;
    }

    #[tokio::test]
    async fn candidates_wait_for_the_remote_description() {
        let connector = WebRtcConnector::new(Vec::new());
        let (mut guest, _events) = open(&connector, "guest", "host").await;

        let candidate = serde_json::json!({
            "candidate": "candidate:1 1 udp 2130706431 127.0.0.1 50000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
        });
        guest.add_candidate(candidate).await.unwrap();

        let malformed = guest.add_candidate(serde_json::json!("nope")).await;
        assert!(matches!(
            malformed,
            Err(TransportError::ConnectionFailure { .. })
        ));
        guest.close().await;
    }

    #[tokio::test]
    async fn garbage_offer_is_refused() {
        let connector = WebRtcConnector::new(Vec::new());
        let (mut guest, _events) = open(&connector, "guest", "host").await;

        let result = guest.accept_offer(serde_json::json!({ "token": 3 })).await;
        assert!(matches!(
            result,
            Err(TransportError::ConnectionFailure { .. })
        ));
        guest.close().await;
    }

    #[test]
    fn closed_state_is_not_reported() {
        assert_eq!(link_state(RTCPeerConnectionState::Closed), None);
        assert_eq!(
            link_state(RTCPeerConnectionState::Failed),
            Some(LinkState::Failed)
        );
        assert_eq!(
            link_state(RTCPeerConnectionState::New),
            Some(LinkState::Connecting)
        );
    }
}
