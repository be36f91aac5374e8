//! In-process peer connections.
//!
//! Offers and answers carry a token that pairs two endpoints registered with
//! the same `LoopbackNetwork`. Data written on one endpoint is delivered as a
//! `ConnectionEvent::Message` to the other side's manager. Marking a
//! participant unreachable fails its live links and any new attempt to or
//! from it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use super::connection::{ConnectionEvent, EventSink, PeerConnection, PeerConnector, lock};
use super::types::{LinkState, TransportError};
use crate::relay::ParticipantId;

#[derive(Default)]
struct NetworkState {
    next_token: u64,
    offers: HashMap<u64, PendingOffer>,
    unreachable: HashSet<ParticipantId>,
    /// Every endpoint opened so far, by owner
    endpoints: Vec<(ParticipantId, Weak<Endpoint>)>,
}

impl NetworkState {
    fn blocked(&self, a: &ParticipantId, b: &ParticipantId) -> bool {
        self.unreachable.contains(a) || self.unreachable.contains(b)
    }
}

struct PendingOffer {
    initiator: ParticipantId,
    responder: ParticipantId,
    endpoint: Arc<Endpoint>,
}

struct Endpoint {
    sink: EventSink,
    open: AtomicBool,
    remote: Mutex<Weak<Endpoint>>,
}

impl Endpoint {
    fn remote(&self) -> Option<Arc<Endpoint>> {
        lock(&self.remote).upgrade()
    }

    fn fail(&self) {
        *lock(&self.remote) = Weak::new();
        if self.open.swap(false, Ordering::SeqCst) {
            self.sink.emit(ConnectionEvent::ChannelClosed);
        }
        self.sink
            .emit(ConnectionEvent::StateChanged(LinkState::Failed));
    }
}

/// Shared switchboard for loopback connections
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    /// Connections to or from an unreachable participant fail right after
    /// the offer, and its live links fail at once
    pub fn set_unreachable(&self, peer: ParticipantId, unreachable: bool) {
        let severed: Vec<Arc<Endpoint>> = {
            let mut state = lock(&self.inner);
            if !unreachable {
                state.unreachable.remove(&peer);
                return;
            }
            state.unreachable.insert(peer);
            state.endpoints.retain(|(_, endpoint)| endpoint.strong_count() > 0);
            state
                .endpoints
                .iter()
                .filter_map(|(owner, endpoint)| Some((*owner, endpoint.upgrade()?)))
                .filter(|(owner, endpoint)| *owner == peer || endpoint.sink.peer() == peer)
                .map(|(_, endpoint)| endpoint)
                .collect()
        };
        for endpoint in severed {
            endpoint.fail();
        }
    }
}

#[async_trait]
impl PeerConnector for LoopbackNetwork {
    async fn open(
        &self,
        local: ParticipantId,
        remote: ParticipantId,
        sink: EventSink,
    ) -> Result<Box<dyn PeerConnection>, TransportError> {
        let endpoint = Arc::new(Endpoint {
            sink,
            open: AtomicBool::new(false),
            remote: Mutex::new(Weak::new()),
        });
        lock(&self.inner)
            .endpoints
            .push((local, Arc::downgrade(&endpoint)));
        Ok(Box::new(LoopbackConnection {
            network: self.clone(),
            local,
            remote,
            endpoint,
            token: None,
        }))
    }
}

pub struct LoopbackConnection {
    network: LoopbackNetwork,
    local: ParticipantId,
    remote: ParticipantId,
    endpoint: Arc<Endpoint>,
    token: Option<u64>,
}

impl LoopbackConnection {
    fn failure(&self, reason: &str) -> TransportError {
        TransportError::ConnectionFailure {
            peer: self.remote,
            reason: reason.to_string(),
        }
    }

    fn token_of(value: &serde_json::Value) -> Option<u64> {
        value.get("token").and_then(serde_json::Value::as_u64)
    }

    fn mark_open(&self) {
        self.endpoint.open.store(true, Ordering::SeqCst);
        self.endpoint
            .sink
            .emit(ConnectionEvent::StateChanged(LinkState::Connected));
        self.endpoint.sink.emit(ConnectionEvent::ChannelOpen);
    }
}

#[async_trait]
impl PeerConnection for LoopbackConnection {
    async fn create_offer(&mut self) -> Result<serde_json::Value, TransportError> {
        let sink = &self.endpoint.sink;
        sink.emit(ConnectionEvent::StateChanged(LinkState::Connecting));

        let token = {
            let mut state = lock(&self.network.inner);
            if state.blocked(&self.local, &self.remote) {
                None
            } else {
                let token = state.next_token;
                state.next_token += 1;
                state.offers.insert(
                    token,
                    PendingOffer {
                        initiator: self.local,
                        responder: self.remote,
                        endpoint: self.endpoint.clone(),
                    },
                );
                Some(token)
            }
        };

        let Some(token) = token else {
            debug!("{} is unreachable from {}", self.remote, self.local);
            sink.emit(ConnectionEvent::StateChanged(LinkState::Failed));
            return Ok(json!({ "unreachable": true }));
        };

        self.token = Some(token);
        sink.emit(ConnectionEvent::LocalCandidate(json!({
            "token": token,
            "address": format!("loopback:{}", self.local),
        })));
        Ok(json!({ "token": token }))
    }

    async fn accept_offer(
        &mut self,
        offer: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        let token = Self::token_of(&offer).ok_or_else(|| self.failure("offer carries no token"))?;
        let pending = {
            let mut state = lock(&self.network.inner);
            if state.blocked(&self.local, &self.remote) {
                return Err(self.failure("peer unreachable"));
            }
            state.offers.remove(&token)
        }
        .ok_or_else(|| self.failure("offer expired"))?;
        if pending.initiator != self.remote || pending.responder != self.local {
            return Err(self.failure("offer addressed to another participant"));
        }

        *lock(&self.endpoint.remote) = Arc::downgrade(&pending.endpoint);
        *lock(&pending.endpoint.remote) = Arc::downgrade(&self.endpoint);
        self.token = Some(token);
        self.mark_open();

        Ok(json!({ "token": token }))
    }

    async fn accept_answer(&mut self, answer: serde_json::Value) -> Result<(), TransportError> {
        if Self::token_of(&answer) != self.token || self.token.is_none() {
            return Err(self.failure("answer does not match offer"));
        }
        if self.endpoint.remote().is_none() {
            return Err(self.failure("remote endpoint is gone"));
        }
        self.mark_open();
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: serde_json::Value) -> Result<(), TransportError> {
        match Self::token_of(&candidate) {
            Some(_) => Ok(()),
            None => Err(self.failure("malformed candidate")),
        }
    }

    fn is_channel_open(&self) -> bool {
        self.endpoint.open.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if !self.is_channel_open() {
            return Err(TransportError::ChannelClosed(self.remote));
        }
        let remote = self
            .endpoint
            .remote()
            .ok_or(TransportError::ChannelClosed(self.remote))?;
        if remote.sink.emit(ConnectionEvent::Message(text.to_string())) {
            Ok(())
        } else {
            Err(TransportError::ChannelClosed(self.remote))
        }
    }

    async fn close(&mut self) {
        self.endpoint.open.store(false, Ordering::SeqCst);
        if let Some(token) = self.token.take() {
            lock(&self.network.inner).offers.remove(&token);
        }

        let remote = std::mem::take(&mut *lock(&self.endpoint.remote)).upgrade();
        if let Some(remote) = remote {
            *lock(&remote.remote) = Weak::new();
            if remote.open.swap(false, Ordering::SeqCst) {
                remote.sink.emit(ConnectionEvent::ChannelClosed);
            }
            remote
                .sink
                .emit(ConnectionEvent::StateChanged(LinkState::Disconnected));
        }
    }
}
