use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::types::{LinkState, TransportError};
use crate::relay::ParticipantId;

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Notifications raised by a peer connection
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// A local network candidate to forward to the remote peer
    LocalCandidate(serde_json::Value),
    StateChanged(LinkState),
    ChannelOpen,
    ChannelClosed,
    /// Text received on the data channel
    Message(String),
}

#[derive(Debug)]
pub(crate) struct LinkEvent {
    pub peer: ParticipantId,
    pub epoch: u64,
    pub event: ConnectionEvent,
}

/// Where a connection reports its events. Tagged with the link it belongs to,
/// so events from a torn-down connection can be told apart.
#[derive(Debug, Clone)]
pub struct EventSink {
    peer: ParticipantId,
    epoch: u64,
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl EventSink {
    pub(crate) fn new(peer: ParticipantId, epoch: u64, tx: mpsc::UnboundedSender<LinkEvent>) -> Self {
        Self { peer, epoch, tx }
    }

    /// The remote participant this sink's link points at
    pub fn peer(&self) -> ParticipantId {
        self.peer
    }

    /// Returns false once the owning manager is gone
    pub fn emit(&self, event: ConnectionEvent) -> bool {
        self.tx
            .send(LinkEvent {
                peer: self.peer,
                epoch: self.epoch,
                event,
            })
            .is_ok()
    }
}

/// Factory for peer connections
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn open(
        &self,
        local: ParticipantId,
        remote: ParticipantId,
        sink: EventSink,
    ) -> Result<Box<dyn PeerConnection>, TransportError>;
}

/// One connection-oriented transport plus its reliable ordered data channel
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Create the data channel locally and produce an offer
    async fn create_offer(&mut self) -> Result<serde_json::Value, TransportError>;

    /// Apply a remote offer and produce the answer
    async fn accept_offer(
        &mut self,
        offer: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError>;

    async fn accept_answer(&mut self, answer: serde_json::Value) -> Result<(), TransportError>;

    async fn add_candidate(&mut self, candidate: serde_json::Value) -> Result<(), TransportError>;

    fn is_channel_open(&self) -> bool;

    fn send_text(&self, text: &str) -> Result<(), TransportError>;

    async fn close(&mut self);
}
