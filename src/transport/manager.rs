use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionEvent, EventSink, LinkEvent, PeerConnection, PeerConnector};
use super::types::{DisconnectReason, LinkState, TransportConfig, TransportEvent};
use crate::relay::{ParticipantId, RoomCode};
use crate::signaling::{SignalKind, SignalRelay, SignalingChannel, SignalingMessage};

/// Commands sent to the transport actor
pub(crate) enum ManagerCommand {
    Connect {
        peer: ParticipantId,
        reply: oneshot::Sender<()>,
    },
    Send {
        peer: ParticipantId,
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Broadcast {
        text: String,
        reply: oneshot::Sender<usize>,
    },
    ConnectedPeers {
        reply: oneshot::Sender<Vec<ParticipantId>>,
    },
    TrackedPeers {
        reply: oneshot::Sender<Vec<ParticipantId>>,
    },
    LinkState {
        peer: ParticipantId,
        reply: oneshot::Sender<Option<LinkState>>,
    },
    Disconnect {
        peer: ParticipantId,
        reply: oneshot::Sender<()>,
    },
    DisconnectAll {
        reply: oneshot::Sender<()>,
    },
    Destroy {
        reply: oneshot::Sender<()>,
    },
}

struct PeerLink {
    connection: Box<dyn PeerConnection>,
    state: LinkState,
    epoch: u64,
    initiator: bool,
}

struct TransportActor {
    local_id: ParticipantId,
    config: TransportConfig,
    connector: Arc<dyn PeerConnector>,
    signaling: SignalingChannel,
    /// At most one link per remote participant
    links: HashMap<ParticipantId, PeerLink>,
    attempts: HashMap<ParticipantId, u32>,
    reconnect_timers: HashMap<ParticipantId, JoinHandle<()>>,
    next_epoch: u64,
    destroyed: bool,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    reconnect_tx: mpsc::UnboundedSender<ParticipantId>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl TransportActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ManagerCommand>,
        mut signals: mpsc::UnboundedReceiver<SignalingMessage>,
        mut link_rx: mpsc::UnboundedReceiver<LinkEvent>,
        mut reconnect_rx: mpsc::UnboundedReceiver<ParticipantId>,
    ) {
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle_command(cmd).await {
                            break;
                        }
                    }
                    None => {
                        self.destroy().await;
                        break;
                    }
                },
                Some(signal) = signals.recv() => self.handle_signal(signal).await,
                Some(event) = link_rx.recv() => self.handle_link_event(event).await,
                Some(peer) = reconnect_rx.recv() => self.reconnect(peer).await,
            }
        }
        debug!("Transport for {} stopped", self.local_id);
    }

    /// Returns false once the actor should stop
    async fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
        match cmd {
            ManagerCommand::Connect { peer, reply } => {
                self.connect(peer).await;
                let _ = reply.send(());
            }
            ManagerCommand::Send { peer, text, reply } => {
                let _ = reply.send(self.send(&peer, &text));
            }
            ManagerCommand::Broadcast { text, reply } => {
                let sent = self
                    .links
                    .keys()
                    .filter(|peer| self.send(peer, &text))
                    .count();
                let _ = reply.send(sent);
            }
            ManagerCommand::ConnectedPeers { reply } => {
                let peers = self
                    .links
                    .iter()
                    .filter(|(_, link)| link.state == LinkState::Connected)
                    .map(|(peer, _)| *peer)
                    .collect();
                let _ = reply.send(peers);
            }
            ManagerCommand::TrackedPeers { reply } => {
                let _ = reply.send(self.links.keys().copied().collect());
            }
            ManagerCommand::LinkState { peer, reply } => {
                let _ = reply.send(self.links.get(&peer).map(|link| link.state));
            }
            ManagerCommand::Disconnect { peer, reply } => {
                self.disconnect(peer).await;
                let _ = reply.send(());
            }
            ManagerCommand::DisconnectAll { reply } => {
                self.disconnect_all().await;
                let _ = reply.send(());
            }
            ManagerCommand::Destroy { reply } => {
                self.destroy().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn next_sink(&mut self, peer: ParticipantId) -> (EventSink, u64) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        (EventSink::new(peer, epoch, self.link_tx.clone()), epoch)
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Initiator path
    async fn connect(&mut self, peer: ParticipantId) {
        if self.destroyed || peer == self.local_id {
            return;
        }
        if self.links.contains_key(&peer) {
            debug!("Already linked to {}", peer);
            return;
        }

        let (sink, epoch) = self.next_sink(peer);
        let mut connection = match self.connector.open(self.local_id, peer, sink).await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("Could not open connection to {}: {}", peer, e);
                self.handle_failure(peer).await;
                return;
            }
        };
        let offer = match connection.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Could not create offer for {}: {}", peer, e);
                connection.close().await;
                self.handle_failure(peer).await;
                return;
            }
        };

        self.links.insert(
            peer,
            PeerLink {
                connection,
                state: LinkState::Connecting,
                epoch,
                initiator: true,
            },
        );
        info!("Offering connection to {}", peer);

        if let Err(e) = self.signaling.send_offer(peer, offer).await {
            warn!("Offer to {} not delivered: {}", peer, e);
            self.handle_failure(peer).await;
        }
    }

    /// Responder path
    async fn accept_offer(&mut self, peer: ParticipantId, offer: serde_json::Value) {
        let replaced = match self.links.get(&peer) {
            Some(link) => {
                let colliding = link.initiator && link.state == LinkState::Connecting;
                if colliding && self.local_id < peer {
                    debug!("Ignoring colliding offer from {}", peer);
                    return;
                }
                info!("Replacing link to {} with incoming offer", peer);
                self.teardown(peer).await;
                true
            }
            None => false,
        };

        let (sink, epoch) = self.next_sink(peer);
        let opened = match self.connector.open(self.local_id, peer, sink).await {
            Ok(mut connection) => match connection.accept_offer(offer).await {
                Ok(answer) => Ok((connection, answer)),
                Err(e) => {
                    connection.close().await;
                    Err(e)
                }
            },
            Err(e) => Err(e),
        };
        let (connection, answer) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Could not accept offer from {}: {}", peer, e);
                // The link this offer displaced still counts as a failed attempt
                if replaced {
                    self.handle_failure(peer).await;
                }
                return;
            }
        };

        self.links.insert(
            peer,
            PeerLink {
                connection,
                state: LinkState::Connecting,
                epoch,
                initiator: false,
            },
        );
        info!("Answering connection from {}", peer);

        if let Err(e) = self.signaling.send_answer(peer, answer).await {
            warn!("Answer to {} not delivered: {}", peer, e);
            self.handle_failure(peer).await;
        }
    }

    async fn handle_signal(&mut self, signal: SignalingMessage) {
        if self.destroyed {
            return;
        }
        let peer = signal.from_id;

        match signal.kind {
            SignalKind::Offer => self.accept_offer(peer, signal.payload).await,
            SignalKind::Answer => {
                let Some(link) = self.links.get_mut(&peer) else {
                    warn!("Answer from unknown peer {}, dropping", peer);
                    return;
                };
                let result = link.connection.accept_answer(signal.payload).await;
                if let Err(e) = result {
                    warn!("Could not apply answer from {}: {}", peer, e);
                    self.handle_failure(peer).await;
                }
            }
            SignalKind::Candidate => {
                let Some(link) = self.links.get_mut(&peer) else {
                    warn!("Candidate from unknown peer {}, dropping", peer);
                    return;
                };
                if let Err(e) = link.connection.add_candidate(signal.payload).await {
                    warn!("Could not apply candidate from {}: {}", peer, e);
                }
            }
        }
    }

    async fn handle_link_event(&mut self, LinkEvent { peer, epoch, event }: LinkEvent) {
        match self.links.get_mut(&peer) {
            Some(link) if link.epoch == epoch => {
                if let ConnectionEvent::StateChanged(state) = event {
                    link.state = state;
                }
            }
            _ => {
                debug!("Dropping stale event from {}", peer);
                return;
            }
        }

        match event {
            ConnectionEvent::LocalCandidate(candidate) => {
                if let Err(e) = self.signaling.send_candidate(peer, candidate).await {
                    warn!("Candidate for {} not delivered: {}", peer, e);
                }
            }
            ConnectionEvent::StateChanged(LinkState::Connected) => {
                self.attempts.remove(&peer);
                info!("Connected to {}", peer);
            }
            ConnectionEvent::StateChanged(LinkState::Disconnected) => {
                warn!("Connection to {} interrupted", peer);
                self.emit(TransportEvent::PeerDisconnected {
                    peer,
                    reason: DisconnectReason::Disconnected,
                });
            }
            ConnectionEvent::StateChanged(LinkState::Failed) => {
                warn!("Connection to {} failed", peer);
                self.handle_failure(peer).await;
            }
            ConnectionEvent::StateChanged(_) => {}
            ConnectionEvent::ChannelOpen => {
                info!("Data channel to {} open", peer);
                self.emit(TransportEvent::PeerConnected(peer));
            }
            ConnectionEvent::ChannelClosed => {
                debug!("Data channel to {} closed", peer);
            }
            ConnectionEvent::Message(text) => {
                self.emit(TransportEvent::Message { peer, text });
            }
        }
    }

    /// Bounded reconnection: retry after a fixed delay until attempts run out
    async fn handle_failure(&mut self, peer: ParticipantId) {
        if self.destroyed {
            return;
        }
        self.teardown(peer).await;

        let attempts = self.attempts.get(&peer).copied().unwrap_or(0);
        if attempts < self.config.max_reconnect_attempts {
            self.attempts.insert(peer, attempts + 1);
            info!(
                "Reconnecting to {} in {:?} (attempt {}/{})",
                peer,
                self.config.reconnect_delay,
                attempts + 1,
                self.config.max_reconnect_attempts
            );

            let tx = self.reconnect_tx.clone();
            let delay = self.config.reconnect_delay;
            let timer = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(peer);
            });
            if let Some(previous) = self.reconnect_timers.insert(peer, timer) {
                previous.abort();
            }
        } else {
            self.attempts.remove(&peer);
            error!("Giving up on {} after {} reconnection attempts", peer, attempts);
            self.emit(TransportEvent::PeerDisconnected {
                peer,
                reason: DisconnectReason::Failed,
            });
        }
    }

    async fn reconnect(&mut self, peer: ParticipantId) {
        self.reconnect_timers.remove(&peer);
        if self.destroyed {
            return;
        }
        self.connect(peer).await;
    }

    fn send(&self, peer: &ParticipantId, text: &str) -> bool {
        match self.links.get(peer) {
            Some(link) if link.connection.is_channel_open() => {
                match link.connection.send_text(text) {
                    Ok(()) => true,
                    Err(e) => {
                        debug!("Send to {} failed: {}", peer, e);
                        false
                    }
                }
            }
            _ => false,
        }
    }

    async fn teardown(&mut self, peer: ParticipantId) {
        if let Some(mut link) = self.links.remove(&peer) {
            link.connection.close().await;
            debug!("Link to {} torn down", peer);
        }
    }

    async fn disconnect(&mut self, peer: ParticipantId) {
        if let Some(timer) = self.reconnect_timers.remove(&peer) {
            timer.abort();
        }
        self.attempts.remove(&peer);
        self.teardown(peer).await;
    }

    async fn disconnect_all(&mut self) {
        for (_, timer) in self.reconnect_timers.drain() {
            timer.abort();
        }
        self.attempts.clear();
        let peers: Vec<ParticipantId> = self.links.keys().copied().collect();
        for peer in peers {
            self.teardown(peer).await;
        }
    }

    async fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        self.disconnect_all().await;
        self.signaling.stop_polling();
        info!("Transport for {} destroyed", self.local_id);
    }
}

/// Handle to a peer transport actor
#[derive(Clone)]
pub struct PeerTransportManager {
    local_id: ParticipantId,
    tx: mpsc::Sender<ManagerCommand>,
}

impl PeerTransportManager {
    /// Spawn the transport actor and start polling for signaling messages.
    /// Returns the handle and the stream of transport events.
    pub fn spawn(
        local_id: ParticipantId,
        room: RoomCode,
        relay: Arc<dyn SignalRelay>,
        connector: Arc<dyn PeerConnector>,
        config: TransportConfig,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (tx, commands) = mpsc::channel(256);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (reconnect_tx, reconnect_rx) = mpsc::unbounded_channel();

        let mut signaling = SignalingChannel::new(relay, room, local_id, config.signaling.clone());
        signaling.start_polling(signal_tx);

        let actor = TransportActor {
            local_id,
            config,
            connector,
            signaling,
            links: HashMap::new(),
            attempts: HashMap::new(),
            reconnect_timers: HashMap::new(),
            next_epoch: 0,
            destroyed: false,
            link_tx,
            reconnect_tx,
            events: events_tx,
        };
        tokio::spawn(actor.run(commands, signal_rx, link_rx, reconnect_rx));

        (Self { local_id, tx }, events_rx)
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    /// `None` once the actor has stopped
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    /// Start the initiator path. No-op if a link to `peer` already exists.
    pub async fn connect(&self, peer: ParticipantId) {
        self.request(|reply| ManagerCommand::Connect { peer, reply })
            .await;
    }

    /// False if there is no link or its data channel is not open
    pub async fn send<T: Serialize + ?Sized>(&self, peer: ParticipantId, message: &T) -> bool {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Message for {} could not be encoded: {}", peer, e);
                return false;
            }
        };
        self.request(|reply| ManagerCommand::Send { peer, text, reply })
            .await
            .unwrap_or(false)
    }

    /// Best-effort send to every link; returns how many sends went out
    pub async fn broadcast<T: Serialize + ?Sized>(&self, message: &T) -> usize {
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(e) => {
                warn!("Broadcast could not be encoded: {}", e);
                return 0;
            }
        };
        self.request(|reply| ManagerCommand::Broadcast { text, reply })
            .await
            .unwrap_or(0)
    }

    pub async fn connected_peers(&self) -> Vec<ParticipantId> {
        self.request(|reply| ManagerCommand::ConnectedPeers { reply })
            .await
            .unwrap_or_default()
    }

    /// Every peer with a link, whatever its state
    pub async fn tracked_peers(&self) -> Vec<ParticipantId> {
        self.request(|reply| ManagerCommand::TrackedPeers { reply })
            .await
            .unwrap_or_default()
    }

    pub async fn link_state(&self, peer: ParticipantId) -> Option<LinkState> {
        self.request(|reply| ManagerCommand::LinkState { peer, reply })
            .await
            .flatten()
    }

    pub async fn disconnect(&self, peer: ParticipantId) {
        self.request(|reply| ManagerCommand::Disconnect { peer, reply })
            .await;
    }

    pub async fn disconnect_all(&self) {
        self.request(|reply| ManagerCommand::DisconnectAll { reply })
            .await;
    }

    /// Tear everything down and stop polling. Safe to call more than once.
    pub async fn destroy(&self) {
        self.request(|reply| ManagerCommand::Destroy { reply })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::relay::RelayHandle;
    use crate::transport::{DEFAULT_MAX_RECONNECT_ATTEMPTS, LoopbackNetwork};

    struct Mesh {
        relay: RelayHandle,
        network: LoopbackNetwork,
        room: RoomCode,
    }

    impl Mesh {
        async fn new() -> Self {
            let relay = RelayHandle::spawn();
            let room = relay
                .create_room(
                    ParticipantId::try_from("peer_a").unwrap(),
                    "A".into(),
                    serde_json::Value::Null,
                    30,
                )
                .await
                .unwrap()
                .code;
            Self {
                relay,
                network: LoopbackNetwork::default(),
                room,
            }
        }

        async fn join(&self, id: ParticipantId) {
            self.relay
                .join_room(self.room, id, id.to_string())
                .await
                .unwrap();
        }

        async fn manager(
            &self,
            id: &str,
        ) -> (PeerTransportManager, mpsc::UnboundedReceiver<TransportEvent>) {
            let id = ParticipantId::try_from(id).unwrap();
            self.join(id).await;
            PeerTransportManager::spawn(
                id,
                self.room,
                Arc::new(self.relay.clone()),
                Arc::new(self.network.clone()),
                TransportConfig::default(),
            )
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(60), rx.recv())
            .await
            .expect("timed out waiting for transport event")
            .expect("transport event stream closed")
    }

    async fn wait_connected(rx: &mut mpsc::UnboundedReceiver<TransportEvent>, peer: ParticipantId) {
        loop {
            if next_event(rx).await == TransportEvent::PeerConnected(peer) {
                return;
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_connect_keeps_one_link() {
        let mesh = Mesh::new().await;
        let (a, mut a_events) = mesh.manager("peer_a").await;
        let (_b, mut b_events) = mesh.manager("peer_b").await;
        let b_id = ParticipantId::try_from("peer_b").unwrap();

        a.connect(b_id).await;
        a.connect(b_id).await;
        a.connect(b_id).await;
        assert_eq!(a.tracked_peers().await, vec![b_id]);

        wait_connected(&mut a_events, b_id).await;
        wait_connected(&mut b_events, a.local_id()).await;

        a.connect(b_id).await;
        assert_eq!(a.tracked_peers().await, vec![b_id]);
        assert_eq!(a.connected_peers().await, vec![b_id]);
        assert_eq!(a.link_state(b_id).await, Some(LinkState::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn messages_flow_both_ways() {
        let mesh = Mesh::new().await;
        let (a, mut a_events) = mesh.manager("peer_a").await;
        let (b, mut b_events) = mesh.manager("peer_b").await;
        let a_id = a.local_id();
        let b_id = b.local_id();

        a.connect(b_id).await;
        wait_connected(&mut a_events, b_id).await;
        wait_connected(&mut b_events, a_id).await;

        assert!(a.send(b_id, &serde_json::json!({"hello": "b"})).await);
        assert_eq!(
            next_event(&mut b_events).await,
            TransportEvent::Message {
                peer: a_id,
                text: r#"{"hello":"b"}"#.to_string()
            }
        );

        assert_eq!(b.broadcast(&serde_json::json!({"hello": "all"})).await, 1);
        assert_eq!(
            next_event(&mut a_events).await,
            TransportEvent::Message {
                peer: b_id,
                text: r#"{"hello":"all"}"#.to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn send_without_link_returns_false() {
        let mesh = Mesh::new().await;
        let (a, _events) = mesh.manager("peer_a").await;

        assert!(!a.send(ParticipantId::try_from("peer_x").unwrap(), &"hi").await);
        assert_eq!(a.broadcast(&"hi").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_reconnection_reports_failed_once() {
        let mesh = Mesh::new().await;
        let ghost = ParticipantId::try_from("peer_ghost").unwrap();
        mesh.join(ghost).await;
        mesh.network.set_unreachable(ghost, true);
        let (a, mut a_events) = mesh.manager("peer_a").await;

        let began = tokio::time::Instant::now();
        a.connect(ghost).await;
        assert_eq!(
            next_event(&mut a_events).await,
            TransportEvent::PeerDisconnected {
                peer: ghost,
                reason: DisconnectReason::Failed
            }
        );
        let delay = TransportConfig::default().reconnect_delay;
        assert!(began.elapsed() >= delay * DEFAULT_MAX_RECONNECT_ATTEMPTS);

        // The first attempt plus one per retry
        let offers = mesh.relay.take_signals(mesh.room, ghost).await.unwrap();
        assert_eq!(
            offers.iter().filter(|m| m.kind == SignalKind::Offer).count(),
            DEFAULT_MAX_RECONNECT_ATTEMPTS as usize + 1
        );

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(a_events.try_recv().is_err());
        assert!(a.connected_peers().await.is_empty());
        assert!(a.tracked_peers().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_recovers_when_peer_becomes_reachable() {
        let mesh = Mesh::new().await;
        let (a, mut a_events) = mesh.manager("peer_a").await;
        let (b, _b_events) = mesh.manager("peer_b").await;
        let b_id = b.local_id();

        mesh.network.set_unreachable(b_id, true);
        a.connect(b_id).await;
        mesh.network.set_unreachable(b_id, false);

        wait_connected(&mut a_events, b_id).await;
        assert_eq!(a.connected_peers().await, vec![b_id]);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_disconnect_only_reports() {
        let mesh = Mesh::new().await;
        let (a, mut a_events) = mesh.manager("peer_a").await;
        let (b, mut b_events) = mesh.manager("peer_b").await;
        let a_id = a.local_id();
        let b_id = b.local_id();

        a.connect(b_id).await;
        wait_connected(&mut a_events, b_id).await;
        wait_connected(&mut b_events, a_id).await;

        b.disconnect(a_id).await;
        assert_eq!(
            next_event(&mut a_events).await,
            TransportEvent::PeerDisconnected {
                peer: b_id,
                reason: DisconnectReason::Disconnected
            }
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(a_events.try_recv().is_err());
        assert_eq!(a.link_state(b_id).await, Some(LinkState::Disconnected));
        assert!(b.tracked_peers().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_connects_settle_on_one_link_each() {
        let mesh = Mesh::new().await;
        let (a, mut a_events) = mesh.manager("peer_a").await;
        let (b, mut b_events) = mesh.manager("peer_b").await;
        let a_id = a.local_id();
        let b_id = b.local_id();

        a.connect(b_id).await;
        b.connect(a_id).await;

        wait_connected(&mut a_events, b_id).await;
        wait_connected(&mut b_events, a_id).await;
        assert_eq!(a.tracked_peers().await, vec![b_id]);
        assert_eq!(b.tracked_peers().await, vec![a_id]);
        assert!(b.send(a_id, &"ping").await);
    }

    #[tokio::test(start_paused = true)]
    async fn candidate_from_unknown_peer_is_dropped() {
        let mesh = Mesh::new().await;
        let (a, mut a_events) = mesh.manager("peer_a").await;

        SignalRelay::post_signal(
            &mesh.relay,
            mesh.room,
            SignalingMessage {
                from_id: ParticipantId::try_from("peer_stranger").unwrap(),
                to_id: a.local_id(),
                kind: SignalKind::Candidate,
                payload: serde_json::json!({"token": 99}),
                sequence_id: 0,
            },
        )
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(a.tracked_peers().await.is_empty());
        assert!(a_events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_is_idempotent() {
        let mesh = Mesh::new().await;
        let (a, _a_events) = mesh.manager("peer_a").await;
        let (b, mut b_events) = mesh.manager("peer_b").await;

        a.connect(b.local_id()).await;
        wait_connected(&mut b_events, a.local_id()).await;

        a.destroy().await;
        a.destroy().await;
        assert!(!a.send(b.local_id(), &"late").await);
        assert!(a.tracked_peers().await.is_empty());
    }
}
