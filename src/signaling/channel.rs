use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::relay::SignalRelay;
use super::types::{SignalKind, SignalingError, SignalingMessage};
use crate::relay::{ParticipantId, RoomCode};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;

#[derive(Debug, Clone)]
pub struct SignalingConfig {
    pub poll_interval: Duration,
    /// Consecutive failed polls after which the loop stops itself
    pub max_consecutive_errors: u32,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_consecutive_errors: DEFAULT_MAX_CONSECUTIVE_ERRORS,
        }
    }
}

/// Bootstrap channel between participants with no direct link yet.
///
/// Outbound messages are single relay requests. Inbound messages arrive through
/// a polling loop that hands each message to the sink in relay order.
pub struct SignalingChannel {
    relay: Arc<dyn SignalRelay>,
    room: RoomCode,
    local_id: ParticipantId,
    config: SignalingConfig,
    polling: Arc<AtomicBool>,
    poll_task: Option<JoinHandle<()>>,
}

impl SignalingChannel {
    pub fn new(
        relay: Arc<dyn SignalRelay>,
        room: RoomCode,
        local_id: ParticipantId,
        config: SignalingConfig,
    ) -> Self {
        Self {
            relay,
            room,
            local_id,
            config,
            polling: Arc::new(AtomicBool::new(false)),
            poll_task: None,
        }
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    pub async fn send_offer(
        &self,
        to: ParticipantId,
        offer: serde_json::Value,
    ) -> Result<(), SignalingError> {
        self.send(to, SignalKind::Offer, offer).await
    }

    pub async fn send_answer(
        &self,
        to: ParticipantId,
        answer: serde_json::Value,
    ) -> Result<(), SignalingError> {
        self.send(to, SignalKind::Answer, answer).await
    }

    pub async fn send_candidate(
        &self,
        to: ParticipantId,
        candidate: serde_json::Value,
    ) -> Result<(), SignalingError> {
        self.send(to, SignalKind::Candidate, candidate).await
    }

    async fn send(
        &self,
        to: ParticipantId,
        kind: SignalKind,
        payload: serde_json::Value,
    ) -> Result<(), SignalingError> {
        debug!("Sending {} to {}", kind, to);
        let message = SignalingMessage {
            from_id: self.local_id,
            to_id: to,
            kind,
            payload,
            sequence_id: 0,
        };
        self.relay.post_signal(self.room, message).await
    }

    /// Other participants the relay knows about in this room
    pub async fn peers(&self) -> Result<Vec<ParticipantId>, SignalingError> {
        self.relay.fetch_peers(self.room, self.local_id).await
    }

    /// Start the fetch-and-dispatch loop. A second call while polling is a no-op.
    pub fn start_polling(&mut self, sink: mpsc::UnboundedSender<SignalingMessage>) {
        if self.polling.swap(true, Ordering::SeqCst) {
            info!("Signaling for {} already polling", self.local_id);
            return;
        }

        let relay = self.relay.clone();
        let room = self.room;
        let local_id = self.local_id;
        let config = self.config.clone();
        let polling = self.polling.clone();

        self.poll_task = Some(tokio::spawn(async move {
            poll_loop(relay, room, local_id, config, sink).await;
            polling.store(false, Ordering::SeqCst);
        }));
    }

    pub fn stop_polling(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
            debug!("Signaling for {} stopped", self.local_id);
        }
        self.polling.store(false, Ordering::SeqCst);
    }

    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::SeqCst)
    }
}

impl Drop for SignalingChannel {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

/// Polls until the sink closes or the failure threshold is reached. The next
/// poll is scheduled only after the previous one finished.
async fn poll_loop(
    relay: Arc<dyn SignalRelay>,
    room: RoomCode,
    local_id: ParticipantId,
    config: SignalingConfig,
    sink: mpsc::UnboundedSender<SignalingMessage>,
) {
    let mut consecutive_errors = 0u32;

    loop {
        match relay.fetch_signals(room, local_id).await {
            Ok(messages) => {
                consecutive_errors = 0;
                for message in messages {
                    if sink.send(message).is_err() {
                        debug!("Signal sink for {} closed", local_id);
                        return;
                    }
                }
            }
            Err(e) => {
                consecutive_errors += 1;
                warn!(
                    "Signal poll failed for {} ({}/{}): {}",
                    local_id, consecutive_errors, config.max_consecutive_errors, e
                );
                if consecutive_errors >= config.max_consecutive_errors {
                    error!("Signal polling for {} stopped after {} failures", local_id, consecutive_errors);
                    return;
                }
            }
        }

        tokio::time::sleep(config.poll_interval).await;
    }
}
