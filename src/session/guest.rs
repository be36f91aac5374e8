use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::host::DEFAULT_TICK_INTERVAL;
use super::messages::{AnswerSubmission, QuizEnd, QuizStart, ScoreUpdate, SessionMessage};
use super::observer::{Observers, SessionObserver};
use super::scoring::current_question_index;
use super::types::{ConnectionStatus, Participant, Quiz, SessionPhase, SessionState};
use super::{AnswerOutcome, Coordinator, SessionDeps, SessionError, SessionView};
use crate::registry::RoomDirectory;
use crate::relay::{ParticipantId, RoomCode};
use crate::transport::{DisconnectReason, PeerTransportManager, TransportConfig, TransportEvent};

#[derive(Debug, Clone)]
pub struct GuestConfig {
    /// How often the question clock is checked
    pub tick_interval: Duration,
    pub transport: TransportConfig,
}

impl Default for GuestConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            transport: TransportConfig::default(),
        }
    }
}

enum GuestCommand {
    SubmitAnswer {
        question_index: usize,
        answer_index: usize,
        reply: oneshot::Sender<Result<AnswerOutcome, SessionError>>,
    },
    Subscribe {
        observer: Arc<dyn SessionObserver>,
        reply: oneshot::Sender<()>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Take a host replica wholesale, except for what only this guest knows:
/// answers the host has not acknowledged yet, and its own entry if the host
/// has not added it. Phase and question index never move backwards.
fn merge_replica(
    local: &SessionState,
    mut incoming: SessionState,
    local_id: ParticipantId,
    display_name: &str,
    now_ms: u64,
) -> SessionState {
    if incoming.phase < local.phase {
        incoming.phase = local.phase;
        incoming.start_timestamp = incoming.start_timestamp.or(local.start_timestamp);
    }
    if let (SessionPhase::Playing, Some(start)) = (incoming.phase, incoming.start_timestamp) {
        let derived = current_question_index(
            start,
            incoming.seconds_per_question,
            incoming.total_questions(),
            now_ms,
        );
        incoming.current_question_index = derived.max(local.current_question_index);
    }

    let current = incoming.current_question_index;
    let own = local.participants.get(&local_id);
    match incoming.participants.get_mut(&local_id) {
        Some(entry) => {
            if let Some(own) = own {
                for (&question, &answer) in &own.answers {
                    entry.answers.entry(question).or_insert(answer);
                }
            }
            if incoming.phase == SessionPhase::Playing
                && entry.has_answered(current)
                && entry.connection_status == ConnectionStatus::Thinking
            {
                entry.connection_status = ConnectionStatus::Answered;
            }
        }
        None if incoming.phase < SessionPhase::Ended => {
            let entry = own
                .cloned()
                .unwrap_or_else(|| Participant::new(local_id, display_name, false));
            incoming.participants.insert(entry);
        }
        None => {}
    }
    incoming
}

struct GuestActor {
    local_id: ParticipantId,
    host_id: ParticipantId,
    display_name: String,
    state: SessionState,
    config: GuestConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<dyn RoomDirectory>,
    transport: PeerTransportManager,
    observers: Observers,
    publish: watch::Sender<SessionState>,
}

impl GuestActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<GuestCommand>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let running = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.leave().await;
                        false
                    }
                },
                Some(event) = events.recv() => self.handle_transport_event(event).await,
                _ = ticker.tick(), if self.state.phase == SessionPhase::Playing => {
                    self.tick();
                    true
                }
            };
            if !running {
                break;
            }
        }
        debug!("Guest coordinator for {} stopped", self.state.room_code);
    }

    async fn handle_command(&mut self, command: GuestCommand) -> bool {
        match command {
            GuestCommand::SubmitAnswer {
                question_index,
                answer_index,
                reply,
            } => {
                let _ = reply.send(self.submit_answer(question_index, answer_index).await);
                true
            }
            GuestCommand::Subscribe { observer, reply } => {
                self.observers.push(observer);
                let _ = reply.send(());
                true
            }
            GuestCommand::Leave { reply } => {
                self.leave().await;
                let _ = reply.send(());
                false
            }
        }
    }

    fn publish(&self) {
        self.publish.send_replace(self.state.clone());
    }

    async fn submit_answer(
        &mut self,
        question_index: usize,
        answer_index: usize,
    ) -> Result<AnswerOutcome, SessionError> {
        if self.state.phase != SessionPhase::Playing {
            return Err(SessionError::InvalidPhase {
                operation: "answer",
                phase: self.state.phase,
            });
        }
        if question_index >= self.state.total_questions() {
            return Err(SessionError::QuestionOutOfRange(question_index));
        }
        let answered = self
            .state
            .participants
            .get(&self.local_id)
            .is_some_and(|me| me.has_answered(question_index));
        if answered {
            return Ok(AnswerOutcome::Duplicate);
        }

        let submission = AnswerSubmission {
            question_index,
            answer_index,
            timestamp: self.clock.now_ms(),
        };
        if !self
            .transport
            .send(self.host_id, &SessionMessage::Answer(submission))
            .await
        {
            warn!("Answer for question {} could not reach the host", question_index);
            return Ok(AnswerOutcome::Undelivered);
        }

        if !self.state.participants.contains(&self.local_id) {
            self.state.participants.insert(Participant::new(
                self.local_id,
                self.display_name.clone(),
                false,
            ));
        }
        let current = self.state.current_question_index;
        if let Some(me) = self.state.participants.get_mut(&self.local_id) {
            me.answers.insert(question_index, answer_index);
            if question_index == current {
                me.connection_status = ConnectionStatus::Answered;
            }
        }
        self.publish();
        self.observers.participants_changed(&self.state.participants);
        Ok(AnswerOutcome::Submitted)
    }

    /// Returns false once the session is over for this guest
    async fn handle_transport_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Message { peer, text } if peer == self.host_id => {
                return self.handle_message(&text).await;
            }
            TransportEvent::Message { peer, .. } => {
                warn!("Dropping message from non-host peer {}", peer);
            }
            TransportEvent::PeerConnected(peer) if peer == self.host_id => {
                info!("Connected to host of room {}", self.state.room_code);
            }
            TransportEvent::PeerDisconnected {
                peer,
                reason: DisconnectReason::Disconnected,
            } if peer == self.host_id => {
                warn!("Lost contact with host, waiting for recovery");
                if let Some(host) = self.state.participants.get_mut(&peer) {
                    host.connection_status = ConnectionStatus::Disconnected;
                    self.publish();
                    self.observers.participants_changed(&self.state.participants);
                }
            }
            TransportEvent::PeerDisconnected {
                peer,
                reason: DisconnectReason::Failed,
            } if peer == self.host_id => {
                warn!("Host of room {} is unreachable, leaving", self.state.room_code);
                self.close().await;
                return false;
            }
            other => debug!("Ignoring {:?}", other),
        }
        true
    }

    async fn handle_message(&mut self, text: &str) -> bool {
        match SessionMessage::decode(text) {
            Ok(SessionMessage::SessionInfo(state)) => return self.apply_session_info(*state).await,
            Ok(SessionMessage::QuizStart(start)) => self.apply_quiz_start(start),
            Ok(SessionMessage::ScoreUpdate(update)) => self.apply_scores(update),
            Ok(SessionMessage::QuizEnd(end)) => self.apply_quiz_end(end),
            Ok(other) => warn!("Dropping {} sent by host", other.kind()),
            Err(e) => warn!("Dropping message from host: {}", e),
        }
        true
    }

    async fn apply_session_info(&mut self, incoming: SessionState) -> bool {
        let merged = merge_replica(
            &self.state,
            incoming,
            self.local_id,
            &self.display_name,
            self.clock.now_ms(),
        );
        let phase_changed = merged.phase != self.state.phase;
        let question_changed = merged.phase == SessionPhase::Playing
            && (self.state.phase != SessionPhase::Playing
                || merged.current_question_index != self.state.current_question_index);
        self.state = merged;

        if self.state.phase == SessionPhase::Ended {
            info!("Host ended session {}", self.state.room_code);
            self.close().await;
            return false;
        }

        self.publish();
        if phase_changed {
            self.observers.state_changed(self.state.phase);
        }
        if question_changed {
            self.observers
                .question_changed(self.state.current_question_index);
        }
        self.observers.participants_changed(&self.state.participants);
        true
    }

    fn apply_quiz_start(&mut self, start: QuizStart) {
        if self.state.phase != SessionPhase::Waiting {
            debug!("Ignoring quiz_start while {}", self.state.phase);
            return;
        }
        self.state.phase = SessionPhase::Playing;
        self.state.start_timestamp = Some(start.start_timestamp);
        self.state.current_question_index = 0;
        for participant in self.state.participants.iter_mut() {
            if participant.connection_status != ConnectionStatus::Disconnected {
                participant.connection_status = ConnectionStatus::Thinking;
            }
        }
        let index = current_question_index(
            start.start_timestamp,
            self.state.seconds_per_question,
            self.state.total_questions(),
            self.clock.now_ms(),
        );
        self.state.advance_question(index);
        info!("Quiz in room {} started", self.state.room_code);

        self.publish();
        self.observers.state_changed(SessionPhase::Playing);
        self.observers
            .question_changed(self.state.current_question_index);
        self.observers.participants_changed(&self.state.participants);
    }

    fn apply_scores(&mut self, update: ScoreUpdate) {
        let current = self.state.current_question_index;
        let playing = self.state.phase == SessionPhase::Playing;
        for entry in update.participants {
            let Some(participant) = self.state.participants.get_mut(&entry.id) else {
                continue;
            };
            participant.score = entry.score;
            if entry.id == self.local_id {
                for (question, answer) in entry.answers {
                    participant.answers.entry(question).or_insert(answer);
                }
                let answered_locally = playing
                    && participant.has_answered(current)
                    && entry.connection_status == ConnectionStatus::Thinking;
                participant.connection_status = if answered_locally {
                    ConnectionStatus::Answered
                } else {
                    entry.connection_status
                };
            } else {
                participant.answers = entry.answers;
                participant.connection_status = entry.connection_status;
            }
        }
        self.publish();
        self.observers.scores_updated(&self.state.participants);
    }

    fn apply_quiz_end(&mut self, end: QuizEnd) {
        for standing in &end.standings {
            if let Some(participant) = self.state.participants.get_mut(&standing.id) {
                participant.score = standing.score;
            }
        }
        if self.state.phase < SessionPhase::Finished {
            self.state.phase = SessionPhase::Finished;
        }
        info!("Quiz in room {} finished", self.state.room_code);
        self.publish();
        self.observers.state_changed(SessionPhase::Finished);
        self.observers.quiz_ended(&end.standings);
    }

    fn tick(&mut self) {
        let Some(start) = self.state.start_timestamp else {
            return;
        };
        let index = current_question_index(
            start,
            self.state.seconds_per_question,
            self.state.total_questions(),
            self.clock.now_ms(),
        );
        if self.state.advance_question(index) {
            debug!("Question {} opened", index);
            self.publish();
            self.observers.question_changed(index);
            self.observers.participants_changed(&self.state.participants);
        }
    }

    async fn leave(&mut self) {
        if self.state.phase == SessionPhase::Ended {
            return;
        }
        if !self.transport.send(self.host_id, &SessionMessage::Leave).await {
            warn!(
                "Leave notice to {} not delivered, host will see the registry entry go",
                self.host_id
            );
        }
        if let Err(e) = self
            .registry
            .leave_room(self.state.room_code, self.local_id)
            .await
        {
            warn!("Could not leave room {}: {}", self.state.room_code, e);
        }
        self.close().await;
    }

    async fn close(&mut self) {
        self.state.phase = SessionPhase::Ended;
        self.publish();
        self.transport.destroy().await;
        self.observers.state_changed(SessionPhase::Ended);
    }
}

/// Replica coordinator run by a participant who joined an existing room
pub struct GuestCoordinator {
    view: SessionView,
    host_id: ParticipantId,
    tx: mpsc::Sender<GuestCommand>,
}

impl GuestCoordinator {
    /// Register with the room and open a link to its host
    pub async fn join_session(
        deps: SessionDeps,
        room_code: RoomCode,
        display_name: &str,
        config: GuestConfig,
    ) -> Result<Self, SessionError> {
        let local_id = ParticipantId::generate();
        let snapshot = deps
            .registry
            .join_room(room_code, local_id, display_name)
            .await?;
        // The host's first session_info carries the quiz if this is empty
        let quiz = if snapshot.quiz_data.is_null() {
            Quiz::default()
        } else {
            serde_json::from_value(snapshot.quiz_data).unwrap_or_else(|e| {
                warn!("Quiz attached to room {} is unreadable: {}", room_code, e);
                Quiz::default()
            })
        };
        let host_id = snapshot.host_id;

        let mut state = SessionState::new(room_code, quiz, snapshot.seconds_per_question);
        state
            .participants
            .insert(Participant::new(local_id, display_name, false));

        let (transport, events) = PeerTransportManager::spawn(
            local_id,
            room_code,
            deps.relay,
            deps.connector,
            config.transport.clone(),
        );
        transport.connect(host_id).await;
        info!("Joined room {} as {}, connecting to host {}", room_code, local_id, host_id);

        let (publish, state_rx) = watch::channel(state.clone());
        let (tx, commands) = mpsc::channel(64);
        let actor = GuestActor {
            local_id,
            host_id,
            display_name: display_name.to_string(),
            state,
            config,
            clock: deps.clock.clone(),
            registry: deps.registry,
            transport,
            observers: Observers::new(deps.observers),
            publish,
        };
        tokio::spawn(actor.run(commands, events));

        Ok(Self {
            view: SessionView::new(local_id, state_rx, deps.clock),
            host_id,
            tx,
        })
    }

    pub fn host_id(&self) -> ParticipantId {
        self.host_id
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> GuestCommand,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }
}

impl Coordinator for GuestCoordinator {
    fn view(&self) -> &SessionView {
        &self.view
    }

    async fn submit_answer(
        &self,
        question_index: usize,
        answer_index: usize,
    ) -> Result<AnswerOutcome, SessionError> {
        self.request(|reply| GuestCommand::SubmitAnswer {
            question_index,
            answer_index,
            reply,
        })
        .await?
    }

    async fn subscribe(&self, observer: Arc<dyn SessionObserver>) {
        let _ = self
            .request(|reply| GuestCommand::Subscribe { observer, reply })
            .await;
    }

    /// Tell the host and the registry, then tear down the link
    async fn end_session(&self) {
        let _ = self.request(|reply| GuestCommand::Leave { reply }).await;
    }
}
