use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::messages::{
    AnswerSubmission, QuizEnd, QuizStart, ScoreEntry, ScoreUpdate, SessionMessage,
};
use super::observer::{Observers, SessionObserver};
use super::scoring::{ScoringConfig, current_question_index, final_standings, response_latency};
use super::types::{ConnectionStatus, Participant, Quiz, SessionPhase, SessionState};
use super::{AnswerOutcome, Coordinator, SessionDeps, SessionError, SessionView};
use crate::registry::RoomDirectory;
use crate::relay::{ParticipantId, RoomCode};
use crate::transport::{DisconnectReason, PeerTransportManager, TransportConfig, TransportEvent};

pub const DEFAULT_SECONDS_PER_QUESTION: u32 = 30;
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_ROSTER_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct HostConfig {
    pub seconds_per_question: u32,
    pub scoring: ScoringConfig,
    /// How often the question clock is checked
    pub tick_interval: Duration,
    /// How often display names are refreshed from the registry
    pub roster_poll_interval: Duration,
    pub transport: TransportConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            seconds_per_question: DEFAULT_SECONDS_PER_QUESTION,
            scoring: ScoringConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            roster_poll_interval: DEFAULT_ROSTER_POLL_INTERVAL,
            transport: TransportConfig::default(),
        }
    }
}

enum HostCommand {
    StartQuiz {
        reply: oneshot::Sender<Result<u64, SessionError>>,
    },
    SubmitAnswer {
        question_index: usize,
        answer_index: usize,
        reply: oneshot::Sender<Result<AnswerOutcome, SessionError>>,
    },
    AddParticipant {
        peer: ParticipantId,
        name: String,
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        observer: Arc<dyn SessionObserver>,
        reply: oneshot::Sender<()>,
    },
    EndSession {
        reply: oneshot::Sender<()>,
    },
}

/// Status a (re)joining participant should show for the current phase
fn active_status(state: &SessionState, peer: ParticipantId) -> ConnectionStatus {
    let answered = state
        .participants
        .get(&peer)
        .is_some_and(|p| p.has_answered(state.current_question_index));
    match state.phase {
        SessionPhase::Playing if answered => ConnectionStatus::Answered,
        SessionPhase::Playing => ConnectionStatus::Thinking,
        _ => ConnectionStatus::Connected,
    }
}

/// Validate and score one answer against the authoritative state and the
/// host clock. The first answer per participant and question wins.
fn score_answer(
    state: &mut SessionState,
    scoring: &ScoringConfig,
    peer: ParticipantId,
    submission: AnswerSubmission,
    now_ms: u64,
) -> Result<AnswerOutcome, SessionError> {
    let start = match (state.phase, state.start_timestamp) {
        (SessionPhase::Playing, Some(start)) => start,
        (phase, _) => {
            return Err(SessionError::InvalidPhase {
                operation: "answer",
                phase,
            });
        }
    };
    let question_index = submission.question_index;
    let correct = state
        .quiz
        .questions
        .get(question_index)
        .ok_or(SessionError::QuestionOutOfRange(question_index))?
        .correct_index
        == submission.answer_index;

    let seconds = state.seconds_per_question;
    let opened = current_question_index(start, seconds, state.total_questions(), now_ms);
    let current = state.current_question_index;
    if question_index > opened.max(current) {
        return Err(SessionError::QuestionNotOpen(question_index));
    }
    let participant = state
        .participants
        .get_mut(&peer)
        .ok_or(SessionError::UnknownParticipant(peer))?;
    if participant.has_answered(question_index) {
        return Ok(AnswerOutcome::Duplicate);
    }

    let latency = response_latency(start, seconds, question_index, submission.timestamp);
    let points = scoring.calculate_points(correct, latency);
    participant.answers.insert(question_index, submission.answer_index);
    participant.answer_latencies.insert(question_index, latency);
    participant.score += points;
    if question_index == current {
        participant.connection_status = ConnectionStatus::Answered;
    }
    Ok(AnswerOutcome::Scored(points))
}

struct HostActor {
    local_id: ParticipantId,
    state: SessionState,
    config: HostConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<dyn RoomDirectory>,
    transport: PeerTransportManager,
    observers: Observers,
    publish: watch::Sender<SessionState>,
    /// Display names last seen in the registry
    names: HashMap<ParticipantId, String>,
    /// Epoch ms at which the last question closes
    finish_at: Option<u64>,
}

impl HostActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<HostCommand>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut roster_poll = tokio::time::interval(self.config.roster_poll_interval);
        roster_poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let polling = matches!(self.state.phase, SessionPhase::Waiting | SessionPhase::Playing);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => {
                        if !self.handle_command(command).await {
                            break;
                        }
                    }
                    None => {
                        self.end_session().await;
                        break;
                    }
                },
                Some(event) = events.recv() => self.handle_transport_event(event).await,
                _ = ticker.tick(), if self.state.phase == SessionPhase::Playing => self.tick().await,
                _ = roster_poll.tick(), if polling => self.refresh_roster().await,
            }
        }
        debug!("Host coordinator for {} stopped", self.state.room_code);
    }

    /// Returns false once the session is over
    async fn handle_command(&mut self, command: HostCommand) -> bool {
        match command {
            HostCommand::StartQuiz { reply } => {
                let _ = reply.send(self.start_quiz().await);
            }
            HostCommand::SubmitAnswer {
                question_index,
                answer_index,
                reply,
            } => {
                let submission = AnswerSubmission {
                    question_index,
                    answer_index,
                    timestamp: self.clock.now_ms(),
                };
                let _ = reply.send(self.ingest_answer(self.local_id, submission).await);
            }
            HostCommand::AddParticipant { peer, name, reply } => {
                self.add_participant(peer, name).await;
                let _ = reply.send(());
            }
            HostCommand::Subscribe { observer, reply } => {
                self.observers.push(observer);
                let _ = reply.send(());
            }
            HostCommand::EndSession { reply } => {
                self.end_session().await;
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn publish(&self) {
        self.publish.send_replace(self.state.clone());
    }

    async fn broadcast_session_info(&self) {
        let message = SessionMessage::SessionInfo(Box::new(self.state.clone()));
        self.transport.broadcast(&message).await;
    }

    async fn broadcast_scores(&self) {
        let participants = self
            .state
            .participants
            .iter()
            .map(|p| ScoreEntry {
                id: p.id,
                score: p.score,
                connection_status: p.connection_status,
                answers: p.answers.clone(),
            })
            .collect();
        self.transport
            .broadcast(&SessionMessage::ScoreUpdate(ScoreUpdate { participants }))
            .await;
    }

    async fn start_quiz(&mut self) -> Result<u64, SessionError> {
        if self.state.phase != SessionPhase::Waiting {
            return Err(SessionError::InvalidPhase {
                operation: "start the quiz",
                phase: self.state.phase,
            });
        }
        self.registry
            .start_room(self.state.room_code, self.local_id)
            .await?;

        let start_timestamp = self.clock.now_ms();
        self.state.start_timestamp = Some(start_timestamp);
        self.state.phase = SessionPhase::Playing;
        self.state.current_question_index = 0;
        for participant in self.state.participants.iter_mut() {
            if participant.connection_status != ConnectionStatus::Disconnected {
                participant.connection_status = ConnectionStatus::Thinking;
            }
        }
        self.publish();

        let sent = self
            .transport
            .broadcast(&SessionMessage::QuizStart(QuizStart { start_timestamp }))
            .await;
        info!(
            "Quiz in room {} started at {} ({} guests notified)",
            self.state.room_code, start_timestamp, sent
        );

        self.observers.state_changed(SessionPhase::Playing);
        self.observers.question_changed(0);
        self.observers.participants_changed(&self.state.participants);
        Ok(start_timestamp)
    }

    async fn ingest_answer(
        &mut self,
        peer: ParticipantId,
        submission: AnswerSubmission,
    ) -> Result<AnswerOutcome, SessionError> {
        let now = self.clock.now_ms();
        let outcome = score_answer(&mut self.state, &self.config.scoring, peer, submission, now)?;
        match outcome {
            AnswerOutcome::Scored(points) => {
                info!(
                    "{} answered question {} for {} points",
                    peer, submission.question_index, points
                );
                self.publish();
                self.observers.scores_updated(&self.state.participants);
                self.broadcast_scores().await;
            }
            _ => debug!(
                "Ignoring repeat answer from {} for question {}",
                peer, submission.question_index
            ),
        }
        Ok(outcome)
    }

    async fn add_participant(&mut self, peer: ParticipantId, name: String) {
        let status = active_status(&self.state, peer);
        match self.state.participants.get_mut(&peer) {
            Some(existing) => {
                existing.connection_status = status;
                info!("{} reconnected to room {}", existing.display_name, self.state.room_code);
            }
            None => {
                let mut participant = Participant::new(peer, name, false);
                participant.connection_status = status;
                info!(
                    "{} joined room {} as {}",
                    participant.display_name, self.state.room_code, peer
                );
                self.state.participants.insert(participant);
            }
        }
        self.publish();
        self.observers.participants_changed(&self.state.participants);
        self.broadcast_session_info().await;
    }

    async fn remove_participant(&mut self, peer: ParticipantId, why: &str) {
        let Some(removed) = self.state.participants.remove(&peer) else {
            return;
        };
        info!("{} left room {} ({})", removed.display_name, self.state.room_code, why);
        self.publish();
        self.observers.participants_changed(&self.state.participants);
        self.broadcast_session_info().await;
    }

    async fn resolve_name(&mut self, peer: ParticipantId) -> String {
        if !self.names.contains_key(&peer) {
            self.refresh_roster().await;
        }
        self.names
            .get(&peer)
            .cloned()
            .unwrap_or_else(|| peer.to_string())
    }

    /// Pull the roster from the registry: apply renames, and drop
    /// participants the registry listed before but no longer does
    async fn refresh_roster(&mut self) {
        let snapshot = match self.registry.get_room(self.state.room_code).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Roster refresh for {} failed: {}", self.state.room_code, e);
                return;
            }
        };

        let listed: HashSet<ParticipantId> = snapshot.participants.iter().map(|e| e.id).collect();
        let departed: Vec<ParticipantId> = self
            .names
            .keys()
            .filter(|id| !listed.contains(*id) && **id != self.local_id)
            .copied()
            .collect();

        let mut changed = false;
        for peer in departed {
            self.names.remove(&peer);
            if let Some(removed) = self.state.participants.remove(&peer) {
                info!(
                    "{} is gone from room {} registry, dropping",
                    removed.display_name, self.state.room_code
                );
                self.transport.disconnect(peer).await;
                changed = true;
            }
        }
        for entry in snapshot.participants {
            if let Some(participant) = self.state.participants.get_mut(&entry.id) {
                if participant.display_name != entry.name {
                    participant.display_name = entry.name.clone();
                    changed = true;
                }
            }
            self.names.insert(entry.id, entry.name);
        }
        if changed {
            self.publish();
            self.observers.participants_changed(&self.state.participants);
            self.broadcast_session_info().await;
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerConnected(peer) => {
                let name = self.resolve_name(peer).await;
                self.add_participant(peer, name).await;
            }
            TransportEvent::PeerDisconnected {
                peer,
                reason: DisconnectReason::Disconnected,
            } => {
                let Some(participant) = self.state.participants.get_mut(&peer) else {
                    return;
                };
                participant.connection_status = ConnectionStatus::Disconnected;
                debug!("{} is unreachable, waiting for recovery", peer);
                self.publish();
                self.observers.participants_changed(&self.state.participants);
                self.broadcast_scores().await;
            }
            TransportEvent::PeerDisconnected {
                peer,
                reason: DisconnectReason::Failed,
            } => {
                self.remove_participant(peer, "connection failed").await;
            }
            TransportEvent::Message { peer, text } => match SessionMessage::decode(&text) {
                Ok(SessionMessage::Answer(submission)) => {
                    if let Err(e) = self.ingest_answer(peer, submission).await {
                        warn!("Rejected answer from {}: {}", peer, e);
                    }
                }
                Ok(SessionMessage::Leave) => {
                    self.transport.disconnect(peer).await;
                    self.remove_participant(peer, "left").await;
                }
                Ok(other) => warn!("Dropping {} sent by guest {}", other.kind(), peer),
                Err(e) => warn!("Dropping message from {}: {}", peer, e),
            },
        }
    }

    async fn tick(&mut self) {
        let Some(start) = self.state.start_timestamp else {
            return;
        };
        let now = self.clock.now_ms();
        let total = self.state.total_questions();
        let index = current_question_index(start, self.state.seconds_per_question, total, now);

        if self.state.advance_question(index) {
            info!("Room {} moved to question {}", self.state.room_code, index);
            self.publish();
            self.observers.question_changed(index);
            self.observers.participants_changed(&self.state.participants);
        }

        if index + 1 >= total && self.finish_at.is_none() {
            let finish_at = now + u64::from(self.state.seconds_per_question) * 1000;
            debug!("Last question reached, quiz ends at {}", finish_at);
            self.finish_at = Some(finish_at);
        }
        if self.finish_at.is_some_and(|at| now >= at) {
            self.finish_quiz().await;
        }
    }

    async fn finish_quiz(&mut self) {
        self.finish_at = None;
        self.state.phase = SessionPhase::Finished;
        let standings = final_standings(self.state.participants.iter());
        self.publish();

        self.transport
            .broadcast(&SessionMessage::QuizEnd(QuizEnd {
                standings: standings.clone(),
            }))
            .await;
        if let Some(winner) = standings.first() {
            info!(
                "Quiz in room {} finished, {} leads with {}",
                self.state.room_code, winner.display_name, winner.score
            );
        }

        self.observers.state_changed(SessionPhase::Finished);
        self.observers.quiz_ended(&standings);
    }

    async fn end_session(&mut self) {
        if self.state.phase == SessionPhase::Ended {
            return;
        }
        self.state.phase = SessionPhase::Ended;
        self.finish_at = None;
        self.publish();
        self.broadcast_session_info().await;

        if let Err(e) = self
            .registry
            .end_room(self.state.room_code, self.local_id)
            .await
        {
            warn!("Could not close room {}: {}", self.state.room_code, e);
        }
        self.transport.destroy().await;
        info!("Session {} ended", self.state.room_code);
        self.observers.state_changed(SessionPhase::Ended);
    }
}

/// Authoritative coordinator run by the participant who created the room
pub struct HostCoordinator {
    view: SessionView,
    tx: mpsc::Sender<HostCommand>,
}

impl HostCoordinator {
    /// Create a room in the registry and start hosting it
    pub async fn host_room(
        deps: SessionDeps,
        quiz: Quiz,
        host_name: &str,
        config: HostConfig,
    ) -> Result<Self, SessionError> {
        if quiz.questions.is_empty() {
            return Err(SessionError::EmptyQuiz);
        }
        let host_id = ParticipantId::generate();
        let quiz_data = serde_json::to_value(&quiz)?;
        let created = deps
            .registry
            .create_room(host_id, host_name, quiz_data, config.seconds_per_question)
            .await?;
        info!("Created room {} for {}", created.code, host_name);
        Self::create_session(deps, quiz, created.code, host_id, host_name, config)
    }

    /// Host an already registered room
    pub fn create_session(
        deps: SessionDeps,
        quiz: Quiz,
        room_code: RoomCode,
        host_id: ParticipantId,
        host_name: &str,
        config: HostConfig,
    ) -> Result<Self, SessionError> {
        if quiz.questions.is_empty() {
            return Err(SessionError::EmptyQuiz);
        }
        let mut state = SessionState::new(room_code, quiz, config.seconds_per_question);
        state
            .participants
            .insert(Participant::new(host_id, host_name, true));

        let (transport, events) = PeerTransportManager::spawn(
            host_id,
            room_code,
            deps.relay,
            deps.connector,
            config.transport.clone(),
        );
        let (publish, state_rx) = watch::channel(state.clone());
        let (tx, commands) = mpsc::channel(64);

        let mut names = HashMap::new();
        names.insert(host_id, host_name.to_string());
        let actor = HostActor {
            local_id: host_id,
            state,
            config,
            clock: deps.clock.clone(),
            registry: deps.registry,
            transport,
            observers: Observers::new(deps.observers),
            publish,
            names,
            finish_at: None,
        };
        tokio::spawn(actor.run(commands, events));

        Ok(Self {
            view: SessionView::new(host_id, state_rx, deps.clock),
            tx,
        })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> HostCommand,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        reply_rx.await.map_err(|_| SessionError::Closed)
    }

    /// Open question 0 for everyone. Returns the shared start timestamp.
    pub async fn start_quiz(&self) -> Result<u64, SessionError> {
        self.request(|reply| HostCommand::StartQuiz { reply })
            .await?
    }

    /// Add or reactivate a participant and replicate the roster
    pub async fn add_participant(
        &self,
        peer: ParticipantId,
        name: impl Into<String>,
    ) -> Result<(), SessionError> {
        let name = name.into();
        self.request(|reply| HostCommand::AddParticipant { peer, name, reply })
            .await
    }
}

impl Coordinator for HostCoordinator {
    fn view(&self) -> &SessionView {
        &self.view
    }

    async fn submit_answer(
        &self,
        question_index: usize,
        answer_index: usize,
    ) -> Result<AnswerOutcome, SessionError> {
        self.request(|reply| HostCommand::SubmitAnswer {
            question_index,
            answer_index,
            reply,
        })
        .await?
    }

    async fn subscribe(&self, observer: Arc<dyn SessionObserver>) {
        let _ = self
            .request(|reply| HostCommand::Subscribe { observer, reply })
            .await;
    }

    async fn end_session(&self) {
        let _ = self.request(|reply| HostCommand::EndSession { reply }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::types::Question;

    fn quiz() -> Quiz {
        let question = |correct_index| Question {
            question: "?".to_string(),
            options: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            correct_index,
        };
        Quiz {
            title: "Capitals".to_string(),
            questions: vec![question(1), question(2), question(0)],
        }
    }

    fn playing_state(start: u64) -> (SessionState, ParticipantId) {
        let mut state = SessionState::new(RoomCode::try_from("room0001").unwrap(), quiz(), 30);
        let guest = ParticipantId::try_from("peer_guest").unwrap();
        state.participants.insert(Participant::new(guest, "Guest", false));
        state.phase = SessionPhase::Playing;
        state.start_timestamp = Some(start);
        (state, guest)
    }

    #[test]
    fn correct_answer_after_two_seconds_scores_thirteen() {
        let (mut state, guest) = playing_state(100_000);
        let outcome = score_answer(
            &mut state,
            &ScoringConfig::default(),
            guest,
            AnswerSubmission {
                question_index: 0,
                answer_index: 1,
                timestamp: 102_000,
            },
            102_050,
        )
        .unwrap();

        assert_eq!(outcome, AnswerOutcome::Scored(13));
        let p = state.participants.get(&guest).unwrap();
        assert_eq!(p.score, 13);
        assert_eq!(p.answer_latencies.get(&0), Some(&2000));
        assert_eq!(p.connection_status, ConnectionStatus::Answered);
    }

    #[test]
    fn only_first_answer_counts() {
        let (mut state, guest) = playing_state(0);
        let scoring = ScoringConfig::default();
        let answer = |answer_index, timestamp| AnswerSubmission {
            question_index: 0,
            answer_index,
            timestamp,
        };

        assert_eq!(
            score_answer(&mut state, &scoring, guest, answer(0, 1000), 1000).unwrap(),
            AnswerOutcome::Scored(0)
        );
        assert_eq!(
            score_answer(&mut state, &scoring, guest, answer(1, 1500), 1500).unwrap(),
            AnswerOutcome::Duplicate
        );
        let p = state.participants.get(&guest).unwrap();
        assert_eq!(p.score, 0);
        assert_eq!(p.answers.get(&0), Some(&0));
    }

    #[test]
    fn late_answer_for_past_question_keeps_current_status() {
        let (mut state, guest) = playing_state(0);
        state.advance_question(1);

        let outcome = score_answer(
            &mut state,
            &ScoringConfig::default(),
            guest,
            AnswerSubmission {
                question_index: 0,
                answer_index: 1,
                timestamp: 40_000,
            },
            40_000,
        )
        .unwrap();
        assert_eq!(outcome, AnswerOutcome::Scored(10));
        assert_eq!(
            state.participants.get(&guest).unwrap().connection_status,
            ConnectionStatus::Thinking
        );
    }

    #[test]
    fn answers_outside_play_are_rejected() {
        let (mut state, guest) = playing_state(0);
        let submission = AnswerSubmission {
            question_index: 7,
            answer_index: 0,
            timestamp: 0,
        };
        assert!(matches!(
            score_answer(&mut state, &ScoringConfig::default(), guest, submission, 0),
            Err(SessionError::QuestionOutOfRange(7))
        ));

        state.phase = SessionPhase::Finished;
        let submission = AnswerSubmission {
            question_index: 0,
            ..submission
        };
        assert!(matches!(
            score_answer(&mut state, &ScoringConfig::default(), guest, submission, 0),
            Err(SessionError::InvalidPhase { .. })
        ));
    }

    #[test]
    fn answers_ahead_of_the_clock_are_refused() {
        let (mut state, guest) = playing_state(0);
        let scoring = ScoringConfig::default();
        let ahead = AnswerSubmission {
            question_index: 2,
            answer_index: 0,
            timestamp: 1000,
        };
        assert!(matches!(
            score_answer(&mut state, &scoring, guest, ahead, 1000),
            Err(SessionError::QuestionNotOpen(2))
        ));
        assert!(state.participants.get(&guest).unwrap().answers.is_empty());

        // Open once the host clock reaches it, even before the next tick
        let outcome = score_answer(&mut state, &scoring, guest, ahead, 60_500).unwrap();
        assert!(matches!(outcome, AnswerOutcome::Scored(_)));
    }

    #[test]
    fn unknown_participant_cannot_answer() {
        let (mut state, _) = playing_state(0);
        let stranger = ParticipantId::try_from("peer_x").unwrap();
        let submission = AnswerSubmission {
            question_index: 0,
            answer_index: 1,
            timestamp: 0,
        };
        assert!(matches!(
            score_answer(&mut state, &ScoringConfig::default(), stranger, submission, 0),
            Err(SessionError::UnknownParticipant(_))
        ));
    }

    #[test]
    fn rejoining_participant_status_tracks_phase() {
        let (mut state, guest) = playing_state(0);
        assert_eq!(active_status(&state, guest), ConnectionStatus::Thinking);

        state
            .participants
            .get_mut(&guest)
            .unwrap()
            .answers
            .insert(0, 2);
        assert_eq!(active_status(&state, guest), ConnectionStatus::Answered);

        state.phase = SessionPhase::Waiting;
        assert_eq!(active_status(&state, guest), ConnectionStatus::Connected);
    }
}
