//! Quiz session coordination over the peer mesh.
//!
//! The host owns the authoritative `SessionState`; guests hold replicas fed
//! by `session_info`, `quiz_start`, `score_update` and `quiz_end` messages.
//! Both sides run as actors and publish snapshots through a `watch`
//! channel, so reads never wait on the actor.

mod clock;
mod guest;
mod host;
mod messages;
mod observer;
mod scoring;
mod types;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;

use crate::registry::{HttpRoomRegistry, RegistryError, RoomDirectory};
use crate::relay::{ParticipantId, RoomCode};
use crate::signaling::{HttpSignalRelay, SignalRelay, SignalingError};
use crate::transport::{PeerConnector, WebRtcConnector};

pub use clock::{Clock, MonotonicClock, SystemClock};
pub use guest::{GuestConfig, GuestCoordinator};
pub use host::{
    DEFAULT_ROSTER_POLL_INTERVAL, DEFAULT_SECONDS_PER_QUESTION, DEFAULT_TICK_INTERVAL, HostConfig,
    HostCoordinator,
};
pub use messages::{
    AnswerSubmission, MESSAGE_TYPES, ProtocolViolation, QuizEnd, QuizStart, ScoreEntry,
    ScoreUpdate, SessionMessage,
};
pub use observer::{SessionEvent, SessionObserver};
pub use scoring::{
    DEFAULT_BASE_POINTS, DEFAULT_MAX_SPEED_BONUS, DEFAULT_SPEED_BONUS_WINDOW, ScoringConfig,
    current_question_index, final_standings, question_opened_at, response_latency,
    time_remaining,
};
pub use types::{
    ConnectionStatus, Participant, Question, Quiz, Roster, SessionPhase, SessionState, Standing,
};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot {operation} while the session is {phase}")]
    InvalidPhase {
        operation: &'static str,
        phase: SessionPhase,
    },

    #[error("quiz has no questions")]
    EmptyQuiz,

    #[error("question {0} does not exist")]
    QuestionOutOfRange(usize),

    #[error("question {0} has not opened yet")]
    QuestionNotOpen(usize),

    #[error("{0} is not in this session")]
    UnknownParticipant(ParticipantId),

    #[error("registry request failed: {0}")]
    Registry(#[from] RegistryError),

    #[error("signaling unavailable: {0}")]
    Signaling(#[from] SignalingError),

    #[error("quiz could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    /// The coordinator task has stopped
    #[error("session is closed")]
    Closed,
}

/// What happened to a submitted answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    /// Scored by the host, with the points awarded
    Scored(u32),
    /// Sent to the host; the score arrives with the next update
    Submitted,
    /// Already answered; nothing changed
    Duplicate,
    /// No open channel to the host; the answer was not recorded
    Undelivered,
}

/// Collaborators shared by host and guest coordinators
#[derive(Clone)]
pub struct SessionDeps {
    pub registry: Arc<dyn RoomDirectory>,
    pub relay: Arc<dyn SignalRelay>,
    pub connector: Arc<dyn PeerConnector>,
    pub clock: Arc<dyn Clock>,
    pub observers: Vec<Arc<dyn SessionObserver>>,
}

impl SessionDeps {
    /// Registry and relay over HTTP, peers over WebRTC with the default STUN
    /// server, wall-clock time and no observers.
    pub fn networked(
        registry_url: impl Into<String>,
        relay_url: impl Into<String>,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            registry: Arc::new(HttpRoomRegistry::new(registry_url)?),
            relay: Arc::new(HttpSignalRelay::new(relay_url)?),
            connector: Arc::new(WebRtcConnector::default()),
            clock: Arc::new(SystemClock),
            observers: Vec::new(),
        })
    }
}

/// Read side of a coordinator
pub struct SessionView {
    local_id: ParticipantId,
    state: watch::Receiver<SessionState>,
    clock: Arc<dyn Clock>,
}

impl SessionView {
    pub(crate) fn new(
        local_id: ParticipantId,
        state: watch::Receiver<SessionState>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            local_id,
            state,
            clock,
        }
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Wait until the published state satisfies `predicate`.
    /// Returns `Closed` if the coordinator stops first.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState, SessionError> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(state.clone())
    }

    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }
}

/// Operations common to host and guest
pub trait Coordinator {
    fn view(&self) -> &SessionView;

    fn local_id(&self) -> ParticipantId {
        self.view().local_id()
    }

    fn room_code(&self) -> RoomCode {
        self.view().state.borrow().room_code
    }

    fn state(&self) -> SessionState {
        self.view().snapshot()
    }

    fn phase(&self) -> SessionPhase {
        self.view().state.borrow().phase
    }

    fn current_question_index(&self) -> usize {
        self.view().state.borrow().current_question_index
    }

    fn current_question(&self) -> Option<Question> {
        self.view().state.borrow().current_question().cloned()
    }

    /// Zero unless a question is open
    fn time_remaining(&self) -> Duration {
        let view = self.view();
        let state = view.state.borrow();
        match (state.phase, state.start_timestamp) {
            (SessionPhase::Playing, Some(start)) => time_remaining(
                start,
                state.seconds_per_question,
                state.total_questions(),
                view.now_ms(),
            ),
            _ => Duration::ZERO,
        }
    }

    fn participants(&self) -> Vec<Participant> {
        self.view().state.borrow().participants.to_vec()
    }

    fn standings(&self) -> Vec<Standing> {
        final_standings(self.view().state.borrow().participants.iter())
    }

    /// This participant's own roster entry
    fn me(&self) -> Option<Participant> {
        let view = self.view();
        let state = view.state.borrow();
        state.participants.get(&view.local_id).cloned()
    }

    fn submit_answer(
        &self,
        question_index: usize,
        answer_index: usize,
    ) -> impl Future<Output = Result<AnswerOutcome, SessionError>> + Send;

    fn subscribe(&self, observer: Arc<dyn SessionObserver>) -> impl Future<Output = ()> + Send;

    /// Leave (guest) or close (host) the session. Safe to call more than once.
    fn end_session(&self) -> impl Future<Output = ()> + Send;
}
