use std::sync::Arc;

use tokio::sync::mpsc;

use super::types::{Participant, Roster, SessionPhase, Standing};

/// Callbacks fired by a session coordinator. All methods default to no-ops.
///
/// Called from the coordinator's task; implementations must not block.
pub trait SessionObserver: Send + Sync {
    fn on_state_change(&self, _phase: SessionPhase) {}
    fn on_participants_change(&self, _participants: &[Participant]) {}
    fn on_question_change(&self, _question_index: usize) {}
    fn on_score_update(&self, _participants: &[Participant]) {}
    fn on_quiz_end(&self, _standings: &[Standing]) {}
}

/// Owned form of the observer callbacks, for channel subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(SessionPhase),
    ParticipantsChanged(Vec<Participant>),
    QuestionChanged(usize),
    ScoresUpdated(Vec<Participant>),
    QuizEnded(Vec<Standing>),
}

impl SessionObserver for mpsc::UnboundedSender<SessionEvent> {
    fn on_state_change(&self, phase: SessionPhase) {
        let _ = self.send(SessionEvent::StateChanged(phase));
    }

    fn on_participants_change(&self, participants: &[Participant]) {
        let _ = self.send(SessionEvent::ParticipantsChanged(participants.to_vec()));
    }

    fn on_question_change(&self, question_index: usize) {
        let _ = self.send(SessionEvent::QuestionChanged(question_index));
    }

    fn on_score_update(&self, participants: &[Participant]) {
        let _ = self.send(SessionEvent::ScoresUpdated(participants.to_vec()));
    }

    fn on_quiz_end(&self, standings: &[Standing]) {
        let _ = self.send(SessionEvent::QuizEnded(standings.to_vec()));
    }
}

#[derive(Clone, Default)]
pub(crate) struct Observers(Vec<Arc<dyn SessionObserver>>);

impl Observers {
    pub fn new(observers: Vec<Arc<dyn SessionObserver>>) -> Self {
        Self(observers)
    }

    pub fn push(&mut self, observer: Arc<dyn SessionObserver>) {
        self.0.push(observer);
    }

    pub fn state_changed(&self, phase: SessionPhase) {
        for observer in &self.0 {
            observer.on_state_change(phase);
        }
    }

    pub fn participants_changed(&self, roster: &Roster) {
        if self.0.is_empty() {
            return;
        }
        let participants = roster.to_vec();
        for observer in &self.0 {
            observer.on_participants_change(&participants);
        }
    }

    pub fn question_changed(&self, question_index: usize) {
        for observer in &self.0 {
            observer.on_question_change(question_index);
        }
    }

    pub fn scores_updated(&self, roster: &Roster) {
        if self.0.is_empty() {
            return;
        }
        let participants = roster.to_vec();
        for observer in &self.0 {
            observer.on_score_update(&participants);
        }
    }

    pub fn quiz_ended(&self, standings: &[Standing]) {
        for observer in &self.0 {
            observer.on_quiz_end(standings);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::ParticipantId;

    struct PhaseOnly;
    impl SessionObserver for PhaseOnly {}

    #[test]
    fn channel_observer_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut observers = Observers::default();
        observers.push(Arc::new(PhaseOnly));
        observers.push(Arc::new(tx));

        let roster = Roster::from(vec![Participant::new(ParticipantId::try_from("a").unwrap(), "A", true)]);
        observers.state_changed(SessionPhase::Playing);
        observers.question_changed(2);
        observers.participants_changed(&roster);

        assert_eq!(rx.try_recv().unwrap(), SessionEvent::StateChanged(SessionPhase::Playing));
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::QuestionChanged(2));
        match rx.try_recv().unwrap() {
            SessionEvent::ParticipantsChanged(list) => assert_eq!(list[0].display_name, "A"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn closed_channel_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel::<SessionEvent>();
        drop(rx);
        let observers = Observers::new(vec![Arc::new(tx)]);
        observers.quiz_ended(&[]);
    }
}
