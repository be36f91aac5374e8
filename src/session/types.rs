use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::relay::{ParticipantId, RoomCode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
}

/// Quiz payload. Content is produced elsewhere and treated as opaque here,
/// apart from the correct answer index used for scoring.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quiz {
    pub title: String,
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Thinking,
    Answered,
    Disconnected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
    pub is_host: bool,
    pub score: u32,
    /// question index -> answer index
    #[serde(default)]
    pub answers: BTreeMap<usize, usize>,
    /// question index -> response latency in ms
    #[serde(default)]
    pub answer_latencies: BTreeMap<usize, u64>,
    pub connection_status: ConnectionStatus,
}

impl Participant {
    pub fn new(id: ParticipantId, display_name: impl Into<String>, is_host: bool) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            is_host,
            score: 0,
            answers: BTreeMap::new(),
            answer_latencies: BTreeMap::new(),
            connection_status: ConnectionStatus::Connected,
        }
    }

    pub fn has_answered(&self, question_index: usize) -> bool {
        self.answers.contains_key(&question_index)
    }
}

/// Session phases. Ordered: a replica never moves backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Waiting,
    Playing,
    Finished,
    Ended,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionPhase::Waiting => "waiting",
            SessionPhase::Playing => "playing",
            SessionPhase::Finished => "finished",
            SessionPhase::Ended => "ended",
        })
    }
}

/// Participants stored densely in join order, looked up by ID.
///
/// Removal leaves a hole so existing slot indices stay valid; holes are
/// compacted once they outnumber live entries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Participant>", into = "Vec<Participant>")]
pub struct Roster {
    slots: Vec<Option<Participant>>,
    index: HashMap<ParticipantId, usize>,
}

impl Roster {
    /// Insert or replace in place. Returns true if the participant is new.
    pub fn insert(&mut self, participant: Participant) -> bool {
        if let Some(&slot) = self.index.get(&participant.id) {
            self.slots[slot] = Some(participant);
            return false;
        }
        self.index.insert(participant.id, self.slots.len());
        self.slots.push(Some(participant));
        true
    }

    pub fn get(&self, id: &ParticipantId) -> Option<&Participant> {
        self.index.get(id).and_then(|&slot| self.slots[slot].as_ref())
    }

    pub fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut Participant> {
        self.index.get(id).and_then(|&slot| self.slots[slot].as_mut())
    }

    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.index.contains_key(id)
    }

    pub fn remove(&mut self, id: &ParticipantId) -> Option<Participant> {
        let slot = self.index.remove(id)?;
        let removed = self.slots[slot].take();
        if self.slots.len() > 2 * self.index.len() {
            self.compact();
        }
        removed
    }

    fn compact(&mut self) {
        self.slots.retain(Option::is_some);
        self.index = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, p)| p.as_ref().map(|p| (p.id, slot)))
            .collect();
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.slots.iter().flatten()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Participant> {
        self.slots.iter_mut().flatten()
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn to_vec(&self) -> Vec<Participant> {
        self.iter().cloned().collect()
    }
}

impl From<Vec<Participant>> for Roster {
    fn from(participants: Vec<Participant>) -> Self {
        let mut roster = Roster::default();
        for participant in participants {
            roster.insert(participant);
        }
        roster
    }
}

impl From<Roster> for Vec<Participant> {
    fn from(roster: Roster) -> Self {
        roster.slots.into_iter().flatten().collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub room_code: RoomCode,
    pub phase: SessionPhase,
    pub quiz: Quiz,
    /// Epoch milliseconds at which question 0 opened
    pub start_timestamp: Option<u64>,
    pub seconds_per_question: u32,
    pub current_question_index: usize,
    pub participants: Roster,
}

impl SessionState {
    pub fn new(room_code: RoomCode, quiz: Quiz, seconds_per_question: u32) -> Self {
        Self {
            room_code,
            phase: SessionPhase::Waiting,
            quiz,
            start_timestamp: None,
            seconds_per_question,
            current_question_index: 0,
            participants: Roster::default(),
        }
    }

    pub fn total_questions(&self) -> usize {
        self.quiz.questions.len()
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.quiz.questions.get(self.current_question_index)
    }

    /// Move to a later question, putting everyone who has not answered it
    /// back to `Thinking`. Returns false if `index` is not ahead.
    pub fn advance_question(&mut self, index: usize) -> bool {
        if index <= self.current_question_index {
            return false;
        }
        self.current_question_index = index;
        for participant in self.participants.iter_mut() {
            if participant.connection_status != ConnectionStatus::Disconnected
                && !participant.has_answered(index)
            {
                participant.connection_status = ConnectionStatus::Thinking;
            }
        }
        true
    }
}

/// Final placing of one participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub id: ParticipantId,
    pub display_name: String,
    pub score: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(id: &str) -> Participant {
        Participant::new(ParticipantId::try_from(id).unwrap(), id, false)
    }

    #[test]
    fn roster_keeps_join_order_across_removals() {
        let mut roster = Roster::default();
        for id in ["a", "b", "c", "d"] {
            assert!(roster.insert(participant(id)));
        }
        roster.remove(&ParticipantId::try_from("b").unwrap());
        roster.remove(&ParticipantId::try_from("c").unwrap());
        roster.insert(participant("e"));

        let ids: Vec<&str> = roster.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d", "e"]);
        assert_eq!(roster.len(), 3);
        assert_eq!(roster.get(&ParticipantId::try_from("d").unwrap()).unwrap().display_name, "d");
    }

    #[test]
    fn roster_insert_replaces_in_place() {
        let mut roster = Roster::from(vec![participant("a"), participant("b")]);
        let mut updated = participant("a");
        updated.score = 7;

        assert!(!roster.insert(updated));
        let first = roster.iter().next().unwrap();
        assert_eq!(first.id.as_str(), "a");
        assert_eq!(first.score, 7);
    }

    #[test]
    fn roster_serializes_as_list() {
        let roster = Roster::from(vec![participant("a"), participant("b")]);
        let json = serde_json::to_value(&roster).unwrap();
        assert!(json.is_array());
        assert_eq!(json[1]["id"], "b");
        assert_eq!(json[0]["connectionStatus"], "connected");

        let back: Roster = serde_json::from_value(json).unwrap();
        assert_eq!(back.to_vec(), roster.to_vec());
    }

    #[test]
    fn answers_keep_integer_keys_through_json() {
        let mut p = participant("a");
        p.answers.insert(2, 1);
        p.answer_latencies.insert(2, 1500);

        let back: Participant = serde_json::from_str(&serde_json::to_string(&p).unwrap()).unwrap();
        assert_eq!(back.answers.get(&2), Some(&1));
        assert_eq!(back.answer_latencies.get(&2), Some(&1500));
    }

    #[test]
    fn advance_resets_unanswered_to_thinking() {
        let mut state = SessionState::new(RoomCode::try_from("room0001").unwrap(), Quiz::default(), 30);
        let mut early = participant("early");
        early.answers.insert(1, 0);
        early.connection_status = ConnectionStatus::Answered;
        let mut gone = participant("gone");
        gone.connection_status = ConnectionStatus::Disconnected;
        let mut slow = participant("slow");
        slow.connection_status = ConnectionStatus::Answered;
        state.participants = Roster::from(vec![early, gone, slow]);

        assert!(state.advance_question(1));
        assert!(!state.advance_question(1));
        assert!(!state.advance_question(0));

        let statuses: Vec<ConnectionStatus> =
            state.participants.iter().map(|p| p.connection_status).collect();
        assert_eq!(
            statuses,
            vec![
                ConnectionStatus::Answered,
                ConnectionStatus::Disconnected,
                ConnectionStatus::Thinking
            ]
        );
    }

    #[test]
    fn phases_are_ordered() {
        assert!(SessionPhase::Waiting < SessionPhase::Playing);
        assert!(SessionPhase::Finished < SessionPhase::Ended);
    }
}
