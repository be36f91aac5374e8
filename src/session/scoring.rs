//! Clock-derived question timing and speed-weighted scoring.
//!
//! Every replica derives the current question from the shared start
//! timestamp and its own clock. Nothing is broadcast per question.

use std::time::Duration;

use super::types::{Participant, Standing};

pub const DEFAULT_BASE_POINTS: u32 = 10;
pub const DEFAULT_MAX_SPEED_BONUS: u32 = 5;
pub const DEFAULT_SPEED_BONUS_WINDOW: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub base_points: u32,
    pub max_speed_bonus: u32,
    /// Answers slower than this earn no bonus
    pub speed_bonus_window: Duration,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_points: DEFAULT_BASE_POINTS,
            max_speed_bonus: DEFAULT_MAX_SPEED_BONUS,
            speed_bonus_window: DEFAULT_SPEED_BONUS_WINDOW,
        }
    }
}

impl ScoringConfig {
    /// `base + round(bonus * max(0, 1 - latency / window))` for a correct
    /// answer, zero otherwise.
    pub fn calculate_points(&self, correct: bool, latency_ms: u64) -> u32 {
        if !correct {
            return 0;
        }
        let window = self.speed_bonus_window.as_millis() as f64;
        let remaining = if window > 0.0 {
            (1.0 - latency_ms as f64 / window).max(0.0)
        } else {
            0.0
        };
        self.base_points + (f64::from(self.max_speed_bonus) * remaining).round() as u32
    }
}

fn question_ms(seconds_per_question: u32) -> u64 {
    u64::from(seconds_per_question) * 1000
}

/// Epoch milliseconds at which `question_index` opened
pub fn question_opened_at(start_ms: u64, seconds_per_question: u32, question_index: usize) -> u64 {
    start_ms + question_index as u64 * question_ms(seconds_per_question)
}

/// Milliseconds between the question opening and the answer. Answers stamped
/// before the question opened count as instant.
pub fn response_latency(
    start_ms: u64,
    seconds_per_question: u32,
    question_index: usize,
    answered_at_ms: u64,
) -> u64 {
    answered_at_ms.saturating_sub(question_opened_at(start_ms, seconds_per_question, question_index))
}

/// `min(floor((now - start) / duration), total - 1)`
pub fn current_question_index(
    start_ms: u64,
    seconds_per_question: u32,
    total_questions: usize,
    now_ms: u64,
) -> usize {
    let duration = question_ms(seconds_per_question);
    if total_questions == 0 || duration == 0 {
        return 0;
    }
    let elapsed = now_ms.saturating_sub(start_ms);
    let index = usize::try_from(elapsed / duration).unwrap_or(usize::MAX);
    index.min(total_questions - 1)
}

/// Time left on the current question, zero once it has run out
pub fn time_remaining(
    start_ms: u64,
    seconds_per_question: u32,
    total_questions: usize,
    now_ms: u64,
) -> Duration {
    let index = current_question_index(start_ms, seconds_per_question, total_questions, now_ms);
    let closes_at = question_opened_at(start_ms, seconds_per_question, index + 1);
    Duration::from_millis(closes_at.saturating_sub(now_ms))
}

/// Participants by descending score. Ties keep roster order.
pub fn final_standings<'a>(participants: impl IntoIterator<Item = &'a Participant>) -> Vec<Standing> {
    let mut standings: Vec<Standing> = participants
        .into_iter()
        .map(|p| Standing {
            id: p.id,
            display_name: p.display_name.clone(),
            score: p.score,
        })
        .collect();
    standings.sort_by(|a, b| b.score.cmp(&a.score));
    standings
}
