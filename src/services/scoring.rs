//! Pure scoring rules and leaderboard projection.

use serde_json::Value;
use uuid::Uuid;

use crate::{dao::models::SessionEntity, dto::quiz::LeaderboardEntry};

/// Score awarded for a correct answer: the full `max_score` for untimed
/// questions, otherwise linearly decaying from `max_score` (instantaneous)
/// down to half of it at the deadline.
pub fn calculate_score(max_score: i64, time_spent_ms: i64, time_limit_ms: i64) -> i64 {
    if time_limit_ms == 0 {
        return max_score;
    }

    let time_ratio = (time_spent_ms as f64 / time_limit_ms as f64).min(1.0);
    (max_score as f64 * (1.0 - 0.5 * time_ratio)) as i64
}

/// Loose comparison between a submitted answer and the stored grading key.
///
/// The key is JSON-decoded and stringified before a trim + lowercase
/// comparison; when it is not valid JSON the raw payloads are compared the
/// same way. Designers selecting exact-match open questions must encode the
/// expected form accordingly.
pub fn answer_matches(answer: &str, correct_answer: &str) -> bool {
    let expected = match serde_json::from_str::<Value>(correct_answer) {
        Ok(value) => stringify(value),
        Err(_) => correct_answer.to_owned(),
    };

    normalize(answer) == normalize(&expected)
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Leaderboard snapshot over an instance's sessions. The creator never
/// appears; ranks are 1-based over the store's `(score desc, started_at
/// asc)` ordering.
pub fn leaderboard(sessions: &[SessionEntity], creator_id: Uuid) -> Vec<LeaderboardEntry> {
    sessions
        .iter()
        .filter(|session| session.user_id != creator_id)
        .enumerate()
        .map(|(position, session)| LeaderboardEntry {
            rank: position + 1,
            user_id: session.user_id,
            score: session.score,
        })
        .collect()
}

/// Participant progress on one question: how many started sessions exist
/// and how many of them have moved past `question_index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuestionProgress {
    pub participants: usize,
    pub answered: usize,
}

impl QuestionProgress {
    /// An empty instance never counts as fully answered.
    pub fn all_answered(self) -> bool {
        self.participants > 0 && self.answered >= self.participants
    }
}

/// Evaluate progress on `question_index` over an instance's sessions,
/// skipping the creator and sessions that never started.
pub fn question_progress(
    sessions: &[SessionEntity],
    creator_id: Uuid,
    question_index: usize,
) -> QuestionProgress {
    let mut progress = QuestionProgress {
        participants: 0,
        answered: 0,
    };

    for session in sessions {
        if session.user_id == creator_id || !session.status.has_started() {
            continue;
        }
        progress.participants += 1;
        if session.current_question_index > question_index {
            progress.answered += 1;
        }
    }

    progress
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;
    use crate::dao::models::SessionStatus;

    #[test]
    fn untimed_questions_score_full_marks() {
        assert_eq!(calculate_score(10, 999_999, 0), 10);
    }

    #[test]
    fn score_decays_linearly_and_floors_at_half() {
        // 20% of the limit spent keeps 90% of the points.
        assert_eq!(calculate_score(10, 2_000, 10_000), 9);
        assert_eq!(calculate_score(10, 5_000, 10_000), 7);
        // At and beyond the deadline the floor is half the maximum.
        assert_eq!(calculate_score(10, 10_000, 10_000), 5);
        assert_eq!(calculate_score(10, 25_000, 10_000), 5);
        // Instantaneous answers take the full score.
        assert_eq!(calculate_score(10, 0, 10_000), 10);
    }

    #[test]
    fn fractional_scores_truncate() {
        // 10 * (1 - 0.5 * 0.1) = 9.5
        assert_eq!(calculate_score(10, 1_000, 10_000), 9);
        // 10 * (1 - 0.5 * 0.05) = 9.75
        assert_eq!(calculate_score(10, 500, 10_000), 9);
    }

    #[test]
    fn matching_decodes_json_keys() {
        assert!(answer_matches("Paris", "\"paris\""));
        assert!(answer_matches("  42 ", "42"));
        assert!(answer_matches("TRUE", "true"));
        assert!(!answer_matches("Lyon", "\"paris\""));
    }

    #[test]
    fn matching_falls_back_to_raw_comparison() {
        // Not valid JSON: compared verbatim after trim + lowercase.
        assert!(answer_matches("blue whale", "Blue Whale"));
        assert!(!answer_matches("blue", "Blue Whale"));
    }

    #[test]
    fn leaderboard_skips_creator_and_ranks_in_order() {
        let instance = Uuid::new_v4();
        let creator = Uuid::new_v4();

        let mut top = SessionEntity::joined(instance, Uuid::new_v4());
        top.score = 18;
        let mut runner_up = SessionEntity::joined(instance, Uuid::new_v4());
        runner_up.score = 9;
        let mut creator_session = SessionEntity::joined(instance, creator);
        creator_session.score = 50;

        // Pre-sorted per the store contract.
        let sessions = vec![creator_session, top.clone(), runner_up.clone()];
        let board = leaderboard(&sessions, creator);

        assert_eq!(board.len(), 2);
        assert_eq!(
            (board[0].rank, board[0].user_id, board[0].score),
            (1, top.user_id, 18)
        );
        assert_eq!(
            (board[1].rank, board[1].user_id, board[1].score),
            (2, runner_up.user_id, 9)
        );
    }

    #[test]
    fn progress_ignores_creator_and_unstarted_sessions() {
        let instance = Uuid::new_v4();
        let creator = Uuid::new_v4();

        let mut answered = SessionEntity::joined(instance, Uuid::new_v4());
        answered.status = SessionStatus::InProgress;
        answered.current_question_index = 1;
        let mut pending = SessionEntity::joined(instance, Uuid::new_v4());
        pending.status = SessionStatus::InProgress;
        pending.started_at += Duration::seconds(1);
        let idle = SessionEntity::joined(instance, Uuid::new_v4());
        let creator_session = SessionEntity::joined(instance, creator);

        let sessions = vec![answered, pending.clone(), idle, creator_session];
        let progress = question_progress(&sessions, creator, 0);
        assert_eq!(progress.participants, 2);
        assert_eq!(progress.answered, 1);
        assert!(!progress.all_answered());

        // The instance with no started participants never auto-advances.
        let empty = question_progress(&[], creator, 0);
        assert!(!empty.all_answered());
    }
}
