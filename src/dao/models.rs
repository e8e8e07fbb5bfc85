use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle status of a participant session within one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Joined,
    InProgress,
    Finished,
}

impl SessionStatus {
    /// Whether this session counts toward progress and "all answered"
    /// evaluation. Sessions that merely joined a waiting instance do not.
    pub fn has_started(self) -> bool {
        matches!(self, SessionStatus::InProgress | SessionStatus::Finished)
    }

    /// Wire/storage representation, matching the serde rename.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Joined => "joined",
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Finished => "finished",
        }
    }
}

/// One graded answer, appended to the session record on submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub question_id: String,
    pub answer: String,
    pub is_correct: bool,
    pub score: i64,
    pub time_spent_ms: i64,
}

/// Durable per-participant state, keyed by `(instance_id, user_id)`.
///
/// Created on first join, mutated only by the hub, never deleted. Survives
/// reconnects; finalized with `status = finished` and `finished_at` set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntity {
    pub instance_id: Uuid,
    pub user_id: Uuid,
    pub status: SessionStatus,
    /// Next unanswered question, 0-based. Monotonically non-decreasing.
    pub current_question_index: usize,
    /// Running total; always the sum of the recorded answer scores.
    pub score: i64,
    pub answers: Vec<AnswerRecord>,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
}

impl SessionEntity {
    /// Fresh session for a user who just joined an instance.
    pub fn joined(instance_id: Uuid, user_id: Uuid) -> Self {
        Self {
            instance_id,
            user_id,
            status: SessionStatus::Joined,
            current_question_index: 0,
            score: 0,
            answers: vec![],
            started_at: OffsetDateTime::now_utc(),
            finished_at: None,
        }
    }

}
