use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Progression mode of a quiz instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuizType {
    /// Every participant sees the same question; the creator gates advancement.
    Sync,
    /// Each participant advances independently on their own answers and timeouts.
    Async,
}

/// Lifecycle status of a quiz instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Waiting,
    Active,
    Finished,
}

impl InstanceStatus {
    /// Whether the instance may move to `next`. Transitions are one-way:
    /// `waiting → active → finished`, each taken at most once.
    pub fn may_become(self, next: InstanceStatus) -> bool {
        matches!(
            (self, next),
            (InstanceStatus::Waiting, InstanceStatus::Active)
                | (InstanceStatus::Active, InstanceStatus::Finished)
        )
    }
}

/// Kind of a question, driving the client-side input widget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Open,
    MultipleChoice,
}

/// Instance record as returned by the quiz catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub quiz_type: QuizType,
    pub status: InstanceStatus,
    #[serde(default)]
    pub settings: QuizSettings,
}

/// One question with its grading key. The `correct_answer` field never
/// leaves the server; participants receive [`QuestionView`] projections.
///
/// [`QuestionView`]: crate::dto::ws::QuestionView
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionSpec {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(default)]
    pub options: Vec<String>,
    /// JSON-encoded expected value, compared loosely on submission.
    pub correct_answer: String,
    pub order_index: usize,
    pub max_score: i64,
    /// Zero disables the per-question timer.
    pub time_limit_sec: u32,
}

/// Authoring-time settings carried opaquely alongside the questions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuizSettings {
    #[serde(default)]
    pub random_order: bool,
    #[serde(default)]
    pub time_limit_total: u32,
    #[serde(default)]
    pub show_correct_answers: bool,
    #[serde(default)]
    pub allow_review: bool,
}

/// Per-instance quiz payload cached for the lifetime of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizData {
    pub quiz_type: QuizType,
    pub creator_id: Uuid,
    pub questions: Vec<QuestionSpec>,
    #[serde(default)]
    pub settings: QuizSettings,
}

impl QuizData {
    /// Locate a question and its zero-based index by id. The server never
    /// trusts a client-supplied index.
    pub fn question_by_id(&self, question_id: &str) -> Option<(usize, &QuestionSpec)> {
        self.questions
            .iter()
            .enumerate()
            .find(|(_, question)| question.id == question_id)
    }
}

/// One row of a leaderboard snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub user_id: Uuid,
    pub score: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_status_transitions_are_one_way() {
        assert!(InstanceStatus::Waiting.may_become(InstanceStatus::Active));
        assert!(InstanceStatus::Active.may_become(InstanceStatus::Finished));

        assert!(!InstanceStatus::Waiting.may_become(InstanceStatus::Finished));
        assert!(!InstanceStatus::Active.may_become(InstanceStatus::Waiting));
        assert!(!InstanceStatus::Finished.may_become(InstanceStatus::Active));
        assert!(!InstanceStatus::Finished.may_become(InstanceStatus::Waiting));
        assert!(!InstanceStatus::Active.may_become(InstanceStatus::Active));
    }

    #[test]
    fn question_lookup_ignores_client_ordering() {
        let data = QuizData {
            quiz_type: QuizType::Sync,
            creator_id: Uuid::new_v4(),
            questions: vec![
                QuestionSpec {
                    id: "q-b".into(),
                    text: "Second".into(),
                    kind: QuestionKind::Open,
                    options: vec![],
                    correct_answer: "\"x\"".into(),
                    order_index: 1,
                    max_score: 10,
                    time_limit_sec: 0,
                },
                QuestionSpec {
                    id: "q-a".into(),
                    text: "First".into(),
                    kind: QuestionKind::Open,
                    options: vec![],
                    correct_answer: "\"y\"".into(),
                    order_index: 0,
                    max_score: 10,
                    time_limit_sec: 0,
                },
            ],
            settings: QuizSettings::default(),
        };

        let (index, question) = data.question_by_id("q-a").expect("question present");
        assert_eq!(index, 1);
        assert_eq!(question.text, "First");
        assert!(data.question_by_id("missing").is_none());
    }
}
