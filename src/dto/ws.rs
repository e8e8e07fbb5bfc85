use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::quiz::{InstanceStatus, LeaderboardEntry, QuestionKind, QuizType};

/// Raw inbound frame as it arrives on the wire: `{type, payload?}`.
///
/// The type tag is kept as a string so unknown types can be echoed back in
/// the error message instead of being swallowed by enum deserialization.
#[derive(Debug, Deserialize, ToSchema)]
pub struct InboundFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl InboundFrame {
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Classify the frame into a command. Payload parsing for `answer` is
    /// deferred to the handler so a malformed payload yields its own error
    /// without tearing down the connection.
    pub fn into_command(self) -> ClientCommand {
        match self.kind.as_str() {
            "join" => ClientCommand::Join,
            "start_quiz" => ClientCommand::StartQuiz,
            "answer" => ClientCommand::Answer(self.payload.unwrap_or(Value::Null)),
            "continue" => ClientCommand::Continue,
            "ping" => ClientCommand::Ping,
            _ => ClientCommand::Unknown(self.kind),
        }
    }
}

/// Decoded client intent dispatched through the hub.
#[derive(Debug, Clone)]
pub enum ClientCommand {
    /// Join is implicit in the connection handshake; explicit joins are
    /// tolerated and ignored.
    Join,
    StartQuiz,
    /// Raw `answer` payload, parsed into [`AnswerPayload`] by the handler.
    Answer(Value),
    Continue,
    Ping,
    Unknown(String),
}

/// Payload of an `answer` message.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct AnswerPayload {
    pub question_id: String,
    pub answer: String,
    /// Client-reported elapsed time; informational only. The server derives
    /// its own measurement from the stored question start.
    #[serde(default)]
    pub time_spent_ms: Option<i64>,
}

/// Messages pushed to connected quiz clients, serialized as `{type, payload}`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected(ConnectedPayload),
    ParticipantsUpdate(ParticipantsUpdatePayload),
    QuizStarted(QuizStartedPayload),
    Question(QuestionPayload),
    AnswerResult(AnswerResultPayload),
    Leaderboard(LeaderboardPayload),
    TimeExpired(TimeExpiredPayload),
    WaitingForCreator(WaitingForCreatorPayload),
    QuizFinished(QuizFinishedPayload),
    Error(ErrorPayload),
    Pong,
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorPayload {
            message: message.into(),
        })
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConnectedPayload {
    pub session_id: String,
    pub quiz_type: QuizType,
    pub quiz_status: InstanceStatus,
    pub is_creator: bool,
}

/// Membership change notification, fanned out to the whole instance.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ParticipantsUpdatePayload {
    pub action: ParticipantAction,
    pub user_id: Uuid,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantAction {
    Joined,
    Left,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuizStartedPayload {
    pub quiz_type: QuizType,
}

/// Public projection of a question, without the grading key.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionView {
    pub id: String,
    pub text: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    pub order_index: usize,
    pub max_score: i64,
    pub time_limit_sec: u32,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuestionPayload {
    pub question: QuestionView,
    pub question_index: usize,
    pub total_questions: usize,
    /// Remaining time for this exposure; absent when the question is untimed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_ms: Option<i64>,
    pub server_time: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AnswerResultPayload {
    pub is_correct: bool,
    pub score: i64,
    pub time_spent_ms: i64,
    pub total_score: i64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct LeaderboardPayload {
    pub leaderboard: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TimeExpiredPayload {
    pub question_index: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WaitingForCreatorPayload {
    pub question_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct QuizFinishedPayload {
    pub final_score: i64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorPayload {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_frame_classifies_known_and_unknown_types() {
        let frame = InboundFrame::from_json_str(r#"{"type":"start_quiz"}"#).unwrap();
        assert!(matches!(frame.into_command(), ClientCommand::StartQuiz));

        let frame = InboundFrame::from_json_str(
            r#"{"type":"answer","payload":{"question_id":"q1","answer":"42"}}"#,
        )
        .unwrap();
        match frame.into_command() {
            ClientCommand::Answer(payload) => {
                let parsed: AnswerPayload = serde_json::from_value(payload).unwrap();
                assert_eq!(parsed.question_id, "q1");
                assert_eq!(parsed.answer, "42");
                assert_eq!(parsed.time_spent_ms, None);
            }
            other => panic!("expected answer command, got {other:?}"),
        }

        let frame = InboundFrame::from_json_str(r#"{"type":"shout"}"#).unwrap();
        match frame.into_command() {
            ClientCommand::Unknown(kind) => assert_eq!(kind, "shout"),
            other => panic!("expected unknown command, got {other:?}"),
        }
    }

    #[test]
    fn server_messages_use_type_payload_framing() {
        let message = ServerMessage::TimeExpired(TimeExpiredPayload { question_index: 3 });
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "time_expired");
        assert_eq!(json["payload"]["question_index"], 3);

        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong["type"], "pong");
        assert!(pong.get("payload").is_none());

        let error = serde_json::to_value(ServerMessage::error("nope")).unwrap();
        assert_eq!(error["type"], "error");
        assert_eq!(error["payload"]["message"], "nope");
    }

    #[test]
    fn untimed_question_payload_omits_time_limit() {
        let payload = ServerMessage::Question(QuestionPayload {
            question: QuestionView {
                id: "q1".into(),
                text: "What is the answer?".into(),
                kind: QuestionKind::Open,
                options: vec![],
                order_index: 0,
                max_score: 10,
                time_limit_sec: 0,
            },
            question_index: 0,
            total_questions: 1,
            time_limit_ms: None,
            server_time: 1_700_000_000_000,
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["payload"].get("time_limit_ms").is_none());
        assert!(json["payload"]["question"].get("options").is_none());
        assert_eq!(json["payload"]["question"]["type"], "open");
    }
}
