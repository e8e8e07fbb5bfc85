use std::time::SystemTime;

use mongodb::bson::{DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::dao::models::{SessionEntity, SessionStatus};

/// Session row as persisted in the `sessions` collection. Answers are kept
/// as a JSON-encoded array; the composite `(instance_id, user_id)` key is
/// flattened into the `_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    pub instance_id: Uuid,
    pub user_id: Uuid,
    pub status: SessionStatus,
    pub current_question_index: i64,
    pub score: i64,
    pub answers: String,
    pub started_at: DateTime,
    pub finished_at: Option<DateTime>,
}

pub fn session_key(instance_id: Uuid, user_id: Uuid) -> String {
    format!("{instance_id}:{user_id}")
}

pub fn doc_id(instance_id: Uuid, user_id: Uuid) -> Document {
    doc! {"_id": session_key(instance_id, user_id)}
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        let answers = serde_json::to_string(&value.answers).unwrap_or_else(|_| "[]".to_owned());
        Self {
            id: session_key(value.instance_id, value.user_id),
            instance_id: value.instance_id,
            user_id: value.user_id,
            status: value.status,
            current_question_index: value.current_question_index as i64,
            score: value.score,
            answers,
            started_at: DateTime::from_system_time(SystemTime::from(value.started_at)),
            finished_at: value
                .finished_at
                .map(|at| DateTime::from_system_time(SystemTime::from(at))),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        let answers =
            serde_json::from_str(&value.answers).map_err(|source| MongoDaoError::DecodeAnswers {
                key: value.id.clone(),
                source,
            })?;

        Ok(Self {
            instance_id: value.instance_id,
            user_id: value.user_id,
            status: value.status,
            current_question_index: value.current_question_index.max(0) as usize,
            score: value.score,
            answers,
            started_at: OffsetDateTime::from(value.started_at.to_system_time()),
            finished_at: value
                .finished_at
                .map(|at| OffsetDateTime::from(at.to_system_time())),
        })
    }
}
