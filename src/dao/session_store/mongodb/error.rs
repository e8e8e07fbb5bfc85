use mongodb::error::Error as MongoError;
use thiserror::Error;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to save session `{key}`")]
    SaveSession {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load session `{key}`")]
    LoadSession {
        key: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list sessions for instance `{instance_id}`")]
    ListSessions {
        instance_id: String,
        #[source]
        source: MongoError,
    },
    #[error("no stored session for `{key}`")]
    SessionMissing { key: String },
    #[error("stored answers for session `{key}` are not valid JSON")]
    DecodeAnswers {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}
