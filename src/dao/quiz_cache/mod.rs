pub mod memory;

pub use memory::MemoryQuizCache;

use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Error raised by cache backends. Callers treat cache failures as soft:
/// reads degrade to "absent" and writes are retried on the next exposure.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache unavailable: {message}")]
    Unavailable { message: String },
}

/// Lifetime of the cached per-instance quiz payload and current index.
pub const QUIZ_DATA_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Lifetime of a question start timestamp.
pub const QUESTION_START_TTL: Duration = Duration::from_secs(60 * 60);

/// Ephemeral key-value store holding per-instance quiz data, the sync
/// current index, and per-question start timestamps.
///
/// Values are UTF-8 JSON or a decimal integer. This is the single source of
/// truth for question starts; the hub never holds them in its own memory.
pub trait QuizCache: Send + Sync {
    fn get(&self, key: String) -> BoxFuture<'static, CacheResult<Option<String>>>;
    fn set(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, CacheResult<()>>;
    /// Set-if-absent. Returns whether this call performed the write; the
    /// stored value stays untouched when the key already exists.
    fn set_nx(
        &self,
        key: String,
        value: String,
        ttl: Duration,
    ) -> BoxFuture<'static, CacheResult<bool>>;
    fn delete(&self, key: String) -> BoxFuture<'static, CacheResult<()>>;
}

pub fn quiz_data_key(instance_id: Uuid) -> String {
    format!("quiz:{instance_id}:data")
}

pub fn current_index_key(instance_id: Uuid) -> String {
    format!("quiz:{instance_id}:current_index")
}

/// Start-time key for a synchronously dispatched question.
pub fn question_start_key(instance_id: Uuid, question_index: usize) -> String {
    format!("quiz:{instance_id}:question:{question_index}:start")
}

/// Start-time key for a question dispatched to one user in async mode.
pub fn user_question_start_key(instance_id: Uuid, user_id: Uuid, question_index: usize) -> String {
    format!("quiz:{instance_id}:user:{user_id}:question:{question_index}:start")
}
