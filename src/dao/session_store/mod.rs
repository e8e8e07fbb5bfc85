pub mod memory;
pub mod mongodb;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{SessionEntity, SessionStatus},
    storage::StorageResult,
};

/// Abstraction over the durable session store keyed by `(instance_id, user_id)`.
///
/// `list_by_instance` returns sessions ordered by `score` descending with
/// ties broken by earlier `started_at`; the leaderboard and "all answered"
/// projections rely on that contract.
pub trait SessionStore: Send + Sync {
    fn create(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn find(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn exists(&self, instance_id: Uuid, user_id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;
    fn update(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn update_status(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
        status: SessionStatus,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn list_by_instance(
        &self,
        instance_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
