//! In-memory [`SessionStore`] used by tests and store-less local runs.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::{
    models::{SessionEntity, SessionStatus},
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

/// DashMap-backed session store. Implements the same ordering contract as
/// the MongoDB backend so projections behave identically in tests.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<(Uuid, Uuid), SessionEntity>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_key(instance_id: Uuid, user_id: Uuid) -> String {
        format!("{instance_id}:{user_id}")
    }
}

impl SessionStore for MemorySessionStore {
    fn create(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .sessions
                .insert((session.instance_id, session.user_id), session);
            Ok(())
        })
    }

    fn find(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .sessions
                .get(&(instance_id, user_id))
                .map(|entry| entry.value().clone()))
        })
    }

    fn exists(&self, instance_id: Uuid, user_id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.sessions.contains_key(&(instance_id, user_id))) })
    }

    fn update(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let key = (session.instance_id, session.user_id);
            if !store.sessions.contains_key(&key) {
                return Err(StorageError::not_found(Self::session_key(
                    session.instance_id,
                    session.user_id,
                )));
            }
            store.sessions.insert(key, session);
            Ok(())
        })
    }

    fn update_status(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
        status: SessionStatus,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            match store.sessions.get_mut(&(instance_id, user_id)) {
                Some(mut entry) => {
                    entry.value_mut().status = status;
                    Ok(())
                }
                None => Err(StorageError::not_found(Self::session_key(
                    instance_id,
                    user_id,
                ))),
            }
        })
    }

    fn list_by_instance(
        &self,
        instance_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut sessions: Vec<SessionEntity> = store
                .sessions
                .iter()
                .filter(|entry| entry.key().0 == instance_id)
                .map(|entry| entry.value().clone())
                .collect();
            sessions.sort_by(|a, b| {
                b.score
                    .cmp(&a.score)
                    .then_with(|| a.started_at.cmp(&b.started_at))
            });
            Ok(sessions)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use time::Duration;

    use super::*;

    #[tokio::test]
    async fn create_then_find_round_trips() {
        let store = MemorySessionStore::new();
        let instance = Uuid::new_v4();
        let user = Uuid::new_v4();

        store
            .create(SessionEntity::joined(instance, user))
            .await
            .unwrap();

        let found = store.find(instance, user).await.unwrap().expect("session");
        assert_eq!(found.status, SessionStatus::Joined);
        assert_eq!(found.current_question_index, 0);
        assert_eq!(found.score, 0);
        assert!(store.exists(instance, user).await.unwrap());
        assert!(!store.exists(instance, Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn update_status_on_missing_session_errors() {
        let store = MemorySessionStore::new();
        let err = store
            .update_status(Uuid::new_v4(), Uuid::new_v4(), SessionStatus::InProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn listing_orders_by_score_then_join_time() {
        let store = MemorySessionStore::new();
        let instance = Uuid::new_v4();

        let mut first = SessionEntity::joined(instance, Uuid::new_v4());
        first.score = 10;
        let mut second = SessionEntity::joined(instance, Uuid::new_v4());
        second.score = 10;
        second.started_at = first.started_at + Duration::seconds(5);
        let mut third = SessionEntity::joined(instance, Uuid::new_v4());
        third.score = 25;

        for session in [second.clone(), third.clone(), first.clone()] {
            store.create(session).await.unwrap();
        }
        // A session from an unrelated instance must not leak in.
        store
            .create(SessionEntity::joined(Uuid::new_v4(), Uuid::new_v4()))
            .await
            .unwrap();

        let listed = store.list_by_instance(instance).await.unwrap();
        let users: Vec<Uuid> = listed.iter().map(|s| s.user_id).collect();
        assert_eq!(users, vec![third.user_id, first.user_id, second.user_id]);
    }
}
