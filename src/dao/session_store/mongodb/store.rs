use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database,
    bson::doc,
    options::IndexOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{MongoSessionDocument, doc_id, session_key},
};
use crate::dao::{
    models::{SessionEntity, SessionStatus},
    session_store::SessionStore,
    storage::StorageResult,
};

const SESSION_COLLECTION_NAME: &str = "sessions";

#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) = establish_connection(&self.config).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = establish_connection(&config).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    /// Index on `instance_id` backs the leaderboard and "all answered"
    /// projections.
    async fn ensure_indexes(&self) -> MongoResult<()> {
        let collection = self.collection().await;
        let index = mongodb::IndexModel::builder()
            .keys(doc! {"instance_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("session_instance_idx".to_owned()))
                    .build(),
            )
            .build();

        collection
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: SESSION_COLLECTION_NAME,
                index: "instance_id",
                source,
            })?;

        Ok(())
    }

    async fn collection(&self) -> Collection<MongoSessionDocument> {
        let guard = self.inner.state.read().await;
        guard
            .database
            .collection::<MongoSessionDocument>(SESSION_COLLECTION_NAME)
    }

    async fn create_session(&self, session: SessionEntity) -> MongoResult<()> {
        let key = session_key(session.instance_id, session.user_id);
        let document: MongoSessionDocument = session.into();
        let collection = self.collection().await;
        collection
            .replace_one(doc! {"_id": document.id.as_str()}, &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveSession { key, source })?;
        Ok(())
    }

    async fn find_session(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
    ) -> MongoResult<Option<SessionEntity>> {
        let key = session_key(instance_id, user_id);
        let collection = self.collection().await;

        let document = collection
            .find_one(doc_id(instance_id, user_id))
            .await
            .map_err(|source| MongoDaoError::LoadSession {
                key: key.clone(),
                source,
            })?;

        document.map(SessionEntity::try_from).transpose()
    }

    async fn session_exists(&self, instance_id: Uuid, user_id: Uuid) -> MongoResult<bool> {
        let key = session_key(instance_id, user_id);
        let collection = self.collection().await;
        let count = collection
            .count_documents(doc_id(instance_id, user_id))
            .await
            .map_err(|source| MongoDaoError::LoadSession { key, source })?;
        Ok(count > 0)
    }

    async fn update_session(&self, session: SessionEntity) -> MongoResult<()> {
        let key = session_key(session.instance_id, session.user_id);
        let document: MongoSessionDocument = session.into();
        let collection = self.collection().await;

        let result = collection
            .replace_one(doc! {"_id": document.id.as_str()}, &document)
            .await
            .map_err(|source| MongoDaoError::SaveSession {
                key: key.clone(),
                source,
            })?;

        if result.matched_count == 0 {
            return Err(MongoDaoError::SessionMissing { key });
        }
        Ok(())
    }

    async fn update_session_status(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
        status: SessionStatus,
    ) -> MongoResult<()> {
        let key = session_key(instance_id, user_id);
        let collection = self.collection().await;

        let result = collection
            .update_one(
                doc_id(instance_id, user_id),
                doc! {"$set": {"status": status.as_str()}},
            )
            .await
            .map_err(|source| MongoDaoError::SaveSession {
                key: key.clone(),
                source,
            })?;

        if result.matched_count == 0 {
            return Err(MongoDaoError::SessionMissing { key });
        }
        Ok(())
    }

    async fn list_instance_sessions(&self, instance_id: Uuid) -> MongoResult<Vec<SessionEntity>> {
        let collection = self.collection().await;

        let documents: Vec<MongoSessionDocument> = collection
            .find(doc! {"instance_id": instance_id.to_string()})
            .sort(doc! {"score": -1, "started_at": 1})
            .await
            .map_err(|source| MongoDaoError::ListSessions {
                instance_id: instance_id.to_string(),
                source,
            })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListSessions {
                instance_id: instance_id.to_string(),
                source,
            })?;

        documents
            .into_iter()
            .map(SessionEntity::try_from)
            .collect()
    }
}

impl SessionStore for MongoSessionStore {
    fn create(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_session(session).await.map_err(Into::into) })
    }

    fn find(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_session(instance_id, user_id)
                .await
                .map_err(Into::into)
        })
    }

    fn exists(&self, instance_id: Uuid, user_id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .session_exists(instance_id, user_id)
                .await
                .map_err(Into::into)
        })
    }

    fn update(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.update_session(session).await.map_err(Into::into) })
    }

    fn update_status(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
        status: SessionStatus,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .update_session_status(instance_id, user_id, status)
                .await
                .map_err(Into::into)
        })
    }

    fn list_by_instance(
        &self,
        instance_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_instance_sessions(instance_id)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
