use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{DateTime, Document, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    error::{MongoDaoError, MongoResult},
    models::{MongoChatMessageDocument, MongoPollDocument, MongoSessionDocument, doc_id},
    settings::MongoConfig,
};
use crate::dao::{
    models::{ChatMessageEntity, PollEntity, SessionCounter, SessionEntity},
    record_store::RecordStore,
    storage::StorageResult,
};

const POLL_COLLECTION_NAME: &str = "polls";
const SESSION_COLLECTION_NAME: &str = "sessions";
const MESSAGE_COLLECTION_NAME: &str = "chat_messages";

/// Record store backed by a MongoDB database.
#[derive(Clone)]
pub struct MongoRecordStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    // Kept so the connection pool lives as long as the database handle.
    _client: Client,
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
        let (client, database) = self.config.open().await?;
        let mut guard = self.state.write().await;
        guard._client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoRecordStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) = config.open().await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState {
                _client: client,
                database,
            }),
            config,
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let indexes: [(&'static str, &'static str, Document); 3] = [
            (
                POLL_COLLECTION_NAME,
                "session_id,created_at",
                doc! {"session_id": 1, "created_at": -1},
            ),
            (
                SESSION_COLLECTION_NAME,
                "is_active,created_at",
                doc! {"is_active": 1, "created_at": -1},
            ),
            (
                MESSAGE_COLLECTION_NAME,
                "session_id,created_at",
                doc! {"session_id": 1, "created_at": -1},
            ),
        ];

        let database = self.database().await;
        for (collection, index, keys) in indexes {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(format!("{collection}_{}_idx", index.replace(',', "_"))))
                        .build(),
                )
                .build();

            database
                .collection::<Document>(collection)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection,
                    index,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn polls(&self) -> Collection<MongoPollDocument> {
        self.database().await.collection(POLL_COLLECTION_NAME)
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database().await.collection(SESSION_COLLECTION_NAME)
    }

    async fn messages(&self) -> Collection<MongoChatMessageDocument> {
        self.database().await.collection(MESSAGE_COLLECTION_NAME)
    }

    async fn save_poll(&self, poll: PollEntity) -> MongoResult<()> {
        let id = poll.id;
        let document: MongoPollDocument = poll.into();
        self.polls()
            .await
            .replace_one(doc_id(id.to_string()), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SavePoll { id, source })?;
        Ok(())
    }

    async fn find_poll(&self, id: Uuid) -> MongoResult<Option<PollEntity>> {
        let document = self
            .polls()
            .await
            .find_one(doc_id(id.to_string()))
            .await
            .map_err(|source| MongoDaoError::LoadPoll { id, source })?;

        document.map(PollEntity::try_from).transpose()
    }

    async fn list_polls(
        &self,
        filter: Document,
        limit: usize,
    ) -> MongoResult<Vec<PollEntity>> {
        let documents: Vec<MongoPollDocument> = self
            .polls()
            .await
            .find(filter)
            .sort(doc! {"created_at": -1})
            .limit(limit_as_i64(limit))
            .await
            .map_err(|source| MongoDaoError::ListPolls { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListPolls { source })?;

        documents.into_iter().map(PollEntity::try_from).collect()
    }

    async fn save_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.session_id.clone();
        let document: MongoSessionDocument = session.into();
        self.sessions()
            .await
            .replace_one(doc_id(id.clone()), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;
        Ok(())
    }

    async fn find_session(
        &self,
        filter: Document,
    ) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(filter)
            .sort(doc! {"created_at": -1})
            .await
            .map_err(|source| MongoDaoError::LoadSession { source })?;

        document.map(SessionEntity::try_from).transpose()
    }

    async fn list_active_sessions(&self) -> MongoResult<Vec<SessionEntity>> {
        let documents: Vec<MongoSessionDocument> = self
            .sessions()
            .await
            .find(doc! {"is_active": true})
            .await
            .map_err(|source| MongoDaoError::LoadSession { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadSession { source })?;

        documents.into_iter().map(SessionEntity::try_from).collect()
    }

    async fn update_session(
        &self,
        id: String,
        update: Document,
    ) -> MongoResult<bool> {
        let result = self
            .sessions()
            .await
            .update_one(doc_id(id.clone()), update)
            .await
            .map_err(|source| MongoDaoError::UpdateSession { id, source })?;
        Ok(result.modified_count > 0)
    }

    async fn end_session(&self, id: String, at: SystemTime) -> MongoResult<bool> {
        let result = self
            .sessions()
            .await
            .update_one(
                doc! {"_id": id.clone(), "is_active": true},
                doc! {"$set": {"is_active": false, "ended_at": DateTime::from_system_time(at)}},
            )
            .await
            .map_err(|source| MongoDaoError::UpdateSession { id, source })?;
        Ok(result.modified_count > 0)
    }

    async fn save_message(&self, message: ChatMessageEntity) -> MongoResult<()> {
        let id = message.id;
        let document: MongoChatMessageDocument = message.into();
        self.messages()
            .await
            .replace_one(doc_id(id.to_string()), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveMessage { id, source })?;
        Ok(())
    }

    async fn find_message(&self, id: Uuid) -> MongoResult<Option<ChatMessageEntity>> {
        let document = self
            .messages()
            .await
            .find_one(doc_id(id.to_string()))
            .await
            .map_err(|source| MongoDaoError::LoadMessages { source })?;

        document.map(ChatMessageEntity::try_from).transpose()
    }

    async fn list_messages(
        &self,
        session_id: String,
        limit: usize,
    ) -> MongoResult<Vec<ChatMessageEntity>> {
        let documents: Vec<MongoChatMessageDocument> = self
            .messages()
            .await
            .find(doc! {"session_id": session_id, "is_deleted": false})
            .sort(doc! {"created_at": -1})
            .limit(limit_as_i64(limit))
            .await
            .map_err(|source| MongoDaoError::LoadMessages { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::LoadMessages { source })?;

        documents
            .into_iter()
            .map(ChatMessageEntity::try_from)
            .collect()
    }
}

impl RecordStore for MongoRecordStore {
    fn save_poll(&self, poll: PollEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_poll(poll).await.map_err(Into::into) })
    }

    fn find_poll(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_poll(id).await.map_err(Into::into) })
    }

    fn list_polls(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_polls(doc! {}, limit).await.map_err(Into::into) })
    }

    fn list_session_polls(
        &self,
        session_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_polls(doc! {"session_id": session_id}, limit)
                .await
                .map_err(Into::into)
        })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_session(session).await.map_err(Into::into) })
    }

    fn find_session(
        &self,
        session_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_session(doc_id(session_id))
                .await
                .map_err(Into::into)
        })
    }

    fn find_active_session(&self) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_session(doc! {"is_active": true})
                .await
                .map_err(Into::into)
        })
    }

    fn list_active_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_active_sessions().await.map_err(Into::into) })
    }

    fn increment_session_counter(
        &self,
        session_id: String,
        counter: SessionCounter,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let field = match counter {
            SessionCounter::Polls => "polls_created",
            SessionCounter::Messages => "messages_count",
        };
        let mut increment = Document::new();
        increment.insert(field, 1_i64);
        Box::pin(async move {
            store
                .update_session(
                    session_id,
                    doc! {
                        "$inc": increment,
                        "$set": {"last_activity_at": DateTime::from_system_time(at)},
                    },
                )
                .await
                .map(|_| ())
                .map_err(Into::into)
        })
    }

    fn record_student_count(
        &self,
        session_id: String,
        current: u64,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        let current = i64::try_from(current).unwrap_or(i64::MAX);
        Box::pin(async move {
            store
                .update_session(
                    session_id,
                    doc! {
                        "$set": {
                            "current_students": current,
                            "last_activity_at": DateTime::from_system_time(at),
                        },
                        "$max": {"peak_students": current},
                    },
                )
                .await
                .map(|_| ())
                .map_err(Into::into)
        })
    }

    fn end_session(
        &self,
        session_id: String,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.end_session(session_id, at).await.map_err(Into::into) })
    }

    fn save_chat_message(
        &self,
        message: ChatMessageEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_message(message).await.map_err(Into::into) })
    }

    fn find_chat_message(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ChatMessageEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_message(id).await.map_err(Into::into) })
    }

    fn list_chat_messages(
        &self,
        session_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ChatMessageEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .list_messages(session_id, limit)
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

fn limit_as_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}
