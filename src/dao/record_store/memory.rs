use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use uuid::Uuid;

use super::RecordStore;
use crate::dao::{
    models::{ChatMessageEntity, PollEntity, SessionCounter, SessionEntity},
    storage::{StorageError, StorageResult},
};

/// Process-local record store. History does not survive a restart.
#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    polls: DashMap<Uuid, PollEntity>,
    sessions: DashMap<String, SessionEntity>,
    messages: DashMap<Uuid, ChatMessageEntity>,
    offline: AtomicBool,
}

impl MemoryRecordStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with [`StorageError::Offline`] until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn guard(&self) -> StorageResult<&MemoryInner> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Offline("memory record store".into()));
        }
        Ok(&self.inner)
    }

    fn list_polls_where(
        &self,
        limit: usize,
        filter: impl Fn(&PollEntity) -> bool,
    ) -> StorageResult<Vec<PollEntity>> {
        let inner = self.guard()?;
        let mut polls: Vec<PollEntity> = inner
            .polls
            .iter()
            .filter(|entry| filter(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        polls.truncate(limit);
        Ok(polls)
    }

    fn update_session(
        &self,
        session_id: &str,
        update: impl FnOnce(&mut SessionEntity),
    ) -> StorageResult<bool> {
        let inner = self.guard()?;
        match inner.sessions.get_mut(session_id) {
            Some(mut session) => {
                update(&mut session);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    fn save_poll(&self, poll: PollEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.guard()?.polls.insert(poll.id, poll);
            Ok(())
        })
    }

    fn find_poll(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.guard()?.polls.get(&id).map(|poll| poll.clone())) })
    }

    fn list_polls(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_polls_where(limit, |_| true) })
    }

    fn list_session_polls(
        &self,
        session_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_polls_where(limit, |poll| poll.session_id == session_id) })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .guard()?
                .sessions
                .insert(session.session_id.clone(), session);
            Ok(())
        })
    }

    fn find_session(
        &self,
        session_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .guard()?
                .sessions
                .get(&session_id)
                .map(|session| session.clone()))
        })
    }

    fn find_active_session(&self) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .guard()?
                .sessions
                .iter()
                .filter(|entry| entry.is_active)
                .max_by_key(|entry| entry.created_at)
                .map(|entry| entry.value().clone()))
        })
    }

    fn list_active_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .guard()?
                .sessions
                .iter()
                .filter(|entry| entry.is_active)
                .map(|entry| entry.value().clone())
                .collect())
        })
    }

    fn increment_session_counter(
        &self,
        session_id: String,
        counter: SessionCounter,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.update_session(&session_id, |session| {
                match counter {
                    SessionCounter::Polls => session.polls_created += 1,
                    SessionCounter::Messages => session.messages_count += 1,
                }
                session.last_activity_at = at;
            })?;
            Ok(())
        })
    }

    fn record_student_count(
        &self,
        session_id: String,
        current: u64,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.update_session(&session_id, |session| {
                session.current_students = current;
                session.peak_students = session.peak_students.max(current);
                session.last_activity_at = at;
            })?;
            Ok(())
        })
    }

    fn end_session(
        &self,
        session_id: String,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            let mut ended = false;
            store.update_session(&session_id, |session| {
                if session.is_active {
                    session.is_active = false;
                    session.ended_at = Some(at);
                    ended = true;
                }
            })?;
            Ok(ended)
        })
    }

    fn save_chat_message(
        &self,
        message: ChatMessageEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.guard()?.messages.insert(message.id, message);
            Ok(())
        })
    }

    fn find_chat_message(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ChatMessageEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            Ok(store
                .guard()?
                .messages
                .get(&id)
                .map(|message| message.clone()))
        })
    }

    fn list_chat_messages(
        &self,
        session_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ChatMessageEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut messages: Vec<ChatMessageEntity> = store
                .guard()?
                .messages
                .iter()
                .filter(|entry| entry.session_id == session_id && !entry.is_deleted)
                .map(|entry| entry.value().clone())
                .collect();
            messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            messages.truncate(limit);
            Ok(messages)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.guard().map(|_| ()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.guard().map(|_| ()) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::models::PollStatus;

    fn poll(session: &str, created_at: SystemTime) -> PollEntity {
        PollEntity {
            id: Uuid::new_v4(),
            question: "Q?".into(),
            options: vec!["A".into(), "B".into()],
            duration_secs: 60,
            status: PollStatus::Active,
            results: Default::default(),
            total_votes: 0,
            total_students: 0,
            session_id: session.into(),
            teacher_connection_id: Uuid::new_v4(),
            created_at,
            started_at: created_at,
            ended_at: None,
            end_reason: None,
        }
    }

    #[tokio::test]
    async fn session_polls_are_listed_newest_first() {
        let store = MemoryRecordStore::new();
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let older = poll("s1", base);
        let newer = poll("s1", base + Duration::from_secs(5));
        let other = poll("s2", base + Duration::from_secs(10));
        for entity in [older.clone(), newer.clone(), other] {
            store.save_poll(entity).await.unwrap();
        }

        let listed = store.list_session_polls("s1".into(), 10).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|poll| poll.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        let limited = store.list_polls(1).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].session_id, "s2");
    }

    #[tokio::test]
    async fn student_count_raises_peak_only() {
        let store = MemoryRecordStore::new();
        let now = SystemTime::now();
        store
            .save_session(SessionEntity::new("s1".into(), Uuid::new_v4(), now))
            .await
            .unwrap();

        store.record_student_count("s1".into(), 4, now).await.unwrap();
        store.record_student_count("s1".into(), 2, now).await.unwrap();
        store
            .increment_session_counter("s1".into(), SessionCounter::Polls, now)
            .await
            .unwrap();

        let session = store.find_session("s1".into()).await.unwrap().unwrap();
        assert_eq!(session.current_students, 2);
        assert_eq!(session.peak_students, 4);
        assert_eq!(session.polls_created, 1);
    }

    #[tokio::test]
    async fn ending_a_session_is_reported_once() {
        let store = MemoryRecordStore::new();
        let now = SystemTime::now();
        store
            .save_session(SessionEntity::new("s1".into(), Uuid::new_v4(), now))
            .await
            .unwrap();

        assert!(store.end_session("s1".into(), now).await.unwrap());
        assert!(!store.end_session("s1".into(), now).await.unwrap());
        assert!(store.find_active_session().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn offline_store_rejects_operations() {
        let store = MemoryRecordStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.list_polls(5).await,
            Err(StorageError::Offline(_))
        ));
        store.set_offline(false);
        assert!(store.health_check().await.is_ok());
    }
}
