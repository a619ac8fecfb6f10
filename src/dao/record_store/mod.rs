/// In-process backend.
pub mod memory;
/// MongoDB backend.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use std::time::SystemTime;

use futures::future::BoxFuture;
use uuid::Uuid;

use crate::dao::models::{ChatMessageEntity, PollEntity, SessionCounter, SessionEntity};
use crate::dao::storage::StorageResult;

pub use memory::MemoryRecordStore;

/// Durable store for poll, session and chat records.
///
/// Listing operations return the newest records first.
pub trait RecordStore: Send + Sync {
    /// Insert or replace a poll record.
    fn save_poll(&self, poll: PollEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Poll record by id.
    fn find_poll(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<PollEntity>>>;
    /// Latest polls across sessions.
    fn list_polls(&self, limit: usize) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>>;
    /// Latest polls of one session.
    fn list_session_polls(
        &self,
        session_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<PollEntity>>>;

    /// Insert or replace a session record.
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Session record by id.
    fn find_session(
        &self,
        session_id: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Most recently created session still flagged active.
    fn find_active_session(&self) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Every session still flagged active.
    fn list_active_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    /// Add one to a session counter and refresh its activity timestamp.
    fn increment_session_counter(
        &self,
        session_id: String,
        counter: SessionCounter,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Set the current student count, raising the peak when exceeded.
    fn record_student_count(
        &self,
        session_id: String,
        current: u64,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Mark a session ended. Returns `false` when it was unknown or already ended.
    fn end_session(
        &self,
        session_id: String,
        at: SystemTime,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Insert or replace a chat message.
    fn save_chat_message(&self, message: ChatMessageEntity)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Chat message by id, deleted or not.
    fn find_chat_message(
        &self,
        id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<ChatMessageEntity>>>;
    /// Non-deleted messages of a session.
    fn list_chat_messages(
        &self,
        session_id: String,
        limit: usize,
    ) -> BoxFuture<'static, StorageResult<Vec<ChatMessageEntity>>>;

    /// Cheap round trip proving the backend answers.
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    /// Rebuild the connection after a failed health check.
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
