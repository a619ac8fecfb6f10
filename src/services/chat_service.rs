use std::time::SystemTime;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{ChatMessageEntity, SenderType, SessionCounter},
    dto::{
        chat::{ChatHistoryResponse, ChatMessageView, ChatStatsResponse, MessageDeletedEvent},
        validation::sanitize_chat_message,
        ws::ChatSendRequest,
    },
    error::ServiceError,
    services::{gateway, teacher_service},
    state::{ConnectionId, SharedState},
};

const MAX_MESSAGE_CHARS: usize = 500;
const DEFAULT_HISTORY_LIMIT: usize = 50;
const STATS_SCAN_LIMIT: usize = 10_000;
const TEACHER_DISPLAY_NAME: &str = "Teacher";

/// Store and relay a chat message.
///
/// Teachers must hold the claim; students may only write under their own name.
pub async fn send(
    state: &SharedState,
    requester: ConnectionId,
    request: ChatSendRequest,
) -> Result<ChatMessageView, ServiceError> {
    let message = sanitize_chat_message(&request.message);
    if message.is_empty() {
        return Err(ServiceError::InvalidInput("message cannot be empty".into()));
    }
    if message.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ServiceError::InvalidInput(format!(
            "message must be at most {MAX_MESSAGE_CHARS} characters"
        )));
    }

    let (sender, session_id) = match request.sender_type {
        SenderType::Teacher => {
            let claim = teacher_service::require_claim(state, requester).await?;
            (request.sender.trim().to_string(), claim.session_id)
        }
        SenderType::Student => {
            let student = state
                .cache()
                .student(requester)
                .await?
                .filter(|student| {
                    student
                        .name
                        .eq_ignore_ascii_case(request.sender.trim())
                })
                .ok_or_else(|| {
                    ServiceError::Unauthorized("students can only chat under their own name".into())
                })?;
            let session_id = teacher_service::current_session_id(state)
                .await
                .ok_or_else(|| ServiceError::InvalidInput("no active session to chat in".into()))?;
            (student.name, session_id)
        }
    };

    let store = state.require_record_store().await?;
    let now = SystemTime::now();
    let entity = ChatMessageEntity {
        id: Uuid::new_v4(),
        message,
        sender,
        sender_type: request.sender_type,
        session_id,
        connection_id: requester,
        is_deleted: false,
        created_at: now,
    };
    store.save_chat_message(entity.clone()).await?;

    if let Err(err) = store
        .increment_session_counter(entity.session_id.clone(), SessionCounter::Messages, now)
        .await
    {
        warn!(session_id = %entity.session_id, error = %err, "failed to count chat message");
    }

    debug!(message_id = %entity.id, sender = %entity.sender, "chat message stored");
    let view = ChatMessageView::from(entity);
    gateway::broadcast_chat_message(state, &view);
    Ok(view)
}

/// Messages of the current session, oldest first. Degrades to an empty list.
pub async fn history(state: &SharedState, limit: Option<usize>) -> ChatHistoryResponse {
    let limit = limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let mut messages = match teacher_service::current_session_id(state).await {
        Some(session_id) => session_messages(state, session_id, limit).await,
        None => Vec::new(),
    };
    messages.reverse();

    let messages: Vec<ChatMessageView> = messages.into_iter().map(Into::into).collect();
    ChatHistoryResponse {
        total: messages.len(),
        messages,
    }
}

/// Soft-delete a message. The teacher may delete any message, others only their own.
pub async fn delete(
    state: &SharedState,
    requester: ConnectionId,
    message_id: Uuid,
) -> Result<MessageDeletedEvent, ServiceError> {
    let store = state.require_record_store().await?;
    let Some(mut message) = store
        .find_chat_message(message_id)
        .await?
        .filter(|message| !message.is_deleted)
    else {
        return Err(ServiceError::NotFound(format!("message `{message_id}`")));
    };

    let is_teacher = state
        .cache()
        .teacher()
        .await?
        .is_some_and(|claim| claim.connection_id == requester);
    if !is_teacher && message.connection_id != requester {
        return Err(ServiceError::Unauthorized(
            "only the teacher can delete other people's messages".into(),
        ));
    }

    message.is_deleted = true;
    let deleted_by = if is_teacher {
        TEACHER_DISPLAY_NAME.to_string()
    } else {
        message.sender.clone()
    };
    store.save_chat_message(message).await?;

    gateway::broadcast_message_deleted(state, message_id, &deleted_by);
    info!(message_id = %message_id, deleted_by = %deleted_by, "chat message deleted");
    Ok(MessageDeletedEvent {
        message_id,
        deleted_by,
    })
}

/// Message counts of one session, split by sender type.
pub async fn stats(state: &SharedState, session_id: String) -> ChatStatsResponse {
    let messages = session_messages(state, session_id.clone(), STATS_SCAN_LIMIT).await;
    let teacher_messages = messages
        .iter()
        .filter(|message| message.sender_type == SenderType::Teacher)
        .count();

    ChatStatsResponse {
        session_id,
        total_messages: messages.len(),
        teacher_messages,
        student_messages: messages.len() - teacher_messages,
    }
}

async fn session_messages(
    state: &SharedState,
    session_id: String,
    limit: usize,
) -> Vec<ChatMessageEntity> {
    let Some(store) = state.record_store().await else {
        warn!(session_id = %session_id, "no record store; returning no chat messages");
        return Vec::new();
    };
    match store.list_chat_messages(session_id.clone(), limit).await {
        Ok(messages) => messages,
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "failed to load chat messages");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{record_store::MemoryRecordStore, session_cache::Student},
        state::AppState,
    };

    async fn session_with_teacher() -> (SharedState, MemoryRecordStore, ConnectionId) {
        let state = AppState::new(AppConfig::default());
        let store = MemoryRecordStore::new();
        state.set_record_store(Arc::new(store.clone())).await;
        let teacher = Uuid::new_v4();
        teacher_service::join(&state, teacher).await.unwrap();
        (state, store, teacher)
    }

    async fn student(state: &SharedState, name: &str) -> ConnectionId {
        let id = Uuid::new_v4();
        state
            .cache()
            .insert_student(Student::new(id, name.into(), SystemTime::now()))
            .await
            .unwrap();
        id
    }

    fn request(message: &str, sender: &str, sender_type: SenderType) -> ChatSendRequest {
        ChatSendRequest {
            message: message.into(),
            sender: sender.into(),
            sender_type,
        }
    }

    #[tokio::test]
    async fn messages_are_sanitized_and_listed_oldest_first() {
        let (state, _store, teacher) = session_with_teacher().await;
        let alice = student(&state, "Alice").await;

        send(&state, teacher, request("Welcome!", "Ms Lee", SenderType::Teacher))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let sent = send(&state, alice, request(" <b>hi</b> ", "alice", SenderType::Student))
            .await
            .unwrap();
        assert_eq!(sent.message, "bhi/b");
        assert_eq!(sent.sender, "Alice");

        let listed = history(&state, None).await;
        assert_eq!(listed.total, 2);
        assert_eq!(listed.messages[0].message, "Welcome!");

        let counts = stats(&state, sent.session_id.clone()).await;
        assert_eq!(counts.teacher_messages, 1);
        assert_eq!(counts.student_messages, 1);
    }

    #[tokio::test]
    async fn senders_must_be_who_they_claim() {
        let (state, _store, _teacher) = session_with_teacher().await;
        let alice = student(&state, "Alice").await;

        let err = send(&state, alice, request("hello", "Bob", SenderType::Student))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let err = send(&state, alice, request("hello", "Alice", SenderType::Teacher))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let err = send(&state, alice, request(" <> ", "Alice", SenderType::Student))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn deletion_rules() {
        let (state, _store, teacher) = session_with_teacher().await;
        let alice = student(&state, "Alice").await;
        let bob = student(&state, "Bob").await;
        let first = send(&state, alice, request("one", "Alice", SenderType::Student))
            .await
            .unwrap();
        let second = send(&state, alice, request("two", "Alice", SenderType::Student))
            .await
            .unwrap();

        let err = delete(&state, bob, first.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let own = delete(&state, alice, first.id).await.unwrap();
        assert_eq!(own.deleted_by, "Alice");
        let by_teacher = delete(&state, teacher, second.id).await.unwrap();
        assert_eq!(by_teacher.deleted_by, TEACHER_DISPLAY_NAME);

        let err = delete(&state, teacher, second.id).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
        assert_eq!(history(&state, None).await.total, 0);
    }

    #[tokio::test]
    async fn sending_surfaces_store_outage() {
        let (state, store, teacher) = session_with_teacher().await;
        store.set_offline(true);
        let err = send(&state, teacher, request("hi", "Ms Lee", SenderType::Teacher))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        assert!(history(&state, None).await.messages.is_empty());
    }
}
