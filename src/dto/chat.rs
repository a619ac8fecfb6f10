use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::dao::models::{ChatMessageEntity, SenderType};

use super::format_system_time;

/// Chat message as delivered to clients; payload of `chat:message`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageView {
    /// Message identifier.
    pub id: Uuid,
    /// Sanitized message text.
    pub message: String,
    /// Display name of the author.
    pub sender: String,
    /// Whether the teacher or a student wrote it.
    pub sender_type: SenderType,
    /// Session the message belongs to.
    pub session_id: String,
    /// Send time (RFC 3339).
    pub timestamp: String,
}

impl From<ChatMessageEntity> for ChatMessageView {
    fn from(value: ChatMessageEntity) -> Self {
        Self {
            id: value.id,
            message: value.message,
            sender: value.sender,
            sender_type: value.sender_type,
            session_id: value.session_id,
            timestamp: format_system_time(value.created_at),
        }
    }
}

/// Recent messages, oldest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryResponse {
    /// Messages, oldest first.
    pub messages: Vec<ChatMessageView>,
    /// Number of messages returned.
    pub total: usize,
}

/// Payload of `chat:message_deleted`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageDeletedEvent {
    /// Message hidden from history.
    pub message_id: Uuid,
    /// Who removed it.
    pub deleted_by: String,
}

/// Message counts of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatStatsResponse {
    /// Session being counted.
    pub session_id: String,
    /// Visible messages.
    pub total_messages: usize,
    /// Messages written by the teacher.
    pub teacher_messages: usize,
    /// Messages written by students.
    pub student_messages: usize,
}

/// Query string of `GET /api/chat/messages`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ChatListQuery {
    /// Maximum number of messages.
    pub limit: Option<usize>,
}
