//! Durable records kept by the record store.

use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Persisted lifecycle status of a poll. Draft polls never reach the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    /// Accepting votes.
    Active,
    /// Closed; results are frozen.
    Ended,
}

/// Durable poll record, written at creation and finalised on close.
#[derive(Debug, Clone, PartialEq)]
pub struct PollEntity {
    /// Stable identifier for the poll.
    pub id: Uuid,
    /// Question shown to students.
    pub question: String,
    /// Answer labels in ballot order.
    pub options: Vec<String>,
    /// Configured duration in seconds. Never rewritten on close.
    pub duration_secs: u32,
    /// Lifecycle status.
    pub status: PollStatus,
    /// Final per-option counts, in option order. Empty while active.
    pub results: IndexMap<String, u64>,
    /// Sum of the final counts.
    pub total_votes: u64,
    /// Connected students at close time.
    pub total_students: u64,
    /// Session the poll was created in.
    pub session_id: String,
    /// Teacher connection that created the poll.
    pub teacher_connection_id: Uuid,
    /// When the record was written.
    pub created_at: SystemTime,
    /// When the countdown started.
    pub started_at: SystemTime,
    /// When the poll closed.
    pub ended_at: Option<SystemTime>,
    /// Reason recorded when the poll was closed.
    pub end_reason: Option<String>,
}

impl PollEntity {
    /// Share of connected students who voted, rounded to the nearest percent.
    pub fn response_rate(&self) -> u32 {
        response_rate(self.total_votes, self.total_students)
    }
}

/// Round `voters / students` to a whole percentage, 0 when nobody is connected.
pub fn response_rate(voters: u64, students: u64) -> u32 {
    if students == 0 {
        return 0;
    }
    ((voters as f64 / students as f64) * 100.0).round() as u32
}

/// Durable record of one teacher-led session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionEntity {
    /// Identifier of the form `session_<millis>_<suffix>`.
    pub session_id: String,
    /// Connection that last claimed the session.
    pub teacher_connection_id: Uuid,
    /// When that claim was made.
    pub teacher_joined_at: SystemTime,
    /// Last time anything happened in the session. Drives inactivity expiry.
    pub last_activity_at: SystemTime,
    /// Students connected at the last roster change.
    pub current_students: u64,
    /// Largest roster seen.
    pub peak_students: u64,
    /// Polls created in the session.
    pub polls_created: u64,
    /// Chat messages sent in the session.
    pub messages_count: u64,
    /// Whether the session is still open.
    pub is_active: bool,
    /// When the session was opened.
    pub created_at: SystemTime,
    /// When the session was ended.
    pub ended_at: Option<SystemTime>,
}

impl SessionEntity {
    /// Fresh active session owned by `teacher_connection_id`.
    pub fn new(session_id: String, teacher_connection_id: Uuid, now: SystemTime) -> Self {
        Self {
            session_id,
            teacher_connection_id,
            teacher_joined_at: now,
            last_activity_at: now,
            current_students: 0,
            peak_students: 0,
            polls_created: 0,
            messages_count: 0,
            is_active: true,
            created_at: now,
            ended_at: None,
        }
    }
}

/// Session counters incremented as side effects of live activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCounter {
    /// A poll was created.
    Polls,
    /// A chat message was sent.
    Messages,
}

/// Who wrote a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SenderType {
    /// The teacher holding the claim.
    Teacher,
    /// A joined student.
    Student,
}

/// Durable chat message. Deletion is soft.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessageEntity {
    /// Stable identifier for the message.
    pub id: Uuid,
    /// Sanitized text.
    pub message: String,
    /// Display name of the author.
    pub sender: String,
    /// Role of the author.
    pub sender_type: SenderType,
    /// Session the message belongs to.
    pub session_id: String,
    /// Connection that sent it.
    pub connection_id: Uuid,
    /// Set when a teacher hides the message.
    pub is_deleted: bool,
    /// Send time.
    pub created_at: SystemTime,
}
