use std::time::SystemTime;

use serde::Serialize;
use utoipa::ToSchema;

use crate::dao::{models::SessionEntity, session_cache::Student};

use super::{format_system_time, poll::CurrentPollView, student::RosterUpdate};

/// Reply to a successful `teacher:join`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeacherJoinResponse {
    /// Session the teacher now controls.
    pub session_id: String,
    /// Claim time (RFC 3339).
    pub joined_at: String,
    /// Whether an earlier teacher connection was displaced.
    pub replaced_previous: bool,
    /// Poll still running from before the join, if any.
    pub current_poll: Option<CurrentPollView>,
    /// Students already connected.
    pub roster: RosterUpdate,
}

impl TeacherJoinResponse {
    /// Build the reply from the claimed session and current live state.
    pub fn new(
        session_id: String,
        joined_at: SystemTime,
        replaced_previous: bool,
        current_poll: Option<CurrentPollView>,
        roster: &[Student],
    ) -> Self {
        Self {
            session_id,
            joined_at: format_system_time(joined_at),
            replaced_previous,
            current_poll,
            roster: RosterUpdate::from(roster),
        }
    }
}

/// Payload of `teacher:disconnected`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TeacherDisconnectedEvent {
    /// Notice shown to students.
    pub message: String,
    /// Whether the active poll, if any, keeps running.
    pub poll_continues: bool,
}

/// Reply to `session:snapshot`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    /// Running poll and its tally, if any.
    pub current_poll: Option<CurrentPollView>,
    /// Connected students.
    pub roster: RosterUpdate,
    /// Whether a connection holds the teacher claim.
    pub teacher_present: bool,
}

/// Aggregates over one durable session.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatsResponse {
    /// Session identifier.
    pub session_id: String,
    /// Whether the session is still open.
    pub is_active: bool,
    /// Polls created in the session.
    pub poll_count: usize,
    /// Votes summed over those polls.
    pub total_votes: u64,
    /// Mean response rate of the ended polls.
    pub average_response_rate: u32,
    /// Students connected right now.
    pub current_students: u64,
    /// Largest roster seen in the session.
    pub peak_students: u64,
    /// Chat messages sent in the session.
    pub messages_count: u64,
    /// Opening time (RFC 3339).
    pub created_at: String,
    /// Closing time, once ended.
    pub ended_at: Option<String>,
}

impl SessionStatsResponse {
    /// Combine a session record with the aggregates of its polls.
    pub fn new(
        session: SessionEntity,
        poll_count: usize,
        total_votes: u64,
        average_response_rate: u32,
    ) -> Self {
        Self {
            session_id: session.session_id,
            is_active: session.is_active,
            poll_count,
            total_votes,
            average_response_rate,
            current_students: session.current_students,
            peak_students: session.peak_students,
            messages_count: session.messages_count,
            created_at: format_system_time(session.created_at),
            ended_at: session.ended_at.map(format_system_time),
        }
    }
}
