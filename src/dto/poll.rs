use std::time::SystemTime;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::dao::{
    models::{PollEntity, PollStatus, response_rate},
    session_cache::{ActivePoll, Tally},
};

use super::format_system_time;

/// Durable view of a poll, used for history and final results.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PollSummary {
    /// Poll identifier.
    pub id: Uuid,
    /// Question shown to students.
    pub question: String,
    /// Answer labels in ballot order.
    pub options: Vec<String>,
    /// Configured duration in seconds.
    pub duration: u32,
    /// Lifecycle status.
    pub status: PollStatus,
    /// Final counts per option, in option order.
    #[schema(value_type = Object)]
    pub results: IndexMap<String, u64>,
    /// Sum of all option counts.
    pub total_votes: u64,
    /// Connected students when the poll closed.
    pub total_students: u64,
    /// Voters over connected students, as a rounded percentage.
    pub response_rate: u32,
    /// Session the poll belongs to.
    pub session_id: String,
    /// Creation time (RFC 3339).
    pub created_at: String,
    /// Start of the countdown (RFC 3339).
    pub started_at: String,
    /// Close time, once ended.
    pub ended_at: Option<String>,
    /// Why the poll ended, e.g. `Time expired`.
    pub end_reason: Option<String>,
}

impl From<PollEntity> for PollSummary {
    fn from(value: PollEntity) -> Self {
        Self {
            response_rate: value.response_rate(),
            id: value.id,
            question: value.question,
            options: value.options,
            duration: value.duration_secs,
            status: value.status,
            results: value.results,
            total_votes: value.total_votes,
            total_students: value.total_students,
            session_id: value.session_id,
            created_at: format_system_time(value.created_at),
            started_at: format_system_time(value.started_at),
            ended_at: value.ended_at.map(format_system_time),
            end_reason: value.end_reason,
        }
    }
}

/// Poll currently accepting votes, as announced by `poll:started`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActivePollView {
    /// Poll identifier.
    pub id: Uuid,
    /// Question shown to students.
    pub question: String,
    /// Answer labels in ballot order.
    pub options: Vec<String>,
    /// Configured duration in seconds.
    pub duration: u32,
    /// Start of the countdown (RFC 3339).
    pub start_time: String,
    /// Seconds left when this view was built.
    pub seconds_remaining: u64,
}

impl ActivePollView {
    /// Build the view with the given seconds remaining.
    pub fn new(poll: &ActivePoll, seconds_remaining: u64) -> Self {
        Self {
            id: poll.id,
            question: poll.question.clone(),
            options: poll.options.clone(),
            duration: poll.duration_secs,
            start_time: format_system_time(poll.started_at),
            seconds_remaining,
        }
    }
}

/// Live tally broadcast as `poll:results` after every accepted vote.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LiveResults {
    /// Poll being counted.
    pub poll_id: Uuid,
    /// Count per option, in option order.
    #[schema(value_type = Object)]
    pub results: IndexMap<String, u64>,
    /// Sum of all option counts.
    pub total_votes: u64,
    /// Distinct students who voted.
    pub voter_count: u64,
    /// Students connected right now.
    pub connected_students: u64,
    /// Voters over connected students, as a rounded percentage.
    pub response_rate: u32,
}

impl LiveResults {
    /// Combine a tally with the current roster size.
    pub fn new(poll_id: Uuid, tally: Tally, connected_students: u64) -> Self {
        Self {
            poll_id,
            total_votes: tally.total_votes(),
            response_rate: response_rate(tally.voters, connected_students),
            voter_count: tally.voters,
            results: tally.counts,
            connected_students,
        }
    }
}

impl From<&PollEntity> for LiveResults {
    fn from(value: &PollEntity) -> Self {
        Self {
            poll_id: value.id,
            results: value.results.clone(),
            total_votes: value.total_votes,
            voter_count: value.total_votes,
            connected_students: value.total_students,
            response_rate: value.response_rate(),
        }
    }
}

/// Active poll together with its live tally, used for resynchronisation.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPollView {
    /// The running poll.
    pub poll: ActivePollView,
    /// Its tally so far.
    pub results: LiveResults,
}

/// Reply to a successful `teacher:create_poll`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PollCreatedResponse {
    /// The poll that just started.
    pub poll: ActivePollView,
    /// Session it was created in.
    pub session_id: String,
}

/// Payload of `poll:ended` and reply to `teacher:end_poll`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PollEndedEvent {
    /// Final durable record.
    pub poll: PollSummary,
    /// Frozen per-option counts, in option order.
    #[schema(value_type = Object)]
    pub final_results: IndexMap<String, u64>,
    /// Close reason label.
    pub reason: String,
    /// Close time (RFC 3339).
    pub ended_at: String,
}

impl PollEndedEvent {
    /// Wrap a finalised record.
    pub fn new(poll: PollEntity, reason: &str, ended_at: SystemTime) -> Self {
        Self {
            final_results: poll.results.clone(),
            poll: poll.into(),
            reason: reason.to_string(),
            ended_at: format_system_time(ended_at),
        }
    }
}

/// Payload of `timer:update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdate {
    /// Poll whose countdown ticked.
    pub poll_id: Uuid,
    /// Seconds left, reaching 0 on the last tick.
    pub seconds_remaining: u64,
}

/// List of durable polls, newest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PollHistoryResponse {
    /// Polls, newest first.
    pub polls: Vec<PollSummary>,
    /// Number of polls returned.
    pub total: usize,
}

impl From<Vec<PollEntity>> for PollHistoryResponse {
    fn from(value: Vec<PollEntity>) -> Self {
        let polls: Vec<PollSummary> = value.into_iter().map(Into::into).collect();
        Self {
            total: polls.len(),
            polls,
        }
    }
}

/// Query string of `GET /api/polls`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PollListQuery {
    /// Maximum number of polls, newest first.
    pub limit: Option<usize>,
}

/// Query string of `GET /api/polls/history`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct PollHistoryQuery {
    /// Session to list; defaults to the active session.
    pub session_id: Option<String>,
    /// Maximum number of polls, newest first.
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_results_compute_rate_from_voters() {
        let mut tally = Tally::seeded(&["A".to_string(), "B".to_string()]);
        tally.counts["A"] = 2;
        tally.voters = 2;

        let results = LiveResults::new(Uuid::nil(), tally, 3);
        assert_eq!(results.total_votes, 2);
        assert_eq!(results.response_rate, 67);
        assert_eq!(
            results.results.keys().collect::<Vec<_>>(),
            vec!["A", "B"]
        );
    }

    #[test]
    fn live_payloads_use_wire_field_names() {
        let poll = ActivePoll {
            id: Uuid::nil(),
            question: "Q".into(),
            options: vec!["A".into(), "B".into()],
            duration_secs: 30,
            started_at: SystemTime::UNIX_EPOCH,
            session_id: "s".into(),
            teacher_connection_id: Uuid::nil(),
        };

        let started = serde_json::to_value(ActivePollView::new(&poll, 30)).unwrap();
        assert_eq!(started["startTime"], "1970-01-01T00:00:00Z");
        assert_eq!(started["duration"], 30);
        assert!(started.get("startedAt").is_none());

        let tick = serde_json::to_value(TimerUpdate {
            poll_id: Uuid::nil(),
            seconds_remaining: 7,
        })
        .unwrap();
        assert_eq!(tick["secondsRemaining"], 7);
        assert!(tick.get("timeRemaining").is_none());
    }

    #[test]
    fn summary_serializes_camel_case() {
        let now = SystemTime::UNIX_EPOCH;
        let entity = PollEntity {
            id: Uuid::nil(),
            question: "Q".into(),
            options: vec!["A".into(), "B".into()],
            duration_secs: 10,
            status: PollStatus::Ended,
            results: [("A".to_string(), 1), ("B".to_string(), 0)]
                .into_iter()
                .collect(),
            total_votes: 1,
            total_students: 2,
            session_id: "s".into(),
            teacher_connection_id: Uuid::nil(),
            created_at: now,
            started_at: now,
            ended_at: Some(now),
            end_reason: Some("Time expired".into()),
        };

        let value = serde_json::to_value(PollSummary::from(entity)).unwrap();
        assert_eq!(value["totalVotes"], 1);
        assert_eq!(value["responseRate"], 50);
        assert_eq!(value["status"], "ended");
        assert_eq!(value["endedAt"], "1970-01-01T00:00:00Z");
    }
}
