use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::dao::{models::response_rate, session_cache::Student};

use super::{format_system_time, poll::CurrentPollView};

/// Public view of a connected student.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentView {
    /// Display name as the student typed it.
    pub name: String,
    /// When the student joined (RFC 3339).
    pub joined_at: String,
    /// Whether the student voted in the active poll.
    pub has_voted: bool,
    /// When that vote landed.
    pub voted_at: Option<String>,
}

impl From<&Student> for StudentView {
    fn from(value: &Student) -> Self {
        Self {
            name: value.name.clone(),
            joined_at: format_system_time(value.joined_at),
            has_voted: value.has_voted,
            voted_at: value.voted_at.map(format_system_time),
        }
    }
}

/// Roster in join order; payload of `students:updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RosterUpdate {
    /// Connected students, oldest first.
    pub students: Vec<StudentView>,
    /// Number of connected students.
    pub count: usize,
}

impl From<&[Student]> for RosterUpdate {
    fn from(value: &[Student]) -> Self {
        Self {
            students: value.iter().map(StudentView::from).collect(),
            count: value.len(),
        }
    }
}

/// Payload of `student:joined` and `student:left`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentPresenceEvent {
    /// Student who joined or left.
    pub student: StudentView,
    /// Roster after the change.
    pub roster: RosterUpdate,
}

/// Reply to a successful `student:join`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentJoinResponse {
    /// The newly joined student.
    pub student: StudentView,
    /// Roster including the new student.
    pub roster: RosterUpdate,
    /// Poll the student can vote in right away, if one is running.
    pub current_poll: Option<CurrentPollView>,
}

/// Payload of `student:kicked`, sent only to the removed student.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct KickedNotice {
    /// Human readable reason shown to the student.
    pub reason: String,
}

/// Reply to a successful `teacher:kick_student`.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KickResponse {
    /// Name of the removed student.
    pub name: String,
    /// Students still connected.
    pub remaining: usize,
}

/// Voting progress of the connected roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StudentStats {
    /// Connected students.
    pub total: usize,
    /// Students who voted in the active poll.
    pub voted: usize,
    /// Students still to vote.
    pub not_voted: usize,
    /// Percentage of connected students who voted, rounded.
    pub response_rate: u32,
}

impl From<&[Student]> for StudentStats {
    fn from(value: &[Student]) -> Self {
        let voted = value.iter().filter(|student| student.has_voted).count();
        Self {
            total: value.len(),
            voted,
            not_voted: value.len() - voted,
            response_rate: response_rate(voted as u64, value.len() as u64),
        }
    }
}

/// Body of `POST /api/students/validate-name`.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct NameCheckRequest {
    /// Candidate display name.
    #[validate(length(max = 200))]
    pub name: String,
}

/// Whether a name could be used to join right now.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct NameCheckResponse {
    /// Name as checked, after trimming.
    pub name: String,
    /// Whether the name passes the format rules.
    pub valid: bool,
    /// Whether no connected student uses it yet.
    pub available: bool,
    /// Why the name cannot be used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use uuid::Uuid;

    use super::*;

    #[test]
    fn stats_count_voters() {
        let now = SystemTime::now();
        let mut voted = Student::new(Uuid::new_v4(), "Alice".into(), now);
        voted.has_voted = true;
        let idle = Student::new(Uuid::new_v4(), "Bob".into(), now);
        let roster = vec![voted, idle];

        let stats = StudentStats::from(roster.as_slice());
        assert_eq!(
            stats,
            StudentStats {
                total: 2,
                voted: 1,
                not_voted: 1,
                response_rate: 50
            }
        );
    }
}
