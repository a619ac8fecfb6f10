//! Ephemeral live-session state: the active poll pointer, its tally and voter set,
//! the roster of connected students and the teacher claim.
//!
//! Every mutation that must not race is a single primitive on [`SessionCache`], so a
//! shared backend can implement it atomically.

/// In-process backend.
pub mod memory;

use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::dao::storage::StorageResult;

pub use memory::MemorySessionCache;

/// Poll currently accepting votes.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePoll {
    /// Poll identifier, shared with the durable record.
    pub id: Uuid,
    /// Question shown to students.
    pub question: String,
    /// Answer labels in ballot order.
    pub options: Vec<String>,
    /// Countdown length in seconds.
    pub duration_secs: u32,
    /// Wall-clock start of the countdown.
    pub started_at: SystemTime,
    /// Session the poll belongs to.
    pub session_id: String,
    /// Connection that created the poll.
    pub teacher_connection_id: Uuid,
}

impl ActivePoll {
    /// Whether `option` is one of the poll's labels.
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|candidate| candidate == option)
    }

    /// Seconds left according to the wall clock, never negative.
    pub fn seconds_remaining(&self, now: SystemTime) -> u64 {
        let elapsed = now
            .duration_since(self.started_at)
            .unwrap_or(Duration::ZERO)
            .as_secs();
        u64::from(self.duration_secs).saturating_sub(elapsed)
    }

    /// Age of the poll according to the wall clock.
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.started_at).unwrap_or(Duration::ZERO)
    }
}

/// Live vote counts of one poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    /// Count per option, in option order.
    pub counts: IndexMap<String, u64>,
    /// Size of the voter set.
    pub voters: u64,
}

impl Tally {
    /// Zeroed tally for the given options.
    pub fn seeded(options: &[String]) -> Self {
        Self {
            counts: options.iter().map(|option| (option.clone(), 0)).collect(),
            voters: 0,
        }
    }

    /// Sum of all option counts.
    pub fn total_votes(&self) -> u64 {
        self.counts.values().sum()
    }
}

/// Pointer and tally removed together when a poll closes.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedPoll {
    /// The pointer as it was at close.
    pub poll: ActivePoll,
    /// Final tally.
    pub tally: Tally,
}

/// Result of the combined vote primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum VoteOutcome {
    /// Vote counted; carries the tally right after the increment.
    Recorded(Tally),
    /// No poll is active, or the active poll has another id.
    NoActivePoll,
    /// The option is not one of the poll's labels.
    InvalidOption,
    /// The voter already voted in this poll.
    AlreadyVoted,
}

/// A connected student.
#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    /// Connection the student joined on.
    pub connection_id: Uuid,
    /// Display name, unique ignoring case.
    pub name: String,
    /// Join time.
    pub joined_at: SystemTime,
    /// Last activity; drives the inactivity sweep.
    pub last_seen: SystemTime,
    /// Voted in the active poll.
    pub has_voted: bool,
    /// When that vote landed.
    pub voted_at: Option<SystemTime>,
}

impl Student {
    /// Freshly joined student.
    pub fn new(connection_id: Uuid, name: String, now: SystemTime) -> Self {
        Self {
            connection_id,
            name,
            joined_at: now,
            last_seen: now,
            has_voted: false,
            voted_at: None,
        }
    }
}

/// In-place change applied to a roster entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StudentUpdate {
    /// Refresh the last-seen timestamp.
    Touch(SystemTime),
    /// Flag the student as having voted in the current poll.
    MarkVoted(SystemTime),
}

/// Which connection currently holds teacher authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeacherClaim {
    /// Connection acting as teacher.
    pub connection_id: Uuid,
    /// Session it controls.
    pub session_id: String,
    /// When the claim was made.
    pub joined_at: SystemTime,
}

/// Key used for name uniqueness and voter identity.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Key-value store for the live session.
pub trait SessionCache: Send + Sync {
    /// Install `poll` with a zeroed tally unless a poll is already active.
    fn open_poll(&self, poll: ActivePoll) -> BoxFuture<'static, StorageResult<bool>>;
    /// The poll accepting votes, if any.
    fn active_poll(&self) -> BoxFuture<'static, StorageResult<Option<ActivePoll>>>;
    /// Remove the pointer, tally and voter set of `poll_id` in one step.
    ///
    /// Returns `None` when `poll_id` is not the active poll, so at most one caller
    /// ever receives the final tally.
    fn take_poll(&self, poll_id: Uuid) -> BoxFuture<'static, StorageResult<Option<ClosedPoll>>>;
    /// Check the poll, check the option, add the voter and bump the count, atomically.
    fn record_vote(
        &self,
        poll_id: Uuid,
        voter_name: String,
        option: String,
    ) -> BoxFuture<'static, StorageResult<VoteOutcome>>;
    /// Live tally of `poll_id`, or `None` when it is not active.
    fn tally(&self, poll_id: Uuid) -> BoxFuture<'static, StorageResult<Option<Tally>>>;
    /// Whether `voter_name` is in the voter set of `poll_id`.
    fn has_voted(
        &self,
        poll_id: Uuid,
        voter_name: String,
    ) -> BoxFuture<'static, StorageResult<bool>>;

    /// Add a student unless the name is held by another connection.
    fn insert_student(&self, student: Student) -> BoxFuture<'static, StorageResult<bool>>;
    /// Drop the roster entry of `connection_id`, returning it.
    fn remove_student(
        &self,
        connection_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Option<Student>>>;
    /// Roster entry of `connection_id`.
    fn student(&self, connection_id: Uuid) -> BoxFuture<'static, StorageResult<Option<Student>>>;
    /// Roster entry whose name matches, ignoring case.
    fn student_by_name(&self, name: String)
    -> BoxFuture<'static, StorageResult<Option<Student>>>;
    /// Roster in join order.
    fn students(&self) -> BoxFuture<'static, StorageResult<Vec<Student>>>;
    /// Apply `update` to one roster entry, returning the new value.
    fn update_student(
        &self,
        connection_id: Uuid,
        update: StudentUpdate,
    ) -> BoxFuture<'static, StorageResult<Option<Student>>>;
    /// Clear every has-voted flag, returning how many were set.
    fn reset_votes(&self) -> BoxFuture<'static, StorageResult<usize>>;

    /// Install a teacher claim, returning the one it replaced.
    fn set_teacher(
        &self,
        claim: TeacherClaim,
    ) -> BoxFuture<'static, StorageResult<Option<TeacherClaim>>>;
    /// Current teacher claim.
    fn teacher(&self) -> BoxFuture<'static, StorageResult<Option<TeacherClaim>>>;
    /// Drop the claim if `connection_id` holds it.
    fn release_teacher(&self, connection_id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;

    /// Forget everything.
    fn clear(&self) -> BoxFuture<'static, StorageResult<()>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_remaining_never_goes_negative() {
        let started_at = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let poll = ActivePoll {
            id: Uuid::new_v4(),
            question: "Q".into(),
            options: vec!["A".into(), "B".into()],
            duration_secs: 30,
            started_at,
            session_id: "s".into(),
            teacher_connection_id: Uuid::new_v4(),
        };

        assert_eq!(poll.seconds_remaining(started_at + Duration::from_secs(12)), 18);
        assert_eq!(poll.seconds_remaining(started_at + Duration::from_secs(90)), 0);
        assert_eq!(poll.seconds_remaining(started_at - Duration::from_secs(5)), 30);
    }

    #[test]
    fn name_key_folds_case_and_whitespace() {
        assert_eq!(name_key("  Alice "), "alice");
        assert_eq!(name_key("ALICE"), name_key("alice"));
    }
}
