//! Validated poll definition, requesters and close reasons.

use uuid::Uuid;

use crate::{
    dto::{validation::validate_option_labels, validation::describe, ws::CreatePollRequest},
    error::ServiceError,
};

/// Identifier of one client connection.
pub type ConnectionId = Uuid;

/// Fewest answer options a poll may have.
pub const MIN_OPTIONS: usize = 2;
/// Most answer options a poll may have.
pub const MAX_OPTIONS: usize = 6;
/// Shortest countdown, in seconds.
pub const MIN_DURATION_SECS: u32 = 10;
/// Longest countdown, in seconds.
pub const MAX_DURATION_SECS: u32 = 300;
/// Countdown used when none is given.
pub const DEFAULT_DURATION_SECS: u32 = 60;
/// Longest question, in characters.
pub const MAX_QUESTION_CHARS: usize = 500;

/// Question, options and duration that passed every poll constraint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSpec {
    question: String,
    options: Vec<String>,
    duration_secs: u32,
}

impl PollSpec {
    /// Trim and validate the raw fields. A missing duration means 60 seconds.
    pub fn new(
        question: &str,
        options: &[String],
        duration_secs: Option<u32>,
    ) -> Result<Self, ServiceError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ServiceError::InvalidPollSpec(
                "question cannot be empty".into(),
            ));
        }
        if question.chars().count() > MAX_QUESTION_CHARS {
            return Err(ServiceError::InvalidPollSpec(format!(
                "question must be at most {MAX_QUESTION_CHARS} characters"
            )));
        }

        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
            return Err(ServiceError::InvalidPollSpec(format!(
                "a poll needs between {MIN_OPTIONS} and {MAX_OPTIONS} options (got {})",
                options.len()
            )));
        }
        validate_option_labels(options)
            .map_err(|err| ServiceError::InvalidPollSpec(describe(&err)))?;

        let duration_secs = duration_secs.unwrap_or(DEFAULT_DURATION_SECS);
        if !(MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration_secs) {
            return Err(ServiceError::InvalidPollSpec(format!(
                "duration must be between {MIN_DURATION_SECS} and {MAX_DURATION_SECS} seconds"
            )));
        }

        Ok(Self {
            question: question.to_string(),
            options: options.iter().map(|option| option.trim().to_string()).collect(),
            duration_secs,
        })
    }

    /// Trimmed question.
    pub fn question(&self) -> &str {
        &self.question
    }

    /// Trimmed option labels, in ballot order.
    pub fn options(&self) -> &[String] {
        &self.options
    }

    /// Countdown length in seconds.
    pub fn duration_secs(&self) -> u32 {
        self.duration_secs
    }
}

impl TryFrom<&CreatePollRequest> for PollSpec {
    type Error = ServiceError;

    fn try_from(value: &CreatePollRequest) -> Result<Self, Self::Error> {
        PollSpec::new(&value.question, &value.options, value.duration)
    }
}

/// Who asked for a lifecycle change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requester {
    /// A client connection, subject to authorization.
    Connection(ConnectionId),
    /// The server itself: countdown expiry, cleanup or disconnect policy.
    System,
}

/// Why a poll was closed. The label is what clients see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `Time expired`: the countdown reached zero.
    TimeExpired,
    /// `Ended by teacher`.
    EndedByTeacher,
    /// `Teacher disconnected`, under the auto-close policy.
    TeacherDisconnected,
    /// Found still active long after its duration without a running timer.
    Orphaned,
    /// Server shutting down.
    Shutdown,
}

impl CloseReason {
    /// Label broadcast with `poll:ended` and stored on the record.
    pub fn label(self) -> &'static str {
        match self {
            CloseReason::TimeExpired => "Time expired",
            CloseReason::EndedByTeacher => "Ended by teacher",
            CloseReason::TeacherDisconnected => "Teacher disconnected",
            CloseReason::Orphaned => "Poll expired without a running timer",
            CloseReason::Shutdown => "Server shutting down",
        }
    }
}
