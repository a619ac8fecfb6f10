//! Poll lifecycle: `Draft -> Active -> Ended`, with no way back.

use std::time::SystemTime;

use thiserror::Error;
use uuid::Uuid;

use crate::{
    dao::{
        models::{PollEntity, PollStatus},
        session_cache::{ActivePoll, ClosedPoll},
    },
    error::ServiceError,
    state::poll::{CloseReason, ConnectionId, PollSpec},
};

/// Phases a poll moves through. Draft polls only exist while being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    /// Being validated; never stored.
    Draft,
    /// Accepting votes.
    Active,
    /// Closed with frozen results.
    Ended,
}

impl From<PollStatus> for PollPhase {
    fn from(value: PollStatus) -> Self {
        match value {
            PollStatus::Active => PollPhase::Active,
            PollStatus::Ended => PollPhase::Ended,
        }
    }
}

/// Events that can be applied to a poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// Validation passed and the poll starts accepting votes.
    Open,
    /// Voting stops for the given reason.
    Close(CloseReason),
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// The phase the poll was in when the event was received.
    pub from: PollPhase,
    /// The event that cannot be applied from this phase.
    pub event: PollEvent,
}

impl From<InvalidTransition> for ServiceError {
    fn from(err: InvalidTransition) -> Self {
        match err.from {
            PollPhase::Ended => ServiceError::PollAlreadyEnded,
            _ => ServiceError::Internal(err.to_string()),
        }
    }
}

impl PollPhase {
    /// Compute the phase reached by applying `event`.
    pub fn apply(self, event: PollEvent) -> Result<PollPhase, InvalidTransition> {
        match (self, event) {
            (PollPhase::Draft, PollEvent::Open) => Ok(PollPhase::Active),
            (PollPhase::Active, PollEvent::Close(_)) => Ok(PollPhase::Ended),
            (from, event) => Err(InvalidTransition { from, event }),
        }
    }

    /// Persisted status for this phase. Drafts are never persisted.
    pub fn status(self) -> Option<PollStatus> {
        match self {
            PollPhase::Draft => None,
            PollPhase::Active => Some(PollStatus::Active),
            PollPhase::Ended => Some(PollStatus::Ended),
        }
    }
}

/// Open a validated spec: the durable record and the live pointer that goes with it.
pub fn open_poll(
    spec: PollSpec,
    session_id: String,
    teacher: ConnectionId,
    now: SystemTime,
) -> Result<(PollEntity, ActivePoll), InvalidTransition> {
    let status = PollPhase::Draft
        .apply(PollEvent::Open)?
        .status()
        .ok_or(InvalidTransition {
            from: PollPhase::Draft,
            event: PollEvent::Open,
        })?;

    let record = PollEntity {
        id: Uuid::new_v4(),
        question: spec.question().to_string(),
        options: spec.options().to_vec(),
        duration_secs: spec.duration_secs(),
        status,
        results: Default::default(),
        total_votes: 0,
        total_students: 0,
        session_id,
        teacher_connection_id: teacher,
        created_at: now,
        started_at: now,
        ended_at: None,
        end_reason: None,
    };
    let pointer = ActivePoll {
        id: record.id,
        question: record.question.clone(),
        options: record.options.clone(),
        duration_secs: record.duration_secs,
        started_at: now,
        session_id: record.session_id.clone(),
        teacher_connection_id: teacher,
    };
    Ok((record, pointer))
}

/// Freeze the final tally into `record` and mark it ended.
///
/// The configured duration is left as it was, whatever the reason.
pub fn close_record(
    record: &mut PollEntity,
    closed: &ClosedPoll,
    total_students: u64,
    reason: CloseReason,
    ended_at: SystemTime,
) -> Result<(), InvalidTransition> {
    let next = PollPhase::from(record.status).apply(PollEvent::Close(reason))?;
    if let Some(status) = next.status() {
        record.status = status;
    }
    record.results = record
        .options
        .iter()
        .map(|option| {
            let votes = closed.tally.counts.get(option).copied().unwrap_or(0);
            (option.clone(), votes)
        })
        .collect();
    record.total_votes = closed.tally.total_votes();
    record.total_students = total_students;
    record.ended_at = Some(ended_at);
    record.end_reason = Some(reason.label().to_string());
    Ok(())
}

/// Reconstruct a record from the live pointer when the durable one is missing.
pub fn record_from_pointer(poll: &ActivePoll) -> PollEntity {
    PollEntity {
        id: poll.id,
        question: poll.question.clone(),
        options: poll.options.clone(),
        duration_secs: poll.duration_secs,
        status: PollStatus::Active,
        results: Default::default(),
        total_votes: 0,
        total_students: 0,
        session_id: poll.session_id.clone(),
        teacher_connection_id: poll.teacher_connection_id,
        created_at: poll.started_at,
        started_at: poll.started_at,
        ended_at: None,
        end_reason: None,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::dao::session_cache::Tally;

    fn spec(duration: u32) -> PollSpec {
        PollSpec::new("Q?", &["A".to_string(), "B".to_string()], Some(duration)).unwrap()
    }

    #[test]
    fn draft_opens_and_active_closes() {
        assert_eq!(PollPhase::Draft.apply(PollEvent::Open), Ok(PollPhase::Active));
        assert_eq!(
            PollPhase::Active.apply(PollEvent::Close(CloseReason::TimeExpired)),
            Ok(PollPhase::Ended)
        );
    }

    #[test]
    fn ended_is_terminal() {
        let err = PollPhase::Ended
            .apply(PollEvent::Close(CloseReason::EndedByTeacher))
            .unwrap_err();
        assert_eq!(err.from, PollPhase::Ended);
        assert!(matches!(
            ServiceError::from(err),
            ServiceError::PollAlreadyEnded
        ));
        assert!(PollPhase::Active.apply(PollEvent::Open).is_err());
    }

    #[test]
    fn closing_freezes_tally_and_keeps_duration() {
        let started = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let (mut record, pointer) =
            open_poll(spec(10), "s".into(), Uuid::new_v4(), started).unwrap();
        assert_eq!(record.status, PollStatus::Active);

        let mut tally = Tally::seeded(&pointer.options);
        tally.counts["B"] = 3;
        tally.voters = 3;
        let closed = ClosedPoll {
            poll: pointer,
            tally,
        };

        let ended_at = started + Duration::from_secs(5);
        close_record(&mut record, &closed, 4, CloseReason::EndedByTeacher, ended_at).unwrap();

        assert_eq!(record.status, PollStatus::Ended);
        assert_eq!(record.duration_secs, 10);
        assert_eq!(record.total_votes, 3);
        assert_eq!(record.total_students, 4);
        assert_eq!(record.results["A"], 0);
        assert_eq!(record.results["B"], 3);
        assert_eq!(record.ended_at, Some(ended_at));
        assert_eq!(record.end_reason.as_deref(), Some("Ended by teacher"));

        let again = close_record(&mut record, &closed, 4, CloseReason::TimeExpired, ended_at);
        assert!(again.is_err());
    }
}
