use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{PollEntity, PollStatus, SessionCounter},
        session_cache::{ActivePoll, ClosedPoll, StudentUpdate, Tally, VoteOutcome},
    },
    dto::{
        poll::{ActivePollView, CurrentPollView, LiveResults, PollCreatedResponse, PollEndedEvent},
        ws::VoteRequest,
    },
    error::ServiceError,
    services::{countdown::CountdownSink, gateway, teacher_service},
    state::{
        ConnectionId, SharedState, lifecycle,
        poll::{CloseReason, PollSpec, Requester},
    },
};

/// Open a new poll for the teacher holding the claim.
///
/// The durable record is written first and the live pointer last, so a failure
/// in between leaves no active poll behind.
pub async fn create_poll(
    state: &SharedState,
    spec: PollSpec,
    requester: ConnectionId,
) -> Result<PollCreatedResponse, ServiceError> {
    let _gate = state.lifecycle_gate().lock().await;
    let cache = state.cache();

    if cache.active_poll().await?.is_some() {
        return Err(ServiceError::PollAlreadyActive);
    }
    let claim = teacher_service::require_claim(state, requester).await?;
    let store = state.require_record_store().await?;

    let now = SystemTime::now();
    let (record, pointer) = lifecycle::open_poll(spec, claim.session_id.clone(), requester, now)?;
    store.save_poll(record.clone()).await?;

    if !cache.open_poll(pointer.clone()).await? {
        warn!(poll_id = %record.id, "active poll appeared while creating; retiring new record");
        retire_unopened(state, record, &pointer, now).await;
        return Err(ServiceError::PollAlreadyActive);
    }

    state.countdown().start(
        pointer.id,
        pointer.duration_secs,
        Arc::new(PollTimerSink {
            state: state.clone(),
        }),
    );

    if let Err(err) = store
        .increment_session_counter(claim.session_id.clone(), SessionCounter::Polls, now)
        .await
    {
        warn!(session_id = %claim.session_id, error = %err, "failed to count created poll");
    }

    let view = ActivePollView::new(&pointer, u64::from(pointer.duration_secs));
    gateway::broadcast_poll_started(state, &view);
    info!(
        poll_id = %pointer.id,
        session_id = %claim.session_id,
        options = pointer.options.len(),
        duration_secs = pointer.duration_secs,
        "poll created"
    );

    Ok(PollCreatedResponse {
        poll: view,
        session_id: claim.session_id,
    })
}

/// Count one vote from the student joined on `requester`.
pub async fn submit_vote(
    state: &SharedState,
    request: VoteRequest,
    requester: ConnectionId,
) -> Result<LiveResults, ServiceError> {
    let cache = state.cache();
    let Some(student) = cache.student(requester).await? else {
        return Err(ServiceError::Unauthorized(
            "join as a student before voting".into(),
        ));
    };
    if !student
        .name
        .trim()
        .eq_ignore_ascii_case(request.student_name.trim())
    {
        return Err(ServiceError::Unauthorized(
            "cannot vote on behalf of another student".into(),
        ));
    }

    let tally = match cache
        .record_vote(request.poll_id, student.name.clone(), request.option.clone())
        .await?
    {
        VoteOutcome::Recorded(tally) => tally,
        VoteOutcome::NoActivePoll => return Err(ServiceError::NoActivePoll),
        VoteOutcome::InvalidOption => return Err(ServiceError::InvalidOption(request.option)),
        VoteOutcome::AlreadyVoted => return Err(ServiceError::DuplicateVote(student.name)),
    };

    if let Err(err) = cache
        .update_student(requester, StudentUpdate::MarkVoted(SystemTime::now()))
        .await
    {
        warn!(connection_id = %requester, error = %err, "failed to flag student as voted");
    }
    let roster = cache.students().await?;
    let results = LiveResults::new(request.poll_id, tally, roster.len() as u64);

    gateway::broadcast_poll_results(state, &results);
    gateway::broadcast_roster(state, &roster, None);
    debug!(
        poll_id = %request.poll_id,
        option = %request.option,
        total_votes = results.total_votes,
        "vote recorded"
    );

    Ok(results)
}

/// Close `poll_id` if it is still the active poll.
///
/// Exactly one caller wins a close. A [`Requester::System`] close against a poll that
/// is no longer active resolves to `Ok(None)`; a connection gets an error instead.
pub async fn close_poll(
    state: &SharedState,
    poll_id: Uuid,
    requester: Requester,
    reason: CloseReason,
) -> Result<Option<PollEndedEvent>, ServiceError> {
    let _gate = state.lifecycle_gate().lock().await;
    let cache = state.cache();

    let Some(active) = cache
        .active_poll()
        .await?
        .filter(|poll| poll.id == poll_id)
    else {
        return stale_close(state, poll_id, requester).await;
    };
    if let Requester::Connection(connection_id) = requester {
        authorize_close(state, &active, connection_id).await?;
    }

    let Some(closed) = cache.take_poll(poll_id).await? else {
        return stale_close(state, poll_id, requester).await;
    };
    state.countdown().stop(poll_id);

    let ended_at = SystemTime::now();
    let total_students = match cache.students().await {
        Ok(roster) => roster.len() as u64,
        Err(err) => {
            warn!(poll_id = %poll_id, error = %err, "failed to count students at close");
            0
        }
    };
    let record = finalize_record(state, &closed, total_students, reason, ended_at).await;

    match cache.reset_votes().await {
        Ok(reset) => debug!(poll_id = %poll_id, reset, "cleared voted flags"),
        Err(err) => warn!(poll_id = %poll_id, error = %err, "failed to clear voted flags"),
    }

    info!(
        poll_id = %poll_id,
        reason = reason.label(),
        total_votes = record.total_votes,
        total_students,
        "poll closed"
    );
    let event = PollEndedEvent::new(record, reason.label(), ended_at);
    gateway::broadcast_poll_ended(state, &event);
    if let Ok(roster) = cache.students().await {
        gateway::broadcast_roster(state, &roster, None);
    }

    Ok(Some(event))
}

/// Teacher-initiated close of `poll_id`, or of whichever poll is active.
pub async fn end_poll(
    state: &SharedState,
    poll_id: Option<Uuid>,
    requester: ConnectionId,
) -> Result<PollEndedEvent, ServiceError> {
    let poll_id = match poll_id {
        Some(id) => id,
        None => state
            .cache()
            .active_poll()
            .await?
            .map(|poll| poll.id)
            .ok_or(ServiceError::NoActivePoll)?,
    };

    close_poll(
        state,
        poll_id,
        Requester::Connection(requester),
        CloseReason::EndedByTeacher,
    )
    .await?
    .ok_or(ServiceError::NoActivePoll)
}

/// The active poll with its live tally, if any.
pub async fn current_poll_view(
    state: &SharedState,
) -> Result<Option<CurrentPollView>, ServiceError> {
    let cache = state.cache();
    let Some(poll) = cache.active_poll().await? else {
        return Ok(None);
    };

    let tally = cache
        .tally(poll.id)
        .await?
        .unwrap_or_else(|| Tally::seeded(&poll.options));
    let connected = cache.students().await?.len() as u64;
    let remaining = state
        .countdown()
        .time_remaining(poll.id)
        .unwrap_or_else(|| poll.seconds_remaining(SystemTime::now()));

    Ok(Some(CurrentPollView {
        poll: ActivePollView::new(&poll, remaining),
        results: LiveResults::new(poll.id, tally, connected),
    }))
}

async fn authorize_close(
    state: &SharedState,
    poll: &ActivePoll,
    connection_id: ConnectionId,
) -> Result<(), ServiceError> {
    let holds_claim = state
        .cache()
        .teacher()
        .await?
        .is_some_and(|claim| {
            claim.connection_id == connection_id && claim.session_id == poll.session_id
        });
    if holds_claim {
        Ok(())
    } else {
        Err(ServiceError::Unauthorized(
            "only the teacher can end the poll".into(),
        ))
    }
}

async fn stale_close(
    state: &SharedState,
    poll_id: Uuid,
    requester: Requester,
) -> Result<Option<PollEndedEvent>, ServiceError> {
    if requester == Requester::System {
        debug!(poll_id = %poll_id, "ignoring close of a poll that is no longer active");
        return Ok(None);
    }

    let Some(store) = state.record_store().await else {
        return Err(ServiceError::NoActivePoll);
    };
    match store.find_poll(poll_id).await {
        Ok(Some(poll)) if poll.status == PollStatus::Ended => Err(ServiceError::PollAlreadyEnded),
        Ok(_) => Err(ServiceError::NoActivePoll),
        Err(err) => {
            warn!(poll_id = %poll_id, error = %err, "failed to look up closed poll");
            Err(ServiceError::NoActivePoll)
        }
    }
}

/// Freeze the final tally into the durable record. Storage failures are logged.
async fn finalize_record(
    state: &SharedState,
    closed: &ClosedPoll,
    total_students: u64,
    reason: CloseReason,
    ended_at: SystemTime,
) -> PollEntity {
    let poll_id = closed.poll.id;
    let store = state.record_store().await;

    let stored = match &store {
        Some(store) => match store.find_poll(poll_id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(poll_id = %poll_id, error = %err, "failed to load poll record for close");
                None
            }
        },
        None => None,
    };
    let mut record = match stored {
        Some(record) if record.status == PollStatus::Active => record,
        _ => lifecycle::record_from_pointer(&closed.poll),
    };
    if let Err(err) =
        lifecycle::close_record(&mut record, closed, total_students, reason, ended_at)
    {
        error!(poll_id = %poll_id, error = %err, "failed to finalise poll record");
    }

    match store {
        Some(store) => {
            if let Err(err) = store.save_poll(record.clone()).await {
                error!(poll_id = %poll_id, error = %err, "failed to persist closed poll");
            }
        }
        None => warn!(poll_id = %poll_id, "no record store; closed poll not persisted"),
    }
    record
}

/// Mark a record whose pointer never went live as ended.
async fn retire_unopened(
    state: &SharedState,
    mut record: PollEntity,
    pointer: &ActivePoll,
    now: SystemTime,
) {
    let closed = ClosedPoll {
        poll: pointer.clone(),
        tally: Tally::seeded(&pointer.options),
    };
    if lifecycle::close_record(&mut record, &closed, 0, CloseReason::Orphaned, now).is_err() {
        return;
    }
    let Some(store) = state.record_store().await else {
        return;
    };
    if let Err(err) = store.save_poll(record).await {
        warn!(poll_id = %pointer.id, error = %err, "failed to retire unopened poll");
    }
}

/// Bridges countdown ticks to the gateway and expiry to [`close_poll`].
struct PollTimerSink {
    state: SharedState,
}

impl CountdownSink for PollTimerSink {
    fn tick(&self, poll_id: Uuid, remaining: u64) {
        gateway::broadcast_timer_update(&self.state, poll_id, remaining);
    }

    fn expired(&self, poll_id: Uuid) -> BoxFuture<'static, ()> {
        let state = self.state.clone();
        Box::pin(async move {
            if let Err(err) =
                close_poll(&state, poll_id, Requester::System, CloseReason::TimeExpired).await
            {
                error!(poll_id = %poll_id, error = %err, "failed to close expired poll");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            record_store::{MemoryRecordStore, RecordStore},
            session_cache::{Student, TeacherClaim},
        },
        state::AppState,
    };

    async fn classroom() -> (SharedState, MemoryRecordStore, ConnectionId) {
        let state = AppState::new(AppConfig::default());
        let store = MemoryRecordStore::new();
        state.set_record_store(Arc::new(store.clone())).await;
        let teacher = Uuid::new_v4();
        state
            .cache()
            .set_teacher(TeacherClaim {
                connection_id: teacher,
                session_id: "session_test".into(),
                joined_at: SystemTime::now(),
            })
            .await
            .unwrap();
        (state, store, teacher)
    }

    fn spec(duration: u32) -> PollSpec {
        PollSpec::new(
            "Pick a color",
            &["Red".to_string(), "Blue".to_string()],
            Some(duration),
        )
        .unwrap()
    }

    async fn join(state: &SharedState, name: &str) -> ConnectionId {
        let id = Uuid::new_v4();
        let student = Student::new(id, name.into(), SystemTime::now());
        assert!(state.cache().insert_student(student).await.unwrap());
        id
    }

    fn vote(poll_id: Uuid, option: &str, name: &str) -> VoteRequest {
        VoteRequest {
            poll_id,
            option: option.into(),
            student_name: name.into(),
        }
    }

    #[tokio::test]
    async fn second_poll_is_rejected_until_the_first_closes() {
        let (state, _store, teacher) = classroom().await;

        let first = create_poll(&state, spec(30), teacher).await.unwrap();
        let err = create_poll(&state, spec(30), teacher).await.unwrap_err();
        assert!(matches!(err, ServiceError::PollAlreadyActive));

        // Even a stranger gets the same answer while a poll runs.
        let err = create_poll(&state, spec(30), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PollAlreadyActive));

        end_poll(&state, Some(first.poll.id), teacher).await.unwrap();
        assert!(current_poll_view(&state).await.unwrap().is_none());
        assert!(create_poll(&state, spec(30), teacher).await.is_ok());
    }

    #[tokio::test]
    async fn create_requires_claim_and_store() {
        let (state, _store, _teacher) = classroom().await;
        let err = create_poll(&state, spec(30), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let (state, _store, teacher) = classroom().await;
        state.clear_record_store().await;
        let err = create_poll(&state, spec(30), teacher).await.unwrap_err();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
        assert!(state.cache().active_poll().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn alice_votes_once() {
        let (state, _store, teacher) = classroom().await;
        let created = create_poll(&state, spec(10), teacher).await.unwrap();
        let alice = join(&state, "Alice").await;

        let results = submit_vote(&state, vote(created.poll.id, "Red", "Alice"), alice)
            .await
            .unwrap();
        assert_eq!(results.results["Red"], 1);
        assert_eq!(results.results["Blue"], 0);
        assert_eq!(results.total_votes, 1);
        assert_eq!(results.voter_count, 1);
        assert_eq!(results.response_rate, 100);

        let err = submit_vote(&state, vote(created.poll.id, "Blue", "alice"), alice)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateVote(_)));

        let view = current_poll_view(&state).await.unwrap().unwrap();
        assert_eq!(view.results.total_votes, 1);
        assert_eq!(view.results.results["Blue"], 0);
    }

    #[tokio::test]
    async fn vote_errors_are_specific() {
        let (state, _store, teacher) = classroom().await;
        let created = create_poll(&state, spec(30), teacher).await.unwrap();
        let bob = join(&state, "Bob").await;

        let err = submit_vote(&state, vote(created.poll.id, "Green", "Bob"), bob)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidOption(_)));

        let err = submit_vote(&state, vote(Uuid::new_v4(), "Red", "Bob"), bob)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NoActivePoll));

        let err = submit_vote(&state, vote(created.poll.id, "Red", "Carol"), bob)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));

        let err = submit_vote(&state, vote(created.poll.id, "Red", "Bob"), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn early_end_keeps_configured_duration() {
        let (state, store, teacher) = classroom().await;
        let created = create_poll(&state, spec(10), teacher).await.unwrap();
        let alice = join(&state, "Alice").await;
        submit_vote(&state, vote(created.poll.id, "Red", "Alice"), alice)
            .await
            .unwrap();

        let ended = end_poll(&state, None, teacher).await.unwrap();
        assert_eq!(ended.reason, "Ended by teacher");

        let record = store.find_poll(created.poll.id).await.unwrap().unwrap();
        assert_eq!(record.status, PollStatus::Ended);
        assert_eq!(record.duration_secs, 10);
        assert_eq!(record.total_votes, 1);
        assert_eq!(record.total_students, 1);

        let student = state.cache().student(alice).await.unwrap().unwrap();
        assert!(!student.has_voted);
        assert!(!state.countdown().is_running(created.poll.id));
    }

    #[tokio::test]
    async fn double_close_distinguishes_teacher_from_timer() {
        let (state, _store, teacher) = classroom().await;
        let created = create_poll(&state, spec(30), teacher).await.unwrap();
        end_poll(&state, None, teacher).await.unwrap();

        let err = end_poll(&state, Some(created.poll.id), teacher)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PollAlreadyEnded));

        let err = end_poll(&state, None, teacher).await.unwrap_err();
        assert!(matches!(err, ServiceError::NoActivePoll));

        let late = close_poll(
            &state,
            created.poll.id,
            Requester::System,
            CloseReason::TimeExpired,
        )
        .await
        .unwrap();
        assert!(late.is_none());
    }

    #[tokio::test]
    async fn only_the_teacher_may_end() {
        let (state, _store, teacher) = classroom().await;
        create_poll(&state, spec(30), teacher).await.unwrap();
        let student = join(&state, "Mallory").await;

        let err = end_poll(&state, None, student).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        assert!(state.cache().active_poll().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn teacher_who_left_can_no_longer_end_their_poll() {
        let (state, _store, teacher) = classroom().await;
        let created = create_poll(&state, spec(30), teacher).await.unwrap();

        assert!(teacher_service::leave(&state, teacher).await.unwrap());
        let err = end_poll(&state, None, teacher).await.unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
        let active = state.cache().active_poll().await.unwrap().unwrap();
        assert_eq!(active.id, created.poll.id);
    }

    #[tokio::test]
    async fn superseded_teacher_cannot_end_the_poll() {
        let (state, _store, teacher) = classroom().await;
        create_poll(&state, spec(30), teacher).await.unwrap();
        let replacement = Uuid::new_v4();
        state
            .cache()
            .set_teacher(TeacherClaim {
                connection_id: replacement,
                session_id: "session_test".into(),
                joined_at: SystemTime::now(),
            })
            .await
            .unwrap();

        let err = end_poll(&state, None, teacher).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unauthorized(_)));
        assert!(state.cache().active_poll().await.unwrap().is_some());

        let ended = end_poll(&state, None, replacement).await.unwrap();
        assert_eq!(ended.reason, "Ended by teacher");
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_poll_expires_with_zero_tally() {
        let (state, store, teacher) = classroom().await;
        let created = create_poll(&state, spec(10), teacher).await.unwrap();
        let alice = join(&state, "Alice").await;

        tokio::time::sleep(Duration::from_secs(12)).await;

        assert!(state.cache().active_poll().await.unwrap().is_none());
        let record = store.find_poll(created.poll.id).await.unwrap().unwrap();
        assert_eq!(record.status, PollStatus::Ended);
        assert_eq!(record.end_reason.as_deref(), Some("Time expired"));
        assert_eq!(record.total_votes, 0);
        assert_eq!(record.results["Red"], 0);
        assert_eq!(record.results["Blue"], 0);
        let student = state.cache().student(alice).await.unwrap().unwrap();
        assert!(!student.has_voted);
    }
}
