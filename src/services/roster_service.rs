use std::time::{Duration, SystemTime};

use tracing::{info, warn};

use crate::{
    dao::session_cache::{Student, StudentUpdate},
    dto::{
        student::{
            KickResponse, NameCheckResponse, RosterUpdate, StudentJoinResponse, StudentStats,
            StudentView,
        },
        validation::{describe, validate_student_name},
    },
    error::ServiceError,
    services::{gateway, poll_service, teacher_service},
    state::{ConnectionId, SharedState},
};

/// Add the student joined on `connection_id` under `name`.
pub async fn join(
    state: &SharedState,
    connection_id: ConnectionId,
    name: &str,
) -> Result<StudentJoinResponse, ServiceError> {
    validate_student_name(name).map_err(|err| ServiceError::InvalidNameFormat(describe(&err)))?;
    let name = name.trim().to_string();
    let cache = state.cache();

    if cache.student(connection_id).await?.is_some() {
        return Err(ServiceError::InvalidInput(
            "this connection already joined as a student".into(),
        ));
    }

    let mut student = Student::new(connection_id, name.clone(), SystemTime::now());
    // Voters are keyed by name, so someone rejoining mid-poll keeps their vote.
    if let Some(poll) = cache.active_poll().await? {
        student.has_voted = cache.has_voted(poll.id, name.clone()).await?;
    }
    if !cache.insert_student(student.clone()).await? {
        return Err(ServiceError::NameTaken(name));
    }

    let roster = cache.students().await?;
    teacher_service::record_student_count(state, roster.len()).await;
    gateway::broadcast_student_joined(state, &student, &roster);
    gateway::broadcast_roster(state, &roster, None);
    info!(
        connection_id = %connection_id,
        name = %student.name,
        count = roster.len(),
        "student joined"
    );

    let current_poll = poll_service::current_poll_view(state).await?;
    Ok(StudentJoinResponse {
        student: StudentView::from(&student),
        roster: RosterUpdate::from(roster.as_slice()),
        current_poll,
    })
}

/// Drop the student joined on `connection_id`, if any.
pub async fn leave(
    state: &SharedState,
    connection_id: ConnectionId,
) -> Result<Option<Student>, ServiceError> {
    let cache = state.cache();
    let Some(student) = cache.remove_student(connection_id).await? else {
        return Ok(None);
    };

    let roster = cache.students().await?;
    teacher_service::record_student_count(state, roster.len()).await;
    gateway::broadcast_student_left(state, &student, &roster);
    gateway::broadcast_roster(state, &roster, None);
    info!(
        connection_id = %connection_id,
        name = %student.name,
        count = roster.len(),
        "student left"
    );

    Ok(Some(student))
}

/// Remove a student by name on the teacher's behalf.
///
/// The target is told first and disconnected after the configured grace delay;
/// everyone else only sees the new roster.
pub async fn kick(
    state: &SharedState,
    requester: ConnectionId,
    name: &str,
) -> Result<KickResponse, ServiceError> {
    teacher_service::require_claim(state, requester).await?;
    let cache = state.cache();

    let not_found = || ServiceError::StudentNotFound(name.trim().to_string());
    let target = cache
        .student_by_name(name.to_string())
        .await?
        .ok_or_else(not_found)?;
    let removed = cache
        .remove_student(target.connection_id)
        .await?
        .ok_or_else(not_found)?;

    if !gateway::notify_kicked(state, removed.connection_id) {
        warn!(connection_id = %removed.connection_id, "kicked student was already gone");
    }
    gateway::schedule_disconnect(state, removed.connection_id, state.config().kick_grace());

    let roster = cache.students().await?;
    teacher_service::record_student_count(state, roster.len()).await;
    gateway::broadcast_roster(state, &roster, Some(removed.connection_id));
    info!(name = %removed.name, remaining = roster.len(), "student kicked");

    Ok(KickResponse {
        name: removed.name,
        remaining: roster.len(),
    })
}

/// Refresh the last-seen time of the student on `connection_id`.
pub async fn touch(
    state: &SharedState,
    connection_id: ConnectionId,
) -> Result<bool, ServiceError> {
    let updated = state
        .cache()
        .update_student(connection_id, StudentUpdate::Touch(SystemTime::now()))
        .await?;
    Ok(updated.is_some())
}

/// Connected students in join order.
pub async fn roster(state: &SharedState) -> Result<Vec<Student>, ServiceError> {
    Ok(state.cache().students().await?)
}

/// Vote participation across the roster.
pub async fn stats(state: &SharedState) -> Result<StudentStats, ServiceError> {
    let roster = roster(state).await?;
    Ok(StudentStats::from(roster.as_slice()))
}

/// Whether `name` is well formed and currently free.
pub async fn check_name(
    state: &SharedState,
    name: &str,
) -> Result<NameCheckResponse, ServiceError> {
    let trimmed = name.trim().to_string();
    if let Err(err) = validate_student_name(name) {
        return Ok(NameCheckResponse {
            name: trimmed,
            valid: false,
            available: false,
            message: Some(describe(&err)),
        });
    }

    let available = state
        .cache()
        .student_by_name(trimmed.clone())
        .await?
        .is_none();
    Ok(NameCheckResponse {
        message: (!available).then(|| format!("`{trimmed}` is already taken")),
        name: trimmed,
        valid: true,
        available,
    })
}

/// Remove students not seen for `idle` and close their connections.
pub async fn remove_inactive(
    state: &SharedState,
    idle: Duration,
    now: SystemTime,
) -> Result<Vec<Student>, ServiceError> {
    let cache = state.cache();
    let mut removed = Vec::new();
    for student in cache.students().await? {
        let silent_for = now
            .duration_since(student.last_seen)
            .unwrap_or(Duration::ZERO);
        if silent_for < idle {
            continue;
        }
        if let Some(student) = cache.remove_student(student.connection_id).await? {
            state.hub().disconnect(student.connection_id);
            removed.push(student);
        }
    }

    if !removed.is_empty() {
        let roster = cache.students().await?;
        teacher_service::record_student_count(state, roster.len()).await;
        for student in &removed {
            gateway::broadcast_student_left(state, student, &roster);
        }
        gateway::broadcast_roster(state, &roster, None);
        info!(removed = removed.len(), remaining = roster.len(), "removed inactive students");
    }
    Ok(removed)
}
