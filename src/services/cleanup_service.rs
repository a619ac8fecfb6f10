//! Periodic housekeeping and the shutdown sequence.

use std::time::{Duration, SystemTime};

use tokio::time::{MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::{
    services::{poll_service, roster_service},
    state::{
        SharedState,
        poll::{CloseReason, Requester},
    },
};

/// What one sweep removed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Idle sessions marked ended.
    pub sessions_ended: usize,
    /// Silent students dropped from the roster.
    pub students_removed: usize,
    /// Whether an orphaned poll was closed.
    pub orphaned_poll_closed: bool,
}

/// Run [`sweep`] every `cleanup_interval` until the task is aborted.
pub async fn run(state: SharedState) {
    let period = state.config().cleanup_interval();
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let report = sweep(&state, SystemTime::now()).await;
        if report == SweepReport::default() {
            debug!("cleanup sweep found nothing to do");
        } else {
            info!(
                sessions_ended = report.sessions_ended,
                students_removed = report.students_removed,
                orphaned_poll_closed = report.orphaned_poll_closed,
                "cleanup sweep finished"
            );
        }
    }
}

/// End idle sessions, drop silent students and close an orphaned poll.
pub async fn sweep(state: &SharedState, now: SystemTime) -> SweepReport {
    let students_removed =
        match roster_service::remove_inactive(state, state.config().student_inactivity(), now)
            .await
        {
            Ok(removed) => removed.len(),
            Err(err) => {
                warn!(error = %err, "failed to remove inactive students");
                0
            }
        };

    SweepReport {
        sessions_ended: end_idle_sessions(state, now).await,
        students_removed,
        orphaned_poll_closed: close_orphaned_poll(state, now).await,
    }
}

/// Stop timers, finalise the running poll and release every store.
pub async fn shutdown(state: &SharedState) {
    let stopped = state.countdown().stop_all();
    info!(stopped, "stopped countdown timers");

    match state.cache().active_poll().await {
        Ok(Some(poll)) => {
            if let Err(err) =
                poll_service::close_poll(state, poll.id, Requester::System, CloseReason::Shutdown)
                    .await
            {
                warn!(poll_id = %poll.id, error = %err, "failed to close poll on shutdown");
            }
        }
        Ok(None) => {}
        Err(err) => warn!(error = %err, "failed to read active poll on shutdown"),
    }

    if let Some(store) = state.record_store().await {
        match store.list_active_sessions().await {
            Ok(sessions) => {
                let now = SystemTime::now();
                for session in sessions {
                    if let Err(err) = store.end_session(session.session_id.clone(), now).await {
                        warn!(session_id = %session.session_id, error = %err, "failed to end session");
                    }
                }
            }
            Err(err) => warn!(error = %err, "failed to list active sessions on shutdown"),
        }
    }

    if let Err(err) = state.cache().clear().await {
        warn!(error = %err, "failed to clear session cache");
    }
    state.clear_record_store().await;
    info!("live session state released");
}

async fn end_idle_sessions(state: &SharedState, now: SystemTime) -> usize {
    let Some(store) = state.record_store().await else {
        return 0;
    };
    let sessions = match store.list_active_sessions().await {
        Ok(sessions) => sessions,
        Err(err) => {
            warn!(error = %err, "failed to list active sessions");
            return 0;
        }
    };

    let idle = state.config().session_inactivity();
    let mut ended = 0;
    for session in sessions {
        let silent_for = now
            .duration_since(session.last_activity_at)
            .unwrap_or(Duration::ZERO);
        if silent_for < idle {
            continue;
        }
        match store.end_session(session.session_id.clone(), now).await {
            Ok(true) => {
                info!(session_id = %session.session_id, "ended inactive session");
                ended += 1;
            }
            Ok(false) => {}
            Err(err) => {
                warn!(session_id = %session.session_id, error = %err, "failed to end session");
            }
        }
    }
    ended
}

async fn close_orphaned_poll(state: &SharedState, now: SystemTime) -> bool {
    let poll = match state.cache().active_poll().await {
        Ok(Some(poll)) => poll,
        Ok(None) => return false,
        Err(err) => {
            warn!(error = %err, "failed to read active poll");
            return false;
        }
    };

    let limit =
        Duration::from_secs(u64::from(poll.duration_secs)) + state.config().orphan_poll_grace();
    if poll.age(now) <= limit || state.countdown().is_running(poll.id) {
        return false;
    }

    warn!(poll_id = %poll.id, age = ?poll.age(now), "closing orphaned poll");
    match poll_service::close_poll(state, poll.id, Requester::System, CloseReason::Orphaned).await {
        Ok(ended) => ended.is_some(),
        Err(err) => {
            warn!(poll_id = %poll.id, error = %err, "failed to close orphaned poll");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::PollStatus,
            record_store::{MemoryRecordStore, RecordStore},
        },
        services::teacher_service,
        state::{AppState, poll::PollSpec},
    };

    async fn with_store() -> (SharedState, MemoryRecordStore) {
        let state = AppState::new(AppConfig::default());
        let store = MemoryRecordStore::new();
        state.set_record_store(Arc::new(store.clone())).await;
        (state, store)
    }

    #[tokio::test]
    async fn orphaned_poll_is_closed_only_without_a_timer() {
        let (state, store) = with_store().await;
        let teacher = Uuid::new_v4();
        teacher_service::join(&state, teacher).await.unwrap();
        let spec = PollSpec::new("Q?", &["A".into(), "B".into()], Some(10)).unwrap();
        let poll_id = poll_service::create_poll(&state, spec, teacher)
            .await
            .unwrap()
            .poll
            .id;

        let later = SystemTime::now() + Duration::from_secs(120);
        assert!(!sweep(&state, later).await.orphaned_poll_closed);

        state.countdown().stop(poll_id);
        assert!(!sweep(&state, SystemTime::now()).await.orphaned_poll_closed);
        assert!(sweep(&state, later).await.orphaned_poll_closed);

        let record = store.find_poll(poll_id).await.unwrap().unwrap();
        assert_eq!(record.status, PollStatus::Ended);
        assert_eq!(record.end_reason.as_deref(), Some(CloseReason::Orphaned.label()));
    }

    #[tokio::test]
    async fn idle_sessions_are_ended() {
        let (state, store) = with_store().await;
        let joined = teacher_service::join(&state, Uuid::new_v4()).await.unwrap();

        assert_eq!(sweep(&state, SystemTime::now()).await.sessions_ended, 0);
        let later = SystemTime::now() + Duration::from_secs(3 * 3600);
        assert_eq!(sweep(&state, later).await.sessions_ended, 1);

        let session = store.find_session(joined.session_id).await.unwrap().unwrap();
        assert!(!session.is_active);
    }

    #[tokio::test]
    async fn shutdown_releases_everything() {
        let (state, store) = with_store().await;
        let teacher = Uuid::new_v4();
        let joined = teacher_service::join(&state, teacher).await.unwrap();
        let spec = PollSpec::new("Q?", &["A".into(), "B".into()], Some(60)).unwrap();
        let poll_id = poll_service::create_poll(&state, spec, teacher)
            .await
            .unwrap()
            .poll
            .id;

        shutdown(&state).await;

        assert_eq!(state.countdown().active_count(), 0);
        assert!(state.is_degraded().await);
        assert!(state.cache().active_poll().await.unwrap().is_none());
        assert!(state.cache().teacher().await.unwrap().is_none());
        let record = store.find_poll(poll_id).await.unwrap().unwrap();
        assert_eq!(record.status, PollStatus::Ended);
        let session = store.find_session(joined.session_id).await.unwrap().unwrap();
        assert!(!session.is_active);
    }
}
