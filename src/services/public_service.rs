//! Read-only projections served over REST: poll history, live results and session aggregates.

use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::{PollEntity, PollStatus},
    dto::{
        poll::{CurrentPollView, LiveResults, PollHistoryQuery, PollHistoryResponse, PollSummary},
        session::SessionStatsResponse,
    },
    error::ServiceError,
    services::{poll_service, teacher_service},
    state::SharedState,
};

const DEFAULT_POLL_LIST_LIMIT: usize = 50;
const DEFAULT_HISTORY_LIMIT: usize = 10;
const SESSION_POLL_SCAN_LIMIT: usize = 1_000;

/// Newest polls across all sessions. Degrades to an empty list.
pub async fn list_polls(state: &SharedState, limit: Option<usize>) -> PollHistoryResponse {
    let limit = limit.unwrap_or(DEFAULT_POLL_LIST_LIMIT);
    let Some(store) = state.record_store().await else {
        warn!("no record store; returning no polls");
        return PollHistoryResponse::from(Vec::new());
    };
    match store.list_polls(limit).await {
        Ok(polls) => PollHistoryResponse::from(polls),
        Err(err) => {
            warn!(error = %err, "failed to list polls");
            PollHistoryResponse::from(Vec::new())
        }
    }
}

/// Polls of one session, defaulting to the current one. Degrades to an empty list.
pub async fn poll_history(state: &SharedState, query: PollHistoryQuery) -> PollHistoryResponse {
    let session_id = match query.session_id {
        Some(session_id) => Some(session_id),
        None => teacher_service::current_session_id(state).await,
    };
    let Some(session_id) = session_id else {
        return PollHistoryResponse::from(Vec::new());
    };
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    PollHistoryResponse::from(session_polls(state, &session_id, limit).await)
}

/// The active poll with its live tally, or [`ServiceError::NoActivePoll`].
pub async fn current_poll(state: &SharedState) -> Result<CurrentPollView, ServiceError> {
    poll_service::current_poll_view(state)
        .await?
        .ok_or(ServiceError::NoActivePoll)
}

/// Durable record of one poll.
pub async fn find_poll(state: &SharedState, poll_id: Uuid) -> Result<PollSummary, ServiceError> {
    let record = load_poll(state, poll_id).await?;
    Ok(PollSummary::from(record))
}

/// Live tally while the poll runs, frozen counts once it ended.
pub async fn poll_results(state: &SharedState, poll_id: Uuid) -> Result<LiveResults, ServiceError> {
    if let Some(current) = poll_service::current_poll_view(state).await? {
        if current.poll.id == poll_id {
            return Ok(current.results);
        }
    }
    let record = load_poll(state, poll_id).await?;
    Ok(LiveResults::from(&record))
}

/// Aggregates over one durable session and its polls.
pub async fn session_stats(
    state: &SharedState,
    session_id: String,
) -> Result<SessionStatsResponse, ServiceError> {
    let store = state.require_record_store().await?;
    let session = store
        .find_session(session_id.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}`")))?;
    let polls = session_polls(state, &session_id, SESSION_POLL_SCAN_LIMIT).await;

    let total_votes = polls.iter().map(|poll| poll.total_votes).sum();
    Ok(SessionStatsResponse::new(
        session,
        polls.len(),
        total_votes,
        average_response_rate(&polls),
    ))
}

async fn load_poll(state: &SharedState, poll_id: Uuid) -> Result<PollEntity, ServiceError> {
    let store = state.require_record_store().await?;
    store
        .find_poll(poll_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("poll `{poll_id}`")))
}

async fn session_polls(state: &SharedState, session_id: &str, limit: usize) -> Vec<PollEntity> {
    let Some(store) = state.record_store().await else {
        warn!(session_id = %session_id, "no record store; returning no session polls");
        return Vec::new();
    };
    match store.list_session_polls(session_id.to_string(), limit).await {
        Ok(polls) => polls,
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "failed to load session polls");
            Vec::new()
        }
    }
}

/// Mean response rate of the ended polls, rounded.
fn average_response_rate(polls: &[PollEntity]) -> u32 {
    let rates: Vec<u32> = polls
        .iter()
        .filter(|poll| poll.status == PollStatus::Ended)
        .map(PollEntity::response_rate)
        .collect();
    if rates.is_empty() {
        return 0;
    }
    let sum: u32 = rates.iter().sum();
    (sum as f64 / rates.len() as f64).round() as u32
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::record_store::MemoryRecordStore,
        dto::ws::VoteRequest,
        services::roster_service,
        state::{AppState, poll::PollSpec},
    };

    async fn with_store() -> (SharedState, MemoryRecordStore) {
        let state = AppState::new(AppConfig::default());
        let store = MemoryRecordStore::new();
        state.set_record_store(Arc::new(store.clone())).await;
        (state, store)
    }

    #[tokio::test]
    async fn results_follow_the_poll_from_live_to_frozen() {
        let (state, _store) = with_store().await;
        let teacher = Uuid::new_v4();
        let joined = teacher_service::join(&state, teacher).await.unwrap();
        let alice = Uuid::new_v4();
        roster_service::join(&state, alice, "Alice").await.unwrap();
        let spec = PollSpec::new("Q?", &["A".into(), "B".into()], Some(30)).unwrap();
        let created = poll_service::create_poll(&state, spec, teacher).await.unwrap();
        let poll_id = created.poll.id;

        poll_service::submit_vote(
            &state,
            VoteRequest {
                poll_id,
                option: "B".into(),
                student_name: "Alice".into(),
            },
            alice,
        )
        .await
        .unwrap();

        let live = poll_results(&state, poll_id).await.unwrap();
        assert_eq!(live.results["B"], 1);
        assert_eq!(live.response_rate, 100);
        assert_eq!(current_poll(&state).await.unwrap().poll.id, poll_id);

        poll_service::end_poll(&state, Some(poll_id), teacher).await.unwrap();
        assert!(matches!(
            current_poll(&state).await,
            Err(ServiceError::NoActivePoll)
        ));
        let frozen = poll_results(&state, poll_id).await.unwrap();
        assert_eq!(frozen.results["B"], 1);
        assert_eq!(frozen.total_votes, 1);

        let summary = find_poll(&state, poll_id).await.unwrap();
        assert_eq!(summary.status, PollStatus::Ended);

        let stats = session_stats(&state, joined.session_id.clone()).await.unwrap();
        assert_eq!(stats.poll_count, 1);
        assert_eq!(stats.total_votes, 1);
        assert_eq!(stats.average_response_rate, 100);

        let history = poll_history(&state, PollHistoryQuery::default()).await;
        assert_eq!(history.total, 1);
        assert_eq!(list_polls(&state, None).await.total, 1);
    }

    #[tokio::test]
    async fn unknown_records_are_not_found() {
        let (state, _store) = with_store().await;
        assert!(matches!(
            find_poll(&state, Uuid::new_v4()).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            session_stats(&state, "session_0_missing".into()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn listings_degrade_when_the_store_is_down() {
        let (state, store) = with_store().await;
        store.set_offline(true);
        assert_eq!(list_polls(&state, Some(5)).await.total, 0);
        let history = poll_history(
            &state,
            PollHistoryQuery {
                session_id: Some("any".into()),
                limit: None,
            },
        )
        .await;
        assert!(history.polls.is_empty());
        assert_eq!(
            find_poll(&state, Uuid::new_v4()).await.unwrap_err().code(),
            "STORE_UNAVAILABLE"
        );
    }
}
