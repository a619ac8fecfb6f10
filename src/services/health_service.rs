use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report liveness with connection and timer counts while logging storage issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_record_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "record store health check failed");
            }
        }
        Err(_) => warn!("record store unavailable (degraded mode)"),
    }

    let connections = state.hub().connection_count();
    let active_timers = state.countdown().active_count();
    if state.is_degraded().await {
        HealthResponse::degraded(connections, active_timers)
    } else {
        HealthResponse::ok(connections, active_timers)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::{config::AppConfig, dao::record_store::MemoryRecordStore, state::AppState};

    #[tokio::test]
    async fn reports_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        let _rx = state.hub().register(Uuid::new_v4());

        let health = health_status(&state).await;
        assert_eq!(health.status, "degraded");
        assert_eq!(health.connections, 1);
        assert_eq!(health.active_timers, 0);

        state
            .set_record_store(Arc::new(MemoryRecordStore::new()))
            .await;
        assert_eq!(health_status(&state).await.status, "ok");
    }
}
