use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report whether a room store is installed and answering.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.room_store().await {
        Some(store) => match store.health_check().await {
            Ok(()) => HealthResponse::ok(),
            Err(err) => {
                warn!(error = %err, "room store health check failed");
                HealthResponse::degraded()
            }
        },
        None => {
            warn!("room store unavailable (degraded mode)");
            HealthResponse::degraded()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{config::AppConfig, dao::room_store::memory::MemoryRoomStore, state::AppState};

    #[tokio::test]
    async fn reports_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert_eq!(health_status(&state).await.status, "degraded");

        state
            .install_room_store(Arc::new(MemoryRoomStore::new()))
            .await;
        assert_eq!(health_status(&state).await.status, "ok");
    }
}
