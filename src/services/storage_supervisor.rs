use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{room_store::RoomStore, storage::StorageError},
    services::round_service,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the room store and keep the shared state in degraded mode while it is unavailable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RoomStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_room_store(store.clone()).await;
                info!("room store connected; leaving degraded mode");
                resume_games(&state).await;
                delay = INITIAL_DELAY;

                loop {
                    if let Err(err) = store.health_check().await {
                        warn!(error = %err, "room store health check failed");
                        if reconnect(&state, store.as_ref()).await {
                            state.install_room_store(store.clone()).await;
                            resume_games(&state).await;
                        } else {
                            warn!("exhausted room store reconnect attempts; staying in degraded mode");
                            break;
                        }
                    }
                    sleep(HEALTH_POLL_INTERVAL).await;
                }

                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "room store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Re-arm round clocks and pending advancements for games found in the store.
async fn resume_games(state: &SharedState) {
    if let Err(err) = round_service::resume_active_rooms(state).await {
        warn!(error = %err, "failed to resume games in progress");
    }
}

async fn reconnect(state: &SharedState, store: &dyn RoomStore) -> bool {
    let mut reconnect_delay = INITIAL_DELAY;

    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match store.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "room store reconnected after failed health check");
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "room store reconnect failed; entering degraded mode");
                    state.clear_room_store().await;
                } else {
                    warn!(attempt, error = %err, "room store reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{config::AppConfig, dao::room_store::memory::MemoryRoomStore, state::AppState};

    #[tokio::test(start_paused = true)]
    async fn retries_until_the_store_connects() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded().await);

        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let supervisor = tokio::spawn(run(state.clone(), move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StorageError::unavailable(
                        "connection refused".into(),
                        std::io::Error::other("down"),
                    ))
                } else {
                    Ok(Arc::new(MemoryRoomStore::new()) as Arc<dyn RoomStore>)
                }
            }
        }));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!state.is_degraded().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(state.repository().await.is_ok());

        supervisor.abort();
    }
}
