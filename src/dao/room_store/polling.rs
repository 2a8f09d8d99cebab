//! Subscription fallback for backends without a change feed.

use std::time::Duration;

use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, warn};

use crate::dao::storage::StorageResult;

use super::{RecordKey, RoomStore, Subscription};

/// Build a subscription that re-reads `key` every `every` and publishes when the value differs.
///
/// The poller stops once the last receiver is dropped.
pub async fn poll_subscription<S>(
    store: S,
    key: RecordKey,
    every: Duration,
) -> StorageResult<Subscription>
where
    S: RoomStore + Clone + 'static,
{
    let initial = store.get(&key).await?;
    let (tx, rx) = watch::channel(initial);

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                _ = ticker.tick() => {
                    match store.get(&key).await {
                        Ok(latest) => {
                            tx.send_if_modified(|current| {
                                if *current == latest {
                                    false
                                } else {
                                    *current = latest;
                                    true
                                }
                            });
                        }
                        Err(err) => warn!(key = %key, error = %err, "poll read failed"),
                    }
                }
            }
        }

        debug!(key = %key, "poller stopped");
    });

    Ok(Subscription::new(rx))
}
