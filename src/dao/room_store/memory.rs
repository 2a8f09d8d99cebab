//! Process-local store used for development, tests, and single-node deployments.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::watch;

use crate::dao::storage::StorageResult;

use super::{RecordKey, RecordKind, RoomStore, Subscription, merge_partial, polling};

/// How subscribers learn about changes.
#[derive(Debug, Clone, Copy)]
enum Notify {
    /// Every write is pushed to watchers immediately.
    Push,
    /// Watchers re-read the record on a fixed interval.
    Poll(Duration),
}

/// In-memory [`RoomStore`] backed by concurrent maps.
#[derive(Clone)]
pub struct MemoryRoomStore {
    inner: Arc<MemoryInner>,
}

struct MemoryInner {
    records: DashMap<String, Value>,
    watchers: DashMap<String, watch::Sender<Option<Value>>>,
    notify: Notify,
}

impl Default for MemoryRoomStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRoomStore {
    /// Store that pushes every change to subscribers.
    pub fn new() -> Self {
        Self::with_notify(Notify::Push)
    }

    /// Store whose subscribers poll for changes every `every`.
    pub fn polling(every: Duration) -> Self {
        Self::with_notify(Notify::Poll(every))
    }

    fn with_notify(notify: Notify) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                records: DashMap::new(),
                watchers: DashMap::new(),
                notify,
            }),
        }
    }

    fn publish(&self, key: &str, value: Option<Value>) {
        if let Some(sender) = self.inner.watchers.get(key) {
            sender.send_replace(value);
        }
        self.inner
            .watchers
            .remove_if(key, |_, sender| sender.receiver_count() == 0);
    }
}

impl RoomStore for MemoryRoomStore {
    fn get(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<Option<Value>>> {
        let value = self
            .inner
            .records
            .get(&key.to_string())
            .map(|entry| entry.value().clone());
        Box::pin(async move { Ok(value) })
    }

    fn set(&self, key: &RecordKey, value: Value) -> BoxFuture<'static, StorageResult<()>> {
        let key = key.to_string();
        self.inner.records.insert(key.clone(), value.clone());
        if matches!(self.inner.notify, Notify::Push) {
            self.publish(&key, Some(value));
        }
        Box::pin(async { Ok(()) })
    }

    fn update(&self, key: &RecordKey, partial: Value) -> BoxFuture<'static, StorageResult<bool>> {
        let key = key.to_string();
        let merged = self.inner.records.get_mut(&key).map(|mut entry| {
            merge_partial(entry.value_mut(), partial);
            entry.value().clone()
        });

        let found = merged.is_some();
        if let (Some(value), Notify::Push) = (merged, self.inner.notify) {
            self.publish(&key, Some(value));
        }
        Box::pin(async move { Ok(found) })
    }

    fn delete(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<()>> {
        let key = key.to_string();
        self.inner.records.remove(&key);
        if matches!(self.inner.notify, Notify::Push) {
            self.publish(&key, None);
        }
        Box::pin(async { Ok(()) })
    }

    fn list(&self, kind: RecordKind) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let prefix = kind.prefix();
        let values = self
            .inner
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.value().clone())
            .collect();
        Box::pin(async move { Ok(values) })
    }

    fn subscribe(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<Subscription>> {
        match self.inner.notify {
            Notify::Push => {
                let name = key.to_string();
                // Holding the entry lock keeps writers from publishing between the read and the subscribe.
                let receiver = {
                    let entry = self
                        .inner
                        .watchers
                        .entry(name.clone())
                        .or_insert_with(|| watch::channel(None).0);
                    let current = self.inner.records.get(&name).map(|e| e.value().clone());
                    entry.send_if_modified(|latest| {
                        if *latest == current {
                            false
                        } else {
                            *latest = current;
                            true
                        }
                    });
                    entry.subscribe()
                };
                Box::pin(async move { Ok(Subscription::new(receiver)) })
            }
            Notify::Poll(every) => {
                Box::pin(polling::poll_subscription(self.clone(), key.clone(), every))
            }
        }
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}
