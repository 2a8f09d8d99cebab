#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;
pub mod polling;

use std::fmt;

use futures::{Stream, future::BoxFuture};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use crate::dao::storage::StorageResult;

/// Families of records persisted by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Room,
    GameState,
    RoomCode,
    GameResult,
    PlayerStats,
}

impl RecordKind {
    /// Name of the kind as written in keys and backend documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Room => "room",
            RecordKind::GameState => "gameState",
            RecordKind::RoomCode => "roomCode",
            RecordKind::GameResult => "gameResult",
            RecordKind::PlayerStats => "playerStats",
        }
    }

    /// Key prefix shared by every record of this kind, separator included.
    pub fn prefix(&self) -> String {
        format!("{}:", self.as_str())
    }
}

/// Address of a single record, rendered as `kind:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Room(Uuid),
    GameState(Uuid),
    RoomCode(String),
    GameResult(Uuid),
    PlayerStats(Uuid),
}

impl RecordKey {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordKey::Room(_) => RecordKind::Room,
            RecordKey::GameState(_) => RecordKind::GameState,
            RecordKey::RoomCode(_) => RecordKind::RoomCode,
            RecordKey::GameResult(_) => RecordKind::GameResult,
            RecordKey::PlayerStats(_) => RecordKind::PlayerStats,
        }
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = self.kind().as_str();
        match self {
            RecordKey::Room(id)
            | RecordKey::GameState(id)
            | RecordKey::GameResult(id)
            | RecordKey::PlayerStats(id) => write!(f, "{kind}:{id}"),
            RecordKey::RoomCode(code) => write!(f, "{kind}:{code}"),
        }
    }
}

/// Key-value persistence for coordinator records with change subscriptions.
///
/// Implementations hand out `'static` futures so callers can move them into
/// spawned tasks without borrowing the store.
pub trait RoomStore: Send + Sync {
    fn get(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<Option<Value>>>;
    fn set(&self, key: &RecordKey, value: Value) -> BoxFuture<'static, StorageResult<()>>;
    /// Shallow-merge `partial` into an existing record. Resolves to `false` when
    /// the record does not exist.
    fn update(&self, key: &RecordKey, partial: Value) -> BoxFuture<'static, StorageResult<bool>>;
    fn delete(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<()>>;
    fn list(&self, kind: RecordKind) -> BoxFuture<'static, StorageResult<Vec<Value>>>;
    /// Watch a record. The returned subscription starts with the current value.
    fn subscribe(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<Subscription>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;

    /// Hand out an id for a new room.
    fn allocate_id(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Live view over one record. Dropping it unsubscribes.
pub struct Subscription {
    receiver: watch::Receiver<Option<Value>>,
}

impl Subscription {
    pub fn new(receiver: watch::Receiver<Option<Value>>) -> Self {
        Self { receiver }
    }

    /// Latest known value, `None` when the record does not exist.
    pub fn current(&self) -> Option<Value> {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change. Resolves to `None` once the backend stops
    /// publishing for this key.
    pub async fn changed(&mut self) -> Option<Option<Value>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Stream the current value followed by every subsequent change.
    pub fn into_stream(mut self) -> impl Stream<Item = Option<Value>> + Send + 'static {
        async_stream::stream! {
            let initial = self.receiver.borrow_and_update().clone();
            yield initial;
            while let Some(next) = self.changed().await {
                yield next;
            }
        }
    }
}

/// Merge the top-level fields of `partial` into `target`. Non-object values replace the target.
pub fn merge_partial(target: &mut Value, partial: Value) {
    match (target, partial) {
        (Value::Object(existing), Value::Object(fields)) => {
            for (field, value) in fields {
                existing.insert(field, value);
            }
        }
        (target, partial) => *target = partial,
    }
}
