use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::dao::{
    models::{GameResult, GameState, PlayerStats, Room},
    room_store::{RecordKey, RecordKind, RoomStore, Subscription},
    storage::{StorageError, StorageResult},
};

/// Typed access to the records kept in a [`RoomStore`].
#[derive(Clone)]
pub struct RoomRepository {
    store: Arc<dyn RoomStore>,
}

impl RoomRepository {
    pub fn new(store: Arc<dyn RoomStore>) -> Self {
        Self { store }
    }

    pub fn allocate_id(&self) -> Uuid {
        self.store.allocate_id()
    }

    async fn load<T>(&self, key: &RecordKey) -> StorageResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        match self.store.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StorageError::corrupted(key, source)),
            None => Ok(None),
        }
    }

    async fn save<T>(&self, key: &RecordKey, record: &T) -> StorageResult<()>
    where
        T: Serialize,
    {
        let value = serde_json::to_value(record).map_err(|source| StorageError::corrupted(key, source))?;
        self.store.set(key, value).await
    }

    async fn list<T>(&self, kind: RecordKind) -> StorageResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let values = self.store.list(kind).await?;
        Ok(values
            .into_iter()
            .filter_map(|value| match serde_json::from_value(value) {
                Ok(record) => Some(record),
                Err(err) => {
                    warn!(kind = kind.as_str(), error = %err, "skipping unreadable record");
                    None
                }
            })
            .collect())
    }

    pub async fn room(&self, id: Uuid) -> StorageResult<Option<Room>> {
        self.load(&RecordKey::Room(id)).await
    }

    pub async fn save_room(&self, room: &Room) -> StorageResult<()> {
        self.save(&RecordKey::Room(room.id), room).await
    }

    /// Shallow-merge fields into a stored room. Resolves to `false` when the room is gone.
    pub async fn patch_room(&self, id: Uuid, partial: Value) -> StorageResult<bool> {
        self.store.update(&RecordKey::Room(id), partial).await
    }

    pub async fn rooms(&self) -> StorageResult<Vec<Room>> {
        self.list(RecordKind::Room).await
    }

    pub async fn game_state(&self, room_id: Uuid) -> StorageResult<Option<GameState>> {
        self.load(&RecordKey::GameState(room_id)).await
    }

    pub async fn save_game_state(&self, state: &GameState) -> StorageResult<()> {
        self.save(&RecordKey::GameState(state.room_id), state).await
    }

    /// Resolve a join code to its room id.
    pub async fn room_for_code(&self, code: &str) -> StorageResult<Option<Uuid>> {
        self.load(&RecordKey::RoomCode(code.to_string())).await
    }

    pub async fn save_code(&self, code: &str, room_id: Uuid) -> StorageResult<()> {
        self.save(&RecordKey::RoomCode(code.to_string()), &room_id)
            .await
    }

    /// Remove every live record of a room: the room itself, its game state and its code mapping.
    pub async fn delete_room(&self, room: &Room) -> StorageResult<()> {
        self.store.delete(&RecordKey::GameState(room.id)).await?;
        self.store
            .delete(&RecordKey::RoomCode(room.short_code.clone()))
            .await?;
        self.store.delete(&RecordKey::Room(room.id)).await
    }

    pub async fn game_result(&self, room_id: Uuid) -> StorageResult<Option<GameResult>> {
        self.load(&RecordKey::GameResult(room_id)).await
    }

    pub async fn save_game_result(&self, result: &GameResult) -> StorageResult<()> {
        self.save(&RecordKey::GameResult(result.room_id), result)
            .await
    }

    pub async fn game_results(&self) -> StorageResult<Vec<GameResult>> {
        self.list(RecordKind::GameResult).await
    }

    pub async fn player_stats(&self, player_id: Uuid) -> StorageResult<Option<PlayerStats>> {
        self.load(&RecordKey::PlayerStats(player_id)).await
    }

    pub async fn save_player_stats(&self, stats: &PlayerStats) -> StorageResult<()> {
        self.save(&RecordKey::PlayerStats(stats.player_id), stats)
            .await
    }

    /// Watch the raw record behind `key`.
    pub async fn subscribe(&self, key: &RecordKey) -> StorageResult<Subscription> {
        self.store.subscribe(key).await
    }
}
