//! Fixtures shared by the coordinator tests.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde_json::json;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dao::{
        models::{Difficulty, GameType, RoomSettings},
        room_store::memory::MemoryRoomStore,
    },
    dto::room::{CreateRoomRequest, SettingsInput},
    services::{
        questions::AnswerKey,
        room_service::{create_room, join_room, set_ready, start_game},
    },
    state::{AppState, SharedState},
};

/// Three rounds of 30 seconds, a 3 second grace window and `"right"` as every answer.
pub(crate) fn test_config() -> AppConfig {
    AppConfig {
        round_grace: Duration::from_secs(3),
        default_settings: RoomSettings {
            time_limit_seconds: 30,
            total_rounds: 3,
            difficulty: Difficulty::Medium,
            max_players: 4,
        },
        questions: BTreeMap::from([(
            GameType::HistoricalTrivia,
            vec![AnswerKey::new(json!("right"), 100)],
        )]),
        ..AppConfig::default()
    }
}

pub(crate) fn test_state() -> SharedState {
    state_on(Arc::new(MemoryRoomStore::new()))
}

/// Fresh coordinator over an existing store, as after a process restart.
pub(crate) fn state_on(store: Arc<MemoryRoomStore>) -> SharedState {
    AppState::with_store(test_config(), store)
}

pub(crate) fn create_request(host_name: &str, max_players: Option<u32>) -> CreateRoomRequest {
    CreateRoomRequest {
        host_name: host_name.to_string(),
        game_type: GameType::HistoricalTrivia,
        settings: max_players.map(|max_players| SettingsInput {
            max_players: Some(max_players),
            ..SettingsInput::default()
        }),
    }
}

/// Waiting room with a host and one not-yet-ready guest: `(room, host, guest)`.
pub(crate) async fn lobby_with_guest(state: &SharedState) -> (Uuid, Uuid, Uuid) {
    let created = create_room(state, create_request("Ada", None)).await.unwrap();
    let guest = join_room(state, created.room_id, "Grace").await.unwrap();
    (created.room_id, created.host_player_id, guest.id)
}

/// Two-player game with round one open: `(room, host, guest)`.
pub(crate) async fn started_game(state: &SharedState) -> (Uuid, Uuid, Uuid) {
    let (room_id, host, guest) = lobby_with_guest(state).await;
    set_ready(state, room_id, guest, true).await.unwrap();
    start_game(state, room_id, host).await.unwrap();
    (room_id, host, guest)
}

/// Let spawned timer tasks run to completion.
pub(crate) async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
