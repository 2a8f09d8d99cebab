//! Room creation, membership and the waiting-room readiness gate.

use std::time::SystemTime;

use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameState, GameType, Player, Room, RoomStatus},
        rooms::RoomRepository,
    },
    dto::room::{CreateRoomRequest, CreateRoomResponse},
    error::ServiceError,
    services::{code_registry, notifier, round_service, scoring},
    state::{RoundEvent, SharedState},
};

/// Minimum roster size for a game to start.
pub const MIN_PLAYERS: usize = 2;

fn room_not_found(room_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("room {room_id}"))
}

fn player_not_found(player_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("player {player_id}"))
}

/// Open a new room with the caller as its ready host.
pub async fn create_room(
    state: &SharedState,
    request: CreateRoomRequest,
) -> Result<CreateRoomResponse, ServiceError> {
    let repo = state.repository().await?;
    let defaults = &state.config().default_settings;
    let settings = request
        .settings
        .as_ref()
        .map(|input| input.resolve(defaults))
        .unwrap_or_else(|| defaults.clone());

    let room_id = repo.allocate_id();
    let short_code = code_registry::reserve_code(state, &repo, room_id).await?;

    let now = SystemTime::now();
    let host = Player::new(request.host_name.trim().to_string(), true, now);
    let host_player_id = host.id;
    let room = Room {
        id: room_id,
        short_code: short_code.clone(),
        game_type: request.game_type,
        host_id: host_player_id,
        players: vec![host],
        max_players: settings.max_players,
        status: RoomStatus::Waiting,
        settings,
        current_round: 0,
        created_at: now,
        started_at: None,
        finished_at: None,
    };

    if let Err(err) = persist_new_room(&repo, &room).await {
        // Release the reserved code so it cannot resolve to a missing room.
        if let Err(cleanup) = repo.delete_room(&room).await {
            warn!(room_id = %room_id, code = %short_code, error = %cleanup, "failed to roll back room creation");
        }
        return Err(err);
    }

    info!(
        room_id = %room_id,
        code = %short_code,
        game_type = room.game_type.as_str(),
        "room created"
    );
    notifier::room_created(state, &room);

    Ok(CreateRoomResponse {
        room_id,
        host_player_id,
        short_code,
    })
}

async fn persist_new_room(repo: &RoomRepository, room: &Room) -> Result<(), ServiceError> {
    repo.save_room(room).await?;
    repo.save_game_state(&GameState::waiting(room)).await?;
    Ok(())
}

/// Add a player to a waiting room. Display names are unique within a room.
pub async fn join_room(
    state: &SharedState,
    room_id: Uuid,
    player_name: &str,
) -> Result<Player, ServiceError> {
    let repo = state.repository().await?;
    let runtime = state.rooms().runtime(room_id);
    let _gate = runtime.lock().await;

    let mut room = round_service::load_room(&repo, &runtime, room_id).await?;
    if room.status != RoomStatus::Waiting {
        debug!(room_id = %room_id, status = ?room.status, "join rejected: room not waiting");
        return Err(ServiceError::NotWaiting(room_id));
    }
    if room.is_full() {
        debug!(room_id = %room_id, "join rejected: room full");
        return Err(ServiceError::RoomFull(room_id));
    }

    let player_name = player_name.trim();
    if room.players.iter().any(|player| player.display_name == player_name) {
        debug!(room_id = %room_id, name = player_name, "join rejected: name taken");
        return Err(ServiceError::DuplicateName(player_name.to_string()));
    }

    let player = Player::new(player_name.to_string(), false, SystemTime::now());
    room.players.push(player.clone());
    repo.save_room(&room).await?;

    info!(room_id = %room_id, player_id = %player.id, players = room.players.len(), "player joined");
    notifier::room_updated(state, &room);
    Ok(player)
}

/// Join through a short code, case-insensitively.
pub async fn join_room_by_code(
    state: &SharedState,
    code: &str,
    player_name: &str,
) -> Result<(Uuid, Player), ServiceError> {
    let repo = state.repository().await?;
    let room_id = code_registry::resolve_code(&repo, code).await?;
    let player = join_room(state, room_id, player_name).await?;
    Ok((room_id, player))
}

/// Remove a player, promoting a new host or deleting the room once empty.
///
/// Mid-game departures drop the player's pending answer and re-run the
/// completion check against the smaller roster.
pub async fn leave_room(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let repo = state.repository().await?;
    let runtime = state.rooms().runtime(room_id);
    let gate = runtime.lock().await;

    let mut room = round_service::load_room(&repo, &runtime, room_id).await?;
    let removed = room
        .remove_player(player_id)
        .ok_or_else(|| player_not_found(player_id))?;

    if room.players.is_empty() {
        repo.delete_room(&room).await?;
        runtime.retire();
        info!(room_id = %room_id, "last player left; room deleted");
        notifier::room_closed(state, room_id);
        return Ok(());
    }

    repo.save_room(&room).await?;
    info!(
        room_id = %room_id,
        player_id = %player_id,
        was_host = removed.is_host,
        host_id = %room.host_id,
        "player left"
    );

    if room.status == RoomStatus::Playing {
        match repo.game_state(room_id).await? {
            Some(mut game) => {
                game.retain_roster(&room);
                repo.save_game_state(&game).await?;
                if room.all_finished() {
                    scoring::finalize_locked(state, &runtime, &gate, &repo, room.clone(), game)
                        .await?;
                } else {
                    round_service::close_if_complete(state, &runtime, &gate, &repo, &room, game)
                        .await?;
                }
            }
            None => warn!(room_id = %room_id, "playing room has no game state"),
        }
    }

    notifier::room_updated(state, &room);
    Ok(())
}

/// Toggle a player's readiness while the room is still waiting.
pub async fn set_ready(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
    ready: bool,
) -> Result<Room, ServiceError> {
    let repo = state.repository().await?;
    let runtime = state.rooms().runtime(room_id);
    let _gate = runtime.lock().await;

    let mut room = round_service::load_room(&repo, &runtime, room_id).await?;
    if room.status != RoomStatus::Waiting {
        return Err(ServiceError::NotWaiting(room_id));
    }
    let player = room
        .player_mut(player_id)
        .ok_or_else(|| player_not_found(player_id))?;
    if player.is_ready == ready {
        return Ok(room);
    }
    player.is_ready = ready;

    let players = serde_json::to_value(&room.players)
        .map_err(|err| ServiceError::InvalidState(format!("cannot encode roster: {err}")))?;
    if !repo.patch_room(room_id, json!({ "players": players })).await? {
        return Err(room_not_found(room_id));
    }

    debug!(room_id = %room_id, player_id = %player_id, ready, "readiness changed");
    notifier::room_updated(state, &room);
    Ok(room)
}

/// Start the game. Only the host may call this, with at least two players, all ready.
///
/// A rejected start leaves the room untouched.
pub async fn start_game(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
) -> Result<GameState, ServiceError> {
    let repo = state.repository().await?;
    let runtime = state.rooms().runtime(room_id);
    let gate = runtime.lock().await;

    let mut room = round_service::load_room(&repo, &runtime, room_id).await?;
    if room.status != RoomStatus::Waiting {
        return Err(ServiceError::NotWaiting(room_id));
    }
    if room.host_id != player_id {
        return Err(ServiceError::NotHost(player_id));
    }
    if room.players.len() < MIN_PLAYERS {
        return Err(ServiceError::InsufficientPlayers {
            required: MIN_PLAYERS,
            actual: room.players.len(),
        });
    }
    if !room.all_ready() {
        return Err(ServiceError::NotAllReady);
    }

    let now = SystemTime::now();
    room.status = RoomStatus::Playing;
    room.started_at = Some(now);
    room.current_round = 1;
    let game = GameState::started(&room, now);

    let (repo_ref, room_ref, game_ref) = (&repo, &room, &game);
    runtime
        .run_transition(&gate, RoundEvent::Start, move || async move {
            repo_ref.save_room(room_ref).await?;
            repo_ref.save_game_state(game_ref).await?;
            Ok::<_, ServiceError>(())
        })
        .await?;

    round_service::arm_round_clock(state, &runtime, 1, game.settings.time_limit_seconds);
    info!(room_id = %room_id, players = room.players.len(), rounds = game.total_rounds, "game started");
    notifier::room_updated(state, &room);
    Ok(game)
}

pub async fn get_room(state: &SharedState, room_id: Uuid) -> Result<Room, ServiceError> {
    let repo = state.repository().await?;
    repo.room(room_id).await?.ok_or_else(|| room_not_found(room_id))
}

/// Look a room up by its join code.
pub async fn get_room_by_code(state: &SharedState, code: &str) -> Result<Room, ServiceError> {
    let repo = state.repository().await?;
    let room_id = code_registry::resolve_code(&repo, code).await?;
    repo.room(room_id).await?.ok_or_else(|| room_not_found(room_id))
}

pub async fn get_game_state(state: &SharedState, room_id: Uuid) -> Result<GameState, ServiceError> {
    let repo = state.repository().await?;
    repo.game_state(room_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game state for room {room_id}")))
}

/// Rooms still accepting players, oldest first.
pub async fn list_open_rooms(
    state: &SharedState,
    game_type: Option<GameType>,
) -> Result<Vec<Room>, ServiceError> {
    let repo = state.repository().await?;
    let mut rooms: Vec<Room> = repo
        .rooms()
        .await?
        .into_iter()
        .filter(|room| room.status == RoomStatus::Waiting)
        .filter(|room| game_type.is_none_or(|wanted| room.game_type == wanted))
        .collect();
    rooms.sort_by_key(|room| room.created_at);
    Ok(rooms)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::future::BoxFuture;
    use serde_json::Value;

    use super::*;
    use crate::{
        dao::{
            models::RoundStatus,
            room_store::{RecordKey, RecordKind, RoomStore, Subscription, memory::MemoryRoomStore},
            storage::{StorageError, StorageResult},
        },
        services::test_support::{create_request, lobby_with_guest, test_config, test_state},
        state::{AppState, RoundPhase},
    };

    /// Memory store that refuses to write room records.
    struct RoomWritesFail(MemoryRoomStore);

    impl RoomStore for RoomWritesFail {
        fn get(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<Option<Value>>> {
            self.0.get(key)
        }

        fn set(&self, key: &RecordKey, value: Value) -> BoxFuture<'static, StorageResult<()>> {
            if matches!(key, RecordKey::Room(_)) {
                return Box::pin(async {
                    Err(StorageError::unavailable(
                        "room writes rejected".into(),
                        std::io::Error::other("read-only"),
                    ))
                });
            }
            self.0.set(key, value)
        }

        fn update(&self, key: &RecordKey, partial: Value) -> BoxFuture<'static, StorageResult<bool>> {
            self.0.update(key, partial)
        }

        fn delete(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<()>> {
            self.0.delete(key)
        }

        fn list(&self, kind: RecordKind) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
            self.0.list(kind)
        }

        fn subscribe(&self, key: &RecordKey) -> BoxFuture<'static, StorageResult<Subscription>> {
            self.0.subscribe(key)
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.0.health_check()
        }

        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.0.try_reconnect()
        }
    }

    #[tokio::test]
    async fn created_room_has_a_ready_host_and_code() {
        let state = test_state();
        let created = create_room(&state, create_request("Ada", None)).await.unwrap();

        let room = get_room(&state, created.room_id).await.unwrap();
        assert_eq!(room.players.len(), 1);
        assert!(room.players[0].is_host && room.players[0].is_ready);
        assert_eq!(room.host_id, created.host_player_id);
        assert_eq!(room.status, RoomStatus::Waiting);

        let by_code = get_room_by_code(&state, &created.short_code.to_lowercase())
            .await
            .unwrap();
        assert_eq!(by_code.id, created.room_id);

        let game = get_game_state(&state, created.room_id).await.unwrap();
        assert_eq!(game.round_status, RoundStatus::Idle);
    }

    #[tokio::test]
    async fn join_rejects_full_rooms() {
        let state = test_state();
        let created = create_room(&state, create_request("Ada", Some(2))).await.unwrap();

        join_room(&state, created.room_id, "Grace").await.unwrap();
        let err = join_room(&state, created.room_id, "Linus").await.unwrap_err();
        assert!(matches!(err, ServiceError::RoomFull(_)));
        assert_eq!(get_room(&state, created.room_id).await.unwrap().players.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_joins_are_not_lost() {
        let state = test_state();
        let created = create_room(&state, create_request("Ada", Some(8))).await.unwrap();

        let room_id = created.room_id;
        let joins: Vec<_> = (0..6)
            .map(|i| {
                let state = state.clone();
                tokio::spawn(async move { join_room(&state, room_id, &format!("p{i}")).await })
            })
            .collect();
        for join in joins {
            join.await.unwrap().unwrap();
        }

        assert_eq!(get_room(&state, room_id).await.unwrap().players.len(), 7);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let state = test_state();
        let (room_id, _, _) = lobby_with_guest(&state).await;

        let err = join_room(&state, room_id, "  Grace ").await.unwrap_err();
        assert!(matches!(err, ServiceError::DuplicateName(ref name) if name == "Grace"));
        assert!(matches!(
            join_room(&state, room_id, "Ada").await.unwrap_err(),
            ServiceError::DuplicateName(_)
        ));
        assert_eq!(get_room(&state, room_id).await.unwrap().players.len(), 2);

        join_room(&state, room_id, "Linus").await.unwrap();
    }

    #[tokio::test]
    async fn failed_room_write_releases_the_code() {
        let memory = MemoryRoomStore::new();
        let state = AppState::with_store(test_config(), Arc::new(RoomWritesFail(memory.clone())));

        let err = create_room(&state, create_request("Ada", None)).await.unwrap_err();
        assert!(matches!(err, ServiceError::Unavailable(_)));

        assert!(memory.list(RecordKind::RoomCode).await.unwrap().is_empty());
        assert!(memory.list(RecordKind::GameState).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_rooms_leave_no_runtime_behind() {
        let state = test_state();

        for _ in 0..50 {
            let room_id = Uuid::new_v4();
            let player_id = Uuid::new_v4();
            assert!(matches!(
                join_room(&state, room_id, "Ada").await.unwrap_err(),
                ServiceError::NotFound(_)
            ));
            assert!(set_ready(&state, room_id, player_id, true).await.is_err());
            assert!(start_game(&state, room_id, player_id).await.is_err());
            assert!(leave_room(&state, room_id, player_id).await.is_err());
        }

        assert!(state.rooms().is_empty());
    }

    #[tokio::test]
    async fn unknown_code_is_reported() {
        let state = test_state();
        let err = join_room_by_code(&state, "ZZZZZZ", "Ada").await.unwrap_err();
        assert!(matches!(err, ServiceError::UnknownCode(_)));
    }

    #[tokio::test]
    async fn start_is_gated_and_leaves_room_unchanged_on_failure() {
        let state = test_state();
        let created = create_room(&state, create_request("Ada", None)).await.unwrap();
        let room_id = created.room_id;
        let host = created.host_player_id;

        let err = start_game(&state, room_id, host).await.unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InsufficientPlayers { required: 2, actual: 1 }
        ));

        let guest = join_room(&state, room_id, "Grace").await.unwrap();
        assert!(matches!(
            start_game(&state, room_id, host).await.unwrap_err(),
            ServiceError::NotAllReady
        ));
        assert!(matches!(
            start_game(&state, room_id, guest.id).await.unwrap_err(),
            ServiceError::NotHost(_)
        ));
        assert_eq!(get_room(&state, room_id).await.unwrap().status, RoomStatus::Waiting);

        set_ready(&state, room_id, guest.id, true).await.unwrap();
        let game = start_game(&state, room_id, host).await.unwrap();
        assert_eq!(game.current_round, 1);
        assert!(game.answers.is_empty());

        let room = get_room(&state, room_id).await.unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
        assert_eq!(room.current_round, 1);
        assert_eq!(
            state.rooms().runtime(room_id).phase().await,
            RoundPhase::RoundOpen { round: 1 }
        );

        assert!(matches!(
            set_ready(&state, room_id, guest.id, false).await.unwrap_err(),
            ServiceError::NotWaiting(_)
        ));
        assert!(matches!(
            join_room(&state, room_id, "Late").await.unwrap_err(),
            ServiceError::NotWaiting(_)
        ));
    }

    #[tokio::test]
    async fn host_leaving_promotes_next_player() {
        let state = test_state();
        let (room_id, host, guest) = lobby_with_guest(&state).await;

        leave_room(&state, room_id, host).await.unwrap();

        let room = get_room(&state, room_id).await.unwrap();
        assert_eq!(room.host_id, guest);
        assert_eq!(room.players.iter().filter(|p| p.is_host).count(), 1);
    }

    #[tokio::test]
    async fn last_player_leaving_deletes_the_room() {
        let state = test_state();
        let created = create_room(&state, create_request("Ada", None)).await.unwrap();

        leave_room(&state, created.room_id, created.host_player_id)
            .await
            .unwrap();

        assert!(matches!(
            get_room(&state, created.room_id).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
        assert!(matches!(
            get_room_by_code(&state, &created.short_code).await.unwrap_err(),
            ServiceError::UnknownCode(_)
        ));
        assert!(state.rooms().is_empty());
    }

    #[tokio::test]
    async fn open_room_listing_filters_by_type_and_status() {
        let state = test_state();
        let trivia = create_room(&state, create_request("Ada", None)).await.unwrap();
        let mut other = create_request("Grace", None);
        other.game_type = GameType::MapConquest;
        create_room(&state, other).await.unwrap();

        assert_eq!(list_open_rooms(&state, None).await.unwrap().len(), 2);
        let filtered = list_open_rooms(&state, Some(GameType::HistoricalTrivia))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, trivia.room_id);
    }
}
