//! Fan-out of room changes to connected clients.
//!
//! Lobby events go through the in-process broadcast hub. Per-room streams are
//! driven by store subscriptions, so every instance sharing a store sees the
//! same snapshots regardless of which one performed the write.

use futures::{Stream, StreamExt, stream};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameState, Room},
        room_store::RecordKey,
    },
    dto::{
        room::{GameStateView, RoomSummary, RoomView},
        sse::{RoomClosedEvent, ServerEvent},
    },
    error::ServiceError,
    state::SharedState,
};

/// Lobby event name for a freshly opened room.
pub const ROOM_CREATED: &str = "room.created";
/// Lobby event name for roster or status changes.
pub const ROOM_UPDATED: &str = "room.updated";
/// Event name sent when a room is deleted.
pub const ROOM_CLOSED: &str = "room.closed";
/// Per-room event carrying the full room view.
pub const ROOM_SNAPSHOT: &str = "room.snapshot";
/// Per-room event carrying the full game state view.
pub const GAME_STATE_SNAPSHOT: &str = "game_state.snapshot";

fn event<T: serde::Serialize>(name: &str, payload: &T) -> Option<ServerEvent> {
    match ServerEvent::json(Some(name.to_string()), payload) {
        Ok(event) => Some(event),
        Err(err) => {
            warn!(event = name, error = %err, "failed to encode SSE payload");
            None
        }
    }
}

/// Announce a new room on the lobby stream.
pub fn room_created(state: &SharedState, room: &Room) {
    if let Some(event) = event(ROOM_CREATED, &RoomSummary::from(room)) {
        state.lobby().broadcast(event);
    }
}

/// Announce a roster or status change on the lobby stream.
pub fn room_updated(state: &SharedState, room: &Room) {
    if let Some(event) = event(ROOM_UPDATED, &RoomSummary::from(room)) {
        state.lobby().broadcast(event);
    }
}

/// Announce that a room was removed.
pub fn room_closed(state: &SharedState, room_id: Uuid) {
    if let Some(event) = event(ROOM_CLOSED, &RoomClosedEvent { room_id }) {
        state.lobby().broadcast(event);
    }
}

fn decode<T: DeserializeOwned>(key: &RecordKey, value: Value) -> Option<T> {
    serde_json::from_value(value)
        .map_err(|err| warn!(key = %key, error = %err, "dropping undecodable snapshot"))
        .ok()
}

/// Stream of full room and game-state snapshots for `room_id`, starting with the current ones.
///
/// Each item is the authoritative state, never a delta. A `room.closed` event
/// is emitted if the room record disappears.
pub async fn room_events(
    state: &SharedState,
    room_id: Uuid,
) -> Result<impl Stream<Item = ServerEvent> + Send + 'static + use<>, ServiceError> {
    let repo = state.repository().await?;
    if repo.room(room_id).await?.is_none() {
        return Err(ServiceError::NotFound(format!("room {room_id}")));
    }

    let room_key = RecordKey::Room(room_id);
    let game_key = RecordKey::GameState(room_id);
    let rooms = repo.subscribe(&room_key).await?.into_stream();
    let games = repo.subscribe(&game_key).await?.into_stream();

    let rooms = rooms.filter_map(move |value| {
        let key = room_key.clone();
        async move {
            match value {
                Some(value) => {
                    let room: Room = decode(&key, value)?;
                    event(ROOM_SNAPSHOT, &RoomView::from(&room))
                }
                None => event(ROOM_CLOSED, &RoomClosedEvent { room_id }),
            }
        }
    });

    let games = games.filter_map(move |value| {
        let key = game_key.clone();
        async move {
            let game: GameState = decode(&key, value?)?;
            event(GAME_STATE_SNAPSHOT, &GameStateView::from(&game))
        }
    });

    Ok(stream::select(rooms, games))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::services::{
        room_service::{create_room, join_room, leave_room},
        round_service::submit_answer,
        test_support::{create_request, settle, started_game, test_state},
    };

    async fn next_event<S>(events: &mut S) -> (String, Value)
    where
        S: Stream<Item = ServerEvent> + Unpin,
    {
        let event = tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .expect("no event within a second")
            .expect("room stream ended");
        let payload = serde_json::from_str(&event.data).unwrap();
        (event.event.unwrap_or_default(), payload)
    }

    /// Skip intermediate snapshots until one named `name` satisfies `accept`.
    async fn wait_for<S>(events: &mut S, name: &str, accept: impl Fn(&Value) -> bool) -> Value
    where
        S: Stream<Item = ServerEvent> + Unpin,
    {
        loop {
            let (event, payload) = next_event(events).await;
            if event == name && accept(&payload) {
                return payload;
            }
        }
    }

    #[tokio::test]
    async fn room_stream_sends_snapshots_until_the_room_closes() {
        let state = test_state();
        let created = create_room(&state, create_request("Ada", None)).await.unwrap();
        let room_id = created.room_id;
        let mut events = Box::pin(room_events(&state, room_id).await.unwrap());

        let mut initial = vec![next_event(&mut events).await.0, next_event(&mut events).await.0];
        initial.sort();
        assert_eq!(initial, [GAME_STATE_SNAPSHOT, ROOM_SNAPSHOT]);

        let guest = join_room(&state, room_id, "Grace").await.unwrap();
        let (name, room) = next_event(&mut events).await;
        assert_eq!(name, ROOM_SNAPSHOT);
        assert_eq!(room["id"], json!(room_id));
        assert_eq!(room["players"].as_array().unwrap().len(), 2);
        assert_eq!(room["players"][1]["display_name"], "Grace");

        leave_room(&state, room_id, guest.id).await.unwrap();
        let (name, room) = next_event(&mut events).await;
        assert_eq!(name, ROOM_SNAPSHOT);
        assert_eq!(room["players"].as_array().unwrap().len(), 1);

        leave_room(&state, room_id, created.host_player_id).await.unwrap();
        let closed = wait_for(&mut events, ROOM_CLOSED, |_| true).await;
        assert_eq!(closed["room_id"], json!(room_id));
    }

    #[tokio::test(start_paused = true)]
    async fn round_progress_is_pushed_as_full_game_state() {
        let state = test_state();
        let (room_id, host, guest) = started_game(&state).await;
        let mut events = Box::pin(room_events(&state, room_id).await.unwrap());

        let opening = wait_for(&mut events, GAME_STATE_SNAPSHOT, |_| true).await;
        assert_eq!(opening["current_round"], 1);
        assert_eq!(opening["round_status"], "open");

        submit_answer(&state, room_id, host, json!("right")).await.unwrap();
        let answered = wait_for(&mut events, GAME_STATE_SNAPSHOT, |game| {
            game["answered_players"].as_array().is_some_and(|ids| ids.len() == 1)
        })
        .await;
        assert_eq!(answered["answered_players"][0], json!(host));

        submit_answer(&state, room_id, guest, json!("wrong")).await.unwrap();
        wait_for(&mut events, GAME_STATE_SNAPSHOT, |game| {
            game["round_status"] == "closing"
        })
        .await;

        tokio::time::sleep(Duration::from_secs(4)).await;
        settle().await;
        let next = wait_for(&mut events, GAME_STATE_SNAPSHOT, |game| {
            game["current_round"] == 2
        })
        .await;
        assert_eq!(next["round_status"], "open");
        assert!(next["answered_players"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_rooms_have_no_stream() {
        let state = test_state();
        assert!(matches!(
            room_events(&state, Uuid::new_v4()).await.err(),
            Some(ServiceError::NotFound(_))
        ));
    }
}
