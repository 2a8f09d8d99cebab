use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::room::{
        CreateRoomRequest, CreateRoomResponse, FinishRequest, GameStateView, JoinByCodeRequest,
        JoinRoomRequest, JoinRoomResponse, ListRoomsQuery, PlayerActionRequest, PlayerView,
        ReadyRequest, RoomSummary, RoomView, SubmitAnswerRequest, SubmitAnswerResponse,
    },
    error::AppError,
    services::{room_service, round_service, scoring},
    state::SharedState,
};

/// Room lifecycle and gameplay endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms", post(create_room).get(list_open_rooms))
        .route("/rooms/join", post(join_room_by_code))
        .route("/rooms/code/{code}", get(get_room_by_code))
        .route("/rooms/{id}", get(get_room))
        .route("/rooms/{id}/join", post(join_room))
        .route("/rooms/{id}/leave", post(leave_room))
        .route("/rooms/{id}/ready", post(set_ready))
        .route("/rooms/{id}/start", post(start_game))
        .route("/rooms/{id}/state", get(get_game_state))
        .route("/rooms/{id}/answers", post(submit_answer))
        .route("/rooms/{id}/finish", post(finish))
}

#[utoipa::path(
    post,
    path = "/rooms",
    tag = "rooms",
    request_body = CreateRoomRequest,
    responses(
        (status = 201, description = "Room created", body = CreateRoomResponse),
        (status = 400, description = "Invalid settings or host name"),
        (status = 503, description = "No room store available")
    )
)]
/// Open a new room; the caller becomes its host.
pub async fn create_room(
    State(state): State<SharedState>,
    Json(payload): Json<CreateRoomRequest>,
) -> Result<(StatusCode, Json<CreateRoomResponse>), AppError> {
    payload.validate()?;
    let created = room_service::create_room(&state, payload).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[utoipa::path(
    get,
    path = "/rooms",
    tag = "rooms",
    params(ListRoomsQuery),
    responses((status = 200, description = "Rooms waiting for players", body = [RoomSummary]))
)]
/// List rooms that still accept players.
pub async fn list_open_rooms(
    State(state): State<SharedState>,
    Query(query): Query<ListRoomsQuery>,
) -> Result<Json<Vec<RoomSummary>>, AppError> {
    let rooms = room_service::list_open_rooms(&state, query.game_type).await?;
    Ok(Json(rooms.iter().map(RoomSummary::from).collect()))
}

#[utoipa::path(
    get,
    path = "/rooms/{id}",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room snapshot", body = RoomView),
        (status = 404, description = "Unknown room")
    )
)]
pub async fn get_room(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RoomView>, AppError> {
    let room = room_service::get_room(&state, id).await?;
    Ok(Json(RoomView::from(&room)))
}

#[utoipa::path(
    get,
    path = "/rooms/code/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "Six character join code, case-insensitive")),
    responses(
        (status = 200, description = "Room snapshot", body = RoomView),
        (status = 404, description = "No room uses this code")
    )
)]
/// Resolve a join code to its room.
pub async fn get_room_by_code(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<RoomView>, AppError> {
    let room = room_service::get_room_by_code(&state, &code).await?;
    Ok(Json(RoomView::from(&room)))
}

#[utoipa::path(
    post,
    path = "/rooms/join",
    tag = "rooms",
    request_body = JoinByCodeRequest,
    responses(
        (status = 200, description = "Joined", body = JoinRoomResponse),
        (status = 404, description = "Unknown code"),
        (status = 409, description = "Room full, already started, or name taken")
    )
)]
/// Join a room through its short code.
pub async fn join_room_by_code(
    State(state): State<SharedState>,
    Json(payload): Json<JoinByCodeRequest>,
) -> Result<Json<JoinRoomResponse>, AppError> {
    payload.validate()?;
    let (room_id, player) =
        room_service::join_room_by_code(&state, &payload.code, &payload.player_name).await?;
    Ok(Json(JoinRoomResponse {
        room_id,
        player: PlayerView::from(&player),
    }))
}

#[utoipa::path(
    post,
    path = "/rooms/{id}/join",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    request_body = JoinRoomRequest,
    responses(
        (status = 200, description = "Joined", body = JoinRoomResponse),
        (status = 404, description = "Unknown room"),
        (status = 409, description = "Room full, already started, or name taken")
    )
)]
pub async fn join_room(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<JoinRoomRequest>,
) -> Result<Json<JoinRoomResponse>, AppError> {
    payload.validate()?;
    let player = room_service::join_room(&state, id, &payload.player_name).await?;
    Ok(Json(JoinRoomResponse {
        room_id: id,
        player: PlayerView::from(&player),
    }))
}

#[utoipa::path(
    post,
    path = "/rooms/{id}/leave",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    request_body = PlayerActionRequest,
    responses(
        (status = 204, description = "Player removed"),
        (status = 404, description = "Unknown room or player")
    )
)]
/// Leave a room. The room is deleted once its last player leaves.
pub async fn leave_room(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PlayerActionRequest>,
) -> Result<StatusCode, AppError> {
    room_service::leave_room(&state, id, payload.player_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/rooms/{id}/ready",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    request_body = ReadyRequest,
    responses(
        (status = 200, description = "Readiness updated", body = RoomView),
        (status = 409, description = "Room no longer waiting")
    )
)]
pub async fn set_ready(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReadyRequest>,
) -> Result<Json<RoomView>, AppError> {
    let room = room_service::set_ready(&state, id, payload.player_id, payload.ready).await?;
    Ok(Json(RoomView::from(&room)))
}

#[utoipa::path(
    post,
    path = "/rooms/{id}/start",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    request_body = PlayerActionRequest,
    responses(
        (status = 200, description = "Game started, round one open", body = GameStateView),
        (status = 403, description = "Caller is not the host"),
        (status = 409, description = "Not enough players or not everyone is ready")
    )
)]
/// Start the game (host only).
pub async fn start_game(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PlayerActionRequest>,
) -> Result<Json<GameStateView>, AppError> {
    let game = room_service::start_game(&state, id, payload.player_id).await?;
    Ok(Json(GameStateView::from(&game)))
}

#[utoipa::path(
    get,
    path = "/rooms/{id}/state",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Current game state", body = GameStateView),
        (status = 404, description = "Unknown room")
    )
)]
pub async fn get_game_state(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<GameStateView>, AppError> {
    let game = room_service::get_game_state(&state, id).await?;
    Ok(Json(GameStateView::from(&game)))
}

#[utoipa::path(
    post,
    path = "/rooms/{id}/answers",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    request_body = SubmitAnswerRequest,
    responses(
        (status = 200, description = "Answer recorded, or dropped when the round already closed", body = SubmitAnswerResponse),
        (status = 409, description = "Game not started")
    )
)]
/// Submit (or replace) an answer for the open round.
pub async fn submit_answer(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SubmitAnswerRequest>,
) -> Result<Json<SubmitAnswerResponse>, AppError> {
    let outcome =
        round_service::submit_answer(&state, id, payload.player_id, payload.answer).await?;
    Ok(Json(outcome.into()))
}

#[utoipa::path(
    post,
    path = "/rooms/{id}/finish",
    tag = "rooms",
    params(("id" = Uuid, Path, description = "Room identifier")),
    request_body = FinishRequest,
    responses(
        (status = 200, description = "Finish recorded", body = RoomView),
        (status = 409, description = "Game not started")
    )
)]
/// Report a player's final score; the room finishes once every player reported.
pub async fn finish(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<FinishRequest>,
) -> Result<Json<RoomView>, AppError> {
    payload.validate()?;
    let room =
        scoring::record_player_finish(&state, id, payload.player_id, payload.final_score).await?;
    Ok(Json(RoomView::from(&room)))
}
