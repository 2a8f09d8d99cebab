use std::convert::Infallible;

use axum::{
    Router,
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::get,
};
use futures::{Stream, StreamExt, stream};
use tracing::info;
use uuid::Uuid;

use crate::{
    error::AppError,
    services::{notifier, sse_service},
    state::SharedState,
};

#[utoipa::path(
    get,
    path = "/sse/lobby",
    tag = "sse",
    responses((status = 200, description = "Lobby SSE stream", content_type = "text/event-stream", body = String))
)]
/// Stream room creations, roster changes and closures to lobby screens.
pub async fn lobby_stream(
    State(state): State<SharedState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.lobby().subscribe();
    let handshake = sse_service::handshake(&state, "lobby").await;
    info!("New lobby SSE connection");
    let events = stream::iter(handshake).chain(sse_service::broadcast_events(receiver));
    sse_service::to_sse_stream(events, "lobby")
}

#[utoipa::path(
    get,
    path = "/rooms/{id}/events",
    tag = "sse",
    params(("id" = Uuid, Path, description = "Room identifier")),
    responses(
        (status = 200, description = "Room snapshot stream", content_type = "text/event-stream", body = String),
        (status = 404, description = "Unknown room")
    )
)]
/// Stream full room and game-state snapshots as they change.
pub async fn room_stream(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let snapshots = notifier::room_events(&state, id).await?;
    let handshake = sse_service::handshake(&state, "room").await;
    info!(room_id = %id, "New room SSE connection");
    let events = stream::iter(handshake).chain(snapshots);
    Ok(sse_service::to_sse_stream(events, "room"))
}

/// Configure the SSE endpoints.
pub fn router() -> Router<SharedState> {
    Router::<SharedState>::new()
        .route("/sse/lobby", get(lobby_stream))
        .route("/rooms/{id}/events", get(room_stream))
}
