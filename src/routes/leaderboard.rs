use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dto::leaderboard::{LeaderboardQuery, LeaderboardResponse, PlayerStatsResponse},
    error::AppError,
    services::leaderboard_service,
    state::SharedState,
};

/// Leaderboard and player statistics endpoints.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/leaderboard", get(get_leaderboard))
        .route("/players/{id}/stats", get(get_player_stats))
}

#[utoipa::path(
    get,
    path = "/leaderboard",
    tag = "leaderboard",
    params(LeaderboardQuery),
    responses(
        (status = 200, description = "Ranked players", body = LeaderboardResponse),
        (status = 400, description = "Invalid limit")
    )
)]
/// Rank players of a game type over a time window.
pub async fn get_leaderboard(
    State(state): State<SharedState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<Json<LeaderboardResponse>, AppError> {
    query.validate()?;
    let payload = leaderboard_service::get_leaderboard(&state, &query).await?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/players/{id}/stats",
    tag = "leaderboard",
    params(("id" = Uuid, Path, description = "Player identifier")),
    responses(
        (status = 200, description = "Cumulative statistics and badges", body = PlayerStatsResponse),
        (status = 404, description = "Player has no finished games")
    )
)]
pub async fn get_player_stats(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PlayerStatsResponse>, AppError> {
    let payload = leaderboard_service::get_player_stats(&state, id).await?;
    Ok(Json(payload))
}
