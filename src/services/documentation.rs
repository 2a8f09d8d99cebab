use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Quiz Arena Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::create_room,
        crate::routes::rooms::list_open_rooms,
        crate::routes::rooms::get_room,
        crate::routes::rooms::get_room_by_code,
        crate::routes::rooms::join_room_by_code,
        crate::routes::rooms::join_room,
        crate::routes::rooms::leave_room,
        crate::routes::rooms::set_ready,
        crate::routes::rooms::start_game,
        crate::routes::rooms::get_game_state,
        crate::routes::rooms::submit_answer,
        crate::routes::rooms::finish,
        crate::routes::leaderboard::get_leaderboard,
        crate::routes::leaderboard::get_player_stats,
        crate::routes::sse::lobby_stream,
        crate::routes::sse::room_stream,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::room::CreateRoomRequest,
            crate::dto::room::CreateRoomResponse,
            crate::dto::room::SettingsInput,
            crate::dto::room::JoinRoomRequest,
            crate::dto::room::JoinByCodeRequest,
            crate::dto::room::JoinRoomResponse,
            crate::dto::room::PlayerActionRequest,
            crate::dto::room::ReadyRequest,
            crate::dto::room::SubmitAnswerRequest,
            crate::dto::room::SubmitAnswerResponse,
            crate::dto::room::FinishRequest,
            crate::dto::room::PlayerView,
            crate::dto::room::RoomView,
            crate::dto::room::RoomSummary,
            crate::dto::room::AnswerResultView,
            crate::dto::room::GameStateView,
            crate::dto::leaderboard::LeaderboardPeriod,
            crate::dto::leaderboard::LeaderboardEntry,
            crate::dto::leaderboard::LeaderboardResponse,
            crate::dto::leaderboard::BadgeView,
            crate::dto::leaderboard::PlayerStatsResponse,
            crate::dto::sse::Handshake,
            crate::dto::sse::RoomClosedEvent,
            crate::dao::models::GameType,
            crate::dao::models::Difficulty,
            crate::dao::models::RoomStatus,
            crate::dao::models::RoundStatus,
            crate::dao::models::RoomSettings,
            crate::services::badges::Rarity,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room lifecycle and gameplay"),
        (name = "leaderboard", description = "Rankings and player statistics"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/rooms",
            "/rooms/{id}/answers",
            "/rooms/{id}/events",
            "/leaderboard",
            "/players/{id}/stats",
            "/sse/lobby",
            "/healthcheck",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
