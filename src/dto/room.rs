//! Request and response shapes for the room endpoints.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{
        Difficulty, GameState, GameType, Player, PlayerAnswer, Room, RoomSettings, RoomStatus,
        RoundStatus,
    },
    dto::{
        format_system_time,
        validation::{validate_display_name, validate_room_code},
    },
};

/// Optional overrides applied on top of the configured default settings.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
pub struct SettingsInput {
    #[validate(range(min = 5, max = 600))]
    pub time_limit_seconds: Option<u32>,
    #[validate(range(min = 1, max = 50))]
    pub total_rounds: Option<u32>,
    pub difficulty: Option<Difficulty>,
    #[validate(range(min = 2, max = 16))]
    pub max_players: Option<u32>,
}

impl SettingsInput {
    /// Resolve the overrides against `defaults`.
    pub fn resolve(&self, defaults: &RoomSettings) -> RoomSettings {
        RoomSettings {
            time_limit_seconds: self.time_limit_seconds.unwrap_or(defaults.time_limit_seconds),
            total_rounds: self.total_rounds.unwrap_or(defaults.total_rounds),
            difficulty: self.difficulty.unwrap_or(defaults.difficulty),
            max_players: self.max_players.unwrap_or(defaults.max_players),
        }
    }
}

/// Payload used to open a new room.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateRoomRequest {
    #[validate(custom(function = "validate_display_name"))]
    pub host_name: String,
    pub game_type: GameType,
    #[serde(default)]
    #[validate(nested)]
    pub settings: Option<SettingsInput>,
}

/// Identifiers handed back to the room creator.
#[derive(Debug, Serialize, ToSchema)]
pub struct CreateRoomResponse {
    pub room_id: Uuid,
    pub host_player_id: Uuid,
    pub short_code: String,
}

/// Payload used to join a room by id.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinRoomRequest {
    #[validate(custom(function = "validate_display_name"))]
    pub player_name: String,
}

/// Payload used to join a room through its short code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinByCodeRequest {
    #[validate(custom(function = "validate_room_code"))]
    pub code: String,
    #[validate(custom(function = "validate_display_name"))]
    pub player_name: String,
}

/// Result of a successful join.
#[derive(Debug, Serialize, ToSchema)]
pub struct JoinRoomResponse {
    pub room_id: Uuid,
    pub player: PlayerView,
}

/// Identifies the player performing an action.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PlayerActionRequest {
    pub player_id: Uuid,
}

/// Readiness toggle.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReadyRequest {
    pub player_id: Uuid,
    pub ready: bool,
}

/// Answer for the round currently open.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubmitAnswerRequest {
    pub player_id: Uuid,
    /// Opaque answer payload (text, number, ordering...).
    #[schema(value_type = Object)]
    pub answer: Value,
}

/// Outcome of an answer submission.
#[derive(Debug, Serialize, ToSchema)]
pub struct SubmitAnswerResponse {
    /// `false` when the round had already closed and the answer was dropped.
    pub accepted: bool,
    pub round: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub points: Option<u32>,
    /// Whether this answer completed the round.
    pub round_complete: bool,
}

/// Final score reported by a player's client.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct FinishRequest {
    pub player_id: Uuid,
    #[validate(range(max = 1_000_000))]
    pub final_score: u32,
}

/// Filters for the open-room listing.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListRoomsQuery {
    /// Only list rooms of this game type.
    pub game_type: Option<GameType>,
}

/// Public projection of a player.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerView {
    pub id: Uuid,
    pub display_name: String,
    pub score: u32,
    pub is_host: bool,
    pub is_ready: bool,
    /// RFC 3339 timestamp.
    pub joined_at: String,
    pub is_finished: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub achievements: Vec<String>,
}

impl From<&Player> for PlayerView {
    fn from(player: &Player) -> Self {
        Self {
            id: player.id,
            display_name: player.display_name.clone(),
            score: player.score,
            is_host: player.is_host,
            is_ready: player.is_ready,
            joined_at: format_system_time(player.joined_at),
            is_finished: player.is_finished,
            finished_at: player.finished_at.map(format_system_time),
            achievements: player.achievements.iter().cloned().collect(),
        }
    }
}

/// Full room snapshot as pushed to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomView {
    pub id: Uuid,
    pub short_code: String,
    pub game_type: GameType,
    pub host_id: Uuid,
    pub players: Vec<PlayerView>,
    pub max_players: u32,
    pub status: RoomStatus,
    pub settings: RoomSettings,
    pub current_round: u32,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl From<&Room> for RoomView {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id,
            short_code: room.short_code.clone(),
            game_type: room.game_type,
            host_id: room.host_id,
            players: room.players.iter().map(PlayerView::from).collect(),
            max_players: room.max_players,
            status: room.status,
            settings: room.settings.clone(),
            current_round: room.current_round,
            created_at: format_system_time(room.created_at),
            started_at: room.started_at.map(format_system_time),
            finished_at: room.finished_at.map(format_system_time),
        }
    }
}

/// Lobby listing entry.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoomSummary {
    pub id: Uuid,
    pub short_code: String,
    pub game_type: GameType,
    pub status: RoomStatus,
    pub host_name: Option<String>,
    pub player_count: usize,
    pub max_players: u32,
}

impl From<&Room> for RoomSummary {
    fn from(room: &Room) -> Self {
        Self {
            id: room.id,
            short_code: room.short_code.clone(),
            game_type: room.game_type,
            status: room.status,
            host_name: room.player(room.host_id).map(|host| host.display_name.clone()),
            player_count: room.players.len(),
            max_players: room.max_players,
        }
    }
}

/// Scored answer, revealed once the round stops accepting answers.
#[derive(Debug, Serialize, ToSchema)]
pub struct AnswerResultView {
    pub player_id: Uuid,
    /// `false` for players who ran out of time.
    pub answered: bool,
    pub is_correct: bool,
    pub points: u32,
}

impl From<&PlayerAnswer> for AnswerResultView {
    fn from(answer: &PlayerAnswer) -> Self {
        Self {
            player_id: answer.player_id,
            answered: answer.payload.is_some(),
            is_correct: answer.is_correct,
            points: answer.points,
        }
    }
}

/// Game progress snapshot as pushed to clients.
#[derive(Debug, Serialize, ToSchema)]
pub struct GameStateView {
    pub room_id: Uuid,
    pub current_round: u32,
    pub total_rounds: u32,
    /// Seconds granted when the round opened.
    pub time_remaining_seconds: u32,
    pub round_status: RoundStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_ends_at: Option<String>,
    /// Players who already answered the current round.
    pub answered_players: Vec<Uuid>,
    /// Per-player outcome; empty while the round is open.
    pub results: Vec<AnswerResultView>,
    pub settings: RoomSettings,
}

impl From<&GameState> for GameStateView {
    fn from(state: &GameState) -> Self {
        let revealed = matches!(
            state.round_status,
            RoundStatus::Closing | RoundStatus::Finished
        );
        Self {
            room_id: state.room_id,
            current_round: state.current_round,
            total_rounds: state.total_rounds,
            time_remaining_seconds: state.time_remaining_seconds,
            round_status: state.round_status,
            round_ends_at: state.round_ends_at.map(format_system_time),
            answered_players: state
                .answers
                .values()
                .filter(|answer| answer.payload.is_some())
                .map(|answer| answer.player_id)
                .collect(),
            results: if revealed {
                state.answers.values().map(AnswerResultView::from).collect()
            } else {
                Vec::new()
            },
            settings: state.settings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_overrides_fall_back_to_defaults() {
        let defaults = RoomSettings {
            time_limit_seconds: 30,
            total_rounds: 10,
            difficulty: Difficulty::Medium,
            max_players: 8,
        };
        let input = SettingsInput {
            total_rounds: Some(3),
            max_players: Some(4),
            ..Default::default()
        };

        let resolved = input.resolve(&defaults);
        assert_eq!(resolved.total_rounds, 3);
        assert_eq!(resolved.max_players, 4);
        assert_eq!(resolved.time_limit_seconds, 30);
        assert_eq!(resolved.difficulty, Difficulty::Medium);
    }

    #[test]
    fn create_request_validation_rejects_bad_settings() {
        let request: CreateRoomRequest = serde_json::from_value(serde_json::json!({
            "host_name": "Lan",
            "game_type": "timeline-puzzle",
            "settings": { "max_players": 40 }
        }))
        .unwrap();
        assert!(request.validate().is_err());

        let request: CreateRoomRequest = serde_json::from_value(serde_json::json!({
            "host_name": "Lan",
            "game_type": "timeline-puzzle"
        }))
        .unwrap();
        assert!(request.validate().is_ok());
    }

    #[test]
    fn join_by_code_validation_checks_code_shape() {
        let request = JoinByCodeRequest {
            code: "AB1".into(),
            player_name: "Minh".into(),
        };
        assert!(request.validate().is_err());
    }
}
