//! Leaderboard and player statistics payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{GameType, PlayerStats},
    dto::format_system_time,
    services::badges::{BadgeDefinition, Rarity},
};

/// Number of entries returned when no limit is given.
pub const DEFAULT_LEADERBOARD_LIMIT: usize = 10;

/// Time window applied before aggregating results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum LeaderboardPeriod {
    /// Since midnight UTC today.
    Daily,
    /// Rolling seven days.
    Weekly,
    /// Since the first day of the current month (UTC).
    Monthly,
    #[default]
    AllTime,
}

/// Query string accepted by `GET /leaderboard`.
#[derive(Debug, Deserialize, IntoParams, Validate)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    pub game_type: GameType,
    #[serde(default)]
    pub period: LeaderboardPeriod,
    /// Maximum number of entries (1 to 100, default 10).
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<usize>,
}

/// One ranked line of the leaderboard.
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
pub struct LeaderboardEntry {
    /// 1-based, without gaps.
    pub rank: u32,
    pub player_id: Uuid,
    pub display_name: String,
    pub total_score: u64,
    pub games_played: u32,
    pub wins: u32,
    /// Wins divided by games played within the period.
    pub win_rate: f64,
    pub badges: Vec<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LeaderboardResponse {
    pub game_type: GameType,
    pub period: LeaderboardPeriod,
    pub entries: Vec<LeaderboardEntry>,
}

/// Catalog badge with the player's unlock status.
#[derive(Debug, Serialize, ToSchema)]
pub struct BadgeView {
    pub id: String,
    pub display_name: String,
    pub rarity: Rarity,
    pub unlocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocked_at: Option<String>,
}

/// Cumulative statistics of a player.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlayerStatsResponse {
    pub player_id: Uuid,
    pub display_name: String,
    pub total_score: u64,
    pub games_played: u32,
    pub wins: u32,
    pub best_score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastest_win_seconds: Option<u64>,
    pub wins_by_type: BTreeMap<String, u32>,
    pub last_played: String,
    pub badges: Vec<BadgeView>,
}

impl PlayerStatsResponse {
    /// Project `stats` together with every catalog badge.
    pub fn new(stats: &PlayerStats, catalog: &[BadgeDefinition]) -> Self {
        let badges = catalog
            .iter()
            .map(|badge| {
                let unlocked_at = stats.badges.get(badge.id).copied();
                BadgeView {
                    id: badge.id.to_string(),
                    display_name: badge.display_name.to_string(),
                    rarity: badge.rarity,
                    unlocked: unlocked_at.is_some(),
                    unlocked_at: unlocked_at.map(format_system_time),
                }
            })
            .collect();

        Self {
            player_id: stats.player_id,
            display_name: stats.display_name.clone(),
            total_score: stats.total_score,
            games_played: stats.games_played,
            wins: stats.wins,
            best_score: stats.best_score,
            fastest_win_seconds: stats.fastest_win_seconds,
            wins_by_type: stats
                .wins_by_type
                .iter()
                .map(|(game_type, wins)| (game_type.as_str().to_string(), *wins))
                .collect(),
            last_played: format_system_time(stats.last_played),
            badges,
        }
    }
}
