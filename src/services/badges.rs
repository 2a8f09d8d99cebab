//! Badge catalog and eligibility rules.

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    config::BadgeThresholds,
    dao::models::{GameResult, GameType, PlayerStats},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Rarity {
    Common,
    Rare,
    Epic,
    Legendary,
}

/// Catalog entry. Cosmetic metadata (icons, descriptions) lives with the clients.
#[derive(Debug, Clone, Copy)]
pub struct BadgeDefinition {
    pub id: &'static str,
    pub display_name: &'static str,
    pub rarity: Rarity,
}

pub const FIRST_WIN: &str = "first_win";
pub const SPEED_MASTER: &str = "speed_master";
pub const PERFECT_SCORE: &str = "perfect_score";
pub const HISTORY_MASTER: &str = "history_master";
pub const TIMELINE_EXPERT: &str = "timeline_expert";
pub const TRIVIA_CHAMPION: &str = "trivia_champion";

/// Every badge, in evaluation order.
pub const CATALOG: [BadgeDefinition; 6] = [
    BadgeDefinition {
        id: FIRST_WIN,
        display_name: "First Victory",
        rarity: Rarity::Common,
    },
    BadgeDefinition {
        id: SPEED_MASTER,
        display_name: "Speed Master",
        rarity: Rarity::Rare,
    },
    BadgeDefinition {
        id: PERFECT_SCORE,
        display_name: "Perfect Score",
        rarity: Rarity::Epic,
    },
    BadgeDefinition {
        id: HISTORY_MASTER,
        display_name: "History Master",
        rarity: Rarity::Legendary,
    },
    BadgeDefinition {
        id: TIMELINE_EXPERT,
        display_name: "Timeline Expert",
        rarity: Rarity::Rare,
    },
    BadgeDefinition {
        id: TRIVIA_CHAMPION,
        display_name: "Trivia Champion",
        rarity: Rarity::Rare,
    },
];

/// Badges newly earned by `player_id` in `result`.
///
/// `stats` must already include `result`. Only the winner of the game earns
/// badges, and ids already present in `stats.badges` are never returned again.
/// The output follows [`CATALOG`] order.
pub fn evaluate_badges(
    stats: &PlayerStats,
    result: &GameResult,
    player_id: Uuid,
    thresholds: &BadgeThresholds,
) -> Vec<&'static str> {
    let Some(line) = result.player(player_id) else {
        return Vec::new();
    };
    if line.rank != 1 {
        return Vec::new();
    }

    CATALOG
        .iter()
        .map(|badge| badge.id)
        .filter(|id| !stats.badges.contains_key(*id))
        .filter(|id| match *id {
            FIRST_WIN => stats.wins >= 1,
            SPEED_MASTER => result.duration_seconds < thresholds.speed_seconds,
            PERFECT_SCORE => line.final_score >= thresholds.perfect_score,
            HISTORY_MASTER => stats.wins >= thresholds.master_wins,
            TIMELINE_EXPERT => stats.wins_in(GameType::TimelinePuzzle) >= thresholds.category_wins,
            TRIVIA_CHAMPION => {
                stats.wins_in(GameType::HistoricalTrivia) >= thresholds.category_wins
            }
            _ => false,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::dao::models::PlayerResult;

    fn result(game_type: GameType, winner: Uuid, loser: Uuid, score: u32, secs: u64) -> GameResult {
        GameResult {
            room_id: Uuid::new_v4(),
            game_type,
            players: vec![
                PlayerResult {
                    player_id: winner,
                    display_name: "w".into(),
                    final_score: score,
                    rank: 1,
                    badges: vec![],
                },
                PlayerResult {
                    player_id: loser,
                    display_name: "l".into(),
                    final_score: 0,
                    rank: 2,
                    badges: vec![],
                },
            ],
            duration_seconds: secs,
            completed_at: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000),
        }
    }

    fn stats_after(results: &[GameResult], player: Uuid) -> PlayerStats {
        let mut stats = PlayerStats::new(player, "p".into(), SystemTime::UNIX_EPOCH);
        for result in results {
            stats.record(result, result.player(player).unwrap());
        }
        stats
    }

    #[test]
    fn first_win_goes_to_winner_only() {
        let (winner, loser) = (Uuid::new_v4(), Uuid::new_v4());
        let game = result(GameType::MapConquest, winner, loser, 300, 600);
        let thresholds = BadgeThresholds::default();

        let won = evaluate_badges(&stats_after(&[game.clone()], winner), &game, winner, &thresholds);
        assert_eq!(won, vec![FIRST_WIN]);

        let lost = evaluate_badges(&stats_after(&[game.clone()], loser), &game, loser, &thresholds);
        assert!(lost.is_empty());
    }

    #[test]
    fn held_badges_are_not_awarded_again() {
        let (winner, loser) = (Uuid::new_v4(), Uuid::new_v4());
        let game = result(GameType::MapConquest, winner, loser, 300, 600);
        let mut stats = stats_after(&[game.clone()], winner);
        stats.award(FIRST_WIN, SystemTime::UNIX_EPOCH);

        assert!(evaluate_badges(&stats, &game, winner, &BadgeThresholds::default()).is_empty());
    }

    #[test]
    fn fast_high_scoring_win_unlocks_several_badges() {
        let (winner, loser) = (Uuid::new_v4(), Uuid::new_v4());
        let game = result(GameType::HistoricalTrivia, winner, loser, 1200, 45);
        let stats = stats_after(&[game.clone()], winner);

        let won = evaluate_badges(&stats, &game, winner, &BadgeThresholds::default());
        assert_eq!(won, vec![FIRST_WIN, SPEED_MASTER, PERFECT_SCORE]);
    }

    #[test]
    fn category_badge_fires_on_the_threshold_win() {
        let (winner, loser) = (Uuid::new_v4(), Uuid::new_v4());
        let thresholds = BadgeThresholds::default();
        let games: Vec<_> = (0..thresholds.category_wins)
            .map(|_| result(GameType::TimelinePuzzle, winner, loser, 100, 600))
            .collect();

        let before = stats_after(&games[..games.len() - 1], winner);
        let last = games.last().unwrap();
        assert!(!evaluate_badges(&before, last, winner, &thresholds).contains(&TIMELINE_EXPERT));

        let after = stats_after(&games, winner);
        assert!(evaluate_badges(&after, last, winner, &thresholds).contains(&TIMELINE_EXPERT));
    }
}
