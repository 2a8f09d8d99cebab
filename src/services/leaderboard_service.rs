//! Leaderboards recomputed on demand from finalized game results.

use std::time::SystemTime;

use indexmap::IndexMap;
use time::{OffsetDateTime, Time};
use uuid::Uuid;

use crate::{
    dao::models::{GameResult, GameType, PlayerStats},
    dto::leaderboard::{
        DEFAULT_LEADERBOARD_LIMIT, LeaderboardEntry, LeaderboardPeriod, LeaderboardQuery,
        LeaderboardResponse, PlayerStatsResponse,
    },
    error::ServiceError,
    services::badges::CATALOG,
    state::SharedState,
};

/// Earliest completion time included in `period`, evaluated in UTC.
pub fn period_cutoff(period: LeaderboardPeriod, now: OffsetDateTime) -> Option<SystemTime> {
    let cutoff = match period {
        LeaderboardPeriod::AllTime => return None,
        LeaderboardPeriod::Daily => now.replace_time(Time::MIDNIGHT),
        LeaderboardPeriod::Weekly => now - time::Duration::days(7),
        LeaderboardPeriod::Monthly => now
            .replace_day(1)
            .map(|first| first.replace_time(Time::MIDNIGHT))
            .unwrap_or(now),
    };
    Some(cutoff.into())
}

#[derive(Default)]
struct Tally {
    display_name: String,
    total_score: u64,
    games_played: u32,
    wins: u32,
}

/// Aggregate `results` into ranked entries.
///
/// Players are ordered by total score; equal totals keep the order in which the
/// players first appeared, oldest game first. Ranks run 1..N without gaps.
pub fn rank_results(
    results: &[GameResult],
    game_type: GameType,
    cutoff: Option<SystemTime>,
    limit: usize,
) -> Vec<LeaderboardEntry> {
    let mut relevant: Vec<&GameResult> = results
        .iter()
        .filter(|result| result.game_type == game_type)
        .filter(|result| cutoff.is_none_or(|cutoff| result.completed_at >= cutoff))
        .collect();
    relevant.sort_by_key(|result| result.completed_at);

    let mut tallies: IndexMap<Uuid, Tally> = IndexMap::new();
    for result in relevant {
        for line in &result.players {
            let tally = tallies.entry(line.player_id).or_default();
            tally.display_name = line.display_name.clone();
            tally.total_score += u64::from(line.final_score);
            tally.games_played += 1;
            if line.rank == 1 {
                tally.wins += 1;
            }
        }
    }

    let mut ranked: Vec<(Uuid, Tally)> = tallies.into_iter().collect();
    ranked.sort_by(|(_, a), (_, b)| b.total_score.cmp(&a.total_score));
    ranked
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(index, (player_id, tally))| LeaderboardEntry {
            rank: index as u32 + 1,
            player_id,
            display_name: tally.display_name,
            total_score: tally.total_score,
            games_played: tally.games_played,
            wins: tally.wins,
            win_rate: if tally.games_played == 0 {
                0.0
            } else {
                f64::from(tally.wins) / f64::from(tally.games_played)
            },
            badges: Vec::new(),
        })
        .collect()
}

/// Ranked leaderboard for a game type and period.
pub async fn get_leaderboard(
    state: &SharedState,
    query: &LeaderboardQuery,
) -> Result<LeaderboardResponse, ServiceError> {
    let repo = state.repository().await?;
    let results = repo.game_results().await?;
    let cutoff = period_cutoff(query.period, OffsetDateTime::now_utc());
    let limit = query.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT);

    let mut entries = rank_results(&results, query.game_type, cutoff, limit);
    for entry in &mut entries {
        if let Some(stats) = repo.player_stats(entry.player_id).await? {
            entry.badges = stats.badges.keys().cloned().collect();
        }
    }

    Ok(LeaderboardResponse {
        game_type: query.game_type,
        period: query.period,
        entries,
    })
}

/// Cumulative stats for a player along with the badge catalog.
pub async fn get_player_stats(
    state: &SharedState,
    player_id: Uuid,
) -> Result<PlayerStatsResponse, ServiceError> {
    let repo = state.repository().await?;
    let stats: PlayerStats = repo
        .player_stats(player_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("stats for player {player_id}")))?;
    Ok(PlayerStatsResponse::new(&stats, &CATALOG))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use time::macros::datetime;

    use super::*;
    use crate::dao::models::PlayerResult;

    fn line(player_id: Uuid, name: &str, score: u32, rank: u32) -> PlayerResult {
        PlayerResult {
            player_id,
            display_name: name.into(),
            final_score: score,
            rank,
            badges: Vec::new(),
        }
    }

    fn result(game_type: GameType, at_secs: u64, players: Vec<PlayerResult>) -> GameResult {
        GameResult {
            room_id: Uuid::new_v4(),
            game_type,
            players,
            duration_seconds: 120,
            completed_at: SystemTime::UNIX_EPOCH + Duration::from_secs(at_secs),
        }
    }

    #[test]
    fn entries_are_sorted_with_gapless_ranks() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let results = vec![
            result(GameType::HistoricalTrivia, 10, vec![line(a, "a", 300, 1), line(b, "b", 100, 2)]),
            result(GameType::HistoricalTrivia, 20, vec![line(c, "c", 500, 1), line(a, "a", 100, 2)]),
            result(GameType::MapConquest, 30, vec![line(b, "b", 9000, 1)]),
        ];

        let entries = rank_results(&results, GameType::HistoricalTrivia, None, 10);
        let order: Vec<_> = entries.iter().map(|e| e.player_id).collect();
        assert_eq!(order, [c, a, b]);
        assert_eq!(entries.iter().map(|e| e.rank).collect::<Vec<_>>(), [1, 2, 3]);
        assert_eq!(entries[1].total_score, 400);
        assert_eq!(entries[1].games_played, 2);
        assert!((entries[1].win_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn ties_keep_earliest_qualifying_player_first() {
        let (early, late) = (Uuid::new_v4(), Uuid::new_v4());
        let results = vec![
            result(GameType::MapConquest, 50, vec![line(late, "late", 200, 1)]),
            result(GameType::MapConquest, 10, vec![line(early, "early", 200, 1)]),
        ];

        let entries = rank_results(&results, GameType::MapConquest, None, 10);
        assert_eq!(entries[0].player_id, early);
        assert_eq!(entries[1].rank, 2);
    }

    #[test]
    fn cutoff_and_limit_are_applied() {
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let results = vec![
            result(GameType::TimelinePuzzle, 10, vec![line(a, "a", 900, 1)]),
            result(GameType::TimelinePuzzle, 100, vec![line(b, "b", 200, 1), line(c, "c", 100, 2)]),
        ];
        let cutoff = SystemTime::UNIX_EPOCH + Duration::from_secs(50);

        let entries = rank_results(&results, GameType::TimelinePuzzle, Some(cutoff), 1);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].player_id, b);
    }

    #[test]
    fn period_cutoffs_follow_the_calendar() {
        let now = datetime!(2024-03-15 13:45:00 UTC);
        let at = |value: OffsetDateTime| Some(SystemTime::from(value));

        assert_eq!(period_cutoff(LeaderboardPeriod::AllTime, now), None);
        assert_eq!(
            period_cutoff(LeaderboardPeriod::Daily, now),
            at(datetime!(2024-03-15 00:00:00 UTC))
        );
        assert_eq!(
            period_cutoff(LeaderboardPeriod::Weekly, now),
            at(datetime!(2024-03-08 13:45:00 UTC))
        );
        assert_eq!(
            period_cutoff(LeaderboardPeriod::Monthly, now),
            at(datetime!(2024-03-01 00:00:00 UTC))
        );
    }
}
