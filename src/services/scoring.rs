//! Final standings, game results, cumulative player statistics and badge awards.

use std::{cmp::Ordering, time::SystemTime};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameResult, GameState, Player, PlayerResult, PlayerStats, Room, RoomStatus, RoundStatus},
        rooms::RoomRepository,
    },
    error::ServiceError,
    services::{badges::evaluate_badges, notifier, round_service::load_room_and_game},
    state::{RoomGuard, RoomRuntime, RoundEvent, SharedState},
};

/// Mark a player as done with `final_score`; the room finishes once everyone is done.
///
/// The recorded score never decreases. Calls against an already finished room
/// are no-ops.
pub async fn record_player_finish(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
    final_score: u32,
) -> Result<Room, ServiceError> {
    let repo = state.repository().await?;
    let runtime = state.rooms().runtime(room_id);
    let gate = runtime.lock().await;

    let (mut room, game) = load_room_and_game(&repo, &runtime, room_id).await?;
    match room.status {
        RoomStatus::Waiting => return Err(ServiceError::NotPlaying(room_id)),
        RoomStatus::Finished => {
            debug!(room_id = %room_id, player_id = %player_id, "finish on finished room ignored");
            return Ok(room);
        }
        RoomStatus::Playing => {}
    }

    let player = room
        .player_mut(player_id)
        .ok_or_else(|| ServiceError::NotFound(format!("player {player_id}")))?;
    player.score = player.score.max(final_score);
    player.is_finished = true;
    player.finished_at.get_or_insert_with(SystemTime::now);
    debug!(room_id = %room_id, player_id = %player_id, score = player.score, "player finished");

    if room.all_finished() {
        return finalize_locked(state, &runtime, &gate, &repo, room, game).await;
    }

    repo.save_room(&room).await?;
    Ok(room)
}

fn standing(a: &Player, b: &Player) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.finished_at.is_none().cmp(&b.finished_at.is_none()))
        .then_with(|| a.finished_at.cmp(&b.finished_at))
        .then_with(|| a.joined_at.cmp(&b.joined_at))
}

/// Final standings: highest score first, then earliest finish, then earliest join.
pub fn rank_players(room: &Room) -> Vec<PlayerResult> {
    let mut players: Vec<&Player> = room.players.iter().collect();
    players.sort_by(|a, b| standing(a, b));
    players
        .into_iter()
        .enumerate()
        .map(|(index, player)| PlayerResult {
            player_id: player.id,
            display_name: player.display_name.clone(),
            final_score: player.score,
            rank: index as u32 + 1,
            badges: Vec::new(),
        })
        .collect()
}

fn build_result(room: &Room, now: SystemTime) -> GameResult {
    let started = room.started_at.unwrap_or(room.created_at);
    GameResult {
        room_id: room.id,
        game_type: room.game_type,
        players: rank_players(room),
        duration_seconds: now.duration_since(started).map(|d| d.as_secs()).unwrap_or(0),
        completed_at: now,
    }
}

/// Finish the game: freeze scores, persist the result, fold it into each
/// player's stats and award newly earned badges.
///
/// Runs at most once per room; a room already marked finished is returned as is.
pub(crate) async fn finalize_locked(
    state: &SharedState,
    runtime: &RoomRuntime,
    gate: &RoomGuard<'_>,
    repo: &RoomRepository,
    mut room: Room,
    mut game: GameState,
) -> Result<Room, ServiceError> {
    if room.status == RoomStatus::Finished {
        debug!(room_id = %room.id, "room already finalized");
        return Ok(room);
    }

    let now = SystemTime::now();
    room.status = RoomStatus::Finished;
    room.finished_at = Some(now);
    for player in &mut room.players {
        player.is_finished = true;
        player.finished_at.get_or_insert(now);
    }
    game.round_status = RoundStatus::Finished;
    game.round_ends_at = None;
    game.answers.clear();
    runtime.shutdown();

    let mut result = build_result(&room, now);
    let mut stats_updates = Vec::new();
    let recorded = repo.game_result(room.id).await?;
    let store_result = recorded.is_none();
    match recorded {
        Some(existing) => {
            warn!(room_id = %room.id, "game result already recorded; keeping stats untouched");
            result = existing;
        }
        None => {
            let mut awarded = Vec::with_capacity(result.players.len());
            for line in &result.players {
                let mut stats = repo
                    .player_stats(line.player_id)
                    .await?
                    .unwrap_or_else(|| PlayerStats::new(line.player_id, line.display_name.clone(), now));
                stats.record(&result, line);

                let badges = evaluate_badges(&stats, &result, line.player_id, &state.config().badges);
                for badge in &badges {
                    stats.award(badge, now);
                }
                if let Some(player) = room.player_mut(line.player_id) {
                    player
                        .achievements
                        .extend(badges.iter().map(|badge| badge.to_string()));
                }

                awarded.push(badges);
                stats_updates.push(stats);
            }
            for (line, badges) in result.players.iter_mut().zip(awarded) {
                line.badges = badges.into_iter().map(String::from).collect();
            }
        }
    }

    let (repo_ref, room_ref, game_ref, result_ref, stats_ref) =
        (repo, &room, &game, &result, &stats_updates);
    runtime
        .run_transition(gate, RoundEvent::Finalize, move || async move {
            if store_result {
                repo_ref.save_game_result(result_ref).await?;
            }
            for stats in stats_ref {
                repo_ref.save_player_stats(stats).await?;
            }
            repo_ref.save_room(room_ref).await?;
            repo_ref.save_game_state(game_ref).await?;
            Ok::<_, ServiceError>(())
        })
        .await?;
    runtime
        .run_transition(gate, RoundEvent::Finish, || async {
            Ok::<_, ServiceError>(())
        })
        .await?;
    runtime.retire();

    info!(
        room_id = %room.id,
        winner = ?result.players.first().map(|line| line.player_id),
        duration_seconds = result.duration_seconds,
        "game finalized"
    );
    notifier::room_updated(state, &room);
    Ok(room)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::services::{
        badges::{FIRST_WIN, SPEED_MASTER},
        room_service::{create_room, get_room},
        round_service::{SubmitOutcome, submit_answer},
        test_support::{create_request, settle, started_game, test_state},
    };

    fn player(name: &str, score: u32, joined_secs: u64) -> Player {
        let mut player = Player::new(
            name.into(),
            false,
            SystemTime::UNIX_EPOCH + Duration::from_secs(joined_secs),
        );
        player.score = score;
        player
    }

    #[test]
    fn ranking_breaks_ties_by_finish_then_join() {
        let mut slow = player("slow", 300, 1);
        slow.finished_at = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(50));
        let mut fast = player("fast", 300, 2);
        fast.finished_at = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(40));
        let top = player("top", 500, 3);
        let low = player("low", 100, 0);

        let room = Room {
            id: Uuid::new_v4(),
            short_code: "ABCDEF".into(),
            game_type: crate::dao::models::GameType::MapConquest,
            host_id: low.id,
            players: vec![low.clone(), slow.clone(), fast.clone(), top.clone()],
            max_players: 4,
            status: RoomStatus::Playing,
            settings: crate::config::AppConfig::default().default_settings,
            current_round: 1,
            created_at: SystemTime::UNIX_EPOCH,
            started_at: None,
            finished_at: None,
        };

        let ranked = rank_players(&room);
        let order: Vec<_> = ranked.iter().map(|line| line.display_name.as_str()).collect();
        assert_eq!(order, ["top", "fast", "slow", "low"]);
        let ranks: Vec<_> = ranked.iter().map(|line| line.rank).collect();
        assert_eq!(ranks, [1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn full_game_finishes_and_awards_first_win_once() {
        let state = test_state();
        let (room_id, host, guest) = started_game(&state).await;

        for round in 1..=3 {
            let first = submit_answer(&state, room_id, host, json!("right")).await.unwrap();
            assert!(matches!(first, SubmitOutcome::Accepted { round: r, .. } if r == round));
            submit_answer(&state, room_id, guest, json!("wrong")).await.unwrap();
            tokio::time::sleep(Duration::from_secs(4)).await;
            settle().await;
        }

        let room = get_room(&state, room_id).await.unwrap();
        assert_eq!(room.status, RoomStatus::Finished);
        assert!(room.finished_at.is_some());
        assert!(state.rooms().is_empty());
        assert!(room.players.iter().all(|p| p.is_finished));

        let winner = room.player(host).unwrap();
        let loser = room.player(guest).unwrap();
        assert!(winner.score > loser.score);
        assert_eq!(loser.score, 0);
        assert!(winner.achievements.contains(FIRST_WIN));
        assert!(loser.achievements.is_empty());

        let repo = state.repository().await.unwrap();
        let result = repo.game_result(room_id).await.unwrap().unwrap();
        assert_eq!(result.players[0].player_id, host);
        assert_eq!(result.players[0].rank, 1);
        assert_eq!(
            result.players[0]
                .badges
                .iter()
                .filter(|id| id.as_str() == FIRST_WIN)
                .count(),
            1
        );
        assert!(result.players[0].badges.iter().any(|id| id == SPEED_MASTER));
        assert!(result.players[1].badges.is_empty());

        let stats = repo.player_stats(host).await.unwrap().unwrap();
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.games_played, 1);
        assert!(stats.badges.contains_key(FIRST_WIN));
        let loser_stats = repo.player_stats(guest).await.unwrap().unwrap();
        assert_eq!(loser_stats.wins, 0);
        assert!(loser_stats.badges.is_empty());

        // Late calls leave the finished room untouched.
        let again = record_player_finish(&state, room_id, host, 9999).await.unwrap();
        assert_eq!(again, room);
        let dropped = submit_answer(&state, room_id, host, json!("right")).await.unwrap();
        assert!(matches!(dropped, SubmitOutcome::Dropped { .. }));
        assert_eq!(repo.player_stats(host).await.unwrap().unwrap().games_played, 1);
        assert!(state.rooms().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn room_finishes_when_every_player_reports() {
        let state = test_state();
        let (room_id, host, guest) = started_game(&state).await;

        let room = record_player_finish(&state, room_id, guest, 700).await.unwrap();
        assert_eq!(room.status, RoomStatus::Playing);
        assert!(room.player(guest).unwrap().is_finished);

        // Reported scores never lower the running total.
        let room = record_player_finish(&state, room_id, guest, 10).await.unwrap();
        assert_eq!(room.player(guest).unwrap().score, 700);

        let room = record_player_finish(&state, room_id, host, 200).await.unwrap();
        assert_eq!(room.status, RoomStatus::Finished);
        assert!(state.rooms().is_empty());

        let repo = state.repository().await.unwrap();
        let result = repo.game_result(room_id).await.unwrap().unwrap();
        assert_eq!(result.players[0].player_id, guest);
        assert_eq!(result.players[0].final_score, 700);
        assert!(room.player(guest).unwrap().achievements.contains(FIRST_WIN));
    }

    #[tokio::test]
    async fn finishing_before_start_is_rejected() {
        let state = test_state();
        let created = create_room(&state, create_request("Ada", None)).await.unwrap();

        let err = record_player_finish(&state, created.room_id, created.host_player_id, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotPlaying(_)));
    }
}
