//! Round synchronisation: answer collection, completion detection, the round
//! clock and the delayed advancement to the next round.
//!
//! All mutations of a room happen under its runtime gate. The round state
//! machine acts as the advancement lease: once a round is `RoundClosing`, a
//! second close for it is rejected, so only one advancement is ever scheduled.

use std::time::{Duration, SystemTime};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{GameState, PlayerAnswer, Room, RoomStatus, RoundStatus},
        rooms::RoomRepository,
    },
    dto::room::SubmitAnswerResponse,
    error::ServiceError,
    services::{questions::score_answer, scoring},
    state::{CloseReason, RoomGuard, RoomRuntime, RoundEvent, RoundPhase, SharedState},
};

/// What happened to a submitted answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Recorded for the open round.
    Accepted {
        round: u32,
        is_correct: bool,
        points: u32,
        /// The answer completed the round.
        round_complete: bool,
    },
    /// The round had already closed; the answer was ignored.
    Dropped { round: u32 },
}

impl From<SubmitOutcome> for SubmitAnswerResponse {
    fn from(outcome: SubmitOutcome) -> Self {
        match outcome {
            SubmitOutcome::Accepted {
                round,
                is_correct,
                points,
                round_complete,
            } => Self {
                accepted: true,
                round,
                is_correct: Some(is_correct),
                points: Some(points),
                round_complete,
            },
            SubmitOutcome::Dropped { round } => Self {
                accepted: false,
                round,
                is_correct: None,
                points: None,
                round_complete: false,
            },
        }
    }
}

/// Load a room under its gate. A room that is gone or finished retires its runtime.
pub(crate) async fn load_room(
    repo: &RoomRepository,
    runtime: &RoomRuntime,
    room_id: Uuid,
) -> Result<Room, ServiceError> {
    match repo.room(room_id).await? {
        Some(room) => {
            if room.status == RoomStatus::Finished {
                runtime.retire();
            }
            Ok(room)
        }
        None => {
            runtime.retire();
            Err(ServiceError::NotFound(format!("room {room_id}")))
        }
    }
}

/// Load a room together with its game state.
pub(crate) async fn load_room_and_game(
    repo: &RoomRepository,
    runtime: &RoomRuntime,
    room_id: Uuid,
) -> Result<(Room, GameState), ServiceError> {
    let room = load_room(repo, runtime, room_id).await?;
    let game = repo
        .game_state(room_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("game state for room {room_id}")))?;
    Ok((room, game))
}

/// Record `player_id`'s answer for the open round, replacing any earlier one.
///
/// Answers arriving after the round closed are dropped rather than rejected.
pub async fn submit_answer(
    state: &SharedState,
    room_id: Uuid,
    player_id: Uuid,
    payload: Value,
) -> Result<SubmitOutcome, ServiceError> {
    let repo = state.repository().await?;
    let runtime = state.rooms().runtime(room_id);
    let gate = runtime.lock().await;

    let (room, mut game) = load_room_and_game(&repo, &runtime, room_id).await?;
    match room.status {
        RoomStatus::Waiting => return Err(ServiceError::NotPlaying(room_id)),
        RoomStatus::Finished => {
            debug!(room_id = %room_id, player_id = %player_id, "answer after game end dropped");
            return Ok(SubmitOutcome::Dropped {
                round: game.current_round,
            });
        }
        RoomStatus::Playing => {}
    }
    if room.player(player_id).is_none() {
        return Err(ServiceError::NotFound(format!("player {player_id}")));
    }

    resume_if_needed(state, &runtime, &gate, &game).await?;

    let round = game.current_round;
    if !runtime.phase().await.is_open(round) {
        debug!(room_id = %room_id, player_id = %player_id, round, "late answer dropped");
        return Ok(SubmitOutcome::Dropped { round });
    }

    let now = SystemTime::now();
    let key = state.questions().answer_key(room.game_type, round);
    let scored = score_answer(key.as_ref(), &payload, game.seconds_remaining(now));
    game.answers.insert(
        player_id,
        PlayerAnswer {
            player_id,
            round,
            payload: Some(payload),
            submitted_at: now,
            is_correct: scored.is_correct,
            points: scored.points,
        },
    );
    repo.save_game_state(&game).await?;
    debug!(
        room_id = %room_id,
        player_id = %player_id,
        round,
        correct = scored.is_correct,
        answered = game.answers.len(),
        roster = room.players.len(),
        "answer recorded"
    );

    let round_complete = close_if_complete(state, &runtime, &gate, &repo, &room, game).await?;
    Ok(SubmitOutcome::Accepted {
        round,
        is_correct: scored.is_correct,
        points: scored.points,
        round_complete,
    })
}

/// Re-run completion detection for a room. Returns whether this call closed the round.
pub async fn check_round_completion(
    state: &SharedState,
    room_id: Uuid,
) -> Result<bool, ServiceError> {
    let repo = state.repository().await?;
    let runtime = state.rooms().runtime(room_id);
    let gate = runtime.lock().await;

    let (room, game) = load_room_and_game(&repo, &runtime, room_id).await?;
    if room.status != RoomStatus::Playing {
        return Ok(false);
    }
    resume_if_needed(state, &runtime, &gate, &game).await?;
    close_if_complete(state, &runtime, &gate, &repo, &room, game).await
}

/// Close the open round when every player of the current roster has answered.
pub(crate) async fn close_if_complete(
    state: &SharedState,
    runtime: &RoomRuntime,
    gate: &RoomGuard<'_>,
    repo: &RoomRepository,
    room: &Room,
    game: GameState,
) -> Result<bool, ServiceError> {
    if !runtime.phase().await.is_open(game.current_round) {
        return Ok(false);
    }

    let answered = game
        .answers
        .keys()
        .filter(|player_id| room.player(**player_id).is_some())
        .count();
    if room.players.is_empty() || answered < room.players.len() {
        return Ok(false);
    }

    close_round(state, runtime, gate, repo, room, game, CloseReason::AllAnswered).await?;
    Ok(true)
}

async fn close_round(
    state: &SharedState,
    runtime: &RoomRuntime,
    gate: &RoomGuard<'_>,
    repo: &RoomRepository,
    room: &Room,
    mut game: GameState,
    reason: CloseReason,
) -> Result<(), ServiceError> {
    let round = game.current_round;
    if reason == CloseReason::TimedOut {
        let now = SystemTime::now();
        for player in &room.players {
            game.answers
                .entry(player.id)
                .or_insert_with(|| PlayerAnswer::missing(player.id, round, now));
        }
    }
    game.round_status = RoundStatus::Closing;
    game.round_ends_at = None;

    let (repo_ref, game_ref) = (repo, &game);
    runtime
        .run_transition(gate, RoundEvent::Close(reason), move || async move {
            repo_ref
                .save_game_state(game_ref)
                .await
                .map_err(ServiceError::from)
        })
        .await?;

    runtime.cancel_clock();
    schedule_advance(state, runtime, round);
    info!(room_id = %room.id, round, reason = ?reason, "round closed");
    Ok(())
}

/// Arm the countdown for `round`; expiry force-closes the round.
pub(crate) fn arm_round_clock(state: &SharedState, runtime: &RoomRuntime, round: u32, seconds: u32) {
    let state_task = state.clone();
    let room_id = runtime.room_id();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(u64::from(seconds))).await;
        if let Err(err) = expire_round(&state_task, room_id, round).await {
            warn!(room_id = %room_id, round, error = %err, "failed to close timed-out round");
        }
    });
    runtime.arm_clock(handle);
}

async fn expire_round(state: &SharedState, room_id: Uuid, round: u32) -> Result<(), ServiceError> {
    let Some(runtime) = state.rooms().get(room_id) else {
        return Ok(());
    };
    let gate = runtime.lock().await;
    if !runtime.phase().await.is_open(round) {
        debug!(room_id = %room_id, round, "round clock fired after close");
        return Ok(());
    }

    let repo = state.repository().await?;
    let (room, game) = load_room_and_game(&repo, &runtime, room_id).await?;
    if game.current_round != round {
        return Ok(());
    }
    info!(room_id = %room_id, round, "round timed out");
    close_round(state, &runtime, &gate, &repo, &room, game, CloseReason::TimedOut).await
}

fn schedule_advance(state: &SharedState, runtime: &RoomRuntime, round: u32) {
    let state_task = state.clone();
    let room_id = runtime.room_id();
    let grace = state.config().round_grace;
    let handle = tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        if let Err(err) = advance_round(&state_task, room_id, round).await {
            warn!(room_id = %room_id, round, error = %err, "failed to advance round");
        }
    });
    runtime.arm_advance(handle);
}

/// Commit a closed round: credit its points, then open the next round or finalize.
///
/// Does nothing unless `round` is the round currently closing, so repeated
/// calls advance at most once.
pub async fn advance_round(
    state: &SharedState,
    room_id: Uuid,
    round: u32,
) -> Result<(), ServiceError> {
    let Some(runtime) = state.rooms().get(room_id) else {
        return Ok(());
    };
    let gate = runtime.lock().await;
    match runtime.phase().await {
        RoundPhase::RoundClosing { round: closing, .. } if closing == round => {}
        phase => {
            debug!(room_id = %room_id, round, phase = ?phase, "advance skipped");
            return Ok(());
        }
    }

    let repo = state.repository().await?;
    let (mut room, mut game) = load_room_and_game(&repo, &runtime, room_id).await?;
    for answer in game.answers.values() {
        if let Some(player) = room.player_mut(answer.player_id) {
            player.score = player.score.saturating_add(answer.points);
        }
    }

    if round >= game.total_rounds {
        scoring::finalize_locked(state, &runtime, &gate, &repo, room, game).await?;
        return Ok(());
    }

    let next = round + 1;
    game.open_round(next, SystemTime::now());
    room.current_round = next;

    let (repo_ref, room_ref, game_ref) = (&repo, &room, &game);
    runtime
        .run_transition(&gate, RoundEvent::Advance, move || async move {
            repo_ref.save_room(room_ref).await?;
            repo_ref.save_game_state(game_ref).await?;
            Ok::<_, ServiceError>(())
        })
        .await?;

    arm_round_clock(state, &runtime, next, game.settings.time_limit_seconds);
    info!(room_id = %room_id, round = next, total = game.total_rounds, "round opened");
    Ok(())
}

/// Rebuild the round phase of a game that was started by an earlier process.
///
/// An open round gets its clock back with the time left; a round caught in its
/// grace window reschedules the advancement.
async fn resume_if_needed(
    state: &SharedState,
    runtime: &RoomRuntime,
    gate: &RoomGuard<'_>,
    game: &GameState,
) -> Result<(), ServiceError> {
    if runtime.phase().await != RoundPhase::Idle || game.current_round == 0 {
        return Ok(());
    }

    let round = game.current_round;
    match game.round_status {
        RoundStatus::Open => {
            runtime
                .run_transition(gate, RoundEvent::Resume { round }, || async {
                    Ok::<_, ServiceError>(())
                })
                .await?;
            arm_round_clock(state, runtime, round, game.seconds_remaining(SystemTime::now()));
            info!(room_id = %game.room_id, round, "resumed open round from store");
        }
        RoundStatus::Closing => {
            runtime
                .run_transition(gate, RoundEvent::ResumeClosing { round }, || async {
                    Ok::<_, ServiceError>(())
                })
                .await?;
            schedule_advance(state, runtime, round);
            info!(room_id = %game.room_id, round, "resumed closing round from store");
        }
        RoundStatus::Idle | RoundStatus::Finished => {}
    }
    Ok(())
}

/// Take over every game in progress found in the store. Returns how many rooms
/// were checked; rooms this process already drives are left alone.
pub async fn resume_active_rooms(state: &SharedState) -> Result<usize, ServiceError> {
    let repo = state.repository().await?;
    let playing: Vec<Uuid> = repo
        .rooms()
        .await?
        .into_iter()
        .filter(|room| room.status == RoomStatus::Playing)
        .map(|room| room.id)
        .collect();

    for &room_id in &playing {
        let runtime = state.rooms().runtime(room_id);
        let gate = runtime.lock().await;
        let resumed = match load_room_and_game(&repo, &runtime, room_id).await {
            Ok((room, game)) if room.status == RoomStatus::Playing => {
                resume_if_needed(state, &runtime, &gate, &game).await
            }
            Ok(_) => Ok(()),
            Err(err) => Err(err),
        };
        if let Err(err) = resumed {
            warn!(room_id = %room_id, error = %err, "failed to resume room");
        }
    }

    if !playing.is_empty() {
        info!(rooms = playing.len(), "resumed games in progress");
    }
    Ok(playing.len())
}
