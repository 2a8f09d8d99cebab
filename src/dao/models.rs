use std::{
    collections::{BTreeMap, BTreeSet},
    time::{Duration, SystemTime},
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{TimestampMilliSeconds, serde_as};
use utoipa::ToSchema;
use uuid::Uuid;

/// Kind of quiz played inside a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum GameType {
    TimelinePuzzle,
    MapConquest,
    CharacterMatching,
    HistoricalTrivia,
}

impl GameType {
    /// Every supported game type, in catalog order.
    pub const ALL: [GameType; 4] = [
        GameType::TimelinePuzzle,
        GameType::MapConquest,
        GameType::CharacterMatching,
        GameType::HistoricalTrivia,
    ];

    /// Wire name of the game type.
    pub fn as_str(&self) -> &'static str {
        match self {
            GameType::TimelinePuzzle => "timeline-puzzle",
            GameType::MapConquest => "map-conquest",
            GameType::CharacterMatching => "character-matching",
            GameType::HistoricalTrivia => "historical-trivia",
        }
    }
}

/// Question difficulty selected by the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

/// Lifecycle of a room. Transitions are monotonic: waiting, then playing, then finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Playing,
    Finished,
}

/// Settings chosen at room creation and snapshotted into the game state at start.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct RoomSettings {
    /// Seconds allowed per round.
    pub time_limit_seconds: u32,
    /// Number of rounds in a game.
    pub total_rounds: u32,
    pub difficulty: Difficulty,
    /// Maximum roster size.
    pub max_players: u32,
}

/// A participant inside a room.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    pub id: Uuid,
    pub display_name: String,
    /// Running total, only ever increased once the game has started.
    pub score: u32,
    pub is_host: bool,
    pub is_ready: bool,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub joined_at: SystemTime,
    #[serde(default)]
    pub is_finished: bool,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub finished_at: Option<SystemTime>,
    /// Badge ids awarded to this player. Set semantics keep each badge unique.
    #[serde(default)]
    pub achievements: BTreeSet<String>,
}

impl Player {
    /// Build a freshly joined player.
    pub fn new(display_name: String, is_host: bool, joined_at: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            display_name,
            score: 0,
            is_host,
            is_ready: is_host,
            joined_at,
            is_finished: false,
            finished_at: None,
            achievements: BTreeSet::new(),
        }
    }
}

/// Persisted room document, keyed by `room:{id}`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    pub id: Uuid,
    /// Six character uppercase alphanumeric join code.
    pub short_code: String,
    pub game_type: GameType,
    pub host_id: Uuid,
    /// Players in join order.
    pub players: Vec<Player>,
    pub max_players: u32,
    pub status: RoomStatus,
    pub settings: RoomSettings,
    pub current_round: u32,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub created_at: SystemTime,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub started_at: Option<SystemTime>,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub finished_at: Option<SystemTime>,
}

impl Room {
    /// Look up a player by id.
    pub fn player(&self, id: Uuid) -> Option<&Player> {
        self.players.iter().find(|player| player.id == id)
    }

    /// Look up a player by id for mutation.
    pub fn player_mut(&mut self, id: Uuid) -> Option<&mut Player> {
        self.players.iter_mut().find(|player| player.id == id)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players as usize
    }

    pub fn all_ready(&self) -> bool {
        self.players.iter().all(|player| player.is_ready)
    }

    pub fn all_finished(&self) -> bool {
        !self.players.is_empty() && self.players.iter().all(|player| player.is_finished)
    }

    /// Remove a player from the roster, promoting the longest-tenured remaining
    /// player when the host leaves. Returns the removed player, if any.
    pub fn remove_player(&mut self, id: Uuid) -> Option<Player> {
        let index = self.players.iter().position(|player| player.id == id)?;
        let removed = self.players.remove(index);

        if removed.is_host {
            if let Some(successor) = self
                .players
                .iter_mut()
                .min_by_key(|player| player.joined_at)
            {
                successor.is_host = true;
                self.host_id = successor.id;
            }
        }

        Some(removed)
    }
}

/// Progress of the current round as exposed to clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// Game not started yet.
    Idle,
    /// Answers are being accepted.
    Open,
    /// Every answer is in (or time ran out); results are shown until the round advances.
    Closing,
    /// Game is over.
    Finished,
}

/// Answer recorded for the current round.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerAnswer {
    pub player_id: Uuid,
    pub round: u32,
    /// Raw answer from the client; `None` marks a player who ran out of time.
    #[serde(default)]
    pub payload: Option<Value>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub submitted_at: SystemTime,
    pub is_correct: bool,
    pub points: u32,
}

impl PlayerAnswer {
    /// Zero-point entry recorded for players who did not answer before the deadline.
    pub fn missing(player_id: Uuid, round: u32, at: SystemTime) -> Self {
        Self {
            player_id,
            round,
            payload: None,
            submitted_at: at,
            is_correct: false,
            points: 0,
        }
    }
}

/// Per-room game progress, keyed by `gameState:{id}`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameState {
    pub room_id: Uuid,
    pub current_round: u32,
    pub total_rounds: u32,
    /// Seconds granted when the current round opened.
    pub time_remaining_seconds: u32,
    pub round_status: RoundStatus,
    #[serde_as(as = "Option<TimestampMilliSeconds<i64>>")]
    pub round_ends_at: Option<SystemTime>,
    /// Latest answer per player for the current round only.
    #[serde(default)]
    pub answers: IndexMap<Uuid, PlayerAnswer>,
    /// Settings captured when the game started.
    pub settings: RoomSettings,
}

impl GameState {
    /// Game state for a room still gathering players.
    pub fn waiting(room: &Room) -> Self {
        Self {
            room_id: room.id,
            current_round: 0,
            total_rounds: room.settings.total_rounds,
            time_remaining_seconds: room.settings.time_limit_seconds,
            round_status: RoundStatus::Idle,
            round_ends_at: None,
            answers: IndexMap::new(),
            settings: room.settings.clone(),
        }
    }

    /// Reset the game state for a freshly started game with round one open.
    pub fn started(room: &Room, now: SystemTime) -> Self {
        let mut state = Self::waiting(room);
        state.open_round(1, now);
        state
    }

    /// Open `round`, clearing answers and restarting the countdown.
    pub fn open_round(&mut self, round: u32, now: SystemTime) {
        let limit = self.settings.time_limit_seconds;
        self.current_round = round;
        self.time_remaining_seconds = limit;
        self.round_status = RoundStatus::Open;
        self.round_ends_at = Some(now + Duration::from_secs(u64::from(limit)));
        self.answers.clear();
    }

    /// Whole seconds left before the round deadline, rounded up.
    pub fn seconds_remaining(&self, now: SystemTime) -> u32 {
        let Some(ends_at) = self.round_ends_at else {
            return self.time_remaining_seconds;
        };
        match ends_at.duration_since(now) {
            Ok(left) => {
                let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
                secs.min(u64::from(self.time_remaining_seconds)) as u32
            }
            Err(_) => 0,
        }
    }

    /// Drop answers from players who are no longer in the roster.
    pub fn retain_roster(&mut self, room: &Room) {
        self.answers
            .retain(|player_id, _| room.player(*player_id).is_some());
    }
}

/// Final standing of one player in a finished game.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerResult {
    pub player_id: Uuid,
    pub display_name: String,
    pub final_score: u32,
    /// 1-based position in the final standings.
    pub rank: u32,
    /// Badges newly unlocked by this game.
    #[serde(default)]
    pub badges: Vec<String>,
}

/// Outcome of a finished room, keyed by `gameResult:{roomId}`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameResult {
    pub room_id: Uuid,
    pub game_type: GameType,
    pub players: Vec<PlayerResult>,
    pub duration_seconds: u64,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub completed_at: SystemTime,
}

impl GameResult {
    /// Result line for the given player.
    pub fn player(&self, id: Uuid) -> Option<&PlayerResult> {
        self.players.iter().find(|player| player.player_id == id)
    }
}

/// Cumulative history of a player across games, keyed by `playerStats:{playerId}`.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerStats {
    pub player_id: Uuid,
    pub display_name: String,
    pub total_score: u64,
    pub games_played: u32,
    pub wins: u32,
    pub best_score: u32,
    #[serde(default)]
    pub fastest_win_seconds: Option<u64>,
    #[serde(default)]
    pub wins_by_type: BTreeMap<GameType, u32>,
    /// Unlocked badge ids with their unlock time (milliseconds since epoch).
    #[serde_as(as = "BTreeMap<_, TimestampMilliSeconds<i64>>")]
    #[serde(default)]
    pub badges: BTreeMap<String, SystemTime>,
    #[serde_as(as = "TimestampMilliSeconds<i64>")]
    pub last_played: SystemTime,
}

impl PlayerStats {
    /// Empty history for a player seen for the first time.
    pub fn new(player_id: Uuid, display_name: String, now: SystemTime) -> Self {
        Self {
            player_id,
            display_name,
            total_score: 0,
            games_played: 0,
            wins: 0,
            best_score: 0,
            fastest_win_seconds: None,
            wins_by_type: BTreeMap::new(),
            badges: BTreeMap::new(),
            last_played: now,
        }
    }

    /// Fold a finished game into the history.
    pub fn record(&mut self, result: &GameResult, line: &PlayerResult) {
        self.display_name = line.display_name.clone();
        self.total_score += u64::from(line.final_score);
        self.games_played += 1;
        self.best_score = self.best_score.max(line.final_score);
        self.last_played = result.completed_at;

        if line.rank == 1 {
            self.wins += 1;
            *self.wins_by_type.entry(result.game_type).or_default() += 1;
            self.fastest_win_seconds = Some(
                self.fastest_win_seconds
                    .map_or(result.duration_seconds, |best| best.min(result.duration_seconds)),
            );
        }
    }

    /// Number of wins recorded for `game_type`.
    pub fn wins_in(&self, game_type: GameType) -> u32 {
        self.wins_by_type.get(&game_type).copied().unwrap_or(0)
    }

    /// Insert a badge, returning `false` when it was already unlocked.
    pub fn award(&mut self, badge_id: &str, at: SystemTime) -> bool {
        if self.badges.contains_key(badge_id) {
            return false;
        }
        self.badges.insert(badge_id.to_string(), at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RoomSettings {
        RoomSettings {
            time_limit_seconds: 30,
            total_rounds: 3,
            difficulty: Difficulty::Medium,
            max_players: 4,
        }
    }

    fn room_with(players: Vec<Player>) -> Room {
        let host_id = players[0].id;
        Room {
            id: Uuid::new_v4(),
            short_code: "ABC123".into(),
            game_type: GameType::HistoricalTrivia,
            host_id,
            players,
            max_players: 4,
            status: RoomStatus::Waiting,
            settings: settings(),
            current_round: 0,
            created_at: SystemTime::UNIX_EPOCH,
            started_at: None,
            finished_at: None,
        }
    }

    #[test]
    fn host_leaving_promotes_longest_tenured_player() {
        let base = SystemTime::UNIX_EPOCH;
        let host = Player::new("host".into(), true, base);
        let late = Player::new("late".into(), false, base + Duration::from_secs(20));
        let early = Player::new("early".into(), false, base + Duration::from_secs(10));
        let early_id = early.id;
        let mut room = room_with(vec![host.clone(), late, early]);

        room.remove_player(host.id).unwrap();

        assert_eq!(room.host_id, early_id);
        assert_eq!(room.players.iter().filter(|p| p.is_host).count(), 1);
        assert!(room.player(early_id).unwrap().is_host);
    }

    #[test]
    fn removing_non_host_keeps_host() {
        let base = SystemTime::UNIX_EPOCH;
        let host = Player::new("host".into(), true, base);
        let guest = Player::new("guest".into(), false, base);
        let mut room = room_with(vec![host.clone(), guest.clone()]);

        room.remove_player(guest.id).unwrap();

        assert_eq!(room.host_id, host.id);
        assert!(room.remove_player(guest.id).is_none());
    }

    #[test]
    fn seconds_remaining_rounds_up_and_saturates() {
        let room = room_with(vec![Player::new("host".into(), true, SystemTime::UNIX_EPOCH)]);
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100);
        let state = GameState::started(&room, now);

        assert_eq!(state.seconds_remaining(now), 30);
        assert_eq!(state.seconds_remaining(now + Duration::from_millis(500)), 30);
        assert_eq!(state.seconds_remaining(now + Duration::from_secs(29)), 1);
        assert_eq!(state.seconds_remaining(now + Duration::from_secs(31)), 0);
    }

    #[test]
    fn stats_award_is_idempotent() {
        let mut stats = PlayerStats::new(Uuid::new_v4(), "p".into(), SystemTime::UNIX_EPOCH);
        assert!(stats.award("first_win", SystemTime::UNIX_EPOCH));
        assert!(!stats.award("first_win", SystemTime::UNIX_EPOCH));
        assert_eq!(stats.badges.len(), 1);
    }

    #[test]
    fn room_roundtrips_through_json() {
        let room = room_with(vec![Player::new("host".into(), true, SystemTime::UNIX_EPOCH)]);
        let value = serde_json::to_value(&room).unwrap();
        assert_eq!(value["status"], "waiting");
        assert_eq!(value["game_type"], "historical-trivia");
        let back: Room = serde_json::from_value(value).unwrap();
        assert_eq!(back, room);
    }
}
