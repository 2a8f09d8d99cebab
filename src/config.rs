//! Application-level configuration loading: round timing, default room settings,
//! badge thresholds and the built-in answer keys.

use std::{collections::BTreeMap, env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::{
    dao::models::{Difficulty, GameType, RoomSettings},
    services::questions::AnswerKey,
};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUIZ_ARENA_CONFIG_PATH";

const DEFAULT_ROUND_GRACE_MS: u64 = 3000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
const DEFAULT_MAX_CODE_ATTEMPTS: u32 = 32;

/// Thresholds used by the badge rules.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BadgeThresholds {
    /// Final score needed for `perfect_score`.
    pub perfect_score: u32,
    /// A win faster than this many seconds earns `speed_master`.
    pub speed_seconds: u64,
    /// Wins in one game type needed for the category badges.
    pub category_wins: u32,
    /// Total wins needed for `history_master`.
    pub master_wins: u32,
}

impl Default for BadgeThresholds {
    fn default() -> Self {
        Self {
            perfect_score: 1000,
            speed_seconds: 60,
            category_wins: 5,
            master_wins: 10,
        }
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Delay between a round closing and the next one opening.
    pub round_grace: Duration,
    /// Re-read interval for polling subscriptions.
    pub poll_interval: Duration,
    /// Settings applied when a room is created without explicit values.
    pub default_settings: RoomSettings,
    /// Attempts made to draw an unused join code before giving up.
    pub max_code_attempts: u32,
    pub badges: BadgeThresholds,
    /// Answer keys per game type, cycled by round number.
    pub questions: BTreeMap<GameType, Vec<AnswerKey>>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        question_sets = app_config.questions.len(),
                        grace_ms = app_config.round_grace.as_millis(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            round_grace: Duration::from_millis(DEFAULT_ROUND_GRACE_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            default_settings: default_settings(),
            max_code_attempts: DEFAULT_MAX_CODE_ATTEMPTS,
            badges: BadgeThresholds::default(),
            questions: default_questions(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    round_grace_ms: Option<u64>,
    poll_interval_ms: Option<u64>,
    default_settings: Option<RoomSettings>,
    max_code_attempts: Option<u32>,
    #[serde(default)]
    badges: BadgeThresholds,
    /// Missing game types keep their built-in keys.
    #[serde(default)]
    questions: BTreeMap<GameType, Vec<AnswerKey>>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let mut questions = default_questions();
        questions.extend(value.questions.into_iter().filter(|(_, keys)| !keys.is_empty()));

        Self {
            round_grace: Duration::from_millis(value.round_grace_ms.unwrap_or(DEFAULT_ROUND_GRACE_MS)),
            poll_interval: Duration::from_millis(
                value.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS).max(1),
            ),
            default_settings: value.default_settings.unwrap_or_else(default_settings),
            max_code_attempts: value
                .max_code_attempts
                .unwrap_or(DEFAULT_MAX_CODE_ATTEMPTS)
                .max(1),
            badges: value.badges,
            questions,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn default_settings() -> RoomSettings {
    RoomSettings {
        time_limit_seconds: 30,
        total_rounds: 10,
        difficulty: Difficulty::Medium,
        max_players: 8,
    }
}

/// Built-in answer keys shipped with the binary.
fn default_questions() -> BTreeMap<GameType, Vec<AnswerKey>> {
    let keys = |answers: &[serde_json::Value]| {
        answers
            .iter()
            .map(|answer| AnswerKey::new(answer.clone(), 100))
            .collect::<Vec<_>>()
    };

    BTreeMap::from([
        (
            GameType::HistoricalTrivia,
            keys(&[json!("1945"), json!("Ngo Quyen"), json!("Thang Long"), json!("1802")]),
        ),
        (
            GameType::TimelinePuzzle,
            keys(&[json!([938, 1010, 1288, 1428]), json!([1802, 1858, 1945, 1954])]),
        ),
        (
            GameType::MapConquest,
            keys(&[json!("Bach Dang"), json!("Dien Bien Phu"), json!("Chi Lang")]),
        ),
        (
            GameType::CharacterMatching,
            keys(&[json!("Tran Hung Dao"), json!("Le Loi"), json!("Quang Trung")]),
        ),
    ])
}
