//! Answer keys and per-answer scoring.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::models::GameType;

/// Bonus awarded for every whole second left on the round clock.
pub const TIME_BONUS_PER_SECOND: u32 = 2;

/// Expected answer and base points for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerKey {
    pub correct_answer: Value,
    pub points: u32,
}

impl AnswerKey {
    pub fn new(correct_answer: Value, points: u32) -> Self {
        Self {
            correct_answer,
            points,
        }
    }

    /// Whether `payload` matches the key. Text is compared trimmed and case-insensitively,
    /// numbers by value, arrays element by element.
    pub fn accepts(&self, payload: &Value) -> bool {
        values_match(&self.correct_answer, payload)
    }
}

fn values_match(expected: &Value, given: &Value) -> bool {
    match (expected, given) {
        (Value::String(a), Value::String(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        (Value::Number(a), Value::String(b)) | (Value::String(b), Value::Number(a)) => {
            b.trim().parse::<f64>().ok() == a.as_f64()
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_match(x, y))
        }
        (a, b) => a == b,
    }
}

/// Source of answer keys (external quiz content).
pub trait QuestionBank: Send + Sync {
    /// Key for `round` (1-based) of a `game_type` game, if one exists.
    fn answer_key(&self, game_type: GameType, round: u32) -> Option<AnswerKey>;
}

/// Question bank backed by a fixed list of keys per game type, cycled by round.
pub struct StaticQuestionBank {
    keys: BTreeMap<GameType, Vec<AnswerKey>>,
}

impl StaticQuestionBank {
    pub fn new(keys: BTreeMap<GameType, Vec<AnswerKey>>) -> Self {
        Self { keys }
    }
}

impl QuestionBank for StaticQuestionBank {
    fn answer_key(&self, game_type: GameType, round: u32) -> Option<AnswerKey> {
        let keys = self.keys.get(&game_type)?;
        if keys.is_empty() || round == 0 {
            return None;
        }
        let index = (round as usize - 1) % keys.len();
        keys.get(index).cloned()
    }
}

/// Correctness and points computed for one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScoredAnswer {
    pub is_correct: bool,
    pub points: u32,
}

/// Score a submission: base points plus the time bonus when correct, zero otherwise.
pub fn score_answer(key: Option<&AnswerKey>, payload: &Value, seconds_remaining: u32) -> ScoredAnswer {
    match key {
        Some(key) if key.accepts(payload) => ScoredAnswer {
            is_correct: true,
            points: key.points + seconds_remaining * TIME_BONUS_PER_SECOND,
        },
        _ => ScoredAnswer {
            is_correct: false,
            points: 0,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_answers_ignore_case_and_whitespace() {
        let key = AnswerKey::new(json!("Dien Bien Phu"), 100);
        assert!(key.accepts(&json!("  dien bien phu ")));
        assert!(!key.accepts(&json!("Bach Dang")));
    }

    #[test]
    fn numeric_answers_accept_numeric_strings() {
        let key = AnswerKey::new(json!(1945), 100);
        assert!(key.accepts(&json!(1945)));
        assert!(key.accepts(&json!("1945")));
        assert!(!key.accepts(&json!(1954)));
    }

    #[test]
    fn ordering_answers_compare_element_wise() {
        let key = AnswerKey::new(json!([938, 1010, 1288]), 100);
        assert!(key.accepts(&json!([938, 1010, 1288])));
        assert!(!key.accepts(&json!([1010, 938, 1288])));
        assert!(!key.accepts(&json!([938, 1010])));
    }

    #[test]
    fn correct_answers_earn_time_bonus() {
        let key = AnswerKey::new(json!("x"), 100);
        assert_eq!(
            score_answer(Some(&key), &json!("x"), 12),
            ScoredAnswer {
                is_correct: true,
                points: 124
            }
        );
        assert_eq!(score_answer(Some(&key), &json!("y"), 12).points, 0);
        assert_eq!(score_answer(None, &json!("x"), 12).points, 0);
    }

    #[test]
    fn static_bank_cycles_by_round() {
        let bank = StaticQuestionBank::new(BTreeMap::from([(
            GameType::MapConquest,
            vec![AnswerKey::new(json!("a"), 1), AnswerKey::new(json!("b"), 2)],
        )]));

        assert_eq!(bank.answer_key(GameType::MapConquest, 1).unwrap().points, 1);
        assert_eq!(bank.answer_key(GameType::MapConquest, 2).unwrap().points, 2);
        assert_eq!(bank.answer_key(GameType::MapConquest, 3).unwrap().points, 1);
        assert!(bank.answer_key(GameType::MapConquest, 0).is_none());
        assert!(bank.answer_key(GameType::HistoricalTrivia, 1).is_none());
    }
}
