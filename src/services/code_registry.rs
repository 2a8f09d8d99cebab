//! Short join codes and their mapping to room ids.

use rand::{Rng, rng};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::rooms::RoomRepository, dto::validation::ROOM_CODE_LEN, error::ServiceError,
    state::SharedState,
};

/// Characters a join code is drawn from.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Draw a code uniformly from [`CODE_ALPHABET`].
pub fn generate_code() -> String {
    let mut rng = rng();
    (0..ROOM_CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Canonical form of a user-typed code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

/// Whether `code` is already in canonical form.
pub fn is_canonical(code: &str) -> bool {
    code.len() == ROOM_CODE_LEN && code.bytes().all(|b| CODE_ALPHABET.contains(&b))
}

/// Claim an unused code for `room_id`, retrying on collision.
pub async fn reserve_code(
    state: &SharedState,
    repo: &RoomRepository,
    room_id: Uuid,
) -> Result<String, ServiceError> {
    let attempts = state.config().max_code_attempts;
    let _gate = state.code_gate().lock().await;

    for attempt in 1..=attempts {
        let code = generate_code();
        if repo.room_for_code(&code).await?.is_some() {
            debug!(attempt, code, "room code collision; drawing again");
            continue;
        }
        repo.save_code(&code, room_id).await?;
        return Ok(code);
    }

    warn!(attempts, room_id = %room_id, "exhausted room code attempts");
    Err(ServiceError::CodeSpaceExhausted(attempts))
}

/// Resolve a user-typed code to its room id.
pub async fn resolve_code(repo: &RoomRepository, code: &str) -> Result<Uuid, ServiceError> {
    let code = normalize_code(code);
    if !is_canonical(&code) {
        return Err(ServiceError::UnknownCode(code));
    }
    repo.room_for_code(&code)
        .await?
        .ok_or(ServiceError::UnknownCode(code))
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::*;
    use crate::{
        config::AppConfig, dao::room_store::memory::MemoryRoomStore, state::AppState,
    };

    #[test]
    fn generated_codes_are_canonical() {
        for _ in 0..200 {
            let code = generate_code();
            assert!(is_canonical(&code), "{code} is not canonical");
        }
    }

    #[test]
    fn normalization_uppercases_and_trims() {
        assert_eq!(normalize_code(" ab12cd "), "AB12CD");
        assert!(!is_canonical("ab12cd"));
    }

    #[tokio::test]
    async fn reserved_codes_resolve_case_insensitively() {
        let state = AppState::with_store(AppConfig::default(), Arc::new(MemoryRoomStore::new()));
        let repo = state.repository().await.unwrap();
        let room_id = Uuid::new_v4();

        let code = reserve_code(&state, &repo, room_id).await.unwrap();
        assert_eq!(
            resolve_code(&repo, &code.to_lowercase()).await.unwrap(),
            room_id
        );
        assert!(matches!(
            resolve_code(&repo, "ZZZ").await,
            Err(ServiceError::UnknownCode(_))
        ));
    }

    #[tokio::test]
    async fn reserved_codes_are_unique() {
        let state = AppState::with_store(AppConfig::default(), Arc::new(MemoryRoomStore::new()));
        let repo = state.repository().await.unwrap();

        let mut seen = HashSet::new();
        for _ in 0..50 {
            let code = reserve_code(&state, &repo, Uuid::new_v4()).await.unwrap();
            assert!(seen.insert(code));
        }
    }
}
