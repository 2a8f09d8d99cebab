use axum::Router;

use crate::state::SharedState;

pub mod docs;
pub mod health;
pub mod leaderboard;
pub mod rooms;
pub mod sse;

/// Assemble the full HTTP surface and bind it to the shared application state.
pub fn router(state: SharedState) -> Router<()> {
    Router::new()
        .merge(health::router())
        .merge(rooms::router())
        .merge(leaderboard::router())
        .merge(sse::router())
        .merge(docs::router())
        .with_state(state)
}
