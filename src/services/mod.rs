/// Badge catalog and the pure award rules.
pub mod badges;
/// Short join codes and their mapping to rooms.
pub mod code_registry;
/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Time-windowed leaderboards and player statistics.
pub mod leaderboard_service;
/// Room and game-state fan-out to SSE clients.
pub mod notifier;
/// Answer keys and per-answer scoring.
pub mod questions;
/// Room creation, membership, readiness and game start.
pub mod room_service;
/// Answer collection, round clock and round advancement.
pub mod round_service;
/// Final standings, results and badge awards.
pub mod scoring;
/// Server-Sent Events streaming helpers.
pub mod sse_service;
/// Room store connection supervisor.
pub mod storage_supervisor;

#[cfg(test)]
pub(crate) mod test_support;
