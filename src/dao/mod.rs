/// Persisted record shapes.
pub mod models;
/// Key-value store abstraction and its backends.
pub mod room_store;
/// Typed repository over the room store.
pub mod rooms;
/// Storage abstraction layer for database operations.
pub mod storage;
