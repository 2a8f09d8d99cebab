pub mod round_machine;
pub mod rooms;
mod sse;

use std::{sync::Arc, time::Duration};

use tokio::sync::{Mutex, RwLock};

use crate::{
    config::AppConfig,
    dao::{room_store::RoomStore, rooms::RoomRepository},
    error::ServiceError,
    services::questions::{QuestionBank, StaticQuestionBank},
};

pub use self::rooms::{RoomGuard, RoomRegistry, RoomRuntime};
pub use self::round_machine::{
    AbortError, ApplyError, CloseReason, PlanError, RoundEvent, RoundPhase, Snapshot,
};
pub use self::sse::SseHub;

pub type SharedState = Arc<AppState>;
pub const DEFAULT_TRANSITION_TIMEOUT: Duration = Duration::from_secs(5);
const LOBBY_CAPACITY: usize = 64;

/// Central application state: the store handle, per-room runtimes and the lobby stream.
pub struct AppState {
    room_store: RwLock<Option<Arc<dyn RoomStore>>>,
    lobby: SseHub,
    rooms: RoomRegistry,
    code_gate: Mutex<()>,
    questions: Arc<dyn QuestionBank>,
    config: AppConfig,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::build(config, None)
    }

    /// Construct a state with `store` already installed.
    pub fn with_store(config: AppConfig, store: Arc<dyn RoomStore>) -> SharedState {
        Self::build(config, Some(store))
    }

    fn build(config: AppConfig, store: Option<Arc<dyn RoomStore>>) -> SharedState {
        let questions = Arc::new(StaticQuestionBank::new(config.questions.clone()));
        Arc::new(Self {
            room_store: RwLock::new(store),
            lobby: SseHub::new(LOBBY_CAPACITY),
            rooms: RoomRegistry::new(Some(DEFAULT_TRANSITION_TIMEOUT)),
            code_gate: Mutex::new(()),
            questions,
            config,
        })
    }

    /// Obtain a handle to the current room store, if one is installed.
    pub async fn room_store(&self) -> Option<Arc<dyn RoomStore>> {
        let guard = self.room_store.read().await;
        guard.as_ref().cloned()
    }

    /// Typed repository over the installed store; fails in degraded mode.
    pub async fn repository(&self) -> Result<RoomRepository, ServiceError> {
        self.room_store()
            .await
            .map(RoomRepository::new)
            .ok_or(ServiceError::Degraded)
    }

    /// Install a new room store implementation and leave degraded mode.
    pub async fn install_room_store(&self, store: Arc<dyn RoomStore>) {
        let mut guard = self.room_store.write().await;
        *guard = Some(store);
    }

    /// Remove the current room store and enter degraded mode.
    pub async fn clear_room_store(&self) {
        let mut guard = self.room_store.write().await;
        guard.take();
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.room_store.read().await;
        guard.is_none()
    }

    /// Broadcast hub used for the lobby SSE stream.
    pub fn lobby(&self) -> &SseHub {
        &self.lobby
    }

    /// Runtimes of the rooms coordinated by this process.
    pub fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    /// Serialises join-code reservation so two rooms never claim the same code.
    pub fn code_gate(&self) -> &Mutex<()> {
        &self.code_gate
    }

    pub fn questions(&self) -> &dyn QuestionBank {
        self.questions.as_ref()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}
