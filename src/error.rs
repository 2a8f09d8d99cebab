use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;
use validator::ValidationErrors;

use crate::{
    dao::storage::StorageError,
    state::{AbortError, ApplyError, PlanError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Requested room or player was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// No live room uses this join code.
    #[error("unknown room code `{0}`")]
    UnknownCode(String),
    #[error("room {0} is full")]
    RoomFull(Uuid),
    /// Another player in the room already uses this display name.
    #[error("player name `{0}` is already taken in this room")]
    DuplicateName(String),
    /// Join or readiness change attempted after the game started.
    #[error("room {0} is no longer waiting for players")]
    NotWaiting(Uuid),
    /// Only the host may start the game.
    #[error("player {0} is not the host")]
    NotHost(Uuid),
    #[error("not every player is ready")]
    NotAllReady,
    #[error("at least {required} players are needed, room has {actual}")]
    InsufficientPlayers { required: usize, actual: usize },
    /// Gameplay operation attempted before the game started.
    #[error("room {0} has not started playing")]
    NotPlaying(Uuid),
    /// Every join code drawn was already taken.
    #[error("could not allocate a unique room code after {0} attempt(s)")]
    CodeSpaceExhausted(u32),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Operation exceeded its timeout limit.
    #[error("operation timed out")]
    Timeout,
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Caller is not allowed to perform the operation.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let message = err.to_string();
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::Timeout | ServiceError::CodeSpaceExhausted(_) => {
                AppError::ServiceUnavailable(message)
            }
            ServiceError::NotFound(_) | ServiceError::UnknownCode(_) => AppError::NotFound(message),
            ServiceError::NotHost(_) => AppError::Forbidden(message),
            ServiceError::InvalidInput(_) => AppError::BadRequest(message),
            ServiceError::RoomFull(_)
            | ServiceError::DuplicateName(_)
            | ServiceError::NotWaiting(_)
            | ServiceError::NotAllReady
            | ServiceError::InsufficientPlayers { .. }
            | ServiceError::NotPlaying(_)
            | ServiceError::InvalidState(_) => AppError::Conflict(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("round transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => {
                ServiceError::InvalidState(invalid.to_string())
            }
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => ServiceError::InvalidState(format!(
                "round phase changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => {
                ServiceError::InvalidState(format!(
                    "round version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::InvalidState("transition plan does not match".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;

    fn status_of(err: ServiceError) -> StatusCode {
        AppError::from(err).into_response().status()
    }

    #[test]
    fn service_errors_map_to_http_statuses() {
        let id = Uuid::new_v4();
        assert_eq!(status_of(ServiceError::NotFound("room".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ServiceError::UnknownCode("ABCDEF".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_of(ServiceError::RoomFull(id)), StatusCode::CONFLICT);
        assert_eq!(
            status_of(ServiceError::DuplicateName("Ada".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(ServiceError::NotHost(id)), StatusCode::FORBIDDEN);
        assert_eq!(
            status_of(ServiceError::InsufficientPlayers { required: 2, actual: 1 }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_of(ServiceError::Degraded), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            status_of(ServiceError::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
    }
}
