use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{dao::storage::StorageError, rules::RulesError};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend is unavailable.
    #[error("storage unavailable")]
    Unavailable(#[source] StorageError),
    /// Application is running in degraded mode without storage.
    #[error("storage unavailable (degraded mode)")]
    Degraded,
    /// Requested game was not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// A player acted in a game or on a turn that is not theirs.
    #[error("invalid player: {0}")]
    InvalidPlayer(String),
    /// The rules oracle rejected a candidate move.
    #[error("illegal move: {0}")]
    IllegalMove(String),
    /// The stored move history failed to replay; the record is damaged.
    #[error("corrupt game history: {0}")]
    InvalidHistory(String),
    /// The version check failed at write time. The caller holds an outdated
    /// snapshot and should resynchronize, not treat this as a rules error.
    #[error("the game advanced past this request; refresh and retry")]
    StaleUpdate,
    /// Operation cannot be performed in the game's current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ServiceError {
    /// Stable machine-readable code carried in WebSocket rejection frames.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unavailable(_) => "storage_unavailable",
            ServiceError::Degraded => "degraded",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::InvalidPlayer(_) => "invalid_player",
            ServiceError::IllegalMove(_) => "illegal_move",
            ServiceError::InvalidHistory(_) => "corrupt_history",
            ServiceError::StaleUpdate => "stale_update",
            ServiceError::InvalidState(_) => "invalid_state",
            ServiceError::InvalidInput(_) => "invalid_input",
        }
    }

    /// Whether the client should refetch the game snapshot before retrying.
    pub fn requires_resync(&self) -> bool {
        matches!(self, ServiceError::StaleUpdate)
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<RulesError> for ServiceError {
    fn from(err: RulesError) -> Self {
        match err {
            RulesError::InvalidHistory { .. } => ServiceError::InvalidHistory(err.to_string()),
            RulesError::IllegalMove { .. } => ServiceError::IllegalMove(err.to_string()),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(err: ValidationErrors) -> Self {
        ServiceError::InvalidInput(format!("validation failed: {err}"))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Service unavailable or degraded.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::Degraded => AppError::ServiceUnavailable("degraded mode".into()),
            ServiceError::NotFound(message) => AppError::NotFound(message),
            ServiceError::InvalidPlayer(message) => AppError::Unauthorized(message),
            ServiceError::IllegalMove(message) => AppError::BadRequest(message),
            ServiceError::InvalidHistory(message) => AppError::Internal(message),
            ServiceError::StaleUpdate => AppError::Conflict(ServiceError::StaleUpdate.to_string()),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
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
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_stale_updates_require_resync() {
        assert!(ServiceError::StaleUpdate.requires_resync());
        assert_eq!(ServiceError::StaleUpdate.code(), "stale_update");

        let illegal = ServiceError::IllegalMove("e2e5".into());
        assert!(!illegal.requires_resync());
        assert_eq!(illegal.code(), "illegal_move");
    }

    #[test]
    fn rules_errors_keep_their_category() {
        let history: ServiceError = RulesError::InvalidHistory {
            ply: 3,
            notation: "xx".into(),
        }
        .into();
        assert!(matches!(history, ServiceError::InvalidHistory(_)));

        let illegal: ServiceError = RulesError::IllegalMove {
            notation: "e2e5".into(),
        }
        .into();
        assert!(matches!(illegal, ServiceError::IllegalMove(_)));
    }
}
