use crate::service::match_state_store::MatchStateError;
use crate::service::sync_fault::SyncFault;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Deltas from sequence {requested} are no longer buffered (oldest is {oldest})")]
    Gone { requested: u64, oldest: u64 },

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    RedisError(String),

    #[error("Journal error: {0}")]
    JournalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Gone { .. } => StatusCode::GONE,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::DatabaseError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::RedisError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::JournalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
        }
    }
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
    pub details: Option<String>,
    /// Set on 410 so pollers know where the replay buffer now starts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_sequence: Option<u64>,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        self.status()
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status();
        let message = match self {
            ApiError::DatabaseError(_) => "Database error".to_string(),
            ApiError::RedisError(_) => "Cache error".to_string(),
            ApiError::JournalError(_) => "Journal error".to_string(),
            _ => self.to_string(),
        };

        let error_response = ErrorResponse {
            error: message,
            code: status.as_u16(),
            details: Some(self.to_string()),
            oldest_sequence: match self {
                ApiError::Gone { oldest, .. } => Some(*oldest),
                _ => None,
            },
        };

        HttpResponse::build(status).json(error_response)
    }
}

impl From<MatchStateError> for ApiError {
    fn from(err: MatchStateError) -> Self {
        match err {
            MatchStateError::InvalidMapIndex { .. } => ApiError::NotFound(err.to_string()),
            MatchStateError::UnknownPlayer(_) => ApiError::Unprocessable(err.to_string()),
            MatchStateError::InvalidState(_)
            | MatchStateError::InvalidTransition { .. }
            | MatchStateError::MatchCompleted => ApiError::Conflict(err.to_string()),
            MatchStateError::Journal(message) => ApiError::JournalError(message),
        }
    }
}

impl From<SyncFault> for ApiError {
    fn from(fault: SyncFault) -> Self {
        match fault {
            SyncFault::BackfillUnavailable { requested, oldest } => {
                ApiError::Gone { requested, oldest }
            }
            other => ApiError::Conflict(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn test_store_errors_map_to_statuses() {
        let cases = [
            (
                MatchStateError::InvalidMapIndex {
                    index: 4,
                    map_count: 3,
                },
                StatusCode::NOT_FOUND,
            ),
            (MatchStateError::UnknownPlayer(9), StatusCode::UNPROCESSABLE_ENTITY),
            (MatchStateError::MatchCompleted, StatusCode::CONFLICT),
            (
                MatchStateError::InvalidTransition {
                    from: "Completed".to_string(),
                    to: "Live".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                MatchStateError::InvalidState("map 1 is Upcoming".to_string()),
                StatusCode::CONFLICT,
            ),
            (
                MatchStateError::Journal("disk full".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[actix_web::test]
    async fn test_gone_reports_oldest_sequence() {
        let err = ApiError::from(SyncFault::BackfillUnavailable {
            requested: 3,
            oldest: 40,
        });
        let response = err.error_response();
        assert_eq!(response.status(), StatusCode::GONE);

        let body = to_bytes(response.into_body()).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.code, 410);
        assert_eq!(parsed.oldest_sequence, Some(40));
    }

    #[actix_web::test]
    async fn test_backend_errors_hide_their_cause() {
        let response = ApiError::RedisError("connection refused".to_string()).error_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = to_bytes(response.into_body()).await.unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error, "Cache error");
        assert_eq!(parsed.oldest_sequence, None);
    }
}
