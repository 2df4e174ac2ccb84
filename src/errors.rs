use axum::http::{HeaderMap, HeaderValue};
use axum::response::IntoResponse;
use reqwest::StatusCode;
use sqlx::Error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Db(sqlx::Error),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Rate limited by external provider")]
    RateLimited,
    #[error("External error: {0}")]
    External(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized").into_response(),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            AppError::RateLimited => {
                let mut headers = HeaderMap::new();
                headers.insert("Retry-After", HeaderValue::from_static("60"));
                (StatusCode::TOO_MANY_REQUESTS, headers, "Rate limited").into_response()
            },
            AppError::External(msg) => (StatusCode::BAD_GATEWAY, msg).into_response(),
            AppError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response(),
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(value: Error) -> Self {
        AppError::Db(value)
    }
}

impl From<String> for AppError {
    fn from(value: String) -> Self {
        AppError::Validation(value)
    }
}

/// Outcome of a calculation that may legally produce nothing.
///
/// Missing PUBLIC positions, short regression samples and similar
/// conditions are skips, not errors: the orchestrator records the reason
/// and moves on without retrying.
#[derive(Debug, Clone)]
pub enum CalcOutcome<T> {
    Completed(T),
    Skipped { reason: String },
}

impl<T> CalcOutcome<T> {
    pub fn skipped(reason: impl Into<String>) -> Self {
        CalcOutcome::Skipped { reason: reason.into() }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CalcOutcome::Skipped { .. })
    }

    pub fn completed(self) -> Option<T> {
        match self {
            CalcOutcome::Completed(v) => Some(v),
            CalcOutcome::Skipped { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_outcome_skipped() {
        let outcome: CalcOutcome<i32> = CalcOutcome::skipped("no_public_positions");
        assert!(outcome.is_skipped());
        assert!(outcome.completed().is_none());
    }

    #[test]
    fn test_calc_outcome_completed() {
        let outcome = CalcOutcome::Completed(42);
        assert!(!outcome.is_skipped());
        assert_eq!(outcome.completed(), Some(42));
    }
}
