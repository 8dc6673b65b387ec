//! Error types for the Libris server

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Stable error codes surfaced to API clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchUser = 4,
    NoSuchBook = 5,
    NoSuchCategory = 6,
    NoSuchLoan = 7,
    OutOfStock = 8,
    AlreadyBorrowed = 9,
    AlreadyReturned = 10,
    RetryExhausted = 11,
    Duplicate = 12,
    BadValue = 13,
    StockInvariant = 14,
}

/// Entity referenced by a failed lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    User(i32),
    Book(i32),
    Category(i32),
    Loan(i32),
}

impl std::fmt::Display for Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Entity::User(id) => write!(f, "user {}", id),
            Entity::Book(id) => write!(f, "book {}", id),
            Entity::Category(id) => write!(f, "category {}", id),
            Entity::Loan(id) => write!(f, "loan {}", id),
        }
    }
}

/// Business-rule rejections from the lending engine.
///
/// Each kind maps to its own [`ErrorCode`] so clients can render
/// "out of stock" differently from "already borrowed".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    /// An open loan already exists for this (user, book) pair
    AlreadyBorrowed,
    /// No available copy of the book
    OutOfStock,
    /// The loan has already been closed
    AlreadyReturned,
    /// Storage-level contention persisted past the retry bound
    RetryExhausted,
}

impl std::fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ConflictKind::AlreadyBorrowed => "already borrowed",
            ConflictKind::OutOfStock => "out of stock",
            ConflictKind::AlreadyReturned => "already returned",
            ConflictKind::RetryExhausted => "retry exhausted",
        };
        write!(f, "{}", msg)
    }
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("{0} not found")]
    NotFound(Entity),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conflict: {0}")]
    Conflict(ConflictKind),

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("Transient conflict on concurrent update")]
    TransientConflict,

    #[error("Business rule violation: {0}")]
    BusinessRule(String),

    #[error("Invariant violation: {0}")]
    Invariant(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// True when the failure is a storage-detected concurrency collision
    /// that is safe to retry (serialization failure or deadlock).
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::TransientConflict => true,
            AppError::Database(sqlx::Error::Database(db)) => {
                matches!(db.code().as_deref(), Some("40001") | Some("40P01"))
            }
            _ => false,
        }
    }

    fn status_and_code(&self) -> (StatusCode, ErrorCode) {
        match self {
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, ErrorCode::NotAuthorized),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, ErrorCode::NotAuthorized),
            AppError::NotFound(entity) => {
                let code = match entity {
                    Entity::User(_) => ErrorCode::NoSuchUser,
                    Entity::Book(_) => ErrorCode::NoSuchBook,
                    Entity::Category(_) => ErrorCode::NoSuchCategory,
                    Entity::Loan(_) => ErrorCode::NoSuchLoan,
                };
                (StatusCode::NOT_FOUND, code)
            }
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, ErrorCode::BadValue),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::DbFailure),
            AppError::Conflict(kind) => {
                let code = match kind {
                    ConflictKind::AlreadyBorrowed => ErrorCode::AlreadyBorrowed,
                    ConflictKind::OutOfStock => ErrorCode::OutOfStock,
                    ConflictKind::AlreadyReturned => ErrorCode::AlreadyReturned,
                    ConflictKind::RetryExhausted => ErrorCode::RetryExhausted,
                };
                (StatusCode::CONFLICT, code)
            }
            AppError::Duplicate(_) => (StatusCode::CONFLICT, ErrorCode::Duplicate),
            AppError::TransientConflict => {
                (StatusCode::SERVICE_UNAVAILABLE, ErrorCode::RetryExhausted)
            }
            AppError::BusinessRule(_) => (StatusCode::UNPROCESSABLE_ENTITY, ErrorCode::Failure),
            AppError::Invariant(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::StockInvariant)
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, ErrorCode::Failure),
        }
    }
}

/// Error response body
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    pub code: u32,
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        let message = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                "Database error".to_string()
            }
            AppError::Invariant(msg) => {
                tracing::error!("Invariant violation: {}", msg);
                "Internal consistency error".to_string()
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(ErrorResponse {
            code: code as u32,
            error: format!("{:?}", code),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_kinds_map_to_distinct_codes() {
        let kinds = [
            ConflictKind::AlreadyBorrowed,
            ConflictKind::OutOfStock,
            ConflictKind::AlreadyReturned,
            ConflictKind::RetryExhausted,
        ];
        let codes: Vec<ErrorCode> = kinds
            .iter()
            .map(|k| AppError::Conflict(*k).status_and_code().1)
            .collect();
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a, b);
            }
        }
        for kind in kinds {
            let (status, _) = AppError::Conflict(kind).status_and_code();
            assert_eq!(status, StatusCode::CONFLICT);
        }
    }

    #[test]
    fn not_found_codes_distinguish_entities() {
        let (status, code) = AppError::NotFound(Entity::Book(404)).status_and_code();
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, ErrorCode::NoSuchBook);

        let (_, code) = AppError::NotFound(Entity::Loan(999)).status_and_code();
        assert_eq!(code, ErrorCode::NoSuchLoan);

        assert_eq!(
            AppError::NotFound(Entity::Book(404)).to_string(),
            "book 404 not found"
        );
    }

    #[test]
    fn transient_conflict_is_retryable() {
        assert!(AppError::TransientConflict.is_transient());
        assert!(!AppError::Conflict(ConflictKind::OutOfStock).is_transient());
        assert!(!AppError::NotFound(Entity::User(1)).is_transient());
    }
}
