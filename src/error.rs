//! Error types for the circulation engine

use thiserror::Error;

/// Stable numeric codes handed to the outer layer alongside each error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Failure = 1,
    DbFailure = 3,
    NoSuchData = 20,
    Duplicate = 8,
    ItemNotAvailable = 7,
    MaxBorrowsReached = 11,
    PremiumRequired = 30,
    AccessExpired = 31,
    AlreadyReturned = 32,
    BadValue = 18,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("No copies available: {0}")]
    Exhausted(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Premium subscription required: {0}")]
    PremiumRequired(String),

    #[error("Access expired: {0}")]
    AccessExpired(String),

    #[error("Already returned: {0}")]
    AlreadyReturned(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::NotFound(_) => ErrorCode::NoSuchData,
            AppError::Conflict(_) => ErrorCode::Duplicate,
            AppError::Exhausted(_) => ErrorCode::ItemNotAvailable,
            AppError::QuotaExceeded(_) => ErrorCode::MaxBorrowsReached,
            AppError::PremiumRequired(_) => ErrorCode::PremiumRequired,
            AppError::AccessExpired(_) => ErrorCode::AccessExpired,
            AppError::AlreadyReturned(_) => ErrorCode::AlreadyReturned,
            AppError::Validation(_) => ErrorCode::BadValue,
            AppError::Database(_) => ErrorCode::DbFailure,
            AppError::Internal(_) => ErrorCode::Failure,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::Exhausted("x".into()).code() as u32, 7);
        assert_eq!(AppError::QuotaExceeded("x".into()).code(), ErrorCode::MaxBorrowsReached);
        assert_eq!(AppError::NotFound("x".into()).code(), ErrorCode::NoSuchData);
    }

    #[test]
    fn test_not_found_helper() {
        assert!(AppError::NotFound("loan".into()).is_not_found());
        assert!(!AppError::Conflict("loan".into()).is_not_found());
    }
}
