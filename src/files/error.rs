use std::fmt;

use serde::Serialize;

/// Stable error identifiers surfaced to callers. The string form is part of
/// the wire contract, so renaming a variant here is a breaking change.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    IsDirectory,
    NotDirectory,
    InvalidPath,
    InvalidOffset,
    InvalidQuery,
    NotEmpty,
    PermissionDenied,
    PayloadTooLarge,
    QuotaExceeded,
    RateLimited,
    ResourceBusy,
    SearchBackendError,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::IsDirectory => "IS_DIRECTORY",
            ErrorCode::NotDirectory => "NOT_DIRECTORY",
            ErrorCode::InvalidPath => "INVALID_PATH",
            ErrorCode::InvalidOffset => "INVALID_OFFSET",
            ErrorCode::InvalidQuery => "INVALID_QUERY",
            ErrorCode::NotEmpty => "NOT_EMPTY",
            ErrorCode::PermissionDenied => "PERMISSION_DENIED",
            ErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            ErrorCode::QuotaExceeded => "QUOTA_EXCEEDED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::ResourceBusy => "RESOURCE_BUSY",
            ErrorCode::SearchBackendError => "SEARCH_BACKEND_ERROR",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Whether a caller should retry the same request without changing it.
    /// Contention is the only case where that is the right move.
    pub fn retryable(&self) -> bool {
        matches!(self, ErrorCode::ResourceBusy)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The typed error every public operation fails with. Messages are stable
/// enough to assert on in tests and never carry tenant identifiers.
#[derive(thiserror::Error, Debug)]
#[error("{code}: {message}")]
pub struct ServiceError {
    code: ErrorCode,
    message: String,
    retryable: bool,
    #[source]
    source: Option<anyhow::Error>,
}

impl ServiceError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            retryable: code.retryable(),
            code,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(code: ErrorCode, message: impl Into<String>, source: anyhow::Error) -> Self {
        Self {
            retryable: code.retryable(),
            code,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn invalid_path(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidPath, message)
    }

    pub fn invalid_offset(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidOffset, message)
    }

    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidQuery, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn retryable(&self) -> bool {
        self.retryable
    }
}

impl From<sqlx::Error> for ServiceError {
    fn from(error: sqlx::Error) -> Self {
        Self::with_source(ErrorCode::Internal, "storage error", error.into())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_identifiers() {
        assert_eq!(ErrorCode::NotFound.as_str(), "NOT_FOUND");
        assert_eq!(ErrorCode::ResourceBusy.as_str(), "RESOURCE_BUSY");
        assert_eq!(ErrorCode::SearchBackendError.as_str(), "SEARCH_BACKEND_ERROR");
    }

    #[test]
    fn only_contention_is_retryable() {
        for code in [
            ErrorCode::NotFound,
            ErrorCode::AlreadyExists,
            ErrorCode::QuotaExceeded,
            ErrorCode::PayloadTooLarge,
            ErrorCode::Internal,
        ] {
            assert!(!code.retryable());
        }
        assert!(ErrorCode::ResourceBusy.retryable());
        assert!(ServiceError::new(ErrorCode::ResourceBusy, "project is locked").retryable());
    }

    #[test]
    fn display_carries_code_and_message() {
        let err = ServiceError::not_found("no file at path");
        assert_eq!(err.to_string(), "NOT_FOUND: no file at path");
    }
}
