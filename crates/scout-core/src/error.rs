use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error types for Scout.
///
/// Every failure path in the pipeline produces exactly one of these. Per-job
/// failures are recorded in the response; only `ValidationError` and
/// `SearchProviderError` abort a whole request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Bad caller input, rejected before any network call.
    #[error("Invalid request: {0}")]
    ValidationError(String),

    /// The search provider could not produce hits.
    #[error("Search provider error: {0}")]
    SearchProviderError(String),

    /// Page host unreachable or connection refused.
    #[error("Connection failed: {0}")]
    ConnectionError(String),

    /// A single network call exceeded its timeout.
    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    /// Page returned a non-2xx status.
    #[error("HTTP {status} for {url}")]
    HttpError { status: u16, url: String },

    /// Cleaned page text too short to structure.
    #[error("Page content too short: {length} chars (minimum {minimum})")]
    EmptyContent { length: usize, minimum: usize },

    /// Model provider asked us to slow down.
    #[error("Rate limited by model provider: {0}")]
    RateLimited(String),

    /// Model provider temporarily unreachable or failing.
    #[error("Model provider unavailable: {0}")]
    Unavailable(String),

    /// Model output could not be turned into a product record.
    #[error("Malformed model output: {0}")]
    Malformed(String),

    /// The overall request deadline elapsed before the job finished.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// Invalid startup configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Wire tag for an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    SearchProviderError,
    ConnectionError,
    TimeoutError,
    HttpError,
    EmptyContentError,
    RateLimited,
    Unavailable,
    Malformed,
    DeadlineExceeded,
    ConfigError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::SearchProviderError => "search_provider_error",
            ErrorKind::ConnectionError => "connection_error",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::HttpError => "http_error",
            ErrorKind::EmptyContentError => "empty_content_error",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Malformed => "malformed",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::ConfigError => "config_error",
        }
    }

    /// Transient kinds that a crawl job may retry after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::ConnectionError
                | ErrorKind::TimeoutError
                | ErrorKind::RateLimited
                | ErrorKind::Unavailable
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::ValidationError(_) => ErrorKind::ValidationError,
            AppError::SearchProviderError(_) => ErrorKind::SearchProviderError,
            AppError::ConnectionError(_) => ErrorKind::ConnectionError,
            AppError::Timeout(_) => ErrorKind::TimeoutError,
            AppError::HttpError { .. } => ErrorKind::HttpError,
            AppError::EmptyContent { .. } => ErrorKind::EmptyContentError,
            AppError::RateLimited(_) => ErrorKind::RateLimited,
            AppError::Unavailable(_) => ErrorKind::Unavailable,
            AppError::Malformed(_) => ErrorKind::Malformed,
            AppError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            AppError::ConfigError(_) => ErrorKind::ConfigError,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
