//! Error types for ResearchBrief.
//!
//! Two layers, kept deliberately apart:
//! - [`ResearchError`] aborts a request. It maps onto an HTTP status and a
//!   `{ "detail": ... }` body.
//! - [`ItemFailure`] is confined to one query, URL, or document. It is carried
//!   as a value in the stage's output and never aborts the request.
//!
//! App crates (cli) wrap [`ResearchError`] with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Fatal, request-level errors.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    /// The request failed shape validation.
    #[error("validation error: {message}")]
    Validation { message: String },

    /// No usable queries could be generated.
    #[error("query generation failed: {message}")]
    Generation { message: String },

    /// The request deadline expired before any search completed.
    #[error("pipeline timed out after {elapsed_ms} ms before any search completed")]
    PipelineTimeout { elapsed_ms: u128 },

    /// Every search query failed; at least one for a reason other than time.
    #[error("search failed for all {queries} queries: {message}")]
    Search { queries: usize, message: String },

    /// Every search query timed out or was cut off by the deadline.
    #[error("search timed out for all {queries} queries")]
    SearchTimeout { queries: usize },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ResearchError>;

impl ResearchError {
    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a generation error from any displayable message.
    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// HTTP status this error maps to at the `/search-and-summarize` boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Generation { .. } | Self::Search { .. } => 502,
            Self::PipelineTimeout { .. } | Self::SearchTimeout { .. } => 504,
            Self::Config { .. } | Self::Io { .. } => 500,
        }
    }

    /// Stable label for logs and diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation_error",
            Self::Generation { .. } => "generation_error",
            Self::PipelineTimeout { .. } => "pipeline_timeout",
            Self::Search { .. } => "search_error",
            Self::SearchTimeout { .. } => "search_timeout",
            Self::Config { .. } => "config_error",
            Self::Io { .. } => "io_error",
        }
    }
}

/// The `{ "detail": string }` body returned with non-2xx statuses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl From<&ResearchError> for ErrorBody {
    fn from(err: &ResearchError) -> Self {
        Self {
            detail: err.to_string(),
        }
    }
}

/// Non-fatal failure of a single unit of work (query, URL, or document).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemFailure {
    #[error("search timed out")]
    SearchTimeout,

    #[error("search provider error: {0}")]
    SearchProvider(String),

    #[error("fetch timed out")]
    FetchTimeout,

    #[error("HTTP {status}")]
    FetchHttp { status: u16 },

    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("blocked URL: {0}")]
    BlockedUrl(String),

    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),

    #[error("no usable content")]
    EmptyContent,

    #[error("summarization failed: {0}")]
    Summarization(String),

    /// Work cancelled by the request deadline.
    #[error("cancelled by request deadline")]
    Cancelled,
}

impl ItemFailure {
    /// Stable snake-case label used in diagnostics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SearchTimeout => "search_timeout",
            Self::SearchProvider(_) => "search_provider_error",
            Self::FetchTimeout => "fetch_timeout",
            Self::FetchHttp { .. } => "fetch_http_error",
            Self::FetchFailed(_) => "fetch_failed",
            Self::BlockedUrl(_) => "blocked_url",
            Self::UnsupportedContentType(_) => "unsupported_content_type",
            Self::EmptyContent => "empty_content",
            Self::Summarization(_) => "summarization_error",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ResearchError::validation("subject must not be empty");
        assert_eq!(
            err.to_string(),
            "validation error: subject must not be empty"
        );

        let err = ResearchError::PipelineTimeout { elapsed_ms: 1500 };
        assert!(err.to_string().contains("1500 ms"));
    }

    #[test]
    fn status_code_policy() {
        assert_eq!(ResearchError::validation("x").status_code(), 400);
        assert_eq!(ResearchError::generation("x").status_code(), 502);
        assert_eq!(
            ResearchError::PipelineTimeout { elapsed_ms: 0 }.status_code(),
            504
        );
        assert_eq!(
            ResearchError::Search {
                queries: 3,
                message: "HTTP 500".into()
            }
            .status_code(),
            502
        );
        assert_eq!(ResearchError::SearchTimeout { queries: 3 }.status_code(), 504);
        assert_eq!(ResearchError::config("x").status_code(), 500);
    }

    #[test]
    fn error_body_carries_detail() {
        let err = ResearchError::generation("model returned no queries");
        let body = ErrorBody::from(&err);
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(
            json,
            r#"{"detail":"query generation failed: model returned no queries"}"#
        );
    }

    #[test]
    fn item_failure_kinds_are_stable() {
        assert_eq!(ItemFailure::SearchTimeout.kind(), "search_timeout");
        assert_eq!(ItemFailure::FetchHttp { status: 404 }.kind(), "fetch_http_error");
        assert_eq!(ItemFailure::FetchHttp { status: 503 }.to_string(), "HTTP 503");
        assert_eq!(ItemFailure::Cancelled.kind(), "cancelled");
    }
}
