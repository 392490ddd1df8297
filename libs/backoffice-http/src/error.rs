use crate::response::Payload;
use http::StatusCode;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host/authority component
    ///
    /// Also returned when a proxy-mode path is sent without a configured origin.
    MissingAuthority,
    /// URL is missing required scheme (http/https)
    MissingScheme,
}

/// A non-2xx response from the backend.
///
/// Carries the original status so callers can branch on it (e.g. redirect to
/// login on 401, show a validation banner on 422). `message` is taken from the
/// body's `message` or `error` field when the body is JSON, otherwise from the
/// raw text, otherwise from the canonical status reason.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    /// Parsed response body, if one was read
    pub data: Option<Payload>,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            data: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Payload) -> Self {
        self.data = Some(data);
        self
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HTTP {}: {}", self.status.as_u16(), self.message)
    }
}

impl std::error::Error for ApiError {}

/// Errors returned by the API client
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Single request attempt timed out
    #[error("Request attempt timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error (network, connection, DNS, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Backend answered with a non-2xx status
    #[error(transparent)]
    Api(#[from] ApiError),

    /// JSON encoding or decoding error
    #[error("JSON processing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Request buffer is full (fail-fast)
    #[error("Service overloaded: request buffer is full")]
    Overloaded,

    /// Internal service failure (buffer worker died, channel closed)
    #[error("Service unavailable: internal failure")]
    ServiceClosed,

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// Every attempt was used without producing a response or error
    #[error("Request failed after {attempts} attempts")]
    RetriesExhausted { attempts: usize },

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field is
    /// diagnostic text for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        url: String,
        kind: InvalidUriKind,
        reason: String,
    },

    /// Invalid URL scheme for transport security configuration
    #[error("URL scheme '{scheme}' not allowed: {reason}")]
    InvalidScheme { scheme: String, reason: String },
}

impl HttpError {
    /// HTTP status of the failure, when the backend produced one.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            HttpError::Api(err) => Some(err.status),
            _ => None,
        }
    }

    /// Whether the retry layer treats this error as transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, HttpError::Transport(_) | HttpError::Timeout(_))
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}
