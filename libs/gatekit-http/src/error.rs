//! Error types for the HTTP gateway.
//!
//! Callers branch on three classes of failure:
//!
//! - **Network failures** (no response was obtained): [`HttpError::Timeout`]
//!   and [`HttpError::Transport`].
//! - **Server-reported errors** (a response was obtained with a non-2xx
//!   status): [`HttpError::HttpStatus`], carrying the status code and a
//!   bounded preview of the error body.
//! - **Auth refresh failures** (the token refresh exchange itself failed):
//!   [`HttpError::AuthRefresh`]; stored credentials are cleared before this
//!   surfaces.

use http::StatusCode;
use std::time::Duration;

/// Classification for invalid URI errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidUriKind {
    /// URL could not be parsed at all.
    Parse,
    /// URL is missing a scheme (http/https).
    MissingScheme,
    /// URL uses a scheme other than http/https.
    UnsupportedScheme,
    /// URL is missing a host.
    MissingHost,
    /// Plain http URL rejected because the client is TLS-only.
    InsecureScheme,
}

impl std::fmt::Display for InvalidUriKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Parse => "unparseable",
            Self::MissingScheme => "missing scheme",
            Self::UnsupportedScheme => "unsupported scheme",
            Self::MissingHost => "missing host",
            Self::InsecureScheme => "insecure scheme not allowed",
        };
        f.write_str(s)
    }
}

/// Errors produced by the HTTP client.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum HttpError {
    /// The request URL failed validation.
    #[error("Invalid URL ({kind}): {message}")]
    InvalidUrl {
        /// What was wrong with the URL.
        kind: InvalidUriKind,
        /// Human-readable detail.
        message: String,
    },

    /// A header name supplied to the request builder was invalid.
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// A header value supplied to the request builder was invalid.
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// The `http::Request` could not be assembled.
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// An attempt exceeded its timeout; the in-flight operation was aborted
    /// and no response was obtained.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure; no response was obtained.
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A response was obtained with a non-2xx status.
    #[error("HTTP status {status}: {body_preview}")]
    HttpStatus {
        /// The response status code.
        status: StatusCode,
        /// Bounded preview of the response body (see
        /// [`ERROR_BODY_PREVIEW_LIMIT`](crate::ERROR_BODY_PREVIEW_LIMIT)).
        body_preview: String,
        /// The declared content type of the error body, if any.
        content_type: Option<String>,
    },

    /// The token refresh exchange failed. Stored credentials were cleared
    /// before this error was produced.
    #[error("Auth refresh failed: {message}")]
    AuthRefresh {
        /// Why the refresh failed.
        message: String,
        /// Status returned by the refresh endpoint, when a response was
        /// obtained at all.
        status: Option<StatusCode>,
    },

    /// Response body exceeded the configured size limit.
    #[error("Response body too large: {actual} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge {
        /// The configured limit in bytes.
        limit: usize,
        /// Observed size in bytes (at least; reading stops at the limit).
        actual: usize,
    },

    /// JSON serialization or deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Form body serialization failed.
    #[error("Form encoding error: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),

    /// TLS configuration could not be built at client construction time.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}

impl HttpError {
    /// True when no response was obtained (timeout or connection failure).
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Transport(_))
    }

    /// The HTTP status carried by this error, if a response was obtained.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            Self::AuthRefresh { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        Self::Transport(Box::new(err))
    }
}
