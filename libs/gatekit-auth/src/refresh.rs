//! Token refresh exchange.
//!
//! The refresh endpoint is a fixed server route: POST `{"refreshToken"}`,
//! answered with `{"accessToken"}`. [`RefreshEndpoint`] implements that
//! contract over its own plain HTTP client (no auth middleware, no
//! retries), keeping refresh traffic out of the gateway's own stack.

use async_trait::async_trait;
use gatekit_http::{HttpClient, HttpClientBuilder, HttpClientConfig, HttpError, RetryConfig};
use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Why a refresh exchange failed.
///
/// Cloneable so a single failure can be fanned out to every request queued
/// behind the in-flight refresh.
#[derive(Debug, Clone)]
pub struct RefreshFailure {
    /// Human-readable reason.
    pub message: String,
    /// Status returned by the refresh endpoint, when a response was
    /// obtained at all.
    pub status: Option<StatusCode>,
}

impl RefreshFailure {
    pub(crate) fn new(message: String, status: Option<StatusCode>) -> Self {
        Self { message, status }
    }

    /// Convert into the client error surfaced to callers.
    #[must_use]
    pub fn into_error(self) -> HttpError {
        HttpError::AuthRefresh {
            message: self.message,
            status: self.status,
        }
    }
}

impl std::fmt::Display for RefreshFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// Exchanges a refresh token for a new access token.
///
/// A trait seam so tests (and alternative auth schemes) can substitute the
/// exchange without a server.
#[async_trait]
pub trait RefreshTokens: Send + Sync {
    /// Perform the exchange, returning the new access token.
    async fn exchange(&self, refresh_token: &str) -> Result<String, RefreshFailure>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
}

/// Production [`RefreshTokens`] implementation backed by an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct RefreshEndpoint {
    http: HttpClient,
    url: String,
}

impl RefreshEndpoint {
    /// Create a refresh client for the given absolute URL. Retries are
    /// disabled regardless of the supplied configuration; a failed exchange
    /// settles immediately so queued requests are not held up.
    ///
    /// # Errors
    ///
    /// Propagates client construction failures (TLS configuration).
    pub fn new(url: impl Into<String>, mut config: HttpClientConfig) -> Result<Self, HttpError> {
        config.retry = RetryConfig::disabled();
        let http = HttpClientBuilder::with_config(config).build()?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RefreshTokens for RefreshEndpoint {
    async fn exchange(&self, refresh_token: &str) -> Result<String, RefreshFailure> {
        let response = self
            .http
            .post(self.url.as_str())
            .json(&RefreshRequest { refresh_token })
            .map_err(|e| RefreshFailure::new(format!("failed to encode refresh request: {e}"), None))?
            .send()
            .await
            .map_err(|e| {
                RefreshFailure::new(format!("refresh request failed: {e}"), e.status())
            })?;

        let parsed: RefreshResponse = response.json().await.map_err(|e| {
            RefreshFailure::new(format!("refresh exchange rejected: {e}"), e.status())
        })?;

        Ok(parsed.access_token)
    }
}
