#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Resilient HTTP client for outbound API calls.
//!
//! Wraps a hyper connection pool in a tower middleware stack providing:
//!
//! - per-attempt timeout enforcement (default 30 s, overridable per request)
//! - bounded retry with exponential backoff (`retry_delay * 2^attempt`),
//!   applied only to transient failures: transport/timeout errors and 5xx
//! - typed errors separating network failures (no response) from
//!   server-reported errors (non-2xx status with captured body preview)
//! - TLS-only transport by default, with native or webpki trust roots
//!
//! # Example
//!
//! ```ignore
//! use gatekit_http::HttpClient;
//!
//! let client = HttpClient::builder().build()?;
//! let foods: serde_json::Value = client
//!     .get("https://api.example.com/foods")
//!     .send()
//!     .await?
//!     .json()
//!     .await?;
//! ```
//!
//! Auth middleware (bearer injection, token refresh) plugs in through
//! [`HttpClientBuilder::with_auth_layer`], which places it inside the retry
//! loop so replayed attempts see refreshed credentials.

mod builder;
mod client;
mod config;
mod error;
mod request;
mod response;
mod tls;

pub mod layers;

pub use builder::{HttpClientBuilder, InnerService};
pub use client::HttpClient;
pub use config::{
    DEFAULT_MAX_BODY_SIZE, DEFAULT_MAX_RETRIES, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_DELAY,
    DEFAULT_USER_AGENT, ExponentialBackoff, HttpClientConfig, RequestOverrides, RetryConfig,
    TlsRootConfig, TransportSecurity, is_retryable_status,
};
pub use error::{HttpError, InvalidUriKind};
pub use request::RequestBuilder;
pub use response::{ERROR_BODY_PREVIEW_LIMIT, HttpResponse, Payload, ResponseBody};
