#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Bearer authentication with transparent token refresh for
//! [`gatekit-http`](gatekit_http).
//!
//! Builds on the client's auth-layer seam to provide:
//!
//! - bearer header injection from an external [`TokenStore`]
//! - 401 interception with a single-flight refresh exchange: concurrent
//!   401s share one refresh, queued FIFO while it is in flight
//! - at-most-once replay of affected requests with the fresh token
//! - credential clearing and typed failures when the refresh is rejected
//! - [`ApiGateway`], a base-URL facade with a typed method per HTTP verb
//!
//! # Example
//!
//! ```ignore
//! use gatekit_auth::{ApiGateway, InMemoryTokenStore};
//! use std::sync::Arc;
//!
//! let store = Arc::new(InMemoryTokenStore::with_tokens(access, refresh));
//! let gateway = ApiGateway::builder("https://api.example.com", store).build()?;
//! let foods: Foods = gateway.get("/foods").await?;
//! ```

mod gateway;
mod layer;
mod refresh;
mod store;

pub use gateway::{ApiGateway, CallOptions, DEFAULT_REFRESH_PATH, GatewayBuilder};
pub use layer::{AuthRefreshLayer, AuthRefreshService};
pub use refresh::{RefreshEndpoint, RefreshFailure, RefreshTokens};
pub use store::{InMemoryTokenStore, TokenStore};
