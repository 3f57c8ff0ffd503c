//! Token storage abstraction.
//!
//! The gateway never persists credentials itself. It reads tokens through
//! this trait on every request and writes back only after a successful
//! refresh (or clears everything after a failed one). Durable, encrypted
//! storage is the embedder's concern.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

/// External secure token store.
///
/// Implementations must be safe to call from concurrent requests. The
/// gateway does not cache tokens beyond a single request, so a store update
/// is visible to the next request (and to auth replays) immediately.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// The current access token, if any.
    async fn access_token(&self) -> Option<String>;

    /// The current refresh token, if any.
    async fn refresh_token(&self) -> Option<String>;

    /// Replace the stored access token after a successful refresh.
    async fn set_access_token(&self, token: String);

    /// Wipe all stored credentials.
    async fn clear(&self);
}

#[derive(Debug, Default)]
struct Tokens {
    access: Option<String>,
    refresh: Option<String>,
}

/// In-memory token store for tests and short-lived processes.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTokenStore {
    tokens: Arc<RwLock<Tokens>>,
}

impl InMemoryTokenStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a token pair.
    #[must_use]
    pub fn with_tokens(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            tokens: Arc::new(RwLock::new(Tokens {
                access: Some(access.into()),
                refresh: Some(refresh.into()),
            })),
        }
    }

    /// Set the refresh token (access tokens are set through the trait).
    pub fn set_refresh_token(&self, token: impl Into<String>) {
        self.tokens.write().refresh = Some(token.into());
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn access_token(&self) -> Option<String> {
        self.tokens.read().access.clone()
    }

    async fn refresh_token(&self) -> Option<String> {
        self.tokens.read().refresh.clone()
    }

    async fn set_access_token(&self, token: String) {
        self.tokens.write().access = Some(token);
    }

    async fn clear(&self) {
        let mut guard = self.tokens.write();
        guard.access = None;
        guard.refresh = None;
    }
}
