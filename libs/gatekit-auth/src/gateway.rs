//! Caller-facing API gateway.
//!
//! [`ApiGateway`] owns a base URL, default headers, and an auth-wired
//! [`HttpClient`]. Service layers call the verb methods with a path; the
//! gateway joins it onto the base URL, attaches `accept: application/json`
//! (and the API key header when configured), sends the request through the
//! timeout/retry/auth stack, and returns the deserialized body.

use crate::layer::AuthRefreshLayer;
use crate::refresh::{RefreshEndpoint, RefreshTokens};
use crate::store::TokenStore;
use gatekit_http::{
    HttpClient, HttpClientBuilder, HttpClientConfig, HttpError, HttpResponse, InvalidUriKind,
    RequestBuilder,
};
use http::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tower::Layer;
use tower::util::BoxCloneSyncService;
use url::Url;

/// Default route for the token refresh exchange, relative to the base URL.
pub const DEFAULT_REFRESH_PATH: &str = "/auth/refresh";

/// Per-call configuration overrides.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Per-attempt timeout for this call.
    pub timeout: Option<Duration>,
    /// Retry count for this call.
    pub retries: Option<usize>,
    /// Backoff base delay for this call.
    pub retry_delay: Option<Duration>,
    /// Extra headers for this call; later entries win on duplicate names.
    pub headers: Vec<(String, String)>,
}

/// Builder for [`ApiGateway`].
pub struct GatewayBuilder {
    base_url: String,
    refresh_path: String,
    config: HttpClientConfig,
    store: Arc<dyn TokenStore>,
    refresher: Option<Arc<dyn RefreshTokens>>,
    api_key: Option<String>,
}

impl std::fmt::Debug for GatewayBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayBuilder")
            .field("base_url", &self.base_url)
            .field("refresh_path", &self.refresh_path)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GatewayBuilder {
    /// Start building a gateway for the given base URL and token store.
    #[must_use]
    pub fn new(base_url: impl Into<String>, store: Arc<dyn TokenStore>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_path: DEFAULT_REFRESH_PATH.to_owned(),
            config: HttpClientConfig::default(),
            store,
            refresher: None,
            api_key: None,
        }
    }

    /// HTTP client configuration (timeouts, retry policy, TLS).
    #[must_use]
    pub fn config(mut self, config: HttpClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Route of the refresh exchange, joined onto the base URL.
    #[must_use]
    pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Static API key sent as `x-api-key` on every request.
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Substitute the refresh exchange (defaults to [`RefreshEndpoint`]
    /// against the refresh path).
    #[must_use]
    pub fn refresher(mut self, refresher: Arc<dyn RefreshTokens>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    /// Assemble the gateway.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidUrl`] for an unusable base URL and
    /// propagates client construction failures.
    pub fn build(self) -> Result<ApiGateway, HttpError> {
        let base_url = Url::parse(&self.base_url).map_err(|e| HttpError::InvalidUrl {
            kind: InvalidUriKind::Parse,
            message: format!("{}: {e}", self.base_url),
        })?;

        let refresher = match self.refresher {
            Some(refresher) => refresher,
            None => {
                let refresh_url =
                    base_url
                        .join(&self.refresh_path)
                        .map_err(|e| HttpError::InvalidUrl {
                            kind: InvalidUriKind::Parse,
                            message: format!("refresh path {}: {e}", self.refresh_path),
                        })?;
                Arc::new(RefreshEndpoint::new(refresh_url, self.config.clone())?)
            }
        };

        let auth = AuthRefreshLayer::new(self.store, refresher);
        let http = HttpClientBuilder::with_config(self.config)
            .with_auth_layer(move |inner| BoxCloneSyncService::new(auth.layer(inner)))
            .build()?;

        Ok(ApiGateway {
            http,
            base_url,
            api_key: self.api_key,
        })
    }
}

/// HTTP request gateway with transparent bearer-token refresh.
///
/// Cheap to clone; clones share the connection pool and the single-flight
/// refresh gate.
#[derive(Debug, Clone)]
pub struct ApiGateway {
    http: HttpClient,
    base_url: Url,
    api_key: Option<String>,
}

impl ApiGateway {
    /// Start building a gateway.
    #[must_use]
    pub fn builder(base_url: impl Into<String>, store: Arc<dyn TokenStore>) -> GatewayBuilder {
        GatewayBuilder::new(base_url, store)
    }

    /// GET `path`, returning the deserialized JSON body.
    ///
    /// # Errors
    ///
    /// Typed failures per the crate error taxonomy: network errors,
    /// non-2xx statuses, auth refresh failures, deserialization errors.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        self.get_with(path, CallOptions::default()).await
    }

    /// GET with per-call overrides.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn get_with<T: DeserializeOwned>(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<T, HttpError> {
        self.prepare(Method::GET, path, &options)?.send().await?.json().await
    }

    /// POST `body` as JSON to `path`, returning the deserialized body.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.post_with(path, body, CallOptions::default()).await
    }

    /// POST with per-call overrides.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn post_with<T, B>(
        &self,
        path: &str,
        body: &B,
        options: CallOptions,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.prepare(Method::POST, path, &options)?
            .json(body)?
            .send()
            .await?
            .json()
            .await
    }

    /// PUT `body` as JSON to `path`, returning the deserialized body.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.put_with(path, body, CallOptions::default()).await
    }

    /// PUT with per-call overrides.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn put_with<T, B>(
        &self,
        path: &str,
        body: &B,
        options: CallOptions,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.prepare(Method::PUT, path, &options)?
            .json(body)?
            .send()
            .await?
            .json()
            .await
    }

    /// PATCH `body` as JSON to `path`, returning the deserialized body.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.patch_with(path, body, CallOptions::default()).await
    }

    /// PATCH with per-call overrides.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn patch_with<T, B>(
        &self,
        path: &str,
        body: &B,
        options: CallOptions,
    ) -> Result<T, HttpError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.prepare(Method::PATCH, path, &options)?
            .json(body)?
            .send()
            .await?
            .json()
            .await
    }

    /// DELETE `path`, returning the deserialized JSON body.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        self.delete_with(path, CallOptions::default()).await
    }

    /// DELETE with per-call overrides.
    ///
    /// # Errors
    ///
    /// See [`get`](Self::get).
    pub async fn delete_with<T: DeserializeOwned>(
        &self,
        path: &str,
        options: CallOptions,
    ) -> Result<T, HttpError> {
        self.prepare(Method::DELETE, path, &options)?
            .send()
            .await?
            .json()
            .await
    }

    /// Escape hatch: send a bodyless request and get the raw response,
    /// for non-JSON payloads or manual status handling.
    ///
    /// # Errors
    ///
    /// Deferred builder errors and network failures; the response is
    /// returned whatever its status.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        options: CallOptions,
    ) -> Result<HttpResponse, HttpError> {
        self.prepare(method, path, &options)?.send().await
    }

    fn prepare(
        &self,
        method: Method,
        path: &str,
        options: &CallOptions,
    ) -> Result<RequestBuilder, HttpError> {
        let url = self.base_url.join(path).map_err(|e| HttpError::InvalidUrl {
            kind: InvalidUriKind::Parse,
            message: format!("{path}: {e}"),
        })?;

        let mut builder = self
            .http
            .request(method, String::from(url))
            .header("accept", "application/json");

        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }
        for (name, value) in &options.headers {
            builder = builder.header(name, value);
        }
        if let Some(timeout) = options.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(retries) = options.retries {
            builder = builder.retries(retries);
        }
        if let Some(delay) = options.retry_delay {
            builder = builder.retry_delay(delay);
        }

        Ok(builder)
    }
}
