//! Client construction: TLS connector wiring and middleware stack assembly.

use crate::client::HttpClient;
use crate::config::{HttpClientConfig, RetryConfig, TlsRootConfig, TransportSecurity};
use crate::error::HttpError;
use crate::layers::{AttemptTimeoutLayer, RetryLayer, UserAgentLayer};
use crate::response::ResponseBody;
use crate::tls;
use bytes::Bytes;
use http::{HeaderValue, Request, Response};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use std::time::Duration;
use tower::{Layer, ServiceBuilder};
use tower::util::BoxCloneSyncService;

/// The boxed service type the middleware stack is erased to.
///
/// Auth middleware is injected at this seam, inside the retry loop, so a
/// replayed attempt re-reads whatever credentials the auth middleware has
/// refreshed in the meantime.
pub type InnerService =
    BoxCloneSyncService<Request<Full<Bytes>>, Response<ResponseBody>, HttpError>;

type AuthLayerFn = Box<dyn FnOnce(InnerService) -> InnerService + Send>;

/// Builder for [`HttpClient`].
///
/// The assembled stack, outermost first:
///
/// ```text
/// RetryLayer -> [auth layer] -> AttemptTimeoutLayer -> UserAgentLayer -> hyper client
/// ```
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    auth_layer: Option<AuthLayerFn>,
}

impl std::fmt::Debug for HttpClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientBuilder")
            .field("config", &self.config)
            .field("auth_layer", &self.auth_layer.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClientBuilder {
    /// Start from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: HttpClientConfig::default(),
            auth_layer: None,
        }
    }

    /// Start from an existing configuration.
    #[must_use]
    pub fn with_config(config: HttpClientConfig) -> Self {
        Self {
            config,
            auth_layer: None,
        }
    }

    /// Per-attempt timeout applied unless overridden per request.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Maximum buffered response body size.
    #[must_use]
    pub fn max_body_size(mut self, bytes: usize) -> Self {
        self.config.max_body_size = bytes;
        self
    }

    /// User-Agent applied to requests without one.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Retry policy.
    #[must_use]
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    /// Disable retries; every request gets exactly one attempt.
    #[must_use]
    pub fn no_retry(mut self) -> Self {
        self.config.retry = RetryConfig::disabled();
        self
    }

    /// Root certificate source for TLS connections.
    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.tls_roots = roots;
        self
    }

    /// Accept plain `http://` URLs.
    ///
    /// Only available in debug builds (or with the `allow-insecure-http`
    /// feature) so production binaries stay TLS-only.
    #[cfg(any(debug_assertions, feature = "allow-insecure-http"))]
    #[must_use]
    pub fn allow_insecure_http(mut self) -> Self {
        tracing::warn!("insecure HTTP transport enabled; do not use in production");
        self.config.transport = TransportSecurity::AllowInsecureHttp;
        self
    }

    /// Inject auth middleware at the seam inside the retry loop.
    ///
    /// The closure receives the boxed inner stack (timeout, user agent,
    /// transport) and must return the wrapped stack, boxed again.
    #[must_use]
    pub fn with_auth_layer(
        mut self,
        wrap: impl FnOnce(InnerService) -> InnerService + Send + 'static,
    ) -> Self {
        self.auth_layer = Some(Box::new(wrap));
        self
    }

    /// Assemble the client.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::TlsConfig`] when the TLS trust store cannot be
    /// built and [`HttpError::InvalidHeaderValue`] for an unusable
    /// User-Agent string.
    pub fn build(self) -> Result<HttpClient, HttpError> {
        let config = self.config;

        let user_agent = HeaderValue::from_str(&config.user_agent)?;

        let tls_builder = hyper_rustls::HttpsConnectorBuilder::new();
        let tls_builder = match config.tls_roots {
            TlsRootConfig::Native => tls_builder.with_tls_config(tls::native_roots_client_config()?),
            TlsRootConfig::Webpki => tls_builder
                .with_provider_and_webpki_roots(tls::crypto_provider())
                .map_err(|e| HttpError::TlsConfig(format!("webpki roots: {e}")))?,
        };
        let connector = match config.transport {
            TransportSecurity::TlsOnly => tls_builder
                .https_only()
                .enable_http1()
                .enable_http2()
                .build(),
            TransportSecurity::AllowInsecureHttp => tls_builder
                .https_or_http()
                .enable_http1()
                .enable_http2()
                .build(),
        };

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_timer(TokioTimer::new())
            .build::<_, Full<Bytes>>(connector);

        let stack = ServiceBuilder::new()
            .layer(AttemptTimeoutLayer::new(config.request_timeout))
            .layer(UserAgentLayer::new(user_agent))
            .map_err(HttpError::from)
            .map_response(|resp: Response<hyper::body::Incoming>| {
                resp.map(|body| {
                    body.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
                        .boxed()
                })
            })
            .service(client);

        let mut inner = BoxCloneSyncService::new(stack);
        if let Some(wrap) = self.auth_layer {
            inner = wrap(inner);
        }

        let service =
            BoxCloneSyncService::new(RetryLayer::new(config.retry.clone()).layer(inner));

        tracing::debug!(
            timeout_ms = u64::try_from(config.request_timeout.as_millis()).unwrap_or(u64::MAX),
            max_retries = config.retry.max_retries,
            transport = ?config.transport,
            "http client built"
        );

        Ok(HttpClient::new(
            service,
            config.max_body_size,
            config.transport,
        ))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_USER_AGENT, TlsRootConfig};

    #[test]
    fn builds_with_webpki_roots() {
        // Native roots depend on the host OS; webpki always works.
        let client = HttpClientBuilder::new()
            .tls_roots(TlsRootConfig::Webpki)
            .build();
        assert!(client.is_ok());
    }

    #[test]
    fn rejects_invalid_user_agent() {
        let err = HttpClientBuilder::new()
            .tls_roots(TlsRootConfig::Webpki)
            .user_agent("bad\nagent")
            .build()
            .unwrap_err();
        assert!(matches!(err, HttpError::InvalidHeaderValue(_)));
    }

    #[test]
    fn default_user_agent_names_the_crate() {
        assert!(DEFAULT_USER_AGENT.starts_with("gatekit-http/"));
    }

    #[test]
    fn auth_layer_hook_is_applied() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let seen = called.clone();
        let client = HttpClientBuilder::new()
            .tls_roots(TlsRootConfig::Webpki)
            .with_auth_layer(move |inner| {
                seen.store(true, Ordering::SeqCst);
                inner
            })
            .build();
        assert!(client.is_ok());
        assert!(called.load(Ordering::SeqCst));
    }
}
