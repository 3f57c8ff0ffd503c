//! Per-attempt timeout enforcement.
//!
//! Each attempt (including every retry) is bounded individually. When the
//! bound elapses, the attempt's in-flight future is dropped, aborting the
//! underlying network operation, and [`HttpError::Timeout`] is returned.
//! The timeout is read from the request's [`RequestOverrides`] extension
//! when present, so per-request overrides reach every attempt.

use crate::config::RequestOverrides;
use crate::error::HttpError;
use http::Request;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

/// Bounds every attempt by a timeout.
#[derive(Debug, Clone)]
pub struct AttemptTimeoutLayer {
    default_timeout: Duration,
}

impl AttemptTimeoutLayer {
    /// Create a layer with the given default timeout.
    #[must_use]
    pub fn new(default_timeout: Duration) -> Self {
        Self { default_timeout }
    }
}

impl<S> Layer<S> for AttemptTimeoutLayer {
    type Service = AttemptTimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AttemptTimeoutService {
            inner,
            default_timeout: self.default_timeout,
        }
    }
}

/// Service created by [`AttemptTimeoutLayer`].
#[derive(Debug, Clone)]
pub struct AttemptTimeoutService<S> {
    inner: S,
    default_timeout: Duration,
}

impl<S, B, R> Service<Request<B>> for AttemptTimeoutService<S>
where
    S: Service<Request<B>, Response = R, Error = HttpError> + Clone + Send + 'static,
    S::Future: Send,
    B: Send + 'static,
    R: Send + 'static,
{
    type Response = R;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<R, HttpError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let timeout = req
            .extensions()
            .get::<RequestOverrides>()
            .and_then(|o| o.timeout)
            .unwrap_or(self.default_timeout);

        // Clone-swap pattern (Tower Service contract).
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match tokio::time::timeout(timeout, inner.call(req)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(
                        timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                        "attempt timed out"
                    );
                    Err(HttpError::Timeout(timeout))
                }
            }
        })
    }
}
