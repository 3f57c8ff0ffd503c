//! Retry with bounded exponential backoff.
//!
//! A request is retried only when the attempt produced a transient failure:
//! a transport or timeout error (no response obtained) or a 5xx response.
//! Successes (2xx/3xx) and client errors (4xx) are returned immediately;
//! a 4xx reflects the request, not a transient condition. After exhausting
//! the configured retries the last response or error is returned as-is.
//!
//! Delays between attempts follow `retry_delay * 2^attempt`, capped by the
//! backoff maximum. Per-request `retries`/`retry_delay` overrides are read
//! from the [`RequestOverrides`] extension.

use crate::config::{ExponentialBackoff, RequestOverrides, RetryConfig, is_retryable_status};
use crate::error::HttpError;
use crate::response::ResponseBody;
use bytes::Bytes;
use http::request::Parts;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::{Layer, Service};

/// Header tagging retry attempts with their 1-based retry index.
///
/// Absent from the initial attempt. Useful for server-side log correlation.
pub const RETRY_ATTEMPT_HEADER: &str = "x-retry-attempt";

/// How much of a retried response's body is drained before the next
/// attempt, so the pooled connection can be reused.
const RETRY_DRAIN_LIMIT: usize = 64 * 1024;

/// Why an attempt is being retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryTrigger {
    /// Connection-level failure, no response obtained.
    Transport,
    /// The attempt exceeded its timeout.
    Timeout,
    /// A 5xx response.
    Status(StatusCode),
}

impl std::fmt::Display for RetryTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => f.write_str("transport error"),
            Self::Timeout => f.write_str("timeout"),
            Self::Status(status) => write!(f, "status {status}"),
        }
    }
}

fn classify(result: &Result<Response<ResponseBody>, HttpError>) -> Option<RetryTrigger> {
    match result {
        Ok(resp) if is_retryable_status(resp.status()) => Some(RetryTrigger::Status(resp.status())),
        Ok(_) => None,
        Err(HttpError::Timeout(_)) => Some(RetryTrigger::Timeout),
        Err(HttpError::Transport(_)) => Some(RetryTrigger::Transport),
        Err(_) => None,
    }
}

/// Delay before the next attempt, with jitter applied when configured.
fn backoff_delay(backoff: &ExponentialBackoff, attempt: usize) -> Duration {
    let attempt = u32::try_from(attempt).unwrap_or(u32::MAX);
    let delay = backoff.delay_for(attempt);
    if backoff.jitter {
        delay.mul_f64(1.0 + rand::random::<f64>() * 0.25)
    } else {
        delay
    }
}

/// Tower layer adding retry to the client stack.
#[derive(Debug, Clone)]
pub struct RetryLayer {
    config: RetryConfig,
}

impl RetryLayer {
    /// Create a layer with the given retry policy.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: self.config.clone(),
        }
    }
}

/// Service created by [`RetryLayer`].
///
/// Operates on `Request<Full<Bytes>>` so the body can be cloned for each
/// attempt; the original request is never mutated across attempts.
#[derive(Debug, Clone)]
pub struct RetryService<S> {
    inner: S,
    config: RetryConfig,
}

impl<S> Service<Request<Full<Bytes>>> for RetryService<S>
where
    S: Service<Request<Full<Bytes>>, Response = Response<ResponseBody>, Error = HttpError>
        + Clone
        + Send
        + 'static,
    S::Future: Send,
{
    type Response = Response<ResponseBody>;
    type Error = HttpError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
        let overrides = req
            .extensions()
            .get::<RequestOverrides>()
            .copied()
            .unwrap_or_default();
        let max_retries = overrides.retries.unwrap_or(self.config.max_retries);
        let backoff = match overrides.retry_delay {
            Some(base) => self.config.backoff.with_base(base),
            None => self.config.backoff,
        };

        // Clone-swap pattern (Tower Service contract).
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body_bytes = collect_full(body).await;

            let mut attempt = 0usize;
            loop {
                let result = inner.call(rebuild(&parts, &body_bytes, attempt)).await;

                let Some(trigger) = classify(&result) else {
                    return result;
                };

                if attempt >= max_retries {
                    if max_retries > 0 {
                        tracing::debug!(
                            method = %parts.method,
                            uri = %parts.uri,
                            attempts = attempt + 1,
                            trigger = %trigger,
                            "retries exhausted"
                        );
                    }
                    return result;
                }

                if let Ok(resp) = result {
                    drain_body(resp).await;
                }

                let delay = backoff_delay(&backoff, attempt);
                tracing::debug!(
                    method = %parts.method,
                    uri = %parts.uri,
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    trigger = %trigger,
                    "retrying request"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        })
    }
}

/// `Full<Bytes>` never errors, so collection is infallible.
async fn collect_full(body: Full<Bytes>) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}

fn rebuild(parts: &Parts, body: &Bytes, attempt: usize) -> Request<Full<Bytes>> {
    let mut req = Request::new(Full::new(body.clone()));
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = parts.uri.clone();
    *req.version_mut() = parts.version;
    *req.headers_mut() = parts.headers.clone();
    *req.extensions_mut() = parts.extensions.clone();

    if attempt > 0 {
        req.headers_mut()
            .insert(RETRY_ATTEMPT_HEADER, attempt.into());
    }

    req
}

/// Drain (a bounded amount of) a retried response's body so the pooled
/// connection can be reused for the next attempt.
async fn drain_body(response: Response<ResponseBody>) {
    let mut body = std::pin::pin!(response.into_body());
    let mut drained = 0usize;
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Some(chunk) = frame.data_ref() {
                    drained += chunk.len();
                    if drained > RETRY_DRAIN_LIMIT {
                        break;
                    }
                }
            }
            Err(_) => break,
        }
    }
}
