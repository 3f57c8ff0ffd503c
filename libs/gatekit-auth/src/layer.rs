//! Bearer injection and transparent token refresh.
//!
//! The service injects `Authorization: Bearer <token>` from the
//! [`TokenStore`] and intercepts 401 responses:
//!
//! - The first 401 starts a refresh exchange. Requests that 401 while that
//!   refresh is in flight are queued (FIFO) instead of starting a second
//!   exchange; at most one refresh is ever in flight.
//! - When the refresh succeeds, the new access token is persisted, queued
//!   requests are released, and every affected request is replayed once
//!   with the fresh token.
//! - When the refresh fails, queued requests are rejected with
//!   [`HttpError::AuthRefresh`], stored credentials are cleared, and the
//!   request that started the refresh gets its original 401 back.
//! - A request is replayed at most once: the replay count is an explicit
//!   value in this service's control flow, so a replayed request that 401s
//!   again is surfaced as-is and can never loop.
//!
//! Installed via [`HttpClientBuilder::with_auth_layer`], inside the retry
//! loop, so retried attempts re-read whatever token the last refresh wrote.
//!
//! [`HttpClientBuilder::with_auth_layer`]: gatekit_http::HttpClientBuilder::with_auth_layer

use crate::refresh::{RefreshFailure, RefreshTokens};
use crate::store::TokenStore;
use bytes::Bytes;
use gatekit_http::{HttpError, ResponseBody};
use http::header::AUTHORIZATION;
use http::request::Parts;
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tower::{Layer, Service};

/// Outcome of a settled refresh, fanned out to queued requests.
type RefreshOutcome = Result<(), RefreshFailure>;

/// Shared single-flight state: the refresh-in-flight flag and the FIFO
/// queue of requests waiting for it to settle.
///
/// Locked only to flip the flag or move waiters in and out, never across
/// an await.
#[derive(Default)]
struct RefreshGate {
    refreshing: bool,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
}

/// What a request that hit a 401 should do next.
enum GateDecision {
    /// No refresh was in flight; this request runs the exchange.
    Lead,
    /// A refresh is in flight; wait for it to settle.
    Wait(oneshot::Receiver<RefreshOutcome>),
}

/// Tower layer installing [`AuthRefreshService`].
#[derive(Clone)]
pub struct AuthRefreshLayer {
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn RefreshTokens>,
    gate: Arc<Mutex<RefreshGate>>,
}

impl AuthRefreshLayer {
    /// Create a layer around the given token store and refresh client.
    #[must_use]
    pub fn new(store: Arc<dyn TokenStore>, refresher: Arc<dyn RefreshTokens>) -> Self {
        Self {
            store,
            refresher,
            gate: Arc::new(Mutex::new(RefreshGate::default())),
        }
    }
}

impl std::fmt::Debug for AuthRefreshLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRefreshLayer").finish_non_exhaustive()
    }
}

impl<S> Layer<S> for AuthRefreshLayer {
    type Service = AuthRefreshService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthRefreshService {
            inner,
            store: self.store.clone(),
            refresher: self.refresher.clone(),
            gate: self.gate.clone(),
        }
    }
}

/// Service created by [`AuthRefreshLayer`].
///
/// Clones share the refresh gate, so concurrent requests across clones
/// still de-duplicate into a single refresh.
#[derive(Clone)]
pub struct AuthRefreshService<S> {
    inner: S,
    store: Arc<dyn TokenStore>,
    refresher: Arc<dyn RefreshTokens>,
    gate: Arc<Mutex<RefreshGate>>,
}

impl<S: std::fmt::Debug> std::fmt::Debug for AuthRefreshService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthRefreshService")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<S> Service<Request<Full<Bytes>>> for AuthRefreshService<S>
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
        // Clone-swap pattern (Tower Service contract).
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let store = self.store.clone();
        let refresher = self.refresher.clone();
        let gate = self.gate.clone();

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body_bytes = collect_full(body).await;

            let token = store.access_token().await;
            let response = inner
                .call(build_attempt(&parts, &body_bytes, token.as_deref())?)
                .await?;

            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            let decision = {
                let mut gate = gate.lock();
                if gate.refreshing {
                    let (tx, rx) = oneshot::channel();
                    gate.waiters.push(tx);
                    GateDecision::Wait(rx)
                } else {
                    gate.refreshing = true;
                    GateDecision::Lead
                }
            };

            match decision {
                GateDecision::Lead => {
                    tracing::debug!(
                        method = %parts.method,
                        uri = %parts.uri,
                        "401 received, starting token refresh"
                    );
                    let outcome = run_refresh(store.as_ref(), refresher.as_ref()).await;

                    let waiters = {
                        let mut gate = gate.lock();
                        gate.refreshing = false;
                        std::mem::take(&mut gate.waiters)
                    };
                    let waiting = waiters.len();
                    for waiter in waiters {
                        if waiter.send(outcome.clone()).is_err() {
                            tracing::trace!("queued request dropped before refresh settled");
                        }
                    }

                    match outcome {
                        Ok(()) => {
                            tracing::debug!(waiting, "token refresh succeeded, replaying");
                            let fresh = store.access_token().await;
                            inner
                                .call(build_attempt(&parts, &body_bytes, fresh.as_deref())?)
                                .await
                        }
                        Err(failure) => {
                            tracing::warn!(
                                waiting,
                                reason = %failure,
                                "token refresh failed, credentials cleared"
                            );
                            // The request that started the refresh gets its
                            // original 401 back.
                            Ok(response)
                        }
                    }
                }
                GateDecision::Wait(rx) => {
                    tracing::debug!(
                        method = %parts.method,
                        uri = %parts.uri,
                        "401 received while refresh in flight, queued"
                    );
                    match rx.await {
                        Ok(Ok(())) => {
                            let fresh = store.access_token().await;
                            inner
                                .call(build_attempt(&parts, &body_bytes, fresh.as_deref())?)
                                .await
                        }
                        Ok(Err(failure)) => Err(failure.into_error()),
                        Err(_) => Err(HttpError::AuthRefresh {
                            message: "token refresh was abandoned".to_owned(),
                            status: None,
                        }),
                    }
                }
            }
        })
    }
}

/// Exchange the stored refresh token and persist the new access token.
/// A missing refresh token counts as a failure. Credentials are cleared
/// on any failure before it is reported.
async fn run_refresh(
    store: &dyn TokenStore,
    refresher: &dyn RefreshTokens,
) -> Result<(), RefreshFailure> {
    let result = match store.refresh_token().await {
        Some(refresh_token) => refresher.exchange(&refresh_token).await,
        None => Err(RefreshFailure::new(
            "no refresh token stored".to_owned(),
            None,
        )),
    };

    match result {
        Ok(access_token) => {
            store.set_access_token(access_token).await;
            Ok(())
        }
        Err(failure) => {
            store.clear().await;
            Err(failure)
        }
    }
}

/// Rebuild the request for an attempt, with the given access token (or
/// none) as a sensitive bearer header. The original request value is never
/// mutated; every attempt gets a fresh reconstruction.
fn build_attempt(
    parts: &Parts,
    body: &Bytes,
    token: Option<&str>,
) -> Result<Request<Full<Bytes>>, HttpError> {
    let mut req = Request::new(Full::new(body.clone()));
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = parts.uri.clone();
    *req.version_mut() = parts.version;
    *req.headers_mut() = parts.headers.clone();
    *req.extensions_mut() = parts.extensions.clone();

    if let Some(token) = token {
        let raw = zeroize::Zeroizing::new(format!("Bearer {token}"));
        let mut value = HeaderValue::from_str(&raw)?;
        value.set_sensitive(true);
        req.headers_mut().insert(AUTHORIZATION, value);
    }

    Ok(req)
}

/// `Full<Bytes>` never errors, so collection is infallible.
async fn collect_full(body: Full<Bytes>) -> Bytes {
    match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(never) => match never {},
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::store::InMemoryTokenStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn empty_body() -> ResponseBody {
        Full::new(Bytes::new()).map_err(|never| match never {}).boxed()
    }

    /// Inner service that answers 200 only for the expected bearer token
    /// and 401 otherwise, recording the authorization header of each call.
    #[derive(Clone)]
    struct TokenGatedService {
        valid_token: &'static str,
        calls: Arc<AtomicUsize>,
        auth_headers: Arc<Mutex<Vec<Option<String>>>>,
    }

    impl TokenGatedService {
        fn new(valid_token: &'static str) -> Self {
            Self {
                valid_token,
                calls: Arc::new(AtomicUsize::new(0)),
                auth_headers: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Service<Request<Full<Bytes>>> for TokenGatedService {
        type Response = Response<ResponseBody>;
        type Error = HttpError;
        type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<Full<Bytes>>) -> Self::Future {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let auth = req
                .headers()
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            self.auth_headers.lock().push(auth.clone());

            let expected = format!("Bearer {}", self.valid_token);
            Box::pin(async move {
                let status = if auth.as_deref() == Some(expected.as_str()) {
                    StatusCode::OK
                } else {
                    StatusCode::UNAUTHORIZED
                };
                Ok(Response::builder().status(status).body(empty_body()).unwrap())
            })
        }
    }

    /// Scripted refresher that counts exchanges and optionally delays, so
    /// tests can hold the refresh in flight while other requests 401.
    struct ScriptedRefresher {
        calls: Arc<AtomicUsize>,
        delay: Duration,
        outcome: Result<String, RefreshFailure>,
    }

    impl ScriptedRefresher {
        fn succeeding(token: &str, delay: Duration) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                delay,
                outcome: Ok(token.to_owned()),
            }
        }

        fn failing(delay: Duration) -> Self {
            Self {
                calls: Arc::new(AtomicUsize::new(0)),
                delay,
                outcome: Err(RefreshFailure::new(
                    "refresh endpoint returned 403".to_owned(),
                    Some(StatusCode::FORBIDDEN),
                )),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RefreshTokens for ScriptedRefresher {
        async fn exchange(&self, _refresh_token: &str) -> Result<String, RefreshFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.outcome.clone()
        }
    }

    fn request() -> Request<Full<Bytes>> {
        Request::builder()
            .method(http::Method::GET)
            .uri("https://api.example.com/secure")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    fn service(
        store: &InMemoryTokenStore,
        refresher: Arc<ScriptedRefresher>,
        inner: TokenGatedService,
    ) -> AuthRefreshService<TokenGatedService> {
        AuthRefreshLayer::new(Arc::new(store.clone()), refresher).layer(inner)
    }

    #[tokio::test]
    async fn valid_token_passes_through_without_refresh() {
        let store = InMemoryTokenStore::with_tokens("good", "refresh");
        let refresher = Arc::new(ScriptedRefresher::succeeding("unused", Duration::ZERO));
        let inner = TokenGatedService::new("good");
        let mut svc = service(&store, refresher.clone(), inner.clone());

        let resp = svc.call(request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(inner.calls(), 1);
        assert_eq!(refresher.calls(), 0);
    }

    #[tokio::test]
    async fn missing_token_sends_request_unauthenticated() {
        let store = InMemoryTokenStore::new();
        let refresher = Arc::new(ScriptedRefresher::failing(Duration::ZERO));
        let inner = TokenGatedService::new("good");
        let mut svc = service(&store, refresher, inner.clone());

        // No token and no refresh token: the 401 comes back after a failed
        // refresh attempt.
        let resp = svc.call(request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let headers = inner.auth_headers.lock().clone();
        assert_eq!(headers, vec![None]);
    }

    #[tokio::test]
    async fn stale_token_triggers_refresh_and_replay() {
        let store = InMemoryTokenStore::with_tokens("stale", "refresh");
        let refresher = Arc::new(ScriptedRefresher::succeeding("fresh", Duration::ZERO));
        let inner = TokenGatedService::new("fresh");
        let mut svc = service(&store, refresher.clone(), inner.clone());

        let resp = svc.call(request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(refresher.calls(), 1);
        assert_eq!(inner.calls(), 2);
        assert_eq!(store.access_token().await.as_deref(), Some("fresh"));

        let headers = inner.auth_headers.lock().clone();
        assert_eq!(
            headers,
            vec![
                Some("Bearer stale".to_owned()),
                Some("Bearer fresh".to_owned())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_401s_share_a_single_refresh() {
        let store = InMemoryTokenStore::with_tokens("stale", "refresh");
        let refresher = Arc::new(ScriptedRefresher::succeeding(
            "fresh",
            Duration::from_millis(100),
        ));
        let inner = TokenGatedService::new("fresh");
        let svc = service(&store, refresher.clone(), inner.clone());

        let mut a = svc.clone();
        let mut b = svc.clone();
        let (ra, rb) = tokio::join!(a.call(request()), b.call(request()));

        assert_eq!(ra.unwrap().status(), StatusCode::OK);
        assert_eq!(rb.unwrap().status(), StatusCode::OK);
        // One refresh for both requests; each was tried once with the stale
        // token and replayed once with the fresh one.
        assert_eq!(refresher.calls(), 1);
        assert_eq!(inner.calls(), 4);
    }

    #[tokio::test]
    async fn failed_refresh_returns_original_401_and_clears_credentials() {
        let store = InMemoryTokenStore::with_tokens("stale", "refresh");
        let refresher = Arc::new(ScriptedRefresher::failing(Duration::ZERO));
        let inner = TokenGatedService::new("fresh");
        let mut svc = service(&store, refresher.clone(), inner.clone());

        let resp = svc.call(request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(refresher.calls(), 1);
        // No replay after a failed refresh.
        assert_eq!(inner.calls(), 1);
        assert_eq!(store.access_token().await, None);
        assert_eq!(store.refresh_token().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_requests_are_rejected_when_refresh_fails() {
        let store = InMemoryTokenStore::with_tokens("stale", "refresh");
        let refresher = Arc::new(ScriptedRefresher::failing(Duration::from_millis(100)));
        let inner = TokenGatedService::new("fresh");
        let svc = service(&store, refresher.clone(), inner.clone());

        let mut a = svc.clone();
        let mut b = svc.clone();
        let (ra, rb) = tokio::join!(a.call(request()), b.call(request()));

        // The leader gets its original 401 back; the queued request is
        // rejected with the refresh failure.
        let statuses = (ra, rb);
        let (leader, waiter) = match statuses {
            (Ok(resp), Err(err)) => (resp, err),
            (Err(err), Ok(resp)) => (resp, err),
            other => panic!("expected one 401 and one refresh error, got {other:?}"),
        };
        assert_eq!(leader.status(), StatusCode::UNAUTHORIZED);
        assert!(matches!(
            waiter,
            HttpError::AuthRefresh {
                status: Some(StatusCode::FORBIDDEN),
                ..
            }
        ));
        assert_eq!(refresher.calls(), 1);
        assert_eq!(store.refresh_token().await, None);
    }

    #[tokio::test]
    async fn replayed_request_never_refreshes_twice() {
        // Server rejects even the fresh token; the replayed 401 must be
        // surfaced, not fed back into another refresh cycle.
        let store = InMemoryTokenStore::with_tokens("stale", "refresh");
        let refresher = Arc::new(ScriptedRefresher::succeeding("fresh", Duration::ZERO));
        let inner = TokenGatedService::new("some-other-token");
        let mut svc = service(&store, refresher.clone(), inner.clone());

        let resp = svc.call(request()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(refresher.calls(), 1);
        assert_eq!(inner.calls(), 2);
    }

    #[tokio::test]
    async fn bearer_header_is_marked_sensitive() {
        let parts = request().into_parts().0;
        let req = build_attempt(&parts, &Bytes::new(), Some("secret")).unwrap();
        let value = req.headers().get(AUTHORIZATION).unwrap();
        assert!(value.is_sensitive());
    }
}
