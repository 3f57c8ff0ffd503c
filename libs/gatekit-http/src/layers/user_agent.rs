//! Layer that applies a default User-Agent header.

use http::{HeaderValue, Request, header::USER_AGENT};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Inserts the configured User-Agent into requests that have none.
///
/// A User-Agent set explicitly on the request wins.
#[derive(Debug, Clone)]
pub struct UserAgentLayer {
    value: HeaderValue,
}

impl UserAgentLayer {
    /// Create a layer from an already validated header value.
    #[must_use]
    pub fn new(value: HeaderValue) -> Self {
        Self { value }
    }
}

impl<S> Layer<S> for UserAgentLayer {
    type Service = UserAgentService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        UserAgentService {
            inner,
            value: self.value.clone(),
        }
    }
}

/// Service created by [`UserAgentLayer`].
#[derive(Debug, Clone)]
pub struct UserAgentService<S> {
    inner: S,
    value: HeaderValue,
}

impl<S, B> Service<Request<B>> for UserAgentService<S>
where
    S: Service<Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<B>) -> Self::Future {
        if !req.headers().contains_key(USER_AGENT) {
            req.headers_mut().insert(USER_AGENT, self.value.clone());
        }
        self.inner.call(req)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::future::{Ready, ready};

    /// Inner service that echoes the User-Agent header back as its response.
    #[derive(Clone)]
    struct EchoUa;

    impl Service<Request<()>> for EchoUa {
        type Response = Option<String>;
        type Error = Infallible;
        type Future = Ready<Result<Self::Response, Self::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, req: Request<()>) -> Self::Future {
            let ua = req
                .headers()
                .get(USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            ready(Ok(ua))
        }
    }

    #[tokio::test]
    async fn inserts_user_agent_when_absent() {
        let layer = UserAgentLayer::new(HeaderValue::from_static("gateway-test/1.0"));
        let mut svc = layer.layer(EchoUa);

        let req = Request::builder().uri("https://example.com").body(()).unwrap();
        let ua = svc.call(req).await.unwrap();
        assert_eq!(ua.as_deref(), Some("gateway-test/1.0"));
    }

    #[tokio::test]
    async fn preserves_explicit_user_agent() {
        let layer = UserAgentLayer::new(HeaderValue::from_static("gateway-test/1.0"));
        let mut svc = layer.layer(EchoUa);

        let req = Request::builder()
            .uri("https://example.com")
            .header(USER_AGENT, "custom/2.0")
            .body(())
            .unwrap();
        let ua = svc.call(req).await.unwrap();
        assert_eq!(ua.as_deref(), Some("custom/2.0"));
    }
}
