//! HTTP client handle.

use crate::builder::{HttpClientBuilder, InnerService};
use crate::config::TransportSecurity;
use crate::request::RequestBuilder;
use http::Method;

/// A cheap-to-clone HTTP client.
///
/// Clones share the middleware stack and the underlying connection pool;
/// concurrent requests proceed independently and are never serialized
/// against each other.
#[derive(Debug, Clone)]
pub struct HttpClient {
    service: InnerService,
    max_body_size: usize,
    transport: TransportSecurity,
}

impl HttpClient {
    pub(crate) fn new(
        service: InnerService,
        max_body_size: usize,
        transport: TransportSecurity,
    ) -> Self {
        Self {
            service,
            max_body_size,
            transport,
        }
    }

    /// Start building a client.
    #[must_use]
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// Build a request with an arbitrary method.
    pub fn request(&self, method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(
            self.service.clone(),
            self.max_body_size,
            method,
            url.into(),
            self.transport,
        )
    }

    /// GET request.
    pub fn get(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::GET, url)
    }

    /// POST request.
    pub fn post(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::POST, url)
    }

    /// PUT request.
    pub fn put(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::PUT, url)
    }

    /// PATCH request.
    pub fn patch(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::PATCH, url)
    }

    /// DELETE request.
    pub fn delete(&self, url: impl Into<String>) -> RequestBuilder {
        self.request(Method::DELETE, url)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::config::{ExponentialBackoff, HttpClientConfig, RetryConfig};
    use crate::error::HttpError;
    use crate::response::Payload;
    use httpmock::prelude::*;
    use std::time::Duration;

    fn init_test_logging() {
        tracing_subscriber::fmt().with_test_writer().try_init().ok();
    }

    /// Client preset for mock servers: plain HTTP, no retries.
    fn test_client() -> HttpClient {
        init_test_logging();
        HttpClientBuilder::with_config(HttpClientConfig::for_testing())
            .build()
            .unwrap()
    }

    /// Client with fast retries enabled for attempt-count tests.
    fn retrying_client(max_retries: usize) -> HttpClient {
        init_test_logging();
        let mut config = HttpClientConfig::for_testing();
        config.retry = RetryConfig {
            max_retries,
            backoff: ExponentialBackoff {
                base: Duration::from_millis(10),
                max: Duration::from_millis(100),
                jitter: false,
            },
        };
        HttpClientBuilder::with_config(config).build().unwrap()
    }

    #[tokio::test]
    async fn get_parses_json_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/foods");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"foods":["ramen","tacos","pho"]}"#);
        });

        #[derive(serde::Deserialize)]
        struct Foods {
            foods: Vec<String>,
        }

        let client = test_client();
        let foods: Foods = client
            .get(server.url("/foods"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(foods.foods.len(), 3);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn post_sends_json_body() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/foods")
                .header("content-type", "application/json")
                .json_body(serde_json::json!({"name": "ramen"}));
            then.status(201)
                .header("content-type", "application/json")
                .body(r#"{"id":1,"name":"ramen"}"#);
        });

        let client = test_client();
        let resp = client
            .post(server.url("/foods"))
            .json(&serde_json::json!({"name": "ramen"}))
            .unwrap()
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 201);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn put_patch_delete_use_their_verbs() {
        let server = MockServer::start();
        let put = server.mock(|when, then| {
            when.method(PUT).path("/foods/1");
            then.status(200);
        });
        let patch = server.mock(|when, then| {
            when.method(PATCH).path("/foods/1");
            then.status(200);
        });
        let delete = server.mock(|when, then| {
            when.method(DELETE).path("/foods/1");
            then.status(204);
        });

        let client = test_client();
        client.put(server.url("/foods/1")).send().await.unwrap();
        client.patch(server.url("/foods/1")).send().await.unwrap();
        let resp = client.delete(server.url("/foods/1")).send().await.unwrap();

        assert_eq!(resp.status(), 204);
        assert_eq!(put.calls(), 1);
        assert_eq!(patch.calls(), 1);
        assert_eq!(delete.calls(), 1);
    }

    #[tokio::test]
    async fn client_error_surfaces_immediately_without_retry() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404)
                .header("content-type", "application/json")
                .body(r#"{"message":"not found"}"#);
        });

        let client = retrying_client(3);
        let err = client
            .get(server.url("/missing"))
            .send()
            .await
            .unwrap()
            .error_for_status()
            .await
            .unwrap_err();

        match err {
            HttpError::HttpStatus {
                status,
                body_preview,
                ..
            } => {
                assert_eq!(status, 404);
                assert!(body_preview.contains("not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_exhaustion() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(503).body("unavailable");
        });

        let client = retrying_client(2);
        let resp = client.get(server.url("/flaky")).send().await.unwrap();

        // Last response is returned as-is after N+1 attempts.
        assert_eq!(resp.status(), 503);
        assert_eq!(mock.calls(), 3);
    }

    #[tokio::test]
    async fn per_request_retries_override_client_config() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/flaky");
            then.status(500);
        });

        let client = retrying_client(3);
        let resp = client
            .get(server.url("/flaky"))
            .retries(0)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status(), 500);
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn slow_server_hits_attempt_timeout() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_secs(10));
        });

        let client = test_client();
        let err = client
            .get(server.url("/slow"))
            .timeout(Duration::from_millis(100))
            .send()
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Timeout(_)));
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn connection_failure_is_a_transport_error() {
        // Port 1 is essentially never listening.
        let client = test_client();
        let err = client
            .get("http://127.0.0.1:1/unreachable")
            .send()
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::Transport(_)));
        assert!(err.is_network());
    }

    #[tokio::test]
    async fn text_responses_parse_by_content_type() {
        let server = MockServer::start();
        let _mock = server.mock(|when, then| {
            when.method(GET).path("/status");
            then.status(200)
                .header("content-type", "text/plain")
                .body("all good");
        });

        let client = test_client();
        let payload = client
            .get(server.url("/status"))
            .send()
            .await
            .unwrap()
            .payload()
            .await
            .unwrap();

        assert_eq!(payload, Payload::Text("all good".into()));
    }

    #[tokio::test]
    async fn custom_headers_are_sent() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/with-headers")
                .header("x-api-key", "secret-key")
                .header("accept", "application/json");
            then.status(200);
        });

        let client = test_client();
        client
            .get(server.url("/with-headers"))
            .headers([("x-api-key", "secret-key"), ("accept", "application/json")])
            .send()
            .await
            .unwrap();

        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn invalid_header_is_deferred_to_send() {
        let client = test_client();
        let err = client
            .get("http://localhost/any")
            .header("bad header name", "value")
            .send()
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::InvalidHeaderName(_)));
    }
}
