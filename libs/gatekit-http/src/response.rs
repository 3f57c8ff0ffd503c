//! HTTP response wrapper with size-limited body access.

use crate::error::HttpError;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

/// Maximum body preview captured into [`HttpError::HttpStatus`] (8 KB).
///
/// Error responses can be arbitrarily large; the preview keeps them useful
/// for debugging without buffering unbounded data into an error value.
pub const ERROR_BODY_PREVIEW_LIMIT: usize = 8 * 1024;

/// Boxed response body used throughout the client stack.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Response body parsed according to its declared content type.
///
/// JSON content types parse into structured data; everything else is
/// returned as text.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Body declared as JSON and parsed as such.
    Json(serde_json::Value),
    /// Any non-JSON body, decoded lossily as UTF-8.
    Text(String),
}

/// True when a content-type header value declares a JSON body.
///
/// Matches `application/json` and structured suffixes such as
/// `application/problem+json`, ignoring parameters like `charset`.
fn is_json_content_type(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// A received HTTP response.
///
/// Body accessors buffer the body, enforcing the client's `max_body_size`.
/// Status checking is explicit: `send()` returns any status, including
/// 4xx/5xx, and [`error_for_status`](Self::error_for_status) or the typed
/// accessors convert non-2xx into [`HttpError::HttpStatus`].
#[derive(Debug)]
pub struct HttpResponse {
    inner: Response<ResponseBody>,
    max_body_size: usize,
}

impl HttpResponse {
    pub(crate) fn new(inner: Response<ResponseBody>, max_body_size: usize) -> Self {
        Self {
            inner,
            max_body_size,
        }
    }

    /// The response status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// The raw response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// The declared content type, if any.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.inner
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }

    /// Consume the wrapper, yielding the raw `http::Response`.
    #[must_use]
    pub fn into_inner(self) -> Response<ResponseBody> {
        self.inner
    }

    /// Convert a non-2xx response into [`HttpError::HttpStatus`], buffering
    /// a bounded body preview into the error.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::HttpStatus` for non-2xx statuses and propagates
    /// transport errors hit while reading the preview.
    pub async fn error_for_status(self) -> Result<Self, HttpError> {
        if self.inner.status().is_success() {
            return Ok(self);
        }
        Err(status_error(self.inner, self.max_body_size).await)
    }

    /// Buffer the full body without checking the status code.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::BodyTooLarge` when the body exceeds the limit and
    /// `HttpError::Transport` on stream failure.
    pub async fn bytes(self) -> Result<Bytes, HttpError> {
        read_body_limited(self.inner.into_body(), self.max_body_size).await
    }

    /// Buffer the body after checking the status code.
    ///
    /// # Errors
    ///
    /// As [`bytes`](Self::bytes), plus `HttpError::HttpStatus` for non-2xx.
    pub async fn checked_bytes(self) -> Result<Bytes, HttpError> {
        checked_body(self.inner, self.max_body_size).await
    }

    /// Deserialize a successful JSON response body.
    ///
    /// # Errors
    ///
    /// `HttpError::HttpStatus` for non-2xx, `HttpError::Json` when the body
    /// does not deserialize, plus body-read errors.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T, HttpError> {
        let bytes = checked_body(self.inner, self.max_body_size).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read a successful response body as text (lossy UTF-8).
    ///
    /// # Errors
    ///
    /// `HttpError::HttpStatus` for non-2xx, plus body-read errors.
    pub async fn text(self) -> Result<String, HttpError> {
        let bytes = checked_body(self.inner, self.max_body_size).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Parse a successful response body according to its content type:
    /// JSON content types yield [`Payload::Json`], everything else
    /// [`Payload::Text`].
    ///
    /// # Errors
    ///
    /// `HttpError::HttpStatus` for non-2xx, `HttpError::Json` when a body
    /// declared as JSON fails to parse, plus body-read errors.
    pub async fn payload(self) -> Result<Payload, HttpError> {
        let json = self.content_type().is_some_and(is_json_content_type);
        let bytes = checked_body(self.inner, self.max_body_size).await?;
        if json {
            Ok(Payload::Json(serde_json::from_slice(&bytes)?))
        } else {
            Ok(Payload::Text(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }

    /// The body size limit applied by the buffering accessors.
    #[must_use]
    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }
}

/// Build the `HttpStatus` error for a non-2xx response, capturing a bounded
/// body preview. Transport errors while reading the preview win over the
/// status error; a too-large preview does not.
async fn status_error(response: Response<ResponseBody>, max_body_size: usize) -> HttpError {
    let status = response.status();
    let content_type = response
        .headers()
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let preview_limit = max_body_size.min(ERROR_BODY_PREVIEW_LIMIT);
    let body_preview = match read_body_limited(response.into_body(), preview_limit).await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(HttpError::BodyTooLarge { .. }) => "<body too large for preview>".to_owned(),
        Err(e) => return e,
    };

    HttpError::HttpStatus {
        status,
        body_preview,
        content_type,
    }
}

pub(crate) async fn checked_body(
    response: Response<ResponseBody>,
    max_body_size: usize,
) -> Result<Bytes, HttpError> {
    if !response.status().is_success() {
        return Err(status_error(response, max_body_size).await);
    }
    read_body_limited(response.into_body(), max_body_size).await
}

pub(crate) async fn read_body_limited(body: ResponseBody, limit: usize) -> Result<Bytes, HttpError> {
    let mut collected = Vec::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(HttpError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            if collected.len() + chunk.len() > limit {
                return Err(HttpError::BodyTooLarge {
                    limit,
                    actual: collected.len() + chunk.len(),
                });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(Bytes::from(collected))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http_body_util::Full;

    fn response(status: StatusCode, content_type: Option<&str>, body: &str) -> HttpResponse {
        let mut builder = Response::builder().status(status);
        if let Some(ct) = content_type {
            builder = builder.header(http::header::CONTENT_TYPE, ct);
        }
        let body: ResponseBody = Full::new(Bytes::from(body.to_owned()))
            .map_err(|never| match never {})
            .boxed();
        HttpResponse::new(builder.body(body).unwrap(), 1024)
    }

    #[test]
    fn json_content_types() {
        assert!(is_json_content_type("application/json"));
        assert!(is_json_content_type("application/json; charset=utf-8"));
        assert!(is_json_content_type("application/problem+json"));
        assert!(is_json_content_type("Application/JSON"));
        assert!(!is_json_content_type("text/plain"));
        assert!(!is_json_content_type("text/html; charset=utf-8"));
    }

    #[tokio::test]
    async fn payload_parses_json_by_content_type() {
        let resp = response(StatusCode::OK, Some("application/json"), r#"{"ok":true}"#);
        let payload = resp.payload().await.unwrap();
        assert_eq!(payload, Payload::Json(serde_json::json!({"ok": true})));
    }

    #[tokio::test]
    async fn payload_returns_text_for_non_json() {
        let resp = response(StatusCode::OK, Some("text/plain"), "hello");
        let payload = resp.payload().await.unwrap();
        assert_eq!(payload, Payload::Text("hello".into()));
    }

    #[tokio::test]
    async fn payload_without_content_type_is_text() {
        let resp = response(StatusCode::OK, None, r#"{"looks":"like json"}"#);
        let payload = resp.payload().await.unwrap();
        assert!(matches!(payload, Payload::Text(_)));
    }

    #[tokio::test]
    async fn error_for_status_captures_preview() {
        let resp = response(
            StatusCode::UNPROCESSABLE_ENTITY,
            Some("application/json"),
            r#"{"message":"name is required"}"#,
        );
        let err = resp.error_for_status().await.unwrap_err();
        match err {
            HttpError::HttpStatus {
                status,
                body_preview,
                content_type,
            } => {
                assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
                assert!(body_preview.contains("name is required"));
                assert_eq!(content_type.as_deref(), Some("application/json"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn error_for_status_passes_success_through() {
        let resp = response(StatusCode::CREATED, None, "");
        let resp = resp.error_for_status().await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn body_over_limit_is_rejected() {
        let big = "x".repeat(2048);
        let resp = response(StatusCode::OK, None, &big);
        let err = resp.bytes().await.unwrap_err();
        assert!(matches!(err, HttpError::BodyTooLarge { limit: 1024, .. }));
    }

    #[tokio::test]
    async fn json_accessor_deserializes() {
        #[derive(serde::Deserialize)]
        struct Foods {
            foods: Vec<String>,
        }
        let resp = response(
            StatusCode::OK,
            Some("application/json"),
            r#"{"foods":["ramen","tacos"]}"#,
        );
        let foods: Foods = resp.json().await.unwrap();
        assert_eq!(foods.foods, vec!["ramen", "tacos"]);
    }
}
