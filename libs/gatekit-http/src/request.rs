//! Request builder.
//!
//! Builder methods accumulate state and defer failures: an invalid header
//! or URL is remembered and surfaced by [`send`](RequestBuilder::send), so
//! call chains stay linear. A request is immutable once issued; retries and
//! auth replays reconstruct it from retained parts instead of mutating it.

use crate::builder::InnerService;
use crate::config::{RequestOverrides, TransportSecurity};
use crate::error::{HttpError, InvalidUriKind};
use crate::response::HttpResponse;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Uri};
use http_body_util::Full;
use serde::Serialize;
use std::time::Duration;
use tower::ServiceExt;

/// Request body variants, each with its default content type.
#[derive(Debug)]
enum BodyKind {
    Empty,
    /// Raw bytes with an optional explicit content type.
    Bytes(Bytes),
    /// JSON-serialized body (`application/json`).
    Json(Bytes),
    /// URL-encoded form body (`application/x-www-form-urlencoded`).
    Form(String),
}

/// Builder for a single HTTP request.
///
/// Created by the verb methods on [`HttpClient`](crate::HttpClient).
#[must_use = "RequestBuilder does nothing until .send() is called"]
#[derive(Debug)]
pub struct RequestBuilder {
    service: InnerService,
    max_body_size: usize,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: BodyKind,
    overrides: RequestOverrides,
    transport: TransportSecurity,
    error: Option<HttpError>,
}

impl RequestBuilder {
    pub(crate) fn new(
        service: InnerService,
        max_body_size: usize,
        method: Method,
        url: String,
        transport: TransportSecurity,
    ) -> Self {
        Self {
            service,
            max_body_size,
            method,
            url,
            headers: HeaderMap::new(),
            body: BodyKind::Empty,
            overrides: RequestOverrides::default(),
            transport,
            error: None,
        }
    }

    /// Set a header, replacing any previous value for the same name.
    ///
    /// Invalid names or values are deferred and reported by `send()`.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }
        match (
            HeaderName::try_from(name),
            HeaderValue::try_from(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            (Err(e), _) => self.error = Some(e.into()),
            (_, Err(e)) => self.error = Some(e.into()),
        }
        self
    }

    /// Set multiple headers; later entries win on duplicate names.
    pub fn headers<'a>(mut self, entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        for (name, value) in entries {
            self = self.header(name, value);
        }
        self
    }

    /// Per-attempt timeout for this request only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.overrides.timeout = Some(timeout);
        self
    }

    /// Retry count for this request only.
    pub fn retries(mut self, retries: usize) -> Self {
        self.overrides.retries = Some(retries);
        self
    }

    /// Backoff base delay for this request only.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.overrides.retry_delay = Some(delay);
        self
    }

    /// Raw request body. Set a content type explicitly via
    /// [`header`](Self::header) when the server needs one.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = BodyKind::Bytes(body.into());
        self
    }

    /// JSON request body; sets `content-type: application/json` unless a
    /// content type was set explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::Json`] when serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        let bytes = serde_json::to_vec(body)?;
        self.body = BodyKind::Json(Bytes::from(bytes));
        Ok(self)
    }

    /// URL-encoded form body; sets
    /// `content-type: application/x-www-form-urlencoded` unless a content
    /// type was set explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::FormEncode`] when serialization fails.
    pub fn form<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        let encoded = serde_urlencoded::to_string(body)?;
        self.body = BodyKind::Form(encoded);
        Ok(self)
    }

    /// Issue the request.
    ///
    /// Returns the response whatever its status; use
    /// [`error_for_status`](HttpResponse::error_for_status) or the typed
    /// body accessors to convert non-2xx into errors.
    ///
    /// # Errors
    ///
    /// Any deferred builder error, URL validation failures, and
    /// network/timeout failures from the attempt(s).
    pub async fn send(self) -> Result<HttpResponse, HttpError> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let uri = validate_url(&self.url, self.transport)?;

        let (body, default_content_type) = match self.body {
            BodyKind::Empty => (Bytes::new(), None),
            BodyKind::Bytes(bytes) => (bytes, None),
            BodyKind::Json(bytes) => (bytes, Some(HeaderValue::from_static("application/json"))),
            BodyKind::Form(encoded) => (
                Bytes::from(encoded),
                Some(HeaderValue::from_static(
                    "application/x-www-form-urlencoded",
                )),
            ),
        };

        let mut req = Request::builder()
            .method(self.method)
            .uri(uri)
            .body(Full::new(body))?;

        *req.headers_mut() = self.headers;
        if let Some(content_type) = default_content_type
            && !req.headers().contains_key(CONTENT_TYPE)
        {
            req.headers_mut().insert(CONTENT_TYPE, content_type);
        }

        if !self.overrides.is_empty() {
            req.extensions_mut().insert(self.overrides);
        }

        let response = self.service.oneshot(req).await?;
        Ok(HttpResponse::new(response, self.max_body_size))
    }
}

/// Validate a request URL against the transport security policy.
fn validate_url(url: &str, transport: TransportSecurity) -> Result<Uri, HttpError> {
    let uri: Uri = url.parse().map_err(|e| HttpError::InvalidUrl {
        kind: InvalidUriKind::Parse,
        message: format!("{url}: {e}"),
    })?;

    match uri.scheme_str() {
        Some("https") => {}
        Some("http") => {
            if transport == TransportSecurity::TlsOnly {
                return Err(HttpError::InvalidUrl {
                    kind: InvalidUriKind::InsecureScheme,
                    message: format!("plain http not allowed: {url}"),
                });
            }
        }
        Some(other) => {
            return Err(HttpError::InvalidUrl {
                kind: InvalidUriKind::UnsupportedScheme,
                message: format!("unsupported scheme {other}: {url}"),
            });
        }
        None => {
            return Err(HttpError::InvalidUrl {
                kind: InvalidUriKind::MissingScheme,
                message: format!("missing scheme: {url}"),
            });
        }
    }

    if uri.host().is_none() {
        return Err(HttpError::InvalidUrl {
            kind: InvalidUriKind::MissingHost,
            message: format!("missing host: {url}"),
        });
    }

    Ok(uri)
}
