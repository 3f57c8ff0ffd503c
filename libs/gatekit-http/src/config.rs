//! Configuration types for the HTTP client.

use http::StatusCode;
use std::time::Duration;

/// Default per-attempt timeout, process-wide.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Default base delay for exponential backoff.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Default maximum response body size (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Default User-Agent header value.
pub const DEFAULT_USER_AGENT: &str = concat!("gatekit-http/", env!("CARGO_PKG_VERSION"));

/// Whether a response status is a transient server failure worth retrying.
///
/// Only the 500-599 range qualifies. 2xx/3xx are successes and 4xx is a
/// caller error; both are returned to the caller immediately. 401 in
/// particular belongs to the auth layer, not the retry loop.
#[must_use]
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Exponential backoff schedule: `base * 2^attempt`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay before the first retry.
    pub base: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Add up to 25% random jitter to each delay. Off by default so delays
    /// follow the schedule exactly.
    pub jitter: bool,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_RETRY_DELAY,
            max: Duration::from_secs(30),
            jitter: false,
        }
    }
}

impl ExponentialBackoff {
    /// Delay before retrying after the given zero-based attempt, without
    /// jitter applied.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Backoff with a caller-supplied base delay, keeping this schedule's
    /// cap and jitter setting. Used for per-request `retry_delay` overrides.
    #[must_use]
    pub fn with_base(&self, base: Duration) -> Self {
        Self { base, ..*self }
    }
}

/// Retry policy: how many times to retry and how long to wait in between.
///
/// A request is retried only when the attempt produced a transport/timeout
/// error or a 5xx response. The retry count bounds retries, not attempts:
/// `max_retries = 3` allows up to four attempts total.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub max_retries: usize,
    /// Delay schedule between attempts.
    pub backoff: ExponentialBackoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: ExponentialBackoff::default(),
        }
    }
}

impl RetryConfig {
    /// No retries; every request gets exactly one attempt.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            backoff: ExponentialBackoff::default(),
        }
    }
}

/// Per-request overrides carried as an `http::Request` extension.
///
/// Each field, when set, takes precedence over the client-level
/// configuration for that single request.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RequestOverrides {
    /// Per-attempt timeout for this request.
    pub timeout: Option<Duration>,
    /// Retry count for this request.
    pub retries: Option<usize>,
    /// Backoff base delay for this request.
    pub retry_delay: Option<Duration>,
}

impl RequestOverrides {
    /// True when no field is set and the extension can be skipped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Transport security policy for outbound request URLs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransportSecurity {
    /// Only `https://` URLs are accepted (default).
    #[default]
    TlsOnly,
    /// Plain `http://` URLs are also accepted. Intended for tests and
    /// loopback-only deployments.
    AllowInsecureHttp,
}

/// Which root certificate store to trust for TLS connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsRootConfig {
    /// OS-native certificate store (default).
    #[default]
    Native,
    /// Bundled webpki (Mozilla) roots.
    Webpki,
}

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-attempt timeout applied to every request unless overridden.
    pub request_timeout: Duration,
    /// Maximum buffered response body size in bytes.
    pub max_body_size: usize,
    /// User-Agent header applied when the request has none.
    pub user_agent: String,
    /// Retry policy.
    pub retry: RetryConfig,
    /// URL scheme policy.
    pub transport: TransportSecurity,
    /// Root certificate source for TLS.
    pub tls_roots: TlsRootConfig,
    /// How long idle pooled connections are kept alive.
    pub pool_idle_timeout: Option<Duration>,
    /// Maximum idle pooled connections per host.
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            retry: RetryConfig::default(),
            transport: TransportSecurity::default(),
            tls_roots: TlsRootConfig::default(),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 8,
        }
    }
}

impl HttpClientConfig {
    /// Preset for tests: short timeout, no retries, plain HTTP allowed so
    /// mock servers work. Uses webpki roots so construction never depends
    /// on the host OS certificate store.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            request_timeout: Duration::from_secs(5),
            retry: RetryConfig::disabled(),
            transport: TransportSecurity::AllowInsecureHttp,
            tls_roots: TlsRootConfig::Webpki,
            ..Self::default()
        }
    }

    /// Preset for short-lived control-plane calls such as token exchanges:
    /// tight timeout and no retries, leaving retry policy to the caller.
    #[must_use]
    pub fn token_endpoint() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            retry: RetryConfig::disabled(),
            ..Self::default()
        }
    }
}
