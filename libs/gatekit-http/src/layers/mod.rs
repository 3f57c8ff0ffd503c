//! Tower layers composing the client middleware stack.
//!
//! - [`RetryLayer`] retries transient failures with exponential backoff
//! - [`AttemptTimeoutLayer`] bounds each attempt by a timeout
//! - [`UserAgentLayer`] applies a default User-Agent header

mod retry;
mod timeout;
mod user_agent;

pub use retry::{RETRY_ATTEMPT_HEADER, RetryLayer, RetryService};
pub use timeout::{AttemptTimeoutLayer, AttemptTimeoutService};
pub use user_agent::{UserAgentLayer, UserAgentService};
