//! Resilient client for the external model API.
//!
//! Layer order per logical call: credential precheck, rate-limit
//! admission, deadline-bounded transport attempt, failure classification,
//! backoff and retry. See [`RetryingClient`] for the loop itself.

pub mod classify;
pub mod http;
pub mod limiter;
pub mod retry;

pub use classify::{classify, Classified, ErrorKind, TransportFailure};
pub use http::HttpTransport;
pub use limiter::RateLimiter;
pub use retry::{CallResult, ClientConfig, ClientStatus, RetryingClient, Transport, TransportResponse};
