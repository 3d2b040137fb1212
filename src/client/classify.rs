//! Failure classification for transport errors.
//!
//! Every raw failure coming back from a transport is mapped to exactly one
//! [`ErrorKind`] plus a retry verdict. Nothing crosses the client boundary
//! unclassified; callers only ever see this vocabulary.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Raw failure reported by a [`Transport`](crate::client::Transport).
///
/// This is the pre-classification shape: it preserves what the wire said
/// (status code, body) without deciding what the caller should do about it.
#[derive(Debug, Clone, Error)]
pub enum TransportFailure {
    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,

    /// DNS resolution or TCP connect failed.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Anything the transport could not express in the variants above.
    #[error("{0}")]
    Other(String),
}

/// Closed set of failure kinds surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    RateLimit,
    Timeout,
    Network,
    Api,
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Authentication => "authentication_error",
            ErrorKind::Authorization => "authorization_error",
            ErrorKind::RateLimit => "rate_limit_error",
            ErrorKind::Timeout => "timeout_error",
            ErrorKind::Network => "network_error",
            ErrorKind::Api => "api_error",
            ErrorKind::Unknown => "unknown_error",
        };
        f.write_str(name)
    }
}

/// Outcome of classifying one [`TransportFailure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classified {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub message: String,
}

/// Map a raw failure to its kind and retry verdict.
///
/// Rules are checked in order; the first match wins. `timeout` is the
/// deadline that was in force, used only to render the timeout message.
pub fn classify(failure: &TransportFailure, timeout: Duration) -> Classified {
    match failure {
        TransportFailure::Timeout => Classified {
            kind: ErrorKind::Timeout,
            retryable: true,
            message: format!("Request timeout after {}ms", timeout.as_millis()),
        },
        TransportFailure::Connect(detail) => Classified {
            kind: ErrorKind::Network,
            retryable: true,
            message: format!("Network error: {detail}"),
        },
        TransportFailure::Http { status: 401, .. } => Classified {
            kind: ErrorKind::Authentication,
            retryable: false,
            message: "Invalid or missing API key".to_string(),
        },
        TransportFailure::Http { status: 403, .. } => Classified {
            kind: ErrorKind::Authorization,
            retryable: false,
            message: "Access denied or unregistered caller".to_string(),
        },
        TransportFailure::Http { status: 429, body } => Classified {
            kind: ErrorKind::RateLimit,
            retryable: true,
            message: if body.trim().is_empty() {
                "Rate limit exceeded".to_string()
            } else {
                body.trim().to_string()
            },
        },
        TransportFailure::Http { status, body } if *status >= 500 => Classified {
            kind: ErrorKind::Api,
            retryable: true,
            message: format!("API error ({status}): {}", body.trim()),
        },
        TransportFailure::Http { status, body } if (400..500).contains(status) => Classified {
            kind: ErrorKind::Api,
            retryable: false,
            message: format!("API error ({status}): {}", body.trim()),
        },
        TransportFailure::Http { status, body } => Classified {
            kind: ErrorKind::Unknown,
            retryable: false,
            message: format!("Unexpected status {status}: {}", body.trim()),
        },
        TransportFailure::Other(detail) => Classified {
            kind: ErrorKind::Unknown,
            retryable: false,
            message: detail.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http(status: u16, body: &str) -> TransportFailure {
        TransportFailure::Http {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_timeout_is_retryable_with_deadline_in_message() {
        let c = classify(&TransportFailure::Timeout, Duration::from_millis(2500));
        assert_eq!(c.kind, ErrorKind::Timeout);
        assert!(c.retryable);
        assert_eq!(c.message, "Request timeout after 2500ms");
    }

    #[test]
    fn test_connect_failure_is_network() {
        let c = classify(
            &TransportFailure::Connect("dns lookup failed".into()),
            Duration::from_secs(1),
        );
        assert_eq!(c.kind, ErrorKind::Network);
        assert!(c.retryable);
    }

    #[test]
    fn test_401_is_fatal_authentication() {
        let c = classify(&http(401, "unauthorized"), Duration::from_secs(1));
        assert_eq!(c.kind, ErrorKind::Authentication);
        assert!(!c.retryable);
        assert_eq!(c.message, "Invalid or missing API key");
    }

    #[test]
    fn test_403_is_fatal_authorization() {
        let c = classify(&http(403, ""), Duration::from_secs(1));
        assert_eq!(c.kind, ErrorKind::Authorization);
        assert!(!c.retryable);
    }

    #[test]
    fn test_429_uses_upstream_body_when_present() {
        let c = classify(&http(429, "quota exhausted until 12:00"), Duration::from_secs(1));
        assert_eq!(c.kind, ErrorKind::RateLimit);
        assert!(c.retryable);
        assert_eq!(c.message, "quota exhausted until 12:00");
    }

    #[test]
    fn test_429_falls_back_to_default_message() {
        let c = classify(&http(429, "  "), Duration::from_secs(1));
        assert_eq!(c.message, "Rate limit exceeded");
    }

    #[test]
    fn test_5xx_is_retryable_api_error() {
        for status in [500, 502, 503] {
            let c = classify(&http(status, "oops"), Duration::from_secs(1));
            assert_eq!(c.kind, ErrorKind::Api);
            assert!(c.retryable, "status {status} should be retryable");
        }
    }

    #[test]
    fn test_other_4xx_fails_fast() {
        for status in [400, 404, 422] {
            let c = classify(&http(status, "bad request"), Duration::from_secs(1));
            assert_eq!(c.kind, ErrorKind::Api);
            assert!(!c.retryable, "status {status} must not be retried");
        }
    }

    #[test]
    fn test_unrecognized_failure_is_unknown() {
        let c = classify(
            &TransportFailure::Other("stream reset".into()),
            Duration::from_secs(1),
        );
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert!(!c.retryable);
        assert_eq!(c.message, "stream reset");
    }

    #[test]
    fn test_sub_400_status_is_unknown() {
        let c = classify(&http(302, "moved"), Duration::from_secs(1));
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert!(!c.retryable);
    }
}
