//! Error types for calls that cross the adapter boundary.
//!
//! Signal providers, the decision provider and execution adapters all report
//! failures as [`CallError`], so the retry harness, the risk gate and the
//! scheduler can tell transient faults from fatal ones without inspecting
//! venue-specific error text.

use thiserror::Error;

/// Failure of a single outbound call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// Connection, DNS or TLS failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within its deadline.
    #[error("call timed out: {0}")]
    Timeout(String),

    /// Remote answered with a non-success status.
    #[error("unexpected status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// First part of the response body.
        body: String,
    },

    /// Response arrived but could not be decoded.
    #[error("undecodable response: {0}")]
    Decode(String),

    /// Remote understood the request and refused it (order rejected, `ok: false`).
    #[error("rejected: {0}")]
    Rejected(String),

    /// Local misconfiguration (missing credentials, unknown asset).
    #[error("configuration error: {0}")]
    Config(String),
}

impl CallError {
    /// Creates a status error, keeping at most 200 characters of the body.
    pub fn status(status: u16, body: impl AsRef<str>) -> Self {
        Self::Status {
            status,
            body: body.as_ref().chars().take(200).collect(),
        }
    }

    /// Creates a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Returns true if repeating the same call may succeed.
    ///
    /// Every HTTP-level failure is retryable, including client errors and
    /// undecodable bodies. Rejections and configuration errors are not.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::Status { .. } | Self::Decode(_)
        )
    }

    /// Returns true if the fault lies with the network or the remote side
    /// rather than with the request itself.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            Self::status(status.as_u16(), err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result alias for adapter calls.
pub type CallResult<T> = std::result::Result<T, CallError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_body_truncated() {
        let body = "x".repeat(500);
        match CallError::status(502, &body) {
            CallError::Status { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body.len(), 200);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CallError::Transport("reset".into()).is_retryable());
        assert!(CallError::Timeout("40s".into()).is_retryable());
        assert!(CallError::status(404, "missing").is_retryable());
        assert!(CallError::Decode("eof".into()).is_retryable());
        assert!(!CallError::rejected("insufficient margin").is_retryable());
        assert!(!CallError::config("no key").is_retryable());
    }

    #[test]
    fn test_transient_classification() {
        assert!(CallError::Transport("reset".into()).is_transient());
        assert!(CallError::status(503, "busy").is_transient());
        assert!(CallError::status(429, "slow down").is_transient());
        assert!(!CallError::status(400, "bad").is_transient());
        assert!(!CallError::Decode("eof".into()).is_transient());
        assert!(!CallError::rejected("no").is_transient());
    }

    #[test]
    fn test_display() {
        let err = CallError::status(500, "oops");
        assert_eq!(err.to_string(), "unexpected status 500: oops");
        assert_eq!(
            CallError::rejected("order too small").to_string(),
            "rejected: order too small"
        );
    }

    #[test]
    fn test_from_json_error() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        assert!(matches!(CallError::from(err), CallError::Decode(_)));
    }
}
