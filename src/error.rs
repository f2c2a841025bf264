use std::time::Duration;

use thiserror::Error;

/// Errors raised by frame stream transports.
///
/// Connection failures are distinguishable by kind so the capture loop can
/// decide which ones are worth retrying. Auth failures and malformed
/// addresses need operator action and end the capture loop; timeouts and
/// transport faults go through reconnect backoff.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("stream authentication failed: {0}")]
    AuthFailed(String),

    #[error("stream operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("malformed stream address {address}: {reason}")]
    MalformedAddress { address: String, reason: String },

    #[error("stream transport error: {0}")]
    Transport(String),

    /// Clean end of stream. Not an interruption; the source is done.
    #[error("stream closed")]
    Closed,
}

impl StreamError {
    /// Whether the capture loop should retry after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StreamError::Timeout(_) | StreamError::Transport(_))
    }
}

/// Configuration rejected before the pipeline starts.
///
/// The pipeline never runs with an invalid configuration; every field is
/// checked by `PipelineConfig::validate` and violations surface here.
#[derive(Error, Debug)]
#[error("invalid config: {field} {problem}")]
pub struct ConfigError {
    pub field: &'static str,
    pub problem: String,
}

impl ConfigError {
    pub fn new(field: &'static str, problem: impl Into<String>) -> Self {
        Self {
            field,
            problem: problem.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(StreamError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(StreamError::Transport("reset by peer".into()).is_retryable());
        assert!(!StreamError::AuthFailed("401".into()).is_retryable());
        assert!(!StreamError::MalformedAddress {
            address: "not a url".into(),
            reason: "missing scheme".into(),
        }
        .is_retryable());
        assert!(!StreamError::Closed.is_retryable());
    }
}
