//! Error types for tidestore

use thiserror::Error;

/// Result type alias for watch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by watch backends and the layers built on them
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The backend refused or failed to establish a watch subscription
    #[error("failed to subscribe to key {key}: {reason}")]
    Subscription {
        /// Subscription key
        key: String,
        /// Backend-provided reason
        reason: String,
    },

    /// A live watch stream failed after the subscription was established
    #[error("watch stream for key {key} terminated: {reason}")]
    StreamTerminated {
        /// Subscription key
        key: String,
        /// Backend-provided reason
        reason: String,
    },

    /// A watcher fell behind the backend and missed batches
    #[error("watcher on key {key} lagged behind by {skipped} batches")]
    Lagged {
        /// Subscription key
        key: String,
        /// Number of batches dropped for this watcher
        skipped: u64,
    },

    /// Backend has been shut down
    #[error("backend is closed")]
    Closed,

    /// Rejected configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Subscription error for `key`
    pub fn subscription(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Subscription {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Stream termination error for `key`
    pub fn stream_terminated(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::StreamTerminated {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::subscription("foo", "connection refused");
        assert_eq!(
            err.to_string(),
            "failed to subscribe to key foo: connection refused"
        );

        let err = Error::Lagged {
            key: "bar".to_string(),
            skipped: 3,
        };
        assert_eq!(err.to_string(), "watcher on key bar lagged behind by 3 batches");
    }
}
