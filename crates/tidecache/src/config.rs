//! Proxy configuration

use std::num::NonZeroUsize;

use tidestore::{Error, Result};

/// Default number of cached keys
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default number of batches buffered between a drain task and its caller
pub const DEFAULT_STREAM_BUFFER: usize = 64;

/// Largest accepted stream buffer
pub const MAX_STREAM_BUFFER: usize = 1 << 20;

/// Settings for [`crate::WatchProxy`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Maximum number of keys held by the event cache
    pub capacity: usize,

    /// Batches a live stream buffers before a caller that stops reading is detached
    pub stream_buffer: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl ProxyConfig {
    /// Config with the given cache capacity and default buffering
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            ..Self::default()
        }
    }

    /// Reject values the proxy cannot run with
    pub fn validate(&self) -> Result<()> {
        self.capacity_non_zero()?;
        if self.stream_buffer == 0 || self.stream_buffer > MAX_STREAM_BUFFER {
            return Err(Error::InvalidConfig(format!(
                "stream_buffer must be between 1 and {}",
                MAX_STREAM_BUFFER
            )));
        }
        Ok(())
    }

    pub(crate) fn capacity_non_zero(&self) -> Result<NonZeroUsize> {
        NonZeroUsize::new(self.capacity)
            .ok_or_else(|| Error::InvalidConfig("capacity must be greater than 0".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn test_zero_values_rejected() {
        assert!(matches!(
            ProxyConfig::with_capacity(0).validate(),
            Err(Error::InvalidConfig(_))
        ));

        let config = ProxyConfig {
            stream_buffer: 0,
            ..ProxyConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_oversized_stream_buffer_rejected() {
        let config = ProxyConfig {
            stream_buffer: MAX_STREAM_BUFFER + 1,
            ..ProxyConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
