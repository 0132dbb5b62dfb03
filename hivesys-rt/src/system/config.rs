//! Runtime configuration with sensible defaults.

// Layer 1: Standard library
use std::time::Duration;

// Layer 2: Third-party
use serde::{Deserialize, Serialize};

// Layer 3: Internal
// (none)

/// Default timeout for `Behavior::init` (5 seconds).
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for calls without an explicit one (5 seconds).
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default graceful-stop timeout used during runtime shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-subscriber lifecycle event ring capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// Runtime-wide configuration.
///
/// # Examples
///
/// ```rust
/// use hivesys_rt::system::RuntimeConfig;
/// use std::time::Duration;
///
/// let config = RuntimeConfig::builder()
///     .with_call_timeout(Duration::from_secs(10))
///     .build()
///     .unwrap();
/// assert_eq!(config.call_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Timeout for `Behavior::init` unless overridden per server.
    pub init_timeout: Duration,

    /// Timeout for calls unless overridden per call site.
    pub call_timeout: Duration,

    /// Graceful-stop bound per server during runtime shutdown.
    pub shutdown_timeout: Duration,

    /// Lifecycle event ring capacity per subscriber.
    pub event_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            init_timeout: DEFAULT_INIT_TIMEOUT,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RuntimeConfig {
    /// Create a new configuration builder.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_timeout.is_zero() {
            return Err("init_timeout must be > 0".to_string());
        }
        if self.call_timeout.is_zero() {
            return Err("call_timeout must be > 0".to_string());
        }
        if self.shutdown_timeout.is_zero() {
            return Err("shutdown_timeout must be > 0".to_string());
        }
        if self.event_capacity == 0 {
            return Err("event_capacity must be > 0".to_string());
        }
        Ok(())
    }
}

/// Builder for `RuntimeConfig` with a fluent API.
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Set the default init timeout.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.config.init_timeout = timeout;
        self
    }

    /// Set the default call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Set the graceful-stop bound used during shutdown.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Set the lifecycle event ring capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    /// Build and validate the configuration.
    pub fn build(self) -> Result<RuntimeConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.init_timeout, Duration::from_secs(5));
        assert_eq!(config.call_timeout, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.event_capacity, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::builder()
            .with_init_timeout(Duration::from_secs(1))
            .with_call_timeout(Duration::from_secs(2))
            .with_shutdown_timeout(Duration::from_secs(3))
            .with_event_capacity(64)
            .build()
            .unwrap();
        assert_eq!(config.init_timeout, Duration::from_secs(1));
        assert_eq!(config.call_timeout, Duration::from_secs(2));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(config.event_capacity, 64);
    }

    #[test]
    fn test_validation_rejects_zero_timeouts() {
        assert!(RuntimeConfig::builder()
            .with_init_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(RuntimeConfig::builder()
            .with_call_timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(RuntimeConfig::builder()
            .with_event_capacity(0)
            .build()
            .is_err());
    }
}
