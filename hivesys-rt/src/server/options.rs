//! Options accepted by `Runtime::start`.

// Layer 1: Standard library imports
use std::time::Duration;

// Layer 2: Third-party crate imports
use serde_json::Value;

// Layer 3: Internal module imports
// (none)

/// Per-server start options.
///
/// All fields are optional; unset timeouts fall back to the runtime
/// configuration.
///
/// # Example
/// ```rust
/// use hivesys_rt::server::StartOptions;
/// use serde_json::json;
/// use std::time::Duration;
///
/// let options = StartOptions::new()
///     .with_name("billing")
///     .with_init_args(json!({"currency": "EUR"}))
///     .with_init_timeout(Duration::from_secs(2));
/// assert_eq!(options.name.as_deref(), Some("billing"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Register the server under this key in the local registry.
    pub name: Option<String>,

    /// Named registry to register in; `None` means the default registry.
    pub registry: Option<String>,

    /// Arguments passed to `Behavior::init`.
    pub init_args: Option<Value>,

    /// Override for the runtime's init timeout.
    pub init_timeout: Option<Duration>,

    /// Back-pressure bound: when set, enqueueing beyond this many pending
    /// messages fails with `Overloaded`. Unset means unbounded.
    pub max_queue_len: Option<usize>,
}

impl StartOptions {
    /// Options with every field unset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the server under `name` in the default registry.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Register in the named registry instead of the default one.
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Arguments handed to `init`.
    pub fn with_init_args(mut self, args: Value) -> Self {
        self.init_args = Some(args);
        self
    }

    /// Per-server init timeout.
    pub fn with_init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = Some(timeout);
        self
    }

    /// Enable queue back-pressure at the given bound.
    pub fn with_max_queue_len(mut self, limit: usize) -> Self {
        self.max_queue_len = Some(limit);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_are_unset() {
        let options = StartOptions::new();
        assert!(options.name.is_none());
        assert!(options.registry.is_none());
        assert!(options.init_args.is_none());
        assert!(options.init_timeout.is_none());
        assert!(options.max_queue_len.is_none());
    }

    #[test]
    fn test_builder_chain() {
        let options = StartOptions::new()
            .with_name("a")
            .with_registry("custom")
            .with_init_args(json!([1, 2]))
            .with_init_timeout(Duration::from_millis(250))
            .with_max_queue_len(64);
        assert_eq!(options.name.as_deref(), Some("a"));
        assert_eq!(options.registry.as_deref(), Some("custom"));
        assert_eq!(options.init_args, Some(json!([1, 2])));
        assert_eq!(options.init_timeout, Some(Duration::from_millis(250)));
        assert_eq!(options.max_queue_len, Some(64));
    }
}
