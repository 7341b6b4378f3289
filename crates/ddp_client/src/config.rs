//! Configuration for the session engine.

use ddp_ejson::MergeMode;
use std::collections::HashMap;
use std::time::Duration;

/// Configuration for a DDP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server URL, e.g. `wss://example.com/websocket`.
    pub url: String,
    /// Protocol version proposed in the handshake.
    pub version: String,
    /// Versions offered in the handshake, most preferred first.
    pub support: Vec<String>,
    /// Reconnect automatically when the transport drops.
    pub auto_reconnect: bool,
    /// Re-send every active subscription after a reconnect.
    pub auto_resubscribe: bool,
    /// Delay policy between reconnect attempts.
    pub reconnect: ReconnectStrategy,
    /// How long a single reconnect attempt may take.
    pub connect_timeout: Duration,
    /// Window in which collection changes collapse into one notification.
    pub debounce: Duration,
    /// Capacity of the client event broadcast channel.
    pub event_capacity: usize,
    /// Maximum number of method calls held while offline.
    pub offline_queue_limit: usize,
    /// How `changed` payloads merge nested objects, unless overridden.
    pub merge_mode: MergeMode,
    /// Per-collection merge mode overrides.
    pub collection_merge_modes: HashMap<String, MergeMode>,
}

impl ClientConfig {
    /// Creates a configuration for the given server URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            version: "1".into(),
            support: vec!["1".into()],
            auto_reconnect: true,
            auto_resubscribe: true,
            reconnect: ReconnectStrategy::default(),
            connect_timeout: Duration::from_secs(15),
            debounce: Duration::from_millis(330),
            event_capacity: 256,
            offline_queue_limit: 1_000,
            merge_mode: MergeMode::Shallow,
            collection_merge_modes: HashMap::new(),
        }
    }

    /// Sets the proposed protocol version and the supported list.
    pub fn with_versions(mut self, version: impl Into<String>, support: Vec<String>) -> Self {
        self.version = version.into();
        self.support = support;
        self
    }

    /// Enables or disables automatic reconnection.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Enables or disables resubscription after a reconnect.
    pub fn with_auto_resubscribe(mut self, enabled: bool) -> Self {
        self.auto_resubscribe = enabled;
        self
    }

    /// Sets the reconnect strategy.
    pub fn with_reconnect(mut self, strategy: ReconnectStrategy) -> Self {
        self.reconnect = strategy;
        self
    }

    /// Sets the per-attempt connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the collection change debounce window.
    pub fn with_debounce(mut self, window: Duration) -> Self {
        self.debounce = window;
        self
    }

    /// Sets the event channel capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    /// Sets how many method calls may wait for a connection.
    pub fn with_offline_queue_limit(mut self, limit: usize) -> Self {
        self.offline_queue_limit = limit;
        self
    }

    /// Sets the merge mode for every collection without an override.
    pub fn with_merge_mode(mut self, mode: MergeMode) -> Self {
        self.merge_mode = mode;
        self
    }

    /// Sets the merge mode for one collection.
    pub fn with_collection_merge_mode(mut self, collection: impl Into<String>, mode: MergeMode) -> Self {
        self.collection_merge_modes.insert(collection.into(), mode);
        self
    }

    /// Merge mode used for `collection`.
    pub fn merge_mode_for(&self, collection: &str) -> MergeMode {
        self.collection_merge_modes
            .get(collection)
            .copied()
            .unwrap_or(self.merge_mode)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("")
    }
}

/// How long to wait between reconnect attempts.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconnectStrategy {
    /// The same delay before every attempt.
    Fixed(Duration),
    /// A delay that grows with every failed attempt.
    Exponential(BackoffConfig),
}

impl Default for ReconnectStrategy {
    fn default() -> Self {
        ReconnectStrategy::Exponential(BackoffConfig::default())
    }
}

/// Configuration for exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied per failed attempt.
    pub multiplier: f64,
    /// Upper bound on any delay.
    pub max_delay: Duration,
}

impl BackoffConfig {
    /// Creates a backoff configuration.
    pub fn new(initial_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            multiplier,
            max_delay,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 2.0, Duration::from_secs(60))
    }
}
