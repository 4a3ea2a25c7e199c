//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::state::ValidationConfig;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_SLOW_DISPATCH_MS: u64 = 16;
pub const DEFAULT_METRICS_WINDOW: usize = 10;
pub const DEFAULT_AUTO_SAVE_INTERVAL_MS: u64 = 30_000;
pub const DEFAULT_STORAGE_KEY: &str = "observatory.save";
pub const DEFAULT_METADATA_KEY: &str = "observatory.save.meta";
pub const DEFAULT_EVENT_CAPACITY: usize = 128;

/// Settings for a [`StateManager`](super::StateManager).
///
/// Every field has a default, so a partial JSON document is enough:
///
/// ```
/// use observatory_state::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{"historyCapacity": 20}"#).unwrap();
/// assert_eq!(config.history_capacity, 20);
/// assert_eq!(config.slow_dispatch_threshold_ms, 16);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Actions retained for undo.
    pub history_capacity: usize,
    pub slow_dispatch_threshold_ms: u64,
    /// Samples kept per action tag.
    pub metrics_window: usize,
    pub auto_save_interval_ms: u64,
    pub auto_save: bool,
    pub storage_key: String,
    pub metadata_key: String,
    /// Buffered events per receiver before lagging ones miss events.
    pub event_capacity: usize,
    pub validation: ValidationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            slow_dispatch_threshold_ms: DEFAULT_SLOW_DISPATCH_MS,
            metrics_window: DEFAULT_METRICS_WINDOW,
            auto_save_interval_ms: DEFAULT_AUTO_SAVE_INTERVAL_MS,
            auto_save: true,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            metadata_key: DEFAULT_METADATA_KEY.to_string(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            validation: ValidationConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    pub fn with_slow_dispatch_threshold(mut self, threshold: Duration) -> Self {
        self.slow_dispatch_threshold_ms = u64::try_from(threshold.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_metrics_window(mut self, window: usize) -> Self {
        self.metrics_window = window;
        self
    }

    pub fn with_auto_save_interval(mut self, interval: Duration) -> Self {
        self.auto_save_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_auto_save(mut self, enabled: bool) -> Self {
        self.auto_save = enabled;
        self
    }

    pub fn with_storage_keys(mut self, key: impl Into<String>, metadata_key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self.metadata_key = metadata_key.into();
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    pub fn slow_dispatch_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_dispatch_threshold_ms)
    }

    pub fn auto_save_interval(&self) -> Duration {
        Duration::from_millis(self.auto_save_interval_ms)
    }

    /// History keeps at least two actions so undo stays possible.
    pub(crate) fn effective_history_capacity(&self) -> usize {
        self.history_capacity.max(2)
    }

    /// tokio's broadcast channel rejects a zero capacity.
    pub(crate) fn effective_event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }

    pub(crate) fn effective_metrics_window(&self) -> usize {
        self.metrics_window.max(1)
    }
}
