//! Telemetry buffer tuning knobs.

use std::time::Duration;

use serde::Deserialize;

/// Configuration for the telemetry buffer and flusher.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryConfig {
    /// Pending samples that trigger an inline flush.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Seconds between background flushes of all races.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: f64,

    /// Maximum recent samples retained in memory per race; oldest are
    /// dropped beyond this, bounding memory under arbitrarily long races.
    #[serde(default = "default_ring_cap")]
    pub ring_cap: usize,
}

impl TelemetryConfig {
    /// The background flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        if self.flush_interval_secs.is_finite() && self.flush_interval_secs > 0.0 {
            Duration::from_secs_f64(self.flush_interval_secs)
        } else {
            Duration::from_secs_f64(default_flush_interval_secs())
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            ring_cap: default_ring_cap(),
        }
    }
}

const fn default_batch_size() -> usize {
    100
}

const fn default_flush_interval_secs() -> f64 {
    5.0
}

const fn default_ring_cap() -> usize {
    2048
}
