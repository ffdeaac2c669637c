//! Runtime configuration.
//!
//! The cycle-guard threshold and the frame interval are tuning knobs rather
//! than language behavior, so they live here and can be loaded from JSON.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of read-then-write cycles an effect may perform on one
/// signal before its writes are suppressed.
pub const DEFAULT_CYCLE_THRESHOLD: u32 = 10;

/// Default frame interval (~60 Hz).
pub const DEFAULT_FRAME_INTERVAL_MS: u64 = 16;

/// Per-thread runtime settings.
///
/// Every field has a default, so partial JSON documents are accepted:
///
/// ```rust
/// use pulse_core::RuntimeConfig;
///
/// let config = RuntimeConfig::from_json(r#"{ "cycle_threshold": 3 }"#).unwrap();
/// assert_eq!(config.cycle_threshold, 3);
/// assert_eq!(config.frame_interval_ms, 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Writes are suppressed once an effect exceeds this many
    /// read-then-write cycles on the same signal.
    pub cycle_threshold: u32,

    /// Spacing of frame boundaries used by frame-aligned effects.
    pub frame_interval_ms: u64,
}

impl RuntimeConfig {
    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// The frame interval as a [`Duration`].
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cycle_threshold: DEFAULT_CYCLE_THRESHOLD,
            frame_interval_ms: DEFAULT_FRAME_INTERVAL_MS,
        }
    }
}
