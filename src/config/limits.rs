//! Engine-wide limits and timers.
//!
//! | Setting              | Default | Notes                                   |
//! |----------------------|---------|-----------------------------------------|
//! | `max_payload_bytes`  | 1 MiB   | Headers plus payload, per append        |
//! | `sweep_interval`     | 1 s     | Age limits, exhaustion, idle consumers  |
//! | `watch_buffer`       | 256     | Events buffered per KV watcher          |

use std::time::Duration;

use serde::Deserialize;

use crate::error::{EngineError, Result};

/// Default maximum size of a single append (1 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Default interval between background sweeps of a stream.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Default number of events buffered per KV watcher.
pub const DEFAULT_WATCH_BUFFER: usize = 256;

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum headers plus payload size of a single append.
    pub max_payload_bytes: usize,

    /// Interval between background sweeps.
    #[serde(with = "crate::utils::duration::millis")]
    pub sweep_interval: Duration,

    /// KV watcher channel capacity. A slow watcher applies backpressure to
    /// its own delivery loop only.
    pub watch_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            watch_buffer: DEFAULT_WATCH_BUFFER,
        }
    }
}

impl EngineConfig {
    /// Settings with a fast sweep for tests.
    pub fn for_test() -> Self {
        Self {
            sweep_interval: Duration::from_millis(50),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_payload_bytes == 0 {
            return Err(EngineError::InvalidConfig(
                "max_payload_bytes must be positive".into(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(EngineError::InvalidConfig(
                "sweep_interval must be positive".into(),
            ));
        }
        if self.watch_buffer == 0 {
            return Err(EngineError::InvalidConfig(
                "watch_buffer must be positive".into(),
            ));
        }
        Ok(())
    }
}
