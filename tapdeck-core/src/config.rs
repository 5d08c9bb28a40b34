//! Deck configuration loaded from JSON.
//!
//! Every field has a default, so an empty object (or no file at all) gives
//! the timings the tape-port firmware expects.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::TapResult;

/// Serial link settings and loop pacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LinkConfig {
    pub baud_rate: u32,
    pub open_timeout_ms: u64,
    /// Idle loop iterations before a keep-alive SENSE_OFF is queued.
    pub keepalive_iterations: u32,
    /// Sleep per idle loop iteration.
    pub idle_sleep_ms: u64,
    /// Pause before stopping when the tape runs out.
    pub end_of_tape_pause_ms: u64,
    /// Sleep after a failed loop iteration.
    pub error_backoff_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            open_timeout_ms: 2000,
            keepalive_iterations: 5,
            idle_sleep_ms: 100,
            end_of_tape_pause_ms: 100,
            error_backoff_ms: 100,
        }
    }
}

impl LinkConfig {
    /// No sleeps at all; for driving the engine in tests.
    pub fn immediate() -> Self {
        Self {
            idle_sleep_ms: 0,
            end_of_tape_pause_ms: 0,
            error_backoff_ms: 0,
            ..Self::default()
        }
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn end_of_tape_pause(&self) -> Duration {
        Duration::from_millis(self.end_of_tape_pause_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

/// Recorder teardown settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecorderConfig {
    /// Upper bound for `dispose()` waiting on the hardware to stop.
    pub dispose_timeout_ms: u64,
    /// Granularity of that wait.
    pub poll_interval_ms: u64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            dispose_timeout_ms: 5000,
            poll_interval_ms: 100,
        }
    }
}

impl RecorderConfig {
    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.dispose_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    pub link: LinkConfig,
    pub recorder: RecorderConfig,
}

impl DeckConfig {
    pub fn from_json(text: &str) -> TapResult<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn from_path(path: &Path) -> TapResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
