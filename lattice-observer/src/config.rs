//! Scheduler configuration.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{ReactiveError, Result};

/// Number of times one watcher may re-enter a single flush before the
/// scheduler reports an infinite update loop.
pub const MAX_UPDATE_COUNT: usize = 100;

/// Knobs for the update scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Re-entry threshold for cycle detection.
    pub max_update_count: usize,

    /// Defer flushes to the next tick. When false, the first queued watcher
    /// flushes the queue inline.
    pub async_flush: bool,

    /// Count re-entries during a flush and abort runaway cycles.
    pub detect_cycles: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_update_count: MAX_UPDATE_COUNT,
            async_flush: true,
            detect_cycles: cfg!(debug_assertions),
        }
    }
}

impl SchedulerConfig {
    /// Parse a config from JSON. Missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ReactiveError::Config(e.to_string()))
    }
}

static CONFIG: RwLock<Option<SchedulerConfig>> = RwLock::new(None);

/// Install a scheduler config.
pub fn configure(config: SchedulerConfig) {
    *CONFIG.write() = Some(config);
}

/// Restore the default config.
pub fn reset_config() {
    *CONFIG.write() = None;
}

/// The active scheduler config.
pub fn config() -> SchedulerConfig {
    CONFIG.read().clone().unwrap_or_default()
}
