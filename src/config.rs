// model = "claude-opus-4-5"
// created = "2026-10-18"
// modified = "2026-10-18"
// driver = "Isaac Clayton"

//! Store configuration.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Default time between garbage collector sweeps, in milliseconds.
pub const DEFAULT_GC_TIMEOUT_MS: i64 = 5000;

/// Options recognized by [`OperationStore`](crate::store::OperationStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreConfig {
    /// Milliseconds between collector sweeps. Zero or negative disables
    /// periodic sweeping.
    pub gc_timeout: i64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        return Self {
            gc_timeout: DEFAULT_GC_TIMEOUT_MS,
        };
    }
}

impl StoreConfig {
    /// A config with periodic sweeping turned off.
    pub fn manual_gc() -> Self {
        return Self { gc_timeout: 0 };
    }

    /// The sweep interval, or `None` when sweeping is disabled.
    pub fn gc_interval(&self) -> Option<Duration> {
        if self.gc_timeout <= 0 {
            return None;
        }
        return Some(Duration::from_millis(self.gc_timeout as u64));
    }
}
