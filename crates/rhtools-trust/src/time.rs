//! Wall-clock access
//!
//! Every timestamp in the engine is milliseconds since the Unix epoch.
//! Resolution takes `now_ms` as an argument; only the engine facade reads a
//! clock, so tests drive time through [`ManualClock`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Milliseconds since the Unix epoch
pub type TimestampMs = u64;

/// Source of the current time
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> TimestampMs;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at `start_ms`
    pub fn new(start_ms: TimestampMs) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Move the clock forward
    pub fn advance_ms(&self, delta_ms: u64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }

    /// Jump to an absolute time
    pub fn set_ms(&self, now_ms: TimestampMs) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> TimestampMs {
        self.now.load(Ordering::SeqCst)
    }
}

/// Convert a duration in seconds to milliseconds, saturating
pub(crate) fn secs_to_ms(secs: u64) -> u64 {
    secs.saturating_mul(1_000)
}
