//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Wall-clock milliseconds since the Unix epoch for the provided timestamp.
pub fn epoch_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Milliseconds elapsed between `since` and `now`, clamped at zero when the clock moved backwards.
pub fn elapsed_millis(since: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - since).num_milliseconds().max(0) as u64
}

/// Convert a duration into whole milliseconds, saturating at `u64::MAX`.
pub fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Epoch-millisecond stamps that never repeat, even within one millisecond.
#[derive(Debug, Default)]
pub struct MonotonicStamp {
    last: AtomicI64,
}

impl MonotonicStamp {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current wall-clock millis, bumped past the previous stamp when needed.
    pub fn next(&self) -> i64 {
        let now = epoch_millis(Utc::now());
        let mut previous = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(previous + 1);
            match self.last.compare_exchange_weak(
                previous,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return candidate,
                Err(actual) => previous = actual,
            }
        }
    }
}
