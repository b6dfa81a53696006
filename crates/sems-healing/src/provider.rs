//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::Result;
use crate::types::SystemMetrics;

/// Source of system metrics snapshots. A deployment wires this to live telemetry.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Produce a fresh snapshot. May suspend on network I/O.
    async fn system_metrics(&self) -> Result<SystemMetrics>;
}

/// Provider returning a fixed snapshot, re-stamped on every read.
#[derive(Debug)]
pub struct StaticMetricsProvider {
    snapshot: Mutex<SystemMetrics>,
}

impl StaticMetricsProvider {
    pub fn new(snapshot: SystemMetrics) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
        }
    }

    /// Swap the snapshot served to subsequent polls.
    pub fn replace(&self, snapshot: SystemMetrics) {
        *self.snapshot.lock() = snapshot;
    }
}

impl Default for StaticMetricsProvider {
    fn default() -> Self {
        Self::new(SystemMetrics::nominal())
    }
}

#[async_trait]
impl MetricsProvider for StaticMetricsProvider {
    async fn system_metrics(&self) -> Result<SystemMetrics> {
        let mut snapshot = self.snapshot.lock().clone();
        snapshot.collected_at = Utc::now();
        Ok(snapshot)
    }
}
