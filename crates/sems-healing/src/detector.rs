//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use sems_common::config::DetectionThresholds;
use sems_common::time::MonotonicStamp;
use tracing::debug;

use crate::types::{FailureType, Severity, SystemFailure, SystemMetrics};

/// Classifies a metrics snapshot into failures using static thresholds.
///
/// Detection is a pure function of the snapshot: nothing is remembered between
/// polls, so an unhealthy reading is re-detected every cycle until it clears.
#[derive(Debug)]
pub struct FailureDetector {
    thresholds: DetectionThresholds,
    stamps: MonotonicStamp,
}

impl FailureDetector {
    pub fn new(thresholds: DetectionThresholds) -> Self {
        Self {
            thresholds,
            stamps: MonotonicStamp::new(),
        }
    }

    pub fn thresholds(&self) -> &DetectionThresholds {
        &self.thresholds
    }

    /// Evaluate the snapshot. Every rule fires independently; the result is empty
    /// when no threshold is crossed. Non-finite readings never satisfy a rule.
    pub fn detect(&self, metrics: &SystemMetrics) -> Vec<SystemFailure> {
        let t = &self.thresholds;
        // Shared by every failure of this poll; the type prefix keeps ids distinct.
        let stamp = self.stamps.next();
        let mut failures = Vec::new();

        if metrics.gpu.error_count > t.gpu_error_count || metrics.gpu.temperature > t.gpu_temperature
        {
            failures.push(self.failure(
                stamp,
                FailureType::GpuModelFailure,
                Severity::High,
                format!(
                    "GPU errors or overheating detected (errors: {}, temperature: {:.1}°C)",
                    metrics.gpu.error_count, metrics.gpu.temperature
                ),
                &["ai-detection", "person-tracking"],
                metrics,
            ));
        }

        if metrics.memory.percentage > t.memory_percentage || metrics.memory.leaks_detected {
            failures.push(self.failure(
                stamp,
                FailureType::MemoryLeak,
                Severity::Critical,
                format!(
                    "Memory exhaustion or leak detected (usage: {:.1}%, leaks detected: {})",
                    metrics.memory.percentage, metrics.memory.leaks_detected
                ),
                &["application", "video-processing"],
                metrics,
            ));
        }

        if metrics.database.query_time_ms > t.database_query_time_ms
            || metrics.database.error_count > t.database_error_count
        {
            failures.push(self.failure(
                stamp,
                FailureType::DatabaseFailure,
                Severity::High,
                format!(
                    "Database degradation detected (query time: {:.0}ms, errors: {})",
                    metrics.database.query_time_ms, metrics.database.error_count
                ),
                &["database", "api"],
                metrics,
            ));
        }

        if metrics.network.error_count > t.network_error_count
            || metrics.api.error_rate > t.api_error_rate
        {
            failures.push(self.failure(
                stamp,
                FailureType::WebsocketFailure,
                Severity::Medium,
                format!(
                    "Realtime connectivity degraded (network errors: {}, API error rate: {:.1}%)",
                    metrics.network.error_count,
                    metrics.api.error_rate * 100.0
                ),
                &["websocket", "realtime-updates"],
                metrics,
            ));
        }

        if !failures.is_empty() {
            debug!(
                target: "sems::healing::detector",
                count = failures.len(),
                "failures detected in snapshot",
            );
        }
        failures
    }

    fn failure(
        &self,
        stamp: i64,
        failure_type: FailureType,
        severity: Severity,
        description: String,
        affected: &[&str],
        metrics: &SystemMetrics,
    ) -> SystemFailure {
        SystemFailure::new(
            format!("{}_{}", failure_type, stamp),
            failure_type,
            severity,
            description,
            affected,
            metrics.clone(),
        )
    }
}

impl Default for FailureDetector {
    fn default() -> Self {
        Self::new(DetectionThresholds::default())
    }
}
