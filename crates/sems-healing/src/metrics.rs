//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::Result;
use prometheus::{self, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts};
use sems_metrics::{register, SharedRegistry};

use crate::types::{FailureType, Severity};

/// Metrics published by the self-healing subsystem.
#[derive(Clone)]
pub struct HealingMetrics {
    failures_detected_total: IntCounterVec,
    recoveries_total: IntCounterVec,
    recovery_duration_seconds: HistogramVec,
    recoveries_in_flight: IntGauge,
    predictions_total: IntCounterVec,
    preventive_actions_total: IntCounterVec,
    tick_errors_total: IntCounterVec,
}

impl HealingMetrics {
    /// Register the healing metric family against the provided registry.
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let failures_detected_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "sems_healing_failures_detected_total",
                    "Failures classified by the detector",
                ),
                &["failure_type", "severity"],
            )?,
        )?;
        let recoveries_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "sems_healing_recoveries_total",
                    "Recovery attempts by terminal outcome",
                ),
                &["failure_type", "outcome"],
            )?,
        )?;
        let recovery_duration_seconds = register(
            &registry,
            HistogramVec::new(
                HistogramOpts::new(
                    "sems_healing_recovery_duration_seconds",
                    "Detection-to-validation latency of recovery attempts",
                )
                .buckets(prometheus::exponential_buckets(0.01, 2.0, 14)?),
                &["failure_type"],
            )?,
        )?;
        let recoveries_in_flight = register(
            &registry,
            IntGauge::with_opts(Opts::new(
                "sems_healing_recoveries_in_flight",
                "Recovery attempts currently executing",
            ))?,
        )?;
        let predictions_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "sems_healing_predictions_total",
                    "Failure predictions surfaced by the predictor",
                ),
                &["failure_type"],
            )?,
        )?;
        let preventive_actions_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "sems_healing_preventive_actions_total",
                    "Preventive actions dispatched after high-probability predictions",
                ),
                &["action", "outcome"],
            )?,
        )?;
        let tick_errors_total = register(
            &registry,
            IntCounterVec::new(
                Opts::new(
                    "sems_healing_tick_errors_total",
                    "Monitoring ticks that could not obtain metrics or panicked",
                ),
                &["loop"],
            )?,
        )?;

        Ok(Self {
            failures_detected_total,
            recoveries_total,
            recovery_duration_seconds,
            recoveries_in_flight,
            predictions_total,
            preventive_actions_total,
            tick_errors_total,
        })
    }

    pub fn record_failure(&self, failure_type: FailureType, severity: Severity) {
        self.failures_detected_total
            .with_label_values(&[failure_type.as_ref(), severity.as_ref()])
            .inc();
    }

    /// Count a terminal recovery outcome and its detection-to-validation latency.
    pub fn record_recovery(&self, failure_type: FailureType, success: bool, duration: Duration) {
        let outcome = if success { "success" } else { "failure" };
        self.recoveries_total
            .with_label_values(&[failure_type.as_ref(), outcome])
            .inc();
        self.recovery_duration_seconds
            .with_label_values(&[failure_type.as_ref()])
            .observe(duration.as_secs_f64());
    }

    /// Count an attempt that never reached a strategy (no strategy, duplicate).
    pub fn record_skipped_recovery(&self, failure_type: FailureType, reason: &str) {
        self.recoveries_total
            .with_label_values(&[failure_type.as_ref(), reason])
            .inc();
    }

    pub fn set_in_flight(&self, count: usize) {
        self.recoveries_in_flight.set(count as i64);
    }

    pub fn record_prediction(&self, failure_type: FailureType) {
        self.predictions_total
            .with_label_values(&[failure_type.as_ref()])
            .inc();
    }

    pub fn record_preventive_action(&self, action: &str, outcome: &str) {
        self.preventive_actions_total
            .with_label_values(&[action, outcome])
            .inc();
    }

    pub fn inc_tick_error(&self, loop_name: &str) {
        self.tick_errors_total.with_label_values(&[loop_name]).inc();
    }
}

impl std::fmt::Debug for HealingMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealingMetrics").finish_non_exhaustive()
    }
}
