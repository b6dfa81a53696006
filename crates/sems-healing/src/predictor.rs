//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::Utc;
use sems_common::config::{PredictionRule, PredictionThresholds, PREDICTION_CONFIDENCE_FLOOR};
use sems_common::time::duration_to_millis;
use tracing::debug;

use crate::actions::RemediationAction;
use crate::types::{FailurePrediction, FailureType, SystemMetrics};

/// Forecasts failures from leading indicators, before the detector's thresholds trip.
#[derive(Debug, Clone)]
pub struct FailurePredictor {
    thresholds: PredictionThresholds,
    min_confidence: f64,
}

impl FailurePredictor {
    /// `min_confidence` below [`PREDICTION_CONFIDENCE_FLOOR`] is raised to the floor.
    pub fn new(thresholds: PredictionThresholds, min_confidence: f64) -> Self {
        Self {
            thresholds,
            min_confidence: min_confidence.max(PREDICTION_CONFIDENCE_FLOOR),
        }
    }

    /// Predictions are surfaced only when their confidence strictly exceeds this value.
    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn predict(&self, metrics: &SystemMetrics) -> Vec<FailurePrediction> {
        let t = &self.thresholds;
        let mut candidates = Vec::new();

        let mut gpu_indicators = Vec::new();
        if metrics.gpu.temperature > t.gpu_temperature {
            gpu_indicators.push(format!(
                "GPU temperature {:.1}°C above {:.1}°C",
                metrics.gpu.temperature, t.gpu_temperature
            ));
        }
        if metrics.gpu.error_count > t.gpu_error_count {
            gpu_indicators.push(format!(
                "GPU error count {} above {}",
                metrics.gpu.error_count, t.gpu_error_count
            ));
        }
        if !gpu_indicators.is_empty() {
            candidates.push(prediction(
                FailureType::GpuModelFailure,
                &t.gpu,
                gpu_indicators,
                &[
                    RemediationAction::ReduceGpuLoad,
                    RemediationAction::ClearGpuMemory,
                    RemediationAction::ScheduleModelReload,
                ],
            ));
        }

        if metrics.memory.percentage > t.memory_percentage && metrics.memory.leaks_detected {
            candidates.push(prediction(
                FailureType::MemoryLeak,
                &t.memory,
                vec![
                    format!(
                        "Memory usage {:.1}% above {:.1}%",
                        metrics.memory.percentage, t.memory_percentage
                    ),
                    "Memory leak indicators present".to_owned(),
                ],
                &[
                    RemediationAction::ClearMemoryCaches,
                    RemediationAction::TriggerGarbageCollection,
                    RemediationAction::RestartLeakingServices,
                ],
            ));
        }

        let mut database_indicators = Vec::new();
        if metrics.database.query_time_ms > t.database_query_time_ms {
            database_indicators.push(format!(
                "Query time {:.0}ms above {:.0}ms",
                metrics.database.query_time_ms, t.database_query_time_ms
            ));
        }
        if metrics.database.lock_wait_count > t.database_lock_wait_count {
            database_indicators.push(format!(
                "Lock waits {} above {}",
                metrics.database.lock_wait_count, t.database_lock_wait_count
            ));
        }
        if !database_indicators.is_empty() {
            candidates.push(prediction(
                FailureType::DatabaseFailure,
                &t.database,
                database_indicators,
                &[
                    RemediationAction::OptimizeSlowQueries,
                    RemediationAction::ExpandConnectionPool,
                    RemediationAction::ClearQueryCache,
                ],
            ));
        }

        let total = candidates.len();
        let surfaced: Vec<_> = candidates
            .into_iter()
            .filter(|candidate| candidate.confidence > self.min_confidence)
            .collect();
        if total > 0 {
            debug!(
                target: "sems::healing::predictor",
                candidates = total,
                surfaced = surfaced.len(),
                min_confidence = self.min_confidence,
                "prediction pass complete",
            );
        }
        surfaced
    }
}

impl Default for FailurePredictor {
    fn default() -> Self {
        Self::new(PredictionThresholds::default(), PREDICTION_CONFIDENCE_FLOOR)
    }
}

fn prediction(
    failure_type: FailureType,
    rule: &PredictionRule,
    indicators: Vec<String>,
    preventive: &[RemediationAction],
) -> FailurePrediction {
    FailurePrediction {
        failure_type,
        probability: rule.probability,
        confidence: rule.confidence,
        estimated_time_to_failure_ms: duration_to_millis(rule.time_to_failure),
        indicators,
        preventive_actions: preventive.iter().map(ToString::to_string).collect(),
        predicted_at: Utc::now(),
    }
}
