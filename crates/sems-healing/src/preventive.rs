//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use crate::actions::{ActionExecutor, RemediationAction};
use crate::error::HealingError;
use crate::metrics::HealingMetrics;
use crate::types::FailurePrediction;

/// What happened to each preventive action of a prediction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreventiveReport {
    pub performed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Best-effort dispatcher for prediction `preventiveActions`. Nothing here is fatal:
/// unknown labels are skipped and executor errors are logged.
#[derive(Debug, Clone)]
pub struct PreventiveDispatcher {
    executor: Arc<dyn ActionExecutor>,
    metrics: Option<HealingMetrics>,
}

impl PreventiveDispatcher {
    pub fn new(executor: Arc<dyn ActionExecutor>, metrics: Option<HealingMetrics>) -> Self {
        Self { executor, metrics }
    }

    pub async fn dispatch(&self, prediction: &FailurePrediction) -> PreventiveReport {
        let mut report = PreventiveReport::default();
        for label in &prediction.preventive_actions {
            let Some(action) = RemediationAction::from_label(label) else {
                let err = HealingError::UnknownPreventiveAction(label.clone());
                warn!(
                    target: "sems::healing::preventive",
                    failure_type = %prediction.failure_type,
                    error = %err,
                    "skipping preventive action",
                );
                self.count("unknown", "skipped");
                report.skipped.push(label.clone());
                continue;
            };

            match self.executor.perform(action, prediction.failure_type).await {
                Ok(()) => {
                    info!(
                        target: "sems::healing::preventive",
                        failure_type = %prediction.failure_type,
                        action = %action,
                        "preventive action executed",
                    );
                    self.count(&action.to_string(), "success");
                    report.performed.push(action.to_string());
                }
                Err(err) => {
                    warn!(
                        target: "sems::healing::preventive",
                        failure_type = %prediction.failure_type,
                        action = %action,
                        error = %err,
                        "preventive action failed",
                    );
                    self.count(&action.to_string(), "failure");
                    report.failed.push(action.to_string());
                }
            }
        }
        report
    }

    fn count(&self, label: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_preventive_action(label, outcome);
        }
    }
}
