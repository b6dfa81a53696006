//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Recovery state machine: `detected -> recovering -> validated | failed`.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use sems_common::time::{elapsed_millis, MonotonicStamp};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::{HealingError, Result};
use crate::events::{EventBus, HealingEvent};
use crate::metrics::HealingMetrics;
use crate::strategy::{RecoveryStrategy, RecoveryStrategyRegistry};
use crate::types::{RecoveryResult, RecoveryState, SystemFailure};

pub const NO_STRATEGY_ACTION: &str = "No recovery strategy available";
pub const ATTEMPT_FAILED_ACTION: &str = "Recovery attempt failed";
pub const ALREADY_IN_PROGRESS_ACTION: &str = "Recovery already in progress";

/// Ledger entry for one recovery attempt.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRecord {
    pub recovery_id: String,
    pub failure: SystemFailure,
    pub strategy_id: Option<String>,
    pub state: RecoveryState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Option<RecoveryResult>,
}

impl RecoveryRecord {
    fn new(recovery_id: String, failure: SystemFailure, strategy_id: Option<String>) -> Self {
        Self {
            recovery_id,
            failure,
            strategy_id,
            state: RecoveryState::Detected,
            started_at: Utc::now(),
            finished_at: None,
            result: None,
        }
    }

    fn transition(&mut self, next: RecoveryState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(HealingError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    fn finish(&mut self, next: RecoveryState, result: &RecoveryResult) -> Result<()> {
        self.transition(next)?;
        self.result = Some(result.clone());
        Ok(())
    }
}

/// Extension points around a recovery attempt.
#[async_trait]
pub trait RecoveryHooks: Send + Sync + fmt::Debug {
    /// Runs after `recoveryStarted` and before the strategy. An error fails the attempt.
    async fn prepare_recovery(&self, _failure: &SystemFailure, _recovery_id: &str) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

#[async_trait]
impl RecoveryHooks for NoopHooks {}

/// Executes strategies for failures and keeps the recent-activity ledger.
#[derive(Debug)]
pub struct RecoveryOrchestrator {
    registry: Arc<RecoveryStrategyRegistry>,
    hooks: Arc<dyn RecoveryHooks>,
    events: Arc<EventBus>,
    metrics: Option<HealingMetrics>,
    ledger: Mutex<IndexMap<String, RecoveryRecord>>,
    in_flight: Mutex<HashSet<String>>,
    stamps: MonotonicStamp,
}

impl RecoveryOrchestrator {
    pub fn new(
        registry: Arc<RecoveryStrategyRegistry>,
        hooks: Arc<dyn RecoveryHooks>,
        events: Arc<EventBus>,
        metrics: Option<HealingMetrics>,
    ) -> Self {
        Self {
            registry,
            hooks,
            events,
            metrics,
            ledger: Mutex::new(IndexMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            stamps: MonotonicStamp::new(),
        }
    }

    pub fn registry(&self) -> &RecoveryStrategyRegistry {
        &self.registry
    }

    /// Remediate `failure`. Never returns an error: every outcome is reported as a
    /// [`RecoveryResult`], plus `recoveryStarted` and `recoveryCompleted`/`recoveryFailed`
    /// events once a strategy has been found.
    pub async fn execute_recovery(&self, failure: &SystemFailure) -> RecoveryResult {
        let Some(_guard) = InFlightGuard::acquire(self, &failure.id) else {
            warn!(
                target: "sems::healing::orchestrator",
                failure_id = %failure.id,
                "recovery already in progress for failure; ignoring duplicate request",
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_skipped_recovery(failure.failure_type, "duplicate");
            }
            let mut result = RecoveryResult::failed(
                vec![ALREADY_IN_PROGRESS_ACTION.to_owned()],
                vec![format!(
                    "A recovery for failure {} is already in progress",
                    failure.id
                )],
            );
            result.recovery_time_ms = elapsed_millis(failure.timestamp, Utc::now());
            return result;
        };

        let recovery_id = format!("recovery_{}_{}", failure.id, self.stamps.next());

        let Some(strategy) = self.registry.get(failure.failure_type) else {
            return self.no_strategy(failure, recovery_id);
        };

        let strategy_id = strategy.descriptor().id.clone();
        let mut record =
            RecoveryRecord::new(recovery_id.clone(), failure.clone(), Some(strategy_id.clone()));
        if let Err(err) = record.transition(RecoveryState::Recovering) {
            error!(recovery_id = %recovery_id, error = %err, "ledger transition rejected");
        }
        self.ledger.lock().insert(recovery_id.clone(), record);

        info!(
            target: "sems::healing::orchestrator",
            recovery_id = %recovery_id,
            failure_id = %failure.id,
            failure_type = %failure.failure_type,
            strategy = %strategy_id,
            "recovery started",
        );
        self.events.emit(&HealingEvent::RecoveryStarted {
            failure: failure.clone(),
            recovery_id: recovery_id.clone(),
        });

        match self.attempt(strategy.as_ref(), failure, &recovery_id).await {
            Ok(mut result) => {
                result.recovery_time_ms = elapsed_millis(failure.timestamp, Utc::now());
                self.finish(&recovery_id, RecoveryState::Validated, &result);
                info!(
                    target: "sems::healing::orchestrator",
                    recovery_id = %recovery_id,
                    recovery_time_ms = result.recovery_time_ms,
                    actions = result.actions.len(),
                    "recovery validated",
                );
                self.record_outcome(failure, &result);
                self.events.emit(&HealingEvent::RecoveryCompleted {
                    failure: failure.clone(),
                    result: result.clone(),
                    recovery_id,
                });
                result
            }
            Err(attempt) => {
                let message = attempt.error.to_string();
                let rollback = self.rollback(strategy.as_ref(), failure, &recovery_id).await;

                let mut metadata = json!({ "strategyId": strategy_id });
                if let Some(partial) = &attempt.partial {
                    metadata["strategyActions"] = json!(partial.actions);
                    metadata["strategyErrors"] = json!(partial.errors);
                }
                if let Some(rollback) = rollback {
                    metadata["rollback"] = rollback;
                }

                let mut result = RecoveryResult::failed(
                    vec![ATTEMPT_FAILED_ACTION.to_owned()],
                    vec![message.clone()],
                )
                .with_metadata(metadata);
                result.recovery_time_ms = elapsed_millis(failure.timestamp, Utc::now());
                self.finish(&recovery_id, RecoveryState::Failed, &result);

                error!(
                    target: "sems::healing::orchestrator",
                    recovery_id = %recovery_id,
                    failure_id = %failure.id,
                    error = %message,
                    "recovery failed",
                );
                self.record_outcome(failure, &result);
                self.events.emit(&HealingEvent::RecoveryFailed {
                    failure: failure.clone(),
                    error: message,
                    recovery_id,
                });
                result
            }
        }
    }

    /// Snapshot of the ledger in insertion order.
    pub fn active_recoveries(&self) -> Vec<RecoveryRecord> {
        self.ledger.lock().values().cloned().collect()
    }

    pub fn recovery(&self, recovery_id: &str) -> Option<RecoveryRecord> {
        self.ledger.lock().get(recovery_id).cloned()
    }

    /// Drop finished entries from the ledger. In-flight entries are kept.
    /// Returns how many entries were removed.
    pub fn clear_recoveries(&self) -> usize {
        let mut ledger = self.ledger.lock();
        let before = ledger.len();
        ledger.retain(|_, record| !record.state.is_terminal());
        before - ledger.len()
    }

    /// Number of recoveries currently executing.
    pub fn recovering_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    async fn attempt(
        &self,
        strategy: &dyn RecoveryStrategy,
        failure: &SystemFailure,
        recovery_id: &str,
    ) -> std::result::Result<RecoveryResult, FailedAttempt> {
        self.hooks
            .prepare_recovery(failure, recovery_id)
            .await
            .map_err(FailedAttempt::from)?;
        let result = strategy.execute(failure).await.map_err(FailedAttempt::from)?;
        if !result.success {
            let reason = result.errors.first().cloned().unwrap_or_else(|| {
                format!("strategy {} reported failure", strategy.descriptor().id)
            });
            return Err(FailedAttempt {
                error: HealingError::StrategyFailed(reason),
                partial: Some(result),
            });
        }
        if !strategy.validate(failure, &result).await {
            return Err(FailedAttempt {
                error: HealingError::ValidationFailed,
                partial: Some(result),
            });
        }
        Ok(result)
    }

    async fn rollback(
        &self,
        strategy: &dyn RecoveryStrategy,
        failure: &SystemFailure,
        recovery_id: &str,
    ) -> Option<serde_json::Value> {
        if !strategy.has_rollback() {
            return None;
        }
        match strategy.rollback(failure).await {
            Ok(actions) => {
                info!(
                    target: "sems::healing::orchestrator",
                    recovery_id,
                    actions = actions.len(),
                    "rollback completed",
                );
                Some(json!({ "actions": actions }))
            }
            Err(err) => {
                warn!(
                    target: "sems::healing::orchestrator",
                    recovery_id,
                    error = %err,
                    "rollback failed",
                );
                Some(json!({ "error": err.to_string() }))
            }
        }
    }

    fn no_strategy(&self, failure: &SystemFailure, recovery_id: String) -> RecoveryResult {
        warn!(
            target: "sems::healing::orchestrator",
            failure_id = %failure.id,
            failure_type = %failure.failure_type,
            "no recovery strategy registered",
        );
        let mut result = RecoveryResult::failed(
            vec![NO_STRATEGY_ACTION.to_owned()],
            vec![format!(
                "No recovery strategy registered for failure type {}",
                failure.failure_type
            )],
        );
        result.recovery_time_ms = elapsed_millis(failure.timestamp, Utc::now());

        let mut record = RecoveryRecord::new(recovery_id.clone(), failure.clone(), None);
        if let Err(err) = record.finish(RecoveryState::Failed, &result) {
            error!(recovery_id = %recovery_id, error = %err, "ledger transition rejected");
        }
        self.ledger.lock().insert(recovery_id, record);
        if let Some(metrics) = &self.metrics {
            metrics.record_skipped_recovery(failure.failure_type, "no_strategy");
        }
        result
    }

    fn finish(&self, recovery_id: &str, state: RecoveryState, result: &RecoveryResult) {
        let mut ledger = self.ledger.lock();
        match ledger.get_mut(recovery_id) {
            Some(record) => {
                if let Err(err) = record.finish(state, result) {
                    error!(recovery_id, error = %err, "ledger transition rejected");
                }
            }
            None => error!(recovery_id, "recovery missing from ledger"),
        }
    }

    fn record_outcome(&self, failure: &SystemFailure, result: &RecoveryResult) {
        if let Some(metrics) = &self.metrics {
            metrics.record_recovery(
                failure.failure_type,
                result.success,
                Duration::from_millis(result.recovery_time_ms),
            );
        }
    }

    fn publish_in_flight(&self, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_in_flight(count);
        }
    }
}

struct FailedAttempt {
    error: HealingError,
    /// Strategy result rejected by validation, if execution got that far.
    partial: Option<RecoveryResult>,
}

impl From<HealingError> for FailedAttempt {
    fn from(error: HealingError) -> Self {
        Self {
            error,
            partial: None,
        }
    }
}

/// Marks a failure id as in flight for the lifetime of the guard.
struct InFlightGuard<'a> {
    orchestrator: &'a RecoveryOrchestrator,
    failure_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(orchestrator: &'a RecoveryOrchestrator, failure_id: &str) -> Option<Self> {
        let count = {
            let mut in_flight = orchestrator.in_flight.lock();
            if !in_flight.insert(failure_id.to_owned()) {
                return None;
            }
            in_flight.len()
        };
        orchestrator.publish_in_flight(count);
        Some(Self {
            orchestrator,
            failure_id: failure_id.to_owned(),
        })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let count = {
            let mut in_flight = self.orchestrator.in_flight.lock();
            in_flight.remove(&self.failure_id);
            in_flight.len()
        };
        self.orchestrator.publish_in_flight(count);
    }
}
