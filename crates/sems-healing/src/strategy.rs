//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Recovery strategies and the catalog that maps failure types onto them.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::actions::{ActionExecutor, RemediationAction};
use crate::error::{HealingError, Result};
use crate::types::{FailureType, RecoveryResult, SystemFailure};

/// Catalog entry describing a registered strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
    pub applicable_failure_types: BTreeSet<FailureType>,
}

/// A remediation procedure: execute, validate, and an optional rollback.
#[async_trait]
pub trait RecoveryStrategy: Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &StrategyDescriptor;

    /// Run the remediation. Step failures are reported as an unsuccessful result
    /// carrying the partial actions; an `Err` is reserved for faults outside the steps.
    async fn execute(&self, failure: &SystemFailure) -> Result<RecoveryResult>;

    /// Judge whether the system actually recovered. Authoritative over `execute`.
    async fn validate(&self, failure: &SystemFailure, result: &RecoveryResult) -> bool;

    fn has_rollback(&self) -> bool {
        false
    }

    /// Undo partial remediation. Returns the actions performed.
    async fn rollback(&self, _failure: &SystemFailure) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// Strategy built from an ordered list of remediation steps.
#[derive(Debug)]
pub struct StepwiseStrategy {
    descriptor: StrategyDescriptor,
    steps: Vec<RemediationAction>,
    rollback_steps: Vec<RemediationAction>,
    executor: Arc<dyn ActionExecutor>,
}

impl StepwiseStrategy {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        applicable: &[FailureType],
        steps: Vec<RemediationAction>,
        executor: Arc<dyn ActionExecutor>,
    ) -> Self {
        Self {
            descriptor: StrategyDescriptor {
                id: id.into(),
                name: name.into(),
                description: description.into(),
                applicable_failure_types: applicable.iter().copied().collect(),
            },
            steps,
            rollback_steps: Vec::new(),
            executor,
        }
    }

    pub fn with_rollback(mut self, steps: Vec<RemediationAction>) -> Self {
        self.rollback_steps = steps;
        self
    }

    pub fn steps(&self) -> &[RemediationAction] {
        &self.steps
    }
}

#[async_trait]
impl RecoveryStrategy for StepwiseStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn execute(&self, failure: &SystemFailure) -> Result<RecoveryResult> {
        let mut actions = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if let Err(err) = self.executor.perform(*step, failure.failure_type).await {
                warn!(
                    strategy = %self.descriptor.id,
                    failure_id = %failure.id,
                    step = %step,
                    error = %err,
                    "remediation step failed; skipping remaining steps",
                );
                return Ok(RecoveryResult::failed(actions, vec![err.to_string()]));
            }
            actions.push(step.to_string());
        }
        debug!(
            strategy = %self.descriptor.id,
            failure_id = %failure.id,
            steps = actions.len(),
            "remediation steps completed",
        );
        Ok(RecoveryResult::succeeded(actions))
    }

    async fn validate(&self, _failure: &SystemFailure, result: &RecoveryResult) -> bool {
        result.success && result.actions.len() == self.steps.len()
    }

    fn has_rollback(&self) -> bool {
        !self.rollback_steps.is_empty()
    }

    async fn rollback(&self, failure: &SystemFailure) -> Result<Vec<String>> {
        let mut performed = Vec::with_capacity(self.rollback_steps.len());
        for step in &self.rollback_steps {
            self.executor
                .perform(*step, failure.failure_type)
                .await
                .map_err(|err| HealingError::Rollback(format!("{step}: {err}")))?;
            performed.push(step.to_string());
        }
        Ok(performed)
    }
}

/// Read-only catalog of strategies keyed by failure type, in registration order.
#[derive(Debug, Default, Clone)]
pub struct RecoveryStrategyRegistry {
    strategies: IndexMap<FailureType, Arc<dyn RecoveryStrategy>>,
}

impl RecoveryStrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `strategy` for `failure_type`, replacing any previous entry.
    pub fn register(&mut self, failure_type: FailureType, strategy: Arc<dyn RecoveryStrategy>) {
        if self.strategies.insert(failure_type, strategy).is_some() {
            debug!(failure_type = %failure_type, "replaced recovery strategy");
        }
    }

    pub fn get(&self, failure_type: FailureType) -> Option<Arc<dyn RecoveryStrategy>> {
        self.strategies.get(&failure_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Snapshot of the catalog as `(failure type, descriptor)` pairs.
    pub fn catalog(&self) -> Vec<(FailureType, StrategyDescriptor)> {
        self.strategies
            .iter()
            .map(|(failure_type, strategy)| (*failure_type, strategy.descriptor().clone()))
            .collect()
    }

    /// One stepwise strategy per failure type, all driven by `executor`.
    pub fn with_builtin(executor: Arc<dyn ActionExecutor>) -> Self {
        use RemediationAction::*;

        let mut registry = Self::new();
        let mut add = |failure_type: FailureType, strategy: StepwiseStrategy| {
            registry.register(failure_type, Arc::new(strategy));
        };

        add(
            FailureType::GpuModelFailure,
            StepwiseStrategy::new(
                "gpu_recovery",
                "GPU Model Recovery",
                "Recover from GPU and AI model failures",
                &[FailureType::GpuModelFailure],
                vec![
                    ClearGpuMemory,
                    RestartGpuService,
                    ReloadModels,
                    ValidateModelPerformance,
                ],
                executor.clone(),
            ),
        );
        add(
            FailureType::MemoryLeak,
            StepwiseStrategy::new(
                "memory_recovery",
                "Memory Leak Recovery",
                "Reclaim memory from leaking processes",
                &[FailureType::MemoryLeak],
                vec![
                    IdentifyMemoryHogs,
                    TriggerGarbageCollection,
                    ClearMemoryCaches,
                    RestartLeakingServices,
                ],
                executor.clone(),
            ),
        );
        add(
            FailureType::DatabaseFailure,
            StepwiseStrategy::new(
                "database_recovery",
                "Database Recovery",
                "Restore database responsiveness and connectivity",
                &[FailureType::DatabaseFailure],
                vec![
                    TerminateLongQueries,
                    ResetConnectionPool,
                    ClearQueryCache,
                    VerifyDatabaseConnectivity,
                ],
                executor.clone(),
            )
            .with_rollback(vec![RestoreConnectionPool]),
        );
        add(
            FailureType::WebsocketFailure,
            StepwiseStrategy::new(
                "websocket_recovery",
                "WebSocket Recovery",
                "Re-establish realtime update channels",
                &[FailureType::WebsocketFailure],
                vec![
                    CloseStaleConnections,
                    RestartWebsocketServer,
                    ReestablishClientSessions,
                ],
                executor.clone(),
            ),
        );
        add(
            FailureType::ApiFailure,
            StepwiseStrategy::new(
                "api_recovery",
                "API Recovery",
                "Shed load and restart API workers",
                &[FailureType::ApiFailure],
                vec![EnableRequestThrottling, RestartApiWorkers, FlushRequestQueue],
                executor.clone(),
            ),
        );
        add(
            FailureType::PerformanceDegradation,
            StepwiseStrategy::new(
                "performance_recovery",
                "Performance Recovery",
                "Rebalance processing load across workers",
                &[FailureType::PerformanceDegradation],
                vec![RebalanceProcessingLoad, ReduceStreamResolution, ScaleWorkerPool],
                executor,
            ),
        );
        registry
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use strum::IntoEnumIterator;

    use super::*;
    use crate::actions::SimulatedActionExecutor;
    use crate::types::{Severity, SystemMetrics};

    #[derive(Debug, Default)]
    struct FlakyExecutor {
        fail_on: Option<RemediationAction>,
        performed: Mutex<Vec<RemediationAction>>,
    }

    #[async_trait]
    impl ActionExecutor for FlakyExecutor {
        async fn perform(&self, action: RemediationAction, _context: FailureType) -> Result<()> {
            if self.fail_on == Some(action) {
                return Err(HealingError::StepFailed {
                    action,
                    reason: "injected".into(),
                });
            }
            self.performed.lock().push(action);
            Ok(())
        }
    }

    fn failure(failure_type: FailureType) -> SystemFailure {
        SystemFailure::new(
            format!("{failure_type}_1"),
            failure_type,
            Severity::High,
            "test failure",
            &["svc"],
            SystemMetrics::nominal(),
        )
    }

    fn instant() -> Arc<dyn ActionExecutor> {
        Arc::new(SimulatedActionExecutor::new(std::time::Duration::ZERO))
    }

    #[test]
    fn builtin_registry_covers_every_failure_type() {
        let registry = RecoveryStrategyRegistry::with_builtin(instant());
        for failure_type in FailureType::iter() {
            let strategy = registry.get(failure_type).expect("strategy registered");
            assert!(strategy
                .descriptor()
                .applicable_failure_types
                .contains(&failure_type));
        }
        assert_eq!(registry.catalog().len(), 6);
        assert_eq!(registry.catalog()[0].1.id, "gpu_recovery");
    }

    #[tokio::test]
    async fn gpu_steps_run_in_order() {
        let registry = RecoveryStrategyRegistry::with_builtin(instant());
        let strategy = registry.get(FailureType::GpuModelFailure).unwrap();
        let target = failure(FailureType::GpuModelFailure);
        let result = strategy.execute(&target).await.unwrap();
        assert!(result.success);
        assert_eq!(
            result.actions,
            vec![
                "Clear GPU memory",
                "Restart GPU service",
                "Reload AI models",
                "Validate model performance",
            ]
        );
        assert!(strategy.validate(&target, &result).await);
    }

    #[tokio::test]
    async fn failing_step_skips_the_rest() {
        let executor = Arc::new(FlakyExecutor {
            fail_on: Some(RemediationAction::ResetConnectionPool),
            ..FlakyExecutor::default()
        });
        let registry = RecoveryStrategyRegistry::with_builtin(executor.clone());
        let strategy = registry.get(FailureType::DatabaseFailure).unwrap();
        let target = failure(FailureType::DatabaseFailure);

        let result = strategy.execute(&target).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.actions, vec!["Terminate long-running queries"]);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("Reset connection pool"));
        assert_eq!(
            *executor.performed.lock(),
            vec![RemediationAction::TerminateLongQueries]
        );
        assert!(!strategy.validate(&target, &result).await);
    }

    #[tokio::test]
    async fn database_strategy_rolls_back_pool() {
        let registry = RecoveryStrategyRegistry::with_builtin(instant());
        let strategy = registry.get(FailureType::DatabaseFailure).unwrap();
        assert!(strategy.has_rollback());
        let performed = strategy
            .rollback(&failure(FailureType::DatabaseFailure))
            .await
            .unwrap();
        assert_eq!(performed, vec!["Restore connection pool configuration"]);

        let gpu = registry.get(FailureType::GpuModelFailure).unwrap();
        assert!(!gpu.has_rollback());
    }

    #[test]
    fn register_replaces_existing_entry() {
        let mut registry = RecoveryStrategyRegistry::with_builtin(instant());
        registry.register(
            FailureType::ApiFailure,
            Arc::new(StepwiseStrategy::new(
                "api_lite",
                "API Lite",
                "Throttle only",
                &[FailureType::ApiFailure],
                vec![RemediationAction::EnableRequestThrottling],
                instant(),
            )),
        );
        assert_eq!(registry.len(), 6);
        assert_eq!(
            registry.get(FailureType::ApiFailure).unwrap().descriptor().id,
            "api_lite"
        );
    }
}
