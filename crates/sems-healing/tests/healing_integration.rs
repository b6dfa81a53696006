//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sems_common::config::HealingConfig;
use sems_healing::{
    ActionExecutor, FailureType, HealingError, HealingEvent, HealingEventKind, HealingMetrics,
    MetricsProvider, RecoveryResult, RecoveryState, RecoveryStrategy, RecoveryStrategyRegistry,
    RemediationAction, SelfHealingCoordinator, Severity, SimulatedActionExecutor,
    StaticMetricsProvider, StrategyDescriptor, SystemFailure, SystemMetrics,
};
use sems_metrics::new_registry;

fn instant_executor() -> Arc<SimulatedActionExecutor> {
    Arc::new(SimulatedActionExecutor::new(Duration::ZERO))
}

fn coordinator_with(snapshot: SystemMetrics) -> (SelfHealingCoordinator, Arc<StaticMetricsProvider>) {
    let provider = Arc::new(StaticMetricsProvider::new(snapshot));
    let coordinator = SelfHealingCoordinator::builder(HealingConfig::default())
        .provider(provider.clone())
        .executor(instant_executor())
        .build();
    (coordinator, provider)
}

fn record(coordinator: &SelfHealingCoordinator) -> Arc<Mutex<Vec<HealingEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    coordinator.subscribe_all(move |event| {
        sink.lock().push(event.clone());
        Ok(())
    });
    seen
}

fn kinds(events: &Mutex<Vec<HealingEvent>>) -> Vec<HealingEventKind> {
    events.lock().iter().map(HealingEvent::kind).collect()
}

fn count(events: &Mutex<Vec<HealingEvent>>, kind: HealingEventKind) -> usize {
    events.lock().iter().filter(|event| event.kind() == kind).count()
}

fn leaking_memory() -> SystemMetrics {
    let mut metrics = SystemMetrics::nominal();
    metrics.memory.percentage = 97.0;
    metrics.memory.leaks_detected = true;
    metrics
}

#[tokio::test]
async fn critical_memory_leak_is_remediated_automatically() {
    let (coordinator, _provider) = coordinator_with(leaking_memory());
    let events = record(&coordinator);

    let report = coordinator.run_health_check().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].failure_type, FailureType::MemoryLeak);
    assert_eq!(report.failures[0].severity, Severity::Critical);
    assert_eq!(report.recoveries.len(), 1);
    assert!(report.recoveries[0].success);
    assert_eq!(
        report.recoveries[0].actions,
        vec![
            "Identify memory-intensive processes",
            "Trigger garbage collection",
            "Clear memory caches",
            "Restart memory-intensive services",
        ]
    );

    assert_eq!(
        kinds(&events),
        vec![
            HealingEventKind::FailureDetected,
            HealingEventKind::RecoveryStarted,
            HealingEventKind::RecoveryCompleted,
        ]
    );

    let ledger = coordinator.active_recoveries();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].failure.id, report.failures[0].id);
    assert_eq!(ledger[0].state, RecoveryState::Validated);
    assert_eq!(coordinator.failure_history().len(), 1);
}

#[tokio::test]
async fn medium_failures_are_recorded_but_not_remediated() {
    let mut metrics = SystemMetrics::nominal();
    metrics.network.error_count = 150;
    let (coordinator, _provider) = coordinator_with(metrics);
    let events = record(&coordinator);

    let report = coordinator.run_health_check().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].failure_type, FailureType::WebsocketFailure);
    assert!(report.recoveries.is_empty());
    assert_eq!(kinds(&events), vec![HealingEventKind::FailureDetected]);
    assert!(coordinator.active_recoveries().is_empty());
    assert_eq!(coordinator.failure_history().len(), 1);
}

#[tokio::test]
async fn every_high_failure_gets_exactly_one_recovery() {
    let mut metrics = SystemMetrics::nominal();
    metrics.gpu.error_count = 25;
    metrics.gpu.temperature = 95.0;
    metrics.database.query_time_ms = 2500.0;
    let (coordinator, _provider) = coordinator_with(metrics);

    let report = coordinator.run_health_check().await;
    assert_eq!(report.failures.len(), 2);
    let ledger = coordinator.active_recoveries();
    assert_eq!(ledger.len(), 2);
    for failure in &report.failures {
        let matching = ledger
            .iter()
            .filter(|record| record.failure.id == failure.id)
            .count();
        assert_eq!(matching, 1, "{}", failure.id);
    }
}

#[tokio::test]
async fn nominal_metrics_produce_nothing() {
    let (coordinator, _provider) = coordinator_with(SystemMetrics::nominal());
    let events = record(&coordinator);
    assert!(coordinator.run_health_check().await.failures.is_empty());
    assert!(coordinator.run_predictive_check().await.predictions.is_empty());
    assert!(events.lock().is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_is_idempotent_and_schedules_one_timer_per_loop() {
    let mut hot = SystemMetrics::nominal();
    hot.gpu.temperature = 95.0;
    let (coordinator, _provider) = coordinator_with(hot);
    let events = record(&coordinator);

    assert!(coordinator.start().unwrap());
    assert!(!coordinator.start().unwrap());
    assert_eq!(count(&events, HealingEventKind::SelfHealingStarted), 1);

    // The first health check fires one period after start.
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(count(&events, HealingEventKind::FailureDetected), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(count(&events, HealingEventKind::FailureDetected), 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(count(&events, HealingEventKind::FailureDetected), 2);
    assert_eq!(count(&events, HealingEventKind::RecoveryCompleted), 2);

    assert!(coordinator.stop());
}

#[tokio::test(start_paused = true)]
async fn stop_halts_both_loops() {
    let mut metrics = leaking_memory();
    metrics.memory.percentage = 93.0;
    let (coordinator, _provider) = coordinator_with(metrics);
    let events = record(&coordinator);

    coordinator.start().unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(count(&events, HealingEventKind::FailureDetected) >= 2);
    assert_eq!(count(&events, HealingEventKind::FailurePredicted), 1);

    assert!(coordinator.stop());
    assert!(!coordinator.stop());
    assert!(!coordinator.is_running());
    let detected = count(&events, HealingEventKind::FailureDetected);
    let predicted = count(&events, HealingEventKind::FailurePredicted);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(count(&events, HealingEventKind::FailureDetected), detected);
    assert_eq!(count(&events, HealingEventKind::FailurePredicted), predicted);
    assert_eq!(count(&events, HealingEventKind::SelfHealingStopped), 1);

    // Restarting after a stop schedules fresh loops.
    assert!(coordinator.start().unwrap());
    assert_eq!(count(&events, HealingEventKind::SelfHealingStarted), 2);
    coordinator.stop();
}

#[tokio::test]
async fn predictive_pass_dispatches_only_likely_failures() {
    let mut metrics = SystemMetrics::nominal();
    metrics.gpu.temperature = 87.0;
    metrics.memory.percentage = 93.0;
    metrics.memory.leaks_detected = true;
    let (coordinator, _provider) = coordinator_with(metrics);
    let events = record(&coordinator);

    let report = coordinator.run_predictive_check().await;
    assert_eq!(report.predictions.len(), 2);
    assert!(report.predictions.iter().all(|p| p.confidence > 0.7));

    // GPU sits at probability 0.8, which does not clear the strict 0.8 threshold.
    assert_eq!(report.preventive.len(), 1);
    let (failure_type, dispatched) = &report.preventive[0];
    assert_eq!(*failure_type, FailureType::MemoryLeak);
    assert_eq!(dispatched.performed.len(), 3);
    assert!(dispatched.skipped.is_empty());

    assert_eq!(kinds(&events), vec![HealingEventKind::FailurePredicted]);
    assert_eq!(coordinator.recent_predictions().len(), 2);
}

#[tokio::test]
async fn on_demand_prediction_emits_nothing() {
    let mut metrics = SystemMetrics::nominal();
    metrics.database.lock_wait_count = 80;
    let (coordinator, _provider) = coordinator_with(metrics);
    let events = record(&coordinator);

    let predictions = coordinator.predict_failures().await;
    assert_eq!(predictions.len(), 1);
    assert_eq!(predictions[0].failure_type, FailureType::DatabaseFailure);
    assert!(events.lock().is_empty());
    assert_eq!(coordinator.recent_predictions().len(), 1);
}

struct UnreachableTelemetry;

#[async_trait]
impl MetricsProvider for UnreachableTelemetry {
    async fn system_metrics(&self) -> sems_healing::Result<SystemMetrics> {
        Err(HealingError::MetricsUnavailable("telemetry backend timeout".into()))
    }
}

#[tokio::test]
async fn metrics_outage_is_treated_as_healthy_tick() {
    let registry = new_registry();
    let metrics = HealingMetrics::new(registry.clone()).unwrap();
    let coordinator = SelfHealingCoordinator::builder(HealingConfig::default())
        .provider(Arc::new(UnreachableTelemetry))
        .executor(instant_executor())
        .metrics(metrics)
        .build();
    let events = record(&coordinator);

    assert!(coordinator.run_health_check().await.failures.is_empty());
    assert!(coordinator.run_predictive_check().await.predictions.is_empty());
    assert!(coordinator.predict_failures().await.is_empty());
    assert!(events.lock().is_empty());

    let family = registry
        .gather()
        .into_iter()
        .find(|family| family.get_name() == "sems_healing_tick_errors_total")
        .expect("tick error family registered");
    let total: f64 = family
        .get_metric()
        .iter()
        .map(|metric| metric.get_counter().get_value())
        .sum();
    assert_eq!(total, 3.0);
}

#[tokio::test]
async fn health_ignores_finished_recoveries() {
    let (coordinator, _provider) = coordinator_with(leaking_memory());
    assert!(!coordinator.is_healthy());

    coordinator.start().unwrap();
    assert!(coordinator.is_healthy());

    coordinator.run_health_check().await;
    assert_eq!(coordinator.active_recoveries().len(), 1);
    assert_eq!(coordinator.recovering_count(), 0);
    assert!(coordinator.is_healthy());

    assert_eq!(coordinator.clear_recoveries(), 1);
    assert!(coordinator.active_recoveries().is_empty());
    coordinator.stop();
    assert!(!coordinator.is_healthy());
}

#[derive(Debug)]
struct OptimisticStrategy {
    descriptor: StrategyDescriptor,
}

#[async_trait]
impl RecoveryStrategy for OptimisticStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _failure: &SystemFailure) -> sems_healing::Result<RecoveryResult> {
        Ok(RecoveryResult::succeeded(vec!["Clear GPU memory".into()]))
    }

    async fn validate(&self, _failure: &SystemFailure, _result: &RecoveryResult) -> bool {
        false
    }
}

#[tokio::test]
async fn rejected_validation_ends_in_recovery_failed() {
    let mut registry = RecoveryStrategyRegistry::new();
    registry.register(
        FailureType::GpuModelFailure,
        Arc::new(OptimisticStrategy {
            descriptor: StrategyDescriptor {
                id: "optimistic".into(),
                name: "Optimistic".into(),
                description: "Claims success, never validates".into(),
                applicable_failure_types: [FailureType::GpuModelFailure].into_iter().collect(),
            },
        }),
    );
    let mut hot = SystemMetrics::nominal();
    hot.gpu.error_count = 25;
    let coordinator = SelfHealingCoordinator::builder(HealingConfig::default())
        .provider(Arc::new(StaticMetricsProvider::new(hot)))
        .registry(registry)
        .build();
    let events = record(&coordinator);

    let report = coordinator.run_health_check().await;
    let result = &report.recoveries[0];
    assert!(!result.success);
    assert_eq!(result.actions, vec!["Recovery attempt failed"]);
    assert_eq!(result.errors, vec!["Recovery validation failed"]);

    assert_eq!(
        kinds(&events).last(),
        Some(&HealingEventKind::RecoveryFailed)
    );
    assert_eq!(count(&events, HealingEventKind::RecoveryCompleted), 0);
    let ledger = coordinator.active_recoveries();
    assert_eq!(ledger[0].state, RecoveryState::Failed);
    assert_eq!(ledger[0].result.as_ref(), Some(result));
}

#[tokio::test]
async fn missing_strategy_returns_structured_result() {
    let coordinator = SelfHealingCoordinator::builder(HealingConfig::default())
        .registry(RecoveryStrategyRegistry::new())
        .build();
    let failure = SystemFailure::new(
        "api_failure_42",
        FailureType::ApiFailure,
        Severity::Low,
        "manual report",
        &["api"],
        SystemMetrics::nominal(),
    );
    let result = coordinator.execute_recovery(&failure).await;
    assert!(!result.success);
    assert_eq!(result.actions, vec!["No recovery strategy available"]);
    assert!(!result.errors.is_empty());
}

#[tokio::test]
async fn panicking_subscriber_does_not_stop_the_tick() {
    let (coordinator, _provider) = coordinator_with(leaking_memory());
    coordinator.subscribe(HealingEventKind::FailureDetected, |_| panic!("widget crashed"));
    let events = record(&coordinator);

    let report = coordinator.run_health_check().await;
    assert!(report.recoveries[0].success);
    assert_eq!(count(&events, HealingEventKind::RecoveryCompleted), 1);
}

#[tokio::test]
async fn replaced_snapshot_clears_the_condition() {
    let (coordinator, provider) = coordinator_with(leaking_memory());
    assert_eq!(coordinator.run_health_check().await.failures.len(), 1);
    provider.replace(SystemMetrics::nominal());
    assert!(coordinator.run_health_check().await.failures.is_empty());
    assert_eq!(coordinator.failure_history().len(), 1);
}

/// Panics on its first read, then reports an overheating GPU.
struct CrashOnceTelemetry {
    calls: AtomicUsize,
}

#[async_trait]
impl MetricsProvider for CrashOnceTelemetry {
    async fn system_metrics(&self) -> sems_healing::Result<SystemMetrics> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("telemetry driver crashed");
        }
        let mut metrics = SystemMetrics::nominal();
        metrics.gpu.temperature = 95.0;
        Ok(metrics)
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_tick_does_not_kill_the_loop() {
    let registry = new_registry();
    let provider = Arc::new(CrashOnceTelemetry {
        calls: AtomicUsize::new(0),
    });
    let coordinator = SelfHealingCoordinator::builder(HealingConfig::default())
        .provider(provider.clone())
        .executor(instant_executor())
        .metrics(HealingMetrics::new(registry.clone()).unwrap())
        .build();
    let events = record(&coordinator);

    coordinator.start().unwrap();
    // Health checks at 30s (panics), 60s, 90s, 120s and 150s; predictive at 60s and 120s.
    tokio::time::sleep(Duration::from_secs(151)).await;
    coordinator.stop();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 7);
    assert_eq!(count(&events, HealingEventKind::FailureDetected), 4);
    assert_eq!(count(&events, HealingEventKind::RecoveryCompleted), 4);

    let family = registry
        .gather()
        .into_iter()
        .find(|family| family.get_name() == "sems_healing_tick_errors_total")
        .expect("tick error family registered");
    let health_errors: f64 = family
        .get_metric()
        .iter()
        .filter(|metric| {
            metric
                .get_label()
                .iter()
                .any(|label| label.get_value() == "health_check")
        })
        .map(|metric| metric.get_counter().get_value())
        .sum();
    assert_eq!(health_errors, 1.0);
}

#[derive(Debug)]
struct LockedPoolExecutor;

#[async_trait]
impl ActionExecutor for LockedPoolExecutor {
    async fn perform(
        &self,
        action: RemediationAction,
        _context: FailureType,
    ) -> sems_healing::Result<()> {
        if action == RemediationAction::ResetConnectionPool {
            return Err(HealingError::StepFailed {
                action,
                reason: "pool locked".into(),
            });
        }
        Ok(())
    }
}

#[tokio::test]
async fn failed_step_is_the_reported_recovery_error() {
    let mut metrics = SystemMetrics::nominal();
    metrics.database.query_time_ms = 5000.0;
    let coordinator = SelfHealingCoordinator::builder(HealingConfig::default())
        .provider(Arc::new(StaticMetricsProvider::new(metrics)))
        .executor(Arc::new(LockedPoolExecutor))
        .build();
    let events = record(&coordinator);

    let report = coordinator.run_health_check().await;
    let result = &report.recoveries[0];
    assert!(!result.success);
    assert_eq!(result.actions, vec!["Recovery attempt failed"]);
    assert!(result.errors[0].contains("pool locked"));

    let events = events.lock();
    match events.last() {
        Some(HealingEvent::RecoveryFailed { error, .. }) => {
            assert!(error.contains("pool locked"), "{error}");
        }
        other => panic!("unexpected final event {other:?}"),
    }
}
