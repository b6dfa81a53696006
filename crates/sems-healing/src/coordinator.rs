//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Composition root: owns the health-check and predictive loops and exposes the
//! event and query API consumed by dashboards.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use parking_lot::Mutex;
use sems_common::config::HealingConfig;
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::actions::{ActionExecutor, SimulatedActionExecutor};
use crate::detector::FailureDetector;
use crate::error::{HealingError, Result};
use crate::events::{panic_message, EventBus, HealingEvent, HealingEventKind, SubscriptionId};
use crate::metrics::HealingMetrics;
use crate::orchestrator::{NoopHooks, RecoveryHooks, RecoveryOrchestrator, RecoveryRecord};
use crate::predictor::FailurePredictor;
use crate::preventive::{PreventiveDispatcher, PreventiveReport};
use crate::provider::{MetricsProvider, StaticMetricsProvider};
use crate::strategy::{RecoveryStrategyRegistry, StrategyDescriptor};
use crate::types::{FailurePrediction, FailureType, RecoveryResult, SystemFailure, SystemMetrics};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorLoop {
    HealthCheck,
    Predictive,
}

impl MonitorLoop {
    fn as_str(self) -> &'static str {
        match self {
            MonitorLoop::HealthCheck => "health_check",
            MonitorLoop::Predictive => "predictive",
        }
    }
}

/// Outcome of one health-check pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckReport {
    pub failures: Vec<SystemFailure>,
    /// Results of the automatic recoveries started by this pass, in failure order.
    pub recoveries: Vec<RecoveryResult>,
}

/// Outcome of one predictive pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictiveReport {
    pub predictions: Vec<FailurePrediction>,
    /// Preventive dispatch for each prediction above the probability threshold.
    pub preventive: Vec<(FailureType, PreventiveReport)>,
}

/// Builder for [`SelfHealingCoordinator`]; every collaborator is optional.
pub struct SelfHealingCoordinatorBuilder {
    config: HealingConfig,
    provider: Option<Arc<dyn MetricsProvider>>,
    registry: Option<RecoveryStrategyRegistry>,
    executor: Option<Arc<dyn ActionExecutor>>,
    hooks: Option<Arc<dyn RecoveryHooks>>,
    metrics: Option<HealingMetrics>,
}

impl SelfHealingCoordinatorBuilder {
    pub fn provider(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Replace the built-in strategy catalog.
    pub fn registry(mut self, registry: RecoveryStrategyRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Executor used by the built-in strategies and by preventive dispatch.
    pub fn executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn RecoveryHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn metrics(mut self, metrics: HealingMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> SelfHealingCoordinator {
        let config = self.config;
        let executor = self.executor.unwrap_or_else(|| {
            Arc::new(SimulatedActionExecutor::new(config.simulated_step_delay))
        });
        let registry = self
            .registry
            .unwrap_or_else(|| RecoveryStrategyRegistry::with_builtin(executor.clone()));
        let events = Arc::new(EventBus::new());
        let orchestrator = RecoveryOrchestrator::new(
            Arc::new(registry),
            self.hooks.unwrap_or_else(|| Arc::new(NoopHooks)),
            events.clone(),
            self.metrics.clone(),
        );

        let inner = Inner {
            detector: FailureDetector::new(config.detection.clone()),
            predictor: FailurePredictor::new(
                config.prediction.clone(),
                config.min_prediction_confidence,
            ),
            provider: self
                .provider
                .unwrap_or_else(|| Arc::new(StaticMetricsProvider::default())),
            preventive: PreventiveDispatcher::new(executor, self.metrics.clone()),
            orchestrator,
            events,
            metrics: self.metrics,
            history: Mutex::new(VecDeque::with_capacity(config.history_capacity.min(1024))),
            predictions: Mutex::new(VecDeque::with_capacity(
                config.prediction_buffer_capacity.min(1024),
            )),
            running: AtomicBool::new(false),
            config,
        };
        SelfHealingCoordinator {
            inner: Arc::new(inner),
            loops: Mutex::new(None),
        }
    }
}

/// Monitoring supervisor wiring provider, detector, predictor, and orchestrator.
#[derive(Debug)]
pub struct SelfHealingCoordinator {
    inner: Arc<Inner>,
    loops: Mutex<Option<LoopHandles>>,
}

#[derive(Debug)]
struct LoopHandles {
    shutdown: broadcast::Sender<()>,
}

struct Inner {
    config: HealingConfig,
    provider: Arc<dyn MetricsProvider>,
    detector: FailureDetector,
    predictor: FailurePredictor,
    orchestrator: RecoveryOrchestrator,
    preventive: PreventiveDispatcher,
    events: Arc<EventBus>,
    metrics: Option<HealingMetrics>,
    history: Mutex<VecDeque<SystemFailure>>,
    predictions: Mutex<VecDeque<FailurePrediction>>,
    running: AtomicBool,
}

impl std::fmt::Debug for Inner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfHealing")
            .field("running", &self.running.load(Ordering::Relaxed))
            .field("history", &self.history.lock().len())
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

impl SelfHealingCoordinator {
    pub fn builder(config: HealingConfig) -> SelfHealingCoordinatorBuilder {
        SelfHealingCoordinatorBuilder {
            config,
            provider: None,
            registry: None,
            executor: None,
            hooks: None,
            metrics: None,
        }
    }

    /// Start both monitoring loops on the current tokio runtime and emit
    /// `selfHealingStarted`. Returns `Ok(false)` when already running.
    pub fn start(&self) -> Result<bool> {
        {
            let mut loops = self.loops.lock();
            if loops.is_some() {
                debug!(target: "sems::healing::coordinator", "self-healing already running");
                return Ok(false);
            }
            let runtime = Handle::try_current().map_err(|_| HealingError::RuntimeUnavailable)?;
            let (shutdown, _) = broadcast::channel(4);
            spawn_loop(
                &runtime,
                self.inner.clone(),
                MonitorLoop::HealthCheck,
                self.inner.config.health_check_interval,
                shutdown.subscribe(),
            );
            spawn_loop(
                &runtime,
                self.inner.clone(),
                MonitorLoop::Predictive,
                self.inner.config.predictive_interval,
                shutdown.subscribe(),
            );
            self.inner.running.store(true, Ordering::SeqCst);
            *loops = Some(LoopHandles { shutdown });
        }

        info!(
            target: "sems::healing::coordinator",
            health_check_interval_ms = self.inner.config.health_check_interval.as_millis() as u64,
            predictive_interval_ms = self.inner.config.predictive_interval.as_millis() as u64,
            "self-healing started",
        );
        self.inner.events.emit(&HealingEvent::SelfHealingStarted);
        Ok(true)
    }

    /// Halt future polling and emit `selfHealingStopped`. Recoveries already in
    /// flight run to completion. Returns `false` when not running.
    pub fn stop(&self) -> bool {
        let Some(handles) = self.loops.lock().take() else {
            return false;
        };
        self.inner.running.store(false, Ordering::SeqCst);
        // Loops also exit when the sender is dropped, so a send error is harmless.
        let _ = handles.shutdown.send(());
        info!(target: "sems::healing::coordinator", "self-healing stopped");
        self.inner.events.emit(&HealingEvent::SelfHealingStopped);
        true
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// One health-check pass on demand, independent of the schedule.
    pub async fn run_health_check(&self) -> HealthCheckReport {
        self.inner.health_check(false).await
    }

    /// One predictive pass on demand, including events and preventive dispatch.
    pub async fn run_predictive_check(&self) -> PredictiveReport {
        self.inner.predictive_check(false).await
    }

    /// Predict from a fresh snapshot without emitting events or dispatching actions.
    /// The predictions are added to the recent-predictions buffer.
    pub async fn predict_failures(&self) -> Vec<FailurePrediction> {
        match self.inner.fetch_metrics(MonitorLoop::Predictive).await {
            Some(metrics) => self.inner.predict(&metrics),
            None => Vec::new(),
        }
    }

    /// Manually remediate a failure of any severity.
    pub async fn execute_recovery(&self, failure: &SystemFailure) -> RecoveryResult {
        self.inner.orchestrator.execute_recovery(failure).await
    }

    /// Detected failures, oldest first.
    pub fn failure_history(&self) -> Vec<SystemFailure> {
        self.inner.history.lock().iter().cloned().collect()
    }

    /// The recent-activity ledger: in-flight and finished recoveries.
    pub fn active_recoveries(&self) -> Vec<RecoveryRecord> {
        self.inner.orchestrator.active_recoveries()
    }

    pub fn clear_recoveries(&self) -> usize {
        self.inner.orchestrator.clear_recoveries()
    }

    pub fn recovering_count(&self) -> usize {
        self.inner.orchestrator.recovering_count()
    }

    pub fn recent_predictions(&self) -> Vec<FailurePrediction> {
        self.inner.predictions.lock().iter().cloned().collect()
    }

    pub fn recovery_strategies(&self) -> Vec<(FailureType, StrategyDescriptor)> {
        self.inner.orchestrator.registry().catalog()
    }

    /// Monitoring is running and no recovery is currently executing. Finished
    /// entries in the ledger do not affect health.
    pub fn is_healthy(&self) -> bool {
        self.is_running() && self.recovering_count() == 0
    }

    pub fn subscribe<F>(&self, kind: HealingEventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&HealingEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.events.subscribe(kind, callback)
    }

    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&HealingEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.inner.events.subscribe_all(callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.events.unsubscribe(id)
    }
}

impl Drop for SelfHealingCoordinator {
    fn drop(&mut self) {
        if let Some(handles) = self.loops.get_mut().take() {
            self.inner.running.store(false, Ordering::SeqCst);
            let _ = handles.shutdown.send(());
        }
    }
}

fn spawn_loop(
    runtime: &Handle,
    inner: Arc<Inner>,
    kind: MonitorLoop,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    runtime.spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(target: "sems::healing::coordinator", loop_name = kind.as_str(), "monitoring loop shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    let tick = async {
                        match kind {
                            MonitorLoop::HealthCheck => {
                                inner.health_check(true).await;
                            }
                            MonitorLoop::Predictive => {
                                inner.predictive_check(true).await;
                            }
                        }
                    };
                    if let Err(panic) = AssertUnwindSafe(tick).catch_unwind().await {
                        error!(
                            target: "sems::healing::coordinator",
                            loop_name = kind.as_str(),
                            panic = %panic_message(panic.as_ref()),
                            "monitoring tick panicked; continuing with next tick",
                        );
                        if let Some(metrics) = &inner.metrics {
                            metrics.inc_tick_error(kind.as_str());
                        }
                    }
                }
            }
        }
    });
}

impl Inner {
    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Scheduled passes stop emitting as soon as monitoring is stopped.
    fn halted(&self, scheduled: bool) -> bool {
        scheduled && !self.is_running()
    }

    async fn fetch_metrics(&self, kind: MonitorLoop) -> Option<SystemMetrics> {
        match self.provider.system_metrics().await {
            Ok(metrics) => Some(metrics),
            Err(err) => {
                warn!(
                    target: "sems::healing::coordinator",
                    loop_name = kind.as_str(),
                    error = %err,
                    "metrics unavailable; treating tick as healthy",
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_tick_error(kind.as_str());
                }
                None
            }
        }
    }

    async fn health_check(&self, scheduled: bool) -> HealthCheckReport {
        let Some(snapshot) = self.fetch_metrics(MonitorLoop::HealthCheck).await else {
            return HealthCheckReport::default();
        };
        let mut failures = self.detector.detect(&snapshot);

        let mut processed = 0;
        for failure in &failures {
            if self.halted(scheduled) {
                debug!(target: "sems::healing::coordinator", "stopped during health check");
                break;
            }
            processed += 1;
            self.remember_failure(failure.clone());
            if let Some(metrics) = &self.metrics {
                metrics.record_failure(failure.failure_type, failure.severity);
            }
            info!(
                target: "sems::healing::coordinator",
                failure_id = %failure.id,
                failure_type = %failure.failure_type,
                severity = %failure.severity,
                "failure detected",
            );
            self.events.emit(&HealingEvent::FailureDetected {
                failure: failure.clone(),
            });
        }
        // Failures cut off by a stop were neither recorded nor announced.
        failures.truncate(processed);

        // Attempts for different failures may interleave; each stays sequential inside.
        let recoveries = join_all(
            failures
                .iter()
                .filter(|failure| failure.severity.triggers_auto_recovery())
                .map(|failure| self.orchestrator.execute_recovery(failure)),
        )
        .await;

        HealthCheckReport {
            failures,
            recoveries,
        }
    }

    async fn predictive_check(&self, scheduled: bool) -> PredictiveReport {
        let Some(snapshot) = self.fetch_metrics(MonitorLoop::Predictive).await else {
            return PredictiveReport::default();
        };
        let predictions = self.predict(&snapshot);

        let mut preventive = Vec::new();
        for prediction in &predictions {
            if prediction.probability <= self.config.preventive_probability_threshold {
                continue;
            }
            if self.halted(scheduled) {
                debug!(target: "sems::healing::coordinator", "stopped during predictive check");
                break;
            }
            info!(
                target: "sems::healing::coordinator",
                failure_type = %prediction.failure_type,
                probability = prediction.probability,
                confidence = prediction.confidence,
                eta_ms = prediction.estimated_time_to_failure_ms,
                "failure predicted",
            );
            self.events.emit(&HealingEvent::FailurePredicted {
                prediction: prediction.clone(),
            });
            let report = self.preventive.dispatch(prediction).await;
            preventive.push((prediction.failure_type, report));
        }

        PredictiveReport {
            predictions,
            preventive,
        }
    }

    fn predict(&self, snapshot: &SystemMetrics) -> Vec<FailurePrediction> {
        let predictions = self.predictor.predict(snapshot);
        if !predictions.is_empty() {
            let mut buffer = self.predictions.lock();
            for prediction in &predictions {
                if let Some(metrics) = &self.metrics {
                    metrics.record_prediction(prediction.failure_type);
                }
                push_bounded(
                    &mut buffer,
                    prediction.clone(),
                    self.config.prediction_buffer_capacity,
                );
            }
        }
        predictions
    }

    fn remember_failure(&self, failure: SystemFailure) {
        push_bounded(
            &mut self.history.lock(),
            failure,
            self.config.history_capacity,
        );
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, capacity: usize) {
    while buffer.len() >= capacity.max(1) {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_buffers_drop_oldest() {
        let mut buffer = VecDeque::new();
        for value in 0..5 {
            push_bounded(&mut buffer, value, 3);
        }
        assert_eq!(buffer.into_iter().collect::<Vec<_>>(), vec![2, 3, 4]);
    }

    #[test]
    fn start_requires_a_runtime() {
        let coordinator = SelfHealingCoordinator::builder(HealingConfig::default()).build();
        assert!(matches!(
            coordinator.start(),
            Err(HealingError::RuntimeUnavailable)
        ));
        assert!(!coordinator.is_running());
        assert!(!coordinator.stop());
    }

    #[tokio::test]
    async fn halted_scheduled_pass_reports_only_processed_failures() {
        let mut metrics = SystemMetrics::nominal();
        metrics.gpu.temperature = 95.0;
        metrics.database.query_time_ms = 2500.0;
        let coordinator = SelfHealingCoordinator::builder(HealingConfig::default())
            .provider(Arc::new(StaticMetricsProvider::new(metrics)))
            .executor(Arc::new(SimulatedActionExecutor::new(Duration::ZERO)))
            .build();

        // Never started, so a scheduled pass is already halted.
        let report = coordinator.inner.health_check(true).await;
        assert!(report.failures.is_empty());
        assert!(report.recoveries.is_empty());
        assert!(coordinator.failure_history().is_empty());

        let manual = coordinator.run_health_check().await;
        assert_eq!(manual.failures.len(), 2);
        assert_eq!(manual.recoveries.len(), 2);
    }

    #[test]
    fn strategies_are_listed_in_registration_order() {
        let coordinator = SelfHealingCoordinator::builder(HealingConfig::default()).build();
        let catalog = coordinator.recovery_strategies();
        assert_eq!(catalog.len(), 6);
        assert_eq!(catalog[0].0, FailureType::GpuModelFailure);
    }
}
