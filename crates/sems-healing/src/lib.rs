//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Failure detection, prediction, and recovery orchestration.
//!
//! A [`SelfHealingCoordinator`] polls a [`MetricsProvider`], classifies each
//! snapshot with the [`FailureDetector`], and hands high and critical failures to
//! the [`RecoveryOrchestrator`]. A second loop runs the [`FailurePredictor`] and
//! dispatches preventive actions for likely failures.

pub mod actions;
pub mod coordinator;
pub mod detector;
pub mod error;
pub mod events;
pub mod metrics;
pub mod orchestrator;
pub mod predictor;
pub mod preventive;
pub mod provider;
pub mod strategy;
pub mod types;

pub use actions::{ActionExecutor, RemediationAction, SimulatedActionExecutor};
pub use coordinator::{
    HealthCheckReport, PredictiveReport, SelfHealingCoordinator, SelfHealingCoordinatorBuilder,
};
pub use detector::FailureDetector;
pub use error::{HealingError, Result};
pub use events::{EventBus, HealingEvent, HealingEventKind, SubscriptionId};
pub use metrics::HealingMetrics;
pub use orchestrator::{NoopHooks, RecoveryHooks, RecoveryOrchestrator, RecoveryRecord};
pub use predictor::FailurePredictor;
pub use preventive::{PreventiveDispatcher, PreventiveReport};
pub use provider::{MetricsProvider, StaticMetricsProvider};
pub use strategy::{RecoveryStrategy, RecoveryStrategyRegistry, StepwiseStrategy, StrategyDescriptor};
pub use types::{
    FailurePrediction, FailureType, RecoveryResult, RecoveryState, Severity, SystemFailure,
    SystemMetrics,
};

/// Crate prelude collecting the types most callers need.
pub mod prelude {
    pub use super::actions::{ActionExecutor, RemediationAction};
    pub use super::coordinator::SelfHealingCoordinator;
    pub use super::events::{HealingEvent, HealingEventKind};
    pub use super::provider::MetricsProvider;
    pub use super::strategy::{RecoveryStrategy, RecoveryStrategyRegistry};
    pub use super::types::{
        FailurePrediction, FailureType, RecoveryResult, Severity, SystemFailure, SystemMetrics,
    };
}
