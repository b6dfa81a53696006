//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

use crate::actions::RemediationAction;
use crate::types::RecoveryState;

/// Result alias used throughout the healing crate.
pub type Result<T> = std::result::Result<T, HealingError>;

/// Errors raised inside the healing core. None of them escape the coordinator:
/// they are converted into unsuccessful recovery results, failure events, or log lines.
#[derive(Debug, Error)]
pub enum HealingError {
    /// The metrics collaborator could not produce a snapshot.
    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),
    /// A remediation step reported an error.
    #[error("remediation step '{action}' failed: {reason}")]
    StepFailed {
        /// Step that failed.
        action: RemediationAction,
        /// Reason reported by the executor.
        reason: String,
    },
    /// The strategy reported an unsuccessful outcome; carries its first error.
    #[error("{0}")]
    StrategyFailed(String),
    /// Post-recovery validation rejected the outcome.
    #[error("Recovery validation failed")]
    ValidationFailed,
    /// The preparation hook refused to start the recovery.
    #[error("recovery preparation failed: {0}")]
    Prepare(String),
    /// A strategy rollback did not complete.
    #[error("rollback failed: {0}")]
    Rollback(String),
    /// A preventive action name outside the remediation vocabulary.
    #[error("unknown preventive action '{0}'")]
    UnknownPreventiveAction(String),
    /// A recovery record was asked to move backwards or skip a state.
    #[error("invalid recovery transition from {from} to {to}")]
    InvalidTransition {
        /// Current state.
        from: RecoveryState,
        /// Requested state.
        to: RecoveryState,
    },
    /// Monitoring loops need an active tokio runtime.
    #[error("no tokio runtime available to schedule monitoring loops")]
    RuntimeUnavailable,
    /// Serialization errors while building result metadata or reports.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
