//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Data model shared by the detector, predictor, orchestrator, and event consumers.
//!
//! Field names serialize in camelCase because dashboards consume these payloads directly.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// CPU readings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuMetrics {
    pub usage: f64,
    pub temperature: f64,
    #[serde(default)]
    pub load: Vec<f64>,
}

/// Host memory readings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryMetrics {
    pub used: u64,
    pub total: u64,
    pub percentage: f64,
    #[serde(default)]
    pub leaks_detected: bool,
}

/// GPU readings for the detection models.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GpuMetrics {
    pub usage: f64,
    pub memory_used: f64,
    pub temperature: f64,
    pub error_count: u64,
}

/// Network readings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkMetrics {
    pub latency_ms: f64,
    pub throughput: f64,
    pub error_count: u64,
    pub connection_count: u64,
}

/// Database readings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseMetrics {
    pub connection_count: u64,
    pub query_time_ms: f64,
    pub error_count: u64,
    pub lock_wait_count: u64,
}

/// API gateway readings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMetrics {
    pub response_time_ms: f64,
    pub error_rate: f64,
    pub throughput: f64,
    pub queue_size: u64,
}

/// Snapshot of system health produced fresh on every poll and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    #[serde(default = "Utc::now")]
    pub collected_at: DateTime<Utc>,
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub gpu: GpuMetrics,
    pub network: NetworkMetrics,
    pub database: DatabaseMetrics,
    pub api: ApiMetrics,
}

impl SystemMetrics {
    /// Readings that sit below every detection and prediction threshold.
    pub fn nominal() -> Self {
        Self {
            collected_at: Utc::now(),
            cpu: CpuMetrics {
                usage: 45.0,
                temperature: 65.0,
                load: vec![1.2, 1.5, 1.8],
            },
            memory: MemoryMetrics {
                used: 8 * 1024,
                total: 16 * 1024,
                percentage: 50.0,
                leaks_detected: false,
            },
            gpu: GpuMetrics {
                usage: 60.0,
                memory_used: 4096.0,
                temperature: 70.0,
                error_count: 2,
            },
            network: NetworkMetrics {
                latency_ms: 25.0,
                throughput: 1000.0,
                error_count: 5,
                connection_count: 150,
            },
            database: DatabaseMetrics {
                connection_count: 20,
                query_time_ms: 150.0,
                error_count: 1,
                lock_wait_count: 3,
            },
            api: ApiMetrics {
                response_time_ms: 120.0,
                error_rate: 0.01,
                throughput: 500.0,
                queue_size: 10,
            },
        }
    }
}

/// Classified failure categories.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureType {
    GpuModelFailure,
    DatabaseFailure,
    WebsocketFailure,
    ApiFailure,
    MemoryLeak,
    PerformanceDegradation,
}

/// Failure severity, ordered from least to most urgent.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
    EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Whether the health-check loop remediates this severity without operator input.
    pub fn triggers_auto_recovery(&self) -> bool {
        matches!(self, Severity::High | Severity::Critical)
    }
}

/// A classified failure raised by the detector. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemFailure {
    pub id: String,
    #[serde(rename = "type")]
    pub failure_type: FailureType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub affected_services: BTreeSet<String>,
    /// The snapshot that triggered the failure.
    pub metadata: SystemMetrics,
}

impl SystemFailure {
    pub fn new(
        id: impl Into<String>,
        failure_type: FailureType,
        severity: Severity,
        description: impl Into<String>,
        affected_services: &[&str],
        metadata: SystemMetrics,
    ) -> Self {
        Self {
            id: id.into(),
            failure_type,
            severity,
            timestamp: Utc::now(),
            description: description.into(),
            affected_services: affected_services
                .iter()
                .map(|service| (*service).to_owned())
                .collect(),
            metadata,
        }
    }
}

/// Outcome of a recovery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub success: bool,
    /// Milliseconds between the failure's detection and the end of validation.
    pub recovery_time_ms: u64,
    pub actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl RecoveryResult {
    pub fn succeeded(actions: Vec<String>) -> Self {
        Self {
            success: true,
            recovery_time_ms: 0,
            actions,
            errors: Vec::new(),
            metadata: None,
        }
    }

    pub fn failed(actions: Vec<String>, errors: Vec<String>) -> Self {
        Self {
            success: false,
            recovery_time_ms: 0,
            actions,
            errors,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Early-warning forecast emitted by the predictor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailurePrediction {
    #[serde(rename = "type")]
    pub failure_type: FailureType,
    pub probability: f64,
    pub confidence: f64,
    pub estimated_time_to_failure_ms: u64,
    pub indicators: Vec<String>,
    /// Labels from the remediation vocabulary.
    pub preventive_actions: Vec<String>,
    pub predicted_at: DateTime<Utc>,
}

/// Lifecycle of a single recovery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecoveryState {
    Detected,
    Recovering,
    Validated,
    Failed,
}

impl RecoveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryState::Detected => "detected",
            RecoveryState::Recovering => "recovering",
            RecoveryState::Validated => "validated",
            RecoveryState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecoveryState::Validated | RecoveryState::Failed)
    }

    /// States are never revisited; `Detected` may fail directly when no attempt can start.
    pub fn can_transition_to(&self, next: RecoveryState) -> bool {
        matches!(
            (self, next),
            (RecoveryState::Detected, RecoveryState::Recovering)
                | (RecoveryState::Detected, RecoveryState::Failed)
                | (RecoveryState::Recovering, RecoveryState::Validated)
                | (RecoveryState::Recovering, RecoveryState::Failed)
        )
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_type_labels_match_wire_names() {
        assert_eq!(FailureType::GpuModelFailure.to_string(), "gpu_model_failure");
        assert_eq!(
            "memory_leak".parse::<FailureType>().unwrap(),
            FailureType::MemoryLeak
        );
        let json = serde_json::to_string(&FailureType::PerformanceDegradation).unwrap();
        assert_eq!(json, "\"performance_degradation\"");
    }

    #[test]
    fn only_high_and_critical_auto_recover() {
        assert!(!Severity::Low.triggers_auto_recovery());
        assert!(!Severity::Medium.triggers_auto_recovery());
        assert!(Severity::High.triggers_auto_recovery());
        assert!(Severity::Critical.triggers_auto_recovery());
        assert!(Severity::Critical > Severity::High);
    }

    #[test]
    fn recovery_states_never_move_backwards() {
        assert!(RecoveryState::Detected.can_transition_to(RecoveryState::Recovering));
        assert!(RecoveryState::Recovering.can_transition_to(RecoveryState::Failed));
        assert!(!RecoveryState::Validated.can_transition_to(RecoveryState::Recovering));
        assert!(!RecoveryState::Failed.can_transition_to(RecoveryState::Validated));
        assert!(!RecoveryState::Detected.can_transition_to(RecoveryState::Validated));
    }

    #[test]
    fn snapshot_accepts_camel_case_payloads() {
        let payload = serde_json::json!({
            "cpu": { "usage": 10.0, "temperature": 50.0 },
            "memory": { "used": 1, "total": 2, "percentage": 50.0, "leaksDetected": true },
            "gpu": { "usage": 1.0, "memoryUsed": 1.0, "temperature": 60.0, "errorCount": 0 },
            "network": { "latencyMs": 1.0, "throughput": 1.0, "errorCount": 0, "connectionCount": 1 },
            "database": { "connectionCount": 1, "queryTimeMs": 1.0, "errorCount": 0, "lockWaitCount": 0 },
            "api": { "responseTimeMs": 1.0, "errorRate": 0.0, "throughput": 1.0, "queueSize": 0 }
        });
        let metrics: SystemMetrics = serde_json::from_value(payload).unwrap();
        assert!(metrics.memory.leaks_detected);
        assert!(metrics.cpu.load.is_empty());
    }
}
