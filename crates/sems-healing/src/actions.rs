//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Remediation vocabulary shared by recovery strategies and preventive dispatch.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};
use tokio::time::sleep;
use tracing::debug;

use crate::error::Result;
use crate::types::FailureType;

/// A single named remediation step. The label is the human-readable text that
/// appears in recovery results and in prediction `preventiveActions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, EnumIter)]
pub enum RemediationAction {
    #[strum(serialize = "Clear GPU memory")]
    ClearGpuMemory,
    #[strum(serialize = "Restart GPU service")]
    RestartGpuService,
    #[strum(serialize = "Reload AI models")]
    ReloadModels,
    #[strum(serialize = "Validate model performance")]
    ValidateModelPerformance,
    #[strum(serialize = "Reduce GPU load")]
    ReduceGpuLoad,
    #[strum(serialize = "Schedule model reload")]
    ScheduleModelReload,
    #[strum(serialize = "Identify memory-intensive processes")]
    IdentifyMemoryHogs,
    #[strum(serialize = "Trigger garbage collection")]
    TriggerGarbageCollection,
    #[strum(serialize = "Clear memory caches")]
    ClearMemoryCaches,
    #[strum(serialize = "Restart memory-intensive services")]
    RestartLeakingServices,
    #[strum(serialize = "Terminate long-running queries")]
    TerminateLongQueries,
    #[strum(serialize = "Reset connection pool")]
    ResetConnectionPool,
    #[strum(serialize = "Increase connection pool")]
    ExpandConnectionPool,
    #[strum(serialize = "Optimize slow queries")]
    OptimizeSlowQueries,
    #[strum(serialize = "Clear query cache")]
    ClearQueryCache,
    #[strum(serialize = "Verify database connectivity")]
    VerifyDatabaseConnectivity,
    #[strum(serialize = "Restore connection pool configuration")]
    RestoreConnectionPool,
    #[strum(serialize = "Close stale connections")]
    CloseStaleConnections,
    #[strum(serialize = "Restart WebSocket server")]
    RestartWebsocketServer,
    #[strum(serialize = "Re-establish client sessions")]
    ReestablishClientSessions,
    #[strum(serialize = "Enable request throttling")]
    EnableRequestThrottling,
    #[strum(serialize = "Restart API workers")]
    RestartApiWorkers,
    #[strum(serialize = "Flush request queue")]
    FlushRequestQueue,
    #[strum(serialize = "Rebalance processing load")]
    RebalanceProcessingLoad,
    #[strum(serialize = "Reduce stream resolution")]
    ReduceStreamResolution,
    #[strum(serialize = "Scale worker pool")]
    ScaleWorkerPool,
}

impl RemediationAction {
    /// Resolve a label from the vocabulary, ignoring surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::from_str(label.trim()).ok()
    }

    /// Every label in the vocabulary, in declaration order.
    pub fn labels() -> Vec<String> {
        Self::iter().map(|action| action.to_string()).collect()
    }
}

impl Serialize for RemediationAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RemediationAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        RemediationAction::from_label(&label).ok_or_else(|| {
            serde::de::Error::custom(format!("unknown remediation action '{}'", label))
        })
    }
}

/// Performs remediation steps against the monitored system.
#[async_trait]
pub trait ActionExecutor: Send + Sync + fmt::Debug {
    /// Run one step. `context` is the failure type being remediated or prevented.
    async fn perform(&self, action: RemediationAction, context: FailureType) -> Result<()>;
}

/// Mock executor whose steps only take time. Used until real infrastructure hooks exist.
#[derive(Debug, Clone)]
pub struct SimulatedActionExecutor {
    step_delay: Duration,
}

impl SimulatedActionExecutor {
    pub fn new(step_delay: Duration) -> Self {
        Self { step_delay }
    }
}

impl Default for SimulatedActionExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(250))
    }
}

#[async_trait]
impl ActionExecutor for SimulatedActionExecutor {
    async fn perform(&self, action: RemediationAction, context: FailureType) -> Result<()> {
        debug!(
            target: "sems::healing::actions",
            action = %action,
            failure_type = %context,
            delay_ms = self.step_delay.as_millis() as u64,
            "simulating remediation step",
        );
        if !self.step_delay.is_zero() {
            sleep(self.step_delay).await;
        }
        Ok(())
    }
}
