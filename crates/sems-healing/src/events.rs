//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Failure detection and self-healing orchestration."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! In-process publish/subscribe for healing lifecycle events.
//!
//! Dispatch is synchronous on the emitting task. A subscriber that errors or
//! panics is logged and skipped; the remaining subscribers still receive the event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter};
use tracing::{error, warn};

use crate::types::{FailurePrediction, RecoveryResult, SystemFailure};

/// Event names understood by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum HealingEventKind {
    SelfHealingStarted,
    SelfHealingStopped,
    FailureDetected,
    RecoveryStarted,
    RecoveryCompleted,
    RecoveryFailed,
    FailurePredicted,
}

/// Lifecycle events emitted by the coordinator and orchestrator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum HealingEvent {
    SelfHealingStarted,
    SelfHealingStopped,
    FailureDetected {
        failure: SystemFailure,
    },
    #[serde(rename_all = "camelCase")]
    RecoveryStarted {
        failure: SystemFailure,
        recovery_id: String,
    },
    #[serde(rename_all = "camelCase")]
    RecoveryCompleted {
        failure: SystemFailure,
        result: RecoveryResult,
        recovery_id: String,
    },
    #[serde(rename_all = "camelCase")]
    RecoveryFailed {
        failure: SystemFailure,
        error: String,
        recovery_id: String,
    },
    FailurePredicted {
        prediction: FailurePrediction,
    },
}

impl HealingEvent {
    pub fn kind(&self) -> HealingEventKind {
        match self {
            HealingEvent::SelfHealingStarted => HealingEventKind::SelfHealingStarted,
            HealingEvent::SelfHealingStopped => HealingEventKind::SelfHealingStopped,
            HealingEvent::FailureDetected { .. } => HealingEventKind::FailureDetected,
            HealingEvent::RecoveryStarted { .. } => HealingEventKind::RecoveryStarted,
            HealingEvent::RecoveryCompleted { .. } => HealingEventKind::RecoveryCompleted,
            HealingEvent::RecoveryFailed { .. } => HealingEventKind::RecoveryFailed,
            HealingEvent::FailurePredicted { .. } => HealingEventKind::FailurePredicted,
        }
    }

    /// Recovery id for recovery lifecycle events.
    pub fn recovery_id(&self) -> Option<&str> {
        match self {
            HealingEvent::RecoveryStarted { recovery_id, .. }
            | HealingEvent::RecoveryCompleted { recovery_id, .. }
            | HealingEvent::RecoveryFailed { recovery_id, .. } => Some(recovery_id),
            _ => None,
        }
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Subscriber callback.
pub type EventCallback = Arc<dyn Fn(&HealingEvent) -> anyhow::Result<()> + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    kind: Option<HealingEventKind>,
    callback: EventCallback,
}

/// Registry of callbacks per event kind.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive events of a single kind.
    pub fn subscribe<F>(&self, kind: HealingEventKind, callback: F) -> SubscriptionId
    where
        F: Fn(&HealingEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(Some(kind), Arc::new(callback))
    }

    /// Receive every event.
    pub fn subscribe_all<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&HealingEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(callback))
    }

    /// Returns `false` when the id was unknown or already removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|subscription| subscription.id != id);
        subscriptions.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Deliver `event` to every matching subscriber in subscription order.
    /// Returns the number of subscribers that handled it without error.
    pub fn emit(&self, event: &HealingEvent) -> usize {
        let kind = event.kind();
        // Callbacks run without the lock held so they may subscribe or unsubscribe.
        let targets: Vec<(SubscriptionId, EventCallback)> = self
            .subscriptions
            .read()
            .iter()
            .filter(|subscription| subscription.kind.map_or(true, |k| k == kind))
            .map(|subscription| (subscription.id, subscription.callback.clone()))
            .collect();

        let mut delivered = 0;
        for (id, callback) in targets {
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(err)) => warn!(
                    target: "sems::healing::events",
                    event = %kind,
                    subscription = id.0,
                    error = %err,
                    "event subscriber returned an error",
                ),
                Err(panic) => error!(
                    target: "sems::healing::events",
                    event = %kind,
                    subscription = id.0,
                    panic = %panic_message(panic.as_ref()),
                    "event subscriber panicked",
                ),
            }
        }
        delivered
    }

    fn insert(&self, kind: Option<HealingEventKind>, callback: EventCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.write().push(Subscription { id, kind, callback });
        id
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
