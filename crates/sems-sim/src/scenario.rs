//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated metrics provider and fault scenarios."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use sems_healing::SystemMetrics;
use serde::Deserialize;

/// Declarative fault schedule loaded from TOML.
///
/// ```toml
/// [[faults]]
/// type = "gpu_overheat"
/// start_tick = 3
/// duration_ticks = 4
/// magnitude = 96.0
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FaultScenario {
    /// Optional seed overriding the configured one for reproducible runs.
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub faults: Vec<FaultWindow>,
}

impl FaultScenario {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("unable to read fault scenario {}", path.as_ref().display())
        })?;
        contents.parse::<Self>()
    }

    /// Faults whose window covers `tick`, in declaration order.
    pub fn active_at(&self, tick: u64) -> impl Iterator<Item = &FaultWindow> {
        self.faults.iter().filter(move |fault| fault.is_active(tick))
    }

    fn validate(&self) -> Result<()> {
        for (index, fault) in self.faults.iter().enumerate() {
            if fault.duration_ticks == Some(0) {
                return Err(anyhow!("faults[{}].duration_ticks must be positive", index));
            }
            if let Some(magnitude) = fault.magnitude {
                if !magnitude.is_finite() || magnitude < 0.0 {
                    return Err(anyhow!(
                        "faults[{}].magnitude must be a non-negative number, got {}",
                        index,
                        magnitude
                    ));
                }
            }
        }
        Ok(())
    }
}

impl std::str::FromStr for FaultScenario {
    type Err = anyhow::Error;

    fn from_str(input: &str) -> std::result::Result<Self, Self::Err> {
        let scenario = toml::from_str::<Self>(input).map_err(anyhow::Error::new)?;
        scenario.validate()?;
        Ok(scenario)
    }
}

/// Supported fault injections. Each overrides one group of readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    GpuOverheat,
    GpuErrors,
    MemoryLeak,
    SlowQueries,
    LockContention,
    NetworkErrors,
    ApiErrors,
}

impl FaultKind {
    pub fn label(&self) -> &'static str {
        match self {
            FaultKind::GpuOverheat => "gpu_overheat",
            FaultKind::GpuErrors => "gpu_errors",
            FaultKind::MemoryLeak => "memory_leak",
            FaultKind::SlowQueries => "slow_queries",
            FaultKind::LockContention => "lock_contention",
            FaultKind::NetworkErrors => "network_errors",
            FaultKind::ApiErrors => "api_errors",
        }
    }

    /// Magnitude used when the scenario does not give one; past the detection threshold.
    pub fn default_magnitude(&self) -> f64 {
        match self {
            FaultKind::GpuOverheat => 95.0,
            FaultKind::GpuErrors => 25.0,
            FaultKind::MemoryLeak => 97.0,
            FaultKind::SlowQueries => 2500.0,
            FaultKind::LockContention => 80.0,
            FaultKind::NetworkErrors => 150.0,
            FaultKind::ApiErrors => 0.2,
        }
    }
}

/// A fault active from `start_tick` for `duration_ticks` polls (forever when unset).
#[derive(Debug, Clone, Deserialize)]
pub struct FaultWindow {
    #[serde(rename = "type")]
    pub kind: FaultKind,
    #[serde(default)]
    pub start_tick: u64,
    #[serde(default)]
    pub duration_ticks: Option<u64>,
    #[serde(default)]
    pub magnitude: Option<f64>,
}

impl FaultWindow {
    pub fn is_active(&self, tick: u64) -> bool {
        if tick < self.start_tick {
            return false;
        }
        match self.duration_ticks {
            Some(duration) => tick - self.start_tick < duration,
            None => true,
        }
    }

    pub fn apply(&self, metrics: &mut SystemMetrics) {
        let magnitude = self
            .magnitude
            .unwrap_or_else(|| self.kind.default_magnitude());
        match self.kind {
            FaultKind::GpuOverheat => metrics.gpu.temperature = magnitude,
            FaultKind::GpuErrors => metrics.gpu.error_count = magnitude.round() as u64,
            FaultKind::MemoryLeak => {
                metrics.memory.percentage = magnitude.min(100.0);
                metrics.memory.used =
                    (metrics.memory.total as f64 * metrics.memory.percentage / 100.0) as u64;
                metrics.memory.leaks_detected = true;
            }
            FaultKind::SlowQueries => metrics.database.query_time_ms = magnitude,
            FaultKind::LockContention => {
                metrics.database.lock_wait_count = magnitude.round() as u64
            }
            FaultKind::NetworkErrors => metrics.network.error_count = magnitude.round() as u64,
            FaultKind::ApiErrors => metrics.api.error_rate = magnitude.min(1.0),
        }
    }
}
