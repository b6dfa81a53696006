//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulated metrics provider and fault scenarios."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use anyhow::{ensure, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rand::prelude::*;
use rand_distr::Normal;
use sems_common::config::SimulationConfig;
use sems_healing::{MetricsProvider, SystemMetrics};
use tracing::debug;

use crate::scenario::FaultScenario;

/// Metrics provider producing a noisy nominal baseline with scheduled faults.
///
/// Every call to [`SimulatedMetricsProvider::system_metrics`] advances the tick
/// counter by one, so fault windows are expressed in polls.
#[derive(Debug)]
pub struct SimulatedMetricsProvider {
    scenario: FaultScenario,
    noise: Normal<f64>,
    state: Mutex<SimState>,
}

#[derive(Debug)]
struct SimState {
    rng: StdRng,
    tick: u64,
}

impl SimulatedMetricsProvider {
    /// Build from configuration, loading the scenario file when one is set.
    pub fn from_config(config: &SimulationConfig) -> Result<Self> {
        let scenario = match &config.scenario {
            Some(path) => FaultScenario::from_file(path)
                .with_context(|| format!("unable to load scenario {}", path.display()))?,
            None => FaultScenario::default(),
        };
        Self::new(scenario, config.seed, config.noise_sigma)
    }

    pub fn new(scenario: FaultScenario, seed: u64, noise_sigma: f64) -> Result<Self> {
        ensure!(
            noise_sigma.is_finite() && noise_sigma >= 0.0,
            "noise sigma must be a non-negative number, got {}",
            noise_sigma
        );
        let noise = Normal::new(0.0, noise_sigma)
            .with_context(|| format!("invalid noise sigma {}", noise_sigma))?;
        let seed = scenario.seed.unwrap_or(seed);
        Ok(Self {
            scenario,
            noise,
            state: Mutex::new(SimState {
                rng: StdRng::seed_from_u64(seed),
                tick: 0,
            }),
        })
    }

    pub fn scenario(&self) -> &FaultScenario {
        &self.scenario
    }

    /// Number of snapshots produced so far.
    pub fn tick(&self) -> u64 {
        self.state.lock().tick
    }

    /// Produce the next snapshot and advance the tick.
    pub fn next_snapshot(&self) -> SystemMetrics {
        let mut state = self.state.lock();
        let tick = state.tick;
        state.tick += 1;

        let mut metrics = SystemMetrics::nominal();
        metrics.collected_at = Utc::now();
        let mut sample = |scale: f64| self.noise.sample(&mut state.rng) * scale;

        metrics.cpu.usage = (metrics.cpu.usage + sample(4.0)).clamp(0.0, 100.0);
        metrics.cpu.temperature += sample(1.0);
        metrics.gpu.usage = (metrics.gpu.usage + sample(4.0)).clamp(0.0, 100.0);
        metrics.gpu.temperature += sample(2.0);
        metrics.memory.percentage = (metrics.memory.percentage + sample(3.0)).clamp(0.0, 100.0);
        metrics.memory.used =
            (metrics.memory.total as f64 * metrics.memory.percentage / 100.0) as u64;
        metrics.network.latency_ms = (metrics.network.latency_ms + sample(3.0)).max(0.0);
        metrics.database.query_time_ms = (metrics.database.query_time_ms + sample(20.0)).max(0.0);
        metrics.api.response_time_ms = (metrics.api.response_time_ms + sample(10.0)).max(0.0);
        metrics.api.error_rate = (metrics.api.error_rate + sample(0.002)).clamp(0.0, 1.0);

        for fault in self.scenario.active_at(tick) {
            debug!(tick, fault = fault.kind.label(), "applying simulated fault");
            fault.apply(&mut metrics);
        }
        metrics
    }
}

#[async_trait]
impl MetricsProvider for SimulatedMetricsProvider {
    async fn system_metrics(&self) -> sems_healing::Result<SystemMetrics> {
        Ok(self.next_snapshot())
    }
}
