//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9899))
}

fn default_health_check_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_predictive_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_history_capacity() -> usize {
    1000
}

fn default_prediction_buffer_capacity() -> usize {
    50
}

/// Predictions at or below this confidence are never surfaced, whatever the configuration.
pub const PREDICTION_CONFIDENCE_FLOOR: f64 = 0.7;

fn default_min_prediction_confidence() -> f64 {
    PREDICTION_CONFIDENCE_FLOOR
}

fn default_preventive_probability_threshold() -> f64 {
    0.8
}

fn default_simulated_step_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_simulation_seed() -> u64 {
    0x5E_A1_u64
}

fn default_noise_sigma() -> f64 {
    0.5
}

/// Primary configuration object for the SEMS runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub healing: HealingConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "SEMS_CONFIG";

    /// Load configuration from disk, respecting the `SEMS_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.healing.validate()?;
        self.simulation.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

/// Cadences, buffer sizes, and rule tables driving the self-healing coordinator.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingConfig {
    #[serde(
        rename = "health_check_interval_ms",
        default = "default_health_check_interval"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub health_check_interval: Duration,
    #[serde(
        rename = "predictive_interval_ms",
        default = "default_predictive_interval"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub predictive_interval: Duration,
    /// Maximum number of failures retained in the chronological history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Maximum number of predictions retained for display.
    #[serde(default = "default_prediction_buffer_capacity")]
    pub prediction_buffer_capacity: usize,
    /// Predictions must exceed this confidence to be surfaced.
    #[serde(default = "default_min_prediction_confidence")]
    pub min_prediction_confidence: f64,
    /// Predictions must exceed this probability before preventive actions are dispatched.
    #[serde(default = "default_preventive_probability_threshold")]
    pub preventive_probability_threshold: f64,
    /// Duration of each mocked remediation step.
    #[serde(
        rename = "simulated_step_delay_ms",
        default = "default_simulated_step_delay"
    )]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub simulated_step_delay: Duration,
    #[serde(default)]
    pub detection: DetectionThresholds,
    #[serde(default)]
    pub prediction: PredictionThresholds,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            health_check_interval: default_health_check_interval(),
            predictive_interval: default_predictive_interval(),
            history_capacity: default_history_capacity(),
            prediction_buffer_capacity: default_prediction_buffer_capacity(),
            min_prediction_confidence: default_min_prediction_confidence(),
            preventive_probability_threshold: default_preventive_probability_threshold(),
            simulated_step_delay: default_simulated_step_delay(),
            detection: DetectionThresholds::default(),
            prediction: PredictionThresholds::default(),
        }
    }
}

impl HealingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.health_check_interval.is_zero() {
            return Err(anyhow!("healing.health_check_interval_ms must be non-zero"));
        }
        if self.predictive_interval.is_zero() {
            return Err(anyhow!("healing.predictive_interval_ms must be non-zero"));
        }
        if self.history_capacity == 0 {
            return Err(anyhow!("healing.history_capacity must be at least 1"));
        }
        if self.prediction_buffer_capacity == 0 {
            return Err(anyhow!(
                "healing.prediction_buffer_capacity must be at least 1"
            ));
        }
        ensure_unit_interval(
            "healing.min_prediction_confidence",
            self.min_prediction_confidence,
        )?;
        if self.min_prediction_confidence < PREDICTION_CONFIDENCE_FLOOR {
            return Err(anyhow!(
                "healing.min_prediction_confidence must be at least {}, got {}",
                PREDICTION_CONFIDENCE_FLOOR,
                self.min_prediction_confidence
            ));
        }
        ensure_unit_interval(
            "healing.preventive_probability_threshold",
            self.preventive_probability_threshold,
        )?;
        self.prediction.validate()?;
        Ok(())
    }
}

/// Static thresholds used by the failure detector. A reading strictly above a
/// threshold (or a detected leak) raises the corresponding failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionThresholds {
    pub gpu_error_count: u64,
    pub gpu_temperature: f64,
    pub memory_percentage: f64,
    pub database_query_time_ms: f64,
    pub database_error_count: u64,
    pub network_error_count: u64,
    pub api_error_rate: f64,
}

impl Default for DetectionThresholds {
    fn default() -> Self {
        Self {
            gpu_error_count: 20,
            gpu_temperature: 90.0,
            memory_percentage: 95.0,
            database_query_time_ms: 2000.0,
            database_error_count: 50,
            network_error_count: 100,
            api_error_rate: 0.1,
        }
    }
}

/// Forecast parameters attached to a single prediction rule.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRule {
    pub probability: f64,
    pub confidence: f64,
    #[serde(rename = "time_to_failure_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub time_to_failure: Duration,
}

impl PredictionRule {
    pub fn new(probability: f64, confidence: f64, time_to_failure: Duration) -> Self {
        Self {
            probability,
            confidence,
            time_to_failure,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        ensure_unit_interval(&format!("{name}.probability"), self.probability)?;
        ensure_unit_interval(&format!("{name}.confidence"), self.confidence)?;
        Ok(())
    }
}

/// Early-warning thresholds used by the failure predictor. These are laxer than
/// [`DetectionThresholds`] so forecasts fire before the detector does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionThresholds {
    pub gpu_temperature: f64,
    pub gpu_error_count: u64,
    pub gpu: PredictionRule,
    pub memory_percentage: f64,
    pub memory: PredictionRule,
    pub database_query_time_ms: f64,
    pub database_lock_wait_count: u64,
    pub database: PredictionRule,
}

impl Default for PredictionThresholds {
    fn default() -> Self {
        Self {
            gpu_temperature: 85.0,
            gpu_error_count: 10,
            gpu: PredictionRule::new(0.8, 0.9, Duration::from_secs(5 * 60)),
            memory_percentage: 90.0,
            memory: PredictionRule::new(0.9, 0.95, Duration::from_secs(10 * 60)),
            database_query_time_ms: 1000.0,
            database_lock_wait_count: 50,
            database: PredictionRule::new(0.7, 0.8, Duration::from_secs(15 * 60)),
        }
    }
}

impl PredictionThresholds {
    pub fn validate(&self) -> Result<()> {
        self.gpu.validate("healing.prediction.gpu")?;
        self.memory.validate("healing.prediction.memory")?;
        self.database.validate("healing.prediction.database")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    #[serde(default = "default_simulation_seed")]
    pub seed: u64,
    /// Standard deviation of the Gaussian noise applied to nominal readings.
    #[serde(default = "default_noise_sigma")]
    pub noise_sigma: f64,
    /// Optional TOML fault scenario replayed by the simulated metrics provider.
    #[serde(default)]
    pub scenario: Option<PathBuf>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: default_simulation_seed(),
            noise_sigma: default_noise_sigma(),
            scenario: None,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.noise_sigma.is_finite() || self.noise_sigma < 0.0 {
            return Err(anyhow!(
                "simulation.noise_sigma must be a non-negative number, got {}",
                self.noise_sigma
            ));
        }
        Ok(())
    }
}

fn ensure_unit_interval(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must lie within [0, 1], got {}", name, value));
    }
    Ok(())
}
