//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the SEMS self-healing daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sems_common::config::AppConfig;
use sems_common::logging::{init_tracing, LogFormat};
use sems_healing::{
    FailureDetector, FailurePredictor, HealingEvent, HealingMetrics, RecoveryStrategyRegistry,
    SelfHealingCoordinator, SimulatedActionExecutor, SystemMetrics,
};
use sems_metrics::{new_registry, spawn_exporter, DaemonMetrics};
use sems_sim::SimulatedMetricsProvider;
use serde_json::json;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("SEMS ", env!("CARGO_PKG_VERSION")),
    about = "SEMS self-healing daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, help = "Override the configured log format")]
    log_format: Option<CliLogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliLogFormat {
    Json,
    Pretty,
}

impl From<CliLogFormat> for LogFormat {
    fn from(value: CliLogFormat) -> Self {
        match value {
            CliLogFormat::Json => LogFormat::StructuredJson,
            CliLogFormat::Pretty => LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the self-healing coordinator against simulated metrics")]
    Run,
    #[command(about = "Classify a metrics snapshot and print failures and predictions")]
    Check {
        #[arg(long, value_name = "FILE", help = "JSON metrics snapshot")]
        metrics: PathBuf,
    },
    #[command(about = "List the registered recovery strategies")]
    Strategies,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/example.prod.toml"));
    candidates.push(PathBuf::from("configs/example.dev.toml"));

    let load_started = Instant::now();
    let loaded_config = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded_config.config;
    let load_duration = load_started.elapsed();
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            init_tracing("semsd", &config.logging)?;
            info!(
                config_path = %loaded_config.source.display(),
                load_ms = load_duration.as_millis() as u64,
                "configuration loaded"
            );
            run_daemon(config, load_duration.as_secs_f64()).await?
        }
        Commands::Check { metrics } => check_snapshot(&config, &metrics)?,
        Commands::Strategies => list_strategies(&config)?,
    }

    Ok(())
}

async fn run_daemon(config: AppConfig, config_load_seconds: f64) -> Result<()> {
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(registry.clone())?;
    daemon_metrics.observe_config_load(config_load_seconds);
    daemon_metrics.inc_start();
    let profile = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };
    daemon_metrics.set_build_info(env!("CARGO_PKG_VERSION"), profile);

    let metrics_exporter = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_exporter(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let provider = SimulatedMetricsProvider::from_config(&config.simulation)?;
    if let Some(path) = &config.simulation.scenario {
        info!(
            scenario = %path.display(),
            faults = provider.scenario().faults.len(),
            "fault scenario loaded"
        );
    }
    let coordinator = SelfHealingCoordinator::builder(config.healing.clone())
        .provider(Arc::new(provider))
        .metrics(HealingMetrics::new(registry)?)
        .build();
    coordinator.subscribe_all(log_event);

    coordinator.start()?;
    info!(
        strategies = coordinator.recovery_strategies().len(),
        "daemon running; waiting for termination signal"
    );
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");
    coordinator.stop();

    let leftover = coordinator.recovering_count();
    if leftover > 0 {
        warn!(recoveries = leftover, "shutting down with recoveries in flight");
    }

    if let Some(exporter) = metrics_exporter {
        exporter.shutdown().await?;
    }

    Ok(())
}

fn log_event(event: &HealingEvent) -> Result<()> {
    let payload = serde_json::to_string(event)?;
    match event {
        HealingEvent::RecoveryFailed { error, .. } => {
            warn!(event = %event.kind(), error = %error, payload = %payload, "healing event")
        }
        HealingEvent::FailureDetected { failure } => info!(
            event = %event.kind(),
            failure_type = %failure.failure_type,
            severity = %failure.severity,
            payload = %payload,
            "healing event"
        ),
        _ => info!(event = %event.kind(), payload = %payload, "healing event"),
    }
    Ok(())
}

fn check_snapshot(config: &AppConfig, path: &Path) -> Result<()> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("unable to read metrics snapshot {}", path.display()))?;
    let metrics: SystemMetrics = serde_json::from_str(&contents)
        .with_context(|| format!("invalid metrics snapshot {}", path.display()))?;

    let detector = FailureDetector::new(config.healing.detection.clone());
    let predictor = FailurePredictor::new(
        config.healing.prediction.clone(),
        config.healing.min_prediction_confidence,
    );
    let failures = detector.detect(&metrics);
    let auto_recover: Vec<&str> = failures
        .iter()
        .filter(|failure| failure.severity.triggers_auto_recovery())
        .map(|failure| failure.id.as_str())
        .collect();
    let predictions = predictor.predict(&metrics);

    let report = json!({
        "failures": failures,
        "autoRecover": auto_recover,
        "predictions": predictions,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn list_strategies(config: &AppConfig) -> Result<()> {
    let executor = Arc::new(SimulatedActionExecutor::new(
        config.healing.simulated_step_delay,
    ));
    let catalog: Vec<_> = RecoveryStrategyRegistry::with_builtin(executor)
        .catalog()
        .into_iter()
        .map(|(failure_type, descriptor)| {
            json!({ "failureType": failure_type, "strategy": descriptor })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&catalog)?);
    Ok(())
}
