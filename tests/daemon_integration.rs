//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Integration and validation tests for the SEMS stack."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sems_common::config::AppConfig;
use sems_healing::{
    FailureDetector, FailurePredictor, FailureType, HealingEventKind, HealingMetrics,
    SelfHealingCoordinator, Severity, SystemMetrics,
};
use sems_metrics::{new_registry, spawn_exporter};
use sems_sim::{FaultScenario, SimulatedMetricsProvider};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn repo_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join(relative)
}

#[test]
fn shipped_configuration_and_scenario_parse() {
    let config = AppConfig::load(&[repo_path("configs/example.dev.toml")]).unwrap();
    assert_eq!(config.healing.health_check_interval, Duration::from_secs(5));
    assert_eq!(config.healing.history_capacity, 1000);
    assert_eq!(config.healing.prediction.memory.probability, 0.9);

    let scenario_path = config.simulation.scenario.expect("demo scenario configured");
    let scenario = FaultScenario::from_file(repo_path(scenario_path.to_str().unwrap())).unwrap();
    assert_eq!(scenario.faults.len(), 4);
}

#[test]
fn snapshot_fixture_classifies_as_critical_memory_pressure() {
    let contents =
        std::fs::read_to_string(repo_path("configs/snapshots/memory_pressure.json")).unwrap();
    let metrics: SystemMetrics = serde_json::from_str(&contents).unwrap();

    let failures = FailureDetector::default().detect(&metrics);
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].failure_type, FailureType::MemoryLeak);
    assert_eq!(failures[0].severity, Severity::Critical);

    let predicted: Vec<FailureType> = FailurePredictor::default()
        .predict(&metrics)
        .into_iter()
        .map(|prediction| prediction.failure_type)
        .collect();
    assert_eq!(
        predicted,
        vec![FailureType::GpuModelFailure, FailureType::MemoryLeak]
    );
}

#[tokio::test]
async fn simulated_fault_is_remediated_and_exported() {
    let scenario: FaultScenario = r#"
        [[faults]]
        type = "slow_queries"
        start_tick = 0
        duration_ticks = 1
        "#
    .parse()
    .unwrap();
    let provider = Arc::new(SimulatedMetricsProvider::new(scenario, 11, 0.5).unwrap());

    let mut config = AppConfig::default();
    config.healing.simulated_step_delay = Duration::from_millis(1);

    let registry = new_registry();
    let coordinator = SelfHealingCoordinator::builder(config.healing)
        .provider(provider.clone())
        .metrics(HealingMetrics::new(registry.clone()).unwrap())
        .build();
    let completed = Arc::new(Mutex::new(Vec::new()));
    {
        let completed = completed.clone();
        coordinator.subscribe(HealingEventKind::RecoveryCompleted, move |event| {
            completed
                .lock()
                .push(event.recovery_id().unwrap_or_default().to_owned());
            Ok(())
        });
    }

    let report = coordinator.run_health_check().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].failure_type, FailureType::DatabaseFailure);
    assert!(report.recoveries[0].success);
    assert_eq!(completed.lock().len(), 1);

    let quiet = coordinator.run_health_check().await;
    assert!(quiet.failures.is_empty());
    assert_eq!(provider.tick(), 2);
    assert_eq!(coordinator.failure_history().len(), 1);

    let exporter = spawn_exporter(registry, "127.0.0.1:0".parse().unwrap()).unwrap();
    let mut stream = TcpStream::connect(exporter.addr()).await.unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    exporter.shutdown().await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.contains(
        "sems_healing_failures_detected_total{failure_type=\"database_failure\",severity=\"high\"} 1"
    ));
    assert!(response.contains(
        "sems_healing_recoveries_total{failure_type=\"database_failure\",outcome=\"success\"} 1"
    ));
}
