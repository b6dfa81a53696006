//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the core runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Core shared primitives for the SEMS workspace.
//! This crate exposes configuration loading, logging, and time helpers
//! consumed by the healing core, the simulator, and the daemon.

pub mod config;
pub mod logging;
pub mod time;

pub use config::{
    AppConfig, DetectionThresholds, HealingConfig, LoadedAppConfig, LoggingConfig, MetricsConfig,
    PredictionRule, PredictionThresholds, SimulationConfig,
};
pub use logging::{init_tracing, LogFormat};
