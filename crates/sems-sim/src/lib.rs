//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation module exports and shared types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Simulated metrics for exercising the self-healing core without live telemetry.

pub mod generator;
pub mod scenario;

pub use generator::SimulatedMetricsProvider;
pub use scenario::{FaultKind, FaultScenario, FaultWindow};
