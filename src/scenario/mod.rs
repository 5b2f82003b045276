//! Scenario files and their execution
//!
//! A scenario declares the services to bring up and the HTTP steps to run
//! against them once they are ready.

pub mod assertion;
pub mod config;
pub mod http;
pub mod orchestrator;
pub mod runner;
pub mod template;

pub use config::{Scenario, ScenarioStep};
pub use orchestrator::{run_scenario, RunOptions, ScenarioOutcome};
pub use runner::{RunResult, RunState, ScenarioRunner};
