//! eufin-testenv - end-to-end test environment orchestrator
//!
//! This library brings the Sandbox and Nexus services up in an isolated,
//! reproducible state, drives HTTP scenarios against them and tears them
//! down on every exit path.

pub mod cli;
pub mod commands;
pub mod common;
pub mod harness;
pub mod iban;
pub mod scenario;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use scenario::{RunResult, Scenario};
