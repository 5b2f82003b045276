//! Error types for the test environment
//!
//! Errors fall into two classes that map to distinct exit codes, so CI can
//! tell "the environment is broken" apart from "the services regressed".

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Exit code for a passing run
pub const EXIT_PASSED: i32 = 0;

/// Exit code for assertion failures and configuration problems
pub const EXIT_FAILED: i32 = 1;

/// Exit code for unmet environment preconditions
pub const EXIT_ENVIRONMENT: i32 = 77;

/// Main error type for the test environment
#[derive(Error, Debug)]
pub enum Error {
    // === Environment Errors ===
    #[error("Port {port} is not available: {source}")]
    PortUnavailable {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to reset state '{}': {source}", path.display())]
    ResetIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to start {service}: {reason}")]
    SpawnFailed { service: String, reason: String },

    #[error("Provisioning command for {service} failed ({status}): {command}\n{output}")]
    ProvisionFailed {
        service: String,
        command: String,
        status: String,
        output: String,
    },

    #[error("{service} exited with {status} before accepting connections\n{output}")]
    ServiceExited {
        service: String,
        status: String,
        output: String,
    },

    #[error("{service} timed out after {attempts} readiness probes of {url}\n{output}")]
    ReadinessTimeout {
        service: String,
        url: String,
        attempts: u32,
        output: String,
    },

    // === Assertion Errors ===
    #[error("Test failed on URL: {url} (got {status}, expected {expected})")]
    UnexpectedStatus { url: String, status: u16, expected: u16 },

    #[error("Test failed on URL: {url}: {message}")]
    BodyAssertion { url: String, message: String },

    #[error("Request to {url} failed: {message}")]
    Http { url: String, message: String },

    #[error("Unknown variable '${{{0}}}'")]
    UnknownVariable(String),

    #[error("Run interrupted")]
    Interrupted,

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid scenario '{}': {message}", path.display())]
    Scenario { path: PathBuf, message: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error means the environment could not be brought up,
    /// as opposed to the services misbehaving once they were
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            Error::PortUnavailable { .. }
                | Error::ResetIo { .. }
                | Error::SpawnFailed { .. }
                | Error::ProvisionFailed { .. }
                | Error::ServiceExited { .. }
                | Error::ReadinessTimeout { .. }
        )
    }

    /// Process exit code the harness should terminate with
    pub fn exit_code(&self) -> i32 {
        if self.is_environment() {
            EXIT_ENVIRONMENT
        } else {
            EXIT_FAILED
        }
    }

    /// Create a spawn failure error
    pub fn spawn_failed(service: &str, reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            service: service.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a scenario validation error
    pub fn scenario(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Scenario {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a body assertion error
    pub fn body_assertion(url: &str, message: impl Into<String>) -> Self {
        Self::BodyAssertion {
            url: url.to_string(),
            message: message.into(),
        }
    }
}
