//! Teardown bookkeeping
//!
//! Every supervised process registers exactly one cleanup action when it is
//! started. The registry is owned by the top-level run and drained
//! explicitly on every exit path; each action runs at most once.

use async_trait::async_trait;

use crate::common::{Error, Result};

/// A teardown step bound to one resource
///
/// Implementations must be idempotent: running an action whose resource is
/// already gone is a no-op, not an error.
#[async_trait]
pub trait CleanupAction: Send + Sync {
    /// Human-readable name used in logs
    fn label(&self) -> String;

    /// Release the resource
    async fn run(&self) -> Result<()>;
}

/// Ordered list of pending cleanup actions
#[derive(Default)]
pub struct CleanupRegistry {
    actions: Vec<Box<dyn CleanupAction>>,
}

/// Outcome of draining the registry
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Actions that completed
    pub completed: usize,
    /// Actions that failed, with their error
    pub failed: Vec<(String, Error)>,
}

impl CleanupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action; it runs when the registry is drained
    pub fn register(&mut self, action: Box<dyn CleanupAction>) {
        tracing::debug!(action = %action.label(), "Registered cleanup action");
        self.actions.push(action);
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every pending action, most recently registered first
    ///
    /// Failures are logged and collected; they never stop the remaining
    /// actions from running. Actions are removed as they run, so a second
    /// drain does nothing.
    pub async fn drain(&mut self) -> DrainReport {
        let mut report = DrainReport::default();

        while let Some(action) = self.actions.pop() {
            let label = action.label();
            tracing::debug!(action = %label, "Running cleanup action");
            match action.run().await {
                Ok(()) => report.completed += 1,
                Err(e) => {
                    tracing::warn!(action = %label, error = %e, "Cleanup action failed");
                    report.failed.push((label, e));
                }
            }
        }

        report
    }
}

impl Drop for CleanupRegistry {
    fn drop(&mut self) {
        if !self.actions.is_empty() {
            // Children are spawned with kill_on_drop, dropping the actions
            // still takes them down, just without the grace period
            tracing::warn!(
                pending = self.actions.len(),
                "Cleanup registry dropped without being drained"
            );
        }
    }
}
