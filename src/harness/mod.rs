//! Service environment management
//!
//! Brings each service up in a fixed order: reset its state, run its
//! provisioning commands, make sure its port is free, spawn it, and wait
//! until it accepts connections.

pub mod cleanup;
pub mod port;
pub mod provision;
pub mod readiness;
pub mod state;
pub mod supervisor;

pub use cleanup::{CleanupAction, CleanupRegistry, DrainReport};
pub use port::check_port_free;
pub use readiness::{HttpProbe, Liveness, Probe, ProbeOutcome, ReadinessPoller, Sleeper, TokioSleeper};
pub use supervisor::{ProcessState, ProcessSupervisor, ServiceSpec, SupervisedProcess};

use crate::common::{Error, Result};

/// A service together with how to prepare it and how long to wait for it
#[derive(Debug, Clone)]
pub struct ServicePlan {
    pub spec: ServiceSpec,
    /// Shell commands run after the state reset, before the service starts
    pub provision: Vec<String>,
    pub readiness: ReadinessPoller,
}

/// Starts services and waits for them
pub struct Environment {
    supervisor: ProcessSupervisor,
    probe: Box<dyn Probe>,
    sleeper: Box<dyn Sleeper>,
    verbose: bool,
}

impl Environment {
    pub fn new(supervisor: ProcessSupervisor, probe: Box<dyn Probe>, sleeper: Box<dyn Sleeper>) -> Self {
        Self {
            supervisor,
            probe,
            sleeper,
            verbose: false,
        }
    }

    /// Echo provisioning output to the console as well as the log
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Bring one service up and return it in the Ready state
    ///
    /// The process is registered with `registry` as soon as it is spawned,
    /// so a readiness failure still leaves its teardown to the caller's
    /// drain.
    pub async fn bring_up(
        &self,
        plan: &ServicePlan,
        registry: &mut CleanupRegistry,
    ) -> Result<SupervisedProcess> {
        let spec = &plan.spec;

        if let Some(state_path) = &spec.state_path {
            state::reset(state_path)?;
        }

        provision::run_all(&spec.name, &plan.provision, &spec.workdir, &spec.stdout_log, self.verbose).await?;

        check_port_free(spec.port)?;

        let process = self.supervisor.start(spec.clone(), registry)?;

        match plan
            .readiness
            .wait_ready(&spec.health_url, self.probe.as_ref(), self.sleeper.as_ref(), &process)
            .await
        {
            Ok(attempts) => {
                tracing::debug!(service = %spec.name, attempts, "Readiness reached");
                process.mark_ready().await;
                Ok(process)
            }
            Err(not_ready) => {
                // Stop now so the log files are complete when they are read back
                if let Err(e) = process.stop().await {
                    tracing::warn!(service = %spec.name, error = %e, "Failed to stop unready service");
                }

                let mut output = process.captured_output();

                if let Some(status) = not_ready.exited {
                    return Err(Error::ServiceExited {
                        service: spec.name.clone(),
                        status,
                        output,
                    });
                }

                if let Some(status) = process.exit_status().await {
                    output = format!("{} exited with {}\n{}", spec.name, status, output);
                }
                if !not_ready.last_error.is_empty() {
                    output = format!("last probe error: {}\n{}", not_ready.last_error, output);
                }

                Err(Error::ReadinessTimeout {
                    service: spec.name.clone(),
                    url: spec.health_url.clone(),
                    attempts: not_ready.attempts,
                    output,
                })
            }
        }
    }
}
