//! Readiness polling
//!
//! A service counts as ready as soon as its health URL produces *any* HTTP
//! response. Only a connection-level failure means "not up yet"; the
//! services legitimately answer their root path with non-200 codes.

use std::time::Duration;

use async_trait::async_trait;

/// What a single probe observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The service answered with this status
    Responded(u16),
    /// No HTTP response could be obtained
    Unreachable(String),
}

/// Issues one readiness probe
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, url: &str) -> ProbeOutcome;
}

/// Reports on the process behind the health URL
#[async_trait]
pub trait Liveness: Send + Sync {
    /// Exit status, once the process has exited
    async fn exited(&self) -> Option<String>;
}

/// Waits between probes
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real clock
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Probe backed by a plain reqwest GET
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, url: &str) -> ProbeOutcome {
        match self.client.get(url).send().await {
            Ok(response) => ProbeOutcome::Responded(response.status().as_u16()),
            Err(e) => ProbeOutcome::Unreachable(e.to_string()),
        }
    }
}

/// The poller gave up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotReady {
    /// Probes issued
    pub attempts: u32,
    /// Error seen by the final probe
    pub last_error: String,
    /// Exit status, when the process died before answering
    pub exited: Option<String>,
}

/// Bounded-retry readiness loop
#[derive(Debug, Clone, Copy)]
pub struct ReadinessPoller {
    max_attempts: u32,
    interval: Duration,
}

impl ReadinessPoller {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            interval,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Probe `url` until it answers, sleeping `interval` after each
    /// unreachable attempt except the last
    ///
    /// Returns the number of probes it took. After `max_attempts` consecutive
    /// connection failures it returns `NotReady`, having issued exactly
    /// `max_attempts` probes. If `process` exits first, polling stops before
    /// the next probe; an answer on the port then could not come from it.
    pub async fn wait_ready(
        &self,
        url: &str,
        probe: &dyn Probe,
        sleeper: &dyn Sleeper,
        process: &dyn Liveness,
    ) -> std::result::Result<u32, NotReady> {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            if let Some(status) = process.exited().await {
                tracing::debug!(url, attempt, %status, "Process exited while waiting for readiness");
                return Err(NotReady {
                    attempts: attempt - 1,
                    last_error,
                    exited: Some(status),
                });
            }

            match probe.probe(url).await {
                ProbeOutcome::Responded(status) => {
                    tracing::debug!(url, attempt, status, "Readiness probe answered");
                    return Ok(attempt);
                }
                ProbeOutcome::Unreachable(error) => {
                    tracing::debug!(url, attempt, %error, "Service not accepting connections yet");
                    last_error = error;
                }
            }

            if attempt < self.max_attempts {
                sleeper.sleep(self.interval).await;
            }
        }

        Err(NotReady {
            attempts: self.max_attempts,
            last_error,
            exited: None,
        })
    }
}
