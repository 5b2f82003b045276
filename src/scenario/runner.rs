//! Scenario step execution
//!
//! Steps run strictly in declaration order, one at a time: each step's side
//! effects are preconditions for the next. The first failing step ends the
//! run; nothing after it is sent.

use colored::Colorize;

use crate::common::Result;

use super::assertion;
use super::config::ScenarioStep;
use super::http::{HttpRequest, HttpResponse, Transport};
use super::template::{lookup, render, Vars};

/// Where a run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    NotStarted,
    Running,
    Passed,
    Failed,
}

/// Result of running a step sequence
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    /// Steps issued, including the failing one
    pub steps_executed: usize,
    /// The step that failed, if any
    pub failed_at: Option<ScenarioStep>,
    /// Why it failed
    pub diagnostic: Option<String>,
}

impl RunResult {
    pub fn passed(&self) -> bool {
        self.failed_at.is_none()
    }

    pub fn state(&self) -> RunState {
        if self.passed() {
            RunState::Passed
        } else {
            RunState::Failed
        }
    }
}

/// Executes steps against the running services
pub struct ScenarioRunner {
    transport: Box<dyn Transport>,
    vars: Vars,
    state: RunState,
    verbose: bool,
}

impl ScenarioRunner {
    pub fn new(transport: Box<dyn Transport>, vars: Vars) -> Self {
        Self {
            transport,
            vars,
            state: RunState::NotStarted,
            verbose: false,
        }
    }

    /// Print response bodies as steps complete
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Variables after the run, captures included
    pub fn vars(&self) -> &Vars {
        &self.vars
    }

    /// Run `steps` in order, stopping at the first failure
    pub async fn run(&mut self, steps: &[ScenarioStep]) -> RunResult {
        self.state = RunState::Running;

        for (i, step) in steps.iter().enumerate() {
            let step_num = i + 1;

            match self.execute_step(step).await {
                Ok(response) => {
                    println!(
                        "  {} Step {}: {} {}",
                        "✓".green(),
                        step_num,
                        step.label().dimmed(),
                        format!("({})", response.status).dimmed()
                    );
                    if self.verbose && !response.body.is_empty() {
                        println!("    {}", response.body.dimmed());
                    }
                }
                Err(e) => {
                    println!("  {} Step {}: {}", "✗".red(), step_num, e);
                    tracing::debug!(step = step_num, error = %e, "Step failed, aborting run");
                    self.state = RunState::Failed;
                    return RunResult {
                        steps_executed: step_num,
                        failed_at: Some(step.clone()),
                        diagnostic: Some(e.to_string()),
                    };
                }
            }
        }

        self.state = RunState::Passed;
        RunResult {
            steps_executed: steps.len(),
            failed_at: None,
            diagnostic: None,
        }
    }

    /// Issue one step, check its response and record its captures
    async fn execute_step(&mut self, step: &ScenarioStep) -> Result<HttpResponse> {
        let request = self.prepare(step)?;
        tracing::debug!(method = %request.method, url = %request.url, "Sending request");

        let response = self.transport.send(&request).await?;

        assertion::check(&response, step.expect.status)?;
        assertion::check_body(&response, &step.expect.body)?;

        if !step.capture.is_empty() {
            let document = response.json()?;
            for (name, path) in &step.capture {
                let value = lookup(&document, path).ok_or_else(|| {
                    crate::common::Error::body_assertion(
                        &response.url,
                        format!("cannot capture {}: '{}' is missing", name, path),
                    )
                })?;
                tracing::debug!(variable = %name, value = %render(value), "Captured");
                self.vars.set(name, render(value));
            }
        }

        Ok(response)
    }

    /// Substitute variables into everything the step sends
    fn prepare(&self, step: &ScenarioStep) -> Result<HttpRequest> {
        let headers = step
            .headers
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.vars.substitute(value)?)))
            .collect::<Result<Vec<_>>>()?;

        let basic_auth = match &step.auth {
            Some(auth) => Some((
                self.vars.substitute(&auth.username)?,
                self.vars.substitute(&auth.password)?,
            )),
            None => None,
        };

        let json = match &step.json {
            Some(body) => Some(self.vars.substitute_json(body)?),
            None => None,
        };

        Ok(HttpRequest {
            method: step.method,
            url: self.vars.substitute(&step.url)?,
            headers,
            basic_auth,
            json,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::config::{Expectation, Method};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};

    /// Answers from a fixed route table and records what was sent
    struct FakeTransport {
        routes: HashMap<String, (u16, String)>,
        sent: Arc<Mutex<Vec<HttpRequest>>>,
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
            self.sent.lock().unwrap().push(request.clone());
            let (status, body) = self
                .routes
                .get(&request.url)
                .cloned()
                .unwrap_or((404, String::new()));
            Ok(HttpResponse {
                url: request.url.clone(),
                status,
                body,
            })
        }
    }

    fn runner(routes: &[(&str, u16, &str)]) -> (ScenarioRunner, Arc<Mutex<Vec<HttpRequest>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = FakeTransport {
            routes: routes
                .iter()
                .map(|(url, status, body)| (url.to_string(), (*status, body.to_string())))
                .collect(),
            sent: Arc::clone(&sent),
        };
        (ScenarioRunner::new(Box::new(transport), Vars::default()), sent)
    }

    fn step(method: Method, url: &str) -> ScenarioStep {
        ScenarioStep {
            name: None,
            method,
            url: url.to_string(),
            headers: BTreeMap::new(),
            auth: None,
            json: None,
            expect: Expectation::default(),
            capture: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_all_steps_pass() {
        let (mut runner, sent) = runner(&[
            ("http://nexus/users", 200, "{}"),
            ("http://nexus/bank-connections", 200, r#"{"bankConnections":[]}"#),
        ]);
        assert_eq!(runner.state(), RunState::NotStarted);

        let steps = vec![
            step(Method::Post, "http://nexus/users"),
            step(Method::Post, "http://nexus/bank-connections"),
            step(Method::Get, "http://nexus/bank-connections"),
        ];
        let result = runner.run(&steps).await;

        assert!(result.passed());
        assert_eq!(result.steps_executed, 3);
        assert_eq!(result.failed_at, None);
        assert_eq!(runner.state(), RunState::Passed);
        assert_eq!(sent.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_fail_fast_never_issues_later_steps() {
        let (mut runner, sent) = runner(&[
            ("http://nexus/users", 200, "{}"),
            ("http://nexus/bank-connections", 200, "{}"),
        ]);

        let steps = vec![
            step(Method::Post, "http://nexus/users"),
            step(Method::Post, "http://nexus/no-such-route"),
            step(Method::Get, "http://nexus/bank-connections"),
        ];
        let result = runner.run(&steps).await;

        assert_eq!(result.state(), RunState::Failed);
        assert_eq!(result.steps_executed, 2);
        assert_eq!(result.failed_at.as_ref(), Some(&steps[1]));
        assert!(result.diagnostic.unwrap().contains("http://nexus/no-such-route"));

        let urls: Vec<String> = sent.lock().unwrap().iter().map(|r| r.url.clone()).collect();
        assert_eq!(urls, vec!["http://nexus/users", "http://nexus/no-such-route"]);
    }

    #[tokio::test]
    async fn test_expected_non_200_passes() {
        let (mut runner, _) = runner(&[]);
        let mut missing = step(Method::Get, "http://nexus/missing");
        missing.expect.status = 404;

        let result = runner.run(&[missing]).await;
        assert!(result.passed());
    }

    #[tokio::test]
    async fn test_capture_feeds_later_urls() {
        let (mut runner, sent) = runner(&[
            ("http://nexus/payment-initiations", 200, r#"{"uuid":"p-77"}"#),
            ("http://nexus/payment-initiations/p-77/submit", 200, "{}"),
        ]);

        let mut prepare = step(Method::Post, "http://nexus/payment-initiations");
        prepare.capture.insert("PAYMENT".into(), "uuid".into());
        let submit = step(Method::Post, "http://nexus/payment-initiations/${PAYMENT}/submit");

        let result = runner.run(&[prepare, submit]).await;
        assert!(result.passed(), "{:?}", result.diagnostic);
        assert_eq!(runner.vars().get("PAYMENT"), Some("p-77"));
        assert_eq!(sent.lock().unwrap()[1].url, "http://nexus/payment-initiations/p-77/submit");
    }

    #[tokio::test]
    async fn test_missing_capture_fails_step() {
        let (mut runner, _) = runner(&[("http://nexus/payment-initiations", 200, "{}")]);
        let mut prepare = step(Method::Post, "http://nexus/payment-initiations");
        prepare.capture.insert("PAYMENT".into(), "uuid".into());

        let result = runner.run(&[prepare]).await;
        assert!(!result.passed());
        assert!(result.diagnostic.unwrap().contains("cannot capture PAYMENT"));
    }

    #[tokio::test]
    async fn test_unknown_variable_fails_before_sending() {
        let (mut runner, sent) = runner(&[]);
        let result = runner
            .run(&[step(Method::Get, "http://nexus/accounts/${ACCOUNT}")])
            .await;

        assert_eq!(result.steps_executed, 1);
        assert!(!result.passed());
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_is_templated() {
        let (runner, _) = runner(&[]);
        let mut runner = runner;
        runner.vars.set("HOST_ID", "HOST01".into());
        runner.vars.set("PASSWORD", "x".into());

        let mut create = step(Method::Post, "http://sandbox/admin/ebics/host");
        create.headers.insert("X-Host".into(), "${HOST_ID}".into());
        create.auth = Some(crate::scenario::config::BasicAuth {
            username: "admin".into(),
            password: "${PASSWORD}".into(),
        });
        create.json = Some(json!({"hostID": "${HOST_ID}", "ebicsVersion": "H004"}));

        let request = runner.prepare(&create).unwrap();
        assert_eq!(request.headers, vec![("X-Host".to_string(), "HOST01".to_string())]);
        assert_eq!(request.basic_auth, Some(("admin".to_string(), "x".to_string())));
        assert_eq!(request.json, Some(json!({"hostID": "HOST01", "ebicsVersion": "H004"})));
    }
}
