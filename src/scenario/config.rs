//! Scenario file types
//!
//! Defines the data structures for deserializing YAML scenarios, and the
//! checks a scenario must pass before anything is spawned.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::common::config::ReadinessConfig;
use crate::common::{paths, Error, Result};
use crate::harness::{ReadinessPoller, ServicePlan, ServiceSpec};

/// Most services a scenario may run at once
pub const MAX_SERVICES: usize = 2;

/// A complete scenario loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct Scenario {
    /// Name of the scenario
    pub name: String,
    /// Optional description of the business flow
    pub description: Option<String>,
    /// Constants available to steps as `${NAME}`
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    /// Directory services run in and relative paths resolve against
    /// (default: the scenario file's directory)
    pub workdir: Option<PathBuf>,
    /// Services to bring up, in order
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    /// The sequence of HTTP steps to execute
    pub steps: Vec<ScenarioStep>,
}

/// A service the scenario depends on
#[derive(Deserialize, Debug, Clone)]
pub struct ServiceConfig {
    /// Name used in logs (e.g. "sandbox")
    pub name: String,
    /// Program and arguments
    pub command: Vec<String>,
    /// Port the service listens on
    pub port: u16,
    /// URL probed for readiness (default: `http://localhost:<port>/`)
    pub health_url: Option<String>,
    /// State artifact deleted before start
    pub state_path: Option<PathBuf>,
    /// Override for the stdout log file
    pub stdout_log: Option<PathBuf>,
    /// Override for the stderr log file
    pub stderr_log: Option<PathBuf>,
    /// Commands run after the state reset and before start
    #[serde(default)]
    pub provision: Vec<SetupStep>,
    /// Per-service readiness budget
    pub readiness: Option<ReadinessOverride>,
}

/// A shell command run to completion
#[derive(Deserialize, Debug, Clone)]
pub struct SetupStep {
    pub shell: String,
}

/// Readiness settings that replace the configured defaults
#[derive(Deserialize, Debug, Clone, Copy, Default)]
pub struct ReadinessOverride {
    pub max_attempts: Option<u32>,
    pub interval_ms: Option<u64>,
}

/// HTTP method of a step
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    #[serde(rename = "GET", alias = "get")]
    Get,
    #[serde(rename = "POST", alias = "post")]
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
        }
    }
}

/// Basic authentication credentials
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// A single HTTP call and what its response must look like
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ScenarioStep {
    /// Label shown in progress output
    pub name: Option<String>,
    #[serde(default)]
    pub method: Method,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub auth: Option<BasicAuth>,
    /// JSON request body
    pub json: Option<Value>,
    #[serde(default)]
    pub expect: Expectation,
    /// Variables to extract from the response body: name -> dotted path
    #[serde(default)]
    pub capture: BTreeMap<String, String>,
}

impl ScenarioStep {
    /// Label for progress output
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{} {}", self.method, self.url),
        }
    }
}

/// Expected response
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Expectation {
    /// Expected status code
    #[serde(default = "default_status")]
    pub status: u16,
    /// Assertions on the JSON response body
    #[serde(default)]
    pub body: Vec<BodyAssertion>,
}

impl Default for Expectation {
    fn default() -> Self {
        Self {
            status: default_status(),
            body: Vec::new(),
        }
    }
}

fn default_status() -> u16 {
    200
}

/// Assertion on one value inside the JSON response body
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct BodyAssertion {
    /// Dotted path, array indices as numbers (e.g. `bankConnections.0.name`)
    pub path: String,
    /// Value must equal this exactly
    pub equals: Option<Value>,
    /// Array, object or string must have this length
    pub len: Option<usize>,
    /// Whether the path must resolve at all
    pub exists: Option<bool>,
    /// Array must contain an element matching this (objects match on a subset of fields)
    pub contains: Option<Value>,
    /// Array must not contain any element matching this
    pub not_contains: Option<Value>,
}

impl Scenario {
    /// Load and validate a scenario file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let scenario: Scenario = serde_yaml::from_str(&content)
            .map_err(|e| Error::scenario(path, format!("failed to parse: {}", e)))?;

        scenario.validate().map_err(|message| Error::scenario(path, message))?;
        Ok(scenario)
    }

    /// Check the invariants the harness relies on
    ///
    /// Services may not share a name, a port or a state path, and there may
    /// be at most two of them.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.steps.is_empty() {
            return Err("scenario has no steps".to_string());
        }
        if self.services.len() > MAX_SERVICES {
            return Err(format!(
                "at most {} services are supported, found {}",
                MAX_SERVICES,
                self.services.len()
            ));
        }

        let mut names = HashSet::new();
        let mut ports = HashSet::new();
        let mut states = HashSet::new();
        for service in &self.services {
            if service.command.is_empty() {
                return Err(format!("service '{}' has an empty command", service.name));
            }
            if !names.insert(service.name.as_str()) {
                return Err(format!("duplicate service name '{}'", service.name));
            }
            if !ports.insert(service.port) {
                return Err(format!("port {} is used by more than one service", service.port));
            }
            if let Some(state) = &service.state_path {
                if !states.insert(state.as_path()) {
                    return Err(format!(
                        "state path '{}' is used by more than one service",
                        state.display()
                    ));
                }
            }
            if matches!(service.readiness, Some(ReadinessOverride { max_attempts: Some(0), .. })) {
                return Err(format!("service '{}' needs at least one readiness attempt", service.name));
            }
        }

        for (i, step) in self.steps.iter().enumerate() {
            if step.url.trim().is_empty() {
                return Err(format!("step {} has an empty url", i + 1));
            }
            if let Some(name) = step.capture.keys().find(|name| !is_variable_name(name)) {
                return Err(format!("step {} captures into invalid variable name '{}'", i + 1, name));
            }
        }

        Ok(())
    }

    /// Directory the scenario runs in
    pub fn resolve_workdir(&self, scenario_path: &Path) -> PathBuf {
        let scenario_dir = scenario_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        match &self.workdir {
            Some(dir) => paths::resolve(scenario_dir, dir),
            None => scenario_dir.to_path_buf(),
        }
    }

    /// Turn the declared services into launch plans
    pub fn service_plans(
        &self,
        workdir: &Path,
        log_dir: &Path,
        defaults: &ReadinessConfig,
    ) -> Vec<ServicePlan> {
        self.services
            .iter()
            .map(|service| service.to_plan(workdir, log_dir, defaults))
            .collect()
    }
}

impl ServiceConfig {
    /// Resolve paths and defaults into a launch plan
    pub fn to_plan(&self, workdir: &Path, log_dir: &Path, defaults: &ReadinessConfig) -> ServicePlan {
        let combined = paths::service_log(log_dir, &self.name);
        let stdout_log = self
            .stdout_log
            .as_deref()
            .map(|p| paths::resolve(workdir, p))
            .unwrap_or_else(|| combined.clone());
        let stderr_log = self
            .stderr_log
            .as_deref()
            .map(|p| paths::resolve(workdir, p))
            .unwrap_or(combined);

        let overrides = self.readiness.unwrap_or_default();
        let readiness = ReadinessPoller::new(
            overrides.max_attempts.unwrap_or(defaults.max_attempts),
            overrides
                .interval_ms
                .map(std::time::Duration::from_millis)
                .unwrap_or_else(|| defaults.interval()),
        );

        ServicePlan {
            spec: ServiceSpec {
                name: self.name.clone(),
                launch_command: self.command.clone(),
                health_url: self
                    .health_url
                    .clone()
                    .unwrap_or_else(|| format!("http://localhost:{}/", self.port)),
                port: self.port,
                stdout_log,
                stderr_log,
                state_path: self.state_path.as_deref().map(|p| paths::resolve(workdir, p)),
                workdir: workdir.to_path_buf(),
            },
            provision: self.provision.iter().map(|step| step.shell.clone()).collect(),
            readiness,
        }
    }
}

/// Variable names are ASCII letters, digits and underscores
pub fn is_variable_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANK_CONNECTION: &str = r#"
name: bank-connection
vars:
  HOST_ID: HOST01
services:
  - name: nexus
    command: [nexus, serve, --db-name=test-nexus.sqlite3]
    port: 5001
    state_path: test-nexus.sqlite3
    provision:
      - shell: nexus superuser admin --password x --db-name=test-nexus.sqlite3
  - name: sandbox
    command: [sandbox, serve]
    port: 5000
    state_path: libeufin-sandbox.sqlite3
    readiness: { max_attempts: 5, interval_ms: 2000 }
steps:
  - name: create user
    method: POST
    url: http://localhost:5001/users
    auth: { username: admin, password: x }
    json: { username: person, password: y }
  - url: http://localhost:5001/bank-connections
    expect:
      body:
        - { path: bankConnections, not_contains: { name: my-ebics } }
  - method: post
    url: http://localhost:5001/missing
    expect: { status: 404 }
    capture: { UUID: uuid }
"#;

    fn parse(yaml: &str) -> Scenario {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_full_scenario() {
        let scenario = parse(BANK_CONNECTION);
        scenario.validate().unwrap();

        assert_eq!(scenario.services.len(), 2);
        assert_eq!(scenario.vars["HOST_ID"], "HOST01");

        let first = &scenario.steps[0];
        assert_eq!(first.method, Method::Post);
        assert_eq!(first.expect.status, 200);
        assert_eq!(first.auth.as_ref().unwrap().username, "admin");

        let second = &scenario.steps[1];
        assert_eq!(second.method, Method::Get);
        assert_eq!(second.expect.body.len(), 1);
        assert_eq!(second.label(), "GET http://localhost:5001/bank-connections");

        let third = &scenario.steps[2];
        assert_eq!(third.method, Method::Post);
        assert_eq!(third.expect.status, 404);
        assert_eq!(third.capture["UUID"], "uuid");
    }

    #[test]
    fn test_service_plans_resolve_paths_and_defaults() {
        let scenario = parse(BANK_CONNECTION);
        let defaults = ReadinessConfig::default();
        let plans = scenario.service_plans(Path::new("/work"), Path::new("/logs"), &defaults);

        let nexus = &plans[0];
        assert_eq!(nexus.spec.health_url, "http://localhost:5001/");
        assert_eq!(nexus.spec.state_path, Some(PathBuf::from("/work/test-nexus.sqlite3")));
        assert_eq!(nexus.spec.stdout_log, PathBuf::from("/logs/nexus.log"));
        assert_eq!(nexus.spec.stderr_log, nexus.spec.stdout_log);
        assert_eq!(nexus.provision.len(), 1);
        assert_eq!(nexus.readiness.max_attempts(), 10);

        let sandbox = &plans[1];
        assert_eq!(sandbox.readiness.max_attempts(), 5);
        assert_eq!(sandbox.spec.log_files().len(), 1);
    }

    #[test]
    fn test_rejects_shared_port() {
        let mut scenario = parse(BANK_CONNECTION);
        scenario.services[1].port = 5001;
        let err = scenario.validate().unwrap_err();
        assert!(err.contains("port 5001"));
    }

    #[test]
    fn test_rejects_shared_state_path() {
        let mut scenario = parse(BANK_CONNECTION);
        scenario.services[1].state_path = scenario.services[0].state_path.clone();
        assert!(scenario.validate().unwrap_err().contains("state path"));
    }

    #[test]
    fn test_rejects_third_service() {
        let mut scenario = parse(BANK_CONNECTION);
        let mut extra = scenario.services[0].clone();
        extra.name = "facade".into();
        extra.port = 5002;
        extra.state_path = None;
        scenario.services.push(extra);
        assert!(scenario.validate().unwrap_err().contains("at most 2"));
    }

    #[test]
    fn test_rejects_empty_steps() {
        let mut scenario = parse(BANK_CONNECTION);
        scenario.steps.clear();
        assert!(scenario.validate().is_err());
    }

    #[test]
    fn test_resolve_workdir() {
        let mut scenario = parse(BANK_CONNECTION);
        assert_eq!(
            scenario.resolve_workdir(Path::new("/repo/scenarios/bank.yaml")),
            PathBuf::from("/repo/scenarios")
        );
        assert_eq!(scenario.resolve_workdir(Path::new("bank.yaml")), PathBuf::from("."));

        scenario.workdir = Some(PathBuf::from(".."));
        assert_eq!(
            scenario.resolve_workdir(Path::new("/repo/scenarios/bank.yaml")),
            PathBuf::from("/repo/scenarios/..")
        );
    }

    #[test]
    fn test_bundled_scenarios_load() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios");
        let mut loaded = 0;
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.extension().is_some_and(|ext| ext == "yaml") {
                Scenario::load(&path).unwrap_or_else(|e| panic!("{e}"));
                loaded += 1;
            }
        }
        assert!(loaded >= 2);
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "name: broken\nsteps: []\n").unwrap();

        let err = Scenario::load(&path).unwrap_err();
        assert!(matches!(err, Error::Scenario { .. }));
        assert!(err.to_string().contains("broken.yaml"));
    }
}
