//! Top-level scenario execution
//!
//! Owns the cleanup registry for the whole run. Services are brought up one
//! after the other, steps run against them, and the registry is drained on
//! every exit path: pass, failure, environment error or Ctrl-C.

use std::path::{Path, PathBuf};

use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::harness::{
    CleanupRegistry, Environment, HttpProbe, ProcessSupervisor, ServicePlan, TokioSleeper,
};

use super::config::Scenario;
use super::http::ReqwestTransport;
use super::runner::{RunResult, ScenarioRunner};
use super::template::Vars;

/// Options from the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub verbose: bool,
    /// Keep services up after a passing run until Enter or Ctrl-C
    pub hold: bool,
    /// Overrides the configured log directory
    pub log_dir: Option<PathBuf>,
}

/// What a completed run produced
#[derive(Debug)]
pub struct ScenarioOutcome {
    pub name: String,
    pub result: RunResult,
    /// Where service output was written
    pub log_files: Vec<PathBuf>,
}

/// Run a scenario file end to end
///
/// Environment problems are returned as errors; a step failure is a
/// successful run with a failed [`RunResult`].
pub async fn run_scenario(path: &Path, config: &Config, options: &RunOptions) -> Result<ScenarioOutcome> {
    let scenario = Scenario::load(path)?;

    println!(
        "\n{} {}",
        "Running Test:".blue().bold(),
        scenario.name.white().bold()
    );
    if let Some(desc) = &scenario.description {
        println!("  {}", desc.dimmed());
    }

    let workdir = scenario.resolve_workdir(path);
    let log_dir = options
        .log_dir
        .clone()
        .unwrap_or_else(|| config.logs.resolve_dir());
    paths::ensure_dir(&log_dir)?;

    let plans = scenario.service_plans(&workdir, &log_dir, &config.readiness);
    let log_files = log_files(&plans);

    let environment = Environment::new(
        ProcessSupervisor::new(config.shutdown.grace_period()),
        Box::new(HttpProbe::new()),
        Box::new(TokioSleeper),
    )
    .verbose(options.verbose);
    let transport = ReqwestTransport::new(config.http.request_timeout())?;
    let mut runner =
        ScenarioRunner::new(Box::new(transport), Vars::new(scenario.vars.clone())).verbose(options.verbose);

    let mut registry = CleanupRegistry::new();

    let outcome = tokio::select! {
        outcome = execute(&scenario, &plans, &environment, &mut runner, &mut registry) => outcome,
        _ = tokio::signal::ctrl_c() => {
            println!("\n{}", "Interrupted".yellow());
            Err(Error::Interrupted)
        }
    };

    if options.hold && matches!(&outcome, Ok(result) if result.passed()) {
        hold(&log_files).await;
    }

    teardown(&mut registry).await;

    let result = outcome?;
    if result.passed() {
        println!(
            "\n{} {}\n",
            "✓".green().bold(),
            "Test Passed".green().bold()
        );
    } else {
        println!("\n{} {}", "✗".red().bold(), "Test Failed".red().bold());
        if let Some(diagnostic) = &result.diagnostic {
            println!("  {}", diagnostic);
        }
        print_log_hint(&log_files);
        println!();
    }

    Ok(ScenarioOutcome {
        name: scenario.name,
        result,
        log_files,
    })
}

/// Bring up every service, then run the steps
async fn execute(
    scenario: &Scenario,
    plans: &[ServicePlan],
    environment: &Environment,
    runner: &mut ScenarioRunner,
    registry: &mut CleanupRegistry,
) -> Result<RunResult> {
    if !plans.is_empty() {
        println!("\n{}", "Services:".cyan());
    }
    for plan in plans {
        let process = environment.bring_up(plan, registry).await?;
        println!(
            "  {} {} {}",
            "✓".green(),
            process.name(),
            format!("(pid {}, port {})", process.pid().unwrap_or_default(), plan.spec.port).dimmed()
        );
        tracing::info!(service = %plan.spec.name, port = plan.spec.port, pid = ?process.pid(), "Service ready");
    }

    println!("\n{}", "Steps:".cyan());
    Ok(runner.run(&scenario.steps).await)
}

/// Block until the user presses Enter or Ctrl-C
async fn hold(log_files: &[PathBuf]) {
    println!(
        "\n{}",
        "Services are up. Press Enter or Ctrl-C to tear down.".cyan()
    );
    print_log_hint(log_files);

    let mut line = String::new();
    let mut stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        _ = stdin.read_line(&mut line) => {}
        _ = tokio::signal::ctrl_c() => {}
    }
}

async fn teardown(registry: &mut CleanupRegistry) {
    if registry.is_empty() {
        return;
    }
    tracing::debug!(pending = registry.len(), "Tearing down services");
    let report = registry.drain().await;
    for (label, error) in &report.failed {
        eprintln!("{} failed to stop {}: {}", "warning:".yellow(), label, error);
    }
}

fn print_log_hint(log_files: &[PathBuf]) {
    if log_files.is_empty() {
        return;
    }
    println!("  {}", "Service logs:".dimmed());
    for file in log_files {
        println!("    {}", file.display().to_string().dimmed());
    }
}

fn log_files(plans: &[ServicePlan]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    for plan in plans {
        for file in plan.spec.log_files() {
            if !files.iter().any(|f| f == file) {
                files.push(file.to_path_buf());
            }
        }
    }
    files
}
