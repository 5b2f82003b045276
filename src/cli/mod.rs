//! CLI command handling
//!
//! Dispatches CLI commands and turns their outcome into an exit code.

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::error::{EXIT_FAILED, EXIT_PASSED};
use crate::common::Result;
use crate::iban;
use crate::scenario::{self, RunOptions, Scenario};

/// Dispatch a CLI command, returning the process exit code
pub async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            scenario,
            hold,
            verbose,
            config,
            log_dir,
        } => {
            let config = match config {
                Some(path) => Config::load_from(&path)?,
                None => Config::load()?,
            };
            let options = RunOptions {
                verbose,
                hold,
                log_dir,
            };

            let outcome = scenario::run_scenario(&scenario, &config, &options).await?;
            tracing::debug!(
                scenario = %outcome.name,
                steps = outcome.result.steps_executed,
                passed = outcome.result.passed(),
                "Scenario finished"
            );

            Ok(if outcome.result.passed() {
                EXIT_PASSED
            } else {
                EXIT_FAILED
            })
        }

        Commands::Check { scenario } => {
            let loaded = Scenario::load(&scenario)?;
            println!(
                "{} {}: {} service(s), {} step(s)",
                "✓".green(),
                loaded.name.white().bold(),
                loaded.services.len(),
                loaded.steps.len()
            );
            for service in &loaded.services {
                println!(
                    "  {} {}",
                    service.name,
                    format!("(port {})", service.port).dimmed()
                );
            }
            Ok(EXIT_PASSED)
        }

        Commands::Iban {
            country,
            bban,
            account,
        } => {
            let iban = iban::generate(&country, &bban, account.as_deref())?;
            println!("{}", iban);
            Ok(EXIT_PASSED)
        }
    }
}
