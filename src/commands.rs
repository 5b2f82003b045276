//! CLI command definitions
//!
//! Defines the clap commands for the testenv CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::iban::{DEFAULT_BBAN, DEFAULT_COUNTRY};

#[derive(Subcommand)]
pub enum Commands {
    /// Bring up the scenario's services and run its steps against them
    ///
    /// Exits 0 when every step passes, 1 when a step fails and 77 when the
    /// environment could not be brought up.
    Run {
        /// Path to the YAML scenario file
        scenario: PathBuf,

        /// Keep the services running after a passing run until Enter or Ctrl-C
        #[arg(long)]
        hold: bool,

        /// Verbose output
        #[arg(long, short)]
        verbose: bool,

        /// Configuration file (default: platform config dir)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Directory for service log files
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },

    /// Validate a scenario file without starting anything
    Check {
        /// Path to the YAML scenario file
        scenario: PathBuf,
    },

    /// Print an IBAN with valid check digits
    Iban {
        /// Two-letter country code
        #[arg(long, default_value = DEFAULT_COUNTRY)]
        country: String,

        /// Bank code placed before the account number
        #[arg(long, default_value = DEFAULT_BBAN)]
        bban: String,

        /// Account number (default: ten random digits)
        #[arg(long)]
        account: Option<String>,
    },
}

impl Commands {
    /// Whether the command asked for debug logging
    pub fn verbose(&self) -> bool {
        matches!(self, Commands::Run { verbose: true, .. })
    }
}
