//! testenv - end-to-end test environment for the Sandbox and Nexus services
//!
//! Brings the services up against a clean state, runs a scenario's HTTP
//! steps against them and always tears them down again.

use clap::Parser;
use testenv::common::logging;
use testenv::{cli, commands};
use commands::Commands;

#[derive(Parser)]
#[command(name = "testenv", about = "End-to-end test environment for Sandbox and Nexus")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    logging::init_cli(cli.command.verbose());

    let code = match cli::dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            e.exit_code()
        }
    };

    std::process::exit(code);
}
