//! One-shot provisioning commands
//!
//! Some services need a command run against their fresh state before they
//! are served, e.g. creating the admin account in Nexus' new database.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

use crate::common::{Error, Result};

use super::supervisor::{open_log, read_since};

/// Run each shell command to completion in `workdir`, in order
///
/// Output of every command is appended to `log`, the service's own log
/// file, and also echoed to the console when `verbose` is set. The first
/// non-zero exit aborts with `ProvisionFailed` carrying that command's
/// output.
pub async fn run_all(
    service: &str,
    commands: &[String],
    workdir: &Path,
    log: &Path,
    verbose: bool,
) -> Result<()> {
    for command in commands {
        tracing::info!(service, %command, "Provisioning");

        let failed = |status: String, output: String| Error::ProvisionFailed {
            service: service.to_string(),
            command: command.clone(),
            status,
            output,
        };

        let sink = open_log(log).map_err(|e| failed(format!("log file '{}': {}", log.display(), e), String::new()))?;
        let offset = sink.metadata().map(|m| m.len()).unwrap_or(0);
        let stderr = sink.try_clone().map_err(|e| failed(e.to_string(), String::new()))?;

        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(sink))
            .stderr(Stdio::from(stderr))
            .status()
            .await
            .map_err(|e| failed(e.to_string(), String::new()))?;

        let output = match read_since(log, offset) {
            Ok((text, _)) => text,
            Err(e) => format!("(output unreadable: {})", e),
        };
        if verbose && !output.is_empty() {
            print!("{}", output);
        }

        if !status.success() {
            return Err(failed(status.to_string(), output));
        }
    }
    Ok(())
}
