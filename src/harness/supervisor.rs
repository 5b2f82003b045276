//! Service process supervision
//!
//! Spawns services as child processes with their output redirected to log
//! files, and stops them with SIGTERM followed by SIGKILL once a grace
//! period runs out.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::common::{paths, Error, Result};

use super::cleanup::{CleanupAction, CleanupRegistry};
use super::readiness::Liveness;

/// Largest amount of captured output surfaced in a diagnostic, per stream
const CAPTURE_LIMIT: usize = 64 * 1024;

/// Everything needed to launch one service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    /// Name used in logs and diagnostics (e.g. "sandbox", "nexus")
    pub name: String,
    /// Program followed by its arguments
    pub launch_command: Vec<String>,
    /// URL probed for readiness
    pub health_url: String,
    /// Port the service listens on
    pub port: u16,
    /// File receiving the service's stdout
    pub stdout_log: PathBuf,
    /// File receiving the service's stderr (may equal `stdout_log`)
    pub stderr_log: PathBuf,
    /// Persisted state wiped before the service starts
    pub state_path: Option<PathBuf>,
    /// Working directory of the service process
    pub workdir: PathBuf,
}

impl ServiceSpec {
    /// Log files to point a human at, without duplicates
    pub fn log_files(&self) -> Vec<&Path> {
        if self.stdout_log == self.stderr_log {
            vec![self.stdout_log.as_path()]
        } else {
            vec![self.stdout_log.as_path(), self.stderr_log.as_path()]
        }
    }
}

/// Lifecycle state of a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Spawned, not yet answering its health URL
    Starting,
    /// Answered a readiness probe
    Ready,
    /// Exited or stopped
    Terminated,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Ready => write!(f, "ready"),
            ProcessState::Terminated => write!(f, "terminated"),
        }
    }
}

struct ProcessInner {
    child: Child,
    state: ProcessState,
    exit_status: Option<ExitStatus>,
}

/// Handle to a running service
///
/// Clones share the same underlying process; the copy held by the cleanup
/// registry and the one returned to the caller observe the same state.
#[derive(Clone)]
pub struct SupervisedProcess {
    spec: Arc<ServiceSpec>,
    pid: Option<u32>,
    /// Length of each log file when the process was spawned
    log_start: Arc<Vec<(PathBuf, u64)>>,
    grace_period: Duration,
    inner: Arc<Mutex<ProcessInner>>,
}

impl SupervisedProcess {
    pub fn spec(&self) -> &ServiceSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub async fn state(&self) -> ProcessState {
        self.inner.lock().await.state
    }

    /// Exit status, once the process has terminated
    pub async fn exit_status(&self) -> Option<ExitStatus> {
        self.inner.lock().await.exit_status
    }

    /// Record a successful readiness probe
    pub async fn mark_ready(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == ProcessState::Starting {
            inner.state = ProcessState::Ready;
            tracing::info!(service = %self.spec.name, pid = ?self.pid, "Service is ready");
        }
    }

    /// Check whether the process exited on its own
    pub async fn try_exited(&self) -> Result<Option<ExitStatus>> {
        let mut inner = self.inner.lock().await;
        if let Some(status) = inner.exit_status {
            return Ok(Some(status));
        }
        let status = inner.child.try_wait()?;
        if let Some(status) = status {
            inner.exit_status = Some(status);
            inner.state = ProcessState::Terminated;
        }
        Ok(status)
    }

    /// Stop the process: SIGTERM, wait up to the grace period, then SIGKILL
    ///
    /// Stopping a terminated process is a no-op.
    pub async fn stop(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;

        if inner.state == ProcessState::Terminated {
            tracing::debug!(service = %self.spec.name, "Already terminated");
            return Ok(());
        }

        if let Some(status) = inner.child.try_wait()? {
            tracing::debug!(service = %self.spec.name, %status, "Exited before stop");
            inner.exit_status = Some(status);
            inner.state = ProcessState::Terminated;
            return Ok(());
        }

        tracing::info!(service = %self.spec.name, pid = ?self.pid, "Stopping service");
        request_termination(&mut inner.child, self.pid);

        let status = match tokio::time::timeout(self.grace_period, inner.child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                tracing::warn!(
                    service = %self.spec.name,
                    grace_ms = self.grace_period.as_millis() as u64,
                    "Service ignored SIGTERM, killing it"
                );
                force_kill(self.pid);
                inner.child.kill().await?;
                inner.child.wait().await?
            }
        };

        tracing::debug!(service = %self.spec.name, %status, "Service exited");
        inner.exit_status = Some(status);
        inner.state = ProcessState::Terminated;
        Ok(())
    }

    /// Read back what this process wrote to its log files
    ///
    /// Output from earlier runs sharing the same files is skipped.
    pub fn captured_output(&self) -> String {
        self.log_start
            .iter()
            .map(|(path, offset)| match read_since(path, *offset) {
                Ok((text, true)) => format!("--- {} (last {} bytes) ---\n{}", path.display(), CAPTURE_LIMIT, text),
                Ok((text, false)) => format!("--- {} ---\n{}", path.display(), text),
                Err(e) => format!("--- {} (unreadable: {}) ---", path.display(), e),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Liveness for SupervisedProcess {
    async fn exited(&self) -> Option<String> {
        match self.try_exited().await {
            Ok(status) => status.map(|status| status.to_string()),
            Err(e) => {
                tracing::debug!(service = %self.spec.name, error = %e, "Could not poll process status");
                None
            }
        }
    }
}

#[async_trait]
impl CleanupAction for SupervisedProcess {
    fn label(&self) -> String {
        match self.pid {
            Some(pid) => format!("stop {} (pid {})", self.spec.name, pid),
            None => format!("stop {}", self.spec.name),
        }
    }

    async fn run(&self) -> Result<()> {
        self.stop().await
    }
}

/// Spawns services and hands their teardown to a cleanup registry
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    grace_period: Duration,
}

impl ProcessSupervisor {
    pub fn new(grace_period: Duration) -> Self {
        Self { grace_period }
    }

    /// Spawn the service described by `spec`
    ///
    /// The returned process is registered with `registry` before this
    /// returns; if spawning fails nothing is registered.
    pub fn start(
        &self,
        spec: ServiceSpec,
        registry: &mut CleanupRegistry,
    ) -> Result<SupervisedProcess> {
        let (program, args) = spec
            .launch_command
            .split_first()
            .ok_or_else(|| Error::spawn_failed(&spec.name, "empty launch command"))?;
        let program = resolve_program(&spec, program)?;

        let (stdout, stderr) = open_sinks(&spec)?;
        let log_start = spec
            .log_files()
            .into_iter()
            .map(|path| (path.to_path_buf(), std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)))
            .collect::<Vec<_>>();

        let mut cmd = Command::new(&program);
        cmd.args(args)
            .current_dir(&spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true);

        // Own process group, so wrapper scripts take their children down with them
        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .map_err(|e| Error::spawn_failed(&spec.name, format!("{}: {}", program.display(), e)))?;
        let pid = child.id();

        tracing::info!(
            service = %spec.name,
            pid = ?pid,
            port = spec.port,
            log = %spec.stdout_log.display(),
            "Spawned service"
        );

        let process = SupervisedProcess {
            spec: Arc::new(spec),
            pid,
            log_start: Arc::new(log_start),
            grace_period: self.grace_period,
            inner: Arc::new(Mutex::new(ProcessInner {
                child,
                state: ProcessState::Starting,
                exit_status: None,
            })),
        };

        registry.register(Box::new(process.clone()));
        Ok(process)
    }
}

/// Find the executable: paths are taken relative to the service's working
/// directory, bare names are looked up in PATH
fn resolve_program(spec: &ServiceSpec, program: &str) -> Result<PathBuf> {
    let path = Path::new(program);
    if path.components().count() > 1 {
        let resolved = paths::resolve(&spec.workdir, path);
        if !resolved.exists() {
            return Err(Error::spawn_failed(
                &spec.name,
                format!("'{}' does not exist", resolved.display()),
            ));
        }
        Ok(resolved)
    } else {
        which::which(program).map_err(|e| {
            Error::spawn_failed(&spec.name, format!("'{}' not found in PATH: {}", program, e))
        })
    }
}

/// Open a log file for appending, creating it and its directory
pub(super) fn open_log(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// Text appended to `path` past `offset`, keeping only the last
/// `CAPTURE_LIMIT` bytes; the flag says whether anything was cut
pub(super) fn read_since(path: &Path, offset: u64) -> std::io::Result<(String, bool)> {
    let bytes = std::fs::read(path)?;
    let offset = usize::try_from(offset).unwrap_or(usize::MAX).min(bytes.len());
    let fresh = &bytes[offset..];
    let start = fresh.len().saturating_sub(CAPTURE_LIMIT);
    Ok((String::from_utf8_lossy(&fresh[start..]).into_owned(), start > 0))
}

/// Open the log sinks in append mode, sharing one handle if both streams
/// go to the same file
fn open_sinks(spec: &ServiceSpec) -> Result<(File, File)> {
    let open = |path: &Path| -> Result<File> {
        open_log(path)
            .map_err(|e| Error::spawn_failed(&spec.name, format!("log file '{}': {}", path.display(), e)))
    };

    let stdout = open(&spec.stdout_log)?;
    let stderr = if spec.stderr_log == spec.stdout_log {
        stdout.try_clone()?
    } else {
        open(&spec.stderr_log)?
    };
    Ok((stdout, stderr))
}

#[cfg(unix)]
fn request_termination(_child: &mut Child, pid: Option<u32>) {
    if let Some(pid) = pid {
        // Negative pid signals the whole process group
        let rc = unsafe { libc::kill(-(pid as i32), libc::SIGTERM) };
        if rc != 0 {
            tracing::debug!(pid, "SIGTERM delivery failed: {}", std::io::Error::last_os_error());
        }
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn force_kill(pid: Option<u32>) {
    if let Some(pid) = pid {
        unsafe {
            libc::kill(-(pid as i32), libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn force_kill(_pid: Option<u32>) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn spec(dir: &Path, name: &str, script: &str) -> ServiceSpec {
        let log = paths::service_log(dir, name);
        ServiceSpec {
            name: name.to_string(),
            launch_command: vec!["sh".into(), "-c".into(), script.into()],
            health_url: "http://127.0.0.1:9/".into(),
            port: 9,
            stdout_log: log.clone(),
            stderr_log: log,
            state_path: None,
            workdir: dir.to_path_buf(),
        }
    }

    fn pid_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as i32, 0) == 0 }
    }

    #[tokio::test]
    async fn test_start_registers_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(Duration::from_secs(2));
        let mut registry = CleanupRegistry::new();

        let process = supervisor
            .start(spec(dir.path(), "sandbox", "sleep 30"), &mut registry)
            .unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(process.state().await, ProcessState::Starting);

        let report = registry.drain().await;
        assert_eq!(report.completed, 1);
        assert_eq!(process.state().await, ProcessState::Terminated);
    }

    #[tokio::test]
    async fn test_stop_twice_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(Duration::from_secs(2));
        let mut registry = CleanupRegistry::new();

        let process = supervisor
            .start(spec(dir.path(), "nexus", "sleep 30"), &mut registry)
            .unwrap();
        let pid = process.pid().unwrap();

        process.stop().await.unwrap();
        assert_eq!(process.state().await, ProcessState::Terminated);
        process.stop().await.unwrap();
        assert_eq!(process.state().await, ProcessState::Terminated);

        // The registry's copy sees the same process and does nothing
        let report = registry.drain().await;
        assert_eq!(report.completed, 1);
        assert!(!pid_alive(pid));
    }

    #[tokio::test]
    async fn test_sigterm_ignored_escalates_to_kill() {
        let dir = tempfile::tempdir().unwrap();
        let grace = Duration::from_millis(300);
        let supervisor = ProcessSupervisor::new(grace);
        let mut registry = CleanupRegistry::new();

        let process = supervisor
            .start(
                spec(dir.path(), "stubborn", "trap '' TERM; while true; do sleep 1; done"),
                &mut registry,
            )
            .unwrap();
        // Give the shell time to install the trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        process.stop().await.unwrap();
        assert!(started.elapsed() >= grace);
        assert_eq!(process.state().await, ProcessState::Terminated);
        registry.drain().await;
    }

    #[tokio::test]
    async fn test_output_goes_to_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        let mut registry = CleanupRegistry::new();

        let process = supervisor
            .start(
                spec(dir.path(), "chatty", "echo to-stdout; echo to-stderr >&2"),
                &mut registry,
            )
            .unwrap();

        for _ in 0..50 {
            if process.try_exited().await.unwrap().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(process.state().await, ProcessState::Terminated);

        let captured = process.captured_output();
        assert!(captured.contains("to-stdout"));
        assert!(captured.contains("to-stderr"));
        registry.drain().await;
    }

    #[tokio::test]
    async fn test_captured_output_skips_earlier_runs() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        let mut registry = CleanupRegistry::new();
        std::fs::write(paths::service_log(dir.path(), "nexus"), "left over from yesterday\n").unwrap();

        let process = supervisor
            .start(spec(dir.path(), "nexus", "echo today"), &mut registry)
            .unwrap();
        for _ in 0..50 {
            if process.exited().await.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(process.exited().await.is_some());

        let captured = process.captured_output();
        assert!(captured.contains("today"));
        assert!(!captured.contains("yesterday"));
        registry.drain().await;
    }

    #[test]
    fn test_read_since_keeps_the_tail() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("big.log");
        let mut content = vec![b'a'; 10];
        content.extend(vec![b'b'; CAPTURE_LIMIT + 5]);
        std::fs::write(&log, &content).unwrap();

        let (text, truncated) = read_since(&log, 10).unwrap();
        assert!(truncated);
        assert_eq!(text.len(), CAPTURE_LIMIT);
        assert!(!text.contains('a'));

        let (text, truncated) = read_since(&log, 10 + CAPTURE_LIMIT as u64).unwrap();
        assert!(!truncated);
        assert_eq!(text, "bbbbb");

        // An offset past the end yields nothing
        assert_eq!(read_since(&log, u64::MAX).unwrap(), (String::new(), false));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(Duration::from_secs(1));
        let mut registry = CleanupRegistry::new();

        let mut bad = spec(dir.path(), "ghost", "");
        bad.launch_command = vec!["definitely-not-an-installed-service".into(), "serve".into()];

        let err = supervisor.start(bad, &mut registry).err().unwrap();
        assert!(matches!(err, Error::SpawnFailed { .. }));
        assert_eq!(err.exit_code(), 77);
        assert!(registry.is_empty());
    }
}
