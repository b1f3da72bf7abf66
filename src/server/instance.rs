use crate::config::ServerConfig;
use crate::error::{Error, Result};
use async_process::Child;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl InstanceId {
    // Private constructor, only usable within our crate
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a server instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Process spawned, readiness not yet observed
    Starting,
    /// Ready and accepting connections
    Running,
    /// Termination signal sent, waiting for exit
    Stopping,
    /// Process exited and was reaped
    Stopped,
    /// Startup failed; the instance was never registered as live
    Failed,
}

/// A server instance spawned by the manager.
///
/// Holds the instance's identity: its port, the paths it was launched
/// with, and the child process handle. Created by
/// [`ServerManager::start`](crate::ServerManager::start) and mutated only
/// by the manager. While an instance is `Running` its port is never shared
/// with another running instance — ports come from OS-ephemeral allocation,
/// discovered from the server log.
pub struct ServerInstance {
    pub(crate) id: InstanceId,
    pub(crate) config: ServerConfig,
    pub(crate) port: u16,
    pub(crate) input_db: PathBuf,
    pub(crate) output_db: PathBuf,
    pub(crate) work_dir: PathBuf,
    pub(crate) log_file: PathBuf,
    pub(crate) pid: u32,
    pub(crate) child: Option<Child>,
    pub(crate) state: ServerState,
}

impl ServerInstance {
    /// The instance's unique id.
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Configuration of the binary this instance was launched from.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The port the server is listening on.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path to the copied input database inside the working directory.
    pub fn input_db(&self) -> &Path {
        &self.input_db
    }

    /// Path where the server writes its output database on shutdown.
    ///
    /// The file is guaranteed to exist and be consistent only after a
    /// graceful stop; after a forced kill it may be absent or stale.
    pub fn output_db(&self) -> &Path {
        &self.output_db
    }

    /// The instance's isolated working directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Path to the server's log file.
    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// OS process id of the server.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Whether the server process is still running.
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_status(), Ok(None)),
            None => false,
        }
    }

    /// Read the server log file contents, empty if the log does not exist.
    pub fn log_contents(&self) -> String {
        std::fs::read_to_string(&self.log_file).unwrap_or_default()
    }
}

/// Send the graceful termination signal to a process.
///
/// On Unix this is SIGTERM; the server's contract is to flush its current
/// state to the output database before exiting.
#[cfg(unix)]
pub(crate) fn send_terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| Error::Process(format!("Failed to send SIGTERM to pid {}: {}", pid, e)))
}

#[cfg(not(unix))]
pub(crate) fn send_terminate(_pid: u32) -> Result<()> {
    // No graceful signal available; callers fall through to the forced path.
    Err(Error::Process(
        "Graceful termination is not supported on this platform".to_string(),
    ))
}

/// Shut a child process down: graceful signal first, forced kill after
/// `timeout`. Returns `true` when the process exited gracefully (its output
/// database flush can be trusted), `false` when it had to be killed.
pub(crate) async fn shutdown_child(child: &mut Child, pid: u32, timeout: Duration) -> Result<bool> {
    if send_terminate(pid).is_err() {
        // Signal delivery failed (process already gone, or unsupported
        // platform): fall through to the forced path.
        return force_kill(child).await.map(|_| false);
    }

    match tokio::time::timeout(timeout, child.status()).await {
        Ok(status) => {
            status.map_err(|e| Error::Process(format!("Failed to reap pid {}: {}", pid, e)))?;
            Ok(true)
        }
        Err(_) => {
            tracing::warn!(pid, "Process did not exit after SIGTERM, sending SIGKILL");
            force_kill(child).await.map(|_| false)
        }
    }
}

/// Kill a child outright and reap it. No flush guarantee.
pub(crate) async fn force_kill(child: &mut Child) -> Result<()> {
    child
        .kill()
        .map_err(|e| Error::Process(format!("Failed to kill process: {}", e)))?;
    child
        .status()
        .await
        .map_err(|e| Error::Process(format!("Failed to reap killed process: {}", e)))?;
    Ok(())
}
