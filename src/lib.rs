/*!
 # MOO Harness

 A Rust library for spawning and driving MOO interpreter servers in
 integration tests.

 ## Overview

 MOO Harness provides functionality to:
 - Start server processes against test databases, each in an isolated
   working directory with an OS-assigned ephemeral port
 - Connect line-oriented protocol clients and classify evaluation results
 - Request checkpoints and stop servers gracefully (flush guaranteed) or
   forcibly (no flush guarantee)
 - Detect a running server's feature set at runtime

 The asymmetry between graceful and forced shutdown is the point, not a
 bug: persistence test scenarios (write → checkpoint → restart → read)
 depend on a forced kill *not* flushing unsaved writes.

 ## Basic Usage

 ```no_run
 use moo_harness::{ServerManager, StartOptions, config::ServerConfig, error::Result};
 use std::time::Duration;

 #[tokio::main]
 async fn main() -> Result<()> {
     let config = ServerConfig::new("./moo").with_name("candidate");
     let mut manager = ServerManager::new(config)?;

     // Start a server on a copy of the test database
     let id = manager.start("minimal.db", StartOptions::default()).await?;

     // Drive the protocol
     let mut client = manager.connect(id).await?;
     let outcome = client.eval("1 + 1", None).await?;
     assert_eq!(outcome.message(), "2");
     client.checkpoint().await?;
     client.close();

     // Graceful stop: the output database is flushed before exit
     let output_db = manager.stop(id, Duration::from_secs(10)).await?;
     println!("Database written to {:?}", output_db);

     Ok(())
 }
 ```

 ## Features

 - **Lifecycle Management**: start, stop, and register server instances
 - **Protocol Client**: evaluation, checkpointing, trace transcripts
 - **Response Classification**: success / compile error / traceback parsing
 - **Error Handling**: startup, protocol, and transport tiers kept distinct
 - **Async Support**: full async/await support

 ## License

 This project is licensed under the terms in the LICENSE file.
*/

pub mod client;
pub mod config;
pub mod error;
pub mod features;
pub mod protocol;
pub mod retry;
pub mod server;

pub use client::{ClientOptions, MooClient};
pub use config::{HarnessConfig, ServerConfig};
pub use error::{Error, Result};
pub use features::ServerFeatures;
pub use protocol::EvalOutcome;
pub use server::{EmergencySession, InstanceId, ServerInstance, ServerState};

use async_process::{Command, Stdio};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use retry::{RetryPolicy, Sleeper, TokioSleeper, poll_until};
use server::instance::shutdown_child;
use server::readiness::{self, LogSignal};

/// Default budget for observing startup readiness.
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
/// Interval for readiness and filesystem polling.
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Budget for the output database to appear after process exit;
/// absorbs filesystem buffering latency.
const OUTPUT_SETTLE_TIMEOUT: Duration = Duration::from_secs(1);
/// Grace given to a failed-startup process before it is killed.
const FAILURE_REAP_TIMEOUT: Duration = Duration::from_secs(2);
/// Default graceful-stop budget used by `stop_all`.
const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Options for starting a server instance.
///
/// The defaults are what tests almost always want: an OS-assigned
/// ephemeral port and a fresh working directory under the manager's root.
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Fixed port to request. `None` requests port 0, letting the OS
    /// assign an ephemeral port atomically — the only race-free strategy
    /// under parallel test execution.
    pub port: Option<u16>,
    /// Working directory for the instance. `None` creates a fresh
    /// `instance_N` directory under the manager's working root.
    pub work_dir: Option<PathBuf>,
}

/// Spawns, registers, and tears down MOO server instances.
///
/// This struct is the main entry point of the harness. It owns the live
/// instance registry explicitly — there is no ambient global state — so
/// teardown is deterministic and scoped: [`stop_all`](Self::stop_all)
/// cleans up everything this manager started, even when a test flow failed
/// partway.
///
/// Each instance is an independent OS process isolated by its own working
/// directory and endpoint; running an old-version "writer" and a
/// new-version "reader" concurrently means two managers (or two starts)
/// and is coordinated by the caller.
///
/// All public methods are instrumented with `tracing` spans.
pub struct ServerManager {
    /// Configuration of the binary under test
    config: ServerConfig,
    /// Live and retired instances, keyed by id
    instances: HashMap<InstanceId, ServerInstance>,
    /// Counter for unique per-instance directory names
    instance_counter: u32,
    /// Working root; owned temp dirs are removed on drop
    work_root: WorkRoot,
    /// Default trace setting for connections
    trace: bool,
    /// Policy for readiness polling during start
    startup_policy: RetryPolicy,
    /// Policy for the post-exit output database poll
    settle_policy: RetryPolicy,
    /// Injectable sleeper so polling is testable without wall-clock waits
    sleeper: Arc<dyn Sleeper>,
}

enum WorkRoot {
    Temp(tempfile::TempDir),
    Fixed(PathBuf),
}

impl WorkRoot {
    fn path(&self) -> &Path {
        match self {
            WorkRoot::Temp(dir) => dir.path(),
            WorkRoot::Fixed(path) => path,
        }
    }
}

impl ServerManager {
    /// Create a manager with a fresh temporary working root.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(config), fields(server_name = %config.name))]
    pub fn new(config: ServerConfig) -> Result<Self> {
        let work_root = tempfile::Builder::new()
            .prefix("moo_test_")
            .tempdir()
            .map_err(|e| Error::Other(format!("Failed to create working root: {}", e)))?;
        tracing::info!(work_root = ?work_root.path(), "Creating new ServerManager");
        Ok(Self::build(config, WorkRoot::Temp(work_root)))
    }

    /// Create a manager rooted at an existing directory (kept on drop).
    pub fn with_work_dir(config: ServerConfig, work_dir: impl Into<PathBuf>) -> Self {
        Self::build(config, WorkRoot::Fixed(work_dir.into()))
    }

    fn build(config: ServerConfig, work_root: WorkRoot) -> Self {
        Self {
            config,
            instances: HashMap::new(),
            instance_counter: 0,
            work_root,
            trace: false,
            startup_policy: RetryPolicy::new(STARTUP_TIMEOUT, POLL_INTERVAL),
            settle_policy: RetryPolicy::new(OUTPUT_SETTLE_TIMEOUT, POLL_INTERVAL),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Record protocol transcripts on every connection by default.
    pub fn set_trace(&mut self, trace: bool) {
        self.trace = trace;
    }

    /// Override the startup readiness budget.
    pub fn set_startup_timeout(&mut self, timeout: Duration) {
        self.startup_policy = RetryPolicy::new(timeout, POLL_INTERVAL);
    }

    /// The configuration this manager launches instances from.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Look up an instance by id.
    pub fn instance(&self, id: InstanceId) -> Result<&ServerInstance> {
        self.instances
            .get(&id)
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))
    }

    /// Ids of all instances this manager knows about, live or stopped.
    pub fn instance_ids(&self) -> Vec<InstanceId> {
        self.instances.keys().copied().collect()
    }

    /// Start a server instance against a copy of `database`.
    ///
    /// The database is copied into a fresh per-instance directory, the
    /// process is launched with deterministic arguments
    /// (`-l <log> <input.db> <output.db> -p <port>`), and readiness is
    /// observed in two stages: the log must declare the bound port, and a
    /// TCP connect to that port must actually succeed. On any failure the
    /// spawned process is terminated and [`Error::Startup`] carries the
    /// captured log; a failed instance is never registered.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, database, options), fields(server_name = %self.config.name))]
    pub async fn start(
        &mut self,
        database: impl AsRef<Path>,
        options: StartOptions,
    ) -> Result<InstanceId> {
        let database = database.as_ref();
        let database = std::fs::canonicalize(database)
            .map_err(|_| Error::DatabaseNotFound(database.to_path_buf()))?;

        self.instance_counter += 1;
        let instance_dir = match options.work_dir {
            Some(dir) => dir,
            None => self
                .work_root
                .path()
                .join(format!("instance_{}", self.instance_counter)),
        };
        tokio::fs::create_dir_all(&instance_dir)
            .await
            .map_err(|e| Error::Other(format!("Failed to create instance dir: {}", e)))?;

        let input_db = instance_dir.join("input.db");
        tokio::fs::copy(&database, &input_db)
            .await
            .map_err(|e| Error::Other(format!("Failed to copy database: {}", e)))?;
        let output_db = instance_dir.join("output.db");
        let log_file = instance_dir.join("server.log");

        // Port 0 asks the OS for an ephemeral port; the real port is
        // learned from the log below
        let requested_port = options.port.unwrap_or(0);

        tracing::info!(binary = ?self.config.binary, requested_port, "Spawning server process");
        let mut child = Command::new(&self.config.binary)
            .arg("-l")
            .arg(&log_file)
            .arg(&input_db)
            .arg(&output_db)
            .arg("-p")
            .arg(requested_port.to_string())
            .current_dir(&instance_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to start process: {}", e)))?;
        let pid = child.id();

        let signal =
            readiness::scan_log_for_port(&log_file, &self.startup_policy, self.sleeper.as_ref())
                .await;
        let port = match signal {
            Some(LogSignal::Listening(port)) => port,
            Some(LogSignal::BindFailure) => {
                return Err(self
                    .startup_failure(&mut child, pid, &log_file, "could not bind endpoint")
                    .await);
            }
            None => {
                return Err(self
                    .startup_failure(&mut child, pid, &log_file, "no listen signal within timeout")
                    .await);
            }
        };
        tracing::debug!(port, "Server declared listening port");

        // A declared port is not yet a ready server
        if !readiness::wait_for_connectable(port, &self.startup_policy, self.sleeper.as_ref()).await
        {
            return Err(self
                .startup_failure(&mut child, pid, &log_file, "port never accepted a connection")
                .await);
        }

        let id = InstanceId::new();
        let instance = ServerInstance {
            id,
            config: self.config.clone(),
            port,
            input_db,
            output_db,
            work_dir: instance_dir,
            log_file,
            pid,
            child: Some(child),
            state: ServerState::Running,
        };
        self.instances.insert(id, instance);

        tracing::info!(instance_id = %id, port, pid, "Server started successfully");
        Ok(id)
    }

    /// Tear down a process that never became ready and build the startup
    /// error, including whatever the server managed to log.
    async fn startup_failure(
        &self,
        child: &mut async_process::Child,
        pid: u32,
        log_file: &Path,
        reason: &str,
    ) -> Error {
        tracing::error!(pid, reason, "Server failed to start");
        if let Err(e) = shutdown_child(child, pid, FAILURE_REAP_TIMEOUT).await {
            tracing::warn!(pid, error = %e, "Failed to reap process after startup failure");
        }
        let log = std::fs::read_to_string(log_file).unwrap_or_else(|_| "(no log)".to_string());
        Error::Startup {
            reason: reason.to_string(),
            log,
        }
    }

    /// Stop a server instance and return the output database path.
    ///
    /// Sends the graceful termination signal first — the server's contract
    /// is to flush its state to the output database before exiting — and
    /// waits up to `timeout` for exit. On timeout the stop escalates to a
    /// forced kill with no flush guarantee; the resulting data loss is
    /// accepted, and load-bearing for checkpoint-asymmetry tests.
    ///
    /// After exit the filesystem is polled briefly for the output path,
    /// which is returned whether or not it ultimately exists — the caller
    /// decides how to treat absence. Idempotent: stopping an already
    /// stopped instance returns the same path with no side effects.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self), fields(instance_id = %id))]
    pub async fn stop(&mut self, id: InstanceId, timeout: Duration) -> Result<PathBuf> {
        let instance = self
            .instances
            .get_mut(&id)
            .ok_or_else(|| Error::InstanceNotFound(id.to_string()))?;

        if instance.state == ServerState::Stopped {
            tracing::debug!("Instance already stopped");
            return Ok(instance.output_db.clone());
        }

        instance.state = ServerState::Stopping;
        let child = instance.child.take();
        let pid = instance.pid;
        let output_db = instance.output_db.clone();

        if let Some(mut child) = child {
            match child.try_status() {
                Ok(Some(status)) => {
                    tracing::debug!(pid, ?status, "Process already exited before stop");
                }
                _ => {
                    let graceful = shutdown_child(&mut child, pid, timeout).await?;
                    if graceful {
                        tracing::info!(pid, "Server exited gracefully");
                    } else {
                        tracing::warn!(pid, "Server was force-killed; output database may be stale");
                    }
                }
            }
        }

        if let Some(instance) = self.instances.get_mut(&id) {
            instance.state = ServerState::Stopped;
        }

        // The server writes the database before exiting, but the
        // filesystem may lag; wait briefly for the file to appear
        let settle_path = output_db.clone();
        let appeared = poll_until(&self.settle_policy, self.sleeper.as_ref(), move || {
            let path = settle_path.clone();
            async move { path.exists().then_some(()) }
        })
        .await
        .is_some();

        if !appeared {
            tracing::debug!(path = ?output_db, "Output database not present after stop");
        }

        Ok(output_db)
    }

    /// Stop every instance that is still live.
    ///
    /// Used for guaranteed cleanup when a test flow fails partway;
    /// individual stop failures are logged and swallowed so one
    /// half-torn-down instance cannot block the rest.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self))]
    pub async fn stop_all(&mut self) {
        let live: Vec<InstanceId> = self
            .instances
            .iter()
            .filter(|(_, instance)| {
                matches!(
                    instance.state,
                    ServerState::Starting | ServerState::Running | ServerState::Stopping
                )
            })
            .map(|(id, _)| *id)
            .collect();

        tracing::info!(num_live = live.len(), "Stopping all live instances");
        for id in live {
            if let Err(e) = self.stop(id, DEFAULT_STOP_TIMEOUT).await {
                tracing::warn!(instance_id = %id, error = %e, "Failed to stop instance during stop_all");
            }
        }
    }

    /// Connect a protocol client to a running instance, using the
    /// manager's default timeout and trace settings.
    pub async fn connect(&self, id: InstanceId) -> Result<MooClient> {
        let options = ClientOptions {
            trace: self.trace,
            ..ClientOptions::default()
        };
        self.connect_with(id, options).await
    }

    /// Connect a protocol client with explicit options.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, options), fields(instance_id = %id))]
    pub async fn connect_with(&self, id: InstanceId, options: ClientOptions) -> Result<MooClient> {
        let instance = self.instance(id)?;
        if instance.state != ServerState::Running {
            return Err(Error::Process(format!(
                "Instance {} is not running (state {:?})",
                id, instance.state
            )));
        }
        MooClient::connect("localhost", instance.port, options).await
    }

    /// Start a headless administrative session (`-e` mode).
    ///
    /// The server reads commands from stdin and creates no network
    /// listener, so the session is not registered in the instance map;
    /// the returned [`EmergencySession`] owns the process.
    ///
    /// This method is instrumented with `tracing`.
    #[tracing::instrument(skip(self, database), fields(server_name = %self.config.name))]
    pub async fn start_emergency(
        &mut self,
        database: impl AsRef<Path>,
    ) -> Result<EmergencySession> {
        let database = database.as_ref();
        let database = std::fs::canonicalize(database)
            .map_err(|_| Error::DatabaseNotFound(database.to_path_buf()))?;

        self.instance_counter += 1;
        let instance_dir = self
            .work_root
            .path()
            .join(format!("instance_{}", self.instance_counter));
        tokio::fs::create_dir_all(&instance_dir)
            .await
            .map_err(|e| Error::Other(format!("Failed to create instance dir: {}", e)))?;

        let input_db = instance_dir.join("input.db");
        tokio::fs::copy(&database, &input_db)
            .await
            .map_err(|e| Error::Other(format!("Failed to copy database: {}", e)))?;
        let output_db = instance_dir.join("output.db");

        tracing::info!(binary = ?self.config.binary, "Spawning emergency-mode process");
        let mut child = Command::new(&self.config.binary)
            .arg("-e")
            .arg(&input_db)
            .arg(&output_db)
            .current_dir(&instance_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to start process: {}", e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Process("Failed to get stdin pipe".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Process("Failed to get stdout pipe".to_string()))?;

        Ok(EmergencySession {
            child,
            stdin: Some(stdin),
            stdout,
            output_db,
            work_dir: instance_dir,
        })
    }
}

impl Drop for ServerManager {
    fn drop(&mut self) {
        // Last-resort cleanup: kill anything still live so a panicking
        // test cannot leak server processes. Graceful stops must happen
        // before drop; this path gives no flush guarantee.
        for instance in self.instances.values_mut() {
            if let Some(mut child) = instance.child.take() {
                if matches!(child.try_status(), Ok(None)) {
                    tracing::warn!(pid = instance.pid, "Killing leaked server instance on drop");
                    let _ = child.kill();
                }
            }
        }
    }
}
