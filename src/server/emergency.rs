//! Headless/administrative server sessions.
//!
//! In emergency wizard mode (`-e`) the server creates no network listener
//! and reads commands from standard input instead. The session owns the
//! child's stdio pipes; there is no port, no readiness probe, and no
//! protocol classifier — output is raw text for the caller to inspect.

use crate::error::{Error, Result};
use async_process::{Child, ChildStdin, ChildStdout};
use futures_lite::io::{AsyncReadExt, AsyncWriteExt};
use std::path::PathBuf;
use std::time::Duration;

use super::instance::force_kill;

/// A headless administrative session with a server started in `-e` mode.
///
/// Commands are written to the child's stdin; output is read from its
/// stdout with bounded reads. [`finish`](EmergencySession::finish) closes
/// stdin (the server's cue to save and exit), waits for exit, and returns
/// the output database path.
pub struct EmergencySession {
    pub(crate) child: Child,
    pub(crate) stdin: Option<ChildStdin>,
    pub(crate) stdout: ChildStdout,
    pub(crate) output_db: PathBuf,
    pub(crate) work_dir: PathBuf,
}

impl EmergencySession {
    /// Path where the server will write its database when the session ends.
    pub fn output_db(&self) -> &PathBuf {
        &self.output_db
    }

    /// The session's isolated working directory.
    pub fn work_dir(&self) -> &PathBuf {
        &self.work_dir
    }

    /// Write one command line to the server's stdin.
    pub async fn send_command(&mut self, command: &str) -> Result<()> {
        let stdin = self.stdin.as_mut().ok_or(Error::NotConnected)?;
        let mut line = command.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| Error::Transport(format!("write to server stdin failed: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("flush to server stdin failed: {}", e)))?;
        Ok(())
    }

    /// Read whatever the server printed within `window`.
    pub async fn read_output(&mut self, window: Duration) -> Result<String> {
        let mut collected: Vec<u8> = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match tokio::time::timeout(window, self.stdout.read(&mut chunk)).await {
                Err(_) => break,
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => collected.extend_from_slice(&chunk[..n]),
                Ok(Err(e)) => {
                    return Err(Error::Transport(format!(
                        "read from server stdout failed: {}",
                        e
                    )));
                }
            }
        }
        Ok(String::from_utf8_lossy(&collected).into_owned())
    }

    /// End the session: close stdin, wait up to `timeout` for exit, then
    /// force-kill. Returns the output database path either way.
    pub async fn finish(mut self, timeout: Duration) -> Result<PathBuf> {
        // Closing stdin is the exit cue in emergency mode
        drop(self.stdin.take());

        match tokio::time::timeout(timeout, self.child.status()).await {
            Ok(status) => {
                status.map_err(|e| Error::Process(format!("Failed to reap session: {}", e)))?;
            }
            Err(_) => {
                tracing::warn!("Emergency session did not exit after stdin close, killing");
                force_kill(&mut self.child).await?;
            }
        }

        Ok(self.output_db)
    }
}
