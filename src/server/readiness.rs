//! Startup readiness probes.
//!
//! A freshly spawned server declares its bound port in its log file
//! (`LISTEN: #0 now listening on port N`) — with ephemeral allocation
//! (`-p 0`) the log is the only place the real port can be learned, and
//! scanning it is race-free where a port counter is not. A known port is
//! still not the same as a ready server, so the log scan is followed by an
//! actual TCP connect probe.

use crate::retry::{RetryPolicy, Sleeper, poll_until};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;
use tokio::net::TcpStream;

/// `LISTEN: #0 now listening on port 43521`
static LISTEN_PORT_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"now listening on port (\d+)").unwrap());

/// Substring the server logs when it cannot bind its endpoint.
const BIND_FAILURE_MARKER: &str = "Address already in use";

/// Per-attempt budget for the TCP connect probe.
const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// What the log scan observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogSignal {
    /// The server declared its bound port.
    Listening(u16),
    /// The server reported it could not bind.
    BindFailure,
}

/// Poll the server log until it declares a bound port or a bind failure.
///
/// Returns `None` when the policy's budget elapses without either signal.
pub(crate) async fn scan_log_for_port(
    log_file: &Path,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> Option<LogSignal> {
    poll_until(policy, sleeper, || async move {
        let content = tokio::fs::read_to_string(log_file).await.ok()?;
        if let Some(caps) = LISTEN_PORT_PATTERN.captures(&content) {
            if let Ok(port) = caps[1].parse::<u16>() {
                return Some(LogSignal::Listening(port));
            }
        }
        if content.contains(BIND_FAILURE_MARKER) {
            return Some(LogSignal::BindFailure);
        }
        None
    })
    .await
}

/// Poll until a TCP connect to `port` on localhost succeeds.
///
/// Returns `false` when the policy's budget elapses without a successful
/// connect.
pub(crate) async fn wait_for_connectable(
    port: u16,
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
) -> bool {
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);
    poll_until(policy, sleeper, || async move {
        match tokio::time::timeout(CONNECT_PROBE_TIMEOUT, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Some(()),
            _ => None,
        }
    })
    .await
    .is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::TokioSleeper;
    use std::io::Write;

    fn quick_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(300), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn finds_declared_port_in_log() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("server.log");
        let mut file = std::fs::File::create(&log).unwrap();
        writeln!(file, "Jan 01 00:00:00: STARTING: Version 1.9.0").unwrap();
        writeln!(file, "Jan 01 00:00:00: LISTEN: #0 now listening on port 43521").unwrap();

        let signal = scan_log_for_port(&log, &quick_policy(), &TokioSleeper).await;
        assert_eq!(signal, Some(LogSignal::Listening(43521)));
    }

    #[tokio::test]
    async fn detects_bind_failure() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("server.log");
        std::fs::write(&log, "*** Can't bind: Address already in use\n").unwrap();

        let signal = scan_log_for_port(&log, &quick_policy(), &TokioSleeper).await;
        assert_eq!(signal, Some(LogSignal::BindFailure));
    }

    #[tokio::test]
    async fn missing_log_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("never-written.log");

        let signal = scan_log_for_port(&log, &quick_policy(), &TokioSleeper).await;
        assert_eq!(signal, None);
    }

    #[tokio::test]
    async fn connect_probe_succeeds_against_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(wait_for_connectable(port, &quick_policy(), &TokioSleeper).await);
    }

    #[tokio::test]
    async fn connect_probe_gives_up_on_closed_port() {
        // Bind then drop to get a port that is very likely closed.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert!(!wait_for_connectable(port, &quick_policy(), &TokioSleeper).await);
    }
}
