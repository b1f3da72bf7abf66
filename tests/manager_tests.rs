#![cfg(unix)]

use moo_harness::config::ServerConfig;
use moo_harness::error::Error;
use moo_harness::{ServerManager, ServerState, StartOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;

/// Write an executable fake AUT script into `dir`.
///
/// The scripts mimic the real server's command line
/// (`-l <log> <input> <output> -p <port>`) closely enough for the
/// lifecycle manager: they parse the same arguments, write the same
/// readiness line to the log, and react to SIGTERM per the script body.
fn write_fake_aut(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join("fake-moo.sh");
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// A fake AUT that declares `listen_port` as its bound port and, on
/// SIGTERM, "flushes" by copying the input database to the output path.
fn flushing_aut(listen_port: u16) -> String {
    format!(
        r#"#!/bin/sh
log=""
rest=""
while [ $# -gt 0 ]; do
  case "$1" in
    -l) log="$2"; shift 2 ;;
    -p) shift 2 ;;
    *) rest="$rest $1"; shift ;;
  esac
done
set -- $rest
input="$1"
output="$2"
echo "LISTEN: #0 now listening on port {listen_port}" > "$log"
trap 'cp "$input" "$output"; exit 0' TERM
while true; do sleep 1; done
"#,
        listen_port = listen_port
    )
}

/// A fake AUT that ignores SIGTERM entirely and never flushes.
fn stubborn_aut(listen_port: u16) -> String {
    format!(
        r#"#!/bin/sh
log=""
while [ $# -gt 0 ]; do
  case "$1" in
    -l) log="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "LISTEN: #0 now listening on port {listen_port}" > "$log"
trap '' TERM
while true; do sleep 1; done
"#,
        listen_port = listen_port
    )
}

/// Opt-in log output for debugging, e.g. `RUST_LOG=moo_harness=debug`.
fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

fn write_database(dir: &Path) -> PathBuf {
    let db = dir.join("minimal.db");
    std::fs::write(&db, "minimal database contents\n").unwrap();
    db
}

/// Hold a listener open so the manager's connect probe succeeds against
/// the port the fake AUT declared.
async fn hold_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

#[tokio::test]
async fn start_then_graceful_stop_flushes_output() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (_listener, port) = hold_port().await;
    let binary = write_fake_aut(dir.path(), &flushing_aut(port));
    let database = write_database(dir.path());

    let config = ServerConfig::new(&binary).with_name("fake");
    let mut manager = ServerManager::new(config).unwrap();

    let id = manager
        .start(&database, StartOptions::default())
        .await
        .unwrap();
    let instance = manager.instance(id).unwrap();
    assert_eq!(instance.state(), ServerState::Running);
    assert_eq!(instance.port(), port);
    assert!(instance.input_db().exists());

    let output_db = manager.stop(id, Duration::from_secs(5)).await.unwrap();
    assert!(output_db.exists(), "graceful stop must flush the database");
    assert_eq!(
        std::fs::read_to_string(&output_db).unwrap(),
        "minimal database contents\n"
    );
    assert_eq!(manager.instance(id).unwrap().state(), ServerState::Stopped);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let (_listener, port) = hold_port().await;
    let binary = write_fake_aut(dir.path(), &flushing_aut(port));
    let database = write_database(dir.path());

    let mut manager = ServerManager::new(ServerConfig::new(&binary)).unwrap();
    let id = manager
        .start(&database, StartOptions::default())
        .await
        .unwrap();

    let first = manager.stop(id, Duration::from_secs(5)).await.unwrap();
    let second = manager.stop(id, Duration::from_secs(5)).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn forced_kill_skips_the_flush() {
    let dir = tempfile::tempdir().unwrap();
    let (_listener, port) = hold_port().await;
    let binary = write_fake_aut(dir.path(), &stubborn_aut(port));
    let database = write_database(dir.path());

    let mut manager = ServerManager::new(ServerConfig::new(&binary)).unwrap();
    let id = manager
        .start(&database, StartOptions::default())
        .await
        .unwrap();

    // The script ignores SIGTERM, so this stop must escalate to SIGKILL
    let output_db = manager
        .stop(id, Duration::from_millis(500))
        .await
        .unwrap();
    assert!(
        !output_db.exists(),
        "forced kill must not produce an output database"
    );
    assert_eq!(manager.instance(id).unwrap().state(), ServerState::Stopped);
}

#[tokio::test]
async fn startup_timeout_is_fatal_and_unregistered() {
    let dir = tempfile::tempdir().unwrap();
    // Never writes the log, never listens
    let binary = write_fake_aut(dir.path(), "#!/bin/sh\nsleep 30\n");
    let database = write_database(dir.path());

    let mut manager = ServerManager::new(ServerConfig::new(&binary)).unwrap();
    manager.set_startup_timeout(Duration::from_millis(500));

    let result = manager.start(&database, StartOptions::default()).await;
    match result {
        Err(Error::Startup { reason, .. }) => {
            assert!(reason.contains("no listen signal"));
        }
        other => panic!("expected Error::Startup, got {:?}", other.map(|_| ())),
    }
    assert!(manager.instance_ids().is_empty());
}

#[tokio::test]
async fn bind_failure_carries_log_context() {
    let dir = tempfile::tempdir().unwrap();
    let binary = write_fake_aut(
        dir.path(),
        r#"#!/bin/sh
log=""
while [ $# -gt 0 ]; do
  case "$1" in
    -l) log="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "*** Can't bind: Address already in use" > "$log"
exit 1
"#,
    );
    let database = write_database(dir.path());

    let mut manager = ServerManager::new(ServerConfig::new(&binary)).unwrap();
    manager.set_startup_timeout(Duration::from_secs(2));

    match manager.start(&database, StartOptions::default()).await {
        Err(Error::Startup { reason, log }) => {
            assert!(reason.contains("bind"));
            assert!(log.contains("Address already in use"));
        }
        other => panic!("expected Error::Startup, got {:?}", other.map(|_| ())),
    }
    assert!(manager.instance_ids().is_empty());
}

#[tokio::test]
async fn missing_database_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let (_listener, port) = hold_port().await;
    let binary = write_fake_aut(dir.path(), &flushing_aut(port));

    let mut manager = ServerManager::new(ServerConfig::new(&binary)).unwrap();
    let result = manager
        .start(dir.path().join("no-such.db"), StartOptions::default())
        .await;
    assert!(matches!(result, Err(Error::DatabaseNotFound(_))));
}

#[tokio::test]
async fn stop_all_tolerates_mixed_states() {
    let dir = tempfile::tempdir().unwrap();
    let (_listener, port) = hold_port().await;
    let binary = write_fake_aut(dir.path(), &flushing_aut(port));
    let database = write_database(dir.path());

    let mut manager = ServerManager::new(ServerConfig::new(&binary)).unwrap();
    let first = manager
        .start(&database, StartOptions::default())
        .await
        .unwrap();
    let second = manager
        .start(&database, StartOptions::default())
        .await
        .unwrap();

    // One instance already stopped before the sweep
    manager.stop(first, Duration::from_secs(5)).await.unwrap();
    manager.stop_all().await;

    for id in [first, second] {
        assert_eq!(manager.instance(id).unwrap().state(), ServerState::Stopped);
    }
}

#[tokio::test]
async fn instances_are_isolated_and_ports_distinct() {
    let dir = tempfile::tempdir().unwrap();
    let (_listener_a, port_a) = hold_port().await;
    let (_listener_b, port_b) = hold_port().await;

    let binary_a = {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("fake-a.sh");
        std::fs::write(&path, flushing_aut(port_a)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    };
    let binary_b = {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.path().join("fake-b.sh");
        std::fs::write(&path, flushing_aut(port_b)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    };
    let database = write_database(dir.path());

    // An old-version "writer" and a new-version "reader" side by side
    let mut writer = ServerManager::new(ServerConfig::new(&binary_a).with_name("old")).unwrap();
    let mut reader = ServerManager::new(ServerConfig::new(&binary_b).with_name("new")).unwrap();

    let writer_id = writer
        .start(&database, StartOptions::default())
        .await
        .unwrap();
    let reader_id = reader
        .start(&database, StartOptions::default())
        .await
        .unwrap();

    let writer_instance = writer.instance(writer_id).unwrap();
    let reader_instance = reader.instance(reader_id).unwrap();
    assert_ne!(writer_instance.port(), reader_instance.port());
    assert_ne!(writer_instance.work_dir(), reader_instance.work_dir());

    writer.stop_all().await;
    reader.stop_all().await;
}

#[tokio::test]
async fn emergency_session_runs_headless() {
    let dir = tempfile::tempdir().unwrap();
    let binary = write_fake_aut(
        dir.path(),
        r#"#!/bin/sh
# args: -e input output
shift
input="$1"
output="$2"
while read line; do
  echo "ok: $line"
done
cp "$input" "$output"
"#,
    );
    let database = write_database(dir.path());

    let mut manager = ServerManager::new(ServerConfig::new(&binary)).unwrap();
    let mut session = manager.start_emergency(&database).await.unwrap();

    session.send_command("help").await.unwrap();
    let output = session
        .read_output(Duration::from_millis(300))
        .await
        .unwrap();
    assert!(output.contains("ok: help"));

    let output_db = session.finish(Duration::from_secs(5)).await.unwrap();
    assert!(output_db.exists());
    assert_eq!(
        std::fs::read_to_string(&output_db).unwrap(),
        "minimal database contents\n"
    );
}
