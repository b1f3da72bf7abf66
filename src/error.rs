/// Error handling module for the MOO harness.
///
/// This module defines the error types used throughout the library.
/// Errors fall into three tiers: startup failures (the server never became
/// ready), transport/process faults (the harness itself broke), and
/// configuration problems. Protocol-level failures from the server under
/// test are *not* errors — they are classified values returned by
/// [`crate::protocol::EvalOutcome`], because tests assert on them
/// deliberately.
///
/// # Example
///
/// ```
/// use moo_harness::error::{Error, Result};
///
/// fn handle_error(result: Result<()>) {
///     match result {
///         Ok(_) => println!("Operation succeeded"),
///         Err(Error::Startup { reason, .. }) => println!("Server never came up: {}", reason),
///         Err(Error::Transport(msg)) => println!("Connection broke: {}", msg),
///         Err(Error::Timeout(msg)) => println!("Operation timed out: {}", msg),
///         Err(e) => println!("Other error: {}", e),
///     }
/// }
/// ```
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur in the moo-harness library.
///
/// Each variant includes context information to help diagnose and handle
/// the error appropriately.
#[derive(Error, Debug)]
pub enum Error {
    /// The server process failed to start or never became ready.
    ///
    /// This error occurs when:
    /// - The process could not bind its listening port
    /// - Readiness was not observed within the startup timeout
    ///
    /// The captured server log is included so the failure can be diagnosed
    /// without keeping the working directory around.
    #[error("Server failed to start: {reason}\n--- server log ---\n{log}")]
    Startup {
        /// Why startup was declared failed.
        reason: String,
        /// Contents of the server log at the time of failure.
        log: String,
    },

    /// The input database file does not exist.
    ///
    /// This error occurs when:
    /// - `start()` is given a database path that cannot be found
    #[error("Database not found: {0}")]
    DatabaseNotFound(PathBuf),

    /// Error when spawning, signaling, or reaping a server process.
    ///
    /// This error occurs when:
    /// - The binary cannot be executed
    /// - A termination signal cannot be delivered
    /// - Waiting for process exit fails
    #[error("Server process error: {0}")]
    Process(String),

    /// Error in the transport layer to a running server.
    ///
    /// This error occurs when:
    /// - The connection is refused or reset
    /// - A read or write on the socket fails
    ///
    /// Transport faults are deliberately distinct from protocol-level
    /// failures: a refused connection is a harness fault, while a MOO
    /// traceback is an expected, classifiable result.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An operation was attempted on a client that is not connected.
    ///
    /// This error occurs when:
    /// - `send()` or `eval()` is called after `close()`
    #[error("Not connected")]
    NotConnected,

    /// An evaluation that was required to succeed did not.
    ///
    /// This error occurs when:
    /// - `eval_expect()` receives a non-success outcome
    #[error("Evaluation failed: {0}")]
    Eval(String),

    /// Requested instance was not found in the manager's registry.
    ///
    /// This error occurs when:
    /// - An `InstanceId` is used that does not match any known instance
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Operation timed out.
    ///
    /// This error occurs when:
    /// - A connection attempt exceeds its deadline
    /// - A response is expected but does not arrive in time
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Failed to parse configuration from a file or string.
    ///
    /// This error occurs when:
    /// - The configuration JSON is malformed
    /// - Required fields are missing or have the wrong type
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration parsed but contains values that fail validation.
    ///
    /// This error occurs when:
    /// - The server binary path does not exist
    /// - A path that must be a file is a directory
    #[error("Config validation error: {0}")]
    ConfigValidation(String),

    /// Any other error not covered by the above categories.
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for moo-harness operations.
///
/// This is a convenience type alias for `std::result::Result` with the
/// `Error` type from this module.
pub type Result<T> = std::result::Result<T, Error>;
