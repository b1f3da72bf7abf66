//! Server instance types and process-level machinery.
//!
//! The lifecycle manager itself lives at the crate root
//! ([`crate::ServerManager`]); this module holds what it manages: the
//! per-instance state ([`ServerInstance`], [`ServerState`], [`InstanceId`]),
//! the readiness probes used during startup, and the headless
//! administrative session mode.

pub(crate) mod emergency;
pub(crate) mod instance;
pub(crate) mod readiness;

pub use emergency::EmergencySession;
pub use instance::{InstanceId, ServerInstance, ServerState};
