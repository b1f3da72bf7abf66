//! Configuration module for the MOO harness.
//!
//! This module handles parsing, validation, and access to configuration
//! for the servers under test. It supports loading configuration from
//! files or strings in JSON format.
//!
//! # Examples
//!
//! Loading a configuration from a file:
//!
//! ```no_run
//! use moo_harness::config::HarnessConfig;
//!
//! let config = HarnessConfig::from_file("harness.json").unwrap();
//! println!("Candidate binary: {:?}", config.moo_binary);
//! ```
//!
//! Creating a server configuration programmatically:
//!
//! ```
//! use moo_harness::config::ServerConfig;
//!
//! let config = ServerConfig::new("/usr/local/bin/moo");
//! assert_eq!(config.name, "unknown");
//! ```
mod parser;
pub mod validator;

pub use parser::{HarnessConfig, ServerConfig, ServerPair};
pub use validator::validate_config;
