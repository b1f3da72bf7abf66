use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn unknown() -> String {
    "unknown".to_string()
}

/// Configuration for one server binary under test.
///
/// Describes a target binary and what it claims to support. Immutable once
/// constructed; the feature map is whatever the build system declared and
/// is treated as opaque by the lifecycle manager (runtime detection lives
/// in [`crate::features`]).
///
/// # Examples
///
/// ```
/// use moo_harness::config::ServerConfig;
///
/// let config = ServerConfig::new("./moo")
///     .with_name("candidate")
///     .with_version("1.9.0");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the server binary. Absolute, or resolvable from the
    /// harness's working directory.
    pub binary: PathBuf,

    /// Display name for logs and test ids.
    #[serde(default = "unknown")]
    pub name: String,

    /// Declared version string.
    #[serde(default = "unknown")]
    pub version: String,

    /// Declared feature set (e.g. `{"i64": true, "unicode": true}`).
    #[serde(default)]
    pub features: HashMap<String, Value>,
}

impl ServerConfig {
    /// Create a configuration for a binary with defaults for the rest.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            name: unknown(),
            version: unknown(),
            features: HashMap::new(),
        }
    }

    /// Set the display name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the declared version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

/// A pair of server configurations for persistence or upgrade testing.
///
/// For persistence tests the write and read side are the same binary; for
/// upgrade tests the write side is an older server whose output database
/// the candidate must be able to load.
#[derive(Debug, Clone)]
pub struct ServerPair {
    /// Server that writes the database in the first phase.
    pub write: ServerConfig,
    /// Server that reads it back in the second phase.
    pub read: ServerConfig,
    /// Pair name, e.g. `persistence` or `upgrade_from_waterpoint`.
    pub name: String,
}

impl ServerPair {
    /// True when write and read use different binaries.
    pub fn is_upgrade(&self) -> bool {
        self.write.binary != self.read.binary
    }

    /// True when this pair exercises a single binary's own persistence.
    pub fn is_persistence(&self) -> bool {
        !self.is_upgrade()
    }
}

/// Top-level harness configuration.
///
/// # JSON Schema
///
/// ```json
/// {
///   "mooBinary": "./moo",
///   "priors": {
///     "waterpoint": "../waterpoint/moo"
///   },
///   "trace": false
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarnessConfig {
    /// Path to the candidate server binary.
    pub moo_binary: Option<PathBuf>,

    /// Prior server versions for upgrade testing, keyed by name.
    #[serde(default)]
    pub priors: HashMap<String, PathBuf>,

    /// Record protocol transcripts on every connection by default.
    #[serde(default)]
    pub trace: bool,
}

impl HarnessConfig {
    /// Loads a configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// * The file cannot be read
    /// * The file contents are not valid JSON
    /// * The JSON does not conform to the expected schema
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigParse(format!("Failed to read config file: {}", e)))?;

        Self::parse_from_str(&content)
    }

    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid JSON or does not
    /// conform to the expected schema.
    pub fn parse_from_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| Error::ConfigParse(format!("Failed to parse JSON config: {}", e)))
    }

    /// The candidate server configuration, if a binary is set.
    pub fn candidate(&self) -> Option<ServerConfig> {
        self.moo_binary
            .as_ref()
            .map(|binary| ServerConfig::new(binary).with_name("candidate"))
    }

    /// All test pairs this configuration describes: one persistence pair
    /// for the candidate, plus one upgrade pair per prior version.
    pub fn pairs(&self) -> Vec<ServerPair> {
        let Some(candidate) = self.candidate() else {
            return Vec::new();
        };

        let mut pairs = vec![ServerPair {
            write: candidate.clone(),
            read: candidate.clone(),
            name: "persistence".to_string(),
        }];

        let mut priors: Vec<_> = self.priors.iter().collect();
        priors.sort_by(|a, b| a.0.cmp(b.0));
        for (name, binary) in priors {
            pairs.push(ServerPair {
                write: ServerConfig::new(binary).with_name(name.clone()),
                read: candidate.clone(),
                name: format!("upgrade_from_{}", name),
            });
        }

        pairs
    }
}
