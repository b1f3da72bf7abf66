use crate::config::{HarnessConfig, ServerConfig};
use crate::error::{Error, Result};

/// Validates a single server configuration
pub fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.binary.as_os_str().is_empty() {
        return Err(Error::ConfigValidation(format!(
            "Server '{}' has empty binary path",
            config.name
        )));
    }

    if !config.binary.exists() {
        return Err(Error::ConfigValidation(format!(
            "Server '{}' binary does not exist: {}",
            config.name,
            config.binary.display()
        )));
    }

    if !config.binary.is_file() {
        return Err(Error::ConfigValidation(format!(
            "Server '{}' binary is not a file: {}",
            config.name,
            config.binary.display()
        )));
    }

    Ok(())
}

/// Full harness configuration validation
pub fn validate_config(config: &HarnessConfig) -> Result<()> {
    let Some(candidate) = config.candidate() else {
        return Err(Error::ConfigValidation(
            "No candidate binary configured".to_string(),
        ));
    };
    validate_server_config(&candidate)?;

    for (name, binary) in &config.priors {
        let prior = ServerConfig::new(binary).with_name(name.clone());
        validate_server_config(&prior)?;
    }

    Ok(())
}
