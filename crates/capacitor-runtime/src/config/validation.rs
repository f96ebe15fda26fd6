//! Configuration validation.

use serde_json::Value;

use super::error::{ConfigError, ConfigResult};
use super::schema::{CapacitorConfig, LogOutput};

const SERVER_SCHEMES: [&str; 3] = ["http://", "https://", "capacitor://"];

/// Validates the entire configuration.
pub fn validate_config(config: &CapacitorConfig) -> ConfigResult<()> {
    validate_logging(config)?;
    validate_platform(config)?;
    validate_server(config)?;
    validate_plugins(config)?;
    Ok(())
}

fn validate_logging(config: &CapacitorConfig) -> ConfigResult<()> {
    if config.logging.output == LogOutput::File && config.logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.output = \"file\" requires logging.file_path",
        ));
    }
    if let Some(module) = config.logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Empty module name in logging.filters: {module:?}"
        )));
    }
    Ok(())
}

fn validate_platform(config: &CapacitorConfig) -> ConfigResult<()> {
    if let Some(name) = &config.platform.platform_override
        && name.trim().is_empty()
    {
        return Err(ConfigError::validation("platform.override must not be empty"));
    }
    Ok(())
}

fn validate_server(config: &CapacitorConfig) -> ConfigResult<()> {
    let Some(url) = &config.server.webview_server_url else {
        return Ok(());
    };
    if !SERVER_SCHEMES.iter().any(|scheme| url.starts_with(scheme)) {
        return Err(ConfigError::validation(format!(
            "server.webview_server_url must start with one of {SERVER_SCHEMES:?}, got {url:?}"
        )));
    }
    if url.ends_with('/') {
        return Err(ConfigError::validation(format!(
            "server.webview_server_url must not end with '/': {url:?}"
        )));
    }
    Ok(())
}

fn validate_plugins(config: &CapacitorConfig) -> ConfigResult<()> {
    for (name, section) in &config.plugins {
        if !matches!(section, Value::Object(_) | Value::Null) {
            return Err(ConfigError::validation(format!(
                "plugins.{name} must be a table"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::path::PathBuf;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&CapacitorConfig::default()).is_ok());
    }

    #[test]
    fn file_output_needs_path() {
        let mut config = CapacitorConfig::default();
        config.logging.output = LogOutput::File;
        assert!(validate_config(&config).is_err());

        config.logging.file_path = Some(PathBuf::from("logs/capacitor.log"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn server_url_scheme_and_trailing_slash() {
        let mut config = CapacitorConfig::default();
        config.server.webview_server_url = Some("localhost".into());
        assert!(validate_config(&config).is_err());

        config.server.webview_server_url = Some("capacitor://localhost/".into());
        assert!(validate_config(&config).is_err());

        config.server.webview_server_url = Some("capacitor://localhost".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn plugin_sections_must_be_tables() {
        let mut config = CapacitorConfig::default();
        config.plugins.insert("CapacitorHttp".into(), json!(true));
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("plugins.CapacitorHttp"));
    }

    #[test]
    fn blank_override_is_rejected() {
        let mut config = CapacitorConfig::default();
        config.platform.platform_override = Some("  ".into());
        assert!(validate_config(&config).is_err());
    }
}
