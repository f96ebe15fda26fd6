//! Configuration schema definitions.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapacitorConfig {
    /// Logging setup and the bridge logging switch.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Platform selection.
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Web view server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Per-plugin configuration sections, keyed by plugin name.
    #[serde(default)]
    pub plugins: HashMap<String, Value>,
}

impl CapacitorConfig {
    /// The section for `plugin`.
    ///
    /// Environment variables arrive lowercased, so a case-insensitive match is
    /// used when there is no exact one.
    pub fn plugin_section(&self, plugin: &str) -> Option<&Value> {
        self.plugins.get(plugin).or_else(|| {
            self.plugins
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(plugin))
                .map(|(_, section)| section)
        })
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Output destination.
    #[serde(default)]
    pub output: LogOutput,

    /// Log file path, required when `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    /// Log file rotation.
    #[serde(default)]
    pub rotation: LogRotation,

    /// Include thread ids.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-module level overrides, e.g. `capacitor_core = "trace"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,

    /// When bridge logging is enabled at all.
    #[serde(default)]
    pub logging_behavior: LoggingBehavior,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            output: LogOutput::default(),
            file_path: None,
            rotation: LogRotation::default(),
            thread_ids: false,
            file_location: false,
            filters: HashMap::new(),
            logging_behavior: LoggingBehavior::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature; otherwise `full` is used.
    Json,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// When the bridge writes logs.
///
/// | Value | Logging |
/// |-------|---------|
/// | `none` | never |
/// | `debug` | debug builds only |
/// | `production` | always |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggingBehavior {
    None,
    #[default]
    Debug,
    Production,
}

impl LoggingBehavior {
    /// Whether logging is on for this build.
    pub fn is_enabled(self) -> bool {
        match self {
            Self::None => false,
            Self::Debug => cfg!(debug_assertions),
            Self::Production => true,
        }
    }
}

// =============================================================================
// Platform / server
// =============================================================================

/// Platform selection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Forces the platform (`web`, `android`, `ios` or a custom name).
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub platform_override: Option<String>,

    /// Environment markers the platform identifier inspects
    /// (`androidBridge`, `webkit.messageHandlers.bridge`).
    #[serde(default)]
    pub markers: Vec<String>,
}

/// Web view server settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Origin the native web view serves the app from. Defaults per platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webview_server_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_document_uses_defaults() {
        let config: CapacitorConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, CapacitorConfig::default());
        assert_eq!(config.logging.level, LogLevel::Info);
        assert_eq!(config.logging.logging_behavior, LoggingBehavior::Debug);
    }

    #[test]
    fn override_key_is_renamed() {
        let config: CapacitorConfig =
            serde_json::from_value(json!({"platform": {"override": "electron"}})).unwrap();
        assert_eq!(config.platform.platform_override.as_deref(), Some("electron"));
    }

    #[test]
    fn plugin_section_matches_case_insensitively() {
        let mut config = CapacitorConfig::default();
        config
            .plugins
            .insert("capacitorhttp".into(), json!({"enabled": true}));
        assert_eq!(
            config.plugin_section("CapacitorHttp"),
            Some(&json!({"enabled": true}))
        );
        assert!(config.plugin_section("CapacitorCookies").is_none());
    }

    #[test]
    fn behavior_none_disables_logging() {
        assert!(!LoggingBehavior::None.is_enabled());
        assert!(LoggingBehavior::Production.is_enabled());
    }
}
