//! Configuration loader using figment.
//!
//! # Feature Flags
//!
//! - `toml-config` *(default)*: `capacitor.toml`, `capacitor.config.toml`
//! - `yaml-config`: `capacitor.yaml`, `capacitor.yml`
//!
//! # Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Profile file (`capacitor.{profile}.toml`)
//! 3. Main file (`capacitor.toml`)
//! 4. Environment variables (`CAPACITOR_*`)
//! 5. Programmatic merges
//!
//! # Environment Variable Mapping
//!
//! `__` separates nesting levels and keys are lowercased:
//!
//! - `CAPACITOR_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `CAPACITOR_PLATFORM__OVERRIDE=android` → `platform.override = "android"`
//! - `CAPACITOR_PLUGINS__CAPACITORHTTP__TIMEOUT=5000` → `plugins.capacitorhttp.timeout = 5000`
//!
//! # Example
//!
//! ```rust,ignore
//! use capacitor_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .file("./capacitor.toml")
//!     .load()?;
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use figment::Figment;
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use tracing::{debug, info, trace};

use super::error::{ConfigError, ConfigResult};
use super::schema::CapacitorConfig;
use super::validation::validate_config;

const ENV_PREFIX: &str = "CAPACITOR_";

/// Configuration profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    #[default]
    Development,
    Production,
    Custom(String),
}

impl Profile {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `CAPACITOR_PROFILE`, defaulting to development.
    pub fn from_env() -> Self {
        std::env::var("CAPACITOR_PROFILE")
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Multi-source configuration loader.
pub struct ConfigLoader {
    overrides: Figment,
    profile: Profile,
    search_paths: Vec<PathBuf>,
    load_env: bool,
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a directory to search for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Loads exactly this file instead of searching.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a full configuration over every other source.
    pub fn merge(mut self, config: CapacitorConfig) -> Self {
        self.overrides = self.overrides.merge(Serialized::defaults(config));
        self
    }

    /// Sets a single key, e.g. `("platform.override", "web")`.
    pub fn set<V: serde::Serialize>(mut self, key: &str, value: V) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Loads, extracts and validates the configuration.
    pub fn load(self) -> ConfigResult<CapacitorConfig> {
        let profile = self.profile.clone();
        let config: CapacitorConfig = self.figment()?.extract()?;
        validate_config(&config)?;

        debug!(
            profile = %profile,
            level = %config.logging.level.as_str(),
            plugins = config.plugins.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Builds the layered figment without extracting it.
    pub fn figment(self) -> ConfigResult<Figment> {
        let mut figment = Figment::from(Serialized::defaults(CapacitorConfig::default()));

        match &self.config_file {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_file(figment, path)?;
            }
            Some(path) => return Err(ConfigError::FileNotFound(path.clone())),
            None => figment = self.search_files(figment),
        }

        if self.load_env {
            trace!(prefix = ENV_PREFIX, "Loading environment variables");
            figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        }

        Ok(figment.merge(self.overrides))
    }

    fn merge_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            other => Err(ConfigError::UnsupportedFormat(other.to_string())),
        }
    }

    fn resolved_search_paths(&self) -> Vec<PathBuf> {
        if !self.search_paths.is_empty() {
            return self.search_paths.clone();
        }
        let mut paths = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("capacitor"));
        }
        paths
    }

    /// Merges the first base file found (and its profile variant) for every
    /// enabled format.
    fn search_files(&self, mut figment: Figment) -> Figment {
        let mut candidates: Vec<&str> = Vec::new();
        #[cfg(feature = "toml-config")]
        candidates.extend(["capacitor.toml", "capacitor.config.toml"]);
        #[cfg(feature = "yaml-config")]
        candidates.extend(["capacitor.yaml", "capacitor.yml"]);

        let mut found = false;
        'search: for dir in self.resolved_search_paths() {
            for base_name in &candidates {
                let Some((stem, ext)) = base_name.rsplit_once('.') else {
                    continue;
                };
                let profile_path = dir.join(format!("{stem}.{}.{ext}", self.profile.as_str()));
                let base_path = dir.join(base_name);
                if !base_path.exists() {
                    continue;
                }
                if profile_path.exists() {
                    debug!(path = %profile_path.display(), "Loading profile configuration");
                    figment = Self::merge_file(figment.clone(), &profile_path).unwrap_or(figment);
                }
                info!(path = %base_path.display(), "Loading configuration file");
                figment = Self::merge_file(figment.clone(), &base_path).unwrap_or(figment);
                found = true;
                break 'search;
            }
        }

        if !found {
            debug!("No configuration file found, using defaults");
        }
        figment
    }
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<CapacitorConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from `path` plus environment variables.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<CapacitorConfig> {
    ConfigLoader::new().file(path).load()
}
