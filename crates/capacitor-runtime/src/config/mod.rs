//! Configuration for the Capacitor runtime.
//!
//! Settings are layered with figment (defaults, profile file, main file,
//! `CAPACITOR_*` environment variables, programmatic merges) and validated
//! before the runtime uses them.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    CapacitorConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingBehavior,
    LoggingConfig, PlatformConfig, ServerConfig,
};
pub use validation::validate_config;
