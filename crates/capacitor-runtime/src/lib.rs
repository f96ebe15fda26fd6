//! Capacitor Runtime - application layer for the Capacitor bridge.
//!
//! This crate provides:
//! - The `Capacitor` runtime object and its process-wide instance
//! - Layered configuration (`capacitor.toml`, `CAPACITOR_*` environment)
//! - Logging setup driven by configuration
//! - Custom web-hosted platforms
//!
//! ```ignore
//! use capacitor_runtime::Capacitor;
//!
//! fn main() -> anyhow::Result<()> {
//!     let cap = Capacitor::builder().build()?.install()?;
//!
//!     if cap.is_native_platform() {
//!         println!("{}", cap.convert_file_src("/data/photo.jpg"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! level = "debug"
//! logging_behavior = "debug"
//!
//! [platform]
//! override = "android"
//!
//! [plugins.CapacitorHttp]
//! user_agent = "my-app/1.0"
//! ```
//!
//! Plugin sections are handed to the matching plugin's fallback factory
//! through `ImplementationContext::config`.

pub mod config;
pub mod error;
pub mod logging;
pub mod platforms;
pub mod runtime;

// Re-exports
pub use config::{
    CapacitorConfig, ConfigError, ConfigLoader, ConfigResult, LoggingConfig, Profile,
};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::LoggingBuilder;
pub use platforms::CapacitorPlatforms;
pub use runtime::{Capacitor, CapacitorBuilder};

pub use tracing;
