//! # Capacitor
//!
//! A cross-platform plugin bridge. Application code calls plugins through one
//! handle; each call is routed to the native host when it publishes the
//! method, or to an in-process fallback implementation otherwise.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────┐     ┌──────────────────────────────┐
//! │  Capacitor   │────▶│ PluginRegistry │────▶│ PluginHandle "CapacitorHttp" │──▶ native bridge
//! │  (runtime)   │     │                │────▶│ PluginHandle "Device"        │──▶ fallback (lazy)
//! └──────────────┘     └────────────────┘     └──────────────────────────────┘
//! ```
//!
//! - **Runtime**: configuration, logging, platform selection, global instance
//! - **Registry**: one handle per plugin name
//! - **Handle**: per-call routing between native host and fallback
//! - **Fallback**: a `WebImplementation` with its own listener registry
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use capacitor::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cap = Capacitor::builder().build()?.install()?;
//!     let plugins = register_core_plugins(cap.registry());
//!
//!     let response = plugins
//!         .http
//!         .get(&HttpOptions::new("https://example.com"))
//!         .await?;
//!     println!("{} on {}", response.status, cap.get_platform());
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: TOML configuration files (default)
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use capacitor_core as core;
pub use capacitor_plugins as plugins;
pub use capacitor_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use capacitor::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use capacitor_runtime::{Capacitor, CapacitorConfig, CapacitorPlatforms};

    // Plugin registration and calls
    pub use capacitor_core::{
        ImplementationContext, Implementations, PlatformId, PluginHandle, PluginRegistry,
    };

    // Writing fallbacks
    pub use capacitor_core::{MethodTable, WebImplementation, WebPlugin};

    // Errors and listeners
    pub use capacitor_core::{
        CapacitorException, ExceptionCode, PluginListenerHandle, PluginResult,
    };

    // Native hosts
    pub use capacitor_core::{InProcessBridge, NativeBridge, NativePlugin, async_trait};

    // Built-in plugins
    pub use capacitor_plugins::{
        CapacitorCookies, CapacitorHttp, HttpOptions, HttpResponse, SetCookieOptions, WebView,
        register_core_plugins,
    };
}
