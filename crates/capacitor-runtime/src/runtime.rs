//! The `Capacitor` runtime object.
//!
//! Ties configuration, platform resolution and the plugin registry together
//! and exposes the application-facing global API.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use capacitor_runtime::Capacitor;
//!
//! let cap = Capacitor::builder()
//!     .config_file("capacitor.toml")
//!     .bridge(native_bridge)
//!     .build()?;
//!
//! let device = cap.register_plugin("Device", implementations);
//! println!("running on {}", cap.get_platform());
//! ```
//!
//! # Platform Resolution
//!
//! First match wins:
//!
//! 1. `platform.override` from configuration
//! 2. the custom platform selected in [`CapacitorPlatforms`]
//! 3. bridge markers of the environment (explicit [`Environment`], or the
//!    configured `platform.markers` plus the attached bridge's own marker)
//! 4. `web`

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use capacitor_core::{
    ANDROID_BRIDGE_MARKER, Environment, EventTarget, IOS_BRIDGE_MARKER, Implementations,
    MarkerSet, NativeBridge, PlatformId, PlatformResolver, PluginHandle, PluginRegistry,
};
use tracing::{debug, info};

use crate::config::{CapacitorConfig, ConfigLoader, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::platforms::CapacitorPlatforms;

static GLOBAL: OnceLock<Arc<Capacitor>> = OnceLock::new();

/// The application-facing runtime.
pub struct Capacitor {
    config: CapacitorConfig,
    registry: PluginRegistry,
    server_url: String,
}

impl Capacitor {
    pub fn builder() -> CapacitorBuilder {
        CapacitorBuilder::new()
    }

    /// Builds a runtime from an already loaded configuration, without a
    /// native bridge and without touching logging.
    pub fn from_config(config: CapacitorConfig) -> RuntimeResult<Self> {
        Self::builder().config(config).init_logging(false).build()
    }

    pub fn config(&self) -> &CapacitorConfig {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn platform(&self) -> &PlatformId {
        self.registry.platform()
    }

    /// The platform name: `android`, `ios`, `web` or a custom name.
    pub fn get_platform(&self) -> String {
        self.platform().to_string()
    }

    pub fn is_native_platform(&self) -> bool {
        self.platform().is_native()
    }

    pub fn is_plugin_available(&self, name: &str) -> bool {
        self.registry.is_plugin_available(name)
    }

    /// Registers a plugin. See [`PluginRegistry::register`].
    pub fn register_plugin(&self, name: &str, implementations: Implementations) -> PluginHandle {
        self.registry.register(name, implementations)
    }

    pub fn get_plugin(&self, name: &str) -> Option<PluginHandle> {
        self.registry.get(name)
    }

    /// Every registered plugin by name.
    pub fn plugins(&self) -> HashMap<String, PluginHandle> {
        self.registry.plugins()
    }

    /// Whether bridge logging is on, per `logging.logging_behavior`.
    pub fn is_logging_enabled(&self) -> bool {
        self.config.logging.logging_behavior.is_enabled()
    }

    /// The origin local files are served from on native platforms.
    pub fn webview_server_url(&self) -> &str {
        &self.server_url
    }

    /// Rewrites a device file path into a URL the web view can load.
    ///
    /// On native platforms absolute paths and `file://` URLs map to
    /// `<server>/_capacitor_file_<path>` and `content://` URLs to
    /// `<server>/_capacitor_content_<path>`. Anything else, and every path
    /// on web-hosted platforms, is returned unchanged.
    pub fn convert_file_src(&self, file_path: &str) -> String {
        if !self.is_native_platform() {
            return file_path.to_string();
        }
        let server = &self.server_url;
        if file_path.starts_with('/') {
            format!("{server}/_capacitor_file_{file_path}")
        } else if let Some(rest) = file_path.strip_prefix("file://") {
            format!("{server}/_capacitor_file_{rest}")
        } else if let Some(rest) = file_path.strip_prefix("content:/") {
            format!("{server}/_capacitor_content_{rest}")
        } else {
            file_path.to_string()
        }
    }

    // ─── Process-wide instance ───────────────────────────────────────────────

    /// Installs `self` as the process-wide runtime. Only the first call
    /// succeeds.
    pub fn install(self) -> RuntimeResult<Arc<Capacitor>> {
        let cap = Arc::new(self);
        GLOBAL
            .set(Arc::clone(&cap))
            .map_err(|_| RuntimeError::AlreadyInstalled)?;
        info!(platform = %cap.platform(), "Capacitor runtime installed");
        Ok(cap)
    }

    /// The process-wide runtime, if one was installed.
    pub fn global() -> Option<Arc<Capacitor>> {
        GLOBAL.get().cloned()
    }
}

impl fmt::Debug for Capacitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capacitor")
            .field("platform", self.platform())
            .field("server_url", &self.server_url)
            .field("registry", &self.registry)
            .finish()
    }
}

fn default_server_url(platform: &PlatformId) -> &'static str {
    match platform {
        PlatformId::Android => "https://localhost",
        PlatformId::Ios => "capacitor://localhost",
        _ => "http://localhost",
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`Capacitor`].
pub struct CapacitorBuilder {
    loader: ConfigLoader,
    config: Option<CapacitorConfig>,
    bridge: Option<Arc<dyn NativeBridge>>,
    window: Option<Arc<dyn EventTarget>>,
    environment: Option<Arc<dyn Environment>>,
    platforms: CapacitorPlatforms,
    init_logging: bool,
}

impl Default for CapacitorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CapacitorBuilder {
    pub fn new() -> Self {
        Self {
            loader: ConfigLoader::new(),
            config: None,
            bridge: None,
            window: None,
            environment: None,
            platforms: CapacitorPlatforms::new(),
            init_logging: true,
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.loader = self.loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.loader = self.loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.loader = self.loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.loader = self.loader.without_env();
        self
    }

    /// Uses `config` instead of loading from files and environment.
    pub fn config(mut self, config: CapacitorConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn bridge(mut self, bridge: Arc<dyn NativeBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn window(mut self, window: Arc<dyn EventTarget>) -> Self {
        self.window = Some(window);
        self
    }

    /// Environment inspected for bridge markers, replacing the default one.
    pub fn environment(mut self, environment: Arc<dyn Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn platforms(mut self, platforms: CapacitorPlatforms) -> Self {
        self.platforms = platforms;
        self
    }

    /// Whether `build` installs the global log subscriber (default: true).
    pub fn init_logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    pub fn build(self) -> RuntimeResult<Capacitor> {
        let config = match self.config {
            Some(config) => {
                validate_config(&config)?;
                config
            }
            None => self.loader.load()?,
        };

        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let platform = resolve_platform(
            &config,
            &self.platforms,
            self.environment,
            self.bridge.as_deref(),
        );
        let server_url = config
            .server
            .webview_server_url
            .clone()
            .unwrap_or_else(|| default_server_url(&platform).to_string());

        let mut registry = PluginRegistry::builder(platform.clone());
        if let Some(bridge) = self.bridge {
            registry = registry.bridge(bridge);
        }
        if let Some(window) = self.window {
            registry = registry.window(window);
        }
        for (name, section) in &config.plugins {
            registry = registry.plugin_config(name.clone(), section.clone());
        }

        info!(
            platform = %platform,
            native = platform.is_native(),
            server_url = %server_url,
            "Capacitor runtime ready"
        );

        Ok(Capacitor {
            config,
            registry: registry.build(),
            server_url,
        })
    }
}

fn resolve_platform(
    config: &CapacitorConfig,
    platforms: &CapacitorPlatforms,
    environment: Option<Arc<dyn Environment>>,
    bridge: Option<&dyn NativeBridge>,
) -> PlatformId {
    if let Some(name) = &config.platform.platform_override {
        debug!(platform = %name, "Platform forced by configuration");
        return PlatformId::parse(name);
    }
    if let Some(custom) = platforms.current() {
        return custom;
    }

    let environment = environment.unwrap_or_else(|| {
        let mut markers: MarkerSet = config.platform.markers.iter().cloned().collect();
        match bridge.map(|b| b.platform()) {
            Some(PlatformId::Android) => markers.insert(ANDROID_BRIDGE_MARKER),
            Some(PlatformId::Ios) => markers.insert(IOS_BRIDGE_MARKER),
            _ => {}
        }
        Arc::new(markers)
    });
    PlatformResolver::new(environment).platform().clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use capacitor_core::InProcessBridge;

    fn build(config: CapacitorConfig) -> Capacitor {
        Capacitor::from_config(config).unwrap()
    }

    #[test]
    fn defaults_to_web() {
        let cap = build(CapacitorConfig::default());
        assert_eq!(cap.get_platform(), "web");
        assert!(!cap.is_native_platform());
    }

    #[test]
    fn markers_select_native_platform() {
        let mut config = CapacitorConfig::default();
        config.platform.markers = vec![IOS_BRIDGE_MARKER.to_string()];
        let cap = build(config);
        assert_eq!(cap.platform(), &PlatformId::Ios);
        assert_eq!(cap.webview_server_url(), "capacitor://localhost");
    }

    #[test]
    fn attached_bridge_provides_marker() {
        let cap = Capacitor::builder()
            .config(CapacitorConfig::default())
            .init_logging(false)
            .bridge(Arc::new(InProcessBridge::new("android")))
            .build()
            .unwrap();
        assert_eq!(cap.get_platform(), "android");
    }

    #[test]
    fn override_beats_markers_and_custom_platforms() {
        let mut config = CapacitorConfig::default();
        config.platform.platform_override = Some("web".into());
        config.platform.markers = vec![ANDROID_BRIDGE_MARKER.to_string()];
        let mut platforms = CapacitorPlatforms::new();
        platforms.add_platform("electron").set_platform("electron");

        let cap = Capacitor::builder()
            .config(config)
            .platforms(platforms)
            .init_logging(false)
            .build()
            .unwrap();
        assert_eq!(cap.get_platform(), "web");
    }

    #[test]
    fn custom_platform_is_selected() {
        let mut platforms = CapacitorPlatforms::new();
        platforms.add_platform("electron").set_platform("electron");
        let cap = Capacitor::builder()
            .config(CapacitorConfig::default())
            .platforms(platforms)
            .init_logging(false)
            .build()
            .unwrap();
        assert_eq!(cap.get_platform(), "electron");
        assert!(!cap.is_native_platform());
    }

    #[test]
    fn convert_file_src_on_android() {
        let mut config = CapacitorConfig::default();
        config.platform.platform_override = Some("android".into());
        let cap = build(config);

        assert_eq!(
            cap.convert_file_src("/data/user/0/app/files/photo.jpg"),
            "https://localhost/_capacitor_file_/data/user/0/app/files/photo.jpg"
        );
        assert_eq!(
            cap.convert_file_src("file:///storage/emulated/0/a.png"),
            "https://localhost/_capacitor_file_/storage/emulated/0/a.png"
        );
        assert_eq!(
            cap.convert_file_src("content://media/external/images/1"),
            "https://localhost/_capacitor_content_/media/external/images/1"
        );
        assert_eq!(cap.convert_file_src("https://example.com/a.png"), "https://example.com/a.png");
    }

    #[test]
    fn convert_file_src_uses_configured_server() {
        let mut config = CapacitorConfig::default();
        config.platform.platform_override = Some("ios".into());
        config.server.webview_server_url = Some("capacitor://app.local".into());
        let cap = build(config);
        assert_eq!(
            cap.convert_file_src("/var/mobile/x.png"),
            "capacitor://app.local/_capacitor_file_/var/mobile/x.png"
        );
    }

    #[test]
    fn convert_file_src_is_identity_on_web() {
        let cap = build(CapacitorConfig::default());
        assert_eq!(cap.convert_file_src("/data/x.png"), "/data/x.png");
    }

    #[test]
    fn unregistered_fallback_is_unimplemented_on_web() {
        let cap = build(CapacitorConfig::default());
        let device = cap.register_plugin("Device", Implementations::new());
        let err =
            tokio_test::block_on(device.call("getInfo", serde_json::Value::Null)).unwrap_err();
        assert!(err.is_unimplemented());
        assert!(!cap.is_plugin_available("Device"));
    }

    #[test]
    fn invalid_preloaded_config_is_rejected() {
        let mut config = CapacitorConfig::default();
        config.server.webview_server_url = Some("localhost".into());
        assert!(matches!(
            Capacitor::from_config(config),
            Err(RuntimeError::Config(_))
        ));
    }
}
