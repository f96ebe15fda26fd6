//! Plugin registry.
//!
//! Owns every [`PluginHandle`] created by `register_plugin`, along with the
//! environment they share: the resolved platform, the native bridge, the
//! window event source and per-plugin configuration.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, warn};

use crate::native::NativeBridge;
use crate::platform::PlatformId;
use crate::plugin::{Implementations, PluginHandle};
use crate::window::EventTarget;

/// Registry of plugins for one runtime.
pub struct PluginRegistry {
    platform: PlatformId,
    bridge: Option<Arc<dyn NativeBridge>>,
    window: Option<Arc<dyn EventTarget>>,
    plugin_config: HashMap<String, Value>,
    plugins: RwLock<HashMap<String, PluginHandle>>,
}

impl PluginRegistry {
    /// Creates a registry for `platform` with no native bridge.
    pub fn new(platform: PlatformId) -> Self {
        Self::builder(platform).build()
    }

    pub fn builder(platform: PlatformId) -> PluginRegistryBuilder {
        PluginRegistryBuilder {
            platform,
            bridge: None,
            window: None,
            plugin_config: HashMap::new(),
        }
    }

    pub fn platform(&self) -> &PlatformId {
        &self.platform
    }

    pub fn bridge(&self) -> Option<&Arc<dyn NativeBridge>> {
        self.bridge.as_ref()
    }

    pub fn window(&self) -> Option<&Arc<dyn EventTarget>> {
        self.window.as_ref()
    }

    /// Registers `name` and returns its proxy.
    ///
    /// Registering a name twice logs a warning and returns the existing
    /// handle; the new implementations are ignored.
    pub fn register(&self, name: &str, implementations: Implementations) -> PluginHandle {
        let mut plugins = self.plugins.write();
        if let Some(existing) = plugins.get(name) {
            warn!(
                plugin = %name,
                "Plugin already registered; returning the existing proxy"
            );
            return existing.clone();
        }

        let handle = PluginHandle::new(
            name.to_string(),
            self.platform.clone(),
            self.bridge.clone(),
            self.window.clone(),
            self.config_for(name),
            implementations,
        );
        debug!(
            plugin = %name,
            platform = %self.platform,
            platforms = ?handle.available_platforms(),
            "Registered plugin"
        );
        plugins.insert(name.to_string(), handle.clone());
        handle
    }

    /// Configuration section for `name`; exact match first, then
    /// case-insensitive.
    fn config_for(&self, name: &str) -> Value {
        self.plugin_config
            .get(name)
            .or_else(|| {
                self.plugin_config
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(name))
                    .map(|(_, section)| section)
            })
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn get(&self, name: &str) -> Option<PluginHandle> {
        self.plugins.read().get(name).cloned()
    }

    /// Every registered plugin by name.
    pub fn plugins(&self) -> HashMap<String, PluginHandle> {
        self.plugins.read().clone()
    }

    /// Registered plugin names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.read().is_empty()
    }

    /// Whether `name` can be used on the current platform.
    ///
    /// True when the plugin is registered with a reachable implementation,
    /// or when the native host publishes a header for it.
    pub fn is_plugin_available(&self, name: &str) -> bool {
        if let Some(handle) = self.get(name) {
            return handle.is_available();
        }
        self.platform.is_native()
            && self
                .bridge
                .as_ref()
                .is_some_and(|bridge| bridge.plugin_header(name).is_some())
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("platform", &self.platform)
            .field("has_bridge", &self.bridge.is_some())
            .field("has_window", &self.window.is_some())
            .field("plugins", &self.names())
            .finish()
    }
}

/// Builder for [`PluginRegistry`].
pub struct PluginRegistryBuilder {
    platform: PlatformId,
    bridge: Option<Arc<dyn NativeBridge>>,
    window: Option<Arc<dyn EventTarget>>,
    plugin_config: HashMap<String, Value>,
}

impl PluginRegistryBuilder {
    pub fn bridge(mut self, bridge: Arc<dyn NativeBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn window(mut self, window: Arc<dyn EventTarget>) -> Self {
        self.window = Some(window);
        self
    }

    /// Sets the configuration section handed to `plugin`'s fallback factory.
    pub fn plugin_config(mut self, plugin: impl Into<String>, config: Value) -> Self {
        self.plugin_config.insert(plugin.into(), config);
        self
    }

    pub fn build(self) -> PluginRegistry {
        PluginRegistry {
            platform: self.platform,
            bridge: self.bridge,
            window: self.window,
            plugin_config: self.plugin_config,
            plugins: RwLock::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::{InProcessBridge, NativePlugin};
    use crate::web_plugin::WebPlugin;

    #[test]
    fn duplicate_registration_returns_existing() {
        let registry = PluginRegistry::new(PlatformId::Web);
        let first = registry.register("Foo", Implementations::new());
        let second = registry.register(
            "Foo",
            Implementations::new().web(|_ctx| async { Ok(WebPlugin::new()) }),
        );

        assert_eq!(registry.len(), 1);
        assert!(!first.is_available());
        assert!(!second.is_available());
    }

    #[test]
    fn availability_follows_platform() {
        let bridge = Arc::new(InProcessBridge::new("ios").with_plugin(NativePlugin::new("Native")));
        let registry = PluginRegistry::builder(PlatformId::Ios)
            .bridge(bridge)
            .build();

        registry.register(
            "WebOnly",
            Implementations::new().web(|_ctx| async { Ok(WebPlugin::new()) }),
        );

        assert!(registry.is_plugin_available("Native"));
        assert!(!registry.is_plugin_available("WebOnly"));
        assert!(!registry.is_plugin_available("Unknown"));
    }

    #[test]
    fn web_registry_ignores_bridge_headers() {
        let bridge = Arc::new(InProcessBridge::new("web").with_plugin(NativePlugin::new("Native")));
        let registry = PluginRegistry::builder(PlatformId::Web).bridge(bridge).build();
        assert!(!registry.is_plugin_available("Native"));
    }
}
