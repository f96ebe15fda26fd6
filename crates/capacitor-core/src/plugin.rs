//! Plugin proxy and per-call dispatch.
//!
//! A [`PluginHandle`] is what `register_plugin` hands back. It holds no
//! implementation itself; every call is resolved when it is made:
//!
//! ```text
//! call(m, a)
//!   │
//!   ├─ native platform && header has m ──► NativeBridge (promise / callback)
//!   │
//!   ├─ fallback factory for platform ────► FallbackInstance::invoke(m, a)
//!   │    (exact match, or `web` on non-native platforms; built once)
//!   │
//!   └─ otherwise ────────────────────────► Unimplemented {plugin, method, platform}
//! ```
//!
//! `addListener` and `removeAllListeners` follow the same decision but are
//! routed to the listener machinery rather than the method table.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{CapacitorException, PluginResult};
use crate::listener::{ListenerCallback, PluginListenerHandle, invoke_listeners};
use crate::native::{
    CallbackId, MethodType, NativeBridge, NativeCallback, PluginHeader, add_listener_options,
    remove_listener_options,
};
use crate::platform::PlatformId;
use crate::web_plugin::{BoundImplementation, FallbackInstance, WebImplementation, typed_callback};
use crate::window::EventTarget;

/// Everything a fallback factory may need to build its instance.
#[derive(Clone)]
pub struct ImplementationContext {
    pub plugin: String,
    pub platform: PlatformId,
    /// Environment event source for window listeners, if any.
    pub window: Option<Arc<dyn EventTarget>>,
    /// The plugin's configuration section (`Value::Null` when absent).
    pub config: Value,
}

impl ImplementationContext {
    /// Decodes the configuration section, falling back to `T::default()`.
    pub fn config_as<T: DeserializeOwned + Default>(&self) -> PluginResult<T> {
        if self.config.is_null() {
            return Ok(T::default());
        }
        Ok(T::deserialize(&self.config)?)
    }
}

impl fmt::Debug for ImplementationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplementationContext")
            .field("plugin", &self.plugin)
            .field("platform", &self.platform)
            .field("has_window", &self.window.is_some())
            .field("config", &self.config)
            .finish()
    }
}

type Factory = Arc<
    dyn Fn(ImplementationContext) -> BoxFuture<'static, PluginResult<Arc<dyn FallbackInstance>>>
        + Send
        + Sync,
>;

// =============================================================================
// Implementations
// =============================================================================

/// Fallback factories keyed by platform name.
///
/// Factories are only run when a call needs the fallback, and at most once
/// successfully per plugin.
#[derive(Clone, Default)]
pub struct Implementations {
    factories: HashMap<String, Factory>,
}

impl Implementations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the factory used on `platform`.
    pub fn on<I, F, Fut>(mut self, platform: impl Into<PlatformId>, factory: F) -> Self
    where
        I: WebImplementation,
        F: Fn(ImplementationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<I>> + Send + 'static,
    {
        let platform: PlatformId = platform.into();
        let erased: Factory = Arc::new(move |ctx| {
            factory(ctx)
                .map(|built| {
                    built.map(|instance| {
                        Arc::new(BoundImplementation::new(instance)) as Arc<dyn FallbackInstance>
                    })
                })
                .boxed()
        });
        self.factories.insert(platform.as_str().to_string(), erased);
        self
    }

    /// Adds the generic `web` factory.
    pub fn web<I, F, Fut>(self, factory: F) -> Self
    where
        I: WebImplementation,
        F: Fn(ImplementationContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<I>> + Send + 'static,
    {
        self.on(PlatformId::Web, factory)
    }

    /// Platform names with a factory, sorted.
    pub fn platforms(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Whether a factory is registered under exactly `platform`.
    pub fn has_platform(&self, platform: &PlatformId) -> bool {
        self.factories.contains_key(platform.as_str())
    }

    /// The factory to use on `platform`.
    ///
    /// An exact match always wins. The `web` factory stands in for any
    /// non-native platform; native platforms never fall back to it.
    fn select(&self, platform: &PlatformId) -> Option<(&str, &Factory)> {
        if let Some((key, factory)) = self.factories.get_key_value(platform.as_str()) {
            return Some((key.as_str(), factory));
        }
        if platform.is_native() {
            return None;
        }
        self.factories
            .get_key_value(PlatformId::Web.as_str())
            .map(|(key, factory)| (key.as_str(), factory))
    }
}

impl fmt::Debug for Implementations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Implementations")
            .field("platforms", &self.platforms())
            .finish()
    }
}

// =============================================================================
// PluginHandle
// =============================================================================

struct PluginInner {
    name: String,
    platform: PlatformId,
    bridge: Option<Arc<dyn NativeBridge>>,
    window: Option<Arc<dyn EventTarget>>,
    config: Value,
    implementations: Implementations,
    fallback: OnceCell<Arc<dyn FallbackInstance>>,
}

/// The uniform proxy for one registered plugin.
///
/// Cheap to clone; all clones share the same lazily built fallback instance.
#[derive(Clone)]
pub struct PluginHandle {
    inner: Arc<PluginInner>,
}

impl PluginHandle {
    pub(crate) fn new(
        name: String,
        platform: PlatformId,
        bridge: Option<Arc<dyn NativeBridge>>,
        window: Option<Arc<dyn EventTarget>>,
        config: Value,
        implementations: Implementations,
    ) -> Self {
        Self {
            inner: Arc::new(PluginInner {
                name,
                platform,
                bridge,
                window,
                config,
                implementations,
                fallback: OnceCell::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn platform(&self) -> &PlatformId {
        &self.inner.platform
    }

    /// Whether the plugin is registered for the current platform: the native
    /// host publishes it, or a factory is keyed on this exact platform.
    ///
    /// A custom platform served by the `web` factory still reports `false`,
    /// although calls there reach that fallback.
    pub fn is_available(&self) -> bool {
        self.native_header().is_some()
            || self.inner.implementations.has_platform(&self.inner.platform)
    }

    /// Platforms this plugin can run on: every fallback platform, plus the
    /// current one when the native host publishes the plugin.
    pub fn available_platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self
            .inner
            .implementations
            .platforms()
            .into_iter()
            .map(str::to_string)
            .collect();
        if self.native_header().is_some() {
            let current = self.inner.platform.as_str().to_string();
            if !platforms.contains(&current) {
                platforms.push(current);
            }
        }
        platforms.sort();
        platforms
    }

    /// Whether the fallback instance has been constructed.
    pub fn has_fallback_instance(&self) -> bool {
        self.inner.fallback.initialized()
    }

    // ─── Calls ───────────────────────────────────────────────────────────────

    /// Calls `method` with JSON options.
    ///
    /// A callback-style native method started this way resolves to its
    /// callback id and its results are discarded; use
    /// [`call_with_callback`](Self::call_with_callback) to receive them.
    pub async fn call(&self, method: &str, options: Value) -> PluginResult<Value> {
        if method == "removeAllListeners" {
            self.remove_all_listeners().await?;
            return Ok(Value::Null);
        }

        if let Some((bridge, rtype)) = self.native_route(method) {
            debug!(
                plugin = %self.name(),
                method = %method,
                rtype = ?rtype,
                "Routing call to native bridge"
            );
            return match rtype {
                MethodType::Promise => bridge.call_promise(self.name(), method, options).await,
                MethodType::Callback => {
                    let name = self.name().to_string();
                    let m = method.to_string();
                    let discard: NativeCallback = Arc::new(move |result: PluginResult<Value>| {
                        trace!(
                            plugin = %name,
                            method = %m,
                            ok = result.is_ok(),
                            "Discarding callback result"
                        );
                    });
                    let id = bridge
                        .call_callback(self.name(), method, options, discard)
                        .await?;
                    Ok(Value::String(id.to_string()))
                }
            };
        }

        let fallback = self.fallback(method).await?;
        trace!(plugin = %self.name(), method = %method, "Routing call to fallback");
        match fallback.invoke(method, options) {
            Some(pending) => pending.await,
            None => Err(self.method_unimplemented(method)),
        }
    }

    /// Serializes `options`, calls `method`, and decodes the result as `R`.
    pub async fn call_typed<A, R>(&self, method: &str, options: &A) -> PluginResult<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let options = serde_json::to_value(options)?;
        let result = self.call(method, options).await?;
        Ok(R::deserialize(result)?)
    }

    /// Calls `method`, delivering its results to `callback`.
    ///
    /// Callback-style native methods may deliver any number of results. Every
    /// other route delivers exactly one result, the promise outcome, before
    /// this returns.
    pub async fn call_with_callback(
        &self,
        method: &str,
        options: Value,
        callback: NativeCallback,
    ) -> PluginResult<CallbackId> {
        if let Some((bridge, MethodType::Callback)) = self.native_route(method) {
            debug!(
                plugin = %self.name(),
                method = %method,
                "Routing callback call to native bridge"
            );
            return bridge
                .call_callback(self.name(), method, options, callback)
                .await;
        }
        let result = self.call(method, options).await;
        callback(result);
        Ok(CallbackId::new(Uuid::new_v4().to_string()))
    }

    // ─── Listeners ───────────────────────────────────────────────────────────

    /// Registers `callback` for `event_name`.
    ///
    /// Goes to the native host when it publishes `addListener` for this
    /// plugin, otherwise to the fallback's listener registry.
    pub async fn add_listener(
        &self,
        event_name: &str,
        callback: ListenerCallback,
    ) -> PluginResult<PluginListenerHandle> {
        if let Some((bridge, _)) = self.native_route("addListener") {
            return self.add_native_listener(bridge, event_name, callback).await;
        }

        let fallback = self.fallback("addListener").await?;
        Ok(fallback.web_plugin().add_listener(event_name, callback))
    }

    /// Registers a callback receiving payloads decoded as `T`.
    pub async fn add_typed_listener<T, F>(
        &self,
        event_name: &str,
        callback: F,
    ) -> PluginResult<PluginListenerHandle>
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.add_listener(event_name, typed_callback(event_name, callback))
            .await
    }

    async fn add_native_listener(
        &self,
        bridge: Arc<dyn NativeBridge>,
        event_name: &str,
        callback: ListenerCallback,
    ) -> PluginResult<PluginListenerHandle> {
        let event = event_name.to_string();
        let native_callback: NativeCallback =
            Arc::new(move |result: PluginResult<Value>| match result {
                Ok(data) => {
                    invoke_listeners(&event, std::slice::from_ref(&callback), &data);
                }
                Err(e) => warn!(event = %event, error = %e, "Native listener reported an error"),
            });

        let id = bridge
            .call_callback(
                self.name(),
                "addListener",
                add_listener_options(event_name),
                native_callback,
            )
            .await?;
        debug!(
            plugin = %self.name(),
            event = %event_name,
            callback_id = %id,
            "Native listener added"
        );

        let plugin = self.name().to_string();
        let event = event_name.to_string();
        Ok(PluginListenerHandle::new(event_name, move || async move {
            bridge
                .call_promise(&plugin, "removeListener", remove_listener_options(&event, &id))
                .await
                .map(|_| ())
        }))
    }

    /// Removes every listener of this plugin.
    ///
    /// Clears native listeners when the host publishes `removeAllListeners`,
    /// and the fallback's registry whenever a fallback instance exists.
    pub async fn remove_all_listeners(&self) -> PluginResult<()> {
        let mut routed = false;
        if let Some((bridge, _)) = self.native_route("removeAllListeners") {
            bridge
                .call_promise(self.name(), "removeAllListeners", Value::Null)
                .await?;
            routed = true;
        }

        if let Some(fallback) = self.inner.fallback.get() {
            fallback.web_plugin().remove_all_listeners();
        } else if !routed {
            self.fallback("removeAllListeners")
                .await?
                .web_plugin()
                .remove_all_listeners();
        }
        Ok(())
    }

    // ─── Resolution ──────────────────────────────────────────────────────────

    fn native_header(&self) -> Option<PluginHeader> {
        if !self.inner.platform.is_native() {
            return None;
        }
        self.inner.bridge.as_ref()?.plugin_header(self.name())
    }

    fn native_route(&self, method: &str) -> Option<(Arc<dyn NativeBridge>, MethodType)> {
        let header = self.native_header()?;
        let rtype = header.method(method)?.rtype;
        let bridge = self.inner.bridge.as_ref()?;
        Some((Arc::clone(bridge), rtype))
    }

    /// Returns the fallback instance, building it on first use.
    ///
    /// A factory that fails leaves the slot empty so a later call retries.
    async fn fallback(&self, method: &str) -> PluginResult<&Arc<dyn FallbackInstance>> {
        let inner = &self.inner;
        let Some((key, factory)) = inner.implementations.select(&inner.platform) else {
            return Err(self.plugin_unimplemented(method));
        };
        inner
            .fallback
            .get_or_try_init(|| {
                debug!(
                    plugin = %inner.name,
                    platform = %inner.platform,
                    factory = %key,
                    "Building fallback implementation"
                );
                factory(ImplementationContext {
                    plugin: inner.name.clone(),
                    platform: inner.platform.clone(),
                    window: inner.window.clone(),
                    config: inner.config.clone(),
                })
            })
            .await
    }

    fn plugin_unimplemented(&self, method: &str) -> CapacitorException {
        self.tag(
            CapacitorException::unimplemented(format!(
                "\"{}\" plugin is not implemented on {}",
                self.name(),
                self.inner.platform
            )),
            method,
        )
    }

    fn method_unimplemented(&self, method: &str) -> CapacitorException {
        self.tag(
            CapacitorException::unimplemented(format!(
                "\"{}.{}()\" is not implemented on {}",
                self.name(),
                method,
                self.inner.platform
            )),
            method,
        )
    }

    fn tag(&self, err: CapacitorException, method: &str) -> CapacitorException {
        err.with_data("plugin", self.name())
            .with_data("method", method)
            .with_data("platform", self.inner.platform.as_str())
    }
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginHandle")
            .field("name", &self.inner.name)
            .field("platform", &self.inner.platform)
            .field("implementations", &self.inner.implementations)
            .field("fallback_built", &self.inner.fallback.initialized())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web_plugin::WebPlugin;

    #[test]
    fn web_factory_only_stands_in_off_native() {
        let impls = Implementations::new()
            .web(|_ctx| async { Ok(WebPlugin::new()) })
            .on("electron", |_ctx| async { Ok(WebPlugin::new()) });

        assert_eq!(impls.select(&PlatformId::Web).unwrap().0, "web");
        assert_eq!(impls.select(&PlatformId::parse("electron")).unwrap().0, "electron");
        assert_eq!(impls.select(&PlatformId::parse("tauri")).unwrap().0, "web");
        assert!(impls.select(&PlatformId::Ios).is_none());
        assert_eq!(impls.platforms(), vec!["electron", "web"]);
    }

    #[test]
    fn exact_native_factory_is_used() {
        let impls = Implementations::new().on(PlatformId::Android, |_ctx| async {
            Ok(WebPlugin::new())
        });
        assert_eq!(impls.select(&PlatformId::Android).unwrap().0, "android");
    }

    #[derive(Debug, Default, serde::Deserialize, PartialEq)]
    #[serde(default)]
    struct Section {
        enabled: bool,
    }

    #[test]
    fn context_config_defaults_when_absent() {
        let ctx = ImplementationContext {
            plugin: "P".into(),
            platform: PlatformId::Web,
            window: None,
            config: Value::Null,
        };
        assert_eq!(ctx.config_as::<Section>().unwrap(), Section::default());

        let ctx = ImplementationContext {
            config: serde_json::json!({"enabled": true}),
            ..ctx
        };
        assert_eq!(ctx.config_as::<Section>().unwrap(), Section { enabled: true });
    }
}
