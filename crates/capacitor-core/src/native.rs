//! Native bridge contract.
//!
//! A native host exposes plugins through a [`NativeBridge`]. For each plugin
//! the host publishes a [`PluginHeader`] listing its methods and how each one
//! returns results:
//!
//! | [`MethodType`] | Invocation | Result |
//! |----------------|------------|--------|
//! | `promise` | [`NativeBridge::call_promise`] | one value or error |
//! | `callback` | [`NativeBridge::call_callback`] | zero or more values through a [`NativeCallback`] |
//!
//! Event listeners on the native side are callback-style `addListener` calls
//! removed with a promise-style `removeListener` carrying the callback id.
//!
//! [`InProcessBridge`] implements the contract entirely in memory. Embedders
//! use it to host Rust-side "native" plugins; tests use it to exercise routing.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::error::{CapacitorException, PluginResult};
use crate::platform::PlatformId;

/// How a native method delivers its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodType {
    Promise,
    Callback,
}

/// One method entry of a [`PluginHeader`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodHeader {
    pub name: String,
    pub rtype: MethodType,
}

/// Description of a plugin as published by the native host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginHeader {
    pub name: String,
    pub methods: Vec<MethodHeader>,
}

impl PluginHeader {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Adds a method entry (builder pattern).
    pub fn with_method(mut self, name: impl Into<String>, rtype: MethodType) -> Self {
        self.methods.push(MethodHeader {
            name: name.into(),
            rtype,
        });
        self
    }

    pub fn method(&self, name: &str) -> Option<&MethodHeader> {
        self.methods.iter().find(|m| m.name == name)
    }
}

/// Identity of one callback-style invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallbackId(String);

impl CallbackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Receiver of callback-style results. May be invoked any number of times.
pub type NativeCallback = Arc<dyn Fn(PluginResult<Value>) + Send + Sync>;

/// The native host, as seen by the dispatcher.
#[async_trait]
pub trait NativeBridge: Send + Sync {
    /// The platform the host runs on.
    fn platform(&self) -> PlatformId;

    /// The header of `plugin`, if the host provides it.
    fn plugin_header(&self, plugin: &str) -> Option<PluginHeader>;

    /// Invokes a promise-style method.
    async fn call_promise(&self, plugin: &str, method: &str, options: Value)
    -> PluginResult<Value>;

    /// Invokes a callback-style method. Results flow through `callback`.
    async fn call_callback(
        &self,
        plugin: &str,
        method: &str,
        options: Value,
        callback: NativeCallback,
    ) -> PluginResult<CallbackId>;
}

// =============================================================================
// InProcessBridge
// =============================================================================

type PromiseFn = Arc<dyn Fn(Value) -> BoxFuture<'static, PluginResult<Value>> + Send + Sync>;
type CallbackFn = Arc<dyn Fn(Value, NativeCallback) -> PluginResult<()> + Send + Sync>;

/// Definition of one plugin hosted by an [`InProcessBridge`].
pub struct NativePlugin {
    name: String,
    promise: HashMap<String, PromiseFn>,
    callback: HashMap<String, CallbackFn>,
    listeners: bool,
}

impl NativePlugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            promise: HashMap::new(),
            callback: HashMap::new(),
            listeners: false,
        }
    }

    /// Adds a promise-style method.
    pub fn promise<F, Fut>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<Value>> + Send + 'static,
    {
        self.promise
            .insert(method.into(), Arc::new(move |options| f(options).boxed()));
        self
    }

    /// Adds a callback-style method. The handler may keep the callback and
    /// invoke it later.
    pub fn callback<F>(mut self, method: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, NativeCallback) -> PluginResult<()> + Send + Sync + 'static,
    {
        self.callback.insert(method.into(), Arc::new(f));
        self
    }

    /// Publishes `addListener`, `removeListener` and `removeAllListeners`.
    /// Events are produced with [`InProcessBridge::emit`].
    pub fn with_listeners(mut self) -> Self {
        self.listeners = true;
        self
    }

    fn header(&self) -> PluginHeader {
        let mut header = PluginHeader::new(&self.name);
        let mut promise: Vec<_> = self.promise.keys().collect();
        promise.sort();
        for name in promise {
            header = header.with_method(name, MethodType::Promise);
        }
        let mut callback: Vec<_> = self.callback.keys().collect();
        callback.sort();
        for name in callback {
            header = header.with_method(name, MethodType::Callback);
        }
        if self.listeners {
            header = header
                .with_method("addListener", MethodType::Callback)
                .with_method("removeListener", MethodType::Promise)
                .with_method("removeAllListeners", MethodType::Promise);
        }
        header
    }
}

struct NativeListener {
    plugin: String,
    event_name: String,
    callback: NativeCallback,
}

/// An in-memory native host.
pub struct InProcessBridge {
    platform: PlatformId,
    plugins: RwLock<HashMap<String, Arc<NativePlugin>>>,
    listeners: Mutex<Vec<(CallbackId, NativeListener)>>,
    calls: Mutex<Vec<(String, String)>>,
    next_callback: AtomicU64,
}

impl InProcessBridge {
    pub fn new(platform: impl Into<PlatformId>) -> Self {
        Self {
            platform: platform.into(),
            plugins: RwLock::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_callback: AtomicU64::new(1),
        }
    }

    /// Hosts `plugin`, replacing any plugin of the same name.
    pub fn register(&self, plugin: NativePlugin) {
        debug!(plugin = %plugin.name, "Native plugin hosted");
        self.plugins
            .write()
            .insert(plugin.name.clone(), Arc::new(plugin));
    }

    /// Builder-style [`register`](Self::register).
    pub fn with_plugin(self, plugin: NativePlugin) -> Self {
        self.register(plugin);
        self
    }

    /// Delivers `data` to every native listener of `plugin`/`event_name`.
    ///
    /// Returns the number of listeners reached.
    pub fn emit(&self, plugin: &str, event_name: &str, data: Value) -> usize {
        let callbacks: Vec<NativeCallback> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, l)| l.plugin == plugin && l.event_name == event_name)
            .map(|(_, l)| Arc::clone(&l.callback))
            .collect();
        for callback in &callbacks {
            callback(Ok(data.clone()));
        }
        callbacks.len()
    }

    /// Number of native listeners registered for `plugin`.
    pub fn listener_count(&self, plugin: &str) -> usize {
        self.listeners
            .lock()
            .iter()
            .filter(|(_, l)| l.plugin == plugin)
            .count()
    }

    /// Every `(plugin, method)` invoked so far, in call order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }

    fn plugin(&self, name: &str) -> Option<Arc<NativePlugin>> {
        self.plugins.read().get(name).cloned()
    }

    fn record(&self, plugin: &str, method: &str) {
        trace!(plugin = %plugin, method = %method, "Native call");
        self.calls
            .lock()
            .push((plugin.to_string(), method.to_string()));
    }

    fn next_callback_id(&self) -> CallbackId {
        CallbackId(self.next_callback.fetch_add(1, Ordering::Relaxed).to_string())
    }

    fn missing(plugin: &str, method: &str) -> CapacitorException {
        CapacitorException::unimplemented(format!(
            "\"{plugin}.{method}()\" is not implemented natively"
        ))
        .with_data("plugin", plugin)
        .with_data("method", method)
    }
}

#[async_trait]
impl NativeBridge for InProcessBridge {
    fn platform(&self) -> PlatformId {
        self.platform.clone()
    }

    fn plugin_header(&self, plugin: &str) -> Option<PluginHeader> {
        self.plugin(plugin).map(|p| p.header())
    }

    async fn call_promise(
        &self,
        plugin: &str,
        method: &str,
        options: Value,
    ) -> PluginResult<Value> {
        self.record(plugin, method);
        let Some(def) = self.plugin(plugin) else {
            return Err(Self::missing(plugin, method));
        };

        if def.listeners {
            match method {
                "removeListener" => {
                    let id = options
                        .get("callbackId")
                        .and_then(Value::as_str)
                        .ok_or_else(|| {
                            CapacitorException::new("removeListener requires callbackId")
                        })?;
                    self.listeners
                        .lock()
                        .retain(|(cb, l)| !(cb.as_str() == id && l.plugin == plugin));
                    return Ok(Value::Null);
                }
                "removeAllListeners" => {
                    self.listeners.lock().retain(|(_, l)| l.plugin != plugin);
                    return Ok(Value::Null);
                }
                _ => {}
            }
        }

        let Some(f) = def.promise.get(method).cloned() else {
            return Err(Self::missing(plugin, method));
        };
        f(options).await
    }

    async fn call_callback(
        &self,
        plugin: &str,
        method: &str,
        options: Value,
        callback: NativeCallback,
    ) -> PluginResult<CallbackId> {
        self.record(plugin, method);
        let Some(def) = self.plugin(plugin) else {
            return Err(Self::missing(plugin, method));
        };

        if def.listeners && method == "addListener" {
            let event_name = options
                .get("eventName")
                .and_then(Value::as_str)
                .ok_or_else(|| CapacitorException::new("addListener requires eventName"))?
                .to_string();
            let id = self.next_callback_id();
            self.listeners.lock().push((
                id.clone(),
                NativeListener {
                    plugin: plugin.to_string(),
                    event_name,
                    callback,
                },
            ));
            return Ok(id);
        }

        let Some(f) = def.callback.get(method).cloned() else {
            return Err(Self::missing(plugin, method));
        };
        f(options, callback)?;
        Ok(self.next_callback_id())
    }
}

impl fmt::Debug for InProcessBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut plugins: Vec<String> = self.plugins.read().keys().cloned().collect();
        plugins.sort();
        f.debug_struct("InProcessBridge")
            .field("platform", &self.platform)
            .field("plugins", &plugins)
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

/// Helper for the native `addListener` options payload.
pub(crate) fn add_listener_options(event_name: &str) -> Value {
    json!({ "eventName": event_name })
}

/// Helper for the native `removeListener` options payload.
pub(crate) fn remove_listener_options(event_name: &str, callback_id: &CallbackId) -> Value {
    json!({ "eventName": event_name, "callbackId": callback_id })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_plugin() -> NativePlugin {
        NativePlugin::new("Echo")
            .promise("echo", |options| async move { Ok(options) })
            .callback("tick", |options, callback| {
                callback(Ok(options.clone()));
                callback(Ok(options));
                Ok(())
            })
            .with_listeners()
    }

    #[test]
    fn header_lists_methods_with_return_style() {
        let bridge = InProcessBridge::new("ios").with_plugin(echo_plugin());
        let header = bridge.plugin_header("Echo").unwrap();

        assert_eq!(header.method("echo").unwrap().rtype, MethodType::Promise);
        assert_eq!(header.method("tick").unwrap().rtype, MethodType::Callback);
        assert_eq!(header.method("addListener").unwrap().rtype, MethodType::Callback);
        assert!(header.method("missing").is_none());
        assert!(bridge.plugin_header("Other").is_none());
    }

    #[test]
    fn header_wire_format() {
        let header = PluginHeader::new("Foo").with_method("bar", MethodType::Promise);
        assert_eq!(
            serde_json::to_value(&header).unwrap(),
            json!({"name": "Foo", "methods": [{"name": "bar", "rtype": "promise"}]})
        );
    }

    #[tokio::test]
    async fn promise_call_round_trips() {
        let bridge = InProcessBridge::new("android").with_plugin(echo_plugin());
        let out = bridge
            .call_promise("Echo", "echo", json!({"v": 1}))
            .await
            .unwrap();
        assert_eq!(out, json!({"v": 1}));
        assert_eq!(bridge.calls(), vec![("Echo".to_string(), "echo".to_string())]);
    }

    #[tokio::test]
    async fn missing_method_is_unimplemented() {
        let bridge = InProcessBridge::new("android").with_plugin(echo_plugin());
        let err = bridge
            .call_promise("Echo", "nope", Value::Null)
            .await
            .unwrap_err();
        assert!(err.is_unimplemented());
    }

    #[tokio::test]
    async fn callback_method_streams_results() {
        let bridge = InProcessBridge::new("android").with_plugin(echo_plugin());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        bridge
            .call_callback(
                "Echo",
                "tick",
                json!(3),
                Arc::new(move |r: PluginResult<Value>| sink.lock().push(r.unwrap())),
            )
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![json!(3), json!(3)]);
    }

    #[tokio::test]
    async fn native_listener_lifecycle() {
        let bridge = InProcessBridge::new("ios").with_plugin(echo_plugin());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = bridge
            .call_callback(
                "Echo",
                "addListener",
                add_listener_options("change"),
                Arc::new(move |r: PluginResult<Value>| sink.lock().push(r.unwrap())),
            )
            .await
            .unwrap();

        assert_eq!(bridge.emit("Echo", "change", json!({"v": 1})), 1);
        assert_eq!(bridge.emit("Echo", "other", json!({"v": 2})), 0);

        bridge
            .call_promise("Echo", "removeListener", remove_listener_options("change", &id))
            .await
            .unwrap();
        assert_eq!(bridge.emit("Echo", "change", json!({"v": 3})), 0);
        assert_eq!(*seen.lock(), vec![json!({"v": 1})]);
    }
}
