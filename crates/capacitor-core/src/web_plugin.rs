//! Fallback base implementation.
//!
//! Every in-process fallback embeds a [`WebPlugin`], which provides the
//! listener contract (`add_listener`, `remove_all_listeners`,
//! `notify_listeners`, `has_listeners`), the window-event bridge and the
//! exception helpers. A fallback exposes its own methods to the dispatcher
//! by implementing [`WebImplementation`] and returning a [`MethodTable`].
//!
//! # Example
//!
//! ```rust,ignore
//! struct EchoWeb {
//!     base: WebPlugin,
//! }
//!
//! impl WebImplementation for EchoWeb {
//!     fn web_plugin(&self) -> &WebPlugin {
//!         &self.base
//!     }
//!
//!     fn methods() -> MethodTable<Self> {
//!         MethodTable::new().method("echo", |this: Arc<Self>, opts: EchoOptions| async move {
//!             this.base.notify_listeners("echoed", json!(opts.value), false);
//!             Ok(opts)
//!         })
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use crate::error::{CapacitorException, PluginResult};
use crate::listener::{
    ListenerCallback, ListenerId, ListenerRegistry, Notify, PluginListenerHandle, Removed,
    invoke_listeners,
};
use crate::window::{EventTarget, WindowBridge, WindowEventHandler};

/// Listener state of one fallback instance, guarded by a single lock.
#[derive(Debug, Default)]
struct ListenerState {
    registry: ListenerRegistry<Value>,
    windows: WindowBridge,
}

// =============================================================================
// WebPlugin
// =============================================================================

/// The listener-management base every fallback implementation embeds.
///
/// Cloning yields another handle to the same listener state.
///
/// # Concurrency
///
/// All state sits behind one `parking_lot::Mutex`. Callbacks always run after
/// the lock is released, so a callback may add or remove listeners or notify
/// again without deadlocking. While retained payloads are being replayed for
/// an event, notifications of that event from any thread are parked and
/// delivered by the replaying caller once the replay is done.
#[derive(Clone, Default)]
pub struct WebPlugin {
    state: Arc<Mutex<ListenerState>>,
}

impl WebPlugin {
    /// Creates a base with no environment event source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a base whose window listeners attach to `target`.
    pub fn with_window(target: Arc<dyn EventTarget>) -> Self {
        Self {
            state: Arc::new(Mutex::new(ListenerState {
                registry: ListenerRegistry::new(),
                windows: WindowBridge::new(Some(target)),
            })),
        }
    }

    /// Creates a base attached to `target` when one is available.
    pub fn with_optional_window(target: Option<Arc<dyn EventTarget>>) -> Self {
        match target {
            Some(target) => Self::with_window(target),
            None => Self::new(),
        }
    }

    // ─── Consumer side ───────────────────────────────────────────────────────

    /// Registers `callback` for `event_name`.
    ///
    /// Payloads retained for the event are delivered to `callback`, in
    /// emission order, before this returns. Payloads notified meanwhile are
    /// delivered after them, also before this returns.
    pub fn add_listener(
        &self,
        event_name: &str,
        callback: ListenerCallback,
    ) -> PluginListenerHandle {
        let added = {
            let mut state = self.state.lock();
            let added = state.registry.add(event_name, Arc::clone(&callback));
            state.windows.attach_for(event_name);
            added
        };

        if !added.replay.is_empty() {
            debug!(
                event = %event_name,
                retained = added.replay.len(),
                "Replaying retained events to new listener"
            );
            let single = [callback];
            for payload in &added.replay {
                invoke_listeners(event_name, &single, payload);
            }
            Self::drain_deferred(&self.state, event_name);
        }

        let weak = Arc::downgrade(&self.state);
        let id = added.id;
        let name = event_name.to_string();
        PluginListenerHandle::new(event_name, move || async move {
            if let Some(state) = weak.upgrade() {
                Self::remove_from(&state, &name, id);
            }
            Ok(())
        })
    }

    /// Registers a callback receiving payloads decoded as `T`.
    ///
    /// Payloads that do not decode are logged and skipped.
    pub fn add_typed_listener<T, F>(&self, event_name: &str, callback: F) -> PluginListenerHandle
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.add_listener(event_name, typed_callback(event_name, callback))
    }

    /// Removes one registration by id. Returns `false` if it was not found.
    pub fn remove_listener(&self, event_name: &str, id: ListenerId) -> bool {
        Self::remove_from(&self.state, event_name, id)
    }

    fn remove_from(state: &Mutex<ListenerState>, event_name: &str, id: ListenerId) -> bool {
        let mut state = state.lock();
        match state.registry.remove(event_name, id) {
            Removed::Missing => false,
            Removed::Remaining => true,
            Removed::LastForEvent => {
                state.windows.detach_for(event_name);
                true
            }
        }
    }

    /// Clears every listener and window relay. Retained payloads survive.
    pub fn remove_all_listeners(&self) {
        let mut state = self.state.lock();
        state.registry.clear();
        state.windows.clear();
        debug!("All listeners removed");
    }

    // ─── Producer side ───────────────────────────────────────────────────────

    /// Delivers `data` to the listeners of `event_name`.
    ///
    /// With no listeners the payload is queued when `retain_until_consumed`
    /// is set and dropped otherwise.
    pub fn notify_listeners(&self, event_name: &str, data: Value, retain_until_consumed: bool) {
        Self::notify_state(&self.state, event_name, data, retain_until_consumed);
    }

    /// Serializes `data` and notifies. Serialization failures are logged.
    pub fn notify_serialized<T: Serialize>(
        &self,
        event_name: &str,
        data: &T,
        retain_until_consumed: bool,
    ) {
        match serde_json::to_value(data) {
            Ok(value) => self.notify_listeners(event_name, value, retain_until_consumed),
            Err(e) => warn!(event = %event_name, error = %e, "Failed to serialize event payload"),
        }
    }

    fn notify_state(
        state: &Mutex<ListenerState>,
        event_name: &str,
        data: Value,
        retain_until_consumed: bool,
    ) {
        let outcome = state
            .lock()
            .registry
            .prepare_notify(event_name, data, retain_until_consumed);
        Self::dispatch(event_name, outcome);
    }

    /// Delivers what was parked while a replay of `event_name` ran.
    fn drain_deferred(state: &Mutex<ListenerState>, event_name: &str) {
        loop {
            let next = state.lock().registry.next_deferred(event_name);
            match next {
                Some(outcome) => Self::dispatch(event_name, outcome),
                None => break,
            }
        }
    }

    fn dispatch(event_name: &str, outcome: Notify<Value>) {
        match outcome {
            Notify::Deliver(callbacks, data) => {
                invoke_listeners(event_name, &callbacks, &data);
            }
            Notify::Retained => {
                debug!(event = %event_name, "No listeners; event retained");
            }
            Notify::Deferred => {
                trace!(event = %event_name, "Replay in progress; event deferred");
            }
            Notify::Dropped => {}
        }
    }

    pub fn has_listeners(&self, event_name: &str) -> bool {
        self.state.lock().registry.has_listeners(event_name)
    }

    /// Number of payloads waiting for the first listener of `event_name`.
    pub fn retained_count(&self, event_name: &str) -> usize {
        self.state.lock().registry.retained_count(event_name)
    }

    // ─── Window bridge ───────────────────────────────────────────────────────

    /// Relays the environment event `window_event_name` to the plugin event
    /// `plugin_event_name`. Idempotent per pair.
    pub fn register_window_listener(&self, window_event_name: &str, plugin_event_name: &str) {
        let weak: Weak<Mutex<ListenerState>> = Arc::downgrade(&self.state);
        let target_event = plugin_event_name.to_string();
        let handler: WindowEventHandler = Arc::new(move |event: &Value| {
            if let Some(state) = weak.upgrade() {
                Self::notify_state(&state, &target_event, event.clone(), false);
            }
        });
        self.state
            .lock()
            .windows
            .register(window_event_name, plugin_event_name, handler);
    }

    /// Whether the relay for the pair is currently attached.
    pub fn is_window_listener_registered(
        &self,
        window_event_name: &str,
        plugin_event_name: &str,
    ) -> bool {
        self.state
            .lock()
            .windows
            .is_registered(window_event_name, plugin_event_name)
    }

    // ─── Exception helpers ───────────────────────────────────────────────────

    /// Builds an `Unimplemented` exception; does not fail by itself.
    pub fn unimplemented(&self, msg: Option<&str>) -> CapacitorException {
        CapacitorException::unimplemented(msg.unwrap_or("not implemented"))
    }

    /// Builds an `Unavailable` exception; does not fail by itself.
    pub fn unavailable(&self, msg: Option<&str>) -> CapacitorException {
        CapacitorException::unavailable(msg.unwrap_or("not available"))
    }
}

impl fmt::Debug for WebPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebPlugin")
            .field("state", &*self.state.lock())
            .finish()
    }
}

/// Wraps a typed callback into a JSON [`ListenerCallback`].
pub fn typed_callback<T, F>(event_name: &str, callback: F) -> ListenerCallback
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    let name = event_name.to_string();
    Arc::new(move |data: &Value| match T::deserialize(data) {
        Ok(typed) => callback(typed),
        Err(e) => warn!(event = %name, error = %e, "Dropping event payload that failed to decode"),
    })
}

// =============================================================================
// MethodTable
// =============================================================================

type MethodFn<I> =
    Arc<dyn Fn(Arc<I>, Value) -> BoxFuture<'static, PluginResult<Value>> + Send + Sync>;

/// Name → method lookup for one fallback type.
///
/// Options arrive as JSON and are decoded into the method's argument type;
/// results are encoded back to JSON.
pub struct MethodTable<I> {
    methods: HashMap<&'static str, MethodFn<I>>,
}

impl<I> Default for MethodTable<I> {
    fn default() -> Self {
        Self {
            methods: HashMap::new(),
        }
    }
}

impl<I: Send + Sync + 'static> MethodTable<I> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a method (builder pattern).
    pub fn method<A, R, F, Fut>(mut self, name: &'static str, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(Arc<I>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = PluginResult<R>> + Send + 'static,
    {
        let f = Arc::new(f);
        let erased: MethodFn<I> = Arc::new(move |this: Arc<I>, options: Value| {
            let f = Arc::clone(&f);
            async move {
                let args: A = decode_options(name, options)?;
                let result = f(this, args).await?;
                Ok(serde_json::to_value(result)?)
            }
            .boxed()
        });
        self.methods.insert(name, erased);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Method names, sorted.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.methods.keys().copied().collect();
        names.sort_unstable();
        names
    }

    fn invoke(
        &self,
        this: Arc<I>,
        name: &str,
        options: Value,
    ) -> Option<BoxFuture<'static, PluginResult<Value>>> {
        self.methods.get(name).map(|f| f(this, options))
    }
}

/// Decodes call options, treating `null` and `{}` as interchangeable so that
/// option-less methods and all-default option structs both accept either.
fn decode_options<A: DeserializeOwned>(method: &str, options: Value) -> PluginResult<A> {
    let fallback = match &options {
        Value::Null => Some(Value::Object(Map::new())),
        Value::Object(map) if map.is_empty() => Some(Value::Null),
        _ => None,
    };
    match serde_json::from_value(options) {
        Ok(args) => Ok(args),
        Err(err) => fallback
            .and_then(|alt| serde_json::from_value(alt).ok())
            .ok_or_else(|| {
                CapacitorException::new(format!("invalid options for '{method}': {err}"))
                    .with_data("method", method)
            }),
    }
}

// =============================================================================
// WebImplementation / FallbackInstance
// =============================================================================

/// An in-process fallback implementation of a plugin.
pub trait WebImplementation: Send + Sync + Sized + 'static {
    /// The embedded listener-management base.
    fn web_plugin(&self) -> &WebPlugin;

    /// The methods this fallback exposes to the dispatcher.
    fn methods() -> MethodTable<Self>;
}

impl WebImplementation for WebPlugin {
    fn web_plugin(&self) -> &WebPlugin {
        self
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::new()
    }
}

/// Type-erased fallback instance held by the dispatcher.
pub trait FallbackInstance: Send + Sync {
    fn web_plugin(&self) -> &WebPlugin;

    fn has_method(&self, method: &str) -> bool;

    /// Starts `method`; `None` when the fallback does not have it.
    fn invoke(&self, method: &str, options: Value)
    -> Option<BoxFuture<'static, PluginResult<Value>>>;

    fn method_names(&self) -> Vec<&'static str>;
}

/// A [`WebImplementation`] bound to its method table.
pub struct BoundImplementation<I> {
    instance: Arc<I>,
    table: MethodTable<I>,
}

impl<I: WebImplementation> BoundImplementation<I> {
    pub fn new(instance: I) -> Self {
        Self {
            instance: Arc::new(instance),
            table: I::methods(),
        }
    }

    pub fn instance(&self) -> &Arc<I> {
        &self.instance
    }
}

impl<I: WebImplementation> FallbackInstance for BoundImplementation<I> {
    fn web_plugin(&self) -> &WebPlugin {
        self.instance.web_plugin()
    }

    fn has_method(&self, method: &str) -> bool {
        self.table.contains(method)
    }

    fn invoke(
        &self,
        method: &str,
        options: Value,
    ) -> Option<BoxFuture<'static, PluginResult<Value>>> {
        self.table.invoke(Arc::clone(&self.instance), method, options)
    }

    fn method_names(&self) -> Vec<&'static str> {
        self.table.names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExceptionCode;
    use crate::window::LocalWindow;
    use serde::Deserialize;
    use serde_json::json;

    fn collect(log: &Arc<Mutex<Vec<Value>>>) -> ListenerCallback {
        let log = Arc::clone(log);
        Arc::new(move |data: &Value| log.lock().push(data.clone()))
    }

    #[test]
    fn retained_event_reaches_first_listener_before_add_returns() {
        let plugin = WebPlugin::new();
        plugin.notify_listeners("appReady", json!({"v": 1}), true);

        let log = Arc::new(Mutex::new(Vec::new()));
        let _handle = plugin.add_listener("appReady", collect(&log));

        assert_eq!(*log.lock(), vec![json!({"v": 1})]);
        assert_eq!(plugin.retained_count("appReady"), 0);

        plugin.notify_listeners("appReady", json!({"v": 2}), true);
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn concurrent_notify_waits_for_retained_replay() {
        use std::sync::mpsc;
        use std::thread;

        let plugin = WebPlugin::new();
        plugin.notify_listeners("e", json!(1), true);
        plugin.notify_listeners("e", json!(2), true);

        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let started_tx = Mutex::new(started_tx);
        let release_rx = Mutex::new(release_rx);
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let callback: ListenerCallback = Arc::new(move |data: &Value| {
            sink.lock().push(data.clone());
            if *data == json!(1) {
                let _ = started_tx.lock().send(());
                let _ = release_rx.lock().recv();
            }
        });

        let adder = {
            let plugin = plugin.clone();
            thread::spawn(move || {
                plugin.add_listener("e", callback);
            })
        };

        started_rx.recv().unwrap();
        plugin.notify_listeners("e", json!(3), false);
        release_tx.send(()).unwrap();
        adder.join().unwrap();

        assert_eq!(*log.lock(), vec![json!(1), json!(2), json!(3)]);
        assert_eq!(plugin.retained_count("e"), 0);

        plugin.notify_listeners("e", json!(4), false);
        assert_eq!(log.lock().last(), Some(&json!(4)));
    }

    #[test]
    fn notify_from_replayed_callback_follows_retained_payloads() {
        let plugin = WebPlugin::new();
        plugin.notify_listeners("e", json!(1), true);
        plugin.notify_listeners("e", json!(2), true);

        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let inner = plugin.clone();
        plugin.add_listener(
            "e",
            Arc::new(move |data: &Value| {
                sink.lock().push(data.clone());
                if *data == json!(1) {
                    inner.notify_listeners("e", json!(10), false);
                }
            }),
        );

        assert_eq!(*log.lock(), vec![json!(1), json!(2), json!(10)]);
    }

    #[test]
    fn retained_event_is_consumed_once() {
        let plugin = WebPlugin::new();
        plugin.notify_listeners("e", json!(1), true);

        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        plugin.add_listener("e", collect(&first));
        plugin.add_listener("e", collect(&second));

        assert_eq!(first.lock().len(), 1);
        assert!(second.lock().is_empty());
    }

    #[test]
    fn two_listeners_both_receive() {
        let plugin = WebPlugin::new();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));
        plugin.add_listener("change", collect(&a));
        plugin.add_listener("change", collect(&b));

        plugin.notify_listeners("change", json!({"v": 1}), false);

        assert_eq!(*a.lock(), vec![json!({"v": 1})]);
        assert_eq!(*b.lock(), vec![json!({"v": 1})]);
    }

    #[test]
    fn remove_all_then_notify_is_silent_and_requeues() {
        let plugin = WebPlugin::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        plugin.add_listener("change", collect(&log));
        plugin.remove_all_listeners();

        plugin.notify_listeners("change", json!({"v": 1}), false);
        assert!(log.lock().is_empty());
        assert!(!plugin.has_listeners("change"));

        plugin.notify_listeners("change", json!({"v": 2}), true);
        assert_eq!(plugin.retained_count("change"), 1);

        let next = Arc::new(Mutex::new(Vec::new()));
        plugin.add_listener("change", collect(&next));
        assert_eq!(*next.lock(), vec![json!({"v": 2})]);
    }

    #[tokio::test]
    async fn handle_removes_only_its_listener() {
        let plugin = WebPlugin::new();
        let a = Arc::new(Mutex::new(Vec::new()));
        let b = Arc::new(Mutex::new(Vec::new()));
        let handle = plugin.add_listener("e", collect(&a));
        plugin.add_listener("e", collect(&b));

        handle.remove().await.unwrap();
        plugin.notify_listeners("e", json!(1), false);

        assert!(a.lock().is_empty());
        assert_eq!(b.lock().len(), 1);
    }

    #[test]
    fn listener_may_reenter_plugin() {
        let plugin = WebPlugin::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let inner = plugin.clone();
        let sink = collect(&log);
        plugin.add_listener(
            "outer",
            Arc::new(move |data: &Value| {
                inner.notify_listeners("inner", data.clone(), true);
            }),
        );
        plugin.notify_listeners("outer", json!("hi"), false);
        plugin.add_listener("inner", sink);

        assert_eq!(*log.lock(), vec![json!("hi")]);
    }

    #[test]
    fn window_events_reach_plugin_listeners_once() {
        let window = Arc::new(LocalWindow::new());
        let plugin = WebPlugin::with_window(window.clone());
        plugin.register_window_listener("online", "networkStatusChange");
        plugin.register_window_listener("online", "networkStatusChange");

        let log = Arc::new(Mutex::new(Vec::new()));
        plugin.add_listener("networkStatusChange", collect(&log));
        window.dispatch_event("online", &json!({"connected": true}));

        assert_eq!(*log.lock(), vec![json!({"connected": true})]);
        assert_eq!(window.hook_count("online"), 1);
    }

    #[tokio::test]
    async fn removing_last_listener_detaches_window_hook() {
        let window = Arc::new(LocalWindow::new());
        let plugin = WebPlugin::with_window(window.clone());
        plugin.register_window_listener("resize", "resized");
        let handle = plugin.add_listener("resized", Arc::new(|_: &Value| {}));
        assert_eq!(window.hook_count("resize"), 1);

        handle.remove().await.unwrap();
        assert_eq!(window.hook_count("resize"), 0);
        assert!(!plugin.is_window_listener_registered("resize", "resized"));

        plugin.add_listener("resized", Arc::new(|_: &Value| {}));
        assert_eq!(window.hook_count("resize"), 1);
    }

    #[test]
    fn remove_all_unhooks_window() {
        let window = Arc::new(LocalWindow::new());
        let plugin = WebPlugin::with_window(window.clone());
        plugin.register_window_listener("offline", "networkStatusChange");
        plugin.remove_all_listeners();
        assert_eq!(window.hook_count("offline"), 0);
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Change {
        v: i64,
    }

    #[test]
    fn typed_listener_decodes_and_skips_bad_payloads() {
        let plugin = WebPlugin::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        plugin.add_typed_listener("change", move |change: Change| sink.lock().push(change.v));

        plugin.notify_listeners("change", json!({"v": 3}), false);
        plugin.notify_listeners("change", json!("garbage"), false);

        assert_eq!(*seen.lock(), vec![3]);
    }

    #[test]
    fn exception_helpers_carry_codes() {
        let plugin = WebPlugin::new();
        let err = plugin.unimplemented(None);
        assert_eq!(err.code(), Some(ExceptionCode::Unimplemented));
        assert_eq!(err.message(), "not implemented");
        let err = plugin.unavailable(Some("no camera"));
        assert_eq!(err.code(), Some(ExceptionCode::Unavailable));
        assert_eq!(err.message(), "no camera");
    }

    #[derive(Debug, Default, Deserialize, Serialize)]
    #[serde(default)]
    struct Options {
        value: Option<String>,
    }

    struct EchoWeb {
        base: WebPlugin,
    }

    impl WebImplementation for EchoWeb {
        fn web_plugin(&self) -> &WebPlugin {
            &self.base
        }

        fn methods() -> MethodTable<Self> {
            MethodTable::new()
                .method("echo", |_this: Arc<Self>, opts: Options| async move { Ok(opts) })
                .method("ping", |_this: Arc<Self>, (): ()| async move { Ok("pong") })
        }
    }

    #[tokio::test]
    async fn method_table_decodes_and_encodes() {
        let bound = BoundImplementation::new(EchoWeb {
            base: WebPlugin::new(),
        });
        assert_eq!(bound.method_names(), vec!["echo", "ping"]);

        let out = bound
            .invoke("echo", json!({"value": "hi"}))
            .unwrap()
            .await
            .unwrap();
        assert_eq!(out, json!({"value": "hi"}));

        let out = bound.invoke("echo", Value::Null).unwrap().await.unwrap();
        assert_eq!(out, json!({"value": null}));

        let out = bound.invoke("ping", json!({})).unwrap().await.unwrap();
        assert_eq!(out, json!("pong"));

        assert!(bound.invoke("missing", Value::Null).is_none());
    }

    #[tokio::test]
    async fn bad_options_are_reported() {
        let bound = BoundImplementation::new(EchoWeb {
            base: WebPlugin::new(),
        });
        let err = bound
            .invoke("echo", json!({"value": 5}))
            .unwrap()
            .await
            .unwrap_err();
        assert_eq!(err.code(), None);
        assert!(err.message().contains("echo"));
    }
}
