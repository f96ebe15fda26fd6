//! Window-event bridge.
//!
//! Fallback plugins often surface environment-level notifications (network
//! changes, visibility, app state) as plugin events. The ambient environment
//! is modelled by [`EventTarget`]; a [`WindowBridge`] owns one
//! [`WindowListenerHandle`] per distinct `(window event, plugin event)` pair
//! and guarantees the underlying hook is attached at most once.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::listener::invoke_listeners;

/// Handler attached to an environment event.
pub type WindowEventHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Identity of one attached environment hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// The ambient environment's event source (the browser `window` analogue).
pub trait EventTarget: Send + Sync {
    /// Attaches `handler` to `event_name`.
    fn add_event_listener(&self, event_name: &str, handler: WindowEventHandler) -> HookId;

    /// Detaches a hook previously returned by [`add_event_listener`](Self::add_event_listener).
    fn remove_event_listener(&self, event_name: &str, hook: HookId);
}

// =============================================================================
// LocalWindow
// =============================================================================

/// An in-process [`EventTarget`].
///
/// Used as the environment for web-hosted runtimes; the embedder forwards
/// environment notifications through [`dispatch_event`](Self::dispatch_event).
#[derive(Default)]
pub struct LocalWindow {
    next_hook: AtomicU64,
    hooks: Mutex<HashMap<String, Vec<(HookId, WindowEventHandler)>>>,
}

impl LocalWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires `event_name` to every attached hook, in attach order.
    ///
    /// Returns the number of hooks that ran to completion.
    pub fn dispatch_event(&self, event_name: &str, payload: &Value) -> usize {
        let handlers: Vec<WindowEventHandler> = self
            .hooks
            .lock()
            .get(event_name)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        trace!(event = %event_name, hooks = handlers.len(), "Dispatching window event");
        invoke_listeners(event_name, &handlers, payload)
    }

    /// Number of hooks currently attached to `event_name`.
    pub fn hook_count(&self, event_name: &str) -> usize {
        self.hooks.lock().get(event_name).map_or(0, Vec::len)
    }
}

impl EventTarget for LocalWindow {
    fn add_event_listener(&self, event_name: &str, handler: WindowEventHandler) -> HookId {
        let hook = HookId(self.next_hook.fetch_add(1, Ordering::Relaxed));
        self.hooks
            .lock()
            .entry(event_name.to_string())
            .or_default()
            .push((hook, handler));
        hook
    }

    fn remove_event_listener(&self, event_name: &str, hook: HookId) {
        let mut hooks = self.hooks.lock();
        if let Some(list) = hooks.get_mut(event_name) {
            list.retain(|(id, _)| *id != hook);
            if list.is_empty() {
                hooks.remove(event_name);
            }
        }
    }
}

impl fmt::Debug for LocalWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hooks: HashMap<String, usize> = self
            .hooks
            .lock()
            .iter()
            .map(|(name, list)| (name.clone(), list.len()))
            .collect();
        f.debug_struct("LocalWindow").field("hooks", &hooks).finish()
    }
}

// =============================================================================
// WindowBridge
// =============================================================================

/// Relay from one environment event to one plugin event.
pub struct WindowListenerHandle {
    pub window_event_name: String,
    pub plugin_event_name: String,
    /// Whether the environment hook is currently attached.
    pub registered: bool,
    handler: WindowEventHandler,
    hook: Option<HookId>,
}

impl fmt::Debug for WindowListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowListenerHandle")
            .field("window_event_name", &self.window_event_name)
            .field("plugin_event_name", &self.plugin_event_name)
            .field("registered", &self.registered)
            .finish()
    }
}

/// Per-instance set of window relays.
///
/// Without an [`EventTarget`] every operation is a no-op apart from
/// bookkeeping, so fallbacks can be built for environments with no event
/// source.
#[derive(Default)]
pub struct WindowBridge {
    target: Option<Arc<dyn EventTarget>>,
    handles: HashMap<(String, String), WindowListenerHandle>,
}

impl WindowBridge {
    pub fn new(target: Option<Arc<dyn EventTarget>>) -> Self {
        Self {
            target,
            handles: HashMap::new(),
        }
    }

    pub fn target(&self) -> Option<&Arc<dyn EventTarget>> {
        self.target.as_ref()
    }

    /// Records a relay and attaches it. No-op if the pair already exists.
    ///
    /// Returns `true` when a new relay was created.
    pub fn register(
        &mut self,
        window_event_name: &str,
        plugin_event_name: &str,
        handler: WindowEventHandler,
    ) -> bool {
        let key = (window_event_name.to_string(), plugin_event_name.to_string());
        if self.handles.contains_key(&key) {
            trace!(
                window_event = %window_event_name,
                plugin_event = %plugin_event_name,
                "Window listener already registered"
            );
            return false;
        }

        let mut handle = WindowListenerHandle {
            window_event_name: window_event_name.to_string(),
            plugin_event_name: plugin_event_name.to_string(),
            registered: false,
            handler,
            hook: None,
        };
        Self::attach(self.target.as_deref(), &mut handle);
        self.handles.insert(key, handle);
        true
    }

    /// Re-attaches every detached relay feeding `plugin_event_name`.
    pub fn attach_for(&mut self, plugin_event_name: &str) {
        let target = self.target.as_deref();
        for handle in self
            .handles
            .values_mut()
            .filter(|h| h.plugin_event_name == plugin_event_name && !h.registered)
        {
            Self::attach(target, handle);
        }
    }

    /// Detaches every relay feeding `plugin_event_name`, keeping the records.
    pub fn detach_for(&mut self, plugin_event_name: &str) {
        let target = self.target.as_deref();
        for handle in self
            .handles
            .values_mut()
            .filter(|h| h.plugin_event_name == plugin_event_name)
        {
            Self::detach(target, handle);
        }
    }

    /// Detaches and forgets every relay.
    pub fn clear(&mut self) {
        let target = self.target.as_deref();
        for handle in self.handles.values_mut() {
            Self::detach(target, handle);
        }
        self.handles.clear();
    }

    pub fn is_registered(&self, window_event_name: &str, plugin_event_name: &str) -> bool {
        self.handles
            .get(&(window_event_name.to_string(), plugin_event_name.to_string()))
            .is_some_and(|h| h.registered)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    fn attach(target: Option<&dyn EventTarget>, handle: &mut WindowListenerHandle) {
        if handle.registered {
            return;
        }
        let Some(target) = target else {
            return;
        };
        let hook =
            target.add_event_listener(&handle.window_event_name, Arc::clone(&handle.handler));
        handle.hook = Some(hook);
        handle.registered = true;
        debug!(
            window_event = %handle.window_event_name,
            plugin_event = %handle.plugin_event_name,
            "Window listener attached"
        );
    }

    fn detach(target: Option<&dyn EventTarget>, handle: &mut WindowListenerHandle) {
        if let (Some(target), Some(hook)) = (target, handle.hook.take()) {
            target.remove_event_listener(&handle.window_event_name, hook);
            debug!(
                window_event = %handle.window_event_name,
                plugin_event = %handle.plugin_event_name,
                "Window listener detached"
            );
        }
        handle.registered = false;
    }
}

impl fmt::Debug for WindowBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowBridge")
            .field("has_target", &self.target.is_some())
            .field("handles", &self.handles.values().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counting_handler(count: &Arc<AtomicUsize>) -> WindowEventHandler {
        let count = Arc::clone(count);
        Arc::new(move |_: &Value| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn register_is_idempotent_per_pair() {
        let window = Arc::new(LocalWindow::new());
        let mut bridge = WindowBridge::new(Some(window.clone()));
        let count = Arc::new(AtomicUsize::new(0));

        assert!(bridge.register("online", "networkStatusChange", counting_handler(&count)));
        assert!(!bridge.register("online", "networkStatusChange", counting_handler(&count)));

        assert_eq!(window.hook_count("online"), 1);
        window.dispatch_event("online", &json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_pairs_get_distinct_hooks() {
        let window = Arc::new(LocalWindow::new());
        let mut bridge = WindowBridge::new(Some(window.clone()));
        let count = Arc::new(AtomicUsize::new(0));

        bridge.register("online", "networkStatusChange", counting_handler(&count));
        bridge.register("offline", "networkStatusChange", counting_handler(&count));

        assert_eq!(bridge.len(), 2);
        assert_eq!(window.hook_count("online"), 1);
        assert_eq!(window.hook_count("offline"), 1);
    }

    #[test]
    fn detach_and_reattach() {
        let window = Arc::new(LocalWindow::new());
        let mut bridge = WindowBridge::new(Some(window.clone()));
        let count = Arc::new(AtomicUsize::new(0));
        bridge.register("resize", "resized", counting_handler(&count));

        bridge.detach_for("resized");
        assert!(!bridge.is_registered("resize", "resized"));
        assert_eq!(window.hook_count("resize"), 0);

        bridge.attach_for("resized");
        assert!(bridge.is_registered("resize", "resized"));
        assert_eq!(window.hook_count("resize"), 1);
    }

    #[test]
    fn clear_unhooks_everything() {
        let window = Arc::new(LocalWindow::new());
        let mut bridge = WindowBridge::new(Some(window.clone()));
        let count = Arc::new(AtomicUsize::new(0));
        bridge.register("a", "x", counting_handler(&count));
        bridge.register("b", "y", counting_handler(&count));

        bridge.clear();

        assert!(bridge.is_empty());
        assert_eq!(window.hook_count("a"), 0);
        assert_eq!(window.dispatch_event("b", &json!(null)), 0);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_target_only_records() {
        let mut bridge = WindowBridge::new(None);
        let count = Arc::new(AtomicUsize::new(0));
        assert!(bridge.register("a", "x", counting_handler(&count)));
        assert!(!bridge.is_registered("a", "x"));
    }
}
