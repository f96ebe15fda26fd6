//! Listener registry with retained-event replay.
//!
//! [`ListenerRegistry`] is the bookkeeping half of the fallback event model:
//! it maps event names to ordered callback lists and keeps a queue of
//! *retained* payloads for events that were notified with
//! `retain_until_consumed` while nobody was listening.
//!
//! The registry itself never calls user code. Its mutating operations return
//! what must be delivered ([`Added::replay`], [`Notify::Deliver`]) so the
//! owner can release its lock before invoking callbacks; see
//! [`invoke_listeners`].
//!
//! ```text
//! notify(e, d, retain) ──► listeners for e? ──yes──► Deliver(callbacks, d)
//!                                   │
//!                                   no ──► retain? ──yes──► queue[e].push(d)
//!                                                   └─no──► Dropped
//!
//! add(e, cb) ──► listeners[e].push(cb) ──► replay = queue[e].drain(..)
//!                                              └─► replay non-empty? mark e replaying
//! ```
//!
//! While an event is marked replaying, [`prepare_notify`](ListenerRegistry::prepare_notify)
//! answers [`Notify::Deferred`] and parks the payload. The caller that owns
//! the replay hands the retained payloads to the new callback, then drains
//! the parked ones with [`next_deferred`](ListenerRegistry::next_deferred),
//! which clears the mark once the queue is empty. Retained payloads therefore
//! always arrive before anything notified after them.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::{error, trace};
use uuid::Uuid;

use crate::error::PluginResult;

/// A listener callback. Invoked synchronously with each event payload.
pub type ListenerCallback<T = Value> = Arc<dyn Fn(&T) + Send + Sync>;

/// Opaque identity of one listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(Uuid);

impl ListenerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One registration: `{event_name, callback, id}`.
pub struct ListenerEntry<T = Value> {
    pub event_name: String,
    pub id: ListenerId,
    pub callback: ListenerCallback<T>,
}

impl<T> Clone for ListenerEntry<T> {
    fn clone(&self) -> Self {
        Self {
            event_name: self.event_name.clone(),
            id: self.id,
            callback: Arc::clone(&self.callback),
        }
    }
}

impl<T> fmt::Debug for ListenerEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerEntry")
            .field("event_name", &self.event_name)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// Outcome of [`ListenerRegistry::add`].
pub struct Added<T> {
    pub id: ListenerId,
    /// `true` when the event had no listeners before this one.
    pub first: bool,
    /// Retained payloads, in emission order, to hand to the new callback.
    pub replay: Vec<T>,
}

/// Outcome of [`ListenerRegistry::prepare_notify`].
pub enum Notify<T> {
    /// Invoke these callbacks, in order, with the payload.
    Deliver(Vec<ListenerCallback<T>>, T),
    /// No listeners; payload queued for the next listener.
    Retained,
    /// No listeners and retention not requested.
    Dropped,
    /// A replay is in progress for the event; the payload waits for it.
    Deferred,
}

/// Outcome of [`ListenerRegistry::remove`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    /// The registration was not found.
    Missing,
    /// Removed; other listeners for the event remain.
    Remaining,
    /// Removed the last listener for the event.
    LastForEvent,
}

// =============================================================================
// ListenerRegistry
// =============================================================================

/// Per-instance event bookkeeping.
///
/// An event name that has listeners never also has retained payloads once an
/// [`add`](Self::add) returns: adding drains the queue.
pub struct ListenerRegistry<T = Value> {
    listeners: HashMap<String, Vec<ListenerEntry<T>>>,
    retained: HashMap<String, VecDeque<T>>,
    deferred: HashMap<String, VecDeque<(T, bool)>>,
}

impl<T> Default for ListenerRegistry<T> {
    fn default() -> Self {
        Self {
            listeners: HashMap::new(),
            retained: HashMap::new(),
            deferred: HashMap::new(),
        }
    }
}

impl<T> ListenerRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a callback and drains any retained payloads for the event.
    ///
    /// A non-empty [`Added::replay`] marks the event replaying; the caller
    /// must drain [`next_deferred`](Self::next_deferred) after handing the
    /// replay to the callback.
    pub fn add(&mut self, event_name: &str, callback: ListenerCallback<T>) -> Added<T> {
        let list = self.listeners.entry(event_name.to_string()).or_default();
        let first = list.is_empty();
        let id = ListenerId::new();
        list.push(ListenerEntry {
            event_name: event_name.to_string(),
            id,
            callback,
        });

        let replay = self
            .retained
            .remove(event_name)
            .map(Vec::from)
            .unwrap_or_default();
        if !replay.is_empty() {
            self.deferred.entry(event_name.to_string()).or_default();
        }

        Added { id, first, replay }
    }

    /// Removes one registration.
    pub fn remove(&mut self, event_name: &str, id: ListenerId) -> Removed {
        let Some(list) = self.listeners.get_mut(event_name) else {
            return Removed::Missing;
        };
        let Some(pos) = list.iter().position(|entry| entry.id == id) else {
            return Removed::Missing;
        };
        list.remove(pos);
        if list.is_empty() {
            self.listeners.remove(event_name);
            Removed::LastForEvent
        } else {
            Removed::Remaining
        }
    }

    /// Drops every registration. Retained queues are kept.
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    /// Decides what a notification of `event_name` does.
    pub fn prepare_notify(&mut self, event_name: &str, data: T, retain: bool) -> Notify<T> {
        if let Some(queue) = self.deferred.get_mut(event_name) {
            queue.push_back((data, retain));
            return Notify::Deferred;
        }
        self.route(event_name, data, retain)
    }

    /// Takes the next payload parked during a replay of `event_name`.
    ///
    /// Returns `None` and clears the replay mark once nothing is parked.
    pub fn next_deferred(&mut self, event_name: &str) -> Option<Notify<T>> {
        let next = self.deferred.get_mut(event_name)?.pop_front();
        match next {
            Some((data, retain)) => Some(self.route(event_name, data, retain)),
            None => {
                self.deferred.remove(event_name);
                None
            }
        }
    }

    /// Whether a replay is in progress for `event_name`.
    pub fn is_replaying(&self, event_name: &str) -> bool {
        self.deferred.contains_key(event_name)
    }

    fn route(&mut self, event_name: &str, data: T, retain: bool) -> Notify<T> {
        match self.listeners.get(event_name) {
            Some(list) if !list.is_empty() => Notify::Deliver(
                list.iter().map(|entry| Arc::clone(&entry.callback)).collect(),
                data,
            ),
            _ if retain => {
                self.retained
                    .entry(event_name.to_string())
                    .or_default()
                    .push_back(data);
                Notify::Retained
            }
            _ => Notify::Dropped,
        }
    }

    pub fn has_listeners(&self, event_name: &str) -> bool {
        self.listeners
            .get(event_name)
            .is_some_and(|list| !list.is_empty())
    }

    pub fn listener_count(&self, event_name: &str) -> usize {
        self.listeners.get(event_name).map_or(0, Vec::len)
    }

    /// Number of payloads waiting for a listener of `event_name`.
    pub fn retained_count(&self, event_name: &str) -> usize {
        self.retained.get(event_name).map_or(0, VecDeque::len)
    }

    /// Names of every event that currently has listeners.
    pub fn event_names(&self) -> Vec<String> {
        self.listeners.keys().cloned().collect()
    }
}

impl<T> fmt::Debug for ListenerRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let listeners: HashMap<&str, usize> = self
            .listeners
            .iter()
            .map(|(name, list)| (name.as_str(), list.len()))
            .collect();
        let retained: HashMap<&str, usize> = self
            .retained
            .iter()
            .map(|(name, queue)| (name.as_str(), queue.len()))
            .collect();
        let replaying: Vec<&str> = self.deferred.keys().map(String::as_str).collect();
        f.debug_struct("ListenerRegistry")
            .field("listeners", &listeners)
            .field("retained", &retained)
            .field("replaying", &replaying)
            .finish()
    }
}

/// Invokes `callbacks` in order with `data`.
///
/// A panicking callback is caught and logged; the remaining callbacks still
/// run. Returns the number of callbacks that completed normally.
pub fn invoke_listeners<T>(
    event_name: &str,
    callbacks: &[ListenerCallback<T>],
    data: &T,
) -> usize {
    let mut completed = 0;
    for (index, callback) in callbacks.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| callback(data))) {
            Ok(()) => completed += 1,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    event = %event_name,
                    listener = index,
                    reason = %reason,
                    "Listener callback panicked"
                );
            }
        }
    }
    trace!(event = %event_name, delivered = completed, "Listeners notified");
    completed
}

// =============================================================================
// PluginListenerHandle
// =============================================================================

type RemoveFn = Box<dyn FnOnce() -> BoxFuture<'static, PluginResult<()>> + Send>;

/// Handle returned by `add_listener`; removes exactly that registration.
///
/// Dropping the handle does **not** remove the listener.
pub struct PluginListenerHandle {
    event_name: String,
    remove_fn: RemoveFn,
}

impl PluginListenerHandle {
    /// Creates a handle whose removal runs `remove`.
    pub fn new<F, Fut>(event_name: impl Into<String>, remove: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = PluginResult<()>> + Send + 'static,
    {
        Self {
            event_name: event_name.into(),
            remove_fn: Box::new(move || remove().boxed()),
        }
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Removes the listener this handle was created for.
    pub async fn remove(self) -> PluginResult<()> {
        (self.remove_fn)().await
    }
}

impl fmt::Debug for PluginListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginListenerHandle")
            .field("event_name", &self.event_name)
            .finish_non_exhaustive()
    }
}
