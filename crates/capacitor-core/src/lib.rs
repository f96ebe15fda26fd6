//! # Capacitor Core
//!
//! Plugin dispatch and listener lifecycle for the Capacitor bridge.
//!
//! Application code talks to every capability through the same proxy,
//! whether the implementation runs in a native host or as an in-process
//! fallback. This crate provides that proxy and the machinery behind it.
//!
//! ## Components
//!
//! - **Exception model**: [`CapacitorException`] with an optional
//!   [`ExceptionCode`] (`UNIMPLEMENTED` / `UNAVAILABLE`).
//! - **Platform identifier**: [`PlatformId`], resolved once from an
//!   [`Environment`] by [`PlatformResolver`].
//! - **Listener registry**: [`ListenerRegistry`] with retained-event replay.
//! - **Window-event bridge**: [`WindowBridge`] relays environment events
//!   ([`EventTarget`]) into plugin events.
//! - **Fallback base**: [`WebPlugin`], embedded by every fallback, plus
//!   [`WebImplementation`] / [`MethodTable`] to expose methods.
//! - **Native bridge**: the [`NativeBridge`] contract and the in-memory
//!   [`InProcessBridge`].
//! - **Dispatcher**: [`PluginRegistry::register`] returns a [`PluginHandle`]
//!   that routes each call when it is made.
//!
//! ## Dispatch
//!
//! ```text
//! ┌─────────────┐   register   ┌────────────────┐
//! │ Application │─────────────▶│ PluginRegistry │
//! └─────────────┘              └────────────────┘
//!        │ call(m, a)                  │
//!        ▼                             ▼
//! ┌──────────────┐  header has m  ┌──────────────┐
//! │ PluginHandle │───────────────▶│ NativeBridge │
//! └──────────────┘                └──────────────┘
//!        │ otherwise
//!        ▼
//! ┌──────────────────┐
//! │ FallbackInstance │──▶ WebPlugin (listeners, window bridge)
//! └──────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use capacitor_core::{Implementations, PlatformId, PluginRegistry, WebPlugin};
//! use serde_json::json;
//!
//! let registry = PluginRegistry::new(PlatformId::Web);
//! let device = registry.register(
//!     "Device",
//!     Implementations::new().web(|ctx| async move { Ok(DeviceWeb::new(ctx)) }),
//! );
//!
//! let info = device.call("getInfo", json!({})).await?;
//! ```

pub mod error;
pub mod listener;
pub mod native;
pub mod platform;
pub mod plugin;
pub mod registry;
pub mod web_plugin;
pub mod window;

pub use error::{CapacitorException, ExceptionCode, ExceptionData, PluginResult};
pub use listener::{
    ListenerCallback, ListenerEntry, ListenerId, ListenerRegistry, PluginListenerHandle,
    invoke_listeners,
};
pub use native::{
    CallbackId, InProcessBridge, MethodHeader, MethodType, NativeBridge, NativeCallback,
    NativePlugin, PluginHeader,
};
pub use platform::{
    ANDROID_BRIDGE_MARKER, Environment, IOS_BRIDGE_MARKER, MarkerSet, PlatformId,
    PlatformResolver, resolve_platform,
};
pub use plugin::{ImplementationContext, Implementations, PluginHandle};
pub use registry::{PluginRegistry, PluginRegistryBuilder};
pub use web_plugin::{
    BoundImplementation, FallbackInstance, MethodTable, WebImplementation, WebPlugin,
    typed_callback,
};
pub use window::{EventTarget, HookId, LocalWindow, WindowBridge, WindowEventHandler};

// Re-export for implementors of `NativeBridge`.
pub use async_trait::async_trait;
