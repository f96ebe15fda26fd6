//! Built-in plugins for the Capacitor bridge.
//!
//! | Plugin             | Web fallback                          | Native |
//! |--------------------|---------------------------------------|--------|
//! | `WebView`          | none (`UNIMPLEMENTED` off native)     | yes    |
//! | `CapacitorCookies` | [`CookieStore`] (in-memory by default) | yes    |
//! | `CapacitorHttp`    | `reqwest`                             | yes    |
//!
//! Every plugin registers through the public [`PluginRegistry`] API and comes
//! with a typed client wrapping its [`PluginHandle`](capacitor_core::PluginHandle).
//!
//! ```rust,ignore
//! use capacitor_plugins::{HttpOptions, register_core_plugins};
//!
//! let plugins = register_core_plugins(cap.registry());
//! let response = plugins.http.get(&HttpOptions::new("https://example.com")).await?;
//! ```

pub mod cookies;
pub mod http;
pub mod web_view;

use capacitor_core::PluginRegistry;

pub use cookies::{
    CAPACITOR_COOKIES, CapacitorCookies, ClearCookieOptions, CookieStore, DeleteCookieOptions,
    GetCookieOptions, HttpCookieMap, MemoryCookieJar, SetCookieOptions,
};
pub use http::{
    CAPACITOR_HTTP, CapacitorHttp, HttpDataType, HttpOptions, HttpParam, HttpPluginConfig,
    HttpResponse, HttpResponseType, build_request,
};
pub use web_view::{WEB_VIEW, WebView, WebViewHost, WebViewPath};

/// Typed clients of every built-in plugin.
#[derive(Debug, Clone)]
pub struct CorePlugins {
    pub web_view: WebView,
    pub cookies: CapacitorCookies,
    pub http: CapacitorHttp,
}

/// Registers `WebView`, `CapacitorCookies` and `CapacitorHttp` on `registry`.
pub fn register_core_plugins(registry: &PluginRegistry) -> CorePlugins {
    CorePlugins {
        web_view: WebView::register(registry),
        cookies: CapacitorCookies::register(registry),
        http: CapacitorHttp::register(registry),
    }
}
