//! The `WebView` plugin.
//!
//! Controls where the native web view serves the app from. It exists only on
//! native hosts: there is no in-process fallback, so every call made on a
//! web-hosted platform fails with `UNIMPLEMENTED`.
//!
//! [`WebViewHost`] is an in-process native side for hosts driven through
//! [`InProcessBridge`](capacitor_core::InProcessBridge).

use std::sync::Arc;

use capacitor_core::{Implementations, NativePlugin, PluginHandle, PluginRegistry, PluginResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

/// Registered plugin name.
pub const WEB_VIEW: &str = "WebView";

/// A filesystem path handed to or returned by the web view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebViewPath {
    pub path: String,
}

/// Typed client for the `WebView` plugin.
#[derive(Debug, Clone)]
pub struct WebView {
    handle: PluginHandle,
}

impl WebView {
    pub fn register(registry: &PluginRegistry) -> Self {
        Self {
            handle: registry.register(WEB_VIEW, Implementations::new()),
        }
    }

    pub fn handle(&self) -> &PluginHandle {
        &self.handle
    }

    /// Serves the app from bundled assets under `path`.
    pub async fn set_server_asset_path(&self, path: impl Into<String>) -> PluginResult<()> {
        let options = WebViewPath { path: path.into() };
        self.handle.call_typed("setServerAssetPath", &options).await
    }

    /// Serves the app from the directory at `path`.
    pub async fn set_server_base_path(&self, path: impl Into<String>) -> PluginResult<()> {
        let options = WebViewPath { path: path.into() };
        self.handle.call_typed("setServerBasePath", &options).await
    }

    pub async fn get_server_base_path(&self) -> PluginResult<WebViewPath> {
        self.handle.call_typed("getServerBasePath", &Value::Null).await
    }

    /// Keeps the current base path across app restarts.
    pub async fn persist_server_base_path(&self) -> PluginResult<()> {
        self.handle.call_typed("persistServerBasePath", &Value::Null).await
    }
}

// =============================================================================
// In-process native side
// =============================================================================

#[derive(Debug, Default)]
struct WebViewState {
    asset_path: Option<String>,
    base_path: String,
    persisted: Option<String>,
}

/// Native `WebView` state for in-process hosts.
#[derive(Debug, Clone, Default)]
pub struct WebViewHost {
    state: Arc<Mutex<WebViewState>>,
}

impl WebViewHost {
    pub fn new(base_path: impl Into<String>) -> Self {
        let state = WebViewState {
            base_path: base_path.into(),
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn base_path(&self) -> String {
        self.state.lock().base_path.clone()
    }

    pub fn asset_path(&self) -> Option<String> {
        self.state.lock().asset_path.clone()
    }

    /// The path restored on the next launch, if one was persisted.
    pub fn persisted_path(&self) -> Option<String> {
        self.state.lock().persisted.clone()
    }

    /// The native plugin to register on an `InProcessBridge`.
    pub fn native_plugin(&self) -> NativePlugin {
        let assets = Arc::clone(&self.state);
        let base = Arc::clone(&self.state);
        let get = Arc::clone(&self.state);
        let persist = Arc::clone(&self.state);

        NativePlugin::new(WEB_VIEW)
            .promise("setServerAssetPath", move |options| {
                let state = Arc::clone(&assets);
                async move {
                    let WebViewPath { path } = serde_json::from_value(options)?;
                    debug!(path = %path, "Serving from asset path");
                    state.lock().asset_path = Some(path);
                    Ok(Value::Null)
                }
            })
            .promise("setServerBasePath", move |options| {
                let state = Arc::clone(&base);
                async move {
                    let WebViewPath { path } = serde_json::from_value(options)?;
                    debug!(path = %path, "Serving from base path");
                    state.lock().base_path = path;
                    Ok(Value::Null)
                }
            })
            .promise("getServerBasePath", move |_| {
                let state = Arc::clone(&get);
                async move { Ok(json!({ "path": state.lock().base_path })) }
            })
            .promise("persistServerBasePath", move |_| {
                let state = Arc::clone(&persist);
                async move {
                    let mut state = state.lock();
                    info!(path = %state.base_path, "Persisting server base path");
                    state.persisted = Some(state.base_path.clone());
                    Ok(Value::Null)
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capacitor_core::{ExceptionCode, InProcessBridge, PlatformId};

    #[tokio::test]
    async fn web_has_no_fallback() {
        let registry = PluginRegistry::new(PlatformId::Web);
        let web_view = WebView::register(&registry);

        let err = web_view.get_server_base_path().await.unwrap_err();
        assert_eq!(err.code(), Some(ExceptionCode::Unimplemented));
        assert_eq!(err.message(), "\"WebView\" plugin is not implemented on web");
        assert!(!web_view.handle().is_available());
    }

    #[tokio::test]
    async fn native_host_round_trip() {
        let host = WebViewHost::new("/app/public");
        let bridge = InProcessBridge::new("android").with_plugin(host.native_plugin());
        let registry = PluginRegistry::builder(PlatformId::Android)
            .bridge(Arc::new(bridge))
            .build();
        let web_view = WebView::register(&registry);

        assert_eq!(
            web_view.get_server_base_path().await.unwrap(),
            WebViewPath { path: "/app/public".into() }
        );

        web_view.set_server_base_path("/data/update-42").await.unwrap();
        web_view.persist_server_base_path().await.unwrap();
        web_view.set_server_asset_path("public").await.unwrap();

        assert_eq!(host.base_path(), "/data/update-42");
        assert_eq!(host.persisted_path().as_deref(), Some("/data/update-42"));
        assert_eq!(host.asset_path().as_deref(), Some("public"));
    }
}
