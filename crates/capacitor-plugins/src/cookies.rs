//! The `CapacitorCookies` plugin.
//!
//! On web-hosted platforms cookies live in a [`CookieStore`], the analogue of
//! `document.cookie`: reads yield `key=value` pairs joined by `; ` and every
//! write is a single `Set-Cookie`-style assignment. Keys and values are
//! URI-encoded on the way in and decoded on the way out.
//!
//! ```text
//! setCookie({key: "a b", value: "1"})  ──▶  "a%20b=1; path=/; SameSite=Lax"
//! deleteCookie({key: "a b"})           ──▶  "a%20b=; expires=Thu, 01 Jan 1970 00:00:00 GMT; path=/"
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use capacitor_core::{
    ImplementationContext, Implementations, MethodTable, PluginHandle, PluginRegistry,
    PluginResult, WebImplementation, WebPlugin,
};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

/// Registered plugin name.
pub const CAPACITOR_COOKIES: &str = "CapacitorCookies";

/// Expiry written when a cookie is removed.
pub const EXPIRED: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// Cookie values by key.
pub type HttpCookieMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetCookieOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

pub type ClearCookieOptions = GetCookieOptions;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetCookieOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub key: String,
    pub value: String,
    /// Defaults to `/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// An HTTP date. Session cookie when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
}

impl SetCookieOptions {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            ..Default::default()
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn expires(mut self, expires: impl Into<String>) -> Self {
        self.expires = Some(expires.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCookieOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub key: String,
}

// =============================================================================
// CookieStore
// =============================================================================

/// Backing store of the web fallback.
pub trait CookieStore: Send + Sync {
    /// Live cookies as `key=value` pairs joined by `; `.
    fn cookie_string(&self) -> String;

    /// Applies one assignment such as `k=v; expires=...; path=/`.
    fn set_cookie_string(&self, cookie: &str);
}

#[derive(Debug, Clone)]
struct StoredCookie {
    value: String,
    path: String,
    expires: Option<DateTime<Utc>>,
}

impl StoredCookie {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_none_or(|at| at > now)
    }
}

/// In-memory [`CookieStore`] with `document.cookie` semantics: cookies are
/// keyed by name, a past expiry or `Max-Age<=0` removes them, and expired
/// cookies disappear from reads.
#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: Mutex<BTreeMap<String, StoredCookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// The path a live cookie was stored with.
    pub fn path_of(&self, key: &str) -> Option<String> {
        let now = Utc::now();
        self.cookies
            .lock()
            .get(key)
            .filter(|cookie| cookie.is_live(now))
            .map(|cookie| cookie.path.clone())
    }

    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.cookies.lock().values().filter(|c| c.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CookieStore for MemoryCookieJar {
    fn cookie_string(&self) -> String {
        let now = Utc::now();
        let mut cookies = self.cookies.lock();
        cookies.retain(|_, cookie| cookie.is_live(now));
        cookies
            .iter()
            .map(|(key, cookie)| format!("{key}={}", cookie.value))
            .collect::<Vec<_>>()
            .join("; ")
    }

    fn set_cookie_string(&self, cookie: &str) {
        let mut parts = cookie.split(';');
        let Some((key, value)) = parts.next().and_then(|pair| pair.split_once('=')) else {
            trace!(cookie, "Ignoring cookie assignment without '='");
            return;
        };
        let key = key.trim();
        if key.is_empty() {
            return;
        }

        let now = Utc::now();
        let mut stored = StoredCookie {
            value: value.trim().to_string(),
            path: "/".to_string(),
            expires: None,
        };
        for attribute in parts {
            let (name, arg) = attribute.split_once('=').unwrap_or((attribute, ""));
            let arg = arg.trim();
            match name.trim().to_ascii_lowercase().as_str() {
                "path" if !arg.is_empty() => stored.path = arg.to_string(),
                "expires" => {
                    stored.expires = DateTime::parse_from_rfc2822(arg)
                        .ok()
                        .map(|at| at.with_timezone(&Utc));
                }
                "max-age" => {
                    if let Ok(secs) = arg.parse::<i64>() {
                        stored.expires =
                            Duration::try_seconds(secs).and_then(|ttl| now.checked_add_signed(ttl));
                    }
                }
                _ => {}
            }
        }

        let mut cookies = self.cookies.lock();
        if stored.is_live(now) {
            cookies.insert(key.to_string(), stored);
        } else {
            cookies.remove(key);
        }
    }
}

// =============================================================================
// Web fallback
// =============================================================================

fn encode(raw: &str) -> String {
    urlencoding::encode(raw).into_owned()
}

fn decode(encoded: &str) -> String {
    urlencoding::decode(encoded)
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| encoded.to_string())
}

/// Parses a cookie string into a decoded map. Pairs without `=` are skipped.
pub fn parse_cookie_string(cookies: &str) -> HttpCookieMap {
    cookies
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (decode(key.trim()), decode(value.trim())))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Formats the assignment written by `setCookie`.
pub fn format_set_cookie(options: &SetCookieOptions) -> String {
    let mut cookie = format!("{}={}", encode(&options.key), encode(&options.value));
    if let Some(expires) = &options.expires {
        let expires = expires.trim_start_matches("expires=");
        cookie.push_str(&format!("; expires={expires}"));
    }
    let path = options
        .path
        .as_deref()
        .map(|p| p.trim_start_matches("path="))
        .filter(|p| !p.is_empty())
        .unwrap_or("/");
    cookie.push_str(&format!("; path={path}; SameSite=Lax"));
    cookie
}

fn expired_assignment(encoded_key: &str) -> String {
    format!("{encoded_key}=; expires={EXPIRED}; path=/")
}

struct CookiesWeb {
    base: WebPlugin,
    store: Arc<dyn CookieStore>,
}

impl CookiesWeb {
    fn clear(&self) {
        let cookies = self.store.cookie_string();
        for key in cookies
            .split(';')
            .filter_map(|pair| pair.split_once('=').map(|(key, _)| key.trim()))
            .filter(|key| !key.is_empty())
        {
            self.store.set_cookie_string(&expired_assignment(key));
        }
    }
}

impl WebImplementation for CookiesWeb {
    fn web_plugin(&self) -> &WebPlugin {
        &self.base
    }

    fn methods() -> MethodTable<Self> {
        MethodTable::new()
            .method("getCookies", |this: Arc<Self>, _: GetCookieOptions| async move {
                Ok(parse_cookie_string(&this.store.cookie_string()))
            })
            .method("setCookie", |this: Arc<Self>, options: SetCookieOptions| async move {
                debug!(key = %options.key, "Setting cookie");
                this.store.set_cookie_string(&format_set_cookie(&options));
                Ok(())
            })
            .method(
                "deleteCookie",
                |this: Arc<Self>, options: DeleteCookieOptions| async move {
                    debug!(key = %options.key, "Deleting cookie");
                    this.store
                        .set_cookie_string(&expired_assignment(&encode(&options.key)));
                    Ok(())
                },
            )
            .method("clearCookies", |this: Arc<Self>, _: ClearCookieOptions| async move {
                this.clear();
                Ok(())
            })
            .method("clearAllCookies", |this: Arc<Self>, (): ()| async move {
                this.clear();
                Ok(())
            })
    }
}

// =============================================================================
// Typed client
// =============================================================================

/// Typed client for the `CapacitorCookies` plugin.
#[derive(Debug, Clone)]
pub struct CapacitorCookies {
    handle: PluginHandle,
}

impl CapacitorCookies {
    /// Registers the plugin with a fresh [`MemoryCookieJar`] behind the web
    /// fallback.
    pub fn register(registry: &PluginRegistry) -> Self {
        Self::register_with_store(registry, Arc::new(MemoryCookieJar::new()))
    }

    pub fn register_with_store(registry: &PluginRegistry, store: Arc<dyn CookieStore>) -> Self {
        let implementations =
            Implementations::new().web(move |ctx: ImplementationContext| {
                let store = Arc::clone(&store);
                async move {
                    Ok(CookiesWeb {
                        base: WebPlugin::with_optional_window(ctx.window),
                        store,
                    })
                }
            });
        Self {
            handle: registry.register(CAPACITOR_COOKIES, implementations),
        }
    }

    pub fn handle(&self) -> &PluginHandle {
        &self.handle
    }

    pub async fn get_cookies(&self, url: Option<&str>) -> PluginResult<HttpCookieMap> {
        let options = GetCookieOptions {
            url: url.map(str::to_string),
        };
        self.handle.call_typed("getCookies", &options).await
    }

    pub async fn set_cookie(&self, options: SetCookieOptions) -> PluginResult<()> {
        self.handle.call_typed("setCookie", &options).await
    }

    pub async fn delete_cookie(&self, key: &str, url: Option<&str>) -> PluginResult<()> {
        let options = DeleteCookieOptions {
            url: url.map(str::to_string),
            key: key.to_string(),
        };
        self.handle.call_typed("deleteCookie", &options).await
    }

    /// Clears every cookie in the store; `url` is passed through to native
    /// hosts, which may scope the clearing to it.
    pub async fn clear_cookies(&self, url: Option<&str>) -> PluginResult<()> {
        let options = ClearCookieOptions {
            url: url.map(str::to_string),
        };
        self.handle.call_typed("clearCookies", &options).await
    }

    pub async fn clear_all_cookies(&self) -> PluginResult<()> {
        self.handle.call_typed("clearAllCookies", &Value::Null).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_cookie_string_format() {
        let options = SetCookieOptions::new("session id", "a=b")
            .path("path=/app")
            .expires("expires=Fri, 31 Dec 2100 23:59:59 GMT");
        let formatted = format_set_cookie(&options);
        assert_eq!(
            formatted,
            "session%20id=a%3Db; expires=Fri, 31 Dec 2100 23:59:59 GMT; path=/app; SameSite=Lax"
        );

        let session = format_set_cookie(&SetCookieOptions::new("k", "v"));
        assert_eq!(session, "k=v; path=/; SameSite=Lax");
    }

    #[test]
    fn parse_decodes_and_skips_junk() {
        let map = parse_cookie_string("a%20b=1%3B2; junk; c=; =x");
        assert_eq!(map.get("a b").map(String::as_str), Some("1;2"));
        assert_eq!(map.get("c").map(String::as_str), Some(""));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn jar_honors_expiry_and_max_age() {
        let jar = MemoryCookieJar::new();
        jar.set_cookie_string("a=1; path=/docs");
        jar.set_cookie_string("b=2; expires=Fri, 31 Dec 2100 23:59:59 GMT");
        jar.set_cookie_string("c=3; Max-Age=0");
        assert_eq!(jar.cookie_string(), "a=1; b=2");
        assert_eq!(jar.path_of("a").as_deref(), Some("/docs"));

        jar.set_cookie_string(&format!("a=; expires={EXPIRED}; path=/"));
        assert_eq!(jar.cookie_string(), "b=2");

        jar.set_cookie_string("b=3; max-age=-1");
        assert!(jar.is_empty());
    }

    #[test]
    fn registry_round_trip() {
        let registry = PluginRegistry::new(capacitor_core::PlatformId::Web);
        let cookies = CapacitorCookies::register(&registry);
        tokio_test::block_on(async {
            cookies.set_cookie(SetCookieOptions::new("theme", "dark")).await.unwrap();
            let map = cookies.get_cookies(None).await.unwrap();
            assert_eq!(map.get("theme").map(String::as_str), Some("dark"));
        });
    }

    #[test]
    fn jar_overwrites_by_key() {
        let jar = MemoryCookieJar::new();
        jar.set_cookie_string("a=1");
        jar.set_cookie_string("a=2; path=/x");
        assert_eq!(jar.cookie_string(), "a=2");
        assert_eq!(jar.len(), 1);
    }
}
