//! Platform identification.
//!
//! The dispatcher only needs to know whether a native host is present, but
//! the identifier keeps the host identity (`android`, `ios`) so plugins can
//! register per-platform fallbacks. Resolution inspects an [`Environment`]
//! for native bridge markers and never fails: unknown environments are `web`.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Marker exposed by the Android host when its bridge is injected.
pub const ANDROID_BRIDGE_MARKER: &str = "androidBridge";

/// Marker exposed by the iOS host when its message handler is installed.
pub const IOS_BRIDGE_MARKER: &str = "webkit.messageHandlers.bridge";

/// The resolved execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PlatformId {
    Android,
    Ios,
    Web,
    /// A user-defined, web-hosted platform (see `CapacitorPlatforms`).
    Custom(String),
}

impl PlatformId {
    /// Parses a platform name; names other than the three built-ins are custom.
    pub fn parse(name: &str) -> Self {
        match name {
            "android" => Self::Android,
            "ios" => Self::Ios,
            "web" => Self::Web,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Android => "android",
            Self::Ios => "ios",
            Self::Web => "web",
            Self::Custom(name) => name,
        }
    }

    /// `true` for platforms backed by a native host bridge.
    pub fn is_native(&self) -> bool {
        matches!(self, Self::Android | Self::Ios)
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for PlatformId {
    fn from(name: String) -> Self {
        Self::parse(&name)
    }
}

impl From<&str> for PlatformId {
    fn from(name: &str) -> Self {
        Self::parse(name)
    }
}

impl From<PlatformId> for String {
    fn from(id: PlatformId) -> Self {
        id.as_str().to_string()
    }
}

// =============================================================================
// Environment inspection
// =============================================================================

/// A hosting environment that can be probed for native bridge markers.
pub trait Environment: Send + Sync {
    /// Returns `true` if the environment exposes the given marker.
    fn has_marker(&self, marker: &str) -> bool;
}

/// Resolves the platform from the markers an environment exposes.
///
/// Android is checked before iOS; absence of both yields [`PlatformId::Web`].
pub fn resolve_platform(env: &dyn Environment) -> PlatformId {
    if env.has_marker(ANDROID_BRIDGE_MARKER) {
        PlatformId::Android
    } else if env.has_marker(IOS_BRIDGE_MARKER) {
        PlatformId::Ios
    } else {
        PlatformId::Web
    }
}

/// A fixed set of markers, typically built from configuration.
#[derive(Debug, Clone, Default)]
pub struct MarkerSet {
    markers: HashSet<String>,
}

impl MarkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a marker (builder pattern).
    pub fn with(mut self, marker: impl Into<String>) -> Self {
        self.markers.insert(marker.into());
        self
    }

    pub fn insert(&mut self, marker: impl Into<String>) {
        self.markers.insert(marker.into());
    }
}

impl<S: Into<String>> FromIterator<S> for MarkerSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            markers: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl Environment for MarkerSet {
    fn has_marker(&self, marker: &str) -> bool {
        self.markers.contains(marker)
    }
}

/// Memoizes platform resolution for one environment.
///
/// The environment is inspected on first access only; every later call
/// returns the same identifier.
pub struct PlatformResolver {
    env: Arc<dyn Environment>,
    resolved: OnceLock<PlatformId>,
}

impl PlatformResolver {
    pub fn new(env: Arc<dyn Environment>) -> Self {
        Self {
            env,
            resolved: OnceLock::new(),
        }
    }

    /// Creates a resolver that always yields `platform`.
    pub fn fixed(platform: PlatformId) -> Self {
        let resolved = OnceLock::new();
        let _ = resolved.set(platform);
        Self {
            env: Arc::new(MarkerSet::new()),
            resolved,
        }
    }

    pub fn platform(&self) -> &PlatformId {
        self.resolved.get_or_init(|| {
            let platform = resolve_platform(self.env.as_ref());
            debug!(platform = %platform, "Resolved platform");
            platform
        })
    }
}

impl fmt::Debug for PlatformResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlatformResolver")
            .field("resolved", &self.resolved.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn no_markers_is_web() {
        assert_eq!(resolve_platform(&MarkerSet::new()), PlatformId::Web);
    }

    #[test]
    fn android_wins_over_ios() {
        let env = MarkerSet::new()
            .with(IOS_BRIDGE_MARKER)
            .with(ANDROID_BRIDGE_MARKER);
        assert_eq!(resolve_platform(&env), PlatformId::Android);
    }

    #[test]
    fn ios_marker() {
        let env: MarkerSet = [IOS_BRIDGE_MARKER].into_iter().collect();
        let platform = resolve_platform(&env);
        assert_eq!(platform, PlatformId::Ios);
        assert!(platform.is_native());
    }

    #[test]
    fn custom_platforms_are_not_native() {
        let platform = PlatformId::parse("electron");
        assert_eq!(platform, PlatformId::Custom("electron".into()));
        assert!(!platform.is_native());
        assert_eq!(platform.to_string(), "electron");
    }

    struct CountingEnv(AtomicUsize);

    impl Environment for CountingEnv {
        fn has_marker(&self, _marker: &str) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            false
        }
    }

    #[test]
    fn resolver_memoizes() {
        let env = Arc::new(CountingEnv(AtomicUsize::new(0)));
        let resolver = PlatformResolver::new(env.clone());
        assert_eq!(resolver.platform(), &PlatformId::Web);
        let probes = env.0.load(Ordering::SeqCst);
        assert_eq!(resolver.platform(), &PlatformId::Web);
        assert_eq!(env.0.load(Ordering::SeqCst), probes);
    }

    #[test]
    fn platform_id_serde_as_string() {
        let value = serde_json::to_value(PlatformId::Ios).unwrap();
        assert_eq!(value, serde_json::json!("ios"));
        let back: PlatformId = serde_json::from_value(value).unwrap();
        assert_eq!(back, PlatformId::Ios);
    }
}
