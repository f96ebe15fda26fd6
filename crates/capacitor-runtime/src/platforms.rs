//! Custom platforms.
//!
//! Besides `android`, `ios` and `web`, an embedder may run the app under a
//! named web-hosted platform (a desktop shell, a test harness...). Plugins then
//! pick the fallback registered for that name, or their `web` fallback.

use std::collections::BTreeSet;

use capacitor_core::PlatformId;
use tracing::{debug, warn};

/// Known custom platforms and the one currently selected.
#[derive(Debug, Clone, Default)]
pub struct CapacitorPlatforms {
    platforms: BTreeSet<String>,
    current: Option<String>,
}

impl CapacitorPlatforms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `name` selectable. Built-in platform names are rejected.
    pub fn add_platform(&mut self, name: impl Into<String>) -> &mut Self {
        let name = name.into();
        if matches!(PlatformId::parse(&name), PlatformId::Custom(_)) {
            debug!(platform = %name, "Custom platform added");
            self.platforms.insert(name);
        } else {
            warn!(platform = %name, "Built-in platforms cannot be added as custom platforms");
        }
        self
    }

    /// Selects a previously added platform. Unknown names are ignored with a
    /// warning and leave the selection unchanged.
    pub fn set_platform(&mut self, name: &str) -> &mut Self {
        if self.platforms.contains(name) {
            debug!(platform = %name, "Custom platform selected");
            self.current = Some(name.to_string());
        } else {
            warn!(platform = %name, "Cannot select unknown platform; call add_platform first");
        }
        self
    }

    /// The selected custom platform, if any.
    pub fn current(&self) -> Option<PlatformId> {
        self.current.as_deref().map(PlatformId::parse)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.platforms.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.platforms.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_added_platform() {
        let mut platforms = CapacitorPlatforms::new();
        platforms.add_platform("electron").set_platform("electron");
        assert_eq!(platforms.current(), Some(PlatformId::Custom("electron".into())));
    }

    #[test]
    fn unknown_platform_is_ignored() {
        let mut platforms = CapacitorPlatforms::new();
        platforms.add_platform("electron");
        platforms.set_platform("electron").set_platform("tauri");
        assert_eq!(platforms.current(), Some(PlatformId::parse("electron")));
    }

    #[test]
    fn builtins_are_not_custom() {
        let mut platforms = CapacitorPlatforms::new();
        platforms.add_platform("ios").set_platform("ios");
        assert!(platforms.current().is_none());
        assert_eq!(platforms.names().count(), 0);
    }
}
