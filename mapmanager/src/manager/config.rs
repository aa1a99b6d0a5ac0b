//! Settings consumed by the Map Manager.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::availability::VersionPolicy;
use crate::config::DEFAULT_TIMEOUT_SECS;

/// Settings for the Map Manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerSettings {
    /// Directory holding the datasets, manifests and the catalog.
    pub root: PathBuf,

    /// URL of the `url.json` server manifest.
    ///
    /// Without it only locally known data can be managed.
    pub server_url: Option<String>,

    /// Country whose datasets are served when several are available.
    ///
    /// Without it, or when it is not available, the first available country
    /// by name is used.
    pub selected_map: Option<String>,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Data version the software expects, per feature type.
    ///
    /// Types without an entry accept any version.
    pub compatibility: BTreeMap<String, String>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            root: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Maps"),
            server_url: None,
            selected_map: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            compatibility: BTreeMap::new(),
        }
    }
}

impl ManagerSettings {
    /// Create settings for the given storage root.
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            ..Default::default()
        }
    }

    /// Set the server manifest URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// Prefer the datasets of `id`.
    pub fn with_selected_map(mut self, id: impl Into<String>) -> Self {
        self.selected_map = Some(id.into());
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Require `version` for features of `feature_type`.
    pub fn with_expected_version(
        mut self,
        feature_type: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.compatibility
            .insert(feature_type.into(), version.into());
        self
    }

    /// Compatibility rules derived from these settings.
    pub fn version_policy(&self) -> VersionPolicy {
        VersionPolicy::from_table(self.compatibility.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = ManagerSettings::default();
        assert!(settings.server_url.is_none());
        assert!(settings.compatibility.is_empty());
        assert_eq!(settings.timeout, Duration::from_secs(60));
        assert!(settings.root.ends_with("Maps"));
    }

    #[test]
    fn test_builder_pattern() {
        let settings = ManagerSettings::new(PathBuf::from("/custom/maps"))
            .with_server_url("https://example.com/url.json")
            .with_timeout(Duration::from_secs(10))
            .with_expected_version("territory", "17");

        assert_eq!(settings.root, PathBuf::from("/custom/maps"));
        assert_eq!(
            settings.server_url.as_deref(),
            Some("https://example.com/url.json")
        );
        assert_eq!(settings.timeout, Duration::from_secs(10));
        assert_eq!(settings.compatibility.get("territory").unwrap(), "17");
    }
}
