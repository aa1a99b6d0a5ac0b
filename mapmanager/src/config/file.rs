//! Configuration file handling for ~/.mapmanager/config.ini.
//!
//! ```text
//! [storage]
//! root = ~/Maps
//!
//! [server]
//! url = https://example.com/maps/url.json
//! timeout = 60
//!
//! [compatibility]
//! territory = 17
//! postal/global = 2
//! ```
//!
//! Missing files and missing keys fall back to defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use crate::manager::ManagerSettings;

/// Default HTTP timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

const SECTION_STORAGE: &str = "storage";
const SECTION_SERVER: &str = "server";
const SECTION_COMPATIBILITY: &str = "compatibility";

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read config file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write config file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// Invalid configuration value
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// Contents of `config.ini`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    /// Storage root for all datasets.
    pub root: Option<PathBuf>,
    /// Country whose datasets are served when several are installed.
    pub map: Option<String>,
    /// URL of the `url.json` server manifest.
    pub server_url: Option<String>,
    /// HTTP timeout in seconds.
    pub timeout_secs: u64,
    /// Expected data version per feature type.
    pub compatibility: BTreeMap<String, String>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            root: None,
            map: None,
            server_url: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            compatibility: BTreeMap::new(),
        }
    }
}

impl ConfigFile {
    /// Load configuration from the default path (~/.mapmanager/config.ini).
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, ConfigFileError> {
        let mut config = Self::default();

        if let Some(storage) = ini.section(Some(SECTION_STORAGE)) {
            config.root = storage
                .get("root")
                .filter(|v| !v.trim().is_empty())
                .map(|v| expand_home(v.trim()));
            config.map = storage
                .get("map")
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);
        }

        if let Some(server) = ini.section(Some(SECTION_SERVER)) {
            config.server_url = server
                .get("url")
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string);

            if let Some(value) = server.get("timeout") {
                config.timeout_secs = value
                    .trim()
                    .parse::<u64>()
                    .ok()
                    .filter(|secs| *secs > 0)
                    .ok_or_else(|| ConfigFileError::InvalidValue {
                        section: SECTION_SERVER.to_string(),
                        key: "timeout".to_string(),
                        value: value.to_string(),
                        reason: "expected a positive number of seconds".to_string(),
                    })?;
            }
        }

        if let Some(compatibility) = ini.section(Some(SECTION_COMPATIBILITY)) {
            for (feature_type, version) in compatibility.iter() {
                config
                    .compatibility
                    .insert(feature_type.to_string(), version.trim().to_string());
            }
        }

        Ok(config)
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        self.to_ini()
            .write_to_file(path)
            .map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();

        if let Some(root) = &self.root {
            ini.with_section(Some(SECTION_STORAGE))
                .set("root", root.display().to_string());
        }
        if let Some(map) = &self.map {
            ini.with_section(Some(SECTION_STORAGE)).set("map", map.as_str());
        }

        if let Some(url) = &self.server_url {
            ini.with_section(Some(SECTION_SERVER)).set("url", url.as_str());
        }
        ini.with_section(Some(SECTION_SERVER))
            .set("timeout", self.timeout_secs.to_string());

        for (feature_type, version) in &self.compatibility {
            ini.with_section(Some(SECTION_COMPATIBILITY))
                .set(feature_type.as_str(), version.as_str());
        }

        ini
    }

    /// Settings for the [`Manager`](crate::Manager), with defaults filled in.
    pub fn manager_settings(&self) -> ManagerSettings {
        let mut settings = match &self.root {
            Some(root) => ManagerSettings::new(root.clone()),
            None => ManagerSettings::default(),
        };
        settings = settings.with_timeout(Duration::from_secs(self.timeout_secs));
        if let Some(url) = &self.server_url {
            settings = settings.with_server_url(url.clone());
        }
        if let Some(map) = &self.map {
            settings = settings.with_selected_map(map.clone());
        }
        for (feature_type, version) in &self.compatibility {
            settings = settings.with_expected_version(feature_type.clone(), version.clone());
        }
        settings
    }
}

/// Get the path to the config directory (~/.mapmanager).
pub fn config_directory() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mapmanager")
}

/// Get the path to the config file (~/.mapmanager/config.ini).
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

fn expand_home(value: &str) -> PathBuf {
    match value.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(rest),
        None => PathBuf::from(value),
    }
}
