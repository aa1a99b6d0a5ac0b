//! Shared setup for commands that operate on the storage root.

use std::path::PathBuf;

use mapmanager::config::{config_file_path, ConfigFile};
use mapmanager::logging::{default_log_dir, default_log_file, init_logging, LoggingGuard};
use mapmanager::{Manager, ManagerSettings};
use tracing::info;

use crate::error::CliError;
use crate::GlobalArgs;

/// Loads configuration, sets up logging and builds the [`Manager`].
pub struct CliRunner {
    config_path: PathBuf,
    settings: ManagerSettings,
    _logging: LoggingGuard,
}

impl CliRunner {
    pub fn new(args: &GlobalArgs) -> Result<Self, CliError> {
        let config_path = args.config.clone().unwrap_or_else(config_file_path);
        let config = ConfigFile::load_from(&config_path)?;
        let settings = resolve_settings(&config, args);

        let filter = if args.verbose {
            "mapmanager=debug"
        } else {
            "mapmanager=warn"
        };
        let logging = init_logging(&default_log_dir(), default_log_file(), filter)
            .map_err(CliError::Logging)?;

        Ok(Self {
            config_path,
            settings,
            _logging: logging,
        })
    }

    pub fn log_startup(&self, command: &str) {
        info!(
            command,
            version = env!("CARGO_PKG_VERSION"),
            config = %self.config_path.display(),
            root = %self.settings.root.display(),
            "mapmanager starting"
        );
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    pub fn create_manager(&self) -> Result<Manager, CliError> {
        Ok(Manager::with_http(self.settings.clone())?)
    }
}

/// Manager settings from the config file, with `--root` taking precedence.
pub fn resolve_settings(config: &ConfigFile, args: &GlobalArgs) -> ManagerSettings {
    let mut settings = config.manager_settings();
    if let Some(root) = &args.root {
        settings.root = root.clone();
    }
    settings
}
