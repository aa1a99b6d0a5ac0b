//! Configuration CLI commands.
//!
//! Provides `config path` and `config show`.

use clap::Subcommand;
use mapmanager::config::{config_file_path, ConfigFile};

use crate::error::CliError;
use crate::runner::resolve_settings;
use crate::GlobalArgs;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Show the effective settings
    Show,
}

/// Run a config subcommand.
pub fn run(global: &GlobalArgs, command: ConfigCommands) -> Result<(), CliError> {
    let path = global.config.clone().unwrap_or_else(config_file_path);
    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let config = ConfigFile::load_from(&path)?;
            for line in settings_lines(&config, global) {
                println!("{}", line);
            }
            Ok(())
        }
    }
}

fn settings_lines(config: &ConfigFile, global: &GlobalArgs) -> Vec<String> {
    let settings = resolve_settings(config, global);
    let mut lines = vec![
        "[storage]".to_string(),
        format!("  root = {}", settings.root.display()),
        format!(
            "  map = {}",
            settings.selected_map.as_deref().unwrap_or("(first available)")
        ),
        String::new(),
        "[server]".to_string(),
        format!(
            "  url = {}",
            settings.server_url.as_deref().unwrap_or("(not set)")
        ),
        format!("  timeout = {}", settings.timeout.as_secs()),
        String::new(),
        "[compatibility]".to_string(),
    ];
    if settings.compatibility.is_empty() {
        lines.push("  (any version accepted)".to_string());
    }
    for (feature_type, version) in &settings.compatibility {
        lines.push(format!("  {} = {}", feature_type, version));
    }
    lines
}
