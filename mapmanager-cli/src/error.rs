//! CLI error type and process exit handling.

use console::style;
use mapmanager::config::ConfigFileError;
use mapmanager::ManagerError;
use thiserror::Error;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Config file could not be read or written
    #[error(transparent)]
    ConfigFile(#[from] ConfigFileError),

    /// Logging could not be initialized
    #[error("Failed to initialize logging: {0}")]
    Logging(#[source] std::io::Error),

    /// Operation refused or failed inside the manager
    #[error(transparent)]
    Manager(#[from] ManagerError),

    /// A download chain ended with errors
    #[error("Sync failed: {0}")]
    Sync(String),

    /// Unused files cannot be determined or removed
    #[error("Cleanup refused: {0}")]
    Cleanup(String),

    /// Interrupted by the user
    #[error("Interrupted")]
    Interrupted,

    /// Output could not be produced
    #[error("Output error: {0}")]
    Output(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::ConfigFile(_) => 78,
            CliError::Interrupted => 130,
            CliError::Manager(ManagerError::StorageUnavailable { .. }) => 74,
            CliError::Manager(ManagerError::DownloadBusy { .. }) => 75,
            _ => 1,
        }
    }

    /// Print the error to stderr and exit.
    pub fn exit(self) -> ! {
        eprintln!("{} {}", style("error:").red().bold(), self);
        std::process::exit(self.exit_code());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::Config("x".into()).exit_code(), 78);
        assert_eq!(CliError::Interrupted.exit_code(), 130);
        assert_eq!(CliError::Sync("x".into()).exit_code(), 1);
        assert_eq!(
            CliError::from(ManagerError::StorageUnavailable {
                path: PathBuf::from("/maps")
            })
            .exit_code(),
            74
        );
    }

    #[test]
    fn test_manager_error_message_passes_through() {
        let err = CliError::from(ManagerError::NoServerUrl);
        assert_eq!(err.to_string(), ManagerError::NoServerUrl.to_string());
    }
}
