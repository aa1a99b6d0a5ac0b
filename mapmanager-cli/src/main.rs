//! MapManager CLI - Command-line interface
//!
//! Keeps the offline map, geocoder and postal datasets under the storage root
//! in sync with the server's feature list.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use commands::clean::CleanArgs;
use commands::config::ConfigCommands;
use commands::list::ListArgs;
use commands::sync::UpdatesArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "mapmanager")]
#[command(version, about = "Offline map data manager", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Options shared by every command.
#[derive(Debug, Default, Args)]
pub struct GlobalArgs {
    /// Path of the config file (default: ~/.mapmanager/config.ini)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Storage root, overrides the config file
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show storage, subscription and download state
    Status,

    /// List countries
    List(ListArgs),

    /// Show the features of a country
    Details {
        /// Country id (e.g. europe/estonia)
        id: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Subscribe to countries
    Add {
        /// Country ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Drop country subscriptions
    Remove {
        /// Country ids
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Fetch the feature list and download everything missing
    Sync,

    /// Fetch the feature list only
    Refresh,

    /// Check for, and optionally download, updated data
    Updates(UpdatesArgs),

    /// Delete files no subscription refers to
    Clean(CleanArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        e.exit();
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let global = cli.global;
    match cli.command {
        Commands::Status => commands::status::run(&global),
        Commands::List(args) => commands::list::run(&global, args),
        Commands::Details { id, json } => commands::countries::details(&global, &id, json),
        Commands::Add { ids } => commands::countries::add(&global, &ids),
        Commands::Remove { ids } => commands::countries::remove(&global, &ids),
        Commands::Sync => commands::sync::sync(&global),
        Commands::Refresh => commands::sync::refresh(&global),
        Commands::Updates(args) => commands::sync::updates(&global, args),
        Commands::Clean(args) => commands::clean::run(&global, args),
        Commands::Config { command } => commands::config::run(&global, command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["mapmanager", "status", "--root", "/maps", "-v"]);
        assert_eq!(cli.global.root, Some(PathBuf::from("/maps")));
        assert!(cli.global.verbose);
        assert!(matches!(cli.command, Commands::Status));
    }

    #[test]
    fn test_add_requires_ids() {
        assert!(Cli::try_parse_from(["mapmanager", "add"]).is_err());
        let cli = Cli::parse_from(["mapmanager", "add", "XX", "YY"]);
        assert!(matches!(cli.command, Commands::Add { ids } if ids == ["XX", "YY"]));
    }
}
