//! `clean` command.

use clap::Args;
use dialoguer::Confirm;
use mapmanager::config::format_size;
use mapmanager::ManagerError;

use super::common::open_manager;
use crate::error::CliError;
use crate::GlobalArgs;

#[derive(Debug, Args)]
pub struct CleanArgs {
    /// Delete without asking
    #[arg(short, long)]
    pub yes: bool,
}

pub fn run(global: &GlobalArgs, args: CleanArgs) -> Result<(), CliError> {
    let (_runner, mut manager) = open_manager(global, "clean")?;

    let snapshot = manager.list_non_needed();
    if snapshot.is_indeterminate() {
        return Err(CliError::Cleanup(
            "storage is unavailable or a download is running".to_string(),
        ));
    }
    if snapshot.files.is_empty() {
        println!("Nothing to clean.");
        return Ok(());
    }

    println!("Files no subscription refers to:");
    for file in &snapshot.files {
        println!("  {}", file);
    }
    let size = format_size(snapshot.total_size.max(0) as u64);
    println!();
    println!("Total: {} in {} files", size, snapshot.files.len());

    if !args.yes {
        let confirmed = Confirm::new()
            .with_prompt("Delete these files?")
            .default(false)
            .interact()
            .map_err(|e| CliError::Output(e.to_string()))?;
        if !confirmed {
            println!("Nothing deleted.");
            return Ok(());
        }
    }

    if !manager.delete_snapshot(&snapshot) {
        return Err(ManagerError::StaleRetentionList.into());
    }
    println!("Freed {}", size);
    Ok(())
}
