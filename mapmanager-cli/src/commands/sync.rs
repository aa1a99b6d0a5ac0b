//! `sync`, `refresh` and `updates` commands.

use clap::Args;
use mapmanager::manager::UpdateRecord;
use mapmanager::Manager;

use super::common::{follow_downloads, open_manager};
use crate::error::CliError;
use crate::GlobalArgs;

#[derive(Debug, Args)]
pub struct UpdatesArgs {
    /// Download the updated data
    #[arg(long)]
    pub download: bool,
}

/// Download the feature list and everything subscribed but missing.
pub fn sync(global: &GlobalArgs) -> Result<(), CliError> {
    let (_runner, mut manager) = open_manager(global, "sync")?;
    let mut events = manager.subscribe();
    manager.get_countries()?;
    follow_downloads(&mut manager, &mut events)?;

    if manager.missing() {
        println!("Some subscribed data is still missing:");
        for line in manager.missing_info().lines() {
            println!("  {}", line);
        }
    } else {
        println!("All subscribed data is available.");
    }
    Ok(())
}

/// Download the feature list only.
pub fn refresh(global: &GlobalArgs) -> Result<(), CliError> {
    let (_runner, mut manager) = open_manager(global, "refresh")?;
    let updates = check_updates(&mut manager)?;

    let provided = manager.provided_countries_json(false);
    println!(
        "Server offers {} countries.",
        provided.as_array().map(Vec::len).unwrap_or(0)
    );
    print_updates(&updates);
    Ok(())
}

/// Report updated data and optionally download it.
pub fn updates(global: &GlobalArgs, args: UpdatesArgs) -> Result<(), CliError> {
    let (_runner, mut manager) = open_manager(global, "updates")?;
    let updates = check_updates(&mut manager)?;
    print_updates(&updates);

    if args.download && !updates.is_empty() {
        let mut events = manager.subscribe();
        manager.get_updates()?;
        follow_downloads(&mut manager, &mut events)?;
        println!("Updated {} features.", updates.len());
    }
    Ok(())
}

fn check_updates(manager: &mut Manager) -> Result<Vec<UpdateRecord>, CliError> {
    let mut events = manager.subscribe();
    manager.update_provided()?;
    follow_downloads(manager, &mut events)?;
    Ok(manager.updates_found().to_vec())
}

fn print_updates(updates: &[UpdateRecord]) {
    if updates.is_empty() {
        println!("No updates.");
        return;
    }
    println!("Updates available:");
    for line in update_lines(updates) {
        println!("  {}", line);
    }
}

fn update_lines(updates: &[UpdateRecord]) -> Vec<String> {
    updates
        .iter()
        .map(|u| {
            format!(
                "{}: {} ({}) -> {} ({})",
                u.id, u.old_version, u.old_datetime, u.new_version, u.new_datetime
            )
        })
        .collect()
}
