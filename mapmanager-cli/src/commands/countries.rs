//! `add`, `remove` and `details` commands.

use mapmanager::config::format_size;
use serde_json::Value;

use super::common::{open_manager, print_json};
use crate::error::CliError;
use crate::GlobalArgs;

pub fn add(global: &GlobalArgs, ids: &[String]) -> Result<(), CliError> {
    let (_runner, mut manager) = open_manager(global, "add")?;
    for id in ids {
        manager.add_country(id)?;
        println!("Subscribed to {}", id);
    }
    if manager.missing() {
        println!();
        println!("Run `mapmanager sync` to download the data.");
    }
    Ok(())
}

pub fn remove(global: &GlobalArgs, ids: &[String]) -> Result<(), CliError> {
    let (_runner, mut manager) = open_manager(global, "remove")?;
    for id in ids {
        manager.remove_country(id)?;
        println!("Unsubscribed from {}", id);
    }
    println!();
    println!("Run `mapmanager clean` to reclaim the space.");
    Ok(())
}

pub fn details(global: &GlobalArgs, id: &str, json: bool) -> Result<(), CliError> {
    let (_runner, manager) = open_manager(global, "details")?;
    let details = manager
        .country_details_json(id)
        .ok_or_else(|| mapmanager::ManagerError::UnknownFeature(id.to_string()))?;

    if json {
        return print_json(&details);
    }
    for line in render_details(&details) {
        println!("{}", line);
    }
    Ok(())
}

fn render_details(details: &Value) -> Vec<String> {
    let mut lines = vec![format!(
        "{} ({})",
        details["name"].as_str().unwrap_or_default(),
        details["id"].as_str().unwrap_or_default()
    )];

    let features = details["features"].as_array().cloned().unwrap_or_default();
    for feature in &features {
        let installed = match feature["installedVersion"].as_str() {
            Some(version) => format!("installed {}", version),
            None => "not installed".to_string(),
        };
        let size = feature["size"]
            .as_u64()
            .map(|s| format!(", {}", format_size(s)))
            .unwrap_or_default();
        let mut flags = Vec::new();
        if !feature["provided"].as_bool().unwrap_or(false) {
            flags.push("not offered");
        }
        if !feature["compatible"].as_bool().unwrap_or(true) {
            flags.push("incompatible");
        }
        lines.push(format!(
            "  {:<16} {:<10} {}{}{}",
            feature["type"].as_str().unwrap_or_default(),
            feature["version"].as_str().unwrap_or_default(),
            installed,
            size,
            if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            }
        ));
    }
    lines
}
