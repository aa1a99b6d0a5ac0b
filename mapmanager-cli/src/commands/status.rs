//! `status` command.

use std::path::PathBuf;

use console::style;
use mapmanager::manager::ActiveDatasets;

use super::common::open_manager;
use crate::error::CliError;
use crate::GlobalArgs;

pub fn run(global: &GlobalArgs) -> Result<(), CliError> {
    let (runner, manager) = open_manager(global, "status")?;
    let settings = runner.settings();

    println!("MapManager Status");
    println!("=================");
    println!();
    println!("  Storage root:   {}", settings.root.display());
    println!(
        "  Storage:        {}",
        if manager.storage_available() {
            style("available").green()
        } else {
            style("unavailable").red()
        }
    );
    println!(
        "  Server:         {}",
        settings.server_url.as_deref().unwrap_or("(not set)")
    );
    println!(
        "  Feature list:   {}",
        if manager.check_provided_available() {
            "fetched"
        } else {
            "not fetched"
        }
    );

    let requested = manager.requested_countries_json();
    let requested = requested.as_array().map(Vec::len).unwrap_or(0);
    let available = manager.available_countries_json();
    let available = available.as_array().map(Vec::len).unwrap_or(0);
    println!("  Subscribed:     {} countries", requested);
    println!("  Available:      {} countries", available);
    println!();

    println!("Serving");
    for line in dataset_lines(manager.active_datasets()) {
        println!("  {}", line);
    }
    println!();

    if manager.missing() {
        println!("{}", style("Some subscribed data is missing").yellow());
        for line in manager.missing_info().lines() {
            println!("  {}", line);
        }
        println!();
        println!("Run `mapmanager sync` to download it.");
    } else if manager.storage_available() {
        println!("{}", style("All subscribed data is available").green());
    }
    Ok(())
}

fn dataset_lines(datasets: &ActiveDatasets) -> Vec<String> {
    let show = |path: &Option<PathBuf>| match path {
        Some(path) => path.display().to_string(),
        None => "-".to_string(),
    };
    vec![
        format!(
            "Country:        {}",
            datasets.country.as_deref().unwrap_or("-")
        ),
        format!("Base map:       {}", show(&datasets.base_map)),
        format!("Geocoder:       {}", show(&datasets.geocoder)),
        format!("Postal global:  {}", show(&datasets.postal_global)),
        format!("Postal country: {}", show(&datasets.postal_country)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_lines() {
        let datasets = ActiveDatasets {
            country: Some("XX".to_string()),
            base_map: Some(PathBuf::from("/maps/XX.dat")),
            ..ActiveDatasets::default()
        };
        let lines = dataset_lines(&datasets);

        assert_eq!(lines[0], "Country:        XX");
        assert_eq!(lines[1], "Base map:       /maps/XX.dat");
        assert_eq!(lines[2], "Geocoder:       -");
    }
}
