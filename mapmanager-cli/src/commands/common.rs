//! Helpers shared across CLI commands.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use mapmanager::config::format_size;
use mapmanager::{Manager, ManagerEvent};
use serde_json::Value;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::broadcast::Receiver;

use crate::error::CliError;
use crate::runner::CliRunner;
use crate::GlobalArgs;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static SIGNAL_HANDLER: OnceLock<Result<(), String>> = OnceLock::new();

/// Install the Ctrl+C handler once per process.
fn install_signal_handler() -> Result<(), CliError> {
    SIGNAL_HANDLER
        .get_or_init(|| {
            ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst))
                .map_err(|e| e.to_string())
        })
        .clone()
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))
}

/// Set up logging and open the manager for `command`.
pub fn open_manager(global: &GlobalArgs, command: &str) -> Result<(CliRunner, Manager), CliError> {
    let runner = CliRunner::new(global)?;
    runner.log_startup(command);
    let manager = runner.create_manager()?;
    Ok((runner, manager))
}

/// Take every queued event without blocking.
pub fn drain_events(events: &mut Receiver<ManagerEvent>) -> Vec<ManagerEvent> {
    let mut drained = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => drained.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    drained
}

/// Apply transfer events until the download chain ends.
///
/// Progress is shown on a spinner. Ctrl+C cancels the chain.
pub fn follow_downloads(
    manager: &mut Manager,
    events: &mut Receiver<ManagerEvent>,
) -> Result<(), CliError> {
    install_signal_handler()?;

    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(style);
    }
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("Contacting server");

    let mut errors = Vec::new();
    loop {
        manager.process_events();
        for event in drain_events(events) {
            match event {
                ManagerEvent::DownloadProgress(text) => spinner.set_message(text),
                ManagerEvent::ErrorMessage(text) => errors.push(text),
                _ => {}
            }
        }
        if !manager.downloading() {
            break;
        }
        if INTERRUPTED.swap(false, Ordering::SeqCst) {
            manager.cancel_download();
            spinner.finish_and_clear();
            return Err(CliError::Interrupted);
        }
        thread::sleep(POLL_INTERVAL);
    }
    spinner.finish_and_clear();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(CliError::Sync(errors.join("; ")))
    }
}

pub fn print_json(value: &Value) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Output(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

/// One line per country row: flags, size, name and id.
pub fn format_country_row(row: &Value) -> String {
    let flag = |key: &str, mark: char| {
        if row[key].as_bool().unwrap_or(false) {
            mark
        } else {
            '-'
        }
    };
    let size = row["size"]
        .as_u64()
        .filter(|s| *s > 0)
        .map(format_size)
        .unwrap_or_default();
    let incompatible = if row["compatible"].as_bool().unwrap_or(true) {
        ""
    } else {
        "  (incompatible)"
    };
    format!(
        "[{}{}] {:>10}  {} ({}){}",
        flag("requested", 'R'),
        flag("available", 'A'),
        size,
        row["name"].as_str().unwrap_or_default(),
        row["id"].as_str().unwrap_or_default(),
        incompatible
    )
}
