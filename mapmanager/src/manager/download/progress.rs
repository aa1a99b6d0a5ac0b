//! Progress reporting for the active download.

use crate::config::format_size;

/// Minimum growth between two progress reports (1 MiB).
pub const PROGRESS_STEP: u64 = 1024 * 1024;

/// Decides when a byte counter has grown enough to be worth reporting.
///
/// The first non-zero value is always reported, after that only increments
/// of at least [`PROGRESS_STEP`].
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    last_reported: Option<u64>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new cumulative value. Returns true if it should be reported.
    pub fn observe(&mut self, bytes: u64) -> bool {
        let report = match self.last_reported {
            None => bytes > 0,
            Some(last) => bytes >= last.saturating_add(PROGRESS_STEP),
        };
        if report {
            self.last_reported = Some(bytes);
        }
        report
    }
}

/// Human readable progress line, e.g. `Downloading Estonia: 3.0 MB of 12.5 MB`.
pub fn progress_text(label: &str, downloaded: u64, expected: Option<u64>) -> String {
    match expected.filter(|size| *size > 0) {
        Some(size) => format!(
            "Downloading {}: {} of {}",
            label,
            format_size(downloaded),
            format_size(size)
        ),
        None => format!("Downloading {}: {}", label, format_size(downloaded)),
    }
}
