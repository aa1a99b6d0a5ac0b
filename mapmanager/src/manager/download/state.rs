//! State of the single download session.

use std::fmt;
use std::path::PathBuf;

use super::transfer::TransferId;
use crate::manager::availability::FileToDownload;

/// What the active download session is fetching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DownloadKind {
    /// No session is active.
    #[default]
    None,
    /// Feature list fetched as part of a full sync.
    CountriesList,
    /// The `url.json` server manifest.
    ServerUrl,
    /// Feature list fetched by a provided-list refresh.
    ProvidedList,
    /// A feature data file.
    FeatureData,
}

impl fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DownloadKind::None => "no",
            DownloadKind::CountriesList => "countries list",
            DownloadKind::ServerUrl => "server URL",
            DownloadKind::ProvidedList => "provided list",
            DownloadKind::FeatureData => "feature data",
        };
        f.write_str(name)
    }
}

/// The download currently in flight.
#[derive(Debug, Clone)]
pub struct DownloadSession {
    /// Kind of download.
    pub kind: DownloadKind,
    /// Source URL.
    pub url: String,
    /// Final location of the file.
    pub path: PathBuf,
    /// Where the transfer writes until the file is finalized.
    pub staging: PathBuf,
    /// Feature file being fetched, for [`DownloadKind::FeatureData`].
    pub target: Option<FileToDownload>,
    /// Bytes received so far.
    pub bytes_downloaded: u64,
    /// Bytes written to the staging file so far.
    pub bytes_written: u64,
    /// Transfer the session belongs to.
    pub transfer: TransferId,
}

impl DownloadSession {
    /// Name shown in progress messages.
    pub fn label(&self) -> String {
        match &self.target {
            Some(file) => file.name.clone(),
            None => self.kind.to_string(),
        }
    }
}
