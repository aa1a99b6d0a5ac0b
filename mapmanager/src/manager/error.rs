//! Error types for the Map Manager.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::download::DownloadKind;
use crate::catalog::CatalogError;

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Errors that can occur while managing map data.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The storage root is not mounted or not writable.
    #[error("storage not available at {}", path.display())]
    StorageUnavailable { path: PathBuf },

    /// A transfer failed.
    #[error("failed to download {url}: {reason}")]
    Network { url: String, reason: String },

    /// A manifest or descriptor could not be decoded.
    #[error("failed to parse {source_name}: {reason}")]
    Parse { source_name: String, reason: String },

    /// Installed data has a version the software does not accept.
    #[error("{id} has data version {found}, expected {expected}")]
    VersionIncompatible {
        id: String,
        found: String,
        expected: String,
    },

    /// Deletion was asked for a list other than the last retention scan.
    #[error("list of files does not match the last scan")]
    StaleRetentionList,

    /// Another download is in progress.
    #[error("{active} download already in progress")]
    DownloadBusy { active: DownloadKind },

    /// The feature id is not known.
    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    /// No server manifest URL is configured.
    #[error("no server URL configured")]
    NoServerUrl,

    /// A filesystem operation failed.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The catalog could not be updated.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

impl ManagerError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
