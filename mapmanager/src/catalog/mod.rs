//! Durable registry of installed data files.
//!
//! The catalog maps a file path (relative to the storage root) to the data
//! version and timestamp it was installed with. It is the only authority on
//! whether a file is genuinely installed: a file lying on disk without a
//! catalog entry is treated as missing.
//!
//! # Storage format
//!
//! The catalog lives in `<root>/files.json`:
//!
//! ```text
//! {
//!   "schema": 1,
//!   "files": {
//!     "europe/estonia.dat": { "version": "1", "datetime": "2024-05-01T00:00:00Z" }
//!   }
//! }
//! ```
//!
//! Every write replaces the whole document through a temp file and a rename,
//! so a crash leaves either the previous or the new catalog on disk. A
//! missing, unreadable or unparsable document is moved aside and replaced by
//! an empty catalog instead of failing the caller.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::fsutil::write_atomic;

/// File name of the catalog document inside the storage root.
pub const CATALOG_FILE_NAME: &str = "files.json";

/// Current layout version of the catalog document.
const CATALOG_SCHEMA: u32 = 1;

/// Suffix for catalog documents that failed to load.
const CORRUPT_SUFFIX: &str = ".corrupt";

/// Errors that can occur while updating the catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The catalog document could not be written.
    #[error("failed to write catalog {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The catalog could not be serialized.
    #[error("failed to encode catalog: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Version information recorded for an installed file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Data format version of the installed file.
    pub version: String,
    /// Timestamp of the data, as published by the server.
    pub datetime: String,
}

impl CatalogEntry {
    /// Create a new entry.
    pub fn new(version: impl Into<String>, datetime: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            datetime: datetime.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    schema: u32,
    #[serde(default)]
    files: BTreeMap<String, CatalogEntry>,
}

#[derive(Serialize)]
struct CatalogDocumentRef<'a> {
    schema: u32,
    files: &'a BTreeMap<String, CatalogEntry>,
}

/// Registry of installed files backed by a JSON document.
#[derive(Debug)]
pub struct CatalogStore {
    path: PathBuf,
    files: BTreeMap<String, CatalogEntry>,
}

impl CatalogStore {
    /// Open the catalog stored in `root`.
    ///
    /// Never fails: a missing document yields an empty catalog, a damaged one
    /// is moved aside to `files.json.corrupt` and the catalog starts empty.
    pub fn open(root: &Path) -> Self {
        let path = root.join(CATALOG_FILE_NAME);
        let files = load_document(&path);
        debug!(path = %path.display(), entries = files.len(), "Catalog opened");
        Self { path, files }
    }

    /// Path of the backing document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record `path` as installed with the given version and timestamp.
    ///
    /// Replaces any previous entry for the same path. The change is visible
    /// in memory only once it has been persisted.
    pub fn register(
        &mut self,
        path: &str,
        version: &str,
        datetime: &str,
    ) -> Result<(), CatalogError> {
        let previous = self
            .files
            .insert(path.to_string(), CatalogEntry::new(version, datetime));

        if let Err(e) = self.persist() {
            match previous {
                Some(entry) => self.files.insert(path.to_string(), entry),
                None => self.files.remove(path),
            };
            return Err(e);
        }

        info!(path, version, datetime, "Registered file in catalog");
        Ok(())
    }

    /// Remove the entry for `path`.
    ///
    /// Returns true if an entry existed.
    pub fn unregister(&mut self, path: &str) -> Result<bool, CatalogError> {
        let Some(previous) = self.files.remove(path) else {
            return Ok(false);
        };

        if let Err(e) = self.persist() {
            self.files.insert(path.to_string(), previous);
            return Err(e);
        }

        info!(path, "Removed file from catalog");
        Ok(true)
    }

    /// Look up the entry for `path`.
    pub fn lookup(&self, path: &str) -> Option<&CatalogEntry> {
        self.files.get(path)
    }

    /// Iterate over all entries in path order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &CatalogEntry)> {
        self.files.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of registered files.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn persist(&self) -> Result<(), CatalogError> {
        let document = CatalogDocumentRef {
            schema: CATALOG_SCHEMA,
            files: &self.files,
        };
        let bytes = serde_json::to_vec_pretty(&document)?;

        write_atomic(&self.path, &bytes).map_err(|source| CatalogError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn load_document(path: &Path) -> BTreeMap<String, CatalogEntry> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return BTreeMap::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Catalog unreadable, reinitializing");
            quarantine(path);
            return BTreeMap::new();
        }
    };

    match serde_json::from_str::<CatalogDocument>(&content) {
        Ok(document) if document.schema == CATALOG_SCHEMA => document.files,
        Ok(document) => {
            warn!(
                path = %path.display(),
                found = document.schema,
                expected = CATALOG_SCHEMA,
                "Catalog schema mismatch, reinitializing"
            );
            quarantine(path);
            BTreeMap::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Catalog corrupt, reinitializing");
            quarantine(path);
            BTreeMap::new()
        }
    }
}

fn quarantine(path: &Path) {
    let mut target = path.as_os_str().to_os_string();
    target.push(CORRUPT_SUFFIX);
    if let Err(e) = fs::rename(path, &target) {
        warn!(path = %path.display(), error = %e, "Failed to move damaged catalog aside");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_missing_is_empty() {
        let temp = TempDir::new().unwrap();
        let catalog = CatalogStore::open(temp.path());

        assert!(catalog.is_empty());
        assert!(catalog.lookup("xx.dat").is_none());
    }

    #[test]
    fn test_register_then_lookup() {
        let temp = TempDir::new().unwrap();
        let mut catalog = CatalogStore::open(temp.path());

        catalog.register("xx.dat", "v1", "2024-01-01T00:00:00Z").unwrap();

        let entry = catalog.lookup("xx.dat").unwrap();
        assert_eq!(entry.version, "v1");
        assert_eq!(entry.datetime, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_register_overwrites_without_duplicates() {
        let temp = TempDir::new().unwrap();
        let mut catalog = CatalogStore::open(temp.path());

        catalog.register("xx.dat", "v1", "2024-01-01").unwrap();
        catalog.register("xx.dat", "v2", "2024-02-01").unwrap();

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup("xx.dat").unwrap().version, "v2");

        let reopened = CatalogStore::open(temp.path());
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.lookup("xx.dat").unwrap().version, "v2");
    }

    #[test]
    fn test_entries_survive_reopen() {
        let temp = TempDir::new().unwrap();
        {
            let mut catalog = CatalogStore::open(temp.path());
            catalog.register("a.dat", "1", "t1").unwrap();
            catalog.register("postal/global.dat", "2", "t2").unwrap();
        }

        let catalog = CatalogStore::open(temp.path());
        let paths: Vec<&str> = catalog.entries().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["a.dat", "postal/global.dat"]);
    }

    #[test]
    fn test_corrupt_document_self_heals() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(CATALOG_FILE_NAME), "{ not json").unwrap();

        let mut catalog = CatalogStore::open(temp.path());
        assert!(catalog.is_empty());
        assert!(temp.path().join("files.json.corrupt").exists());

        catalog.register("xx.dat", "v1", "t").unwrap();
        let reopened = CatalogStore::open(temp.path());
        assert_eq!(reopened.lookup("xx.dat").unwrap().version, "v1");
    }

    #[test]
    fn test_schema_mismatch_reinitializes() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join(CATALOG_FILE_NAME),
            r#"{"schema": 99, "files": {"xx.dat": {"version": "1", "datetime": "t"}}}"#,
        )
        .unwrap();

        let catalog = CatalogStore::open(temp.path());
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_unregister() {
        let temp = TempDir::new().unwrap();
        let mut catalog = CatalogStore::open(temp.path());
        catalog.register("xx.dat", "v1", "t").unwrap();

        assert!(catalog.unregister("xx.dat").unwrap());
        assert!(!catalog.unregister("xx.dat").unwrap());
        assert!(CatalogStore::open(temp.path()).is_empty());
    }

    #[test]
    fn test_failed_write_keeps_previous_state() {
        let temp = TempDir::new().unwrap();
        let mut catalog = CatalogStore::open(temp.path());
        catalog.register("xx.dat", "v1", "t").unwrap();

        // A directory in place of the temp file makes the write fail.
        fs::create_dir(temp.path().join("files.json.tmp")).unwrap();

        assert!(catalog.register("xx.dat", "v2", "t").is_err());
        assert_eq!(catalog.lookup("xx.dat").unwrap().version, "v1");
        assert!(catalog.register("yy.dat", "v1", "t").is_err());
        assert!(catalog.lookup("yy.dat").is_none());
    }

    proptest! {
        #[test]
        fn prop_last_registration_wins(
            writes in proptest::collection::vec((0usize..4, "[a-z0-9]{1,4}"), 1..12)
        ) {
            let temp = TempDir::new().unwrap();
            let mut catalog = CatalogStore::open(temp.path());
            let mut expected = BTreeMap::new();

            for (slot, version) in &writes {
                let path = format!("f{}.dat", slot);
                catalog.register(&path, version, "t").unwrap();
                expected.insert(path, version.clone());
            }

            prop_assert_eq!(catalog.len(), expected.len());
            for (path, version) in &expected {
                prop_assert_eq!(&catalog.lookup(path).unwrap().version, version);
            }
        }
    }
}
