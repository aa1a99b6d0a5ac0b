//! Two-phase reclamation of files nothing refers to.
//!
//! [`RetentionScanner::list_non_needed`] takes a snapshot of deletable files.
//! Deletion is only carried out for exactly that set, and only while none of
//! its files is referenced. The owner drops the snapshot through
//! [`RetentionScanner::invalidate`] whenever downloads or subscriptions change
//! what is needed, so a stale listing never removes live data.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use glob::glob;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogStore, CATALOG_FILE_NAME};
use crate::feature::{PROVIDED_FILE, REQUESTED_FILE, SERVER_URL_FILE};
use crate::fsutil::relative_key;

/// Size reported when the set of deletable files cannot be determined.
pub const SIZE_INDETERMINATE: i64 = -1;

/// Result of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionSnapshot {
    /// Identifies the listing; deletion by snapshot requires it to be current.
    pub generation: u64,
    /// Relative paths, sorted.
    pub files: Vec<String>,
    /// Total size in bytes, or [`SIZE_INDETERMINATE`].
    pub total_size: i64,
}

impl RetentionSnapshot {
    fn indeterminate(generation: u64) -> Self {
        Self {
            generation,
            files: Vec::new(),
            total_size: SIZE_INDETERMINATE,
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        self.total_size < 0
    }
}

/// Keeps the latest listing and deletes against it.
#[derive(Debug)]
pub struct RetentionScanner {
    last: Option<RetentionSnapshot>,
    generation: u64,
    last_size: i64,
}

impl Default for RetentionScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl RetentionScanner {
    pub fn new() -> Self {
        Self {
            last: None,
            generation: 0,
            last_size: SIZE_INDETERMINATE,
        }
    }

    /// List files below `root` that are not covered by `referenced`.
    ///
    /// While a download is active the result is empty with
    /// [`SIZE_INDETERMINATE`] and nothing can be deleted until the next
    /// listing.
    pub fn list_non_needed(
        &mut self,
        root: &Path,
        referenced: &BTreeSet<String>,
        download_active: bool,
    ) -> RetentionSnapshot {
        self.generation += 1;

        if download_active {
            debug!("Download active, retention listing is indeterminate");
            let snapshot = RetentionSnapshot::indeterminate(self.generation);
            self.last = Some(snapshot.clone());
            self.last_size = SIZE_INDETERMINATE;
            return snapshot;
        }

        let mut files = Vec::new();
        let mut total_size = 0i64;
        for (relative, size) in enumerate_files(root) {
            if is_bookkeeping(&relative) || is_referenced(&relative, referenced) {
                continue;
            }
            total_size = total_size.saturating_add(i64::try_from(size).unwrap_or(i64::MAX));
            files.push(relative);
        }
        files.sort();

        info!(
            files = files.len(),
            bytes = total_size,
            generation = self.generation,
            "Listed non-needed files"
        );
        let snapshot = RetentionSnapshot {
            generation: self.generation,
            files,
            total_size,
        };
        self.last = Some(snapshot.clone());
        self.last_size = total_size;
        snapshot
    }

    /// Size of the last listing, [`SIZE_INDETERMINATE`] if there is none.
    pub fn non_needed_size(&self) -> i64 {
        self.last_size
    }

    /// Delete `files` if they are exactly the files of the last listing.
    ///
    /// Order and duplicates do not matter. Returns false and deletes nothing
    /// on any mismatch, or when one of the files is covered by `referenced`.
    pub fn delete(
        &mut self,
        root: &Path,
        files: &[String],
        referenced: &BTreeSet<String>,
        catalog: &mut CatalogStore,
    ) -> bool {
        let Some(last) = &self.last else {
            warn!("Refusing deletion without a prior listing");
            return false;
        };
        if last.is_indeterminate() {
            warn!("Refusing deletion of an indeterminate listing");
            return false;
        }

        let requested: BTreeSet<&str> = files.iter().map(String::as_str).collect();
        let listed: BTreeSet<&str> = last.files.iter().map(String::as_str).collect();
        if requested != listed {
            warn!(
                requested = requested.len(),
                listed = listed.len(),
                "Refusing deletion of files that do not match the last listing"
            );
            return false;
        }
        if let Some(live) = last.files.iter().find(|f| is_referenced(f, referenced)) {
            warn!(path = live.as_str(), "Refusing deletion of a referenced file");
            return false;
        }

        let listed: Vec<String> = last.files.clone();
        self.remove(root, &listed, catalog);
        true
    }

    /// Delete the files of `snapshot` if it is the latest listing.
    pub fn delete_snapshot(
        &mut self,
        root: &Path,
        snapshot: &RetentionSnapshot,
        referenced: &BTreeSet<String>,
        catalog: &mut CatalogStore,
    ) -> bool {
        let current = self
            .last
            .as_ref()
            .is_some_and(|last| last.generation == snapshot.generation);
        if !current {
            warn!(
                generation = snapshot.generation,
                "Refusing deletion of an outdated listing"
            );
            return false;
        }
        self.delete(root, &snapshot.files, referenced, catalog)
    }

    /// Drop the last listing because what is needed may have changed.
    pub fn invalidate(&mut self) {
        if self.last.take().is_some() {
            debug!("Retention listing invalidated");
        }
        self.last_size = SIZE_INDETERMINATE;
    }

    fn remove(&mut self, root: &Path, files: &[String], catalog: &mut CatalogStore) {
        for relative in files {
            let path = root.join(relative);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Deleted non-needed file"),
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete file"),
            }
            if let Err(e) = catalog.unregister(relative) {
                warn!(path = relative.as_str(), error = %e, "Failed to unregister file");
            }
            prune_empty_dirs(root, &path);
        }

        info!(files = files.len(), "Deleted non-needed files");
        self.invalidate();
    }
}

fn enumerate_files(root: &Path) -> Vec<(String, u64)> {
    let Some(root_str) = root.to_str() else {
        warn!(path = %root.display(), "Storage root is not valid UTF-8");
        return Vec::new();
    };
    let pattern = format!("{}/**/*", glob::Pattern::escape(root_str));

    let entries = match glob(&pattern) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(pattern = %pattern, error = %e, "Invalid retention pattern");
            return Vec::new();
        }
    };

    entries
        .filter_map(Result::ok)
        .filter_map(|path| {
            let metadata = fs::symlink_metadata(&path).ok()?;
            if !metadata.is_file() {
                return None;
            }
            Some((relative_key(root, &path)?, metadata.len()))
        })
        .collect()
}

fn is_bookkeeping(relative: &str) -> bool {
    relative == SERVER_URL_FILE
        || relative == PROVIDED_FILE
        || relative == REQUESTED_FILE
        || relative.starts_with(CATALOG_FILE_NAME)
}

fn is_referenced(relative: &str, referenced: &BTreeSet<String>) -> bool {
    referenced.contains(relative)
        || referenced.iter().any(|path| {
            relative
                .strip_prefix(path.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
}

fn prune_empty_dirs(root: &Path, file: &Path) {
    let mut dir = file.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        // remove_dir fails on non-empty directories, which ends the walk
        if fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
}
