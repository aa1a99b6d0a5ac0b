//! Access to the storage root: availability probe, manifests and catalog.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::availability::FileToDownload;
use super::download::Finalizer;
use super::error::{ManagerError, ManagerResult};
use crate::catalog::CatalogStore;
use crate::feature::manifest::{load_manifest, load_server_manifest, save_manifest};
use crate::feature::{
    FeatureDescriptor, ParsedManifest, ServerManifest, PROVIDED_FILE, REQUESTED_FILE,
    SERVER_URL_FILE,
};
use crate::fsutil::replace_file;

/// File written and removed to check that the root is writable.
const PROBE_FILE: &str = ".mapmanager-probe";

/// The storage root with its catalog.
#[derive(Debug)]
pub struct Storage {
    root: PathBuf,
    catalog: CatalogStore,
}

impl Storage {
    /// Check that `root` is mounted and writable.
    ///
    /// The root itself is created when missing, but only if its parent
    /// exists, so an unmounted volume is never populated by accident.
    pub fn probe(root: &Path) -> ManagerResult<()> {
        let unavailable = || ManagerError::StorageUnavailable {
            path: root.to_path_buf(),
        };

        if !root.exists() {
            match root.parent() {
                Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => {}
                _ => return Err(unavailable()),
            }
            fs::create_dir(root).map_err(|e| {
                warn!(path = %root.display(), error = %e, "Cannot create storage root");
                unavailable()
            })?;
            info!(path = %root.display(), "Created storage root");
        }
        if !root.is_dir() {
            return Err(unavailable());
        }

        let probe = root.join(PROBE_FILE);
        fs::write(&probe, b"probe").map_err(|e| {
            warn!(path = %root.display(), error = %e, "Storage root not writable");
            unavailable()
        })?;
        fs::remove_file(&probe).ok();
        Ok(())
    }

    /// Probe `root` and open its catalog.
    pub fn open(root: PathBuf) -> ManagerResult<Self> {
        Self::probe(&root)?;
        let catalog = CatalogStore::open(&root);
        debug!(path = %root.display(), "Storage opened");
        Ok(Self { root, catalog })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut CatalogStore {
        &mut self.catalog
    }

    /// Absolute path of a file given relative to the root.
    pub fn full_path(&self, relative: &str) -> PathBuf {
        relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part))
    }

    pub fn load_provided(&self) -> ParsedManifest {
        load_manifest(&self.root.join(PROVIDED_FILE), PROVIDED_FILE)
    }

    pub fn load_requested(&self) -> ParsedManifest {
        load_manifest(&self.root.join(REQUESTED_FILE), REQUESTED_FILE)
    }

    pub fn save_requested(
        &self,
        entries: &BTreeMap<String, FeatureDescriptor>,
    ) -> ManagerResult<()> {
        let path = self.root.join(REQUESTED_FILE);
        save_manifest(&path, entries).map_err(|e| ManagerError::io(path, e))
    }

    pub fn server_manifest(&self) -> Option<ServerManifest> {
        load_server_manifest(&self.root.join(SERVER_URL_FILE))
    }

    fn install_list(&self, staging: &Path, dest: &Path, source_name: &str) -> ManagerResult<()> {
        let content = read_staging(staging)?;
        let parsed =
            ParsedManifest::parse(&content, source_name).map_err(|e| ManagerError::Parse {
                source_name: source_name.to_string(),
                reason: e.to_string(),
            })?;
        replace_file(staging, dest).map_err(|e| ManagerError::io(dest, e))?;
        info!(
            entries = parsed.entries.len(),
            skipped = parsed.issues.len(),
            "Installed feature list"
        );
        Ok(())
    }
}

fn read_staging(staging: &Path) -> ManagerResult<String> {
    fs::read_to_string(staging).map_err(|e| ManagerError::io(staging, e))
}

impl Finalizer for Storage {
    fn server_url(&mut self, staging: &Path, dest: &Path) -> ManagerResult<()> {
        let content = read_staging(staging)?;
        let manifest = ServerManifest::parse(&content).map_err(|e| ManagerError::Parse {
            source_name: SERVER_URL_FILE.to_string(),
            reason: e.to_string(),
        })?;
        replace_file(staging, dest).map_err(|e| ManagerError::io(dest, e))?;
        info!(url = %manifest.provided_list_url, "Installed server manifest");
        Ok(())
    }

    fn countries_list(&mut self, staging: &Path, dest: &Path) -> ManagerResult<()> {
        self.install_list(staging, dest, PROVIDED_FILE)
    }

    fn provided_list(&mut self, staging: &Path, dest: &Path) -> ManagerResult<()> {
        self.install_list(staging, dest, PROVIDED_FILE)
    }

    fn feature_data(
        &mut self,
        file: &FileToDownload,
        staging: &Path,
        dest: &Path,
    ) -> ManagerResult<()> {
        replace_file(staging, dest).map_err(|e| ManagerError::io(dest, e))?;
        self.catalog
            .register(&file.path, &file.version, &file.datetime)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::staging_path;
    use tempfile::TempDir;

    #[test]
    fn test_probe_creates_root_below_existing_parent() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Maps");

        Storage::probe(&root).unwrap();
        assert!(root.is_dir());
        assert!(!root.join(PROBE_FILE).exists());
    }

    #[test]
    fn test_probe_fails_without_parent() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("unmounted").join("Maps");

        let err = Storage::probe(&root).unwrap_err();
        assert!(matches!(err, ManagerError::StorageUnavailable { .. }));
        assert!(!root.exists());
    }

    #[test]
    fn test_probe_fails_on_file() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Maps");
        fs::write(&root, "not a directory").unwrap();

        assert!(Storage::probe(&root).is_err());
    }

    #[test]
    fn test_full_path() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::open(temp.path().to_path_buf()).unwrap();
        assert_eq!(
            storage.full_path("europe/xx.dat"),
            temp.path().join("europe").join("xx.dat")
        );
    }

    #[test]
    fn test_invalid_list_keeps_previous() {
        let temp = TempDir::new().unwrap();
        let mut storage = Storage::open(temp.path().to_path_buf()).unwrap();
        let dest = temp.path().join(PROVIDED_FILE);
        let staging = staging_path(&dest);
        fs::write(&dest, "{}").unwrap();
        fs::write(&staging, "<html>oops</html>").unwrap();

        let err = storage.provided_list(&staging, &dest).unwrap_err();
        assert!(matches!(err, ManagerError::Parse { .. }));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "{}");
    }

    #[test]
    fn test_feature_data_registers_after_rename() {
        let temp = TempDir::new().unwrap();
        let mut storage = Storage::open(temp.path().to_path_buf()).unwrap();
        let dest = storage.full_path("europe/xx.dat");
        let staging = staging_path(&dest);
        fs::create_dir_all(dest.parent().unwrap()).unwrap();
        fs::write(&staging, "data").unwrap();

        let file = FileToDownload {
            feature_id: "europe/xx".to_string(),
            name: "Xland".to_string(),
            url: "https://example.com/europe/xx.dat".to_string(),
            path: "europe/xx.dat".to_string(),
            role: "territory".to_string(),
            version: "3".to_string(),
            datetime: "2024-01-01T00:00:00Z".to_string(),
            size: Some(4),
        };
        storage.feature_data(&file, &staging, &dest).unwrap();

        assert_eq!(fs::read_to_string(&dest).unwrap(), "data");
        assert!(!staging.exists());
        assert_eq!(storage.catalog().lookup("europe/xx.dat").unwrap().version, "3");
    }

    #[test]
    fn test_requested_manifest_roundtrip() {
        let temp = TempDir::new().unwrap();
        let storage = Storage::open(temp.path().to_path_buf()).unwrap();

        let mut entries = BTreeMap::new();
        entries.insert(
            "XX".to_string(),
            FeatureDescriptor::new("territory", "Xland", "1", "t"),
        );
        storage.save_requested(&entries).unwrap();

        assert_eq!(storage.load_requested().entries, entries);
    }
}
