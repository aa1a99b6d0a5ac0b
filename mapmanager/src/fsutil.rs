//! Small filesystem helpers shared by the catalog and manifest writers.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Suffix appended to a destination path while its content is being produced.
pub(crate) const STAGING_SUFFIX: &str = ".part";

/// Path of the staging file that is renamed onto `dest` once complete.
pub(crate) fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(STAGING_SUFFIX);
    PathBuf::from(name)
}

/// Write `bytes` to `path` so that readers see either the old or the new content.
///
/// The data goes to a sibling temp file which is synced and renamed over the
/// destination.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.as_os_str().to_os_string();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);

    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if result.is_err() {
        fs::remove_file(&tmp).ok();
    }
    result
}

/// Move a finished staging file onto its destination, replacing any old copy.
pub(crate) fn replace_file(staging: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::rename(staging, dest)
}

/// Convert a path below `root` to the forward-slash relative form used in
/// manifests and the catalog.
pub(crate) fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_staging_path_appends_suffix() {
        let staging = staging_path(Path::new("/maps/europe/ee.dat"));
        assert_eq!(staging, PathBuf::from("/maps/europe/ee.dat.part"));
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("data.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
        assert!(!temp.path().join("nested").join("data.json.tmp").exists());
    }

    #[test]
    fn test_relative_key_uses_forward_slashes() {
        let root = Path::new("/maps");
        let key = relative_key(root, &root.join("europe").join("ee.dat"));
        assert_eq!(key.as_deref(), Some("europe/ee.dat"));
        assert_eq!(relative_key(root, root), None);
    }
}
