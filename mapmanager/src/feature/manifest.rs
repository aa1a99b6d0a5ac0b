//! Loading and saving of the manifests kept in the storage root.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use tracing::{debug, warn};

use super::descriptor::{FeatureDescriptor, ParseIssue, ParsedManifest, ServerManifest};
use crate::fsutil::write_atomic;

/// Server manifest with the provided-list URL.
pub const SERVER_URL_FILE: &str = "url.json";

/// Features currently offered by the server.
pub const PROVIDED_FILE: &str = "countries_provided.json";

/// Features the user subscribed to.
pub const REQUESTED_FILE: &str = "countries_requested.json";

/// Load a feature manifest.
///
/// A missing file is an empty manifest. A file that cannot be read or decoded
/// is reported as a single issue and treated as empty.
pub fn load_manifest(path: &Path, source_name: &str) -> ParsedManifest {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "Manifest not present");
            return ParsedManifest::default();
        }
        Err(e) => return rejected(source_name, e.to_string()),
    };

    match ParsedManifest::parse(&content, source_name) {
        Ok(parsed) => {
            for issue in &parsed.issues {
                warn!(%issue, "Skipping malformed manifest entry");
            }
            parsed
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Manifest unusable");
            rejected(source_name, e.to_string())
        }
    }
}

/// Write a feature manifest atomically.
pub fn save_manifest(
    path: &Path,
    entries: &BTreeMap<String, FeatureDescriptor>,
) -> io::Result<()> {
    let json = ParsedManifest::to_json(entries)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(path, json.as_bytes())
}

/// Load the server manifest, if one has been downloaded.
pub fn load_server_manifest(path: &Path) -> Option<ServerManifest> {
    let content = fs::read_to_string(path).ok()?;
    match ServerManifest::parse(&content) {
        Ok(manifest) => Some(manifest),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ignoring invalid server manifest");
            None
        }
    }
}

fn rejected(source_name: &str, reason: String) -> ParsedManifest {
    ParsedManifest {
        entries: BTreeMap::new(),
        issues: vec![ParseIssue {
            source_name: source_name.to_string(),
            id: String::new(),
            reason,
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_manifest_is_empty_without_issues() {
        let temp = TempDir::new().unwrap();
        let parsed = load_manifest(&temp.path().join(PROVIDED_FILE), PROVIDED_FILE);

        assert!(parsed.entries.is_empty());
        assert!(parsed.issues.is_empty());
    }

    #[test]
    fn test_garbage_manifest_reported() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(REQUESTED_FILE);
        fs::write(&path, "garbage").unwrap();

        let parsed = load_manifest(&path, REQUESTED_FILE);
        assert!(parsed.entries.is_empty());
        assert_eq!(parsed.issues.len(), 1);
        assert_eq!(parsed.issues[0].source_name, REQUESTED_FILE);
    }

    #[test]
    fn test_save_then_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(REQUESTED_FILE);
        let mut entries = BTreeMap::new();
        entries.insert(
            "XX".to_string(),
            FeatureDescriptor::new("territory", "Xland", "1", "2024-01-01T00:00:00Z")
                .with_dependency("postal/global"),
        );

        save_manifest(&path, &entries).unwrap();
        let parsed = load_manifest(&path, REQUESTED_FILE);

        assert_eq!(parsed.entries, entries);
    }

    #[test]
    fn test_invalid_server_manifest_ignored() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(SERVER_URL_FILE);

        assert!(load_server_manifest(&path).is_none());

        fs::write(&path, r#"{"providedListUrl": "::"}"#).unwrap();
        assert!(load_server_manifest(&path).is_none());

        fs::write(&path, r#"{"providedListUrl": "https://example.com/list.json"}"#).unwrap();
        assert!(load_server_manifest(&path).is_some());
    }
}
