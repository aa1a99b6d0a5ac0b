//! Typed records for the persisted manifests.
//!
//! Manifests are JSON objects keyed by feature id. Each entry is decoded into
//! a [`FeatureDescriptor`] on its own, so one malformed entry is reported as a
//! [`ParseIssue`] without discarding the rest of the manifest.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path};

use reqwest::Url;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::manifest::{PROVIDED_FILE, REQUESTED_FILE, SERVER_URL_FILE};
use crate::catalog::CATALOG_FILE_NAME;

/// Suffixes of files the manager writes before renaming them into place.
const TRANSIENT_SUFFIXES: [&str; 2] = [".part", ".tmp"];

/// Extension used for feature files when a descriptor has no explicit path.
pub const DEFAULT_FILE_EXTENSION: &str = "dat";

/// Errors raised while decoding manifests.
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// The document is not valid JSON.
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The document is JSON but not an object keyed by feature id.
    #[error("expected an object keyed by feature id")]
    NotAnObject,

    /// A descriptor failed validation.
    #[error("{id}: {reason}")]
    Invalid { id: String, reason: String },

    /// The server manifest does not carry a usable provided-list URL.
    #[error("invalid provided list URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// A manifest entry that was skipped while loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseIssue {
    /// Manifest the entry came from (e.g. `countries_provided.json`).
    pub source_name: String,
    /// Feature id of the entry, empty when the whole document was rejected.
    pub id: String,
    /// What was wrong with it.
    pub reason: String,
}

impl fmt::Display for ParseIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.id.is_empty() {
            write!(f, "{}: {}", self.source_name, self.reason)
        } else {
            write!(f, "{}: {}: {}", self.source_name, self.id, self.reason)
        }
    }
}

/// Description of one installable feature as listed in a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDescriptor {
    /// Feature type (`territory`, `postal/global`, `geocoder-nlp`, ...).
    #[serde(rename = "type")]
    pub feature_type: String,

    /// Human readable name.
    pub pretty_name: String,

    /// Data format version.
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,

    /// Timestamp of the data.
    pub datetime: String,

    /// Ids of features this one needs to be usable.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Relative path of the file, defaults to `<id>.dat`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Download URL, defaults to `path` resolved against the provided list URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Size of the file in bytes, if published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl FeatureDescriptor {
    /// Create a descriptor with the required fields.
    pub fn new(
        feature_type: impl Into<String>,
        pretty_name: impl Into<String>,
        version: impl Into<String>,
        datetime: impl Into<String>,
    ) -> Self {
        Self {
            feature_type: feature_type.into(),
            pretty_name: pretty_name.into(),
            version: version.into(),
            datetime: datetime.into(),
            dependencies: Vec::new(),
            path: None,
            url: None,
            size: None,
        }
    }

    /// Add a dependency (builder pattern).
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.dependencies.push(id.into());
        self
    }

    /// Set an explicit file path (builder pattern).
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the published size (builder pattern).
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Relative path of the feature file.
    pub fn file_path(&self, id: &str) -> String {
        match &self.path {
            Some(path) => path.clone(),
            None => format!("{}.{}", id, DEFAULT_FILE_EXTENSION),
        }
    }

    /// Check the descriptor for values serde cannot reject on its own.
    pub fn validate(&self, id: &str) -> Result<(), DescriptorError> {
        let invalid = |reason: &str| DescriptorError::Invalid {
            id: id.to_string(),
            reason: reason.to_string(),
        };

        if id.is_empty() || id.starts_with('/') || id.ends_with('/') || id.contains("//") {
            return Err(invalid("malformed feature id"));
        }
        if self.feature_type.trim().is_empty() {
            return Err(invalid("empty type"));
        }
        if self.pretty_name.trim().is_empty() {
            return Err(invalid("empty prettyName"));
        }
        if self.version.trim().is_empty() {
            return Err(invalid("empty version"));
        }
        if self.dependencies.iter().any(|d| d == id) {
            return Err(invalid("depends on itself"));
        }
        if !is_safe_relative(&self.file_path(id)) {
            return Err(invalid("path must stay inside the storage root"));
        }
        if is_reserved_path(&self.file_path(id)) {
            return Err(invalid("path names a file the manager keeps for itself"));
        }
        Ok(())
    }
}

/// The `url.json` server manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerManifest {
    /// Where to fetch `countries_provided.json` from.
    pub provided_list_url: String,
}

impl ServerManifest {
    /// Parse and validate a server manifest.
    pub fn parse(content: &str) -> Result<Self, DescriptorError> {
        let manifest: ServerManifest = serde_json::from_str(content)?;
        manifest.base_url()?;
        Ok(manifest)
    }

    /// The provided-list URL, which also serves as base for relative file URLs.
    pub fn base_url(&self) -> Result<Url, DescriptorError> {
        Url::parse(&self.provided_list_url).map_err(|e| DescriptorError::InvalidUrl {
            url: self.provided_list_url.clone(),
            reason: e.to_string(),
        })
    }
}

/// Result of decoding a feature manifest.
#[derive(Debug, Clone, Default)]
pub struct ParsedManifest {
    /// Valid entries by feature id.
    pub entries: BTreeMap<String, FeatureDescriptor>,
    /// Entries that were skipped.
    pub issues: Vec<ParseIssue>,
}

impl ParsedManifest {
    /// Decode a manifest document.
    ///
    /// Fails only if the document as a whole is unusable; individual bad
    /// entries end up in `issues`.
    pub fn parse(content: &str, source_name: &str) -> Result<Self, DescriptorError> {
        let value: Value = serde_json::from_str(content)?;
        let Value::Object(map) = value else {
            return Err(DescriptorError::NotAnObject);
        };

        let mut parsed = ParsedManifest::default();
        for (id, entry) in map {
            let decoded = serde_json::from_value::<FeatureDescriptor>(entry)
                .map_err(DescriptorError::from)
                .and_then(|d| d.validate(&id).map(|_| d));

            match decoded {
                Ok(descriptor) => {
                    parsed.entries.insert(id, descriptor);
                }
                Err(e) => {
                    let reason = match e {
                        DescriptorError::Invalid { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    parsed.issues.push(ParseIssue {
                        source_name: source_name.to_string(),
                        id,
                        reason,
                    });
                }
            }
        }
        Ok(parsed)
    }

    /// Serialize entries back into manifest form.
    pub fn to_json(entries: &BTreeMap<String, FeatureDescriptor>) -> serde_json::Result<String> {
        serde_json::to_string_pretty(entries)
    }
}

fn is_safe_relative(path: &str) -> bool {
    let path = Path::new(path);
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// True for manifest, catalog and staging files, which feature data must not
/// replace.
fn is_reserved_path(path: &str) -> bool {
    let parts: Vec<&str> = Path::new(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect();
    let Some(name) = parts.last() else {
        return false;
    };

    if TRANSIENT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        return true;
    }
    parts.len() == 1
        && (*name == SERVER_URL_FILE
            || *name == PROVIDED_FILE
            || *name == REQUESTED_FILE
            || name.starts_with(CATALOG_FILE_NAME))
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}
