//! Reconciliation of the available, requested and provided views.
//!
//! [`AvailabilityResolver::resolve`] rebuilds an [`AvailabilityState`] from
//! scratch out of the manifests and the catalog. Nothing is patched in place:
//! every scan produces a new state that replaces the previous one.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::PathBuf;

use reqwest::Url;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::error::ManagerError;
use crate::catalog::CatalogStore;
use crate::config::format_size;
use crate::feature::{
    Feature, FeatureGraph, ParsedManifest, FEATURE_TYPE_GEOCODER, FEATURE_TYPE_POSTAL_COUNTRY,
    FEATURE_TYPE_POSTAL_GLOBAL, PRETTY_SEPARATOR,
};

/// Data versions the running software accepts, per feature type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionPolicy {
    expected: BTreeMap<String, String>,
}

impl VersionPolicy {
    pub fn from_table(expected: BTreeMap<String, String>) -> Self {
        Self { expected }
    }

    /// Version required for `feature_type`, if any.
    pub fn expected(&self, feature_type: &str) -> Option<&str> {
        self.expected.get(feature_type).map(String::as_str)
    }

    /// Types without an entry accept every version.
    pub fn is_compatible(&self, feature_type: &str, version: &str) -> bool {
        self.expected(feature_type)
            .map_or(true, |expected| expected == version)
    }
}

/// A feature file that has to be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileToDownload {
    pub feature_id: String,
    /// Display name of the feature.
    pub name: String,
    pub url: String,
    /// Destination relative to the storage root.
    pub path: String,
    /// Feature type.
    pub role: String,
    pub version: String,
    pub datetime: String,
    pub size: Option<u64>,
}

/// Datasets the map service should serve, as absolute paths.
///
/// Only available files are named. The per-country roles all belong to the
/// same country.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActiveDatasets {
    /// Country the per-country roles were taken from.
    pub country: Option<String>,
    pub base_map: Option<PathBuf>,
    pub geocoder: Option<PathBuf>,
    pub postal_global: Option<PathBuf>,
    pub postal_country: Option<PathBuf>,
}

/// Which countries a listing projection covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Available,
    Requested,
    Provided,
}

/// Builds [`AvailabilityState`]s.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityResolver {
    policy: VersionPolicy,
}

impl AvailabilityResolver {
    pub fn new(policy: VersionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &VersionPolicy {
        &self.policy
    }

    /// Reconcile manifests and catalog into a fresh state.
    ///
    /// `base_url` is the provided-list URL that relative file paths resolve
    /// against.
    pub fn resolve(
        &self,
        provided: &ParsedManifest,
        requested: &ParsedManifest,
        catalog: &CatalogStore,
        base_url: Option<Url>,
    ) -> AvailabilityState {
        let mut graph = FeatureGraph::build(provided, requested);

        for feature in graph.iter_mut() {
            let path = feature.path();
            feature.installed = catalog.lookup(&path).cloned();
            feature.compatible = feature.installed.as_ref().is_some_and(|entry| {
                self.policy
                    .is_compatible(feature.feature_type(), &entry.version)
            });
        }

        let available = compute_available(&graph);
        for feature in graph.iter_mut() {
            feature.available = available.get(feature.id()).copied().unwrap_or(false);
        }

        let roots: BTreeSet<String> = requested.entries.keys().cloned().collect();
        let mut expanded: Vec<&str> = Vec::new();
        for root in &roots {
            expanded.push(root.as_str());
            expanded.extend(graph.sub_features(root).into_iter().map(Feature::id));
        }
        let closure = graph.dependency_closure(expanded);

        let mut unknown = BTreeSet::new();
        for id in closure {
            match graph.get_mut(&id) {
                Some(feature) => feature.requested = true,
                None => {
                    unknown.insert(id);
                }
            }
        }

        let state = AvailabilityState {
            graph,
            policy: self.policy.clone(),
            base_url,
            requested_roots: roots,
            unknown,
        };
        debug!(
            features = state.graph.len(),
            available = state.available().len(),
            requested = state.requested().len(),
            provided = state.provided().len(),
            "Availability resolved"
        );
        state
    }
}

fn compute_available(graph: &FeatureGraph) -> BTreeMap<String, bool> {
    enum Mark {
        Visiting,
        Done(bool),
    }

    fn visit(graph: &FeatureGraph, id: &str, marks: &mut BTreeMap<String, Mark>) -> bool {
        match marks.get(id) {
            // A dependency cycle never becomes available.
            Some(Mark::Visiting) => return false,
            Some(Mark::Done(value)) => return *value,
            None => {}
        }
        let Some(feature) = graph.get(id) else {
            return false;
        };

        marks.insert(id.to_string(), Mark::Visiting);
        let available = feature.is_compatible()
            && feature
                .dependencies()
                .iter()
                .all(|dep| visit(graph, dep, marks));
        marks.insert(id.to_string(), Mark::Done(available));
        available
    }

    let mut marks = BTreeMap::new();
    graph
        .iter()
        .map(|f| (f.id().to_string(), visit(graph, f.id(), &mut marks)))
        .collect()
}

/// Reconciled view of all features after a scan.
#[derive(Debug, Clone, Default)]
pub struct AvailabilityState {
    graph: FeatureGraph,
    policy: VersionPolicy,
    base_url: Option<Url>,
    requested_roots: BTreeSet<String>,
    unknown: BTreeSet<String>,
}

impl AvailabilityState {
    pub fn graph(&self) -> &FeatureGraph {
        &self.graph
    }

    pub fn is_available(&self, id: &str) -> bool {
        self.graph.get(id).is_some_and(Feature::is_available)
    }

    pub fn is_requested(&self, id: &str) -> bool {
        self.graph.get(id).is_some_and(Feature::is_requested)
    }

    /// The country and all of its sub-features are available.
    pub fn is_country_available(&self, id: &str) -> bool {
        self.is_available(id)
            && self
                .graph
                .sub_features(id)
                .iter()
                .all(|f| f.is_available())
    }

    /// The user subscribed to this country.
    pub fn is_country_requested(&self, id: &str) -> bool {
        self.requested_roots.contains(id)
    }

    /// No installed file of the country has a rejected version.
    pub fn is_country_compatible(&self, id: &str) -> bool {
        self.graph.contains(id) && self.country_features(id).iter().all(|f| !is_incompatible(f))
    }

    /// Ids of all available features.
    pub fn available(&self) -> BTreeSet<String> {
        self.ids_where(Feature::is_available)
    }

    /// Ids of all requested features, dependencies included.
    pub fn requested(&self) -> BTreeSet<String> {
        self.ids_where(Feature::is_requested)
    }

    /// Ids of all features the server offers.
    pub fn provided(&self) -> BTreeSet<String> {
        self.ids_where(Feature::is_provided)
    }

    fn ids_where(&self, predicate: impl Fn(&Feature) -> bool) -> BTreeSet<String> {
        self.graph
            .iter()
            .filter(|f| predicate(f))
            .map(|f| f.id().to_string())
            .collect()
    }

    /// Requested dependencies no manifest describes.
    pub fn unknown_dependencies(&self) -> &BTreeSet<String> {
        &self.unknown
    }

    /// Some requested data is not available.
    pub fn missing(&self) -> bool {
        !self.unknown.is_empty()
            || self
                .graph
                .iter()
                .any(|f| f.is_requested() && !f.is_available())
    }

    /// Download entry for a feature, if the server offers a version the
    /// software accepts.
    pub fn download_file(&self, id: &str) -> Option<FileToDownload> {
        let feature = self.graph.get(id)?;
        if !feature.is_provided()
            || !self
                .policy
                .is_compatible(feature.feature_type(), feature.version())
        {
            return None;
        }
        let url = self.file_url(feature)?;

        Some(FileToDownload {
            feature_id: feature.id().to_string(),
            name: self.graph.display_name(feature.id()),
            url,
            path: feature.path(),
            role: feature.feature_type().to_string(),
            version: feature.version().to_string(),
            datetime: feature.datetime().to_string(),
            size: feature.size(),
        })
    }

    fn file_url(&self, feature: &Feature) -> Option<String> {
        if let Some(url) = &feature.descriptor().url {
            return Some(url.clone());
        }
        self.base_url
            .as_ref()?
            .join(&feature.path())
            .ok()
            .map(String::from)
    }

    /// Requested files that are not installed in a usable version, with
    /// dependencies ahead of the features that need them.
    pub fn missing_files(&self) -> Vec<FileToDownload> {
        let pending: BTreeSet<String> = self
            .graph
            .iter()
            .filter(|f| f.is_requested() && !f.is_compatible())
            .map(|f| f.id().to_string())
            .collect();

        self.graph
            .dependency_order(&pending)
            .iter()
            .filter_map(|id| self.download_file(id))
            .collect()
    }

    /// Installed features whose version is rejected.
    pub fn incompatible(&self) -> Vec<ManagerError> {
        self.graph
            .iter()
            .filter(|f| is_incompatible(f))
            .filter_map(|f| {
                let entry = f.installed()?;
                Some(ManagerError::VersionIncompatible {
                    id: f.id().to_string(),
                    found: entry.version.clone(),
                    expected: self.policy.expected(f.feature_type())?.to_string(),
                })
            })
            .collect()
    }

    /// Summary of what keeps the requested data from being complete.
    pub fn missing_info(&self) -> String {
        let mut info = String::new();

        let files = self.missing_files();
        if !files.is_empty() {
            let total: u64 = files.iter().filter_map(|f| f.size).sum();
            let _ = writeln!(info, "Files to download ({}):", format_size(total));
            for file in &files {
                match file.size {
                    Some(size) => {
                        let _ = writeln!(info, "  {} ({})", file.name, format_size(size));
                    }
                    None => {
                        let _ = writeln!(info, "  {}", file.name);
                    }
                }
            }
        }

        let queued: BTreeSet<&str> = files.iter().map(|f| f.feature_id.as_str()).collect();
        let blocked: Vec<&Feature> = self
            .graph
            .iter()
            .filter(|f| f.is_requested() && !f.is_compatible())
            .filter(|f| !queued.contains(f.id()))
            .collect();
        if !blocked.is_empty() {
            let _ = writeln!(info, "Not offered by the server:");
            for feature in blocked {
                let _ = writeln!(info, "  {}", self.graph.display_name(feature.id()));
            }
        }

        if !self.unknown.is_empty() {
            let _ = writeln!(info, "Unknown dependencies:");
            for id in &self.unknown {
                let _ = writeln!(info, "  {}", id);
            }
        }

        let incompatible = self.incompatible();
        if !incompatible.is_empty() {
            let _ = writeln!(info, "Incompatible versions:");
            for error in incompatible {
                let _ = writeln!(info, "  {}", error);
            }
        }

        if !self.graph.issues().is_empty() {
            let _ = writeln!(info, "Skipped descriptors:");
            for issue in self.graph.issues() {
                let _ = writeln!(info, "  {}", issue);
            }
        }

        info.trim_end().to_string()
    }

    /// Relative paths that must survive a retention cleanup.
    pub fn referenced_paths(&self) -> BTreeSet<String> {
        self.graph
            .iter()
            .filter(|f| f.is_available() || f.is_requested())
            .map(Feature::path)
            .collect()
    }

    /// Pick the datasets to serve.
    ///
    /// The country is `preferred` when its base map is available, otherwise
    /// the first country by name with an available base map. `resolve` turns
    /// root-relative paths into absolute ones.
    pub fn active_datasets(
        &self,
        preferred: Option<&str>,
        resolve: impl Fn(&str) -> PathBuf,
    ) -> ActiveDatasets {
        let candidates: Vec<&Feature> = self
            .graph
            .sorted_top_level()
            .into_iter()
            .filter(|f| f.is_territory() && f.is_available())
            .collect();
        let country = preferred
            .and_then(|id| candidates.iter().find(|f| f.id() == id))
            .or_else(|| candidates.first())
            .copied();

        let role = |feature_type: &str| {
            let country = country?;
            self.graph
                .sub_features(country.id())
                .into_iter()
                .find(|f| f.feature_type() == feature_type && f.is_available())
                .map(|f| resolve(&f.path()))
        };
        let geocoder = role(FEATURE_TYPE_GEOCODER);
        let postal_country = role(FEATURE_TYPE_POSTAL_COUNTRY);
        let postal_global = self
            .graph
            .iter()
            .find(|f| f.feature_type() == FEATURE_TYPE_POSTAL_GLOBAL && f.is_available())
            .map(|f| resolve(&f.path()));

        ActiveDatasets {
            country: country.map(|f| f.id().to_string()),
            base_map: country.map(|f| resolve(&f.path())),
            geocoder,
            postal_global,
            postal_country,
        }
    }

    fn country_features(&self, id: &str) -> Vec<&Feature> {
        let mut features: Vec<&Feature> = self.graph.get(id).into_iter().collect();
        features.extend(self.graph.sub_features(id));
        features
    }

    fn countries(&self, kind: ListKind) -> Vec<&Feature> {
        self.graph
            .sorted_top_level()
            .into_iter()
            .filter(|f| f.is_territory())
            .filter(|f| match kind {
                ListKind::Available => self.is_country_available(f.id()),
                ListKind::Requested => self.is_country_requested(f.id()),
                ListKind::Provided => f.is_provided(),
            })
            .collect()
    }

    fn country_row(&self, feature: &Feature) -> Value {
        let size: u64 = self
            .country_features(feature.id())
            .iter()
            .filter_map(|f| f.size())
            .sum();
        json!({
            "id": feature.id(),
            "name": self.graph.display_name(feature.id()),
            "type": feature.feature_type(),
            "size": size,
            "requested": self.is_country_requested(feature.id()),
            "available": self.is_country_available(feature.id()),
            "compatible": self.is_country_compatible(feature.id()),
        })
    }

    /// Countries of the given list, sorted by name.
    ///
    /// The flat form is an array of rows. The tree form nests rows under
    /// `{"name", "children"}` groups built from the `" / "` separated parts of
    /// the name; leaves carry only the last part as `name`.
    pub fn countries_json(&self, kind: ListKind, tree: bool) -> Value {
        let rows: Vec<Value> = self
            .countries(kind)
            .into_iter()
            .map(|f| self.country_row(f))
            .collect();

        if tree {
            build_tree(rows)
        } else {
            Value::Array(rows)
        }
    }

    /// Per-feature breakdown of a country, `None` for unknown ids.
    pub fn country_details_json(&self, id: &str) -> Option<Value> {
        let country = self.graph.get(id)?;
        let features: Vec<Value> = self
            .country_features(id)
            .into_iter()
            .map(|f| {
                json!({
                    "id": f.id(),
                    "name": self.graph.display_name(f.id()),
                    "type": f.feature_type(),
                    "version": f.version(),
                    "datetime": f.datetime(),
                    "installedVersion": f.installed().map(|e| e.version.clone()),
                    "installedDatetime": f.installed().map(|e| e.datetime.clone()),
                    "size": f.size(),
                    "provided": f.is_provided(),
                    "requested": f.is_requested(),
                    "available": f.is_available(),
                    "compatible": !is_incompatible(f),
                    "dependencies": f.dependencies(),
                })
            })
            .collect();

        let mut details = self.country_row(country);
        if let Value::Object(map) = &mut details {
            map.insert("features".to_string(), Value::Array(features));
        }
        Some(details)
    }
}

fn is_incompatible(feature: &Feature) -> bool {
    feature.installed().is_some() && !feature.is_compatible()
}

enum TreeNode {
    Group {
        name: String,
        children: Vec<TreeNode>,
    },
    Leaf(Value),
}

fn build_tree(rows: Vec<Value>) -> Value {
    let mut root: Vec<TreeNode> = Vec::new();
    for row in rows {
        let name = row["name"].as_str().unwrap_or_default().to_string();
        let parts: Vec<&str> = name.split(PRETTY_SEPARATOR).collect();
        insert_node(&mut root, &parts, row);
    }
    Value::Array(root.into_iter().map(node_to_json).collect())
}

fn insert_node(nodes: &mut Vec<TreeNode>, parts: &[&str], mut row: Value) {
    match parts {
        [] => {}
        [last] => {
            row["name"] = Value::String(last.to_string());
            nodes.push(TreeNode::Leaf(row));
        }
        [first, rest @ ..] => {
            let existing = nodes.iter_mut().position(
                |n| matches!(n, TreeNode::Group { name, .. } if name.as_str() == *first),
            );
            let index = match existing {
                Some(index) => index,
                None => {
                    nodes.push(TreeNode::Group {
                        name: first.to_string(),
                        children: Vec::new(),
                    });
                    nodes.len() - 1
                }
            };
            if let TreeNode::Group { children, .. } = &mut nodes[index] {
                insert_node(children, rest, row);
            }
        }
    }
}

fn node_to_json(node: TreeNode) -> Value {
    match node {
        TreeNode::Leaf(row) => row,
        TreeNode::Group { name, children } => {
            let mut map = Map::new();
            map.insert("name".to_string(), Value::String(name));
            map.insert(
                "children".to_string(),
                Value::Array(children.into_iter().map(node_to_json).collect()),
            );
            Value::Object(map)
        }
    }
}
