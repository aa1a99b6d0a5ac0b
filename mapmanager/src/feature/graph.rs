//! In-memory model of features and their dependency edges.
//!
//! The graph is rebuilt from the manifests on every scan and never patched
//! in place. Ids are hierarchical: `europe/estonia/postal` is a sub-feature of
//! `europe/estonia` when both are present.

use std::collections::{BTreeMap, BTreeSet};

use super::descriptor::{FeatureDescriptor, ParseIssue, ParsedManifest};
use crate::catalog::CatalogEntry;

/// Feature type of countries, whose own file is the base map.
pub const FEATURE_TYPE_TERRITORY: &str = "territory";

/// Feature type of per-country geocoder indices.
pub const FEATURE_TYPE_GEOCODER: &str = "geocoder-nlp";

/// Feature type of per-country postal databases.
pub const FEATURE_TYPE_POSTAL_COUNTRY: &str = "postal/country";

/// Feature type of the postal data shared by all countries.
pub const FEATURE_TYPE_POSTAL_GLOBAL: &str = "postal/global";

/// Separator between the parts of a display name.
pub const PRETTY_SEPARATOR: &str = " / ";

/// An installable dataset and its reconciled state.
#[derive(Debug, Clone)]
pub struct Feature {
    id: String,
    descriptor: FeatureDescriptor,
    provided: bool,
    parent: Option<String>,
    pub(crate) installed: Option<CatalogEntry>,
    pub(crate) compatible: bool,
    pub(crate) available: bool,
    pub(crate) requested: bool,
}

impl Feature {
    fn new(id: String, descriptor: FeatureDescriptor, provided: bool) -> Self {
        Self {
            id,
            descriptor,
            provided,
            parent: None,
            installed: None,
            compatible: false,
            available: false,
            requested: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn feature_type(&self) -> &str {
        &self.descriptor.feature_type
    }

    pub fn pretty_name(&self) -> &str {
        &self.descriptor.pretty_name
    }

    /// Version of the data as described by the manifest.
    pub fn version(&self) -> &str {
        &self.descriptor.version
    }

    /// Timestamp of the data as described by the manifest.
    pub fn datetime(&self) -> &str {
        &self.descriptor.datetime
    }

    pub fn dependencies(&self) -> &[String] {
        &self.descriptor.dependencies
    }

    /// Relative path of the feature file.
    pub fn path(&self) -> String {
        self.descriptor.file_path(&self.id)
    }

    pub fn descriptor(&self) -> &FeatureDescriptor {
        &self.descriptor
    }

    pub fn size(&self) -> Option<u64> {
        self.descriptor.size
    }

    /// Whether the server currently offers this feature.
    pub fn is_provided(&self) -> bool {
        self.provided
    }

    /// Id of the enclosing feature, if this is a sub-feature.
    pub fn parent(&self) -> Option<&str> {
        self.parent.as_deref()
    }

    pub fn is_territory(&self) -> bool {
        self.descriptor.feature_type == FEATURE_TYPE_TERRITORY
    }

    /// Catalog entry of the installed file, if any.
    pub fn installed(&self) -> Option<&CatalogEntry> {
        self.installed.as_ref()
    }

    /// Installed with a version the software accepts.
    pub fn is_compatible(&self) -> bool {
        self.compatible
    }

    /// Compatible and every dependency available.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Part of what the user subscribed to.
    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

/// Features keyed by id, with dependency and containment relations.
#[derive(Debug, Clone, Default)]
pub struct FeatureGraph {
    features: BTreeMap<String, Feature>,
    issues: Vec<ParseIssue>,
}

impl FeatureGraph {
    /// Build the graph from the provided and requested manifests.
    ///
    /// When an id appears in both, the provided descriptor wins; requested
    /// entries keep features known after the server stopped offering them.
    pub fn build(provided: &ParsedManifest, requested: &ParsedManifest) -> Self {
        let mut features = BTreeMap::new();

        for (id, descriptor) in &requested.entries {
            features.insert(id.clone(), Feature::new(id.clone(), descriptor.clone(), false));
        }
        for (id, descriptor) in &provided.entries {
            features.insert(id.clone(), Feature::new(id.clone(), descriptor.clone(), true));
        }

        let parents: Vec<(String, String)> = features
            .keys()
            .filter_map(|id| find_parent(&features, id).map(|p| (id.clone(), p)))
            .collect();
        for (id, parent) in parents {
            if let Some(feature) = features.get_mut(&id) {
                feature.parent = Some(parent);
            }
        }

        let mut issues = provided.issues.clone();
        issues.extend(requested.issues.iter().cloned());

        Self { features, issues }
    }

    pub fn get(&self, id: &str) -> Option<&Feature> {
        self.features.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &str) -> Option<&mut Feature> {
        self.features.get_mut(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.features.contains_key(id)
    }

    /// All features in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.values()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Feature> {
        self.features.values_mut()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Manifest entries skipped while building the graph.
    pub fn issues(&self) -> &[ParseIssue] {
        &self.issues
    }

    /// Type of the feature with the given id, or `None` for unknown ids.
    pub fn feature_type(&self, id: &str) -> Option<&str> {
        self.get(id).map(Feature::feature_type)
    }

    /// Pretty name of a feature, or `None` for unknown ids.
    pub fn pretty_name(&self, id: &str) -> Option<&str> {
        self.get(id).map(Feature::pretty_name)
    }

    /// Name shown to the user: the parent's display name and the own pretty
    /// name joined by `" / "`. Unknown ids display as themselves.
    pub fn display_name(&self, id: &str) -> String {
        match self.get(id) {
            Some(feature) => match feature.parent() {
                Some(parent) => format!(
                    "{}{}{}",
                    self.display_name(parent),
                    PRETTY_SEPARATOR,
                    feature.pretty_name()
                ),
                None => feature.pretty_name().to_string(),
            },
            None => id.to_string(),
        }
    }

    /// Features without a parent, sorted alphabetically by display name.
    pub fn sorted_top_level(&self) -> Vec<&Feature> {
        let mut top: Vec<&Feature> = self.iter().filter(|f| f.parent().is_none()).collect();
        top.sort_by(|a, b| {
            a.pretty_name()
                .to_lowercase()
                .cmp(&b.pretty_name().to_lowercase())
                .then_with(|| a.id().cmp(b.id()))
        });
        top
    }

    /// All features nested below `id`, in id order.
    pub fn sub_features(&self, id: &str) -> Vec<&Feature> {
        let prefix = format!("{}/", id);
        self.features
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(_, f)| f)
            .collect()
    }

    /// The given ids plus everything they transitively depend on.
    ///
    /// Dependencies missing from the graph are included so callers can
    /// report them.
    pub fn dependency_closure<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a str>,
    ) -> BTreeSet<String> {
        let mut closure = BTreeSet::new();
        let mut stack: Vec<String> = roots.into_iter().map(str::to_string).collect();

        while let Some(id) = stack.pop() {
            if !closure.insert(id.clone()) {
                continue;
            }
            if let Some(feature) = self.get(&id) {
                stack.extend(
                    feature
                        .dependencies()
                        .iter()
                        .filter(|d| !closure.contains(*d))
                        .cloned(),
                );
            }
        }
        closure
    }

    /// Order `ids` so that every feature comes after its dependencies.
    ///
    /// Ties keep id order; dependency cycles are broken arbitrarily.
    pub fn dependency_order(&self, ids: &BTreeSet<String>) -> Vec<String> {
        fn visit(
            graph: &FeatureGraph,
            id: &str,
            ids: &BTreeSet<String>,
            done: &mut BTreeSet<String>,
            out: &mut Vec<String>,
        ) {
            if !done.insert(id.to_string()) {
                return;
            }
            if let Some(feature) = graph.get(id) {
                for dep in feature.dependencies() {
                    if ids.contains(dep) {
                        visit(graph, dep, ids, done, out);
                    }
                }
            }
            out.push(id.to_string());
        }

        let mut done = BTreeSet::new();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            visit(self, id, ids, &mut done, &mut out);
        }
        out
    }
}

fn find_parent(features: &BTreeMap<String, Feature>, id: &str) -> Option<String> {
    id.char_indices()
        .rev()
        .filter(|(_, c)| *c == '/')
        .map(|(i, _)| &id[..i])
        .find(|candidate| features.contains_key(*candidate))
        .map(str::to_string)
}
