//! Feature manifests and the feature dependency graph.
//!
//! - [`descriptor`] - typed manifest records with validation
//! - [`manifest`] - reading and writing the manifest files
//! - [`graph`] - [`FeatureGraph`] built from the manifests

pub mod descriptor;
pub mod graph;
pub mod manifest;

pub use descriptor::{
    DescriptorError, FeatureDescriptor, ParseIssue, ParsedManifest, ServerManifest,
};
pub use graph::{
    Feature, FeatureGraph, FEATURE_TYPE_GEOCODER, FEATURE_TYPE_POSTAL_COUNTRY,
    FEATURE_TYPE_POSTAL_GLOBAL, FEATURE_TYPE_TERRITORY, PRETTY_SEPARATOR,
};
pub use manifest::{PROVIDED_FILE, REQUESTED_FILE, SERVER_URL_FILE};
