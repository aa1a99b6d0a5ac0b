//! Detection of newer data on the server.

use std::cmp::Ordering;

use chrono::DateTime;
use serde::Serialize;
use tracing::info;

use super::availability::AvailabilityState;
use crate::catalog::CatalogStore;

/// A feature whose provided data differs from the installed copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRecord {
    pub id: String,
    pub old_version: String,
    pub new_version: String,
    pub old_datetime: String,
    pub new_datetime: String,
}

/// Compares the provided versions of requested, available features against
/// the catalog. Never modifies either.
pub struct UpdateChecker<'a> {
    state: &'a AvailabilityState,
    catalog: &'a CatalogStore,
}

impl<'a> UpdateChecker<'a> {
    pub fn new(state: &'a AvailabilityState, catalog: &'a CatalogStore) -> Self {
        Self { state, catalog }
    }

    /// Update records ordered by feature id.
    pub fn check(&self) -> Vec<UpdateRecord> {
        let records: Vec<UpdateRecord> = self
            .state
            .graph()
            .iter()
            .filter(|f| f.is_requested() && f.is_available() && f.is_provided())
            .filter_map(|feature| {
                let installed = self.catalog.lookup(&feature.path())?;
                let changed = installed.version != feature.version()
                    || is_newer(feature.datetime(), &installed.datetime);
                changed.then(|| UpdateRecord {
                    id: feature.id().to_string(),
                    old_version: installed.version.clone(),
                    new_version: feature.version().to_string(),
                    old_datetime: installed.datetime.clone(),
                    new_datetime: feature.datetime().to_string(),
                })
            })
            .collect();

        info!(updates = records.len(), "Update check finished");
        records
    }
}

/// True if `candidate` is later than `current`.
///
/// RFC 3339 timestamps are compared as instants; anything else falls back to
/// string order.
pub fn is_newer(candidate: &str, current: &str) -> bool {
    let ordering = match (
        DateTime::parse_from_rfc3339(candidate),
        DateTime::parse_from_rfc3339(current),
    ) {
        (Ok(candidate), Ok(current)) => candidate.cmp(&current),
        _ => candidate.cmp(current),
    };
    ordering == Ordering::Greater
}
