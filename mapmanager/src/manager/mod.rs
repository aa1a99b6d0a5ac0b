//! The Map Manager.
//!
//! [`Manager`] owns every component and is driven from a single thread:
//!
//! ```text
//! Manager
//!   ├── Storage ─────────── probe, manifests, CatalogStore
//!   ├── AvailabilityResolver ── AvailabilityState (rebuilt on every scan)
//!   ├── DownloadOrchestrator ── one Transfer at a time
//!   ├── UpdateChecker
//!   ├── RetentionScanner ── invalidated when downloads or scans change what is needed
//!   └── EventBus ────────── ManagerEvent subscribers
//! ```
//!
//! Transfers run elsewhere and queue their events; the owner applies them by
//! calling [`Manager::process_events`] or [`Manager::wait_for_event`].
//!
//! # Example
//!
//! ```ignore
//! use mapmanager::{Manager, ManagerSettings};
//!
//! let mut manager = Manager::with_http(ManagerSettings::default())?;
//! manager.add_country("europe/estonia")?;
//! manager.get_countries()?;
//! while manager.wait_for_event() {}
//! ```

pub mod availability;
mod config;
pub mod download;
mod error;
mod events;
pub mod retention;
mod storage;
pub mod updates;

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, info, warn};

pub use availability::{
    ActiveDatasets, AvailabilityResolver, AvailabilityState, FileToDownload, ListKind,
    VersionPolicy,
};
pub use config::ManagerSettings;
pub use download::{DownloadKind, DownloadOutcome, HttpTransfer, Transfer, TransferEvent};
pub use error::{ManagerError, ManagerResult};
pub use events::{EventBus, ManagerEvent};
pub use retention::{RetentionScanner, RetentionSnapshot, SIZE_INDETERMINATE};
pub use storage::Storage;
pub use updates::{UpdateChecker, UpdateRecord};

use crate::catalog::CatalogEntry;
use crate::feature::{PROVIDED_FILE, SERVER_URL_FILE};
use download::DownloadOrchestrator;

/// What the current chain of downloads is meant to achieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncPlan {
    Idle,
    /// Server manifest, feature list, then every missing file.
    FullSync { include_updates: bool },
    /// Server manifest, feature list, then an update check.
    ProvidedRefresh,
}

/// Facade over the map data lifecycle.
pub struct Manager {
    settings: ManagerSettings,
    resolver: AvailabilityResolver,
    storage: Option<Storage>,
    state: AvailabilityState,
    datasets: ActiveDatasets,
    orchestrator: DownloadOrchestrator,
    retention: RetentionScanner,
    updates: Vec<UpdateRecord>,
    plan: SyncPlan,
    attempted: BTreeSet<String>,
    events: EventBus,
    storage_available: bool,
    downloading: bool,
    missing: bool,
    missing_info: String,
}

impl Manager {
    /// Create a manager using `transfer` for all downloads.
    ///
    /// Checks the storage root and runs the initial scan. An unavailable root
    /// is not an error; it is reported by [`storage_available`](Self::storage_available).
    pub fn new(settings: ManagerSettings, transfer: Box<dyn Transfer>) -> Self {
        let mut manager = Self {
            resolver: AvailabilityResolver::new(settings.version_policy()),
            settings,
            storage: None,
            state: AvailabilityState::default(),
            datasets: ActiveDatasets::default(),
            orchestrator: DownloadOrchestrator::new(transfer),
            retention: RetentionScanner::new(),
            updates: Vec::new(),
            plan: SyncPlan::Idle,
            attempted: BTreeSet::new(),
            events: EventBus::new(),
            storage_available: false,
            downloading: false,
            missing: false,
            missing_info: String::new(),
        };
        manager.check_storage_available();
        manager.scan();
        manager
    }

    /// Create a manager downloading over HTTP.
    pub fn with_http(settings: ManagerSettings) -> ManagerResult<Self> {
        let transfer = HttpTransfer::with_timeout(settings.timeout)?;
        Ok(Self::new(settings, Box::new(transfer)))
    }

    /// Register an observer for [`ManagerEvent`]s.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    // ---- queries ----

    pub fn storage_available(&self) -> bool {
        self.storage_available
    }

    /// A chain of downloads is in progress.
    pub fn downloading(&self) -> bool {
        self.downloading
    }

    /// Kind of the download currently in flight.
    pub fn download_kind(&self) -> DownloadKind {
        self.orchestrator.kind()
    }

    /// Some subscribed data is not available.
    pub fn missing(&self) -> bool {
        self.missing
    }

    pub fn missing_info(&self) -> &str {
        &self.missing_info
    }

    /// The server's feature list has been fetched and lists something.
    pub fn check_provided_available(&self) -> bool {
        !self.state.provided().is_empty()
    }

    pub fn state(&self) -> &AvailabilityState {
        &self.state
    }

    pub fn available_countries_json(&self) -> Value {
        self.state.countries_json(ListKind::Available, false)
    }

    pub fn requested_countries_json(&self) -> Value {
        self.state.countries_json(ListKind::Requested, false)
    }

    pub fn provided_countries_json(&self, tree: bool) -> Value {
        self.state.countries_json(ListKind::Provided, tree)
    }

    pub fn country_details_json(&self, id: &str) -> Option<Value> {
        self.state.country_details_json(id)
    }

    pub fn is_available(&self, id: &str) -> bool {
        self.state.is_available(id)
    }

    pub fn is_country_available(&self, id: &str) -> bool {
        self.state.is_country_available(id)
    }

    pub fn is_country_requested(&self, id: &str) -> bool {
        self.state.is_country_requested(id)
    }

    pub fn is_country_compatible(&self, id: &str) -> bool {
        self.state.is_country_compatible(id)
    }

    /// Records of the last update check.
    pub fn updates_found(&self) -> &[UpdateRecord] {
        &self.updates
    }

    pub fn updates_json(&self) -> Value {
        match serde_json::to_value(&self.updates) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "Failed to serialize update records");
                Value::Array(Vec::new())
            }
        }
    }

    /// Datasets the map service should currently serve.
    pub fn active_datasets(&self) -> &ActiveDatasets {
        &self.datasets
    }

    /// Absolute path of a file given relative to the storage root.
    pub fn full_path(&self, relative: &str) -> PathBuf {
        match &self.storage {
            Some(storage) => storage.full_path(relative),
            None => self.settings.root.join(relative),
        }
    }

    /// Catalog entry of an installed file.
    pub fn is_registered(&self, relative: &str) -> Option<CatalogEntry> {
        self.storage
            .as_ref()
            .and_then(|s| s.catalog().lookup(relative).cloned())
    }

    // ---- commands ----

    /// Probe the storage root and update the availability flag.
    ///
    /// Losing the storage cancels any download.
    pub fn check_storage_available(&mut self) -> bool {
        let available = match Storage::probe(&self.settings.root) {
            Ok(()) => {
                if self.storage.is_none() {
                    match Storage::open(self.settings.root.clone()) {
                        Ok(storage) => self.storage = Some(storage),
                        Err(e) => warn!(error = %e, "Failed to open storage"),
                    }
                }
                self.storage.is_some()
            }
            Err(e) => {
                warn!(error = %e, "Storage unavailable");
                false
            }
        };

        if !available {
            if self.orchestrator.cancel() {
                self.finish_chain();
            }
            self.storage = None;
        }
        if self.storage_available != available {
            self.set_storage_available(available);
            self.scan();
        }
        available
    }

    /// Subscribe to a provided feature.
    ///
    /// The feature and its sub-features are copied into the requested
    /// manifest, so they stay known when the server stops offering them.
    pub fn add_country(&mut self, id: &str) -> ManagerResult<()> {
        let storage = self.require_storage()?;
        let feature = self
            .state
            .graph()
            .get(id)
            .filter(|f| f.is_provided())
            .ok_or_else(|| ManagerError::UnknownFeature(id.to_string()))?;

        let mut requested = storage.load_requested().entries;
        if requested.contains_key(id) {
            debug!(id, "Already subscribed");
            return Ok(());
        }
        requested.insert(id.to_string(), feature.descriptor().clone());
        for sub in self.state.graph().sub_features(id) {
            requested.insert(sub.id().to_string(), sub.descriptor().clone());
        }
        storage.save_requested(&requested)?;

        info!(id, "Subscribed");
        self.events.emit(ManagerEvent::SubscriptionChanged);
        self.scan();
        Ok(())
    }

    /// Drop a subscription. Unknown ids are ignored.
    pub fn remove_country(&mut self, id: &str) -> ManagerResult<()> {
        let storage = self.require_storage()?;
        let mut requested = storage.load_requested().entries;
        let prefix = format!("{}/", id);
        let before = requested.len();
        requested.retain(|key, _| key != id && !key.starts_with(&prefix));
        if requested.len() == before {
            return Ok(());
        }
        storage.save_requested(&requested)?;

        info!(id, "Unsubscribed");
        self.events.emit(ManagerEvent::SubscriptionChanged);
        self.scan();
        Ok(())
    }

    /// Fetch the feature list and every missing file.
    pub fn get_countries(&mut self) -> ManagerResult<()> {
        self.start_sync(SyncPlan::FullSync {
            include_updates: false,
        })
    }

    /// Fetch the feature list and check for updates.
    pub fn update_provided(&mut self) -> ManagerResult<()> {
        self.start_sync(SyncPlan::ProvidedRefresh)
    }

    /// Fetch the feature list, every missing file and every updated file.
    pub fn get_updates(&mut self) -> ManagerResult<()> {
        self.start_sync(SyncPlan::FullSync {
            include_updates: true,
        })
    }

    /// Abort the download chain. Nothing of the interrupted file is kept.
    pub fn cancel_download(&mut self) -> bool {
        if !self.orchestrator.cancel() {
            return false;
        }
        self.finish_chain();
        self.scan();
        true
    }

    /// List files no feature refers to.
    pub fn list_non_needed(&mut self) -> RetentionSnapshot {
        let referenced = self.state.referenced_paths();
        let active = self.downloading || self.orchestrator.is_active();
        match &self.storage {
            Some(storage) => self
                .retention
                .list_non_needed(storage.root(), &referenced, active),
            None => self
                .retention
                .list_non_needed(&self.settings.root, &referenced, true),
        }
    }

    /// Size of the last listing, negative when indeterminate.
    pub fn non_needed_size(&self) -> i64 {
        self.retention.non_needed_size()
    }

    /// Delete files returned by the last [`list_non_needed`](Self::list_non_needed).
    ///
    /// Returns false and deletes nothing unless `files` is exactly that list,
    /// no download is running and none of the files is needed again.
    pub fn delete_non_needed(&mut self, files: &[String]) -> bool {
        if self.deletion_blocked() {
            return false;
        }
        let referenced = self.state.referenced_paths();
        let Some(storage) = self.storage.as_mut() else {
            return false;
        };
        let root = storage.root().to_path_buf();
        let deleted = self
            .retention
            .delete(&root, files, &referenced, storage.catalog_mut());
        if deleted {
            self.scan();
        }
        deleted
    }

    /// Like [`delete_non_needed`](Self::delete_non_needed), also requiring
    /// `snapshot` to be the latest listing.
    pub fn delete_snapshot(&mut self, snapshot: &RetentionSnapshot) -> bool {
        if self.deletion_blocked() {
            return false;
        }
        let referenced = self.state.referenced_paths();
        let Some(storage) = self.storage.as_mut() else {
            return false;
        };
        let root = storage.root().to_path_buf();
        let deleted =
            self.retention
                .delete_snapshot(&root, snapshot, &referenced, storage.catalog_mut());
        if deleted {
            self.scan();
        }
        deleted
    }

    /// Apply new settings and rebuild all state.
    pub fn reload_settings(&mut self, settings: ManagerSettings) {
        info!(root = %settings.root.display(), "Reloading settings");
        if self.orchestrator.cancel() {
            self.finish_chain();
        }
        self.resolver = AvailabilityResolver::new(settings.version_policy());
        self.settings = settings;
        self.storage = None;
        self.retention.invalidate();
        self.updates.clear();
        self.attempted.clear();

        self.check_storage_available();
        self.scan();
        self.events.emit(ManagerEvent::AvailabilityChanged);
    }

    /// Apply all queued transfer events. Returns how many were processed.
    pub fn process_events(&mut self) -> usize {
        let mut count = 0;
        while let Some(event) = self.orchestrator.try_next_event() {
            self.dispatch(event);
            count += 1;
        }
        count
    }

    /// Block for the next transfer event and apply it.
    ///
    /// Returns false when no download is in flight.
    pub fn wait_for_event(&mut self) -> bool {
        match self.orchestrator.blocking_next_event() {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => false,
        }
    }

    // ---- internals ----

    fn deletion_blocked(&mut self) -> bool {
        if self.downloading || self.orchestrator.is_active() {
            warn!("Refusing deletion while a download is running");
            self.retention.invalidate();
            return true;
        }
        false
    }

    fn require_storage(&self) -> ManagerResult<&Storage> {
        self.storage
            .as_ref()
            .ok_or_else(|| ManagerError::StorageUnavailable {
                path: self.settings.root.clone(),
            })
    }

    /// Rebuild the availability state from the manifests and the catalog.
    fn scan(&mut self) {
        let previous = self.state.available();
        let previous_referenced = self.state.referenced_paths();
        self.state = match &self.storage {
            Some(storage) => {
                let base_url = storage
                    .server_manifest()
                    .and_then(|m| m.base_url().ok());
                self.resolver.resolve(
                    &storage.load_provided(),
                    &storage.load_requested(),
                    storage.catalog(),
                    base_url,
                )
            }
            None => AvailabilityState::default(),
        };

        if self.state.available() != previous {
            self.events.emit(ManagerEvent::AvailabilityChanged);
        }
        if self.state.referenced_paths() != previous_referenced {
            self.retention.invalidate();
        }
        self.update_missing();
        self.update_datasets();
    }

    fn update_datasets(&mut self) {
        let datasets = match &self.storage {
            Some(storage) => self
                .state
                .active_datasets(self.settings.selected_map.as_deref(), |path| {
                    storage.full_path(path)
                }),
            None => ActiveDatasets::default(),
        };
        if datasets != self.datasets {
            info!(country = ?datasets.country, "Active datasets changed");
            self.datasets = datasets.clone();
            self.events.emit(ManagerEvent::DatasetsChanged(datasets));
        }
    }

    fn update_missing(&mut self) {
        let missing = self.storage.is_some() && self.state.missing();
        let info = if missing {
            self.state.missing_info()
        } else {
            String::new()
        };
        if missing != self.missing || info != self.missing_info {
            self.missing = missing;
            self.missing_info = info.clone();
            self.events.emit(ManagerEvent::MissingChanged { missing, info });
        }
    }

    fn start_sync(&mut self, plan: SyncPlan) -> ManagerResult<()> {
        let root = self.require_storage()?.root().to_path_buf();
        if self.downloading || self.orchestrator.is_active() {
            return Err(ManagerError::DownloadBusy {
                active: self.orchestrator.kind(),
            });
        }
        let url = self
            .settings
            .server_url
            .clone()
            .ok_or(ManagerError::NoServerUrl)?;

        self.attempted.clear();
        self.plan = plan;
        info!(?plan, "Sync started");
        let dest = root.join(SERVER_URL_FILE);
        if let Err(e) = self.start_download(DownloadKind::ServerUrl, &url, dest, None) {
            self.plan = SyncPlan::Idle;
            return Err(e);
        }
        Ok(())
    }

    fn start_download(
        &mut self,
        kind: DownloadKind,
        url: &str,
        dest: PathBuf,
        target: Option<FileToDownload>,
    ) -> ManagerResult<()> {
        self.orchestrator.start(kind, url, dest, target)?;
        self.retention.invalidate();
        self.set_downloading(true);
        Ok(())
    }

    fn dispatch(&mut self, event: TransferEvent) {
        let outcome = match self.storage.as_mut() {
            Some(storage) => self.orchestrator.handle(event, storage),
            None => None,
        };

        match outcome {
            None => {}
            Some(DownloadOutcome::Progress(text)) => {
                self.events.emit(ManagerEvent::DownloadProgress(text));
            }
            Some(DownloadOutcome::Finished { kind, target }) => self.advance(kind, target),
            Some(DownloadOutcome::Failed { kind, url, error }) => {
                warn!(%kind, url = %url, %error, "Sync aborted");
                self.finish_chain();
                self.events.emit(ManagerEvent::ErrorMessage(error.to_string()));
                self.scan();
            }
        }
    }

    /// Continue the chain after a finalized download.
    fn advance(&mut self, kind: DownloadKind, target: Option<FileToDownload>) {
        match kind {
            DownloadKind::ServerUrl => self.fetch_feature_list(),
            DownloadKind::CountriesList => {
                self.scan();
                self.download_next_file();
            }
            DownloadKind::ProvidedList => {
                self.scan();
                self.finish_chain();
                self.check_updates();
            }
            DownloadKind::FeatureData => {
                if let Some(file) = target {
                    info!(id = %file.feature_id, version = %file.version, "Feature installed");
                }
                self.retention.invalidate();
                self.scan();
                self.download_next_file();
            }
            DownloadKind::None => {}
        }
    }

    fn fetch_feature_list(&mut self) {
        let next = match self.plan {
            SyncPlan::ProvidedRefresh => DownloadKind::ProvidedList,
            _ => DownloadKind::CountriesList,
        };
        let Some(storage) = &self.storage else {
            self.finish_chain();
            return;
        };
        let dest = storage.root().join(PROVIDED_FILE);
        let Some(manifest) = storage.server_manifest() else {
            self.abort_chain(ManagerError::Parse {
                source_name: SERVER_URL_FILE.to_string(),
                reason: "server manifest missing after download".to_string(),
            });
            return;
        };

        if let Err(e) = self.start_download(next, &manifest.provided_list_url, dest, None) {
            self.abort_chain(e);
        }
    }

    /// Start the next pending feature download, or end the chain.
    fn download_next_file(&mut self) {
        let include_updates = matches!(
            self.plan,
            SyncPlan::FullSync {
                include_updates: true
            }
        );

        let mut candidates = self.state.missing_files();
        if include_updates {
            candidates.extend(self.update_files());
        }
        let next = candidates
            .into_iter()
            .find(|f| !self.attempted.contains(&f.feature_id));

        let Some(file) = next else {
            self.finish_chain();
            info!("Sync finished");
            if include_updates {
                self.check_updates();
            }
            return;
        };

        self.attempted.insert(file.feature_id.clone());
        let dest = self.full_path(&file.path);
        let url = file.url.clone();
        if let Err(e) = self.start_download(DownloadKind::FeatureData, &url, dest, Some(file)) {
            self.abort_chain(e);
        }
    }

    /// Files of the last update records that are still outdated.
    fn update_files(&self) -> Vec<FileToDownload> {
        self.updates
            .iter()
            .filter_map(|record| self.state.download_file(&record.id))
            .filter(|file| match self.is_registered(&file.path) {
                Some(entry) => entry.version != file.version || entry.datetime != file.datetime,
                None => true,
            })
            .collect()
    }

    fn check_updates(&mut self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let records = UpdateChecker::new(&self.state, storage.catalog()).check();
        self.updates = records.clone();
        self.events.emit(ManagerEvent::UpdatesFound(records));
    }

    fn abort_chain(&mut self, error: ManagerError) {
        warn!(%error, "Sync aborted");
        self.finish_chain();
        self.events.emit(ManagerEvent::ErrorMessage(error.to_string()));
    }

    fn finish_chain(&mut self) {
        self.plan = SyncPlan::Idle;
        self.attempted.clear();
        self.set_downloading(false);
    }

    fn set_downloading(&mut self, downloading: bool) {
        if self.downloading != downloading {
            self.downloading = downloading;
            self.events.emit(ManagerEvent::DownloadingChanged(downloading));
        }
    }

    fn set_storage_available(&mut self, available: bool) {
        if self.storage_available != available {
            self.storage_available = available;
            self.events
                .emit(ManagerEvent::StorageAvailableChanged(available));
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        if self.orchestrator.cancel() {
            debug!("Cancelled download on shutdown");
        }
    }
}
