//! End-to-end scenarios for the Manager, driven through a fake transfer layer.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use mapmanager::catalog::CatalogStore;
use mapmanager::manager::download::{TransferHandle, TransferRequest, TransferSink};
use mapmanager::manager::{ActiveDatasets, DownloadKind, Transfer};
use mapmanager::{Manager, ManagerError, ManagerEvent, ManagerResult, ManagerSettings};
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

const SERVER_URL: &str = "https://example.com/url.json";
const LIST_URL: &str = "https://example.com/maps/countries_provided.json";

type Started = Arc<Mutex<Vec<(TransferRequest, TransferSink, CancellationToken)>>>;

/// Records started transfers; the test decides how each one ends.
#[derive(Default)]
struct FakeTransfer {
    started: Started,
}

impl Transfer for FakeTransfer {
    fn start(
        &mut self,
        request: TransferRequest,
        sink: TransferSink,
    ) -> ManagerResult<TransferHandle> {
        let token = CancellationToken::new();
        self.started
            .lock()
            .unwrap()
            .push((request, sink, token.clone()));
        Ok(TransferHandle::new(token))
    }
}

fn provided_list(xx_version: &str) -> String {
    format!(
        r#"{{
            "XX": {{"type": "territory", "prettyName": "Europe / Xland", "version": "{xx_version}",
                    "datetime": "2024-01-01T00:00:00Z", "size": 1000}},
            "XX/postal": {{"type": "postal/country", "prettyName": "Postal", "version": "v1",
                    "datetime": "2024-01-01T00:00:00Z", "dependencies": ["postal/global"], "size": 100}},
            "postal/global": {{"type": "postal/global", "prettyName": "Global postal", "version": "v1",
                    "datetime": "2024-01-01T00:00:00Z", "size": 10}},
            "YY": {{"type": "territory", "prettyName": "Europe / Yland", "version": "v1",
                    "datetime": "2024-01-01T00:00:00Z"}}
        }}"#
    )
}

/// Fake server content for a URL.
fn serve(url: &str, xx_version: &str) -> Result<String, String> {
    match url {
        SERVER_URL => Ok(format!(r#"{{"providedListUrl": "{}"}}"#, LIST_URL)),
        LIST_URL => Ok(provided_list(xx_version)),
        _ if url.starts_with("https://example.com/maps/") => Ok(format!("data of {}", url)),
        _ => Err(format!("404 for {}", url)),
    }
}

struct Harness {
    _temp: TempDir,
    root: std::path::PathBuf,
    started: Started,
    manager: Manager,
    events: broadcast::Receiver<ManagerEvent>,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("Maps");
        let settings = ManagerSettings::new(root.clone()).with_server_url(SERVER_URL);
        Self::with_settings(temp, root, settings)
    }

    fn with_settings(temp: TempDir, root: std::path::PathBuf, settings: ManagerSettings) -> Self {
        let transfer = FakeTransfer::default();
        let started = transfer.started.clone();
        let manager = Manager::new(settings, Box::new(transfer));
        let events = manager.subscribe();
        Self {
            _temp: temp,
            root,
            started,
            manager,
            events,
        }
    }

    fn started_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    fn latest(&self) -> (TransferRequest, TransferSink, CancellationToken) {
        self.started.lock().unwrap().last().cloned().unwrap()
    }

    /// Answer transfers until the download chain ends. Returns the served URLs.
    fn drive(&mut self, respond: impl Fn(&str) -> Result<String, String>) -> Vec<String> {
        let mut served = Vec::new();
        while self.manager.downloading() {
            assert!(served.len() < 20, "download chain does not terminate");
            let (request, sink, _) = self.latest();
            served.push(request.url.clone());
            match respond(&request.url) {
                Ok(body) => {
                    fs::write(&request.staging, &body).unwrap();
                    sink.downloaded(body.len() as u64);
                    sink.written(body.len() as u64);
                    sink.finished();
                }
                Err(reason) => sink.failed(reason),
            }
            self.manager.process_events();
        }
        served
    }

    fn events(&mut self) -> Vec<ManagerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Fetch the server's feature list without any subscription.
    fn fetch_list(&mut self) {
        self.manager.get_countries().unwrap();
        let served = self.drive(|url| serve(url, "v1"));
        assert_eq!(served, vec![SERVER_URL, LIST_URL]);
    }

    fn subscribe_and_sync(&mut self) {
        self.fetch_list();
        self.manager.add_country("XX").unwrap();
        self.manager.get_countries().unwrap();
        self.drive(|url| serve(url, "v1"));
        assert!(!self.manager.missing());
    }
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn test_subscribe_then_sync_installs_country() {
    let mut h = Harness::new();
    assert!(h.manager.storage_available());
    h.fetch_list();
    assert!(h.manager.check_provided_available());
    assert!(!h.manager.missing());
    h.events();

    h.manager.add_country("XX").unwrap();
    assert!(h.manager.missing());
    assert!(h.manager.is_country_requested("XX"));
    assert!(h.manager.missing_info().contains("Europe / Xland"));
    let events = h.events();
    assert!(events.contains(&ManagerEvent::SubscriptionChanged));
    assert!(events
        .iter()
        .any(|e| matches!(e, ManagerEvent::MissingChanged { missing: true, .. })));

    let before = h.started_count();
    h.manager.get_countries().unwrap();
    assert!(h.manager.downloading());
    assert_eq!(h.manager.download_kind(), DownloadKind::ServerUrl);
    assert_eq!(h.started_count(), before + 1);

    let served = h.drive(|url| serve(url, "v1"));
    assert_eq!(
        served,
        vec![
            SERVER_URL.to_string(),
            LIST_URL.to_string(),
            "https://example.com/maps/XX.dat".to_string(),
            "https://example.com/maps/postal/global.dat".to_string(),
            "https://example.com/maps/XX/postal.dat".to_string(),
        ]
    );

    let entry = h.manager.is_registered("XX.dat").unwrap();
    assert_eq!(entry.version, "v1");
    assert!(h.manager.is_available("XX"));
    assert!(h.manager.is_country_available("XX"));
    assert!(!h.manager.missing());
    assert!(h.manager.missing_info().is_empty());
    assert_eq!(
        fs::read_to_string(h.manager.full_path("XX/postal.dat")).unwrap(),
        "data of https://example.com/maps/XX/postal.dat"
    );

    let events = h.events();
    assert!(events.contains(&ManagerEvent::DownloadingChanged(true)));
    assert!(events.contains(&ManagerEvent::DownloadingChanged(false)));
    assert!(events.contains(&ManagerEvent::AvailabilityChanged));
    assert!(events
        .iter()
        .any(|e| matches!(e, ManagerEvent::DownloadProgress(_))));
    assert!(events.iter().any(|e| matches!(
        e,
        ManagerEvent::MissingChanged { missing: false, .. }
    )));
}

#[test]
fn test_second_sync_while_busy_is_refused() {
    let mut h = Harness::new();
    h.manager.get_countries().unwrap();
    let before = h.started_count();

    let err = h.manager.update_provided().unwrap_err();
    assert!(matches!(err, ManagerError::DownloadBusy { .. }));
    assert!(h.manager.get_countries().is_err());
    assert_eq!(h.started_count(), before);
    assert_eq!(h.manager.download_kind(), DownloadKind::ServerUrl);

    h.drive(|url| serve(url, "v1"));
    assert!(!h.manager.downloading());
}

#[test]
fn test_provided_refresh_reports_single_update() {
    let mut h = Harness::new();
    h.subscribe_and_sync();
    h.events();
    // no check yet: an empty array, never null
    assert_eq!(h.manager.updates_json().as_array().map(Vec::len), Some(0));

    h.manager.update_provided().unwrap();
    let served = h.drive(|url| serve(url, "v2"));
    assert_eq!(served, vec![SERVER_URL, LIST_URL]);

    let updates = h.manager.updates_found();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].id, "XX");
    assert_eq!(updates[0].old_version, "v1");
    assert_eq!(updates[0].new_version, "v2");
    assert_eq!(h.manager.updates_json()[0]["newVersion"], "v2");
    // the check itself does not install anything
    assert_eq!(h.manager.is_registered("XX.dat").unwrap().version, "v1");

    let events = h.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, ManagerEvent::UpdatesFound(records) if records.len() == 1)));

    h.manager.get_updates().unwrap();
    let served = h.drive(|url| serve(url, "v2"));
    assert_eq!(
        served,
        vec![SERVER_URL, LIST_URL, "https://example.com/maps/XX.dat"]
    );
    assert_eq!(h.manager.is_registered("XX.dat").unwrap().version, "v2");
    assert!(h.manager.updates_found().is_empty());
}

#[test]
fn test_dependency_loss_flips_only_dependents() {
    let mut h = Harness::new();
    h.subscribe_and_sync();

    let mut catalog = CatalogStore::open(&h.root);
    assert!(catalog.unregister("postal/global.dat").unwrap());
    let settings = h.manager.settings().clone();
    h.manager.reload_settings(settings);

    assert!(h.manager.is_available("XX"));
    assert!(!h.manager.is_available("postal/global"));
    assert!(!h.manager.is_available("XX/postal"));
    assert!(!h.manager.is_country_available("XX"));
    assert!(h.manager.missing());
}

#[test]
fn test_retention_protocol() {
    let mut h = Harness::new();
    h.subscribe_and_sync();
    write(&h.root, "old/ZZ.dat", "12345");

    let snapshot = h.manager.list_non_needed();
    assert_eq!(snapshot.files, vec!["old/ZZ.dat"]);
    assert_eq!(snapshot.total_size, 5);
    assert_eq!(h.manager.non_needed_size(), 5);

    // listing during a download is indeterminate and blocks deletion
    h.manager.update_provided().unwrap();
    let during = h.manager.list_non_needed();
    assert!(during.files.is_empty());
    assert_eq!(during.total_size, -1);
    assert!(!h.manager.delete_non_needed(&["old/ZZ.dat".to_string()]));
    h.drive(|url| serve(url, "v1"));

    h.manager.list_non_needed();
    assert!(!h.manager.delete_non_needed(&["XX.dat".to_string()]));
    assert!(h.root.join("XX.dat").exists());
    assert!(h.root.join("old/ZZ.dat").exists());

    assert!(h.manager.delete_non_needed(&["old/ZZ.dat".to_string()]));
    assert!(!h.root.join("old").exists());
    assert!(h.manager.is_country_available("XX"));
}

#[test]
fn test_retention_lists_unsubscribed_country() {
    let mut h = Harness::new();
    h.subscribe_and_sync();

    h.manager.remove_country("XX").unwrap();
    h.manager.remove_country("XX").unwrap();
    assert!(!h.manager.is_country_requested("XX"));

    // still installed and available, so nothing to reclaim
    let snapshot = h.manager.list_non_needed();
    assert!(snapshot.files.is_empty());
    assert_eq!(snapshot.total_size, 0);
}

#[test]
fn test_network_failure_clears_session() {
    let mut h = Harness::new();
    h.fetch_list();
    h.manager.add_country("XX").unwrap();
    h.events();

    h.manager.get_countries().unwrap();
    let served = h.drive(|url| {
        if url.ends_with("/XX.dat") {
            Err("connection reset".to_string())
        } else {
            serve(url, "v1")
        }
    });
    assert_eq!(served.last().unwrap(), "https://example.com/maps/XX.dat");

    assert!(!h.manager.downloading());
    assert_eq!(h.manager.download_kind(), DownloadKind::None);
    assert!(h.manager.is_registered("XX.dat").is_none());
    assert!(!h.root.join("XX.dat.part").exists());
    assert!(h.manager.missing());

    let events = h.events();
    assert!(events.iter().any(
        |e| matches!(e, ManagerEvent::ErrorMessage(text) if text.contains("connection reset"))
    ));
}

#[test]
fn test_invalid_feature_list_keeps_previous() {
    let mut h = Harness::new();
    h.fetch_list();

    h.manager.update_provided().unwrap();
    h.drive(|url| {
        if url == LIST_URL {
            Ok("<html>maintenance</html>".to_string())
        } else {
            serve(url, "v1")
        }
    });

    assert!(h.manager.check_provided_available());
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, ManagerEvent::ErrorMessage(_))));
}

#[test]
fn test_cancel_registers_nothing() {
    let mut h = Harness::new();
    h.fetch_list();
    h.manager.add_country("XX").unwrap();
    h.manager.get_countries().unwrap();

    // answer the manifests, then stop at the first feature file
    for _ in 0..2 {
        let (request, sink, _) = h.latest();
        fs::write(&request.staging, serve(&request.url, "v1").unwrap()).unwrap();
        sink.finished();
        h.manager.process_events();
    }
    assert_eq!(h.manager.download_kind(), DownloadKind::FeatureData);

    let (request, sink, token) = h.latest();
    fs::write(&request.staging, "partial").unwrap();
    sink.downloaded(7);
    h.manager.process_events();

    assert!(h.manager.cancel_download());
    assert!(token.is_cancelled());
    assert!(!h.manager.downloading());
    assert!(!request.staging.exists());

    // a late completion of the cancelled transfer is ignored
    sink.finished();
    h.manager.process_events();
    assert!(h.manager.is_registered("XX.dat").is_none());
    assert!(h.manager.missing());
    assert!(!h.manager.cancel_download());
}

#[test]
fn test_unavailable_storage_gates_commands() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("unmounted").join("Maps");
    let settings = ManagerSettings::new(root.clone()).with_server_url(SERVER_URL);
    let mut h = Harness::with_settings(temp, root, settings);

    assert!(!h.manager.storage_available());
    assert!(matches!(
        h.manager.add_country("XX"),
        Err(ManagerError::StorageUnavailable { .. })
    ));
    assert!(h.manager.get_countries().is_err());
    assert_eq!(h.manager.list_non_needed().total_size, -1);
    assert!(!h.manager.missing());
    assert_eq!(h.started_count(), 0);

    // mounting the volume makes it usable
    fs::create_dir_all(h.root.parent().unwrap()).unwrap();
    assert!(h.manager.check_storage_available());
    assert!(h
        .events()
        .contains(&ManagerEvent::StorageAvailableChanged(true)));
}

#[test]
fn test_missing_server_url() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("Maps");
    let settings = ManagerSettings::new(root.clone());
    let mut h = Harness::with_settings(temp, root, settings);

    assert!(matches!(
        h.manager.get_countries(),
        Err(ManagerError::NoServerUrl)
    ));
    assert!(!h.manager.downloading());
}

#[test]
fn test_unknown_country_rejected() {
    let mut h = Harness::new();
    h.fetch_list();

    assert!(matches!(
        h.manager.add_country("ZZ"),
        Err(ManagerError::UnknownFeature(id)) if id == "ZZ"
    ));
    h.manager.remove_country("ZZ").unwrap();
}

#[test]
fn test_country_listings() {
    let mut h = Harness::new();
    h.subscribe_and_sync();

    let provided = h.manager.provided_countries_json(false);
    let names: Vec<&str> = provided
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["Europe / Xland", "Europe / Yland"]);

    let available = h.manager.available_countries_json();
    assert_eq!(available.as_array().unwrap().len(), 1);
    assert_eq!(available[0]["id"], "XX");
    assert_eq!(available[0]["size"], 1100);

    let tree = h.manager.provided_countries_json(true);
    assert_eq!(tree[0]["name"], "Europe");

    let details = h.manager.country_details_json("XX").unwrap();
    assert_eq!(details["features"].as_array().unwrap().len(), 2);
    assert!(h.manager.is_country_compatible("XX"));
}

#[test]
fn test_incompatible_version_after_reload() {
    let mut h = Harness::new();
    h.subscribe_and_sync();

    let settings = h
        .manager
        .settings()
        .clone()
        .with_expected_version("territory", "v9");
    h.manager.reload_settings(settings);

    assert!(!h.manager.is_available("XX"));
    assert!(!h.manager.is_country_compatible("XX"));
    assert!(h.manager.missing());
    assert!(h.manager.missing_info().contains("Incompatible versions"));
    // surfaced, not removed
    assert!(h.manager.is_registered("XX.dat").is_some());
    assert!(h.root.join("XX.dat").exists());
}

/// Answer the server manifest and the feature list, stopping at the first
/// feature file.
fn answer_manifests(h: &mut Harness) {
    for _ in 0..2 {
        let (request, sink, _) = h.latest();
        fs::write(&request.staging, serve(&request.url, "v1").unwrap()).unwrap();
        sink.finished();
        h.manager.process_events();
    }
    assert_eq!(h.manager.download_kind(), DownloadKind::FeatureData);
}

#[test]
fn test_listing_made_before_install_cannot_delete_it() {
    let mut h = Harness::new();
    h.fetch_list();
    write(&h.root, "XX.dat", "orphan");
    let snapshot = h.manager.list_non_needed();
    assert_eq!(snapshot.files, vec!["XX.dat"]);

    h.manager.add_country("XX").unwrap();
    h.manager.get_countries().unwrap();
    h.drive(|url| serve(url, "v1"));
    assert!(h.manager.is_registered("XX.dat").is_some());

    assert!(!h.manager.delete_non_needed(&["XX.dat".to_string()]));
    assert!(!h.manager.delete_snapshot(&snapshot));
    assert!(h.root.join("XX.dat").exists());
    assert!(h.manager.is_registered("XX.dat").is_some());
    assert!(h.manager.is_country_available("XX"));
}

#[test]
fn test_listing_cannot_delete_once_download_started() {
    let mut h = Harness::new();
    h.subscribe_and_sync();
    write(&h.root, "old/ZZ.dat", "12345");
    let snapshot = h.manager.list_non_needed();
    assert_eq!(snapshot.files, vec!["old/ZZ.dat"]);

    h.manager.get_countries().unwrap();
    assert!(h.manager.downloading());
    assert!(!h.manager.delete_non_needed(&snapshot.files));
    assert!(!h.manager.delete_snapshot(&snapshot));
    h.drive(|url| serve(url, "v1"));

    // the listing stays void after the chain ends
    assert!(!h.manager.delete_non_needed(&snapshot.files));
    assert!(h.root.join("old/ZZ.dat").exists());

    let fresh = h.manager.list_non_needed();
    assert_eq!(fresh.files, snapshot.files);
    assert!(h.manager.delete_snapshot(&fresh));
    assert!(!h.root.join("old/ZZ.dat").exists());
}

#[test]
fn test_active_datasets_announced_on_change() {
    let mut h = Harness::new();
    h.fetch_list();
    assert_eq!(h.manager.active_datasets(), &ActiveDatasets::default());
    h.events();

    h.manager.add_country("XX").unwrap();
    h.manager.get_countries().unwrap();
    h.drive(|url| serve(url, "v1"));

    let announced: Vec<ActiveDatasets> = h
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ManagerEvent::DatasetsChanged(datasets) => Some(datasets),
            _ => None,
        })
        .collect();
    // base map, then postal global, then the country's postal data
    assert_eq!(announced.len(), 3);
    assert_eq!(announced[0].base_map, Some(h.root.join("XX.dat")));
    assert_eq!(announced[0].postal_global, None);

    let last = &announced[2];
    assert_eq!(last, h.manager.active_datasets());
    assert_eq!(last.country.as_deref(), Some("XX"));
    assert_eq!(last.postal_global, Some(h.root.join("postal").join("global.dat")));
    assert_eq!(last.postal_country, Some(h.root.join("XX").join("postal.dat")));
    assert_eq!(last.geocoder, None);

    // still installed, so nothing changes for the map service
    h.manager.remove_country("XX").unwrap();
    assert!(!h
        .events()
        .iter()
        .any(|e| matches!(e, ManagerEvent::DatasetsChanged(_))));
}

#[test]
fn test_drop_mid_download_cancels_transfer() {
    let mut h = Harness::new();
    h.fetch_list();
    h.manager.add_country("XX").unwrap();
    h.manager.get_countries().unwrap();
    answer_manifests(&mut h);

    let (request, sink, token) = h.latest();
    fs::write(&request.staging, "partial").unwrap();
    sink.downloaded(7);

    let Harness {
        _temp, root, manager, ..
    } = h;
    drop(manager);

    assert!(token.is_cancelled());
    assert!(!request.staging.exists());
    // a late completion has nobody left to finalize it
    sink.finished();
    let catalog = CatalogStore::open(&root);
    assert!(catalog.lookup("XX.dat").is_none());
    assert!(!root.join("XX.dat").exists());
}
