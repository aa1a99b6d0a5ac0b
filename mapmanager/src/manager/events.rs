//! Change notifications published by the Map Manager.
//!
//! Observers call [`Manager::subscribe`](super::Manager::subscribe) and read
//! [`ManagerEvent`]s from the returned receiver instead of polling state.

use tokio::sync::broadcast;
use tracing::trace;

use super::availability::ActiveDatasets;
use super::updates::UpdateRecord;

/// Number of events buffered per subscriber before the oldest are dropped.
const EVENT_CAPACITY: usize = 256;

/// A state change observers may react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// The storage root became available or unavailable.
    StorageAvailableChanged(bool),
    /// A download session started or the last one finished.
    DownloadingChanged(bool),
    /// Human readable progress of the active download.
    DownloadProgress(String),
    /// Subscribed data became missing or complete.
    MissingChanged { missing: bool, info: String },
    /// The set of subscribed features changed.
    SubscriptionChanged,
    /// The set of available features changed.
    AvailabilityChanged,
    /// The datasets the map service should serve changed.
    DatasetsChanged(ActiveDatasets),
    /// Result of an update check (possibly empty).
    UpdatesFound(Vec<UpdateRecord>),
    /// Something failed that the user should hear about.
    ErrorMessage(String),
}

/// Fan-out of manager events to any number of subscribers.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<ManagerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Events without subscribers are dropped.
    pub fn emit(&self, event: ManagerEvent) {
        trace!(?event, "Manager event");
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_all_subscribers() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(ManagerEvent::SubscriptionChanged);

        assert_eq!(first.try_recv().unwrap(), ManagerEvent::SubscriptionChanged);
        assert_eq!(second.try_recv().unwrap(), ManagerEvent::SubscriptionChanged);
    }

    #[test]
    fn test_emit_without_subscribers_is_harmless() {
        let bus = EventBus::new();
        bus.emit(ManagerEvent::DownloadingChanged(true));

        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }
}
