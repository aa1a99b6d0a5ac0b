//! Single-flight download state machine.
//!
//! The orchestrator owns at most one [`DownloadSession`]. Transfer events
//! arrive over a channel and are applied on the caller's thread through
//! [`DownloadOrchestrator::handle`], which finalizes completed downloads via a
//! [`Finalizer`] and always returns the machine to [`DownloadKind::None`].

use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, trace, warn};

use super::progress::{progress_text, ProgressTracker};
use super::state::{DownloadKind, DownloadSession};
use super::transfer::{
    Transfer, TransferEvent, TransferEventKind, TransferHandle, TransferId, TransferRequest,
    TransferSink,
};
use crate::fsutil::staging_path;
use crate::manager::availability::FileToDownload;
use crate::manager::error::{ManagerError, ManagerResult};

/// Turns a completed staging file into installed state.
///
/// Each method receives the complete staging file and the final destination.
/// An error leaves the previous destination content untouched.
pub trait Finalizer {
    fn server_url(&mut self, staging: &Path, dest: &Path) -> ManagerResult<()>;

    fn countries_list(&mut self, staging: &Path, dest: &Path) -> ManagerResult<()>;

    fn provided_list(&mut self, staging: &Path, dest: &Path) -> ManagerResult<()>;

    fn feature_data(
        &mut self,
        file: &FileToDownload,
        staging: &Path,
        dest: &Path,
    ) -> ManagerResult<()>;
}

/// Result of applying a transfer event.
#[derive(Debug)]
pub enum DownloadOutcome {
    /// Progress worth showing.
    Progress(String),
    /// The download was finalized; the session is closed.
    Finished {
        kind: DownloadKind,
        target: Option<FileToDownload>,
    },
    /// The download or its finalization failed; the session is closed.
    Failed {
        kind: DownloadKind,
        url: String,
        error: ManagerError,
    },
}

struct ActiveSession {
    session: DownloadSession,
    handle: TransferHandle,
    progress: ProgressTracker,
}

/// Runs one download at a time.
pub struct DownloadOrchestrator {
    transfer: Box<dyn Transfer>,
    sender: UnboundedSender<TransferEvent>,
    receiver: UnboundedReceiver<TransferEvent>,
    active: Option<ActiveSession>,
    next_id: TransferId,
    last_error: Option<String>,
}

impl DownloadOrchestrator {
    pub fn new(transfer: Box<dyn Transfer>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            transfer,
            sender,
            receiver,
            active: None,
            next_id: 1,
            last_error: None,
        }
    }

    /// Start downloading `url` to `dest`.
    ///
    /// Fails with [`ManagerError::DownloadBusy`] while another session is
    /// active; the active session is not affected.
    pub fn start(
        &mut self,
        kind: DownloadKind,
        url: &str,
        dest: PathBuf,
        target: Option<FileToDownload>,
    ) -> ManagerResult<TransferId> {
        if let Some(active) = &self.active {
            return Err(ManagerError::DownloadBusy {
                active: active.session.kind,
            });
        }

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(|e| ManagerError::io(parent, e))?;
        }
        let staging = staging_path(&dest);
        if staging.exists() {
            debug!(path = %staging.display(), "Removing stale staging file");
            fs::remove_file(&staging).map_err(|e| ManagerError::io(&staging, e))?;
        }

        let id = self.next_id;
        self.next_id += 1;

        let request = TransferRequest {
            id,
            url: url.to_string(),
            staging: staging.clone(),
        };
        let handle = self
            .transfer
            .start(request, TransferSink::new(id, self.sender.clone()))?;

        info!(%kind, url, dest = %dest.display(), id, "Download started");
        self.last_error = None;
        self.active = Some(ActiveSession {
            session: DownloadSession {
                kind,
                url: url.to_string(),
                path: dest,
                staging,
                target,
                bytes_downloaded: 0,
                bytes_written: 0,
                transfer: id,
            },
            handle,
            progress: ProgressTracker::new(),
        });
        Ok(id)
    }

    /// Next pending event, if any.
    pub fn try_next_event(&mut self) -> Option<TransferEvent> {
        self.receiver.try_recv().ok()
    }

    /// Block until the active transfer reports something.
    ///
    /// Returns `None` immediately when no session is active. Must not be
    /// called from within an async runtime.
    pub fn blocking_next_event(&mut self) -> Option<TransferEvent> {
        self.active.as_ref()?;
        self.receiver.blocking_recv()
    }

    /// Apply a transfer event to the session.
    ///
    /// Events of transfers other than the active one are ignored.
    pub fn handle(
        &mut self,
        event: TransferEvent,
        finalizer: &mut dyn Finalizer,
    ) -> Option<DownloadOutcome> {
        let Some(active) = self.active.as_mut() else {
            trace!(id = event.transfer, "Ignoring event without active session");
            return None;
        };
        if active.session.transfer != event.transfer {
            trace!(id = event.transfer, "Ignoring event of stale transfer");
            return None;
        }

        match event.kind {
            TransferEventKind::Downloaded(bytes) => {
                active.session.bytes_downloaded = bytes;
                if active.progress.observe(bytes) {
                    let expected = active.session.target.as_ref().and_then(|t| t.size);
                    Some(DownloadOutcome::Progress(progress_text(
                        &active.session.label(),
                        bytes,
                        expected,
                    )))
                } else {
                    None
                }
            }
            TransferEventKind::Written(bytes) => {
                active.session.bytes_written = bytes;
                None
            }
            TransferEventKind::Finished => {
                let active = self.active.take()?;
                Some(self.finalize(active.session, finalizer))
            }
            TransferEventKind::Failed(reason) => {
                let active = self.active.take()?;
                let error = ManagerError::Network {
                    url: active.session.url.clone(),
                    reason,
                };
                Some(self.fail(active.session, error))
            }
        }
    }

    fn finalize(
        &mut self,
        session: DownloadSession,
        finalizer: &mut dyn Finalizer,
    ) -> DownloadOutcome {
        let result = match session.kind {
            DownloadKind::ServerUrl => finalizer.server_url(&session.staging, &session.path),
            DownloadKind::CountriesList => {
                finalizer.countries_list(&session.staging, &session.path)
            }
            DownloadKind::ProvidedList => finalizer.provided_list(&session.staging, &session.path),
            DownloadKind::FeatureData => match &session.target {
                Some(file) => finalizer.feature_data(file, &session.staging, &session.path),
                None => Err(ManagerError::UnknownFeature(session.url.clone())),
            },
            DownloadKind::None => Ok(()),
        };

        match result {
            Ok(()) => {
                info!(
                    kind = %session.kind,
                    path = %session.path.display(),
                    bytes = session.bytes_written,
                    "Download finalized"
                );
                DownloadOutcome::Finished {
                    kind: session.kind,
                    target: session.target,
                }
            }
            Err(error) => self.fail(session, error),
        }
    }

    fn fail(&mut self, session: DownloadSession, error: ManagerError) -> DownloadOutcome {
        warn!(kind = %session.kind, url = %session.url, %error, "Download failed");
        fs::remove_file(&session.staging).ok();
        self.last_error = Some(error.to_string());
        DownloadOutcome::Failed {
            kind: session.kind,
            url: session.url,
            error,
        }
    }

    /// Abort the active transfer without finalizing it.
    ///
    /// Returns true if a session was active.
    pub fn cancel(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };
        active.handle.cancel();
        fs::remove_file(&active.session.staging).ok();
        info!(
            kind = %active.session.kind,
            url = %active.session.url,
            "Download cancelled"
        );
        true
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Kind of the active session, [`DownloadKind::None`] when idle.
    pub fn kind(&self) -> DownloadKind {
        self.active
            .as_ref()
            .map(|a| a.session.kind)
            .unwrap_or_default()
    }

    pub fn session(&self) -> Option<&DownloadSession> {
        self.active.as_ref().map(|a| &a.session)
    }

    /// Message of the most recent failure, cleared when a new download starts.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }
}
