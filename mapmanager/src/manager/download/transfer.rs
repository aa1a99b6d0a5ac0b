//! Abstraction over the byte-transfer layer.
//!
//! A [`Transfer`] moves one URL into one staging file and reports back
//! through a [`TransferSink`]. Events travel over an unbounded channel to the
//! manager's owner context, so implementations may run on any thread.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::manager::error::ManagerResult;

/// Identifies one transfer; events of finished or cancelled transfers are
/// recognised by a stale id.
pub type TransferId = u64;

/// Payload of a transfer event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEventKind {
    /// Cumulative bytes received.
    Downloaded(u64),
    /// Cumulative bytes written to the staging file.
    Written(u64),
    /// The staging file is complete.
    Finished,
    /// The transfer failed.
    Failed(String),
}

impl TransferEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferEventKind::Finished | TransferEventKind::Failed(_))
    }
}

/// An event reported by a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub transfer: TransferId,
    pub kind: TransferEventKind,
}

/// What to fetch and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub id: TransferId,
    pub url: String,
    pub staging: PathBuf,
}

/// Reporting channel handed to a transfer.
///
/// At most one terminal event ([`finished`](Self::finished) or
/// [`failed`](Self::failed)) is delivered; later calls are dropped.
#[derive(Debug, Clone)]
pub struct TransferSink {
    id: TransferId,
    sender: UnboundedSender<TransferEvent>,
    terminated: Arc<AtomicBool>,
}

impl TransferSink {
    pub fn new(id: TransferId, sender: UnboundedSender<TransferEvent>) -> Self {
        Self {
            id,
            sender,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn downloaded(&self, bytes: u64) {
        self.send(TransferEventKind::Downloaded(bytes));
    }

    pub fn written(&self, bytes: u64) {
        self.send(TransferEventKind::Written(bytes));
    }

    pub fn finished(&self) {
        self.send(TransferEventKind::Finished);
    }

    pub fn failed(&self, reason: impl Into<String>) {
        self.send(TransferEventKind::Failed(reason.into()));
    }

    fn send(&self, kind: TransferEventKind) {
        if self.terminated.load(Ordering::SeqCst) {
            return;
        }
        if kind.is_terminal() && self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        // The receiver is gone once the manager is dropped.
        let _ = self.sender.send(TransferEvent {
            transfer: self.id,
            kind,
        });
    }
}

/// Handle to a running transfer.
#[derive(Debug, Clone)]
pub struct TransferHandle {
    cancel: CancellationToken,
}

impl TransferHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Ask the transfer to stop. It may still report a failure afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Starts transfers.
///
/// Implementations must deliver exactly one terminal event per started
/// transfer, including on timeouts, and must not report after cancellation
/// other than a single failure.
pub trait Transfer: Send {
    fn start(
        &mut self,
        request: TransferRequest,
        sink: TransferSink,
    ) -> ManagerResult<TransferHandle>;
}
