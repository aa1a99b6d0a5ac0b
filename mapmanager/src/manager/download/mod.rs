//! Download machinery for manifests and feature files.
//!
//! ```text
//! DownloadOrchestrator (single session state machine)
//!         │
//!         ├── Transfer (trait)
//!         │       └── HttpTransfer (reqwest, one thread per transfer)
//!         │
//!         ├── DownloadSession / DownloadKind (state)
//!         │
//!         ├── ProgressTracker (progress text)
//!         │
//!         └── Finalizer (trait, installs the completed file)
//! ```
//!
//! Transfers report [`TransferEvent`]s over a channel; the owner of the
//! orchestrator pulls them and applies them with
//! [`DownloadOrchestrator::handle`].

mod http;
mod orchestrator;
mod progress;
mod state;
mod transfer;

pub use http::{HttpTransfer, CANCELLED_REASON};
pub use orchestrator::{DownloadOrchestrator, DownloadOutcome, Finalizer};
pub use progress::{progress_text, ProgressTracker, PROGRESS_STEP};
pub use state::{DownloadKind, DownloadSession};
pub use transfer::{
    Transfer, TransferEvent, TransferEventKind, TransferHandle, TransferId, TransferRequest,
    TransferSink,
};
