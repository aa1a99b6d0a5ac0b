//! HTTP implementation of [`Transfer`].
//!
//! Each transfer runs on its own thread with a blocking `reqwest` client and
//! streams the response body into the staging file.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::thread;
use std::time::Duration;

use reqwest::blocking::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::transfer::{Transfer, TransferHandle, TransferRequest, TransferSink};
use crate::manager::error::{ManagerError, ManagerResult};

/// Buffer size for reading/writing during downloads (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Reason reported for transfers stopped through their handle.
pub const CANCELLED_REASON: &str = "cancelled";

/// Transfer backed by `reqwest::blocking`.
///
/// The timeout applies to connecting and to each read, so a stalled server
/// ends the transfer with a failure.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
    pub(crate) timeout: Duration,
}

impl HttpTransfer {
    /// Create a transfer layer with the given timeout.
    pub fn with_timeout(timeout: Duration) -> ManagerResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(concat!("mapmanager/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ManagerError::Network {
                url: String::new(),
                reason: format!("failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client, timeout })
    }
}

impl Transfer for HttpTransfer {
    fn start(
        &mut self,
        request: TransferRequest,
        sink: TransferSink,
    ) -> ManagerResult<TransferHandle> {
        let cancel = CancellationToken::new();
        let handle = TransferHandle::new(cancel.clone());
        let client = self.client.clone();
        let staging = request.staging.clone();

        thread::Builder::new()
            .name(format!("mapmanager-transfer-{}", request.id))
            .spawn(move || {
                debug!(url = %request.url, id = request.id, "Transfer started");
                match stream_to_file(&client, &request, &sink, &cancel) {
                    Ok(bytes) => {
                        debug!(url = %request.url, bytes, "Transfer complete");
                        sink.finished();
                    }
                    Err(reason) => {
                        if !cancel.is_cancelled() {
                            fs::remove_file(&request.staging).ok();
                        }
                        warn!(url = %request.url, %reason, "Transfer failed");
                        sink.failed(reason);
                    }
                }
            })
            .map_err(|e| ManagerError::io(staging, e))?;

        Ok(handle)
    }
}

/// Stream the response body into the staging file.
///
/// Returns the number of bytes written, or a failure reason.
fn stream_to_file(
    client: &Client,
    request: &TransferRequest,
    sink: &TransferSink,
    cancel: &CancellationToken,
) -> Result<u64, String> {
    let mut response = client
        .get(&request.url)
        .send()
        .map_err(|e| describe_request_error(&e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(format!("GET request failed with status {}", status));
    }

    let file = File::create(&request.staging)
        .map_err(|e| format!("cannot create {}: {}", request.staging.display(), e))?;
    let mut writer = BufWriter::new(file);
    let mut buffer = vec![0u8; BUFFER_SIZE];
    let mut transferred = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Err(CANCELLED_REASON.to_string());
        }

        let bytes_read = response
            .read(&mut buffer)
            .map_err(|e| format!("read error: {}", e))?;
        if bytes_read == 0 {
            break;
        }
        transferred += bytes_read as u64;
        sink.downloaded(transferred);

        writer
            .write_all(&buffer[..bytes_read])
            .map_err(|e| format!("write error: {}", e))?;
        sink.written(transferred);
    }

    let file = writer
        .into_inner()
        .map_err(|e| format!("write error: {}", e.error()))?;
    file.sync_all()
        .map_err(|e| format!("write error: {}", e))?;

    Ok(transferred)
}

fn describe_request_error(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "request timed out".to_string()
    } else if error.is_connect() {
        format!("connection failed: {}", error)
    } else {
        error.to_string()
    }
}
