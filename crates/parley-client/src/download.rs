//! Bridge from download offers to the RDT receiver
//!
//! Each offer registers a receiver session under the announced token, then a
//! background task waits for the file so the NPLT stream keeps flowing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_common::transport::RdtClient;
use parley_common::{DownloadOffer, ParleyError, TransferError, TransferToken};

use crate::events::ClientEvent;

/// In-flight RDT downloads of one client
pub struct Downloads {
    rdt: Arc<RdtClient>,
    timeout: Duration,
    events: mpsc::UnboundedSender<ClientEvent>,
    active: Mutex<HashMap<String, TransferToken>>,
}

impl Downloads {
    pub(crate) fn new(
        rdt: Arc<RdtClient>,
        timeout: Duration,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            rdt,
            timeout,
            events,
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn rdt(&self) -> &Arc<RdtClient> {
        &self.rdt
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Accept an offer and receive the file in the background
    pub(crate) fn start(self: &Arc<Self>, offer: DownloadOffer) {
        // Oversized offers fail the packet-count check in create_session
        let size = usize::try_from(offer.size).unwrap_or(usize::MAX);
        let registered = self.rdt.create_session(
            offer.token,
            offer.filename.clone(),
            size,
            offer.checksum.clone(),
        );
        if let Err(e) = registered {
            warn!(filename = %offer.filename, error = %e, "Refusing download offer");
            self.emit(ClientEvent::DownloadFailed {
                filename: offer.filename,
                reason: failure_reason(&e),
            });
            return;
        }

        info!(
            filename = %offer.filename,
            size = offer.size,
            token = %offer.token,
            server = %format!("{}:{}", offer.host, offer.port),
            "Download started"
        );
        self.active.lock().insert(offer.filename.clone(), offer.token);
        self.emit(ClientEvent::DownloadStarted {
            filename: offer.filename.clone(),
            size: offer.size,
            token: offer.token,
        });

        let this = self.clone();
        tokio::spawn(async move {
            let result = this.rdt.receive_file(offer.token, this.timeout).await;
            {
                let mut active = this.active.lock();
                if active.get(&offer.filename) == Some(&offer.token) {
                    active.remove(&offer.filename);
                }
            }

            match result {
                Ok(data) => this.emit(ClientEvent::DownloadComplete {
                    filename: offer.filename,
                    data,
                }),
                // Already reported by whoever cancelled it
                Err(ParleyError::Transfer(TransferError::Cancelled)) => {
                    debug!(filename = %offer.filename, "Download cancelled");
                }
                Err(e) => this.emit(ClientEvent::DownloadFailed {
                    filename: offer.filename,
                    reason: failure_reason(&e),
                }),
            }
        });
    }

    /// Drop the receiver for `filename`, e.g. after the server gave up sending
    pub fn abort(&self, filename: &str) -> bool {
        let token = self.active.lock().remove(filename);
        token.is_some_and(|token| self.rdt.cancel(token))
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

impl std::fmt::Debug for Downloads {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Downloads")
            .field("timeout", &self.timeout)
            .field("active", &self.active.lock().len())
            .finish()
    }
}

/// Short reason string for a failed download
pub fn failure_reason(err: &ParleyError) -> String {
    match err {
        ParleyError::Transfer(e) => e.reason().to_string(),
        other => other.to_string(),
    }
}

/// Write a received file into `dir`, keeping only the final path component
/// of the server-supplied name.
pub async fn save_download(dir: &Path, filename: &str, data: &[u8]) -> std::io::Result<PathBuf> {
    let name = Path::new(filename)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "download".into());

    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(name);
    tokio::fs::write(&path, data).await?;
    Ok(path)
}
