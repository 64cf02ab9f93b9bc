//! Download offers
//!
//! Moves a file from the server to a connected client. CLI clients that
//! registered an RDT port get the file over RDT: a DOWNLOAD_OFFER frame
//! announces the token and checksum, then a background task drives the
//! sender. Everyone else gets FILE_METADATA followed by FILE_DATA frames on
//! the NPLT stream.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{info, warn};

use parley_common::transport::RdtServer;
use parley_common::{
    DownloadOffer, FileMetadata, MessageType, ParleyError, Result, SessionId, StatusNotice,
    TransferToken,
};

use crate::collaborators::{CollaboratorError, DownloadSink};
use crate::registry::Registry;
use crate::session::Session;

/// How a file offer was delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRoute {
    Rdt(TransferToken),
    Inline,
}

/// Chooses a transport per client and starts the transfer
pub struct TransferManager {
    registry: Arc<Registry>,
    rdt: Arc<RdtServer>,
    advertised_host: String,
    advertised_port: u16,
}

impl TransferManager {
    pub fn new(registry: Arc<Registry>, rdt: Arc<RdtServer>, advertised_host: String) -> Result<Self> {
        let advertised_port = rdt.local_addr()?.port();
        Ok(Self {
            registry,
            rdt,
            advertised_host,
            advertised_port,
        })
    }

    pub fn rdt(&self) -> &Arc<RdtServer> {
        &self.rdt
    }

    /// Offer `data` to the client of `session_id`
    pub fn offer_download(&self, session_id: SessionId, filename: &str, data: Bytes) -> Result<TransferRoute> {
        let session = self
            .registry
            .get(&session_id)
            .ok_or_else(|| ParleyError::SessionNotFound(session_id.to_string()))?;

        match session.rdt_peer() {
            Some(peer) => {
                let token = self.rdt.create_session(filename, data, peer)?;
                if let Err(e) = self.announce(&session, token) {
                    self.rdt.cancel(token);
                    return Err(e);
                }
                self.spawn_sender(session, filename.to_string(), token);
                Ok(TransferRoute::Rdt(token))
            }
            None => {
                send_inline(&session, filename, &data)?;
                Ok(TransferRoute::Inline)
            }
        }
    }

    fn announce(&self, session: &Session, token: TransferToken) -> Result<()> {
        let (filename, size, checksum) = self
            .rdt
            .describe(token)
            .ok_or_else(|| ParleyError::TransferNotFound(token.to_string()))?;

        let offer = DownloadOffer {
            filename,
            size: size as u64,
            checksum,
            token,
            host: self.advertised_host.clone(),
            port: self.advertised_port,
        };
        info!(
            session = %session.id(),
            %token,
            filename = %offer.filename,
            size = offer.size,
            "Offering download over RDT"
        );
        session.send_json(MessageType::DownloadOffer, &offer)
    }

    fn spawn_sender(&self, session: Arc<Session>, filename: String, token: TransferToken) {
        let rdt = self.rdt.clone();
        tokio::spawn(async move {
            if let Err(e) = rdt.send_file(token).await {
                let reason = match &e {
                    ParleyError::Transfer(t) => t.reason().to_string(),
                    other => other.to_string(),
                };
                warn!(session = %session.id(), %token, %reason, "Download failed");
                // The client may already be gone
                let _ = session.send_status(&StatusNotice::TransferFailed { filename, reason });
            }
        });
    }
}

/// FILE_METADATA then the raw bytes as FILE_DATA frames
fn send_inline(session: &Session, filename: &str, data: &[u8]) -> Result<()> {
    info!(
        session = %session.id(),
        filename,
        size = data.len(),
        "Sending download inline"
    );
    session.send_json(
        MessageType::FileMetadata,
        &FileMetadata {
            filename: filename.to_string(),
            size: data.len() as u64,
        },
    )?;
    if !data.is_empty() {
        session.send(MessageType::FileData, data)?;
    }
    Ok(())
}

#[async_trait]
impl DownloadSink for TransferManager {
    async fn offer(&self, session: SessionId, filename: String, data: Bytes) -> std::result::Result<(), CollaboratorError> {
        self.offer_download(session, &filename, data)
            .map(|_| ())
            .map_err(|e| CollaboratorError::Failed(e.to_string()))
    }
}

impl std::fmt::Debug for TransferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferManager")
            .field("advertised_host", &self.advertised_host)
            .field("advertised_port", &self.advertised_port)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_common::transport::RdtConfig;
    use parley_common::{ClientKind, NpltMessage};
    use tokio::sync::mpsc;

    async fn manager(registry: Arc<Registry>) -> TransferManager {
        let rdt = RdtServer::bind("127.0.0.1:0", RdtConfig::default()).await.unwrap();
        TransferManager::new(registry, Arc::new(rdt), "127.0.0.1".into()).unwrap()
    }

    fn register(registry: &Registry) -> (Arc<Session>, mpsc::UnboundedReceiver<NpltMessage>) {
        let (session, rx) = Session::new("127.0.0.1:6000".parse().unwrap(), SessionId::new(), "m".into());
        let session = Arc::new(session);
        registry.register(session.clone()).unwrap();
        (session, rx)
    }

    fn drain_types(rx: &mut mpsc::UnboundedReceiver<NpltMessage>) -> Vec<MessageType> {
        let mut types = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            types.push(frame.message_type);
        }
        types
    }

    #[tokio::test]
    async fn test_web_client_gets_inline_transfer() {
        let registry = Registry::new(4);
        let manager = manager(registry.clone()).await;
        let (session, mut rx) = register(&registry);
        session.register_udp(7001, ClientKind::Web);

        let route = manager
            .offer_download(session.id(), "a.bin", Bytes::from(vec![1u8; 300]))
            .unwrap();
        assert_eq!(route, TransferRoute::Inline);

        let types = drain_types(&mut rx);
        assert_eq!(types.first(), Some(&MessageType::FileMetadata));
        assert_eq!(
            types.iter().filter(|t| **t == MessageType::FileData).count(),
            2
        );
        assert_eq!(manager.rdt().session_count(), 0);
    }

    #[tokio::test]
    async fn test_cli_client_gets_rdt_offer() {
        let registry = Registry::new(4);
        let manager = manager(registry.clone()).await;
        let (session, mut rx) = register(&registry);
        // Nothing listens on this port; the offer itself is what we check
        session.register_udp(9, ClientKind::Cli);

        let route = manager
            .offer_download(session.id(), "b.bin", Bytes::from_static(b"payload"))
            .unwrap();
        assert!(matches!(route, TransferRoute::Rdt(_)));

        let mut body = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame.message_type, MessageType::DownloadOffer);
            if frame.is_terminator() {
                break;
            }
            body.extend_from_slice(&frame.data);
        }
        let offer: DownloadOffer = serde_json::from_slice(&body).unwrap();
        assert_eq!(offer.filename, "b.bin");
        assert_eq!(offer.size, 7);
        assert_eq!(offer.port, manager.rdt().local_addr().unwrap().port());
    }

    #[tokio::test]
    async fn test_failed_offer_releases_rdt_session() {
        let registry = Registry::new(4);
        let manager = manager(registry.clone()).await;
        let (session, _rx) = register(&registry);
        session.register_udp(9, ClientKind::Cli);
        session.mark_error();

        let err = manager
            .offer_download(session.id(), "d.bin", Bytes::from_static(b"x"))
            .unwrap_err();
        assert!(matches!(err, ParleyError::ConnectionClosed));
        assert_eq!(manager.rdt().session_count(), 0);

        // The peer is free for the next transfer
        let peer = session.rdt_peer().unwrap();
        manager.rdt().create_session("e.bin", &b"y"[..], peer).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let registry = Registry::new(4);
        let manager = manager(registry).await;
        let err = manager
            .offer_download(SessionId::new(), "c", Bytes::new())
            .unwrap_err();
        assert!(matches!(err, ParleyError::SessionNotFound(_)));
    }
}
