//! RDT receiving endpoint
//!
//! Data packets have no transfer id, so every packet is handed to the oldest
//! session still receiving. A completed session is kept for a short linger
//! period so retransmissions that cross the final ACK are answered again
//! instead of leaving the sender to time out.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{debug, info, warn};

use crate::error::{ParleyError, Result, TransferError};
use crate::protocol::{AckPacket, RdtPacket, MAX_DATA_LENGTH, RDT_HEADER_SIZE};
use crate::transport::rdt::{PacketOutcome, RdtConfig, ReceiverSession, ReceiverState};
use crate::transport::ShutdownSignal;
use crate::types::TransferToken;

type SharedReceiver = Arc<Mutex<ReceiverSession>>;

/// Client-side RDT endpoint
pub struct RdtClient {
    socket: Arc<UdpSocket>,
    config: RdtConfig,
    sessions: DashMap<TransferToken, SharedReceiver>,
}

impl RdtClient {
    pub async fn bind(addr: impl ToSocketAddrs, config: RdtConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        debug!("RDT client bound to {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            config,
            sessions: DashMap::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Register a transfer announced by a download offer
    pub fn create_session(
        &self,
        token: TransferToken,
        filename: impl Into<String>,
        size: usize,
        expected_checksum: impl Into<String>,
    ) -> Result<()> {
        if self.sessions.contains_key(&token) {
            return Err(ParleyError::TransferBusy(format!(
                "transfer {} already registered",
                token
            )));
        }

        let mut session = ReceiverSession::new(token, filename, size, expected_checksum)?;
        session.begin();
        info!(
            %token,
            filename = session.filename(),
            size,
            packets = session.total_packets(),
            "Created RDT receiver session"
        );
        self.sessions.insert(token, Arc::new(Mutex::new(session)));
        Ok(())
    }

    /// Oldest receiving session, else the oldest lingering completed one
    fn select_session(&self) -> Option<SharedReceiver> {
        let mut receiving: Option<(Instant, SharedReceiver)> = None;
        let mut lingering: Option<(Instant, SharedReceiver)> = None;

        for entry in self.sessions.iter() {
            let (state, created) = {
                let session = entry.value().lock();
                (session.state().clone(), session.created_at())
            };
            let slot = match state {
                ReceiverState::Receiving => &mut receiving,
                ReceiverState::Completed => &mut lingering,
                _ => continue,
            };
            if slot.as_ref().map_or(true, |(t, _)| created < *t) {
                *slot = Some((created, entry.value().clone()));
            }
        }
        receiving.or(lingering).map(|(_, s)| s)
    }

    /// Process one datagram from `peer` and answer with a cumulative ACK.
    ///
    /// Corrupt or malformed packets are dropped without an ACK.
    pub async fn handle_packet(&self, buf: &[u8], peer: SocketAddr) -> Result<()> {
        let packet = match RdtPacket::decode(buf) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%peer, error = %e, "Dropping malformed RDT packet");
                return Ok(());
            }
        };

        let Some(shared) = self.select_session() else {
            warn!(%peer, seq = packet.seq, "RDT packet with no active transfer");
            return Ok(());
        };

        let ack = {
            let mut session = shared.lock();
            if !packet.validate() {
                session.on_corrupt();
                debug!(%peer, seq = packet.seq, "Dropping RDT packet with bad checksum");
                return Ok(());
            }
            match session.on_packet(&packet) {
                PacketOutcome::Stored => {}
                PacketOutcome::Duplicate => debug!(seq = packet.seq, "Duplicate RDT packet"),
                PacketOutcome::OutOfRange => {
                    warn!(seq = packet.seq, total = session.total_packets(), "RDT packet out of range");
                }
            }
            AckPacket::new(session.ack_seq())
        };

        self.socket.send_to(&ack.encode(), peer).await?;
        Ok(())
    }

    /// Wait for a transfer to finish and return the verified file.
    ///
    /// Fails with [`TransferError::Timeout`] when packets are still missing at
    /// the deadline, or [`TransferError::ChecksumMismatch`] when all arrived
    /// but the file does not hash to the announced value.
    pub async fn receive_file(&self, token: TransferToken, timeout: Duration) -> Result<Bytes> {
        let shared = self
            .sessions
            .get(&token)
            .map(|e| e.value().clone())
            .ok_or_else(|| ParleyError::TransferNotFound(token.to_string()))?;

        let deadline = Instant::now() + timeout;
        let result = loop {
            let (complete, cancelled) = {
                let session = shared.lock();
                (
                    session.is_complete(),
                    matches!(session.state(), ReceiverState::Failed(TransferError::Cancelled)),
                )
            };
            if cancelled {
                break Err(TransferError::Cancelled);
            }
            if complete || Instant::now() >= deadline {
                break shared.lock().finish();
            }
            tokio::time::sleep(self.config.poll_interval()).await;
        };

        match &result {
            Ok(data) => {
                info!(%token, size = data.len(), "RDT file received");
                self.linger(token);
            }
            Err(e) => {
                warn!(%token, error = %e, "RDT receive failed");
                self.sessions.remove(&token);
            }
        }
        result.map_err(Into::into)
    }

    /// Keep a completed session around to re-ACK late retransmissions
    fn linger(&self, token: TransferToken) {
        let linger = self.config.completion_linger();
        if linger.is_zero() {
            self.sessions.remove(&token);
        } else {
            self.sweep_lingering(linger);
        }
    }

    /// Drop completed sessions whose linger period has passed
    fn sweep_lingering(&self, linger: Duration) {
        self.sessions.retain(|_, session| {
            session
                .lock()
                .completed_at()
                .map_or(true, |at| at.elapsed() <= linger)
        });
    }

    /// Abandon a transfer and release its session
    pub fn cancel(&self, token: TransferToken) -> bool {
        match self.sessions.remove(&token) {
            Some((_, session)) => {
                session.lock().fail(TransferError::Cancelled);
                true
            }
            None => false,
        }
    }

    /// Receive data packets until shutdown
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> Result<()> {
        let mut buf = vec![0u8; RDT_HEADER_SIZE + MAX_DATA_LENGTH + 1];
        let mut sweep = tokio::time::interval(self.config.completion_linger().max(Duration::from_millis(100)));
        loop {
            tokio::select! {
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((n, peer)) => {
                            if let Err(e) = self.handle_packet(&buf[..n], peer).await {
                                debug!(%peer, error = %e, "Failed to send ACK");
                            }
                        }
                        Err(e) => debug!(error = %e, "RDT recv error"),
                    }
                }
                _ = sweep.tick() => self.sweep_lingering(self.config.completion_linger()),
                _ = shutdown.wait() => {
                    debug!("RDT client shutting down");
                    return Ok(());
                }
            }
        }
    }
}

impl std::fmt::Debug for RdtClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdtClient")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
