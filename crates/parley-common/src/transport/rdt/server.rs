//! RDT sending endpoint
//!
//! One UDP socket shared by every outbound transfer. ACKs carry no transfer
//! id, so they are routed by peer address; each peer may have at most one
//! transfer in progress.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::error::{ParleyError, Result, TransferError};
use crate::protocol::{AckPacket, ACK_SIZE};
use crate::transport::rdt::{RdtConfig, SenderSession, SenderState, SenderStats};
use crate::transport::ShutdownSignal;
use crate::types::TransferToken;

/// Outcome of a finished transfer
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub token: TransferToken,
    pub filename: String,
    pub peer: SocketAddr,
    pub total_size: usize,
    pub total_packets: usize,
    pub stats: SenderStats,
    pub elapsed: Duration,
}

struct SenderEntry {
    session: Mutex<SenderSession>,
    /// Wakes the send loop when an ACK moved the window or the transfer was cancelled
    wake: Notify,
    /// Set once `send_file` owns the entry and will release it
    driving: AtomicBool,
}

/// Server-side RDT endpoint
pub struct RdtServer {
    socket: Arc<UdpSocket>,
    config: RdtConfig,
    sessions: DashMap<TransferToken, Arc<SenderEntry>>,
    peers: DashMap<SocketAddr, TransferToken>,
}

impl RdtServer {
    /// Bind the datagram endpoint
    pub async fn bind(addr: impl ToSocketAddrs, config: RdtConfig) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("RDT server listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            config,
            sessions: DashMap::new(),
            peers: DashMap::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &RdtConfig {
        &self.config
    }

    /// Number of transfers currently registered
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Slice `data` into packets and register a transfer to `peer`
    pub fn create_session(
        &self,
        filename: impl Into<String>,
        data: impl Into<bytes::Bytes>,
        peer: SocketAddr,
    ) -> Result<TransferToken> {
        if let Some(existing) = self.peers.get(&peer) {
            return Err(ParleyError::TransferBusy(format!(
                "{} already receiving transfer {}",
                peer,
                existing.value()
            )));
        }

        let mut token = TransferToken::generate();
        while self.sessions.contains_key(&token) {
            token = TransferToken::generate();
        }

        let session = SenderSession::new(token, filename, data.into(), peer, &self.config)?;
        info!(
            %token,
            %peer,
            filename = session.filename(),
            size = session.total_size(),
            packets = session.total_packets(),
            "Created RDT sender session"
        );

        self.sessions.insert(
            token,
            Arc::new(SenderEntry {
                session: Mutex::new(session),
                wake: Notify::new(),
                driving: AtomicBool::new(false),
            }),
        );
        self.peers.insert(peer, token);
        Ok(token)
    }

    /// Checksum and size of a registered transfer, for the download offer
    pub fn describe(&self, token: TransferToken) -> Option<(String, usize, String)> {
        let entry = self.sessions.get(&token)?;
        let session = entry.session.lock();
        Some((
            session.filename().to_string(),
            session.total_size(),
            session.checksum().to_string(),
        ))
    }

    /// Drive a transfer until every packet is acknowledged or it fails.
    ///
    /// The session is released when this returns, whatever the outcome.
    pub async fn send_file(&self, token: TransferToken) -> Result<TransferReport> {
        let entry = self
            .sessions
            .get(&token)
            .map(|e| e.value().clone())
            .ok_or_else(|| ParleyError::TransferNotFound(token.to_string()))?;

        entry.driving.store(true, Ordering::Release);
        let started = Instant::now();
        let result = self.drive(&entry, started).await;
        self.release(token);

        match &result {
            Ok(report) => info!(
                %token,
                packets = report.total_packets,
                retransmissions = report.stats.retransmissions,
                elapsed_ms = report.elapsed.as_millis() as u64,
                "RDT transfer complete"
            ),
            Err(e) => warn!(%token, error = %e, "RDT transfer failed"),
        }
        result
    }

    async fn drive(&self, entry: &SenderEntry, started: Instant) -> Result<TransferReport> {
        loop {
            let now = Instant::now();
            let (outgoing, peer, deadline) = {
                let mut session = entry.session.lock();
                let mut outgoing = Vec::new();

                if let Some(packet) = session.poll_timeout(now) {
                    debug!(seq = packet.seq, "Retransmitting send_base");
                    outgoing.push(packet);
                }
                while let Some(packet) = session.next_packet(now) {
                    outgoing.push(packet);
                }

                match session.state() {
                    SenderState::Completed => {
                        return Ok(TransferReport {
                            token: session.token(),
                            filename: session.filename().to_string(),
                            peer: session.peer(),
                            total_size: session.total_size(),
                            total_packets: session.total_packets(),
                            stats: session.stats(),
                            elapsed: started.elapsed(),
                        });
                    }
                    SenderState::Failed(e) => return Err(e.clone().into()),
                    _ => {}
                }

                (outgoing, session.peer(), session.next_deadline())
            };

            for packet in outgoing {
                let wire = packet.encode()?;
                if let Err(e) = self.socket.send_to(&wire, peer).await {
                    entry.session.lock().fail(TransferError::Cancelled);
                    return Err(e.into());
                }
            }

            let deadline = deadline.unwrap_or_else(|| now + self.config.retransmit_timeout());
            tokio::select! {
                _ = entry.wake.notified() => {}
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
            }
        }
    }

    /// Process one incoming datagram as an ACK from `peer`
    pub fn handle_ack(&self, buf: &[u8], peer: SocketAddr) {
        let ack = match AckPacket::decode(buf) {
            Ok(ack) => ack,
            Err(e) => {
                debug!(%peer, error = %e, "Dropping malformed ACK");
                return;
            }
        };
        if !ack.validate() {
            debug!(%peer, seq = ack.seq, "Dropping ACK with bad checksum");
            return;
        }

        let Some(token) = self.peers.get(&peer).map(|t| *t.value()) else {
            warn!(%peer, seq = ack.seq, "ACK from peer with no active transfer");
            return;
        };
        let Some(entry) = self.sessions.get(&token).map(|e| e.value().clone()) else {
            return;
        };

        let advanced = entry.session.lock().on_ack(&ack, Instant::now());
        if advanced > 0 {
            debug!(%token, ack = ack.seq, advanced, "Window advanced");
            entry.wake.notify_one();
        }
    }

    /// Abort a transfer.
    ///
    /// A running `send_file` returns `Cancelled` and releases the entry itself;
    /// a transfer that was never started is released here.
    pub fn cancel(&self, token: TransferToken) -> bool {
        let Some(entry) = self.sessions.get(&token).map(|e| e.value().clone()) else {
            return false;
        };
        entry.session.lock().fail(TransferError::Cancelled);
        entry.wake.notify_one();
        if !entry.driving.load(Ordering::Acquire) {
            debug!(%token, "Releasing cancelled transfer that never started");
            self.release(token);
        }
        true
    }

    fn release(&self, token: TransferToken) {
        if let Some((_, entry)) = self.sessions.remove(&token) {
            let peer = entry.session.lock().peer();
            self.peers.remove_if(&peer, |_, t| *t == token);
        }
    }

    /// Receive ACKs until shutdown
    pub async fn run(&self, mut shutdown: ShutdownSignal) -> Result<()> {
        // Data packets never arrive here; anything larger than an ACK is junk
        let mut buf = [0u8; ACK_SIZE * 16];
        loop {
            tokio::select! {
                recv = self.socket.recv_from(&mut buf) => {
                    match recv {
                        Ok((n, peer)) => self.handle_ack(&buf[..n], peer),
                        Err(e) => {
                            // ICMP unreachable from a departed client surfaces here on some platforms
                            debug!(error = %e, "RDT recv error");
                        }
                    }
                }
                _ = shutdown.wait() => {
                    info!("RDT server shutting down");
                    for entry in self.sessions.iter() {
                        entry.session.lock().fail(TransferError::Cancelled);
                        entry.wake.notify_one();
                    }
                    return Ok(());
                }
            }
        }
    }
}

impl std::fmt::Debug for RdtServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdtServer")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
