//! RDT send-side state machine.
//!
//! [`SenderSession`] keeps a sliding window of up to `window_size`
//! unacknowledged packets for one file.
//!
//! # Protocol contract
//!
//! - ACKs are **cumulative**: `ack = K` means packets `0..K` have arrived.
//! - A single retransmission timer guards `send_base`. When it fires without
//!   ACK progress only the packet at `send_base` is re-sent, then the timer
//!   restarts. Later packets are recovered by the cumulative ACK that the
//!   retransmission triggers.
//! - Too many consecutive expiries without progress fail the transfer.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::TransferError;
use crate::protocol::{
    checksum::file_checksum, AckPacket, RdtPacket, MAX_DATA_LENGTH, MAX_TRANSFER_PACKETS,
};
use crate::transport::rdt::{packet_count, RdtConfig};
use crate::types::TransferToken;

/// Lifecycle of a sender session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SenderState {
    /// Created, nothing sent yet
    Idle,
    /// Window has room and unsent packets remain
    Sending,
    /// Window full (or everything sent); waiting for ACKs
    WaitingAck,
    Completed,
    Failed(TransferError),
}

impl SenderState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SenderState::Completed | SenderState::Failed(_))
    }
}

/// Counters for logging and the transfer report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    pub packets_sent: u64,
    pub retransmissions: u64,
    pub acks_received: u64,
    pub duplicate_acks: u64,
}

/// Send-side state for one file transfer.
///
/// # Sequence-number layout
///
/// ```text
///  send_base          next_seq
///      │                  │
///  ────┼──────────────────┼──────────────────▶ packet index
///      │ <── in flight ──▶│ <── sendable ───▶
/// ```
#[derive(Debug)]
pub struct SenderSession {
    token: TransferToken,
    filename: String,
    total_size: usize,
    checksum: String,
    peer: SocketAddr,

    chunks: Vec<Bytes>,

    window_size: usize,
    /// Oldest unacknowledged packet
    send_base: usize,
    /// Next packet to produce
    next_seq: usize,
    /// Sent but not yet acknowledged, keyed by sequence
    unacked: BTreeMap<u16, RdtPacket>,

    /// Deadline of the single retransmission timer (armed for `send_base`)
    timer: Option<Instant>,
    retransmit_timeout: Duration,
    consecutive_timeouts: u32,
    max_retransmissions: u32,

    state: SenderState,
    stats: SenderStats,
}

impl SenderSession {
    /// Slice `data` into packets and compute the whole-file checksum.
    pub fn new(
        token: TransferToken,
        filename: impl Into<String>,
        data: Bytes,
        peer: SocketAddr,
        config: &RdtConfig,
    ) -> Result<Self, TransferError> {
        let packets = packet_count(data.len());
        if packets > MAX_TRANSFER_PACKETS {
            return Err(TransferError::FileTooLarge {
                size: data.len(),
                packets,
                max: MAX_TRANSFER_PACKETS,
            });
        }

        let mut chunks = Vec::with_capacity(packets);
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + MAX_DATA_LENGTH).min(data.len());
            chunks.push(data.slice(offset..end));
            offset = end;
        }

        let state = if chunks.is_empty() {
            SenderState::Completed
        } else {
            SenderState::Idle
        };

        Ok(Self {
            token,
            filename: filename.into(),
            total_size: data.len(),
            checksum: file_checksum(&data),
            peer,
            chunks,
            window_size: config.window_size.max(1),
            send_base: 0,
            next_seq: 0,
            unacked: BTreeMap::new(),
            timer: None,
            retransmit_timeout: config.retransmit_timeout(),
            consecutive_timeouts: 0,
            max_retransmissions: config.max_retransmissions,
            state,
            stats: SenderStats::default(),
        })
    }

    pub fn token(&self) -> TransferToken {
        self.token
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Hex SHA-256 of the whole file
    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn total_packets(&self) -> usize {
        self.chunks.len()
    }

    pub fn send_base(&self) -> usize {
        self.send_base
    }

    pub fn next_seq(&self) -> usize {
        self.next_seq
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    pub fn state(&self) -> &SenderState {
        &self.state
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    /// Packets sent but not yet acknowledged
    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }

    pub fn is_complete(&self) -> bool {
        self.state == SenderState::Completed
    }

    /// `true` while the window has room and unsent packets remain
    pub fn can_send(&self) -> bool {
        !self.state.is_terminal()
            && self.next_seq < self.send_base + self.window_size
            && self.next_seq < self.chunks.len()
    }

    /// Produce the next new packet and place it in the window.
    ///
    /// Arms the retransmission timer when this is the only outstanding packet.
    pub fn next_packet(&mut self, now: Instant) -> Option<RdtPacket> {
        if !self.can_send() {
            return None;
        }

        let seq = self.next_seq as u16;
        // Chunks are sliced to MAX_DATA_LENGTH, so construction cannot fail
        let packet = RdtPacket::new(seq, self.chunks[self.next_seq].clone()).ok()?;

        if self.unacked.is_empty() {
            self.timer = Some(now + self.retransmit_timeout);
        }
        self.unacked.insert(seq, packet.clone());
        self.next_seq += 1;
        self.stats.packets_sent += 1;

        self.state = if self.can_send() {
            SenderState::Sending
        } else {
            SenderState::WaitingAck
        };
        Some(packet)
    }

    /// Process a validated cumulative ACK.
    ///
    /// Returns the number of newly acknowledged packets; `0` for a duplicate
    /// ACK or one beyond anything sent.
    pub fn on_ack(&mut self, ack: &AckPacket, now: Instant) -> usize {
        self.stats.acks_received += 1;
        if self.state.is_terminal() {
            return 0;
        }

        let acked_through = ack.seq as usize;
        if acked_through <= self.send_base || acked_through > self.next_seq {
            self.stats.duplicate_acks += 1;
            return 0;
        }

        for seq in self.send_base..acked_through {
            self.unacked.remove(&(seq as u16));
        }
        let newly_acked = acked_through - self.send_base;
        self.send_base = acked_through;
        self.consecutive_timeouts = 0;

        if self.send_base >= self.chunks.len() {
            self.timer = None;
            self.state = SenderState::Completed;
        } else if self.unacked.is_empty() {
            self.timer = None;
            self.state = SenderState::Sending;
        } else {
            self.timer = Some(now + self.retransmit_timeout);
            self.state = if self.can_send() {
                SenderState::Sending
            } else {
                SenderState::WaitingAck
            };
        }
        newly_acked
    }

    /// Deadline of the retransmission timer, if armed
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timer
    }

    /// Check the retransmission timer.
    ///
    /// On expiry returns the packet at `send_base` for retransmission and
    /// restarts the timer, or fails the session once the retry budget is spent.
    pub fn poll_timeout(&mut self, now: Instant) -> Option<RdtPacket> {
        let deadline = self.timer?;
        if now < deadline || self.state.is_terminal() {
            return None;
        }

        self.consecutive_timeouts += 1;
        if self.consecutive_timeouts > self.max_retransmissions {
            self.timer = None;
            self.state = SenderState::Failed(TransferError::RetriesExhausted(
                self.max_retransmissions,
            ));
            return None;
        }

        let packet = self.unacked.get(&(self.send_base as u16))?.clone();
        self.timer = Some(now + self.retransmit_timeout);
        self.stats.retransmissions += 1;
        Some(packet)
    }

    /// Abort the transfer
    pub fn fail(&mut self, error: TransferError) {
        if !self.state.is_terminal() {
            self.timer = None;
            self.state = SenderState::Failed(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn session(size: usize, window: usize) -> SenderSession {
        let config = RdtConfig {
            window_size: window,
            max_retransmissions: 3,
            ..Default::default()
        };
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        SenderSession::new(TransferToken(1), "file.bin", Bytes::from(data), peer(), &config)
            .unwrap()
    }

    fn drain(s: &mut SenderSession, now: Instant) -> Vec<RdtPacket> {
        let mut out = Vec::new();
        while let Some(p) = s.next_packet(now) {
            out.push(p);
        }
        out
    }

    #[test]
    fn initial_state() {
        let s = session(2600, 5);
        assert_eq!(s.total_packets(), 3);
        assert_eq!(s.send_base(), 0);
        assert_eq!(s.next_seq(), 0);
        assert_eq!(s.state(), &SenderState::Idle);
        assert!(s.next_deadline().is_none());
        assert_eq!(s.checksum().len(), 64);
    }

    #[test]
    fn chunks_follow_max_data_length() {
        let mut s = session(2600, 5);
        let sizes: Vec<usize> = drain(&mut s, Instant::now())
            .iter()
            .map(|p| p.data.len())
            .collect();
        assert_eq!(sizes, vec![1024, 1024, 552]);
    }

    #[test]
    fn window_bounds_outstanding_packets() {
        let mut s = session(20 * 1024, 5);
        let now = Instant::now();

        let sent = drain(&mut s, now);
        assert_eq!(sent.len(), 5);
        assert_eq!(s.in_flight(), 5);
        assert!(!s.can_send());
        assert_eq!(s.state(), &SenderState::WaitingAck);

        // Acknowledge two: exactly two more may go out
        assert_eq!(s.on_ack(&AckPacket::new(2), now), 2);
        let more = drain(&mut s, now);
        assert_eq!(more.len(), 2);
        assert_eq!(more[0].seq, 5);
        assert!(s.in_flight() <= s.window_size());
    }

    #[test]
    fn window_never_exceeds_size_over_whole_transfer() {
        let mut s = session(40 * 1024, 4);
        let now = Instant::now();
        while !s.is_complete() {
            drain(&mut s, now);
            assert!(s.in_flight() <= 4);
            // Receiver acks one packet at a time
            let ack = AckPacket::new((s.send_base() + 1) as u16);
            s.on_ack(&ack, now);
        }
        assert_eq!(s.send_base(), 40);
    }

    #[test]
    fn first_packet_arms_timer() {
        let mut s = session(4096, 5);
        let now = Instant::now();
        s.next_packet(now).unwrap();
        assert_eq!(s.next_deadline(), Some(now + Duration::from_millis(100)));

        // Later packets do not move the timer
        s.next_packet(now + Duration::from_millis(10)).unwrap();
        assert_eq!(s.next_deadline(), Some(now + Duration::from_millis(100)));
    }

    #[test]
    fn cumulative_ack_slides_window() {
        let mut s = session(5 * 1024, 5);
        let now = Instant::now();
        drain(&mut s, now);

        assert_eq!(s.on_ack(&AckPacket::new(3), now), 3);
        assert_eq!(s.send_base(), 3);
        assert_eq!(s.in_flight(), 2);
    }

    #[test]
    fn duplicate_and_spurious_acks_ignored() {
        let mut s = session(5 * 1024, 2);
        let now = Instant::now();
        drain(&mut s, now);

        assert_eq!(s.on_ack(&AckPacket::new(1), now), 1);
        assert_eq!(s.on_ack(&AckPacket::new(1), now), 0);
        // Beyond next_seq (only 0 and 1 sent so far)
        assert_eq!(s.on_ack(&AckPacket::new(5), now), 0);
        assert_eq!(s.send_base(), 1);
        assert_eq!(s.stats().duplicate_acks, 2);
    }

    #[test]
    fn timeout_retransmits_only_send_base() {
        let mut s = session(5 * 1024, 5);
        let now = Instant::now();
        drain(&mut s, now);
        s.on_ack(&AckPacket::new(2), now);

        // Not yet expired
        assert!(s.poll_timeout(now + Duration::from_millis(50)).is_none());

        let later = now + Duration::from_millis(150);
        let resent = s.poll_timeout(later).unwrap();
        assert_eq!(resent.seq, 2);
        assert!(resent.validate());
        assert_eq!(s.stats().retransmissions, 1);
        // Timer restarted
        assert_eq!(s.next_deadline(), Some(later + Duration::from_millis(100)));
        // Everything else is still outstanding, nothing else re-sent
        assert_eq!(s.in_flight(), 3);
    }

    #[test]
    fn retries_exhausted_fails_session() {
        let mut s = session(1024, 5);
        let mut now = Instant::now();
        drain(&mut s, now);

        for _ in 0..3 {
            now += Duration::from_millis(101);
            assert!(s.poll_timeout(now).is_some());
        }
        now += Duration::from_millis(101);
        assert!(s.poll_timeout(now).is_none());
        assert_eq!(
            s.state(),
            &SenderState::Failed(TransferError::RetriesExhausted(3))
        );
    }

    #[test]
    fn progress_resets_retry_budget() {
        let mut s = session(3 * 1024, 5);
        let mut now = Instant::now();
        drain(&mut s, now);

        for _ in 0..3 {
            now += Duration::from_millis(101);
            s.poll_timeout(now);
        }
        s.on_ack(&AckPacket::new(1), now);
        now += Duration::from_millis(101);
        assert_eq!(s.poll_timeout(now).unwrap().seq, 1);
    }

    #[test]
    fn final_ack_completes() {
        let mut s = session(2600, 5);
        let now = Instant::now();
        drain(&mut s, now);
        assert_eq!(s.on_ack(&AckPacket::new(3), now), 3);
        assert!(s.is_complete());
        assert!(s.next_deadline().is_none());
        assert!(s.next_packet(now).is_none());
    }

    #[test]
    fn empty_file_is_complete_immediately() {
        let s = session(0, 5);
        assert_eq!(s.total_packets(), 0);
        assert!(s.is_complete());
    }

    #[test]
    fn oversized_file_rejected() {
        let data = Bytes::from(vec![0u8; (MAX_TRANSFER_PACKETS + 1) * MAX_DATA_LENGTH]);
        let result = SenderSession::new(
            TransferToken(9),
            "huge.bin",
            data,
            peer(),
            &RdtConfig::default(),
        );
        assert!(matches!(result, Err(TransferError::FileTooLarge { .. })));
    }
}
