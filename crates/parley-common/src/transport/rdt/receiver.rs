//! RDT receive-side state machine.
//!
//! [`ReceiverSession`] buffers packets in any order, counts duplicates, and
//! tracks the lowest sequence still missing. That value is the cumulative
//! ACK: it tells the sender every packet below it has arrived, which is how
//! lost and reordered packets are recovered without negative ACKs.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::BTreeMap;
use std::time::Instant;

use bytes::{Bytes, BytesMut};

use crate::error::TransferError;
use crate::protocol::{checksum::file_checksum_chunks, RdtPacket, MAX_TRANSFER_PACKETS};
use crate::transport::rdt::packet_count;
use crate::types::TransferToken;

/// Lifecycle of a receiver session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverState {
    /// Constructed but not yet accepting packets
    Idle,
    Receiving,
    Completed,
    Failed(TransferError),
}

/// What happened to one data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketOutcome {
    Stored,
    Duplicate,
    /// Sequence beyond the expected packet count
    OutOfRange,
}

/// Receive-side state for one file transfer
#[derive(Debug)]
pub struct ReceiverSession {
    token: TransferToken,
    filename: String,
    expected_size: usize,
    expected_checksum: String,

    received: BTreeMap<u16, Bytes>,
    /// Lowest sequence not yet received (the cumulative ACK value)
    next_expected: usize,
    total_packets: usize,

    duplicates: u64,
    corrupt: u64,
    state: ReceiverState,
    created_at: Instant,
    completed_at: Option<Instant>,
}

impl ReceiverSession {
    pub fn new(
        token: TransferToken,
        filename: impl Into<String>,
        expected_size: usize,
        expected_checksum: impl Into<String>,
    ) -> Result<Self, TransferError> {
        let total_packets = packet_count(expected_size);
        if total_packets > MAX_TRANSFER_PACKETS {
            return Err(TransferError::FileTooLarge {
                size: expected_size,
                packets: total_packets,
                max: MAX_TRANSFER_PACKETS,
            });
        }
        Ok(Self {
            token,
            filename: filename.into(),
            expected_size,
            expected_checksum: expected_checksum.into(),
            received: BTreeMap::new(),
            next_expected: 0,
            total_packets,
            duplicates: 0,
            corrupt: 0,
            state: ReceiverState::Idle,
            created_at: Instant::now(),
            completed_at: None,
        })
    }

    /// Start accepting packets
    pub fn begin(&mut self) {
        if self.state == ReceiverState::Idle {
            self.state = ReceiverState::Receiving;
        }
    }

    pub fn token(&self) -> TransferToken {
        self.token
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn expected_size(&self) -> usize {
        self.expected_size
    }

    pub fn expected_checksum(&self) -> &str {
        &self.expected_checksum
    }

    pub fn total_packets(&self) -> usize {
        self.total_packets
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }

    pub fn duplicate_count(&self) -> u64 {
        self.duplicates
    }

    pub fn corrupt_count(&self) -> u64 {
        self.corrupt
    }

    pub fn state(&self) -> &ReceiverState {
        &self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the file was verified, if it has been
    pub fn completed_at(&self) -> Option<Instant> {
        self.completed_at
    }

    pub fn is_receiving(&self) -> bool {
        self.state == ReceiverState::Receiving
    }

    /// Store a packet whose checksum has already been validated
    pub fn on_packet(&mut self, packet: &RdtPacket) -> PacketOutcome {
        let seq = packet.seq as usize;
        if seq >= self.total_packets {
            return PacketOutcome::OutOfRange;
        }
        if self.received.contains_key(&packet.seq) {
            self.duplicates += 1;
            return PacketOutcome::Duplicate;
        }

        self.received.insert(packet.seq, packet.data.clone());
        while self.next_expected < self.total_packets
            && self.received.contains_key(&(self.next_expected as u16))
        {
            self.next_expected += 1;
        }
        PacketOutcome::Stored
    }

    /// Record a packet dropped for a bad checksum
    pub fn on_corrupt(&mut self) {
        self.corrupt += 1;
    }

    /// Cumulative ACK value: the smallest sequence not yet received
    pub fn ack_seq(&self) -> u16 {
        // total_packets <= u16::MAX, so this never truncates
        self.next_expected as u16
    }

    /// Every expected packet has arrived
    pub fn is_complete(&self) -> bool {
        self.received.len() >= self.total_packets
    }

    /// Payloads concatenated in sequence order
    pub fn assemble(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.expected_size);
        for chunk in self.received.values() {
            out.extend_from_slice(chunk);
        }
        out.freeze()
    }

    /// Verify the whole-file checksum and move to a terminal state.
    ///
    /// An incomplete transfer fails as a timeout; a complete one whose bytes
    /// do not hash to the announced checksum fails as a checksum mismatch.
    pub fn finish(&mut self) -> Result<Bytes, TransferError> {
        if !self.is_complete() {
            let err = TransferError::Timeout {
                received: self.received.len(),
                expected: self.total_packets,
            };
            self.state = ReceiverState::Failed(err.clone());
            return Err(err);
        }

        let actual = file_checksum_chunks(self.received.values().map(|b| &b[..]));
        if !actual.eq_ignore_ascii_case(&self.expected_checksum) {
            let err = TransferError::ChecksumMismatch {
                expected: self.expected_checksum.clone(),
                actual,
            };
            self.state = ReceiverState::Failed(err.clone());
            return Err(err);
        }

        self.state = ReceiverState::Completed;
        self.completed_at = Some(Instant::now());
        Ok(self.assemble())
    }

    /// Abort the transfer
    pub fn fail(&mut self, error: TransferError) {
        if !matches!(self.state, ReceiverState::Completed | ReceiverState::Failed(_)) {
            self.state = ReceiverState::Failed(error);
        }
    }
}
