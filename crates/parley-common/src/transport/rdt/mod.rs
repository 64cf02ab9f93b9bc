//! RDT: reliable file delivery over UDP
//!
//! The server side drives a sliding window of [`SenderSession`]s, the client
//! side reassembles with [`ReceiverSession`]s and answers every accepted data
//! packet with a cumulative ACK carrying the next sequence it still needs.
//!
//! The wire format has no transfer identifier, so a client endpoint can only
//! receive one file at a time; the server tells transfers apart by peer
//! address.

pub mod client;
pub mod receiver;
pub mod sender;
pub mod server;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{DEFAULT_RETRANSMIT_TIMEOUT_MS, DEFAULT_WINDOW_SIZE, MAX_DATA_LENGTH};

pub use client::RdtClient;
pub use receiver::{PacketOutcome, ReceiverSession, ReceiverState};
pub use sender::{SenderSession, SenderState, SenderStats};
pub use server::{RdtServer, TransferReport};

/// Tunables for both ends of an RDT transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RdtConfig {
    /// Maximum unacknowledged packets in flight
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Retransmission timer for the oldest unacknowledged packet
    #[serde(default = "default_retransmit_timeout")]
    pub retransmit_timeout_ms: u64,

    /// Consecutive timer expiries without progress before giving up
    #[serde(default = "default_max_retransmissions")]
    pub max_retransmissions: u32,

    /// Receiver completion poll period
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long a completed receiver keeps answering late retransmissions
    #[serde(default = "default_completion_linger")]
    pub completion_linger_ms: u64,
}

fn default_window_size() -> usize {
    DEFAULT_WINDOW_SIZE
}

fn default_retransmit_timeout() -> u64 {
    DEFAULT_RETRANSMIT_TIMEOUT_MS
}

fn default_max_retransmissions() -> u32 {
    50
}

fn default_poll_interval() -> u64 {
    10
}

fn default_completion_linger() -> u64 {
    2000
}

impl Default for RdtConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            retransmit_timeout_ms: default_retransmit_timeout(),
            max_retransmissions: default_max_retransmissions(),
            poll_interval_ms: default_poll_interval(),
            completion_linger_ms: default_completion_linger(),
        }
    }
}

impl RdtConfig {
    pub fn retransmit_timeout(&self) -> Duration {
        Duration::from_millis(self.retransmit_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn completion_linger(&self) -> Duration {
        Duration::from_millis(self.completion_linger_ms)
    }
}

/// Number of packets needed for `size` bytes: ceil(size / 1024)
pub fn packet_count(size: usize) -> usize {
    size.div_ceil(MAX_DATA_LENGTH)
}
