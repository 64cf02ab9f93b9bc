//! Wire protocol definitions for parley
//!
//! ## NPLT frame format
//!
//! ```text
//! +--------+--------+--------+--------+--------...
//! | Type   | Seq (2 bytes, BE) | Length | Data (Length bytes)
//! +--------+--------+--------+--------+--------...
//! ```
//!
//! ## RDT packet formats
//!
//! ```text
//! data: | Seq (2B BE) | Checksum (2B BE) | Payload (0..=1024 bytes) |
//! ack:  | Seq (2B BE) | Checksum (2B BE) |
//! ```
//!
//! RDT checksums are the 16-bit one's-complement Internet checksum. Whole-file
//! integrity is a separate SHA-256 carried in the NPLT download offer.

pub mod checksum;
pub mod codec;
pub mod nplt;
pub mod rdt;

pub use codec::{MessageAssembler, NpltCodec};
pub use nplt::{FrameHeader, MessageType, NpltMessage};
pub use rdt::{AckPacket, RdtPacket};

/// NPLT header size: type (1) + seq (2) + length (1)
pub const NPLT_HEADER_SIZE: usize = 4;

/// Maximum NPLT payload per frame
pub const MAX_FRAME_DATA: usize = 255;

/// Maximum NPLT frame on the wire
pub const MAX_FRAME_SIZE: usize = NPLT_HEADER_SIZE + MAX_FRAME_DATA;

/// Largest body a multi-frame message may accumulate to (64 KiB)
pub const MAX_ASSEMBLED_BODY: usize = 64 * 1024;

/// Text of the heartbeat sentinel carried in a single CHAT frame
pub const HEARTBEAT_SENTINEL: &str = "HEARTBEAT";

/// RDT header size: seq (2) + checksum (2)
pub const RDT_HEADER_SIZE: usize = 4;

/// Maximum RDT payload per data packet
pub const MAX_DATA_LENGTH: usize = 1024;

/// ACK packets are header-only
pub const ACK_SIZE: usize = RDT_HEADER_SIZE;

/// Largest file an RDT transfer can carry, in packets.
/// The ACK carries the next expected sequence, which must fit in a u16.
pub const MAX_TRANSFER_PACKETS: usize = u16::MAX as usize;

/// Default sender window size (packets)
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Default retransmission timeout in milliseconds
pub const DEFAULT_RETRANSMIT_TIMEOUT_MS: u64 = 100;

/// Default heartbeat interval in seconds
pub const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Default session timeout in seconds
pub const SESSION_TIMEOUT_SECS: u64 = 90;

/// Default timeout sweep period in seconds
pub const TIMEOUT_SWEEP_INTERVAL_SECS: u64 = 30;
