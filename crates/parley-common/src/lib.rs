//! # parley-common
//!
//! Shared components for the parley chat and file-transfer service.
//!
//! This crate contains:
//! - NPLT: the length-prefixed control/chat framing and its tokio codec
//! - RDT: the sliding-window reliable datagram protocol and its transport
//! - Shared types, JSON payloads and error definitions
//!
//! ## Architecture
//!
//! NPLT frames travel over a TCP stream and carry chat, status and control
//! traffic. File payloads move over UDP with RDT; the two are correlated by a
//! transfer token announced in an NPLT download offer.

pub mod error;
pub mod protocol;
pub mod transport;
pub mod types;

// Re-export commonly used items at crate root
pub use error::{ParleyError, Result, TransferError};
pub use protocol::{AckPacket, MessageType, NpltCodec, NpltMessage, RdtPacket};
pub use types::{
    ClientKind, ConversationRef, ConversationSummary, DownloadOffer, FileMetadata, HistoryEntry,
    HistoryRequest, ModelSwitchRequest, NewConversation, SessionId, StatusNotice, TransferToken,
    UdpRegistration,
};
