//! Error types for parley
//!
//! We use `thiserror` for structured error types that can be matched on,
//! and `anyhow` for error propagation in the binaries.

use thiserror::Error;

/// Central error type for parley operations
#[derive(Error, Debug)]
pub enum ParleyError {
    // === Framing Errors ===
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Packet too large: {size} bytes (max: {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Truncated input: need {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Length mismatch: header declares {declared} bytes, {actual} available")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Invalid message type: {0:#04x}")]
    InvalidMessageType(u8),

    // === Integrity ===
    #[error("Checksum mismatch: expected {expected:#06x}, computed {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    // === Transport Errors ===
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection closed")]
    ConnectionClosed,

    // === Session / Transfer Errors ===
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    #[error("Transfer already in progress for {0}")]
    TransferBusy(String),

    #[error("Transfer failed: {0}")]
    Transfer(#[from] TransferError),

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Serialization ===
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias using ParleyError
pub type Result<T> = std::result::Result<T, ParleyError>;

impl From<serde_json::Error> for ParleyError {
    fn from(err: serde_json::Error) -> Self {
        ParleyError::Serialization(err.to_string())
    }
}

/// Outcome of a failed RDT file transfer.
///
/// Timeouts and whole-file checksum failures are kept apart so the initiating
/// side can report why a transfer did not complete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("timed out with {received}/{expected} packets received")]
    Timeout { received: usize, expected: usize },

    #[error("file checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("peer stopped acknowledging after {0} retransmissions")]
    RetriesExhausted(u32),

    #[error("file of {size} bytes needs {packets} packets (max {max})")]
    FileTooLarge {
        size: usize,
        packets: usize,
        max: usize,
    },

    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Short machine-readable reason, used in `transfer_failed` notices
    pub fn reason(&self) -> &'static str {
        match self {
            TransferError::Timeout { .. } => "timeout",
            TransferError::ChecksumMismatch { .. } => "checksum",
            TransferError::RetriesExhausted(_) => "retries_exhausted",
            TransferError::FileTooLarge { .. } => "too_large",
            TransferError::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ParleyError::FrameTooLarge { size: 300, max: 255 };
        assert!(err.to_string().contains("300"));

        let err = ParleyError::InvalidMessageType(0xEE);
        assert_eq!(err.to_string(), "Invalid message type: 0xee");
    }

    #[test]
    fn test_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "test");
        let err: ParleyError = io_err.into();
        assert!(matches!(err, ParleyError::Io(_)));

        let err: ParleyError = TransferError::Cancelled.into();
        assert!(matches!(err, ParleyError::Transfer(TransferError::Cancelled)));

        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: ParleyError = json_err.into();
        assert!(matches!(err, ParleyError::Serialization(_)));
    }

    #[test]
    fn test_transfer_reasons_distinguish_timeout_from_checksum() {
        let timeout = TransferError::Timeout { received: 1, expected: 3 };
        let checksum = TransferError::ChecksumMismatch {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert_eq!(timeout.reason(), "timeout");
        assert_eq!(checksum.reason(), "checksum");
    }
}
