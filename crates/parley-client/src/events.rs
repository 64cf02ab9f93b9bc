//! Events surfaced by a connected client

use bytes::Bytes;

use parley_common::{ConversationSummary, HistoryEntry, StatusNotice, TransferToken};

/// Something the server sent, or something that happened to a transfer
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Greeting carrying the server-assigned session id
    Welcome { session_id: String },
    /// Part of a streamed chat reply
    ChatChunk(String),
    /// The streamed reply is complete
    ReplyEnd,
    Status(StatusNotice),
    History(Vec<HistoryEntry>),
    SessionList(Vec<ConversationSummary>),
    DownloadStarted {
        filename: String,
        size: u64,
        token: TransferToken,
    },
    /// An RDT download arrived and matched its checksum
    DownloadComplete { filename: String, data: Bytes },
    DownloadFailed { filename: String, reason: String },
    /// A file delivered inline over NPLT
    FileReceived { filename: String, data: Bytes },
    Disconnected,
}

impl ClientEvent {
    pub(crate) fn from_status(notice: StatusNotice) -> Self {
        match notice {
            StatusNotice::Welcome { session_id } => ClientEvent::Welcome { session_id },
            StatusNotice::TransferFailed { filename, reason } => {
                ClientEvent::DownloadFailed { filename, reason }
            }
            other => ClientEvent::Status(other),
        }
    }
}
