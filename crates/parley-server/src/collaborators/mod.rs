//! External collaborators consumed by the server core
//!
//! The NPLT server only frames, dispatches and relays. Chat replies, model
//! switching, upload storage and conversation history are delegated to the
//! traits in this module; the default implementations make the binary usable
//! on its own.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use parley_common::{HistoryEntry, SessionId, StatusNotice};

mod conversations;
mod echo;
mod files;
mod models;

pub use conversations::MemoryConversationStore;
pub use echo::EchoChatHandler;
pub use files::DiskFileStore;
pub use models::ModelCatalog;

/// Errors reported by collaborators
#[derive(Debug, Error)]
pub enum CollaboratorError {
    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

/// Streamed chat reply: text chunks in order
pub type ChatStream = BoxStream<'static, Result<String, CollaboratorError>>;

/// Non-blocking progress callback relayed to the client as AGENT_STATUS
#[derive(Clone)]
pub struct StatusSink(Arc<dyn Fn(StatusNotice) + Send + Sync>);

impl StatusSink {
    pub fn new(f: impl Fn(StatusNotice) + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A sink that drops everything
    pub fn discard() -> Self {
        Self::new(|_| {})
    }

    pub fn emit(&self, notice: StatusNotice) {
        (self.0)(notice)
    }
}

impl fmt::Debug for StatusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StatusSink")
    }
}

/// Offers a file to a connected client
#[async_trait]
pub trait DownloadSink: Send + Sync {
    async fn offer(&self, session: SessionId, filename: String, data: Bytes) -> Result<(), CollaboratorError>;
}

/// Everything a chat handler may use while producing one reply
#[derive(Clone)]
pub struct ChatContext {
    pub session_id: SessionId,
    pub conversation: SessionId,
    pub model: String,
    pub status: StatusSink,
    downloads: Arc<dyn DownloadSink>,
}

impl ChatContext {
    pub fn new(
        session_id: SessionId,
        conversation: SessionId,
        model: String,
        status: StatusSink,
        downloads: Arc<dyn DownloadSink>,
    ) -> Self {
        Self {
            session_id,
            conversation,
            model,
            status,
            downloads,
        }
    }

    /// Offer a file back to the client this reply is for
    pub async fn offer(&self, filename: impl Into<String>, data: Bytes) -> Result<(), CollaboratorError> {
        self.downloads
            .offer(self.session_id, filename.into(), data)
            .await
    }
}

impl fmt::Debug for ChatContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatContext")
            .field("session_id", &self.session_id)
            .field("conversation", &self.conversation)
            .field("model", &self.model)
            .finish()
    }
}

/// Produces streamed replies to chat messages
#[async_trait]
pub trait ChatHandler: Send + Sync {
    async fn handle(&self, ctx: ChatContext, text: String) -> Result<ChatStream, CollaboratorError>;
}

/// Switches the model serving a session
#[async_trait]
pub trait ModelSwitcher: Send + Sync {
    /// Model new sessions start with
    fn default_model(&self) -> String;

    /// Perform the switch. Success means the model is in use.
    async fn switch_model(&self, session: SessionId, model: &str) -> Result<(), CollaboratorError>;
}

/// Metadata of a persisted upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub filename: String,
    pub size: u64,
    /// Hex SHA-256
    pub checksum: String,
    pub stored_at: DateTime<Utc>,
}

/// Persists completed uploads
#[async_trait]
pub trait FileStore: Send + Sync {
    async fn store(&self, session: SessionId, filename: &str, data: Bytes) -> Result<StoredFile, CollaboratorError>;

    async fn load(&self, filename: &str) -> Result<Bytes, CollaboratorError>;
}

/// Listing entry for a conversation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationInfo {
    pub id: SessionId,
    pub name: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

/// Conversation history storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create(&self, name: Option<String>) -> Result<ConversationInfo, CollaboratorError>;

    async fn list(&self) -> Result<Vec<ConversationInfo>, CollaboratorError>;

    async fn exists(&self, id: SessionId) -> bool;

    async fn delete(&self, id: SessionId) -> Result<(), CollaboratorError>;

    async fn append(&self, id: SessionId, entry: HistoryEntry) -> Result<(), CollaboratorError>;

    /// Most recent `limit` entries (all when `None`), oldest first
    async fn history(&self, id: SessionId, limit: Option<usize>) -> Result<Vec<HistoryEntry>, CollaboratorError>;

    async fn clear(&self, id: SessionId) -> Result<(), CollaboratorError>;
}

/// The full set of collaborators a server runs with
#[derive(Clone)]
pub struct Collaborators {
    pub chat: Arc<dyn ChatHandler>,
    pub models: Arc<dyn ModelSwitcher>,
    pub files: Arc<dyn FileStore>,
    pub conversations: Arc<dyn ConversationStore>,
}

impl Collaborators {
    /// Built-in implementations driven by the server config
    pub fn defaults(config: &crate::config::ServerConfig) -> Self {
        let files: Arc<dyn FileStore> = Arc::new(DiskFileStore::new(&config.upload_dir));
        Self {
            chat: Arc::new(EchoChatHandler::new(files.clone())),
            models: Arc::new(ModelCatalog::new(
                config.models.default.clone(),
                config.models.available.clone(),
            )),
            files,
            conversations: Arc::new(MemoryConversationStore::new()),
        }
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Collaborators")
    }
}

/// History entry stamped with the current time
pub fn history_entry(role: &str, content: impl Into<String>) -> HistoryEntry {
    HistoryEntry {
        role: role.to_string(),
        content: content.into(),
        timestamp: Utc::now().to_rfc3339(),
    }
}
