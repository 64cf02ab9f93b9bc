//! Core type definitions for parley
//!
//! Identifiers and the JSON payloads carried inside NPLT frames. These types
//! are shared by the server and client so both builds agree on the encoding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an NPLT connection (server-assigned)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Generate a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Correlates an RDT sender session with the NPLT download offer announcing it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferToken(pub u64);

impl TransferToken {
    /// Allocate a random token
    pub fn generate() -> Self {
        Self(rand::random())
    }
}

impl fmt::Display for TransferToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Kind of client on the other end of an NPLT connection.
///
/// Only CLI clients run an RDT endpoint; the others receive files inline
/// over NPLT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    #[default]
    Cli,
    Web,
    Desktop,
}

impl ClientKind {
    pub fn supports_rdt(&self) -> bool {
        matches!(self, ClientKind::Cli)
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientKind::Cli => write!(f, "cli"),
            ClientKind::Web => write!(f, "web"),
            ClientKind::Desktop => write!(f, "desktop"),
        }
    }
}

impl FromStr for ClientKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cli" => Ok(ClientKind::Cli),
            "web" => Ok(ClientKind::Web),
            "desktop" => Ok(ClientKind::Desktop),
            _ => Err(format!("Unknown client kind: {}", s)),
        }
    }
}

/// Progress or status notice carried in AGENT_STATUS frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusNotice {
    /// Greeting sent right after accept
    Welcome { session_id: String },
    Thinking {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    ToolCall { tool: String },
    Generating,
    /// A streamed chat reply follows
    StreamStart,
    ModelSwitched { model: String },
    UploadComplete { filename: String, size: u64 },
    Info { message: String },
    Error { message: String },
    TransferFailed { filename: String, reason: String },
    /// Free-form status text (anything that is not one of the tagged kinds)
    #[serde(skip)]
    Plain(String),
}

impl StatusNotice {
    pub fn info(message: impl Into<String>) -> Self {
        StatusNotice::Info {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StatusNotice::Error {
            message: message.into(),
        }
    }

    /// Encode for the wire; plain notices are sent as raw text
    pub fn to_body(&self) -> Vec<u8> {
        match self {
            StatusNotice::Plain(text) => text.as_bytes().to_vec(),
            // Serializing a plain enum of strings cannot fail
            other => serde_json::to_vec(other).unwrap_or_default(),
        }
    }

    /// Decode a received body, falling back to plain text
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body)
            .unwrap_or_else(|_| StatusNotice::Plain(String::from_utf8_lossy(body).into_owned()))
    }
}

/// DOWNLOAD_OFFER payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadOffer {
    pub filename: String,
    pub size: u64,
    /// Hex SHA-256 of the whole file
    pub checksum: String,
    pub token: TransferToken,
    /// RDT endpoint the packets come from
    pub host: String,
    pub port: u16,
}

/// FILE_METADATA payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub filename: String,
    pub size: u64,
}

/// MODEL_SWITCH payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSwitchRequest {
    pub model: String,
}

/// HISTORY request payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// One line of conversation history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: String,
    pub content: String,
    /// RFC 3339 timestamp
    pub timestamp: String,
}

/// SESSION_SWITCH / SESSION_DELETE payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRef {
    pub session_id: String,
}

/// SESSION_NEW payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewConversation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// SESSION_LIST reply entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub session_id: String,
    pub name: String,
    pub message_count: usize,
    pub created_at: String,
    /// Whether this is the requesting connection's current conversation
    #[serde(default)]
    pub current: bool,
}

/// UDP_REGISTER payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpRegistration {
    pub udp_port: u16,
    #[serde(default)]
    pub client_kind: ClientKind,
}
