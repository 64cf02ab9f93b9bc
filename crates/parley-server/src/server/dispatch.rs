//! Message dispatch
//!
//! One handler per message type, selected by an exhaustive match. Handlers
//! reply through the session's outbound queue; a failing handler reports the
//! problem to the client as an `error` notice and the connection stays open.

use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, info, warn};

use parley_common::{
    ConversationRef, ConversationSummary, FileMetadata, HistoryRequest, MessageType,
    ModelSwitchRequest, NewConversation, ParleyError, SessionId, StatusNotice, UdpRegistration,
};

use crate::collaborators::{history_entry, ChatContext, CollaboratorError, DownloadSink, StatusSink};
use crate::server::ServerState;
use crate::session::{Session, UploadProgress};

#[derive(Debug, Error)]
enum DispatchError {
    #[error("Malformed {0:?} payload: {1}")]
    BadPayload(MessageType, String),

    #[error("{0}")]
    Rejected(String),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Protocol(#[from] ParleyError),
}

type DispatchResult = std::result::Result<(), DispatchError>;

/// Handle one complete inbound message
pub(crate) async fn dispatch(
    state: &ServerState,
    session: &Arc<Session>,
    message_type: MessageType,
    body: Bytes,
) {
    let result = match message_type {
        MessageType::Chat => handle_chat(state, session, body).await,
        MessageType::FileMetadata => handle_file_metadata(state, session, body).await,
        MessageType::FileData => handle_file_data(state, session, body).await,
        MessageType::ModelSwitch => handle_model_switch(state, session, body).await,
        MessageType::History => handle_history(state, session, body).await,
        MessageType::Clear => handle_clear(state, session).await,
        MessageType::SessionList => handle_session_list(state, session).await,
        MessageType::SessionSwitch => handle_session_switch(state, session, body).await,
        MessageType::SessionNew => handle_session_new(state, session, body).await,
        MessageType::SessionDelete => handle_session_delete(state, session, body).await,
        MessageType::UdpRegister => handle_udp_register(session, body),
        MessageType::AgentStatus | MessageType::DownloadOffer => {
            warn!(session = %session.id(), ?message_type, "Ignoring server-to-client message from client");
            Ok(())
        }
    };

    match result {
        Ok(()) => {}
        Err(DispatchError::Protocol(ParleyError::ConnectionClosed)) => {
            debug!(session = %session.id(), "Reply dropped, connection closing");
        }
        Err(e) => {
            warn!(session = %session.id(), ?message_type, error = %e, "Request failed");
            let _ = session.send_status(&StatusNotice::error(e.to_string()));
        }
    }
}

fn parse<T: DeserializeOwned>(message_type: MessageType, body: &[u8]) -> Result<T, DispatchError> {
    serde_json::from_slice(body).map_err(|e| DispatchError::BadPayload(message_type, e.to_string()))
}

/// Like [`parse`], but an empty body means "no parameters"
fn parse_or_default<T: DeserializeOwned + Default>(message_type: MessageType, body: &[u8]) -> Result<T, DispatchError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        parse(message_type, body)
    }
}

fn parse_conversation_id(message_type: MessageType, body: &[u8]) -> Result<SessionId, DispatchError> {
    let reference: ConversationRef = parse(message_type, body)?;
    reference
        .session_id
        .parse()
        .map_err(|_| DispatchError::BadPayload(message_type, format!("invalid session id {:?}", reference.session_id)))
}

// ============================================================================
// Chat
// ============================================================================

async fn handle_chat(state: &ServerState, session: &Arc<Session>, body: Bytes) -> DispatchResult {
    let text = String::from_utf8_lossy(&body).into_owned();
    if text.trim().is_empty() {
        return Ok(());
    }

    let status_session = session.clone();
    let status = StatusSink::new(move |notice| {
        let _ = status_session.send_status(&notice);
    });
    let downloads: Arc<dyn DownloadSink> = state.transfers.clone();
    let ctx = ChatContext::new(
        session.id(),
        session.conversation(),
        session.model(),
        status,
        downloads,
    );

    let mut stream = state.collaborators.chat.handle(ctx, text.clone()).await?;
    let mut reply = String::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(chunk) => {
                session.send_chat_chunk(&chunk)?;
                reply.push_str(&chunk);
            }
            Err(e) => {
                warn!(session = %session.id(), error = %e, "Chat stream failed");
                session.send_status(&StatusNotice::error(e.to_string()))?;
                break;
            }
        }
    }
    session.end_chat_reply()?;

    let conversation = session.conversation();
    let conversations = &state.collaborators.conversations;
    for entry in [history_entry("user", text), history_entry("assistant", reply)] {
        if let Err(e) = conversations.append(conversation, entry).await {
            warn!(session = %session.id(), %conversation, error = %e, "Failed to record history");
            break;
        }
    }
    Ok(())
}

// ============================================================================
// Uploads
// ============================================================================

async fn handle_file_metadata(state: &ServerState, session: &Arc<Session>, body: Bytes) -> DispatchResult {
    let metadata: FileMetadata = parse(MessageType::FileMetadata, &body)?;
    if metadata.size > state.config.max_upload_bytes {
        return Err(DispatchError::Rejected(format!(
            "Upload of {} bytes exceeds the {} byte limit",
            metadata.size, state.config.max_upload_bytes
        )));
    }

    info!(
        session = %session.id(),
        filename = %metadata.filename,
        size = metadata.size,
        "Upload started"
    );
    if let Some(previous) = session.begin_upload(metadata.filename, metadata.size) {
        warn!(
            session = %session.id(),
            filename = %previous.filename,
            received = previous.received(),
            "Unfinished upload replaced"
        );
    }

    if let Some(empty) = session.take_empty_upload() {
        store_upload(state, session, empty.filename, Bytes::new()).await?;
    }
    Ok(())
}

async fn handle_file_data(state: &ServerState, session: &Arc<Session>, body: Bytes) -> DispatchResult {
    match session.append_upload(&body) {
        UploadProgress::NoUpload => {
            warn!(session = %session.id(), len = body.len(), "FILE_DATA with no open upload");
            Ok(())
        }
        UploadProgress::Partial { received, declared } => {
            debug!(session = %session.id(), received, declared, "Upload progress");
            Ok(())
        }
        UploadProgress::Overrun { filename, declared } => Err(DispatchError::Rejected(format!(
            "Upload {} exceeded its declared size of {} bytes",
            filename, declared
        ))),
        UploadProgress::Complete { filename, data } => store_upload(state, session, filename, data).await,
    }
}

async fn store_upload(state: &ServerState, session: &Arc<Session>, filename: String, data: Bytes) -> DispatchResult {
    let stored = state
        .collaborators
        .files
        .store(session.id(), &filename, data)
        .await?;
    session.send_status(&StatusNotice::UploadComplete {
        filename: stored.filename,
        size: stored.size,
    })?;
    Ok(())
}

// ============================================================================
// Control
// ============================================================================

async fn handle_model_switch(state: &ServerState, session: &Arc<Session>, body: Bytes) -> DispatchResult {
    let request: ModelSwitchRequest = parse(MessageType::ModelSwitch, &body)?;
    // Confirmed only once the switch has actually happened
    state
        .collaborators
        .models
        .switch_model(session.id(), &request.model)
        .await?;
    session.set_model(request.model.clone());
    session.send_status(&StatusNotice::ModelSwitched { model: request.model })?;
    Ok(())
}

async fn handle_history(state: &ServerState, session: &Arc<Session>, body: Bytes) -> DispatchResult {
    let request: HistoryRequest = parse_or_default(MessageType::History, &body)?;
    let entries = state
        .collaborators
        .conversations
        .history(session.conversation(), request.limit)
        .await?;
    session.send_json(MessageType::History, &entries)?;
    Ok(())
}

async fn handle_clear(state: &ServerState, session: &Arc<Session>) -> DispatchResult {
    state
        .collaborators
        .conversations
        .clear(session.conversation())
        .await?;
    session.send_status(&StatusNotice::info("Conversation cleared"))?;
    Ok(())
}

async fn handle_session_list(state: &ServerState, session: &Arc<Session>) -> DispatchResult {
    let current = session.conversation();
    let summaries: Vec<ConversationSummary> = state
        .collaborators
        .conversations
        .list()
        .await?
        .into_iter()
        .map(|c| ConversationSummary {
            session_id: c.id.to_string(),
            name: c.name,
            message_count: c.message_count,
            created_at: c.created_at.to_rfc3339(),
            current: c.id == current,
        })
        .collect();
    session.send_json(MessageType::SessionList, &summaries)?;
    Ok(())
}

async fn handle_session_switch(state: &ServerState, session: &Arc<Session>, body: Bytes) -> DispatchResult {
    let id = parse_conversation_id(MessageType::SessionSwitch, &body)?;
    if !state.collaborators.conversations.exists(id).await {
        return Err(CollaboratorError::ConversationNotFound(id.to_string()).into());
    }
    session.set_conversation(id);
    session.send_status(&StatusNotice::info(format!("Switched to conversation {}", id)))?;
    Ok(())
}

async fn handle_session_new(state: &ServerState, session: &Arc<Session>, body: Bytes) -> DispatchResult {
    let request: NewConversation = parse_or_default(MessageType::SessionNew, &body)?;
    let created = state.collaborators.conversations.create(request.name).await?;
    session.set_conversation(created.id);
    session.send_status(&StatusNotice::info(format!(
        "Created conversation {} ({})",
        created.name, created.id
    )))?;
    Ok(())
}

async fn handle_session_delete(state: &ServerState, session: &Arc<Session>, body: Bytes) -> DispatchResult {
    let id = parse_conversation_id(MessageType::SessionDelete, &body)?;
    let conversations = &state.collaborators.conversations;
    conversations.delete(id).await?;

    if session.conversation() == id {
        let fresh = conversations.create(None).await?;
        session.set_conversation(fresh.id);
        session.send_status(&StatusNotice::info(format!(
            "Deleted current conversation; now in {}",
            fresh.id
        )))?;
    } else {
        session.send_status(&StatusNotice::info(format!("Deleted conversation {}", id)))?;
    }
    Ok(())
}

fn handle_udp_register(session: &Arc<Session>, body: Bytes) -> DispatchResult {
    let registration: UdpRegistration = parse(MessageType::UdpRegister, &body)?;
    if registration.udp_port == 0 {
        return Err(DispatchError::Rejected("UDP port 0 is not a valid endpoint".into()));
    }
    session.register_udp(registration.udp_port, registration.client_kind);
    info!(
        session = %session.id(),
        port = registration.udp_port,
        kind = %registration.client_kind,
        "Client registered RDT endpoint"
    );
    Ok(())
}
