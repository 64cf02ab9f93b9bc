//! Per-connection tasks
//!
//! The read loop decodes one frame at a time and dispatches complete
//! messages; the writer task drains the session's outbound queue into the
//! socket. Either side failing closes the session.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use parley_common::protocol::{MessageAssembler, HEARTBEAT_SENTINEL};
use parley_common::transport::ShutdownSignal;
use parley_common::{MessageType, NpltCodec, NpltMessage, ParleyError, Result, StatusNotice};

use crate::server::{dispatch, ServerState};
use crate::session::{Session, SessionState};

/// Why a read loop ended without an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    PeerClosed,
    /// Timeout sweep or server shutdown asked the session to close
    Requested,
    ServerShutdown,
}

pub(crate) async fn handle_connection(
    state: Arc<ServerState>,
    session: Arc<Session>,
    outbound: mpsc::UnboundedReceiver<NpltMessage>,
    stream: TcpStream,
    shutdown: ShutdownSignal,
) {
    let peer = session.peer();
    info!(session = %session.id(), %peer, "New connection");
    let _ = stream.set_nodelay(true);

    let (read_half, write_half) = stream.into_split();
    let reader = FramedRead::new(read_half, NpltCodec::new());
    let writer = FramedWrite::new(write_half, NpltCodec::new());
    let writer_task = tokio::spawn(write_loop(session.clone(), writer, outbound));

    match state.collaborators.conversations.create(None).await {
        Ok(conversation) => session.set_conversation(conversation.id),
        Err(e) => warn!(session = %session.id(), error = %e, "Could not create conversation"),
    }
    session.set_state(SessionState::Active);
    let greeting = StatusNotice::Welcome {
        session_id: session.id().to_string(),
    };

    let result = match session.send_status(&greeting) {
        Ok(()) => read_loop(&state, &session, reader, shutdown).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(reason) => {
            info!(session = %session.id(), %peer, ?reason, "Connection closed");
            session.set_state(SessionState::Disconnected);
        }
        Err(e) => {
            warn!(session = %session.id(), %peer, error = %e, "Connection failed");
            session.mark_error();
            state.registry.record_error();
        }
    }

    state.registry.unregister(&session.id());
    session.close();
    let _ = writer_task.await;
}

async fn read_loop(
    state: &ServerState,
    session: &Arc<Session>,
    mut reader: FramedRead<OwnedReadHalf, NpltCodec>,
    mut shutdown: ShutdownSignal,
) -> Result<CloseReason> {
    let heartbeat_interval = state.config.heartbeat_interval();
    let mut close = session.close_signal();
    let mut assembler = MessageAssembler::new();

    loop {
        if session.is_close_requested() {
            return Ok(CloseReason::Requested);
        }

        let next = tokio::select! {
            _ = close.changed() => continue,
            _ = shutdown.wait() => return Ok(CloseReason::ServerShutdown),
            next = tokio::time::timeout(heartbeat_interval, reader.next()) => next,
        };

        let frame = match next {
            // Quiet for a whole interval: not an error, just check liveness
            Err(_) => {
                session.set_state(SessionState::Idle);
                if session.send_idle() >= heartbeat_interval {
                    session.send_heartbeat()?;
                }
                continue;
            }
            Ok(None) => return Ok(CloseReason::PeerClosed),
            Ok(Some(Err(e))) => return Err(e),
            Ok(Some(Ok(Err(e)))) => {
                warn!(session = %session.id(), error = %e, "Rejected frame");
                continue;
            }
            Ok(Some(Ok(Ok(frame)))) => frame,
        };

        session.touch(frame.seq);
        if is_heartbeat(&frame) {
            debug!(session = %session.id(), "Heartbeat received");
            continue;
        }

        match assembler.push(frame) {
            Ok(Some((message_type, body))) => {
                debug!(session = %session.id(), ?message_type, len = body.len(), "Message received");
                dispatch::dispatch(state, session, message_type, body).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(session = %session.id(), error = %e, "Discarded oversized message");
                let _ = session.send_status(&StatusNotice::error(e.to_string()));
            }
        }
    }
}

fn is_heartbeat(frame: &NpltMessage) -> bool {
    frame.message_type == MessageType::Chat && frame.data == HEARTBEAT_SENTINEL.as_bytes()
}

async fn write_loop(
    session: Arc<Session>,
    mut writer: FramedWrite<OwnedWriteHalf, NpltCodec>,
    mut outbound: mpsc::UnboundedReceiver<NpltMessage>,
) {
    let mut close = session.close_signal();
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = writer.send(frame).await {
                    if !matches!(e, ParleyError::Io(_)) {
                        error!(session = %session.id(), error = %e, "Failed to encode frame");
                    }
                    session.mark_error();
                    return;
                }
            }
            _ = close.changed() => {
                // Flush what was queued before the close
                while let Ok(frame) = outbound.try_recv() {
                    if writer.send(frame).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
    let _ = writer.close().await;
}
