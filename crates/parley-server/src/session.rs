//! NPLT session state
//!
//! A [`Session`] is the server's view of one accepted connection. The
//! connection task owns the read half; everything else (dispatch handlers,
//! sweeps, download offers) writes through [`Session::send`], which assigns
//! sequence numbers and queues frames for the connection's writer task.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use parley_common::protocol::nplt::{body_frames, split_body, split_chat};
use parley_common::protocol::HEARTBEAT_SENTINEL;
use parley_common::{ClientKind, MessageType, NpltMessage, ParleyError, Result, SessionId, StatusNotice};

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, greeting not yet sent
    Connecting,
    Active,
    /// No inbound traffic for a heartbeat interval
    Idle,
    /// I/O failure; cleanup pending
    Error,
    Disconnected,
}

impl SessionState {
    pub fn is_closed(self) -> bool {
        matches!(self, SessionState::Error | SessionState::Disconnected)
    }
}

/// An upload opened by FILE_METADATA and fed by FILE_DATA
#[derive(Debug)]
pub struct UploadState {
    pub filename: String,
    pub declared_size: u64,
    pub data: BytesMut,
}

impl UploadState {
    pub fn new(filename: String, declared_size: u64) -> Self {
        Self {
            filename,
            // Declared size is untrusted; preallocate at most 1 MiB
            data: BytesMut::with_capacity(declared_size.min(1 << 20) as usize),
            declared_size,
        }
    }

    pub fn received(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn is_complete(&self) -> bool {
        self.received() >= self.declared_size
    }
}

/// Result of feeding a FILE_DATA chunk
#[derive(Debug)]
pub enum UploadProgress {
    /// No upload is open
    NoUpload,
    Partial { received: u64, declared: u64 },
    /// Declared size reached; the upload state has been cleared
    Complete { filename: String, data: Bytes },
    /// More bytes than declared; the upload was aborted
    Overrun { filename: String, declared: u64 },
}

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    last_heartbeat: Instant,
    last_sent: Instant,
    send_seq: u16,
    last_recv_seq: Option<u16>,
    upload: Option<UploadState>,
    client_kind: ClientKind,
    udp_port: Option<u16>,
    conversation: SessionId,
    model: String,
}

/// Server-side state for one NPLT connection
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    inner: Mutex<SessionInner>,
    outbound: mpsc::UnboundedSender<NpltMessage>,
    close: watch::Sender<bool>,
}

impl Session {
    /// Create a session and the queue its writer task drains
    pub fn new(
        peer: SocketAddr,
        conversation: SessionId,
        model: String,
    ) -> (Self, mpsc::UnboundedReceiver<NpltMessage>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let (close, _) = watch::channel(false);
        let now = Instant::now();
        let session = Self {
            id: SessionId::new(),
            peer,
            connected_at: Utc::now(),
            inner: Mutex::new(SessionInner {
                state: SessionState::Connecting,
                last_heartbeat: now,
                last_sent: now,
                send_seq: 0,
                last_recv_seq: None,
                upload: None,
                client_kind: ClientKind::default(),
                udp_port: None,
                conversation,
                model,
            }),
            outbound,
            close,
        };
        (session, rx)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Move to a new state. Closed states are terminal.
    pub fn set_state(&self, state: SessionState) {
        let mut inner = self.inner.lock();
        if !inner.state.is_closed() {
            inner.state = state;
        }
    }

    pub fn client_kind(&self) -> ClientKind {
        self.inner.lock().client_kind
    }

    pub fn udp_port(&self) -> Option<u16> {
        self.inner.lock().udp_port
    }

    /// Record the client's RDT endpoint port and kind
    pub fn register_udp(&self, port: u16, kind: ClientKind) {
        let mut inner = self.inner.lock();
        inner.udp_port = Some(port);
        inner.client_kind = kind;
    }

    /// Address RDT packets for this client go to, if it can receive them
    pub fn rdt_peer(&self) -> Option<SocketAddr> {
        let inner = self.inner.lock();
        match (inner.client_kind.supports_rdt(), inner.udp_port) {
            (true, Some(port)) => Some(SocketAddr::new(self.peer.ip(), port)),
            _ => None,
        }
    }

    pub fn conversation(&self) -> SessionId {
        self.inner.lock().conversation
    }

    pub fn set_conversation(&self, conversation: SessionId) {
        self.inner.lock().conversation = conversation;
    }

    pub fn model(&self) -> String {
        self.inner.lock().model.clone()
    }

    pub fn set_model(&self, model: impl Into<String>) {
        self.inner.lock().model = model.into();
    }

    // =========================================================================
    // Liveness
    // =========================================================================

    /// Record inbound traffic with sequence `seq`
    pub fn touch(&self, seq: u16) {
        let mut inner = self.inner.lock();
        inner.last_heartbeat = Instant::now();
        if let Some(last) = inner.last_recv_seq {
            let expected = last.wrapping_add(1);
            if seq != expected {
                debug!(session = %self.id, expected, got = seq, "Inbound sequence gap");
            }
        }
        inner.last_recv_seq = Some(seq);
        if inner.state == SessionState::Idle {
            inner.state = SessionState::Active;
        }
    }

    /// Time since the last inbound frame
    pub fn heartbeat_age(&self) -> Duration {
        self.inner.lock().last_heartbeat.elapsed()
    }

    /// Time since the last outbound frame
    pub fn send_idle(&self) -> Duration {
        self.inner.lock().last_sent.elapsed()
    }

    #[cfg(test)]
    pub(crate) fn backdate_heartbeat(&self, by: Duration) {
        let mut inner = self.inner.lock();
        if let Some(earlier) = inner.last_heartbeat.checked_sub(by) {
            inner.last_heartbeat = earlier;
        }
    }

    // =========================================================================
    // Uploads
    // =========================================================================

    /// Open an upload, replacing any unfinished one
    pub fn begin_upload(&self, filename: String, size: u64) -> Option<UploadState> {
        self.inner
            .lock()
            .upload
            .replace(UploadState::new(filename, size))
    }

    pub fn has_upload(&self) -> bool {
        self.inner.lock().upload.is_some()
    }

    /// Append a FILE_DATA chunk to the open upload
    pub fn append_upload(&self, chunk: &[u8]) -> UploadProgress {
        let mut inner = self.inner.lock();
        let Some(upload) = inner.upload.as_mut() else {
            return UploadProgress::NoUpload;
        };

        if upload.received() + chunk.len() as u64 > upload.declared_size {
            let declared = upload.declared_size;
            let filename = std::mem::take(&mut upload.filename);
            inner.upload = None;
            return UploadProgress::Overrun { filename, declared };
        }

        upload.data.extend_from_slice(chunk);
        if upload.is_complete() {
            let Some(upload) = inner.upload.take() else {
                return UploadProgress::NoUpload;
            };
            return UploadProgress::Complete {
                filename: upload.filename,
                data: upload.data.freeze(),
            };
        }
        UploadProgress::Partial {
            received: upload.received(),
            declared: upload.declared_size,
        }
    }

    /// Take a zero-length upload that completes as soon as it is opened
    pub fn take_empty_upload(&self) -> Option<UploadState> {
        let mut inner = self.inner.lock();
        if inner.upload.as_ref().is_some_and(|u| u.declared_size == 0) {
            inner.upload.take()
        } else {
            None
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    /// Queue frames for the writer task, numbering them in queue order
    fn enqueue(&self, frames: Vec<NpltMessage>) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.state.is_closed() {
            return Err(ParleyError::ConnectionClosed);
        }
        for frame in frames {
            let seq = inner.send_seq;
            inner.send_seq = seq.wrapping_add(1);
            self.outbound
                .send(frame.with_seq(seq))
                .map_err(|_| ParleyError::ConnectionClosed)?;
        }
        inner.last_sent = Instant::now();
        Ok(())
    }

    /// Send a complete message, split across frames with a terminator
    pub fn send(&self, message_type: MessageType, body: &[u8]) -> Result<()> {
        if message_type.is_multi_frame() {
            self.enqueue(body_frames(message_type, body))
        } else {
            self.enqueue(
                split_body(body)
                    .into_iter()
                    .map(|chunk| NpltMessage::new(message_type, chunk))
                    .collect(),
            )
        }
    }

    /// Serialize `payload` as JSON and send it
    pub fn send_json<T: serde::Serialize>(&self, message_type: MessageType, payload: &T) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.send(message_type, &body)
    }

    pub fn send_status(&self, notice: &StatusNotice) -> Result<()> {
        self.send(MessageType::AgentStatus, &notice.to_body())
    }

    /// Send one piece of a streamed chat reply (no terminator)
    pub fn send_chat_chunk(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        self.enqueue(
            split_chat(text.as_bytes())
                .into_iter()
                .map(|chunk| NpltMessage::new(MessageType::Chat, chunk))
                .collect(),
        )
    }

    /// End a streamed chat reply
    pub fn end_chat_reply(&self) -> Result<()> {
        self.enqueue(vec![NpltMessage::terminator(MessageType::Chat)])
    }

    pub fn send_heartbeat(&self) -> Result<()> {
        self.enqueue(vec![NpltMessage::new(
            MessageType::Chat,
            Bytes::from_static(HEARTBEAT_SENTINEL.as_bytes()),
        )])
    }

    // =========================================================================
    // Close
    // =========================================================================

    /// Receiver that flips to `true` when the session should close
    pub fn close_signal(&self) -> watch::Receiver<bool> {
        self.close.subscribe()
    }

    /// Ask the connection task to shut down
    pub fn close(&self) {
        let _ = self.close.send(true);
    }

    pub fn is_close_requested(&self) -> bool {
        *self.close.borrow()
    }

    /// Mark the session failed and signal close
    pub fn mark_error(&self) {
        self.inner.lock().state = SessionState::Error;
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Session, mpsc::UnboundedReceiver<NpltMessage>) {
        Session::new(
            "127.0.0.1:5555".parse().unwrap(),
            SessionId::new(),
            "echo-small".into(),
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<NpltMessage>) -> Vec<NpltMessage> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_send_assigns_increasing_seq() {
        let (session, mut rx) = session();
        session.send(MessageType::Chat, &[b'a'; 600]).unwrap();
        session.send_heartbeat().unwrap();

        let frames = drain(&mut rx);
        // 600 bytes = 3 chunks + terminator, then the heartbeat
        assert_eq!(frames.len(), 5);
        let seqs: Vec<u16> = frames.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2, 3, 4]);
        assert!(frames[3].is_terminator());
        assert_eq!(&frames[4].data[..], HEARTBEAT_SENTINEL.as_bytes());
    }

    #[test]
    fn test_reply_word_matching_sentinel_is_split() {
        let (session, mut rx) = session();
        session.send_chat_chunk("HEARTBEAT").unwrap();
        session.end_chat_reply().unwrap();

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.data != HEARTBEAT_SENTINEL.as_bytes()));
        assert_eq!(format!("{}{}", frames[0].text(), frames[1].text()), "HEARTBEAT");
        assert!(frames[2].is_terminator());
    }

    #[test]
    fn test_send_seq_wraps() {
        let (session, mut rx) = session();
        session.inner.lock().send_seq = u16::MAX;
        session.send_heartbeat().unwrap();
        session.send_heartbeat().unwrap();
        let seqs: Vec<u16> = drain(&mut rx).iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![u16::MAX, 0]);
    }

    #[test]
    fn test_file_data_has_no_terminator() {
        let (session, mut rx) = session();
        session.send(MessageType::FileData, &[0u8; 300]).unwrap();
        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| !f.is_terminator()));
    }

    #[test]
    fn test_closed_session_refuses_sends() {
        let (session, _rx) = session();
        session.mark_error();
        assert!(session.is_close_requested());
        assert!(matches!(
            session.send_heartbeat(),
            Err(ParleyError::ConnectionClosed)
        ));
        session.set_state(SessionState::Active);
        assert_eq!(session.state(), SessionState::Error);
    }

    #[test]
    fn test_upload_completes_at_declared_size() {
        let (session, _rx) = session();
        session.begin_upload("notes.txt".into(), 10);

        assert!(matches!(
            session.append_upload(b"hello"),
            UploadProgress::Partial { received: 5, declared: 10 }
        ));
        match session.append_upload(b"world") {
            UploadProgress::Complete { filename, data } => {
                assert_eq!(filename, "notes.txt");
                assert_eq!(&data[..], b"helloworld");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!session.has_upload());
    }

    #[test]
    fn test_upload_overrun_aborts() {
        let (session, _rx) = session();
        session.begin_upload("a".into(), 3);
        assert!(matches!(
            session.append_upload(b"abcd"),
            UploadProgress::Overrun { declared: 3, .. }
        ));
        assert!(!session.has_upload());
    }

    #[test]
    fn test_file_data_without_metadata() {
        let (session, _rx) = session();
        assert!(matches!(session.append_upload(b"x"), UploadProgress::NoUpload));
    }

    #[test]
    fn test_rdt_peer_requires_cli_and_port() {
        let (session, _rx) = session();
        assert!(session.rdt_peer().is_none());

        session.register_udp(7000, ClientKind::Web);
        assert!(session.rdt_peer().is_none());

        session.register_udp(7000, ClientKind::Cli);
        assert_eq!(session.rdt_peer().unwrap(), "127.0.0.1:7000".parse().unwrap());
    }

    #[test]
    fn test_touch_reactivates_idle_session() {
        let (session, _rx) = session();
        session.set_state(SessionState::Idle);
        session.touch(0);
        assert_eq!(session.state(), SessionState::Active);
    }
}
