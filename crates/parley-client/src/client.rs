//! NPLT client
//!
//! Owns the TCP connection to the server. A writer task drains an outbound
//! queue; a read task turns incoming frames into [`ClientEvent`]s; a
//! heartbeat task keeps the session alive. CLI clients also run an RDT
//! endpoint and register its port so the server can offer downloads.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use parley_common::protocol::nplt::body_frames;
use parley_common::protocol::{MessageAssembler, HEARTBEAT_SENTINEL, MAX_FRAME_DATA};
use parley_common::transport::{shutdown_channel, RdtClient, ShutdownSignal, ShutdownTrigger};
use parley_common::{
    ClientKind, ConversationRef, ConversationSummary, DownloadOffer, FileMetadata, HistoryEntry,
    HistoryRequest, MessageType, ModelSwitchRequest, NewConversation, NpltCodec, NpltMessage,
    ParleyError, Result, StatusNotice, UdpRegistration,
};

use crate::config::ClientConfig;
use crate::download::Downloads;
use crate::events::ClientEvent;

/// Connect to `addr`, trying up to `attempts` times with a fixed pause
pub async fn connect_with_retry(addr: &str, attempts: u32, backoff: Duration) -> Result<TcpStream> {
    let attempts = attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                if attempt > 1 {
                    info!("Connected to {} on attempt {}", addr, attempt);
                }
                return Ok(stream);
            }
            Err(e) if attempt < attempts => {
                warn!("Connection to {} failed ({}), retrying in {:?}", addr, e, backoff);
                tokio::time::sleep(backoff).await;
            }
            Err(e) => {
                return Err(ParleyError::ConnectionFailed(format!(
                    "{} after {} attempts: {}",
                    addr, attempt, e
                )));
            }
        }
    }
}

/// Sequence-numbering front of the writer task
#[derive(Clone)]
struct Outbound {
    next_seq: Arc<Mutex<u16>>,
    tx: mpsc::UnboundedSender<NpltMessage>,
}

impl Outbound {
    fn new(tx: mpsc::UnboundedSender<NpltMessage>) -> Self {
        Self {
            next_seq: Arc::new(Mutex::new(0)),
            tx,
        }
    }

    /// Queue frames back to back; the lock keeps their seqs contiguous
    fn push(&self, frames: impl IntoIterator<Item = NpltMessage>) -> Result<()> {
        let mut seq = self.next_seq.lock();
        for frame in frames {
            self.tx
                .send(frame.with_seq(*seq))
                .map_err(|_| ParleyError::ConnectionClosed)?;
            *seq = seq.wrapping_add(1);
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A connected NPLT client
pub struct NpltClient {
    server_addr: SocketAddr,
    kind: ClientKind,
    outbound: Outbound,
    downloads: Option<Arc<Downloads>>,
    shutdown: ShutdownTrigger,
    tasks: Vec<JoinHandle<()>>,
}

impl NpltClient {
    /// Connect, start the background tasks and register the RDT endpoint.
    ///
    /// Returns the client and the stream of events it produces.
    pub async fn connect(config: &ClientConfig) -> Result<(Self, mpsc::UnboundedReceiver<ClientEvent>)> {
        let stream = connect_with_retry(
            &config.server_addr,
            config.connect_retries,
            config.retry_backoff(),
        )
        .await?;
        let _ = stream.set_nodelay(true);
        let server_addr = stream.peer_addr()?;
        info!("Connected to parley server at {}", server_addr);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let outbound = Outbound::new(out_tx);
        let (trigger, signal) = shutdown_channel();
        let mut tasks = Vec::new();

        let (read_half, write_half) = stream.into_split();
        tasks.push(tokio::spawn(write_loop(
            FramedWrite::new(write_half, NpltCodec::new()),
            out_rx,
            signal.clone(),
        )));

        let downloads = if config.client_kind.supports_rdt() {
            let rdt = Arc::new(RdtClient::bind(config.rdt_bind_addr, config.rdt.clone()).await?);
            let endpoint = rdt.clone();
            let rdt_signal = signal.clone();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = endpoint.run(rdt_signal).await {
                    error!("RDT endpoint error: {}", e);
                }
            }));
            Some(Downloads::new(rdt, config.transfer_timeout(), events_tx.clone()))
        } else {
            None
        };

        let inbound = Inbound::new(events_tx, downloads.clone());
        tasks.push(tokio::spawn(read_loop(
            FramedRead::new(read_half, NpltCodec::new()),
            inbound,
            signal.clone(),
        )));
        tasks.push(tokio::spawn(heartbeat_loop(
            outbound.clone(),
            config.heartbeat_interval(),
            signal,
        )));

        let client = Self {
            server_addr,
            kind: config.client_kind,
            outbound,
            downloads,
            shutdown: trigger,
            tasks,
        };

        if let Some(port) = client.rdt_port() {
            client.send_json(
                MessageType::UdpRegister,
                &UdpRegistration {
                    udp_port: port,
                    client_kind: client.kind,
                },
            )?;
            debug!(udp_port = port, "Registered RDT endpoint");
        }

        Ok((client, events_rx))
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    /// Local RDT port, if this client receives files over RDT
    pub fn rdt_port(&self) -> Option<u16> {
        self.downloads
            .as_ref()
            .and_then(|d| d.rdt().local_addr().ok())
            .map(|addr| addr.port())
    }

    pub fn downloads(&self) -> Option<&Arc<Downloads>> {
        self.downloads.as_ref()
    }

    /// Whether the writer task has gone away
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    /// Send a user message
    pub fn send_chat(&self, text: &str) -> Result<()> {
        self.send_body(MessageType::Chat, text.as_bytes())
    }

    /// Announce an upload; FILE_DATA frames must follow
    pub fn send_file_metadata(&self, filename: &str, size: u64) -> Result<()> {
        self.send_json(
            MessageType::FileMetadata,
            &FileMetadata {
                filename: filename.to_string(),
                size,
            },
        )
    }

    /// Send raw upload bytes, at most 255 per frame
    pub fn send_file_data(&self, data: &[u8]) -> Result<()> {
        self.outbound.push(
            data.chunks(MAX_FRAME_DATA)
                .map(|chunk| NpltMessage::new(MessageType::FileData, Bytes::copy_from_slice(chunk))),
        )
    }

    /// FILE_METADATA followed by the whole file
    pub fn upload(&self, filename: &str, data: &[u8]) -> Result<()> {
        self.send_file_metadata(filename, data.len() as u64)?;
        self.send_file_data(data)
    }

    pub fn switch_model(&self, model: &str) -> Result<()> {
        self.send_json(
            MessageType::ModelSwitch,
            &ModelSwitchRequest {
                model: model.to_string(),
            },
        )
    }

    pub fn request_history(&self, limit: Option<usize>) -> Result<()> {
        self.send_json(MessageType::History, &HistoryRequest { limit })
    }

    pub fn clear_history(&self) -> Result<()> {
        self.send_body(MessageType::Clear, b"{}")
    }

    pub fn list_sessions(&self) -> Result<()> {
        self.send_body(MessageType::SessionList, b"{}")
    }

    pub fn switch_session(&self, session_id: &str) -> Result<()> {
        self.send_json(
            MessageType::SessionSwitch,
            &ConversationRef {
                session_id: session_id.to_string(),
            },
        )
    }

    pub fn new_session(&self, name: Option<&str>) -> Result<()> {
        self.send_json(
            MessageType::SessionNew,
            &NewConversation {
                name: name.map(str::to_string),
            },
        )
    }

    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        self.send_json(
            MessageType::SessionDelete,
            &ConversationRef {
                session_id: session_id.to_string(),
            },
        )
    }

    fn send_json<T: Serialize>(&self, message_type: MessageType, payload: &T) -> Result<()> {
        let body = serde_json::to_vec(payload)?;
        self.send_body(message_type, &body)
    }

    fn send_body(&self, message_type: MessageType, body: &[u8]) -> Result<()> {
        self.outbound.push(body_frames(message_type, body))
    }

    /// Flush queued frames and stop every background task
    pub async fn close(self) {
        self.shutdown.trigger();
        let tasks = futures::future::join_all(self.tasks);
        if tokio::time::timeout(Duration::from_secs(5), tasks).await.is_err() {
            warn!("Client tasks did not stop in time");
        }
        info!("Disconnected from {}", self.server_addr);
    }
}

impl std::fmt::Debug for NpltClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NpltClient")
            .field("server_addr", &self.server_addr)
            .field("kind", &self.kind)
            .field("rdt_port", &self.rdt_port())
            .finish()
    }
}

/// File being delivered inline over NPLT
struct InlineFile {
    filename: String,
    size: u64,
    data: BytesMut,
}

/// Read-side state: reassembly and event emission
struct Inbound {
    events: mpsc::UnboundedSender<ClientEvent>,
    downloads: Option<Arc<Downloads>>,
    assembler: MessageAssembler,
    inline: Option<InlineFile>,
}

impl Inbound {
    fn new(events: mpsc::UnboundedSender<ClientEvent>, downloads: Option<Arc<Downloads>>) -> Self {
        Self {
            events,
            downloads,
            assembler: MessageAssembler::new(),
            inline: None,
        }
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }

    fn on_frame(&mut self, frame: NpltMessage) {
        // Chat replies stream through chunk by chunk
        if frame.message_type == MessageType::Chat {
            if frame.is_terminator() {
                self.emit(ClientEvent::ReplyEnd);
            } else if frame.data == HEARTBEAT_SENTINEL.as_bytes() {
                debug!("Heartbeat received");
            } else {
                self.emit(ClientEvent::ChatChunk(frame.text()));
            }
            return;
        }

        match self.assembler.push(frame) {
            Ok(Some((message_type, body))) => self.on_message(message_type, body),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Discarded oversized message"),
        }
    }

    fn on_message(&mut self, message_type: MessageType, body: Bytes) {
        match message_type {
            MessageType::AgentStatus => {
                let notice = StatusNotice::from_body(&body);
                if let (StatusNotice::TransferFailed { filename, .. }, Some(downloads)) =
                    (&notice, &self.downloads)
                {
                    downloads.abort(filename);
                }
                self.emit(ClientEvent::from_status(notice));
            }
            MessageType::DownloadOffer => match serde_json::from_slice::<DownloadOffer>(&body) {
                Ok(offer) => match &self.downloads {
                    Some(downloads) => downloads.start(offer),
                    None => self.emit(ClientEvent::DownloadFailed {
                        filename: offer.filename,
                        reason: "rdt_unavailable".to_string(),
                    }),
                },
                Err(e) => warn!(error = %e, "Malformed download offer"),
            },
            MessageType::FileMetadata => match serde_json::from_slice::<FileMetadata>(&body) {
                Ok(meta) => self.begin_inline(meta),
                Err(e) => warn!(error = %e, "Malformed file metadata"),
            },
            MessageType::FileData => self.append_inline(&body),
            MessageType::History => match serde_json::from_slice::<Vec<HistoryEntry>>(&body) {
                Ok(entries) => self.emit(ClientEvent::History(entries)),
                Err(e) => warn!(error = %e, "Malformed history reply"),
            },
            MessageType::SessionList => {
                match serde_json::from_slice::<Vec<ConversationSummary>>(&body) {
                    Ok(list) => self.emit(ClientEvent::SessionList(list)),
                    Err(e) => warn!(error = %e, "Malformed session list"),
                }
            }
            MessageType::Chat
            | MessageType::ModelSwitch
            | MessageType::Clear
            | MessageType::SessionSwitch
            | MessageType::SessionNew
            | MessageType::SessionDelete
            | MessageType::UdpRegister => {
                warn!(?message_type, "Ignoring client-to-server message from server");
            }
        }
    }

    fn begin_inline(&mut self, meta: FileMetadata) {
        if let Some(previous) = self.inline.take() {
            warn!(filename = %previous.filename, "Inline file abandoned by a new one");
        }
        debug!(filename = %meta.filename, size = meta.size, "Inline file started");
        let capacity = meta.size.min(1024 * 1024) as usize;
        self.inline = Some(InlineFile {
            filename: meta.filename,
            size: meta.size,
            data: BytesMut::with_capacity(capacity),
        });
        self.finish_inline();
    }

    fn append_inline(&mut self, chunk: &[u8]) {
        match self.inline.as_mut() {
            Some(file) => {
                file.data.extend_from_slice(chunk);
                self.finish_inline();
            }
            None => warn!(len = chunk.len(), "FILE_DATA without FILE_METADATA"),
        }
    }

    fn finish_inline(&mut self) {
        if self
            .inline
            .as_ref()
            .is_some_and(|file| file.data.len() as u64 >= file.size)
        {
            if let Some(file) = self.inline.take() {
                if file.data.len() as u64 > file.size {
                    warn!(filename = %file.filename, "Inline file longer than announced");
                }
                self.emit(ClientEvent::FileReceived {
                    filename: file.filename,
                    data: file.data.freeze(),
                });
            }
        }
    }
}

async fn read_loop(
    mut reader: FramedRead<OwnedReadHalf, NpltCodec>,
    mut inbound: Inbound,
    mut shutdown: ShutdownSignal,
) {
    loop {
        let next = tokio::select! {
            next = reader.next() => next,
            _ = shutdown.wait() => break,
        };
        match next {
            Some(Ok(Ok(frame))) => inbound.on_frame(frame),
            Some(Ok(Err(e))) => warn!(error = %e, "Rejected frame"),
            Some(Err(e)) => {
                error!("Connection error: {}", e);
                break;
            }
            None => {
                info!("Server closed the connection");
                break;
            }
        }
    }
    inbound.emit(ClientEvent::Disconnected);
}

async fn write_loop(
    mut writer: FramedWrite<OwnedWriteHalf, NpltCodec>,
    mut outbound: mpsc::UnboundedReceiver<NpltMessage>,
    mut shutdown: ShutdownSignal,
) {
    loop {
        tokio::select! {
            biased;
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = writer.send(frame).await {
                    error!("Failed to send frame: {}", e);
                    break;
                }
            }
            _ = shutdown.wait() => {
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

async fn heartbeat_loop(outbound: Outbound, interval: Duration, mut shutdown: ShutdownSignal) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let heartbeat = NpltMessage::new(MessageType::Chat, HEARTBEAT_SENTINEL);
                if outbound.push([heartbeat]).is_err() {
                    break;
                }
            }
            _ = shutdown.wait() => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    type ServerSide = (
        FramedRead<OwnedReadHalf, NpltCodec>,
        FramedWrite<OwnedWriteHalf, NpltCodec>,
    );

    async fn fake_server(kind: ClientKind) -> (TcpListener, ClientConfig) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ClientConfig {
            server_addr: listener.local_addr().unwrap().to_string(),
            connect_retries: 1,
            rdt_bind_addr: "127.0.0.1:0".parse().unwrap(),
            client_kind: kind,
            ..ClientConfig::default()
        };
        (listener, config)
    }

    async fn accept(listener: &TcpListener) -> ServerSide {
        let (stream, _) = listener.accept().await.unwrap();
        let (r, w) = stream.into_split();
        (FramedRead::new(r, NpltCodec::new()), FramedWrite::new(w, NpltCodec::new()))
    }

    async fn next_frame(reader: &mut FramedRead<OwnedReadHalf, NpltCodec>) -> NpltMessage {
        tokio::time::timeout(Duration::from_secs(2), reader.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
            .unwrap()
    }

    /// Read frames until a whole message of a non-heartbeat type is assembled
    async fn next_message(reader: &mut FramedRead<OwnedReadHalf, NpltCodec>) -> (MessageType, Vec<NpltMessage>) {
        let mut frames = Vec::new();
        loop {
            let frame = next_frame(reader).await;
            if frame.data == HEARTBEAT_SENTINEL.as_bytes() {
                continue;
            }
            let done = frame.is_terminator() || frame.message_type == MessageType::FileData;
            let message_type = frame.message_type;
            frames.push(frame);
            if done {
                return (message_type, frames);
            }
        }
    }

    async fn send_all(writer: &mut FramedWrite<OwnedWriteHalf, NpltCodec>, frames: Vec<NpltMessage>) {
        for frame in frames {
            writer.send(frame).await.unwrap();
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_retries() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let started = std::time::Instant::now();
        let err = connect_with_retry(&addr, 3, Duration::from_millis(20)).await.unwrap_err();
        assert!(matches!(err, ParleyError::ConnectionFailed(ref msg) if msg.contains("3 attempts")));
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_cli_client_registers_udp_port() {
        let (listener, config) = fake_server(ClientKind::Cli).await;
        let (client, _events) = NpltClient::connect(&config).await.unwrap();
        let (mut reader, _writer) = accept(&listener).await;

        let (message_type, frames) = next_message(&mut reader).await;
        assert_eq!(message_type, MessageType::UdpRegister);
        let body: Vec<u8> = frames.iter().flat_map(|f| f.data.to_vec()).collect();
        let registration: UdpRegistration = serde_json::from_slice(&body).unwrap();
        assert_eq!(Some(registration.udp_port), client.rdt_port());
        assert_eq!(registration.client_kind, ClientKind::Cli);

        client.close().await;
    }

    #[tokio::test]
    async fn test_write_side_framing() {
        let (listener, config) = fake_server(ClientKind::Web).await;
        let (client, _events) = NpltClient::connect(&config).await.unwrap();
        assert_eq!(client.rdt_port(), None);
        let (mut reader, _writer) = accept(&listener).await;

        client.send_chat("hello").unwrap();
        client.upload("a.bin", &[7u8; 600]).unwrap();

        let (message_type, chat) = next_message(&mut reader).await;
        assert_eq!(message_type, MessageType::Chat);
        assert_eq!(chat[0].text(), "hello");
        assert!(chat[1].is_terminator());

        let (message_type, meta) = next_message(&mut reader).await;
        assert_eq!(message_type, MessageType::FileMetadata);
        assert!(meta.last().unwrap().is_terminator());

        let mut sizes = Vec::new();
        let mut seqs: Vec<u16> = chat.iter().chain(meta.iter()).map(|f| f.seq).collect();
        for _ in 0..3 {
            let frame = next_frame(&mut reader).await;
            assert_eq!(frame.message_type, MessageType::FileData);
            sizes.push(frame.data.len());
            seqs.push(frame.seq);
        }
        assert_eq!(sizes, vec![255, 255, 90]);
        assert!(seqs.windows(2).all(|w| w[1] == w[0] + 1));

        client.close().await;
    }

    #[tokio::test]
    async fn test_streamed_reply_and_status_events() {
        let (listener, config) = fake_server(ClientKind::Web).await;
        let (client, mut events) = NpltClient::connect(&config).await.unwrap();
        let (_reader, mut writer) = accept(&listener).await;

        let welcome = StatusNotice::Welcome { session_id: "s-1".into() };
        let mut frames = body_frames(MessageType::AgentStatus, &welcome.to_body());
        frames.extend(body_frames(MessageType::AgentStatus, &StatusNotice::StreamStart.to_body()));
        frames.push(NpltMessage::new(MessageType::Chat, "hel"));
        frames.push(NpltMessage::new(MessageType::Chat, HEARTBEAT_SENTINEL));
        frames.push(NpltMessage::new(MessageType::Chat, "lo"));
        frames.push(NpltMessage::terminator(MessageType::Chat));
        frames.extend(body_frames(MessageType::History, br#"[{"role":"user","content":"hi","timestamp":"t"}]"#));
        send_all(&mut writer, frames).await;

        assert_eq!(next_event(&mut events).await, ClientEvent::Welcome { session_id: "s-1".into() });
        assert_eq!(next_event(&mut events).await, ClientEvent::Status(StatusNotice::StreamStart));
        assert_eq!(next_event(&mut events).await, ClientEvent::ChatChunk("hel".into()));
        assert_eq!(next_event(&mut events).await, ClientEvent::ChatChunk("lo".into()));
        assert_eq!(next_event(&mut events).await, ClientEvent::ReplyEnd);
        match next_event(&mut events).await {
            ClientEvent::History(entries) => assert_eq!(entries[0].content, "hi"),
            other => panic!("unexpected event: {:?}", other),
        }

        drop(writer);
        drop(_reader);
        assert_eq!(next_event(&mut events).await, ClientEvent::Disconnected);
        client.close().await;
    }

    #[tokio::test]
    async fn test_inline_file_received() {
        let (listener, config) = fake_server(ClientKind::Web).await;
        let (client, mut events) = NpltClient::connect(&config).await.unwrap();
        let (_reader, mut writer) = accept(&listener).await;

        let data: Vec<u8> = (0..300u32).map(|i| i as u8).collect();
        let meta = serde_json::to_vec(&FileMetadata { filename: "x.bin".into(), size: 300 }).unwrap();
        let mut frames = body_frames(MessageType::FileMetadata, &meta);
        frames.push(NpltMessage::new(MessageType::FileData, Bytes::copy_from_slice(&data[..255])));
        frames.push(NpltMessage::new(MessageType::FileData, Bytes::copy_from_slice(&data[255..])));
        send_all(&mut writer, frames).await;

        match next_event(&mut events).await {
            ClientEvent::FileReceived { filename, data: received } => {
                assert_eq!(filename, "x.bin");
                assert_eq!(received.as_ref(), data.as_slice());
            }
            other => panic!("unexpected event: {:?}", other),
        }
        client.close().await;
    }

    #[tokio::test]
    async fn test_offer_without_rdt_endpoint_fails() {
        let (listener, config) = fake_server(ClientKind::Web).await;
        let (client, mut events) = NpltClient::connect(&config).await.unwrap();
        let (_reader, mut writer) = accept(&listener).await;

        let offer = DownloadOffer {
            filename: "big.iso".into(),
            size: 10,
            checksum: "00".into(),
            token: parley_common::TransferToken(5),
            host: "127.0.0.1".into(),
            port: 9998,
        };
        send_all(
            &mut writer,
            body_frames(MessageType::DownloadOffer, &serde_json::to_vec(&offer).unwrap()),
        )
        .await;

        assert_eq!(
            next_event(&mut events).await,
            ClientEvent::DownloadFailed {
                filename: "big.iso".into(),
                reason: "rdt_unavailable".into()
            }
        );
        client.close().await;
    }

    #[tokio::test]
    async fn test_heartbeats_sent() {
        let (listener, mut config) = fake_server(ClientKind::Web).await;
        config.heartbeat_interval_ms = 30;
        let (client, _events) = NpltClient::connect(&config).await.unwrap();
        let (mut reader, _writer) = accept(&listener).await;

        let frame = next_frame(&mut reader).await;
        assert_eq!(frame.message_type, MessageType::Chat);
        assert_eq!(frame.text(), HEARTBEAT_SENTINEL);
        client.close().await;
    }
}
