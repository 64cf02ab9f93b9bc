//! NPLT message definitions
//!
//! One NPLT message is a 4-byte header followed by at most 255 bytes of data.
//! Encoding and decoding here are pure transforms; stream reassembly lives in
//! [`super::codec`].

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ParleyError, Result};
use crate::protocol::{HEARTBEAT_SENTINEL, MAX_FRAME_DATA, NPLT_HEADER_SIZE};

/// Message type discriminator
///
/// Using explicit u8 values for wire compatibility between client and server
/// builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Chat text (streamed; empty frame terminates, `HEARTBEAT` is a sentinel)
    Chat = 0x01,
    /// Agent status / progress notice
    AgentStatus = 0x02,
    /// Server offers a file over RDT
    DownloadOffer = 0x03,
    /// Opens a file transfer over NPLT
    FileMetadata = 0x04,
    /// Raw file bytes for an open transfer
    FileData = 0x05,
    /// Switch the language model
    ModelSwitch = 0x06,
    /// Conversation history request / reply
    History = 0x07,
    /// Clear the current conversation
    Clear = 0x08,
    /// List conversations
    SessionList = 0x09,
    /// Switch to another conversation
    SessionSwitch = 0x0A,
    /// Start a new conversation
    SessionNew = 0x0B,
    /// Delete a conversation
    SessionDelete = 0x0C,
    /// Client registers its RDT (UDP) port
    UdpRegister = 0x0D,
}

impl MessageType {
    /// Every known message type, in tag order
    pub const ALL: [MessageType; 13] = [
        MessageType::Chat,
        MessageType::AgentStatus,
        MessageType::DownloadOffer,
        MessageType::FileMetadata,
        MessageType::FileData,
        MessageType::ModelSwitch,
        MessageType::History,
        MessageType::Clear,
        MessageType::SessionList,
        MessageType::SessionSwitch,
        MessageType::SessionNew,
        MessageType::SessionDelete,
        MessageType::UdpRegister,
    ];

    /// Whether bodies of this type span frames up to an empty terminator.
    /// FILE_DATA is raw and bounded by the declared file size instead.
    pub fn is_multi_frame(self) -> bool {
        !matches!(self, MessageType::FileData)
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ParleyError;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageType::Chat),
            0x02 => Ok(MessageType::AgentStatus),
            0x03 => Ok(MessageType::DownloadOffer),
            0x04 => Ok(MessageType::FileMetadata),
            0x05 => Ok(MessageType::FileData),
            0x06 => Ok(MessageType::ModelSwitch),
            0x07 => Ok(MessageType::History),
            0x08 => Ok(MessageType::Clear),
            0x09 => Ok(MessageType::SessionList),
            0x0A => Ok(MessageType::SessionSwitch),
            0x0B => Ok(MessageType::SessionNew),
            0x0C => Ok(MessageType::SessionDelete),
            0x0D => Ok(MessageType::UdpRegister),
            _ => Err(ParleyError::InvalidMessageType(value)),
        }
    }
}

/// Decoded NPLT header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Raw type tag (validated separately so unknown tags can be skipped)
    pub raw_type: u8,
    pub seq: u16,
    pub length: u8,
}

impl FrameHeader {
    /// Decode a header from the first 4 bytes of `buf`
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < NPLT_HEADER_SIZE {
            return Err(ParleyError::Truncated {
                expected: NPLT_HEADER_SIZE,
                actual: buf.len(),
            });
        }
        Ok(Self {
            raw_type: buf[0],
            seq: u16::from_be_bytes([buf[1], buf[2]]),
            length: buf[3],
        })
    }

    /// Total frame length including the header
    pub fn frame_len(&self) -> usize {
        NPLT_HEADER_SIZE + self.length as usize
    }
}

/// A single NPLT frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NpltMessage {
    pub message_type: MessageType,
    /// Sender-side sequence number, wraps mod 65536
    pub seq: u16,
    pub data: Bytes,
}

impl NpltMessage {
    /// Create a message with sequence number 0; senders stamp the real
    /// sequence just before the frame hits the wire.
    pub fn new(message_type: MessageType, data: impl Into<Bytes>) -> Self {
        Self {
            message_type,
            seq: 0,
            data: data.into(),
        }
    }

    /// An empty frame, used as the end-of-message terminator
    pub fn terminator(message_type: MessageType) -> Self {
        Self::new(message_type, Bytes::new())
    }

    pub fn with_seq(mut self, seq: u16) -> Self {
        self.seq = seq;
        self
    }

    /// True for an empty frame
    pub fn is_terminator(&self) -> bool {
        self.data.is_empty()
    }

    /// `seq` is always in range for a u16, so only the payload bound can fail
    pub fn validate(&self) -> Result<()> {
        if self.data.len() > MAX_FRAME_DATA {
            return Err(ParleyError::FrameTooLarge {
                size: self.data.len(),
                max: MAX_FRAME_DATA,
            });
        }
        Ok(())
    }

    /// Append the encoded frame to `dst`. Nothing is written on error.
    pub fn encode_into(&self, dst: &mut BytesMut) -> Result<()> {
        self.validate()?;
        dst.reserve(NPLT_HEADER_SIZE + self.data.len());
        dst.put_u8(self.message_type as u8);
        dst.put_u16(self.seq);
        dst.put_u8(self.data.len() as u8);
        dst.put_slice(&self.data);
        Ok(())
    }

    /// Encode to a standalone buffer
    pub fn encode(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(NPLT_HEADER_SIZE + self.data.len());
        self.encode_into(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode exactly one frame; `buf` must hold the header and precisely the
    /// declared number of data bytes.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let header = FrameHeader::decode(buf)?;
        let available = buf.len() - NPLT_HEADER_SIZE;
        if available != header.length as usize {
            return Err(ParleyError::LengthMismatch {
                declared: header.length as usize,
                actual: available,
            });
        }
        let message_type = MessageType::try_from(header.raw_type)?;
        Ok(Self {
            message_type,
            seq: header.seq,
            data: Bytes::copy_from_slice(&buf[NPLT_HEADER_SIZE..]),
        })
    }

    /// Payload as UTF-8 text (lossy)
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Split a message body into frame-sized chunks.
///
/// Text bodies are cut on UTF-8 character boundaries so every chunk decodes
/// on its own; other bodies are cut every 255 bytes.
pub fn split_body(body: &[u8]) -> Vec<Bytes> {
    let mut chunks = Vec::with_capacity(body.len() / MAX_FRAME_DATA + 1);
    match std::str::from_utf8(body) {
        Ok(text) => {
            let mut start = 0;
            while start < text.len() {
                let mut end = (start + MAX_FRAME_DATA).min(text.len());
                while !text.is_char_boundary(end) {
                    end -= 1;
                }
                chunks.push(Bytes::copy_from_slice(&body[start..end]));
                start = end;
            }
        }
        Err(_) => {
            for chunk in body.chunks(MAX_FRAME_DATA) {
                chunks.push(Bytes::copy_from_slice(chunk));
            }
        }
    }
    chunks
}

/// Like [`split_body`], for CHAT text.
///
/// A chunk that reads exactly as the heartbeat sentinel is cut in two, so
/// receivers never drop it as a heartbeat.
pub fn split_chat(text: &[u8]) -> Vec<Bytes> {
    let mut chunks = Vec::new();
    for chunk in split_body(text) {
        if chunk == HEARTBEAT_SENTINEL.as_bytes() {
            let mid = chunk.len() / 2;
            chunks.push(chunk.slice(..mid));
            chunks.push(chunk.slice(mid..));
        } else {
            chunks.push(chunk);
        }
    }
    chunks
}

/// Frames for a complete multi-frame message: body chunks plus terminator
pub fn body_frames(message_type: MessageType, body: &[u8]) -> Vec<NpltMessage> {
    let chunks = match message_type {
        MessageType::Chat => split_chat(body),
        _ => split_body(body),
    };
    let mut frames: Vec<NpltMessage> = chunks
        .into_iter()
        .map(|chunk| NpltMessage::new(message_type, chunk))
        .collect();
    frames.push(NpltMessage::terminator(message_type));
    frames
}
