//! NPLT stream codec and multi-frame body assembly
//!
//! [`NpltCodec`] turns a TCP byte stream into frames. A frame whose header is
//! well formed but whose type tag is unknown is consumed and surfaced as an
//! item-level error, so the stream stays usable: framing errors reject a
//! single frame, they never close the connection.

use std::collections::{HashMap, HashSet};

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ParleyError, Result};
use crate::protocol::{
    nplt::{FrameHeader, MessageType, NpltMessage},
    MAX_ASSEMBLED_BODY, NPLT_HEADER_SIZE,
};

/// Codec for encoding and decoding NPLT frames
#[derive(Debug, Clone, Default)]
pub struct NpltCodec {
    _priv: (),
}

impl NpltCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for NpltCodec {
    /// A decoded frame, or the reason a single frame was rejected
    type Item = Result<NpltMessage>;
    type Error = ParleyError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < NPLT_HEADER_SIZE {
            return Ok(None);
        }

        let header = FrameHeader::decode(&src[..NPLT_HEADER_SIZE])?;
        let total = header.frame_len();
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(NPLT_HEADER_SIZE);
        let data = src.split_to(header.length as usize).freeze();

        let item = MessageType::try_from(header.raw_type).map(|message_type| NpltMessage {
            message_type,
            seq: header.seq,
            data,
        });
        Ok(Some(item))
    }
}

impl Encoder<NpltMessage> for NpltCodec {
    type Error = ParleyError;

    fn encode(&mut self, item: NpltMessage, dst: &mut BytesMut) -> Result<()> {
        item.encode_into(dst)
    }
}

/// Accumulates multi-frame message bodies per message type.
///
/// Frames of a type append to that type's body until an empty frame of the
/// same type arrives; the completed body is then returned. FILE_DATA frames
/// are passed through untouched.
#[derive(Debug)]
pub struct MessageAssembler {
    pending: HashMap<MessageType, BytesMut>,
    /// Types whose current body overflowed; frames are dropped until its terminator
    discarding: HashSet<MessageType>,
    max_body: usize,
}

impl MessageAssembler {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            discarding: HashSet::new(),
            max_body: MAX_ASSEMBLED_BODY,
        }
    }

    /// Create an assembler with a custom body limit
    pub fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Feed one frame. Returns the complete body once its terminator arrives.
    ///
    /// A body that outgrows the limit is reported once and then dropped as a
    /// whole: its remaining frames and its terminator produce nothing, and the
    /// frame after that terminator starts a fresh body.
    pub fn push(&mut self, msg: NpltMessage) -> Result<Option<(MessageType, Bytes)>> {
        let message_type = msg.message_type;
        if !message_type.is_multi_frame() {
            return Ok(Some((message_type, msg.data)));
        }

        if self.discarding.contains(&message_type) {
            if msg.is_terminator() {
                self.discarding.remove(&message_type);
            }
            return Ok(None);
        }

        if msg.is_terminator() {
            let body = self.pending.remove(&message_type).unwrap_or_default();
            return Ok(Some((message_type, body.freeze())));
        }

        let body = self.pending.entry(message_type).or_default();
        if body.len() + msg.data.len() > self.max_body {
            let size = body.len() + msg.data.len();
            self.pending.remove(&message_type);
            self.discarding.insert(message_type);
            return Err(ParleyError::FrameTooLarge {
                size,
                max: self.max_body,
            });
        }
        body.extend_from_slice(&msg.data);
        Ok(None)
    }

    /// Whether a body of this type is partially received
    pub fn is_pending(&self, message_type: MessageType) -> bool {
        self.pending.contains_key(&message_type)
    }

    /// Whether the rest of an oversized body of this type is being dropped
    pub fn is_discarding(&self, message_type: MessageType) -> bool {
        self.discarding.contains(&message_type)
    }
}

impl Default for MessageAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::nplt::body_frames;

    #[test]
    fn test_codec_roundtrip() {
        let mut codec = NpltCodec::new();
        let mut buf = BytesMut::new();

        let msg = NpltMessage::new(MessageType::ModelSwitch, r#"{"model":"m"}"#).with_seq(42);
        codec.encode(msg.clone(), &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(decoded, msg);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = NpltCodec::new();
        let mut full = BytesMut::new();
        codec
            .encode(NpltMessage::new(MessageType::Chat, "hello"), &mut full)
            .unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&full[..3]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[3..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[6..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(&msg.data[..], b"hello");
    }

    #[test]
    fn test_unknown_type_rejects_only_that_frame() {
        let mut codec = NpltCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0xEE, 0x00, 0x01, 0x02, b'x', b'y']);
        codec
            .encode(NpltMessage::new(MessageType::Chat, "ok"), &mut buf)
            .unwrap();

        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(first, Err(ParleyError::InvalidMessageType(0xEE))));

        let second = codec.decode(&mut buf).unwrap().unwrap().unwrap();
        assert_eq!(second.text(), "ok");
    }

    #[test]
    fn test_encoder_rejects_oversize() {
        let mut codec = NpltCodec::new();
        let mut buf = BytesMut::new();
        let result = codec.encode(NpltMessage::new(MessageType::Chat, vec![0u8; 300]), &mut buf);
        assert!(matches!(result, Err(ParleyError::FrameTooLarge { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_assembler_joins_frames() {
        let body = "x".repeat(700);
        let mut assembler = MessageAssembler::new();
        let mut completed = None;
        for frame in body_frames(MessageType::History, body.as_bytes()) {
            if let Some(done) = assembler.push(frame).unwrap() {
                completed = Some(done);
            }
        }
        let (message_type, assembled) = completed.unwrap();
        assert_eq!(message_type, MessageType::History);
        assert_eq!(assembled.len(), 700);
        assert!(!assembler.is_pending(MessageType::History));
    }

    #[test]
    fn test_assembler_interleaved_types() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push(NpltMessage::new(MessageType::Chat, "ab")).unwrap().is_none());
        assert!(assembler
            .push(NpltMessage::new(MessageType::SessionList, "[1"))
            .unwrap()
            .is_none());
        assert!(assembler.push(NpltMessage::new(MessageType::Chat, "cd")).unwrap().is_none());

        let (t, body) = assembler
            .push(NpltMessage::terminator(MessageType::Chat))
            .unwrap()
            .unwrap();
        assert_eq!(t, MessageType::Chat);
        assert_eq!(&body[..], b"abcd");
        assert!(assembler.is_pending(MessageType::SessionList));
    }

    #[test]
    fn test_assembler_passes_file_data_through() {
        let mut assembler = MessageAssembler::new();
        let (t, body) = assembler
            .push(NpltMessage::new(MessageType::FileData, vec![1, 2, 3]))
            .unwrap()
            .unwrap();
        assert_eq!(t, MessageType::FileData);
        assert_eq!(&body[..], &[1, 2, 3]);
    }

    #[test]
    fn test_assembler_discards_oversized_body() {
        let mut assembler = MessageAssembler::new().with_max_body(300);
        assembler
            .push(NpltMessage::new(MessageType::Chat, vec![b'a'; 200]))
            .unwrap();
        let result = assembler.push(NpltMessage::new(MessageType::Chat, vec![b'a'; 200]));
        assert!(matches!(result, Err(ParleyError::FrameTooLarge { size: 400, max: 300 })));
        assert!(!assembler.is_pending(MessageType::Chat));
        assert!(assembler.is_discarding(MessageType::Chat));

        // The tail and terminator of the dropped body yield nothing
        assert!(assembler
            .push(NpltMessage::new(MessageType::Chat, vec![b'a'; 50]))
            .unwrap()
            .is_none());
        assert!(assembler
            .push(NpltMessage::terminator(MessageType::Chat))
            .unwrap()
            .is_none());
        assert!(!assembler.is_discarding(MessageType::Chat));

        // Other types are unaffected, and the next body assembles normally
        let (t, body) = assembler
            .push(NpltMessage::terminator(MessageType::SessionList))
            .unwrap()
            .unwrap();
        assert_eq!(t, MessageType::SessionList);
        assert!(body.is_empty());

        assembler.push(NpltMessage::new(MessageType::Chat, "next")).unwrap();
        let (_, body) = assembler
            .push(NpltMessage::terminator(MessageType::Chat))
            .unwrap()
            .unwrap();
        assert_eq!(&body[..], b"next");
    }
}
