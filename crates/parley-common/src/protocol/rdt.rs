//! RDT packet definitions
//!
//! Data packets carry up to 1024 payload bytes behind a 4-byte header; ACKs are
//! the bare header. Both checksums are computed over the big-endian sequence
//! number followed by the payload (empty for ACKs).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ParleyError, Result};
use crate::protocol::{checksum::internet_checksum, ACK_SIZE, MAX_DATA_LENGTH, RDT_HEADER_SIZE};

/// One RDT data unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdtPacket {
    pub seq: u16,
    pub checksum: u16,
    pub data: Bytes,
}

impl RdtPacket {
    /// Build a packet with a freshly computed checksum
    pub fn new(seq: u16, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if data.len() > MAX_DATA_LENGTH {
            return Err(ParleyError::PacketTooLarge {
                size: data.len(),
                max: MAX_DATA_LENGTH,
            });
        }
        let checksum = Self::compute_checksum(seq, &data);
        Ok(Self { seq, checksum, data })
    }

    /// Checksum over `seq ∥ data`
    pub fn compute_checksum(seq: u16, data: &[u8]) -> u16 {
        internet_checksum(&[&seq.to_be_bytes(), data])
    }

    /// Serialize to wire format. Nothing is produced for an oversize payload.
    pub fn encode(&self) -> Result<Bytes> {
        if self.data.len() > MAX_DATA_LENGTH {
            return Err(ParleyError::PacketTooLarge {
                size: self.data.len(),
                max: MAX_DATA_LENGTH,
            });
        }
        let mut buf = BytesMut::with_capacity(RDT_HEADER_SIZE + self.data.len());
        buf.put_u16(self.seq);
        buf.put_u16(self.checksum);
        buf.put_slice(&self.data);
        Ok(buf.freeze())
    }

    /// Parse a datagram. The checksum is not checked here; see [`Self::validate`].
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < RDT_HEADER_SIZE {
            return Err(ParleyError::Truncated {
                expected: RDT_HEADER_SIZE,
                actual: buf.len(),
            });
        }
        let payload_len = buf.len() - RDT_HEADER_SIZE;
        if payload_len > MAX_DATA_LENGTH {
            return Err(ParleyError::PacketTooLarge {
                size: payload_len,
                max: MAX_DATA_LENGTH,
            });
        }
        Ok(Self {
            seq: u16::from_be_bytes([buf[0], buf[1]]),
            checksum: u16::from_be_bytes([buf[2], buf[3]]),
            data: Bytes::copy_from_slice(&buf[RDT_HEADER_SIZE..]),
        })
    }

    /// Recompute the checksum and compare with the carried one
    pub fn validate(&self) -> bool {
        Self::compute_checksum(self.seq, &self.data) == self.checksum
    }

    /// Like [`Self::validate`] but reports the mismatch
    pub fn verify(&self) -> Result<()> {
        let actual = Self::compute_checksum(self.seq, &self.data);
        if actual != self.checksum {
            return Err(ParleyError::ChecksumMismatch {
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }
}

/// Cumulative acknowledgment
///
/// `seq` is the next sequence number the receiver expects: every packet below
/// it has arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPacket {
    pub seq: u16,
    pub checksum: u16,
}

impl AckPacket {
    pub fn new(seq: u16) -> Self {
        Self {
            seq,
            checksum: Self::compute_checksum(seq),
        }
    }

    /// Checksum over `seq` alone
    pub fn compute_checksum(seq: u16) -> u16 {
        internet_checksum(&[&seq.to_be_bytes()])
    }

    pub fn encode(&self) -> [u8; ACK_SIZE] {
        let seq = self.seq.to_be_bytes();
        let checksum = self.checksum.to_be_bytes();
        [seq[0], seq[1], checksum[0], checksum[1]]
    }

    /// Parse an ACK datagram, which is exactly 4 bytes
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < ACK_SIZE {
            return Err(ParleyError::Truncated {
                expected: ACK_SIZE,
                actual: buf.len(),
            });
        }
        if buf.len() > ACK_SIZE {
            return Err(ParleyError::LengthMismatch {
                declared: ACK_SIZE,
                actual: buf.len(),
            });
        }
        Ok(Self {
            seq: u16::from_be_bytes([buf[0], buf[1]]),
            checksum: u16::from_be_bytes([buf[2], buf[3]]),
        })
    }

    pub fn validate(&self) -> bool {
        Self::compute_checksum(self.seq) == self.checksum
    }
}
