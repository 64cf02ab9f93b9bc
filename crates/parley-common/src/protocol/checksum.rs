//! Checksums used by the RDT protocol.

use sha2::{Digest, Sha256};

/// 16-bit one's-complement Internet checksum (RFC 1071).
///
/// Any single-byte change in the input changes the result.
pub fn internet_checksum(chunks: &[&[u8]]) -> u16 {
    let mut sum: u32 = 0;
    // A chunk boundary may split a 16-bit word; carry the odd byte over.
    let mut pending: Option<u8> = None;

    for chunk in chunks {
        for &byte in chunk.iter() {
            match pending.take() {
                Some(high) => sum += u32::from(u16::from_be_bytes([high, byte])),
                None => pending = Some(byte),
            }
        }
    }
    // Odd trailing byte: pad with a zero byte on the right.
    if let Some(high) = pending {
        sum += u32::from(high) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

/// Whole-file content hash carried in download offers (lowercase hex SHA-256)
pub fn file_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Same as [`file_checksum`] over payload chunks in order, without concatenating
pub fn file_checksum_chunks<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hex::encode(hasher.finalize())
}
