//! On-device record format.
//!
//! Every unit of storage is a record appended to an erase-block:
//!
//! ```text
//! +------------------+
//! | Total Length     | (u32 LE, includes this field and the checksum)
//! +------------------+
//! | Kind             | (u8: 0 = image, 1 = tombstone)
//! +------------------+
//! | Record ID        | (u64 LE)
//! +------------------+
//! | Created At       | (u64 LE, milliseconds)
//! +------------------+
//! | Body             | (kind-specific, below)
//! +------------------+
//! | Checksum         | (u32 LE, CRC32 over all preceding bytes)
//! +------------------+
//! ```
//!
//! Image body: label (length-prefixed), confidence (f64 LE), payload
//! (length-prefixed). Tombstone body: target record id (u64 LE).
//!
//! A length field reading `0xFFFFFFFF` is erased flash: it terminates the
//! record chain of a block. Decoding validates the checksum; a mismatch means
//! the record is torn and must be discarded, never trusted.

use std::io::{self, Read};

use super::checksum::{compute_checksum, verify_checksum};
use crate::classify::Classification;

/// Record id type. Monotonically increasing, never reused.
pub type RecordId = u64;

/// Sentinel read from erased flash where a length is expected.
pub const ERASED_LEN: u32 = 0xFFFF_FFFF;

/// Fixed bytes before the body: length + kind + record id + created_at.
pub const RECORD_PREFIX_SIZE: usize = 4 + 1 + 8 + 8;

/// Smallest possible record (a tombstone).
pub const MIN_RECORD_SIZE: usize = RECORD_PREFIX_SIZE + 8 + 4;

/// Physical position of a record on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Location {
    pub block: u32,
    pub offset: u32,
}

impl Location {
    pub fn new(block: u32, offset: u32) -> Self {
        Self { block, offset }
    }
}

/// Lifecycle state of a stored record.
///
/// Only `Live` and `Tombstoned` are durable; the transmit states are held in
/// memory and revert to `Live` across a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    Live,
    PendingTransmit,
    Transmitted,
    Tombstoned,
}

impl RecordState {
    /// True for states whose payload must survive garbage collection.
    pub fn is_retained(self) -> bool {
        !matches!(self, RecordState::Tombstoned)
    }
}

/// Record kind tag as stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordKind {
    Image = 0,
    Tombstone = 1,
}

impl RecordKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RecordKind::Image),
            1 => Some(RecordKind::Tombstone),
            _ => None,
        }
    }
}

/// Kind-specific record contents.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordBody {
    Image {
        classification: Classification,
        payload: Vec<u8>,
    },
    Tombstone {
        target_id: RecordId,
    },
}

/// A fully decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    pub record_id: RecordId,
    pub created_at: u64,
    pub body: RecordBody,
}

impl ParsedRecord {
    pub fn kind(&self) -> RecordKind {
        match self.body {
            RecordBody::Image { .. } => RecordKind::Image,
            RecordBody::Tombstone { .. } => RecordKind::Tombstone,
        }
    }
}

/// Serialized size of an image record with the given label and payload sizes.
pub fn image_record_len(label_len: usize, payload_len: usize) -> usize {
    RECORD_PREFIX_SIZE + 4 + label_len + 8 + 4 + payload_len + 4
}

/// Serialized size of a tombstone record.
pub fn tombstone_record_len() -> usize {
    MIN_RECORD_SIZE
}

fn finish(mut buf: Vec<u8>) -> Vec<u8> {
    let total_len = (buf.len() + 4) as u32;
    buf[0..4].copy_from_slice(&total_len.to_le_bytes());
    let checksum = compute_checksum(&buf);
    buf.extend_from_slice(&checksum.to_le_bytes());
    buf
}

fn prefix(kind: RecordKind, record_id: RecordId, created_at: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64);
    buf.extend_from_slice(&[0, 0, 0, 0]); // length patched in finish()
    buf.push(kind as u8);
    buf.extend_from_slice(&record_id.to_le_bytes());
    buf.extend_from_slice(&created_at.to_le_bytes());
    buf
}

/// Serialize an image record.
pub fn encode_image(
    record_id: RecordId,
    created_at: u64,
    classification: &Classification,
    payload: &[u8],
) -> Vec<u8> {
    let mut buf = prefix(RecordKind::Image, record_id, created_at);
    buf.extend_from_slice(&(classification.label.len() as u32).to_le_bytes());
    buf.extend_from_slice(classification.label.as_bytes());
    buf.extend_from_slice(&classification.confidence.to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    finish(buf)
}

/// Serialize a tombstone record superseding `target_id`.
pub fn encode_tombstone(record_id: RecordId, created_at: u64, target_id: RecordId) -> Vec<u8> {
    let mut buf = prefix(RecordKind::Tombstone, record_id, created_at);
    buf.extend_from_slice(&target_id.to_le_bytes());
    finish(buf)
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R) -> io::Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Deserialize one record from the front of `data`, verifying the checksum.
///
/// Returns the record and the number of bytes consumed. `Ok(None)` means the
/// region is erased flash (end of the record chain). Any structural or
/// checksum failure is an error: the caller treats the record as torn.
pub fn decode(data: &[u8]) -> io::Result<Option<(ParsedRecord, usize)>> {
    if data.len() < 4 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "record area shorter than a length field",
        ));
    }

    let total_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    if total_len == ERASED_LEN {
        return Ok(None);
    }
    let total_len = total_len as usize;

    if total_len < MIN_RECORD_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("record length {} below minimum", total_len),
        ));
    }
    if total_len > data.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "record truncated: length {} exceeds remaining {}",
                total_len,
                data.len()
            ),
        ));
    }

    let stored_checksum = u32::from_le_bytes([
        data[total_len - 4],
        data[total_len - 3],
        data[total_len - 2],
        data[total_len - 1],
    ]);
    if !verify_checksum(&data[..total_len - 4], stored_checksum) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "record checksum mismatch",
        ));
    }

    let mut cursor = io::Cursor::new(&data[4..total_len - 4]);
    let mut kind_buf = [0u8; 1];
    cursor.read_exact(&mut kind_buf)?;
    let kind = RecordKind::from_u8(kind_buf[0]).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown record kind {}", kind_buf[0]),
        )
    })?;
    let record_id = read_u64(&mut cursor)?;
    let created_at = read_u64(&mut cursor)?;

    let body = match kind {
        RecordKind::Image => {
            let label_len = read_u32(&mut cursor)? as usize;
            let mut label_buf = vec![0u8; label_len];
            cursor.read_exact(&mut label_buf)?;
            let label = String::from_utf8(label_buf).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, format!("invalid label: {}", e))
            })?;

            let mut confidence_buf = [0u8; 8];
            cursor.read_exact(&mut confidence_buf)?;
            let confidence = f64::from_le_bytes(confidence_buf);

            let payload_len = read_u32(&mut cursor)? as usize;
            let mut payload = vec![0u8; payload_len];
            cursor.read_exact(&mut payload)?;

            RecordBody::Image {
                classification: Classification { label, confidence },
                payload,
            }
        }
        RecordKind::Tombstone => {
            let target_id = read_u64(&mut cursor)?;
            RecordBody::Tombstone { target_id }
        }
    };

    Ok(Some((
        ParsedRecord {
            record_id,
            created_at,
            body,
        },
        total_len,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_classification() -> Classification {
        Classification {
            label: "wildfire".to_string(),
            confidence: 0.93,
        }
    }

    #[test]
    fn test_image_record_roundtrip() {
        let encoded = encode_image(42, 1_700, &sample_classification(), b"jpeg bytes");
        assert_eq!(encoded.len(), image_record_len("wildfire".len(), 10));

        let (record, consumed) = decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(record.record_id, 42);
        assert_eq!(record.created_at, 1_700);
        match record.body {
            RecordBody::Image {
                classification,
                payload,
            } => {
                assert_eq!(classification.label, "wildfire");
                assert!((classification.confidence - 0.93).abs() < f64::EPSILON);
                assert_eq!(payload, b"jpeg bytes");
            }
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_tombstone_record_roundtrip() {
        let encoded = encode_tombstone(43, 1_701, 42);
        assert_eq!(encoded.len(), tombstone_record_len());

        let (record, _) = decode(&encoded).unwrap().unwrap();
        assert_eq!(record.record_id, 43);
        assert_eq!(record.kind(), RecordKind::Tombstone);
        assert_eq!(record.body, RecordBody::Tombstone { target_id: 42 });
    }

    #[test]
    fn test_erased_region_terminates_chain() {
        let erased = [0xFFu8; 64];
        assert!(decode(&erased).unwrap().is_none());
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut encoded = encode_image(1, 0, &sample_classification(), b"payload");
        let mid = encoded.len() / 2;
        encoded[mid] ^= 0xFF;
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn test_truncated_record_rejected() {
        let encoded = encode_image(1, 0, &sample_classification(), b"payload");
        assert!(decode(&encoded[..encoded.len() - 3]).is_err());
    }

    #[test]
    fn test_empty_payload_allowed() {
        let encoded = encode_image(5, 9, &sample_classification(), b"");
        let (record, _) = decode(&encoded).unwrap().unwrap();
        match record.body {
            RecordBody::Image { payload, .. } => assert!(payload.is_empty()),
            other => panic!("unexpected body: {:?}", other),
        }
    }

    #[test]
    fn test_consumed_matches_sizing_helpers() {
        let encoded = encode_tombstone(9, 9, 3);
        let (_, consumed) = decode(&encoded).unwrap().unwrap();
        assert_eq!(consumed, tombstone_record_len());
    }
}
