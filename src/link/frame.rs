//! Wire framing.
//!
//! ```text
//! +--------------+
//! | Start Marker | (u8, 0x7E)
//! +--------------+
//! | Length       | (u16 LE, covers opcode + payload)
//! +--------------+
//! | Opcode       | (u8)
//! +--------------+
//! | Payload      | (variable)
//! +--------------+
//! | Checksum     | (u32 LE, CRC32 over length + opcode + payload)
//! +--------------+
//! ```
//!
//! The decoder is incremental: bytes arrive in arbitrary chunks, frames are
//! extracted as they complete, and anything unparseable is surfaced as a
//! `Malformed` item (with the offending bytes, for the log) while the
//! decoder resynchronizes on the next start marker. The link never crashes
//! on garbage input.

use bytes::{Buf, BytesMut};

use crate::store::{compute_checksum, verify_checksum};

/// Start-of-frame marker.
pub const FRAME_START: u8 = 0x7E;

/// Upper bound on the length field (opcode + payload). Nothing legitimate
/// comes close; anything larger is treated as corruption.
pub const MAX_FRAME_LEN: u16 = 64;

/// start + length + opcode-and-payload-length + checksum
const HEADER_SIZE: usize = 3;
const CHECKSUM_SIZE: usize = 4;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    TransmitRequest = 0x01,
    Ack = 0x02,
    Nack = 0x03,
    Heartbeat = 0x04,
    Shutdown = 0x10,
    StatusRequest = 0x11,
    StatusReport = 0x12,
}

impl Opcode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Opcode::TransmitRequest),
            0x02 => Some(Opcode::Ack),
            0x03 => Some(Opcode::Nack),
            0x04 => Some(Opcode::Heartbeat),
            0x10 => Some(Opcode::Shutdown),
            0x11 => Some(Opcode::StatusRequest),
            0x12 => Some(Opcode::StatusReport),
            _ => None,
        }
    }
}

/// Controller NACK reason codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NackReason {
    NoDownlinkWindow = 0x00,
    Busy = 0x01,
    PayloadTooLarge = 0x02,
    Unspecified = 0xFF,
}

impl NackReason {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => NackReason::NoDownlinkWindow,
            0x01 => NackReason::Busy,
            0x02 => NackReason::PayloadTooLarge,
            _ => NackReason::Unspecified,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NackReason::NoDownlinkWindow => "no_downlink_window",
            NackReason::Busy => "busy",
            NackReason::PayloadTooLarge => "payload_too_large",
            NackReason::Unspecified => "unspecified",
        }
    }
}

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Offer a record for downlink. The location fields are the payload_ref
    /// the controller uses to pull the data.
    TransmitRequest {
        record_id: u64,
        priority: f32,
        payload_len: u32,
        block: u32,
        offset: u32,
    },
    Ack {
        record_id: u64,
    },
    Nack {
        record_id: u64,
        reason: NackReason,
    },
    Heartbeat,
    /// Controller orders a clean shutdown.
    Shutdown,
    /// Controller asks for a status report.
    StatusRequest,
    StatusReport {
        live_records: u32,
        free_blocks: u32,
        pending: u32,
        live_bytes: u64,
    },
}

impl Frame {
    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::TransmitRequest { .. } => Opcode::TransmitRequest,
            Frame::Ack { .. } => Opcode::Ack,
            Frame::Nack { .. } => Opcode::Nack,
            Frame::Heartbeat => Opcode::Heartbeat,
            Frame::Shutdown => Opcode::Shutdown,
            Frame::StatusRequest => Opcode::StatusRequest,
            Frame::StatusReport { .. } => Opcode::StatusReport,
        }
    }

    fn payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Frame::TransmitRequest {
                record_id,
                priority,
                payload_len,
                block,
                offset,
            } => {
                buf.extend_from_slice(&record_id.to_le_bytes());
                buf.extend_from_slice(&priority.to_le_bytes());
                buf.extend_from_slice(&payload_len.to_le_bytes());
                buf.extend_from_slice(&block.to_le_bytes());
                buf.extend_from_slice(&offset.to_le_bytes());
            }
            Frame::Ack { record_id } => {
                buf.extend_from_slice(&record_id.to_le_bytes());
            }
            Frame::Nack { record_id, reason } => {
                buf.extend_from_slice(&record_id.to_le_bytes());
                buf.push(*reason as u8);
            }
            Frame::Heartbeat | Frame::Shutdown | Frame::StatusRequest => {}
            Frame::StatusReport {
                live_records,
                free_blocks,
                pending,
                live_bytes,
            } => {
                buf.extend_from_slice(&live_records.to_le_bytes());
                buf.extend_from_slice(&free_blocks.to_le_bytes());
                buf.extend_from_slice(&pending.to_le_bytes());
                buf.extend_from_slice(&live_bytes.to_le_bytes());
            }
        }
        buf
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let payload = self.payload();
        let len = (1 + payload.len()) as u16;

        let mut body = Vec::with_capacity(HEADER_SIZE + payload.len() + CHECKSUM_SIZE);
        body.extend_from_slice(&len.to_le_bytes());
        body.push(self.opcode() as u8);
        body.extend_from_slice(&payload);
        let checksum = compute_checksum(&body);

        let mut frame = Vec::with_capacity(1 + body.len() + CHECKSUM_SIZE);
        frame.push(FRAME_START);
        frame.extend_from_slice(&body);
        frame.extend_from_slice(&checksum.to_le_bytes());
        frame
    }

    fn decode_payload(opcode: Opcode, payload: &[u8]) -> Result<Frame, String> {
        let need = |n: usize| -> Result<(), String> {
            if payload.len() != n {
                Err(format!(
                    "opcode {:?} expects {} payload bytes, got {}",
                    opcode,
                    n,
                    payload.len()
                ))
            } else {
                Ok(())
            }
        };

        match opcode {
            Opcode::TransmitRequest => {
                need(24)?;
                Ok(Frame::TransmitRequest {
                    record_id: u64::from_le_bytes(payload[0..8].try_into().unwrap()),
                    priority: f32::from_le_bytes(payload[8..12].try_into().unwrap()),
                    payload_len: u32::from_le_bytes(payload[12..16].try_into().unwrap()),
                    block: u32::from_le_bytes(payload[16..20].try_into().unwrap()),
                    offset: u32::from_le_bytes(payload[20..24].try_into().unwrap()),
                })
            }
            Opcode::Ack => {
                need(8)?;
                Ok(Frame::Ack {
                    record_id: u64::from_le_bytes(payload[0..8].try_into().unwrap()),
                })
            }
            Opcode::Nack => {
                need(9)?;
                Ok(Frame::Nack {
                    record_id: u64::from_le_bytes(payload[0..8].try_into().unwrap()),
                    reason: NackReason::from_u8(payload[8]),
                })
            }
            Opcode::Heartbeat => {
                need(0)?;
                Ok(Frame::Heartbeat)
            }
            Opcode::Shutdown => {
                need(0)?;
                Ok(Frame::Shutdown)
            }
            Opcode::StatusRequest => {
                need(0)?;
                Ok(Frame::StatusRequest)
            }
            Opcode::StatusReport => {
                need(20)?;
                Ok(Frame::StatusReport {
                    live_records: u32::from_le_bytes(payload[0..4].try_into().unwrap()),
                    free_blocks: u32::from_le_bytes(payload[4..8].try_into().unwrap()),
                    pending: u32::from_le_bytes(payload[8..12].try_into().unwrap()),
                    live_bytes: u64::from_le_bytes(payload[12..20].try_into().unwrap()),
                })
            }
        }
    }
}

/// One item extracted from the byte stream.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedItem {
    Frame(Frame),
    /// Bytes that could not be parsed: noise before a start marker, a bad
    /// checksum, an unknown opcode, or an implausible length.
    Malformed { discarded: Vec<u8>, reason: String },
}

/// Incremental frame decoder over a byte stream.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes into the decoder.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next frame or malformed span, if a complete one is
    /// buffered.
    pub fn next(&mut self) -> Option<DecodedItem> {
        // Resynchronize: drop noise up to the next start marker and report
        // it as one malformed span.
        let noise = self
            .buf
            .iter()
            .position(|&b| b == FRAME_START)
            .unwrap_or(self.buf.len());
        if noise > 0 {
            let discarded = self.buf.split_to(noise).to_vec();
            return Some(DecodedItem::Malformed {
                discarded,
                reason: "bytes outside any frame".to_string(),
            });
        }

        if self.buf.len() < HEADER_SIZE + 1 {
            return None;
        }

        let len = u16::from_le_bytes([self.buf[1], self.buf[2]]);
        if len == 0 || len > MAX_FRAME_LEN {
            // The length field itself is garbage: discard the marker and
            // resynchronize from the next byte.
            let discarded = self.buf.split_to(1).to_vec();
            return Some(DecodedItem::Malformed {
                discarded,
                reason: format!("implausible frame length {}", len),
            });
        }

        let total = 1 + 2 + len as usize + CHECKSUM_SIZE;
        if self.buf.len() < total {
            return None;
        }

        let body = &self.buf[1..1 + 2 + len as usize];
        let stored = u32::from_le_bytes([
            self.buf[total - 4],
            self.buf[total - 3],
            self.buf[total - 2],
            self.buf[total - 1],
        ]);
        if !verify_checksum(body, stored) {
            let discarded = self.buf.split_to(total).to_vec();
            return Some(DecodedItem::Malformed {
                discarded,
                reason: "frame checksum mismatch".to_string(),
            });
        }

        let opcode_byte = self.buf[3];
        let opcode = match Opcode::from_u8(opcode_byte) {
            Some(op) => op,
            None => {
                let discarded = self.buf.split_to(total).to_vec();
                return Some(DecodedItem::Malformed {
                    discarded,
                    reason: format!("unknown opcode 0x{:02X}", opcode_byte),
                });
            }
        };

        let payload = self.buf[4..1 + 2 + len as usize].to_vec();
        self.buf.advance(total);

        match Frame::decode_payload(opcode, &payload) {
            Ok(frame) => Some(DecodedItem::Frame(frame)),
            Err(reason) => Some(DecodedItem::Malformed {
                discarded: payload,
                reason,
            }),
        }
    }
}
