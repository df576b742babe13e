//! Superblock handling.
//!
//! Block 0 is reserved for a superblock recording the device geometry and the
//! monotonic floors (highest record id issued, highest block allocation
//! sequence). It is rewritten only on clean shutdown and consumed (erased) as
//! soon as startup has read it, so a crash always leaves it absent and forces
//! the full-log rescan. Its absence or corruption is therefore normal, not an
//! error.
//!
//! ```text
//! [magic u32][version u32][block_size u32][block_count u32]
//! [last_record_id u64][last_block_seq u64][checksum u32]
//! ```

use super::checksum::{compute_checksum, verify_checksum};
use crate::device::{BlockDevice, Geometry};
use crate::store::errors::StoreResult;

pub const SUPERBLOCK_MAGIC: u32 = 0x5354_4153; // "SATS"
pub const SUPERBLOCK_VERSION: u32 = 1;
pub const SUPERBLOCK_SIZE: usize = 4 + 4 + 4 + 4 + 8 + 8 + 4;

/// Index of the block the superblock occupies.
pub const SUPERBLOCK_BLOCK: u32 = 0;

/// Clean-shutdown marker persisted in block 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub block_size: u32,
    pub block_count: u32,
    /// Highest record id ever issued.
    pub last_record_id: u64,
    /// Highest block allocation sequence ever issued.
    pub last_block_seq: u64,
}

impl Superblock {
    pub fn new(geometry: Geometry, last_record_id: u64, last_block_seq: u64) -> Self {
        Self {
            block_size: geometry.block_size,
            block_count: geometry.block_count,
            last_record_id,
            last_block_seq,
        }
    }

    /// True when the recorded geometry matches the device the superblock was
    /// read from. A mismatch means the image belongs to different hardware
    /// and the floors cannot be trusted.
    pub fn matches(&self, geometry: Geometry) -> bool {
        self.block_size == geometry.block_size && self.block_count == geometry.block_count
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(SUPERBLOCK_SIZE);
        buf.extend_from_slice(&SUPERBLOCK_MAGIC.to_le_bytes());
        buf.extend_from_slice(&SUPERBLOCK_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.block_size.to_le_bytes());
        buf.extend_from_slice(&self.block_count.to_le_bytes());
        buf.extend_from_slice(&self.last_record_id.to_le_bytes());
        buf.extend_from_slice(&self.last_block_seq.to_le_bytes());
        let checksum = compute_checksum(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Decode a superblock, returning `None` when the region is erased,
    /// carries the wrong magic, or fails its checksum. All three force the
    /// rescan path; none is fatal.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < SUPERBLOCK_SIZE {
            return None;
        }
        let magic = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if magic != SUPERBLOCK_MAGIC {
            return None;
        }
        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != SUPERBLOCK_VERSION {
            return None;
        }

        let stored = u32::from_le_bytes([
            data[SUPERBLOCK_SIZE - 4],
            data[SUPERBLOCK_SIZE - 3],
            data[SUPERBLOCK_SIZE - 2],
            data[SUPERBLOCK_SIZE - 1],
        ]);
        if !verify_checksum(&data[..SUPERBLOCK_SIZE - 4], stored) {
            return None;
        }

        Some(Self {
            block_size: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            block_count: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            last_record_id: u64::from_le_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ]),
            last_block_seq: u64::from_le_bytes([
                data[24], data[25], data[26], data[27], data[28], data[29], data[30], data[31],
            ]),
        })
    }

    /// Read the superblock from block 0, if a valid one is present.
    pub fn read_from<D: BlockDevice>(device: &D) -> StoreResult<Option<Self>> {
        let mut buf = vec![0u8; SUPERBLOCK_SIZE];
        device.read(SUPERBLOCK_BLOCK, 0, &mut buf)?;
        Ok(Self::decode(&buf))
    }

    /// Write the superblock to block 0 (erase + program + sync).
    pub fn write_to<D: BlockDevice>(&self, device: &mut D) -> StoreResult<()> {
        device.erase(SUPERBLOCK_BLOCK)?;
        device.program(SUPERBLOCK_BLOCK, 0, &self.encode())?;
        device.sync()?;
        Ok(())
    }

    /// Erase block 0 so a crash after this point forces a full rescan.
    pub fn invalidate<D: BlockDevice>(device: &mut D) -> StoreResult<()> {
        device.erase(SUPERBLOCK_BLOCK)?;
        device.sync()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemDevice;

    fn geometry() -> Geometry {
        Geometry::new(1024, 8)
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let sb = Superblock::new(geometry(), 99, 12);
        let decoded = Superblock::decode(&sb.encode()).unwrap();
        assert_eq!(decoded, sb);
    }

    #[test]
    fn test_erased_block_decodes_to_none() {
        let erased = vec![0xFFu8; SUPERBLOCK_SIZE];
        assert!(Superblock::decode(&erased).is_none());
    }

    #[test]
    fn test_corruption_decodes_to_none() {
        let mut encoded = Superblock::new(geometry(), 5, 2).encode();
        encoded[20] ^= 0x01;
        assert!(Superblock::decode(&encoded).is_none());
    }

    #[test]
    fn test_device_roundtrip_and_invalidate() {
        let mut dev = MemDevice::new(geometry());
        let sb = Superblock::new(geometry(), 41, 3);
        sb.write_to(&mut dev).unwrap();

        let read = Superblock::read_from(&dev).unwrap().unwrap();
        assert_eq!(read, sb);

        Superblock::invalidate(&mut dev).unwrap();
        assert!(Superblock::read_from(&dev).unwrap().is_none());
    }

    #[test]
    fn test_geometry_match() {
        let sb = Superblock::new(geometry(), 0, 0);
        assert!(sb.matches(geometry()));
        assert!(!sb.matches(Geometry::new(1024, 16)));
    }
}
