//! Log-structured store over raw block storage.
//!
//! The store is the exclusive owner of the device and the single writer to
//! it. Everything on the medium is a checksummed record appended in order;
//! deletion is a tombstone append; space returns only when the garbage
//! collector erases a whole block.
//!
//! # Design principles
//!
//! - Append-only (no in-place updates; flash forbids them anyway)
//! - Checksum-verified on every read and on recovery
//! - Synchronous durability: append and tombstone sync before returning
//! - Latest write order wins when a crash leaves duplicates
//! - Torn records are discarded and counted, never fatal

mod block;
mod checksum;
mod errors;
mod gc;
mod index;
mod log;
mod record;
mod recovery;
mod superblock;

pub use block::{BlockInfo, BlockState, BLOCK_HEADER_SIZE};
pub use checksum::{compute_checksum, verify_checksum};
pub use errors::{Severity as StoreSeverity, StoreError, StoreErrorKind, StoreResult};
pub use index::RecordMeta;
pub use log::{LogStore, StoreOptions, StoreStats, StoredRecord};
pub use record::{image_record_len, tombstone_record_len, Location, RecordId, RecordState};
pub use recovery::RecoveryReport;
pub use superblock::Superblock;
