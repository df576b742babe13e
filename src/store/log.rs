//! The log-structured store.
//!
//! Owns the block device exclusively: every append, tombstone, state
//! transition, and GC pass goes through this struct, and nothing else holds
//! the device. Records are appended to a single Active block; when it fills,
//! the store rolls to the next Free block under a fresh allocation sequence.
//! Deletion is always a tombstone append; physical space comes back only when
//! GC erases a whole block.
//!
//! Durability: every append and tombstone is programmed and synced before
//! the call returns. There is no journal beyond the log itself: recovery
//! replays record headers from the oldest non-erased block forward.

use std::sync::Arc;

use crate::classify::Classification;
use crate::clock::Clock;
use crate::device::{BlockDevice, Geometry};
use crate::observability::{Logger, MetricsRegistry, Severity};

use super::block::{encode_block_header, BlockInfo, BlockState, BLOCK_HEADER_SIZE};
use super::errors::{StoreError, StoreResult};
use super::index::{RecordEntry, RecordIndex, RecordMeta, TombstoneEntry};
use super::record::{
    self, encode_image, encode_tombstone, image_record_len, tombstone_record_len, Location,
    RecordId, RecordState,
};
use super::recovery::{self, RecoveryReport};
use super::superblock::Superblock;

/// Tunables for the store. All of these are configuration, not constants.
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Free blocks held back from normal appends so GC always has a
    /// relocation target.
    pub reserved_blocks: u32,
    /// Proactive GC triggers when the best candidate's live ratio drops
    /// below this.
    pub gc_live_ratio_threshold: f64,
    /// Bound on GC passes attempted while satisfying one append.
    pub max_reclaim_attempts: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            reserved_blocks: 1,
            gc_live_ratio_threshold: 0.5,
            max_reclaim_attempts: 4,
        }
    }
}

/// A fully materialized record read back from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record_id: RecordId,
    pub created_at: u64,
    pub classification: Classification,
    pub payload: Vec<u8>,
    pub state: RecordState,
}

/// Point-in-time store statistics.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub live_records: usize,
    pub live_record_bytes: u64,
    pub free_blocks: u32,
    pub data_blocks: u32,
}

/// Log-structured store over a block device.
pub struct LogStore<D: BlockDevice> {
    pub(super) device: D,
    pub(super) geometry: Geometry,
    pub(super) opts: StoreOptions,
    pub(super) index: RecordIndex,
    /// One entry per device block; entry 0 (the superblock) stays Free and
    /// is never allocated.
    pub(super) blocks: Vec<BlockInfo>,
    pub(super) active: Option<u32>,
    pub(super) next_record_id: u64,
    pub(super) next_block_seq: u64,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) metrics: Arc<MetricsRegistry>,
}

impl<D: BlockDevice> LogStore<D> {
    /// Open the store: read and consume the superblock, rescan the log, and
    /// rebuild the in-memory index.
    pub fn open(
        mut device: D,
        opts: StoreOptions,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
    ) -> StoreResult<(Self, RecoveryReport)> {
        let geometry = device.geometry();
        if geometry.block_count < 3 {
            return Err(StoreError::format_invalid(format!(
                "need at least 3 blocks (superblock + data + reserve), device has {}",
                geometry.block_count
            )));
        }
        let min_usable = (BLOCK_HEADER_SIZE + record::MIN_RECORD_SIZE) as u32;
        if geometry.block_size <= min_usable {
            return Err(StoreError::format_invalid(format!(
                "block size {} cannot hold a block header and a record",
                geometry.block_size
            )));
        }

        let superblock = Superblock::read_from(&device)?;
        let (floor_record_id, floor_block_seq, superblock_used) = match superblock {
            Some(sb) if sb.matches(geometry) => (sb.last_record_id, sb.last_block_seq, true),
            Some(_) => {
                Logger::log_stderr(
                    Severity::Warn,
                    "superblock_geometry_mismatch",
                    &[("action", "full rescan")],
                );
                (0, 0, false)
            }
            None => (0, 0, false),
        };
        // Consume the superblock now: a crash from here on finds it absent
        // and takes the full-rescan path with scan-derived floors.
        Superblock::invalidate(&mut device)?;

        let outcome = recovery::scan_device(&device, floor_record_id, floor_block_seq)?;
        let mut report = outcome.report;
        report.superblock_used = superblock_used;

        let mut store = Self {
            device,
            geometry,
            opts,
            index: outcome.index,
            blocks: outcome.blocks,
            active: None,
            next_record_id: outcome.next_record_id,
            next_block_seq: outcome.next_block_seq,
            clock,
            metrics,
        };

        if let Some(block) = outcome.active_candidate {
            store.blocks[block as usize].state = BlockState::Active;
            store.active = Some(block);
        }

        store.metrics.add_torn_records(report.torn_records as u64);
        Logger::log(
            Severity::Info,
            "store_opened",
            &[
                ("live_records", &report.records_live.to_string()),
                ("torn_records", &report.torn_records.to_string()),
                ("duplicates_resolved", &report.duplicate_records.to_string()),
                ("superblock_used", &superblock_used.to_string()),
            ],
        );

        Ok((store, report))
    }

    /// Largest record the store can hold: one block minus its header.
    pub fn max_record_len(&self) -> usize {
        self.geometry.block_size as usize - BLOCK_HEADER_SIZE
    }

    /// Capacity available to retained records: all data blocks except the
    /// reclaim margin.
    pub fn usable_capacity(&self) -> u64 {
        let data_blocks = self.geometry.block_count as u64 - 1;
        let usable_blocks = data_blocks.saturating_sub(self.opts.reserved_blocks as u64);
        usable_blocks * (self.geometry.block_size as u64 - BLOCK_HEADER_SIZE as u64)
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Read-only view of the device, e.g. for snapshotting in crash tests.
    /// Mutation stays exclusive to the store.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable device access for fault injection in tests.
    #[doc(hidden)]
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Append a classified image record. Returns the new record id.
    pub fn append(
        &mut self,
        classification: &Classification,
        payload: &[u8],
    ) -> StoreResult<RecordId> {
        let total_len = image_record_len(classification.label.len(), payload.len());
        if total_len > self.max_record_len() {
            return Err(StoreError::record_too_large(total_len, self.max_record_len()));
        }
        if self.index.live_record_bytes() + total_len as u64 > self.usable_capacity() {
            self.metrics.out_of_space();
            return Err(StoreError::with_context(
                super::errors::StoreErrorKind::OutOfSpace,
                "live bytes would exceed capacity margin",
            ));
        }

        let record_id = self.take_record_id();
        let created_at = self.clock.now_ms();
        let bytes = encode_image(record_id, created_at, classification, payload);
        let location = self.append_bytes(&bytes, true, false)?;

        self.index.insert_record(
            record_id,
            RecordEntry {
                location,
                total_len: bytes.len() as u32,
                payload_len: payload.len() as u32,
                state: RecordState::Live,
                created_at,
                classification: classification.clone(),
            },
        );
        self.metrics.record_appended(bytes.len() as u64);
        Ok(record_id)
    }

    /// Write a tombstone superseding `target`. The target's payload bytes
    /// stay on the device until GC erases their block.
    pub fn tombstone(&mut self, target: RecordId) -> StoreResult<()> {
        match self.index.get(target) {
            None => {
                return if self.index.tombstone_for(target).is_some() {
                    Err(StoreError::already_tombstoned(target))
                } else {
                    Err(StoreError::not_found(target))
                };
            }
            Some(entry) if entry.state == RecordState::Tombstoned => {
                return Err(StoreError::already_tombstoned(target));
            }
            Some(_) => {}
        }

        let record_id = self.take_record_id();
        let created_at = self.clock.now_ms();
        let bytes = encode_tombstone(record_id, created_at, target);
        // Tombstones may dip into the reserved margin: they are what turns a
        // full device back into a reclaimable one, so an append-full device
        // must still be able to write them.
        let location = self.append_bytes(&bytes, true, true)?;

        self.index.insert_tombstone(
            target,
            TombstoneEntry {
                record_id,
                location,
                total_len: bytes.len() as u32,
                target_present: true,
            },
        );
        let target_entry = self
            .index
            .get(target)
            .expect("target checked above and GC retains live records");
        let (target_block, target_len) = (target_entry.location.block, target_entry.total_len);
        self.index.set_state(target, RecordState::Tombstoned);
        self.blocks[target_block as usize].on_dead(target_len);
        self.metrics.tombstone_written(bytes.len() as u64);
        Ok(())
    }

    /// `Live -> PendingTransmit`: the record is about to go out on the link.
    pub fn mark_pending(&mut self, record_id: RecordId) -> StoreResult<()> {
        self.transition(record_id, RecordState::Live, RecordState::PendingTransmit, "mark_pending")
    }

    /// `PendingTransmit -> Transmitted`: the controller confirmed receipt.
    pub fn mark_transmitted(&mut self, record_id: RecordId) -> StoreResult<()> {
        self.transition(
            record_id,
            RecordState::PendingTransmit,
            RecordState::Transmitted,
            "mark_transmitted",
        )
    }

    /// `PendingTransmit -> Live`: the request was rejected or timed out and
    /// the record goes back into the ranking.
    pub fn release_pending(&mut self, record_id: RecordId) -> StoreResult<()> {
        self.transition(
            record_id,
            RecordState::PendingTransmit,
            RecordState::Live,
            "release_pending",
        )
    }

    fn transition(
        &mut self,
        record_id: RecordId,
        expect: RecordState,
        next: RecordState,
        operation: &'static str,
    ) -> StoreResult<()> {
        let entry = self
            .index
            .get(record_id)
            .ok_or_else(|| StoreError::not_found(record_id))?;
        if entry.state == RecordState::Tombstoned {
            return Err(StoreError::already_tombstoned(record_id));
        }
        if entry.state != expect {
            return Err(StoreError::invalid_transition(record_id, entry.state, operation));
        }
        self.index.set_state(record_id, next);
        Ok(())
    }

    /// Read a record's payload and classification back, checksum verified.
    pub fn read(&self, record_id: RecordId) -> StoreResult<StoredRecord> {
        let entry = match self.index.get(record_id) {
            Some(e) if e.state != RecordState::Tombstoned => e,
            _ => return Err(StoreError::not_found(record_id)),
        };

        let mut buf = vec![0u8; entry.total_len as usize];
        self.device
            .read(entry.location.block, entry.location.offset, &mut buf)?;

        match record::decode(&buf) {
            Ok(Some((parsed, _))) if parsed.record_id == record_id => match parsed.body {
                record::RecordBody::Image {
                    classification,
                    payload,
                } => Ok(StoredRecord {
                    record_id,
                    created_at: parsed.created_at,
                    classification,
                    payload,
                    state: entry.state,
                }),
                record::RecordBody::Tombstone { .. } => Err(StoreError::integrity(record_id)),
            },
            _ => Err(StoreError::integrity(record_id)),
        }
    }

    /// All retained records' metadata, ordered by record id. Served from the
    /// index; the device is not touched.
    pub fn iterate_live(&self) -> impl Iterator<Item = RecordMeta> {
        self.index.live_records().into_iter()
    }

    /// Metadata for one record, if it is retained.
    pub fn meta(&self, record_id: RecordId) -> Option<RecordMeta> {
        self.index
            .get(record_id)
            .filter(|e| e.state.is_retained())
            .map(|e| RecordMeta {
                record_id,
                created_at: e.created_at,
                classification: e.classification.clone(),
                payload_len: e.payload_len,
                state: e.state,
                location: e.location,
            })
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            live_records: self.index.live_count(),
            live_record_bytes: self.index.live_record_bytes(),
            free_blocks: self.free_count(),
            data_blocks: self.geometry.block_count - 1,
        }
    }

    /// Write the clean-shutdown superblock. The store must not be used for
    /// writes afterwards.
    pub fn clean_shutdown(&mut self) -> StoreResult<()> {
        let superblock = Superblock::new(
            self.geometry,
            self.next_record_id.saturating_sub(1),
            self.next_block_seq.saturating_sub(1),
        );
        superblock.write_to(&mut self.device)?;
        Logger::log(
            Severity::Info,
            "clean_shutdown",
            &[("last_record_id", &superblock.last_record_id.to_string())],
        );
        Ok(())
    }

    // ---- internals shared with gc.rs ----

    pub(super) fn take_record_id(&mut self) -> RecordId {
        let id = self.next_record_id;
        // Burned even if the write below fails: ids are never reused.
        self.next_record_id += 1;
        id
    }

    pub(super) fn free_count(&self) -> u32 {
        self.blocks
            .iter()
            .skip(1)
            .filter(|b| b.state == BlockState::Free)
            .count() as u32
    }

    fn take_free(&self, for_gc: bool) -> Option<u32> {
        if !for_gc && self.free_count() <= self.opts.reserved_blocks {
            return None;
        }
        self.blocks
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, b)| b.state == BlockState::Free)
            .map(|(i, _)| i as u32)
    }

    /// Append raw record bytes, rolling/reclaiming blocks as needed.
    ///
    /// `retained` feeds the destination block's live accounting; `for_gc`
    /// lets relocation dip into the reserved free margin and forbids
    /// recursive GC.
    pub(super) fn append_bytes(
        &mut self,
        bytes: &[u8],
        retained: bool,
        for_gc: bool,
    ) -> StoreResult<Location> {
        let len = bytes.len() as u32;
        let block = self.ensure_active(len, for_gc)?;
        let offset = self.blocks[block as usize].write_cursor;

        if let Err(e) = self.device.program(block, offset, bytes) {
            // The region may be partially programmed; seal the block so no
            // future append lands on dirty flash. Recovery discards the torn
            // tail by checksum.
            self.blocks[block as usize].state = BlockState::Full;
            self.active = None;
            return Err(e.into());
        }
        self.device.sync()?;

        self.blocks[block as usize].on_append(len, retained);
        Ok(Location::new(block, offset))
    }

    fn ensure_active(&mut self, needed: u32, for_gc: bool) -> StoreResult<u32> {
        if needed as usize > self.max_record_len() {
            return Err(StoreError::record_too_large(needed as usize, self.max_record_len()));
        }

        let mut reclaim_attempts = 0u32;
        loop {
            if let Some(active) = self.active {
                if self.blocks[active as usize].remaining(self.geometry.block_size) >= needed {
                    return Ok(active);
                }
                self.blocks[active as usize].state = BlockState::Full;
                self.active = None;
            }

            if let Some(block) = self.take_free(for_gc) {
                self.activate_block(block)?;
                continue;
            }

            if for_gc {
                // The reserved margin is gone: relocation itself is out of
                // room, which only happens when accounting was violated.
                return Err(StoreError::out_of_space());
            }

            // A GC pass may free a block outright, or leave a fresh Active
            // block with room carved out of the reserve; re-check both by
            // looping. Bounded: GC never stalls an append indefinitely.
            reclaim_attempts += 1;
            if reclaim_attempts > self.opts.max_reclaim_attempts {
                self.metrics.out_of_space();
                Logger::log_stderr(
                    Severity::Warn,
                    "out_of_space",
                    &[("live_bytes", &self.index.live_record_bytes().to_string())],
                );
                return Err(StoreError::out_of_space());
            }
            match self.gc_once() {
                Ok(_) => continue,
                Err(e) if e.is_capacity() => {
                    self.metrics.out_of_space();
                    return Err(StoreError::out_of_space());
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn activate_block(&mut self, block: u32) -> StoreResult<()> {
        // Blocks reach the free pool already erased, but a block whose
        // header failed its checksum scans as Free while holding stale bits;
        // erase unconditionally before programming the header.
        self.device.erase(block)?;
        let seq = self.next_block_seq;
        self.next_block_seq += 1;
        self.device.program(block, 0, &encode_block_header(seq))?;
        self.device.sync()?;
        self.blocks[block as usize].activate(seq);
        self.active = Some(block);
        Ok(())
    }

    /// Serialized size of the tombstone record `tombstone()` would write.
    pub fn tombstone_cost(&self) -> usize {
        tombstone_record_len()
    }
}
