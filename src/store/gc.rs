//! Garbage collection.
//!
//! Reclamation is relocation: the candidate block's retained records (and
//! any tombstone whose target's stale bytes still exist elsewhere) are
//! re-appended through the normal append path, then the candidate is erased
//! whole. A crash in between leaves duplicates, which recovery resolves by
//! write order, so every step here is individually crash-safe.
//!
//! Each invocation reclaims at most one block and returns control to the
//! caller.

use crate::device::BlockDevice;
use crate::observability::{Logger, Severity};

use super::block::{BlockInfo, BlockState};
use super::errors::{StoreError, StoreResult};
use super::log::LogStore;
use super::record::{self, RecordState};

impl<D: BlockDevice> LogStore<D> {
    /// The Full block GC would reclaim next: lowest live ratio, ties broken
    /// by lowest block index to bound wear skew. `None` when nothing has
    /// reclaimable bytes.
    pub fn gc_candidate(&self) -> Option<u32> {
        let mut best: Option<(f64, u32)> = None;
        for (i, info) in self.blocks.iter().enumerate().skip(1) {
            if info.state != BlockState::Full || info.reclaimable_bytes() == 0 {
                continue;
            }
            // An in-flight record's location is on the wire as a payload
            // reference; its block is pinned until the request resolves.
            if self.index.has_pending_in_block(i as u32) {
                continue;
            }
            let ratio = info.live_ratio();
            if best.map_or(true, |(r, _)| ratio < r) {
                best = Some((ratio, i as u32));
            }
        }
        best.map(|(_, block)| block)
    }

    /// Proactive trigger: reclaim the candidate if its live ratio is below
    /// the configured threshold. Returns whether a pass ran.
    pub fn maybe_reclaim(&mut self) -> StoreResult<bool> {
        match self.gc_candidate() {
            Some(block)
                if self.blocks[block as usize].live_ratio()
                    < self.opts.gc_live_ratio_threshold =>
            {
                self.gc_once()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Reclaim one block. Returns the reclaimed block index, or
    /// `StorageExhausted` when every block is fully live.
    pub fn gc_once(&mut self) -> StoreResult<u32> {
        let candidate = self.gc_candidate().ok_or_else(StoreError::exhausted)?;
        self.blocks[candidate as usize].state = BlockState::Reclaiming;

        let mut relocated = 0u64;
        let mut torn = 0u64;

        // Relocate retained records. Tombstoned ones are dropped with the
        // erase below.
        for record_id in self.index.records_in_block(candidate) {
            let entry = match self.index.get(record_id) {
                Some(e) => e.clone(),
                None => continue,
            };
            if entry.state == RecordState::Tombstoned {
                continue;
            }

            let mut buf = vec![0u8; entry.total_len as usize];
            self.device
                .read(candidate, entry.location.offset, &mut buf)?;
            if !matches!(record::decode(&buf), Ok(Some(_))) {
                // Rotted on the medium since it was scanned: discard rather
                // than propagate bad bytes. The selection engine learns when
                // the id fails its next state transition.
                torn += 1;
                self.index.remove_record(record_id);
                self.blocks[candidate as usize].on_dead(entry.total_len);
                Logger::log_stderr(
                    Severity::Warn,
                    "torn_record_discarded",
                    &[
                        ("block", &candidate.to_string()),
                        ("record_id", &record_id.to_string()),
                        ("phase", "gc"),
                    ],
                );
                continue;
            }

            match self.append_bytes(&buf, true, true) {
                Ok(new_location) => {
                    self.index.relocate(record_id, new_location);
                    self.blocks[candidate as usize].on_dead(entry.total_len);
                    relocated += 1;
                }
                Err(e) => {
                    // Partially relocated: already-moved records point at
                    // their new copies, the stale ones are dead bytes, and
                    // the block stays a (better) candidate for next time.
                    self.blocks[candidate as usize].state = BlockState::Full;
                    return Err(e);
                }
            }
        }

        // Relocate tombstones whose targets' stale bytes survive elsewhere;
        // drop the rest (target gone, or being erased together with us).
        for (target_id, tombstone) in self.index.tombstones_in_block(candidate) {
            let target_elsewhere = tombstone.target_present
                && self
                    .index
                    .get(target_id)
                    .map_or(false, |e| e.location.block != candidate);

            if !target_elsewhere {
                self.index.remove_tombstone(target_id);
                continue;
            }

            let mut buf = vec![0u8; tombstone.total_len as usize];
            self.device
                .read(candidate, tombstone.location.offset, &mut buf)?;
            if !matches!(record::decode(&buf), Ok(Some(_))) {
                // Re-encode rather than lose the deletion marker.
                let bytes = record::encode_tombstone(
                    tombstone.record_id,
                    self.clock.now_ms(),
                    target_id,
                );
                buf = bytes;
            }
            match self.append_bytes(&buf, true, true) {
                Ok(new_location) => {
                    self.index.relocate_tombstone(target_id, new_location);
                    self.blocks[candidate as usize].on_dead(tombstone.total_len);
                    relocated += 1;
                }
                Err(e) => {
                    self.blocks[candidate as usize].state = BlockState::Full;
                    return Err(e);
                }
            }
        }

        // Every relocation is already synced; now the stale copies can go.
        self.device.erase(candidate)?;
        self.device.sync()?;

        // Drop the records whose bytes were just erased (only tombstoned
        // ones still point here) and release their tombstones elsewhere.
        for record_id in self.index.records_in_block(candidate) {
            self.index.remove_record(record_id);
            if let Some(tombstone) = self.index.mark_target_erased(record_id) {
                let (block, len) = (tombstone.location.block, tombstone.total_len);
                self.blocks[block as usize].on_dead(len);
            }
        }

        self.blocks[candidate as usize] = BlockInfo::free();

        self.metrics.gc_pass();
        self.metrics.block_reclaimed();
        self.metrics.records_relocated_add(relocated);
        if torn > 0 {
            self.metrics.add_torn_records(torn);
        }
        Logger::log(
            Severity::Info,
            "gc_complete",
            &[
                ("block", &candidate.to_string()),
                ("relocated", &relocated.to_string()),
            ],
        );

        Ok(candidate)
    }
}
