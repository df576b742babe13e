//! In-memory record index.
//!
//! Keyed by record id, rebuilt once at startup from record headers and
//! maintained on every append/tombstone/relocation. All state queries and
//! `iterate_live` are served from here; the device is only touched for
//! payload reads.
//!
//! Tombstone records are tracked separately, keyed by the record they
//! supersede: a tombstone must survive GC relocation for exactly as long as
//! its target's stale bytes remain on the device, and this map is what GC
//! consults to decide.

use std::collections::HashMap;

use crate::classify::Classification;
use crate::store::record::{Location, RecordId, RecordState};

/// Index entry for an image record physically present on the device.
#[derive(Debug, Clone)]
pub struct RecordEntry {
    pub location: Location,
    /// Full serialized record length in bytes.
    pub total_len: u32,
    /// Payload length in bytes (for transmit requests and stats).
    pub payload_len: u32,
    pub state: RecordState,
    pub created_at: u64,
    pub classification: Classification,
}

/// Index entry for a tombstone record, keyed by its target.
#[derive(Debug, Clone)]
pub struct TombstoneEntry {
    /// The tombstone record's own id.
    pub record_id: RecordId,
    pub location: Location,
    pub total_len: u32,
    /// Whether the superseded record's bytes still exist on the device. Once
    /// false the tombstone itself is dead weight and GC may drop it.
    pub target_present: bool,
}

/// Metadata view of a live record, served without touching the device.
#[derive(Debug, Clone)]
pub struct RecordMeta {
    pub record_id: RecordId,
    pub created_at: u64,
    pub classification: Classification,
    pub payload_len: u32,
    pub state: RecordState,
    pub location: Location,
}

/// The store's in-memory index.
#[derive(Debug, Default)]
pub struct RecordIndex {
    records: HashMap<RecordId, RecordEntry>,
    tombstones: HashMap<RecordId, TombstoneEntry>,
    /// Running total of serialized bytes of retained records.
    live_record_bytes: u64,
}

impl RecordIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, record_id: RecordId) -> Option<&RecordEntry> {
        self.records.get(&record_id)
    }

    pub fn contains(&self, record_id: RecordId) -> bool {
        self.records.contains_key(&record_id)
    }

    /// Insert or replace an image record entry.
    pub fn insert_record(&mut self, record_id: RecordId, entry: RecordEntry) {
        if entry.state.is_retained() {
            self.live_record_bytes += entry.total_len as u64;
        }
        if let Some(old) = self.records.insert(record_id, entry) {
            if old.state.is_retained() {
                self.live_record_bytes -= old.total_len as u64;
            }
        }
    }

    /// Update a record's state, maintaining the live-bytes total.
    pub fn set_state(&mut self, record_id: RecordId, state: RecordState) -> Option<RecordState> {
        let entry = self.records.get_mut(&record_id)?;
        let prior = entry.state;
        if prior.is_retained() && !state.is_retained() {
            self.live_record_bytes -= entry.total_len as u64;
        } else if !prior.is_retained() && state.is_retained() {
            self.live_record_bytes += entry.total_len as u64;
        }
        entry.state = state;
        Some(prior)
    }

    /// Move a record to a new physical location (GC relocation).
    pub fn relocate(&mut self, record_id: RecordId, location: Location) {
        if let Some(entry) = self.records.get_mut(&record_id) {
            entry.location = location;
        }
    }

    /// Drop a record entry entirely (its bytes were physically erased).
    pub fn remove_record(&mut self, record_id: RecordId) -> Option<RecordEntry> {
        let old = self.records.remove(&record_id)?;
        if old.state.is_retained() {
            self.live_record_bytes -= old.total_len as u64;
        }
        Some(old)
    }

    pub fn insert_tombstone(&mut self, target_id: RecordId, entry: TombstoneEntry) {
        self.tombstones.insert(target_id, entry);
    }

    pub fn tombstone_for(&self, target_id: RecordId) -> Option<&TombstoneEntry> {
        self.tombstones.get(&target_id)
    }

    /// Mark a tombstone's target as physically gone.
    pub fn mark_target_erased(&mut self, target_id: RecordId) -> Option<&TombstoneEntry> {
        let entry = self.tombstones.get_mut(&target_id)?;
        entry.target_present = false;
        Some(entry)
    }

    pub fn relocate_tombstone(&mut self, target_id: RecordId, location: Location) {
        if let Some(entry) = self.tombstones.get_mut(&target_id) {
            entry.location = location;
        }
    }

    pub fn remove_tombstone(&mut self, target_id: RecordId) -> Option<TombstoneEntry> {
        self.tombstones.remove(&target_id)
    }

    /// Whether `block` holds a record that is currently in flight on the
    /// link. Its location has been handed out as a payload reference, so the
    /// block must not be relocated underneath it.
    pub fn has_pending_in_block(&self, block: u32) -> bool {
        self.records.values().any(|e| {
            e.location.block == block && e.state == RecordState::PendingTransmit
        })
    }

    /// All records (any state) resident in `block`.
    pub fn records_in_block(&self, block: u32) -> Vec<RecordId> {
        let mut ids: Vec<RecordId> = self
            .records
            .iter()
            .filter(|(_, e)| e.location.block == block)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// All tombstones, as (target_id, entry) pairs ordered by target.
    pub fn tombstones(&self) -> Vec<(RecordId, TombstoneEntry)> {
        let mut pairs: Vec<(RecordId, TombstoneEntry)> = self
            .tombstones
            .iter()
            .map(|(&target, e)| (target, e.clone()))
            .collect();
        pairs.sort_unstable_by_key(|(target, _)| *target);
        pairs
    }

    /// All tombstones resident in `block`, as (target_id, entry) pairs.
    pub fn tombstones_in_block(&self, block: u32) -> Vec<(RecordId, TombstoneEntry)> {
        let mut pairs: Vec<(RecordId, TombstoneEntry)> = self
            .tombstones
            .iter()
            .filter(|(_, e)| e.location.block == block)
            .map(|(&target, e)| (target, e.clone()))
            .collect();
        pairs.sort_unstable_by_key(|(target, _)| *target);
        pairs
    }

    /// Snapshot of all retained (non-tombstoned) records, ordered by id.
    ///
    /// This is the `iterate_live` backing: finite, restartable, no payload
    /// reads.
    pub fn live_records(&self) -> Vec<RecordMeta> {
        let mut metas: Vec<RecordMeta> = self
            .records
            .iter()
            .filter(|(_, e)| e.state.is_retained())
            .map(|(&record_id, e)| RecordMeta {
                record_id,
                created_at: e.created_at,
                classification: e.classification.clone(),
                payload_len: e.payload_len,
                state: e.state,
                location: e.location,
            })
            .collect();
        metas.sort_unstable_by_key(|m| m.record_id);
        metas
    }

    pub fn live_count(&self) -> usize {
        self.records
            .values()
            .filter(|e| e.state.is_retained())
            .count()
    }

    pub fn live_record_bytes(&self) -> u64 {
        self.live_record_bytes
    }
}
