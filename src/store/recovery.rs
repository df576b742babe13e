//! Startup recovery scan.
//!
//! There is no journal: the log is the journal. Recovery reads every
//! non-erased block, orders them by allocation sequence, and replays record
//! headers in write order to rebuild the index and per-block accounting.
//!
//! Duplicate ids (a crash between GC relocation and erase) resolve to the
//! copy with the higher write order; the older copy is counted dead in its
//! block. A record that fails its checksum is torn: it is counted, reported,
//! and the rest of that block's chain is abandoned (the length chain past a
//! torn record cannot be trusted).

use std::collections::HashSet;

use crate::device::BlockDevice;
use crate::observability::{Logger, Severity};

use super::block::{decode_block_header, BlockInfo, BlockState, BLOCK_HEADER_SIZE};
use super::errors::StoreResult;
use super::index::{RecordEntry, RecordIndex, TombstoneEntry};
use super::record::{self, Location, RecordBody, MIN_RECORD_SIZE};

/// What recovery found, reported to the operator and the test suites.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryReport {
    /// Retained records after replay.
    pub records_live: usize,
    /// Tombstone records still present on the device.
    pub tombstones_present: usize,
    /// Records discarded due to checksum failure.
    pub torn_records: usize,
    /// Older copies superseded by write order (mid-GC crash residue).
    pub duplicate_records: usize,
    /// Whether a valid superblock supplied the id floors.
    pub superblock_used: bool,
}

/// Everything `LogStore::open` needs from a scan.
pub(super) struct ScanOutcome {
    pub index: RecordIndex,
    pub blocks: Vec<BlockInfo>,
    pub next_record_id: u64,
    pub next_block_seq: u64,
    /// Block to resume appending into, if any: the highest-sequence block,
    /// and only if its tail is clean and it has room.
    pub active_candidate: Option<u32>,
    pub report: RecoveryReport,
}

pub(super) fn scan_device<D: BlockDevice>(
    device: &D,
    floor_record_id: u64,
    floor_block_seq: u64,
) -> StoreResult<ScanOutcome> {
    let geometry = device.geometry();
    let block_size = geometry.block_size as usize;
    let mut blocks = vec![BlockInfo::free(); geometry.block_count as usize];
    let mut report = RecoveryReport::default();

    // Order non-erased blocks by allocation sequence = global write order.
    let mut seq_order: Vec<(u64, u32)> = Vec::new();
    let mut header_buf = vec![0u8; BLOCK_HEADER_SIZE];
    for block in 1..geometry.block_count {
        device.read(block, 0, &mut header_buf)?;
        if let Some(seq) = decode_block_header(&header_buf) {
            seq_order.push((seq, block));
        }
    }
    seq_order.sort_unstable();

    let mut index = RecordIndex::new();
    let mut max_record_id = floor_record_id;
    let mut max_block_seq = floor_block_seq;
    let mut torn_blocks: HashSet<u32> = HashSet::new();
    let mut block_buf = vec![0u8; block_size];

    for &(seq, block) in &seq_order {
        max_block_seq = max_block_seq.max(seq);
        blocks[block as usize].activate(seq);
        device.read(block, 0, &mut block_buf)?;

        let mut offset = BLOCK_HEADER_SIZE;
        loop {
            if offset + 4 > block_size {
                break;
            }
            match record::decode(&block_buf[offset..]) {
                Ok(None) => break,
                Err(e) => {
                    report.torn_records += 1;
                    torn_blocks.insert(block);
                    Logger::log_stderr(
                        Severity::Warn,
                        "torn_record_discarded",
                        &[
                            ("block", &block.to_string()),
                            ("offset", &offset.to_string()),
                            ("reason", &e.to_string()),
                        ],
                    );
                    break;
                }
                Ok(Some((parsed, consumed))) => {
                    max_record_id = max_record_id.max(parsed.record_id);
                    let location = Location::new(block, offset as u32);

                    match parsed.body {
                        RecordBody::Image {
                            classification,
                            payload,
                        } => {
                            if let Some(old) = index.get(parsed.record_id) {
                                let (old_block, old_len) = (old.location.block, old.total_len);
                                blocks[old_block as usize].on_dead(old_len);
                                report.duplicate_records += 1;
                            }
                            index.insert_record(
                                parsed.record_id,
                                RecordEntry {
                                    location,
                                    total_len: consumed as u32,
                                    payload_len: payload.len() as u32,
                                    state: record::RecordState::Live,
                                    created_at: parsed.created_at,
                                    classification,
                                },
                            );
                        }
                        RecordBody::Tombstone { target_id } => {
                            if let Some(old) = index.tombstone_for(target_id) {
                                let (old_block, old_len) = (old.location.block, old.total_len);
                                blocks[old_block as usize].on_dead(old_len);
                                report.duplicate_records += 1;
                            }
                            index.insert_tombstone(
                                target_id,
                                TombstoneEntry {
                                    record_id: parsed.record_id,
                                    location,
                                    total_len: consumed as u32,
                                    target_present: true,
                                },
                            );
                        }
                    }

                    blocks[block as usize].on_append(consumed as u32, true);
                    offset += consumed;
                }
            }
        }

        blocks[block as usize].state = BlockState::Full;
    }

    // Apply tombstones to the rebuilt records.
    for (target_id, tombstone) in index.tombstones() {
        match index.get(target_id) {
            Some(entry) if entry.state != record::RecordState::Tombstoned => {
                let (target_block, target_len) = (entry.location.block, entry.total_len);
                index.set_state(target_id, record::RecordState::Tombstoned);
                blocks[target_block as usize].on_dead(target_len);
            }
            Some(_) => {}
            None => {
                // Target bytes already erased: the tombstone is dead weight.
                index.mark_target_erased(target_id);
                blocks[tombstone.location.block as usize].on_dead(tombstone.total_len);
            }
        }
    }

    report.records_live = index.live_count();
    report.tombstones_present = index.tombstones().len();

    // Resume appending only into the newest block: appending into an older
    // one would break the write-order rule duplicates are resolved by.
    let active_candidate = seq_order.last().and_then(|&(_, block)| {
        let info = &blocks[block as usize];
        let clean = !torn_blocks.contains(&block);
        let has_room = info.remaining(geometry.block_size) >= MIN_RECORD_SIZE as u32;
        (clean && has_room).then_some(block)
    });

    Ok(ScanOutcome {
        index,
        blocks,
        next_record_id: max_record_id + 1,
        next_block_seq: max_block_seq + 1,
        active_candidate,
        report,
    })
}
