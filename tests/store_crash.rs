//! Crash-consistency: recovery from a device snapshot taken at any point
//! yields exactly the durably-written, not-yet-tombstoned record set.

mod common;

use std::sync::Arc;

use common::{classification, open_store, small_geometry};
use satstore::clock::ManualClock;
use satstore::device::MemDevice;
use satstore::store::{LogStore, RecordState, StoreOptions};

fn live_ids(store: &LogStore<MemDevice>) -> Vec<u64> {
    store.iterate_live().map(|m| m.record_id).collect()
}

#[test]
fn recovery_at_every_operation_boundary_is_exact() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    // (snapshot, expected live set) after every completed operation.
    let mut checkpoints: Vec<(MemDevice, Vec<u64>)> = Vec::new();
    let mut expected: Vec<u64> = Vec::new();

    let a = store.append(&classification("ship", 0.5), b"aaaa").unwrap();
    expected.push(a);
    checkpoints.push((store.device().snapshot(), expected.clone()));

    let b = store.append(&classification("wildfire", 0.9), b"bbbb").unwrap();
    expected.push(b);
    checkpoints.push((store.device().snapshot(), expected.clone()));

    store.tombstone(a).unwrap();
    expected.retain(|&id| id != a);
    checkpoints.push((store.device().snapshot(), expected.clone()));

    let c = store.append(&classification("cloud", 0.2), b"cccc").unwrap();
    expected.push(c);
    checkpoints.push((store.device().snapshot(), expected.clone()));

    store.tombstone(c).unwrap();
    expected.retain(|&id| id != c);
    checkpoints.push((store.device().snapshot(), expected.clone()));

    for (i, (snapshot, expected)) in checkpoints.into_iter().enumerate() {
        let reopen_clock = Arc::new(ManualClock::new(0));
        let (recovered, report) =
            open_store(snapshot, StoreOptions::default(), &reopen_clock);
        assert_eq!(live_ids(&recovered), expected, "checkpoint {}", i);
        assert_eq!(report.torn_records, 0, "checkpoint {}", i);
    }
}

#[test]
fn torn_append_is_discarded_and_store_continues() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    let a = store.append(&classification("ship", 0.5), b"first").unwrap();

    // Tear the next record write partway through its bytes.
    store.device_mut().torn_program(1, 10);
    assert!(store
        .append(&classification("ship", 0.6), b"torn victim")
        .is_err());

    // The failed id is burned, the block is sealed, and appends continue.
    let c = store.append(&classification("ship", 0.7), b"after").unwrap();
    assert!(c > a + 1);
    assert_eq!(live_ids(&store), vec![a, c]);

    // A restart sees the torn record as exactly that.
    let reopen_clock = Arc::new(ManualClock::new(0));
    let (recovered, report) = open_store(
        store.device().snapshot(),
        StoreOptions::default(),
        &reopen_clock,
    );
    assert_eq!(live_ids(&recovered), vec![a, c]);
    assert_eq!(report.torn_records, 1);
    assert_eq!(recovered.read(a).unwrap().payload, b"first");
    assert_eq!(recovered.read(c).unwrap().payload, b"after");
}

#[test]
fn volatile_transmit_states_revert_to_live() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    let a = store.append(&classification("ship", 0.5), b"p").unwrap();
    let b = store.append(&classification("ship", 0.6), b"q").unwrap();
    store.mark_pending(a).unwrap();
    store.mark_pending(b).unwrap();
    store.mark_transmitted(b).unwrap();

    let reopen_clock = Arc::new(ManualClock::new(0));
    let (recovered, _) = open_store(
        store.device().snapshot(),
        StoreOptions::default(),
        &reopen_clock,
    );
    // Neither transition was confirmed durable; both records are Live and
    // re-eligible for transmission.
    assert_eq!(recovered.meta(a).unwrap().state, RecordState::Live);
    assert_eq!(recovered.meta(b).unwrap().state, RecordState::Live);
}

#[test]
fn clean_shutdown_preserves_id_floor() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    let mut last = 0;
    for _ in 0..3 {
        last = store.append(&classification("ship", 0.5), b"x").unwrap();
    }
    store.clean_shutdown().unwrap();

    let reopen_clock = Arc::new(ManualClock::new(0));
    let (mut recovered, report) = open_store(
        store.device().snapshot(),
        StoreOptions::default(),
        &reopen_clock,
    );
    assert!(report.superblock_used);

    let next = recovered
        .append(&classification("ship", 0.5), b"y")
        .unwrap();
    assert!(next > last);
}

#[test]
fn crash_without_superblock_still_never_reuses_ids() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    let a = store.append(&classification("ship", 0.5), b"x").unwrap();
    store.tombstone(a).unwrap();

    // No clean shutdown: the superblock was consumed at open and never
    // rewritten, so this reopen is the crash path.
    let reopen_clock = Arc::new(ManualClock::new(0));
    let (mut recovered, report) = open_store(
        store.device().snapshot(),
        StoreOptions::default(),
        &reopen_clock,
    );
    assert!(!report.superblock_used);

    // The tombstone record's id anchors the floor even though the data
    // record is logically gone.
    let next = recovered
        .append(&classification("ship", 0.5), b"y")
        .unwrap();
    assert!(next > a + 1);
}

#[test]
fn mid_gc_crash_resolves_duplicates_to_one_winner() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    // Three ~149-byte records fill block 1; the fourth rolls to block 2 and
    // seals block 1 Full.
    let r1 = store.append(&classification("ship", 0.5), &[1u8; 100]).unwrap();
    let r2 = store.append(&classification("ship", 0.5), &[2u8; 100]).unwrap();
    let r3 = store.append(&classification("ship", 0.5), &[3u8; 100]).unwrap();
    let r4 = store.append(&classification("ship", 0.5), &[4u8; 100]).unwrap();
    store.tombstone(r1).unwrap();

    let live_before: Vec<u64> = vec![r2, r3, r4];
    assert_eq!(live_ids(&store), live_before);

    // First relocation write succeeds (duplicate now on the device), second
    // one hits power loss.
    store.device_mut().fail_program(2);
    assert!(store.gc_once().is_err());

    let reopen_clock = Arc::new(ManualClock::new(0));
    let (mut recovered, report) = open_store(
        store.device().snapshot(),
        StoreOptions::default(),
        &reopen_clock,
    );

    // Exactly one winner per id: the higher write order.
    assert_eq!(live_ids(&recovered), live_before);
    assert!(report.duplicate_records >= 1);
    for (&id, pattern) in [r2, r3, r4].iter().zip([2u8, 3, 4].iter()) {
        assert_eq!(recovered.read(id).unwrap().payload, vec![*pattern; 100]);
    }

    // And the interrupted pass can finish after recovery.
    recovered.gc_once().unwrap();
    assert_eq!(live_ids(&recovered), live_before);
    assert!(recovered.stats().free_blocks >= 1);
}
