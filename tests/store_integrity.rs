//! Store contract: round-trips, state machine, idempotence, capacity.

mod common;

use std::sync::Arc;

use common::{classification, open_store, small_geometry};
use satstore::clock::ManualClock;
use satstore::device::MemDevice;
use satstore::store::{RecordState, StoreErrorKind, StoreOptions};

#[test]
fn append_then_read_is_byte_identical() {
    let clock = Arc::new(ManualClock::new(1_000));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    let c = classification("wildfire", 0.93);
    let payload = b"not actually a jpeg".to_vec();
    let id = store.append(&c, &payload).unwrap();

    let record = store.read(id).unwrap();
    assert_eq!(record.payload, payload);
    assert_eq!(record.classification, c);
    assert_eq!(record.created_at, 1_000);
    assert_eq!(record.state, RecordState::Live);
}

#[test]
fn record_ids_are_monotonic_and_unique() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    let a = store.append(&classification("ship", 0.5), b"a").unwrap();
    let b = store.append(&classification("ship", 0.5), b"b").unwrap();
    // Tombstones consume ids from the same sequence.
    store.tombstone(a).unwrap();
    let c = store.append(&classification("ship", 0.5), b"c").unwrap();

    assert!(a < b);
    assert!(b < c);
    assert_eq!(c - b, 2);
}

#[test]
fn tombstone_twice_reports_already_tombstoned() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    let id = store.append(&classification("cloud", 0.2), b"x").unwrap();
    store.tombstone(id).unwrap();

    let err = store.tombstone(id).unwrap_err();
    assert!(matches!(
        err.kind(),
        StoreErrorKind::AlreadyTombstoned { .. }
    ));
    // State is intact: the record stays deleted, nothing resurrects.
    assert!(store.read(id).is_err());
    assert_eq!(store.stats().live_records, 0);
}

#[test]
fn unknown_id_reports_not_found() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    assert!(matches!(
        store.tombstone(404).unwrap_err().kind(),
        StoreErrorKind::NotFound { .. }
    ));
    assert!(matches!(
        store.mark_pending(404).unwrap_err().kind(),
        StoreErrorKind::NotFound { .. }
    ));
    assert!(store.read(404).is_err());
}

#[test]
fn transmit_lifecycle_enforced_in_order() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );
    let id = store.append(&classification("ship", 0.7), b"p").unwrap();

    // Cannot skip a state.
    assert!(matches!(
        store.mark_transmitted(id).unwrap_err().kind(),
        StoreErrorKind::InvalidTransition { .. }
    ));

    store.mark_pending(id).unwrap();
    // Pending twice is a transition error, not a silent no-op.
    assert!(matches!(
        store.mark_pending(id).unwrap_err().kind(),
        StoreErrorKind::InvalidTransition { .. }
    ));

    store.mark_transmitted(id).unwrap();
    store.tombstone(id).unwrap();
    assert_eq!(store.stats().live_records, 0);
}

#[test]
fn release_pending_returns_record_to_live() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );
    let id = store.append(&classification("ship", 0.7), b"p").unwrap();

    store.mark_pending(id).unwrap();
    store.release_pending(id).unwrap();
    assert_eq!(store.meta(id).unwrap().state, RecordState::Live);

    // And the cycle can repeat.
    store.mark_pending(id).unwrap();
    store.mark_transmitted(id).unwrap();
}

#[test]
fn iterate_live_reflects_tombstones() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    let a = store.append(&classification("ship", 0.5), b"a").unwrap();
    let b = store.append(&classification("ship", 0.6), b"b").unwrap();
    let c = store.append(&classification("ship", 0.7), b"c").unwrap();
    store.tombstone(b).unwrap();

    let live: Vec<u64> = store.iterate_live().map(|m| m.record_id).collect();
    assert_eq!(live, vec![a, c]);

    // Restartable: a second iteration sees the same thing.
    let again: Vec<u64> = store.iterate_live().map(|m| m.record_id).collect();
    assert_eq!(again, live);
}

#[test]
fn oversized_record_rejected_up_front() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    let huge = vec![0u8; small_geometry().block_size as usize];
    let err = store
        .append(&classification("ship", 0.5), &huge)
        .unwrap_err();
    assert!(matches!(err.kind(), StoreErrorKind::RecordTooLarge { .. }));
    assert_eq!(store.stats().live_records, 0);
}

#[test]
fn appends_roll_across_blocks() {
    let clock = Arc::new(ManualClock::new(0));
    let (mut store, _) = open_store(
        MemDevice::new(small_geometry()),
        StoreOptions::default(),
        &clock,
    );

    // ~100 payload bytes per record, 512-byte blocks: forces block rolls.
    let mut ids = Vec::new();
    for i in 0..8 {
        let payload = vec![i as u8; 100];
        ids.push(store.append(&classification("ship", 0.5), &payload).unwrap());
    }

    for (i, id) in ids.iter().enumerate() {
        let record = store.read(*id).unwrap();
        assert_eq!(record.payload, vec![i as u8; 100]);
    }
    assert_eq!(store.stats().live_records, 8);
}
