//! Capacity pressure: the system degrades by dropping lowest-priority data,
//! refuses to sacrifice higher-priority data, and never crashes.

mod common;

use common::{classification, pipeline, small_geometry};
use satstore::coordinator::PressureOptions;
use satstore::device::MemDevice;
use satstore::link::LinkOptions;
use satstore::selection::SelectionPolicy;

fn mission_policy() -> SelectionPolicy {
    SelectionPolicy::with_weights(&[("wildfire", 1.0), ("ship", 0.7), ("cloud", 0.1)])
}

/// 449-byte records: one per 512-byte block, so four fill the guarded
/// capacity of the 6-block test device.
const BIG: usize = 400;

#[test]
fn full_device_of_high_priority_refuses_low_priority_capture() {
    let mut p = pipeline(
        MemDevice::new(small_geometry()),
        mission_policy(),
        LinkOptions::default(),
        PressureOptions::default(),
        vec![
            classification("wildfire", 0.9),
            classification("wildfire", 0.9),
            classification("wildfire", 0.9),
            classification("wildfire", 0.9),
            classification("cloud", 0.95),
        ],
    );

    let mut fires = Vec::new();
    for _ in 0..4 {
        fires.push(p.coordinator.ingest(&vec![7u8; BIG]).unwrap());
    }

    // Nothing ranks below the incoming cloud capture's 0.095, so eviction
    // is attempted, declines, and the append is refused.
    let err = p.coordinator.ingest(&vec![9u8; BIG]).unwrap_err();
    let is_capacity = match &err {
        satstore::coordinator::CoordinatorError::Store(e) => e.is_capacity(),
        _ => false,
    };
    assert!(is_capacity, "expected capacity refusal, got {}", err);

    // Not one wildfire record was sacrificed.
    let live: Vec<u64> = p
        .coordinator
        .store()
        .iterate_live()
        .map(|m| m.record_id)
        .collect();
    assert_eq!(live, fires);
    assert_eq!(p.metrics.pressure_evictions_count(), 0);
    assert!(p.metrics.out_of_space_count() >= 1);
}

#[test]
fn low_priority_records_sacrificed_for_high_priority_capture() {
    let mut p = pipeline(
        MemDevice::new(small_geometry()),
        mission_policy(),
        LinkOptions::default(),
        PressureOptions::default(),
        vec![
            classification("cloud", 0.4),
            classification("cloud", 0.4),
            classification("cloud", 0.4),
            classification("cloud", 0.4),
            classification("wildfire", 0.9),
        ],
    );

    let mut clouds = Vec::new();
    for i in 0..4 {
        clouds.push(p.coordinator.ingest(&vec![i as u8; BIG]).unwrap());
        p.clock.advance(10);
    }

    let fire = p.coordinator.ingest(&vec![9u8; BIG]).unwrap();

    // Exactly one sacrifice: equal-scored clouds tie-break by age, so the
    // newest one goes.
    assert_eq!(p.metrics.pressure_evictions_count(), 1);
    let live: Vec<u64> = p
        .coordinator
        .store()
        .iterate_live()
        .map(|m| m.record_id)
        .collect();
    assert_eq!(live, vec![clouds[0], clouds[1], clouds[2], fire]);
}

#[test]
fn pressure_eviction_is_observable_not_fatal() {
    let mut p = pipeline(
        MemDevice::new(small_geometry()),
        mission_policy(),
        LinkOptions::default(),
        PressureOptions::default(),
        (0..12)
            .map(|i| {
                if i % 2 == 0 {
                    classification("cloud", 0.3)
                } else {
                    classification("wildfire", 0.8)
                }
            })
            .collect(),
    );

    // A long capture session over a device with room for four big records:
    // low-priority data keeps getting dropped, high-priority data keeps
    // getting stored, and every ingest returns instead of panicking.
    let mut stored = 0;
    let mut refused = 0;
    for i in 0..12 {
        p.clock.advance(5);
        match p.coordinator.ingest(&vec![i as u8; BIG]) {
            Ok(_) => stored += 1,
            Err(_) => refused += 1,
        }
    }
    assert_eq!(stored + refused, 12);
    assert!(stored >= 4);
    assert!(p.metrics.pressure_evictions_count() >= 1);

    // The survivors are wildfires.
    for meta in p.coordinator.store().iterate_live() {
        assert_eq!(meta.classification.label, "wildfire");
    }
}
