//! Metrics registry.
//!
//! - Counters only (no gauges, no histograms)
//! - Monotonic increase
//! - Reset only on process start
//!
//! All counters use atomic operations with Relaxed ordering: metrics are
//! eventually consistent and never gate control flow.

use std::sync::atomic::{AtomicU64, Ordering};

/// Registry of all operational counters.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Image records appended
    records_appended: AtomicU64,
    /// Bytes of record data appended (records + tombstones)
    bytes_appended: AtomicU64,
    /// Tombstone records written
    tombstones_written: AtomicU64,
    /// Records discarded due to checksum failure
    torn_records: AtomicU64,
    /// GC passes completed
    gc_passes: AtomicU64,
    /// Blocks erased and returned to the free pool
    blocks_reclaimed: AtomicU64,
    /// Live records rewritten during GC
    records_relocated: AtomicU64,
    /// Live records sacrificed under capacity pressure
    pressure_evictions: AtomicU64,
    /// Appends refused with OutOfSpace
    out_of_space_events: AtomicU64,
    /// Transmit requests issued to the controller
    transmit_requests: AtomicU64,
    /// Transmit requests confirmed by the controller
    transmit_confirmed: AtomicU64,
    /// Transmit requests rejected by the controller
    transmit_rejected: AtomicU64,
    /// Request timeouts (per attempt, not per record)
    link_timeouts: AtomicU64,
    /// Requests abandoned after the retry budget
    transmit_abandoned: AtomicU64,
    /// Frames discarded as malformed
    malformed_frames: AtomicU64,
    /// Heartbeats sent
    heartbeats_sent: AtomicU64,
    /// Classification failures (image discarded)
    classify_failures: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    // Store counters

    pub fn record_appended(&self, bytes: u64) {
        self.records_appended.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn tombstone_written(&self, bytes: u64) {
        self.tombstones_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_appended.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn torn_record(&self) {
        self.torn_records.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_torn_records(&self, count: u64) {
        self.torn_records.fetch_add(count, Ordering::Relaxed);
    }

    pub fn gc_pass(&self) {
        self.gc_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn block_reclaimed(&self) {
        self.blocks_reclaimed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_relocated_add(&self, count: u64) {
        self.records_relocated.fetch_add(count, Ordering::Relaxed);
    }

    pub fn pressure_eviction(&self) {
        self.pressure_evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn out_of_space(&self) {
        self.out_of_space_events.fetch_add(1, Ordering::Relaxed);
    }

    // Link counters

    pub fn transmit_request(&self) {
        self.transmit_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transmit_confirm(&self) {
        self.transmit_confirmed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transmit_reject(&self) {
        self.transmit_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn link_timeout(&self) {
        self.link_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn transmit_abandon(&self) {
        self.transmit_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn malformed_frame(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn classify_failure(&self) {
        self.classify_failures.fetch_add(1, Ordering::Relaxed);
    }

    // Readers

    pub fn records_appended_count(&self) -> u64 {
        self.records_appended.load(Ordering::Relaxed)
    }

    pub fn bytes_appended_count(&self) -> u64 {
        self.bytes_appended.load(Ordering::Relaxed)
    }

    pub fn tombstones_written_count(&self) -> u64 {
        self.tombstones_written.load(Ordering::Relaxed)
    }

    pub fn torn_records_count(&self) -> u64 {
        self.torn_records.load(Ordering::Relaxed)
    }

    pub fn gc_passes_count(&self) -> u64 {
        self.gc_passes.load(Ordering::Relaxed)
    }

    pub fn blocks_reclaimed_count(&self) -> u64 {
        self.blocks_reclaimed.load(Ordering::Relaxed)
    }

    pub fn records_relocated_count(&self) -> u64 {
        self.records_relocated.load(Ordering::Relaxed)
    }

    pub fn pressure_evictions_count(&self) -> u64 {
        self.pressure_evictions.load(Ordering::Relaxed)
    }

    pub fn out_of_space_count(&self) -> u64 {
        self.out_of_space_events.load(Ordering::Relaxed)
    }

    pub fn transmit_requests_count(&self) -> u64 {
        self.transmit_requests.load(Ordering::Relaxed)
    }

    pub fn transmit_confirmed_count(&self) -> u64 {
        self.transmit_confirmed.load(Ordering::Relaxed)
    }

    pub fn transmit_rejected_count(&self) -> u64 {
        self.transmit_rejected.load(Ordering::Relaxed)
    }

    pub fn link_timeouts_count(&self) -> u64 {
        self.link_timeouts.load(Ordering::Relaxed)
    }

    pub fn transmit_abandoned_count(&self) -> u64 {
        self.transmit_abandoned.load(Ordering::Relaxed)
    }

    pub fn malformed_frames_count(&self) -> u64 {
        self.malformed_frames.load(Ordering::Relaxed)
    }

    pub fn heartbeats_sent_count(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    pub fn classify_failures_count(&self) -> u64 {
        self.classify_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = MetricsRegistry::new();
        assert_eq!(metrics.records_appended_count(), 0);
        assert_eq!(metrics.gc_passes_count(), 0);
        assert_eq!(metrics.link_timeouts_count(), 0);
    }

    #[test]
    fn test_append_counters() {
        let metrics = MetricsRegistry::new();
        metrics.record_appended(120);
        metrics.record_appended(80);
        metrics.tombstone_written(33);
        assert_eq!(metrics.records_appended_count(), 2);
        assert_eq!(metrics.tombstones_written_count(), 1);
        assert_eq!(metrics.bytes_appended_count(), 233);
    }

    #[test]
    fn test_pressure_counters_visible() {
        let metrics = MetricsRegistry::new();
        metrics.out_of_space();
        metrics.pressure_eviction();
        metrics.pressure_eviction();
        assert_eq!(metrics.out_of_space_count(), 1);
        assert_eq!(metrics.pressure_evictions_count(), 2);
    }
}
