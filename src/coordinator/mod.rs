//! Pipeline coordinator.
//!
//! Owns the store, the selection engine, the link session, and the
//! classifier, and is the single serialized path through which every
//! operation flows: capture -> classify -> append -> rank -> transmit ->
//! confirm -> tombstone -> reclaim. Callers hold `&mut Coordinator`; that
//! exclusive borrow is the mutual-exclusion discipline of the whole
//! subsystem (wrap it in a `Mutex` to share it).
//!
//! The coordinator also owns the two cross-component policies that would
//! otherwise create circular ownership: eviction under pressure (the store
//! needs the selection engine's "what to sacrifice" answer) and the
//! confirm-then-reclaim lifecycle (the link's resolutions drive store state
//! transitions).

use std::sync::Arc;

use thiserror::Error;

use crate::classify::{Classifier, ClassifyError};
use crate::clock::Clock;
use crate::device::BlockDevice;
use crate::link::{
    ControllerCommand, LinkError, LinkEvent, LinkSession, SerialChannel, TransmitHandle,
};
use crate::observability::{Logger, MetricsRegistry, Severity};
use crate::selection::SelectionEngine;
use crate::store::{LogStore, RecordId, StoreError};

/// Pressure-eviction tunables.
#[derive(Debug, Clone, Copy)]
pub struct PressureOptions {
    /// Candidates requested from the selection engine per round.
    pub eviction_batch: usize,
    /// Rounds attempted before an append is refused.
    pub max_eviction_rounds: u32,
}

impl Default for PressureOptions {
    fn default() -> Self {
        Self {
            eviction_batch: 4,
            max_eviction_rounds: 4,
        }
    }
}

/// Errors surfaced by coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Point-in-time pipeline status, for STATUS_REPORT and the CLI.
#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot {
    pub live_records: usize,
    pub live_record_bytes: u64,
    pub free_blocks: u32,
    pub data_blocks: u32,
    pub in_flight: usize,
}

/// The onboard data-management pipeline.
pub struct Coordinator<D: BlockDevice, C: SerialChannel, K: Classifier> {
    store: LogStore<D>,
    selection: SelectionEngine,
    link: LinkSession<C>,
    classifier: K,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsRegistry>,
    pressure: PressureOptions,
    shutdown_requested: bool,
}

impl<D: BlockDevice, C: SerialChannel, K: Classifier> Coordinator<D, C, K> {
    /// Assemble the pipeline and rebuild the ranking from the recovered
    /// store: every retained record re-enters the selection engine exactly
    /// as a fresh classification would have inserted it.
    pub fn new(
        store: LogStore<D>,
        mut selection: SelectionEngine,
        link: LinkSession<C>,
        classifier: K,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsRegistry>,
        pressure: PressureOptions,
    ) -> Self {
        for meta in store.iterate_live() {
            selection.on_classified(meta.record_id, &meta.classification, meta.created_at);
        }
        Self {
            store,
            selection,
            link,
            classifier,
            clock,
            metrics,
            pressure,
            shutdown_requested: false,
        }
    }

    /// Classify and persist one captured image.
    ///
    /// On capacity pressure, lower-priority records are sacrificed (through
    /// the selection engine's ranking) and the append retried; the append is
    /// refused only once eviction has been attempted and nothing rankable
    /// below the incoming record remains.
    pub fn ingest(&mut self, image: &[u8]) -> Result<RecordId, CoordinatorError> {
        let classification = match self.classifier.classify(image) {
            Ok(c) => c,
            Err(e) => {
                self.metrics.classify_failure();
                Logger::log_stderr(
                    Severity::Error,
                    "classification_failed",
                    &[("error", &e.to_string())],
                );
                return Err(e.into());
            }
        };
        let incoming_score = self.selection.score(&classification);

        let mut rounds = 0u32;
        let record_id = loop {
            match self.store.append(&classification, image) {
                Ok(record_id) => break record_id,
                Err(e) if e.is_capacity() && rounds < self.pressure.max_eviction_rounds => {
                    rounds += 1;
                    if !self.evict_below(incoming_score)? {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        };

        let meta = self
            .store
            .meta(record_id)
            .expect("record appended this call");
        self.selection
            .on_classified(record_id, &meta.classification, meta.created_at);
        Logger::log(
            Severity::Info,
            "record_stored",
            &[
                ("label", &meta.classification.label),
                ("record_id", &record_id.to_string()),
                ("score", &format!("{:.3}", incoming_score)),
            ],
        );
        Ok(record_id)
    }

    /// Sacrifice the single lowest-ranked candidate scoring strictly below
    /// `incoming_score`. One record per round: the caller retries the append
    /// in between, so no more data is dropped than the append needs.
    fn evict_below(&mut self, incoming_score: f64) -> Result<bool, CoordinatorError> {
        let candidates = self.selection.lowest_priority(self.pressure.eviction_batch);

        for (record_id, score) in candidates {
            // Candidates come lowest-first; past this point everything
            // outranks the incoming record and is not up for sacrifice.
            if score >= incoming_score {
                break;
            }
            if self.link.outstanding() == Some(record_id) {
                self.link.cancel(record_id);
            }
            match self.store.tombstone(record_id) {
                Ok(()) => {
                    self.selection.on_evicted(record_id);
                    self.metrics.pressure_eviction();
                    Logger::log(
                        Severity::Warn,
                        "evicted_under_pressure",
                        &[
                            ("record_id", &record_id.to_string()),
                            ("score", &format!("{:.3}", score)),
                        ],
                    );
                    return Ok(true);
                }
                Err(e) if e.is_capacity() => return Err(e.into()),
                Err(_) => {
                    // Already gone (GC discard or a prior eviction); drop the
                    // stale ranking entry and try the next candidate.
                    self.selection.on_evicted(record_id);
                }
            }
        }
        Ok(false)
    }

    /// One cooperative step: pump the link, resolve outcomes, issue the next
    /// transmit request, run proactive GC. Never blocks. Returns true while
    /// the pipeline should keep running (false after a controller-ordered
    /// shutdown).
    pub fn tick(&mut self) -> Result<bool, CoordinatorError> {
        let now = self.clock.now_ms();

        for event in self.link.poll(now)? {
            match event {
                LinkEvent::Confirmed { record_id } => self.on_confirmed(record_id)?,
                LinkEvent::Rejected { record_id, .. } | LinkEvent::GaveUp { record_id } => {
                    self.on_returned(record_id);
                }
                LinkEvent::LateResponse { .. } => {}
                LinkEvent::Command(ControllerCommand::Shutdown) => {
                    self.shutdown_requested = true;
                }
                LinkEvent::Command(ControllerCommand::StatusRequest) => {
                    let status = self.status();
                    self.link.send_status_report(
                        status.live_records as u32,
                        status.free_blocks,
                        status.in_flight as u32,
                        status.live_record_bytes,
                    )?;
                }
                LinkEvent::LinkDown { .. } => {}
            }
        }

        if self.link.is_idle() && !self.shutdown_requested {
            self.issue_next_request(now)?;
        }

        self.store.maybe_reclaim()?;

        Ok(!self.shutdown_requested)
    }

    /// Confirm-then-reclaim: the controller has the record, so its space can
    /// go back to the pool.
    fn on_confirmed(&mut self, record_id: RecordId) -> Result<(), CoordinatorError> {
        match self.store.mark_transmitted(record_id) {
            Ok(()) => {
                self.store.tombstone(record_id)?;
                self.selection.on_evicted(record_id);
                Logger::log(
                    Severity::Info,
                    "record_downlinked",
                    &[("record_id", &record_id.to_string())],
                );
                Ok(())
            }
            Err(_) => {
                // Evicted between request and confirmation; the data is gone
                // and the confirmation is moot.
                Logger::log(
                    Severity::Info,
                    "confirm_for_missing_record",
                    &[("record_id", &record_id.to_string())],
                );
                Ok(())
            }
        }
    }

    /// Rejection or retry exhaustion: the record goes back into the ranking.
    fn on_returned(&mut self, record_id: RecordId) {
        match self.store.release_pending(record_id) {
            Ok(()) => {
                self.selection.release_pending(record_id);
            }
            Err(_) => {
                self.selection.on_evicted(record_id);
            }
        }
    }

    fn issue_next_request(&mut self, now: u64) -> Result<(), CoordinatorError> {
        loop {
            let Some(record_id) = self.selection.next_for_transmit(1).first().copied() else {
                return Ok(());
            };
            let Some(meta) = self.store.meta(record_id) else {
                // Discarded by GC after ranking; drop the stale entry.
                self.selection.on_evicted(record_id);
                continue;
            };
            if self.store.mark_pending(record_id).is_err() {
                self.selection.on_evicted(record_id);
                continue;
            }
            self.selection.mark_pending(record_id);

            let priority = self
                .selection
                .score_for(record_id)
                .unwrap_or(0.0) as f32;
            let handle = TransmitHandle {
                record_id,
                priority,
                payload_len: meta.payload_len,
                block: meta.location.block,
                offset: meta.location.offset,
            };
            if let Err(e) = self.link.request_transmit(&handle, now) {
                // Channel fault: put the record back before surfacing it.
                let _ = self.store.release_pending(record_id);
                self.selection.release_pending(record_id);
                return Err(e.into());
            }
            return Ok(());
        }
    }

    pub fn status(&self) -> StatusSnapshot {
        let stats = self.store.stats();
        StatusSnapshot {
            live_records: stats.live_records,
            live_record_bytes: stats.live_record_bytes,
            free_blocks: stats.free_blocks,
            data_blocks: stats.data_blocks,
            in_flight: self.selection.pending_count(),
        }
    }

    pub fn recovery_seed_count(&self) -> usize {
        self.selection.len()
    }

    /// Write the clean-shutdown superblock.
    pub fn shutdown(&mut self) -> Result<(), CoordinatorError> {
        self.store.clean_shutdown()?;
        Ok(())
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn store(&self) -> &LogStore<D> {
        &self.store
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }
}
