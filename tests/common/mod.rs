//! Shared helpers for the integration suites.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use satstore::classify::{Classification, Classifier, ClassifyError};
use satstore::clock::{Clock, ManualClock};
use satstore::coordinator::{Coordinator, PressureOptions};
use satstore::device::{Geometry, MemDevice};
use satstore::link::{DecodedItem, Frame, FrameDecoder, LinkOptions, LinkSession, MemChannel, SerialChannel};
use satstore::observability::MetricsRegistry;
use satstore::selection::{SelectionEngine, SelectionPolicy};
use satstore::store::{LogStore, RecoveryReport, StoreOptions};

/// Small geometry most suites use: 512-byte blocks, superblock + 5 data
/// blocks.
pub fn small_geometry() -> Geometry {
    Geometry::new(512, 6)
}

pub fn classification(label: &str, confidence: f64) -> Classification {
    Classification::new(label, confidence).unwrap()
}

/// Open a store over `device` with a shared manual clock.
pub fn open_store(
    device: MemDevice,
    opts: StoreOptions,
    clock: &Arc<ManualClock>,
) -> (LogStore<MemDevice>, RecoveryReport) {
    let clock_dyn: Arc<dyn Clock> = Arc::clone(clock) as Arc<dyn Clock>;
    LogStore::open(device, opts, clock_dyn, Arc::new(MetricsRegistry::new()))
        .expect("store opens")
}

/// Classifier that replays a scripted sequence of results.
pub struct ScriptedClassifier {
    queue: VecDeque<Classification>,
}

impl ScriptedClassifier {
    pub fn new(results: Vec<Classification>) -> Self {
        Self {
            queue: results.into(),
        }
    }
}

impl Classifier for ScriptedClassifier {
    fn classify(&mut self, _image: &[u8]) -> Result<Classification, ClassifyError> {
        self.queue
            .pop_front()
            .ok_or_else(|| ClassifyError::ClassificationFailed("script exhausted".to_string()))
    }
}

/// A full pipeline over in-memory device and channel, driven by a manual
/// clock and a scripted classifier. The controller side of the channel is
/// exposed for the test to play.
pub struct Pipeline {
    pub coordinator: Coordinator<MemDevice, MemChannel, ScriptedClassifier>,
    pub peer: MemChannel,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<MetricsRegistry>,
}

pub fn pipeline(
    device: MemDevice,
    policy: SelectionPolicy,
    link_opts: LinkOptions,
    pressure: PressureOptions,
    script: Vec<Classification>,
) -> Pipeline {
    let clock = Arc::new(ManualClock::new(0));
    let metrics = Arc::new(MetricsRegistry::new());
    let clock_dyn: Arc<dyn Clock> = Arc::clone(&clock) as Arc<dyn Clock>;

    let (store, _) = LogStore::open(
        device,
        StoreOptions::default(),
        Arc::clone(&clock_dyn),
        Arc::clone(&metrics),
    )
    .expect("store opens");

    let (ours, peer) = MemChannel::pair();
    let link = LinkSession::new(ours, link_opts, Arc::clone(&metrics), clock.now_ms());

    let coordinator = Coordinator::new(
        store,
        SelectionEngine::new(policy),
        link,
        ScriptedClassifier::new(script),
        clock_dyn,
        Arc::clone(&metrics),
        pressure,
    );

    Pipeline {
        coordinator,
        peer,
        clock,
        metrics,
    }
}

/// Drain every complete frame currently queued toward the controller.
pub fn frames_from(peer: &mut MemChannel) -> Vec<Frame> {
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; 512];
    loop {
        match peer.recv(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => decoder.push_bytes(&buf[..n]),
        }
    }
    let mut frames = Vec::new();
    while let Some(item) = decoder.next() {
        if let DecodedItem::Frame(frame) = item {
            frames.push(frame);
        }
    }
    frames
}

/// The record id of the transmit request currently on the wire, if any.
pub fn requested_record(peer: &mut MemChannel) -> Option<u64> {
    frames_from(peer).into_iter().find_map(|frame| match frame {
        Frame::TransmitRequest { record_id, .. } => Some(record_id),
        _ => None,
    })
}
