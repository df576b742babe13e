//! CLI command implementations.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::{Rng, SeedableRng};

use crate::classify::MockClassifier;
use crate::clock::SystemClock;
use crate::config::Config;
use crate::coordinator::{Coordinator, PressureOptions};
use crate::device::FileDevice;
use crate::link::{DecodedItem, Frame, FrameDecoder, LinkSession, MemChannel, SerialChannel};
use crate::observability::MetricsRegistry;
use crate::selection::SelectionEngine;
use crate::store::{LogStore, RecoveryReport, Superblock};

fn load_config(path: &Path) -> super::CliResult<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        // Tools may run against a default config; the image path still has
        // to exist for everything except `format`.
        Ok(Config::default())
    }
}

fn open_store(
    config: &Config,
    metrics: Arc<MetricsRegistry>,
) -> super::CliResult<(LogStore<FileDevice>, RecoveryReport)> {
    let device = FileDevice::open(Path::new(&config.storage.device_path), config.geometry())?;
    let (store, report) = LogStore::open(
        device,
        config.store_options(),
        Arc::new(SystemClock),
        metrics,
    )?;
    Ok((store, report))
}

/// `satstore format`: create and initialize the flash image.
pub fn format(config_path: &Path) -> super::CliResult<()> {
    let config = load_config(config_path)?;
    let image_path = Path::new(&config.storage.device_path);
    if image_path.exists() {
        return Err(super::CliError::Usage(format!(
            "refusing to format: {} already exists",
            image_path.display()
        )));
    }

    let mut device = FileDevice::create(image_path, config.geometry())?;
    Superblock::new(config.geometry(), 0, 0).write_to(&mut device)?;

    println!(
        "formatted {} ({} blocks x {} bytes)",
        image_path.display(),
        config.storage.block_count,
        config.storage.block_size
    );
    Ok(())
}

/// Scripted stand-in for the mission-management controller: acknowledges
/// every transmit request and answers heartbeats, which is all the `run`
/// simulation needs.
struct AutoResponder {
    channel: MemChannel,
    decoder: FrameDecoder,
}

impl AutoResponder {
    fn new(channel: MemChannel) -> Self {
        Self {
            channel,
            decoder: FrameDecoder::new(),
        }
    }

    fn pump(&mut self) -> super::CliResult<()> {
        let mut buf = [0u8; 256];
        loop {
            match self.channel.recv(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => self.decoder.push_bytes(&buf[..n]),
            }
        }
        while let Some(item) = self.decoder.next() {
            if let DecodedItem::Frame(frame) = item {
                match frame {
                    Frame::TransmitRequest { record_id, .. } => {
                        let _ = self.channel.send(&Frame::Ack { record_id }.encode());
                    }
                    Frame::Heartbeat => {
                        let _ = self.channel.send(&Frame::Heartbeat.encode());
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// `satstore run`: the capture loop from the flight software, against the
/// file-backed image, the mock classifier, and a simulated controller.
pub fn run_loop(config_path: &Path, captures: u32, interval_ms: u64) -> super::CliResult<()> {
    let config = load_config(config_path)?;
    let metrics = Arc::new(MetricsRegistry::new());
    let (store, report) = open_store(&config, Arc::clone(&metrics))?;
    let clock = store.clock().clone();

    let (ours, theirs) = MemChannel::pair();
    let link = LinkSession::new(
        ours,
        config.link_options(),
        Arc::clone(&metrics),
        clock.now_ms(),
    );
    let mut responder = AutoResponder::new(theirs);

    let mut coordinator = Coordinator::new(
        store,
        SelectionEngine::new(config.selection.clone()),
        link,
        MockClassifier::default(),
        clock,
        Arc::clone(&metrics),
        PressureOptions {
            eviction_batch: config.storage.eviction_batch,
            max_eviction_rounds: config.storage.max_eviction_rounds,
        },
    );
    println!(
        "recovered {} live records ({} torn discarded)",
        report.records_live, report.torn_records
    );

    let mut rng = rand::rngs::StdRng::from_entropy();
    for _ in 0..captures {
        let image: Vec<u8> = (0..rng.gen_range(512..4096)).map(|_| rng.gen()).collect();
        match coordinator.ingest(&image) {
            Ok(_) => {}
            Err(e) => eprintln!("capture dropped: {}", e),
        }

        if !coordinator.tick()? {
            break;
        }
        responder.pump()?;
        if !coordinator.tick()? {
            break;
        }
        thread::sleep(Duration::from_millis(interval_ms));
    }

    // Drain the queue before shutting down.
    let mut idle_ticks = 0;
    while idle_ticks < 8 {
        let before = coordinator.metrics().transmit_confirmed_count();
        if !coordinator.tick()? {
            break;
        }
        responder.pump()?;
        if coordinator.metrics().transmit_confirmed_count() == before {
            idle_ticks += 1;
        } else {
            idle_ticks = 0;
        }
        thread::sleep(Duration::from_millis(interval_ms));
    }

    coordinator.shutdown()?;

    let status = coordinator.status();
    println!(
        "done: {} appended, {} downlinked, {} evicted, {} live remaining",
        coordinator.metrics().records_appended_count(),
        coordinator.metrics().transmit_confirmed_count(),
        coordinator.metrics().pressure_evictions_count(),
        status.live_records
    );
    Ok(())
}

/// `satstore inspect`: block table and live record summary.
///
/// Opening the store consumes the clean-shutdown superblock, so it is
/// rewritten before returning.
pub fn inspect(config_path: &Path) -> super::CliResult<()> {
    let config = load_config(config_path)?;
    let (mut store, report) = open_store(&config, Arc::new(MetricsRegistry::new()))?;

    let stats = store.stats();
    println!(
        "image: {} | {} data blocks, {} free | {} live records, {} bytes live",
        config.storage.device_path,
        stats.data_blocks,
        stats.free_blocks,
        stats.live_records,
        stats.live_record_bytes
    );
    if report.torn_records > 0 {
        println!("warning: {} torn records discarded during scan", report.torn_records);
    }

    println!("{:<6} {:<10} {:<30} {:>10} {:>8}", "id", "state", "label", "bytes", "score");
    for meta in store.iterate_live() {
        println!(
            "{:<6} {:<10} {:<30} {:>10} {:>8.3}",
            meta.record_id,
            format!("{:?}", meta.state),
            meta.classification.label,
            meta.payload_len,
            config.selection.score(&meta.classification),
        );
    }

    store.clean_shutdown()?;
    Ok(())
}

/// `satstore recover`: export every live payload to `out`.
///
/// A record that fails its integrity check is reported and skipped; the
/// export never aborts over one bad record.
pub fn recover(config_path: &Path, out: &Path) -> super::CliResult<()> {
    let config = load_config(config_path)?;
    let (mut store, report) = open_store(&config, Arc::new(MetricsRegistry::new()))?;
    fs::create_dir_all(out)?;

    let mut exported = 0usize;
    let mut failed = 0usize;
    for meta in store.iterate_live() {
        match store.read(meta.record_id) {
            Ok(record) => {
                let file = out.join(format!("record_{}.bin", record.record_id));
                fs::write(&file, &record.payload)?;
                exported += 1;
            }
            Err(e) => {
                eprintln!("record {} unreadable: {}", meta.record_id, e);
                failed += 1;
            }
        }
    }

    println!(
        "recovered {} payloads to {} ({} unreadable, {} torn at scan)",
        exported,
        out.display(),
        failed,
        report.torn_records
    );

    store.clean_shutdown()?;
    Ok(())
}
