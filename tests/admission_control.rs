//! Load shedding: while one pass is in flight, every other frame is skipped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use anyhow::Result;

use bot_detector::detect::RuleSettings;
use bot_detector::ingest::encode_png;
use bot_detector::pipeline::ReloadSettings;
use bot_detector::{
    DetectionResult, DetectionSink, FrameOutcome, FramePacket, IngestionController, LogSink,
    Phase, PipelineSettings, PixelBuffer, RuleKind,
};

/// Parks the publishing pass until the test lets it go.
struct GateSink {
    entered: Mutex<Sender<u64>>,
    release: Mutex<Receiver<()>>,
    inside: AtomicUsize,
    max_inside: AtomicUsize,
}

impl DetectionSink for GateSink {
    fn publish(&self, result: &DetectionResult) -> Result<()> {
        let now = self.inside.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_inside.fetch_max(now, Ordering::SeqCst);
        self.entered.lock().unwrap().send(result.frame_index)?;
        self.release.lock().unwrap().recv()?;
        self.inside.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    controller: Arc<IngestionController>,
    sink: Arc<GateSink>,
    entered: Receiver<u64>,
    release: Sender<()>,
}

struct SharedSink(Arc<GateSink>);

impl DetectionSink for SharedSink {
    fn publish(&self, result: &DetectionResult) -> Result<()> {
        self.0.publish(result)
    }
}

fn packet(index: u64) -> FramePacket {
    let pixels = PixelBuffer::filled(4, 4, 80).unwrap();
    FramePacket::new(index, encode_png(&pixels).unwrap())
}

/// Controller with a one-frame warm-up, already sealed after frames 1 and 2.
fn harness() -> Harness {
    let (entered_tx, entered) = mpsc::channel();
    let (release, release_rx) = mpsc::channel();
    let sink = Arc::new(GateSink {
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
        inside: AtomicUsize::new(0),
        max_inside: AtomicUsize::new(0),
    });
    let settings = PipelineSettings {
        width: 4,
        height: 4,
        bg_sample: 1,
        quantile: 0.5,
        rule: RuleSettings {
            kind: RuleKind::SumBand,
            half_width: 24,
            pixel_tolerance: 25,
            changed_fraction: 0.02,
        },
        stats_interval: 0,
    };
    let controller = Arc::new(IngestionController::new(
        settings,
        ReloadSettings { verbose: false },
        Box::new(SharedSink(Arc::clone(&sink))),
    ));
    controller.on_frame(packet(1)).unwrap();
    controller.on_frame(packet(2)).unwrap();
    controller.stats().reset();
    Harness {
        controller,
        sink,
        entered,
        release,
    }
}

#[test]
fn frames_arriving_during_a_pass_are_skipped() {
    let h = harness();

    let busy = {
        let controller = Arc::clone(&h.controller);
        std::thread::spawn(move || controller.on_frame(packet(3)))
    };
    assert_eq!(h.entered.recv().unwrap(), 3);

    for index in 4..=10 {
        assert_eq!(
            h.controller.on_frame(packet(index)).unwrap(),
            FrameOutcome::Skipped
        );
    }

    h.release.send(()).unwrap();
    let outcome = busy.join().unwrap().unwrap();
    assert!(matches!(outcome, FrameOutcome::Detected(ref r) if r.frame_index == 3));

    let stats = h.controller.stats().snapshot();
    assert_eq!(stats.received, 8);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped, 7);
    assert_eq!(stats.received, stats.processed + stats.skipped);
    assert_eq!(h.sink.max_inside.load(Ordering::SeqCst), 1);

    // the guard was released: the next frame is admitted again
    h.release.send(()).unwrap();
    assert!(matches!(
        h.controller.on_frame(packet(11)).unwrap(),
        FrameOutcome::Detected(_)
    ));
}

#[test]
fn spawned_frames_shed_load_while_a_pass_is_in_flight() {
    let h = harness();

    let first = h
        .controller
        .spawn_frame(packet(3))
        .unwrap()
        .expect("pipeline is active");
    assert_eq!(h.entered.recv().unwrap(), 3);

    let burst: Vec<_> = (4..=9)
        .map(|index| {
            h.controller
                .spawn_frame(packet(index))
                .unwrap()
                .expect("pipeline is active")
        })
        .collect();
    for handle in burst {
        assert_eq!(handle.join().unwrap().unwrap(), FrameOutcome::Skipped);
    }

    h.release.send(()).unwrap();
    assert!(matches!(
        first.join().unwrap().unwrap(),
        FrameOutcome::Detected(_)
    ));

    let stats = h.controller.stats().snapshot();
    assert_eq!(stats.received, 7);
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.skipped, 6);
    assert!(stats.skipped_percent() > 80.0);
    assert_eq!(h.sink.max_inside.load(Ordering::SeqCst), 1);
}

#[test]
fn switched_off_pipeline_spawns_nothing() {
    let h = harness();
    h.controller.set_active(false);
    assert!(h.controller.spawn_frame(packet(3)).unwrap().is_none());
    let stats = h.controller.stats().snapshot();
    assert_eq!(stats.received, 1);
    assert_eq!(stats.ignored, 1);
    assert!(h.entered.try_recv().is_err());
}

/// Channel value at `offset` of frame `index`: differs per frame and per channel so
/// the order of arrival is visible in the sample sets.
fn texture(index: u64, offset: usize) -> u8 {
    ((index * 37 + offset as u64 * 11) % 256) as u8
}

fn textured(index: u64) -> FramePacket {
    let data = (0..4 * 4 * 3).map(|offset| texture(index, offset)).collect();
    let pixels = PixelBuffer::new(data, 4, 4).unwrap();
    FramePacket::new(index, encode_png(&pixels).unwrap())
}

#[test]
fn concurrent_warm_up_burst_keeps_sample_sets_ordered() {
    let settings = PipelineSettings {
        width: 4,
        height: 4,
        bg_sample: 64,
        quantile: 0.5,
        rule: RuleSettings {
            kind: RuleKind::SumBand,
            half_width: 24,
            pixel_tolerance: 25,
            changed_fraction: 0.02,
        },
        stats_interval: 0,
    };
    let controller = Arc::new(IngestionController::new(
        settings,
        ReloadSettings { verbose: false },
        Box::new(LogSink),
    ));

    // encode up front so the workers start back to back
    let packets: Vec<_> = (1..=32).map(textured).collect();
    let handles: Vec<_> = packets
        .into_iter()
        .map(|packet| {
            controller
                .spawn_frame(packet)
                .unwrap()
                .expect("pipeline is active")
        })
        .collect();

    let mut accumulated = Vec::new();
    for handle in handles {
        match handle.join().unwrap().unwrap() {
            FrameOutcome::Accumulated { index, .. } => accumulated.push(index),
            FrameOutcome::Skipped => {}
            other => panic!("unexpected warm-up outcome {:?}", other),
        }
    }

    let stats = controller.stats().snapshot();
    assert_eq!(stats.received, 32);
    assert_eq!(stats.received, stats.processed + stats.skipped);
    assert_eq!(stats.processed as usize, accumulated.len());
    assert_eq!(controller.samples_collected(), accumulated.len());
    assert_eq!(controller.phase(), Phase::WarmingUp);

    for offset in 0..4 * 4 * 3 {
        let samples = controller
            .warm_up_samples(offset / 3, offset % 3)
            .expect("still warming up");
        assert!(
            samples.windows(2).all(|pair| pair[0] <= pair[1]),
            "channel value {} out of order: {:?}",
            offset,
            samples
        );
        let mut expected: Vec<u8> = accumulated.iter().map(|&i| texture(i, offset)).collect();
        expected.sort_unstable();
        assert_eq!(samples, expected);
    }
}
