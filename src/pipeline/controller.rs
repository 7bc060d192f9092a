//! Frame admission and routing.
//!
//! One `Mutex<PassState>` stands for "a processing pass is in flight". Arriving
//! frames only ever `try_lock` it: a frame that loses the race is counted as
//! skipped and dropped on the spot. It is never queued and never retried. The
//! winner runs decode, route and publish to completion while holding the guard,
//! and the guard is released on every exit path when it goes out of scope.
//!
//! The accumulator, the sealed model and the detector live inside `PassState`,
//! so the pass lock is the only synchronisation they need.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread::{self, JoinHandle};

use crate::detect::{
    BackgroundAccumulator, BackgroundModel, DetectionResult, Detector, RuleSettings,
};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{Frame, FramePacket};
use crate::ingest::FrameDecoder;
use crate::pipeline::stats::StatsTracker;
use crate::sink::DetectionSink;

/// Settings fixed for the lifetime of a controller. Changing any of them means
/// building a new controller.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineSettings {
    /// Expected frame geometry. Every decoded frame must match it.
    pub width: u32,
    pub height: u32,
    /// Warm-up window N (`BG_SAMPLE`).
    pub bg_sample: usize,
    /// Order statistic used when sealing, as a quantile of the collected samples.
    pub quantile: f64,
    pub rule: RuleSettings,
    /// Log and reset the stats every this many passes. 0 disables.
    pub stats_interval: u64,
}

/// Settings that a periodic reload may change on a live controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReloadSettings {
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    WarmingUp,
    /// Transient: only observable from inside the sealing pass.
    Sealing,
    Detecting,
    /// A fatal error ended the run. Restart required.
    Halted,
}

/// What happened to one arriving frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    /// Switched off; counted as received and ignored.
    Inactive,
    /// Another pass was in flight.
    Skipped,
    /// Admitted, but the payload did not decode. Model state untouched.
    DecodeFailed { index: u64, reason: String },
    /// Warm-up sample added; `samples` per channel collected so far.
    Accumulated { index: u64, samples: usize },
    /// Background sealed on this frame. Nothing is published for it.
    Sealed {
        index: u64,
        samples: usize,
        background_sum: u64,
    },
    /// Frame scored and published.
    Detected(DetectionResult),
    /// Warm-up index arriving after the background was sealed; refused.
    LateWarmUp { index: u64 },
}

struct PassState {
    phase: Phase,
    accumulator: BackgroundAccumulator,
    background: Option<Arc<BackgroundModel>>,
    detector: Option<Detector>,
    /// Subtracted from frame indices to find the warm-up window position.
    window_offset: u64,
    passes: u64,
    halt_reason: Option<String>,
}

pub struct IngestionController {
    settings: PipelineSettings,
    decoder: FrameDecoder,
    sink: Box<dyn DetectionSink>,
    stats: StatsTracker,
    active: AtomicBool,
    verbose: AtomicBool,
    pass: Mutex<PassState>,
}

impl IngestionController {
    pub fn new(
        settings: PipelineSettings,
        reload: ReloadSettings,
        sink: Box<dyn DetectionSink>,
    ) -> Self {
        let accumulator = BackgroundAccumulator::new(settings.bg_sample, settings.quantile);
        Self {
            decoder: FrameDecoder::new(),
            sink,
            stats: StatsTracker::new(),
            active: AtomicBool::new(true),
            verbose: AtomicBool::new(reload.verbose),
            pass: Mutex::new(PassState {
                phase: Phase::WarmingUp,
                accumulator,
                background: None,
                detector: None,
                window_offset: 0,
                passes: 0,
                halt_reason: None,
            }),
            settings,
        }
    }

    pub fn with_decoder(mut self, decoder: FrameDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    /// Enable/disable switch. While off, frames are counted but never admitted.
    pub fn set_active(&self, active: bool) {
        let was = self.active.swap(active, Ordering::SeqCst);
        if was != active {
            log::info!("bot detector {}", if active { "enabled" } else { "disabled" });
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.load(Ordering::Relaxed)
    }

    /// Apply a freshly read configuration. Only the reloadable subset takes effect;
    /// anything else is reported and waits for a restart.
    pub fn reload(&self, settings: &PipelineSettings, reload: ReloadSettings) {
        let old = self.verbose.swap(reload.verbose, Ordering::Relaxed);
        if old != reload.verbose {
            log::info!("Verbose is now {}", reload.verbose);
        }
        if settings != &self.settings {
            log::warn!("pipeline settings changed on reload; they take effect after restart");
        }
    }

    /// Current phase. Waits for an in-flight pass; not for the producer path.
    pub fn phase(&self) -> Phase {
        self.lock_for_inspection().phase
    }

    /// Sealed background, once there is one.
    pub fn background(&self) -> Option<Arc<BackgroundModel>> {
        self.lock_for_inspection().background.clone()
    }

    /// Warm-up samples held per channel. Waits for an in-flight pass.
    pub fn samples_collected(&self) -> usize {
        self.lock_for_inspection().accumulator.samples_collected()
    }

    /// Copy of the ordered warm-up samples for one pixel channel, while warming up.
    /// Waits for an in-flight pass.
    pub fn warm_up_samples(&self, pixel: usize, channel: usize) -> Option<Vec<u8>> {
        self.lock_for_inspection()
            .accumulator
            .sample_set(pixel, channel)
            .map(|set| set.as_slice().to_vec())
    }

    /// Why the run halted, if it did.
    pub fn halt_reason(&self) -> Option<String> {
        self.lock_for_inspection().halt_reason.clone()
    }

    /// Deliver a frame and, if admitted, process it on the calling thread.
    pub fn on_frame(&self, packet: FramePacket) -> PipelineResult<FrameOutcome> {
        if !self.arrive() {
            return Ok(FrameOutcome::Inactive);
        }
        self.admit(packet)
    }

    /// Deliver a frame and process it on a new worker thread; admission happens on
    /// the worker. Returns `None` when the pipeline is switched off. A frame whose
    /// worker cannot be started is counted as skipped.
    pub fn spawn_frame(
        self: &Arc<Self>,
        packet: FramePacket,
    ) -> std::io::Result<Option<JoinHandle<PipelineResult<FrameOutcome>>>> {
        if !self.arrive() {
            return Ok(None);
        }
        let controller = Arc::clone(self);
        thread::Builder::new()
            .name("bot-detector-pass".to_string())
            .spawn(move || {
                let index = packet.index;
                let outcome = controller.admit(packet);
                if let Err(e) = &outcome {
                    log::warn!("frame {} not processed: {}", index, e);
                }
                outcome
            })
            .map(Some)
            .map_err(|e| {
                log::warn!("could not start a pass worker: {}", e);
                self.stats.record_skipped();
                e
            })
    }

    fn arrive(&self) -> bool {
        if self.is_active() {
            true
        } else {
            self.stats.record_ignored();
            false
        }
    }

    fn admit(&self, packet: FramePacket) -> PipelineResult<FrameOutcome> {
        let mut state = match self.pass.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => {
                self.stats.record_skipped();
                return Ok(FrameOutcome::Skipped);
            }
            Err(TryLockError::Poisoned(_)) => {
                self.stats.record_skipped();
                return Err(PipelineError::LockPoisoned);
            }
        };
        self.stats.record_processed();
        self.run_pass(&mut state, packet)
    }

    fn run_pass(&self, state: &mut PassState, packet: FramePacket) -> PipelineResult<FrameOutcome> {
        state.passes += 1;
        self.report_intermittently(state.passes);

        if state.phase == Phase::Halted {
            let reason = state.halt_reason.clone().unwrap_or_default();
            return Err(PipelineError::Halted(reason));
        }

        let pixels = match self.decoder.decode(&packet.payload) {
            Ok(pixels) => pixels,
            Err(e) => {
                self.stats.record_failed();
                log::warn!("Could not load image {}: {}", packet.index, e);
                return Ok(FrameOutcome::DecodeFailed {
                    index: packet.index,
                    reason: e.to_string(),
                });
            }
        };
        let frame = Frame::new(packet.index, packet.timestamp, pixels);

        let outcome = frame
            .pixels
            .ensure_geometry(self.settings.width, self.settings.height)
            .and_then(|()| self.route(state, &frame));
        if let Err(e) = &outcome {
            if e.is_fatal() {
                halt(state, e);
            }
        }
        outcome
    }

    fn route(&self, state: &mut PassState, frame: &Frame) -> PipelineResult<FrameOutcome> {
        let in_window = self.in_warm_up_window(state, frame.index);
        match state.phase {
            Phase::WarmingUp if in_window => self.accumulate(state, frame),
            Phase::WarmingUp | Phase::Sealing => self.seal(state, frame),
            Phase::Detecting if in_window => {
                log::debug!("refusing late warm-up frame {}", frame.index);
                Ok(FrameOutcome::LateWarmUp { index: frame.index })
            }
            Phase::Detecting => self.detect(state, frame),
            Phase::Halted => Err(PipelineError::Halted(
                state.halt_reason.clone().unwrap_or_default(),
            )),
        }
    }

    fn in_warm_up_window(&self, state: &PassState, index: u64) -> bool {
        index.saturating_sub(state.window_offset) <= self.settings.bg_sample as u64
    }

    fn accumulate(&self, state: &mut PassState, frame: &Frame) -> PipelineResult<FrameOutcome> {
        let samples = state.accumulator.accumulate(&frame.pixels)?;
        if self.is_verbose() && samples % 100 == 1 {
            log::info!(
                "warm-up: {} of {} background samples",
                samples,
                self.settings.bg_sample
            );
        }
        Ok(FrameOutcome::Accumulated {
            index: frame.index,
            samples,
        })
    }

    fn seal(&self, state: &mut PassState, frame: &Frame) -> PipelineResult<FrameOutcome> {
        state.phase = Phase::Sealing;
        match state.accumulator.seal() {
            Ok(model) => {
                let model = Arc::new(model);
                log::info!(
                    "background sealed at frame {} from {} samples (sum {})",
                    frame.index,
                    model.samples(),
                    model.sum()
                );
                let outcome = FrameOutcome::Sealed {
                    index: frame.index,
                    samples: model.samples(),
                    background_sum: model.sum(),
                };
                let detector = Detector::new(Arc::clone(&model), self.settings.rule.build());
                log::info!("detecting with rule {}", detector.rule_name());
                state.detector = Some(detector);
                state.background = Some(model);
                state.phase = Phase::Detecting;
                Ok(outcome)
            }
            Err(PipelineError::EmptyBackground) => {
                // Every warm-up frame was lost; open a fresh window starting here.
                log::warn!(
                    "no warm-up samples collected by frame {}; restarting warm-up",
                    frame.index
                );
                state.phase = Phase::WarmingUp;
                state.window_offset = frame.index.saturating_sub(1);
                self.accumulate(state, frame)
            }
            Err(e) => Err(e),
        }
    }

    fn detect(&self, state: &mut PassState, frame: &Frame) -> PipelineResult<FrameOutcome> {
        let detector = state
            .detector
            .as_ref()
            .ok_or_else(|| PipelineError::Halted("detector missing after sealing".to_string()))?;
        let result = detector.detect(frame)?;

        if self.is_verbose() {
            log::info!("Background sum: {}", result.background_sum);
            log::info!("Image sum: {}", result.frame_sum);
        } else {
            log::debug!(
                "frame {}: image sum {} vs background sum {}",
                result.frame_index,
                result.frame_sum,
                result.background_sum
            );
        }

        if let Err(e) = self.sink.publish(&result) {
            log::error!("failed to publish detection for frame {}: {}", result.frame_index, e);
        }
        Ok(FrameOutcome::Detected(result))
    }

    fn report_intermittently(&self, passes: u64) {
        let interval = self.settings.stats_interval;
        if interval == 0 || passes % interval != 0 {
            return;
        }
        let stats = self.stats.take();
        if self.is_verbose() {
            log::info!("{:3}: {}", passes, stats);
        } else {
            log::debug!("{:3}: {}", passes, stats);
        }
    }

    fn lock_for_inspection(&self) -> MutexGuard<'_, PassState> {
        self.pass
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn halt(state: &mut PassState, err: &PipelineError) {
    log::error!("fatal pipeline error, halting until restart: {}", err);
    state.phase = Phase::Halted;
    state.halt_reason = Some(err.to_string());
    state.accumulator.discard();
    state.detector = None;
    state.background = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::RuleKind;
    use crate::frame::PixelBuffer;
    use crate::ingest::encode_png;
    use crate::sink::ChannelSink;
    use std::sync::mpsc;

    fn settings(width: u32, height: u32, bg_sample: usize, half_width: u64) -> PipelineSettings {
        PipelineSettings {
            width,
            height,
            bg_sample,
            quantile: 0.5,
            rule: RuleSettings {
                kind: RuleKind::SumBand,
                half_width,
                pixel_tolerance: 25,
                changed_fraction: 0.02,
            },
            stats_interval: 0,
        }
    }

    fn packet(index: u64, width: u32, height: u32, value: u8) -> FramePacket {
        let pixels = PixelBuffer::filled(width, height, value).unwrap();
        FramePacket::new(index, encode_png(&pixels).unwrap())
    }

    fn controller(
        settings: PipelineSettings,
    ) -> (IngestionController, mpsc::Receiver<DetectionResult>) {
        let (tx, rx) = mpsc::channel();
        let controller = IngestionController::new(
            settings,
            ReloadSettings { verbose: false },
            Box::new(ChannelSink::new(tx)),
        );
        (controller, rx)
    }

    #[test]
    fn phases_advance_warm_up_seal_detect() {
        let (ctl, rx) = controller(settings(2, 1, 2, 0));
        assert_eq!(ctl.phase(), Phase::WarmingUp);

        assert!(matches!(
            ctl.on_frame(packet(1, 2, 1, 10)).unwrap(),
            FrameOutcome::Accumulated { samples: 1, .. }
        ));
        assert!(matches!(
            ctl.on_frame(packet(2, 2, 1, 20)).unwrap(),
            FrameOutcome::Accumulated { samples: 2, .. }
        ));
        assert!(matches!(
            ctl.on_frame(packet(3, 2, 1, 99)).unwrap(),
            FrameOutcome::Sealed { samples: 2, .. }
        ));
        assert_eq!(ctl.phase(), Phase::Detecting);
        assert!(rx.try_recv().is_err(), "sealing frame must not publish");

        // upper median of [10, 20] is 20
        assert_eq!(ctl.background().unwrap().sum(), 20 * 6);

        let outcome = ctl.on_frame(packet(4, 2, 1, 20)).unwrap();
        assert!(matches!(outcome, FrameOutcome::Detected(ref r) if !r.object_present));
        assert_eq!(rx.try_recv().unwrap().frame_index, 4);
    }

    #[test]
    fn switched_off_frames_are_counted_but_not_admitted() {
        let (ctl, _rx) = controller(settings(2, 1, 3, 0));
        ctl.set_active(false);
        assert_eq!(ctl.on_frame(packet(1, 2, 1, 10)).unwrap(), FrameOutcome::Inactive);
        assert_eq!(ctl.samples_collected(), 0);
        let stats = ctl.stats().snapshot();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.ignored, 1);
        assert_eq!(stats.processed, 0);

        ctl.set_active(true);
        assert!(matches!(
            ctl.on_frame(packet(2, 2, 1, 10)).unwrap(),
            FrameOutcome::Accumulated { .. }
        ));
    }

    #[test]
    fn wrong_geometry_halts_the_run() {
        let (ctl, _rx) = controller(settings(2, 1, 3, 0));
        ctl.on_frame(packet(1, 2, 1, 10)).unwrap();
        let err = ctl.on_frame(packet(2, 1, 2, 10)).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
        assert_eq!(ctl.phase(), Phase::Halted);
        assert_eq!(ctl.samples_collected(), 0);
        assert!(ctl.halt_reason().is_some());

        let err = ctl.on_frame(packet(3, 2, 1, 10)).unwrap_err();
        assert!(matches!(err, PipelineError::Halted(_)));
    }

    #[test]
    fn late_warm_up_frame_is_refused_after_sealing() {
        let (ctl, rx) = controller(settings(2, 1, 1, 0));
        ctl.on_frame(packet(1, 2, 1, 50)).unwrap();
        ctl.on_frame(packet(2, 2, 1, 50)).unwrap();
        let before = ctl.background().unwrap();

        assert_eq!(
            ctl.on_frame(packet(1, 2, 1, 200)).unwrap(),
            FrameOutcome::LateWarmUp { index: 1 }
        );
        assert_eq!(*ctl.background().unwrap(), *before);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn warm_up_restarts_when_every_sample_was_lost() {
        let (ctl, _rx) = controller(settings(2, 1, 2, 0));
        for index in 1..=2 {
            let outcome = ctl.on_frame(FramePacket::new(index, b"garbage".to_vec())).unwrap();
            assert!(matches!(outcome, FrameOutcome::DecodeFailed { .. }));
        }
        // frame 3 would seal, but there is nothing to seal: it opens a new window
        assert!(matches!(
            ctl.on_frame(packet(3, 2, 1, 40)).unwrap(),
            FrameOutcome::Accumulated { index: 3, samples: 1 }
        ));
        assert!(matches!(
            ctl.on_frame(packet(4, 2, 1, 40)).unwrap(),
            FrameOutcome::Accumulated { index: 4, samples: 2 }
        ));
        assert!(matches!(
            ctl.on_frame(packet(5, 2, 1, 40)).unwrap(),
            FrameOutcome::Sealed { index: 5, .. }
        ));
    }

    #[test]
    fn oversized_payload_is_a_decode_failure() {
        let (tx, _rx) = mpsc::channel();
        let ctl = IngestionController::new(
            settings(2, 1, 2, 0),
            ReloadSettings { verbose: false },
            Box::new(ChannelSink::new(tx)),
        )
        .with_decoder(FrameDecoder::new().with_max_payload_bytes(8));
        let outcome = ctl.on_frame(packet(1, 2, 1, 10)).unwrap();
        assert!(matches!(outcome, FrameOutcome::DecodeFailed { index: 1, .. }));
        assert_eq!(ctl.phase(), Phase::WarmingUp);
        assert_eq!(ctl.stats().snapshot().failed, 1);
    }

    #[test]
    fn reload_applies_verbosity_only() {
        let (ctl, _rx) = controller(settings(2, 1, 2, 0));
        assert!(!ctl.is_verbose());
        let mut changed = ctl.settings().clone();
        changed.bg_sample = 50;
        ctl.reload(&changed, ReloadSettings { verbose: true });
        assert!(ctl.is_verbose());
        assert_eq!(ctl.settings().bg_sample, 2);
    }
}
