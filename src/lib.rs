//! Camera-tower bot detector.
//!
//! Watches a fixed camera and answers one question per frame: is something that
//! is not part of the scene in view?
//!
//! # Pipeline
//!
//! 1. **Warm-up**: the first `bg_sample` frames feed per-pixel, per-channel
//!    ordered sample sets.
//! 2. **Seal**: the next frame freezes the background model, each value being
//!    the configured order statistic (upper median by default) of its samples.
//! 3. **Detect**: every later frame is compared to the background and one
//!    boolean is published.
//!
//! Frames arrive faster than they can be processed. At most one processing
//! pass runs at a time; a frame that arrives while a pass is in flight is
//! dropped and counted, never queued.
//!
//! # Module Structure
//!
//! - `frame`: packets, decoded pixel buffers, frames
//! - `ingest`: frame sources and the payload decoder
//! - `detect`: background accumulation, sealing, detection rules
//! - `pipeline`: admission control, phase routing, throughput stats
//! - `sink` / `transport`: where decisions go (log, channel, MQTT)
//! - `config`: file and environment configuration

pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod sink;
pub mod transport;

pub use config::DetectorConfig;
pub use detect::{BackgroundAccumulator, BackgroundModel, DetectionResult, Detector, RuleKind};
pub use error::{PipelineError, PipelineResult};
pub use frame::{Frame, FramePacket, PixelBuffer, CHANNELS};
pub use ingest::{open_source, FrameDecoder, FrameSource};
pub use pipeline::{FrameOutcome, IngestionController, Phase, PipelineSettings, RunStats};
pub use sink::{ChannelSink, DetectionSink, LogSink};
