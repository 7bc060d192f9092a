//! Detection pipeline: admission control, routing and throughput accounting.

mod controller;
mod stats;

pub use controller::{
    FrameOutcome, IngestionController, Phase, PipelineSettings, ReloadSettings,
};
pub use stats::{RunStats, StatsTracker};
