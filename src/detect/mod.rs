mod background;
mod detector;
mod result;
pub mod rules;
mod samples;

pub use background::{rank_for, BackgroundAccumulator, BackgroundModel, DEFAULT_QUANTILE};
pub use detector::Detector;
pub use result::DetectionResult;
pub use rules::{DetectionRule, PixelDeltaRule, RuleKind, RuleSettings, SumBandRule};
pub use samples::ChannelSampleSet;
