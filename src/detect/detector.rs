use std::sync::Arc;

use crate::detect::background::BackgroundModel;
use crate::detect::result::DetectionResult;
use crate::detect::rules::DetectionRule;
use crate::error::PipelineResult;
use crate::frame::Frame;

/// Scores frames against a sealed background. Holds no per-frame state.
pub struct Detector {
    background: Arc<BackgroundModel>,
    rule: Box<dyn DetectionRule>,
}

impl Detector {
    pub fn new(background: Arc<BackgroundModel>, rule: Box<dyn DetectionRule>) -> Self {
        Self { background, rule }
    }

    pub fn background(&self) -> &BackgroundModel {
        &self.background
    }

    pub fn rule_name(&self) -> &'static str {
        self.rule.name()
    }

    /// Decide presence for one frame. A frame whose geometry differs from the
    /// background is a `DimensionMismatch`, never a decision.
    pub fn detect(&self, frame: &Frame) -> PipelineResult<DetectionResult> {
        frame
            .pixels
            .ensure_geometry(self.background.width(), self.background.height())?;
        let frame_sum = frame.pixels.sum();
        Ok(DetectionResult {
            frame_index: frame.index,
            object_present: self
                .rule
                .object_present(&self.background, &frame.pixels, frame_sum),
            frame_sum,
            background_sum: self.background.sum(),
            rule: self.rule.name(),
        })
    }
}
