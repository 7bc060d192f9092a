use crate::detect::background::BackgroundModel;
use crate::frame::PixelBuffer;

use super::DetectionRule;

/// Global-intensity rule: a frame whose pixel sum stays within `half_width` of the
/// background sum (inclusive) is background only.
///
/// This is not spatial. A uniform lighting change reads as an object, and a small
/// object whose contribution fits inside the band goes unseen.
#[derive(Clone, Copy, Debug)]
pub struct SumBandRule {
    half_width: u64,
}

impl SumBandRule {
    pub fn new(half_width: u64) -> Self {
        Self { half_width }
    }

    pub fn half_width(&self) -> u64 {
        self.half_width
    }

    /// Decision on precomputed sums.
    pub fn outside_band(&self, frame_sum: u64, background_sum: u64) -> bool {
        frame_sum.abs_diff(background_sum) > self.half_width
    }
}

impl DetectionRule for SumBandRule {
    fn name(&self) -> &'static str {
        "sum_band"
    }

    fn object_present(
        &self,
        background: &BackgroundModel,
        _frame: &PixelBuffer,
        frame_sum: u64,
    ) -> bool {
        self.outside_band(frame_sum, background.sum())
    }
}
