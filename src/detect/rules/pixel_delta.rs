use crate::detect::background::BackgroundModel;
use crate::frame::PixelBuffer;

use super::DetectionRule;

/// Spatial rule: counts channel values that moved more than `tolerance` away from
/// the background and reports an object when their share exceeds `changed_fraction`.
///
/// Ignores lighting drift within the tolerance and notices small objects that the
/// sum band would absorb. Opt-in; the sum band stays the default.
#[derive(Clone, Copy, Debug)]
pub struct PixelDeltaRule {
    tolerance: u8,
    changed_fraction: f64,
}

impl PixelDeltaRule {
    pub fn new(tolerance: u8, changed_fraction: f64) -> Self {
        Self {
            tolerance,
            changed_fraction,
        }
    }

    /// Fraction of channel values that differ from the background by more than the
    /// tolerance.
    pub fn changed_share(&self, background: &PixelBuffer, frame: &PixelBuffer) -> f64 {
        if frame.is_empty() {
            return 0.0;
        }
        let changed = background
            .as_slice()
            .iter()
            .zip(frame.as_slice())
            .filter(|&(&bg, &px)| bg.abs_diff(px) > self.tolerance)
            .count();
        changed as f64 / frame.len() as f64
    }
}

impl DetectionRule for PixelDeltaRule {
    fn name(&self) -> &'static str {
        "pixel_delta"
    }

    fn object_present(
        &self,
        background: &BackgroundModel,
        frame: &PixelBuffer,
        _frame_sum: u64,
    ) -> bool {
        self.changed_share(background.pixels(), frame) > self.changed_fraction
    }
}
