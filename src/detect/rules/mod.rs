//! Presence decision rules.
//!
//! A rule compares one decoded frame against the sealed background and answers a
//! single question: is something in front of the camera? Geometry has already been
//! checked by the caller.

mod pixel_delta;
mod sum_band;

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};

use crate::detect::background::BackgroundModel;
use crate::frame::PixelBuffer;

pub use pixel_delta::PixelDeltaRule;
pub use sum_band::SumBandRule;

pub trait DetectionRule: Send + Sync {
    /// Rule identifier, as used in configuration.
    fn name(&self) -> &'static str;

    /// `true` when the frame differs enough from the background to count as an object.
    /// `frame_sum` is `frame.sum()`, computed once by the caller.
    fn object_present(
        &self,
        background: &BackgroundModel,
        frame: &PixelBuffer,
        frame_sum: u64,
    ) -> bool;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RuleKind {
    /// Whole-frame pixel sum against whole-background sum.
    #[default]
    SumBand,
    /// Fraction of channel values that moved by more than a tolerance.
    PixelDelta,
}

impl FromStr for RuleKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "sum_band" | "sum" | "default" => Ok(Self::SumBand),
            "pixel_delta" | "pixel" => Ok(Self::PixelDelta),
            other => Err(anyhow!(
                "unknown detection rule '{}': expected 'sum_band' or 'pixel_delta'",
                other
            )),
        }
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SumBand => write!(f, "sum_band"),
            Self::PixelDelta => write!(f, "pixel_delta"),
        }
    }
}

/// Everything needed to build the configured rule.
#[derive(Clone, Debug, PartialEq)]
pub struct RuleSettings {
    pub kind: RuleKind,
    /// Inclusive half-width of the "background only" band around the background sum.
    pub half_width: u64,
    /// Per-channel difference that counts as changed (pixel_delta only).
    pub pixel_tolerance: u8,
    /// Fraction of changed channel values that means "object" (pixel_delta only).
    pub changed_fraction: f64,
}

impl RuleSettings {
    pub fn build(&self) -> Box<dyn DetectionRule> {
        match self.kind {
            RuleKind::SumBand => Box::new(SumBandRule::new(self.half_width)),
            RuleKind::PixelDelta => Box::new(PixelDeltaRule::new(
                self.pixel_tolerance,
                self.changed_fraction,
            )),
        }
    }
}

/// Default band half-width for a `width x height` three-channel frame: half the
/// number of channel values.
pub fn default_half_width(width: u32, height: u32) -> u64 {
    u64::from(width) * u64::from(height) * crate::frame::CHANNELS as u64 / 2
}
