//! Median background model.
//!
//! `BackgroundAccumulator` collects the warm-up window into ordered sample sets and
//! seals them once into an immutable `BackgroundModel`. After sealing the sample
//! storage is released and every further accumulation attempt is refused.
//!
//! Rank policy: the sealed value is the element at index `floor(q * len)` of the
//! ascending samples, clamped to the last element. With the default `q = 0.5` that
//! is the true median for an odd count and the upper median (index `len / 2`) for
//! an even count. There is no averaging of the two middle values.

use crate::error::{PipelineError, PipelineResult};
use crate::frame::{PixelBuffer, CHANNELS};

use super::samples::{ChannelSampleSet, SampleSlab};

pub const DEFAULT_QUANTILE: f64 = 0.5;

// ----------------------------------------------------------------------------
// BackgroundModel
// ----------------------------------------------------------------------------

/// Sealed background estimate. Immutable; the pixel sum is computed once here.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackgroundModel {
    pixels: PixelBuffer,
    sum: u64,
    samples: usize,
}

impl BackgroundModel {
    /// Wrap an already-estimated background (`samples` records how many warm-up
    /// frames went into it).
    pub fn new(pixels: PixelBuffer, samples: usize) -> Self {
        let sum = pixels.sum();
        Self {
            pixels,
            sum,
            samples,
        }
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn sum(&self) -> u64 {
        self.sum
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Warm-up frames that contributed to this model.
    pub fn samples(&self) -> usize {
        self.samples
    }
}

// ----------------------------------------------------------------------------
// BackgroundAccumulator
// ----------------------------------------------------------------------------

enum AccumulatorState {
    Empty,
    Accumulating {
        width: u32,
        height: u32,
        slab: SampleSlab,
    },
    Sealed,
}

pub struct BackgroundAccumulator {
    window: usize,
    quantile: f64,
    state: AccumulatorState,
}

impl BackgroundAccumulator {
    /// `window` is the warm-up sample count N; `quantile` selects the rank.
    pub fn new(window: usize, quantile: f64) -> Self {
        Self {
            window: window.max(1),
            quantile: quantile.clamp(0.0, 1.0),
            state: AccumulatorState::Empty,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Warm-up frames accumulated so far (0 once sealed).
    pub fn samples_collected(&self) -> usize {
        match &self.state {
            AccumulatorState::Accumulating { slab, .. } => slab.len(),
            AccumulatorState::Empty | AccumulatorState::Sealed => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.state, AccumulatorState::Empty)
    }

    pub fn is_sealed(&self) -> bool {
        matches!(self.state, AccumulatorState::Sealed)
    }

    /// Ordered samples for one pixel channel. `pixel` is the row-major pixel index.
    pub fn sample_set(&self, pixel: usize, channel: usize) -> Option<ChannelSampleSet<'_>> {
        if channel >= CHANNELS {
            return None;
        }
        match &self.state {
            AccumulatorState::Accumulating { slab, .. } => {
                slab.sample_set(pixel.checked_mul(CHANNELS)? + channel)
            }
            AccumulatorState::Empty | AccumulatorState::Sealed => None,
        }
    }

    /// Add one warm-up frame. Returns the number of samples now held per channel.
    ///
    /// The first frame fixes the geometry; a later frame of a different size is a
    /// `DimensionMismatch`. Frames beyond the window are dropped with a warning.
    pub fn accumulate(&mut self, pixels: &PixelBuffer) -> PipelineResult<usize> {
        match &mut self.state {
            AccumulatorState::Sealed => Err(PipelineError::AlreadySealed),
            AccumulatorState::Empty => {
                self.state = AccumulatorState::Accumulating {
                    width: pixels.width(),
                    height: pixels.height(),
                    slab: SampleSlab::seed(pixels.as_slice(), self.window),
                };
                Ok(1)
            }
            AccumulatorState::Accumulating {
                width,
                height,
                slab,
            } => {
                pixels.ensure_geometry(*width, *height)?;
                if slab.is_full() {
                    log::warn!(
                        "warm-up window of {} samples already full; dropping extra frame",
                        self.window
                    );
                    return Ok(slab.len());
                }
                slab.insert(pixels.as_slice());
                Ok(slab.len())
            }
        }
    }

    /// Read the selected order statistic of every sample set into a `BackgroundModel`.
    ///
    /// One-shot: sample storage is released and the accumulator stays sealed.
    pub fn seal(&mut self) -> PipelineResult<BackgroundModel> {
        match std::mem::replace(&mut self.state, AccumulatorState::Sealed) {
            AccumulatorState::Accumulating {
                width,
                height,
                slab,
            } => {
                let samples = slab.len();
                let rank = rank_for(self.quantile, samples);
                let pixels = PixelBuffer::new(slab.select(rank), width, height)?;
                Ok(BackgroundModel::new(pixels, samples))
            }
            AccumulatorState::Empty => {
                self.state = AccumulatorState::Empty;
                Err(PipelineError::EmptyBackground)
            }
            AccumulatorState::Sealed => Err(PipelineError::AlreadySealed),
        }
    }

    /// Drop every collected sample and start over from an empty window.
    pub fn discard(&mut self) {
        self.state = AccumulatorState::Empty;
    }
}

/// 0-based index of the `quantile` order statistic among `len` samples.
pub fn rank_for(quantile: f64, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    let rank = (quantile.clamp(0.0, 1.0) * len as f64).floor() as usize;
    rank.min(len - 1)
}
