//! Frame types.
//!
//! - `FramePacket`: what the camera stream delivers (index, timestamp, compressed bytes).
//! - `PixelBuffer`: decoded 8-bit pixels, `width * height * CHANNELS`, row-major, interleaved.
//! - `Frame`: a decoded packet. Lives for exactly one processing pass.

use std::time::SystemTime;

use crate::error::{PipelineError, PipelineResult};

/// Every decoded frame carries three channels per pixel.
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// FramePacket: inbound compressed frame
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct FramePacket {
    /// 1-based sequence index assigned by the camera stream.
    pub index: u64,
    pub timestamp: SystemTime,
    pub payload: Vec<u8>,
}

impl FramePacket {
    pub fn new(index: u64, payload: Vec<u8>) -> Self {
        Self {
            index,
            timestamp: SystemTime::now(),
            payload,
        }
    }

    pub fn with_timestamp(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// ----------------------------------------------------------------------------
// PixelBuffer: decoded pixels
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PixelBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl PixelBuffer {
    /// Wrap interleaved channel values. The length must match the geometry exactly.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> PipelineResult<Self> {
        let expected = value_count(width, height)?;
        if data.len() != expected {
            return Err(PipelineError::Decode(format!(
                "pixel buffer length mismatch: expected {}, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Uniform buffer, every channel of every pixel set to `value`.
    pub fn filled(width: u32, height: u32, value: u8) -> PipelineResult<Self> {
        let len = value_count(width, height)?;
        Self::new(vec![value; len], width, height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Number of channel values (`width * height * CHANNELS`).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Sum of every channel value. A 4K frame peaks well below `u64::MAX`.
    pub fn sum(&self) -> u64 {
        self.data.iter().map(|&v| u64::from(v)).sum()
    }

    /// Fails with `DimensionMismatch` unless this buffer is `width x height`.
    pub fn ensure_geometry(&self, width: u32, height: u32) -> PipelineResult<()> {
        if self.width == width && self.height == height {
            Ok(())
        } else {
            Err(PipelineError::DimensionMismatch {
                expected_width: width,
                expected_height: height,
                width: self.width,
                height: self.height,
            })
        }
    }
}

/// `width * height * CHANNELS`, rejecting geometry that overflows `usize`.
pub fn value_count(width: u32, height: u32) -> PipelineResult<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| PipelineError::Decode(format!("frame dimensions {}x{} overflow", width, height)))
}

// ----------------------------------------------------------------------------
// Frame: one decoded packet
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct Frame {
    pub index: u64,
    pub timestamp: SystemTime,
    pub pixels: PixelBuffer,
}

impl Frame {
    pub fn new(index: u64, timestamp: SystemTime, pixels: PixelBuffer) -> Self {
        Self {
            index,
            timestamp,
            pixels,
        }
    }
}
