//! Compressed payload decoding.
//!
//! Bytes in, RGB out, entirely in memory. Decoding holds no state between calls.

use image::GenericImageView;

use crate::error::{PipelineError, PipelineResult};
use crate::frame::PixelBuffer;

/// Hard cap on a single compressed payload.
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone, Copy, Debug)]
pub struct FrameDecoder {
    max_payload_bytes: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Decode a JPEG/PNG payload into an 8-bit three-channel buffer.
    pub fn decode(&self, payload: &[u8]) -> PipelineResult<PixelBuffer> {
        if payload.is_empty() {
            return Err(PipelineError::Decode("empty payload".to_string()));
        }
        if payload.len() > self.max_payload_bytes {
            return Err(PipelineError::Decode(format!(
                "payload of {} bytes exceeds limit of {} bytes",
                payload.len(),
                self.max_payload_bytes
            )));
        }
        let image =
            image::load_from_memory(payload).map_err(|e| PipelineError::Decode(e.to_string()))?;
        let (width, height) = image.dimensions();
        PixelBuffer::new(image.into_rgb8().into_raw(), width, height)
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode a pixel buffer as PNG. Used by the synthetic source and by tests that need
/// lossless payloads.
pub fn encode_png(pixels: &PixelBuffer) -> anyhow::Result<Vec<u8>> {
    encode(pixels, image::ImageFormat::Png)
}

/// Encode a pixel buffer as JPEG (lossy).
pub fn encode_jpeg(pixels: &PixelBuffer) -> anyhow::Result<Vec<u8>> {
    encode(pixels, image::ImageFormat::Jpeg)
}

fn encode(pixels: &PixelBuffer, format: image::ImageFormat) -> anyhow::Result<Vec<u8>> {
    let rgb = image::RgbImage::from_raw(pixels.width(), pixels.height(), pixels.as_slice().to_vec())
        .ok_or_else(|| anyhow::anyhow!("pixel buffer does not match its geometry"))?;
    let mut out = std::io::Cursor::new(Vec::new());
    rgb.write_to(&mut out, format)?;
    Ok(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_round_trip_is_lossless() {
        let pixels = PixelBuffer::new(vec![10, 20, 30, 40, 50, 60], 2, 1).unwrap();
        let payload = encode_png(&pixels).unwrap();
        let decoded = FrameDecoder::new().decode(&payload).unwrap();
        assert_eq!(decoded, pixels);
    }

    #[test]
    fn jpeg_decodes_to_declared_geometry() {
        let pixels = PixelBuffer::filled(16, 8, 128).unwrap();
        let payload = encode_jpeg(&pixels).unwrap();
        let decoded = FrameDecoder::new().decode(&payload).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }

    #[test]
    fn garbage_payload_is_decode_error() {
        let err = FrameDecoder::new().decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, PipelineError::Decode(_)));
    }

    #[test]
    fn truncated_payload_is_decode_error() {
        let pixels = PixelBuffer::filled(32, 32, 77).unwrap();
        let payload = encode_png(&pixels).unwrap();
        let truncated = &payload[..payload.len() / 2];
        assert!(FrameDecoder::new().decode(truncated).is_err());
    }

    #[test]
    fn oversized_payload_rejected_before_decoding() {
        let decoder = FrameDecoder::new().with_max_payload_bytes(4);
        let err = decoder.decode(&[0xFF, 0xD8, 0xFF, 0xE0, 0x00]).unwrap_err();
        assert!(err.to_string().contains("exceeds limit"));
    }
}
