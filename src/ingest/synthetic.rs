//! Synthetic camera (`stub://` URLs).
//!
//! Renders a fixed, slightly noisy scene and periodically drives a bright square
//! (the "robot") across it. Frames are JPEG-encoded so they take the same decode
//! path as a real camera stream.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::decode::encode_jpeg;
use super::{FrameSource, SourceStats};
use crate::frame::{FramePacket, PixelBuffer, CHANNELS};

/// Configuration for the synthetic scene.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// A robot pass starts every `robot_period` frames (0 = never).
    pub robot_period: u64,
    /// Frames the robot stays in view per pass.
    pub robot_frames: u64,
    /// Per-value noise amplitude added to the static scene.
    pub noise: u8,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            url: "stub://camera_tower".to_string(),
            width: 640,
            height: 480,
            robot_period: 300,
            robot_frames: 60,
            noise: 3,
            seed: 0x5eed,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    rng: StdRng,
    scene: Vec<u8>,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        let scene = render_scene(config.width, config.height);
        log::info!("SyntheticSource: connected to {} (synthetic)", config.url);
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            scene,
            frame_count: 0,
        }
    }

    /// Whether frame `index` (1-based) shows the robot.
    pub fn robot_visible(&self, index: u64) -> bool {
        let period = self.config.robot_period;
        if period == 0 || index == 0 {
            return false;
        }
        let phase = (index - 1) % period;
        phase >= period.saturating_sub(self.config.robot_frames)
    }

    fn render(&mut self, index: u64) -> Result<PixelBuffer> {
        let noise = i16::from(self.config.noise);
        let mut pixels: Vec<u8> = self
            .scene
            .iter()
            .map(|&v| {
                let jitter = if noise > 0 {
                    self.rng.gen_range(-noise..=noise)
                } else {
                    0
                };
                (i16::from(v) + jitter).clamp(0, 255) as u8
            })
            .collect();

        if self.robot_visible(index) {
            self.paint_robot(&mut pixels, index);
        }
        Ok(PixelBuffer::new(pixels, self.config.width, self.config.height)?)
    }

    /// Square a quarter of the frame height on a side, sliding left to right.
    fn paint_robot(&self, pixels: &mut [u8], index: u64) {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let side = (height / 4).max(1).min(width);
        let span = (width - side) as u64;
        let period = self.config.robot_period.max(1);
        let visible = self.config.robot_frames.clamp(1, period);
        let step = ((index - 1) % period).saturating_sub(period - visible);
        let x0 = (span * step / visible) as usize;
        let y0 = (height - side) / 2;
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                let offset = (y * width + x) * CHANNELS;
                pixels[offset..offset + CHANNELS].copy_from_slice(&[230, 40, 40]);
            }
        }
    }
}

impl FrameSource for SyntheticSource {
    fn next_packet(&mut self) -> Result<Option<FramePacket>> {
        self.frame_count += 1;
        let pixels = self.render(self.frame_count)?;
        let payload = encode_jpeg(&pixels)?;
        Ok(Some(FramePacket::new(self.frame_count, payload)))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.config.url.clone(),
        }
    }
}

/// Static backdrop: a soft vertical gradient over a gray floor.
fn render_scene(width: u32, height: u32) -> Vec<u8> {
    let (w, h) = (width as usize, height as usize);
    let mut scene = Vec::with_capacity(w * h * CHANNELS);
    for y in 0..h {
        let shade = (60 + (y * 80) / h.max(1)) as u8;
        for _ in 0..w {
            scene.extend_from_slice(&[shade, shade, shade.saturating_add(10)]);
        }
    }
    scene
}
