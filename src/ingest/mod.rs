//! Frame ingestion.
//!
//! Sources deliver compressed `FramePacket`s (1-based index, timestamp, payload);
//! the pipeline decodes them with `FrameDecoder`.
//!
//! - `stub://...`: synthetic camera scene with a periodic robot pass
//! - local directory: replays image files in name order
//!
//! Sources MUST NOT decode or buffer frames on behalf of the pipeline. Admission
//! control, not the source, decides which frames are dropped.

mod decode;
pub mod file;
pub mod synthetic;

use anyhow::Result;

use crate::frame::FramePacket;

pub use decode::{encode_jpeg, encode_png, FrameDecoder, MAX_PAYLOAD_BYTES};
pub use file::DirectorySource;
pub use synthetic::{SyntheticConfig, SyntheticSource};

/// Producer side of the camera stream.
pub trait FrameSource: Send {
    /// Next packet, or `None` once the source is exhausted.
    fn next_packet(&mut self) -> Result<Option<FramePacket>>;

    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub source: String,
}

/// Open the source named by `url`: `stub://` for the synthetic scene, otherwise a
/// local image directory. `width`/`height` size the synthetic scene.
pub fn open_source(url: &str, width: u32, height: u32, repeat: bool) -> Result<Box<dyn FrameSource>> {
    if url.starts_with("stub://") {
        Ok(Box::new(SyntheticSource::new(SyntheticConfig {
            url: url.to_string(),
            width,
            height,
            ..SyntheticConfig::default()
        })))
    } else {
        Ok(Box::new(DirectorySource::new(url)?.with_repeat(repeat)))
    }
}
