//! Local image-directory frame source.
//!
//! Replays the JPEG/PNG files of one local directory, in lexical file-name order,
//! as compressed payloads. Files are read as-is; decoding happens in the pipeline.
//!
//! Only local paths are accepted, no URL schemes.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use super::{FrameSource, SourceStats};
use crate::frame::FramePacket;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    cursor: usize,
    repeat: bool,
    frame_count: u64,
}

impl DirectorySource {
    pub fn new(path: &str) -> Result<Self> {
        if !is_local_file_path(path) {
            return Err(anyhow!(
                "directory ingestion only supports local paths (no URL schemes)"
            ));
        }
        let dir = PathBuf::from(path);
        let files = list_images(&dir)?;
        if files.is_empty() {
            return Err(anyhow!("no jpg/png images found in {}", dir.display()));
        }
        log::info!(
            "DirectorySource: {} images in {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            dir,
            files,
            cursor: 0,
            repeat: false,
            frame_count: 0,
        })
    }

    /// Start over from the first file when the directory is exhausted.
    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for DirectorySource {
    fn next_packet(&mut self) -> Result<Option<FramePacket>> {
        if self.cursor >= self.files.len() {
            if !self.repeat {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let path = &self.files[self.cursor];
        self.cursor += 1;
        let payload =
            std::fs::read(path).with_context(|| format!("read frame {}", path.display()))?;
        self.frame_count += 1;
        let mut packet = FramePacket::new(self.frame_count, payload);
        if let Ok(modified) = std::fs::metadata(path).and_then(|meta| meta.modified()) {
            packet = packet.with_timestamp(modified);
        }
        Ok(Some(packet))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            source: self.dir.display().to_string(),
        }
    }
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read frame directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
            .unwrap_or(false);
        if is_image && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub(crate) fn is_local_file_path(path: &str) -> bool {
    !path.trim().is_empty() && !path.contains("://")
}
