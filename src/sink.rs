//! Outbound detection sinks.
//!
//! The pipeline publishes exactly one `DetectionResult` per completed detecting
//! pass. Sinks only see that result; transport details stay behind this trait.

use std::sync::mpsc::Sender;
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::detect::DetectionResult;

/// Receives one decision per scored frame. Called from inside the pass, so
/// implementations should hand off quickly.
pub trait DetectionSink: Send + Sync {
    fn publish(&self, result: &DetectionResult) -> Result<()>;
}

/// Logs every decision. Default sink when no broker is configured.
#[derive(Debug, Default)]
pub struct LogSink;

impl DetectionSink for LogSink {
    fn publish(&self, result: &DetectionResult) -> Result<()> {
        log::info!(
            "frame {}: bot_existence={} (rule={})",
            result.frame_index,
            result.object_present,
            result.rule
        );
        Ok(())
    }
}

/// Forwards decisions over an in-process channel.
pub struct ChannelSink {
    tx: Mutex<Sender<DetectionResult>>,
}

impl ChannelSink {
    pub fn new(tx: Sender<DetectionResult>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl DetectionSink for ChannelSink {
    fn publish(&self, result: &DetectionResult) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| anyhow!("channel sink lock poisoned"))?;
        tx.send(result.clone())
            .map_err(|_| anyhow!("detection receiver dropped"))
    }
}
