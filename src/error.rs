//! Pipeline error taxonomy.
//!
//! Lock contention is deliberately absent: a frame that loses the admission race
//! is counted as skipped, it never surfaces as an error.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// Payload could not be turned into a pixel buffer. The frame is dropped.
    #[error("failed to decode frame payload: {0}")]
    Decode(String),

    /// Frame geometry disagrees with the geometry the background was built from.
    #[error("frame is {width}x{height}, background model expects {expected_width}x{expected_height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    /// Accumulation or a second seal was attempted after the model was sealed.
    #[error("background model already sealed")]
    AlreadySealed,

    #[error("cannot seal background model: no warm-up samples were collected")]
    EmptyBackground,

    /// The run hit a fatal error earlier and must be restarted.
    #[error("pipeline halted: {0}")]
    Halted(String),

    /// A previous pass panicked while holding the pass lock.
    #[error("pass lock poisoned")]
    LockPoisoned,
}

impl PipelineError {
    /// Fatal errors invalidate the background model for the rest of the run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PipelineError::DimensionMismatch { .. } | PipelineError::LockPoisoned
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
