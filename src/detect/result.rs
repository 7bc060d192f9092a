/// Outcome of scoring one post-warm-up frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetectionResult {
    /// Sequence index of the frame this decision was computed from.
    pub frame_index: u64,
    /// Did we see something that is not background?
    pub object_present: bool,
    pub frame_sum: u64,
    pub background_sum: u64,
    /// Rule that produced the decision.
    pub rule: &'static str,
}
