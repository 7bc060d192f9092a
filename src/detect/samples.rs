//! Ordered per-channel sample storage for background warm-up.
//!
//! Every (pixel, channel) owns a fixed slot of `depth` bytes inside one flat
//! allocation. The first `len` bytes of each slot are kept ascending, so reading an
//! order statistic is a single index. Insertion shifts the tail of the slot, O(len).
//!
//! Memory is `values * depth` bytes for the whole warm-up window.

/// Read-only view of one (pixel, channel) sample multiset, ascending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelSampleSet<'a> {
    values: &'a [u8],
}

impl<'a> ChannelSampleSet<'a> {
    pub fn as_slice(&self) -> &'a [u8] {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at 0-based `rank` of the ascending sequence.
    pub fn order_statistic(&self, rank: usize) -> Option<u8> {
        self.values.get(rank).copied()
    }
}

pub(crate) struct SampleSlab {
    samples: Vec<u8>,
    depth: usize,
    len: usize,
}

impl SampleSlab {
    /// Start a slab from the first frame's values. `depth` must be at least 1.
    pub(crate) fn seed(values: &[u8], depth: usize) -> Self {
        let depth = depth.max(1);
        let mut samples = vec![0u8; values.len() * depth];
        for (slot, &value) in samples.chunks_exact_mut(depth).zip(values) {
            slot[0] = value;
        }
        Self {
            samples,
            depth,
            len: 1,
        }
    }

    /// Number of samples held by every slot.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len >= self.depth
    }

    pub(crate) fn slot_count(&self) -> usize {
        self.samples.len() / self.depth
    }

    /// Insert one frame's values, each at its sorted position in its own slot.
    ///
    /// Caller guarantees `values.len() == slot_count()` and `!is_full()`.
    pub(crate) fn insert(&mut self, values: &[u8]) {
        debug_assert_eq!(values.len(), self.slot_count());
        debug_assert!(!self.is_full());
        let filled = self.len;
        for (slot, &value) in self.samples.chunks_exact_mut(self.depth).zip(values) {
            insert_sorted(&mut slot[..=filled], value);
        }
        self.len += 1;
    }

    pub(crate) fn sample_set(&self, slot: usize) -> Option<ChannelSampleSet<'_>> {
        let start = slot.checked_mul(self.depth)?;
        let values = self.samples.get(start..start + self.len)?;
        Some(ChannelSampleSet { values })
    }

    /// Collect the value at `rank` from every slot, in slot order.
    pub(crate) fn select(&self, rank: usize) -> Vec<u8> {
        debug_assert!(rank < self.len);
        self.samples
            .chunks_exact(self.depth)
            .map(|slot| slot[rank])
            .collect()
    }
}

/// `slot[..slot.len() - 1]` is ascending; place `value` so the whole slot is.
///
/// The value lands in front of the first element that is >= it.
fn insert_sorted(slot: &mut [u8], value: u8) {
    let filled = slot.len() - 1;
    let pos = slot[..filled].partition_point(|&existing| existing < value);
    slot.copy_within(pos..filled, pos + 1);
    slot[pos] = value;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_sorted_keeps_slot_ascending() {
        let mut slot = [0u8; 6];
        let incoming = [50u8, 10, 30, 30, 255, 0];
        for (filled, &value) in incoming.iter().enumerate() {
            insert_sorted(&mut slot[..=filled], value);
        }
        assert_eq!(slot, [0, 10, 30, 30, 50, 255]);
    }

    #[test]
    fn slab_tracks_each_slot_independently() {
        let mut slab = SampleSlab::seed(&[10, 200], 3);
        slab.insert(&[50, 100]);
        slab.insert(&[30, 150]);

        assert!(slab.is_full());
        assert_eq!(slab.slot_count(), 2);
        assert_eq!(slab.sample_set(0).unwrap().as_slice(), &[10, 30, 50]);
        assert_eq!(slab.sample_set(1).unwrap().as_slice(), &[100, 150, 200]);
        assert_eq!(slab.select(1), vec![30, 150]);
    }

    #[test]
    fn partially_filled_slab_exposes_only_collected_samples() {
        let mut slab = SampleSlab::seed(&[7], 10);
        slab.insert(&[3]);
        let set = slab.sample_set(0).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.order_statistic(0), Some(3));
        assert_eq!(set.order_statistic(2), None);
        assert!(slab.sample_set(1).is_none());
    }
}
