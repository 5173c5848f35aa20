//! Epoch-stamped visited set for graph traversal.

/// Visited set keyed by node id.
///
/// `reset()` bumps an epoch instead of zeroing the array; the array is only
/// wiped when the epoch wraps.
#[derive(Debug, Default)]
pub struct VisitedSet {
    stamps: Vec<u32>,
    epoch: u32,
}

impl VisitedSet {
    /// Create a set covering ids `0..capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            stamps: vec![0; capacity],
            epoch: 1,
        }
    }

    /// Forget all visits.
    pub fn reset(&mut self) {
        if self.epoch == u32::MAX {
            self.stamps.fill(0);
            self.epoch = 1;
        } else {
            self.epoch += 1;
        }
    }

    /// Grow to cover ids `0..capacity`.
    pub fn ensure_capacity(&mut self, capacity: usize) {
        if capacity > self.stamps.len() {
            self.stamps.resize(capacity, 0);
        }
        if self.epoch == 0 {
            self.epoch = 1;
        }
    }

    /// Mark `id`; returns `true` if it had not been visited since the last reset.
    #[inline]
    pub fn visit(&mut self, id: u32) -> bool {
        let slot = &mut self.stamps[id as usize];
        if *slot == self.epoch {
            false
        } else {
            *slot = self.epoch;
            true
        }
    }
}
