//! Ring-buffer time series of additive counters.
//!
//! One cell per ring index (seconds for the accept series, minutes for the
//! reject series). Insertion is amortized O(1): advancing to a newer index
//! zeroes the cells it uncovers, an index older than the whole ring is
//! dropped, and a gap wider than the ring resets it. Memory stays bounded
//! regardless of how shares arrive.

use std::ops::{AddAssign, DivAssign, MulAssign};

#[derive(Debug, Clone)]
pub struct StatsWindow<T> {
    /// Highest ring index ever inserted; -1 while empty.
    max_ring_idx: i64,
    elements: Vec<T>,
}

impl<T: Copy + Default + AddAssign> StatsWindow<T> {
    pub fn new(window_size: usize) -> Self {
        assert!(window_size > 0, "window must hold at least one cell");
        Self {
            max_ring_idx: -1,
            elements: vec![T::default(); window_size],
        }
    }

    pub fn window_size(&self) -> usize {
        self.elements.len()
    }

    pub fn clear(&mut self) {
        self.max_ring_idx = -1;
        for cell in self.elements.iter_mut() {
            *cell = T::default();
        }
    }

    fn cell(&self, ring_idx: i64) -> usize {
        ring_idx.rem_euclid(self.elements.len() as i64) as usize
    }

    /// Add `val` at `ring_idx`. Returns false when the index is already
    /// older than anything the ring still covers.
    pub fn insert(&mut self, ring_idx: i64, val: T) -> bool {
        let window = self.elements.len() as i64;
        if self.max_ring_idx > ring_idx + window {
            return false;
        }
        if self.max_ring_idx == -1 || ring_idx - self.max_ring_idx > window {
            // first insert, or everything retained has expired
            self.clear();
            self.max_ring_idx = ring_idx;
        }
        while self.max_ring_idx < ring_idx {
            self.max_ring_idx += 1;
            let uncovered = self.cell(self.max_ring_idx);
            self.elements[uncovered] = T::default();
        }
        let cell = self.cell(ring_idx);
        self.elements[cell] += val;
        true
    }

    /// Sum of the `len` cells ending at `begin_ring_idx` inclusive: indices
    /// in `(begin_ring_idx - len, begin_ring_idx]`. `len` clamps to the
    /// window size; a range entirely in the future or past sums to zero.
    pub fn sum(&self, begin_ring_idx: i64, len: i64) -> T {
        let len = len.min(self.elements.len() as i64);
        if len <= 0 || begin_ring_idx - len >= self.max_ring_idx {
            return T::default();
        }
        let end = begin_ring_idx - len;
        let mut idx = begin_ring_idx.min(self.max_ring_idx);
        let mut total = T::default();
        while idx > end {
            total += self.elements[self.cell(idx)];
            idx -= 1;
        }
        total
    }

    /// Sum over the whole window ending at `begin_ring_idx`.
    pub fn sum_window(&self, begin_ring_idx: i64) -> T {
        self.sum(begin_ring_idx, self.elements.len() as i64)
    }
}

impl<T: Copy + Default + AddAssign + MulAssign> StatsWindow<T> {
    /// Scale every cell, retained history included.
    pub fn map_multiply(&mut self, val: T) {
        for cell in self.elements.iter_mut() {
            *cell *= val;
        }
    }
}

impl<T: Copy + Default + AddAssign + DivAssign> StatsWindow<T> {
    pub fn map_divide(&mut self, val: T) {
        for cell in self.elements.iter_mut() {
            *cell /= val;
        }
    }
}
