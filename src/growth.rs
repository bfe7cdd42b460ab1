// MIT License
//
// Copyright (c) 2019 Gregory Meyer
//
// Permission is hereby granted, free of charge, to any person
// obtaining a copy of this software and associated documentation files
// (the "Software"), to deal in the Software without restriction,
// including without limitation the rights to use, copy, modify, merge,
// publish, distribute, sublicense, and/or sell copies of the Software,
// and to permit persons to whom the Software is furnished to do so,
// subject to the following conditions:
//
// The above copyright notice and this permission notice shall be
// included in all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND,
// EXPRESS OR IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF
// MERCHANTABILITY, FITNESS FOR A PARTICULAR PURPOSE AND
// NONINFRINGEMENT. IN NO EVENT SHALL THE AUTHORS OR COPYRIGHT HOLDERS
// BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER LIABILITY, WHETHER IN AN
// ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM, OUT OF OR IN
// CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Growth strategies deciding when and how far a bucket array grows.

/// Ascending table of primes, each roughly double the previous one.
///
/// Prime capacities keep `|hash| mod capacity` well distributed, doubling
/// bounds the amortized copy cost of resizing.
pub const DOUBLING_PRIMES: &[usize] = &[
    31, 67, 137, 277, 557, 1117, 2237, 4481, 8963, 17929, 35863, 71741, 143483, 286973, 573953,
    1147921, 2295859, 4591721, 9183457, 18366923, 36733847, 73467739, 146935499, 293871013,
    587742049, 1175484103,
];

/// Default ratio of occupied slots to capacity at which a resize starts.
pub const DEFAULT_LOAD_THRESHOLD: f32 = 0.5;

/// Default probe length at which a resize starts regardless of load.
pub const DEFAULT_REPROBE_THRESHOLD: usize = 20;

/// Decides the capacities of successive bucket arrays.
pub trait GrowthStrategy: Send + Sync {
    /// Capacity of the array a dictionary starts with and returns to on
    /// [`clear`](crate::ConcurrentDictionary::clear).
    fn initial_capacity(&self) -> usize;

    /// Returns the capacity to grow to, or `None` if no resize is needed yet.
    ///
    /// `current_count` is the number of occupied slots and `reprobe_length`
    /// the number of slots the triggering insert had to examine.
    fn next_capacity(
        &self,
        current_count: usize,
        current_capacity: usize,
        reprobe_length: usize,
    ) -> Option<usize>;

    /// Returns the capacity that follows `current_capacity` unconditionally.
    ///
    /// # Panics
    ///
    /// Implementations panic if no larger capacity is configured.
    fn capacity_after(&self, current_capacity: usize) -> usize;
}

/// Grows along a table of primes once a load or reprobe threshold is hit.
///
/// Triggering growth on probe length as well as on load bounds the cost of a
/// single lookup even when hash codes cluster.
#[derive(Clone, Debug)]
pub struct DoublingPrimeStrategy {
    table: Vec<usize>,
    load_threshold: f32,
    reprobe_threshold: usize,
}

impl DoublingPrimeStrategy {
    /// Creates a strategy over [`DOUBLING_PRIMES`].
    ///
    /// # Panics
    ///
    /// Panics if `load_threshold` is not within `0.0..=1.0`.
    pub fn new(load_threshold: f32, reprobe_threshold: usize) -> Self {
        Self::with_table(DOUBLING_PRIMES.to_vec(), load_threshold, reprobe_threshold)
    }

    /// Creates a strategy over a custom capacity table.
    ///
    /// # Panics
    ///
    /// Panics if `table` is empty, is not strictly ascending, starts at 0,
    /// or if `load_threshold` is not within `0.0..=1.0`.
    pub fn with_table(table: Vec<usize>, load_threshold: f32, reprobe_threshold: usize) -> Self {
        assert!(!table.is_empty(), "growth table must not be empty");
        assert!(table[0] > 0, "growth table must not contain a zero capacity");
        assert!(
            table.windows(2).all(|w| w[0] < w[1]),
            "growth table must be strictly ascending"
        );
        assert!(
            (0.0..=1.0).contains(&load_threshold),
            "load threshold must be within 0.0..=1.0, got {}",
            load_threshold
        );

        Self {
            table,
            load_threshold,
            reprobe_threshold,
        }
    }

    pub fn load_threshold(&self) -> f32 {
        self.load_threshold
    }

    pub fn reprobe_threshold(&self) -> usize {
        self.reprobe_threshold
    }
}

impl Default for DoublingPrimeStrategy {
    fn default() -> Self {
        Self::new(DEFAULT_LOAD_THRESHOLD, DEFAULT_REPROBE_THRESHOLD)
    }
}

impl GrowthStrategy for DoublingPrimeStrategy {
    fn initial_capacity(&self) -> usize {
        self.table[0]
    }

    fn next_capacity(
        &self,
        current_count: usize,
        current_capacity: usize,
        reprobe_length: usize,
    ) -> Option<usize> {
        let load = if current_capacity == 0 {
            1.0
        } else {
            current_count as f32 / current_capacity as f32
        };

        if load < self.load_threshold && reprobe_length < self.reprobe_threshold {
            return None;
        }

        Some(self.capacity_after(current_capacity))
    }

    fn capacity_after(&self, current_capacity: usize) -> usize {
        match self.table.iter().find(|&&c| c > current_capacity) {
            Some(&capacity) => capacity,
            None => panic!(
                "growth table exhausted: no capacity greater than {} is configured",
                current_capacity
            ),
        }
    }
}
