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

use crate::{
    comparer::{DefaultComparer, KeyComparer},
    growth::{
        DoublingPrimeStrategy, GrowthStrategy, DEFAULT_LOAD_THRESHOLD, DEFAULT_REPROBE_THRESHOLD,
    },
    observer::ResizeObserver,
    spawner::{BackgroundSpawner, Task},
};

use std::{
    hash::{Hash, Hasher},
    mem,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use crossbeam_epoch::Owned;

/// Uses the key itself as its hash code, so tests control slot placement.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct IdentityComparer;

impl KeyComparer<i32> for IdentityComparer {
    fn hash_code(&self, key: &i32) -> i32 {
        *key
    }

    fn equals(&self, a: &i32, b: &i32) -> bool {
        a == b
    }
}

/// Rejects the empty string as a key.
#[derive(Clone, Debug, Default)]
pub(crate) struct NonEmptyComparer(DefaultComparer);

impl KeyComparer<String> for NonEmptyComparer {
    fn hash_code(&self, key: &String) -> i32 {
        KeyComparer::<String>::hash_code(&self.0, key)
    }

    fn equals(&self, a: &String, b: &String) -> bool {
        a == b
    }

    fn is_valid_key(&self, key: &String) -> bool {
        !key.is_empty()
    }
}

/// Never grows on load or probe length; only a full array triggers growth.
#[derive(Clone, Debug, Default)]
pub(crate) struct FullOnlyGrowth(DoublingPrimeStrategy);

impl FullOnlyGrowth {
    pub(crate) fn with_table(table: Vec<usize>) -> Self {
        Self(DoublingPrimeStrategy::with_table(
            table,
            DEFAULT_LOAD_THRESHOLD,
            DEFAULT_REPROBE_THRESHOLD,
        ))
    }
}

impl GrowthStrategy for FullOnlyGrowth {
    fn initial_capacity(&self) -> usize {
        self.0.initial_capacity()
    }

    fn next_capacity(&self, _: usize, _: usize, _: usize) -> Option<usize> {
        None
    }

    fn capacity_after(&self, current_capacity: usize) -> usize {
        self.0.capacity_after(current_capacity)
    }
}

/// Queues tasks until the test runs them.
#[derive(Default)]
pub(crate) struct ManualSpawner {
    tasks: Mutex<Vec<Task>>,
}

impl ManualSpawner {
    pub(crate) fn pending(&self) -> usize {
        self.tasks.lock().unwrap().len()
    }

    pub(crate) fn run_all(&self) {
        let tasks = mem::take(&mut *self.tasks.lock().unwrap());

        for task in tasks {
            task();
        }
    }
}

impl BackgroundSpawner for ManualSpawner {
    fn spawn(&self, task: Task) {
        self.tasks.lock().unwrap().push(task);
    }
}

#[derive(Debug, Default)]
pub(crate) struct CountingObserver {
    created: AtomicUsize,
    copied: AtomicUsize,
    finished: AtomicUsize,
    aborted: AtomicUsize,
    swapped: AtomicUsize,
    full: AtomicUsize,
}

impl CountingObserver {
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub(crate) fn copied(&self) -> usize {
        self.copied.load(Ordering::SeqCst)
    }

    pub(crate) fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub(crate) fn aborted(&self) -> usize {
        self.aborted.load(Ordering::SeqCst)
    }

    pub(crate) fn swapped(&self) -> usize {
        self.swapped.load(Ordering::SeqCst)
    }

    pub(crate) fn full(&self) -> usize {
        self.full.load(Ordering::SeqCst)
    }
}

impl ResizeObserver for CountingObserver {
    fn grow_process_created(&self, _: usize, _: usize) {
        self.created.fetch_add(1, Ordering::SeqCst);
    }

    fn entry_copied(&self, _: i32, _: usize) {
        self.copied.fetch_add(1, Ordering::SeqCst);
    }

    fn grow_process_finished(&self, _: usize, _: usize) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn grow_process_aborted(&self, _: usize) {
        self.aborted.fetch_add(1, Ordering::SeqCst);
    }

    fn array_swapped(&self, _: usize, _: usize, _: usize) {
        self.swapped.fetch_add(1, Ordering::SeqCst);
    }

    fn array_full(&self, _: usize) {
        self.full.fetch_add(1, Ordering::SeqCst);
    }
}

/// A key that asserts it is dropped exactly once.
#[derive(Debug)]
pub(crate) struct NoisyDropper<T> {
    parent: Arc<DropNotifier>,
    pub elem: T,
}

impl<T> NoisyDropper<T> {
    pub(crate) fn new(parent: Arc<DropNotifier>, elem: T) -> Self {
        Self { parent, elem }
    }
}

impl<T> Drop for NoisyDropper<T> {
    fn drop(&mut self) {
        assert!(!self.parent.dropped.swap(true, Ordering::Relaxed));
    }
}

impl<T: PartialEq> PartialEq for NoisyDropper<T> {
    fn eq(&self, other: &Self) -> bool {
        self.elem == other.elem
    }
}

impl<T: Eq> Eq for NoisyDropper<T> {}

impl<T: Hash> Hash for NoisyDropper<T> {
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        self.elem.hash(hasher);
    }
}

#[derive(Debug)]
pub(crate) struct DropNotifier {
    dropped: AtomicBool,
}

impl DropNotifier {
    pub(crate) fn new() -> Self {
        Self {
            dropped: AtomicBool::new(false),
        }
    }

    pub(crate) fn was_dropped(&self) -> bool {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A cloneable value that tracks how many of its copies are alive.
#[derive(Debug)]
pub(crate) struct Tracked<T> {
    live: Arc<AtomicUsize>,
    pub elem: T,
}

impl<T> Tracked<T> {
    pub(crate) fn new(live: Arc<AtomicUsize>, elem: T) -> Self {
        live.fetch_add(1, Ordering::Relaxed);

        Self { live, elem }
    }
}

impl<T: Clone> Clone for Tracked<T> {
    fn clone(&self) -> Self {
        Self::new(self.live.clone(), self.elem.clone())
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        assert!(self.live.fetch_sub(1, Ordering::Relaxed) > 0);
    }
}

impl<T: PartialEq> PartialEq for Tracked<T> {
    fn eq(&self, other: &Self) -> bool {
        self.elem == other.elem
    }
}

pub(crate) fn run_deferred() {
    for _ in 0..65536 {
        let guard = crossbeam_epoch::pin();

        unsafe { guard.defer_destroy(Owned::new(0).into_shared(&guard)) };

        guard.flush();
    }
}
