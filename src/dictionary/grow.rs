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

use super::{
    bucket_array::{AddOutcome, BucketArray},
    entry::Entry,
};

use crate::{comparer::KeyComparer, observer::ResizeObserver};

use std::{
    cmp, mem,
    sync::{
        atomic::{AtomicBool, AtomicIsize, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;

const COPYING: u8 = 0;
const FINISHED: u8 = 1;
const ABORTED: u8 = 2;

/// Default number of source slots a helping thread claims at once.
pub const DEFAULT_HELP_BATCH_SIZE: usize = 100;

/// What a copying thread needs from the owning dictionary.
pub(crate) struct CopyContext<'a, K, V, C> {
    /// The dictionary's current-array pointer, swapped on finish.
    pub(crate) current: &'a Atomic<BucketArray<K, V>>,
    pub(crate) comparer: &'a C,
    pub(crate) observer: &'a dyn ResizeObserver,
}

/// One resize of a bucket array into a larger one.
///
/// Any number of threads cooperate on the copy by claiming batches of source
/// slots through `cursor`. The thread whose batch brings `copied` up to the
/// source capacity finishes the process and, if the dictionary still points
/// at the source, installs the destination.
pub(crate) struct GrowProcess<K, V> {
    old_capacity: usize,
    new_capacity: usize,
    new_array: Atomic<BucketArray<K, V>>,
    cursor: AtomicUsize,
    copied: AtomicUsize,
    status: AtomicU8,
    installed: AtomicBool,
    batch_size: usize,
}

impl<K, V> GrowProcess<K, V> {
    /// `batch_size` is clamped to `old_capacity`.
    pub(crate) fn new(old_capacity: usize, new_capacity: usize, batch_size: usize) -> Self {
        assert!(new_capacity > old_capacity);
        assert!(batch_size > 0);

        Self {
            old_capacity,
            new_capacity,
            new_array: Atomic::null(),
            cursor: AtomicUsize::new(0),
            copied: AtomicUsize::new(0),
            status: AtomicU8::new(COPYING),
            installed: AtomicBool::new(false),
            batch_size: cmp::min(batch_size, cmp::max(old_capacity, 1)),
        }
    }

    pub(crate) fn old_capacity(&self) -> usize {
        self.old_capacity
    }

    pub(crate) fn new_capacity(&self) -> usize {
        self.new_capacity
    }

    pub(crate) fn is_copying(&self) -> bool {
        self.status.load(Ordering::Acquire) == COPYING
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.status.load(Ordering::Acquire) == FINISHED
    }

    pub(crate) fn is_aborted(&self) -> bool {
        self.status.load(Ordering::Acquire) == ABORTED
    }

    /// True once every source slot has been claimed by some thread.
    pub(crate) fn is_fully_claimed(&self) -> bool {
        self.cursor.load(Ordering::Relaxed) >= self.old_capacity
    }

    /// Allocates and publishes the destination array.
    ///
    /// Only the thread that established this process calls this, exactly
    /// once. The destination counts live entries in `live_count`, which is
    /// the source's counter.
    pub(crate) fn create_new_array(&self, version: usize, live_count: Arc<AtomicIsize>) {
        let guard = &crossbeam_epoch::pin();
        let previous = self.new_array.swap(
            Owned::new(BucketArray::with_live_count(
                self.new_capacity,
                version,
                live_count,
            )),
            Ordering::SeqCst,
            guard,
        );

        assert!(previous.is_null(), "destination array created twice");
    }

    /// Transitions from copying to aborted, stopping further copy work and
    /// preventing installation.
    pub(crate) fn abort(&self, observer: &dyn ResizeObserver) -> bool {
        let aborted = self
            .status
            .compare_exchange(COPYING, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if aborted {
            observer.grow_process_aborted(self.old_capacity);
        }

        aborted
    }
}

impl<'g, K: 'g, V: 'g> GrowProcess<K, V> {
    /// Returns the destination array, waiting for its creator to publish it.
    pub(crate) fn new_array(&self, guard: &'g Guard) -> Shared<'g, BucketArray<K, V>> {
        let backoff = Backoff::new();

        loop {
            let new_array_ptr = self.new_array.load(Ordering::SeqCst, guard);

            if !new_array_ptr.is_null() {
                return new_array_ptr;
            }

            backoff.snooze();
        }
    }

    /// Installs `entry_ptr` into the destination array.
    ///
    /// Copying an entry that is already there is a no-op reported as
    /// `ExistingEntryFound`.
    pub(crate) fn copy_single_entry<C: KeyComparer<K>>(
        &self,
        entry_ptr: Shared<'g, Entry<K, V>>,
        comparer: &C,
        observer: &dyn ResizeObserver,
        guard: &'g Guard,
    ) -> AddOutcome<'g, K, V> {
        let new_array = unsafe { self.new_array(guard).deref() };
        let outcome = new_array.try_add(entry_ptr, comparer, guard).outcome;

        if let AddOutcome::Successful = outcome {
            observer.entry_copied(unsafe { entry_ptr.deref() }.hash(), self.new_capacity);
        }

        outcome
    }

    /// Claims and copies one batch of source slots.
    ///
    /// Returns the number of slots this call claimed, zero if the process is
    /// no longer copying or every slot was already claimed.
    pub(crate) fn help_copy<C: KeyComparer<K>>(
        &self,
        source_ptr: Shared<'g, BucketArray<K, V>>,
        context: &CopyContext<'_, K, V, C>,
        guard: &'g Guard,
    ) -> usize {
        if self.old_capacity == 0 {
            self.try_finish(source_ptr, context, guard);

            return 0;
        }

        if !self.is_copying() || self.is_fully_claimed() {
            return 0;
        }

        let start = self.cursor.fetch_add(self.batch_size, Ordering::Relaxed);

        if start >= self.old_capacity {
            return 0;
        }

        let end = cmp::min(start.saturating_add(self.batch_size), self.old_capacity);
        let source = unsafe { source_ptr.deref() };
        assert_eq!(source.capacity(), self.old_capacity);

        for i in start..end {
            if !self.is_copying() {
                break;
            }

            let entry_ptr = source.read_slot_at(i, guard);

            if entry_ptr.is_null() {
                continue;
            }

            if let AddOutcome::ArrayFull =
                self.copy_single_entry(entry_ptr, context.comparer, context.observer, guard)
            {
                panic!(
                    "destination array of capacity {} filled up while copying from capacity {}",
                    self.new_capacity, self.old_capacity
                );
            }
        }

        let claimed = end - start;

        if self.copied.fetch_add(claimed, Ordering::AcqRel) + claimed == self.old_capacity {
            self.try_finish(source_ptr, context, guard);
        }

        claimed
    }

    /// Helps until every source slot has been claimed.
    ///
    /// Slots claimed by other threads may still be in flight on return.
    pub(crate) fn copy_to_completion<C: KeyComparer<K>>(
        &self,
        source_ptr: Shared<'g, BucketArray<K, V>>,
        context: &CopyContext<'_, K, V, C>,
        guard: &'g Guard,
    ) {
        while self.help_copy(source_ptr, context, guard) > 0 {}
    }

    fn try_finish<C: KeyComparer<K>>(
        &self,
        source_ptr: Shared<'g, BucketArray<K, V>>,
        context: &CopyContext<'_, K, V, C>,
        guard: &'g Guard,
    ) {
        if self
            .status
            .compare_exchange(COPYING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        context
            .observer
            .grow_process_finished(self.old_capacity, self.new_capacity);

        let new_array_ptr = self.new_array(guard);

        if context
            .current
            .compare_exchange(
                source_ptr,
                new_array_ptr,
                Ordering::SeqCst,
                Ordering::SeqCst,
                guard,
            )
            .is_err()
        {
            // a clear already replaced the source; the destination dies with
            // this process
            return;
        }

        self.installed.store(true, Ordering::Release);

        let (old_version, new_version) = unsafe {
            (
                source_ptr.deref().version(),
                new_array_ptr.deref().version(),
            )
        };

        context
            .observer
            .array_swapped(old_version, new_version, self.new_capacity);

        unsafe { guard.defer_destroy(source_ptr) };
    }
}

impl<K, V> Drop for GrowProcess<K, V> {
    fn drop(&mut self) {
        if self.installed.load(Ordering::Acquire) {
            return;
        }

        let guard = unsafe { crossbeam_epoch::unprotected() };
        let new_array_ptr = self.new_array.swap(Shared::null(), Ordering::Relaxed, guard);

        if !new_array_ptr.is_null() {
            mem::drop(unsafe { new_array_ptr.into_owned() });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{
        dictionary::tests::util::{CountingObserver, IdentityComparer},
        observer::NoopObserver,
    };

    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    fn populated(capacity: usize, keys: impl Iterator<Item = i32>) -> Atomic<BucketArray<i32, i32>> {
        let current = Atomic::new(BucketArray::with_capacity(capacity, 0));
        let guard = &crossbeam_epoch::pin();
        let source = unsafe { current.load(Ordering::SeqCst, guard).deref() };

        for key in keys {
            let entry_ptr = Owned::new(Entry::new(key, key, key * 10)).into_shared(guard);
            assert!(matches!(
                source.try_add(entry_ptr, &IdentityComparer, guard).outcome,
                AddOutcome::Successful
            ));
        }

        current
    }

    fn start_process<'g>(
        current: &Atomic<BucketArray<i32, i32>>,
        new_capacity: usize,
        batch_size: usize,
        guard: &'g Guard,
    ) -> (Shared<'g, BucketArray<i32, i32>>, &'g GrowProcess<i32, i32>) {
        let source_ptr = current.load(Ordering::SeqCst, guard);
        let source = unsafe { source_ptr.deref() };
        let (process, won) = source.establish_grow_process(
            Owned::new(GrowProcess::new(source.capacity(), new_capacity, batch_size)),
            guard,
        );
        assert!(won);
        process.create_new_array(source.version() + 1, source.share_live_count());

        (source_ptr, process)
    }

    fn destroy(current: Atomic<BucketArray<i32, i32>>) {
        mem::drop(unsafe { current.into_owned() });
    }

    #[test]
    fn copy_to_completion_installs_destination() {
        let current = populated(31, 0..15);
        let observer = CountingObserver::default();
        let context = CopyContext {
            current: &current,
            comparer: &IdentityComparer,
            observer: &observer,
        };

        {
            let guard = &crossbeam_epoch::pin();
            let (source_ptr, process) = start_process(&current, 67, DEFAULT_HELP_BATCH_SIZE, guard);

            process.copy_to_completion(source_ptr, &context, guard);

            assert!(process.is_finished());
            assert_eq!(observer.finished(), 1);
            assert_eq!(observer.swapped(), 1);
            assert_eq!(observer.copied(), 15);

            let new_array = unsafe { current.load(Ordering::SeqCst, guard).deref() };
            assert_eq!(new_array.capacity(), 67);
            assert_eq!(new_array.version(), 1);
            assert_eq!(new_array.len(), 15);

            for key in 0..15 {
                let entry = new_array.find(key, &key, &IdentityComparer, guard).unwrap();
                assert_eq!(entry.value(guard), Some(&(key * 10)));
            }
        }

        destroy(current);
    }

    #[test]
    fn tombstoned_entries_are_copied() {
        let current = populated(31, 0..3);
        let context = CopyContext {
            current: &current,
            comparer: &IdentityComparer,
            observer: &NoopObserver,
        };

        {
            let guard = &crossbeam_epoch::pin();
            let source = unsafe { current.load(Ordering::SeqCst, guard).deref() };
            source
                .find(1, &1, &IdentityComparer, guard)
                .unwrap()
                .try_mark_removed(guard)
                .ok()
                .unwrap();

            let (source_ptr, process) = start_process(&current, 67, DEFAULT_HELP_BATCH_SIZE, guard);
            process.copy_to_completion(source_ptr, &context, guard);

            let new_array = unsafe { current.load(Ordering::SeqCst, guard).deref() };
            assert_eq!(new_array.len(), 3);
            assert!(new_array
                .find(1, &1, &IdentityComparer, guard)
                .unwrap()
                .is_removed(guard));
        }

        destroy(current);
    }

    #[test]
    fn aborted_process_never_installs() {
        let current = populated(31, 0..10);
        let observer = CountingObserver::default();
        let context = CopyContext {
            current: &current,
            comparer: &IdentityComparer,
            observer: &observer,
        };

        {
            let guard = &crossbeam_epoch::pin();
            let (source_ptr, process) = start_process(&current, 67, 4, guard);

            assert_eq!(process.help_copy(source_ptr, &context, guard), 4);
            assert!(process.abort(&observer));
            assert!(!process.abort(&observer));
            assert!(process.is_aborted());

            process.copy_to_completion(source_ptr, &context, guard);

            assert_eq!(current.load(Ordering::SeqCst, guard), source_ptr);
            assert_eq!(observer.aborted(), 1);
            assert_eq!(observer.finished(), 0);
            assert_eq!(observer.swapped(), 0);
        }

        destroy(current);
    }

    #[test]
    fn copy_single_entry_is_idempotent() {
        let current = populated(31, 0..1);

        {
            let guard = &crossbeam_epoch::pin();
            let (source_ptr, process) = start_process(&current, 67, DEFAULT_HELP_BATCH_SIZE, guard);
            let entry_ptr = unsafe { source_ptr.deref() }.read_slot_at(0, guard);

            assert!(matches!(
                process.copy_single_entry(entry_ptr, &IdentityComparer, &NoopObserver, guard),
                AddOutcome::Successful
            ));

            match process.copy_single_entry(entry_ptr, &IdentityComparer, &NoopObserver, guard) {
                AddOutcome::ExistingEntryFound(existing) => assert_eq!(existing, entry_ptr),
                _ => panic!("entry copied twice"),
            }

            assert_eq!(unsafe { process.new_array(guard).deref() }.len(), 1);
        }

        destroy(current);
    }

    #[test]
    fn help_copy_claims_one_batch() {
        let current = populated(31, 0..31);
        let context = CopyContext {
            current: &current,
            comparer: &IdentityComparer,
            observer: &NoopObserver,
        };

        {
            let guard = &crossbeam_epoch::pin();
            let (source_ptr, process) = start_process(&current, 67, 8, guard);

            assert_eq!(process.help_copy(source_ptr, &context, guard), 8);
            assert!(process.is_copying());
            assert_eq!(unsafe { process.new_array(guard).deref() }.len(), 8);

            assert_eq!(process.help_copy(source_ptr, &context, guard), 8);
            assert_eq!(process.help_copy(source_ptr, &context, guard), 8);
            assert_eq!(process.help_copy(source_ptr, &context, guard), 7);
            assert!(process.is_finished());
            assert_eq!(process.help_copy(source_ptr, &context, guard), 0);

            assert_ne!(current.load(Ordering::SeqCst, guard), source_ptr);
        }

        destroy(current);
    }

    #[test]
    fn oversized_batch_claims_whole_source() {
        let current = populated(31, 0..20);
        let context = CopyContext {
            current: &current,
            comparer: &IdentityComparer,
            observer: &NoopObserver,
        };

        {
            let guard = &crossbeam_epoch::pin();
            let (source_ptr, process) = start_process(&current, 67, usize::MAX, guard);

            assert_eq!(process.help_copy(source_ptr, &context, guard), 31);
            assert!(process.is_finished());
            assert_eq!(process.help_copy(source_ptr, &context, guard), 0);
            assert_eq!(process.help_copy(source_ptr, &context, guard), 0);

            let new_array = unsafe { current.load(Ordering::SeqCst, guard).deref() };
            assert_eq!(new_array.len(), 20);
        }

        destroy(current);
    }

    #[test]
    fn destination_shares_live_count() {
        let current = populated(31, 0..5);

        {
            let guard = &crossbeam_epoch::pin();
            let source = unsafe { current.load(Ordering::SeqCst, guard).deref() };
            source.live_count().fetch_add(5, Ordering::Relaxed);

            let (_, process) = start_process(&current, 67, DEFAULT_HELP_BATCH_SIZE, guard);
            let new_array = unsafe { process.new_array(guard).deref() };

            assert_eq!(new_array.live_count().load(Ordering::Relaxed), 5);

            new_array.live_count().fetch_sub(1, Ordering::Relaxed);
            assert_eq!(source.live_count().load(Ordering::Relaxed), 4);
        }

        destroy(current);
    }

    #[test]
    fn concurrent_helpers_finish_once() {
        const NUM_THREADS: usize = 16;

        let current = Arc::new(populated(1117, 0..557));
        let observer = Arc::new(CountingObserver::default());

        let source_raw = {
            let guard = &crossbeam_epoch::pin();
            let (source_ptr, _) = start_process(&current, 2237, 3, guard);

            source_ptr.as_raw() as usize
        };

        let barrier = Arc::new(Barrier::new(NUM_THREADS));
        let threads: Vec<_> = (0..NUM_THREADS)
            .map(|_| {
                let current = current.clone();
                let observer = observer.clone();
                let barrier = barrier.clone();

                thread::spawn(move || {
                    let guard = &crossbeam_epoch::pin();
                    let source_ptr = Shared::from(source_raw as *const BucketArray<i32, i32>);
                    let process = unsafe { source_ptr.deref() }.grow_process(guard).unwrap();
                    let context = CopyContext {
                        current: &*current,
                        comparer: &IdentityComparer,
                        observer: &*observer,
                    };

                    barrier.wait();
                    process.copy_to_completion(source_ptr, &context, guard);
                })
            })
            .collect();

        for result in threads.into_iter().map(|t| t.join()) {
            assert!(result.is_ok());
        }

        assert_eq!(observer.finished(), 1);
        assert_eq!(observer.swapped(), 1);
        assert_eq!(observer.copied(), 557);

        {
            let guard = &crossbeam_epoch::pin();
            let new_array = unsafe { current.load(Ordering::SeqCst, guard).deref() };

            assert_eq!(new_array.capacity(), 2237);
            assert_eq!(new_array.len(), 557);
        }

        match Arc::try_unwrap(current) {
            Ok(current) => destroy(current),
            Err(_) => panic!("current array still shared"),
        }
    }
}
