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

//! A lockfree concurrent dictionary implemented with open addressing, linear
//! probing and a cooperative grow-array resize.

mod bucket_array;
mod entry;
mod grow;


pub use grow::DEFAULT_HELP_BATCH_SIZE;

use bucket_array::{AddInfo, AddOutcome, BucketArray};
use entry::Entry;
use grow::{CopyContext, GrowProcess};

use crate::{
    comparer::{DefaultComparer, KeyComparer},
    error::{Error, Result},
    growth::{DoublingPrimeStrategy, GrowthStrategy},
    observer::{NoopObserver, ResizeObserver},
    spawner::{BackgroundSpawner, ThreadSpawner},
};

use std::{
    cmp,
    marker::PhantomData,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_epoch::{self, Atomic, Guard, Owned, Shared};
use crossbeam_utils::Backoff;

/// A lockfree concurrent dictionary implemented with open addressing and
/// linear probing.
///
/// Every operation is non-blocking. Keys are placed at
/// `|hash_code(key)| mod capacity` and probe forward from there. Removal
/// leaves a tombstone in the entry's value cell; a later insert for the same
/// key reactivates the entry instead of claiming a new slot.
///
/// When the backing array grows past its [`GrowthStrategy`]'s thresholds, a
/// grow process copies every entry into a larger array. Threads that insert
/// while a resize is in flight help copy a bounded batch of slots, and a
/// task handed to the [`BackgroundSpawner`] drives the rest. Readers keep
/// using the old array until the new one is fully populated and swapped in.
///
/// Operations that return a value require `V` to implement [`Clone`], as the
/// value may be concurrently removed or replaced at any moment, so the best
/// we can do is return a copy of it. Inserting operations require it as well,
/// since an insert that loses a race through a superseded array hands its
/// value on by copy.
///
/// Keys rejected by the dictionary's [`KeyComparer`] yield
/// [`Error::InvalidKey`].
pub struct ConcurrentDictionary<K, V, C = DefaultComparer> {
    inner: Arc<Inner<K, V, C>>,
}

struct Inner<K, V, C> {
    array: Atomic<BucketArray<K, V>>,
    comparer: C,
    growth: Box<dyn GrowthStrategy>,
    spawner: Box<dyn BackgroundSpawner>,
    observer: Box<dyn ResizeObserver>,
    initial_capacity: usize,
    help_batch_size: usize,
    versions: AtomicUsize,
}

/// Result of the internal insert routine.
enum Insertion<'g, K, V> {
    /// The candidate entry was installed and counted.
    Inserted,
    /// An entry for the key already exists. The candidate's value is handed
    /// back so that a tombstoned entry can be reactivated with it, counted
    /// against `array`'s chain.
    Found {
        array: &'g BucketArray<K, V>,
        entry: &'g Entry<K, V>,
        value: Owned<V>,
    },
}

impl<K, V> ConcurrentDictionary<K, V, DefaultComparer>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates an empty `ConcurrentDictionary` with the default growth
    /// strategy, comparer and background spawner.
    pub fn new() -> Self {
        Builder::new().build()
    }

    /// Creates an empty `ConcurrentDictionary` whose first bucket array has
    /// exactly `capacity` slots.
    ///
    /// A capacity of 0 is allowed; the first insert then escalates straight
    /// to the first capacity of the growth table.
    pub fn with_capacity(capacity: usize) -> Self {
        Builder::new().initial_capacity(capacity).build()
    }
}

impl ConcurrentDictionary<(), ()> {
    /// Returns a [`Builder`] for configuring a dictionary.
    ///
    /// ```
    /// use lockfree_dictionary::ConcurrentDictionary;
    ///
    /// let dictionary = ConcurrentDictionary::builder()
    ///     .initial_capacity(4)
    ///     .build::<i32, i32>();
    ///
    /// assert_eq!(dictionary.capacity(), 4);
    /// ```
    pub fn builder() -> Builder<DefaultComparer> {
        Builder::new()
    }
}

impl<K, V> Default for ConcurrentDictionary<K, V, DefaultComparer>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, C> ConcurrentDictionary<K, V, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: KeyComparer<K> + 'static,
{
    /// Creates an empty `ConcurrentDictionary` that hashes and compares keys
    /// with `comparer`.
    pub fn with_comparer(comparer: C) -> Self {
        Builder::new().comparer(comparer).build()
    }

    /// Returns the number of live entries confirmed to have been inserted.
    ///
    /// The count is eventually consistent: in-progress operations are not
    /// reflected, and it never drops below zero.
    pub fn len(&self) -> usize {
        let guard = &crossbeam_epoch::pin();
        let live = self
            .inner
            .current_array(guard)
            .live_count()
            .load(Ordering::Relaxed);

        cmp::max(live, 0) as usize
    }

    /// Returns true if [`len`](#method.len) is zero.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of slots in the current bucket array.
    ///
    /// While a resize is in flight this is the capacity of the array being
    /// copied from, not the one being copied into.
    pub fn capacity(&self) -> usize {
        let guard = &crossbeam_epoch::pin();

        self.inner.current_array(guard).capacity()
    }

    /// Inserts `value` for `key` if no live value is associated with it.
    ///
    /// Returns true if the value was inserted, either into a fresh slot or by
    /// reactivating a removed entry.
    pub fn try_add(&self, key: K, value: V) -> Result<bool>
    where
        V: Clone,
    {
        let hash = self.inner.hash_key(&key)?;
        let guard = &crossbeam_epoch::pin();

        match self.insert(hash, key, value, guard) {
            Insertion::Inserted => Ok(true),
            Insertion::Found {
                array,
                entry,
                value,
            } => Ok(self.inner.reactivate(array, entry, value, guard).is_ok()),
        }
    }

    /// Returns a copy of the value associated with `key`.
    pub fn try_get(&self, key: &K) -> Result<Option<V>>
    where
        V: Clone,
    {
        let guard = &crossbeam_epoch::pin();

        Ok(self
            .inner
            .find(key, guard)?
            .and_then(|(_, entry)| entry.value(guard))
            .cloned())
    }

    /// Returns a copy of the value associated with `key`, or
    /// [`Error::KeyNotFound`] if there is none.
    pub fn get(&self, key: &K) -> Result<V>
    where
        V: Clone,
    {
        self.try_get(key)?.ok_or(Error::KeyNotFound)
    }

    /// Returns true if a live value is associated with `key`.
    pub fn contains_key(&self, key: &K) -> Result<bool> {
        let guard = &crossbeam_epoch::pin();

        Ok(self
            .inner
            .find(key, guard)?
            .map_or(false, |(_, entry)| !entry.is_removed(guard)))
    }

    /// Returns true if the live value associated with `key` equals `value`.
    ///
    /// Values are compared with their [`PartialEq`] implementation; only keys
    /// go through the dictionary's [`KeyComparer`].
    ///
    /// ```
    /// use lockfree_dictionary::ConcurrentDictionary;
    ///
    /// let dictionary = ConcurrentDictionary::new();
    /// dictionary.try_add("ratio", 1.5).unwrap();
    ///
    /// assert_eq!(dictionary.contains(&"ratio", &1.5), Ok(true));
    /// assert_eq!(dictionary.contains(&"ratio", &2.0), Ok(false));
    /// assert_eq!(dictionary.contains(&"rate", &1.5), Ok(false));
    /// ```
    pub fn contains(&self, key: &K, value: &V) -> Result<bool>
    where
        V: PartialEq,
    {
        let guard = &crossbeam_epoch::pin();

        Ok(self
            .inner
            .find(key, guard)?
            .and_then(|(_, entry)| entry.value(guard))
            .map_or(false, |current| current == value))
    }

    /// Removes the value associated with `key` and returns a copy of it.
    ///
    /// The entry keeps its slot as a tombstone.
    pub fn try_remove(&self, key: &K) -> Result<Option<V>>
    where
        V: Clone,
    {
        let guard = &crossbeam_epoch::pin();

        Ok(self
            .inner
            .find(key, guard)?
            .and_then(|(array, entry)| remove_entry(array, entry, guard)))
    }

    /// Replaces the live value associated with `key`.
    ///
    /// Returns false without inserting if `key` is absent or removed.
    pub fn try_update(&self, key: &K, value: V) -> Result<bool> {
        let guard = &crossbeam_epoch::pin();

        let entry = match self.inner.find(key, guard)? {
            Some((_, entry)) => entry,
            None => return Ok(false),
        };

        let mut new_value = Owned::new(value);

        loop {
            let current = entry.read_value(guard);

            if current.is_null() {
                return Ok(false);
            }

            match entry.try_update(new_value, current, guard) {
                Ok(_) => return Ok(true),
                Err(failure) => new_value = failure.new_value,
            }
        }
    }

    /// Returns a copy of the value associated with `key`, inserting the
    /// result of `factory` if there is none.
    ///
    /// `factory` is invoked at most once, and only if no live value was seen.
    /// Its result may still lose to a concurrent insert, in which case the
    /// winner's value is returned.
    pub fn get_or_add<F: FnOnce(&K) -> V>(&self, key: K, factory: F) -> Result<V>
    where
        V: Clone,
    {
        self.get_or_add_with_status(key, factory)
            .map(|(value, _)| value)
    }

    /// Like [`get_or_add`](#method.get_or_add), but also reports whether the
    /// value produced by `factory` was the one inserted.
    pub fn get_or_add_with_status<F: FnOnce(&K) -> V>(
        &self,
        key: K,
        factory: F,
    ) -> Result<(V, bool)>
    where
        V: Clone,
    {
        let hash = self.inner.hash_key(&key)?;
        let guard = &crossbeam_epoch::pin();

        let existing = self
            .inner
            .current_array(guard)
            .find(hash, &key, &self.inner.comparer, guard)
            .and_then(|entry| entry.value(guard));

        if let Some(value) = existing {
            return Ok((value.clone(), false));
        }

        let value = factory(&key);
        let result = value.clone();

        match self.insert(hash, key, value, guard) {
            Insertion::Inserted => Ok((result, true)),
            Insertion::Found {
                array,
                entry,
                value,
            } => match self.inner.reactivate(array, entry, value, guard) {
                Ok(()) => Ok((result, true)),
                Err(winner) => Ok((unsafe { winner.deref() }.clone(), false)),
            },
        }
    }

    /// Inserts `value` for `key`, replacing any live value.
    ///
    /// Returns true if the insert branch was taken (a fresh slot or a
    /// reactivated tombstone) and false if an existing value was replaced.
    pub fn add_or_update(&self, key: K, value: V) -> Result<bool>
    where
        V: Clone,
    {
        let hash = self.inner.hash_key(&key)?;
        let guard = &crossbeam_epoch::pin();

        let (array, entry, mut new_value) = match self.insert(hash, key, value, guard) {
            Insertion::Inserted => return Ok(true),
            Insertion::Found {
                array,
                entry,
                value,
            } => (array, entry, value),
        };

        loop {
            let current = entry.read_value(guard);

            match entry.try_update(new_value, current, guard) {
                Ok(previous) => {
                    if previous.is_null() {
                        array.live_count().fetch_add(1, Ordering::Relaxed);

                        return Ok(true);
                    }

                    return Ok(false);
                }
                Err(failure) => new_value = failure.new_value,
            }
        }
    }

    /// Removes every entry.
    ///
    /// Any in-flight resize is aborted and a fresh array with the initial
    /// capacity and its own live count replaces the current one. Inserts
    /// racing with `clear` may land in the discarded array, and removals
    /// racing with it only touch the discarded array's count.
    pub fn clear(&self) {
        let inner = &*self.inner;
        let guard = &crossbeam_epoch::pin();
        let backoff = Backoff::new();

        let mut fresh = Owned::new(BucketArray::with_capacity(
            inner.initial_capacity,
            inner.next_version(),
        ));

        loop {
            let current_ptr = inner.array.load(Ordering::SeqCst, guard);

            if let Some(process) = unsafe { current_ptr.deref() }.grow_process(guard) {
                process.abort(&*inner.observer);
            }

            match inner.array.compare_exchange(
                current_ptr,
                fresh,
                Ordering::SeqCst,
                Ordering::SeqCst,
                guard,
            ) {
                Ok(_) => {
                    unsafe { guard.defer_destroy(current_ptr) };

                    return;
                }
                Err(error) => {
                    fresh = error.new;
                    backoff.spin();
                }
            }
        }
    }

    /// Returns an iterator over copies of the live key-value pairs.
    ///
    /// The iterator scans the array that is current when it is created. It
    /// is weakly consistent: entries inserted or removed during iteration may
    /// or may not be yielded. The iterator holds an epoch guard, delaying
    /// memory reclamation until it is dropped.
    pub fn iter(&self) -> Iter<'_, K, V> {
        let guard = crossbeam_epoch::pin();
        let array = self.inner.array.load(Ordering::Acquire, &guard).as_raw();

        Iter {
            guard,
            array,
            index: 0,
            _dictionary: PhantomData,
        }
    }

    /// Returns an iterator over copies of the live keys.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { iter: self.iter() }
    }

    /// Returns an iterator over copies of the live values.
    pub fn values(&self) -> Values<'_, K, V> {
        Values { iter: self.iter() }
    }
}

impl<K, V, C> ConcurrentDictionary<K, V, C>
where
    K: Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    C: KeyComparer<K> + 'static,
{
    fn insert<'g>(&self, hash: i32, key: K, value: V, guard: &'g Guard) -> Insertion<'g, K, V> {
        let entry_ptr = Owned::new(Entry::new(hash, key, value)).into_shared(guard);

        loop {
            let array_ptr = self.inner.array.load(Ordering::SeqCst, guard);

            if let Some(insertion) = self.insert_into(array_ptr, entry_ptr, guard) {
                return insertion;
            }
        }
    }

    /// Makes one attempt at inserting the unpublished `entry_ptr` through
    /// `array_ptr`, which may already be superseded.
    ///
    /// Returns `None` if the insert has to be retried against the current
    /// array. `entry_ptr` is then still unpublished and owned by the caller.
    fn insert_into<'g>(
        &self,
        array_ptr: Shared<'g, BucketArray<K, V>>,
        entry_ptr: Shared<'g, Entry<K, V>>,
        guard: &'g Guard,
    ) -> Option<Insertion<'g, K, V>> {
        let array = unsafe { array_ptr.deref() };
        let AddInfo {
            outcome,
            reprobe_count,
        } = array.try_add(entry_ptr, &self.inner.comparer, guard);

        match outcome {
            AddOutcome::Successful => {
                if let Some(existing) = self.propagate(array_ptr, entry_ptr, guard) {
                    return Some(match withdraw(unsafe { entry_ptr.deref() }, guard) {
                        Some(value) => Insertion::Found {
                            array,
                            entry: existing,
                            value,
                        },
                        None => {
                            // removed through the superseded array before
                            // we could withdraw it; count it so the
                            // remover's decrement balances
                            array.live_count().fetch_add(1, Ordering::Relaxed);

                            Insertion::Inserted
                        }
                    });
                }

                array.live_count().fetch_add(1, Ordering::Relaxed);
                self.help_resize(array_ptr, reprobe_count, guard);

                Some(Insertion::Inserted)
            }
            AddOutcome::ExistingEntryFound(existing_ptr) => {
                // an entry found through a superseded array may have been
                // withdrawn from its successors
                if self.inner.array.load(Ordering::SeqCst, guard) != array_ptr {
                    return None;
                }

                let candidate = *unsafe { entry_ptr.into_owned() }.into_box();

                Some(Insertion::Found {
                    array,
                    entry: unsafe { existing_ptr.deref() },
                    value: candidate.into_value(),
                })
            }
            AddOutcome::ArrayFull => {
                self.escalate_full(array_ptr, guard);

                None
            }
        }
    }
}

impl<K, V, C> ConcurrentDictionary<K, V, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: KeyComparer<K> + 'static,
{
    /// Pushes an entry installed into `array_ptr` down the chain of arrays
    /// that succeed it.
    ///
    /// Returns the conflicting entry if a successor already holds a
    /// different entry for the same key.
    fn propagate<'g>(
        &self,
        mut array_ptr: Shared<'g, BucketArray<K, V>>,
        entry_ptr: Shared<'g, Entry<K, V>>,
        guard: &'g Guard,
    ) -> Option<&'g Entry<K, V>> {
        let inner = &*self.inner;

        loop {
            let array = unsafe { array_ptr.deref() };

            let process = match array.grow_process(guard) {
                Some(process) if !process.is_aborted() => process,
                _ => return None,
            };

            let new_array_ptr = process.new_array(guard);

            match process.copy_single_entry(entry_ptr, &inner.comparer, &*inner.observer, guard) {
                AddOutcome::Successful => (),
                AddOutcome::ExistingEntryFound(existing_ptr) => {
                    if existing_ptr != entry_ptr {
                        return Some(unsafe { existing_ptr.deref() });
                    }
                }
                AddOutcome::ArrayFull => {
                    // the successor took over and filled up without the
                    // entry; replace it before going down the chain
                    self.escalate_full(new_array_ptr, guard);
                }
            }

            array_ptr = new_array_ptr;
        }
    }

    /// Helps an in-flight resize of `array_ptr` by one batch, or starts one
    /// if the growth strategy asks for it.
    fn help_resize<'g>(
        &self,
        array_ptr: Shared<'g, BucketArray<K, V>>,
        reprobe_count: usize,
        guard: &'g Guard,
    ) {
        let inner = &*self.inner;
        let array = unsafe { array_ptr.deref() };
        let context = inner.copy_context();

        if let Some(process) = array.grow_process(guard) {
            process.help_copy(array_ptr, &context, guard);

            return;
        }

        let new_capacity =
            match inner
                .growth
                .next_capacity(array.len(), array.capacity(), reprobe_count)
            {
                Some(new_capacity) => new_capacity,
                None => return,
            };

        let (process, won) = inner.start_grow_process(array_ptr, new_capacity, guard);
        process.help_copy(array_ptr, &context, guard);

        if won && process.is_copying() {
            self.spawn_completion();
        }
    }

    /// Makes sure a full array is replaced before the insert retries.
    fn escalate_full<'g>(&self, array_ptr: Shared<'g, BucketArray<K, V>>, guard: &'g Guard) {
        let inner = &*self.inner;

        inner
            .observer
            .array_full(unsafe { array_ptr.deref() }.capacity());

        let (process, _) = inner.ensure_grow_process(array_ptr, guard);
        process.copy_to_completion(array_ptr, &inner.copy_context(), guard);

        let backoff = Backoff::new();

        while inner.array.load(Ordering::SeqCst, guard) == array_ptr {
            backoff.snooze();
        }
    }

    fn spawn_completion(&self) {
        let inner = Arc::clone(&self.inner);

        self.inner
            .spawner
            .spawn(Box::new(move || inner.finish_current_resize()));
    }
}

impl<K, V, C> Inner<K, V, C>
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
    C: KeyComparer<K> + 'static,
{
    fn hash_key(&self, key: &K) -> Result<i32> {
        if !self.comparer.is_valid_key(key) {
            return Err(Error::InvalidKey);
        }

        Ok(self.comparer.hash_code(key))
    }

    fn current_array<'g>(&self, guard: &'g Guard) -> &'g BucketArray<K, V> {
        let array_ptr = self.array.load(Ordering::Acquire, guard);
        assert!(!array_ptr.is_null());

        unsafe { array_ptr.deref() }
    }

    /// Returns the entry for `key` in the current array, along with that
    /// array.
    fn find<'g>(
        &self,
        key: &K,
        guard: &'g Guard,
    ) -> Result<Option<(&'g BucketArray<K, V>, &'g Entry<K, V>)>> {
        let hash = self.hash_key(key)?;
        let array = self.current_array(guard);

        Ok(array
            .find(hash, key, &self.comparer, guard)
            .map(|entry| (array, entry)))
    }

    /// Installs `value` into a tombstoned entry found through `array`.
    ///
    /// On failure returns the value that was live instead, which is never
    /// null.
    fn reactivate<'g>(
        &self,
        array: &BucketArray<K, V>,
        entry: &'g Entry<K, V>,
        value: Owned<V>,
        guard: &'g Guard,
    ) -> std::result::Result<(), Shared<'g, V>> {
        match entry.try_update(value, Shared::null(), guard) {
            Ok(_) => {
                array.live_count().fetch_add(1, Ordering::Relaxed);

                Ok(())
            }
            Err(failure) => Err(failure.actual),
        }
    }

    fn next_version(&self) -> usize {
        self.versions.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn copy_context(&self) -> CopyContext<'_, K, V, C> {
        CopyContext {
            current: &self.array,
            comparer: &self.comparer,
            observer: &*self.observer,
        }
    }

    /// Tries to establish a grow process on `array_ptr`.
    ///
    /// The winning thread creates the destination array before anyone else
    /// can copy into it.
    fn start_grow_process<'g>(
        &self,
        array_ptr: Shared<'g, BucketArray<K, V>>,
        new_capacity: usize,
        guard: &'g Guard,
    ) -> (&'g GrowProcess<K, V>, bool) {
        let array = unsafe { array_ptr.deref() };
        let candidate = Owned::new(GrowProcess::new(
            array.capacity(),
            new_capacity,
            self.help_batch_size,
        ));

        let (process, won) = array.establish_grow_process(candidate, guard);

        if won {
            process.create_new_array(self.next_version(), array.share_live_count());
            self.observer
                .grow_process_created(process.old_capacity(), process.new_capacity());
        }

        (process, won)
    }

    /// Returns the grow process of `array_ptr`, starting one towards the next
    /// table capacity if there is none.
    fn ensure_grow_process<'g>(
        &self,
        array_ptr: Shared<'g, BucketArray<K, V>>,
        guard: &'g Guard,
    ) -> (&'g GrowProcess<K, V>, bool) {
        let array = unsafe { array_ptr.deref() };

        match array.grow_process(guard) {
            Some(process) => (process, false),
            None => {
                let new_capacity = self.growth.capacity_after(array.capacity());

                self.start_grow_process(array_ptr, new_capacity, guard)
            }
        }
    }

    /// Drives the current array's grow process, if any, to completion.
    fn finish_current_resize(&self) {
        let guard = &crossbeam_epoch::pin();
        let array_ptr = self.array.load(Ordering::SeqCst, guard);

        if let Some(process) = unsafe { array_ptr.deref() }.grow_process(guard) {
            process.copy_to_completion(array_ptr, &self.copy_context(), guard);
        }
    }
}

impl<K, V, C> Drop for Inner<K, V, C> {
    fn drop(&mut self) {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let array_ptr = self.array.swap(Shared::null(), Ordering::Relaxed, guard);

        if !array_ptr.is_null() {
            drop(unsafe { array_ptr.into_owned() });
        }
    }
}

/// Removes the live value of an entry found through `array`, returning a
/// copy of it.
fn remove_entry<K, V: Clone>(
    array: &BucketArray<K, V>,
    entry: &Entry<K, V>,
    guard: &Guard,
) -> Option<V> {
    loop {
        match entry.try_mark_removed(guard) {
            Ok(removed) => {
                array.live_count().fetch_sub(1, Ordering::Relaxed);

                return Some(removed.clone());
            }
            Err(actual) if actual.is_null() => return None,
            Err(_) => continue,
        }
    }
}

/// Tombstones an entry that lost to a different entry in a successor array,
/// handing back a copy of its value.
///
/// Returns `None` if the entry was already removed through another thread.
fn withdraw<K, V: Clone>(entry: &Entry<K, V>, guard: &Guard) -> Option<Owned<V>> {
    loop {
        match entry.try_mark_removed(guard) {
            Ok(value) => return Some(Owned::new(value.clone())),
            Err(actual) if actual.is_null() => return None,
            Err(_) => continue,
        }
    }
}

/// Configures and creates a [`ConcurrentDictionary`].
///
/// ```
/// use lockfree_dictionary::{Builder, DoublingPrimeStrategy, InlineSpawner};
///
/// let dictionary = Builder::new()
///     .growth_strategy(DoublingPrimeStrategy::new(0.75, 16))
///     .initial_capacity(67)
///     .help_batch_size(32)
///     .background_spawner(InlineSpawner)
///     .build::<u64, String>();
///
/// assert_eq!(dictionary.capacity(), 67);
/// ```
pub struct Builder<C = DefaultComparer> {
    comparer: C,
    growth: Box<dyn GrowthStrategy>,
    initial_capacity: Option<usize>,
    help_batch_size: usize,
    spawner: Box<dyn BackgroundSpawner>,
    observer: Box<dyn ResizeObserver>,
}

impl Builder<DefaultComparer> {
    /// Creates a builder with the default comparer, the default
    /// [`DoublingPrimeStrategy`], a [`ThreadSpawner`] and a
    /// [`NoopObserver`].
    pub fn new() -> Self {
        Self {
            comparer: DefaultComparer::default(),
            growth: Box::new(DoublingPrimeStrategy::default()),
            initial_capacity: None,
            help_batch_size: DEFAULT_HELP_BATCH_SIZE,
            spawner: Box::new(ThreadSpawner),
            observer: Box::new(NoopObserver),
        }
    }
}

impl Default for Builder<DefaultComparer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Builder<C> {
    /// Sets the key comparer.
    pub fn comparer<D>(self, comparer: D) -> Builder<D> {
        Builder {
            comparer,
            growth: self.growth,
            initial_capacity: self.initial_capacity,
            help_batch_size: self.help_batch_size,
            spawner: self.spawner,
            observer: self.observer,
        }
    }

    /// Sets the growth strategy. Unless overridden with
    /// [`initial_capacity`](#method.initial_capacity), the first array takes
    /// the strategy's initial capacity.
    pub fn growth_strategy<G: GrowthStrategy + 'static>(mut self, growth: G) -> Self {
        self.growth = Box::new(growth);
        self
    }

    /// Sets the number of slots of the first array and of the array
    /// installed by [`clear`](ConcurrentDictionary::clear).
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = Some(capacity);
        self
    }

    /// Sets how many source slots a helping insert copies per resize step.
    ///
    /// # Panics
    ///
    /// Panics if `batch_size` is 0.
    pub fn help_batch_size(mut self, batch_size: usize) -> Self {
        assert!(batch_size > 0, "help batch size must be positive");

        self.help_batch_size = batch_size;
        self
    }

    /// Sets the spawner that runs background copy tasks.
    pub fn background_spawner<S: BackgroundSpawner + 'static>(mut self, spawner: S) -> Self {
        self.spawner = Box::new(spawner);
        self
    }

    /// Sets the observer notified of resize events.
    pub fn observer<O: ResizeObserver + 'static>(mut self, observer: O) -> Self {
        self.observer = Box::new(observer);
        self
    }

    /// Creates an empty dictionary with this configuration.
    pub fn build<K, V>(self) -> ConcurrentDictionary<K, V, C>
    where
        K: Send + Sync + 'static,
        V: Send + Sync + 'static,
        C: KeyComparer<K> + 'static,
    {
        let initial_capacity = self
            .initial_capacity
            .unwrap_or_else(|| self.growth.initial_capacity());

        ConcurrentDictionary {
            inner: Arc::new(Inner {
                array: Atomic::new(BucketArray::with_capacity(initial_capacity, 0)),
                comparer: self.comparer,
                growth: self.growth,
                spawner: self.spawner,
                observer: self.observer,
                initial_capacity,
                help_batch_size: self.help_batch_size,
                versions: AtomicUsize::new(0),
            }),
        }
    }
}

/// Iterator over copies of a dictionary's live key-value pairs, returned by
/// [`ConcurrentDictionary::iter`].
pub struct Iter<'d, K, V> {
    guard: Guard,
    array: *const BucketArray<K, V>,
    index: usize,
    _dictionary: PhantomData<&'d (K, V)>,
}

impl<'d, K: Clone, V: Clone> Iterator for Iter<'d, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        // loaded under `self.guard`, which is held for the iterator's life
        let array = unsafe { &*self.array };

        while self.index < array.capacity() {
            let index = self.index;
            self.index += 1;

            if let Some((key, value)) = array.live_entry_at(index, &self.guard) {
                return Some((key.clone(), value.clone()));
            }
        }

        None
    }
}

/// Iterator over copies of a dictionary's live keys.
pub struct Keys<'d, K, V> {
    iter: Iter<'d, K, V>,
}

impl<'d, K: Clone, V: Clone> Iterator for Keys<'d, K, V> {
    type Item = K;

    fn next(&mut self) -> Option<K> {
        self.iter.next().map(|(key, _)| key)
    }
}

/// Iterator over copies of a dictionary's live values.
pub struct Values<'d, K, V> {
    iter: Iter<'d, K, V>,
}

impl<'d, K: Clone, V: Clone> Iterator for Values<'d, K, V> {
    type Item = V;

    fn next(&mut self) -> Option<V> {
        self.iter.next().map(|(_, value)| value)
    }
}
