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

use super::{entry::Entry, grow::GrowProcess};

use crate::comparer::KeyComparer;

use std::{
    mem,
    sync::{
        atomic::{AtomicIsize, AtomicUsize, Ordering},
        Arc,
    },
};

use crossbeam_epoch::{Atomic, CompareExchangeError, Guard, Owned, Shared};

/// A fixed-capacity, open-addressed array of entry pointers.
///
/// Slots go from null to an entry exactly once and are never cleared while
/// the array is reachable, so a probe sequence only ever grows. Removal
/// tombstones an entry's value instead of emptying its slot.
///
/// `live_count` belongs to a whole chain of arrays: a grow destination shares
/// its source's counter, while `clear` starts a new chain with a new one.
pub(crate) struct BucketArray<K, V> {
    slots: Box<[Atomic<Entry<K, V>>]>,
    len: AtomicUsize,
    live_count: Arc<AtomicIsize>,
    grow_process: Atomic<GrowProcess<K, V>>,
    version: usize,
}

/// Result of [`BucketArray::try_add`].
pub(crate) enum AddOutcome<'g, K, V> {
    Successful,
    ExistingEntryFound(Shared<'g, Entry<K, V>>),
    ArrayFull,
}

pub(crate) struct AddInfo<'g, K, V> {
    pub(crate) outcome: AddOutcome<'g, K, V>,
    /// Number of slots examined, including the home slot.
    pub(crate) reprobe_count: usize,
}

impl<K, V> BucketArray<K, V> {
    pub(crate) fn with_capacity(capacity: usize, version: usize) -> Self {
        Self::with_live_count(capacity, version, Arc::new(AtomicIsize::new(0)))
    }

    pub(crate) fn with_live_count(
        capacity: usize,
        version: usize,
        live_count: Arc<AtomicIsize>,
    ) -> Self {
        Self {
            slots: (0..capacity).map(|_| Atomic::null()).collect(),
            len: AtomicUsize::new(0),
            live_count,
            grow_process: Atomic::null(),
            version,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding an entry, tombstoned or not.
    pub(crate) fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub(crate) fn version(&self) -> usize {
        self.version
    }

    /// Live entries inserted through this array's chain.
    pub(crate) fn live_count(&self) -> &AtomicIsize {
        &self.live_count
    }

    pub(crate) fn share_live_count(&self) -> Arc<AtomicIsize> {
        Arc::clone(&self.live_count)
    }

    fn home_index(&self, hash: i32) -> usize {
        hash.unsigned_abs() as usize % self.slots.len()
    }

    fn probe_sequence(&self, hash: i32) -> impl Iterator<Item = &Atomic<Entry<K, V>>> {
        let capacity = self.slots.len();
        let offset = if capacity == 0 { 0 } else { self.home_index(hash) };

        (0..capacity)
            .map(move |x| (x + offset) % capacity)
            .map(move |i| &self.slots[i])
    }
}

impl<'g, K: 'g, V: 'g> BucketArray<K, V> {
    /// Installs `entry` into the first empty slot of its probe sequence.
    ///
    /// Stops early if the sequence already holds `entry` itself or an entry
    /// with an equal hash and key, and reports that entry instead. The
    /// installing thread increments the array's length and the entry's holder
    /// count.
    pub(crate) fn try_add<C: KeyComparer<K>>(
        &self,
        entry_ptr: Shared<'g, Entry<K, V>>,
        comparer: &C,
        guard: &'g Guard,
    ) -> AddInfo<'g, K, V> {
        assert!(!entry_ptr.is_null());
        let entry = unsafe { entry_ptr.deref() };

        for (examined, this_slot) in self.probe_sequence(entry.hash()).enumerate() {
            // sequentially consistent so that an insert racing a grow process
            // either is scanned by it or observes it
            let mut this_entry_ptr = this_slot.load(Ordering::SeqCst, guard);

            loop {
                if let Some(this_entry) = unsafe { this_entry_ptr.as_ref() } {
                    if this_entry_ptr == entry_ptr
                        || (this_entry.hash() == entry.hash()
                            && comparer.equals(this_entry.key(), entry.key()))
                    {
                        return AddInfo {
                            outcome: AddOutcome::ExistingEntryFound(this_entry_ptr),
                            reprobe_count: examined + 1,
                        };
                    }

                    break;
                }

                match this_slot.compare_exchange(
                    Shared::null(),
                    entry_ptr,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                    guard,
                ) {
                    Ok(_) => {
                        entry.acquire();
                        self.len.fetch_add(1, Ordering::Relaxed);

                        return AddInfo {
                            outcome: AddOutcome::Successful,
                            reprobe_count: examined + 1,
                        };
                    }
                    Err(CompareExchangeError { current, .. }) => this_entry_ptr = current,
                }
            }
        }

        AddInfo {
            outcome: AddOutcome::ArrayFull,
            reprobe_count: self.slots.len(),
        }
    }

    /// Returns the entry for `key`, tombstoned or not.
    ///
    /// Terminates on the first empty slot or after one full wrap.
    pub(crate) fn find<C: KeyComparer<K>>(
        &self,
        hash: i32,
        key: &K,
        comparer: &C,
        guard: &'g Guard,
    ) -> Option<&'g Entry<K, V>> {
        for this_slot in self.probe_sequence(hash) {
            let this_entry = unsafe { this_slot.load(Ordering::Acquire, guard).as_ref() }?;

            if this_entry.hash() == hash && comparer.equals(this_entry.key(), key) {
                return Some(this_entry);
            }
        }

        None
    }

    /// Reads a slot without probing.
    pub(crate) fn read_slot_at(&self, index: usize, guard: &'g Guard) -> Shared<'g, Entry<K, V>> {
        self.slots[index].load(Ordering::SeqCst, guard)
    }

    /// Returns the key and value in slot `index` if it holds a live entry.
    pub(crate) fn live_entry_at(&self, index: usize, guard: &'g Guard) -> Option<(&'g K, &'g V)> {
        let entry = unsafe { self.read_slot_at(index, guard).as_ref() }?;

        entry.value(guard).map(|value| (entry.key(), value))
    }

    /// Publishes `candidate` as this array's grow process unless one already
    /// exists.
    ///
    /// Returns the authoritative process and whether it is `candidate`. A
    /// losing candidate is dropped without being used.
    pub(crate) fn establish_grow_process(
        &self,
        candidate: Owned<GrowProcess<K, V>>,
        guard: &'g Guard,
    ) -> (&'g GrowProcess<K, V>, bool) {
        match self.grow_process.compare_exchange(
            Shared::null(),
            candidate,
            Ordering::SeqCst,
            Ordering::SeqCst,
            guard,
        ) {
            Ok(process_ptr) => (unsafe { process_ptr.deref() }, true),
            Err(CompareExchangeError { current, .. }) => (unsafe { current.deref() }, false),
        }
    }

    pub(crate) fn grow_process(&self, guard: &'g Guard) -> Option<&'g GrowProcess<K, V>> {
        unsafe { self.grow_process.load(Ordering::SeqCst, guard).as_ref() }
    }
}

impl<K, V> Drop for BucketArray<K, V> {
    fn drop(&mut self) {
        // drop is only reached once no other thread can observe this array,
        // either through exclusive access or after deferred destruction
        let guard = unsafe { crossbeam_epoch::unprotected() };

        for this_slot in self.slots.iter() {
            let this_entry_ptr = this_slot.swap(Shared::null(), Ordering::Relaxed, guard);

            if !this_entry_ptr.is_null() {
                unsafe { Entry::release(this_entry_ptr) };
            }
        }

        let process_ptr = self
            .grow_process
            .swap(Shared::null(), Ordering::Relaxed, guard);

        if !process_ptr.is_null() {
            mem::drop(unsafe { process_ptr.into_owned() });
        }
    }
}
