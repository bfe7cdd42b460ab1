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

use std::{
    mem,
    sync::atomic::{AtomicUsize, Ordering},
};

use crossbeam_epoch::{Atomic, CompareExchangeError, Guard, Owned, Shared};

/// A key, its hash code, and a CAS-updated value cell.
///
/// A null value pointer is the tombstone: removal swaps the value out, and a
/// later insert for the same key reactivates the entry by swapping a value
/// back in. The key and hash never change once the entry exists.
///
/// An installed entry can be referenced by several bucket arrays at once (a
/// source array and the destinations it was copied into). `holders` counts
/// those arrays; the last one to be destroyed frees the entry.
pub(crate) struct Entry<K, V> {
    hash: i32,
    key: K,
    value: Atomic<V>,
    holders: AtomicUsize,
}

/// A value CAS that lost against a concurrent writer.
pub(crate) struct UpdateFailure<'g, V> {
    /// The value that was actually in the cell. Null if it was a tombstone.
    pub(crate) actual: Shared<'g, V>,
    /// The rejected value, handed back for a retry.
    pub(crate) new_value: Owned<V>,
}

impl<K, V> Entry<K, V> {
    pub(crate) fn new(hash: i32, key: K, value: V) -> Self {
        Self {
            hash,
            key,
            value: Atomic::new(value),
            holders: AtomicUsize::new(0),
        }
    }

    pub(crate) fn hash(&self) -> i32 {
        self.hash
    }

    pub(crate) fn key(&self) -> &K {
        &self.key
    }

    /// Returns the current value pointer, null for a tombstone.
    pub(crate) fn read_value<'g>(&self, guard: &'g Guard) -> Shared<'g, V> {
        self.value.load(Ordering::Acquire, guard)
    }

    /// Returns a reference to the current value, `None` for a tombstone.
    pub(crate) fn value<'g>(&self, guard: &'g Guard) -> Option<&'g V> {
        unsafe { self.read_value(guard).as_ref() }
    }

    pub(crate) fn is_removed(&self, guard: &Guard) -> bool {
        self.read_value(guard).is_null()
    }

    /// Replaces `expected` with `new_value` in a single CAS.
    ///
    /// On success the previous value is returned and retired; it stays
    /// readable for the lifetime of `guard`.
    pub(crate) fn try_update<'g>(
        &self,
        new_value: Owned<V>,
        expected: Shared<'g, V>,
        guard: &'g Guard,
    ) -> Result<Shared<'g, V>, UpdateFailure<'g, V>> {
        match self.value.compare_exchange(
            expected,
            new_value,
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(_) => {
                if !expected.is_null() {
                    unsafe { guard.defer_destroy(expected) };
                }

                Ok(expected)
            }
            Err(CompareExchangeError { current, new }) => Err(UpdateFailure {
                actual: current,
                new_value: new,
            }),
        }
    }

    /// Swaps the current value for the tombstone in a single CAS.
    ///
    /// Returns the removed value, or the value actually observed if the CAS
    /// failed. An observed tombstone (null) means the entry was already
    /// removed.
    pub(crate) fn try_mark_removed<'g>(&self, guard: &'g Guard) -> Result<&'g V, Shared<'g, V>> {
        let current = self.read_value(guard);

        if current.is_null() {
            return Err(current);
        }

        match self.value.compare_exchange(
            current,
            Shared::null(),
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(_) => unsafe {
                guard.defer_destroy(current);

                Ok(current.deref())
            },
            Err(CompareExchangeError { current, .. }) => Err(current),
        }
    }

    /// Takes the value out of an entry that was never published.
    pub(crate) fn take_value(&mut self) -> Option<Owned<V>> {
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let value_ptr = self.value.swap(Shared::null(), Ordering::Relaxed, guard);

        if value_ptr.is_null() {
            None
        } else {
            Some(unsafe { value_ptr.into_owned() })
        }
    }

    /// Consumes an entry that was never published and returns its value.
    ///
    /// # Panics
    ///
    /// Panics if the value was already taken.
    pub(crate) fn into_value(mut self) -> Owned<V> {
        match self.take_value() {
            Some(value) => value,
            None => panic!("unpublished entry holds no value"),
        }
    }

    /// Records that one more bucket array references this entry.
    pub(crate) fn acquire(&self) {
        self.holders.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops one bucket array's reference to the entry, freeing it if that
    /// was the last one.
    ///
    /// # Safety
    ///
    /// `ptr` must come from a bucket array that is being destroyed, after
    /// which no thread can reach the entry through that array.
    pub(crate) unsafe fn release(ptr: Shared<'_, Self>) {
        assert!(!ptr.is_null());

        if ptr.deref().holders.fetch_sub(1, Ordering::AcqRel) == 1 {
            mem::drop(ptr.into_owned());
        }
    }
}

impl<K, V> Drop for Entry<K, V> {
    fn drop(&mut self) {
        if let Some(value) = self.take_value() {
            mem::drop(value);
        }
    }
}
