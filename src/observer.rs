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

//! Instrumentation hooks for the grow-array protocol.
//!
//! A dictionary holds one [`ResizeObserver`], passed in at construction. Its
//! methods are invoked inline by whichever thread hits the instrumentation
//! point, so implementations must be cheap and must not call back into the
//! dictionary.

use std::sync::Arc;

/// Receives events from grow processes.
///
/// Every method has an empty default implementation.
pub trait ResizeObserver: Send + Sync {
    /// A grow process was established on an array of `old_capacity` slots.
    fn grow_process_created(&self, _old_capacity: usize, _new_capacity: usize) {}

    /// An entry was installed into the destination array, either by the
    /// scanning copy or by an insert pushing its own entry forward.
    fn entry_copied(&self, _hash: i32, _new_capacity: usize) {}

    /// A grow process transitioned from copying to finished.
    fn grow_process_finished(&self, _old_capacity: usize, _new_capacity: usize) {}

    /// A grow process was aborted by a concurrent clear.
    fn grow_process_aborted(&self, _old_capacity: usize) {}

    /// The destination array replaced the source as the current array.
    fn array_swapped(&self, _old_version: usize, _new_version: usize, _new_capacity: usize) {}

    /// An insert found every slot occupied and is escalating the resize.
    fn array_full(&self, _capacity: usize) {}
}

impl<O: ResizeObserver + ?Sized> ResizeObserver for Arc<O> {
    fn grow_process_created(&self, old_capacity: usize, new_capacity: usize) {
        (**self).grow_process_created(old_capacity, new_capacity)
    }

    fn entry_copied(&self, hash: i32, new_capacity: usize) {
        (**self).entry_copied(hash, new_capacity)
    }

    fn grow_process_finished(&self, old_capacity: usize, new_capacity: usize) {
        (**self).grow_process_finished(old_capacity, new_capacity)
    }

    fn grow_process_aborted(&self, old_capacity: usize) {
        (**self).grow_process_aborted(old_capacity)
    }

    fn array_swapped(&self, old_version: usize, new_version: usize, new_capacity: usize) {
        (**self).array_swapped(old_version, new_version, new_capacity)
    }

    fn array_full(&self, capacity: usize) {
        (**self).array_full(capacity)
    }
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl ResizeObserver for NoopObserver {}

/// Observer that emits [`tracing`] events.
///
/// Process lifecycle events are emitted at `DEBUG`, per-entry copies at
/// `TRACE`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl ResizeObserver for TracingObserver {
    fn grow_process_created(&self, old_capacity: usize, new_capacity: usize) {
        tracing::debug!(old_capacity, new_capacity, "grow process created");
    }

    fn entry_copied(&self, hash: i32, new_capacity: usize) {
        tracing::trace!(hash, new_capacity, "entry copied");
    }

    fn grow_process_finished(&self, old_capacity: usize, new_capacity: usize) {
        tracing::debug!(old_capacity, new_capacity, "grow process finished");
    }

    fn grow_process_aborted(&self, old_capacity: usize) {
        tracing::debug!(old_capacity, "grow process aborted");
    }

    fn array_swapped(&self, old_version: usize, new_version: usize, new_capacity: usize) {
        tracing::debug!(old_version, new_version, new_capacity, "array swapped");
    }

    fn array_full(&self, capacity: usize) {
        tracing::debug!(capacity, "array full, escalating resize");
    }
}
