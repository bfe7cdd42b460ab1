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

//! Lockfree concurrent dictionary with cooperative incremental resizing.
//!
//! [`ConcurrentDictionary`] stores entries in a fixed-capacity open-addressed
//! array. When the array grows past its [`GrowthStrategy`]'s thresholds, the
//! entries are copied into a larger array by every thread that touches the
//! dictionary plus one background task, and the new array is swapped in once
//! the copy completes. No operation ever takes a lock.
//!
//! ```
//! use lockfree_dictionary::ConcurrentDictionary;
//!
//! let dictionary = ConcurrentDictionary::new();
//!
//! assert_eq!(dictionary.try_add("foo", 1), Ok(true));
//! assert_eq!(dictionary.try_add("foo", 2), Ok(false));
//! assert_eq!(dictionary.try_get(&"foo"), Ok(Some(1)));
//! assert_eq!(dictionary.try_remove(&"foo"), Ok(Some(1)));
//! assert!(dictionary.is_empty());
//! ```

pub mod comparer;
pub mod error;
pub mod growth;
pub mod observer;
pub mod spawner;

mod dictionary;

pub use comparer::{DefaultComparer, DefaultHashBuilder, KeyComparer};
pub use dictionary::{
    Builder, ConcurrentDictionary, Iter, Keys, Values, DEFAULT_HELP_BATCH_SIZE,
};
pub use error::{Error, Result};
pub use growth::{DoublingPrimeStrategy, GrowthStrategy};
pub use observer::{NoopObserver, ResizeObserver, TracingObserver};
pub use spawner::{BackgroundSpawner, InlineSpawner, ThreadSpawner};
