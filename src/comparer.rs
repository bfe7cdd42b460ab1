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

//! Key hashing and equality.

use std::hash::{BuildHasher, Hash, Hasher};

/// Default hasher for [`DefaultComparer`].
///
/// This is currently [aHash], a hashing algorithm designed around acceleration
/// by the [AES-NI] instruction set on x86 processors. aHash is not
/// cryptographically secure, but is fast and resistant to DoS attacks.
///
/// [aHash]: https://docs.rs/ahash
/// [AES-NI]: https://en.wikipedia.org/wiki/AES_instruction_set
pub type DefaultHashBuilder = ahash::RandomState;

/// Hashing, equality and validity of keys.
///
/// A dictionary is parameterized over its comparer so that key types can
/// override the hash code used for slot placement without the dictionary
/// depending on any particular hashing library.
///
/// Implementations must uphold the usual contract:
///
/// ```text
/// equals(k1, k2) -> hash_code(k1) == hash_code(k2)
/// ```
pub trait KeyComparer<K>: Send + Sync {
    /// Returns the 32-bit hash code stored alongside the key.
    fn hash_code(&self, key: &K) -> i32;

    /// Returns true if `a` and `b` identify the same entry.
    fn equals(&self, a: &K, b: &K) -> bool;

    /// Returns false for keys that represent an empty identity and must not
    /// be stored.
    ///
    /// Every key is valid by default.
    fn is_valid_key(&self, _key: &K) -> bool {
        true
    }
}

/// Comparer that uses [`Hash`] and [`Eq`], hashing with a [`BuildHasher`].
///
/// The 64-bit hash produced by `S` is folded into 32 bits by xoring its upper
/// and lower halves.
#[derive(Clone, Debug, Default)]
pub struct DefaultComparer<S = DefaultHashBuilder> {
    build_hasher: S,
}

impl<S> DefaultComparer<S> {
    /// Creates a comparer that hashes keys with `build_hasher`.
    pub fn with_hasher(build_hasher: S) -> Self {
        Self { build_hasher }
    }
}

impl<K: Hash + Eq, S: BuildHasher + Send + Sync> KeyComparer<K> for DefaultComparer<S> {
    fn hash_code(&self, key: &K) -> i32 {
        let mut hasher = self.build_hasher.build_hasher();
        key.hash(&mut hasher);
        let hash = hasher.finish();

        ((hash >> 32) ^ hash) as u32 as i32
    }

    fn equals(&self, a: &K, b: &K) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::hash::BuildHasherDefault;
    use std::collections::hash_map::DefaultHasher;

    #[test]
    fn equal_keys_hash_equally() {
        let comparer = DefaultComparer::<DefaultHashBuilder>::default();

        let a = "foo".to_string();
        let b = "foo".to_string();

        assert!(comparer.equals(&a, &b));
        assert_eq!(comparer.hash_code(&a), comparer.hash_code(&b));
        assert!(!comparer.equals(&a, &"bar".to_string()));
    }

    #[test]
    fn custom_hasher() {
        let comparer = DefaultComparer::with_hasher(BuildHasherDefault::<DefaultHasher>::default());

        assert_eq!(comparer.hash_code(&42u64), comparer.hash_code(&42u64));
        assert!(comparer.is_valid_key(&42u64));
    }
}
