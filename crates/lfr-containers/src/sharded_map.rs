//! Hash map split into independently locked buckets.
//!
//! Each bucket is an unsorted `Vec` of entries behind its own `RwLock`, so
//! readers of one bucket never block writers of another. The bucket count
//! is fixed at construction; the map never rehashes.

use std::borrow::Borrow;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Bucket count used by [`ShardedMap::new`]. Prime, to spread keys whose
/// hashes share low bits.
pub const BUCKETS_DEFAULT: usize = 19;

type Bucket<K, V> = Vec<(K, V)>;

pub struct ShardedMap<K, V, S = RandomState> {
    buckets: Vec<RwLock<Bucket<K, V>>>,
    hasher: S,
}

impl<K: Hash + Eq, V> ShardedMap<K, V> {
    #[must_use]
    pub fn new() -> Self {
        Self::with_buckets(BUCKETS_DEFAULT)
    }

    /// # Panics
    ///
    /// Debug builds assert `buckets > 0`; release builds use one bucket.
    #[must_use]
    pub fn with_buckets(buckets: usize) -> Self {
        Self::with_buckets_and_hasher(buckets, RandomState::new())
    }
}

impl<K: Hash + Eq, V, S: BuildHasher> ShardedMap<K, V, S> {
    #[must_use]
    pub fn with_buckets_and_hasher(buckets: usize, hasher: S) -> Self {
        debug_assert!(buckets > 0, "bucket count must be positive");
        Self {
            buckets: (0..buckets.max(1)).map(|_| RwLock::new(Vec::new())).collect(),
            hasher,
        }
    }

    fn bucket_index<Q: Hash + ?Sized>(&self, key: &Q) -> usize {
        (self.hasher.hash_one(key) % self.buckets.len() as u64) as usize
    }

    fn read<Q: Hash + ?Sized>(&self, key: &Q) -> RwLockReadGuard<'_, Bucket<K, V>> {
        self.buckets[self.bucket_index(key)]
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write<Q: Hash + ?Sized>(&self, key: &Q) -> RwLockWriteGuard<'_, Bucket<K, V>> {
        self.buckets[self.bucket_index(key)]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or update. Returns the previous value.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let mut bucket = self.write(&key);
        match bucket.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                bucket.push((key, value));
                None
            }
        }
    }

    /// Remove a key. Returns the removed value.
    pub fn remove<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut bucket = self.write(key);
        let pos = bucket.iter().position(|(k, _)| k.borrow() == key)?;
        Some(bucket.swap_remove(pos).1)
    }

    /// Copy of the value for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
        V: Clone,
    {
        self.read(key)
            .iter()
            .find(|(k, _)| k.borrow() == key)
            .map(|(_, v)| v.clone())
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.read(key).iter().any(|(k, _)| k.borrow() == key)
    }

    /// Entry count. Buckets are read one at a time, so concurrent writers
    /// can make this a mix of before and after.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn buckets_count(&self) -> usize {
        self.buckets.len()
    }
}

impl<K: Hash + Eq, V> Default for ShardedMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
