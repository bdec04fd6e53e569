use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::atomic::{AtomicU32, AtomicUsize};

use super::bucket::{Bucket, Entry, NIL};
use crate::{Error, KeyType, Value};

/// The number of chains of a newly initialized array.
pub(crate) const MINIMUM_LEN: usize = 7;

/// The number of chains of the array installed by `clear`.
pub(crate) const CLEARED_LEN: usize = 8;

/// Growth factor applied when the number of entries reaches the number of chains.
pub(crate) const RESIZE_MULTIPLIER: usize = 3;

/// The number of arena slots per chain.
const ARENA_FACTOR: usize = 2;

/// [`BucketArray`] is a fixed-size array of collision chains over a bucket arena.
///
/// Chains are linked by arena index. An arena slot is allocated at most once per array: removing
/// or overwriting an entry unlinks the old slot and, for overwrites, links a fresh one in its
/// place. Readers that captured the array therefore always walk a valid chain while a writer
/// mutates it, and a full arena is resolved by rebuilding into a new array instead of reusing
/// slots.
///
/// Every bucket reachable from `roots[i]` holds a hash `h` with `h % len == i`.
pub(crate) struct BucketArray<V> {
    roots: Box<[AtomicU32]>,
    buckets: Box<[Bucket<V>]>,
    allocated: AtomicUsize,
    key_type: KeyType,
}

/// The outcome of [`BucketArray::insert`].
pub(crate) enum Insertion<V> {
    /// A new entry was linked.
    Added,
    /// The value of an equal key was replaced.
    Replaced,
    /// No arena slot is left; the key and value are handed back.
    NoVacancy(Value, V),
}

impl<V> BucketArray<V> {
    /// Creates a new [`BucketArray`] with `len` chains.
    pub(crate) fn new(len: usize, key_type: KeyType) -> Self {
        let len = len.clamp(1, (NIL as usize) / ARENA_FACTOR);
        Self {
            roots: (0..len).map(|_| AtomicU32::new(NIL)).collect(),
            buckets: (0..len * ARENA_FACTOR).map(|_| Bucket::vacant()).collect(),
            allocated: AtomicUsize::new(0),
            key_type,
        }
    }

    /// Returns the number of chains.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.roots.len()
    }

    /// Returns the [`KeyType`] the chains were built for.
    #[inline]
    pub(crate) const fn key_type(&self) -> &KeyType {
        &self.key_type
    }

    /// Returns `true` if at least one arena slot is unallocated.
    #[cfg(test)]
    #[inline]
    pub(crate) fn has_vacancy(&self) -> bool {
        self.allocated.load(Relaxed) < self.buckets.len()
    }

    /// Calculates the chain index for the hash value.
    #[allow(clippy::cast_sign_loss)] // Hash values are non-negative.
    #[inline]
    pub(crate) fn chain_index(&self, hash: i32) -> usize {
        debug_assert!(hash >= 0);
        hash as usize % self.len()
    }

    /// Returns an iterator over the chain that `hash` maps to.
    #[inline]
    pub(crate) fn chain(&self, hash: i32) -> Chain<'_, V> {
        let index = self.chain_index(hash);
        Chain {
            array: self,
            current: self.roots[index].load(Acquire),
        }
    }

    /// Returns an iterator over every live entry, chain by chain.
    #[inline]
    pub(crate) fn entries(&self) -> Entries<'_, V> {
        Entries {
            array: self,
            root: 0,
            chain: None,
        }
    }

    /// Searches for an entry equal to `key`.
    ///
    /// This method does not require the writer lock.
    pub(crate) fn search<F>(
        &self,
        key: &Value,
        hash: i32,
        eq: F,
    ) -> Result<Option<&Entry<V>>, Error>
    where
        F: Fn(&Value, &Value) -> Result<bool, Error>,
    {
        for (_, entry) in self.chain(hash) {
            if entry.hash == hash && eq(key, &entry.key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Inserts or overwrites an entry.
    ///
    /// An overwrite keeps the key that is already stored. The caller must hold the writer lock.
    pub(crate) fn insert<F>(
        &self,
        hash: i32,
        key: Value,
        value: V,
        eq: F,
    ) -> Result<Insertion<V>, Error>
    where
        F: Fn(&Value, &Value) -> Result<bool, Error>,
    {
        let index = self.chain_index(hash);
        let mut prev = NIL;
        for (current, entry) in self.chain(hash) {
            if entry.hash == hash && eq(&key, &entry.key)? {
                let replacement = Entry {
                    hash,
                    key: entry.key.clone(),
                    value,
                };
                let next = self.buckets[current as usize].next();
                return match self.allocate(replacement, next) {
                    Ok(new) => {
                        self.link_after(index, prev).store(new, Release);
                        Ok(Insertion::Replaced)
                    }
                    Err(rejected) => Ok(Insertion::NoVacancy(key, rejected.value)),
                };
            }
            prev = current;
        }

        match self.allocate(Entry { hash, key, value }, NIL) {
            Ok(new) => {
                self.link_after(index, prev).store(new, Release);
                Ok(Insertion::Added)
            }
            Err(entry) => Ok(Insertion::NoVacancy(entry.key, entry.value)),
        }
    }

    /// Unlinks the entry equal to `key`.
    ///
    /// The caller must hold the writer lock.
    pub(crate) fn remove<F>(
        &self,
        key: &Value,
        hash: i32,
        eq: F,
    ) -> Result<Option<&Entry<V>>, Error>
    where
        F: Fn(&Value, &Value) -> Result<bool, Error>,
    {
        let index = self.chain_index(hash);
        let mut prev = NIL;
        for (current, entry) in self.chain(hash) {
            if entry.hash == hash && eq(key, &entry.key)? {
                self.unlink(index, prev, current);
                return Ok(Some(entry));
            }
            prev = current;
        }
        Ok(None)
    }

    /// Unlinks the first entry in iteration order.
    ///
    /// The caller must hold the writer lock.
    pub(crate) fn remove_first(&self) -> Option<&Entry<V>> {
        let (slot, entry) = self.entries().next()?;
        let index = self.chain_index(entry.hash);
        let mut prev = NIL;
        for (current, _) in self.chain(entry.hash) {
            if current == slot {
                self.unlink(index, prev, current);
                return Some(entry);
            }
            prev = current;
        }
        None
    }

    /// Appends an entry known to be absent from the array.
    ///
    /// The caller must either hold the writer lock or own an unpublished array.
    pub(crate) fn append(&self, entry: Entry<V>) -> Result<(), Entry<V>> {
        let index = self.chain_index(entry.hash);
        let tail = self.chain(entry.hash).last().map_or(NIL, |(slot, _)| slot);
        let new = self.allocate(entry, NIL)?;
        self.link_after(index, tail).store(new, Release);
        Ok(())
    }

    /// Allocates an arena slot for the entry.
    fn allocate(&self, entry: Entry<V>, next: u32) -> Result<u32, Entry<V>> {
        let slot = self.allocated.load(Relaxed);
        if slot >= self.buckets.len() {
            return Err(entry);
        }
        self.allocated.store(slot + 1, Relaxed);
        if !self.buckets[slot].occupy(entry, next) {
            // Slots below `allocated` are never handed out twice.
            debug_assert!(false, "arena slot {slot} allocated twice");
        }
        #[allow(clippy::cast_possible_truncation)] // Bounded by `new`.
        Ok(slot as u32)
    }

    /// Returns the link pointing at the bucket after `prev` in chain `index`.
    #[inline]
    fn link_after(&self, index: usize, prev: u32) -> &AtomicU32 {
        if prev == NIL {
            &self.roots[index]
        } else {
            self.buckets[prev as usize].link()
        }
    }

    /// Makes `prev` skip `current`; `current` keeps its own link.
    #[inline]
    fn unlink(&self, index: usize, prev: u32, current: u32) {
        let next = self.buckets[current as usize].next();
        self.link_after(index, prev).store(next, Release);
    }
}

impl<V: Clone> BucketArray<V> {
    /// Copies every live entry into a new, unpublished array with `len` chains.
    ///
    /// `self` is not modified; readers of `self` are unaffected.
    pub(crate) fn rebuild(&self, len: usize, key_type: KeyType) -> Self {
        let rebuilt = Self::new(len, key_type);
        for (_, entry) in self.entries() {
            let copied = Entry {
                hash: entry.hash,
                key: entry.key.clone(),
                value: entry.value.clone(),
            };
            if rebuilt.append(copied).is_err() {
                debug_assert!(false, "rebuilt array too small");
            }
        }
        rebuilt
    }
}

/// Iterates over a single collision chain.
pub(crate) struct Chain<'a, V> {
    array: &'a BucketArray<V>,
    current: u32,
}

impl<'a, V> Iterator for Chain<'a, V> {
    type Item = (u32, &'a Entry<V>);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.current == NIL {
            return None;
        }
        let slot = self.current;
        let bucket = &self.array.buckets[slot as usize];
        self.current = bucket.next();
        bucket.entry().map(|entry| (slot, entry))
    }
}

/// Iterates over every chain of a [`BucketArray`].
pub(crate) struct Entries<'a, V> {
    array: &'a BucketArray<V>,
    root: usize,
    chain: Option<Chain<'a, V>>,
}

impl<'a, V> Iterator for Entries<'a, V> {
    type Item = (u32, &'a Entry<V>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.chain.as_mut().and_then(Iterator::next) {
                return Some(item);
            }
            if self.root == self.array.len() {
                return None;
            }
            self.chain = Some(Chain {
                array: self.array,
                current: self.array.roots[self.root].load(Acquire),
            });
            self.root += 1;
        }
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::{BucketArray, Insertion, MINIMUM_LEN};
    use crate::hash_strategy::generic_equals;
    use crate::{KeyType, Value};

    fn eq(a: &Value, b: &Value) -> Result<bool, crate::Error> {
        generic_equals(a, b)
    }

    proptest! {
        #[test]
        fn chains_follow_hash(xs in proptest::collection::vec(0_i32..1024, 0..MINIMUM_LEN * 2)) {
            let array: BucketArray<i32> = BucketArray::new(MINIMUM_LEN, KeyType::Uninitialized);
            for x in &xs {
                let _ = array.insert(*x, Value::from(*x), *x, eq).unwrap();
            }
            for root in 0..array.len() {
                let hash = i32::try_from(root).unwrap();
                for (_, entry) in array.chain(hash) {
                    prop_assert_eq!(array.chain_index(entry.hash), root);
                }
            }
        }
    }

    #[test]
    fn overwrite_keeps_key() {
        let array: BucketArray<u8> = BucketArray::new(MINIMUM_LEN, KeyType::Heterogeneous);
        assert!(matches!(
            array.insert(1, Value::Int(1), 1, eq).unwrap(),
            Insertion::Added
        ));
        assert!(matches!(
            array.insert(1, Value::Float(1.0), 2, eq).unwrap(),
            Insertion::Replaced
        ));
        let entry = array.search(&Value::Int(1), 1, eq).unwrap().unwrap();
        assert_eq!(entry.key, Value::Int(1));
        assert_eq!(entry.value, 2);
        assert_eq!(array.entries().count(), 1);
    }

    #[test]
    fn parked_reader() {
        let array: BucketArray<u8> = BucketArray::new(1, KeyType::Heterogeneous);
        for i in 0..2 {
            let _ = array.insert(0, Value::Int(i), 0, eq).unwrap();
        }
        let mut chain = array.chain(0);
        let (_, first) = chain.next().unwrap();
        assert_eq!(first.key, Value::Int(0));

        assert!(array.remove(&Value::Int(0), 0, eq).unwrap().is_some());
        assert!(array.search(&Value::Int(0), 0, eq).unwrap().is_none());

        // The parked reader still reaches the rest of the chain.
        let (_, second) = chain.next().unwrap();
        assert_eq!(second.key, Value::Int(1));
        assert!(chain.next().is_none());
    }

    #[test]
    fn arena_exhaustion() {
        let array: BucketArray<u8> = BucketArray::new(1, KeyType::Heterogeneous);
        assert!(matches!(array.insert(0, Value::Int(0), 0, eq).unwrap(), Insertion::Added));
        assert!(matches!(array.insert(0, Value::Int(0), 1, eq).unwrap(), Insertion::Replaced));
        assert!(!array.has_vacancy());
        assert!(matches!(
            array.insert(0, Value::Int(0), 2, eq).unwrap(),
            Insertion::NoVacancy(_, 2)
        ));

        let rebuilt = array.rebuild(1, KeyType::Heterogeneous);
        assert!(rebuilt.has_vacancy());
        assert_eq!(rebuilt.search(&Value::Int(0), 0, eq).unwrap().map(|e| e.value), Some(1));
    }

    #[test]
    fn remove_first() {
        let array: BucketArray<u8> = BucketArray::new(3, KeyType::Heterogeneous);
        for i in 0..3 {
            let _ = array.insert(i, Value::from(i), 0, eq).unwrap();
        }
        let first = array.remove_first().unwrap();
        assert_eq!(first.key, Value::from(0));
        assert_eq!(array.entries().count(), 2);
    }
}
