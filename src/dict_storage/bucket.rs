use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering::{Acquire, Relaxed};

use once_cell::sync::OnceCell;

use crate::Value;

/// Marks the end of a collision chain.
pub(crate) const NIL: u32 = u32::MAX;

/// [`Entry`] is a hashed key-value pair.
#[derive(Debug)]
pub(crate) struct Entry<V> {
    pub(crate) hash: i32,
    pub(crate) key: Value,
    pub(crate) value: V,
}

/// [`Bucket`] is a single arena slot of a [`BucketArray`](super::bucket_array::BucketArray).
///
/// The entry is written once when the slot is allocated and never changes afterwards; only the
/// `next` link of a live bucket is updated. Unlinked buckets keep their `next` link so that a
/// reader parked on them still reaches the end of the chain.
pub(crate) struct Bucket<V> {
    entry: OnceCell<Entry<V>>,
    next: AtomicU32,
}

impl<V> Bucket<V> {
    /// Creates an unallocated [`Bucket`].
    #[inline]
    pub(crate) const fn vacant() -> Self {
        Self {
            entry: OnceCell::new(),
            next: AtomicU32::new(NIL),
        }
    }

    /// Returns the entry if the bucket has been allocated.
    #[inline]
    pub(crate) fn entry(&self) -> Option<&Entry<V>> {
        self.entry.get()
    }

    /// Returns the index of the next bucket in the chain.
    #[inline]
    pub(crate) fn next(&self) -> u32 {
        self.next.load(Acquire)
    }

    /// Returns the link to the next bucket.
    #[inline]
    pub(crate) const fn link(&self) -> &AtomicU32 {
        &self.next
    }

    /// Writes the entry into the bucket.
    ///
    /// The bucket becomes reachable only after a link to it is stored with `Release`, so the
    /// relaxed store of `next` is published together with the entry. Returns `false` without
    /// modifying the bucket if it was already occupied.
    #[inline]
    pub(crate) fn occupy(&self, entry: Entry<V>, next: u32) -> bool {
        if self.entry.set(entry).is_err() {
            return false;
        }
        self.next.store(next, Relaxed);
        true
    }
}
