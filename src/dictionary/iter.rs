use std::vec;

use crate::{DictStorage, Error, Value};

/// A snapshot that stops with [`Error::ChangedSize`] once the dictionary changes size.
struct Snapshot<'d, T> {
    storage: &'d DictStorage,
    size: usize,
    items: vec::IntoIter<T>,
    done: bool,
}

impl<'d, T> Snapshot<'d, T> {
    fn new(storage: &'d DictStorage, items: Vec<T>) -> Self {
        Self {
            storage,
            size: items.len(),
            items: items.into_iter(),
            done: false,
        }
    }

    fn next_checked(&mut self) -> Option<Result<T, Error>> {
        if self.done {
            return None;
        }
        if self.storage.len() != self.size {
            self.done = true;
            return Some(Err(Error::ChangedSize));
        }
        let item = self.items.next();
        self.done = item.is_none();
        item.map(Ok)
    }

    fn length_hint(&self) -> usize {
        if self.done {
            0
        } else {
            self.items.len()
        }
    }
}

/// An iterator over the keys of a [`Dictionary`](super::Dictionary).
pub struct KeyIter<'d>(Snapshot<'d, Value>);

/// An iterator over the values of a [`Dictionary`](super::Dictionary).
pub struct ValueIter<'d>(Snapshot<'d, Value>);

/// An iterator over the entries of a [`Dictionary`](super::Dictionary).
pub struct ItemIter<'d>(Snapshot<'d, (Value, Value)>);

impl<'d> KeyIter<'d> {
    pub(super) fn new(storage: &'d DictStorage) -> Self {
        Self(Snapshot::new(storage, storage.get_keys()))
    }

    /// Returns the number of keys left.
    #[inline]
    pub fn length_hint(&self) -> usize {
        self.0.length_hint()
    }
}

impl<'d> ValueIter<'d> {
    pub(super) fn new(storage: &'d DictStorage) -> Self {
        let values = storage.get_items().into_iter().map(|(_, v)| v).collect();
        Self(Snapshot::new(storage, values))
    }

    /// Returns the number of values left.
    #[inline]
    pub fn length_hint(&self) -> usize {
        self.0.length_hint()
    }
}

impl<'d> ItemIter<'d> {
    pub(super) fn new(storage: &'d DictStorage) -> Self {
        Self(Snapshot::new(storage, storage.get_items()))
    }

    /// Returns the number of entries left.
    #[inline]
    pub fn length_hint(&self) -> usize {
        self.0.length_hint()
    }
}

impl Iterator for KeyIter<'_> {
    type Item = Result<Value, Error>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next_checked()
    }
}

impl Iterator for ValueIter<'_> {
    type Item = Result<Value, Error>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next_checked()
    }
}

impl Iterator for ItemIter<'_> {
    type Item = Result<(Value, Value), Error>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.0.next_checked()
    }
}
