//! [`Dictionary`] is the mapping object built on [`DictStorage`].

mod iter;

pub use iter::{ItemIter, KeyIter, ValueIter};

use std::fmt::{self, Debug, Display};
use std::ptr;

use sdd::Guard;

use crate::hash_strategy::generic_equals;
use crate::{DictStorage, Error, Value};

/// [`Dictionary`] maps hashable [`Value`] keys to [`Value`] values.
///
/// Every operation takes `&self`; a [`Dictionary`] can be shared between threads and read while
/// another thread modifies it.
///
/// # Examples
///
/// ```
/// use rtcore::{Dictionary, Value};
///
/// let dict = Dictionary::new();
/// assert!(dict.set_item(Value::from("a"), Value::from(1)).is_ok());
/// assert_eq!(dict.get_item(&Value::from("a")).unwrap(), Value::from(1));
/// assert!(dict.get_item(&Value::from("b")).is_err());
/// assert_eq!(dict.to_string(), "{'a': 1}");
/// ```
#[derive(Default)]
pub struct Dictionary {
    storage: DictStorage,
}

impl Dictionary {
    /// Creates an empty [`Dictionary`].
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty [`Dictionary`] that can hold `count` entries without resizing.
    #[inline]
    #[must_use]
    pub fn with_capacity(count: usize) -> Self {
        Self::from_storage(DictStorage::with_capacity(count))
    }

    /// Wraps an existing storage.
    #[inline]
    #[must_use]
    pub fn from_storage(storage: DictStorage) -> Self {
        Self { storage }
    }

    /// Creates a [`Dictionary`] mapping every key in `keys` to `value`.
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot be hashed or compared.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::{Dictionary, Value};
    ///
    /// let dict = Dictionary::from_keys((0..3).map(Value::from), Value::None).unwrap();
    /// assert_eq!(dict.len(), 3);
    /// assert_eq!(dict.get(&Value::from(2)).unwrap(), Some(Value::None));
    /// ```
    pub fn from_keys<I: IntoIterator<Item = Value>>(keys: I, value: Value) -> Result<Self, Error> {
        let keys = keys.into_iter();
        let dict = Self::with_capacity(keys.size_hint().0);
        dict.storage
            .extend_from(keys.map(|key| (key, value.clone())))?;
        Ok(dict)
    }

    /// Returns the underlying storage.
    #[inline]
    pub fn storage(&self) -> &DictStorage {
        &self.storage
    }

    /// Returns the number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    /// Returns `true` if the dictionary is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Returns the value associated with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyError`] if `key` is absent, or an error if it cannot be hashed or
    /// compared.
    #[inline]
    pub fn get_item(&self, key: &Value) -> Result<Value, Error> {
        self.storage
            .try_get(key)?
            .ok_or_else(|| Error::KeyError(key.clone()))
    }

    /// Associates `value` with `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` cannot be hashed or compared.
    #[inline]
    pub fn set_item(&self, key: Value, value: Value) -> Result<(), Error> {
        self.storage.add(key, value)
    }

    /// Removes the entry associated with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyError`] if `key` is absent, or an error if it cannot be hashed or
    /// compared, even if the dictionary is empty.
    #[inline]
    pub fn del_item(&self, key: &Value) -> Result<(), Error> {
        if self.storage.remove_always_hash(key)? {
            Ok(())
        } else {
            Err(Error::KeyError(key.clone()))
        }
    }

    /// Returns the value associated with `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` cannot be hashed or compared.
    #[inline]
    pub fn get(&self, key: &Value) -> Result<Option<Value>, Error> {
        self.storage.try_get(key)
    }

    /// Returns the value associated with `key`, or `default`.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` cannot be hashed or compared.
    #[inline]
    pub fn get_or(&self, key: &Value, default: Value) -> Result<Value, Error> {
        Ok(self.storage.try_get(key)?.unwrap_or(default))
    }

    /// Returns `true` if `key` is present.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` cannot be hashed or compared.
    #[inline]
    pub fn contains_key(&self, key: &Value) -> Result<bool, Error> {
        self.storage.contains(key)
    }

    /// Removes `key` and returns its value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyError`] if `key` is absent, or an error if it cannot be hashed or
    /// compared.
    #[inline]
    pub fn pop(&self, key: &Value) -> Result<Value, Error> {
        self.storage
            .try_remove_value(key)?
            .ok_or_else(|| Error::KeyError(key.clone()))
    }

    /// Removes `key` and returns its value, or returns `default` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` cannot be hashed or compared.
    #[inline]
    pub fn pop_or(&self, key: &Value, default: Value) -> Result<Value, Error> {
        Ok(self.storage.try_remove_value(key)?.unwrap_or(default))
    }

    /// Removes and returns an arbitrary entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyError`] if the dictionary is empty.
    #[inline]
    pub fn popitem(&self) -> Result<(Value, Value), Error> {
        self.storage
            .pop_item()
            .ok_or_else(|| Error::KeyError(Value::from("popitem(): dictionary is empty")))
    }

    /// Returns the value associated with `key`, inserting `default` if it is absent.
    ///
    /// # Errors
    ///
    /// Returns an error if `key` cannot be hashed or compared.
    #[inline]
    pub fn setdefault(&self, key: Value, default: Value) -> Result<Value, Error> {
        self.storage.get_or_add(key, default)
    }

    /// Copies every entry of `other` into `self`.
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot be hashed or compared.
    #[inline]
    pub fn update(&self, other: &Dictionary) -> Result<(), Error> {
        other.storage.copy_to(&self.storage)
    }

    /// Inserts every pair.
    ///
    /// # Errors
    ///
    /// Returns the first error raised by a key; preceding pairs stay inserted.
    #[inline]
    pub fn update_pairs<I>(&self, pairs: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (Value, Value)>,
    {
        self.storage.extend_from(pairs)
    }

    /// Returns a shallow copy: the entries are copied, the keys and values are shared.
    #[inline]
    #[must_use]
    pub fn copy(&self) -> Self {
        Self::from_storage(self.storage.clone_storage())
    }

    /// Removes every entry.
    #[inline]
    pub fn clear(&self) {
        self.storage.clear();
    }

    /// Returns a snapshot of the keys.
    #[inline]
    pub fn keys(&self) -> Vec<Value> {
        self.storage.get_keys()
    }

    /// Returns a snapshot of the values.
    #[inline]
    pub fn values(&self) -> Vec<Value> {
        self.storage.get_items().into_iter().map(|(_, v)| v).collect()
    }

    /// Returns a snapshot of the entries.
    #[inline]
    pub fn items(&self) -> Vec<(Value, Value)> {
        self.storage.get_items()
    }

    /// Returns an iterator over the keys that fails if the dictionary changes size.
    #[inline]
    pub fn iter_keys(&self) -> KeyIter<'_> {
        KeyIter::new(&self.storage)
    }

    /// Returns an iterator over the values that fails if the dictionary changes size.
    #[inline]
    pub fn iter_values(&self) -> ValueIter<'_> {
        ValueIter::new(&self.storage)
    }

    /// Returns an iterator over the entries that fails if the dictionary changes size.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::{Dictionary, Error, Value};
    ///
    /// let dict = Dictionary::new();
    /// assert!(dict.set_item(Value::from(1), Value::from(2)).is_ok());
    /// let mut items = dict.iter_items();
    /// assert!(dict.set_item(Value::from(3), Value::from(4)).is_ok());
    /// assert!(matches!(items.next(), Some(Err(Error::ChangedSize))));
    /// assert!(items.next().is_none());
    /// ```
    #[inline]
    pub fn iter_items(&self) -> ItemIter<'_> {
        ItemIter::new(&self.storage)
    }

    /// Returns `true` if both dictionaries hold the same keys mapped to equal values.
    ///
    /// # Errors
    ///
    /// Returns an error raised while comparing keys or values.
    pub fn equals(&self, other: &Dictionary) -> Result<bool, Error> {
        if ptr::eq(self, other) {
            return Ok(true);
        }
        if self.len() != other.len() {
            return Ok(false);
        }
        for (key, value) in self.items() {
            match other.get(&key)? {
                Some(other_value) if generic_equals(&value, &other_value)? => (),
                _ => return Ok(false),
            }
        }
        Ok(true)
    }
}

impl Clone for Dictionary {
    #[inline]
    fn clone(&self) -> Self {
        self.copy()
    }
}

impl Debug for Dictionary {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Debug::fmt(&self.storage, f)
    }
}

impl Display for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = Guard::new();
        f.write_str("{")?;
        for (i, (key, value)) in self.storage.iter(&guard).enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: {value}")?;
        }
        f.write_str("}")
    }
}

impl PartialEq for Dictionary {
    /// Compares with [`Dictionary::equals`]; errors compare unequal.
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.equals(other).unwrap_or(false)
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::Dictionary;
    use crate::{Error, KeyType, Value};

    #[test]
    fn mapping() {
        let dict = Dictionary::new();
        let missing = dict.get_item(&Value::from(1));
        assert!(matches!(missing, Err(Error::KeyError(k)) if k == Value::from(1)));
        assert!(dict.set_item(Value::from(1), Value::from("one")).is_ok());
        assert_eq!(dict.get_or(&Value::from(2), Value::None).unwrap(), Value::None);
        assert!(dict.contains_key(&Value::from(1.0)).unwrap());
        assert!(dict.del_item(&Value::from(1)).is_ok());
        assert!(matches!(dict.del_item(&Value::from(1)), Err(Error::KeyError(_))));
        assert!(dict.is_empty());
    }

    #[test]
    fn pop() {
        let dict =
            Dictionary::from_keys([Value::from("a"), Value::from("b")], Value::from(0)).unwrap();
        assert_eq!(dict.pop(&Value::from("a")).unwrap(), Value::from(0));
        assert!(dict.pop(&Value::from("a")).is_err());
        assert_eq!(dict.pop_or(&Value::from("a"), Value::from(9)).unwrap(), Value::from(9));
        assert_eq!(dict.popitem().unwrap(), (Value::from("b"), Value::from(0)));
        let Err(Error::KeyError(message)) = dict.popitem() else {
            unreachable!();
        };
        assert_eq!(message, Value::from("popitem(): dictionary is empty"));
    }

    #[test]
    fn setdefault() {
        let dict = Dictionary::new();
        assert_eq!(dict.setdefault(Value::from("k"), Value::from(1)).unwrap(), Value::from(1));
        assert_eq!(dict.setdefault(Value::from("k"), Value::from(2)).unwrap(), Value::from(1));
        assert_eq!(dict.len(), 1);
    }

    #[test]
    fn update_and_copy() {
        let a = Dictionary::new();
        let b = Dictionary::new();
        let pairs = [(Value::from(1), Value::from(1)), (Value::from(2), Value::from(2))];
        assert!(a.update_pairs(pairs).is_ok());
        assert!(b.set_item(Value::from("x"), Value::None).is_ok());
        assert!(b.update(&a).is_ok());
        assert_eq!(b.len(), 3);
        assert_eq!(b.storage().key_type(), KeyType::Heterogeneous);

        let c = b.copy();
        assert!(c.equals(&b).unwrap());
        assert!(c.set_item(Value::from(1), Value::from(10)).is_ok());
        assert!(!c.equals(&b).unwrap());
        assert_eq!(b.get_item(&Value::from(1)).unwrap(), Value::from(1));
        assert_ne!(c, b);
    }

    #[test]
    fn numeric_equality() {
        let a = Dictionary::new();
        let b = Dictionary::new();
        assert!(a.set_item(Value::from(1), Value::from(1)).is_ok());
        assert!(b.set_item(Value::from(1.0), Value::from(true)).is_ok());
        assert!(a.equals(&b).unwrap());
    }

    #[test]
    fn snapshots() {
        let dict = Dictionary::from_keys((0..10).map(Value::from), Value::None).unwrap();
        let mut keys: Vec<i64> = dict.keys().iter().filter_map(Value::as_int).collect();
        keys.sort_unstable();
        assert_eq!(keys, (0..10).collect::<Vec<_>>());
        assert_eq!(dict.values().len(), 10);
        assert_eq!(dict.items().len(), 10);
        dict.clear();
        assert!(dict.keys().is_empty());
        assert_eq!(dict.to_string(), "{}");
    }

    proptest! {
        #[test]
        fn against_std(ops in proptest::collection::vec((0_i64..32, any::<bool>()), 0..256)) {
            let dict = Dictionary::new();
            let mut model = std::collections::HashMap::new();
            for (k, insert) in ops {
                if insert {
                    prop_assert!(dict.set_item(Value::from(k), Value::from(k * 2)).is_ok());
                    model.insert(k, k * 2);
                } else {
                    prop_assert_eq!(dict.pop(&Value::from(k)).is_ok(), model.remove(&k).is_some());
                }
                prop_assert_eq!(dict.len(), model.len());
            }
            for (k, v) in model {
                prop_assert_eq!(dict.get_item(&Value::from(k)).unwrap(), Value::from(v));
            }
        }
    }
}
