//! [`DictStorage`] is an adaptive hash table with lock-free reads.

mod bucket;
mod bucket_array;

use std::fmt::{self, Debug};
use std::ptr;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering::{Acquire, Relaxed, Release};
use std::sync::Arc;

use bucket_array::{BucketArray, Entries, Insertion, CLEARED_LEN, MINIMUM_LEN, RESIZE_MULTIPLIER};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard};
use sdd::{AtomicShared, Guard, Shared, Tag};

use crate::{DefaultComparer, Error, KeyComparer, KeyStrategy, KeyType, Value};

static DEFAULT_COMPARER: Lazy<Arc<dyn KeyComparer>> = Lazy::new(|| Arc::new(DefaultComparer));

/// Scalable concurrent dictionary storage.
///
/// [`DictStorage`] maps [`Value`] keys to values of type `V`. Mutations are serialized by a
/// single lock per table; readers never lock and instead load the current bucket array once,
/// operating against that snapshot even if a writer publishes a new array in the meantime.
///
/// ## Key type specialization
///
/// The table starts without a key type. The first stored key selects a specialized hash and
/// equality pair; storing a key of a different type switches the table to the generic pair of
/// its [`KeyComparer`] for good. Every transition publishes a new bucket array, so readers of
/// the previous array keep using the strategy it was built with.
///
/// ## Growth
///
/// The bucket array is replaced by one three times larger as soon as the number of entries
/// reaches the number of chains. The new array is fully built before it is published.
pub struct DictStorage<V = Value> {
    array: AtomicShared<BucketArray<V>>,
    len: AtomicUsize,
    comparer: Arc<dyn KeyComparer>,
    lock: Mutex<()>,
}

/// [`DictionaryStorage`] is the interface of storages that back mapping objects.
///
/// Module namespaces and attribute stores may provide their own implementation; bulk copies
/// between two [`DictStorage`] instances take a faster path through [`as_common`].
///
/// Every mutating method must hold [`storage_lock`] while it modifies the storage, so that a
/// caller holding the lock can apply a series of [`add_no_lock`] calls atomically.
///
/// [`as_common`]: DictionaryStorage::as_common
/// [`storage_lock`]: DictionaryStorage::storage_lock
/// [`add_no_lock`]: DictionaryStorage::add_no_lock
pub trait DictionaryStorage: Send + Sync {
    /// Returns the lock that serializes mutations of the storage.
    fn storage_lock(&self) -> &Mutex<()>;

    /// Inserts or overwrites an entry while the caller holds [`storage_lock`].
    ///
    /// [`storage_lock`]: DictionaryStorage::storage_lock
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    fn add_no_lock(&self, key: Value, value: Value) -> Result<(), Error>;

    /// Inserts or overwrites an entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    fn add(&self, key: Value, value: Value) -> Result<(), Error> {
        let _lock = self.storage_lock().lock();
        self.add_no_lock(key, value)
    }

    /// Returns a clone of the value associated with `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    fn try_get(&self, key: &Value) -> Result<Option<Value>, Error>;

    /// Removes the entry associated with `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    fn remove(&self, key: &Value) -> Result<bool, Error>;

    /// Returns `true` if an entry is associated with `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    fn contains(&self, key: &Value) -> Result<bool, Error> {
        Ok(self.try_get(key)?.is_some())
    }

    /// Returns the number of entries.
    fn len(&self) -> usize;

    /// Returns `true` if the storage is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry.
    fn clear(&self);

    /// Returns a snapshot of every entry.
    fn get_items(&self) -> Vec<(Value, Value)>;

    /// Returns `self` if the storage is a [`DictStorage`].
    fn as_common(&self) -> Option<&DictStorage> {
        None
    }
}

/// An iterator over the entries of a single bucket array snapshot.
pub struct Iter<'g, V> {
    entries: Option<Entries<'g, V>>,
}

impl<V> DictStorage<V> {
    /// Creates an empty [`DictStorage`] without allocating a bucket array.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::DictStorage;
    ///
    /// let storage: DictStorage = DictStorage::new();
    /// assert_eq!(storage.capacity(), 0);
    /// ```
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::with_comparer(DEFAULT_COMPARER.clone())
    }

    /// Creates an empty [`DictStorage`] that hashes and compares keys of mixed types with the
    /// supplied [`KeyComparer`].
    #[inline]
    #[must_use]
    pub fn with_comparer(comparer: Arc<dyn KeyComparer>) -> Self {
        Self {
            array: AtomicShared::null(),
            len: AtomicUsize::new(0),
            comparer,
            lock: Mutex::new(()),
        }
    }

    /// Returns the number of entries.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::DictStorage;
    ///
    /// let storage: DictStorage<u32> = DictStorage::new();
    /// assert!(storage.add(1.into(), 0).is_ok());
    /// assert_eq!(storage.len(), 1);
    /// ```
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Acquire)
    }

    /// Returns `true` if the storage is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of chains of the current bucket array.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.array
            .load(Acquire, &Guard::new())
            .as_ref()
            .map_or(0, BucketArray::len)
    }

    /// Returns the key types observed so far.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::{DictStorage, KeyType, TypeTag};
    ///
    /// let storage: DictStorage<u32> = DictStorage::new();
    /// assert_eq!(storage.key_type(), KeyType::Uninitialized);
    /// assert!(storage.add("a".into(), 0).is_ok());
    /// assert_eq!(storage.key_type(), KeyType::Concrete(TypeTag::Str));
    /// assert!(storage.add(1.into(), 0).is_ok());
    /// assert_eq!(storage.key_type(), KeyType::Heterogeneous);
    /// ```
    #[inline]
    pub fn key_type(&self) -> KeyType {
        self.array
            .load(Acquire, &Guard::new())
            .as_ref()
            .map_or(KeyType::Uninitialized, |a| a.key_type().clone())
    }

    /// Returns an iterator over the entries of the current bucket array.
    ///
    /// The iterator does not lock the storage. Entries added or removed after the iterator was
    /// created may or may not be observed; an entry is never observed twice.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::{DictStorage, Value};
    /// use sdd::Guard;
    ///
    /// let storage: DictStorage<u32> = DictStorage::new();
    /// assert!(storage.add(Value::from(1), 10).is_ok());
    ///
    /// let guard = Guard::new();
    /// let sum: u32 = storage.iter(&guard).map(|(_, v)| *v).sum();
    /// assert_eq!(sum, 10);
    /// ```
    #[inline]
    pub fn iter<'g>(&self, guard: &'g Guard) -> Iter<'g, V> {
        Iter {
            entries: self.array.load(Acquire, guard).as_ref().map(BucketArray::entries),
        }
    }

    /// Returns a reference to the value associated with `key`.
    ///
    /// The reference stays valid as long as `guard` is alive even if the entry is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    pub fn peek<'g>(&self, key: &Value, guard: &'g Guard) -> Result<Option<&'g V>, Error> {
        let Some(array) = self.array.load(Acquire, guard).as_ref() else {
            return Ok(None);
        };
        if !array.key_type().is_initialized() {
            return Ok(None);
        }
        let strategy = array.key_type().strategy_for(key);
        let hash = self.hash(strategy, key)?;
        Ok(array
            .search(key, hash, |a, b| strategy.equals(a, b, &*self.comparer))?
            .map(|entry| &entry.value))
    }

    /// Reads the entry associated with `key` through `reader`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::{DictStorage, Value};
    ///
    /// let storage: DictStorage<u32> = DictStorage::new();
    /// assert!(storage.add(Value::from("a"), 3).is_ok());
    /// assert_eq!(storage.read(&Value::from("a"), |_, v| *v * 2).unwrap(), Some(6));
    /// ```
    pub fn read<R, F: FnOnce(&Value, &V) -> R>(
        &self,
        key: &Value,
        reader: F,
    ) -> Result<Option<R>, Error> {
        let guard = Guard::new();
        let Some(array) = self.array.load(Acquire, &guard).as_ref() else {
            return Ok(None);
        };
        if !array.key_type().is_initialized() {
            return Ok(None);
        }
        let strategy = array.key_type().strategy_for(key);
        let hash = self.hash(strategy, key)?;
        Ok(array
            .search(key, hash, |a, b| strategy.equals(a, b, &*self.comparer))?
            .map(|entry| reader(&entry.key, &entry.value)))
    }

    /// Returns `true` if an entry is associated with `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    #[inline]
    pub fn contains(&self, key: &Value) -> Result<bool, Error> {
        Ok(self.peek(key, &Guard::new())?.is_some())
    }

    /// Hashes `key` with `strategy` and masks the sign bit.
    #[inline]
    fn hash(&self, strategy: KeyStrategy, key: &Value) -> Result<i32, Error> {
        Ok(strategy.hash(key, &*self.comparer)? & i32::MAX)
    }

    /// Returns `true` if both storages hash keys with the same comparer.
    #[inline]
    fn shares_comparer(&self, other: &Self) -> bool {
        ptr::eq(
            Arc::as_ptr(&self.comparer).cast::<()>(),
            Arc::as_ptr(&other.comparer).cast::<()>(),
        )
    }

    /// Locks `self` and `other` in address order.
    ///
    /// Returns `None` if both are the same storage; the lock is then held once.
    fn lock_pair<'a>(
        &'a self,
        other: &'a Self,
    ) -> (MutexGuard<'a, ()>, Option<MutexGuard<'a, ()>>) {
        lock_in_order(&self.lock, &other.lock)
    }
}

/// Locks both mutexes, the one at the lower address first.
///
/// Returns `None` in place of the second guard if both are the same mutex.
fn lock_in_order<'a>(
    a: &'a Mutex<()>,
    b: &'a Mutex<()>,
) -> (MutexGuard<'a, ()>, Option<MutexGuard<'a, ()>>) {
    if ptr::eq(a, b) {
        return (a.lock(), None);
    }
    let (first, second) = if (a as *const Mutex<()>) < (b as *const Mutex<()>) {
        (a, b)
    } else {
        (b, a)
    };
    let first = first.lock();
    (first, Some(second.lock()))
}

impl<V: 'static + Clone> DictStorage<V> {
    /// Creates an empty [`DictStorage`] that can hold `count` entries without resizing.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::DictStorage;
    ///
    /// let storage: DictStorage = DictStorage::with_capacity(20);
    /// assert_eq!(storage.capacity(), 21);
    /// let storage: DictStorage = DictStorage::with_capacity(0);
    /// assert_eq!(storage.capacity(), 7);
    /// ```
    #[must_use]
    pub fn with_capacity(count: usize) -> Self {
        let storage = Self::new();
        let len = count.saturating_add(1).max(MINIMUM_LEN);
        storage.array.swap(
            (Some(Shared::new(BucketArray::new(len, KeyType::Uninitialized))), Tag::None),
            Release,
        );
        storage
    }

    /// Creates a [`DictStorage`] from key-value pairs.
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot be hashed or compared.
    pub fn from_pairs<I: IntoIterator<Item = (Value, V)>>(pairs: I) -> Result<Self, Error> {
        let pairs = pairs.into_iter();
        let storage = Self::with_capacity(pairs.size_hint().0);
        storage.extend_from(pairs)?;
        Ok(storage)
    }

    /// Inserts or overwrites an entry.
    ///
    /// Overwriting keeps the key object that was stored first.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared; the storage is not modified.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::{DictStorage, Value};
    ///
    /// let storage: DictStorage<u32> = DictStorage::new();
    /// assert!(storage.add(Value::from(1), 0).is_ok());
    /// assert!(storage.add(Value::from(1.0), 1).is_ok());
    /// assert_eq!(storage.len(), 1);
    /// assert_eq!(storage.try_get(&Value::from(1)).unwrap(), Some(1));
    /// ```
    #[inline]
    pub fn add(&self, key: Value, value: V) -> Result<(), Error> {
        let guard = Guard::new();
        let _lock = self.lock.lock();
        self.add_locked(key, value, &guard)
    }

    /// Inserts every pair while holding the lock once.
    ///
    /// # Errors
    ///
    /// Returns the first hashing or comparison error; pairs preceding the failed one stay
    /// inserted.
    pub fn extend_from<I: IntoIterator<Item = (Value, V)>>(&self, pairs: I) -> Result<(), Error> {
        let guard = Guard::new();
        let _lock = self.lock.lock();
        for (key, value) in pairs {
            self.add_locked(key, value, &guard)?;
        }
        Ok(())
    }

    /// Returns the value associated with `key`, inserting `default` first if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    pub fn get_or_add(&self, key: Value, default: V) -> Result<V, Error> {
        let guard = Guard::new();
        let _lock = self.lock.lock();
        if let Some(value) = self.peek(&key, &guard)? {
            return Ok(value.clone());
        }
        self.add_locked(key, default.clone(), &guard)?;
        Ok(default)
    }

    /// Returns a clone of the value associated with `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    #[inline]
    pub fn try_get(&self, key: &Value) -> Result<Option<V>, Error> {
        Ok(self.peek(key, &Guard::new())?.cloned())
    }

    /// Removes the entry associated with `key`.
    ///
    /// The key is not hashed if no key has ever been stored, so removing an unhashable key
    /// from such a storage returns `false`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    #[inline]
    pub fn remove(&self, key: &Value) -> Result<bool, Error> {
        Ok(self.try_remove_value(key)?.is_some())
    }

    /// Removes the entry associated with `key`, always hashing the key first.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared, even if the storage has never
    /// held an entry.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::{DictStorage, Value};
    ///
    /// #[derive(Debug)]
    /// struct List;
    /// impl rtcore::RuntimeObject for List {
    ///     fn class(&self) -> rtcore::TypeHandle {
    ///         rtcore::TypeHandle::new("list")
    ///     }
    /// }
    ///
    /// let storage: DictStorage = DictStorage::new();
    /// let key = Value::object(List);
    /// assert!(!storage.remove(&key).unwrap());
    /// assert!(storage.remove_always_hash(&key).is_err());
    /// ```
    pub fn remove_always_hash(&self, key: &Value) -> Result<bool, Error> {
        let guard = Guard::new();
        let _lock = self.lock.lock();
        let current = self.array.load(Acquire, &guard).as_ref();
        let strategy = current.map_or(KeyStrategy::Generic, |a| a.key_type().strategy_for(key));
        let hash = self.hash(strategy, key)?;
        let Some(array) = current else {
            return Ok(false);
        };
        Ok(self.remove_locked(array, key, hash, strategy)?.is_some())
    }

    /// Removes the entry associated with `key` and returns its value.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be hashed or compared.
    pub fn try_remove_value(&self, key: &Value) -> Result<Option<V>, Error> {
        let guard = Guard::new();
        let _lock = self.lock.lock();
        let Some(array) = self.array.load(Acquire, &guard).as_ref() else {
            return Ok(None);
        };
        if !array.key_type().is_initialized() {
            return Ok(None);
        }
        let strategy = array.key_type().strategy_for(key);
        let hash = self.hash(strategy, key)?;
        self.remove_locked(array, key, hash, strategy)
    }

    /// Removes an arbitrary entry and returns it.
    pub fn pop_item(&self) -> Option<(Value, V)> {
        let guard = Guard::new();
        let _lock = self.lock.lock();
        let array = self.array.load(Acquire, &guard).as_ref()?;
        let entry = array.remove_first()?;
        self.len.fetch_sub(1, Release);
        Some((entry.key.clone(), entry.value.clone()))
    }

    /// Removes every entry.
    ///
    /// The storage keeps its key type and starts over with a small bucket array.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::{DictStorage, KeyType, TypeTag, Value};
    ///
    /// let storage: DictStorage<u32> = DictStorage::new();
    /// assert!(storage.add(Value::from(1), 1).is_ok());
    /// storage.clear();
    /// assert!(storage.is_empty());
    /// assert_eq!(storage.capacity(), 8);
    /// assert_eq!(storage.key_type(), KeyType::Concrete(TypeTag::Int));
    /// ```
    pub fn clear(&self) {
        let guard = Guard::new();
        let _lock = self.lock.lock();
        if let Some(array) = self.array.load(Acquire, &guard).as_ref() {
            self.publish(BucketArray::new(CLEARED_LEN, array.key_type().clone()), &guard);
            self.len.store(0, Release);
        }
    }

    /// Returns a deep copy of the storage.
    ///
    /// The copy carries over the key type and shares no buckets with `self`.
    #[must_use]
    pub fn clone_storage(&self) -> Self {
        let guard = Guard::new();
        let cloned = Self::with_comparer(self.comparer.clone());
        let _lock = self.lock.lock();
        if let Some(array) = self.array.load(Acquire, &guard).as_ref() {
            let rebuilt = array.rebuild(array.len(), array.key_type().clone());
            cloned.array.swap((Some(Shared::new(rebuilt)), Tag::None), Release);
            cloned.len.store(self.len.load(Relaxed), Release);
        }
        cloned
    }

    /// Returns a snapshot of every entry.
    pub fn get_items(&self) -> Vec<(Value, V)> {
        let guard = Guard::new();
        let _lock = self.lock.lock();
        let mut items = Vec::with_capacity(self.len.load(Relaxed));
        if let Some(array) = self.array.load(Acquire, &guard).as_ref() {
            items.extend(
                array
                    .entries()
                    .map(|(_, entry)| (entry.key.clone(), entry.value.clone())),
            );
        }
        items
    }

    /// Returns a snapshot of every key.
    pub fn get_keys(&self) -> Vec<Value> {
        let guard = Guard::new();
        let _lock = self.lock.lock();
        let mut keys = Vec::with_capacity(self.len.load(Relaxed));
        if let Some(array) = self.array.load(Acquire, &guard).as_ref() {
            keys.extend(array.entries().map(|(_, entry)| entry.key.clone()));
        }
        keys
    }

    /// Returns `true` if a key that is not a string is stored.
    pub fn has_non_string_keys(&self) -> bool {
        let guard = Guard::new();
        let _lock = self.lock.lock();
        let Some(array) = self.array.load(Acquire, &guard).as_ref() else {
            return false;
        };
        if *array.key_type() == KeyType::Concrete(crate::TypeTag::Str) {
            return false;
        }
        array
            .entries()
            .any(|(_, entry)| !matches!(entry.key, Value::Str(_)))
    }

    /// Merges every entry of `self` into `into`.
    ///
    /// The destination is resized once to fit both storages. It adopts the key type of `self`
    /// if it has none and becomes heterogeneous if the key types differ.
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot be hashed or compared with the comparer of `into`.
    pub fn merge_into(&self, into: &Self) -> Result<(), Error> {
        let guard = Guard::new();
        let (_first, second) = self.lock_pair(into);
        if second.is_none() {
            return Ok(());
        }
        let Some(source) = self.array.load(Acquire, &guard).as_ref() else {
            return Ok(());
        };
        let source_len = self.len.load(Relaxed);
        if source_len == 0 {
            return Ok(());
        }

        let dest = into.array.load(Acquire, &guard).as_ref();
        let key_type = match dest.map(BucketArray::key_type) {
            None | Some(KeyType::Uninitialized) => source.key_type().clone(),
            Some(dest_type) if dest_type == source.key_type() => dest_type.clone(),
            Some(_) => KeyType::Heterogeneous,
        };
        let needed = into.len.load(Relaxed) + source_len;
        let mut len = dest.map_or(MINIMUM_LEN, BucketArray::len);
        while needed >= len {
            len *= RESIZE_MULTIPLIER;
        }
        let merged = dest.map_or_else(
            || BucketArray::new(len, key_type.clone()),
            |dest| dest.rebuild(len, key_type.clone()),
        );

        let rehash = !self.shares_comparer(into);
        let mut count = into.len.load(Relaxed);
        for (_, entry) in source.entries() {
            let strategy = key_type.strategy_for(&entry.key);
            let hash = if rehash {
                into.hash(strategy, &entry.key)?
            } else {
                entry.hash
            };
            let inserted = merged.insert(
                hash,
                entry.key.clone(),
                entry.value.clone(),
                |a, b| strategy.equals(a, b, &*into.comparer),
            )?;
            match inserted {
                Insertion::Added => count += 1,
                Insertion::Replaced => (),
                Insertion::NoVacancy(..) => {
                    debug_assert!(false, "merged array sized for {needed} entries");
                }
            }
        }
        log::debug!(
            "merged {source_len} entries into a storage of {} entries ({len} slots)",
            into.len.load(Relaxed)
        );
        into.publish(merged, &guard);
        into.len.store(count, Release);
        Ok(())
    }

    /// Inserts an entry; the caller must hold the lock.
    fn add_locked(&self, key: Value, value: V, guard: &Guard) -> Result<(), Error> {
        let current = self.array.load(Acquire, guard).as_ref();
        let observed = current
            .map_or(KeyType::Uninitialized, |a| a.key_type().clone())
            .observe(key.type_tag());
        let strategy = observed.strategy_for(&key);
        let hash = self.hash(strategy, &key)?;

        let mut array = match current {
            Some(array) if *array.key_type() == observed => array,
            _ => self.specialize(current, observed, guard),
        };
        let (mut key, mut value) = (key, value);
        loop {
            let inserted = array.insert(hash, key, value, |a, b| {
                strategy.equals(a, b, &*self.comparer)
            })?;
            match inserted {
                Insertion::Added => {
                    let len = self.len.fetch_add(1, Release) + 1;
                    if len >= array.len() {
                        self.resize(array, array.len() * RESIZE_MULTIPLIER, guard);
                    }
                    return Ok(());
                }
                Insertion::Replaced => return Ok(()),
                Insertion::NoVacancy(k, v) => {
                    (key, value) = (k, v);
                    array = self.resize(array, array.len(), guard);
                }
            }
        }
    }

    /// Removes an entry from `array`; the caller must hold the lock.
    fn remove_locked(
        &self,
        array: &BucketArray<V>,
        key: &Value,
        hash: i32,
        strategy: KeyStrategy,
    ) -> Result<Option<V>, Error> {
        let removed = array.remove(key, hash, |a, b| strategy.equals(a, b, &*self.comparer))?;
        Ok(removed.map(|entry| {
            self.len.fetch_sub(1, Release);
            entry.value.clone()
        }))
    }

    /// Publishes an array built for `key_type`.
    fn specialize<'g>(
        &self,
        current: Option<&BucketArray<V>>,
        key_type: KeyType,
        guard: &'g Guard,
    ) -> &'g BucketArray<V> {
        log::trace!(
            "key type {:?} -> {key_type:?}",
            current.map(BucketArray::key_type)
        );
        let array = current.map_or_else(
            || BucketArray::new(MINIMUM_LEN, key_type.clone()),
            |current| current.rebuild(current.len(), key_type.clone()),
        );
        self.publish(array, guard)
    }

    /// Publishes a copy of `array` with `len` chains.
    fn resize<'g>(
        &self,
        array: &BucketArray<V>,
        len: usize,
        guard: &'g Guard,
    ) -> &'g BucketArray<V> {
        log::debug!("resizing bucket array: {} -> {len} slots", array.len());
        self.publish(array.rebuild(len, array.key_type().clone()), guard)
    }

    /// Replaces the current array; the old one is reclaimed once no reader can see it.
    fn publish<'g>(&self, array: BucketArray<V>, guard: &'g Guard) -> &'g BucketArray<V> {
        let shared = Shared::new(array);
        let published = shared.get_guarded_ref(guard);
        drop(self.array.swap((Some(shared), Tag::None), Release));
        published
    }
}

impl DictStorage<Value> {
    /// Copies every entry of `self` into `into`.
    ///
    /// Entries of `self` overwrite equal keys of `into`. Both storages stay locked, the one at
    /// the lower address first, until every entry is copied. Copying a storage into itself does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if a key cannot be hashed or compared by the destination.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::{DictStorage, KeyType, Value};
    ///
    /// let a: DictStorage = DictStorage::new();
    /// let b: DictStorage = DictStorage::new();
    /// assert!(a.add(Value::from(1), Value::from("one")).is_ok());
    /// assert!(b.add(Value::from("two"), Value::from(2)).is_ok());
    /// assert!(a.copy_to(&b).is_ok());
    /// assert_eq!(b.len(), 2);
    /// assert_eq!(b.key_type(), KeyType::Heterogeneous);
    /// ```
    pub fn copy_to(&self, into: &dyn DictionaryStorage) -> Result<(), Error> {
        if let Some(common) = into.as_common() {
            return self.merge_into(common);
        }
        let guard = Guard::new();
        let (_first, second) = lock_in_order(&self.lock, into.storage_lock());
        if second.is_none() {
            return Ok(());
        }
        let Some(array) = self.array.load(Acquire, &guard).as_ref() else {
            return Ok(());
        };
        for (_, entry) in array.entries() {
            into.add_no_lock(entry.key.clone(), entry.value.clone())?;
        }
        Ok(())
    }
}

impl<V: 'static + Clone> Clone for DictStorage<V> {
    #[inline]
    fn clone(&self) -> Self {
        self.clone_storage()
    }
}

impl<V> Debug for DictStorage<V>
where
    V: Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let guard = Guard::new();
        f.debug_map().entries(self.iter(&guard)).finish()
    }
}

impl<V> Default for DictStorage<V> {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl DictionaryStorage for DictStorage<Value> {
    #[inline]
    fn storage_lock(&self) -> &Mutex<()> {
        &self.lock
    }

    #[inline]
    fn add_no_lock(&self, key: Value, value: Value) -> Result<(), Error> {
        self.add_locked(key, value, &Guard::new())
    }

    #[inline]
    fn add(&self, key: Value, value: Value) -> Result<(), Error> {
        DictStorage::add(self, key, value)
    }

    #[inline]
    fn try_get(&self, key: &Value) -> Result<Option<Value>, Error> {
        DictStorage::try_get(self, key)
    }

    #[inline]
    fn remove(&self, key: &Value) -> Result<bool, Error> {
        DictStorage::remove(self, key)
    }

    #[inline]
    fn contains(&self, key: &Value) -> Result<bool, Error> {
        DictStorage::contains(self, key)
    }

    #[inline]
    fn len(&self) -> usize {
        DictStorage::len(self)
    }

    #[inline]
    fn clear(&self) {
        DictStorage::clear(self);
    }

    #[inline]
    fn get_items(&self) -> Vec<(Value, Value)> {
        DictStorage::get_items(self)
    }

    #[inline]
    fn as_common(&self) -> Option<&DictStorage> {
        Some(self)
    }
}

impl<'g, V> Iterator for Iter<'g, V> {
    type Item = (&'g Value, &'g V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.entries
            .as_mut()
            .and_then(Iterator::next)
            .map(|(_, entry)| (&entry.key, &entry.value))
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use once_cell::sync::Lazy;
    use parking_lot::Mutex;

    use super::{DictStorage, DictionaryStorage};
    use crate::{Error, KeyType, RuntimeObject, TypeHandle, TypeTag, Value};

    #[derive(Debug)]
    struct Unhashable;

    impl RuntimeObject for Unhashable {
        fn class(&self) -> TypeHandle {
            TypeHandle::new("list")
        }
    }

    static SYMBOL: Lazy<TypeHandle> = Lazy::new(|| TypeHandle::new("symbol"));

    /// Hashes by name and compares by identity.
    #[derive(Debug)]
    struct Symbol(&'static str);

    impl RuntimeObject for Symbol {
        fn class(&self) -> TypeHandle {
            SYMBOL.clone()
        }
        fn hash(&self) -> Result<i32, Error> {
            Ok(crate::str_hash(self.0))
        }
        fn repr(&self) -> String {
            format!("symbol({})", self.0)
        }
    }

    /// Treats objects with the same representation as equal keys.
    struct ByRepr;

    impl crate::KeyComparer for ByRepr {
        fn hash(&self, key: &Value) -> Result<i32, Error> {
            match key {
                Value::Object(o) => Ok(crate::str_hash(&o.repr())),
                _ => crate::generic_hash(key),
            }
        }
        fn equals(&self, a: &Value, b: &Value) -> Result<bool, Error> {
            match (a, b) {
                (Value::Object(x), Value::Object(y)) => Ok(x.repr() == y.repr()),
                _ => crate::generic_equals(a, b),
            }
        }
    }

    /// A storage outside the crate: an append-only log.
    #[derive(Default)]
    struct Recording {
        lock: Mutex<()>,
        items: Mutex<Vec<(Value, Value)>>,
    }

    impl DictionaryStorage for Recording {
        fn storage_lock(&self) -> &Mutex<()> {
            &self.lock
        }
        fn add_no_lock(&self, key: Value, value: Value) -> Result<(), Error> {
            self.items.lock().push((key, value));
            Ok(())
        }
        fn try_get(&self, key: &Value) -> Result<Option<Value>, Error> {
            let items = self.items.lock();
            Ok(items.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone()))
        }
        fn remove(&self, _: &Value) -> Result<bool, Error> {
            Ok(false)
        }
        fn len(&self) -> usize {
            self.items.lock().len()
        }
        fn clear(&self) {
            let _lock = self.lock.lock();
            self.items.lock().clear();
        }
        fn get_items(&self) -> Vec<(Value, Value)> {
            self.items.lock().clone()
        }
    }

    #[test]
    fn growth() {
        let storage: DictStorage<usize> = DictStorage::new();
        assert_eq!(storage.capacity(), 0);
        for i in 0..6 {
            assert!(storage.add(Value::from(i), 0).is_ok());
        }
        assert_eq!(storage.capacity(), 7);
        assert!(storage.add(Value::from(6), 0).is_ok());
        assert_eq!(storage.capacity(), 21);
        for i in 7..21 {
            assert!(storage.add(Value::from(i), 0).is_ok());
        }
        assert_eq!(storage.capacity(), 63);
        assert_eq!(storage.len(), 21);
    }

    #[test]
    fn compaction() {
        let storage: DictStorage<usize> = DictStorage::new();
        for i in 0..100 {
            assert!(storage.add(Value::from("k"), i).is_ok());
        }
        assert_eq!(storage.capacity(), 7);
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.try_get(&Value::from("k")).unwrap(), Some(99));

        for i in 0..100_usize {
            let key = Value::from((i % 3) as i64);
            assert!(storage.add(key.clone(), i).is_ok());
            assert!(storage.remove(&key).unwrap());
        }
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.capacity(), 7);
    }

    #[test]
    fn unhashable() {
        let storage: DictStorage = DictStorage::new();
        let key = Value::object(Unhashable);
        assert!(!storage.remove(&key).unwrap());
        assert!(matches!(storage.remove_always_hash(&key), Err(Error::Unhashable(_))));
        assert!(matches!(storage.add(key.clone(), Value::None), Err(Error::Unhashable(_))));
        assert_eq!(storage.key_type(), KeyType::Uninitialized);
        assert!(storage.is_empty());

        assert!(storage.add(Value::from(1), Value::None).is_ok());
        assert!(storage.try_get(&key).is_err());
        assert!(storage.contains(&key).is_err());
        assert!(storage.remove(&key).is_err());
    }

    #[test]
    fn mixed_lookup() {
        let storage: DictStorage<u8> = DictStorage::new();
        assert!(storage.add(Value::from(2), 7).is_ok());
        assert_eq!(storage.try_get(&Value::from(2.0)).unwrap(), Some(7));
        assert_eq!(storage.try_get(&Value::Bool(false)).unwrap(), None);
        assert_eq!(storage.key_type(), KeyType::Concrete(TypeTag::Int));
        assert!(storage.remove(&Value::from(2.0)).unwrap());
        assert!(storage.is_empty());
    }

    #[test]
    fn overwrite_keeps_first_key() {
        let storage: DictStorage<u8> = DictStorage::new();
        assert!(storage.add(Value::from(1), 0).is_ok());
        assert!(storage.add(Value::Bool(true), 1).is_ok());
        assert_eq!(storage.get_items(), vec![(Value::from(1), 1)]);
        assert_eq!(storage.key_type(), KeyType::Heterogeneous);
    }

    #[test]
    fn clear_and_pop() {
        let storage: DictStorage<u8> = DictStorage::new();
        storage.clear();
        assert_eq!(storage.capacity(), 0);
        assert!(storage.pop_item().is_none());

        assert!(storage.add(Value::from("x"), 1).is_ok());
        assert_eq!(storage.pop_item(), Some((Value::from("x"), 1)));
        assert!(storage.is_empty());
        assert!(storage.pop_item().is_none());

        assert!(storage.add(Value::from("y"), 2).is_ok());
        storage.clear();
        assert!(storage.is_empty());
        assert_eq!(storage.capacity(), 8);
        assert_eq!(storage.key_type(), KeyType::Concrete(TypeTag::Str));
        assert!(!storage.has_non_string_keys());
    }

    #[test]
    fn get_or_add() {
        let storage: DictStorage<u8> = DictStorage::new();
        assert_eq!(storage.get_or_add(Value::from("a"), 1).unwrap(), 1);
        assert_eq!(storage.get_or_add(Value::from("a"), 2).unwrap(), 1);
        assert_eq!(storage.len(), 1);
    }

    #[test]
    fn non_string_keys() {
        let storage: DictStorage<u8> = DictStorage::new();
        assert!(!storage.has_non_string_keys());
        assert!(storage.add(Value::from("a"), 1).is_ok());
        assert!(!storage.has_non_string_keys());
        assert!(storage.add(Value::from(1), 1).is_ok());
        assert!(storage.has_non_string_keys());
        assert!(storage.remove(&Value::from(1)).unwrap());
        assert!(!storage.has_non_string_keys());
    }

    #[test]
    fn merge() {
        let source: DictStorage = DictStorage::new();
        let into: DictStorage = DictStorage::new();
        for i in 0..30 {
            assert!(source.add(Value::from(i), Value::from(i)).is_ok());
        }
        assert!(into.add(Value::from(0), Value::from("zero")).is_ok());
        assert!(into.add(Value::from(100), Value::from(100)).is_ok());
        assert!(source.copy_to(&into).is_ok());
        assert_eq!(into.len(), 31);
        assert_eq!(into.try_get(&Value::from(0)).unwrap(), Some(Value::from(0)));
        assert_eq!(into.key_type(), KeyType::Concrete(TypeTag::Int));
        assert!(into.capacity() > 31);
        assert_eq!(source.len(), 30);

        let empty: DictStorage = DictStorage::new();
        assert!(source.copy_to(&empty).is_ok());
        assert_eq!(empty.key_type(), KeyType::Concrete(TypeTag::Int));
        assert_eq!(empty.len(), 30);

        assert!(source.copy_to(&source).is_ok());
        assert_eq!(source.len(), 30);
    }

    #[test]
    fn merge_custom_comparer() {
        let source: DictStorage = DictStorage::new();
        assert!(source.add(Value::object(Symbol("a")), Value::from(1)).is_ok());
        assert!(source.add(Value::from("k"), Value::from(2)).is_ok());
        assert!(source.try_get(&Value::object(Symbol("a"))).unwrap().is_none());

        let into: DictStorage = DictStorage::with_comparer(Arc::new(ByRepr));
        assert!(into.add(Value::from(3), Value::from(3)).is_ok());
        assert!(source.copy_to(&into).is_ok());
        assert_eq!(into.len(), 3);
        assert_eq!(into.try_get(&Value::object(Symbol("a"))).unwrap(), Some(Value::from(1)));
        assert_eq!(into.try_get(&Value::from("k")).unwrap(), Some(Value::from(2)));
        assert_eq!(into.try_get(&Value::from(3.0)).unwrap(), Some(Value::from(3)));
    }

    #[test]
    fn foreign_copy() {
        let source: DictStorage = DictStorage::new();
        assert!(source.add(Value::from(1), Value::from(2)).is_ok());
        let into = Recording::default();
        assert!(source.copy_to(&into).is_ok());
        assert_eq!(into.get_items(), vec![(Value::from(1), Value::from(2))]);
        assert!(into.as_common().is_none());
        assert!(into.add(Value::from(3), Value::None).is_ok());
        assert_eq!(into.len(), 2);
    }

    #[test]
    fn foreign_copy_holds_lock() {
        let source: DictStorage = DictStorage::new();
        for i in 0..8 {
            assert!(source.add(Value::from(i), Value::from(i)).is_ok());
        }
        let into = Arc::new(Recording::default());

        let held = into.storage_lock().lock();
        let copier = {
            let into = into.clone();
            let source = source.clone_storage();
            thread::spawn(move || source.copy_to(&*into).is_ok())
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(into.len(), 0);
        drop(held);
        assert!(copier.join().unwrap());
        assert_eq!(into.len(), 8);

        // A concurrent `clear` never observes a partial copy.
        let finished = Arc::new(AtomicBool::new(false));
        let clearer = {
            let into = into.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                while !finished.load(Relaxed) {
                    let lock = into.storage_lock().lock();
                    assert_eq!(into.len() % 8, 0);
                    drop(lock);
                    into.clear();
                }
            })
        };
        for _ in 0..64 {
            assert!(source.copy_to(&*into).is_ok());
        }
        finished.store(true, Relaxed);
        assert!(clearer.join().is_ok());
    }
}
