//! Hash and equality strategies for dictionary keys.
//!
//! A dictionary starts without a key type, specializes on the type of the first key it stores
//! and falls back to the generic, dynamically dispatched [`KeyComparer`] once a key of another
//! type is stored. The fast paths must agree with [`generic_hash`] and [`generic_equals`] for
//! values of their own type so that lookups with a differently typed key that compares equal
//! still succeed.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rustc_hash::FxHasher;

use crate::{Error, TypeTag, Value};

const NONE_HASH: i32 = 0x2f0e_1d3c;

/// [`KeyComparer`] hashes and compares keys of arbitrary types.
///
/// Custom comparers must agree with [`generic_hash`] and [`generic_equals`] on integers,
/// floats, strings, tuples and type objects, since those keys may be served by the fast paths.
pub trait KeyComparer: Send + Sync {
    /// Returns the hash code of `key`.
    fn hash(&self, key: &Value) -> Result<i32, Error>;

    /// Returns `true` if `a` and `b` are equal.
    fn equals(&self, a: &Value, b: &Value) -> Result<bool, Error>;
}

/// [`DefaultComparer`] implements [`generic_hash`] and [`generic_equals`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultComparer;

impl KeyComparer for DefaultComparer {
    #[inline]
    fn hash(&self, key: &Value) -> Result<i32, Error> {
        generic_hash(key)
    }

    #[inline]
    fn equals(&self, a: &Value, b: &Value) -> Result<bool, Error> {
        generic_equals(a, b)
    }
}

/// [`KeyType`] records which key types a dictionary has observed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum KeyType {
    /// No key has been stored yet.
    Uninitialized,
    /// Every key stored so far has the same type.
    Concrete(TypeTag),
    /// Keys of different types have been stored; never reverts.
    Heterogeneous,
}

impl KeyType {
    /// Returns `true` if a key has ever been stored.
    #[inline]
    pub(crate) fn is_initialized(&self) -> bool {
        !matches!(self, Self::Uninitialized)
    }

    /// Returns the [`KeyType`] after storing a key of type `tag`.
    pub(crate) fn observe(&self, tag: TypeTag) -> KeyType {
        match self {
            Self::Uninitialized => Self::Concrete(tag),
            Self::Concrete(current) if *current != tag => Self::Heterogeneous,
            _ => self.clone(),
        }
    }

    /// Chooses the strategy for hashing and comparing `key`.
    ///
    /// Keys of the specialized type use the fast path; any other key uses the generic pair
    /// without changing the key type.
    pub(crate) fn strategy_for(&self, key: &Value) -> KeyStrategy {
        match self {
            Self::Concrete(tag) if *tag == key.type_tag() => KeyStrategy::for_tag(tag),
            _ => KeyStrategy::Generic,
        }
    }
}

/// [`KeyStrategy`] is a hash/equality pair.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyStrategy {
    /// Integer keys.
    Int,
    /// String keys.
    Str,
    /// Float keys.
    Float,
    /// Tuple keys.
    Tuple,
    /// Type objects compared by identity.
    Identity,
    /// Dispatches through the [`KeyComparer`] of the dictionary.
    Generic,
}

impl KeyStrategy {
    /// Returns the strategy specialized for keys of type `tag`.
    #[must_use]
    pub fn for_tag(tag: &TypeTag) -> Self {
        match tag {
            TypeTag::Int => Self::Int,
            TypeTag::Str => Self::Str,
            TypeTag::Float => Self::Float,
            TypeTag::Tuple => Self::Tuple,
            TypeTag::Type => Self::Identity,
            TypeTag::None | TypeTag::Bool | TypeTag::Object(_) => Self::Generic,
        }
    }

    /// Hashes `key`.
    #[inline]
    pub fn hash(self, key: &Value, comparer: &dyn KeyComparer) -> Result<i32, Error> {
        match (self, key) {
            (Self::Int, Value::Int(i)) => Ok(int_hash(*i)),
            (Self::Str, Value::Str(s)) => Ok(str_hash(s)),
            (Self::Float, Value::Float(x)) => Ok(float_hash(*x)),
            (Self::Tuple, Value::Tuple(items)) => tuple_hash(items),
            (Self::Identity, Value::Type(t)) => Ok(t.identity_hash()),
            _ => comparer.hash(key),
        }
    }

    /// Compares `a` with the stored key `b`.
    #[inline]
    pub fn equals(self, a: &Value, b: &Value, comparer: &dyn KeyComparer) -> Result<bool, Error> {
        match (self, a, b) {
            (Self::Int, Value::Int(x), Value::Int(y)) => Ok(x == y),
            (Self::Str, Value::Str(x), Value::Str(y)) => Ok(Arc::ptr_eq(x, y) || x == y),
            #[allow(clippy::float_cmp)] // Language-level float equality.
            (Self::Float, Value::Float(x), Value::Float(y)) => Ok(x == y),
            (Self::Tuple, Value::Tuple(x), Value::Tuple(y)) => tuple_equals(x, y),
            (Self::Identity, Value::Type(x), Value::Type(y)) => Ok(x == y),
            _ => comparer.equals(a, b),
        }
    }
}

/// Hashes an integer; small integers hash to themselves.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // Intended truncation.
#[inline]
#[must_use]
pub fn int_hash(i: i64) -> i32 {
    if let Ok(small) = i32::try_from(i) {
        small
    } else {
        let bits = i as u64;
        (bits ^ (bits >> 32)) as i32
    }
}

/// Hashes a float; integral floats hash like the equal integer.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
#[inline]
#[must_use]
pub fn float_hash(x: f64) -> i32 {
    if x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64 {
        int_hash(x as i64)
    } else {
        let bits = x.to_bits();
        (bits ^ (bits >> 32)) as i32
    }
}

/// Hashes a string.
#[allow(clippy::cast_possible_truncation)] // Intended truncation.
#[inline]
#[must_use]
pub fn str_hash(s: &str) -> i32 {
    let mut hasher = FxHasher::default();
    s.hash(&mut hasher);
    let bits = hasher.finish();
    (bits ^ (bits >> 32)) as i32
}

/// Hashes a tuple by combining the generic hashes of its items.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
pub fn tuple_hash(items: &[Value]) -> Result<i32, Error> {
    let mut acc: u32 = 0x0034_5678;
    let mut mult: u32 = 1_000_003;
    for (i, item) in items.iter().enumerate() {
        acc = (acc ^ generic_hash(item)? as u32).wrapping_mul(mult);
        mult = mult.wrapping_add(82_520 + 2 * (items.len() - i) as u32);
    }
    Ok(acc.wrapping_add(97_531) as i32)
}

fn tuple_equals(a: &[Value], b: &[Value]) -> Result<bool, Error> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !generic_equals(x, y)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Hashes any value.
pub fn generic_hash(key: &Value) -> Result<i32, Error> {
    match key {
        Value::None => Ok(NONE_HASH),
        Value::Bool(b) => Ok(i32::from(*b)),
        Value::Int(i) => Ok(int_hash(*i)),
        Value::Float(x) => Ok(float_hash(*x)),
        Value::Str(s) => Ok(str_hash(s)),
        Value::Tuple(items) => tuple_hash(items),
        Value::Type(t) => Ok(t.identity_hash()),
        Value::Object(o) => o.hash(),
    }
}

/// Compares any two values.
///
/// Booleans, integers and floats compare numerically.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::float_cmp
)]
pub fn generic_equals(a: &Value, b: &Value) -> Result<bool, Error> {
    let numeric = |v: &Value| match v {
        Value::Bool(b) => Some(Number::Int(i64::from(*b))),
        Value::Int(i) => Some(Number::Int(*i)),
        Value::Float(x) => Some(Number::Float(*x)),
        _ => None,
    };
    if let (Some(x), Some(y)) = (numeric(a), numeric(b)) {
        return Ok(match (x, y) {
            (Number::Int(x), Number::Int(y)) => x == y,
            (Number::Float(x), Number::Float(y)) => x == y,
            (Number::Int(i), Number::Float(x)) | (Number::Float(x), Number::Int(i)) => {
                x.fract() == 0.0 && x == i as f64 && x as i64 == i
            }
        });
    }
    match (a, b) {
        (Value::None, Value::None) => Ok(true),
        (Value::Str(x), Value::Str(y)) => Ok(x == y),
        (Value::Tuple(x), Value::Tuple(y)) => Ok(Arc::ptr_eq(x, y) || tuple_equals(x, y)?),
        (Value::Type(x), Value::Type(y)) => Ok(x == y),
        (Value::Object(o), other) | (other, Value::Object(o)) => o.equals(other),
        _ => Ok(false),
    }
}

#[derive(Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}
