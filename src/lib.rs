//! Core data structures of a dynamic language runtime.
//!
//! # rtcore::DictStorage
//! A hash table keyed by runtime values that specializes its hash and equality functions on
//! the first key type it stores, falls back to a generic comparer for mixed key types, and
//! serves readers without locking while a writer resizes it.
//!
//! # rtcore::Dictionary
//! The mapping object built on [`DictStorage`], with size-checked enumerators.
//!
//! # rtcore::Generator
//! A suspendable computation with send, throw and close, driven over a [`Continuation`].

pub mod dict_storage;
pub use dict_storage::{DictStorage, DictionaryStorage};

mod dictionary;
pub use dictionary::{Dictionary, ItemIter, KeyIter, ValueIter};

pub mod generator;
pub use generator::{Continuation, Generator, GeneratorOptions, GeneratorState, Resumption};

pub mod exception_state;

mod error;
pub use error::{builtins, Error, Exception, ExceptionType};

mod hash_strategy;
pub use hash_strategy::{
    float_hash, generic_equals, generic_hash, int_hash, str_hash, tuple_hash, DefaultComparer,
    KeyComparer, KeyStrategy, KeyType,
};

mod value;
pub use value::{RuntimeObject, TypeHandle, TypeTag, Value};

mod exit_guard;

#[cfg(feature = "serde")]
mod serde;
