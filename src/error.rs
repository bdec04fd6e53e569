//! Errors and language-level exceptions.

use std::fmt::{self, Display};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::{TypeHandle, Value};

/// Exception types are ordinary type objects.
pub type ExceptionType = TypeHandle;

static BASE_EXCEPTION: Lazy<ExceptionType> = Lazy::new(|| TypeHandle::new("BaseException"));
static EXCEPTION: Lazy<ExceptionType> =
    Lazy::new(|| TypeHandle::with_base("Exception", &BASE_EXCEPTION));
static GENERATOR_EXIT: Lazy<ExceptionType> =
    Lazy::new(|| TypeHandle::with_base("GeneratorExit", &BASE_EXCEPTION));
static STOP_ITERATION: Lazy<ExceptionType> =
    Lazy::new(|| TypeHandle::with_base("StopIteration", &EXCEPTION));
static TYPE_ERROR: Lazy<ExceptionType> =
    Lazy::new(|| TypeHandle::with_base("TypeError", &EXCEPTION));
static VALUE_ERROR: Lazy<ExceptionType> =
    Lazy::new(|| TypeHandle::with_base("ValueError", &EXCEPTION));
static KEY_ERROR: Lazy<ExceptionType> =
    Lazy::new(|| TypeHandle::with_base("KeyError", &EXCEPTION));
static RUNTIME_ERROR: Lazy<ExceptionType> =
    Lazy::new(|| TypeHandle::with_base("RuntimeError", &EXCEPTION));
static RECURSION_ERROR: Lazy<ExceptionType> =
    Lazy::new(|| TypeHandle::with_base("RecursionError", &RUNTIME_ERROR));

/// Builtin exception types.
pub mod builtins {
    use super::{
        ExceptionType, BASE_EXCEPTION, EXCEPTION, GENERATOR_EXIT, KEY_ERROR, RECURSION_ERROR,
        RUNTIME_ERROR, STOP_ITERATION, TYPE_ERROR, VALUE_ERROR,
    };

    /// `BaseException`.
    #[must_use]
    pub fn base_exception() -> &'static ExceptionType {
        &BASE_EXCEPTION
    }

    /// `Exception`.
    #[must_use]
    pub fn exception() -> &'static ExceptionType {
        &EXCEPTION
    }

    /// `GeneratorExit`.
    #[must_use]
    pub fn generator_exit() -> &'static ExceptionType {
        &GENERATOR_EXIT
    }

    /// `StopIteration`.
    #[must_use]
    pub fn stop_iteration() -> &'static ExceptionType {
        &STOP_ITERATION
    }

    /// `TypeError`.
    #[must_use]
    pub fn type_error() -> &'static ExceptionType {
        &TYPE_ERROR
    }

    /// `ValueError`.
    #[must_use]
    pub fn value_error() -> &'static ExceptionType {
        &VALUE_ERROR
    }

    /// `KeyError`.
    #[must_use]
    pub fn key_error() -> &'static ExceptionType {
        &KEY_ERROR
    }

    /// `RuntimeError`.
    #[must_use]
    pub fn runtime_error() -> &'static ExceptionType {
        &RUNTIME_ERROR
    }

    /// `RecursionError`.
    #[must_use]
    pub fn recursion_error() -> &'static ExceptionType {
        &RECURSION_ERROR
    }
}

/// [`Exception`] is a raised language-level exception: the `(type, value, traceback)` triple.
#[derive(Clone, Debug)]
pub struct Exception {
    exc_type: ExceptionType,
    value: Option<Value>,
    traceback: Option<Value>,
}

impl Exception {
    /// Creates an [`Exception`] of the given type without a value or traceback.
    #[inline]
    #[must_use]
    pub fn new(exc_type: ExceptionType) -> Self {
        Self {
            exc_type,
            value: None,
            traceback: None,
        }
    }

    /// Attaches an exception value.
    #[inline]
    #[must_use]
    pub fn with_value(mut self, value: Option<Value>) -> Self {
        self.value = value;
        self
    }

    /// Attaches a traceback.
    #[inline]
    #[must_use]
    pub fn with_traceback(mut self, traceback: Option<Value>) -> Self {
        self.traceback = traceback;
        self
    }

    /// Creates the exception delivered to a generator that is being closed.
    #[inline]
    #[must_use]
    pub fn generator_exit() -> Self {
        Self::new(builtins::generator_exit().clone())
    }

    /// Returns the exception type.
    #[inline]
    #[must_use]
    pub fn exc_type(&self) -> &ExceptionType {
        &self.exc_type
    }

    /// Returns the exception value.
    #[inline]
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Returns the traceback.
    #[inline]
    #[must_use]
    pub fn traceback(&self) -> Option<&Value> {
        self.traceback.as_ref()
    }

    /// Returns `true` if the exception is an instance of `exc_type` or one of its subclasses.
    #[inline]
    #[must_use]
    pub fn is_instance_of(&self, exc_type: &ExceptionType) -> bool {
        self.exc_type.is_subclass_of(exc_type)
    }
}

impl Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}: {value}", self.exc_type.name()),
            None => f.write_str(self.exc_type.name()),
        }
    }
}

/// [`Error`] is returned by every fallible operation of the crate.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// A key could not be hashed.
    #[error("TypeError: unhashable type: '{0}'")]
    Unhashable(String),

    /// A call received an argument of the wrong kind.
    #[error("TypeError: {0}")]
    TypeError(String),

    /// A key was not found.
    #[error("KeyError: {0}")]
    KeyError(Value),

    /// An iterator or generator has no more values.
    #[error("StopIteration")]
    StopIteration(Option<Value>),

    /// A generator was resumed while it was running.
    #[error("ValueError: generator already executing")]
    AlreadyExecuting,

    /// A generator yielded a value in response to `close`.
    #[error("RuntimeError: generator ignored GeneratorExit")]
    IgnoredExit,

    /// A dictionary was resized while it was being iterated.
    #[error("RuntimeError: dictionary changed size during iteration")]
    ChangedSize,

    /// Generators were nested deeper than the recursion limit of the thread.
    #[error("RecursionError: maximum recursion depth exceeded ({0})")]
    RecursionLimit(usize),

    /// A language-level exception raised by user code.
    #[error("{0}")]
    Raised(Exception),
}

impl Error {
    /// Returns the exception type corresponding to the error.
    #[must_use]
    pub fn exception_type(&self) -> &ExceptionType {
        match self {
            Self::Unhashable(_) | Self::TypeError(_) => builtins::type_error(),
            Self::KeyError(_) => builtins::key_error(),
            Self::StopIteration(_) => builtins::stop_iteration(),
            Self::AlreadyExecuting => builtins::value_error(),
            Self::IgnoredExit | Self::ChangedSize => builtins::runtime_error(),
            Self::RecursionLimit(_) => builtins::recursion_error(),
            Self::Raised(exception) => exception.exc_type(),
        }
    }

    /// Returns `true` if the error signals exhaustion.
    #[inline]
    #[must_use]
    pub fn is_stop_iteration(&self) -> bool {
        self.exception_type()
            .is_subclass_of(builtins::stop_iteration())
    }

    /// Returns `true` if the error is a `GeneratorExit`.
    #[inline]
    #[must_use]
    pub fn is_generator_exit(&self) -> bool {
        self.exception_type()
            .is_subclass_of(builtins::generator_exit())
    }

    /// Converts the error into a language-level [`Exception`].
    #[must_use]
    pub fn into_exception(self) -> Exception {
        match self {
            Self::Raised(exception) => exception,
            Self::KeyError(key) => {
                Exception::new(builtins::key_error().clone()).with_value(Some(key))
            }
            Self::StopIteration(value) => {
                Exception::new(builtins::stop_iteration().clone()).with_value(value)
            }
            other => {
                let message = other.to_string();
                let message = message
                    .split_once(": ")
                    .map_or(message.as_str(), |(_, m)| m)
                    .to_owned();
                Exception::new(other.exception_type().clone()).with_value(Some(message.into()))
            }
        }
    }
}

impl From<Exception> for Error {
    #[inline]
    fn from(exception: Exception) -> Self {
        Self::Raised(exception)
    }
}
