//! [`Generator`] drives a suspendable body with send, throw and close.

use std::cell::{Cell, RefCell};
use std::fmt::{self, Debug};

use crate::exception_state;
use crate::exit_guard::ExitGuard;
use crate::{builtins, Error, Exception, ExceptionType, Value};

/// [`Continuation`] is the compiled body of a generator.
///
/// Each call to [`advance`](Continuation::advance) runs the body up to its next suspension
/// point: `Ok(Some(value))` yields `value`, `Ok(None)` finishes the body and `Err` raises out
/// of it. A body resumed after a yield must call [`Resumption::resume_value`] before anything
/// else to learn whether it was resumed with a value or with an exception.
pub trait Continuation {
    /// Runs the body up to the next suspension point.
    ///
    /// # Errors
    ///
    /// Returns the exception the body raised.
    fn advance(&mut self, resume: &Resumption<'_>) -> Result<Option<Value>, Error>;
}

/// A [`Continuation`] created by [`from_fn`].
pub struct FromFn<F>(F);

/// Creates a [`Continuation`] that calls `body` on every advance.
///
/// # Examples
///
/// ```
/// use rtcore::generator::from_fn;
/// use rtcore::{Generator, Value};
///
/// let mut n = 0;
/// let generator = Generator::new(from_fn(move |_| {
///     n += 1;
///     Ok((n <= 2).then(|| Value::from(n)))
/// }));
/// assert_eq!(generator.next_value().unwrap(), Value::from(1));
/// assert_eq!(generator.next_value().unwrap(), Value::from(2));
/// assert!(generator.next_value().unwrap_err().is_stop_iteration());
/// assert!(generator.is_closed());
/// ```
#[inline]
pub fn from_fn<F>(body: F) -> FromFn<F>
where
    F: FnMut(&Resumption<'_>) -> Result<Option<Value>, Error>,
{
    FromFn(body)
}

impl<F> Continuation for FromFn<F>
where
    F: FnMut(&Resumption<'_>) -> Result<Option<Value>, Error>,
{
    #[inline]
    fn advance(&mut self, resume: &Resumption<'_>) -> Result<Option<Value>, Error> {
        (self.0)(resume)
    }
}

/// [`Resumption`] is handed to the body each time it is resumed.
pub struct Resumption<'g> {
    generator: &'g Generator,
}

/// The lifecycle state of a [`Generator`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GeneratorState {
    /// The body has not run yet.
    NotStarted,
    /// The body is running.
    Running,
    /// The body is suspended at a yield.
    Suspended,
    /// The body finished, raised, or the generator was closed.
    Closed,
}

/// [`GeneratorOptions`] configures a [`Generator`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GeneratorOptions {
    /// Saves and restores the exception state of the thread around every step.
    ///
    /// Bodies without exception handlers cannot change that state and may turn this off.
    pub observes_exception_state: bool,
}

/// [`Generator`] implements the send, throw and close protocol over a [`Continuation`].
///
/// A generator is driven by a single call stack. Resuming it from within its own body fails
/// with [`Error::AlreadyExecuting`].
pub struct Generator {
    continuation: RefCell<Box<dyn Continuation>>,
    current: RefCell<Current>,
    pending: RefCell<Option<Pending>>,
    flags: Cell<u8>,
}

/// An iterator that steps a [`Generator`] until it is exhausted.
pub struct Iter<'g> {
    generator: &'g Generator,
}

enum Current {
    NotStarted,
    Yielded(Value),
    Finished,
}

enum Pending {
    Send(Value),
    Throw(Exception),
}

/// The body of a closed generator.
struct Exhausted;

const CLOSED: u8 = 1;
const ACTIVE: u8 = 1 << 1;
const OBSERVES_EXCEPTION_STATE: u8 = 1 << 2;

impl Resumption<'_> {
    /// Returns the value the generator was resumed with.
    ///
    /// `Ok(None)` means the generator was resumed without a value.
    ///
    /// # Errors
    ///
    /// Returns the exception passed to [`Generator::throw`]; the body should let it propagate
    /// unless it handles it.
    #[inline]
    pub fn resume_value(&self) -> Result<Option<Value>, Error> {
        match self.generator.pending.borrow_mut().take() {
            Some(Pending::Send(value)) => Ok(Some(value)),
            Some(Pending::Throw(exception)) => Err(Error::Raised(exception)),
            None => Ok(None),
        }
    }

    /// Returns the generator running the body.
    #[inline]
    #[must_use]
    pub fn generator(&self) -> &Generator {
        self.generator
    }
}

impl Generator {
    /// Creates a new [`Generator`] that observes the exception state.
    #[inline]
    pub fn new<C: Continuation + 'static>(continuation: C) -> Self {
        Self::with_options(continuation, GeneratorOptions::default())
    }

    /// Creates a new [`Generator`] with the supplied options.
    #[inline]
    pub fn with_options<C>(continuation: C, options: GeneratorOptions) -> Self
    where
        C: Continuation + 'static,
    {
        let flags = if options.observes_exception_state {
            OBSERVES_EXCEPTION_STATE
        } else {
            0
        };
        Self {
            continuation: RefCell::new(Box::new(continuation)),
            current: RefCell::new(Current::NotStarted),
            pending: RefCell::new(None),
            flags: Cell::new(flags),
        }
    }

    /// Returns the lifecycle state.
    #[inline]
    pub fn state(&self) -> GeneratorState {
        if self.has(CLOSED) {
            GeneratorState::Closed
        } else if self.has(ACTIVE) {
            GeneratorState::Running
        } else if matches!(*self.current.borrow(), Current::NotStarted) {
            GeneratorState::NotStarted
        } else {
            GeneratorState::Suspended
        }
    }

    /// Returns `true` if the generator is closed.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.has(CLOSED)
    }

    /// Returns the last yielded value while the generator is suspended.
    #[inline]
    pub fn current(&self) -> Option<Value> {
        match &*self.current.borrow() {
            Current::Yielded(value) => Some(value.clone()),
            Current::NotStarted | Current::Finished => None,
        }
    }

    /// Resumes the body once.
    ///
    /// Returns `true` if the body yielded and `false` if the generator is exhausted. A closed
    /// generator reports exhaustion without running the body.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyExecuting`] if called from within the body and
    /// [`Error::RecursionLimit`] if generators are nested too deeply; the generator stays open
    /// in both cases. Any other error was raised by the body, which closed the generator.
    pub fn step(&self) -> Result<bool, Error> {
        if self.has(CLOSED) {
            return Ok(false);
        }
        if self.has(ACTIVE) {
            return Err(Error::AlreadyExecuting);
        }
        let _depth = match exception_state::enter() {
            Ok(depth) => depth,
            Err(error) => {
                // Input staged by `send` or `throw` is not replayed by a later step.
                self.pending.borrow_mut().take();
                return Err(error);
            }
        };

        self.set(ACTIVE);
        let saved = self.has(OBSERVES_EXCEPTION_STATE).then(exception_state::save);
        let _scope = ExitGuard::new((self, saved), |(generator, saved)| {
            if let Some(token) = saved {
                exception_state::restore(token);
            }
            generator.pending.borrow_mut().take();
            generator.unset(ACTIVE);
        });

        let not_started = matches!(*self.current.borrow(), Current::NotStarted);
        let staged_throw = not_started && matches!(*self.pending.borrow(), Some(Pending::Throw(_)));
        let result = if staged_throw {
            Resumption { generator: self }.resume_value().map(|_| None)
        } else {
            self.continuation
                .borrow_mut()
                .advance(&Resumption { generator: self })
        };

        match result {
            Ok(Some(value)) => {
                *self.current.borrow_mut() = Current::Yielded(value);
                Ok(true)
            }
            Ok(None) => {
                self.finish();
                Ok(false)
            }
            Err(error) if error.is_stop_iteration() => {
                self.finish();
                Ok(false)
            }
            Err(error) => {
                log::trace!("generator body raised {error}");
                self.finish();
                Err(error)
            }
        }
    }

    /// Resumes the body and returns the yielded value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StopIteration`] if the generator is exhausted, or the error of
    /// [`step`](Self::step).
    #[inline]
    pub fn next_value(&self) -> Result<Value, Error> {
        if self.step()? {
            Ok(self.current().unwrap_or_default())
        } else {
            Err(Error::StopIteration(None))
        }
    }

    /// Resumes the body with `value` as the result of the suspended yield.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] without changing the generator if it has not started and
    /// `value` is not [`Value::None`]; otherwise the errors of [`next_value`](Self::next_value).
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::generator::from_fn;
    /// use rtcore::{Generator, Value};
    ///
    /// let generator = Generator::new(from_fn(|resume| {
    ///     Ok(Some(resume.resume_value()?.unwrap_or(Value::from(0))))
    /// }));
    /// assert!(generator.send(Value::from(1)).is_err());
    /// assert_eq!(generator.next_value().unwrap(), Value::from(0));
    /// assert_eq!(generator.send(Value::from(5)).unwrap(), Value::from(5));
    /// ```
    pub fn send(&self, value: Value) -> Result<Value, Error> {
        if self.state() == GeneratorState::NotStarted {
            if !value.is_none() {
                return Err(Error::TypeError(
                    "can't send non-None value to a just-started generator".to_owned(),
                ));
            }
        } else if !self.has(CLOSED) {
            self.stage(Pending::Send(value))?;
        }
        self.next_value()
    }

    /// Raises an exception of type `exc_type` at the suspended yield.
    ///
    /// Returns the value the body yields after handling the exception.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TypeError`] without changing the generator if `exc_type` is absent or
    /// not an exception type; otherwise the errors of [`throw_exception`](Self::throw_exception).
    pub fn throw(
        &self,
        exc_type: Option<&ExceptionType>,
        value: Option<Value>,
        traceback: Option<Value>,
    ) -> Result<Value, Error> {
        let Some(exc_type) = exc_type else {
            return Err(Error::TypeError(
                "throw expected at least 1 argument, got 0".to_owned(),
            ));
        };
        if !exc_type.is_subclass_of(builtins::base_exception()) {
            return Err(Error::TypeError(format!(
                "exceptions must derive from BaseException, not {}",
                exc_type.name()
            )));
        }
        self.throw_exception(
            Exception::new(exc_type.clone())
                .with_value(value)
                .with_traceback(traceback),
        )
    }

    /// Raises `exception` at the suspended yield.
    ///
    /// A generator that has not started closes and raises the exception without running the
    /// body.
    ///
    /// # Errors
    ///
    /// Returns the exception itself if the generator is closed or does not handle it,
    /// [`Error::StopIteration`] if the body finishes, or the errors of [`step`](Self::step).
    pub fn throw_exception(&self, exception: Exception) -> Result<Value, Error> {
        if self.has(CLOSED) {
            return Err(Error::Raised(exception));
        }
        self.stage(Pending::Throw(exception))?;
        self.next_value()
    }

    /// Closes the generator by raising `GeneratorExit` at the suspended yield.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IgnoredExit`] if the body yields instead of exiting, or any exception
    /// other than `GeneratorExit` and `StopIteration` that the body raises.
    ///
    /// # Examples
    ///
    /// ```
    /// use rtcore::generator::from_fn;
    /// use rtcore::{Generator, GeneratorState, Value};
    ///
    /// let generator = Generator::new(from_fn(|resume| {
    ///     resume.resume_value()?;
    ///     Ok(Some(Value::None))
    /// }));
    /// assert!(generator.next_value().is_ok());
    /// assert!(generator.close().is_ok());
    /// assert!(generator.close().is_ok());
    /// assert_eq!(generator.state(), GeneratorState::Closed);
    /// ```
    pub fn close(&self) -> Result<(), Error> {
        if self.has(CLOSED) {
            return Ok(());
        }
        match self.throw_exception(Exception::generator_exit()) {
            Ok(_) => Err(Error::IgnoredExit),
            Err(error) if error.is_stop_iteration() || error.is_generator_exit() => Ok(()),
            Err(error) => Err(error),
        }
    }

    /// Returns an iterator over the yielded values.
    ///
    /// The iterator stops when the generator is exhausted; an error is returned once and the
    /// iteration continues only if the generator is still open.
    #[inline]
    pub fn iter(&self) -> Iter<'_> {
        Iter { generator: self }
    }

    /// Stages input for the next step.
    fn stage(&self, pending: Pending) -> Result<(), Error> {
        if self.has(ACTIVE) {
            return Err(Error::AlreadyExecuting);
        }
        *self.pending.borrow_mut() = Some(pending);
        Ok(())
    }

    /// Marks the generator closed and releases the body.
    fn finish(&self) {
        self.set(CLOSED);
        *self.current.borrow_mut() = Current::Finished;
        *self.continuation.borrow_mut() = Box::new(Exhausted);
    }

    #[inline]
    fn has(&self, flag: u8) -> bool {
        self.flags.get() & flag != 0
    }

    #[inline]
    fn set(&self, flag: u8) {
        self.flags.set(self.flags.get() | flag);
    }

    #[inline]
    fn unset(&self, flag: u8) {
        self.flags.set(self.flags.get() & !flag);
    }
}

impl Debug for Generator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for Generator {
    fn drop(&mut self) {
        if self.has(CLOSED) {
            return;
        }
        if let Err(error) = self.close() {
            log::warn!("exception ignored while finalizing generator: {error}");
        }
    }
}

impl Default for GeneratorOptions {
    #[inline]
    fn default() -> Self {
        Self {
            observes_exception_state: true,
        }
    }
}

impl Continuation for Exhausted {
    #[inline]
    fn advance(&mut self, _: &Resumption<'_>) -> Result<Option<Value>, Error> {
        Ok(None)
    }
}

impl Iterator for Iter<'_> {
    type Item = Result<Value, Error>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match self.generator.step() {
            Ok(true) => Some(Ok(self.generator.current().unwrap_or_default())),
            Ok(false) => None,
            Err(error) => Some(Err(error)),
        }
    }
}

impl<'g> IntoIterator for &'g Generator {
    type Item = Result<Value, Error>;
    type IntoIter = Iter<'g>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
