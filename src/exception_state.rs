//! The exception being handled by the current thread and the generator nesting depth.
//!
//! Code running inside an exception handler publishes the handled exception with
//! [`set_current`]; code that suspends, such as a generator body, saves the state with [`save`]
//! and puts it back with [`restore`] so the handled exception of one frame does not leak into
//! the frame that resumes it.

use std::cell::{Cell, RefCell};

use crate::exit_guard::ExitGuard;
use crate::{Error, Exception};

/// The nesting depth at which generator steps fail with [`Error::RecursionLimit`] by default.
pub const DEFAULT_RECURSION_LIMIT: usize = 1000;

thread_local! {
    static CURRENT: RefCell<Option<Exception>> = const { RefCell::new(None) };
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static LIMIT: Cell<usize> = const { Cell::new(DEFAULT_RECURSION_LIMIT) };
}

/// A saved exception state.
#[derive(Debug)]
#[must_use]
pub struct ExceptionStateToken(Option<Exception>);

/// [`SavedExceptionState`] restores the exception state of the thread when dropped.
///
/// # Examples
///
/// ```
/// use rtcore::exception_state::{self, SavedExceptionState};
/// use rtcore::{builtins, Exception};
///
/// {
///     let _saved = SavedExceptionState::new();
///     exception_state::set_current(Exception::new(builtins::key_error().clone()));
///     assert!(exception_state::current().is_some());
/// }
/// assert!(exception_state::current().is_none());
/// ```
#[must_use]
pub struct SavedExceptionState {
    guard: ExitGuard<ExceptionStateToken, fn(ExceptionStateToken)>,
}

/// Returns the exception being handled by the current thread.
#[inline]
#[must_use]
pub fn current() -> Option<Exception> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Marks `exception` as being handled and returns the previous one.
#[inline]
pub fn set_current(exception: Exception) -> Option<Exception> {
    CURRENT.with(|current| current.borrow_mut().replace(exception))
}

/// Clears the exception being handled and returns it.
#[inline]
pub fn clear_current() -> Option<Exception> {
    CURRENT.with(|current| current.borrow_mut().take())
}

/// Captures the exception state of the current thread.
#[inline]
pub fn save() -> ExceptionStateToken {
    ExceptionStateToken(current())
}

/// Restores a state captured by [`save`].
#[inline]
pub fn restore(token: ExceptionStateToken) {
    CURRENT.with(|current| *current.borrow_mut() = token.0);
}

/// Returns the generator nesting limit of the current thread.
#[inline]
#[must_use]
pub fn recursion_limit() -> usize {
    LIMIT.with(Cell::get)
}

/// Sets the generator nesting limit of the current thread.
#[inline]
pub fn set_recursion_limit(limit: usize) {
    LIMIT.with(|l| l.set(limit));
}

/// Returns the number of generator steps running on the current thread.
#[inline]
#[must_use]
pub fn depth() -> usize {
    DEPTH.with(Cell::get)
}

/// Enters a nested generator step; the depth is decremented when the returned guard drops.
pub(crate) fn enter() -> Result<ExitGuard<(), fn(())>, Error> {
    let depth = depth();
    let limit = recursion_limit();
    if depth >= limit {
        return Err(Error::RecursionLimit(limit));
    }
    DEPTH.with(|d| d.set(depth + 1));
    Ok(ExitGuard::new((), leave as fn(_)))
}

fn leave(_: ()) {
    DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
}

impl SavedExceptionState {
    /// Saves the exception state of the current thread.
    #[inline]
    pub fn new() -> Self {
        Self {
            guard: ExitGuard::new(save(), restore as fn(_)),
        }
    }

    /// Keeps the current exception state and returns the saved one.
    #[inline]
    pub fn dismiss(self) -> ExceptionStateToken {
        self.guard.defuse().unwrap_or(ExceptionStateToken(None))
    }
}

impl Default for SavedExceptionState {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::{
        clear_current, current, depth, enter, recursion_limit, restore, save, set_current,
        set_recursion_limit, SavedExceptionState,
    };
    use crate::{builtins, Error, Exception};

    #[test]
    fn save_restore() {
        let token = save();
        assert!(set_current(Exception::new(builtins::value_error().clone())).is_none());
        let inner = save();
        assert!(clear_current().is_some());
        assert!(current().is_none());

        restore(inner);
        assert!(current().is_some_and(|e| e.is_instance_of(builtins::value_error())));
        restore(token);
        assert!(current().is_none());
    }

    #[test]
    fn dismiss() {
        let saved = SavedExceptionState::new();
        set_current(Exception::new(builtins::type_error().clone()));
        let token = saved.dismiss();
        assert!(current().is_some());
        restore(token);
        assert!(current().is_none());
    }

    #[test]
    fn nesting() {
        let limit = recursion_limit();
        set_recursion_limit(2);
        {
            let _outer = enter().unwrap();
            let _inner = enter().unwrap();
            assert_eq!(depth(), 2);
            assert!(matches!(enter(), Err(Error::RecursionLimit(2))));
        }
        assert_eq!(depth(), 0);
        set_recursion_limit(limit);
    }
}
