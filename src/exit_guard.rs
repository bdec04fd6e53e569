//! A scope guard that hands its captured state to a closure when the scope ends.

/// [`ExitGuard`] owns a value and passes it to `on_exit` when dropped, including during
/// unwinding, unless it is defused first.
pub(crate) struct ExitGuard<T, F: FnOnce(T)> {
    armed: Option<(T, F)>,
}

impl<T, F: FnOnce(T)> ExitGuard<T, F> {
    /// Creates a new [`ExitGuard`].
    #[inline]
    pub(crate) fn new(captured: T, on_exit: F) -> Self {
        Self {
            armed: Some((captured, on_exit)),
        }
    }

    /// Returns the captured value without running the closure.
    #[inline]
    pub(crate) fn defuse(mut self) -> Option<T> {
        self.armed.take().map(|(captured, _)| captured)
    }
}

impl<T, F: FnOnce(T)> Drop for ExitGuard<T, F> {
    #[inline]
    fn drop(&mut self) {
        if let Some((captured, on_exit)) = self.armed.take() {
            on_exit(captured);
        }
    }
}

#[cfg(test)]
mod test {
    use std::cell::Cell;

    use super::ExitGuard;

    #[test]
    fn runs_once() {
        let exits = Cell::new(0);
        {
            let _guard = ExitGuard::new(3, |n| exits.set(exits.get() + n));
        }
        assert_eq!(exits.get(), 3);

        let guard = ExitGuard::new(4, |n| exits.set(exits.get() + n));
        assert_eq!(guard.defuse(), Some(4));
        assert_eq!(exits.get(), 3);
    }

    #[test]
    fn unwinding() {
        let exits = Cell::new(false);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = ExitGuard::new((), |()| exits.set(true));
            panic!("unwind");
        }));
        assert!(result.is_err());
        assert!(exits.get());
    }
}
