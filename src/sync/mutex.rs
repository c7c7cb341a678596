//! Mutex and condvar wrappers - use parking_lot if available, std otherwise.
//!
//! Both variants expose the parking_lot calling convention: `lock()` never
//! returns a poison error and `Condvar::wait_for` takes the guard by `&mut`.

use std::time::Duration;

#[cfg(feature = "parking_lot")]
pub use parking_lot::{Mutex, MutexGuard};

#[cfg(feature = "parking_lot")]
mod pl_condvar {
    use super::{Duration, MutexGuard};

    /// Condition variable paired with [`super::Mutex`].
    #[derive(Debug, Default)]
    pub struct Condvar(parking_lot::Condvar);

    impl Condvar {
        /// Create a new condition variable.
        pub const fn new() -> Self {
            Self(parking_lot::Condvar::new())
        }

        /// Block until notified or `timeout` elapses. Returns `true` on timeout.
        pub fn wait_for<T>(&self, guard: &mut MutexGuard<'_, T>, timeout: Duration) -> bool {
            self.0.wait_for(guard, timeout).timed_out()
        }

        /// Wake one waiter.
        pub fn notify_one(&self) {
            self.0.notify_one();
        }

        /// Wake every waiter.
        pub fn notify_all(&self) {
            self.0.notify_all();
        }
    }
}

#[cfg(feature = "parking_lot")]
pub use pl_condvar::Condvar;

#[cfg(not(feature = "parking_lot"))]
mod std_mutex {
    use std::sync::{Condvar as StdCondvar, Mutex as StdMutex, MutexGuard as StdMutexGuard};
    use std::time::Duration;

    /// Thin wrapper around std::sync::Mutex.
    #[derive(Debug, Default)]
    pub struct Mutex<T>(StdMutex<T>);

    impl<T> Mutex<T> {
        /// Create a new mutex.
        pub const fn new(value: T) -> Self {
            Self(StdMutex::new(value))
        }

        /// Lock the mutex.
        ///
        /// A poisoned lock means another thread panicked on a fatal
        /// diagnostic; the state behind it is still structurally valid, so
        /// the guard is recovered rather than turning one panic into many.
        pub fn lock(&self) -> MutexGuard<'_, T> {
            let guard = match self.0.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            MutexGuard(Some(guard))
        }

        /// Mutable access without locking.
        pub fn get_mut(&mut self) -> &mut T {
            match self.0.get_mut() {
                Ok(value) => value,
                Err(poisoned) => poisoned.into_inner(),
            }
        }
    }

    /// Guard for std mutex.
    ///
    /// The `Option` only goes empty for the duration of a condvar wait.
    pub struct MutexGuard<'a, T>(Option<StdMutexGuard<'a, T>>);

    impl<'a, T> std::ops::Deref for MutexGuard<'a, T> {
        type Target = T;

        fn deref(&self) -> &Self::Target {
            match self.0.as_deref() {
                Some(value) => value,
                None => unreachable!("guard taken during condvar wait"),
            }
        }
    }

    impl<'a, T> std::ops::DerefMut for MutexGuard<'a, T> {
        fn deref_mut(&mut self) -> &mut Self::Target {
            match self.0.as_deref_mut() {
                Some(value) => value,
                None => unreachable!("guard taken during condvar wait"),
            }
        }
    }

    /// Thin wrapper around std::sync::Condvar.
    #[derive(Debug, Default)]
    pub struct Condvar(StdCondvar);

    impl Condvar {
        /// Create a new condition variable.
        pub const fn new() -> Self {
            Self(StdCondvar::new())
        }

        /// Block until notified or `timeout` elapses. Returns `true` on timeout.
        pub fn wait_for<T>(&self, guard: &mut MutexGuard<'_, T>, timeout: Duration) -> bool {
            let inner = match guard.0.take() {
                Some(inner) => inner,
                None => unreachable!("guard taken during condvar wait"),
            };
            let (inner, result) = match self.0.wait_timeout(inner, timeout) {
                Ok(pair) => pair,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard.0 = Some(inner);
            result.timed_out()
        }

        /// Wake one waiter.
        pub fn notify_one(&self) {
            self.0.notify_one();
        }

        /// Wake every waiter.
        pub fn notify_all(&self) {
            self.0.notify_all();
        }
    }
}

#[cfg(not(feature = "parking_lot"))]
pub use std_mutex::{Condvar, Mutex, MutexGuard};

/// Wait on `condvar` in slices until `ready` holds or `timeout` is spent.
///
/// Returns `false` if the deadline passed without `ready` becoming true.
pub fn wait_until<T>(
    condvar: &Condvar,
    guard: &mut MutexGuard<'_, T>,
    timeout: Duration,
    mut ready: impl FnMut(&mut T) -> bool,
) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if ready(&mut **guard) {
            return true;
        }
        let now = std::time::Instant::now();
        if now >= deadline {
            return false;
        }
        condvar.wait_for(guard, deadline - now);
    }
}
