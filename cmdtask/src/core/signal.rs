//! Single-shot signal shared between threads.
//!
//! A [`Signal`] starts unsignaled and transitions to signaled exactly once.
//! It is used both as the caller-visible completion signal of a command task
//! and as the internal interrupt request raised by `cancel()`.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct Signal {
    set: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the signal as set and wake every waiter.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub fn set(&self) -> bool {
        let mut set = self.lock();
        if *set {
            return false;
        }
        *set = true;
        self.cond.notify_all();
        true
    }

    pub fn is_set(&self) -> bool {
        *self.lock()
    }

    /// Block until the signal is set.
    pub fn wait(&self) {
        let guard = self.lock();
        let _set = self
            .cond
            .wait_while(guard, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Block for at most `timeout`. Returns whether the signal is set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.lock();
        let (set, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |set| !*set)
            .unwrap_or_else(PoisonError::into_inner);
        *set
    }

    // A bool cannot be left half-written, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
