//! Locking modes.
//!
//! The table state always lives inside one of three cells, chosen from the
//! creation flags:
//!
//! | Mode              | Cell                 | Waiting          |
//! |-------------------|----------------------|------------------|
//! | [`LockMode::None`]  | `spin::RwLock`, try-only | never, panics on overlap with a writer |
//! | [`LockMode::Mutex`] | `std::sync::Mutex`   | parks the thread |
//! | [`LockMode::Spin`]  | `spin::Mutex`        | busy-waits       |
//!
//! Unlocked tables still go through a try-lock so that a caller who breaks
//! the "serialize mutations externally" contract gets a panic instead of a
//! data race. Readers never conflict with each other in that mode.

use std::ops::{Deref, DerefMut};
use std::sync::PoisonError;

/// How a table serializes access to its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    /// No lock; the caller serializes all operations.
    None,
    /// A sleeping mutex for ordinary thread context.
    Mutex,
    /// A spin lock that never parks, for short latency-critical sections.
    Spin,
}

pub(crate) enum Guarded<S> {
    Unserialized(spin::RwLock<S>),
    Mutex(std::sync::Mutex<S>),
    Spin(spin::Mutex<S>),
}

/// Exclusive access to the state.
pub(crate) enum StateGuard<'a, S> {
    Unserialized(spin::RwLockWriteGuard<'a, S>),
    Spin(spin::MutexGuard<'a, S>),
    Std(std::sync::MutexGuard<'a, S>),
}

/// Shared access to the state. Only the unlocked mode lets readers overlap.
pub(crate) enum StateRef<'a, S> {
    Unserialized(spin::RwLockReadGuard<'a, S>),
    Exclusive(StateGuard<'a, S>),
}

const OVERLAP: &str = "unlocked handle table used from two threads at once";

impl<S> Guarded<S> {
    pub(crate) fn new(mode: LockMode, state: S) -> Self {
        match mode {
            LockMode::None => Guarded::Unserialized(spin::RwLock::new(state)),
            LockMode::Mutex => Guarded::Mutex(std::sync::Mutex::new(state)),
            LockMode::Spin => Guarded::Spin(spin::Mutex::new(state)),
        }
    }

    pub(crate) fn mode(&self) -> LockMode {
        match self {
            Guarded::Unserialized(_) => LockMode::None,
            Guarded::Mutex(_) => LockMode::Mutex,
            Guarded::Spin(_) => LockMode::Spin,
        }
    }

    /// Acquires the state for mutation.
    ///
    /// # Panics
    ///
    /// Panics in [`LockMode::None`] if another thread is inside the table at
    /// the same time.
    #[inline]
    pub(crate) fn lock(&self) -> StateGuard<'_, S> {
        match self {
            Guarded::Unserialized(cell) => match cell.try_write() {
                Some(guard) => StateGuard::Unserialized(guard),
                None => panic!("{OVERLAP}"),
            },
            // A panicking retain callback poisons the mutex; the state itself
            // is only mutated after the callback returns, so it stays valid.
            Guarded::Mutex(mutex) => {
                StateGuard::Std(mutex.lock().unwrap_or_else(PoisonError::into_inner))
            }
            Guarded::Spin(spin) => StateGuard::Spin(spin.lock()),
        }
    }

    /// Acquires the state for reading.
    ///
    /// Locked modes take the lock exclusively, as [`lock`](Self::lock) does.
    ///
    /// # Panics
    ///
    /// Panics in [`LockMode::None`] if a mutating call is running at the same
    /// time.
    #[inline]
    pub(crate) fn read(&self) -> StateRef<'_, S> {
        match self {
            Guarded::Unserialized(cell) => match cell.try_read() {
                Some(guard) => StateRef::Unserialized(guard),
                None => panic!("{OVERLAP}"),
            },
            _ => StateRef::Exclusive(self.lock()),
        }
    }
}

impl<S> Deref for StateGuard<'_, S> {
    type Target = S;

    #[inline]
    fn deref(&self) -> &S {
        match self {
            StateGuard::Unserialized(guard) => guard,
            StateGuard::Spin(guard) => guard,
            StateGuard::Std(guard) => guard,
        }
    }
}

impl<S> DerefMut for StateGuard<'_, S> {
    #[inline]
    fn deref_mut(&mut self) -> &mut S {
        match self {
            StateGuard::Unserialized(guard) => guard,
            StateGuard::Spin(guard) => guard,
            StateGuard::Std(guard) => guard,
        }
    }
}

impl<S> Deref for StateRef<'_, S> {
    type Target = S;

    #[inline]
    fn deref(&self) -> &S {
        match self {
            StateRef::Unserialized(guard) => guard,
            StateRef::Exclusive(guard) => guard,
        }
    }
}
