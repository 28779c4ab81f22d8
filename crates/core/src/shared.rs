//! Swappable shared handles.
//!
//! Long-lived components hold a [`Shared<T>`] instead of a direct `Arc<T>`.
//! Each unit of work takes a fresh snapshot with [`Shared::current`], and a
//! single [`Shared::replace`] call redirects every holder at once (used for
//! configuration reloads and for swapping the library store).

use std::sync::{Arc, PoisonError, RwLock};

pub struct Shared<T: ?Sized> {
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T: ?Sized> Shared<T> {
    /// Wrap an already shared value.
    pub fn from_arc(value: Arc<T>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    /// Snapshot of the current value.
    ///
    /// The snapshot stays valid after a later `replace`; callers should take
    /// a new one per cycle rather than caching it.
    pub fn current(&self) -> Arc<T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Atomically replace the value for all holders, returning the old one.
    pub fn replace(&self, value: Arc<T>) -> Arc<T> {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *guard, value)
    }
}

impl<T> Shared<T> {
    pub fn new(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }
}

impl<T: ?Sized> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared").finish_non_exhaustive()
    }
}
