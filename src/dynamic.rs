//! Live-updatable configuration handles.
//!
//! Readers take a cheap `Arc` snapshot; writers swap the whole value. A snapshot taken for one
//! admission check is never affected by a concurrent `set`.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// `DynamicConfig<T>` gives cheap reads and controlled updates for shared config.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    /// Create a new `DynamicConfig` with the given initial value.
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value (cheap clone of Arc).
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }

    /// Update via closure. The closure may run more than once under contention; the value it
    /// was last applied to is returned.
    pub fn update<F>(&self, f: F) -> Arc<T>
    where
        F: Fn(&T) -> T,
    {
        self.inner.rcu(|cur| f(cur.as_ref()))
    }
}

impl<T: Default> Default for DynamicConfig<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
