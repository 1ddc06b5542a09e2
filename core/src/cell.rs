//! Shared current-value cell.
//!
//! Long-lived tasks (the socket reader, UI callbacks) must observe the view
//! state as it is now, not as it was when they were spawned. Everything that
//! needs `open` / active-thread reads it through a clone of the same cell, and
//! the engine writes it synchronously on every change.

use crate::models::ThreadKey;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct LiveCell<T> {
    inner: Arc<RwLock<T>>,
}

impl<T> Clone for LiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> LiveCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    pub fn set(&self, value: T) {
        *self.inner.write() = value;
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.write())
    }

    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.read())
    }
}

impl<T: Clone> LiveCell<T> {
    pub fn get(&self) -> T {
        self.inner.read().clone()
    }
}

/// What the user is currently looking at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ViewState {
    /// Widget expanded and visible.
    pub open: bool,
    pub active: Option<ThreadKey>,
}

impl ViewState {
    /// Thread selected AND visible; only then may messages count as read.
    pub fn is_reading(&self, key: &ThreadKey) -> bool {
        self.open && self.active.as_ref() == Some(key)
    }
}
