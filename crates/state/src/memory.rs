//! In-memory state store for single-process harnesses and tests.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::Result;
use crate::{LifecycleState, StateStore};

/// State store holding the value in a shared cell.
///
/// Clones share the same cell. Every write is also appended to a history so
/// tests can assert on the sequence of transitions.
#[derive(Clone, Debug, Default)]
pub struct MemoryStateStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    current: Option<LifecycleState>,
    history: Vec<LifecycleState>,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `state`.
    #[must_use]
    pub fn with_state(state: LifecycleState) -> Self {
        let store = Self::new();
        store.inner.lock().current = Some(state);
        store
    }

    /// Every value written through [`StateStore::set`], oldest first.
    #[must_use]
    pub fn history(&self) -> Vec<LifecycleState> {
        self.inner.lock().history.clone()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self) -> Result<Option<LifecycleState>> {
        Ok(self.inner.lock().current)
    }

    fn set(&self, state: LifecycleState) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.current = Some(state);
        inner.history.push(state);
        Ok(())
    }
}
