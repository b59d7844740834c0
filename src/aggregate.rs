//! Per-group accumulator storage keyed by the engine's aggregate context address.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{Error, ErrorCode, Result};

/// Type-erased accumulator owned by one aggregate group.
pub type Accumulator = Box<dyn Any + Send>;

/// Accumulator slot handed to step/inverse/value callbacks.
///
/// The map lock is not held while a slot is in use, so user code never blocks
/// lookups for other groups.
pub type Slot = Arc<Mutex<Accumulator>>;

/// Map from aggregate context address to accumulator.
pub struct AggregateStore {
    slots: RwLock<HashMap<usize, Slot>>,
    limit: Option<usize>,
}

impl AggregateStore {
    /// Store with an optional bound on simultaneously live groups.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            limit,
        }
    }

    /// Existing slot for `key`, or a new one built by `init`.
    pub fn get_or_create(&self, key: usize, init: impl FnOnce() -> Accumulator) -> Result<Slot> {
        if let Some(slot) = self.get(key) {
            return Ok(slot);
        }
        let mut slots = self.slots.write();
        if let Some(slot) = slots.get(&key) {
            return Ok(Arc::clone(slot));
        }
        if let Some(limit) = self.limit {
            if slots.len() >= limit {
                tracing::warn!(limit, "aggregate context limit reached");
                return Err(Error::with_message(
                    ErrorCode::NoMem,
                    format!("more than {limit} live aggregate groups"),
                ));
            }
        }
        let slot = Arc::new(Mutex::new(init()));
        slots.insert(key, Arc::clone(&slot));
        tracing::trace!(key, "installed aggregate slot");
        Ok(slot)
    }

    /// Slot for `key` if one was installed.
    pub fn get(&self, key: usize) -> Option<Slot> {
        self.slots.read().get(&key).cloned()
    }

    /// Evict the slot for `key`, returning its accumulator when present.
    pub fn remove(&self, key: usize) -> Option<Accumulator> {
        let slot = self.slots.write().remove(&key)?;
        tracing::trace!(key, "evicted aggregate slot");
        match Arc::try_unwrap(slot) {
            Ok(slot) => Some(slot.into_inner()),
            Err(shared) => Some(std::mem::replace(&mut *shared.lock(), Box::new(()))),
        }
    }

    /// Number of live groups.
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AggregateStore {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Drop for AggregateStore {
    fn drop(&mut self) {
        let live = self.slots.get_mut().len();
        if live > 0 {
            tracing::warn!(live, "aggregate groups never finalized");
        }
    }
}
