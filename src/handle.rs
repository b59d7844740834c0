//! Registry of values referenced from native structures by opaque handles.
//!
//! A [`Handle`] packs a slot index with the slot's generation, so a handle
//! released once can never alias a value saved later into the same slot.
//! Restoring or releasing a stale handle panics: callers inside `extern "C"`
//! trampolines turn that into a process abort instead of a read of freed
//! state.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

/// Opaque identity of one saved value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u64);

impl Handle {
    /// Handle that was never installed. Releasing it is a no-op.
    pub const NONE: Handle = Handle(0);

    fn new(index: u32, generation: u32) -> Self {
        Handle((u64::from(generation) << 32) | u64::from(index))
    }

    fn index(self) -> usize {
        (self.0 & 0xffff_ffff) as usize
    }

    fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn is_none(self) -> bool {
        self.generation() == 0
    }

    /// Machine-word form, suitable for storing in native memory.
    pub fn into_raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}#{})", self.index(), self.generation())
    }
}

type Shared = Arc<dyn Any + Send + Sync>;

struct Slot {
    generation: u32,
    value: Option<Shared>,
}

#[derive(Default)]
struct Slab {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

/// Concurrent handle table shared by every registration of one bridge.
#[derive(Default)]
pub struct HandleRegistry {
    inner: RwLock<Slab>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `value` to a fresh handle.
    pub fn save<T: Any + Send + Sync>(&self, value: T) -> Handle {
        self.save_arc(Arc::new(value))
    }

    pub fn save_arc<T: Any + Send + Sync>(&self, value: Arc<T>) -> Handle {
        let value: Shared = value;
        let mut slab = self.inner.write();
        let handle = match slab.free.pop() {
            Some(index) => {
                let slot = &mut slab.slots[index as usize];
                slot.value = Some(value);
                Handle::new(index, slot.generation)
            }
            None => {
                let index = u32::try_from(slab.slots.len())
                    .unwrap_or_else(|_| panic!("handle registry exhausted"));
                slab.slots.push(Slot {
                    generation: 1,
                    value: Some(value),
                });
                Handle::new(index, 1)
            }
        };
        slab.live += 1;
        tracing::trace!(?handle, ty = type_name::<T>(), "saved handle");
        handle
    }

    /// Shared reference to the value bound to `handle`.
    ///
    /// # Panics
    /// When `handle` was already released, was never saved here, or holds a
    /// value of another type.
    pub fn restore<T: Any + Send + Sync>(&self, handle: Handle) -> Arc<T> {
        self.lookup(handle)
            .downcast::<T>()
            .unwrap_or_else(|_| panic!("{handle:?} does not hold a {}", type_name::<T>()))
    }

    /// Like [`restore`](Self::restore), but a value of another type yields
    /// `None`. Used where the caller cannot know the stored type, such as
    /// pointer values read back from SQL.
    ///
    /// # Panics
    /// When `handle` was already released or was never saved here.
    pub fn try_restore<T: Any + Send + Sync>(&self, handle: Handle) -> Option<Arc<T>> {
        self.lookup(handle).downcast::<T>().ok()
    }

    fn lookup(&self, handle: Handle) -> Shared {
        let slab = self.inner.read();
        match slab.slots.get(handle.index()) {
            Some(Slot {
                generation,
                value: Some(value),
            }) if *generation == handle.generation() => Arc::clone(value),
            _ => panic!("{handle:?} restored after release"),
        }
    }

    /// Release the registry's share of the value bound to `handle`.
    ///
    /// [`Handle::NONE`] is accepted and ignored so partially built
    /// registrations can be unwound unconditionally.
    ///
    /// # Panics
    /// When `handle` was already released.
    pub fn unref(&self, handle: Handle) {
        if handle.is_none() {
            return;
        }
        let released = {
            let mut slab = self.inner.write();
            let index = handle.index();
            let released = match slab.slots.get_mut(index) {
                Some(slot) if slot.generation == handle.generation() && slot.value.is_some() => {
                    slot.generation = slot.generation.wrapping_add(1);
                    let value = slot.value.take();
                    // A wrapped generation would revive old handles; retire the slot.
                    let reusable = slot.generation != 0;
                    (value, reusable)
                }
                _ => panic!("{handle:?} released twice"),
            };
            if released.1 {
                slab.free.push(index as u32);
            }
            slab.live -= 1;
            released.0
        };
        tracing::trace!(?handle, "released handle");
        // Dropped outside the lock: destructors may re-enter the registry.
        drop(released);
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.inner.read().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("live", &self.len())
            .finish()
    }
}
