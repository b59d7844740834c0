use core::ffi::c_void;
use core::ptr;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};

use parking_lot::Mutex;

use crate::context::panic_message;
use crate::error::{Error, Result};
use crate::provider::{ApiVersion, FeatureSet, Sqlite3Api, Sqlite3Hooks};

use super::core::Connection;

/// Run-time limit categories for [`Connection::limit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Limit {
    Length = 0,
    SqlLength = 1,
    Column = 2,
    ExprDepth = 3,
    CompoundSelect = 4,
    VdbeOp = 5,
    FunctionArg = 6,
    Attached = 7,
    LikePatternLength = 8,
    VariableNumber = 9,
    TriggerDepth = 10,
    WorkerThreads = 11,
}

impl Limit {
    pub fn id(self) -> i32 {
        self as i32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum HookKind {
    Commit,
    Rollback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct HookKey {
    db_addr: usize,
    kind: HookKind,
}

struct CommitState {
    cb: Box<dyn FnMut() -> bool + Send>,
}

struct RollbackState {
    cb: Box<dyn FnMut() + Send>,
}

/// Boxed hook closure. The box address is the context pointer the engine holds.
type HookState = Box<dyn Any + Send>;

/// Commit and rollback hook closures of every connection of one bridge.
#[derive(Default)]
pub(crate) struct HookTable {
    slots: Mutex<HashMap<HookKey, HookState>>,
}

impl HookTable {
    /// Drop every hook of a closed connection.
    pub(crate) fn forget(&self, db_addr: usize) {
        let released: Vec<HookState> = {
            let mut slots = self.slots.lock();
            [HookKind::Commit, HookKind::Rollback]
                .into_iter()
                .filter_map(|kind| slots.remove(&HookKey { db_addr, kind }))
                .collect()
        };
        if !released.is_empty() {
            tracing::debug!(hooks = released.len(), "released connection hooks");
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

extern "C" fn commit_trampoline(ctx: *mut c_void) -> i32 {
    let Some(state) = (unsafe { ctx.cast::<CommitState>().as_mut() }) else {
        return 0;
    };
    match catch_unwind(AssertUnwindSafe(|| (state.cb)())) {
        Ok(rollback) => i32::from(rollback),
        Err(payload) => {
            // Fail closed: a panicking hook turns the commit into a rollback.
            tracing::warn!(panic = %panic_message(&*payload), "commit hook panicked");
            1
        }
    }
}

extern "C" fn rollback_trampoline(ctx: *mut c_void) {
    let Some(state) = (unsafe { ctx.cast::<RollbackState>().as_mut() }) else {
        return;
    };
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| (state.cb)())) {
        tracing::warn!(panic = %panic_message(&*payload), "rollback hook panicked");
    }
}

impl<P: Sqlite3Hooks> Connection<P> {
    fn hook_key(&self, kind: HookKind) -> Result<HookKey> {
        if !self.api().feature_set().contains(FeatureSet::HOOKS) {
            return Err(Error::feature_unavailable("commit/rollback hooks unsupported"));
        }
        Ok(HookKey {
            db_addr: self.db_key(),
            kind,
        })
    }

    /// Install, replace or (with `None`) clear the commit hook.
    ///
    /// Returning `true` from the hook turns the commit into a rollback. The
    /// hook must not replace itself while running.
    pub fn set_commit_hook<F>(&self, hook: Option<F>) -> Result<()>
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let key = self.hook_key(HookKind::Commit)?;
        let api = self.api();
        let mut slots = self.bridge.hooks.slots.lock();
        let previous = match hook {
            Some(hook) => {
                let mut state = Box::new(CommitState { cb: Box::new(hook) });
                let ctx = ptr::from_mut(&mut *state).cast::<c_void>();
                unsafe { api.commit_hook(self.db, Some(commit_trampoline), ctx) };
                slots.insert(key, state)
            }
            None => {
                unsafe { api.commit_hook(self.db, None, ptr::null_mut()) };
                slots.remove(&key)
            }
        };
        drop(slots);
        tracing::debug!(replaced = previous.is_some(), "commit hook updated");
        Ok(())
    }

    /// Install, replace or (with `None`) clear the rollback hook.
    pub fn set_rollback_hook<F>(&self, hook: Option<F>) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        let key = self.hook_key(HookKind::Rollback)?;
        let api = self.api();
        let mut slots = self.bridge.hooks.slots.lock();
        let previous = match hook {
            Some(hook) => {
                let mut state = Box::new(RollbackState { cb: Box::new(hook) });
                let ctx = ptr::from_mut(&mut *state).cast::<c_void>();
                unsafe { api.rollback_hook(self.db, Some(rollback_trampoline), ctx) };
                slots.insert(key, state)
            }
            None => {
                unsafe { api.rollback_hook(self.db, None, ptr::null_mut()) };
                slots.remove(&key)
            }
        };
        drop(slots);
        tracing::debug!(replaced = previous.is_some(), "rollback hook updated");
        Ok(())
    }

    /// Remove both hooks from the engine and free their closures.
    ///
    /// Owned connections do this when they close. A borrowed connection never
    /// closes the database, so its hooks stay installed until this runs or the
    /// bridge drops.
    pub fn clear_hooks(&self) -> Result<()> {
        self.set_commit_hook(None::<fn() -> bool>)?;
        self.set_rollback_hook(None::<fn()>)
    }
}

impl<P: Sqlite3Api> Connection<P> {
    /// Current value of a run-time limit.
    pub fn limit(&self, limit: Limit) -> i32 {
        unsafe { self.api().limit(self.db, limit.id(), -1) }
    }

    /// Change a run-time limit, returning the previous value.
    pub fn set_limit(&self, limit: Limit, value: i32) -> i32 {
        let previous = unsafe { self.api().limit(self.db, limit.id(), value) };
        tracing::debug!(?limit, value, previous, "limit changed");
        previous
    }

    /// Whether the connection is outside an explicit transaction.
    pub fn autocommit(&self) -> bool {
        unsafe { self.api().get_autocommit(self.db) }
    }

    /// Version of the engine behind the provider.
    pub fn engine_version(&self) -> ApiVersion {
        self.api().api_version()
    }
}

#[cfg(test)]
mod tests {
    use super::{CommitState, Limit, RollbackState, commit_trampoline, rollback_trampoline};
    use core::ffi::c_void;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn limit_ids() {
        assert_eq!(Limit::Length.id(), 0);
        assert_eq!(Limit::VariableNumber.id(), 9);
        assert_eq!(Limit::WorkerThreads.id(), 11);
    }

    #[test]
    fn commit_hook_panic_requests_rollback() {
        let mut state = CommitState {
            cb: Box::new(|| panic!("veto")),
        };
        let ctx = core::ptr::from_mut(&mut state).cast::<c_void>();
        assert_eq!(commit_trampoline(ctx), 1);
        assert_eq!(commit_trampoline(core::ptr::null_mut()), 0);
    }

    #[test]
    fn rollback_hook_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut state = RollbackState {
            cb: Box::new(move || {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        };
        rollback_trampoline(core::ptr::from_mut(&mut state).cast());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
