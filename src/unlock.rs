//! Blocking wait for shared-cache lock release.

use core::ffi::c_void;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;

/// One connection's wake-up flag for `unlock_notify`.
///
/// The note is boxed and owned by its connection, so the address handed to
/// the engine stays put until the connection closes.
#[derive(Debug, Default)]
pub struct UnlockNote {
    fired: Mutex<bool>,
    cond: Condvar,
}

impl UnlockNote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the note fired and wake the waiter.
    pub fn fire(&self) {
        let mut fired = self.fired.lock();
        *fired = true;
        self.cond.notify_one();
    }

    pub fn is_fired(&self) -> bool {
        *self.fired.lock()
    }

    /// Clear the flag, arm the notification with `arm`, then block until
    /// [`fire`](Self::fire) runs.
    ///
    /// `arm` receives the note's address as the callback argument. When it
    /// fails nothing blocks and its error is returned. A notification fired
    /// between arming and waiting (including synchronously inside `arm`) is
    /// not lost.
    pub fn wait_with(&self, arm: impl FnOnce(*mut c_void) -> Result<()>) -> Result<()> {
        *self.fired.lock() = false;
        arm(self.as_arg())?;
        let mut fired = self.fired.lock();
        while !*fired {
            self.cond.wait(&mut fired);
        }
        Ok(())
    }

    pub(crate) fn as_arg(&self) -> *mut c_void {
        self as *const UnlockNote as *mut c_void
    }
}

/// Native unlock-notify callback: fires every note in `args`.
///
/// The engine batches all notes whose blocking connection finished into one
/// call.
pub extern "C" fn unlock_notify_callback(args: *mut *mut c_void, n_args: i32) {
    let n = usize::try_from(n_args).unwrap_or(0);
    if args.is_null() || n == 0 {
        return;
    }
    tracing::trace!(n, "unlock notification");
    for arg in unsafe { core::slice::from_raw_parts(args, n) } {
        if let Some(note) = unsafe { arg.cast::<UnlockNote>().as_ref() } {
            note.fire();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{UnlockNote, unlock_notify_callback};
    use crate::error::{Error, ErrorCode};
    use core::ffi::c_void;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn fire_before_wait_is_not_lost() {
        let note = UnlockNote::new();
        note.wait_with(|arg| {
            let mut args = [arg];
            unlock_notify_callback(args.as_mut_ptr(), 1);
            Ok(())
        })
        .unwrap();
        assert!(note.is_fired());
    }

    #[test]
    fn fire_from_another_thread_wakes_waiter() {
        let note = Arc::new(UnlockNote::new());
        let notifier = note.clone();
        note.wait_with(move |_| {
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                notifier.fire();
            });
            Ok(())
        })
        .unwrap();
        assert!(note.is_fired());
    }

    #[test]
    fn failed_arm_does_not_block() {
        let note = UnlockNote::new();
        let err = note
            .wait_with(|_| Err(Error::new(ErrorCode::Locked)))
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Locked);
        assert!(!note.is_fired());
    }

    #[test]
    fn callback_fires_each_note() {
        let a = UnlockNote::new();
        let b = UnlockNote::new();
        let mut args = [a.as_arg(), b.as_arg(), core::ptr::null_mut::<c_void>()];
        unlock_notify_callback(args.as_mut_ptr(), 3);
        assert!(a.is_fired() && b.is_fired());
    }
}
