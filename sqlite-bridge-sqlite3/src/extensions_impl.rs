use super::*;
use sqlite_bridge::Sqlite3Hooks;

#[allow(unsafe_op_in_unsafe_fn)]
unsafe impl Sqlite3Hooks for LibSqlite3 {
    unsafe fn commit_hook(
        &self,
        db: NonNull<Self::Db>,
        callback: Option<extern "C" fn(*mut c_void) -> i32>,
        context: *mut c_void,
    ) -> *mut c_void {
        match self.fns.commit_hook {
            Some(hook) => hook(db.as_ptr(), callback, context),
            None => null_mut(),
        }
    }

    unsafe fn rollback_hook(
        &self,
        db: NonNull<Self::Db>,
        callback: Option<extern "C" fn(*mut c_void)>,
        context: *mut c_void,
    ) -> *mut c_void {
        match self.fns.rollback_hook {
            Some(hook) => hook(db.as_ptr(), callback, context),
            None => null_mut(),
        }
    }
}
