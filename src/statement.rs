use core::ffi::{CStr, c_char};
use core::ptr::NonNull;
use std::any::Any;

use crate::Connection;
use crate::bridge::{POINTER_TYPE, Registration, release_registration};
use crate::error::{Error, ErrorCode, Result};
use crate::provider::{Sqlite3Api, StepResult, ValueType};
use crate::row::Row;
use crate::value::Value;

/// Prepared statement wrapper.
///
/// On a shared-cache lock conflict `step` and `reset` block until the engine
/// signals that the lock is gone, then retry.
pub struct Statement<'c, P: Sqlite3Api> {
    pub(crate) conn: &'c Connection<P>,
    pub(crate) stmt: NonNull<P::Stmt>,
}

impl<'c, P: Sqlite3Api> Statement<'c, P> {
    pub(crate) fn new(conn: &'c Connection<P>, stmt: NonNull<P::Stmt>) -> Self {
        Self { conn, stmt }
    }

    pub(crate) fn api(&self) -> &'static P {
        self.conn.api()
    }

    /// Reset the statement.
    pub fn reset(&mut self) -> Result<()> {
        loop {
            match unsafe { self.api().reset(self.stmt) } {
                Err(err) if err.is_locked_shared_cache() => self.wait_unlocked(err)?,
                other => return other,
            }
        }
    }

    /// Step the statement; returns `Some(Row)` while rows are available.
    ///
    /// After an error the statement has been reset.
    pub fn step(&mut self) -> Result<Option<Row<'_, 'c, P>>> {
        let api = self.api();
        loop {
            match unsafe { api.step(self.stmt) } {
                Ok(StepResult::Row) => return Ok(Some(Row::new(self))),
                Ok(StepResult::Done) => return Ok(None),
                Err(err) if err.is_locked_shared_cache() => {
                    if let Err(err) = self.wait_unlocked(err) {
                        let _ = unsafe { api.reset(self.stmt) };
                        return Err(err);
                    }
                    // A failed step leaves the statement unusable until reset.
                    let _ = unsafe { api.reset(self.stmt) };
                }
                Err(err) => {
                    let _ = unsafe { api.reset(self.stmt) };
                    return Err(err);
                }
            }
        }
    }

    /// Wait for the unlock notification. Without notification support the
    /// original lock error is returned.
    fn wait_unlocked(&self, locked: Error) -> Result<()> {
        match self.conn.wait_for_unlock() {
            Ok(()) => Ok(()),
            Err(err) if err.code == ErrorCode::FeatureUnavailable => Err(locked),
            Err(err) => Err(err),
        }
    }

    /// Bind NULL at parameter `idx`.
    pub fn bind_null(&mut self, idx: i32) -> Result<()> {
        unsafe { self.api().bind_null(self.stmt, idx) }
    }

    /// Bind integer at parameter `idx`.
    pub fn bind_int64(&mut self, idx: i32, value: i64) -> Result<()> {
        unsafe { self.api().bind_int64(self.stmt, idx, value) }
    }

    /// Bind double at parameter `idx`.
    pub fn bind_double(&mut self, idx: i32, value: f64) -> Result<()> {
        unsafe { self.api().bind_double(self.stmt, idx, value) }
    }

    /// Bind text at parameter `idx`.
    pub fn bind_text(&mut self, idx: i32, value: &str) -> Result<()> {
        unsafe { self.api().bind_text(self.stmt, idx, value) }
    }

    /// Bind blob at parameter `idx`.
    pub fn bind_blob(&mut self, idx: i32, value: &[u8]) -> Result<()> {
        unsafe { self.api().bind_blob(self.stmt, idx, value) }
    }

    /// Bind an owned value at parameter `idx`.
    pub fn bind_value(&mut self, idx: i32, value: &Value) -> Result<()> {
        match value {
            Value::Null => self.bind_null(idx),
            Value::Integer(v) => self.bind_int64(idx, *v),
            Value::Float(v) => self.bind_double(idx, *v),
            Value::Text(v) => self.bind_text(idx, v),
            Value::Blob(v) => self.bind_blob(idx, v),
        }
    }

    /// Bind `value` as a pointer value at parameter `idx`.
    ///
    /// SQL sees NULL; functions receiving the parameter read it back with
    /// [`Arg::pointer`](crate::Arg::pointer). The value is released when the
    /// binding is replaced or cleared, or the statement is finalized.
    pub fn bind_pointer<T: Any + Send + Sync>(&mut self, idx: i32, value: T) -> Result<()> {
        let ptr = Registration::install(&self.conn.bridge, value);
        unsafe {
            self.api()
                .bind_pointer(self.stmt, idx, ptr, POINTER_TYPE, Some(release_registration::<P>))
        }
    }

    /// Bind `value` at the parameter called `name`, prefix included
    /// (`:id`, `@id`, `$id`).
    pub fn bind_value_named(&mut self, name: &str, value: &Value) -> Result<()> {
        let idx = self.parameter_index(name).ok_or_else(|| {
            Error::with_message(ErrorCode::Range, format!("no parameter named '{name}'"))
        })?;
        self.bind_value(idx, value)
    }

    /// Reset every parameter to NULL.
    pub fn clear_bindings(&mut self) -> Result<()> {
        unsafe { self.api().clear_bindings(self.stmt) }
    }

    /// Largest parameter index in the statement.
    pub fn parameter_count(&self) -> i32 {
        unsafe { self.api().bind_parameter_count(self.stmt) }
    }

    /// Name of parameter `idx`; `None` for anonymous `?` parameters.
    pub fn parameter_name(&self, idx: i32) -> Option<&str> {
        unsafe { engine_str(self.api().bind_parameter_name(self.stmt, idx)) }
    }

    /// Index of the parameter called `name`.
    pub fn parameter_index(&self, name: &str) -> Option<i32> {
        let idx = unsafe { self.api().bind_parameter_index(self.stmt, name) };
        (idx > 0).then_some(idx)
    }

    /// Number of columns in the result set.
    pub fn column_count(&self) -> i32 {
        unsafe { self.api().column_count(self.stmt) }
    }

    /// Name of result column `col`.
    pub fn column_name(&self, col: i32) -> Option<&str> {
        unsafe { engine_str(self.api().column_name(self.stmt, col)) }
    }

    /// Index of the first result column called `name`, ignoring ASCII case.
    pub fn column_index(&self, name: &str) -> Option<i32> {
        (0..self.column_count()).find(|&col| {
            self.column_name(col)
                .is_some_and(|candidate| candidate.eq_ignore_ascii_case(name))
        })
    }

    /// Column type for the current row.
    pub fn column_type(&self, col: i32) -> ValueType {
        unsafe { self.api().column_type(self.stmt, col) }
    }

    /// Expose the raw statement handle.
    pub fn raw_handle(&self) -> NonNull<P::Stmt> {
        self.stmt
    }
}

/// Borrow an engine-owned C string; null or non-UTF-8 reads as `None`.
///
/// # Safety
/// `ptr` must be null or NUL-terminated and live for `'a`.
unsafe fn engine_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

impl<P: Sqlite3Api> Drop for Statement<'_, P> {
    fn drop(&mut self) {
        let _ = unsafe { self.api().finalize(self.stmt) };
    }
}
