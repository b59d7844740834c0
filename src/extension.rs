//! Named extension initializers run when the engine loads the library.

use core::ffi::{CStr, c_char};
use core::ptr::NonNull;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::connection::Connection;
use crate::error::{Error, ErrorCode, Result};
use crate::provider::{Sqlite3Api, engine_string};

/// Initializer registering functions, collations or modules on a connection.
pub type ExtensionInit<P> = dyn Fn(&Connection<P>) -> Result<()> + Send + Sync;

/// Name used by [`Bridge::register_default_extension`].
pub const DEFAULT_EXTENSION: &str = "default";

impl<P: Sqlite3Api> Bridge<P> {
    /// Register `init` under `name`, replacing any earlier initializer.
    pub fn register_extension<F>(&self, name: &str, init: F)
    where
        F: Fn(&Connection<P>) -> Result<()> + Send + Sync + 'static,
    {
        let previous = self
            .extensions
            .write()
            .insert(name.to_owned(), Arc::new(init));
        tracing::debug!(name, replaced = previous.is_some(), "extension registered");
    }

    pub fn register_default_extension<F>(&self, init: F)
    where
        F: Fn(&Connection<P>) -> Result<()> + Send + Sync + 'static,
    {
        self.register_extension(DEFAULT_EXTENSION, init)
    }

    /// Run the initializer registered as `name` against `db`.
    ///
    /// # Safety
    /// `db` must be a live connection of this bridge's backend for the whole call.
    pub unsafe fn init_extension(self: &Arc<Self>, name: &str, db: NonNull<P::Db>) -> Result<()> {
        // Cloned out so the initializer may register further extensions.
        let init = self.extensions.read().get(name).cloned();
        let Some(init) = init else {
            return Err(Error::with_message(
                ErrorCode::Error,
                format!("no extension with name '{name}' registered"),
            ));
        };
        tracing::debug!(name, "initializing extension");
        let conn = unsafe { Connection::from_raw(self, db) };
        init(&conn)
    }

    /// [`init_extension`](Self::init_extension) for a native loader: failures
    /// are written to `err_out` as an engine-allocated string and returned as
    /// a status code.
    ///
    /// # Safety
    /// `name` must be null or NUL-terminated, `db` null or a live connection,
    /// and `err_out` null or writable.
    pub unsafe fn init_extension_raw(
        self: &Arc<Self>,
        name: *const c_char,
        db: *mut P::Db,
        err_out: *mut *mut c_char,
    ) -> i32 {
        let out = match (name.is_null(), NonNull::new(db)) {
            (false, Some(db)) => match unsafe { CStr::from_ptr(name) }.to_str() {
                Ok(name) => unsafe { self.init_extension(name, db) },
                Err(err) => Err(err.into()),
            },
            _ => Err(Error::misuse("extension init without name or database")),
        };
        match out {
            Ok(()) => 0,
            Err(err) => {
                tracing::warn!(%err, "extension initialization failed");
                if !err_out.is_null() {
                    if let Ok(msg) = unsafe { engine_string(self.api(), &err.to_string()) } {
                        unsafe { *err_out = msg };
                    }
                }
                err.status()
            }
        }
    }
}
