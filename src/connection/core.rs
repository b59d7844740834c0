use core::ptr::{self, NonNull};
use std::cell::OnceCell;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::error::{Error, Result};
use crate::provider::{FeatureSet, OpenOptions, Sqlite3Api};
use crate::statement::Statement;
use crate::unlock::{UnlockNote, unlock_notify_callback};

/// Safe wrapper around a `sqlite3*` connection.
///
/// A connection opened through [`Connection::open`] is closed on drop. One
/// wrapped with [`Connection::from_raw`] borrows a handle the engine owns, as
/// inside an extension initializer.
pub struct Connection<P: Sqlite3Api> {
    pub(crate) bridge: Arc<Bridge<P>>,
    pub(crate) db: NonNull<P::Db>,
    owned: bool,
    unlock: OnceCell<Box<UnlockNote>>,
}

impl<P: Sqlite3Api> Connection<P> {
    /// Open a connection using the provider SPI.
    pub fn open(bridge: &Arc<Bridge<P>>, filename: &str, options: OpenOptions<'_>) -> Result<Self> {
        let db = unsafe { bridge.api().open(filename, options)? };
        tracing::debug!(filename, flags = ?options.flags, "connection opened");
        Ok(Self::wrap(bridge, db, true))
    }

    /// Borrow an engine-owned handle. The handle is not closed on drop.
    ///
    /// Hooks set through a borrowed connection outlive it; call
    /// [`clear_hooks`](Connection::clear_hooks) before the engine closes the
    /// database.
    ///
    /// # Safety
    /// `db` must be a live connection of the bridge's backend and outlive the
    /// returned wrapper.
    pub unsafe fn from_raw(bridge: &Arc<Bridge<P>>, db: NonNull<P::Db>) -> Self {
        Self::wrap(bridge, db, false)
    }

    fn wrap(bridge: &Arc<Bridge<P>>, db: NonNull<P::Db>, owned: bool) -> Self {
        Self {
            bridge: Arc::clone(bridge),
            db,
            owned,
            unlock: OnceCell::new(),
        }
    }

    pub fn api(&self) -> &'static P {
        self.bridge.api()
    }

    pub fn bridge(&self) -> &Arc<Bridge<P>> {
        &self.bridge
    }

    /// Prepare a statement, using prepare_v3 when available.
    pub fn prepare(&self, sql: &str) -> Result<Statement<'_, P>> {
        let api = self.api();
        let stmt = unsafe {
            if api.feature_set().contains(FeatureSet::PREPARE_V3) {
                api.prepare_v3(self.db, sql, 0)?
            } else {
                api.prepare_v2(self.db, sql)?
            }
        };
        Ok(Statement::new(self, stmt))
    }

    /// Prepare a statement with flags (requires prepare_v3 support).
    pub fn prepare_with_flags(&self, sql: &str, flags: u32) -> Result<Statement<'_, P>> {
        let api = self.api();
        if !api.feature_set().contains(FeatureSet::PREPARE_V3) {
            return Err(Error::feature_unavailable("prepare_v3 unsupported"));
        }
        let stmt = unsafe { api.prepare_v3(self.db, sql, flags)? };
        Ok(Statement::new(self, stmt))
    }

    /// Run a single statement to completion, discarding rows.
    pub fn execute(&self, sql: &str) -> Result<()> {
        let mut stmt = self.prepare(sql)?;
        while stmt.step()?.is_some() {}
        Ok(())
    }

    /// Rowid of the most recent successful insert on this connection.
    pub fn last_insert_rowid(&self) -> i64 {
        unsafe { self.api().last_insert_rowid(self.db) }
    }

    /// Rows changed by the most recently completed statement.
    pub fn changes(&self) -> i32 {
        unsafe { self.api().changes(self.db) }
    }

    /// Expose the raw database handle.
    pub fn raw_handle(&self) -> NonNull<P::Db> {
        self.db
    }

    pub(crate) fn db_key(&self) -> usize {
        self.db.as_ptr() as usize
    }

    /// Block until the engine reports that the shared-cache lock blocking
    /// this connection was released.
    pub(crate) fn wait_for_unlock(&self) -> Result<()> {
        let api = self.api();
        if !api.feature_set().contains(FeatureSet::UNLOCK_NOTIFY) {
            return Err(Error::feature_unavailable("unlock_notify unsupported"));
        }
        let note = self.unlock.get_or_init(|| Box::new(UnlockNote::new()));
        tracing::debug!("waiting for shared-cache unlock");
        note.wait_with(|arg| unsafe { api.unlock_notify(self.db, Some(unlock_notify_callback), arg) })?;
        tracing::trace!("shared-cache unlock received");
        Ok(())
    }
}

impl<P: Sqlite3Api> Drop for Connection<P> {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        let api = self.api();
        if self.unlock.get().is_some() {
            let _ = unsafe { api.unlock_notify(self.db, None, ptr::null_mut()) };
        }
        match unsafe { api.close(self.db) } {
            Ok(()) => {
                self.bridge.hooks.forget(self.db_key());
                tracing::debug!("connection closed");
            }
            Err(err) => {
                // Hook state stays registered; the engine may still call it.
                tracing::warn!(%err, "connection close failed");
            }
        }
    }
}
