//! Virtual table modules.
//!
//! A module is registered once per connection through [`ModuleDef`]. Each
//! `CREATE VIRTUAL TABLE` (or eponymous use) then builds a table through
//! [`Module::connect`] or [`StatefulModule::create`], and each scan opens a
//! cursor from that table. Tables and cursors live in the bridge's handle
//! registry; the native structures only carry their handles.

mod glue;
mod index;

use core::ffi::c_void;
use core::marker::PhantomData;
use core::ptr::NonNull;
use std::sync::Arc;

use crate::bridge::Bridge;
use crate::connection::Connection;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::provider::{FeatureSet, Sqlite3Api, sqlite3_module};
use crate::value::Arg;

pub use index::{ConstraintOp, ConstraintUsage, IndexConstraint, IndexInfo, IndexPlan, OrderBy};

/// Factory attaching to a table's backing state.
pub trait Module<P: Sqlite3Api>: Send + Sync + 'static {
    type Table: VirtualTable<P>;

    /// Attach to (possibly pre-existing) backing state.
    ///
    /// `args` holds the module name, the database name, the table name and
    /// then the module arguments. The schema must be declared exactly once
    /// through `declare`.
    fn connect(&self, args: &[&str], declare: &mut Declare<'_, P>) -> Result<Self::Table>;
}

/// Module whose tables own backing state that `CREATE VIRTUAL TABLE` initializes.
pub trait StatefulModule<P: Sqlite3Api>: Module<P> {
    fn create(&self, args: &[&str], declare: &mut Declare<'_, P>) -> Result<Self::Table>;
}

/// One connected table instance.
pub trait VirtualTable<P: Sqlite3Api>: Send + 'static {
    type Cursor: VirtualCursor<P>;

    /// Pick a scan strategy for the planner's constraints.
    fn best_index(&self, info: &IndexInfo) -> Result<IndexPlan>;

    fn open(&mut self) -> Result<Self::Cursor>;

    /// Drop this connection's view. Backing state survives.
    fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Discard the backing state permanently.
    fn destroy(&mut self) -> Result<()> {
        self.disconnect()
    }
}

/// Scan over one table.
///
/// `eof` is polled after every `filter` and `next` and must reflect the
/// position reached by them.
pub trait VirtualCursor<P: Sqlite3Api>: Send + 'static {
    /// Restart the scan with the plan's index selector and bound values.
    fn filter(&mut self, idx_num: i32, idx_str: Option<&str>, args: &[Arg<'_, P>]) -> Result<()>;
    fn next(&mut self) -> Result<()>;
    fn eof(&self) -> bool;
    /// Write column `col` of the current row. Writing nothing yields NULL.
    fn column(&self, ctx: &Context<'_, P>, col: i32) -> Result<()>;
    fn rowid(&self) -> Result<i64>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Table accepting INSERT, UPDATE and DELETE.
///
/// `values` holds the new column values in declaration order.
pub trait WritableVirtualTable<P: Sqlite3Api>: VirtualTable<P> {
    /// Insert a row. `rowid` is NULL when the engine leaves the choice to the
    /// table. Returns the rowid of the new row.
    fn insert(&mut self, rowid: &Arg<'_, P>, values: &[Arg<'_, P>]) -> Result<i64>;
    /// Update the row identified by `key` in place.
    fn update(&mut self, key: &Arg<'_, P>, values: &[Arg<'_, P>]) -> Result<()>;
    /// Update that also moves the row from `old_key` to `new_key`.
    fn replace(
        &mut self,
        old_key: &Arg<'_, P>,
        new_key: &Arg<'_, P>,
        values: &[Arg<'_, P>],
    ) -> Result<()>;
    fn delete(&mut self, key: &Arg<'_, P>) -> Result<()>;
}

/// Table taking part in the engine's transactions.
pub trait TransactionalVirtualTable<P: Sqlite3Api>: VirtualTable<P> {
    fn begin(&mut self) -> Result<()>;
    /// First phase of a two-phase commit. Failure aborts the transaction.
    fn sync(&mut self) -> Result<()> {
        Ok(())
    }
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// Schema declaration handed to table factories.
pub struct Declare<'a, P: Sqlite3Api> {
    api: &'a P,
    db: NonNull<P::Db>,
    declared: bool,
}

impl<'a, P: Sqlite3Api> Declare<'a, P> {
    pub(crate) fn new(api: &'a P, db: NonNull<P::Db>) -> Self {
        Self {
            api,
            db,
            declared: false,
        }
    }

    /// Declare the table's columns as a `CREATE TABLE` statement.
    pub fn declare(&mut self, schema: &str) -> Result<()> {
        if self.declared {
            return Err(Error::misuse("virtual table schema declared twice"));
        }
        unsafe { self.api.declare_vtab(self.db, schema)? };
        tracing::trace!(schema, "declared virtual table schema");
        self.declared = true;
        Ok(())
    }

    pub fn is_declared(&self) -> bool {
        self.declared
    }
}

/// Registration recipe for a module.
///
/// Capabilities are opted into with the builder methods; each one checks at
/// compile time that the table type supports it.
pub struct ModuleDef<P: Sqlite3Api, M: Module<P>> {
    module: M,
    raw: sqlite3_module<P>,
    stateful: bool,
    eponymous_only: bool,
    transactional: bool,
    two_phase: bool,
    overloadable: bool,
    _provider: PhantomData<fn() -> P>,
}

impl<P: Sqlite3Api, M: Module<P>> ModuleDef<P, M> {
    /// Connect-only module: `CREATE VIRTUAL TABLE` also goes through `connect`.
    pub fn new(module: M) -> Self {
        let mut raw = glue::base_module::<P, M::Table>();
        raw.x_create = Some(glue::x_connect::<P, M>);
        raw.x_connect = Some(glue::x_connect::<P, M>);
        Self::build(module, raw, false)
    }

    fn build(module: M, raw: sqlite3_module<P>, stateful: bool) -> Self {
        Self {
            module,
            raw,
            stateful,
            eponymous_only: false,
            transactional: false,
            two_phase: false,
            overloadable: false,
            _provider: PhantomData,
        }
    }

    /// Usable only under the module's own name; `CREATE VIRTUAL TABLE` is refused.
    pub fn eponymous_only(mut self) -> Self {
        self.eponymous_only = true;
        self.raw.x_create = None;
        self
    }

    pub fn writable(mut self) -> Self
    where
        M::Table: WritableVirtualTable<P>,
    {
        self.raw.x_update = Some(glue::x_update::<P, M::Table>);
        self
    }

    pub fn transactional(mut self) -> Self
    where
        M::Table: TransactionalVirtualTable<P>,
    {
        self.transactional = true;
        self.raw.x_begin = Some(glue::x_begin::<P, M::Table>);
        self.raw.x_commit = Some(glue::x_commit::<P, M::Table>);
        self.raw.x_rollback = Some(glue::x_rollback::<P, M::Table>);
        self
    }

    /// Ask the engine to call [`TransactionalVirtualTable::sync`] before commit.
    pub fn two_phase_commit(mut self) -> Self
    where
        M::Table: TransactionalVirtualTable<P>,
    {
        self.two_phase = true;
        self.raw.x_sync = Some(glue::x_sync::<P, M::Table>);
        self
    }

    /// Request function overloading on the table's columns. Not supported yet;
    /// registration fails with a feature-unavailable error.
    pub fn overloadable(mut self) -> Self {
        self.overloadable = true;
        self
    }

    fn check(&self) -> Result<()> {
        if self.stateful && self.eponymous_only {
            return Err(Error::misuse("stateful module cannot be eponymous-only"));
        }
        if self.two_phase && !self.transactional {
            return Err(Error::misuse("two-phase commit requires a transactional module"));
        }
        if self.overloadable {
            return Err(Error::feature_unavailable(
                "virtual table function overloading unsupported",
            ));
        }
        Ok(())
    }
}

impl<P: Sqlite3Api, M: StatefulModule<P>> ModuleDef<P, M> {
    /// Module whose `CREATE VIRTUAL TABLE` runs [`StatefulModule::create`].
    pub fn stateful(module: M) -> Self {
        let mut raw = glue::base_module::<P, M::Table>();
        raw.x_create = Some(glue::x_create::<P, M>);
        raw.x_connect = Some(glue::x_connect::<P, M>);
        Self::build(module, raw, true)
    }
}

/// Module user data: the native callback table plus the module object.
struct ModuleRecord<P: Sqlite3Api> {
    raw: sqlite3_module<P>,
    bridge: Arc<Bridge<P>>,
    handle: Handle,
}

extern "C" fn release_module<P: Sqlite3Api>(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let record = unsafe { Box::from_raw(ptr.cast::<ModuleRecord<P>>()) };
    tracing::debug!(handle = ?record.handle, "module released");
    record.bridge.handles().unref(record.handle);
}

impl<P: Sqlite3Api> Connection<P> {
    /// Register a virtual table module under `name`.
    pub fn create_module<M: Module<P>>(&self, name: &str, def: ModuleDef<P, M>) -> Result<()> {
        let api = self.api();
        if !api.feature_set().contains(FeatureSet::VIRTUAL_TABLES) {
            return Err(Error::feature_unavailable("virtual tables unsupported"));
        }
        def.check()?;
        tracing::debug!(
            name,
            stateful = def.stateful,
            eponymous_only = def.eponymous_only,
            writable = def.raw.x_update.is_some(),
            transactional = def.transactional,
            "registering module"
        );
        let handle = self.bridge.handles().save(def.module);
        let record = Box::into_raw(Box::new(ModuleRecord {
            raw: def.raw,
            bridge: Arc::clone(&self.bridge),
            handle,
        }));
        unsafe {
            api.create_module_v2(
                self.db,
                name,
                &(*record).raw,
                record.cast(),
                Some(release_module::<P>),
            )
        }
    }
}
