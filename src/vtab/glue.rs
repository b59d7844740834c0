use core::ffi::{CStr, c_char, c_void};
use core::ptr::{self, NonNull};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{
    Declare, IndexInfo, Module, ModuleRecord, StatefulModule, TransactionalVirtualTable,
    VirtualCursor, VirtualTable, WritableVirtualTable,
};
use crate::bridge::Bridge;
use crate::context::{Context, args_from_raw, panic_message};
use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::provider::{
    Sqlite3Api, engine_string, sqlite3_index_info, sqlite3_module, sqlite3_vtab, sqlite3_vtab_cursor,
};

const SQLITE_ERROR: i32 = 1;
const SQLITE_MISUSE: i32 = 21;

/// Native table object. `base` must stay first: the engine only sees it.
#[repr(C)]
struct TableBox<P: Sqlite3Api> {
    base: sqlite3_vtab,
    bridge: Arc<Bridge<P>>,
    handle: Handle,
    in_txn: bool,
}

impl<P: Sqlite3Api> TableBox<P> {
    fn state<T: Any + Send + Sync>(&self) -> Arc<T> {
        self.bridge.handles().restore(self.handle)
    }

    /// Store `err` in the engine-owned message slot and return its status.
    fn report(&mut self, what: &'static str, out: Result<()>) -> i32 {
        let Err(err) = out else {
            return 0;
        };
        tracing::debug!(%err, what, "virtual table operation failed");
        let api = self.bridge.api();
        unsafe {
            if !self.base.z_err_msg.is_null() {
                api.free(self.base.z_err_msg.cast());
                self.base.z_err_msg = ptr::null_mut();
            }
            if let Ok(msg) = engine_string(api, &err.to_string()) {
                self.base.z_err_msg = msg;
            }
        }
        err.status()
    }
}

#[repr(C)]
struct CursorBox {
    base: sqlite3_vtab_cursor,
    handle: Handle,
}

fn table_box<'a, P: Sqlite3Api>(vtab: *mut sqlite3_vtab) -> Option<&'a mut TableBox<P>> {
    unsafe { vtab.cast::<TableBox<P>>().as_mut() }
}

fn cursor_parts<'a, P: Sqlite3Api>(
    cursor: *mut sqlite3_vtab_cursor,
) -> Option<(&'a mut TableBox<P>, Handle)> {
    let cursor = unsafe { cursor.cast::<CursorBox>().as_ref() }?;
    Some((table_box::<P>(cursor.base.p_vtab)?, cursor.handle))
}

fn guard<R>(what: &'static str, f: impl FnOnce() -> Result<R>) -> Result<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(out) => out,
        Err(payload) => {
            let msg = panic_message(&*payload);
            tracing::warn!(what, panic = %msg, "virtual table handler panicked");
            Err(Error::with_message(
                crate::error::ErrorCode::Error,
                format!("panic in {what}: {msg}"),
            ))
        }
    }
}

unsafe fn opt_cstr<'a>(ptr: *const c_char) -> Result<Option<&'a str>> {
    if ptr.is_null() {
        return Ok(None);
    }
    Ok(Some(unsafe { CStr::from_ptr(ptr) }.to_str()?))
}

unsafe fn factory_args<'a>(argc: i32, argv: *const *const c_char) -> Result<Vec<&'a str>> {
    let argc = usize::try_from(argc).unwrap_or(0);
    if argc == 0 || argv.is_null() {
        return Ok(Vec::new());
    }
    unsafe { core::slice::from_raw_parts(argv, argc) }
        .iter()
        .map(|arg| unsafe { opt_cstr(*arg) }.map(Option::unwrap_or_default))
        .collect()
}

/// Callbacks every module has, whatever its capabilities.
pub(super) fn base_module<P: Sqlite3Api, T: VirtualTable<P>>() -> sqlite3_module<P> {
    sqlite3_module {
        x_best_index: Some(x_best_index::<P, T>),
        x_disconnect: Some(x_disconnect::<P, T>),
        x_destroy: Some(x_destroy::<P, T>),
        x_open: Some(x_open::<P, T>),
        x_close: Some(x_close::<P, T>),
        x_filter: Some(x_filter::<P, T>),
        x_next: Some(x_next::<P, T>),
        x_eof: Some(x_eof::<P, T>),
        x_column: Some(x_column::<P, T>),
        x_rowid: Some(x_rowid::<P, T>),
        ..sqlite3_module::empty()
    }
}

pub(super) extern "C" fn x_connect<P: Sqlite3Api, M: Module<P>>(
    db: *mut P::Db,
    aux: *mut c_void,
    argc: i32,
    argv: *const *const c_char,
    pp_vtab: *mut *mut sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> i32 {
    factory::<P, M>(db, aux, argc, argv, pp_vtab, pz_err, "connect", |module, args, declare| {
        module.connect(args, declare)
    })
}

pub(super) extern "C" fn x_create<P: Sqlite3Api, M: StatefulModule<P>>(
    db: *mut P::Db,
    aux: *mut c_void,
    argc: i32,
    argv: *const *const c_char,
    pp_vtab: *mut *mut sqlite3_vtab,
    pz_err: *mut *mut c_char,
) -> i32 {
    factory::<P, M>(db, aux, argc, argv, pp_vtab, pz_err, "create", |module, args, declare| {
        module.create(args, declare)
    })
}

#[allow(clippy::too_many_arguments)]
fn factory<P: Sqlite3Api, M: Module<P>>(
    db: *mut P::Db,
    aux: *mut c_void,
    argc: i32,
    argv: *const *const c_char,
    pp_vtab: *mut *mut sqlite3_vtab,
    pz_err: *mut *mut c_char,
    what: &'static str,
    build: impl FnOnce(&M, &[&str], &mut Declare<'_, P>) -> Result<M::Table>,
) -> i32 {
    let record = unsafe { aux.cast::<ModuleRecord<P>>().as_ref() };
    let (Some(db), Some(record)) = (NonNull::new(db), record) else {
        return SQLITE_MISUSE;
    };
    if pp_vtab.is_null() {
        return SQLITE_MISUSE;
    }
    let bridge = &record.bridge;
    let api = bridge.api();
    let out = guard(what, || {
        let module = bridge.handles().restore::<M>(record.handle);
        let args = unsafe { factory_args(argc, argv)? };
        tracing::trace!(what, ?args, "virtual table factory");
        let mut declare = Declare::new(api, db);
        let table = build(&module, &args, &mut declare)?;
        if !declare.is_declared() {
            return Err(Error::misuse(format!(
                "virtual table {what} finished without declaring a schema"
            )));
        }
        Ok(table)
    });
    match out {
        Ok(table) => {
            let handle = bridge.handles().save(Mutex::new(table));
            let table = Box::new(TableBox {
                base: sqlite3_vtab {
                    p_module: ptr::null(),
                    n_ref: 0,
                    z_err_msg: ptr::null_mut(),
                },
                bridge: Arc::clone(bridge),
                handle,
                in_txn: false,
            });
            tracing::debug!(?handle, what, "virtual table attached");
            unsafe { *pp_vtab = Box::into_raw(table).cast() };
            0
        }
        Err(err) => {
            tracing::debug!(%err, what, "virtual table factory failed");
            if !pz_err.is_null() {
                if let Ok(msg) = unsafe { engine_string(api, &err.to_string()) } {
                    unsafe { *pz_err = msg };
                }
            }
            err.status()
        }
    }
}

extern "C" fn x_best_index<P: Sqlite3Api, T: VirtualTable<P>>(
    vtab: *mut sqlite3_vtab,
    info: *mut sqlite3_index_info,
) -> i32 {
    let (Some(table), Some(raw)) = (table_box::<P>(vtab), unsafe { info.as_mut() }) else {
        return SQLITE_MISUSE;
    };
    let api = table.bridge.api();
    let version = api.api_version();
    let state = table.state::<Mutex<T>>();
    let out = guard("best_index", || {
        let input = unsafe { IndexInfo::from_raw(raw, version) };
        let plan = state.lock().best_index(&input)?;
        tracing::trace!(?input, ?plan, "best_index");
        unsafe { plan.write(api, raw, version) }
    });
    table.report("best_index", out)
}

/// Run a teardown callback and release the table.
///
/// With `keep_on_error` a failed callback leaves the table attached: the
/// engine keeps the pointer and disconnects it later, which is then the only
/// release.
fn teardown<P: Sqlite3Api, T: VirtualTable<P>>(
    vtab: *mut sqlite3_vtab,
    what: &'static str,
    keep_on_error: bool,
    op: impl FnOnce(&mut T) -> Result<()>,
) -> i32 {
    let Some(table) = table_box::<P>(vtab) else {
        return 0;
    };
    let state = table.state::<Mutex<T>>();
    let out = guard(what, || op(&mut *state.lock()));
    drop(state);
    if keep_on_error && out.is_err() {
        tracing::warn!(handle = ?table.handle, what, "virtual table teardown failed, table kept");
        return table.report(what, out);
    }
    let table = unsafe { Box::from_raw(vtab.cast::<TableBox<P>>()) };
    table.bridge.handles().unref(table.handle);
    if !table.base.z_err_msg.is_null() {
        unsafe { table.bridge.api().free(table.base.z_err_msg.cast()) };
    }
    tracing::debug!(handle = ?table.handle, what, "virtual table released");
    match out {
        Ok(()) => 0,
        Err(err) => {
            tracing::warn!(%err, what, "virtual table teardown failed");
            err.status()
        }
    }
}

extern "C" fn x_disconnect<P: Sqlite3Api, T: VirtualTable<P>>(vtab: *mut sqlite3_vtab) -> i32 {
    // The engine drops the table whatever disconnect returns.
    teardown::<P, T>(vtab, "disconnect", false, |table| table.disconnect())
}

extern "C" fn x_destroy<P: Sqlite3Api, T: VirtualTable<P>>(vtab: *mut sqlite3_vtab) -> i32 {
    teardown::<P, T>(vtab, "destroy", true, |table| table.destroy())
}

extern "C" fn x_open<P: Sqlite3Api, T: VirtualTable<P>>(
    vtab: *mut sqlite3_vtab,
    pp_cursor: *mut *mut sqlite3_vtab_cursor,
) -> i32 {
    let Some(table) = table_box::<P>(vtab) else {
        return SQLITE_MISUSE;
    };
    if pp_cursor.is_null() {
        return SQLITE_MISUSE;
    }
    let state = table.state::<Mutex<T>>();
    match guard("open", || state.lock().open()) {
        Ok(cursor) => {
            let handle = table.bridge.handles().save(Mutex::new(cursor));
            let cursor = Box::new(CursorBox {
                base: sqlite3_vtab_cursor { p_vtab: vtab },
                handle,
            });
            tracing::trace!(?handle, "cursor opened");
            unsafe { *pp_cursor = Box::into_raw(cursor).cast() };
            0
        }
        Err(err) => table.report("open", Err(err)),
    }
}

extern "C" fn x_close<P: Sqlite3Api, T: VirtualTable<P>>(cursor: *mut sqlite3_vtab_cursor) -> i32 {
    if cursor.is_null() {
        return 0;
    }
    let cursor = unsafe { Box::from_raw(cursor.cast::<CursorBox>()) };
    let Some(table) = table_box::<P>(cursor.base.p_vtab) else {
        tracing::warn!(handle = ?cursor.handle, "cursor closed without its table");
        return SQLITE_MISUSE;
    };
    let state = table.bridge.handles().restore::<Mutex<T::Cursor>>(cursor.handle);
    let out = guard("close", || state.lock().close());
    drop(state);
    table.bridge.handles().unref(cursor.handle);
    tracing::trace!(handle = ?cursor.handle, "cursor closed");
    table.report("close", out)
}

fn with_cursor<P: Sqlite3Api, T: VirtualTable<P>>(
    cursor: *mut sqlite3_vtab_cursor,
    what: &'static str,
    op: impl FnOnce(&'static P, &mut T::Cursor) -> Result<()>,
) -> i32 {
    let Some((table, handle)) = cursor_parts::<P>(cursor) else {
        return SQLITE_MISUSE;
    };
    let api = table.bridge.api();
    let state = table.bridge.handles().restore::<Mutex<T::Cursor>>(handle);
    let out = guard(what, || op(api, &mut *state.lock()));
    table.report(what, out)
}

extern "C" fn x_filter<P: Sqlite3Api, T: VirtualTable<P>>(
    cursor: *mut sqlite3_vtab_cursor,
    idx_num: i32,
    idx_str: *const c_char,
    argc: i32,
    argv: *mut *mut P::Value,
) -> i32 {
    with_cursor::<P, T>(cursor, "filter", |api, cursor| {
        let idx_str = unsafe { opt_cstr(idx_str)? };
        let args = unsafe { args_from_raw(api, argc, argv)? };
        cursor.filter(idx_num, idx_str, args.as_slice())
    })
}

extern "C" fn x_next<P: Sqlite3Api, T: VirtualTable<P>>(cursor: *mut sqlite3_vtab_cursor) -> i32 {
    with_cursor::<P, T>(cursor, "next", |_, cursor| cursor.next())
}

extern "C" fn x_eof<P: Sqlite3Api, T: VirtualTable<P>>(cursor: *mut sqlite3_vtab_cursor) -> i32 {
    let Some((table, handle)) = cursor_parts::<P>(cursor) else {
        return 1;
    };
    let state = table.bridge.handles().restore::<Mutex<T::Cursor>>(handle);
    match guard("eof", || Ok(state.lock().eof())) {
        Ok(eof) => i32::from(eof),
        // A panicking cursor ends the scan.
        Err(_) => 1,
    }
}

extern "C" fn x_column<P: Sqlite3Api, T: VirtualTable<P>>(
    cursor: *mut sqlite3_vtab_cursor,
    ctx: *mut P::Context,
    col: i32,
) -> i32 {
    let (Some((table, handle)), Some(ctx)) = (cursor_parts::<P>(cursor), NonNull::new(ctx)) else {
        return SQLITE_MISUSE;
    };
    let state = table.bridge.handles().restore::<Mutex<T::Cursor>>(handle);
    let context = Context::new(&table.bridge, ctx);
    let out = catch_unwind(AssertUnwindSafe(|| state.lock().column(&context, col)));
    let status = match &out {
        Ok(Ok(())) => 0,
        Ok(Err(err)) => err.status(),
        Err(_) => SQLITE_ERROR,
    };
    context.conclude(out, "virtual table column", true);
    status
}

extern "C" fn x_rowid<P: Sqlite3Api, T: VirtualTable<P>>(
    cursor: *mut sqlite3_vtab_cursor,
    p_rowid: *mut i64,
) -> i32 {
    if p_rowid.is_null() {
        return SQLITE_MISUSE;
    }
    with_cursor::<P, T>(cursor, "rowid", |_, cursor| {
        let rowid = cursor.rowid()?;
        unsafe { *p_rowid = rowid };
        Ok(())
    })
}

pub(super) extern "C" fn x_update<P: Sqlite3Api, T: WritableVirtualTable<P>>(
    vtab: *mut sqlite3_vtab,
    argc: i32,
    argv: *mut *mut P::Value,
    p_rowid: *mut i64,
) -> i32 {
    let Some(table) = table_box::<P>(vtab) else {
        return SQLITE_MISUSE;
    };
    let api = table.bridge.api();
    let state = table.state::<Mutex<T>>();
    let out = guard("update", || {
        let args = unsafe { args_from_raw(api, argc, argv)? };
        let mut rows = state.lock();
        match args.as_slice() {
            [] => Err(Error::misuse("update called without arguments")),
            [key] => rows.delete(key),
            [key, rowid, values @ ..] if key.is_null() => {
                let rowid = rows.insert(rowid, values)?;
                if !p_rowid.is_null() {
                    unsafe { *p_rowid = rowid };
                }
                Ok(())
            }
            [key, new_key, values @ ..] if key.same_key(new_key) => rows.update(key, values),
            [old_key, new_key, values @ ..] => rows.replace(old_key, new_key, values),
        }
    });
    table.report("update", out)
}

#[derive(Clone, Copy)]
enum TxnStep {
    Begin,
    Sync,
    Commit,
    Rollback,
}

impl TxnStep {
    fn name(self) -> &'static str {
        match self {
            TxnStep::Begin => "begin",
            TxnStep::Sync => "sync",
            TxnStep::Commit => "commit",
            TxnStep::Rollback => "rollback",
        }
    }
}

fn transition<P: Sqlite3Api, T: TransactionalVirtualTable<P>>(
    vtab: *mut sqlite3_vtab,
    step: TxnStep,
) -> i32 {
    let Some(table) = table_box::<P>(vtab) else {
        return SQLITE_MISUSE;
    };
    let what = step.name();
    let needs_active = !matches!(step, TxnStep::Begin);
    if table.in_txn != needs_active {
        tracing::warn!(what, active = table.in_txn, "virtual table transaction out of order");
        let msg = if needs_active {
            format!("{what} without an active transaction")
        } else {
            "begin while a transaction is active".to_owned()
        };
        return table.report(what, Err(Error::misuse(msg)));
    }
    let state = table.state::<Mutex<T>>();
    let out = guard(what, || {
        let mut t = state.lock();
        match step {
            TxnStep::Begin => t.begin(),
            TxnStep::Sync => t.sync(),
            TxnStep::Commit => t.commit(),
            TxnStep::Rollback => t.rollback(),
        }
    });
    table.in_txn = match step {
        TxnStep::Begin => out.is_ok(),
        TxnStep::Sync => true,
        // The engine ends the transaction after commit even when it fails.
        TxnStep::Commit | TxnStep::Rollback => false,
    };
    table.report(what, out)
}

pub(super) extern "C" fn x_begin<P: Sqlite3Api, T: TransactionalVirtualTable<P>>(
    vtab: *mut sqlite3_vtab,
) -> i32 {
    transition::<P, T>(vtab, TxnStep::Begin)
}

pub(super) extern "C" fn x_sync<P: Sqlite3Api, T: TransactionalVirtualTable<P>>(
    vtab: *mut sqlite3_vtab,
) -> i32 {
    transition::<P, T>(vtab, TxnStep::Sync)
}

pub(super) extern "C" fn x_commit<P: Sqlite3Api, T: TransactionalVirtualTable<P>>(
    vtab: *mut sqlite3_vtab,
) -> i32 {
    transition::<P, T>(vtab, TxnStep::Commit)
}

pub(super) extern "C" fn x_rollback<P: Sqlite3Api, T: TransactionalVirtualTable<P>>(
    vtab: *mut sqlite3_vtab,
) -> i32 {
    transition::<P, T>(vtab, TxnStep::Rollback)
}
