//! Dynamic `libsqlite3` backend for `sqlite-bridge`.
//!
//! The library is opened with `dlopen` at run time; optional entry points
//! missing from older or differently configured builds simply leave the
//! matching [`FeatureSet`] flag unset.

#![allow(non_camel_case_types)]

mod core_impl;
mod extensions_impl;

use libc::{c_char, c_int, c_uchar, c_void};
use sqlite_bridge::{
    ApiVersion, Error, ErrorCode, FeatureSet, FunctionFlags, OpenFlags, RawBytes, Result, XCompare,
    XDestroy, XUnlockNotify,
};
use std::ffi::{CStr, CString};
use std::ptr::{NonNull, null_mut};
use std::sync::OnceLock;

#[cfg(target_os = "linux")]
#[link(name = "dl")]
unsafe extern "C" {}

const SQLITE_OK: i32 = 0;
const SQLITE_ROW: i32 = 100;
const SQLITE_DONE: i32 = 101;

const SQLITE_OPEN_READONLY: i32 = 0x0000_0001;
const SQLITE_OPEN_READWRITE: i32 = 0x0000_0002;
const SQLITE_OPEN_CREATE: i32 = 0x0000_0004;
const SQLITE_OPEN_URI: i32 = 0x0000_0040;
const SQLITE_OPEN_NOMUTEX: i32 = 0x0000_8000;
const SQLITE_OPEN_FULLMUTEX: i32 = 0x0001_0000;
const SQLITE_OPEN_SHAREDCACHE: i32 = 0x0002_0000;
const SQLITE_OPEN_PRIVATECACHE: i32 = 0x0004_0000;
const SQLITE_OPEN_EXRESCODE: i32 = 0x0200_0000;

const SQLITE_UTF8: i32 = 0x0000_0001;
const SQLITE_DETERMINISTIC: i32 = 0x0000_0800;
const SQLITE_INNOCUOUS: i32 = 0x0002_0000;
const SQLITE_DIRECTONLY: i32 = 0x0008_0000;
const EMPTY_BYTE: u8 = 0;

type sqlite3 = c_void;
type sqlite3_stmt = c_void;
type sqlite3_value = c_void;
type sqlite3_context = c_void;

type sqlite3_destructor_type = Option<unsafe extern "C" fn(*mut c_void)>;

type XFuncRaw = extern "C" fn(*mut sqlite3_context, c_int, *mut *mut sqlite3_value);
type XFinalRaw = extern "C" fn(*mut sqlite3_context);

type OpenV2 =
    unsafe extern "C" fn(*const c_char, *mut *mut sqlite3, c_int, *const c_char) -> c_int;
type Close = unsafe extern "C" fn(*mut sqlite3) -> c_int;
type PrepareV2 = unsafe extern "C" fn(
    *mut sqlite3,
    *const c_char,
    c_int,
    *mut *mut sqlite3_stmt,
    *mut *const c_char,
) -> c_int;
type PrepareV3 = unsafe extern "C" fn(
    *mut sqlite3,
    *const c_char,
    c_int,
    u32,
    *mut *mut sqlite3_stmt,
    *mut *const c_char,
) -> c_int;
type StmtStatus = unsafe extern "C" fn(*mut sqlite3_stmt) -> c_int;
type DbHandle = unsafe extern "C" fn(*mut sqlite3_stmt) -> *mut sqlite3;

type BindNull = unsafe extern "C" fn(*mut sqlite3_stmt, c_int) -> c_int;
type BindInt64 = unsafe extern "C" fn(*mut sqlite3_stmt, c_int, i64) -> c_int;
type BindDouble = unsafe extern "C" fn(*mut sqlite3_stmt, c_int, f64) -> c_int;
type BindText = unsafe extern "C" fn(
    *mut sqlite3_stmt,
    c_int,
    *const c_char,
    c_int,
    sqlite3_destructor_type,
) -> c_int;
type BindBlob = unsafe extern "C" fn(
    *mut sqlite3_stmt,
    c_int,
    *const c_void,
    c_int,
    sqlite3_destructor_type,
) -> c_int;
type BindPointer = unsafe extern "C" fn(
    *mut sqlite3_stmt,
    c_int,
    *mut c_void,
    *const c_char,
    Option<XDestroy>,
) -> c_int;
type BindParameterName = unsafe extern "C" fn(*mut sqlite3_stmt, c_int) -> *const c_char;
type BindParameterIndex = unsafe extern "C" fn(*mut sqlite3_stmt, *const c_char) -> c_int;

type ColumnCount = unsafe extern "C" fn(*mut sqlite3_stmt) -> c_int;
type ColumnInt = unsafe extern "C" fn(*mut sqlite3_stmt, c_int) -> c_int;
type ColumnInt64 = unsafe extern "C" fn(*mut sqlite3_stmt, c_int) -> i64;
type ColumnDouble = unsafe extern "C" fn(*mut sqlite3_stmt, c_int) -> f64;
type ColumnText = unsafe extern "C" fn(*mut sqlite3_stmt, c_int) -> *const c_uchar;
type ColumnBlob = unsafe extern "C" fn(*mut sqlite3_stmt, c_int) -> *const c_void;
type ColumnName = unsafe extern "C" fn(*mut sqlite3_stmt, c_int) -> *const c_char;

type DbInt = unsafe extern "C" fn(*mut sqlite3) -> c_int;
type ErrMsg = unsafe extern "C" fn(*mut sqlite3) -> *const c_char;
type LastInsertRowid = unsafe extern "C" fn(*mut sqlite3) -> i64;

type CreateFunctionV2 = unsafe extern "C" fn(
    *mut sqlite3,
    *const c_char,
    c_int,
    c_int,
    *mut c_void,
    Option<XFuncRaw>,
    Option<XFuncRaw>,
    Option<XFinalRaw>,
    Option<XDestroy>,
) -> c_int;
type CreateWindowFunction = unsafe extern "C" fn(
    *mut sqlite3,
    *const c_char,
    c_int,
    c_int,
    *mut c_void,
    Option<XFuncRaw>,
    Option<XFinalRaw>,
    Option<XFinalRaw>,
    Option<XFuncRaw>,
    Option<XDestroy>,
) -> c_int;
type CreateCollationV2 = unsafe extern "C" fn(
    *mut sqlite3,
    *const c_char,
    c_int,
    *mut c_void,
    Option<XCompare>,
    Option<XDestroy>,
) -> c_int;
type CreateModuleV2 = unsafe extern "C" fn(
    *mut sqlite3,
    *const c_char,
    *const c_void,
    *mut c_void,
    Option<XDestroy>,
) -> c_int;
type DeclareVTab = unsafe extern "C" fn(*mut sqlite3, *const c_char) -> c_int;

type AggregateContext = unsafe extern "C" fn(*mut sqlite3_context, c_int) -> *mut c_void;
type UserData = unsafe extern "C" fn(*mut sqlite3_context) -> *mut c_void;
type ResultVoid = unsafe extern "C" fn(*mut sqlite3_context);
type ResultInt = unsafe extern "C" fn(*mut sqlite3_context, c_int);
type ResultInt64 = unsafe extern "C" fn(*mut sqlite3_context, i64);
type ResultDouble = unsafe extern "C" fn(*mut sqlite3_context, f64);
type ResultText =
    unsafe extern "C" fn(*mut sqlite3_context, *const c_char, c_int, sqlite3_destructor_type);
type ResultBlob =
    unsafe extern "C" fn(*mut sqlite3_context, *const c_void, c_int, sqlite3_destructor_type);
type ResultError = unsafe extern "C" fn(*mut sqlite3_context, *const c_char, c_int);
type ResultValue = unsafe extern "C" fn(*mut sqlite3_context, *mut sqlite3_value);
type ResultSubtype = unsafe extern "C" fn(*mut sqlite3_context, u32);
type ResultPointer =
    unsafe extern "C" fn(*mut sqlite3_context, *mut c_void, *const c_char, Option<XDestroy>);

type ValueInt = unsafe extern "C" fn(*mut sqlite3_value) -> c_int;
type ValueInt64 = unsafe extern "C" fn(*mut sqlite3_value) -> i64;
type ValueDouble = unsafe extern "C" fn(*mut sqlite3_value) -> f64;
type ValueText = unsafe extern "C" fn(*mut sqlite3_value) -> *const c_uchar;
type ValueBlob = unsafe extern "C" fn(*mut sqlite3_value) -> *const c_void;
type ValueSubtype = unsafe extern "C" fn(*mut sqlite3_value) -> u32;
type ValuePointer = unsafe extern "C" fn(*mut sqlite3_value, *const c_char) -> *mut c_void;

type Limit = unsafe extern "C" fn(*mut sqlite3, c_int, c_int) -> c_int;
type UnlockNotify = unsafe extern "C" fn(*mut sqlite3, Option<XUnlockNotify>, *mut c_void) -> c_int;
type CommitHook = unsafe extern "C" fn(
    *mut sqlite3,
    Option<extern "C" fn(*mut c_void) -> c_int>,
    *mut c_void,
) -> *mut c_void;
type RollbackHook =
    unsafe extern "C" fn(*mut sqlite3, Option<extern "C" fn(*mut c_void)>, *mut c_void) -> *mut c_void;

type LibversionNumber = unsafe extern "C" fn() -> c_int;
type Malloc = unsafe extern "C" fn(c_int) -> *mut c_void;
type Free = unsafe extern "C" fn(*mut c_void);

struct LibHandle {
    handle: *mut c_void,
}

unsafe impl Send for LibHandle {}
unsafe impl Sync for LibHandle {}

impl LibHandle {
    unsafe fn open() -> Option<Self> {
        for name in lib_names() {
            let name = unsafe { CStr::from_bytes_with_nul_unchecked(name) };
            let handle = unsafe { libc::dlopen(name.as_ptr(), libc::RTLD_LAZY | libc::RTLD_LOCAL) };
            if !handle.is_null() {
                tracing::debug!(library = ?name, "loaded sqlite library");
                return Some(Self { handle });
            }
        }
        tracing::debug!("no sqlite library found");
        None
    }

    unsafe fn symbol<T: Copy>(&self, name: &'static [u8]) -> Option<T> {
        let sym = unsafe { libc::dlsym(self.handle, name.as_ptr().cast::<c_char>()) };
        if sym.is_null() {
            return None;
        }
        debug_assert_eq!(size_of::<T>(), size_of::<*mut c_void>());
        Some(unsafe { std::mem::transmute_copy(&sym) })
    }
}

struct LibSqlite3Fns {
    open_v2: OpenV2,
    close: Close,
    prepare_v2: PrepareV2,
    prepare_v3: Option<PrepareV3>,
    step: StmtStatus,
    reset: StmtStatus,
    finalize: StmtStatus,
    db_handle: Option<DbHandle>,
    bind_null: BindNull,
    bind_int64: BindInt64,
    bind_double: BindDouble,
    bind_text: BindText,
    bind_blob: BindBlob,
    bind_pointer: Option<BindPointer>,
    clear_bindings: StmtStatus,
    bind_parameter_count: ColumnCount,
    bind_parameter_name: BindParameterName,
    bind_parameter_index: BindParameterIndex,
    column_count: ColumnCount,
    column_type: ColumnInt,
    column_int64: ColumnInt64,
    column_double: ColumnDouble,
    column_text: ColumnText,
    column_blob: ColumnBlob,
    column_bytes: ColumnInt,
    column_name: ColumnName,
    errcode: DbInt,
    errmsg: ErrMsg,
    extended_errcode: Option<DbInt>,
    last_insert_rowid: LastInsertRowid,
    changes: DbInt,
    create_function_v2: CreateFunctionV2,
    create_window_function: Option<CreateWindowFunction>,
    create_collation_v2: Option<CreateCollationV2>,
    create_module_v2: Option<CreateModuleV2>,
    declare_vtab: DeclareVTab,
    aggregate_context: AggregateContext,
    user_data: UserData,
    result_null: ResultVoid,
    result_int64: ResultInt64,
    result_double: ResultDouble,
    result_text: ResultText,
    result_blob: ResultBlob,
    result_zeroblob: ResultInt,
    result_value: ResultValue,
    result_subtype: Option<ResultSubtype>,
    result_pointer: Option<ResultPointer>,
    result_error: ResultError,
    result_error_code: ResultInt,
    result_error_nomem: ResultVoid,
    value_type: ValueInt,
    value_int64: ValueInt64,
    value_double: ValueDouble,
    value_text: ValueText,
    value_blob: ValueBlob,
    value_bytes: ValueInt,
    value_subtype: Option<ValueSubtype>,
    value_nochange: Option<ValueInt>,
    value_pointer: Option<ValuePointer>,
    get_autocommit: DbInt,
    limit: Limit,
    unlock_notify: Option<UnlockNotify>,
    commit_hook: Option<CommitHook>,
    rollback_hook: Option<RollbackHook>,
    libversion_number: LibversionNumber,
    malloc: Malloc,
    free: Free,
}

impl LibSqlite3Fns {
    unsafe fn load(lib: &LibHandle) -> Option<Self> {
        unsafe {
            Some(Self {
                open_v2: lib.symbol(b"sqlite3_open_v2\0")?,
                close: lib.symbol(b"sqlite3_close\0")?,
                prepare_v2: lib.symbol(b"sqlite3_prepare_v2\0")?,
                prepare_v3: lib.symbol(b"sqlite3_prepare_v3\0"),
                step: lib.symbol(b"sqlite3_step\0")?,
                reset: lib.symbol(b"sqlite3_reset\0")?,
                finalize: lib.symbol(b"sqlite3_finalize\0")?,
                db_handle: lib.symbol(b"sqlite3_db_handle\0"),
                bind_null: lib.symbol(b"sqlite3_bind_null\0")?,
                bind_int64: lib.symbol(b"sqlite3_bind_int64\0")?,
                bind_double: lib.symbol(b"sqlite3_bind_double\0")?,
                bind_text: lib.symbol(b"sqlite3_bind_text\0")?,
                bind_blob: lib.symbol(b"sqlite3_bind_blob\0")?,
                bind_pointer: lib.symbol(b"sqlite3_bind_pointer\0"),
                clear_bindings: lib.symbol(b"sqlite3_clear_bindings\0")?,
                bind_parameter_count: lib.symbol(b"sqlite3_bind_parameter_count\0")?,
                bind_parameter_name: lib.symbol(b"sqlite3_bind_parameter_name\0")?,
                bind_parameter_index: lib.symbol(b"sqlite3_bind_parameter_index\0")?,
                column_count: lib.symbol(b"sqlite3_column_count\0")?,
                column_type: lib.symbol(b"sqlite3_column_type\0")?,
                column_int64: lib.symbol(b"sqlite3_column_int64\0")?,
                column_double: lib.symbol(b"sqlite3_column_double\0")?,
                column_text: lib.symbol(b"sqlite3_column_text\0")?,
                column_blob: lib.symbol(b"sqlite3_column_blob\0")?,
                column_bytes: lib.symbol(b"sqlite3_column_bytes\0")?,
                column_name: lib.symbol(b"sqlite3_column_name\0")?,
                errcode: lib.symbol(b"sqlite3_errcode\0")?,
                errmsg: lib.symbol(b"sqlite3_errmsg\0")?,
                extended_errcode: lib.symbol(b"sqlite3_extended_errcode\0"),
                last_insert_rowid: lib.symbol(b"sqlite3_last_insert_rowid\0")?,
                changes: lib.symbol(b"sqlite3_changes\0")?,
                create_function_v2: lib.symbol(b"sqlite3_create_function_v2\0")?,
                create_window_function: lib.symbol(b"sqlite3_create_window_function\0"),
                create_collation_v2: lib.symbol(b"sqlite3_create_collation_v2\0"),
                create_module_v2: lib.symbol(b"sqlite3_create_module_v2\0"),
                declare_vtab: lib.symbol(b"sqlite3_declare_vtab\0")?,
                aggregate_context: lib.symbol(b"sqlite3_aggregate_context\0")?,
                user_data: lib.symbol(b"sqlite3_user_data\0")?,
                result_null: lib.symbol(b"sqlite3_result_null\0")?,
                result_int64: lib.symbol(b"sqlite3_result_int64\0")?,
                result_double: lib.symbol(b"sqlite3_result_double\0")?,
                result_text: lib.symbol(b"sqlite3_result_text\0")?,
                result_blob: lib.symbol(b"sqlite3_result_blob\0")?,
                result_zeroblob: lib.symbol(b"sqlite3_result_zeroblob\0")?,
                result_value: lib.symbol(b"sqlite3_result_value\0")?,
                result_subtype: lib.symbol(b"sqlite3_result_subtype\0"),
                result_pointer: lib.symbol(b"sqlite3_result_pointer\0"),
                result_error: lib.symbol(b"sqlite3_result_error\0")?,
                result_error_code: lib.symbol(b"sqlite3_result_error_code\0")?,
                result_error_nomem: lib.symbol(b"sqlite3_result_error_nomem\0")?,
                value_type: lib.symbol(b"sqlite3_value_type\0")?,
                value_int64: lib.symbol(b"sqlite3_value_int64\0")?,
                value_double: lib.symbol(b"sqlite3_value_double\0")?,
                value_text: lib.symbol(b"sqlite3_value_text\0")?,
                value_blob: lib.symbol(b"sqlite3_value_blob\0")?,
                value_bytes: lib.symbol(b"sqlite3_value_bytes\0")?,
                value_subtype: lib.symbol(b"sqlite3_value_subtype\0"),
                value_nochange: lib.symbol(b"sqlite3_value_nochange\0"),
                value_pointer: lib.symbol(b"sqlite3_value_pointer\0"),
                get_autocommit: lib.symbol(b"sqlite3_get_autocommit\0")?,
                limit: lib.symbol(b"sqlite3_limit\0")?,
                unlock_notify: lib.symbol(b"sqlite3_unlock_notify\0"),
                commit_hook: lib.symbol(b"sqlite3_commit_hook\0"),
                rollback_hook: lib.symbol(b"sqlite3_rollback_hook\0"),
                libversion_number: lib.symbol(b"sqlite3_libversion_number\0")?,
                malloc: lib.symbol(b"sqlite3_malloc\0")?,
                free: lib.symbol(b"sqlite3_free\0")?,
            })
        }
    }

    fn features(&self) -> FeatureSet {
        let mut features = FeatureSet::CREATE_FUNCTION_V2;
        let optional = [
            (self.prepare_v3.is_some(), FeatureSet::PREPARE_V3),
            (self.create_window_function.is_some(), FeatureSet::WINDOW_FUNCTIONS),
            (self.extended_errcode.is_some(), FeatureSet::EXTENDED_ERRCODES),
            (self.create_module_v2.is_some(), FeatureSet::VIRTUAL_TABLES),
            (self.create_collation_v2.is_some(), FeatureSet::COLLATIONS),
            (self.unlock_notify.is_some(), FeatureSet::UNLOCK_NOTIFY),
            (
                self.result_pointer.is_some()
                    && self.bind_pointer.is_some()
                    && self.value_pointer.is_some(),
                FeatureSet::POINTERS,
            ),
            (
                self.commit_hook.is_some() && self.rollback_hook.is_some(),
                FeatureSet::HOOKS,
            ),
        ];
        for (present, flag) in optional {
            if present {
                features |= flag;
            }
        }
        features
    }
}

/// `sqlite3_user_data` for the receiver-less [`Sqlite3Api::user_data`](sqlite_bridge::Sqlite3Api::user_data).
static USER_DATA_FN: OnceLock<UserData> = OnceLock::new();

/// Dynamic `libsqlite3` backend loaded via `dlopen`.
pub struct LibSqlite3 {
    fns: LibSqlite3Fns,
    features: FeatureSet,
    api_version: ApiVersion,
    _lib: LibHandle,
}

impl LibSqlite3 {
    /// Load `libsqlite3` and return a process-wide adapter instance.
    ///
    /// Returns `None` if the library or a required symbol is unavailable.
    pub fn load() -> Option<&'static LibSqlite3> {
        static INSTANCE: OnceLock<Option<&'static LibSqlite3>> = OnceLock::new();
        *INSTANCE.get_or_init(|| unsafe {
            let lib = LibHandle::open()?;
            let Some(fns) = LibSqlite3Fns::load(&lib) else {
                tracing::warn!("sqlite library lacks required symbols");
                return None;
            };
            let api_version = ApiVersion::from_number((fns.libversion_number)());
            let features = fns.features();
            let _ = USER_DATA_FN.set(fns.user_data);
            tracing::debug!(?api_version, features = features.bits(), "libsqlite3 backend ready");
            let adapter = LibSqlite3 {
                fns,
                features,
                api_version,
                _lib: lib,
            };
            Some(&*Box::leak(Box::new(adapter)))
        })
    }

    fn error_from_rc(&self, rc: i32, db: Option<NonNull<sqlite3>>) -> Error {
        let message = db
            .and_then(|db| unsafe { raw_cstr((self.fns.errmsg)(db.as_ptr())) })
            .map(|c| c.to_string_lossy().into_owned());
        let extended = db.and_then(|db| {
            self.fns
                .extended_errcode
                .map(|f| unsafe { f(db.as_ptr()) })
        });
        Error::from_code(rc, message, extended)
    }

    /// Error for a failed statement call, carrying the connection's extended code.
    fn stmt_error(&self, rc: i32, stmt: NonNull<sqlite3_stmt>) -> Error {
        let db = self
            .fns
            .db_handle
            .and_then(|f| NonNull::new(unsafe { f(stmt.as_ptr()) }));
        self.error_from_rc(rc, db)
    }

    fn check(&self, rc: i32, db: Option<NonNull<sqlite3>>) -> Result<()> {
        if rc == SQLITE_OK {
            Ok(())
        } else {
            Err(self.error_from_rc(rc, db))
        }
    }

    // Allocated with sqlite3_malloc so the engine can release it with sqlite3_free.
    fn alloc_copy(&self, bytes: &[u8]) -> Result<(*const c_void, sqlite3_destructor_type)> {
        if bytes.is_empty() {
            return Ok((std::ptr::from_ref(&EMPTY_BYTE).cast(), None));
        }
        if bytes.len() > i32::MAX as usize {
            return Err(Error::with_message(ErrorCode::TooBig, "value too large"));
        }
        let ptr = unsafe { (self.fns.malloc)(bytes.len() as c_int) };
        if ptr.is_null() {
            return Err(Error::new(ErrorCode::NoMem));
        }
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len()) };
        Ok((ptr, Some(self.fns.free)))
    }
}

fn drop_registration_user_data(user_data: *mut c_void, destroy: Option<XDestroy>) {
    if let Some(destroy) = destroy {
        destroy(user_data);
    }
}

/// NUL-terminated copy of a registration name. On failure the registration's
/// user data is released, as the engine would have done.
fn registration_name_or_drop(
    name: &str,
    user_data: *mut c_void,
    destroy: Option<XDestroy>,
    what: &str,
) -> Result<CString> {
    CString::new(name).map_err(|_| {
        drop_registration_user_data(user_data, destroy);
        sqlite_bridge::nul_in_name(what)
    })
}

fn map_open_flags(flags: OpenFlags) -> i32 {
    let table = [
        (OpenFlags::READ_ONLY, SQLITE_OPEN_READONLY),
        (OpenFlags::READ_WRITE, SQLITE_OPEN_READWRITE),
        (OpenFlags::CREATE, SQLITE_OPEN_CREATE),
        (OpenFlags::URI, SQLITE_OPEN_URI),
        (OpenFlags::NO_MUTEX, SQLITE_OPEN_NOMUTEX),
        (OpenFlags::FULL_MUTEX, SQLITE_OPEN_FULLMUTEX),
        (OpenFlags::SHARED_CACHE, SQLITE_OPEN_SHAREDCACHE),
        (OpenFlags::PRIVATE_CACHE, SQLITE_OPEN_PRIVATECACHE),
        (OpenFlags::EXRESCODE, SQLITE_OPEN_EXRESCODE),
    ];
    table
        .into_iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .fold(0, |out, (_, raw)| out | raw)
}

fn map_function_flags(flags: FunctionFlags) -> i32 {
    let mut out = SQLITE_UTF8;
    if flags.contains(FunctionFlags::DETERMINISTIC) {
        out |= SQLITE_DETERMINISTIC;
    }
    if flags.contains(FunctionFlags::DIRECT_ONLY) {
        out |= SQLITE_DIRECTONLY;
    }
    if flags.contains(FunctionFlags::INNOCUOUS) {
        out |= SQLITE_INNOCUOUS;
    }
    out
}

fn clamp_len(len: usize) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX)
}

unsafe fn raw_cstr<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) })
    }
}

fn raw_bytes(ptr: *const u8, len: c_int) -> RawBytes {
    if ptr.is_null() {
        return RawBytes::empty();
    }
    RawBytes {
        ptr,
        len: usize::try_from(len).unwrap_or(0),
    }
}

fn lib_names() -> &'static [&'static [u8]] {
    #[cfg(target_os = "macos")]
    const NAMES: [&[u8]; 3] = [
        b"libsqlite3.dylib\0",
        b"libsqlite3.so.0\0",
        b"libsqlite3.so\0",
    ];
    #[cfg(not(target_os = "macos"))]
    const NAMES: [&[u8]; 2] = [b"libsqlite3.so.0\0", b"libsqlite3.so\0"];
    &NAMES
}

#[cfg(test)]
mod tests {
    use super::{
        drop_registration_user_data, map_function_flags, map_open_flags, registration_name_or_drop,
    };
    use sqlite_bridge::{ErrorCode, FunctionFlags, OpenFlags};
    use std::ffi::c_void;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DROP_CALLS: AtomicUsize = AtomicUsize::new(0);
    static DROP_TEST_LOCK: Mutex<()> = Mutex::new(());

    extern "C" fn drop_counting_box(ptr: *mut c_void) {
        DROP_CALLS.fetch_add(1, Ordering::SeqCst);
        if !ptr.is_null() {
            unsafe { drop(Box::from_raw(ptr.cast::<usize>())) };
        }
    }

    #[test]
    fn nul_in_registration_name_releases_user_data() {
        let _guard = DROP_TEST_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        DROP_CALLS.store(0, Ordering::SeqCst);
        let user_data = Box::into_raw(Box::new(7usize)).cast::<c_void>();
        let err = registration_name_or_drop("bad\0name", user_data, Some(drop_counting_box), "function name")
            .expect_err("interior NUL should fail");
        assert_eq!(err.code, ErrorCode::Misuse);
        assert_eq!(err.to_string(), "function name contains NUL");
        assert_eq!(DROP_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn valid_registration_name_keeps_user_data() {
        let _guard = DROP_TEST_LOCK
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        DROP_CALLS.store(0, Ordering::SeqCst);
        let user_data = Box::into_raw(Box::new(9usize)).cast::<c_void>();
        let name = registration_name_or_drop("ok_name", user_data, Some(drop_counting_box), "function name")
            .expect("valid name should pass");
        assert_eq!(name.to_str().unwrap(), "ok_name");
        assert_eq!(DROP_CALLS.load(Ordering::SeqCst), 0);
        drop_registration_user_data(user_data, Some(drop_counting_box));
        assert_eq!(DROP_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn flag_mapping() {
        assert_eq!(map_open_flags(OpenFlags::READ_WRITE | OpenFlags::CREATE), 0x6);
        assert_eq!(map_open_flags(OpenFlags::SHARED_CACHE), 0x0002_0000);
        assert_eq!(map_function_flags(FunctionFlags::empty()), 0x1);
        assert_eq!(
            map_function_flags(FunctionFlags::DETERMINISTIC | FunctionFlags::DIRECT_ONLY),
            0x1 | 0x800 | 0x0008_0000
        );
    }
}
