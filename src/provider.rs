#![allow(non_camel_case_types)]

use core::ffi::{CStr, c_char, c_void};
use core::ptr::NonNull;

use crate::error::{Error, ErrorCode, Result};

/// SQLite API version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ApiVersion {
    /// Major version component (X in X.Y.Z).
    pub major: u16,
    /// Minor version component (Y in X.Y.Z).
    pub minor: u16,
    /// Patch version component (Z in X.Y.Z).
    pub patch: u16,
}

impl ApiVersion {
    pub const fn new(major: u16, minor: u16, patch: u16) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Decode `sqlite3_libversion_number()` form (`X*1000000 + Y*1000 + Z`).
    pub const fn from_number(number: i32) -> Self {
        let number = if number < 0 { 0 } else { number };
        Self::new(
            (number / 1_000_000) as u16,
            ((number / 1000) % 1000) as u16,
            (number % 1000) as u16,
        )
    }

    /// Encode in `sqlite3_libversion_number()` form.
    pub const fn number(self) -> i32 {
        self.major as i32 * 1_000_000 + self.minor as i32 * 1000 + self.patch as i32
    }
}

macro_rules! flag_set {
    ($name:ident: $repr:ty) => {
        impl $name {
            /// Build an empty flag set.
            pub const fn empty() -> Self {
                Self { bits: 0 }
            }

            /// Build a flag set from raw bits.
            pub const fn from_bits(bits: $repr) -> Self {
                Self { bits }
            }

            /// Raw bit representation.
            pub const fn bits(self) -> $repr {
                self.bits
            }

            /// Whether `other` is fully contained in this set.
            pub const fn contains(self, other: $name) -> bool {
                (self.bits & other.bits) == other.bits
            }
        }

        impl core::ops::BitOr for $name {
            type Output = $name;

            fn bitor(self, rhs: $name) -> $name {
                $name {
                    bits: self.bits | rhs.bits,
                }
            }
        }

        impl core::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.bits |= rhs.bits;
            }
        }
    };
}

/// Backend capability flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureSet {
    bits: u64,
}

impl FeatureSet {
    /// `prepare_v3` is available.
    pub const PREPARE_V3: FeatureSet = FeatureSet { bits: 1 << 0 };
    /// `create_function_v2` is available.
    pub const CREATE_FUNCTION_V2: FeatureSet = FeatureSet { bits: 1 << 1 };
    /// Virtual table APIs are available.
    pub const VIRTUAL_TABLES: FeatureSet = FeatureSet { bits: 1 << 2 };
    /// Extended error code APIs are available.
    pub const EXTENDED_ERRCODES: FeatureSet = FeatureSet { bits: 1 << 3 };
    /// Window-function APIs are available.
    pub const WINDOW_FUNCTIONS: FeatureSet = FeatureSet { bits: 1 << 4 };
    /// `create_collation_v2` is available.
    pub const COLLATIONS: FeatureSet = FeatureSet { bits: 1 << 5 };
    /// `sqlite3_unlock_notify` is available (shared-cache builds).
    pub const UNLOCK_NOTIFY: FeatureSet = FeatureSet { bits: 1 << 6 };
    /// Commit/rollback hooks are available.
    pub const HOOKS: FeatureSet = FeatureSet { bits: 1 << 7 };
    /// Typed pointer values (`sqlite3_result_pointer` and friends).
    pub const POINTERS: FeatureSet = FeatureSet { bits: 1 << 8 };
}

flag_set!(FeatureSet: u64);

/// Flags for opening a database connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenFlags {
    bits: u32,
}

impl OpenFlags {
    pub const READ_ONLY: OpenFlags = OpenFlags { bits: 1 << 0 };
    pub const READ_WRITE: OpenFlags = OpenFlags { bits: 1 << 1 };
    pub const CREATE: OpenFlags = OpenFlags { bits: 1 << 2 };
    pub const URI: OpenFlags = OpenFlags { bits: 1 << 3 };
    pub const NO_MUTEX: OpenFlags = OpenFlags { bits: 1 << 4 };
    pub const FULL_MUTEX: OpenFlags = OpenFlags { bits: 1 << 5 };
    /// Enable shared page cache (required for unlock notification).
    pub const SHARED_CACHE: OpenFlags = OpenFlags { bits: 1 << 6 };
    pub const PRIVATE_CACHE: OpenFlags = OpenFlags { bits: 1 << 7 };
    /// Request extended result codes.
    pub const EXRESCODE: OpenFlags = OpenFlags { bits: 1 << 8 };
}

flag_set!(OpenFlags: u32);

/// Options passed to `Sqlite3Api::open`.
#[derive(Clone, Copy, Debug)]
pub struct OpenOptions<'a> {
    pub flags: OpenFlags,
    /// Optional VFS name passed through to the backend.
    pub vfs: Option<&'a str>,
}

/// Result of a `step` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepResult {
    Row,
    Done,
}

/// SQLite storage class for a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Integer,
    Float,
    Text,
    Blob,
}

impl ValueType {
    /// Decode the engine's storage-class code.
    pub const fn from_code(code: i32) -> ValueType {
        match code {
            1 => ValueType::Integer,
            2 => ValueType::Float,
            3 => ValueType::Text,
            4 => ValueType::Blob,
            _ => ValueType::Null,
        }
    }

    pub const fn to_code(self) -> i32 {
        match self {
            ValueType::Integer => 1,
            ValueType::Float => 2,
            ValueType::Text => 3,
            ValueType::Blob => 4,
            ValueType::Null => 5,
        }
    }
}

/// Raw view into engine-managed bytes.
///
/// Valid only until the owning row or value cell changes (`step`, `reset`,
/// `finalize`, or the end of the current callback).
#[derive(Clone, Copy, Debug)]
pub struct RawBytes {
    pub ptr: *const u8,
    pub len: usize,
}

impl RawBytes {
    pub const fn empty() -> Self {
        Self {
            ptr: core::ptr::null(),
            len: 0,
        }
    }

    /// # Safety
    /// Caller must ensure the pointer/length remain valid for `'a`.
    pub unsafe fn as_slice<'a>(self) -> &'a [u8] {
        if self.ptr.is_null() {
            return &[];
        }
        unsafe { core::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// # Safety
    /// Caller must ensure the pointer/length remain valid for `'a`.
    pub unsafe fn as_str<'a>(self) -> Option<&'a str> {
        core::str::from_utf8(unsafe { self.as_slice() }).ok()
    }
}

/// Function flags passed to `create_function_v2` / `create_window_function`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FunctionFlags {
    bits: u32,
}

impl FunctionFlags {
    /// Same inputs always produce the same output.
    pub const DETERMINISTIC: FunctionFlags = FunctionFlags { bits: 1 << 0 };
    /// Callable from top-level SQL only.
    pub const DIRECT_ONLY: FunctionFlags = FunctionFlags { bits: 1 << 1 };
    /// No side effects; safe in triggers and views.
    pub const INNOCUOUS: FunctionFlags = FunctionFlags { bits: 1 << 2 };
}

flag_set!(FunctionFlags: u32);

/// Scalar/step/inverse callback signature.
pub type XFunc<P> =
    extern "C" fn(*mut <P as Sqlite3Api>::Context, i32, *mut *mut <P as Sqlite3Api>::Value);
/// Final/value callback signature.
pub type XFinal<P> = extern "C" fn(*mut <P as Sqlite3Api>::Context);
/// Destructor for registration user data.
pub type XDestroy = extern "C" fn(*mut c_void);
/// Collation compare callback: `(user_data, lhs_len, lhs, rhs_len, rhs)`.
pub type XCompare = extern "C" fn(*mut c_void, i32, *const c_void, i32, *const c_void) -> i32;
/// Unlock-notify callback: `(args, n_args)`.
pub type XUnlockNotify = extern "C" fn(*mut *mut c_void, i32);

/// Provider SPI over a SQLite C API backend.
///
/// # Safety
/// Implementations must uphold the SQLite C ABI contracts.
///
/// # Ownership of registration user data
/// For every registration method that accepts `user_data` plus a destructor,
/// ownership moves to the provider at call entry. On success the destructor
/// must run exactly once when the engine retires the registration. On failure
/// the provider must run it exactly once before returning `Err`.
#[allow(clippy::missing_safety_doc, clippy::too_many_arguments)]
pub unsafe trait Sqlite3Api: Send + Sync + 'static {
    /// Backend's opaque `sqlite3*` type.
    type Db;
    /// Backend's opaque `sqlite3_stmt*` type.
    type Stmt;
    /// Backend's opaque `sqlite3_value*` type.
    type Value;
    /// Backend's opaque `sqlite3_context*` type.
    type Context;

    /// Engine version this provider talks to.
    fn api_version(&self) -> ApiVersion;
    fn feature_set(&self) -> FeatureSet;
    /// Stable backend identifier for diagnostics.
    fn backend_name(&self) -> &'static str;

    /// Allocate memory the engine may release with `sqlite3_free`.
    unsafe fn malloc(&self, size: usize) -> *mut c_void;
    unsafe fn free(&self, ptr: *mut c_void);

    unsafe fn open(&self, filename: &str, options: OpenOptions<'_>) -> Result<NonNull<Self::Db>>;
    unsafe fn close(&self, db: NonNull<Self::Db>) -> Result<()>;

    unsafe fn prepare_v2(&self, db: NonNull<Self::Db>, sql: &str) -> Result<NonNull<Self::Stmt>>;
    unsafe fn prepare_v3(
        &self,
        db: NonNull<Self::Db>,
        sql: &str,
        flags: u32,
    ) -> Result<NonNull<Self::Stmt>>;

    /// Execute one step. Errors must carry the raw (possibly extended) code.
    unsafe fn step(&self, stmt: NonNull<Self::Stmt>) -> Result<StepResult>;
    unsafe fn reset(&self, stmt: NonNull<Self::Stmt>) -> Result<()>;
    unsafe fn finalize(&self, stmt: NonNull<Self::Stmt>) -> Result<()>;

    unsafe fn bind_null(&self, stmt: NonNull<Self::Stmt>, idx: i32) -> Result<()>;
    unsafe fn bind_int64(&self, stmt: NonNull<Self::Stmt>, idx: i32, v: i64) -> Result<()>;
    unsafe fn bind_double(&self, stmt: NonNull<Self::Stmt>, idx: i32, v: f64) -> Result<()>;
    /// Providers must copy `v` or retain it per SQLite lifetime rules.
    unsafe fn bind_text(&self, stmt: NonNull<Self::Stmt>, idx: i32, v: &str) -> Result<()>;
    /// Providers must copy `v` or retain it per SQLite lifetime rules.
    unsafe fn bind_blob(&self, stmt: NonNull<Self::Stmt>, idx: i32, v: &[u8]) -> Result<()>;

    /// Bind a typed pointer. `destroy` runs once the engine drops the
    /// binding, and also when binding fails.
    unsafe fn bind_pointer(
        &self,
        _stmt: NonNull<Self::Stmt>,
        _idx: i32,
        ptr: *mut c_void,
        _type_tag: &'static CStr,
        destroy: Option<XDestroy>,
    ) -> Result<()> {
        Err(unsupported_registration(ptr, destroy, "bind_pointer unsupported"))
    }
    unsafe fn clear_bindings(&self, stmt: NonNull<Self::Stmt>) -> Result<()>;
    unsafe fn bind_parameter_count(&self, stmt: NonNull<Self::Stmt>) -> i32;
    /// Parameter name with its prefix (`:a`, `@a`, `$a`, `?1`); null when anonymous.
    unsafe fn bind_parameter_name(&self, stmt: NonNull<Self::Stmt>, idx: i32) -> *const c_char;
    /// Index of the parameter named `name`, 0 when there is none.
    unsafe fn bind_parameter_index(&self, stmt: NonNull<Self::Stmt>, name: &str) -> i32;

    unsafe fn column_count(&self, stmt: NonNull<Self::Stmt>) -> i32;
    unsafe fn column_type(&self, stmt: NonNull<Self::Stmt>, col: i32) -> ValueType;
    unsafe fn column_int64(&self, stmt: NonNull<Self::Stmt>, col: i32) -> i64;
    unsafe fn column_double(&self, stmt: NonNull<Self::Stmt>, col: i32) -> f64;
    unsafe fn column_text(&self, stmt: NonNull<Self::Stmt>, col: i32) -> RawBytes;
    unsafe fn column_blob(&self, stmt: NonNull<Self::Stmt>, col: i32) -> RawBytes;
    /// Result column name; null when `col` is out of range.
    unsafe fn column_name(&self, stmt: NonNull<Self::Stmt>, col: i32) -> *const c_char;

    unsafe fn errcode(&self, db: NonNull<Self::Db>) -> i32;
    unsafe fn errmsg(&self, db: NonNull<Self::Db>) -> *const c_char;
    unsafe fn extended_errcode(&self, db: NonNull<Self::Db>) -> Option<i32>;
    unsafe fn last_insert_rowid(&self, db: NonNull<Self::Db>) -> i64;
    /// Rows changed by the most recent statement.
    unsafe fn changes(&self, db: NonNull<Self::Db>) -> i32;

    /// Register scalar or aggregate callbacks (`sqlite3_create_function_v2`).
    unsafe fn create_function_v2(
        &self,
        db: NonNull<Self::Db>,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        x_func: Option<XFunc<Self>>,
        x_step: Option<XFunc<Self>>,
        x_final: Option<XFinal<Self>>,
        user_data: *mut c_void,
        destroy: Option<XDestroy>,
    ) -> Result<()>
    where
        Self: Sized;

    /// Register window callbacks (`sqlite3_create_window_function`).
    unsafe fn create_window_function(
        &self,
        db: NonNull<Self::Db>,
        name: &str,
        n_args: i32,
        flags: FunctionFlags,
        x_step: Option<XFunc<Self>>,
        x_final: Option<XFinal<Self>>,
        x_value: Option<XFinal<Self>>,
        x_inverse: Option<XFunc<Self>>,
        user_data: *mut c_void,
        destroy: Option<XDestroy>,
    ) -> Result<()>
    where
        Self: Sized;

    /// Register or replace a UTF-8 collation (`sqlite3_create_collation_v2`).
    unsafe fn create_collation_v2(
        &self,
        _db: NonNull<Self::Db>,
        _name: &str,
        context: *mut c_void,
        _cmp: Option<XCompare>,
        destroy: Option<XDestroy>,
    ) -> Result<()> {
        Err(unsupported_registration(
            context,
            destroy,
            "create_collation_v2 unsupported",
        ))
    }

    /// Fetch (or, with `bytes > 0`, allocate) the per-group aggregate memory.
    ///
    /// The returned address identifies one aggregate group for its lifetime.
    unsafe fn aggregate_context(&self, ctx: NonNull<Self::Context>, bytes: usize) -> *mut c_void;
    /// Registration user data for `ctx`.
    ///
    /// Takes no receiver: trampolines recover the provider from this pointer.
    unsafe fn user_data(ctx: NonNull<Self::Context>) -> *mut c_void;

    unsafe fn result_null(&self, ctx: NonNull<Self::Context>);
    unsafe fn result_int64(&self, ctx: NonNull<Self::Context>, v: i64);
    unsafe fn result_double(&self, ctx: NonNull<Self::Context>, v: f64);
    /// Providers must ensure the engine copies or retains `v`.
    unsafe fn result_text(&self, ctx: NonNull<Self::Context>, v: &str);
    /// Providers must ensure the engine copies or retains `v`.
    unsafe fn result_blob(&self, ctx: NonNull<Self::Context>, v: &[u8]);
    unsafe fn result_zeroblob(&self, ctx: NonNull<Self::Context>, len: usize) {
        unsafe { self.result_blob(ctx, &vec![0u8; len]) }
    }
    /// Copy another value cell into the result.
    unsafe fn result_value(&self, ctx: NonNull<Self::Context>, v: NonNull<Self::Value>);
    unsafe fn result_subtype(&self, ctx: NonNull<Self::Context>, subtype: u32);
    /// Return a typed pointer. The result reads as NULL from SQL and only
    /// [`value_pointer`](Self::value_pointer) with the same tag recovers it.
    /// `destroy` runs once the engine drops the value, and also on failure.
    unsafe fn result_pointer(
        &self,
        _ctx: NonNull<Self::Context>,
        ptr: *mut c_void,
        _type_tag: &'static CStr,
        destroy: Option<XDestroy>,
    ) -> Result<()> {
        Err(unsupported_registration(ptr, destroy, "result_pointer unsupported"))
    }
    unsafe fn result_error(&self, ctx: NonNull<Self::Context>, msg: &str);
    unsafe fn result_error_code(&self, ctx: NonNull<Self::Context>, code: i32);
    unsafe fn result_error_nomem(&self, ctx: NonNull<Self::Context>);

    unsafe fn value_type(&self, v: NonNull<Self::Value>) -> ValueType;
    unsafe fn value_int64(&self, v: NonNull<Self::Value>) -> i64;
    unsafe fn value_double(&self, v: NonNull<Self::Value>) -> f64;
    unsafe fn value_text(&self, v: NonNull<Self::Value>) -> RawBytes;
    unsafe fn value_blob(&self, v: NonNull<Self::Value>) -> RawBytes;
    unsafe fn value_bytes(&self, v: NonNull<Self::Value>) -> usize {
        unsafe { self.value_blob(v).len }
    }
    unsafe fn value_subtype(&self, v: NonNull<Self::Value>) -> u32;
    unsafe fn value_nochange(&self, v: NonNull<Self::Value>) -> bool;
    /// Pointer carried by `v` under `type_tag`, null otherwise.
    unsafe fn value_pointer(&self, _v: NonNull<Self::Value>, _type_tag: &'static CStr) -> *mut c_void {
        core::ptr::null_mut()
    }

    /// Declare a virtual table schema during xCreate/xConnect.
    unsafe fn declare_vtab(&self, db: NonNull<Self::Db>, schema: &str) -> Result<()>;

    /// Register a virtual table module (`sqlite3_create_module_v2`).
    ///
    /// `module` must stay valid until `destroy` runs; callers keep it inside
    /// `user_data`.
    unsafe fn create_module_v2(
        &self,
        db: NonNull<Self::Db>,
        name: &str,
        module: *const sqlite3_module<Self>,
        user_data: *mut c_void,
        destroy: Option<XDestroy>,
    ) -> Result<()>
    where
        Self: Sized;

    /// `sqlite3_get_autocommit`.
    unsafe fn get_autocommit(&self, db: NonNull<Self::Db>) -> bool;
    /// `sqlite3_limit`; a negative `new_value` only queries.
    unsafe fn limit(&self, db: NonNull<Self::Db>, id: i32, new_value: i32) -> i32;

    /// Arm (`callback` set) or cancel an unlock notification on `db`.
    ///
    /// The engine may invoke `callback` synchronously before returning.
    unsafe fn unlock_notify(
        &self,
        _db: NonNull<Self::Db>,
        _callback: Option<XUnlockNotify>,
        _arg: *mut c_void,
    ) -> Result<()> {
        Err(Error::feature_unavailable("unlock_notify unsupported"))
    }
}

fn unsupported_registration(
    user_data: *mut c_void,
    destroy: Option<XDestroy>,
    msg: &'static str,
) -> Error {
    if let Some(destroy) = destroy {
        destroy(user_data);
    }
    Error::feature_unavailable(msg)
}

/// Optional backend extension for commit/rollback hooks.
///
/// # Safety
/// Implementations must keep callback/context pointers registered until
/// replaced and must return the previous context pointer unchanged.
#[allow(clippy::missing_safety_doc)]
pub unsafe trait Sqlite3Hooks: Sqlite3Api {
    /// `sqlite3_commit_hook`; returns the previous context.
    unsafe fn commit_hook(
        &self,
        db: NonNull<Self::Db>,
        callback: Option<extern "C" fn(*mut c_void) -> i32>,
        context: *mut c_void,
    ) -> *mut c_void;
    /// `sqlite3_rollback_hook`; returns the previous context.
    unsafe fn rollback_hook(
        &self,
        db: NonNull<Self::Db>,
        callback: Option<extern "C" fn(*mut c_void)>,
        context: *mut c_void,
    ) -> *mut c_void;
}

/// Engine-side base of every virtual table instance.
#[repr(C)]
pub struct sqlite3_vtab {
    pub p_module: *const c_void,
    pub n_ref: i32,
    /// Error message owned by the engine allocator.
    pub z_err_msg: *mut c_char,
}

/// Engine-side base of every virtual table cursor.
#[repr(C)]
pub struct sqlite3_vtab_cursor {
    pub p_vtab: *mut sqlite3_vtab,
}

#[repr(C)]
pub struct sqlite3_index_constraint {
    pub i_column: i32,
    pub op: u8,
    pub usable: u8,
    pub i_term_offset: i32,
}

#[repr(C)]
pub struct sqlite3_index_orderby {
    pub i_column: i32,
    pub desc: u8,
}

#[repr(C)]
pub struct sqlite3_index_constraint_usage {
    pub argv_index: i32,
    pub omit: u8,
}

/// `sqlite3_index_info`. Trailing fields exist only on newer engines.
#[repr(C)]
pub struct sqlite3_index_info {
    pub n_constraint: i32,
    pub a_constraint: *const sqlite3_index_constraint,
    pub n_order_by: i32,
    pub a_order_by: *const sqlite3_index_orderby,
    pub a_constraint_usage: *mut sqlite3_index_constraint_usage,
    pub idx_num: i32,
    pub idx_str: *mut c_char,
    pub need_to_free_idx_str: i32,
    pub order_by_consumed: i32,
    pub estimated_cost: f64,
    /// Since 3.8.2.
    pub estimated_rows: i64,
    /// Since 3.9.0.
    pub idx_flags: i32,
    /// Since 3.10.0.
    pub col_used: u64,
}

type XVTabFactory<P> = extern "C" fn(
    *mut <P as Sqlite3Api>::Db,
    *mut c_void,
    i32,
    *const *const c_char,
    *mut *mut sqlite3_vtab,
    *mut *mut c_char,
) -> i32;
type XVTab = extern "C" fn(*mut sqlite3_vtab) -> i32;
type XCursor = extern "C" fn(*mut sqlite3_vtab_cursor) -> i32;
type XSavepoint = extern "C" fn(*mut sqlite3_vtab, i32) -> i32;

/// ABI-accurate `sqlite3_module` typed over the provider's handles.
#[repr(C)]
pub struct sqlite3_module<P: Sqlite3Api> {
    pub i_version: i32,
    pub x_create: Option<XVTabFactory<P>>,
    pub x_connect: Option<XVTabFactory<P>>,
    pub x_best_index: Option<extern "C" fn(*mut sqlite3_vtab, *mut sqlite3_index_info) -> i32>,
    pub x_disconnect: Option<XVTab>,
    pub x_destroy: Option<XVTab>,
    pub x_open: Option<extern "C" fn(*mut sqlite3_vtab, *mut *mut sqlite3_vtab_cursor) -> i32>,
    pub x_close: Option<XCursor>,
    pub x_filter: Option<
        extern "C" fn(*mut sqlite3_vtab_cursor, i32, *const c_char, i32, *mut *mut P::Value) -> i32,
    >,
    pub x_next: Option<XCursor>,
    pub x_eof: Option<XCursor>,
    pub x_column: Option<extern "C" fn(*mut sqlite3_vtab_cursor, *mut P::Context, i32) -> i32>,
    pub x_rowid: Option<extern "C" fn(*mut sqlite3_vtab_cursor, *mut i64) -> i32>,
    pub x_update: Option<extern "C" fn(*mut sqlite3_vtab, i32, *mut *mut P::Value, *mut i64) -> i32>,
    pub x_begin: Option<XVTab>,
    pub x_sync: Option<XVTab>,
    pub x_commit: Option<XVTab>,
    pub x_rollback: Option<XVTab>,
    pub x_find_function: Option<
        extern "C" fn(
            *mut sqlite3_vtab,
            i32,
            *const c_char,
            *mut Option<XFunc<P>>,
            *mut *mut c_void,
        ) -> i32,
    >,
    pub x_rename: Option<extern "C" fn(*mut sqlite3_vtab, *const c_char) -> i32>,
    pub x_savepoint: Option<XSavepoint>,
    pub x_release: Option<XSavepoint>,
    pub x_rollback_to: Option<XSavepoint>,
    pub x_shadow_name: Option<extern "C" fn(*const c_char) -> i32>,
}

impl<P: Sqlite3Api> sqlite3_module<P> {
    /// Module table with every callback unset.
    pub const fn empty() -> Self {
        Self {
            i_version: 1,
            x_create: None,
            x_connect: None,
            x_best_index: None,
            x_disconnect: None,
            x_destroy: None,
            x_open: None,
            x_close: None,
            x_filter: None,
            x_next: None,
            x_eof: None,
            x_column: None,
            x_rowid: None,
            x_update: None,
            x_begin: None,
            x_sync: None,
            x_commit: None,
            x_rollback: None,
            x_find_function: None,
            x_rename: None,
            x_savepoint: None,
            x_release: None,
            x_rollback_to: None,
            x_shadow_name: None,
        }
    }
}

/// Misuse error for a name containing an interior NUL.
pub fn nul_in_name(what: &str) -> Error {
    Error::with_message(ErrorCode::Misuse, format!("{what} contains NUL"))
}

/// Copy `s` into a NUL-terminated buffer owned by the engine allocator.
pub(crate) unsafe fn engine_string<P: Sqlite3Api>(api: &P, s: &str) -> Result<*mut c_char> {
    let bytes = s.as_bytes();
    let ptr = unsafe { api.malloc(bytes.len() + 1) }.cast::<u8>();
    if ptr.is_null() {
        return Err(Error::new(ErrorCode::NoMem));
    }
    unsafe {
        core::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
        *ptr.add(bytes.len()) = 0;
    }
    Ok(ptr.cast())
}

#[cfg(test)]
mod tests {
    use super::{ApiVersion, FeatureSet, FunctionFlags, ValueType};

    #[test]
    fn version_number_round_trip() {
        let v = ApiVersion::from_number(3_045_001);
        assert_eq!(v, ApiVersion::new(3, 45, 1));
        assert_eq!(v.number(), 3_045_001);
        assert!(v >= ApiVersion::new(3, 10, 0));
    }

    #[test]
    fn flag_sets_compose() {
        let features = FeatureSet::VIRTUAL_TABLES | FeatureSet::HOOKS;
        assert!(features.contains(FeatureSet::HOOKS));
        assert!(!features.contains(FeatureSet::UNLOCK_NOTIFY));
        let flags = FunctionFlags::DETERMINISTIC | FunctionFlags::INNOCUOUS;
        assert!(!flags.contains(FunctionFlags::DIRECT_ONLY));
    }

    #[test]
    fn null_storage_class_code() {
        assert_eq!(ValueType::from_code(5), ValueType::Null);
        assert_eq!(ValueType::Null.to_code(), 5);
    }
}
